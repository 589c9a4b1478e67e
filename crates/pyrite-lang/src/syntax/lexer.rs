//! Indentation-aware lexer.
//!
//! Block structure is carried by `Indent` / `Dedent` tokens computed from the
//! leading whitespace of each logical line. Newlines inside brackets are
//! ignored so that list/dict literals and argument lists may span lines.

use crate::error::{Error, ErrorCode};
use crate::syntax::token::{Token, TokenKind, keyword_or_ident};

const TAB_WIDTH: usize = 4;

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
    indent_stack: Vec<usize>,
    bracket_depth: usize,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            bracket_depth: 0,
            at_line_start: true,
        }
    }

    /// Lex a fragment embedded in a larger source, such as an f-string
    /// field, reporting positions relative to where the fragment starts.
    pub(crate) fn at(source: &'a str, line: usize, column: usize) -> Self {
        Self { line, column, ..Self::new(source) }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Vec<Error>> {
        let mut tokens: Vec<Token> = Vec::new();
        let mut errors = Vec::new();

        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                match self.read_indentation(&mut tokens) {
                    Ok(true) => {}
                    Ok(false) => continue, // blank or comment-only line
                    Err(e) => errors.push(e),
                }
                self.at_line_start = false;
            }

            self.skip_inline_whitespace();

            if self.is_at_end() {
                break;
            }

            match self.peek() {
                b'\n' => {
                    let (line, col) = (self.line, self.column);
                    self.advance();
                    if self.bracket_depth == 0 {
                        tokens.push(Token::new(TokenKind::Newline, line, col));
                        self.at_line_start = true;
                    }
                }
                b'#' => self.skip_line(),
                b'\\' if self.peek_next() == b'\n' => {
                    // explicit line continuation
                    self.advance();
                    self.advance();
                }
                _ => match self.next_token() {
                    Ok(tok) => tokens.push(tok),
                    Err(e) => {
                        errors.push(e);
                        self.skip_line();
                    }
                },
            }
        }

        // Close the final logical line and every open block.
        if tokens.last().is_some_and(|t| t.kind != TokenKind::Newline) {
            tokens.push(Token::new(TokenKind::Newline, self.line, self.column));
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            tokens.push(Token::new(TokenKind::Dedent, self.line, self.column));
        }
        tokens.push(Token::new(TokenKind::Eof, self.line, self.column));

        if errors.is_empty() { Ok(tokens) } else { Err(errors) }
    }

    // ─── Indentation ─────────────────────────────────────────────────────────

    /// Measure the indentation of the line starting at `pos` and emit the
    /// matching `Indent` / `Dedent` tokens. Returns `Ok(false)` when the line
    /// is blank or holds only a comment, in which case it has been consumed.
    fn read_indentation(&mut self, tokens: &mut Vec<Token>) -> Result<bool, Error> {
        let mut width = 0;
        while !self.is_at_end() {
            match self.peek() {
                b' '  => { width += 1; self.advance(); }
                b'\t' => { width = (width / TAB_WIDTH + 1) * TAB_WIDTH; self.advance(); }
                b'\r' => { self.advance(); }
                _ => break,
            }
        }

        if self.is_at_end() {
            return Ok(true);
        }
        match self.peek() {
            b'\n' => { self.advance(); return Ok(false); }
            b'#'  => {
                self.skip_line();
                if !self.is_at_end() { self.advance(); }
                return Ok(false);
            }
            _ => {}
        }

        let (line, col) = (self.line, self.column);
        let current = self.current_indent();
        if width > current {
            self.indent_stack.push(width);
            tokens.push(Token::new(TokenKind::Indent, line, col));
        } else if width < current {
            while self.current_indent() > width {
                self.indent_stack.pop();
                tokens.push(Token::new(TokenKind::Dedent, line, col));
            }
            if self.current_indent() != width {
                // Resynchronise on the new level so later lines lex sensibly.
                self.indent_stack.push(width);
                return Err(Error::new(ErrorCode::L004, line, col,
                    "unindent does not match any outer indentation level"));
            }
        }
        Ok(true)
    }

    fn current_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    // ─── Tokens ──────────────────────────────────────────────────────────────

    fn next_token(&mut self) -> Result<Token, Error> {
        let line = self.line;
        let col = self.column;
        let ch = self.advance();

        let kind = match ch {
            b'+' => self.with_eq(TokenKind::PlusEq, TokenKind::Plus),
            b'-' => self.with_eq(TokenKind::MinusEq, TokenKind::Minus),
            b'%' => self.with_eq(TokenKind::PercentEq, TokenKind::Percent),
            b'*' => {
                if self.peek() == b'*' { self.advance(); TokenKind::StarStar }
                else { self.with_eq(TokenKind::StarEq, TokenKind::Star) }
            }
            b'/' => {
                if self.peek() == b'/' { self.advance(); TokenKind::SlashSlash }
                else { self.with_eq(TokenKind::SlashEq, TokenKind::Slash) }
            }
            b'=' => self.with_eq(TokenKind::EqEq, TokenKind::Eq),
            b'<' => self.with_eq(TokenKind::LtEq, TokenKind::Lt),
            b'>' => self.with_eq(TokenKind::GtEq, TokenKind::Gt),
            b'!' => {
                if self.peek() == b'=' { self.advance(); TokenKind::BangEq }
                else {
                    return Err(Error::new(ErrorCode::L001, line, col,
                        "expected `!=`, bare `!` is not valid (use `not`)"));
                }
            }
            b':' => TokenKind::Colon,
            b',' => TokenKind::Comma,
            b'.' => {
                if self.peek().is_ascii_digit() { self.read_number(ch, line, col)? }
                else { TokenKind::Dot }
            }
            b'(' => { self.bracket_depth += 1; TokenKind::LParen }
            b'[' => { self.bracket_depth += 1; TokenKind::LBracket }
            b'{' => { self.bracket_depth += 1; TokenKind::LBrace }
            b')' => { self.bracket_depth = self.bracket_depth.saturating_sub(1); TokenKind::RParen }
            b']' => { self.bracket_depth = self.bracket_depth.saturating_sub(1); TokenKind::RBracket }
            b'}' => { self.bracket_depth = self.bracket_depth.saturating_sub(1); TokenKind::RBrace }

            b'"' | b'\'' => TokenKind::Str(self.read_string(ch, line, col)?),
            b'f' | b'F' if matches!(self.peek(), b'"' | b'\'') => {
                let quote = self.advance();
                TokenKind::FStr(self.read_string(quote, line, col)?)
            }
            b'0'..=b'9' => self.read_number(ch, line, col)?,
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => keyword_or_ident(self.read_ident()),

            _ => {
                let start = self.pos - 1;
                let found = self.source[start..].chars().next().unwrap_or('?');
                // skip the remaining bytes of a multi-byte character
                for _ in 1..found.len_utf8() { self.advance(); }
                return Err(Error::new(ErrorCode::L001, line, col,
                    format!("unexpected character `{found}`")));
            }
        };

        Ok(Token::new(kind, line, col))
    }

    fn with_eq(&mut self, with: TokenKind, without: TokenKind) -> TokenKind {
        if self.peek() == b'=' { self.advance(); with } else { without }
    }

    // ─── Primitives ──────────────────────────────────────────────────────────

    fn advance(&mut self) -> u8 {
        let ch = self.bytes[self.pos];
        self.pos += 1;
        if ch == b'\n' { self.line += 1; self.column = 1; }
        else { self.column += 1; }
        ch
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { 0 } else { self.bytes[self.pos] }
    }

    fn peek_next(&self) -> u8 {
        if self.pos + 1 >= self.bytes.len() { 0 } else { self.bytes[self.pos + 1] }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn skip_inline_whitespace(&mut self) {
        while matches!(self.peek(), b' ' | b'\t' | b'\r') && !self.is_at_end() {
            self.advance();
        }
    }

    /// Skip to (but not past) the next newline.
    fn skip_line(&mut self) {
        while !self.is_at_end() && self.peek() != b'\n' { self.advance(); }
    }

    // ─── Readers ─────────────────────────────────────────────────────────────

    fn read_string(&mut self, quote: u8, start_line: usize, start_col: usize) -> Result<String, Error> {
        let mut buf: Vec<u8> = Vec::new();
        let mut error: Option<Error> = None;
        loop {
            if self.is_at_end() || self.peek() == b'\n' {
                return Err(Error::new(ErrorCode::L002, start_line, start_col,
                    "unterminated string literal"));
            }
            let ch = self.advance();
            if ch == quote { break; }
            if ch == b'\\' {
                let esc_line = self.line;
                let esc_col  = self.column;
                if self.is_at_end() { continue; }
                match self.advance() {
                    b'n'  => buf.push(b'\n'),
                    b't'  => buf.push(b'\t'),
                    b'r'  => buf.push(b'\r'),
                    b'0'  => buf.push(0),
                    b'"'  => buf.push(b'"'),
                    b'\'' => buf.push(b'\''),
                    b'\\' => buf.push(b'\\'),
                    other => {
                        // Keep consuming so the rest of the string doesn't cascade.
                        if error.is_none() {
                            error = Some(Error::new(ErrorCode::L003, esc_line, esc_col,
                                format!("unknown escape sequence `\\{}`", other as char)));
                        }
                    }
                }
            } else {
                buf.push(ch);
            }
        }
        if let Some(e) = error { return Err(e); }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn read_number(&mut self, first: u8, line: usize, col: usize) -> Result<TokenKind, Error> {
        let start = self.pos - 1;
        let mut is_float = first == b'.';
        while self.peek().is_ascii_digit() || self.peek() == b'_' { self.advance(); }

        // A `.` is a decimal point only when followed by a digit, so that
        // `xs.append` after a number-free receiver never reaches here.
        if !is_float && self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.advance();
            while self.peek().is_ascii_digit() { self.advance(); }
        } else if is_float {
            while self.peek().is_ascii_digit() { self.advance(); }
        }

        if matches!(self.peek(), b'e' | b'E')
            && (self.peek_next().is_ascii_digit()
                || (matches!(self.peek_next(), b'+' | b'-')
                    && self.bytes.get(self.pos + 2).is_some_and(|b| b.is_ascii_digit())))
        {
            is_float = true;
            self.advance();
            if matches!(self.peek(), b'+' | b'-') { self.advance(); }
            while self.peek().is_ascii_digit() { self.advance(); }
        }

        let text: String = self.source[start..self.pos].chars().filter(|c| *c != '_').collect();
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| Error::new(ErrorCode::L001, line, col, format!("invalid float literal `{text}`")))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| Error::new(ErrorCode::L005, line, col,
                    format!("integer literal `{text}` does not fit in 64 bits")))
        }
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos - 1;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }
        self.source[start..self.pos].to_string()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn lex_err(src: &str) -> Vec<Error> {
        Lexer::new(src).tokenize().unwrap_err()
    }

    fn ident(s: &str) -> TokenKind { TokenKind::Ident(s.into()) }

    #[test]
    fn empty() {
        assert_eq!(lex(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn blank_and_comment_lines_produce_nothing() {
        assert_eq!(lex("\n\n   \n# just a comment\n"), vec![TokenKind::Eof]);
    }

    #[test]
    fn integer_and_float_literals() {
        assert_eq!(lex("42"), vec![TokenKind::Int(42), TokenKind::Newline, TokenKind::Eof]);
        assert_eq!(lex("3.14"), vec![TokenKind::Float(3.14), TokenKind::Newline, TokenKind::Eof]);
        assert_eq!(lex("1e3"), vec![TokenKind::Float(1000.0), TokenKind::Newline, TokenKind::Eof]);
        assert_eq!(lex(".5"), vec![TokenKind::Float(0.5), TokenKind::Newline, TokenKind::Eof]);
        assert_eq!(lex("1_000"), vec![TokenKind::Int(1000), TokenKind::Newline, TokenKind::Eof]);
    }

    #[test]
    fn method_dot_not_consumed_by_identifier() {
        assert_eq!(
            lex("xs.append"),
            vec![ident("xs"), TokenKind::Dot, ident("append"), TokenKind::Newline, TokenKind::Eof]
        );
    }

    #[test]
    fn keywords_and_constants() {
        assert_eq!(lex("def")[0], TokenKind::Def);
        assert_eq!(lex("elif")[0], TokenKind::Elif);
        assert_eq!(lex("import")[0], TokenKind::Import);
        assert_eq!(lex("True")[0], TokenKind::True);
        assert_eq!(lex("False")[0], TokenKind::False);
        assert_eq!(lex("None")[0], TokenKind::None);
        // lowercase booleans are plain identifiers
        assert_eq!(lex("true")[0], ident("true"));
    }

    #[test]
    fn compound_operators() {
        assert_eq!(lex("a //= b")[1], TokenKind::SlashSlash);
        assert_eq!(lex("a ** b")[1], TokenKind::StarStar);
        assert_eq!(lex("a += b")[1], TokenKind::PlusEq);
        assert_eq!(lex("a %= b")[1], TokenKind::PercentEq);
        assert_eq!(lex("a != b")[1], TokenKind::BangEq);
        assert_eq!(lex("a <= b")[1], TokenKind::LtEq);
    }

    #[test]
    fn strings_with_either_quote() {
        assert_eq!(lex(r#""hi""#)[0], TokenKind::Str("hi".into()));
        assert_eq!(lex("'hi'")[0], TokenKind::Str("hi".into()));
        assert_eq!(lex(r#"'it\'s'"#)[0], TokenKind::Str("it's".into()));
        assert_eq!(lex(r#""a\nb""#)[0], TokenKind::Str("a\nb".into()));
    }

    #[test]
    fn f_string_prefix() {
        assert_eq!(lex(r#"f"a{x}\n""#)[0], TokenKind::FStr("a{x}\n".into()));
        assert_eq!(lex("F'{y}'")[0], TokenKind::FStr("{y}".into()));
        // a bare `f` is still an identifier
        assert_eq!(lex("f(1)")[0], ident("f"));
    }

    #[test]
    fn exception_keywords() {
        assert_eq!(
            lex("try except finally raise as lambda")[..6].to_vec(),
            vec![TokenKind::Try, TokenKind::Except, TokenKind::Finally, TokenKind::Raise, TokenKind::As, TokenKind::Lambda]
        );
    }

    #[test]
    fn fragment_positions_are_offset() {
        let tokens = Lexer::at("a + b", 7, 12).tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (7, 12));
        assert_eq!((tokens[2].line, tokens[2].column), (7, 16));
    }

    #[test]
    fn non_ascii_string_contents_survive() {
        assert_eq!(lex("\"héllo ✓\"")[0], TokenKind::Str("héllo ✓".into()));
    }

    #[test]
    fn comment_after_code() {
        assert_eq!(
            lex("x = 1 # set x"),
            vec![ident("x"), TokenKind::Eq, TokenKind::Int(1), TokenKind::Newline, TokenKind::Eof]
        );
    }

    #[test]
    fn indent_and_dedent() {
        let src = "if x:\n    y = 1\nz = 2\n";
        assert_eq!(
            lex(src),
            vec![
                TokenKind::If, ident("x"), TokenKind::Colon, TokenKind::Newline,
                TokenKind::Indent, ident("y"), TokenKind::Eq, TokenKind::Int(1), TokenKind::Newline,
                TokenKind::Dedent, ident("z"), TokenKind::Eq, TokenKind::Int(2), TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn nested_blocks_closed_at_eof() {
        let src = "def f():\n    if x:\n        return 1";
        let kinds = lex(src);
        let dedents = kinds.iter().filter(|k| **k == TokenKind::Dedent).count();
        let indents = kinds.iter().filter(|k| **k == TokenKind::Indent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
        assert_eq!(kinds.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let src = "xs = [\n    1,\n    2,\n]\n";
        assert_eq!(
            lex(src),
            vec![
                ident("xs"), TokenKind::Eq, TokenKind::LBracket,
                TokenKind::Int(1), TokenKind::Comma, TokenKind::Int(2), TokenKind::Comma,
                TokenKind::RBracket, TokenKind::Newline, TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn blank_line_inside_block_keeps_indent() {
        let src = "def f():\n    a = 1\n\n    b = 2\n";
        let kinds = lex(src);
        assert_eq!(kinds.iter().filter(|k| **k == TokenKind::Indent).count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == TokenKind::Dedent).count(), 1);
    }

    #[test]
    fn unterminated_string_error() {
        let errs = lex_err(r#""oops"#);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].code, ErrorCode::L002);
    }

    #[test]
    fn invalid_escape_error() {
        let errs = lex_err(r#""\q""#);
        assert_eq!(errs[0].code, ErrorCode::L003);
    }

    #[test]
    fn bad_dedent_error() {
        let errs = lex_err("if x:\n        a = 1\n    b = 2\n");
        assert_eq!(errs[0].code, ErrorCode::L004);
    }

    #[test]
    fn integer_overflow_error() {
        let errs = lex_err("99999999999999999999");
        assert_eq!(errs[0].code, ErrorCode::L005);
    }

    #[test]
    fn unexpected_character_error() {
        let errs = lex_err("x = $");
        assert_eq!(errs[0].code, ErrorCode::L001);
        assert_eq!((errs[0].line, errs[0].column), (1, 5));
    }

    #[test]
    fn line_and_column_tracking() {
        let tokens = Lexer::new("a\nb").tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        // tokens[1] is the Newline after `a`
        assert_eq!((tokens[2].line, tokens[2].column), (2, 1));
    }

    #[test]
    fn token_kind_helpers() {
        assert!(TokenKind::Plus.is_arithmetic());
        assert!(TokenKind::EqEq.is_comparison());
        assert!(TokenKind::PlusEq.is_augmented_assign());
        assert!(TokenKind::Int(1).is_literal());
        assert!(TokenKind::Def.is_keyword());
        assert!(TokenKind::Indent.is_layout());
        assert!(!ident("x").is_keyword());
    }
}
