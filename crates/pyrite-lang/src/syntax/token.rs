#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    /// `f"..."` with escapes processed and `{}` fields left in place.
    FStr(String),
    Ident(String),
    True,
    False,
    None,

    // Keywords
    If,
    Elif,
    Else,
    For,
    While,
    In,
    Def,
    Return,
    Import,
    And,
    Or,
    Not,
    Pass,
    Break,
    Continue,
    Try,
    Except,
    Finally,
    Raise,
    As,
    Lambda,

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    StarStar,     // **
    Slash,        // /
    SlashSlash,   // //
    Percent,      // %
    Eq,           // =
    PlusEq,       // +=
    MinusEq,      // -=
    StarEq,       // *=
    SlashEq,      // /=
    PercentEq,    // %=
    EqEq,         // ==
    BangEq,       // !=
    Lt,           // <
    LtEq,         // <=
    Gt,           // >
    GtEq,         // >=

    // Punctuation
    Colon,        // :
    Comma,        // ,
    Dot,          // .
    LParen,       // (
    RParen,       // )
    LBrace,       // {
    RBrace,       // }
    LBracket,     // [
    RBracket,     // ]

    // Layout
    Newline,
    Indent,
    Dedent,

    Eof,
}

impl TokenKind {
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Self::Int(_) | Self::Float(_) | Self::Str(_) | Self::FStr(_) | Self::True | Self::False | Self::None
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::Plus | Self::Minus | Self::Star | Self::StarStar | Self::Slash | Self::SlashSlash | Self::Percent
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, Self::EqEq | Self::BangEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq)
    }

    pub fn is_augmented_assign(&self) -> bool {
        matches!(self, Self::PlusEq | Self::MinusEq | Self::StarEq | Self::SlashEq | Self::PercentEq)
    }

    pub fn is_layout(&self) -> bool {
        matches!(self, Self::Newline | Self::Indent | Self::Dedent)
    }

    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Self::If | Self::Elif | Self::Else | Self::For | Self::While | Self::In | Self::Def
            | Self::Return | Self::Import | Self::And | Self::Or | Self::Not | Self::Pass
            | Self::Break | Self::Continue | Self::Try | Self::Except | Self::Finally
            | Self::Raise | Self::As | Self::Lambda
        )
    }

    /// Short human-readable form used in parser diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::Int(n)    => format!("integer `{n}`"),
            Self::Float(x)  => format!("float `{x}`"),
            Self::Str(_)    => "string literal".into(),
            Self::FStr(_)   => "f-string literal".into(),
            Self::Ident(s)  => format!("identifier `{s}`"),
            Self::Newline   => "end of line".into(),
            Self::Indent    => "indent".into(),
            Self::Dedent    => "dedent".into(),
            Self::Eof       => "end of input".into(),
            other           => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::True => "True", Self::False => "False", Self::None => "None",
            Self::If => "if", Self::Elif => "elif", Self::Else => "else",
            Self::For => "for", Self::While => "while", Self::In => "in",
            Self::Def => "def", Self::Return => "return", Self::Import => "import",
            Self::And => "and", Self::Or => "or", Self::Not => "not",
            Self::Pass => "pass", Self::Break => "break", Self::Continue => "continue",
            Self::Try => "try", Self::Except => "except", Self::Finally => "finally",
            Self::Raise => "raise", Self::As => "as", Self::Lambda => "lambda",
            Self::Plus => "+", Self::Minus => "-", Self::Star => "*", Self::StarStar => "**",
            Self::Slash => "/", Self::SlashSlash => "//", Self::Percent => "%",
            Self::Eq => "=", Self::PlusEq => "+=", Self::MinusEq => "-=",
            Self::StarEq => "*=", Self::SlashEq => "/=", Self::PercentEq => "%=",
            Self::EqEq => "==", Self::BangEq => "!=",
            Self::Lt => "<", Self::LtEq => "<=", Self::Gt => ">", Self::GtEq => ">=",
            Self::Colon => ":", Self::Comma => ",", Self::Dot => ".",
            Self::LParen => "(", Self::RParen => ")",
            Self::LBrace => "{", Self::RBrace => "}",
            Self::LBracket => "[", Self::RBracket => "]",
            _ => "?",
        }
    }
}

/// Maps an identifier string to its keyword token, or returns `Ident`.
pub fn keyword_or_ident(s: String) -> TokenKind {
    match s.as_str() {
        "if"       => TokenKind::If,
        "elif"     => TokenKind::Elif,
        "else"     => TokenKind::Else,
        "for"      => TokenKind::For,
        "while"    => TokenKind::While,
        "in"       => TokenKind::In,
        "def"      => TokenKind::Def,
        "return"   => TokenKind::Return,
        "import"   => TokenKind::Import,
        "and"      => TokenKind::And,
        "or"       => TokenKind::Or,
        "not"      => TokenKind::Not,
        "pass"     => TokenKind::Pass,
        "break"    => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "try"      => TokenKind::Try,
        "except"   => TokenKind::Except,
        "finally"  => TokenKind::Finally,
        "raise"    => TokenKind::Raise,
        "as"       => TokenKind::As,
        "lambda"   => TokenKind::Lambda,
        "True"     => TokenKind::True,
        "False"    => TokenKind::False,
        "None"     => TokenKind::None,
        _          => TokenKind::Ident(s),
    }
}

// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, column: usize) -> Self {
        Self { kind, line, column }
    }
}
