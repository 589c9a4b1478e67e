use thiserror::Error as ThisError;

/// Error codes prefixed by phase: L = lexer, P = parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Lexer
    L001, // unexpected character
    L002, // unterminated string literal
    L003, // invalid escape sequence
    L004, // dedent does not match any outer indentation level
    L005, // integer literal out of range

    // Parser
    P001, // unexpected token
    P002, // missing expected token
    P003, // invalid assignment target or parameter order
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L001 => "L001",
            Self::L002 => "L002",
            Self::L003 => "L003",
            Self::L004 => "L004",
            Self::L005 => "L005",
            Self::P001 => "P001",
            Self::P002 => "P002",
            Self::P003 => "P003",
        }
    }

    pub fn is_lexical(&self) -> bool {
        matches!(self, Self::L001 | Self::L002 | Self::L003 | Self::L004 | Self::L005)
    }
}

/// A lex- or parse-time error. Scripts that produce one never execute.
#[derive(Debug, Clone, PartialEq, ThisError)]
#[error("[{}] {line}:{column}: {message}", .code.as_str())]
pub struct Error {
    pub code: ErrorCode,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Error {
    pub fn new(code: ErrorCode, line: usize, column: usize, message: impl Into<String>) -> Self {
        Self { code, line, column, message: message.into() }
    }
}

// ─── Runtime ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unresolved identifier.
    Name,
    /// Conversion failure or operator applied to the wrong kinds.
    Type,
    /// Call-binding failure.
    Argument,
    Division,
    Index,
    Key,
    Import,
    Overflow,
    StackOverflow,
    Cancellation,
    /// A `raise` statement, or an Error value returned by a host function.
    Raised,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name          => "NameError",
            Self::Type          => "TypeError",
            Self::Argument      => "ArgumentError",
            Self::Division      => "DivisionError",
            Self::Index         => "IndexError",
            Self::Key           => "KeyError",
            Self::Import        => "ImportError",
            Self::Overflow      => "OverflowError",
            Self::StackOverflow => "StackOverflowError",
            Self::Cancellation  => "CancellationError",
            Self::Raised        => "Error",
        }
    }

    /// Whether an `except Name:` clause catches this kind. `Exception`
    /// catches everything except cancellation; the usual Python names are
    /// accepted for the kinds they correspond to.
    pub fn answers_to(&self, name: &str) -> bool {
        if *self == Self::Cancellation {
            return false;
        }
        name == "Exception"
            || name == self.as_str()
            || matches!(
                (self, name),
                (Self::Division, "ZeroDivisionError")
                    | (Self::Argument, "ValueError")
                    | (Self::StackOverflow, "RecursionError")
                    | (Self::Key | Self::Index, "LookupError")
            )
    }
}

#[derive(Debug, Clone, PartialEq, ThisError)]
#[error("{}: {message}{}", .kind.as_str(), line_suffix(.line))]
pub struct RuntimeError {
    pub kind: ErrorKind,
    /// 0 when the error did not originate at a known source line.
    pub line: usize,
    pub message: String,
}

fn line_suffix(line: &usize) -> String {
    if *line == 0 { String::new() } else { format!(" (line {line})") }
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, line: usize, message: impl Into<String>) -> Self {
        Self { kind, line, message: message.into() }
    }

    pub fn type_error(line: usize, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, line, message)
    }

    pub fn argument(line: usize, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Argument, line, message)
    }

    /// Attach a line number if none was recorded where the error was raised.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line == 0 { self.line = line; }
        self
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancellation
    }
}

// ─── Host-facing ──────────────────────────────────────────────────────────────

/// Everything the embedding API can fail with.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum ScriptError {
    #[error("syntax error: {}", join_errors(.0))]
    Syntax(Vec<Error>),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("variable `{0}` not found")]
    VariableNotFound(String),
    #[error("function `{0}` not found")]
    FunctionNotFound(String),
}

fn join_errors(errors: &[Error]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

impl ScriptError {
    /// The runtime error kind, if this failure happened during evaluation.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Runtime(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Runtime(e) if e.is_cancellation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_display_includes_kind_and_line() {
        let e = RuntimeError::new(ErrorKind::Division, 3, "division by zero");
        assert_eq!(e.to_string(), "DivisionError: division by zero (line 3)");
    }

    #[test]
    fn syntax_error_display() {
        let e = Error::new(ErrorCode::P002, 4, 7, "expected `:`, found end of line");
        assert_eq!(e.to_string(), "[P002] 4:7: expected `:`, found end of line");
    }

    #[test]
    fn handler_names() {
        assert!(ErrorKind::Division.answers_to("ZeroDivisionError"));
        assert!(ErrorKind::Division.answers_to("DivisionError"));
        assert!(ErrorKind::Key.answers_to("Exception"));
        assert!(ErrorKind::Raised.answers_to("Error"));
        assert!(!ErrorKind::Type.answers_to("KeyError"));
        assert!(!ErrorKind::Cancellation.answers_to("Exception"));
        assert!(!ErrorKind::Cancellation.answers_to("CancellationError"));
    }

    #[test]
    fn runtime_error_without_line() {
        let e = RuntimeError::new(ErrorKind::Raised, 0, "boom");
        assert_eq!(e.to_string(), "Error: boom");
    }

    #[test]
    fn at_line_keeps_first_line() {
        let e = RuntimeError::type_error(2, "x").at_line(9);
        assert_eq!(e.line, 2);
        let e = RuntimeError::type_error(0, "x").at_line(9);
        assert_eq!(e.line, 9);
    }

    #[test]
    fn script_error_from_runtime() {
        let e: ScriptError = RuntimeError::new(ErrorKind::Cancellation, 0, "deadline exceeded").into();
        assert!(e.is_cancellation());
        assert_eq!(e.kind(), Some(ErrorKind::Cancellation));
    }

    #[test]
    fn syntax_error_joins_messages() {
        let e = ScriptError::Syntax(vec![
            Error::new(ErrorCode::P002, 1, 5, "expected `:`"),
            Error::new(ErrorCode::L001, 2, 1, "unexpected character `$`"),
        ]);
        let msg = e.to_string();
        assert!(msg.contains("P002"));
        assert!(msg.contains("L001"));
        assert!(e.is_syntax());
    }
}
