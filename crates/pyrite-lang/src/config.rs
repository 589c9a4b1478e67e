/// Construction-time settings for an `Interpreter`.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterConfig {
    /// Nested script calls allowed before a StackOverflow error.
    pub max_call_depth: usize,
    /// Start in capture mode instead of writing to stdout.
    pub capture_output: bool,
    /// Install `print`, `len`, `range` and the other built-ins.
    pub load_builtins: bool,
    /// Libraries imported before the first evaluation.
    pub preload: Vec<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 1000,
            capture_output: false,
            load_builtins: true,
            preload: Vec::new(),
        }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    pub fn load_builtins(mut self, load: bool) -> Self {
        self.load_builtins = load;
        self
    }

    pub fn preload(mut self, library: impl Into<String>) -> Self {
        self.preload.push(library.into());
        self
    }
}
