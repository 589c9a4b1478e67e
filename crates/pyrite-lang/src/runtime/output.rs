use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};

use crate::error::{ErrorKind, RuntimeError};

/// Where `print` output goes.
pub enum OutputMode {
    /// Process stdout.
    PassThrough,
    /// Internal buffer, drained by `take`.
    Capture,
    Writer(Box<dyn Write>),
}

/// One per interpreter; shared with the `print` built-in.
pub struct OutputSink {
    mode: RefCell<OutputMode>,
    buffer: RefCell<String>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self { mode: RefCell::new(OutputMode::PassThrough), buffer: RefCell::new(String::new()) }
    }

    pub fn capturing() -> Self {
        let sink = Self::new();
        sink.set_mode(OutputMode::Capture);
        sink
    }

    pub fn set_mode(&self, mode: OutputMode) {
        *self.mode.borrow_mut() = mode;
    }

    pub fn is_capturing(&self) -> bool {
        matches!(*self.mode.borrow(), OutputMode::Capture)
    }

    pub fn write_str(&self, s: &str) -> Result<(), RuntimeError> {
        let io_err = |e: io::Error| RuntimeError::new(ErrorKind::Raised, 0, format!("output error: {e}"));
        match &mut *self.mode.borrow_mut() {
            OutputMode::Capture     => { self.buffer.borrow_mut().push_str(s); Ok(()) }
            OutputMode::PassThrough => {
                let mut out = io::stdout().lock();
                out.write_all(s.as_bytes()).and_then(|_| out.flush()).map_err(io_err)
            }
            OutputMode::Writer(w)   => w.write_all(s.as_bytes()).and_then(|_| w.flush()).map_err(io_err),
        }
    }

    /// Drain everything captured so far.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buffer.borrow_mut())
    }
}

impl Default for OutputSink {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match *self.mode.borrow() {
            OutputMode::PassThrough => "PassThrough",
            OutputMode::Capture     => "Capture",
            OutputMode::Writer(_)   => "Writer",
        };
        f.debug_struct("OutputSink")
            .field("mode", &mode)
            .field("buffered", &self.buffer.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn capture_then_drain() {
        let sink = OutputSink::capturing();
        sink.write_str("a\n").unwrap();
        sink.write_str("b\n").unwrap();
        assert_eq!(sink.take(), "a\nb\n");
        assert_eq!(sink.take(), "");
    }

    #[test]
    fn pass_through_does_not_buffer() {
        let sink = OutputSink::new();
        assert!(!sink.is_capturing());
        sink.write_str("").unwrap();
        assert_eq!(sink.take(), "");
    }

    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    #[test]
    fn custom_writer_receives_output() {
        let bytes = Rc::new(RefCell::new(Vec::new()));
        let sink = OutputSink::new();
        sink.set_mode(OutputMode::Writer(Box::new(Shared(Rc::clone(&bytes)))));
        sink.write_str("hello").unwrap();
        assert_eq!(&*bytes.borrow(), b"hello");
    }
}
