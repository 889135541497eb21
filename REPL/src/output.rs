//! Output emitters.
//!
//! Handlers and the session loop write user-visible text through [`Emit`] so
//! the same code runs in interactive and headless mode.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use crossterm::{
    style::{Print, Stylize},
    terminal, queue,
};

pub trait Emit {
    fn emit(&self, text: &str);

    /// De-emphasized status text (processing indicators, notices).
    fn emit_status(&self, text: &str) {
        self.emit(text);
    }
}

impl<T: Emit + ?Sized> Emit for Rc<T> {
    fn emit(&self, text: &str) {
        (**self).emit(text);
    }

    fn emit_status(&self, text: &str) {
        (**self).emit_status(text);
    }
}

/// Bare lines on stdout. Used in headless mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainEmitter;

impl Emit for PlainEmitter {
    fn emit(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", text);
        let _ = stdout.flush();
    }
}

/// Terminal emitter for interactive mode. Keeps line endings correct while
/// raw mode is on and passes embedded ANSI sequences through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct StyledEmitter;

impl StyledEmitter {
    fn write(&self, text: &str, status: bool) -> io::Result<()> {
        let raw = terminal::is_raw_mode_enabled().unwrap_or(false);
        let text = if raw {
            text.replace("\r\n", "\n").replace('\n', "\r\n")
        } else {
            text.to_string()
        };
        let newline = if raw { "\r\n" } else { "\n" };

        let mut stdout = io::stdout().lock();
        if status {
            queue!(stdout, Print(text.italic().dark_grey()), Print(newline))?;
        } else {
            queue!(stdout, Print(text), Print(newline))?;
        }
        stdout.flush()
    }
}

impl Emit for StyledEmitter {
    fn emit(&self, text: &str) {
        let _ = self.write(text, false);
    }

    fn emit_status(&self, text: &str) {
        let _ = self.write(text, true);
    }
}

/// Collects emitted lines in memory.
#[derive(Debug, Default)]
pub struct BufferedEmitter {
    lines: RefCell<Vec<String>>,
}

impl BufferedEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn contents(&self) -> String {
        self.lines.borrow().join("\n")
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.borrow_mut())
    }
}

impl Emit for BufferedEmitter {
    fn emit(&self, text: &str) {
        self.lines.borrow_mut().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_emitter_collects_in_order() {
        let out = BufferedEmitter::new();
        out.emit("one");
        out.emit_status("two");

        assert_eq!(out.lines(), vec!["one", "two"]);
        assert_eq!(out.contents(), "one\ntwo");
        assert_eq!(out.take().len(), 2);
        assert!(out.lines().is_empty());
    }
}
