//! Console output plumbing.
//!
//! The `console` preinclude and interpreter diagnostics write through a
//! [`ConsoleWriter`], so hosts and tests can capture output instead of
//! printing to stdout.

use core_types::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Console output writer trait.
pub trait ConsoleWriter {
    /// Write one message to the console output.
    fn write(&self, message: &str);
}

/// Default console writer that prints to stdout.
struct StdoutWriter;

impl ConsoleWriter for StdoutWriter {
    fn write(&self, message: &str) {
        println!("{}", message);
    }
}

/// Writer that appends to a shared buffer.
struct CaptureWriter {
    output: Rc<RefCell<Vec<String>>>,
}

impl ConsoleWriter for CaptureWriter {
    fn write(&self, message: &str) {
        self.output.borrow_mut().push(message.to_string());
    }
}

/// Console object shared between the interpreter and its preinclude.
pub struct ConsoleObject {
    writer: Box<dyn ConsoleWriter>,
}

impl ConsoleObject {
    /// Create a console writing to stdout.
    pub fn new() -> Self {
        Self {
            writer: Box::new(StdoutWriter),
        }
    }

    /// Create a console appending into a shared capture buffer.
    pub fn with_capture(output: Rc<RefCell<Vec<String>>>) -> Self {
        Self {
            writer: Box::new(CaptureWriter { output }),
        }
    }

    /// Format values the way `console.log` joins its arguments.
    pub fn format_values(values: &[Value]) -> String {
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `console.log(...values)`
    pub fn log(&self, values: &[Value]) {
        self.writer.write(&Self::format_values(values));
    }

    /// `console.warn(...values)`
    pub fn warn(&self, values: &[Value]) {
        self.writer
            .write(&format!("Warning: {}", Self::format_values(values)));
    }

    /// `console.error(...values)`
    pub fn error(&self, values: &[Value]) {
        self.writer
            .write(&format!("Error: {}", Self::format_values(values)));
    }

    /// `console.info(...values)`
    pub fn info(&self, values: &[Value]) {
        self.writer
            .write(&format!("Info: {}", Self::format_values(values)));
    }

    /// Write a raw diagnostic line.
    pub fn diagnostic(&self, message: &str) {
        self.writer.write(message);
    }
}

impl Default for ConsoleObject {
    fn default() -> Self {
        Self::new()
    }
}
