//! Runtime error type: a message plus the call-stack trace captured at the
//! point of failure (spec §4.G "Runtime errors ... followed by a stack
//! trace"), formatted by the CLI exactly as the VM printed it internally.

use std::fmt;

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<String>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for line in &self.trace {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}
