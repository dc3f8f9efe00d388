use core::fmt;

use bytecode::Span;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    IndexOutOfRange,
    MethodNotFound,
    TypeMismatch,
    DivideByZero,
    IntegerOverflow,
    StackOverflow,
    InvalidBytecode,
    Interrupted,
}

/// An execution failure raised inside the dispatch loop, before the frame
/// trace has been attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: FaultKind,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_mismatch(expected: &str, got: &str) -> Self {
        Self::new(
            FaultKind::TypeMismatch,
            format!("expected {expected}, got {got}"),
        )
    }

    pub fn index_out_of_range(index: i64, len: usize) -> Self {
        Self::new(
            FaultKind::IndexOutOfRange,
            format!("index {index} out of range for length {len}"),
        )
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(FaultKind::InvalidBytecode, message)
    }

    pub fn overflow(op: &str) -> Self {
        Self::new(FaultKind::IntegerOverflow, format!("integer overflow in {op}"))
    }
}

/// One active frame at the time of a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub routine: String,
    pub pc: usize,
    pub span: Option<Span>,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {} +{}", self.routine, self.pc)?;
        if let Some(span) = self.span {
            write!(f, " ({span})")?;
        }
        Ok(())
    }
}

/// The fault record handed to the host. `trace` lists the active frames
/// innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub trace: Vec<TraceEntry>,
}

impl Fault {
    /// Render the fault followed by one trace line per frame.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        for entry in &self.trace {
            out.push_str("\n    ");
            out.push_str(&entry.to_string());
        }
        out
    }
}
