pub mod ast;
pub mod compiler;
pub mod fault;
pub mod interpreter;
pub mod primitives;
pub mod program;
pub mod samples;
pub mod special;

pub use compiler::{CompileError, compile_module};
pub use fault::{Fault, FaultKind, RuntimeError, TraceEntry};
pub use interpreter::{Interpreter, InterpreterSettings};
pub use program::Program;
pub use special::Specials;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn loaded_program_is_shareable() {
        assert_send_sync::<Program>();
    }
}
