//! Ember compiler: scans source text and emits bytecode directly, with no
//! intermediate AST (spec §4.F).

pub mod compiler;
pub mod error;
pub mod scanner;
pub mod token;

pub use compiler::compile;
pub use error::CompileError;
pub use token::{Token, TokenKind};
