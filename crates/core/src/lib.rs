//! Ember core: the data model shared by the compiler and the virtual machine.
//!
//! Key design principles (mirrors the teacher workspace's split between
//! "what the language talks about" and "how it's implemented"):
//! - `Value`: the uniform, `Copy` handle every operand stack slot holds.
//! - `Obj`: heap-allocated object storage, threaded onto the VM's
//!   intrusive `objects` list so the collector in `ember-runtime` can walk
//!   it without any type-erased indirection.
//! - `Chunk`/`OpCode`: the bytecode container a `Function` owns.

pub mod chunk;
pub mod heap;
pub mod object;
pub mod table;
pub mod value;

pub use chunk::{Chunk, OpCode};
pub use heap::Heap;
pub use object::{
    Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjData, ObjFunction, ObjInstance, ObjNative,
    ObjString, ObjUpvalue, UpvalueLocation,
};
pub use table::Table;
pub use value::Value;

/// One-byte index limits the spec requires (constants, locals, upvalues per
/// function; arguments per call).
pub const MAX_CONSTANTS: usize = 256;
pub const MAX_LOCALS: usize = 256;
pub const MAX_UPVALUES: usize = 256;
pub const MAX_ARGS: usize = 255;
pub const MAX_JUMP: usize = u16::MAX as usize;
