//! The allocation interface the compiler uses to put heap objects (interned
//! strings, in-progress functions) on the VM's heap. Kept as a trait here,
//! rather than a concrete type, so `ember-compiler` never depends on
//! `ember-runtime` (which owns the actual collector) — only the other way
//! around. The concrete implementor is `ember_runtime::Heap`.

use crate::object::Obj;

pub trait Heap {
    /// Intern a string by content, returning the canonical pointer.
    fn intern_string(&mut self, s: &str) -> *mut Obj;

    /// Allocate a new, empty function object. Its chunk is built up in
    /// place afterward, so the caller must `push_compiler_root` it for the
    /// duration (spec §9: "the compiler must register its function chain
    /// as a root source because emitting bytecode ... may allocate").
    fn alloc_function(&mut self) -> *mut Obj;

    /// Re-price a function object against its chunk's current size and
    /// true up `bytesAllocated` by the delta. The compiler calls this once
    /// a function's chunk has stopped growing, since `alloc_function`
    /// prices it against an empty chunk.
    ///
    /// # Safety
    /// `obj` must point to a live `Obj` whose `data` is `ObjData::Function`.
    unsafe fn reprice_function(&mut self, obj: *mut Obj);

    fn push_compiler_root(&mut self, obj: *mut Obj);
    fn pop_compiler_root(&mut self);
}
