//! Heap object model.
//!
//! Every live object is a `Box<Obj>` whose raw pointer is handed to the VM
//! and threaded onto a single intrusive list (`Obj::next`). This keeps the
//! collector's walk identity-based and allows cycles (instance <-> class <->
//! closure <-> upvalue) without reference counting, per the design note in
//! spec §9: "dynamic dispatch over object kind: represent as a tagged
//! variant with exhaustive matching."

use std::cell::Cell;
use std::fmt;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

/// Common header every heap object carries, plus its kind-specific payload.
pub struct Obj {
    pub is_marked: Cell<bool>,
    pub next: Cell<*mut Obj>,
    /// Byte cost charged against `bytesAllocated`. Priced at construction
    /// from `payload_size()`; a `Function`'s chunk keeps growing after
    /// that, so the allocator reprices it (see `reprice` below) once the
    /// compiler is done emitting into it, the same way `sweep` always
    /// frees exactly what is currently charged here.
    pub size: usize,
    pub data: ObjData,
}

pub enum ObjData {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl Obj {
    pub fn new(data: ObjData) -> Self {
        let size = std::mem::size_of::<Obj>() + data.payload_size();
        Obj {
            is_marked: Cell::new(false),
            next: Cell::new(std::ptr::null_mut()),
            size,
            data,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.data {
            ObjData::String(_) => "string",
            ObjData::Function(_) => "function",
            ObjData::Native(_) => "native",
            ObjData::Closure(_) => "closure",
            ObjData::Upvalue(_) => "upvalue",
            ObjData::Class(_) => "class",
            ObjData::Instance(_) => "instance",
            ObjData::BoundMethod(_) => "bound method",
        }
    }

    /// Byte cost currently charged against `bytesAllocated`.
    pub fn heap_size(&self) -> usize {
        self.size
    }

    /// Recomputes `size` from the object's current payload, returning the
    /// signed delta the caller must apply to `bytesAllocated`.
    pub fn reprice(&mut self) -> isize {
        let new_size = std::mem::size_of::<Obj>() + self.data.payload_size();
        let delta = new_size as isize - self.size as isize;
        self.size = new_size;
        delta
    }
}

impl ObjData {
    /// Exposed so the allocator can price an object's footprint before it
    /// exists as a linked `Obj` (the GC threshold check must run before
    /// linking, not after — see `Obj::size`).
    pub fn payload_size(&self) -> usize {
        match self {
            ObjData::String(s) => s.chars.len(),
            ObjData::Function(f) => {
                f.chunk.code.len() + f.chunk.lines.len() * 4 + f.chunk.constants.len() * 16
            }
            ObjData::Native(_) => 0,
            ObjData::Closure(c) => c.upvalues.len() * 8,
            ObjData::Upvalue(_) => 0,
            ObjData::Class(_) => 0,
            ObjData::Instance(_) => 0,
            ObjData::BoundMethod(_) => 0,
        }
    }
}

/// Immutable, interned UTF-8 byte sequence.
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

impl ObjString {
    pub fn new(chars: String) -> Self {
        let hash = fnv1a_hash(chars.as_bytes());
        ObjString {
            chars: chars.into_boxed_str(),
            hash,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }
}

/// FNV-1a-style hash, as specified in spec §3 (Heap object: String).
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// `None` for the implicit top-level script function.
    pub name: Option<*mut Obj>,
}

impl ObjFunction {
    pub fn new() -> Self {
        ObjFunction {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name: None,
        }
    }
}

impl Default for ObjFunction {
    fn default() -> Self {
        Self::new()
    }
}

pub type NativeFn = fn(args: &[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub function: NativeFn,
    pub arity: Option<u8>,
}

pub struct ObjClosure {
    pub function: *mut Obj,
    pub upvalues: Vec<*mut Obj>,
}

/// Where an upvalue's storage currently lives: `Open` while the variable is
/// still a live stack slot, `Closed` once the enclosing scope/frame has
/// exited and the value has been moved into the upvalue itself.
#[derive(Clone, Copy)]
pub enum UpvalueLocation {
    Open(usize),
    Closed(Value),
}

pub struct ObjUpvalue {
    pub location: Cell<UpvalueLocation>,
}

impl ObjUpvalue {
    pub fn stack_index(&self) -> Option<usize> {
        match self.location.get() {
            UpvalueLocation::Open(idx) => Some(idx),
            UpvalueLocation::Closed(_) => None,
        }
    }
}

pub struct ObjClass {
    pub name: *mut Obj,
    pub methods: Table<Value>,
}

pub struct ObjInstance {
    pub class: *mut Obj,
    pub fields: Table<Value>,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: *mut Obj,
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Obj({})", self.kind_name())
    }
}
