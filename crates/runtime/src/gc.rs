//! Tracing mark-and-sweep collector (spec §4.H): mark roots, trace/blacken
//! the grey worklist, drop unmarked string-table entries, sweep the
//! intrusive object list. Non-moving, non-incremental, non-concurrent.

use ember_core::{Obj, ObjData, UpvalueLocation};

use crate::vm::Vm;

const GC_HEAP_GROW_FACTOR: usize = 2;

impl Vm {
    pub(crate) fn collect_garbage(&mut self) {
        #[cfg(feature = "trace-gc")]
        let before = self.bytes_allocated;

        let mut gray: Vec<*mut Obj> = Vec::new();
        self.mark_roots(&mut gray);
        self.trace_references(&mut gray);
        self.strings.remove_unmarked();
        self.sweep();

        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;

        #[cfg(feature = "trace-gc")]
        tracing::debug!(
            before,
            after = self.bytes_allocated,
            next_gc = self.next_gc,
            "gc cycle"
        );
    }

    fn mark_roots(&mut self, gray: &mut Vec<*mut Obj>) {
        let stack_values: Vec<_> = self.stack.clone();
        for value in stack_values {
            mark_value(value, gray);
        }
        let frame_closures: Vec<_> = self.frames.iter().map(|f| f.closure).collect();
        for closure in frame_closures {
            mark_object(closure, gray);
        }
        for &up in &self.open_upvalues {
            mark_object(up, gray);
        }
        let globals: Vec<_> = self.globals.iter().collect();
        for (key, value) in globals {
            mark_object(key, gray);
            mark_value(value, gray);
        }
        let compiler_roots: Vec<_> = self.compiler_roots.clone();
        for obj in compiler_roots {
            mark_object(obj, gray);
        }
        if !self.init_string.is_null() {
            mark_object(self.init_string, gray);
        }
    }

    fn trace_references(&mut self, gray: &mut Vec<*mut Obj>) {
        while let Some(obj) = gray.pop() {
            blacken(obj, gray);
        }
    }

    fn sweep(&mut self) {
        let mut previous: *mut Obj = std::ptr::null_mut();
        let mut current = self.objects;
        while !current.is_null() {
            let is_marked = unsafe { (*current).is_marked.get() };
            let next = unsafe { (*current).next.get() };
            if is_marked {
                unsafe { (*current).is_marked.set(false) };
                previous = current;
                current = next;
            } else {
                self.bytes_allocated -= unsafe { (*current).heap_size() };
                if previous.is_null() {
                    self.objects = next;
                } else {
                    unsafe { (*previous).next.set(next) };
                }
                drop(unsafe { Box::from_raw(current) });
                current = next;
            }
        }
    }
}

fn mark_value(value: ember_core::Value, gray: &mut Vec<*mut Obj>) {
    if let ember_core::Value::Obj(ptr) = value {
        mark_object(ptr, gray);
    }
}

fn mark_object(ptr: *mut Obj, gray: &mut Vec<*mut Obj>) {
    if ptr.is_null() {
        return;
    }
    let already_marked = unsafe { (*ptr).is_marked.replace(true) };
    if !already_marked {
        gray.push(ptr);
    }
}

/// Mark an object's own outgoing references (spec §4.H phase 2). Leaf kinds
/// (String, Native) have none.
fn blacken(ptr: *mut Obj, gray: &mut Vec<*mut Obj>) {
    #[cfg(feature = "trace-gc")]
    tracing::trace!(kind = unsafe { (*ptr).kind_name() }, "blacken");

    match unsafe { &(*ptr).data } {
        ObjData::String(_) | ObjData::Native(_) => {}
        ObjData::Upvalue(u) => {
            if let UpvalueLocation::Closed(v) = u.location.get() {
                mark_value(v, gray);
            }
        }
        ObjData::Function(f) => {
            if let Some(name) = f.name {
                mark_object(name, gray);
            }
            for &c in &f.chunk.constants {
                mark_value(c, gray);
            }
        }
        ObjData::Closure(c) => {
            mark_object(c.function, gray);
            for &up in &c.upvalues {
                mark_object(up, gray);
            }
        }
        ObjData::Class(c) => {
            mark_object(c.name, gray);
            for (key, value) in c.methods.iter() {
                mark_object(key, gray);
                mark_value(value, gray);
            }
        }
        ObjData::Instance(i) => {
            mark_object(i.class, gray);
            for (key, value) in i.fields.iter() {
                mark_object(key, gray);
                mark_value(value, gray);
            }
        }
        ObjData::BoundMethod(b) => {
            mark_value(b.receiver, gray);
            mark_object(b.method, gray);
        }
    }
}
