//! Bytecode dispatcher: call frames, the operand stack, the open-upvalue
//! list, and the native-function registry (spec §4.G). Also the sole owner
//! of the heap (string table, globals, the intrusive object list) since the
//! collector (`gc.rs`) needs every one of these as root/sweep state.

use ember_core::{
    Chunk, Heap, ObjBoundMethod, ObjClass, ObjClosure, ObjData, ObjFunction, ObjInstance,
    ObjNative, ObjString, ObjUpvalue, Obj, OpCode, Table, UpvalueLocation, Value,
};

use crate::error::RuntimeError;
use crate::native;

/// Spec §4.G: operand stack capacity is `FRAMES_MAX × 256`. Because upvalues
/// here address the stack by index (not raw pointer — see `UpvalueLocation`),
/// a `Vec` growing past this would stay correct; the fixed reservation is
/// kept anyway so a runaway recursion surfaces as the spec's "stack
/// overflow" error rather than an unbounded allocation.
pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

pub(crate) struct CallFrame {
    pub closure: *mut Obj,
    pub ip: usize,
    pub slot_base: usize,
}

pub struct Vm {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    /// Open upvalues, sorted by descending stack index (spec §4.G).
    pub(crate) open_upvalues: Vec<*mut Obj>,
    pub(crate) objects: *mut Obj,
    pub(crate) strings: Table<Value>,
    pub(crate) globals: Table<Value>,
    pub(crate) compiler_roots: Vec<*mut Obj>,
    pub(crate) bytes_allocated: usize,
    pub(crate) next_gc: usize,
    pub(crate) init_string: *mut Obj,
    /// `repl_echo`: when set, a bare expression statement at the top level
    /// additionally prints `Ans = <value>` (spec §6's `-a` flag).
    pub repl_echo: bool,
}

impl Drop for Vm {
    fn drop(&mut self) {
        let mut obj = self.objects;
        while !obj.is_null() {
            let next = unsafe { (*obj).next.get() };
            drop(unsafe { Box::from_raw(obj) });
            obj = next;
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Vm {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: Vec::new(),
            objects: std::ptr::null_mut(),
            strings: Table::new(),
            globals: Table::new(),
            compiler_roots: Vec::new(),
            bytes_allocated: 0,
            next_gc: 1024 * 1024,
            init_string: std::ptr::null_mut(),
            repl_echo: false,
        };
        vm.init_string = vm.intern_string("init");
        native::register(&mut vm);
        vm
    }

    // ---- allocation ------------------------------------------------------

    /// Prices `data` and runs the GC threshold check *before* linking it
    /// into `objects` — mirrors the original allocator, where a collection
    /// triggered while growing the backing store can never observe (and so
    /// never sweep) the object it was making room for.
    pub(crate) fn allocate_object(&mut self, data: ObjData) -> *mut Obj {
        let size = std::mem::size_of::<Obj>() + data.payload_size();
        self.bytes_allocated += size;
        if cfg!(feature = "stress-gc") || self.bytes_allocated > self.next_gc {
            self.collect_garbage();
        }
        let boxed = Box::new(Obj::new(data));
        let ptr = Box::into_raw(boxed);
        unsafe {
            (*ptr).next.set(self.objects);
        }
        self.objects = ptr;
        #[cfg(feature = "trace-gc")]
        tracing::debug!(kind = unsafe { (*ptr).kind_name() }, size, "alloc");
        ptr
    }

    pub(crate) fn intern_string(&mut self, s: &str) -> *mut Obj {
        let hash = ember_core::object::fnv1a_hash(s.as_bytes());
        if let Some(existing) = self.strings.find_string(s, hash) {
            return existing;
        }
        let ptr = self.allocate_object(ObjData::String(ObjString::new(s.to_string())));
        self.strings.set(ptr, Value::Nil);
        ptr
    }

    pub(crate) fn alloc_function(&mut self) -> *mut Obj {
        self.allocate_object(ObjData::Function(ObjFunction::new()))
    }

    pub(crate) fn alloc_native(&mut self, function: ember_core::object::NativeFn, arity: Option<u8>) -> *mut Obj {
        self.allocate_object(ObjData::Native(ObjNative { function, arity }))
    }

    fn alloc_closure(&mut self, function: *mut Obj, upvalue_count: usize) -> *mut Obj {
        self.allocate_object(ObjData::Closure(ObjClosure {
            function,
            upvalues: vec![std::ptr::null_mut(); upvalue_count],
        }))
    }

    fn alloc_upvalue(&mut self, stack_index: usize) -> *mut Obj {
        self.allocate_object(ObjData::Upvalue(ObjUpvalue {
            location: std::cell::Cell::new(UpvalueLocation::Open(stack_index)),
        }))
    }

    fn alloc_class(&mut self, name: *mut Obj) -> *mut Obj {
        self.allocate_object(ObjData::Class(ObjClass {
            name,
            methods: Table::new(),
        }))
    }

    fn alloc_instance(&mut self, class: *mut Obj) -> *mut Obj {
        self.allocate_object(ObjData::Instance(ObjInstance {
            class,
            fields: Table::new(),
        }))
    }

    fn alloc_bound_method(&mut self, receiver: Value, method: *mut Obj) -> *mut Obj {
        self.allocate_object(ObjData::BoundMethod(ObjBoundMethod { receiver, method }))
    }

    // ---- stack helpers -----------------------------------------------------

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ---- source entry point -------------------------------------------------

    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        self.interpret_inner(source, false)
    }

    /// As `interpret`, but prints the compiled top-level chunk (and every
    /// nested function chunk reachable from its constants) before running
    /// it, per the CLI's `--disassemble` flag.
    pub fn interpret_and_disassemble(&mut self, source: &str) -> Result<(), InterpretError> {
        self.interpret_inner(source, true)
    }

    fn interpret_inner(&mut self, source: &str, disassemble: bool) -> Result<(), InterpretError> {
        let function = ember_compiler::compile(source, self)
            .map_err(InterpretError::Compile)?;
        if disassemble {
            self.disassemble_function(function, "<script>");
        }
        self.push(Value::Obj(function));
        let closure = self.alloc_closure(function, 0);
        self.pop();
        self.push(Value::Obj(closure));
        self.call(closure, 0).map_err(InterpretError::Runtime)?;
        self.run().map_err(InterpretError::Runtime)
    }

    fn disassemble_function(&self, function: *mut Obj, name: &str) {
        let f = match unsafe { &(*function).data } {
            ObjData::Function(f) => f,
            _ => return,
        };
        crate::debug::disassemble_chunk(&f.chunk, name);
        for &constant in &f.chunk.constants {
            if let Value::Obj(ptr) = constant
                && let ObjData::Function(inner) = unsafe { &(*ptr).data } {
                    let inner_name = inner
                        .name
                        .map(Self::obj_as_str)
                        .unwrap_or_else(|| "<anonymous>".to_string());
                    self.disassemble_function(ptr, &inner_name);
                }
        }
    }

    // ---- frame/chunk accessors ----------------------------------------------

    fn current_function(&self, closure: *mut Obj) -> &ObjFunction {
        let function = match unsafe { &(*closure).data } {
            ObjData::Closure(c) => c.function,
            _ => unreachable!(),
        };
        match unsafe { &(*function).data } {
            ObjData::Function(f) => f,
            _ => unreachable!(),
        }
    }

    fn frame_chunk(&self, frame_idx: usize) -> &Chunk {
        let closure = self.frames[frame_idx].closure;
        &self.current_function(closure).chunk
    }

    fn read_byte(&mut self) -> u8 {
        let idx = self.frames.len() - 1;
        let frame = &mut self.frames[idx];
        let chunk = unsafe {
            let function = match &(*frame.closure).data {
                ObjData::Closure(c) => c.function,
                _ => unreachable!(),
            };
            match &(*function).data {
                ObjData::Function(f) => &f.chunk,
                _ => unreachable!(),
            }
        };
        let byte = chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        let frame_idx = self.frames.len() - 1;
        self.frame_chunk(frame_idx).constants[idx as usize]
    }

    fn read_string(&mut self) -> *mut Obj {
        match self.read_constant() {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("name constants are always interned strings"),
        }
    }

    // ---- calling -------------------------------------------------------------

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
        if let Value::Obj(ptr) = callee {
            match unsafe { &(*ptr).data } {
                ObjData::Closure(_) => return self.call(ptr, arg_count),
                ObjData::Native(native) => {
                    let function = native.function;
                    let declared_arity = native.arity;
                    if let Some(arity) = declared_arity
                        && arity != arg_count {
                            return Err(self.runtime_error(format!(
                                "Expected {arity} arguments but got {arg_count}."
                            )));
                        }
                    let base = self.stack.len() - arg_count as usize;
                    let args: Vec<Value> = self.stack[base..].to_vec();
                    let result = function(&args).map_err(|msg| self.runtime_error(msg))?;
                    self.stack.truncate(base - 1);
                    self.push(result);
                    return Ok(());
                }
                ObjData::Class(_) => {
                    let instance = self.alloc_instance(ptr);
                    let base = self.stack.len() - arg_count as usize - 1;
                    self.stack[base] = Value::Obj(instance);
                    let init = unsafe {
                        match &(*ptr).data {
                            ObjData::Class(c) => c.methods.get(self.init_string),
                            _ => unreachable!(),
                        }
                    };
                    if let Some(Value::Obj(initializer)) = init {
                        return self.call(initializer, arg_count);
                    } else if arg_count != 0 {
                        return Err(self.runtime_error(format!(
                            "Expected 0 arguments but got {arg_count}."
                        )));
                    }
                    return Ok(());
                }
                ObjData::BoundMethod(bound) => {
                    let receiver = bound.receiver;
                    let method = bound.method;
                    let base = self.stack.len() - arg_count as usize - 1;
                    self.stack[base] = receiver;
                    return self.call(method, arg_count);
                }
                _ => {}
            }
        }
        Err(self.runtime_error("Can only call functions and classes.".to_string()))
    }

    fn call(&mut self, closure: *mut Obj, arg_count: u8) -> Result<(), RuntimeError> {
        let arity = self.current_function(closure).arity;
        if arg_count != arity {
            return Err(self.runtime_error(format!(
                "Expected {arity} arguments but got {arg_count}."
            )));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow.".to_string()));
        }
        let slot_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slot_base,
        });
        Ok(())
    }

    fn invoke_from_class(
        &mut self,
        class: *mut Obj,
        name: *mut Obj,
        arg_count: u8,
    ) -> Result<(), RuntimeError> {
        let method = unsafe {
            match &(*class).data {
                ObjData::Class(c) => c.methods.get(name),
                _ => unreachable!(),
            }
        };
        match method {
            Some(Value::Obj(closure)) => self.call(closure, arg_count),
            _ => {
                let name_str = Self::obj_as_str(name);
                Err(self.runtime_error(format!("Undefined property '{name_str}'.")))
            }
        }
    }

    fn invoke(&mut self, name: *mut Obj, arg_count: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count as usize);
        let Value::Obj(instance_ptr) = receiver else {
            return Err(self.runtime_error("Only instances have methods.".to_string()));
        };
        let (class, field) = match unsafe { &(*instance_ptr).data } {
            ObjData::Instance(inst) => (inst.class, inst.fields.get(name)),
            _ => return Err(self.runtime_error("Only instances have methods.".to_string())),
        };
        if let Some(value) = field {
            let base = self.stack.len() - arg_count as usize - 1;
            self.stack[base] = value;
            return self.call_value(value, arg_count);
        }
        self.invoke_from_class(class, name, arg_count)
    }

    fn bind_method(&mut self, class: *mut Obj, name: *mut Obj) -> Result<Value, RuntimeError> {
        let method = unsafe {
            match &(*class).data {
                ObjData::Class(c) => c.methods.get(name),
                _ => unreachable!(),
            }
        };
        match method {
            Some(Value::Obj(closure)) => {
                let receiver = self.peek(0);
                let bound = self.alloc_bound_method(receiver, closure);
                Ok(Value::Obj(bound))
            }
            _ => {
                let name_str = Self::obj_as_str(name);
                Err(self.runtime_error(format!("Undefined property '{name_str}'.")))
            }
        }
    }

    // ---- upvalues --------------------------------------------------------

    fn capture_upvalue(&mut self, stack_index: usize) -> *mut Obj {
        if let Some(&existing) = self
            .open_upvalues
            .iter()
            .find(|&&up| match unsafe { &(*up).data } {
                ObjData::Upvalue(u) => u.stack_index() == Some(stack_index),
                _ => false,
            })
        {
            return existing;
        }
        let created = self.alloc_upvalue(stack_index);
        let pos = self
            .open_upvalues
            .iter()
            .position(|&up| match unsafe { &(*up).data } {
                ObjData::Upvalue(u) => u.stack_index().unwrap_or(0) < stack_index,
                _ => false,
            })
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(pos, created);
        created
    }

    fn close_upvalues(&mut self, last: usize) {
        while let Some(&top) = self.open_upvalues.first() {
            let idx = match unsafe { &(*top).data } {
                ObjData::Upvalue(u) => u.stack_index(),
                _ => None,
            };
            let Some(idx) = idx else { break };
            if idx < last {
                break;
            }
            let value = self.stack[idx];
            match unsafe { &(*top).data } {
                ObjData::Upvalue(u) => u.location.set(UpvalueLocation::Closed(value)),
                _ => unreachable!(),
            }
            self.open_upvalues.remove(0);
        }
    }

    // ---- misc -----------------------------------------------------------

    fn obj_as_str(ptr: *mut Obj) -> String {
        match unsafe { &(*ptr).data } {
            ObjData::String(s) => s.as_str().to_string(),
            _ => unreachable!(),
        }
    }

    fn runtime_error(&mut self, message: String) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = self.current_function(frame.closure);
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            let name = match function.name {
                Some(n) => Self::obj_as_str(n),
                None => "script".to_string(),
            };
            trace.push(format!("[line {line}] in {name}()"));
        }
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        RuntimeError {
            message: message.to_string(),
            trace,
        }
    }

    // ---- the dispatch loop -------------------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            #[cfg(feature = "trace-exec")]
            {
                let frame_idx = self.frames.len() - 1;
                let chunk_ptr = self.frame_chunk(frame_idx) as *const Chunk;
                let ip = self.frames[frame_idx].ip;
                crate::debug::disassemble_instruction(unsafe { &*chunk_ptr }, ip);
            }

            let op = match OpCode::from_byte(self.read_byte()) {
                Some(op) => op,
                None => return Err(self.runtime_error("Unknown opcode.".to_string())),
            };

            match op {
                OpCode::Constant => {
                    let v = self.read_constant();
                    self.push(v);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    let v = self.pop();
                    if self.repl_echo && self.frames.len() == 1 {
                        println!("Ans = {v}");
                    }
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(name) {
                        Some(v) => self.push(v),
                        None => {
                            let n = Self::obj_as_str(name);
                            return Err(self.runtime_error(format!("Undefined variable '{n}'.")));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let v = self.peek(0);
                    self.globals.set(name, v);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let v = self.peek(0);
                    if self.globals.set(name, v) {
                        self.globals.delete(name);
                        let n = Self::obj_as_str(name);
                        return Err(self.runtime_error(format!("Undefined variable '{n}'.")));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let up = match unsafe { &(*closure).data } {
                        ObjData::Closure(c) => c.upvalues[slot],
                        _ => unreachable!(),
                    };
                    let value = match unsafe { &(*up).data } {
                        ObjData::Upvalue(u) => match u.location.get() {
                            UpvalueLocation::Open(idx) => self.stack[idx],
                            UpvalueLocation::Closed(v) => v,
                        },
                        _ => unreachable!(),
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let up = match unsafe { &(*closure).data } {
                        ObjData::Closure(c) => c.upvalues[slot],
                        _ => unreachable!(),
                    };
                    let value = self.peek(0);
                    match unsafe { &(*up).data } {
                        ObjData::Upvalue(u) => match u.location.get() {
                            UpvalueLocation::Open(idx) => self.stack[idx] = value,
                            UpvalueLocation::Closed(_) => {
                                u.location.set(UpvalueLocation::Closed(value))
                            }
                        },
                        _ => unreachable!(),
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string();
                    let Value::Obj(instance_ptr) = self.peek(0) else {
                        return Err(self.runtime_error("Only instances have properties.".to_string()));
                    };
                    let (class, field) = match unsafe { &(*instance_ptr).data } {
                        ObjData::Instance(inst) => (inst.class, inst.fields.get(name)),
                        _ => {
                            return Err(
                                self.runtime_error("Only instances have properties.".to_string())
                            )
                        }
                    };
                    if let Some(value) = field {
                        self.pop();
                        self.push(value);
                    } else {
                        let bound = self.bind_method(class, name)?;
                        self.pop();
                        self.push(bound);
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let Value::Obj(instance_ptr) = self.peek(1) else {
                        return Err(self.runtime_error("Only instances have fields.".to_string()));
                    };
                    let value = self.peek(0);
                    match unsafe { &mut (*instance_ptr).data } {
                        ObjData::Instance(inst) => {
                            inst.fields.set(name, value);
                        }
                        _ => return Err(self.runtime_error("Only instances have fields.".to_string())),
                    }
                    let v = self.pop();
                    self.pop();
                    self.push(v);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let Value::Obj(superclass) = self.pop() else {
                        unreachable!("compiler always pushes the superclass value here")
                    };
                    let bound = self.bind_method(superclass, name)?;
                    self.pop();
                    self.push(bound);
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.numeric_binary(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.numeric_binary(|a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.numeric_binary(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.numeric_binary(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.numeric_binary(|a, b| Value::Number(a / b))?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()));
                }
                OpCode::Negate => {
                    let v = self.peek(0);
                    match v.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => return Err(self.runtime_error("Operand must be a number.".to_string())),
                    }
                }
                OpCode::Print => {
                    let v = self.pop();
                    println!("{v}");
                }
                OpCode::Jump => {
                    let offset = self.read_short();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short();
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte();
                    let callee = self.peek(arg_count as usize);
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte();
                    self.invoke(name, arg_count)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte();
                    let Value::Obj(superclass) = self.pop() else {
                        unreachable!("compiler always pushes the superclass value here")
                    };
                    self.invoke_from_class(superclass, name, arg_count)?;
                }
                OpCode::Closure => {
                    let Value::Obj(function) = self.read_constant() else {
                        unreachable!("CLOSURE operand is always a function constant")
                    };
                    let upvalue_count = match unsafe { &(*function).data } {
                        ObjData::Function(f) => f.upvalue_count,
                        _ => unreachable!(),
                    };
                    let closure = self.alloc_closure(function, upvalue_count);
                    self.push(Value::Obj(closure));
                    for i in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        let up = if is_local {
                            let base = self.frames.last().unwrap().slot_base;
                            self.capture_upvalue(base + index)
                        } else {
                            let enclosing = self.frames.last().unwrap().closure;
                            match unsafe { &(*enclosing).data } {
                                ObjData::Closure(c) => c.upvalues[index],
                                _ => unreachable!(),
                            }
                        };
                        match unsafe { &mut (*closure).data } {
                            ObjData::Closure(c) => c.upvalues[i] = up,
                            _ => unreachable!(),
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    let idx = self.stack.len() - 1;
                    self.close_upvalues(idx);
                    self.pop();
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.alloc_class(name);
                    self.push(Value::Obj(class));
                }
                OpCode::Inherit => {
                    let Value::Obj(subclass) = self.peek(0) else {
                        unreachable!("compiler only emits INHERIT with a class on top")
                    };
                    let Value::Obj(superclass) = self.peek(1) else {
                        return Err(self.runtime_error("Superclass must be a class.".to_string()));
                    };
                    if !matches!(unsafe { &(*superclass).data }, ObjData::Class(_)) {
                        return Err(self.runtime_error("Superclass must be a class.".to_string()));
                    }
                    // `subclass` and `superclass` are always distinct allocations, so
                    // these two derefs never alias.
                    let super_methods = match unsafe { &(*superclass).data } {
                        ObjData::Class(c) => &c.methods as *const Table<Value>,
                        _ => unreachable!(),
                    };
                    match unsafe { &mut (*subclass).data } {
                        ObjData::Class(c) => c.methods.add_all(unsafe { &*super_methods }),
                        _ => unreachable!(),
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.peek(0);
                    let Value::Obj(class) = self.peek(1) else {
                        unreachable!("compiler only emits METHOD with a class beneath")
                    };
                    match unsafe { &mut (*class).data } {
                        ObjData::Class(c) => {
                            c.methods.set(name, method);
                        }
                        _ => unreachable!(),
                    }
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.slot_base);
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slot_base);
                    self.push(result);
                }
            }
        }
    }

    fn numeric_binary(&mut self, op: impl Fn(f64, f64) -> Value) -> Result<(), RuntimeError> {
        let (Some(a), Some(b)) = (self.peek(1).as_number(), self.peek(0).as_number()) else {
            return Err(self.runtime_error("Operands must be numbers.".to_string()));
        };
        self.pop();
        self.pop();
        self.push(op(a, b));
        Ok(())
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b));
                Ok(())
            }
            (Value::Obj(a), Value::Obj(b))
                if matches!(unsafe { &(*a).data }, ObjData::String(_))
                    && matches!(unsafe { &(*b).data }, ObjData::String(_)) =>
            {
                let sa = Self::obj_as_str(a);
                let sb = Self::obj_as_str(b);
                let concatenated = format!("{sa}{sb}");
                self.pop();
                self.pop();
                let interned = self.intern_string(&concatenated);
                self.push(Value::Obj(interned));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be two numbers or two strings.".to_string())),
        }
    }
}

impl Heap for Vm {
    fn intern_string(&mut self, s: &str) -> *mut Obj {
        Vm::intern_string(self, s)
    }

    fn alloc_function(&mut self) -> *mut Obj {
        Vm::alloc_function(self)
    }

    unsafe fn reprice_function(&mut self, obj: *mut Obj) {
        let delta = unsafe { (*obj).reprice() };
        if delta >= 0 {
            self.bytes_allocated += delta as usize;
        } else {
            self.bytes_allocated -= (-delta) as usize;
        }
    }

    fn push_compiler_root(&mut self, obj: *mut Obj) {
        self.compiler_roots.push(obj);
    }

    fn pop_compiler_root(&mut self) {
        self.compiler_roots.pop();
    }
}

#[derive(Debug)]
pub enum InterpretError {
    Compile(Vec<ember_compiler::CompileError>),
    Runtime(RuntimeError),
}

impl std::fmt::Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::Compile(errors) => {
                for e in errors {
                    writeln!(f, "{e}")?;
                }
                Ok(())
            }
            InterpretError::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for InterpretError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_and_frames_are_balanced_after_a_script() {
        let mut vm = Vm::new();
        vm.interpret("var a = 1; var b = 2; print a + b;").unwrap();
        assert_eq!(vm.stack.len(), 0);
        assert_eq!(vm.frames.len(), 0);
    }

    #[test]
    fn interning_gives_pointer_equality_for_equal_content() {
        let mut vm = Vm::new();
        let a = vm.intern_string("hello");
        let b = vm.intern_string("hello");
        assert!(std::ptr::eq(a, b));
        let c = vm.intern_string("world");
        assert!(!std::ptr::eq(a, c));
    }

    #[test]
    fn closures_share_a_captured_upvalue() {
        let mut vm = Vm::new();
        vm.interpret(
            r"
            fun counter() {
                var n = 0;
                fun inc() { n = n + 1; return n; }
                return inc;
            }
            var c = counter();
            var first = c();
            var second = c();
            if (first == 1 and second == 2) { var ok = 1; } else { exit(1); }
            ",
        )
        .unwrap();
    }

    #[test]
    fn arity_mismatch_is_a_runtime_error() {
        let mut vm = Vm::new();
        let err = vm.interpret("fun f(a, b) { return a + b; } f(1);").unwrap_err();
        match err {
            InterpretError::Runtime(_) => {}
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn arity_up_to_255_is_accepted() {
        let params = (0..255).map(|i| format!("a{i}")).collect::<Vec<_>>().join(", ");
        let args = vec!["z"; 255].join(", ");
        let source = format!(
            "fun run() {{ var z = 0; fun f({params}) {{ return a0; }} print f({args}); }} run();"
        );
        let mut vm = Vm::new();
        vm.interpret(&source).unwrap();
    }

    #[test]
    fn jump_if_false_does_not_unbalance_the_stack() {
        let mut vm = Vm::new();
        vm.interpret("if (false) { print 1; } print 2;").unwrap();
        assert_eq!(vm.stack.len(), 0);
    }

    #[test]
    fn garbage_collection_recomputes_next_gc_from_surviving_bytes() {
        let mut vm = Vm::new();
        vm.interpret(r#"var s = "temporary";"#).unwrap();
        let before = vm.bytes_allocated;
        vm.collect_garbage();
        assert_eq!(vm.next_gc, vm.bytes_allocated * 2);
        assert!(vm.bytes_allocated <= before);
    }

    #[test]
    fn uninitialized_var_is_nil() {
        let mut vm = Vm::new();
        vm.interpret("var x; if (x == nil) { } else { exit(1); }").unwrap();
    }

    #[test]
    fn a_compiled_functions_size_reflects_its_final_chunk() {
        let mut vm = Vm::new();
        let script = ember_compiler::compile(
            "fun f() { print 1; print 2; print 3; print 4; print 5; }",
            &mut vm,
        )
        .unwrap();
        let script_size = unsafe { (*script).heap_size() };
        assert!(script_size > std::mem::size_of::<Obj>());

        // The script's only constant is `f`; its size must in turn reflect
        // its own chunk, not the empty one `alloc_function` priced it
        // against before the compiler emitted its body.
        let inner = match unsafe { &(*script).data } {
            ObjData::Function(sf) => sf.chunk.constants[0],
            _ => unreachable!(),
        };
        let inner_ptr = match inner {
            Value::Obj(p) => p,
            _ => panic!("expected the nested function constant"),
        };
        let inner_size = unsafe { (*inner_ptr).heap_size() };
        let inner_payload = unsafe { (*inner_ptr).data.payload_size() };
        assert_eq!(inner_size, std::mem::size_of::<Obj>() + inner_payload);
        assert!(
            inner_payload > 0,
            "a five-statement function body must price above an empty chunk"
        );
    }
}
