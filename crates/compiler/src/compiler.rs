//! Single-pass Pratt parser: compiles source text directly into bytecode,
//! resolving lexical scope, upvalue capture, and method/class semantics as
//! it goes (spec §4.F). No AST is ever built.

use ember_core::{Chunk, Heap, MAX_ARGS, MAX_JUMP, MAX_LOCALS, MAX_UPVALUES, Obj, ObjData,
    ObjFunction, OpCode, Value};

use crate::error::CompileError;
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

/// Binding power of `kind` as an infix/postfix operator; `Precedence::None`
/// for tokens that never appear in that position. Kept as a plain match
/// rather than a table of function pointers — `Compiler` is generic over
/// the heap's lifetime, and a table of `fn(&mut Compiler<'h>, bool)` runs
/// straight into higher-ranked trait bound inference limits for no benefit
/// over dispatching on the token kind directly.
fn infix_precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::LeftParen | TokenKind::Dot => Precedence::Call,
        TokenKind::Minus | TokenKind::Plus => Precedence::Term,
        TokenKind::Slash | TokenKind::Star => Precedence::Factor,
        TokenKind::BangEqual | TokenKind::EqualEqual => Precedence::Equality,
        TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::Less | TokenKind::LessEqual => {
            Precedence::Comparison
        }
        TokenKind::And => Precedence::And,
        TokenKind::Or => Precedence::Or,
        _ => Precedence::None,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local {
    name: String,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct FunctionFrame {
    function: *mut Obj,
    fn_type: FunctionType,
    locals: Vec<Local>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDesc>,
}

struct ClassState {
    has_superclass: bool,
}

pub struct Compiler<'h> {
    scanner: Scanner,
    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    frames: Vec<FunctionFrame>,
    classes: Vec<ClassState>,
    heap: &'h mut dyn Heap,
}

/// Compile `source` to a top-level script function, or report every
/// compile error collected along the way (spec §4.F: "A source compiles to
/// `null` iff any error was reported").
pub fn compile(source: &str, heap: &mut dyn Heap) -> Result<*mut Obj, Vec<CompileError>> {
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        previous: Token::synthetic(TokenKind::Eof, ""),
        current: Token::synthetic(TokenKind::Eof, ""),
        had_error: false,
        panic_mode: false,
        errors: Vec::new(),
        frames: Vec::new(),
        classes: Vec::new(),
        heap,
    };
    compiler.push_frame(FunctionType::Script, "");
    compiler.advance();
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.consume(TokenKind::Eof, "Expect end of expression.");
    let function = compiler.end_compiler();

    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(function)
    }
}

impl<'h> Compiler<'h> {
    // ---- token stream -----------------------------------------------

    fn advance(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.current);
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.clone();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    // ---- error reporting ----------------------------------------------

    fn error_at_current(&mut self, message: &str) {
        let tok = self.current.clone();
        self.error_at(&tok, message);
    }

    fn error(&mut self, message: &str) {
        let tok = self.previous.clone();
        self.error_at(&tok, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let detail = match token.kind {
            TokenKind::Eof => "at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!("at '{}'", token.lexeme),
        };
        let full = if detail.is_empty() {
            message.to_string()
        } else {
            format!("Error {detail}: {message}")
        };
        tracing::warn!(line = token.line, "{full}");
        self.errors.push(CompileError {
            line: token.line,
            message: full,
        });
        self.had_error = true;
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            use TokenKind::*;
            if matches!(
                self.current.kind,
                Class | Fun | Var | For | If | While | Print | Return
            ) {
                return;
            }
            self.advance();
        }
    }

    // ---- bytecode emission ---------------------------------------------

    fn current_function(&mut self) -> &mut ObjFunction {
        let ptr = self.frames.last().unwrap().function;
        match unsafe { &mut (*ptr).data } {
            ObjData::Function(f) => f,
            _ => unreachable!("compiler frame always wraps an ObjFunction"),
        }
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_function().chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk_mut().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_bytes(&mut self, op: OpCode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    fn emit_return(&mut self) {
        let frame_type = self.frames.last().unwrap().fn_type;
        if frame_type == FunctionType::Initializer {
            self.emit_bytes(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.chunk_mut().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_bytes(OpCode::Constant, idx);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_mut().code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk_mut().code.len() - offset - 2;
        if jump > MAX_JUMP {
            self.error("Too much code to jump over.");
        }
        let chunk = self.chunk_mut();
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk_mut().code.len() - loop_start + 2;
        if offset > MAX_JUMP {
            self.error("Loop body too large.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    // ---- function/compiler frame management ----------------------------

    fn push_frame(&mut self, fn_type: FunctionType, name: &str) {
        let function = self.heap.alloc_function();
        self.heap.push_compiler_root(function);
        if !name.is_empty() {
            let name_obj = self.heap.intern_string(name);
            match unsafe { &mut (*function).data } {
                ObjData::Function(f) => f.name = Some(name_obj),
                _ => unreachable!(),
            }
        }
        // Slot 0 is reserved: the receiver ("this") for methods/initializers,
        // or an unnamed placeholder for plain functions (spec §4.F).
        let slot0_name = if matches!(fn_type, FunctionType::Method | FunctionType::Initializer) {
            "this"
        } else {
            ""
        };
        self.frames.push(FunctionFrame {
            function,
            fn_type,
            locals: vec![Local {
                name: slot0_name.to_string(),
                depth: 0,
                is_captured: false,
            }],
            scope_depth: 0,
            upvalues: Vec::new(),
        });
    }

    /// Finishes the current frame, returning its (now fully built) function
    /// object. The caller is responsible for linking it (constant pool
    /// entry plus CLOSURE emission, or returning it as the top-level
    /// script). The compiler root `push_frame` registered for this frame is
    /// dropped here — by the time control returns to the caller, the
    /// function is either the returned top-level script (about to be
    /// pushed onto the VM stack with no allocation in between) or about to
    /// be added to the enclosing frame's still-rooted constant pool, so it
    /// is never unprotected across an allocation.
    fn end_compiler(&mut self) -> *mut Obj {
        self.emit_return();
        let frame = self.frames.pop().unwrap();
        match unsafe { &mut (*frame.function).data } {
            ObjData::Function(f) => f.upvalue_count = frame.upvalues.len(),
            _ => unreachable!(),
        }
        // `alloc_function` priced this against an empty chunk; true up
        // `bytesAllocated` now that the chunk has its final bytecode,
        // lines, and constants.
        unsafe { self.heap.reprice_function(frame.function) };
        self.heap.pop_compiler_root();
        frame.function
    }

    fn begin_scope(&mut self) {
        self.frames.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let frame = self.frames.last_mut().unwrap();
        frame.scope_depth -= 1;
        let depth = frame.scope_depth;
        let mut popped = Vec::new();
        while let Some(local) = frame.locals.last() {
            if local.depth <= depth {
                break;
            }
            popped.push(local.is_captured);
            frame.locals.pop();
        }
        for captured in popped {
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let obj = self.heap.intern_string(name);
        self.make_constant(Value::Obj(obj))
    }

    fn resolve_local(&mut self, frame_idx: usize, name: &str) -> Option<u8> {
        let frame = &self.frames[frame_idx];
        for (i, local) in frame.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                return Some(i as u8);
            }
        }
        None
    }

    fn add_upvalue(&mut self, frame_idx: usize, index: u8, is_local: bool) -> u8 {
        let frame = &mut self.frames[frame_idx];
        for (i, up) in frame.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if frame.upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        frame.upvalues.push(UpvalueDesc { index, is_local });
        (frame.upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, frame_idx: usize, name: &str) -> Option<u8> {
        if frame_idx == 0 {
            return None;
        }
        let parent_idx = frame_idx - 1;
        if let Some(local) = self.resolve_local(parent_idx, name) {
            self.frames[parent_idx].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(frame_idx, local, true));
        }
        if let Some(up) = self.resolve_upvalue(parent_idx, name) {
            return Some(self.add_upvalue(frame_idx, up, false));
        }
        None
    }

    fn add_local(&mut self, name: &str) {
        let frame = self.frames.last_mut().unwrap();
        if frame.locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        frame.locals.push(Local {
            name: name.to_string(),
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        let frame = self.frames.last().unwrap();
        if frame.scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme.clone();
        let scope_depth = frame.scope_depth;
        for local in frame.locals.iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }
            if local.name == name {
                self.error("Already a variable with this name in this scope.");
                break;
            }
        }
        self.add_local(&name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.frames.last().unwrap().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.clone();
        self.identifier_constant(&name)
    }

    fn mark_initialized(&mut self) {
        let frame = self.frames.last_mut().unwrap();
        if frame.scope_depth == 0 {
            return;
        }
        let depth = frame.scope_depth;
        frame.locals.last_mut().unwrap().depth = depth;
    }

    fn define_variable(&mut self, global: u8) {
        if self.frames.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal, global);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count >= MAX_ARGS {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    // ---- expressions ----------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.parse_prefix(self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= infix_precedence(self.current.kind) {
            self.advance();
            self.parse_infix(self.previous.kind, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    /// Dispatches to the prefix parser for `kind`, if any. Returns `false`
    /// when `kind` can't start an expression.
    fn parse_prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        use TokenKind::*;
        match kind {
            LeftParen => self.grouping(can_assign),
            Minus | Bang => self.unary(can_assign),
            Identifier => self.variable(can_assign),
            String => self.string(can_assign),
            Number => self.number(can_assign),
            False | Nil | True => self.literal(can_assign),
            This => self.this_(can_assign),
            Super => self.super_(can_assign),
            _ => return false,
        }
        true
    }

    fn parse_infix(&mut self, kind: TokenKind, can_assign: bool) {
        use TokenKind::*;
        match kind {
            LeftParen => self.call(can_assign),
            Dot => self.dot(can_assign),
            Minus | Plus | Slash | Star | BangEqual | EqualEqual | Greater | GreaterEqual
            | Less | LessEqual => self.binary(can_assign),
            And => self.and_(can_assign),
            Or => self.or_(can_assign),
            _ => unreachable!("infix_precedence only admits tokens handled here"),
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let raw = &self.previous.lexeme;
        let content = &raw[1..raw.len() - 1];
        let obj = self.heap.intern_string(content);
        self.emit_constant(Value::Obj(obj));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!(),
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        self.parse_precedence(infix_precedence(op_kind).next());
        match op_kind {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!(),
        }
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_bytes(OpCode::Call, arg_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous.lexeme.clone();
        let name_const = self.identifier_constant(&name);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(OpCode::SetProperty, name_const);
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_bytes(OpCode::Invoke, name_const);
            self.emit_byte(arg_count);
        } else {
            self.emit_bytes(OpCode::GetProperty, name_const);
        }
    }

    fn named_variable(&mut self, name: &Token, can_assign: bool) {
        let frame_idx = self.frames.len() - 1;
        let (get_op, set_op, arg): (OpCode, OpCode, u8);
        if let Some(slot) = self.resolve_local(frame_idx, &name.lexeme) {
            get_op = OpCode::GetLocal;
            set_op = OpCode::SetLocal;
            arg = slot;
        } else if let Some(slot) = self.resolve_upvalue(frame_idx, &name.lexeme) {
            get_op = OpCode::GetUpvalue;
            set_op = OpCode::SetUpvalue;
            arg = slot;
        } else {
            get_op = OpCode::GetGlobal;
            set_op = OpCode::SetGlobal;
            arg = self.identifier_constant(&name.lexeme);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op, arg);
        } else {
            self.emit_bytes(get_op, arg);
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.clone();
        self.named_variable(&name, can_assign);
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        let tok = Token::synthetic(TokenKind::This, "this");
        self.named_variable(&tok, false);
    }

    fn super_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }
        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.previous.lexeme.clone();
        let name_const = self.identifier_constant(&name);

        let this_tok = Token::synthetic(TokenKind::This, "this");
        self.named_variable(&this_tok, false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            let super_tok = Token::synthetic(TokenKind::Super, "super");
            self.named_variable(&super_tok, false);
            self.emit_bytes(OpCode::SuperInvoke, name_const);
            self.emit_byte(arg_count);
        } else {
            let super_tok = Token::synthetic(TokenKind::Super, "super");
            self.named_variable(&super_tok, false);
            self.emit_bytes(OpCode::GetSuper, name_const);
        }
    }

    // ---- statements -------------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.clone();
        let name_constant = self.identifier_constant(&class_name.lexeme);
        self.declare_variable();
        self.emit_bytes(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let super_name = self.previous.clone();
            self.variable(false);
            if class_name.lexeme == super_name.lexeme {
                self.error("A class can't inherit from itself.");
            }
            self.begin_scope();
            self.add_local("super");
            self.mark_initialized();

            self.named_variable(&class_name, false);
            self.emit_op(OpCode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(&class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme.clone();
        let name_const = self.identifier_constant(&name);
        let fn_type = if name == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(fn_type, &name);
        self.emit_bytes(OpCode::Method, name_const);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        let name = self.previous.lexeme.clone();
        self.function(FunctionType::Function, &name);
        self.define_variable(global);
    }

    fn function(&mut self, fn_type: FunctionType, name: &str) {
        self.push_frame(fn_type, name);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let function_ptr = self.frames.last().unwrap().function;
                let arity = match unsafe { &(*function_ptr).data } {
                    ObjData::Function(f) => f.arity,
                    _ => unreachable!(),
                };
                if arity as usize >= MAX_ARGS {
                    self.error("Can't have more than 255 parameters.");
                }
                match unsafe { &mut (*function_ptr).data } {
                    ObjData::Function(f) => f.arity += 1,
                    _ => unreachable!(),
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let upvalues = self.frames.last().unwrap().upvalues.clone();
        let function = self.end_compiler();

        let const_idx = self.make_constant(Value::Obj(function));
        self.emit_bytes(OpCode::Closure, const_idx);
        for up in &upvalues {
            self.emit_byte(up.is_local as u8);
            self.emit_byte(up.index);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_mut().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_mut().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk_mut().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.frames.last().unwrap().fn_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.frames.last().unwrap().fn_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }
}
