//! Human-readable chunk disassembly (spec §4.I), promoted to a real module:
//! callable directly from tests, and from the CLI behind `--disassemble`.

use ember_core::{Chunk, OpCode};

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {name} ==");
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{offset:04} ");
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.line_at(offset));
    }

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_byte(byte) else {
        println!("Unknown opcode {byte}");
        return offset + 1;
    };

    match op {
        OpCode::Constant => constant_instruction("OP_CONSTANT", chunk, offset),
        OpCode::Nil => simple_instruction("OP_NIL", offset),
        OpCode::True => simple_instruction("OP_TRUE", offset),
        OpCode::False => simple_instruction("OP_FALSE", offset),
        OpCode::Pop => simple_instruction("OP_POP", offset),
        OpCode::GetLocal => byte_instruction("OP_GET_LOCAL", chunk, offset),
        OpCode::SetLocal => byte_instruction("OP_SET_LOCAL", chunk, offset),
        OpCode::GetGlobal => constant_instruction("OP_GET_GLOBAL", chunk, offset),
        OpCode::DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset),
        OpCode::SetGlobal => constant_instruction("OP_SET_GLOBAL", chunk, offset),
        OpCode::GetUpvalue => byte_instruction("OP_GET_UPVALUE", chunk, offset),
        OpCode::SetUpvalue => byte_instruction("OP_SET_UPVALUE", chunk, offset),
        OpCode::GetProperty => constant_instruction("OP_GET_PROPERTY", chunk, offset),
        OpCode::SetProperty => constant_instruction("OP_SET_PROPERTY", chunk, offset),
        OpCode::GetSuper => constant_instruction("OP_GET_SUPER", chunk, offset),
        OpCode::Equal => simple_instruction("OP_EQUAL", offset),
        OpCode::Greater => simple_instruction("OP_GREATER", offset),
        OpCode::Less => simple_instruction("OP_LESS", offset),
        OpCode::Add => simple_instruction("OP_ADD", offset),
        OpCode::Subtract => simple_instruction("OP_SUBTRACT", offset),
        OpCode::Multiply => simple_instruction("OP_MULTIPLY", offset),
        OpCode::Divide => simple_instruction("OP_DIVIDE", offset),
        OpCode::Not => simple_instruction("OP_NOT", offset),
        OpCode::Negate => simple_instruction("OP_NEGATE", offset),
        OpCode::Print => simple_instruction("OP_PRINT", offset),
        OpCode::Jump => jump_instruction("OP_JUMP", 1, chunk, offset),
        OpCode::JumpIfFalse => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset),
        OpCode::Loop => jump_instruction("OP_LOOP", -1, chunk, offset),
        OpCode::Call => byte_instruction("OP_CALL", chunk, offset),
        OpCode::Invoke => invoke_instruction("OP_INVOKE", chunk, offset),
        OpCode::SuperInvoke => invoke_instruction("OP_SUPER_INVOKE", chunk, offset),
        OpCode::Closure => closure_instruction(chunk, offset),
        OpCode::CloseUpvalue => simple_instruction("OP_CLOSE_UPVALUE", offset),
        OpCode::Class => constant_instruction("OP_CLASS", chunk, offset),
        OpCode::Inherit => simple_instruction("OP_INHERIT", offset),
        OpCode::Method => constant_instruction("OP_METHOD", chunk, offset),
        OpCode::Return => simple_instruction("OP_RETURN", offset),
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{name}");
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    println!("{name:-16} {slot:4}");
    offset + 2
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let idx = chunk.code[offset + 1] as usize;
    println!("{name:-16} {idx:4} '{}'", chunk.constants[idx]);
    offset + 2
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize) -> usize {
    let hi = chunk.code[offset + 1] as u16;
    let lo = chunk.code[offset + 2] as u16;
    let jump = ((hi << 8) | lo) as i32;
    let target = offset as i32 + 3 + sign * jump;
    println!("{name:-16} {offset:4} -> {target}");
    offset + 3
}

fn invoke_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let idx = chunk.code[offset + 1] as usize;
    let arg_count = chunk.code[offset + 2];
    println!(
        "{name:-16} ({arg_count} args) {idx:4} '{}'",
        chunk.constants[idx]
    );
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let mut offset = offset + 1;
    let idx = chunk.code[offset] as usize;
    offset += 1;
    println!("{:-16} {idx:4} '{}'", "OP_CLOSURE", chunk.constants[idx]);

    let upvalue_count = match unsafe { &(*chunk_function_ptr(chunk, idx)).data } {
        ember_core::ObjData::Function(f) => f.upvalue_count,
        _ => 0,
    };
    for _ in 0..upvalue_count {
        let is_local = chunk.code[offset];
        let index = chunk.code[offset + 1];
        let kind = if is_local != 0 { "local" } else { "upvalue" };
        println!("{offset:04}      |                     {kind} {index}");
        offset += 2;
    }
    offset
}

fn chunk_function_ptr(chunk: &Chunk, idx: usize) -> *mut ember_core::Obj {
    match chunk.constants[idx] {
        ember_core::Value::Obj(ptr) => ptr,
        _ => unreachable!("OP_CLOSURE operand is always a function constant"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    /// Walking instruction-by-instruction from offset 0 must land exactly on
    /// `chunk.code.len()` — no instruction's decoded width may overrun or
    /// undershoot its neighbor.
    #[test]
    fn disassembly_consumes_every_byte_exactly_once() {
        let mut vm = Vm::new();
        let function = ember_compiler::compile(
            r#"
            class Greeter {
                init(name) { this.name = name; }
                greet() { return this.name; }
            }
            fun add(a, b) { return a + b; }
            var g = Greeter("world");
            for (var i = 0; i < 3; i = i + 1) { print add(i, 1); }
            "#,
            &mut vm,
        )
        .unwrap();

        let chunk = match unsafe { &(*function).data } {
            ember_core::ObjData::Function(f) => &f.chunk,
            _ => unreachable!(),
        };

        let mut offset = 0;
        while offset < chunk.code.len() {
            let next = disassemble_instruction(chunk, offset);
            assert!(next > offset, "disassembly made no progress at {offset}");
            offset = next;
        }
        assert_eq!(offset, chunk.code.len());
    }
}
