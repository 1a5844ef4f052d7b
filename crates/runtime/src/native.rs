//! Built-in native functions (spec §6 "Required natives"). Each is a plain
//! `fn(&[Value]) -> Result<Value, String>` per the ABI `ember_core::heap`
//! expects — no VM access, matching the original's "args point to `argc`
//! contiguous values, the native returns one Value" contract.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use ember_core::Value;

use crate::vm::Vm;

fn process_start() -> &'static Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now)
}

fn clock(_args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(process_start().elapsed().as_secs_f64()))
}

fn sqrt(args: &[Value]) -> Result<Value, String> {
    let x = args[0].as_number().ok_or("sqrt() requires a number argument")?;
    Ok(Value::Number(x.sqrt()))
}

/// Fast inverse square root, the classic bit-level approximation (grounded
/// on the original's `vm.c` native of the same name).
fn qsqrt(args: &[Value]) -> Result<Value, String> {
    let x = args[0].as_number().ok_or("qsqrt() requires a number argument")? as f32;
    let half = 0.5 * x;
    let i = x.to_bits();
    let i = 0x5f3759df_u32.wrapping_sub(i >> 1);
    let mut y = f32::from_bits(i);
    y *= 1.5 - half * y * y;
    Ok(Value::Number(y as f64))
}

static LFSR: AtomicU16 = AtomicU16::new(0xACE1);

/// 16-bit Fibonacci LFSR; an optional seed reseeds the register before
/// stepping it once.
fn rand(args: &[Value]) -> Result<Value, String> {
    if let Some(seed) = args.first() {
        let seed = seed.as_number().ok_or("rand() seed must be a number")?;
        LFSR.store(seed as u16, Ordering::Relaxed);
    }
    let mut state = LFSR.load(Ordering::Relaxed);
    let bit = (state ^ (state >> 2) ^ (state >> 3) ^ (state >> 5)) & 1;
    state = (state >> 1) | (bit << 15);
    LFSR.store(state, Ordering::Relaxed);
    Ok(Value::Number(state as f64))
}

/// OS-backed RNG, substituting for the original's `rdrand` intrinsic per
/// the platform-portability resolution in §9.
fn real_random_value(_args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(rand::random::<f64>()))
}

fn exit_native(args: &[Value]) -> Result<Value, String> {
    let code = args.first().and_then(|v| v.as_number()).unwrap_or(0.0) as i32;
    std::process::exit(code);
}

pub(crate) fn register(vm: &mut Vm) {
    define(vm, "clock", clock, Some(0));
    define(vm, "sqrt", sqrt, Some(1));
    define(vm, "qsqrt", qsqrt, Some(1));
    define(vm, "rand", rand, None);
    define(vm, "Rand", real_random_value, Some(0));
    define(vm, "exit", exit_native, None);
}

/// Pushes the name and the native object onto the stack for the duration
/// of their allocation so a collection triggered by either `alloc_native`
/// call (stress-gc makes every allocation one) can't sweep either before
/// `globals` picks them up (mirrors the original's `defineNative`).
fn define(
    vm: &mut Vm,
    name: &str,
    function: ember_core::object::NativeFn,
    arity: Option<u8>,
) {
    let name_obj = vm.intern_string(name);
    vm.push(Value::Obj(name_obj));
    let native_obj = vm.alloc_native(function, arity);
    vm.push(Value::Obj(native_obj));
    vm.globals.set(name_obj, Value::Obj(native_obj));
    vm.pop();
    vm.pop();
}
