//! The uniform value representation every stack slot, local, global, field
//! and constant holds.

use std::fmt;

use crate::object::{Obj, ObjData};
#[cfg(test)]
use crate::object::ObjString;

/// A tagged union of the four value kinds the spec defines: `Number`,
/// `Bool`, `Nil`, and a reference to a heap object. Cheap to copy: object
/// references are raw pointers owned by the VM's heap, not by the `Value`.
#[derive(Clone, Copy)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Nil,
    Obj(*mut Obj),
}

impl Value {
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<*mut Obj> {
        match self {
            Value::Obj(o) => Some(*o),
            _ => None,
        }
    }

    /// # Safety
    /// The caller must ensure this value actually wraps a live `String` obj.
    pub unsafe fn as_str(&self) -> Option<&str> {
        let obj = self.as_obj()?;
        match unsafe { &(*obj).data } {
            ObjData::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Nil => "nil",
            Value::Obj(o) => unsafe { (**o).kind_name() },
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Obj(o) if matches!(unsafe { &(**o).data }, ObjData::String(_)))
    }
}

/// Equality per spec §3: numbers by IEEE comparison, bools/nil structurally,
/// objects by identity — which for interned strings is equivalent to
/// content equality by construction (§4.C).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Obj(a), Value::Obj(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Nil => write!(f, "nil"),
            Value::Obj(o) => fmt_obj(f, unsafe { &**o }),
        }
    }
}

fn fmt_obj(f: &mut fmt::Formatter<'_>, obj: &Obj) -> fmt::Result {
    match &obj.data {
        ObjData::String(s) => write!(f, "{}", s.as_str()),
        ObjData::Function(func) => match func.name {
            None => write!(f, "<script>"),
            Some(name) => write!(f, "<fn {}>", name_of(name)),
        },
        ObjData::Native(_) => write!(f, "<native fn>"),
        ObjData::Closure(c) => {
            let func = unsafe { &*c.function };
            fmt_obj(f, func)
        }
        ObjData::Upvalue(_) => write!(f, "upvalue"),
        ObjData::Class(c) => write!(f, "{}", name_of(c.name)),
        ObjData::Instance(i) => {
            let class = unsafe { &*i.class };
            match &class.data {
                ObjData::Class(c) => write!(f, "{} instance", name_of(c.name)),
                _ => unreachable!("Instance::class always points at a Class"),
            }
        }
        ObjData::BoundMethod(b) => {
            let closure = unsafe { &*b.method };
            fmt_obj(f, closure)
        }
    }
}

fn name_of(obj: *mut Obj) -> String {
    match unsafe { &(*obj).data } {
        ObjData::String(s) => s.as_str().to_string(),
        _ => "?".to_string(),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_by_ieee_value() {
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn bools_and_nil_compare_structurally() {
        assert_eq!(Value::Bool(true), Value::Bool(true));
        assert_eq!(Value::Nil, Value::Nil);
        assert_ne!(Value::Bool(true), Value::Bool(false));
    }

    #[test]
    fn falsey_is_nil_or_false() {
        assert!(Value::Nil.is_falsey());
        assert!(Value::Bool(false).is_falsey());
        assert!(!Value::Bool(true).is_falsey());
        assert!(!Value::Number(0.0).is_falsey());
    }

    #[test]
    fn fnv1a_hash_is_stable() {
        let a = ObjString::new("hello".to_string());
        let b = ObjString::new("hello".to_string());
        assert_eq!(a.hash, b.hash);
    }
}
