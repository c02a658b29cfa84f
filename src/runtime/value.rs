//! Values handled by the runtime

use std::fmt;
use std::sync::Arc;

use crate::code::TypeId;

/// Static type of a field, parameter, or return value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 64-bit integer
    Int,
    /// Immutable string
    Str,
    /// Reference to an instance of a type, possibly null
    Object(TypeId),
}

/// A runtime value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Null reference
    Null,
    /// Integer
    Int(i64),
    /// String
    Str(Arc<str>),
    /// Object reference
    Object(Arc<Object>),
}
impl Value {
    /// Whether the value can be stored in a slot of type `ty`
    pub fn fits(&self, ty: ValueType) -> bool {
        match (self, ty) {
            (Value::Null, ValueType::Object(_)) => true,
            (Value::Int(_), ValueType::Int) => true,
            (Value::Str(_), ValueType::Str) => true,
            (Value::Object(object), ValueType::Object(expected)) => object.ty() == expected,
            _ => false,
        }
    }

    /// The integer, if this is one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The string, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(object) => write!(f, "<object of {:?}>", object.ty()),
        }
    }
}

/// An instance of a loaded type. Fields are fixed at construction.
#[derive(Debug, PartialEq)]
pub struct Object {
    /// Type of the instance
    ty: TypeId,
    /// Field values, indexed by field slot
    fields: Box<[Value]>,
}
impl Object {
    /// Creates an instance. Callers are expected to have checked the field values against the type.
    pub(crate) fn new(ty: TypeId, fields: Vec<Value>) -> Self {
        Self {
            ty,
            fields: fields.into_boxed_slice(),
        }
    }

    /// Type of the instance
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// Value in field slot `slot`
    pub fn field(&self, slot: usize) -> Option<&Value> {
        self.fields.get(slot)
    }
}
