//! # Replace
//!
//! The override function installed in place of a field read. It looks at the object the read was
//! made through, and if the object's identity is listed in a [`ReplacementTable`] it returns the
//! table's value; every other object gets its own field value back unchanged.
//!
//! The function runs on every rewritten read, so it holds no locks and allocates nothing.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::code::TypeId;
use crate::resolve::FieldInfo;
use crate::runtime::{NativeFn, Signature, Value, ValueType};

/// Immutable set of identity strings, compared case-insensitively by Unicode uppercase folding
#[derive(Clone, Default, PartialEq, Eq)]
pub struct NameSet {
    /// Names as given, without case-insensitive duplicates
    names: Box<[Box<str>]>,
    /// Uppercased `names`, same order
    folded: Box<[Box<str>]>,
}
impl NameSet {
    /// Creates a set. Names equal up to case are kept once.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Box<str>>,
    {
        let mut unique: Vec<Box<str>> = Vec::new();
        let mut folded: Vec<Box<str>> = Vec::new();
        for name in names {
            let name = name.into();
            let upper = name.to_uppercase();
            if !folded.iter().any(|known| **known == *upper) {
                unique.push(name);
                folded.push(upper.into());
            }
        }
        Self {
            names: unique.into_boxed_slice(),
            folded: folded.into_boxed_slice(),
        }
    }

    /// Whether `name` is in the set, ignoring case. Doesn't allocate.
    pub fn contains(&self, name: &str) -> bool {
        self.folded
            .iter()
            .any(|known| known.chars().eq(name.chars().flat_map(char::to_uppercase)))
    }

    /// Names in the set
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|name| &**name)
    }

    /// Number of names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
impl fmt::Debug for NameSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Which objects get an override, what they get, and what a null reference gets
#[derive(Clone, Debug, PartialEq)]
pub struct ReplacementTable {
    /// Identities that receive `value`
    names: NameSet,
    /// Override for listed identities
    value: Value,
    /// Result for a null reference
    fallback: Value,
}
impl ReplacementTable {
    /// Creates a table
    pub fn new(names: NameSet, value: impl Into<Value>, fallback: impl Into<Value>) -> Self {
        Self {
            names,
            value: value.into(),
            fallback: fallback.into(),
        }
    }

    /// Override for `identity`, if it is listed
    pub fn lookup(&self, identity: &str) -> Option<&Value> {
        self.names.contains(identity).then_some(&self.value)
    }

    /// Listed identities
    pub fn names(&self) -> &NameSet {
        &self.names
    }

    /// Result for a null reference
    pub fn fallback(&self) -> &Value {
        &self.fallback
    }
}

/// Errors binding a table to the fields of a loaded type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Identity and value fields belong to different types
    #[error("identity field belongs to {identity:?}, value field to {value:?}")]
    OwnerMismatch {
        /// Owner of the identity field
        identity: TypeId,
        /// Owner of the value field
        value: TypeId,
    },
    /// The identity field doesn't hold strings
    #[error("identity field holds {0:?}, not strings")]
    IdentityNotString(ValueType),
    /// The table's values can't be stored in the field
    #[error("table values do not fit a field of type {0:?}")]
    ValueType(ValueType),
}

/// A [`ReplacementTable`] bound to the identity and value fields of one type
#[derive(Clone, Debug)]
pub struct OverrideFn {
    /// The table
    table: Arc<ReplacementTable>,
    /// Type whose instances are looked at
    owner: TypeId,
    /// Slot holding the identity string
    identity_slot: usize,
    /// Slot holding the original value
    value_slot: usize,
    /// Type of the original value
    value_type: ValueType,
}
impl OverrideFn {
    /// Binds `table` to `value` (the field whose reads are replaced) and `identity` (the string field
    /// checked against the table)
    pub fn bind(
        table: Arc<ReplacementTable>,
        value: &FieldInfo,
        identity: &FieldInfo,
    ) -> Result<Self, BindError> {
        if identity.owner != value.owner {
            return Err(BindError::OwnerMismatch {
                identity: identity.owner,
                value: value.owner,
            });
        }
        if identity.ty != ValueType::Str {
            return Err(BindError::IdentityNotString(identity.ty));
        }
        // null falls back for object fields, so only listed overrides and the fallback are checked
        if !table.value.fits(value.ty) || !table.fallback.fits(value.ty) {
            return Err(BindError::ValueType(value.ty));
        }
        Ok(Self {
            table,
            owner: value.owner,
            identity_slot: identity.slot,
            value_slot: value.slot,
            value_type: value.ty,
        })
    }

    /// Signature the function is registered with: one reference to the owner in, one field value out
    pub fn signature(&self) -> Signature {
        Signature::new(vec![ValueType::Object(self.owner)], self.value_type)
    }

    /// Value to use in place of reading the field through `candidate`
    pub fn replacement_value(&self, candidate: &Value) -> Value {
        let object = match candidate {
            Value::Object(object) if object.ty() == self.owner => object,
            _ => return self.table.fallback.clone(),
        };
        let listed = object
            .field(self.identity_slot)
            .and_then(Value::as_str)
            .and_then(|identity| self.table.lookup(identity));
        match listed {
            Some(value) => value.clone(),
            None => object
                .field(self.value_slot)
                .cloned()
                .unwrap_or_else(|| self.table.fallback.clone()),
        }
    }

    /// Wraps the function so the host can call it
    pub fn into_native(self) -> NativeFn {
        Arc::new(move |args: &[Value]| {
            self.replacement_value(args.first().unwrap_or(&Value::Null))
        })
    }
}
