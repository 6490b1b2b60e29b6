//! Runtime values.
//!
//! [`Value`] parallels [`Type`] case for case; every value knows its own
//! type from its shape alone. Byte arrays have a dedicated [`Value::Bytes`]
//! representation next to the general `Vector(Word8, …)` form; equality
//! treats the two as one.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;

use crate::names::ObjectPath;
use crate::signature::Signature;
use crate::ty::{AtomicType, Type};

/// A value of an atomic type.
///
/// Atoms are totally ordered (doubles through the IEEE total order) so
/// they can key a dictionary.
#[derive(Debug, Clone)]
pub enum Atom {
    Bool(bool),
    Word8(u8),
    Word16(u16),
    Word32(u32),
    Word64(u64),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Text(String),
    Signature(Signature),
    ObjectPath(ObjectPath),
}

impl Atom {
    /// The type of this atom.
    pub fn type_of(&self) -> AtomicType {
        match self {
            Atom::Bool(_) => AtomicType::Boolean,
            Atom::Word8(_) => AtomicType::Word8,
            Atom::Word16(_) => AtomicType::Word16,
            Atom::Word32(_) => AtomicType::Word32,
            Atom::Word64(_) => AtomicType::Word64,
            Atom::Int16(_) => AtomicType::Int16,
            Atom::Int32(_) => AtomicType::Int32,
            Atom::Int64(_) => AtomicType::Int64,
            Atom::Double(_) => AtomicType::Double,
            Atom::Text(_) => AtomicType::String,
            Atom::Signature(_) => AtomicType::Signature,
            Atom::ObjectPath(_) => AtomicType::ObjectPath,
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Atom) -> bool {
        match (self, other) {
            (Atom::Bool(a), Atom::Bool(b)) => a == b,
            (Atom::Word8(a), Atom::Word8(b)) => a == b,
            (Atom::Word16(a), Atom::Word16(b)) => a == b,
            (Atom::Word32(a), Atom::Word32(b)) => a == b,
            (Atom::Word64(a), Atom::Word64(b)) => a == b,
            (Atom::Int16(a), Atom::Int16(b)) => a == b,
            (Atom::Int32(a), Atom::Int32(b)) => a == b,
            (Atom::Int64(a), Atom::Int64(b)) => a == b,
            // bit equality keeps Eq reflexive for NaN
            (Atom::Double(a), Atom::Double(b)) => a.to_bits() == b.to_bits(),
            (Atom::Text(a), Atom::Text(b)) => a == b,
            (Atom::Signature(a), Atom::Signature(b)) => a == b,
            (Atom::ObjectPath(a), Atom::ObjectPath(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Atom {}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Atom) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    fn cmp(&self, other: &Atom) -> Ordering {
        match (self, other) {
            (Atom::Bool(a), Atom::Bool(b)) => a.cmp(b),
            (Atom::Word8(a), Atom::Word8(b)) => a.cmp(b),
            (Atom::Word16(a), Atom::Word16(b)) => a.cmp(b),
            (Atom::Word32(a), Atom::Word32(b)) => a.cmp(b),
            (Atom::Word64(a), Atom::Word64(b)) => a.cmp(b),
            (Atom::Int16(a), Atom::Int16(b)) => a.cmp(b),
            (Atom::Int32(a), Atom::Int32(b)) => a.cmp(b),
            (Atom::Int64(a), Atom::Int64(b)) => a.cmp(b),
            (Atom::Double(a), Atom::Double(b)) => a.total_cmp(b),
            (Atom::Text(a), Atom::Text(b)) => a.cmp(b),
            (Atom::Signature(a), Atom::Signature(b)) => a.text().cmp(&b.text()),
            (Atom::ObjectPath(a), Atom::ObjectPath(b)) => a.as_str().cmp(b.as_str()),
            _ => self.type_of().cmp(&other.type_of()),
        }
    }
}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_of().hash(state);
        match self {
            Atom::Bool(a) => a.hash(state),
            Atom::Word8(a) => a.hash(state),
            Atom::Word16(a) => a.hash(state),
            Atom::Word32(a) => a.hash(state),
            Atom::Word64(a) => a.hash(state),
            Atom::Int16(a) => a.hash(state),
            Atom::Int32(a) => a.hash(state),
            Atom::Int64(a) => a.hash(state),
            Atom::Double(a) => a.to_bits().hash(state),
            Atom::Text(a) => a.hash(state),
            Atom::Signature(a) => a.text().hash(state),
            Atom::ObjectPath(a) => a.as_str().hash(state),
        }
    }
}

/// A D-Bus value of any type.
#[derive(Debug, Clone)]
pub enum Value {
    Atom(Atom),
    Variant(Box<Variant>),
    /// Dedicated representation of `Array(Word8)`. Equal to the
    /// corresponding `Vector(Word8, …)`.
    Bytes(Bytes),
    /// A homogeneous array; the element type is carried so empty arrays
    /// stay typed.
    Vector(Type, Vec<Value>),
    /// A dictionary; key and value types are carried for the same reason.
    Map(AtomicType, Type, BTreeMap<Atom, Value>),
    Structure(Vec<Value>),
}

impl Value {
    /// Build a vector value, checking every element against the element
    /// type.
    pub fn vector(element: Type, items: Vec<Value>) -> Option<Value> {
        if items.iter().all(|item| item.type_of() == element) {
            Some(Value::Vector(element, items))
        } else {
            None
        }
    }

    /// Build a map value, checking every entry against the key and value
    /// types.
    pub fn map(key: AtomicType, value: Type, entries: BTreeMap<Atom, Value>) -> Option<Value> {
        let well_typed = entries
            .iter()
            .all(|(k, v)| k.type_of() == key && v.type_of() == value);
        if well_typed {
            Some(Value::Map(key, value, entries))
        } else {
            None
        }
    }

    /// Build a structure value; the empty structure does not exist.
    pub fn structure(fields: Vec<Value>) -> Option<Value> {
        if fields.is_empty() {
            None
        } else {
            Some(Value::Structure(fields))
        }
    }

    /// The type of this value, derived from its shape.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Atom(atom) => atom.type_of().into(),
            Value::Variant(_) => Type::Variant,
            Value::Bytes(_) => Type::array(Type::Word8),
            Value::Vector(element, _) => Type::Array(Box::new(element.clone())),
            Value::Map(key, value, _) => Type::Dictionary(*key, Box::new(value.clone())),
            Value::Structure(fields) => {
                Type::Structure(fields.iter().map(Value::type_of).collect())
            }
        }
    }
}

fn bytes_eq_vector(bytes: &Bytes, items: &[Value]) -> bool {
    bytes.len() == items.len()
        && bytes
            .iter()
            .zip(items)
            .all(|(byte, item)| matches!(item, Value::Atom(Atom::Word8(b)) if b == byte))
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Atom(a), Value::Atom(b)) => a == b,
            (Value::Variant(a), Value::Variant(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Vector(ta, xs), Value::Vector(tb, ys)) => ta == tb && xs == ys,
            (Value::Bytes(bytes), Value::Vector(element, items))
            | (Value::Vector(element, items), Value::Bytes(bytes)) => {
                *element == Type::Word8 && bytes_eq_vector(bytes, items)
            }
            (Value::Map(ka, va, ea), Value::Map(kb, vb, eb)) => {
                ka == kb && va == vb && ea == eb
            }
            (Value::Structure(a), Value::Structure(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

/// A self-describing value: a payload together with its runtime type.
///
/// The type is recoverable from the variant alone, with no host-level
/// type information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant(Value);

impl Variant {
    /// Wrap a value.
    pub fn new(value: Value) -> Variant {
        Variant(value)
    }

    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Unwrap.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// The runtime type of the wrapped value.
    pub fn type_of(&self) -> Type {
        self.0.type_of()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variant({:?})", self.0)
    }
}
