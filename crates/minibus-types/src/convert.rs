//! Conversions between host types and D-Bus values.
//!
//! Three capability tiers, narrowest first:
//!
//! - [`IsAtom`]: the twelve atomic hosts; usable as dictionary keys
//! - [`IsValue`]: anything with a fixed D-Bus type, including containers
//! - [`IsVariant`]: anything that can cross the wire inside a variant
//!
//! `to_*` conversions are total. `from_*` conversions return `None`
//! exactly when the dynamic type does not match the host type, so every
//! round trip is an identity.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::names::{BusName, ErrorName, InterfaceName, MemberName, ObjectPath};
use crate::signature::Signature;
use crate::ty::{AtomicType, Type};
use crate::value::{Atom, Value, Variant};

/// A host type that converts to and from a [`Variant`].
pub trait IsVariant: Sized {
    fn to_variant(&self) -> Variant;
    fn from_variant(variant: &Variant) -> Option<Self>;
}

/// A host type with a fixed D-Bus type.
pub trait IsValue: IsVariant {
    /// The D-Bus type every value of this host type converts to.
    fn value_type() -> Type;
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
}

/// A host type for an atomic D-Bus type. Only these may key a dictionary;
/// using a non-atomic key type fails to compile rather than to marshal.
pub trait IsAtom: IsValue {
    /// The atomic type every value of this host type converts to.
    fn atom_type() -> AtomicType;
    fn to_atom(&self) -> Atom;
    fn from_atom(atom: &Atom) -> Option<Self>;
}

macro_rules! variant_via_value {
    () => {
        fn to_variant(&self) -> Variant {
            Variant::new(self.to_value())
        }

        fn from_variant(variant: &Variant) -> Option<Self> {
            Self::from_value(variant.value())
        }
    };
}

macro_rules! atom_host {
    ($host:ty, $atom_case:ident, $type_case:ident) => {
        impl IsAtom for $host {
            fn atom_type() -> AtomicType {
                AtomicType::$type_case
            }

            fn to_atom(&self) -> Atom {
                Atom::$atom_case(self.clone())
            }

            fn from_atom(atom: &Atom) -> Option<Self> {
                match atom {
                    Atom::$atom_case(x) => Some(x.clone()),
                    _ => None,
                }
            }
        }

        impl IsValue for $host {
            fn value_type() -> Type {
                AtomicType::$type_case.into()
            }

            fn to_value(&self) -> Value {
                Value::Atom(self.to_atom())
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::Atom(atom) => Self::from_atom(atom),
                    _ => None,
                }
            }
        }

        impl IsVariant for $host {
            variant_via_value!();
        }
    };
}

atom_host!(bool, Bool, Boolean);
atom_host!(u8, Word8, Word8);
atom_host!(u16, Word16, Word16);
atom_host!(u32, Word32, Word32);
atom_host!(u64, Word64, Word64);
atom_host!(i16, Int16, Int16);
atom_host!(i32, Int32, Int32);
atom_host!(i64, Int64, Int64);
atom_host!(f64, Double, Double);
atom_host!(String, Text, String);
atom_host!(Signature, Signature, Signature);
atom_host!(ObjectPath, ObjectPath, ObjectPath);

impl IsValue for Variant {
    fn value_type() -> Type {
        Type::Variant
    }

    fn to_value(&self) -> Value {
        Value::Variant(Box::new(self.clone()))
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Variant(inner) => Some((**inner).clone()),
            _ => None,
        }
    }
}

impl IsVariant for Variant {
    variant_via_value!();
}

impl From<&str> for Variant {
    fn from(text: &str) -> Variant {
        Variant::new(Value::Atom(Atom::Text(text.to_owned())))
    }
}

impl From<String> for Variant {
    fn from(text: String) -> Variant {
        Variant::new(Value::Atom(Atom::Text(text)))
    }
}

/// The dedicated byte-array host. Converts to the compact
/// [`Value::Bytes`] representation and converts back from either that or
/// the equivalent `Vector(Word8, …)` form.
impl IsValue for Bytes {
    fn value_type() -> Type {
        Type::array(Type::Word8)
    }

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bytes(bytes) => Some(bytes.clone()),
            Value::Vector(element, items) if *element == Type::Word8 => items
                .iter()
                .map(u8::from_value)
                .collect::<Option<Vec<u8>>>()
                .map(Bytes::from),
            _ => None,
        }
    }
}

impl IsVariant for Bytes {
    variant_via_value!();
}

impl<T: IsValue> IsValue for Vec<T> {
    fn value_type() -> Type {
        Type::Array(Box::new(T::value_type()))
    }

    fn to_value(&self) -> Value {
        Value::Vector(T::value_type(), self.iter().map(T::to_value).collect())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Vector(element, items) if *element == T::value_type() => {
                items.iter().map(T::from_value).collect()
            }
            // the compact byte-array form decodes into any Word8 host list
            Value::Bytes(bytes) if T::value_type() == Type::Word8 => bytes
                .iter()
                .map(|byte| T::from_value(&Value::Atom(Atom::Word8(*byte))))
                .collect(),
            _ => None,
        }
    }
}

impl<T: IsValue> IsVariant for Vec<T> {
    variant_via_value!();
}

impl<K, V> IsValue for BTreeMap<K, V>
where
    K: IsAtom + Ord,
    V: IsValue,
{
    fn value_type() -> Type {
        Type::Dictionary(K::atom_type(), Box::new(V::value_type()))
    }

    fn to_value(&self) -> Value {
        let entries = self
            .iter()
            .map(|(k, v)| (k.to_atom(), v.to_value()))
            .collect();
        Value::Map(K::atom_type(), V::value_type(), entries)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Map(key, val, entries)
                if *key == K::atom_type() && *val == V::value_type() =>
            {
                entries
                    .iter()
                    .map(|(k, v)| Some((K::from_atom(k)?, V::from_value(v)?)))
                    .collect()
            }
            _ => None,
        }
    }
}

impl<K, V> IsVariant for BTreeMap<K, V>
where
    K: IsAtom + Ord,
    V: IsValue,
{
    variant_via_value!();
}

macro_rules! tuple_host {
    ($($field:ident : $index:tt),+) => {
        impl<$($field: IsValue),+> IsValue for ($($field,)+) {
            fn value_type() -> Type {
                Type::Structure(vec![$($field::value_type()),+])
            }

            fn to_value(&self) -> Value {
                Value::Structure(vec![$(self.$index.to_value()),+])
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::Structure(fields) if fields.len() == [$($index),+].len() => {
                        Some(($($field::from_value(&fields[$index])?,)+))
                    }
                    _ => None,
                }
            }
        }

        impl<$($field: IsValue),+> IsVariant for ($($field,)+) {
            variant_via_value!();
        }
    };
}

tuple_host!(A: 0, B: 1);
tuple_host!(A: 0, B: 1, C: 2);
tuple_host!(A: 0, B: 1, C: 2, D: 3);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10, L: 11);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10, L: 11, M: 12);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10, L: 11, M: 12, N: 13);
tuple_host!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10, L: 11, M: 12, N: 13, O: 14);

/// Names cross the wire as their string rendering.
macro_rules! name_variant {
    ($name:ty) => {
        impl IsVariant for $name {
            fn to_variant(&self) -> Variant {
                Variant::new(Value::Atom(Atom::Text(self.as_str().to_owned())))
            }

            fn from_variant(variant: &Variant) -> Option<Self> {
                match variant.value() {
                    Value::Atom(Atom::Text(text)) => <$name>::new(text.as_str()).ok(),
                    _ => None,
                }
            }
        }
    };
}

name_variant!(InterfaceName);
name_variant!(MemberName);
name_variant!(ErrorName);
name_variant!(BusName);

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: IsVariant + PartialEq + std::fmt::Debug>(x: T) {
        assert_eq!(T::from_variant(&x.to_variant()), Some(x));
    }

    #[test]
    fn atoms_roundtrip() {
        roundtrip(true);
        roundtrip(7u8);
        roundtrip(7u16);
        roundtrip(7u32);
        roundtrip(7u64);
        roundtrip(-7i16);
        roundtrip(-7i32);
        roundtrip(-7i64);
        roundtrip(1.5f64);
        roundtrip(String::from("hello"));
        roundtrip(Signature::parse("a{sv}").unwrap());
        roundtrip(ObjectPath::from_static("/org/example"));
    }

    #[test]
    fn mismatch_is_none() {
        let v = 7u8.to_variant();
        assert_eq!(u16::from_variant(&v), None);
        assert_eq!(bool::from_variant(&v), None);
        assert_eq!(String::from_variant(&v), None);
        assert_eq!(Vec::<u8>::from_variant(&7u32.to_variant()), None);
    }

    #[test]
    fn vectors_roundtrip() {
        roundtrip(vec![1u32, 2, 3]);
        roundtrip(Vec::<String>::new());
        roundtrip(vec![vec![1i64], vec![], vec![2, 3]]);
        assert_eq!(
            Vec::<u32>::value_type(),
            Type::array(Type::Word32)
        );
    }

    #[test]
    fn bytes_roundtrip_both_representations() {
        let bytes = Bytes::from_static(b"payload");
        roundtrip(bytes.clone());

        // Bytes decodes out of the general Word8 vector form
        let vector = vec![0x70u8, 0x61, 0x79].to_value();
        assert!(matches!(vector, Value::Vector(..)));
        assert_eq!(
            Bytes::from_value(&vector),
            Some(Bytes::from_static(b"pay"))
        );

        // and Vec<u8> decodes out of the compact form
        let compact = bytes.to_value();
        assert!(matches!(compact, Value::Bytes(_)));
        assert_eq!(Vec::<u8>::from_value(&compact), Some(b"payload".to_vec()));

        // both encode to equal values with the same variant type
        assert_eq!(bytes.to_value(), b"payload".to_vec().to_value());
        assert_eq!(
            bytes.to_variant().type_of(),
            b"payload".to_vec().to_variant().type_of()
        );
    }

    #[test]
    fn maps_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert(String::from("a"), 1u32);
        map.insert(String::from("b"), 2u32);
        roundtrip(map);

        assert_eq!(
            BTreeMap::<u8, String>::value_type(),
            Type::dictionary(AtomicType::Word8, Type::String)
        );
        roundtrip(BTreeMap::<u8, String>::new());
    }

    #[test]
    fn map_mismatch_is_none() {
        let map: BTreeMap<String, u32> = BTreeMap::new();
        let v = map.to_variant();
        assert_eq!(BTreeMap::<String, u64>::from_variant(&v), None);
        assert_eq!(BTreeMap::<u8, u32>::from_variant(&v), None);
    }

    #[test]
    fn tuples_roundtrip() {
        roundtrip((1u8, String::from("x")));
        roundtrip((1u8, 2u16, 3u32, 4u64, 5i16, 6i32, 7i64, true));
        roundtrip((
            1u8, 2u8, 3u8, 4u8, 5u8, 6u8, 7u8, 8u8, 9u8, 10u8, 11u8, 12u8, 13u8, 14u8, 15u8,
        ));
        assert_eq!(
            <(u8, u16)>::value_type(),
            Type::structure(vec![Type::Word8, Type::Word16]).unwrap()
        );
    }

    #[test]
    fn tuple_arity_mismatch_is_none() {
        let v = (1u8, 2u8, 3u8).to_variant();
        assert_eq!(<(u8, u8)>::from_variant(&v), None);
    }

    #[test]
    fn variants_nest() {
        let inner = 42i32.to_variant();
        let outer = inner.to_variant();
        assert_eq!(outer.type_of(), Type::Variant);
        assert_eq!(Variant::from_variant(&outer), Some(inner.clone()));
        assert_eq!(i32::from_variant(&inner), Some(42));
        // a plain i32 variant is not a nested variant
        assert_eq!(Variant::from_variant(&inner), None);
    }

    #[test]
    fn names_convert_via_strings() {
        let name = InterfaceName::from_static("org.example.Iface");
        let v = name.to_variant();
        assert_eq!(v.type_of(), Type::String);
        assert_eq!(InterfaceName::from_variant(&v), Some(name));

        // invalid text of the right type is still absent
        let junk = Variant::from("not an interface");
        assert_eq!(InterfaceName::from_variant(&junk), None);

        roundtrip(BusName::from_static(":1.42"));
        roundtrip(MemberName::from_static("Frob"));
        roundtrip(ErrorName::from_static("org.example.Error.Failed"));
    }
}
