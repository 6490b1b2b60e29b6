//! The recursive type algebra.

use std::fmt;

/// An atomic type: a scalar or string type whose values are totally
/// ordered. Only atomic types may key a dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AtomicType {
    Boolean,
    Word8,
    Word16,
    Word32,
    Word64,
    Int16,
    Int32,
    Int64,
    Double,
    String,
    Signature,
    ObjectPath,
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AtomicType::Boolean => "Bool",
            AtomicType::Word8 => "Word8",
            AtomicType::Word16 => "Word16",
            AtomicType::Word32 => "Word32",
            AtomicType::Word64 => "Word64",
            AtomicType::Int16 => "Int16",
            AtomicType::Int32 => "Int32",
            AtomicType::Int64 => "Int64",
            AtomicType::Double => "Double",
            AtomicType::String => "String",
            AtomicType::Signature => "Signature",
            AtomicType::ObjectPath => "ObjectPath",
        };
        f.write_str(name)
    }
}

/// A D-Bus type.
///
/// The `Dictionary` key slot is [`AtomicType`], so a dictionary with a
/// non-atomic key cannot be constructed at all. `Structure` must carry at
/// least one field; use [`Type::structure`] to build one with that checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Boolean,
    Word8,
    Word16,
    Word32,
    Word64,
    Int16,
    Int32,
    Int64,
    Double,
    String,
    Signature,
    ObjectPath,
    Variant,
    Array(Box<Type>),
    Dictionary(AtomicType, Box<Type>),
    Structure(Vec<Type>),
}

impl Type {
    /// Build an array type.
    pub fn array(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    /// Build a dictionary type. Key atomicity is enforced by the parameter
    /// type.
    pub fn dictionary(key: AtomicType, value: Type) -> Type {
        Type::Dictionary(key, Box::new(value))
    }

    /// Build a structure type. Returns `None` for an empty field list:
    /// the empty structure does not exist in the type algebra.
    pub fn structure(fields: Vec<Type>) -> Option<Type> {
        if fields.is_empty() {
            None
        } else {
            Some(Type::Structure(fields))
        }
    }

    /// The atomic view of this type, if it has one.
    pub fn as_atomic(&self) -> Option<AtomicType> {
        let atomic = match self {
            Type::Boolean => AtomicType::Boolean,
            Type::Word8 => AtomicType::Word8,
            Type::Word16 => AtomicType::Word16,
            Type::Word32 => AtomicType::Word32,
            Type::Word64 => AtomicType::Word64,
            Type::Int16 => AtomicType::Int16,
            Type::Int32 => AtomicType::Int32,
            Type::Int64 => AtomicType::Int64,
            Type::Double => AtomicType::Double,
            Type::String => AtomicType::String,
            Type::Signature => AtomicType::Signature,
            Type::ObjectPath => AtomicType::ObjectPath,
            _ => return None,
        };
        Some(atomic)
    }

    /// True for the twelve scalar/string cases, false for `Variant` and
    /// every container.
    pub fn is_atomic(&self) -> bool {
        self.as_atomic().is_some()
    }

    /// The length of this type's byte encoding within a signature.
    pub(crate) fn signature_len(&self) -> usize {
        match self {
            Type::Array(element) => 1 + element.signature_len(),
            // the enclosing `a{` and `}` are three bytes
            Type::Dictionary(_, value) => 3 + 1 + value.signature_len(),
            Type::Structure(fields) => {
                2 + fields.iter().map(Type::signature_len).sum::<usize>()
            }
            _ => 1,
        }
    }

    /// Render for an argument position: dictionaries are parenthesised,
    /// everything else is self-delimiting.
    fn fmt_argument(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if matches!(self, Type::Dictionary(..)) {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl From<AtomicType> for Type {
    fn from(atomic: AtomicType) -> Type {
        match atomic {
            AtomicType::Boolean => Type::Boolean,
            AtomicType::Word8 => Type::Word8,
            AtomicType::Word16 => Type::Word16,
            AtomicType::Word32 => Type::Word32,
            AtomicType::Word64 => Type::Word64,
            AtomicType::Int16 => Type::Int16,
            AtomicType::Int32 => Type::Int32,
            AtomicType::Int64 => Type::Int64,
            AtomicType::Double => Type::Double,
            AtomicType::String => Type::String,
            AtomicType::Signature => Type::Signature,
            AtomicType::ObjectPath => Type::ObjectPath,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Variant => f.write_str("Variant"),
            Type::Array(element) => {
                f.write_str("[")?;
                write!(f, "{element}")?;
                f.write_str("]")
            }
            Type::Dictionary(key, value) => {
                write!(f, "Map {key} ")?;
                value.fmt_argument(f)
            }
            Type::Structure(fields) => {
                f.write_str("(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
            other => match other.as_atomic() {
                Some(atomic) => write!(f, "{atomic}"),
                None => unreachable!("all non-container cases are atomic"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_predicate() {
        assert!(Type::Boolean.is_atomic());
        assert!(Type::Word8.is_atomic());
        assert!(Type::Double.is_atomic());
        assert!(Type::String.is_atomic());
        assert!(Type::Signature.is_atomic());
        assert!(Type::ObjectPath.is_atomic());

        assert!(!Type::Variant.is_atomic());
        assert!(!Type::array(Type::Word8).is_atomic());
        assert!(!Type::dictionary(AtomicType::Word8, Type::Word8).is_atomic());
        assert!(!Type::structure(vec![Type::Word8]).unwrap().is_atomic());
    }

    #[test]
    fn empty_structure_is_rejected() {
        assert!(Type::structure(Vec::new()).is_none());
    }

    #[test]
    fn display_atoms() {
        assert_eq!(Type::Boolean.to_string(), "Bool");
        assert_eq!(Type::Word8.to_string(), "Word8");
        assert_eq!(Type::Double.to_string(), "Double");
        assert_eq!(Type::String.to_string(), "String");
        assert_eq!(Type::Signature.to_string(), "Signature");
        assert_eq!(Type::ObjectPath.to_string(), "ObjectPath");
        assert_eq!(Type::Variant.to_string(), "Variant");
    }

    #[test]
    fn display_containers() {
        assert_eq!(Type::array(Type::Word8).to_string(), "[Word8]");
        assert_eq!(
            Type::dictionary(
                AtomicType::Word8,
                Type::dictionary(AtomicType::Word8, Type::Word8),
            )
            .to_string(),
            "Map Word8 (Map Word8 Word8)"
        );
        assert_eq!(
            Type::structure(vec![Type::Word8, Type::Word16]).unwrap().to_string(),
            "(Word8, Word16)"
        );
        assert_eq!(
            Type::dictionary(AtomicType::String, Type::array(Type::Int32)).to_string(),
            "Map String [Int32]"
        );
    }

    #[test]
    fn signature_lengths() {
        assert_eq!(Type::Word8.signature_len(), 1);
        assert_eq!(Type::Variant.signature_len(), 1);
        assert_eq!(Type::array(Type::Word8).signature_len(), 2);
        assert_eq!(
            Type::dictionary(AtomicType::String, Type::Variant).signature_len(),
            5
        );
        assert_eq!(
            Type::structure(vec![Type::Word8, Type::Word16]).unwrap().signature_len(),
            4
        );
    }
}
