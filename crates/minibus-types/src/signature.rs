//! The compact byte-form type descriptor language.
//!
//! A signature is a sequence of top-level types whose byte encoding is at
//! most 255 octets. Both directions are strict: [`Signature::new`] rejects
//! type lists whose encoding would overflow the bound, and
//! [`Signature::parse`] rejects every byte string outside the grammar.

use std::fmt;
use std::str::FromStr;

use crate::ty::{AtomicType, Type};

/// Maximum byte length of an encoded signature.
pub const MAX_SIGNATURE_LEN: usize = 255;

/// A validated sequence of top-level types.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    types: Vec<Type>,
}

impl Signature {
    /// The empty signature.
    pub fn empty() -> Signature {
        Signature { types: Vec::new() }
    }

    /// Build a signature from a list of types.
    ///
    /// Fails when the byte encoding would exceed [`MAX_SIGNATURE_LEN`] or
    /// when a type contains an empty structure.
    pub fn new(types: Vec<Type>) -> Result<Signature, SignatureError> {
        let mut len = 0;
        for ty in &types {
            check_well_formed(ty)?;
            len += ty.signature_len();
            if len > MAX_SIGNATURE_LEN {
                return Err(SignatureError::TooLong(len));
            }
        }
        Ok(Signature { types })
    }

    /// Build a signature holding a single type.
    pub fn single(ty: Type) -> Result<Signature, SignatureError> {
        Signature::new(vec![ty])
    }

    /// The top-level types of this signature.
    pub fn types(&self) -> &[Type] {
        &self.types
    }

    /// The byte-form rendering, e.g. `"a{sv}"`.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for ty in &self.types {
            format_type(ty, &mut out);
        }
        out
    }

    /// Parse the byte form.
    pub fn parse(input: &str) -> Result<Signature, SignatureError> {
        let bytes = input.as_bytes();
        if bytes.len() > MAX_SIGNATURE_LEN {
            return Err(SignatureError::TooLong(bytes.len()));
        }
        match bytes {
            [] => Ok(Signature::empty()),
            // single-byte fast path; container starts fall through to the
            // general parser so both paths reject identically
            [b] => match single_code(*b) {
                Some(ty) => Ok(Signature { types: vec![ty] }),
                None => parse_multi(bytes),
            },
            _ => parse_multi(bytes),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:?})", self.text())
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Signature, SignatureError> {
        Signature::parse(s)
    }
}

/// Why a byte string or type list is not a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// Byte encoding longer than [`MAX_SIGNATURE_LEN`].
    TooLong(usize),
    /// A byte outside the grammar, with its position.
    UnexpectedByte(u8, usize),
    /// The file-descriptor code `h`, which this library does not support.
    UnsupportedFd(usize),
    /// A dictionary key that is not an atomic type.
    NonAtomicDictKey(usize),
    /// `()` — the empty structure does not exist.
    EmptyStructure,
    /// A `(` with no matching `)`.
    UnterminatedStructure(usize),
    /// Input ended in the middle of a type.
    UnexpectedEnd,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::TooLong(len) => {
                write!(f, "signature is {len} bytes, limit is {MAX_SIGNATURE_LEN}")
            }
            SignatureError::UnexpectedByte(byte, pos) => {
                write!(f, "unexpected byte {:?} at offset {pos}", *byte as char)
            }
            SignatureError::UnsupportedFd(pos) => {
                write!(f, "file descriptor type at offset {pos} is not supported")
            }
            SignatureError::NonAtomicDictKey(pos) => {
                write!(f, "dictionary key at offset {pos} is not atomic")
            }
            SignatureError::EmptyStructure => f.write_str("empty structure"),
            SignatureError::UnterminatedStructure(pos) => {
                write!(f, "structure opened at offset {pos} is never closed")
            }
            SignatureError::UnexpectedEnd => f.write_str("signature ends mid-type"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Reject empty structures hiding inside a hand-built `Type`.
fn check_well_formed(ty: &Type) -> Result<(), SignatureError> {
    match ty {
        Type::Array(element) => check_well_formed(element),
        Type::Dictionary(_, value) => check_well_formed(value),
        Type::Structure(fields) => {
            if fields.is_empty() {
                return Err(SignatureError::EmptyStructure);
            }
            fields.iter().try_for_each(check_well_formed)
        }
        _ => Ok(()),
    }
}

fn atom_code(atomic: AtomicType) -> u8 {
    match atomic {
        AtomicType::Boolean => b'b',
        AtomicType::Word8 => b'y',
        AtomicType::Word16 => b'q',
        AtomicType::Word32 => b'u',
        AtomicType::Word64 => b't',
        AtomicType::Int16 => b'n',
        AtomicType::Int32 => b'i',
        AtomicType::Int64 => b'x',
        AtomicType::Double => b'd',
        AtomicType::String => b's',
        AtomicType::Signature => b'g',
        AtomicType::ObjectPath => b'o',
    }
}

fn atom_from_code(byte: u8) -> Option<AtomicType> {
    let atomic = match byte {
        b'b' => AtomicType::Boolean,
        b'y' => AtomicType::Word8,
        b'q' => AtomicType::Word16,
        b'u' => AtomicType::Word32,
        b't' => AtomicType::Word64,
        b'n' => AtomicType::Int16,
        b'i' => AtomicType::Int32,
        b'x' => AtomicType::Int64,
        b'd' => AtomicType::Double,
        b's' => AtomicType::String,
        b'g' => AtomicType::Signature,
        b'o' => AtomicType::ObjectPath,
        _ => return None,
    };
    Some(atomic)
}

/// The complete single-byte signature table: atoms plus `v`.
fn single_code(byte: u8) -> Option<Type> {
    if byte == b'v' {
        Some(Type::Variant)
    } else {
        atom_from_code(byte).map(Type::from)
    }
}

fn format_type(ty: &Type, out: &mut String) {
    match ty {
        Type::Variant => out.push('v'),
        Type::Array(element) => {
            out.push('a');
            format_type(element, out);
        }
        Type::Dictionary(key, value) => {
            out.push_str("a{");
            out.push(atom_code(*key) as char);
            format_type(value, out);
            out.push('}');
        }
        Type::Structure(fields) => {
            out.push('(');
            for field in fields {
                format_type(field, out);
            }
            out.push(')');
        }
        other => match other.as_atomic() {
            Some(atomic) => out.push(atom_code(atomic) as char),
            None => unreachable!("all non-container cases are atomic"),
        },
    }
}

fn parse_multi(bytes: &[u8]) -> Result<Signature, SignatureError> {
    let mut parser = Parser { bytes, pos: 0 };
    let mut types = Vec::new();
    while parser.pos < parser.bytes.len() {
        types.push(parser.parse_one()?);
    }
    Ok(Signature { types })
}

/// Recursive descent over the three productions: top-level type,
/// array tail, structure body.
struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let byte = self.peek();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }

    fn parse_one(&mut self) -> Result<Type, SignatureError> {
        let pos = self.pos;
        let byte = self.next().ok_or(SignatureError::UnexpectedEnd)?;
        match byte {
            b'v' => Ok(Type::Variant),
            b'a' => self.parse_array_tail(),
            b'(' => self.parse_structure_body(pos),
            b'h' => Err(SignatureError::UnsupportedFd(pos)),
            _ => atom_from_code(byte)
                .map(Type::from)
                .ok_or(SignatureError::UnexpectedByte(byte, pos)),
        }
    }

    /// After an `a`: either a `{key value}` dictionary body or any single
    /// element type.
    fn parse_array_tail(&mut self) -> Result<Type, SignatureError> {
        match self.peek().ok_or(SignatureError::UnexpectedEnd)? {
            b'{' => {
                self.pos += 1;
                let key_pos = self.pos;
                let key_byte = self.next().ok_or(SignatureError::UnexpectedEnd)?;
                let key = match key_byte {
                    b'v' | b'a' | b'(' | b'{' => {
                        return Err(SignatureError::NonAtomicDictKey(key_pos));
                    }
                    b'h' => return Err(SignatureError::UnsupportedFd(key_pos)),
                    _ => atom_from_code(key_byte)
                        .ok_or(SignatureError::UnexpectedByte(key_byte, key_pos))?,
                };
                let value = self.parse_one()?;
                let close_pos = self.pos;
                match self.next() {
                    Some(b'}') => Ok(Type::Dictionary(key, Box::new(value))),
                    Some(byte) => Err(SignatureError::UnexpectedByte(byte, close_pos)),
                    None => Err(SignatureError::UnexpectedEnd),
                }
            }
            _ => Ok(Type::Array(Box::new(self.parse_one()?))),
        }
    }

    /// After a `(`: one or more types terminated by `)`.
    fn parse_structure_body(&mut self, open: usize) -> Result<Type, SignatureError> {
        let mut fields = Vec::new();
        loop {
            match self.peek() {
                None => return Err(SignatureError::UnterminatedStructure(open)),
                Some(b')') => {
                    self.pos += 1;
                    return Type::structure(fields).ok_or(SignatureError::EmptyStructure);
                }
                Some(_) => fields.push(self.parse_one()?),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parses(input: &str) -> Vec<Type> {
        Signature::parse(input)
            .unwrap_or_else(|e| panic!("{input:?} should parse: {e}"))
            .types()
            .to_vec()
    }

    fn rejects(input: &str) {
        assert!(Signature::parse(input).is_err(), "{input:?} should be rejected");
    }

    #[test]
    fn empty_signature() {
        assert_eq!(parses(""), Vec::<Type>::new());
        assert_eq!(Signature::empty().text(), "");
    }

    #[test]
    fn single_atoms_and_variant() {
        assert_eq!(parses("y"), vec![Type::Word8]);
        assert_eq!(parses("b"), vec![Type::Boolean]);
        assert_eq!(parses("d"), vec![Type::Double]);
        assert_eq!(parses("g"), vec![Type::Signature]);
        assert_eq!(parses("o"), vec![Type::ObjectPath]);
        assert_eq!(parses("v"), vec![Type::Variant]);
    }

    #[test]
    fn containers() {
        assert_eq!(parses("ay"), vec![Type::array(Type::Word8)]);
        assert_eq!(
            parses("aay"),
            vec![Type::array(Type::array(Type::Word8))]
        );
        assert_eq!(
            parses("a{sv}"),
            vec![Type::dictionary(AtomicType::String, Type::Variant)]
        );
        assert_eq!(
            parses("aa{yv}"),
            vec![Type::array(Type::dictionary(AtomicType::Word8, Type::Variant))]
        );
        assert_eq!(
            parses("(yq)"),
            vec![Type::structure(vec![Type::Word8, Type::Word16]).unwrap()]
        );
        assert_eq!(
            parses("a{s(iv)}si"),
            vec![
                Type::dictionary(
                    AtomicType::String,
                    Type::structure(vec![Type::Int32, Type::Variant]).unwrap(),
                ),
                Type::String,
                Type::Int32,
            ]
        );
    }

    #[test]
    fn rejected_forms() {
        rejects("r");
        rejects("e");
        rejects("()");
        rejects("a{vy}");
        rejects("a{ay}");
        rejects("h");
        rejects("ah");
        rejects("a");
        rejects("a{");
        rejects("a{s");
        rejects("a{sv");
        rejects("a{sv)");
        rejects("(");
        rejects("(y");
        rejects(")");
        rejects("{sv}");
        rejects("y)");
        rejects("z");
    }

    #[test]
    fn length_bound_on_parse() {
        let ok254: String = "y".repeat(254);
        let ok255: String = "y".repeat(255);
        let bad256: String = "y".repeat(256);
        assert_eq!(parses(&ok254).len(), 254);
        assert_eq!(parses(&ok255).len(), 255);
        assert_eq!(
            Signature::parse(&bad256),
            Err(SignatureError::TooLong(256))
        );
    }

    #[test]
    fn length_bound_on_construction() {
        assert!(Signature::new(vec![Type::Word8; 255]).is_ok());
        assert!(matches!(
            Signature::new(vec![Type::Word8; 256]),
            Err(SignatureError::TooLong(_))
        ));
    }

    #[test]
    fn construction_rejects_hidden_empty_structure() {
        let bad = Type::array(Type::Structure(Vec::new()));
        assert_eq!(Signature::single(bad), Err(SignatureError::EmptyStructure));
    }

    #[test]
    fn format_parse_roundtrip() {
        let samples = [
            "",
            "y",
            "v",
            "ay",
            "a{sv}",
            "a{s(iv)}",
            "(yqutnixdbsgo)",
            "aaa{ya{sv}}",
            "(y(q(u)))",
        ];
        for text in samples {
            let sig = Signature::parse(text).unwrap();
            assert_eq!(sig.text(), text);
            assert_eq!(Signature::parse(&sig.text()).unwrap(), sig);
        }
    }

    #[test]
    fn construct_format_parse_roundtrip() {
        let types = vec![
            Type::dictionary(AtomicType::String, Type::Variant),
            Type::array(Type::Int64),
            Type::structure(vec![Type::Boolean, Type::ObjectPath]).unwrap(),
        ];
        let sig = Signature::new(types.clone()).unwrap();
        assert!(sig.text().len() <= MAX_SIGNATURE_LEN);
        assert_eq!(Signature::parse(&sig.text()).unwrap().types(), &types[..]);
    }

    #[test]
    fn fast_and_slow_paths_agree_on_single_bytes() {
        for byte in 0u8..=127 {
            let single = (byte as char).to_string();
            let doubled = format!("{0}{0}", byte as char);
            let single_result = Signature::parse(&single);
            let doubled_result = Signature::parse(&doubled);
            // a byte usable alone is usable twice, and vice versa
            assert_eq!(
                single_result.is_ok(),
                doubled_result.is_ok(),
                "paths disagree on {:?}",
                byte as char
            );
        }
    }
}
