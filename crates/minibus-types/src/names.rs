//! Validated name wrappers.
//!
//! Five nominal text types with distinct grammars: object paths, interface
//! names, member names, error names, and bus names. A value of one of
//! these types is always valid; construction is the only place validation
//! happens.

use std::fmt;
use std::str::FromStr;

/// All names except object paths are capped at this many characters.
const MAX_NAME_LEN: usize = 255;

/// Text that failed validation for a name category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameError {
    category: &'static str,
    text: String,
}

impl NameError {
    fn new(category: &'static str, text: String) -> NameError {
        NameError { category, text }
    }

    /// The name category that rejected the text, e.g. `"interface name"`.
    pub fn category(&self) -> &'static str {
        self.category
    }

    /// The rejected text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.category, self.text)
    }
}

impl std::error::Error for NameError {}

fn is_element_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn is_element_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

/// One or more `/`-separated elements of `[A-Za-z0-9_]+`, or the root `/`.
fn valid_object_path(text: &str) -> bool {
    if text == "/" {
        return true;
    }
    let Some(rest) = text.strip_prefix('/') else {
        return false;
    };
    !rest.is_empty()
        && rest
            .split('/')
            .all(|element| !element.is_empty() && element.bytes().all(is_element_byte))
}

/// `start` and `body` describe the character classes of one dot-separated
/// element.
fn valid_dotted(text: &str, start: fn(u8) -> bool, body: fn(u8) -> bool) -> bool {
    let mut elements = 0;
    for element in text.split('.') {
        let bytes = element.as_bytes();
        match bytes.first() {
            Some(&first) if start(first) => {}
            _ => return false,
        }
        if !bytes[1..].iter().all(|&b| body(b)) {
            return false;
        }
        elements += 1;
    }
    elements >= 2
}

fn valid_interface_name(text: &str) -> bool {
    text.len() <= MAX_NAME_LEN && valid_dotted(text, is_element_start, is_element_byte)
}

fn valid_member_name(text: &str) -> bool {
    let bytes = text.as_bytes();
    text.len() <= MAX_NAME_LEN
        && matches!(bytes.first(), Some(&first) if is_element_start(first))
        && bytes[1..].iter().all(|&b| is_element_byte(b))
}

fn unique_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-'
}

fn well_known_start(byte: u8) -> bool {
    is_element_start(byte) || byte == b'-'
}

fn well_known_byte(byte: u8) -> bool {
    is_element_byte(byte) || byte == b'-'
}

/// Well-known names look like interface names (with `-` also allowed);
/// unique names start with `:` and allow digits anywhere in an element.
fn valid_bus_name(text: &str) -> bool {
    if text.len() > MAX_NAME_LEN {
        return false;
    }
    match text.strip_prefix(':') {
        Some(rest) => valid_dotted(rest, unique_name_byte, unique_name_byte),
        None => valid_dotted(text, well_known_start, well_known_byte),
    }
}

macro_rules! name_type {
    ($(#[$doc:meta])* $name:ident, $category:expr, $validate:path) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap the given text.
            pub fn new(text: impl Into<String>) -> Result<$name, NameError> {
                let text = text.into();
                if $validate(&text) {
                    Ok($name(text))
                } else {
                    Err(NameError::new($category, text))
                }
            }

            /// Wrap a literal known to be valid at authoring time.
            ///
            /// # Panics
            ///
            /// Panics if the literal is not a valid name of this category.
            pub fn from_static(text: &'static str) -> $name {
                match $name::new(text) {
                    Ok(name) => name,
                    Err(e) => panic!("{e}"),
                }
            }

            /// The wrapped text.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = NameError;

            fn from_str(s: &str) -> Result<$name, NameError> {
                $name::new(s)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = NameError;

            fn try_from(s: &str) -> Result<$name, NameError> {
                $name::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type!(
    /// A slash-separated hierarchical object identifier, e.g.
    /// `/org/freedesktop/DBus`. Unlike the other names, paths have no
    /// length cap.
    ObjectPath,
    "object path",
    valid_object_path
);

name_type!(
    /// A dotted interface identifier, e.g. `org.freedesktop.DBus`.
    InterfaceName,
    "interface name",
    valid_interface_name
);

name_type!(
    /// A single method or signal identifier, e.g. `Introspect`.
    MemberName,
    "member name",
    valid_member_name
);

name_type!(
    /// A dotted error identifier, e.g.
    /// `org.freedesktop.DBus.Error.UnknownMethod`.
    ErrorName,
    "error name",
    valid_interface_name
);

name_type!(
    /// A well-known name (`com.example.App`) or a unique connection name
    /// (`:1.42`).
    BusName,
    "bus name",
    valid_bus_name
);
