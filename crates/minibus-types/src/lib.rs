#![deny(unsafe_code)]

//! The D-Bus type algebra.
//!
//! This crate models the wire data model of D-Bus without doing any I/O:
//!
//! - [`Type`] and [`AtomicType`] — the recursive type algebra and the
//!   "may key a dictionary" predicate
//! - [`Signature`] — a validated sequence of top-level types with the
//!   compact byte-form parser and formatter
//! - [`ObjectPath`], [`InterfaceName`], [`MemberName`], [`ErrorName`],
//!   [`BusName`] — validated nominal name wrappers
//! - [`Atom`], [`Value`], [`Variant`] — runtime values carrying their own
//!   types
//! - [`IsAtom`], [`IsValue`], [`IsVariant`] — conversion capabilities for
//!   host types
//!
//! Marshalling values to and from the binary frame format is deliberately
//! not part of this crate; a frame codec consumes these types through the
//! client crate's codec seam.

mod convert;
mod names;
mod signature;
mod ty;
mod value;

pub use convert::{IsAtom, IsValue, IsVariant};
pub use names::{BusName, ErrorName, InterfaceName, MemberName, NameError, ObjectPath};
pub use signature::{Signature, SignatureError, MAX_SIGNATURE_LEN};
pub use ty::{AtomicType, Type};
pub use value::{Atom, Value, Variant};
