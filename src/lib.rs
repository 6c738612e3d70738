//! # tagwire
//!
//! A self-describing Tag-Length-Value (TLV) binary codec with deferred
//! contract resolution.
//!
//! Every value on the wire is a *tag*: a 6-byte header (a packed wire-type /
//! field-id word plus a 32-bit value length) followed by the value bytes.
//! Composite tags nest further tags; *contract* tags additionally carry a
//! 32-bit contract id identifying the message type that produced them.
//!
//! Message types are plain structs implementing the [`Contract`] trait: a
//! stable numeric id, a `save` that emits fields into a [`SaveContext`], and
//! a `parse` that reads them back out of a [`ParseContext`]. No schema
//! compiler, no derive macros — the wire format is self-describing.
//!
//! The distinguishing feature is *deferred resolution*: reading a contract
//! whose id is not registered does not fail. The reader hands back an
//! [`UnresolvedContract`] holding the raw tag tree, which can be re-emitted
//! losslessly or later resolved into a concrete type with [`resolve`] /
//! [`UnresolvedContract::resolve`] — repeatably, against as many candidate
//! types as the caller cares to try.
//!
//! ```rust
//! use tagwire::{Contract, ParseContext, SaveContext, Result};
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Person {
//!     name: String,
//!     age: i32,
//! }
//!
//! impl Contract for Person {
//!     fn contract_id(&self) -> u32 {
//!         1
//!     }
//!     fn save(&self, ctx: &mut SaveContext) -> Result<()> {
//!         ctx.save_string(1, &self.name);
//!         ctx.save_int(2, self.age);
//!         Ok(())
//!     }
//!     fn parse(&mut self, ctx: &ParseContext<'_>) -> Result<()> {
//!         self.name = ctx.string(1)?;
//!         self.age = ctx.int(2)?;
//!         Ok(())
//!     }
//! }
//!
//! let person = Person { name: "Kevin".into(), age: 37 };
//! let mut buf = tagwire::encode(&person).unwrap();
//! let decoded: Person = tagwire::decode(&mut buf).unwrap();
//! assert_eq!(person, decoded);
//! ```

pub mod core;
mod stream;

use bytes::{Buf, Bytes, BytesMut};
use std::any::Any;

pub use crate::core::{
    ContractRegistry, ParseContext, SaveContext, Tag, UnresolvedContract, WireType, HEADER_LEN,
};
pub use crate::stream::{TagReader, TagWriter};

/// Errors that can occur while encoding, decoding, or resolving contracts.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The buffer did not hold enough bytes for a fixed-width read.
    #[error("Buffer out of range: needed {needed} bytes, {available} available")]
    OutOfRange { needed: usize, available: usize },
    /// A scalar tag's declared value length disagrees with its wire size.
    #[error("Length mismatch for {wire_type:?}: declared {declared}, expected {expected}")]
    LengthMismatch {
        wire_type: WireType,
        declared: usize,
        expected: usize,
    },
    /// An unrecognized wire-type code was found during decode.
    #[error("Unknown wire type code: {0}")]
    UnknownWireType(u8),
    /// Two distinct contract types claimed the same contract id.
    #[error("Contract id {id} is already registered for {existing}, cannot register {incoming}")]
    DuplicateContractId {
        id: u32,
        existing: &'static str,
        incoming: &'static str,
    },
    /// A throwing registry lookup found no binding for the id.
    #[error("No contract registered for id {0}")]
    NotFound(u32),
    /// A requested field id was absent from a parse context.
    #[error("Field {0} not found")]
    FieldNotFound(u16),
    /// A field was present but held a different tag variant than requested.
    #[error("Field {field_id} has wire type {found:?}, expected {expected:?}")]
    WireTypeMismatch {
        field_id: u16,
        expected: WireType,
        found: WireType,
    },
    /// A decoded contract id differs from the statically expected one.
    #[error("Contract id mismatch: expected {expected}, found {found}")]
    ContractTypeMismatch { expected: u32, found: u32 },
    /// Fewer bytes arrived than a declared length requires, mid-structure.
    /// A clean end of stream at a tag boundary is `Ok(None)`, not this.
    #[error("Stream truncated: needed {needed} bytes, got {got}")]
    TruncatedStream { needed: usize, got: usize },
    /// A reader or writer was used before `connect`.
    #[error("Not connected to a stream")]
    NotConnected,
    /// `connect` was called on an already-bound reader or writer.
    #[error("Already connected to a stream")]
    AlreadyConnected,
    /// `resolve` was attempted against stored data with a different id.
    #[error("Cannot resolve contract: expected id {expected}, stored id {found}")]
    UnresolvedMismatch { expected: u32, found: u32 },
    /// Value bytes were malformed (invalid UTF-8, invalid decimal scale).
    #[error("Decode error: {0}")]
    Decode(String),
    /// An I/O failure from the underlying stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, WireError>;

/// The capability a message type must expose to travel as a contract tag.
///
/// Implementors are ordinary structs; `Default` is additionally required
/// wherever the crate needs to construct an instance to parse into (registry
/// factories, typed reads, resolution).
///
/// # Errors
/// `parse` and `save` return [`WireError`] when a required field is missing,
/// holds the wrong wire type, or a nested contract's id does not match.
pub trait Contract: Any {
    /// The stable numeric identity of this contract type. Written alongside
    /// the data so a reader can identify, reject, or defer it.
    fn contract_id(&self) -> u32;

    /// Populate this instance's fields from a decoded tag tree.
    fn parse(&mut self, ctx: &ParseContext<'_>) -> Result<()>;

    /// Emit this instance's fields into a tag tree.
    fn save(&self, ctx: &mut SaveContext) -> Result<()>;
}

impl std::fmt::Debug for dyn Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contract")
            .field("contract_id", &self.contract_id())
            .finish()
    }
}

pub(crate) fn contract_id_of<T: Contract + Default>() -> u32 {
    T::default().contract_id()
}

/// Resolves a dynamically-typed contract into a concrete `T`.
///
/// - If `contract` already is a `T`, it is returned as-is.
/// - If it is an [`UnresolvedContract`] whose stored id matches `T`'s, a
///   fresh `T` is parsed from the stored raw tag tree.
/// - Anything else fails with [`WireError::UnresolvedMismatch`] carrying
///   both ids.
pub fn resolve<T: Contract + Default>(contract: Box<dyn Contract>) -> Result<T> {
    let found = contract.contract_id();
    let any: Box<dyn Any> = contract;
    let any = match any.downcast::<T>() {
        Ok(value) => return Ok(*value),
        Err(other) => other,
    };
    match any.downcast::<UnresolvedContract>() {
        Ok(unresolved) => unresolved.resolve(),
        Err(_) => Err(WireError::UnresolvedMismatch {
            expected: contract_id_of::<T>(),
            found,
        }),
    }
}

/// Non-failing form of [`resolve`].
pub fn try_resolve<T: Contract + Default>(contract: Box<dyn Contract>) -> Option<T> {
    resolve(contract).ok()
}

/// Convenience function to encode a contract into a standalone byte buffer.
///
/// The output is one fully-framed contract tag, byte-identical to what
/// [`TagWriter::write_contract`] would put on a stream.
pub fn encode(contract: &dyn Contract) -> Result<Bytes> {
    let tag = Tag::from_contract(contract)?;
    let mut writer = BytesMut::with_capacity(HEADER_LEN + tag.value_len());
    tag.encode_frame(&mut writer);
    Ok(writer.freeze())
}

/// Convenience function to decode a typed contract from a byte buffer.
///
/// The buffer is advanced past the consumed frame. The frame's contract id
/// must equal `T`'s exactly; a mismatch fails with
/// [`WireError::ContractTypeMismatch`] before any `T` is constructed.
pub fn decode<T: Contract + Default>(reader: &mut Bytes) -> Result<T> {
    let mut cursor: &[u8] = reader;
    let remaining = cursor.len();
    let tag = Tag::decode_frame(&mut cursor)?;
    let consumed = remaining - cursor.len();
    reader.advance(consumed);
    let expected = contract_id_of::<T>();
    match tag {
        Tag::Contract {
            contract_id,
            children,
            ..
        } => {
            if contract_id != expected {
                return Err(WireError::ContractTypeMismatch {
                    expected,
                    found: contract_id,
                });
            }
            let mut value = T::default();
            value.parse(&ParseContext::new(&children))?;
            Ok(value)
        }
        other => Err(WireError::WireTypeMismatch {
            field_id: other.field_id(),
            expected: WireType::Contract,
            found: other.wire_type(),
        }),
    }
}
