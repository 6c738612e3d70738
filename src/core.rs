use crate::{contract_id_of, Contract, Result, WireError};
use bytes::{Buf, BufMut, BytesMut};
use rust_decimal::Decimal;
use std::any::{type_name, TypeId};
use std::collections::HashMap;

/// Size of every tag header on the wire: a 16-bit packed wire-type/field-id
/// word followed by a 32-bit value length, both little-endian.
pub const HEADER_LEN: usize = 6;

/// Wire-type codes used in the tag header.
///
/// These codes are stable and part of the wire format; a compatible
/// implementation must never renumber them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Ordered sequence of framed child tags.
    Composite = 1,
    /// Like `Composite`, but prefixed with a 32-bit contract id.
    Contract = 2,
    Bool = 3,
    String = 4,
    Short = 5,
    Int = 6,
    Long = 7,
    /// Variable-length two's-complement integer, 0-8 bytes.
    VarInt = 8,
    Double = 9,
    Binary = 10,
    Decimal = 11,
}

impl WireType {
    /// The 4-bit code this wire type packs into a header.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Maps a decoded 4-bit code back to its wire type.
    ///
    /// # Errors
    /// Returns [`WireError::UnknownWireType`] carrying the offending code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(WireType::Composite),
            2 => Ok(WireType::Contract),
            3 => Ok(WireType::Bool),
            4 => Ok(WireType::String),
            5 => Ok(WireType::Short),
            6 => Ok(WireType::Int),
            7 => Ok(WireType::Long),
            8 => Ok(WireType::VarInt),
            9 => Ok(WireType::Double),
            10 => Ok(WireType::Binary),
            11 => Ok(WireType::Decimal),
            other => Err(WireError::UnknownWireType(other)),
        }
    }
}

/// Packs a wire type and a field id into the 16-bit header word.
///
/// The wire type occupies bits 0-3, the field id bits 4-15. Field ids above
/// 4095 truncate; callers must not exceed 12 bits.
pub fn pack(wire_type: WireType, field_id: u16) -> u16 {
    ((field_id & 0x0FFF) << 4) | wire_type.code() as u16
}

/// Exact inverse of [`pack`]: returns the raw 4-bit code and the field id.
pub fn unpack(word: u16) -> (u8, u16) {
    ((word & 0x000F) as u8, word >> 4)
}

// --- Byte codec primitives ---
// Bounds-checked little-endian reads over a `&[u8]` cursor. Encoding is
// append-style through `BufMut` and cannot under-run.

fn need(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(WireError::OutOfRange {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

pub(crate) fn get_u16_le(buf: &mut &[u8]) -> Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16_le())
}

pub(crate) fn get_u32_le(buf: &mut &[u8]) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

pub(crate) fn get_u64_le(buf: &mut &[u8]) -> Result<u64> {
    need(buf, 8)?;
    Ok(buf.get_u64_le())
}

pub(crate) fn get_i16_le(buf: &mut &[u8]) -> Result<i16> {
    need(buf, 2)?;
    Ok(buf.get_i16_le())
}

pub(crate) fn get_i32_le(buf: &mut &[u8]) -> Result<i32> {
    need(buf, 4)?;
    Ok(buf.get_i32_le())
}

pub(crate) fn get_i64_le(buf: &mut &[u8]) -> Result<i64> {
    need(buf, 8)?;
    Ok(buf.get_i64_le())
}

/// IEEE double travels as its 64-bit bit pattern, little-endian.
pub(crate) fn get_f64_le(buf: &mut &[u8]) -> Result<f64> {
    Ok(f64::from_bits(get_u64_le(buf)?))
}

/// Splits `count` bytes off the front of the cursor.
pub(crate) fn take<'a>(buf: &mut &'a [u8], count: usize) -> Result<&'a [u8]> {
    need(buf, count)?;
    let (head, rest) = buf.split_at(count);
    *buf = rest;
    Ok(head)
}

/// Decimal travels as four 32-bit little-endian words in lo, mid, hi, flags
/// order; flags hold the scale in bits 16-23 and the sign in bit 31.
pub(crate) fn get_decimal(buf: &mut &[u8]) -> Result<Decimal> {
    need(buf, 16)?;
    let lo = buf.get_u32_le();
    let mid = buf.get_u32_le();
    let hi = buf.get_u32_le();
    let flags = buf.get_u32_le();
    let scale = (flags >> 16) & 0xFF;
    let magnitude = lo as i128 | (mid as i128) << 32 | (hi as i128) << 64;
    let mantissa = if flags & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    };
    Decimal::try_from_i128_with_scale(mantissa, scale)
        .map_err(|e| WireError::Decode(format!("Invalid decimal value: {}", e)))
}

pub(crate) fn put_decimal(writer: &mut BytesMut, value: &Decimal) {
    let magnitude = value.mantissa().unsigned_abs();
    writer.put_u32_le(magnitude as u32);
    writer.put_u32_le((magnitude >> 32) as u32);
    writer.put_u32_le((magnitude >> 64) as u32);
    let mut flags = value.scale() << 16;
    if value.is_sign_negative() {
        flags |= 0x8000_0000;
    }
    writer.put_u32_le(flags);
}

/// Number of bytes a var-int value occupies on the wire: the full 64-bit
/// two's-complement pattern with trailing zero bytes stripped from the high
/// end. Zero encodes to zero bytes; negative values keep their sign bytes.
fn var_int_len(value: i64) -> usize {
    let bytes = value.to_le_bytes();
    let mut len = bytes.len();
    while len > 0 && bytes[len - 1] == 0 {
        len -= 1;
    }
    len
}

// --- Tag model ---

/// One wire-format node: a header (field id, wire type, length) plus either
/// a scalar value or nested children.
///
/// The variant set is closed and maps one-to-one onto [`WireType`] codes.
/// Every variant carries a `field_id` (12 bits, 0-4095); the `Contract`
/// variant additionally carries a `contract_id` as out-of-band metadata —
/// the id is not one of the children and never participates in field-id
/// lookup.
///
/// Equality is derived structural equality: composite and contract tags
/// compare child count, per-child field id and value, in order; contract
/// tags also compare `contract_id`.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Bool { field_id: u16, value: bool },
    Short { field_id: u16, value: i16 },
    Int { field_id: u16, value: i32 },
    Long { field_id: u16, value: i64 },
    VarInt { field_id: u16, value: i64 },
    Double { field_id: u16, value: f64 },
    Decimal { field_id: u16, value: Decimal },
    String { field_id: u16, value: String },
    Binary { field_id: u16, value: Vec<u8> },
    Composite { field_id: u16, children: Vec<Tag> },
    Contract {
        field_id: u16,
        contract_id: u32,
        children: Vec<Tag>,
    },
}

impl Tag {
    pub fn bool(field_id: u16, value: bool) -> Tag {
        Tag::Bool { field_id, value }
    }

    pub fn short(field_id: u16, value: i16) -> Tag {
        Tag::Short { field_id, value }
    }

    pub fn int(field_id: u16, value: i32) -> Tag {
        Tag::Int { field_id, value }
    }

    pub fn long(field_id: u16, value: i64) -> Tag {
        Tag::Long { field_id, value }
    }

    pub fn var_int(field_id: u16, value: i64) -> Tag {
        Tag::VarInt { field_id, value }
    }

    pub fn double(field_id: u16, value: f64) -> Tag {
        Tag::Double { field_id, value }
    }

    pub fn decimal(field_id: u16, value: Decimal) -> Tag {
        Tag::Decimal { field_id, value }
    }

    pub fn string(field_id: u16, value: impl Into<String>) -> Tag {
        Tag::String {
            field_id,
            value: value.into(),
        }
    }

    pub fn binary(field_id: u16, value: Vec<u8>) -> Tag {
        Tag::Binary { field_id, value }
    }

    pub fn composite(field_id: u16, children: Vec<Tag>) -> Tag {
        Tag::Composite { field_id, children }
    }

    pub fn contract(field_id: u16, contract_id: u32, children: Vec<Tag>) -> Tag {
        Tag::Contract {
            field_id,
            contract_id,
            children,
        }
    }

    /// Serializes a contract into a standalone contract tag, stamped with
    /// the contract's id. The field id mirrors the low 12 bits of the id.
    pub fn from_contract(contract: &dyn Contract) -> Result<Tag> {
        let mut ctx = SaveContext::new();
        contract.save(&mut ctx)?;
        let id = contract.contract_id();
        Ok(Tag::contract((id & 0x0FFF) as u16, id, ctx.into_children()))
    }

    /// Tag factory: the empty, zero-valued variant for a decoded header,
    /// ready to receive value bytes through [`Tag::read_value`].
    pub fn empty(wire_type: WireType, field_id: u16) -> Tag {
        match wire_type {
            WireType::Composite => Tag::composite(field_id, Vec::new()),
            WireType::Contract => Tag::contract(field_id, 0, Vec::new()),
            WireType::Bool => Tag::bool(field_id, false),
            WireType::String => Tag::string(field_id, ""),
            WireType::Short => Tag::short(field_id, 0),
            WireType::Int => Tag::int(field_id, 0),
            WireType::Long => Tag::long(field_id, 0),
            WireType::VarInt => Tag::var_int(field_id, 0),
            WireType::Double => Tag::double(field_id, 0.0),
            WireType::Binary => Tag::binary(field_id, Vec::new()),
            WireType::Decimal => Tag::decimal(field_id, Decimal::ZERO),
        }
    }

    pub fn wire_type(&self) -> WireType {
        match self {
            Tag::Composite { .. } => WireType::Composite,
            Tag::Contract { .. } => WireType::Contract,
            Tag::Bool { .. } => WireType::Bool,
            Tag::String { .. } => WireType::String,
            Tag::Short { .. } => WireType::Short,
            Tag::Int { .. } => WireType::Int,
            Tag::Long { .. } => WireType::Long,
            Tag::VarInt { .. } => WireType::VarInt,
            Tag::Double { .. } => WireType::Double,
            Tag::Binary { .. } => WireType::Binary,
            Tag::Decimal { .. } => WireType::Decimal,
        }
    }

    pub fn field_id(&self) -> u16 {
        match self {
            Tag::Bool { field_id, .. }
            | Tag::Short { field_id, .. }
            | Tag::Int { field_id, .. }
            | Tag::Long { field_id, .. }
            | Tag::VarInt { field_id, .. }
            | Tag::Double { field_id, .. }
            | Tag::Decimal { field_id, .. }
            | Tag::String { field_id, .. }
            | Tag::Binary { field_id, .. }
            | Tag::Composite { field_id, .. }
            | Tag::Contract { field_id, .. } => *field_id,
        }
    }

    pub fn set_field_id(&mut self, new_id: u16) {
        match self {
            Tag::Bool { field_id, .. }
            | Tag::Short { field_id, .. }
            | Tag::Int { field_id, .. }
            | Tag::Long { field_id, .. }
            | Tag::VarInt { field_id, .. }
            | Tag::Double { field_id, .. }
            | Tag::Decimal { field_id, .. }
            | Tag::String { field_id, .. }
            | Tag::Binary { field_id, .. }
            | Tag::Composite { field_id, .. }
            | Tag::Contract { field_id, .. } => *field_id = new_id,
        }
    }

    /// Bytes this tag's value occupies on the wire, excluding the 6-byte
    /// header. Containers recurse: each child costs a header plus its own
    /// value; a contract tag additionally carries its 4-byte contract id.
    pub fn value_len(&self) -> usize {
        match self {
            Tag::Bool { .. } => 1,
            Tag::Short { .. } => 2,
            Tag::Int { .. } => 4,
            Tag::Long { .. } | Tag::Double { .. } => 8,
            Tag::Decimal { .. } => 16,
            Tag::VarInt { value, .. } => var_int_len(*value),
            Tag::String { value, .. } => value.len(),
            Tag::Binary { value, .. } => value.len(),
            Tag::Composite { children, .. } => children
                .iter()
                .map(|child| HEADER_LEN + child.value_len())
                .sum(),
            Tag::Contract { children, .. } => {
                4 + children
                    .iter()
                    .map(|child| HEADER_LEN + child.value_len())
                    .sum::<usize>()
            }
        }
    }

    /// Appends this tag's value bytes (no header) to the buffer. Children
    /// of container tags are emitted fully framed, each with its own header.
    pub fn encode_value(&self, writer: &mut BytesMut) {
        match self {
            Tag::Bool { value, .. } => writer.put_u8(*value as u8),
            Tag::Short { value, .. } => writer.put_i16_le(*value),
            Tag::Int { value, .. } => writer.put_i32_le(*value),
            Tag::Long { value, .. } => writer.put_i64_le(*value),
            Tag::VarInt { value, .. } => {
                writer.put_slice(&value.to_le_bytes()[..var_int_len(*value)])
            }
            Tag::Double { value, .. } => writer.put_u64_le(value.to_bits()),
            Tag::Decimal { value, .. } => put_decimal(writer, value),
            Tag::String { value, .. } => writer.put_slice(value.as_bytes()),
            Tag::Binary { value, .. } => writer.put_slice(value),
            Tag::Composite { children, .. } => {
                for child in children {
                    child.encode_frame(writer);
                }
            }
            Tag::Contract {
                contract_id,
                children,
                ..
            } => {
                writer.put_u32_le(*contract_id);
                for child in children {
                    child.encode_frame(writer);
                }
            }
        }
    }

    /// Appends the complete frame: packed header word, value length, value.
    pub fn encode_frame(&self, writer: &mut BytesMut) {
        writer.put_u16_le(pack(self.wire_type(), self.field_id()));
        writer.put_u32_le(self.value_len() as u32);
        self.encode_value(writer);
    }

    /// Fills an empty tag from `length` value bytes at the cursor.
    ///
    /// Scalar variants fail with [`WireError::LengthMismatch`] when the
    /// declared length disagrees with their fixed wire size; string and
    /// byte-array accept any length; var-int accepts 0-8 bytes. Container
    /// variants decode their children's embedded frames recursively.
    pub fn read_value(&mut self, buf: &mut &[u8], length: usize) -> Result<()> {
        let wire_type = self.wire_type();
        match self {
            Tag::Bool { value, .. } => {
                check_scalar_len(wire_type, length, 1)?;
                *value = take(buf, 1)?[0] != 0;
            }
            Tag::Short { value, .. } => {
                check_scalar_len(wire_type, length, 2)?;
                *value = get_i16_le(buf)?;
            }
            Tag::Int { value, .. } => {
                check_scalar_len(wire_type, length, 4)?;
                *value = get_i32_le(buf)?;
            }
            Tag::Long { value, .. } => {
                check_scalar_len(wire_type, length, 8)?;
                *value = get_i64_le(buf)?;
            }
            Tag::VarInt { value, .. } => {
                if length > 8 {
                    return Err(WireError::LengthMismatch {
                        wire_type,
                        declared: length,
                        expected: 8,
                    });
                }
                let raw = take(buf, length)?;
                let mut bytes = [0u8; 8];
                bytes[..length].copy_from_slice(raw);
                *value = i64::from_le_bytes(bytes);
            }
            Tag::Double { value, .. } => {
                check_scalar_len(wire_type, length, 8)?;
                *value = get_f64_le(buf)?;
            }
            Tag::Decimal { value, .. } => {
                check_scalar_len(wire_type, length, 16)?;
                *value = get_decimal(buf)?;
            }
            Tag::String { value, .. } => {
                let raw = take(buf, length)?;
                *value = std::str::from_utf8(raw)
                    .map_err(|e| WireError::Decode(format!("Invalid UTF-8 in string value: {}", e)))?
                    .to_owned();
            }
            Tag::Binary { value, .. } => {
                *value = take(buf, length)?.to_vec();
            }
            Tag::Composite { children, .. } => {
                let mut body = take(buf, length)?;
                while !body.is_empty() {
                    children.push(Tag::decode_frame(&mut body)?);
                }
            }
            Tag::Contract {
                contract_id,
                children,
                ..
            } => {
                let mut body = take(buf, length)?;
                *contract_id = get_u32_le(&mut body)?;
                while !body.is_empty() {
                    children.push(Tag::decode_frame(&mut body)?);
                }
            }
        }
        Ok(())
    }

    /// Decodes one complete frame (header plus value) from the cursor,
    /// recursing into container children.
    pub fn decode_frame(buf: &mut &[u8]) -> Result<Tag> {
        let (code, field_id) = unpack(get_u16_le(buf)?);
        let wire_type = WireType::from_code(code)?;
        let length = get_u32_le(buf)? as usize;
        if buf.len() < length {
            return Err(WireError::TruncatedStream {
                needed: length,
                got: buf.len(),
            });
        }
        let mut tag = Tag::empty(wire_type, field_id);
        tag.read_value(buf, length)?;
        Ok(tag)
    }

    // --- Typed accessors ---
    // Explicit in place of the source's implicit tag-to-value conversions.

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Tag::Bool { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_short(&self) -> Option<i16> {
        match self {
            Tag::Short { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Tag::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Tag::Long { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_var_int(&self) -> Option<i64> {
        match self {
            Tag::VarInt { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Tag::Double { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Tag::Decimal { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Tag::Binary { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Children of a composite or contract tag.
    pub fn children(&self) -> Option<&[Tag]> {
        match self {
            Tag::Composite { children, .. } | Tag::Contract { children, .. } => Some(children),
            _ => None,
        }
    }

    /// The out-of-band contract id of a contract tag.
    pub fn contract_id(&self) -> Option<u32> {
        match self {
            Tag::Contract { contract_id, .. } => Some(*contract_id),
            _ => None,
        }
    }
}

fn check_scalar_len(wire_type: WireType, declared: usize, expected: usize) -> Result<()> {
    if declared != expected {
        return Err(WireError::LengthMismatch {
            wire_type,
            declared,
            expected,
        });
    }
    Ok(())
}

// --- Save context ---

/// Collects a contract's fields into an ordered child list during `save`.
///
/// Nesting uses an explicit call stack: [`SaveContext::save_contract`]
/// recurses into a fresh context and appends the finished contract tag to
/// this one, so arbitrarily deep trees build up through ordinary returns
/// with no shared mutable state.
#[derive(Debug, Default)]
pub struct SaveContext {
    children: Vec<Tag>,
}

impl SaveContext {
    pub fn new() -> Self {
        SaveContext::default()
    }

    /// Overwrites the tag's field id and appends it to the child list.
    pub fn save_tag(&mut self, field_id: u16, mut tag: Tag) {
        tag.set_field_id(field_id);
        self.children.push(tag);
    }

    pub fn save_bool(&mut self, field_id: u16, value: bool) {
        self.children.push(Tag::bool(field_id, value));
    }

    pub fn save_short(&mut self, field_id: u16, value: i16) {
        self.children.push(Tag::short(field_id, value));
    }

    pub fn save_int(&mut self, field_id: u16, value: i32) {
        self.children.push(Tag::int(field_id, value));
    }

    pub fn save_long(&mut self, field_id: u16, value: i64) {
        self.children.push(Tag::long(field_id, value));
    }

    pub fn save_var_int(&mut self, field_id: u16, value: i64) {
        self.children.push(Tag::var_int(field_id, value));
    }

    pub fn save_double(&mut self, field_id: u16, value: f64) {
        self.children.push(Tag::double(field_id, value));
    }

    pub fn save_decimal(&mut self, field_id: u16, value: Decimal) {
        self.children.push(Tag::decimal(field_id, value));
    }

    pub fn save_string(&mut self, field_id: u16, value: impl Into<String>) {
        self.children.push(Tag::string(field_id, value));
    }

    pub fn save_bytes(&mut self, field_id: u16, value: Vec<u8>) {
        self.children.push(Tag::binary(field_id, value));
    }

    /// Recursively saves a nested contract under `field_id`.
    ///
    /// The nested contract serializes into a fresh context; the completed
    /// contract tag, stamped with the contract's own id, is then appended
    /// to this context's child list.
    pub fn save_contract(&mut self, field_id: u16, contract: &dyn Contract) -> Result<()> {
        let mut nested = SaveContext::new();
        contract.save(&mut nested)?;
        self.children.push(Tag::contract(
            field_id,
            contract.contract_id(),
            nested.into_children(),
        ));
        Ok(())
    }

    pub fn into_children(self) -> Vec<Tag> {
        self.children
    }
}

// --- Parse context ---

/// Read-side view over a decoded contract tag's children.
///
/// Field lookup is a linear scan for the first child with a matching field
/// id; occurrence order on the wire is preserved but not significant for
/// lookup.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    children: &'a [Tag],
}

impl<'a> ParseContext<'a> {
    pub fn new(children: &'a [Tag]) -> Self {
        ParseContext { children }
    }

    pub fn has_field(&self, field_id: u16) -> bool {
        self.try_tag(field_id).is_some()
    }

    /// First child whose field id matches, if any.
    pub fn try_tag(&self, field_id: u16) -> Option<&'a Tag> {
        self.children.iter().find(|tag| tag.field_id() == field_id)
    }

    /// First child whose field id matches.
    ///
    /// # Errors
    /// [`WireError::FieldNotFound`] when no child carries the field id.
    pub fn tag(&self, field_id: u16) -> Result<&'a Tag> {
        self.try_tag(field_id)
            .ok_or(WireError::FieldNotFound(field_id))
    }

    fn typed<T>(
        &self,
        field_id: u16,
        expected: WireType,
        access: impl Fn(&Tag) -> Option<T>,
    ) -> Result<T> {
        let tag = self.tag(field_id)?;
        access(tag).ok_or(WireError::WireTypeMismatch {
            field_id,
            expected,
            found: tag.wire_type(),
        })
    }

    pub fn bool(&self, field_id: u16) -> Result<bool> {
        self.typed(field_id, WireType::Bool, Tag::as_bool)
    }

    pub fn short(&self, field_id: u16) -> Result<i16> {
        self.typed(field_id, WireType::Short, Tag::as_short)
    }

    pub fn int(&self, field_id: u16) -> Result<i32> {
        self.typed(field_id, WireType::Int, Tag::as_int)
    }

    pub fn long(&self, field_id: u16) -> Result<i64> {
        self.typed(field_id, WireType::Long, Tag::as_long)
    }

    pub fn var_int(&self, field_id: u16) -> Result<i64> {
        self.typed(field_id, WireType::VarInt, Tag::as_var_int)
    }

    pub fn double(&self, field_id: u16) -> Result<f64> {
        self.typed(field_id, WireType::Double, Tag::as_double)
    }

    pub fn decimal(&self, field_id: u16) -> Result<Decimal> {
        self.typed(field_id, WireType::Decimal, Tag::as_decimal)
    }

    pub fn string(&self, field_id: u16) -> Result<String> {
        self.typed(field_id, WireType::String, |tag| {
            tag.as_str().map(str::to_owned)
        })
    }

    pub fn bytes(&self, field_id: u16) -> Result<Vec<u8>> {
        self.typed(field_id, WireType::Binary, |tag| {
            tag.as_bytes().map(<[u8]>::to_vec)
        })
    }

    pub fn try_bool(&self, field_id: u16) -> Option<bool> {
        self.try_tag(field_id)?.as_bool()
    }

    pub fn try_short(&self, field_id: u16) -> Option<i16> {
        self.try_tag(field_id)?.as_short()
    }

    pub fn try_int(&self, field_id: u16) -> Option<i32> {
        self.try_tag(field_id)?.as_int()
    }

    pub fn try_long(&self, field_id: u16) -> Option<i64> {
        self.try_tag(field_id)?.as_long()
    }

    pub fn try_var_int(&self, field_id: u16) -> Option<i64> {
        self.try_tag(field_id)?.as_var_int()
    }

    pub fn try_double(&self, field_id: u16) -> Option<f64> {
        self.try_tag(field_id)?.as_double()
    }

    pub fn try_decimal(&self, field_id: u16) -> Option<Decimal> {
        self.try_tag(field_id)?.as_decimal()
    }

    pub fn try_string(&self, field_id: u16) -> Option<String> {
        self.try_tag(field_id)?.as_str().map(str::to_owned)
    }

    pub fn try_bytes(&self, field_id: u16) -> Option<Vec<u8>> {
        self.try_tag(field_id)?.as_bytes().map(<[u8]>::to_vec)
    }

    /// Parses the nested contract at `field_id` into a concrete `T`.
    ///
    /// # Errors
    /// [`WireError::ContractTypeMismatch`] (carrying both ids) when the
    /// child's contract id differs from `T`'s; `T` is only constructed
    /// after the id check passes.
    pub fn contract<T: Contract + Default>(&self, field_id: u16) -> Result<T> {
        let tag = self.tag(field_id)?;
        match tag {
            Tag::Contract {
                contract_id,
                children,
                ..
            } => {
                let expected = contract_id_of::<T>();
                if *contract_id != expected {
                    return Err(WireError::ContractTypeMismatch {
                        expected,
                        found: *contract_id,
                    });
                }
                let mut value = T::default();
                value.parse(&ParseContext::new(children))?;
                Ok(value)
            }
            other => Err(WireError::WireTypeMismatch {
                field_id,
                expected: WireType::Contract,
                found: other.wire_type(),
            }),
        }
    }

    pub fn try_contract<T: Contract + Default>(&self, field_id: u16) -> Option<T> {
        self.contract(field_id).ok()
    }

    /// Untyped form of [`ParseContext::contract`]: always wraps the located
    /// contract child's raw data, deferring resolution to the caller.
    pub fn unresolved(&self, field_id: u16) -> Result<UnresolvedContract> {
        let tag = self.tag(field_id)?;
        match tag {
            Tag::Contract {
                contract_id,
                children,
                ..
            } => Ok(UnresolvedContract::new(*contract_id, children.clone())),
            other => Err(WireError::WireTypeMismatch {
                field_id,
                expected: WireType::Contract,
                found: other.wire_type(),
            }),
        }
    }

    pub fn try_unresolved(&self, field_id: u16) -> Option<UnresolvedContract> {
        self.unresolved(field_id).ok()
    }
}

// --- Contract registry ---

type ContractFactory = fn() -> Box<dyn Contract>;

#[derive(Debug, Clone)]
struct RegistryEntry {
    factory: ContractFactory,
    type_id: TypeId,
    type_name: &'static str,
}

/// Maps contract ids to concrete-type factories so a reader can auto-resolve
/// known contracts during decode.
///
/// Append-only for its lifetime; there is no unregister operation. Clone a
/// populated registry to share the same bindings across readers.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    entries: HashMap<u32, RegistryEntry>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        ContractRegistry::default()
    }

    /// Binds `T`'s contract id to a factory for `T`.
    ///
    /// Re-registering the identical type is a silent no-op.
    ///
    /// # Errors
    /// [`WireError::DuplicateContractId`] naming both types and the id when
    /// the id is already bound to a different type; the original binding is
    /// left intact.
    pub fn register<T: Contract + Default + 'static>(&mut self) -> Result<()> {
        let id = contract_id_of::<T>();
        match self.entries.get(&id) {
            Some(entry) if entry.type_id == TypeId::of::<T>() => Ok(()),
            Some(entry) => Err(WireError::DuplicateContractId {
                id,
                existing: entry.type_name,
                incoming: type_name::<T>(),
            }),
            None => {
                let factory: ContractFactory = || Box::new(T::default());
                self.entries.insert(
                    id,
                    RegistryEntry {
                        factory,
                        type_id: TypeId::of::<T>(),
                        type_name: type_name::<T>(),
                    },
                );
                Ok(())
            }
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// A fresh default instance of the type bound to `id`, if any.
    pub fn try_get(&self, id: u32) -> Option<Box<dyn Contract>> {
        self.entries.get(&id).map(|entry| (entry.factory)())
    }

    /// Like [`ContractRegistry::try_get`] but failing with
    /// [`WireError::NotFound`] for an unbound id.
    pub fn get(&self, id: u32) -> Result<Box<dyn Contract>> {
        self.try_get(id).ok_or(WireError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// --- Unresolved contract ---

/// A contract read from the stream whose id had no registry match.
///
/// Retains the raw tag tree and the discovered contract id. `save` re-emits
/// the stored children verbatim, so an unresolved contract relays through a
/// writer losslessly. Resolution borrows the stored data and never consumes
/// it, so the same instance may be tried against any number of candidate
/// types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnresolvedContract {
    contract_id: u32,
    children: Vec<Tag>,
}

impl UnresolvedContract {
    pub fn new(contract_id: u32, children: Vec<Tag>) -> Self {
        UnresolvedContract {
            contract_id,
            children,
        }
    }

    /// The raw child tags exactly as they arrived.
    pub fn children(&self) -> &[Tag] {
        &self.children
    }

    /// Reinterprets the stored raw data as a concrete `T`.
    ///
    /// # Errors
    /// [`WireError::UnresolvedMismatch`] when `T`'s id differs from the
    /// stored one.
    pub fn resolve<T: Contract + Default>(&self) -> Result<T> {
        let expected = contract_id_of::<T>();
        if expected != self.contract_id {
            return Err(WireError::UnresolvedMismatch {
                expected,
                found: self.contract_id,
            });
        }
        let mut value = T::default();
        value.parse(&ParseContext::new(&self.children))?;
        Ok(value)
    }

    /// Non-failing form of [`UnresolvedContract::resolve`].
    pub fn try_resolve<T: Contract + Default>(&self) -> Option<T> {
        self.resolve().ok()
    }
}

impl Contract for UnresolvedContract {
    fn contract_id(&self) -> u32 {
        self.contract_id
    }

    // Already holds its raw data; nothing to do.
    fn parse(&mut self, _ctx: &ParseContext<'_>) -> Result<()> {
        Ok(())
    }

    fn save(&self, ctx: &mut SaveContext) -> Result<()> {
        for child in &self.children {
            ctx.save_tag(child.field_id(), child.clone());
        }
        Ok(())
    }
}
