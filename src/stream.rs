use crate::core::{unpack, ParseContext, Tag, UnresolvedContract, WireType, HEADER_LEN};
use crate::{contract_id_of, Contract, ContractRegistry, Result, WireError};
use bytes::BytesMut;
use std::io::{ErrorKind, Read, Write};

/// Default scratch-buffer size for readers and writers, in bytes.
pub const DEFAULT_BUFFER_LEN: usize = 1024;

/// Reads from the stream until the slice is full or the stream reports end
/// of data, returning how many bytes actually arrived.
fn read_full<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Serializes tag trees and contracts onto a byte stream.
///
/// The writer materializes each frame completely into its scratch buffer
/// before issuing a single write to the stream, so a frame is never split
/// across partial writes at this layer. The scratch buffer grows on demand
/// and never shrinks.
///
/// A writer is bound to exactly one stream for its operating lifetime via
/// [`TagWriter::connect`]; the stream is handed back (never closed) by
/// [`TagWriter::disconnect`].
#[derive(Debug)]
pub struct TagWriter<W> {
    stream: Option<W>,
    buf: BytesMut,
}

impl<W: Write> TagWriter<W> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_LEN)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        TagWriter {
            stream: None,
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Binds the writer to a stream.
    ///
    /// # Errors
    /// [`WireError::AlreadyConnected`] when a stream is already bound.
    pub fn connect(&mut self, stream: W) -> Result<()> {
        if self.stream.is_some() {
            return Err(WireError::AlreadyConnected);
        }
        self.stream = Some(stream);
        Ok(())
    }

    /// Unbinds and returns the stream; the writer never closes it.
    ///
    /// # Errors
    /// [`WireError::NotConnected`] when no stream is bound.
    pub fn disconnect(&mut self) -> Result<W> {
        self.stream.take().ok_or(WireError::NotConnected)
    }

    /// Flattens the tag tree into one contiguous byte run and writes it.
    pub fn write_tag(&mut self, tag: &Tag) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(WireError::NotConnected)?;
        self.buf.clear();
        self.buf.reserve(HEADER_LEN + tag.value_len());
        tag.encode_frame(&mut self.buf);
        stream.write_all(&self.buf)?;
        Ok(())
    }

    /// Wraps the contract in a top-level contract tag stamped with its id
    /// and writes the frame.
    pub fn write_contract(&mut self, contract: &dyn Contract) -> Result<()> {
        let tag = Tag::from_contract(contract)?;
        self.write_tag(&tag)
    }
}

impl<W: Write> Default for TagWriter<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reassembles tag trees and contracts from a byte stream.
///
/// Each read pulls exactly one frame: 6 header bytes, then as many value
/// bytes as the header declares, reassembled across fragmented reads. A
/// clean end of stream at a frame boundary is `Ok(None)`; any shortfall
/// mid-frame is [`WireError::TruncatedStream`].
///
/// The reader owns a [`ContractRegistry`] used by
/// [`TagReader::read_contract`] to resolve contract ids to concrete types;
/// ids with no binding come back as [`UnresolvedContract`]s.
#[derive(Debug)]
pub struct TagReader<R> {
    stream: Option<R>,
    buf: BytesMut,
    registry: ContractRegistry,
}

impl<R: Read> TagReader<R> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_LEN)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_registry_and_capacity(ContractRegistry::new(), capacity)
    }

    /// A reader sharing an existing registry's bindings.
    pub fn with_registry(registry: ContractRegistry) -> Self {
        Self::with_registry_and_capacity(registry, DEFAULT_BUFFER_LEN)
    }

    pub fn with_registry_and_capacity(registry: ContractRegistry, capacity: usize) -> Self {
        TagReader {
            stream: None,
            buf: BytesMut::with_capacity(capacity),
            registry,
        }
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ContractRegistry {
        &mut self.registry
    }

    /// Registers `T` in this reader's registry.
    pub fn register_contract<T: Contract + Default + 'static>(&mut self) -> Result<()> {
        self.registry.register::<T>()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Binds the reader to a stream.
    ///
    /// # Errors
    /// [`WireError::AlreadyConnected`] when a stream is already bound.
    pub fn connect(&mut self, stream: R) -> Result<()> {
        if self.stream.is_some() {
            return Err(WireError::AlreadyConnected);
        }
        self.stream = Some(stream);
        Ok(())
    }

    /// Unbinds and returns the stream; the reader never closes it.
    ///
    /// # Errors
    /// [`WireError::NotConnected`] when no stream is bound.
    pub fn disconnect(&mut self) -> Result<R> {
        self.stream.take().ok_or(WireError::NotConnected)
    }

    /// Reads the next complete tag from the stream.
    ///
    /// Returns `Ok(None)` when the stream yields zero bytes exactly at a
    /// frame boundary. A partial header, or fewer value bytes than the
    /// header declares, is [`WireError::TruncatedStream`].
    pub fn read_tag(&mut self) -> Result<Option<Tag>> {
        let stream = self.stream.as_mut().ok_or(WireError::NotConnected)?;
        let mut header = [0u8; HEADER_LEN];
        let got = read_full(stream, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(WireError::TruncatedStream {
                needed: HEADER_LEN,
                got,
            });
        }
        let (code, field_id) = unpack(u16::from_le_bytes([header[0], header[1]]));
        let wire_type = WireType::from_code(code)?;
        let length =
            u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;
        if self.buf.len() < length {
            self.buf.resize(length, 0);
        }
        let got = read_full(stream, &mut self.buf[..length])?;
        if got < length {
            return Err(WireError::TruncatedStream {
                needed: length,
                got,
            });
        }
        let mut value: &[u8] = &self.buf[..length];
        let mut tag = Tag::empty(wire_type, field_id);
        tag.read_value(&mut value, length)?;
        Ok(Some(tag))
    }

    /// Reads the next contract, resolving its type through the registry.
    ///
    /// A registered id yields a parsed instance of the bound concrete type;
    /// an unregistered id yields an [`UnresolvedContract`] wrapping the raw
    /// tag data for later resolution.
    pub fn read_contract(&mut self) -> Result<Option<Box<dyn Contract>>> {
        let tag = match self.read_tag()? {
            Some(tag) => tag,
            None => return Ok(None),
        };
        let (contract_id, children) = match tag {
            Tag::Contract {
                contract_id,
                children,
                ..
            } => (contract_id, children),
            other => {
                return Err(WireError::WireTypeMismatch {
                    field_id: other.field_id(),
                    expected: WireType::Contract,
                    found: other.wire_type(),
                })
            }
        };
        match self.registry.try_get(contract_id) {
            Some(mut contract) => {
                contract.parse(&ParseContext::new(&children))?;
                Ok(Some(contract))
            }
            None => Ok(Some(Box::new(UnresolvedContract::new(
                contract_id,
                children,
            )))),
        }
    }

    /// Reads the next contract, requiring it to be exactly a `T`.
    ///
    /// # Errors
    /// [`WireError::ContractTypeMismatch`] (carrying both ids) when the
    /// stream's contract id differs from `T`'s; `T` is only constructed
    /// after the check, so a mismatch never partially populates one.
    pub fn read_contract_as<T: Contract + Default>(&mut self) -> Result<Option<T>> {
        let tag = match self.read_tag()? {
            Some(tag) => tag,
            None => return Ok(None),
        };
        match tag {
            Tag::Contract {
                contract_id,
                children,
                ..
            } => {
                let expected = contract_id_of::<T>();
                if contract_id != expected {
                    return Err(WireError::ContractTypeMismatch {
                        expected,
                        found: contract_id,
                    });
                }
                let mut value = T::default();
                value.parse(&ParseContext::new(&children))?;
                Ok(Some(value))
            }
            other => Err(WireError::WireTypeMismatch {
                field_id: other.field_id(),
                expected: WireType::Contract,
                found: other.wire_type(),
            }),
        }
    }
}

impl<R: Read> Default for TagReader<R> {
    fn default() -> Self {
        Self::new()
    }
}
