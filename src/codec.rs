//! Envelope codec
//!
//! One canonical wire encoding: each record is a 4-byte big-endian
//! length prefix followed by that many bytes of JSON. Every protocol
//! exchange is two records, a `Metadata` record naming the event tag
//! and then the tag's payload record.
//!
//! The payload record is always consumed, even for an unknown tag, so
//! the stream stays aligned and the session can answer with a protocol
//! error and keep reading.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;
use crate::message::Metadata;

/// Upper bound on a single record's length prefix
pub const MAX_RECORD_LEN: usize = 64 * 1024;

/// A typed event that travels as a tag-plus-payload exchange
pub trait WireEvent: Sized {
    /// The metadata tag announcing this event
    fn tag(&self) -> &'static str;

    /// Serialize the payload record
    fn encode_payload(&self) -> Result<Vec<u8>, serde_json::Error>;

    /// Decode a payload record for the given tag
    ///
    /// Returns `CodecError::UnknownTag` for tags outside the variant set.
    fn decode_payload(tag: &str, payload: &[u8]) -> Result<Self, CodecError>;
}

/// Read one length-prefixed record
///
/// End of stream at the length prefix is reported as `CodecError::Eof`;
/// truncation inside the record body is an IO error.
async fn read_record<R>(reader: &mut R) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(CodecError::Eof),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Err(CodecError::RecordTooLarge { len });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one length-prefixed record
async fn write_record<W>(writer: &mut W, bytes: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    if bytes.len() > MAX_RECORD_LEN {
        return Err(CodecError::RecordTooLarge { len: bytes.len() });
    }

    let len = bytes.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

/// Read the next event: a metadata record, then its payload record
///
/// `CodecError::Eof` means the peer closed cleanly before the metadata
/// record. A stream that ends between metadata and payload is reported
/// as `CodecError::Truncated`. An unrecognized tag still consumes the
/// payload record before returning `CodecError::UnknownTag`.
pub async fn read_event<E, R>(reader: &mut R) -> Result<E, CodecError>
where
    E: WireEvent,
    R: AsyncRead + Unpin,
{
    let meta_bytes = read_record(reader).await?;
    let metadata: Metadata = serde_json::from_slice(&meta_bytes)?;

    let payload = match read_record(reader).await {
        Ok(payload) => payload,
        Err(CodecError::Eof) => return Err(CodecError::Truncated),
        Err(e) => return Err(e),
    };

    E::decode_payload(&metadata.event_type, &payload)
}

/// Write one event as a metadata record followed by its payload record
pub async fn write_event<E, W>(writer: &mut W, event: &E) -> Result<(), CodecError>
where
    E: WireEvent,
    W: AsyncWrite + Unpin,
{
    let meta_bytes = serde_json::to_vec(&Metadata {
        event_type: event.tag().to_string(),
    })?;
    let payload = event.encode_payload()?;

    write_record(writer, &meta_bytes).await?;
    write_record(writer, &payload).await?;
    writer.flush().await?;
    Ok(())
}
