//! Type-length-value framing over an async byte stream.
//!
//! All integers are big-endian. Frame payloads are capped at
//! [`MAX_MESSAGE_SIZE`]; longer frames are rejected before the payload is
//! read.

use snafu::{ensure, ResultExt, Snafu};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How large a frame payload can be before it is rejected.
pub const MAX_MESSAGE_SIZE: u64 = 1024 * 1024 * 1024; // 1GB

/// Errors reading or writing TLV frames.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The message type byte could not be read.
    #[snafu(display("unable to read frame type: {source}"))]
    ReadType { source: std::io::Error },

    /// The payload length could not be read.
    #[snafu(display("unable to read frame length: {source}"))]
    ReadLength { source: std::io::Error },

    /// The peer advertised a payload larger than [`MAX_MESSAGE_SIZE`].
    #[snafu(display("frame of {n_bytes} bytes exceeds maximum of {max} bytes"))]
    FrameTooLarge { n_bytes: u64, max: u64 },

    /// The payload could not be read in full.
    #[snafu(display("unable to read frame payload: {source}"))]
    ReadPayload { source: std::io::Error },

    /// The frame could not be written.
    #[snafu(display("unable to write frame: {source}"))]
    WriteFrame { source: std::io::Error },

    /// The payload was not a valid message of the expected type.
    #[snafu(display("unable to decode frame payload: {source}"))]
    DecodePayload { source: prost::DecodeError },
}

impl Error {
    /// True when the peer closed the connection cleanly before a frame began.
    pub fn is_eof(&self) -> bool {
        matches!(
            self,
            Self::ReadType { source } if source.kind() == std::io::ErrorKind::UnexpectedEof
        )
    }
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Read the one-byte message type of the next frame.
pub async fn read_type<R>(r: &mut R) -> Result<u8>
where
    R: AsyncRead + Unpin,
{
    r.read_u8().await.context(ReadTypeSnafu)
}

/// Read a length-prefixed payload, rejecting lengths above
/// [`MAX_MESSAGE_SIZE`].
pub async fn read_lv<R>(r: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let n_bytes = r.read_u64().await.context(ReadLengthSnafu)?;
    ensure!(
        n_bytes <= MAX_MESSAGE_SIZE,
        FrameTooLargeSnafu {
            n_bytes,
            max: MAX_MESSAGE_SIZE
        }
    );

    let mut buf = vec![0; n_bytes as usize];
    r.read_exact(&mut buf).await.context(ReadPayloadSnafu)?;
    Ok(buf)
}

/// Write one complete frame.
///
/// The frame is assembled up front and handed to the stream in a single
/// write, so concurrent writers on the same stream cannot interleave partial
/// frames.
pub async fn write_tlv<W>(w: &mut W, typ: u8, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    ensure!(
        payload.len() as u64 <= MAX_MESSAGE_SIZE,
        FrameTooLargeSnafu {
            n_bytes: payload.len() as u64,
            max: MAX_MESSAGE_SIZE
        }
    );

    let mut frame = Vec::with_capacity(1 + 8 + payload.len());
    frame.push(typ);
    frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    frame.extend_from_slice(payload);

    w.write_all(&frame).await.context(WriteFrameSnafu)?;
    w.flush().await.context(WriteFrameSnafu)
}

/// Marshal `msg` and write it as one frame of type `typ`.
pub async fn encode_tlv<W, M>(w: &mut W, typ: u8, msg: &M) -> Result<()>
where
    W: AsyncWrite + Unpin,
    M: prost::Message,
{
    write_tlv(w, typ, &msg.encode_to_vec()).await
}

/// Read a length-prefixed payload and unmarshal it as a message of type `M`.
pub async fn decode_lv<R, M>(r: &mut R) -> Result<M>
where
    R: AsyncRead + Unpin,
    M: prost::Message + Default,
{
    let buf = read_lv(r).await?;
    M::decode(buf.as_slice()).context(DecodePayloadSnafu)
}
