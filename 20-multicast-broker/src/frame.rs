use std::io;

use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, FramedRead, FramedWrite, LengthDelimitedCodec};

/// Largest payload a single frame can carry (two-byte length prefix).
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Big-endian `u16` length followed by UTF-8 bytes. Every connection in the
/// system (requests, replies and deliveries) uses this framing.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(2)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub fn framed<T>(io: T) -> Framed<T, LengthDelimitedCodec>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(io, codec())
}

pub fn frame_reader<R: AsyncRead>(reader: R) -> FramedRead<R, LengthDelimitedCodec> {
    FramedRead::new(reader, codec())
}

pub fn frame_writer<W: AsyncWrite>(writer: W) -> FramedWrite<W, LengthDelimitedCodec> {
    FramedWrite::new(writer, codec())
}

/// Reads the next frame as a string. `Ok(None)` means the peer closed the
/// stream on a frame boundary.
pub async fn read_frame<S>(frames: &mut S) -> io::Result<Option<String>>
where
    S: Stream<Item = io::Result<BytesMut>> + Unpin,
{
    match frames.next().await {
        Some(Ok(bytes)) => String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
        Some(Err(err)) => Err(err),
        None => Ok(None),
    }
}

/// Writes one frame and flushes it.
pub async fn write_frame<S>(frames: &mut S, text: &str) -> io::Result<()>
where
    S: Sink<Bytes, Error = io::Error> + Unpin,
{
    frames.send(Bytes::copy_from_slice(text.as_bytes())).await
}
