//! Compression pipeline for object output streams.
//!
//! The codec is chosen once per stream from [`CompressionKind`] and resolved
//! into a boxed [`CompressedWrite`]; records are encoded straight into it.

use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::io::{self, Write};
use std::str::FromStr;

use crate::error::{ConfigError, StreamError, StreamIoSnafu, UnsupportedCompressionSnafu};
use crate::storage::{ObjectOutputStream, SharedBuffer};

/// Codec applied to bytes before they leave the process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    None,
    Gzip,
    Snappy,
    Zstd,
}

impl CompressionKind {
    /// Suffix appended to object keys written with this codec.
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionKind::None => "",
            CompressionKind::Gzip => ".gz",
            CompressionKind::Snappy => ".snappy",
            CompressionKind::Zstd => ".zst",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
            CompressionKind::Snappy => "snappy",
            CompressionKind::Zstd => "zstd",
        }
    }
}

impl FromStr for CompressionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionKind::None),
            "gzip" => Ok(CompressionKind::Gzip),
            "snappy" => Ok(CompressionKind::Snappy),
            "zstd" => Ok(CompressionKind::Zstd),
            _ => UnsupportedCompressionSnafu { value: s }.fail(),
        }
    }
}

/// A codec writer that can emit its trailing frames on demand.
pub trait CompressedWrite: Write + Send {
    /// Flush remaining codec state and trailers into the underlying sink.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// Pass-through writer for uncompressed output.
struct Plain<W>(W);

impl<W: Write> Write for Plain<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> CompressedWrite for Plain<W> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> CompressedWrite for GzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        GzEncoder::finish(*self).map(|_| ())
    }
}

impl<W: Write + Send> CompressedWrite for zstd::stream::write::Encoder<'static, W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        zstd::stream::write::Encoder::finish(*self).map(|_| ())
    }
}

impl<W: Write + Send> CompressedWrite for snap::write::FrameEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.into_inner()
            .map(|_| ())
            .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))
    }
}

/// Wrap `sink` with the codec for `kind`.
///
/// Fails before any byte is written if the codec cannot be constructed.
pub fn codec_for<W: Write + Send + 'static>(
    sink: W,
    kind: CompressionKind,
) -> io::Result<Box<dyn CompressedWrite>> {
    let codec: Box<dyn CompressedWrite> = match kind {
        CompressionKind::None => Box::new(Plain(sink)),
        CompressionKind::Gzip => Box::new(GzEncoder::new(sink, flate2::Compression::default())),
        CompressionKind::Snappy => Box::new(snap::write::FrameEncoder::new(sink)),
        CompressionKind::Zstd => Box::new(zstd::stream::write::Encoder::new(
            sink,
            zstd::DEFAULT_COMPRESSION_LEVEL,
        )?),
    };
    Ok(codec)
}

/// An object output stream decorated with a codec.
///
/// Bytes written through [`Write`] are encoded into the stream's buffer;
/// [`flush`](CompressedStream::flush) and [`close`](CompressedStream::close)
/// move them to the store.
pub struct CompressedStream {
    encoder: Option<Box<dyn CompressedWrite>>,
    output: ObjectOutputStream,
    kind: CompressionKind,
}

/// Build a compressed stream over `output`.
pub fn wrap(
    output: ObjectOutputStream,
    kind: CompressionKind,
) -> Result<CompressedStream, StreamError> {
    let sink: SharedBuffer = output.sink();
    let encoder = codec_for(sink, kind).context(StreamIoSnafu)?;
    Ok(CompressedStream {
        encoder: Some(encoder),
        output,
        kind,
    })
}

impl CompressedStream {
    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    /// Key of the object this stream writes.
    pub fn key(&self) -> &str {
        self.output.key()
    }

    /// Encoded bytes produced so far, uploaded or not.
    pub fn bytes_written(&self) -> u64 {
        self.output.bytes_written()
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_closed()
    }

    /// Whether the upload was abandoned without committing.
    pub fn is_aborted(&self) -> bool {
        self.output.is_aborted()
    }

    /// Push encoded bytes toward the store, uploading every full part.
    ///
    /// Codec state is not forced out here; it is emitted on close.
    pub async fn flush(&mut self) -> Result<(), StreamError> {
        self.output.flush().await
    }

    /// Finish the codec and commit the object. A second call is a no-op.
    ///
    /// If the codec cannot be finished its state is gone, so the upload is
    /// aborted rather than committed truncated.
    pub async fn close(&mut self) -> Result<(), StreamError> {
        if let Some(encoder) = self.encoder.take()
            && let Err(source) = encoder.finish()
        {
            let error = StreamError::StreamIo { source };
            return Err(self.output.abort_with(error).await);
        }
        self.output.close().await
    }

    /// Drop codec state and abandon any in-progress upload.
    pub async fn abort(&mut self) -> Result<(), StreamError> {
        self.encoder = None;
        self.output.abort().await
    }
}

impl Write for CompressedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("stream for {} is closed", self.output.key()),
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for CompressedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedStream")
            .field("key", &self.output.key())
            .field("kind", &self.kind)
            .field("open", &self.encoder.is_some())
            .finish()
    }
}
