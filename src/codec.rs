//! Record frame codec
//!
//! Every record entry on disk is one self-describing frame:
//!
//! ```text
//! +-----------+----------------+---------------------------+
//! | codec: u8 | length: u32 LE | body: JSON Payload        |
//! +-----------+----------------+---------------------------+
//! ```
//!
//! The body is optionally LZ4 or ZSTD compressed (the `compression`
//! feature). Frames are decoded one at a time by [`FrameReader`], so a log
//! never has to be read into memory as a whole.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::payload::Payload;
use crate::{Error, Result};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 5;

/// Compression applied to frame bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// No compression (default)
    #[default]
    Plain,
    /// LZ4 - Fast compression, good for real-time
    Lz4,
    /// ZSTD - Better ratio, slower
    Zstd,
}

impl Codec {
    /// Get codec name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Whether this build can write frames with this codec.
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        matches!(self, Self::Plain) || cfg!(feature = "compression")
    }

    /// Fail early when this build cannot write frames with this codec.
    ///
    /// # Errors
    /// Returns [`Error::Serialization`] for LZ4/ZSTD without the
    /// `compression` feature.
    pub fn ensure_supported(&self) -> Result<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(unsupported(*self))
        }
    }

    const fn tag(self) -> u8 {
        match self {
            Self::Plain => 0,
            Self::Lz4 => 1,
            Self::Zstd => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::Zstd),
            other => Err(Error::Serialization(format!("unknown frame codec {other}"))),
        }
    }

    /// Compress data using this codec
    ///
    /// # Errors
    /// Returns error if compression fails or the crate was built without the
    /// `compression` feature
    pub fn compress(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Self::Plain => Ok(data),
            #[cfg(feature = "compression")]
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(&data)),
            #[cfg(feature = "compression")]
            Self::Zstd => zstd::encode_all(data.as_slice(), 3)
                .map_err(|e| Error::Serialization(format!("ZSTD compression failed: {e}"))),
            #[cfg(not(feature = "compression"))]
            other => Err(unsupported(*other)),
        }
    }

    /// Decompress data using this codec
    ///
    /// # Errors
    /// Returns error if decompression fails (e.g., corrupted data)
    pub fn decompress(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Self::Plain => Ok(data),
            #[cfg(feature = "compression")]
            Self::Lz4 => lz4_flex::decompress_size_prepended(&data)
                .map_err(|e| Error::Serialization(format!("LZ4 decompression failed: {e}"))),
            #[cfg(feature = "compression")]
            Self::Zstd => zstd::decode_all(data.as_slice())
                .map_err(|e| Error::Serialization(format!("ZSTD decompression failed: {e}"))),
            #[cfg(not(feature = "compression"))]
            other => Err(unsupported(*other)),
        }
    }
}

fn unsupported(codec: Codec) -> Error {
    Error::Serialization(format!(
        "{} frames require the `compression` feature",
        codec.as_str()
    ))
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "none" => Ok(Self::Plain),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::Serialization(format!(
                "unknown codec {other:?}, expected plain, lz4 or zstd"
            ))),
        }
    }
}

/// Encode a payload into a complete frame.
///
/// # Errors
/// Returns [`Error::Serialization`] if the payload is not encodable or the
/// body exceeds `u32::MAX` bytes.
pub fn encode_frame(payload: &Payload, codec: Codec) -> Result<Vec<u8>> {
    payload.validate()?;
    let body = codec.compress(serde_json::to_vec(payload)?)?;
    let len = u32::try_from(body.len()).map_err(|_| {
        Error::Serialization(format!("record of {} bytes exceeds frame limit", body.len()))
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.push(codec.tag());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode the body of a frame whose header has already been parsed.
fn decode_body(codec: Codec, body: Vec<u8>) -> Result<Payload> {
    let raw = codec.decompress(body)?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Streaming decoder over a sequence of frames.
///
/// Yields payloads in write order. A frame cut short by the end of input is
/// reported as [`Error::Conflict`] since appends are all-or-nothing.
pub struct FrameReader<R> {
    inner: R,
    offset: u64,
    done: bool,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a reader positioned at the start of a log.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            done: false,
        }
    }

    /// Byte offset of the next frame.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    fn next_frame(&mut self) -> Result<Option<Payload>> {
        let mut header = [0u8; HEADER_LEN];
        let filled = read_full(&mut self.inner, &mut header)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < HEADER_LEN {
            return Err(self.truncated());
        }

        let codec = Codec::from_tag(header[0])?;
        let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        // grow with the data actually present instead of trusting the header
        let mut body = Vec::new();
        (&mut self.inner)
            .take(u64::from(len))
            .read_to_end(&mut body)?;
        if body.len() as u64 != u64::from(len) {
            return Err(self.truncated());
        }

        self.offset += (HEADER_LEN + body.len()) as u64;
        decode_body(codec, body).map(Some)
    }

    fn truncated(&self) -> Error {
        Error::Conflict(format!("truncated record entry at byte {}", self.offset))
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Payload>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_frame().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
