//! Payload types and classification.
//!
//! The pipeline routes every payload by its [`PayloadKind`]. Kinds come from a
//! [`PayloadClassifier`]; the bundled [`SignatureClassifier`] looks at the
//! leading magic bytes of the payload and nothing else.

use crate::error::{PublishError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload handed to the publisher by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw byte sequence
    Bytes(Bytes),
    /// Structured (typed) blob that has not been encoded to bytes
    Structured(serde_json::Value),
}

impl Payload {
    /// Short name of the payload representation, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Bytes(_) => "bytes",
            Payload::Structured(_) => "structured",
        }
    }

    /// Borrow the payload as raw bytes, failing for any other representation
    pub fn as_bytes(&self) -> Result<&Bytes> {
        match self {
            Payload::Bytes(bytes) => Ok(bytes),
            other => Err(PublishError::TypeMismatch {
                expected: "bytes",
                actual: other.type_name(),
            }),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Bytes(data)
    }
}

impl From<&'static [u8]> for Payload {
    fn from(data: &'static [u8]) -> Self {
        Payload::Bytes(Bytes::from_static(data))
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Structured(value)
    }
}

/// Classification label that drives storage-route selection
///
/// Serializes to its wire label (`video`, `image`, `tiny_data`). Labels the
/// pipeline has no route for are kept verbatim in [`PayloadKind::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PayloadKind {
    Video,
    Image,
    TinyData,
    Unknown(String),
}

impl PayloadKind {
    pub fn as_str(&self) -> &str {
        match self {
            PayloadKind::Video => "video",
            PayloadKind::Image => "image",
            PayloadKind::TinyData => "tiny_data",
            PayloadKind::Unknown(label) => label,
        }
    }

    /// Parse a classifier label
    pub fn from_label(label: &str) -> Self {
        match label {
            "video" => PayloadKind::Video,
            "image" => PayloadKind::Image,
            "tiny_data" => PayloadKind::TinyData,
            other => PayloadKind::Unknown(other.to_string()),
        }
    }
}

impl From<String> for PayloadKind {
    fn from(label: String) -> Self {
        PayloadKind::from_label(&label)
    }
}

impl From<PayloadKind> for String {
    fn from(kind: PayloadKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inspects a payload and returns its kind
#[cfg_attr(test, mockall::automock)]
pub trait PayloadClassifier: Send + Sync {
    fn classify(&self, payload: &Payload) -> Result<PayloadKind>;
}

/// Classifier based on well-known file signatures
///
/// Recognized containers:
/// - images: JPEG, PNG, GIF, BMP, WebP, HEIC/AVIF
/// - video: MP4/MOV (ISO BMFF), Matroska/WebM, AVI, FLV, MPEG-TS
///
/// Everything else, including structured payloads, is `tiny_data`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureClassifier;

/// ISO BMFF brands that carry still images rather than video
const IMAGE_BRANDS: [&[u8]; 5] = [b"heic", b"heix", b"mif1", b"msf1", b"avif"];

const MPEG_TS_PACKET: usize = 188;

/// BITMAPCOREHEADER through BITMAPV5HEADER
const BMP_DIB_HEADER_SIZES: [u32; 7] = [12, 16, 40, 52, 56, 108, 124];

impl SignatureClassifier {
    pub fn new() -> Self {
        Self
    }

    fn classify_bytes(data: &[u8]) -> PayloadKind {
        if is_image(data) {
            PayloadKind::Image
        } else if is_video(data) {
            PayloadKind::Video
        } else {
            PayloadKind::TinyData
        }
    }
}

impl PayloadClassifier for SignatureClassifier {
    fn classify(&self, payload: &Payload) -> Result<PayloadKind> {
        match payload {
            Payload::Bytes(data) => Ok(Self::classify_bytes(data)),
            Payload::Structured(_) => Ok(PayloadKind::TinyData),
        }
    }
}

fn is_image(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0xD8, 0xFF])
        || data.starts_with(b"\x89PNG\r\n\x1a\n")
        || data.starts_with(b"GIF87a")
        || data.starts_with(b"GIF89a")
        || is_bmp(data)
        || riff_form(data) == Some(b"WEBP")
        || iso_bmff_brand(data).is_some_and(|brand| IMAGE_BRANDS.contains(&brand))
}

fn is_video(data: &[u8]) -> bool {
    data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3])
        || data.starts_with(b"FLV\x01")
        || riff_form(data) == Some(b"AVI ")
        || iso_bmff_brand(data).is_some()
        || (data.len() > MPEG_TS_PACKET && data[0] == 0x47 && data[MPEG_TS_PACKET] == 0x47)
}

/// `BM` followed by a known DIB header size at offset 14
fn is_bmp(data: &[u8]) -> bool {
    if data.len() < 18 || !data.starts_with(b"BM") {
        return false;
    }

    let dib_size = u32::from_le_bytes([data[14], data[15], data[16], data[17]]);
    BMP_DIB_HEADER_SIZES.contains(&dib_size)
}

/// Form type of a RIFF container (`WEBP`, `AVI `, ...)
fn riff_form(data: &[u8]) -> Option<&[u8]> {
    if data.len() >= 12 && data.starts_with(b"RIFF") {
        Some(&data[8..12])
    } else {
        None
    }
}

/// Major brand of an ISO base media file (`ftyp` box at offset 4)
fn iso_bmff_brand(data: &[u8]) -> Option<&[u8]> {
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        Some(&data[8..12])
    } else {
        None
    }
}
