//! Image format sniffing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported image formats, detected from magic bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Tiff,
}

/// PNG file signature.
const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

impl ImageFormat {
    /// Sniff the format from the payload's leading bytes.
    ///
    /// Returns None for payloads that are not one of the supported formats.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.len() >= 8 && data[..8] == PNG_MAGIC {
            return Some(Self::Png);
        }
        if data.len() >= 3 && data[..3] == [0xff, 0xd8, 0xff] {
            return Some(Self::Jpeg);
        }
        // TIFF: little-endian "II*\0" or big-endian "MM\0*"
        if data.len() >= 4 && (data[..4] == [0x49, 0x49, 0x2a, 0x00] || data[..4] == [0x4d, 0x4d, 0x00, 0x2a]) {
            return Some(Self::Tiff);
        }
        None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Tiff => "tiff",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "tiff" => Ok(Self::Tiff),
            other => Err(crate::Error::InvalidFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
