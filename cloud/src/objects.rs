use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

/// Encoded image handed over by the capture pipeline. The bytes are sent as
/// they are; only the container format is sniffed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    bytes: Vec<u8>,
}

impl Picture {
    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn format(&self) -> Option<ImageFormat> {
        if self.bytes.starts_with(&Self::PNG_MAGIC) {
            Some(ImageFormat::Png)
        } else if self.bytes.starts_with(&Self::JPEG_MAGIC) {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for Picture {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Speech returned by the platform, kept as the complete wav file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audio {
    bytes: Vec<u8>,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    data_len: usize,
}

impl Audio {
    pub(crate) fn new(
        bytes: Vec<u8>,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
        data_len: usize,
    ) -> Self {
        Self {
            bytes,
            channels,
            sample_rate,
            bits_per_sample,
            data_len,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn duration(&self) -> Duration {
        let frame_size = self.channels as u64 * (self.bits_per_sample as u64).div_ceil(8);
        let byte_rate = frame_size * self.sample_rate as u64;
        if byte_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.data_len as f64 / byte_rate as f64)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, &self.bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left_x: u32,
    pub left_y: u32,
    pub right_x: u32,
    pub right_y: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.right_x.saturating_sub(self.left_x)
    }

    pub fn height(&self) -> u32 {
        self.right_y.saturating_sub(self.left_y)
    }

    /// Whether the corners are ordered and the box lies inside a
    /// `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.left_x <= self.right_x
            && self.left_y <= self.right_y
            && self.right_x <= width
            && self.right_y <= height
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCode {
    #[serde(flatten)]
    pub bounds: BoundingBox,
    #[serde(default)]
    pub message: String,
}

impl QrCode {
    pub fn left_x(&self) -> u32 {
        self.bounds.left_x
    }

    pub fn left_y(&self) -> u32 {
        self.bounds.left_y
    }

    pub fn right_x(&self) -> u32 {
        self.bounds.right_x
    }

    pub fn right_y(&self) -> u32 {
        self.bounds.right_y
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Face {
    pub bounds: BoundingBox,
}
