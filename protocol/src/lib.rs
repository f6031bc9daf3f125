#![no_std]

extern crate alloc;

mod config;

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use bincode::config::{BigEndian, Configuration, Limit, Varint};

pub use config::{ConfigError, PlatformConfig};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Insufficient data")]
    InsufficientData,
    #[error("Invalid message")]
    InvalidMessage,
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("Decode error: {0:?}")]
    DecodeError(bincode::error::DecodeError),
    #[error("Encode error: {0:?}")]
    EncodeError(bincode::error::EncodeError),
}

/// Remote capability invoked by a request.
#[derive(bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    TextToSpeech,
    QrRecognition,
    FaceDetection,
}

impl Operation {
    pub const ALL: [Operation; 3] = [
        Operation::TextToSpeech,
        Operation::QrRecognition,
        Operation::FaceDetection,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Operation::TextToSpeech => "text_to_speech",
            Operation::QrRecognition => "qr_recognition",
            Operation::FaceDetection => "face_detection",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success,
    Unauthorized,
    UnsupportedOperation,
    Failed(String),
}

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        correlation_id: u64,
        operation: Operation,
        token: String,
        payload: Vec<u8>,
    },
    Response {
        correlation_id: u64,
        status: Status,
        payload: Vec<u8>,
    },
}

/// Upper bound on the body of a single frame, enforced both ways.
const FRAME_LIMIT: usize = 64 * 1024 * 1024;

type WireConfig = Configuration<BigEndian, Varint, Limit<FRAME_LIMIT>>;

fn wire_config() -> WireConfig {
    bincode::config::standard()
        .with_big_endian()
        .with_limit::<FRAME_LIMIT>()
}

impl Message {
    pub const HEADER_SIZE: usize = 4;
    pub const MAX_FRAME_SIZE: usize = FRAME_LIMIT;

    pub fn correlation_id(&self) -> u64 {
        match self {
            Message::Request { correlation_id, .. } | Message::Response { correlation_id, .. } => {
                *correlation_id
            }
        }
    }

    /// Encodes the message as a length prefixed frame: a big-endian `u32`
    /// body length followed by the bincode body.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let payload = bincode::encode_to_vec(self, wire_config()).map_err(Error::EncodeError)?;
        let payload_len = payload.len();

        if payload_len > Self::MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(payload_len));
        }

        let mut output = Vec::with_capacity(Self::HEADER_SIZE + payload_len);
        output.extend_from_slice(&(payload_len as u32).to_be_bytes());
        output.extend(payload);

        Ok(output)
    }

    /// Decodes the first frame in `data`, returning the message and the number
    /// of bytes it occupied. `Error::InsufficientData` means the frame is not
    /// complete yet and more bytes should be read.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), Error> {
        let payload_len = Self::peek_len(data)?;
        let total_len = Self::HEADER_SIZE + payload_len;

        if data.len() < total_len {
            return Err(Error::InsufficientData);
        }

        let (message, size) =
            bincode::decode_from_slice(&data[Self::HEADER_SIZE..total_len], wire_config())
                .map_err(Error::DecodeError)?;

        if size != payload_len {
            return Err(Error::InvalidMessage);
        }

        Ok((message, total_len))
    }

    /// Reads the body length announced by the frame header.
    pub fn peek_len(data: &[u8]) -> Result<usize, Error> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::InsufficientData);
        }

        let payload_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if payload_len > Self::MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(payload_len));
        }

        Ok(payload_len)
    }
}
