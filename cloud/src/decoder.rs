use protocol::{Operation, Status};
use serde::Deserialize;

use crate::objects::{Audio, BoundingBox, Face, QrCode};
use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum TypedResult {
    Audio(Audio),
    QrCodes(Vec<QrCode>),
    Faces(Vec<Face>),
}

impl TypedResult {
    pub fn operation(&self) -> Operation {
        match self {
            TypedResult::Audio(_) => Operation::TextToSpeech,
            TypedResult::QrCodes(_) => Operation::QrRecognition,
            TypedResult::Faces(_) => Operation::FaceDetection,
        }
    }
}

#[derive(Deserialize)]
struct QrResponse {
    width: u32,
    height: u32,
    #[serde(default)]
    qr_codes: Vec<QrCode>,
    #[serde(default)]
    error: String,
}

#[derive(Deserialize)]
struct FaceResponse {
    width: u32,
    height: u32,
    #[serde(default)]
    faces: Vec<Face>,
    #[serde(default)]
    error: String,
}

/// Maps a non-success response status to the error handed to the caller.
pub(crate) fn check_status(status: Status) -> Result<(), Error> {
    match status {
        Status::Success => Ok(()),
        Status::Unauthorized => Err(Error::Remote("token rejected by platform".into())),
        Status::UnsupportedOperation => {
            Err(Error::Remote("operation not supported by platform".into()))
        }
        Status::Failed(reason) => Err(Error::Remote(reason)),
    }
}

/// Decodes the body of a successful response into the result type of
/// `operation`. Nothing from the wire is trusted: containers are walked with
/// bounds checks and every bounding box must lie inside the reported image.
pub fn decode(operation: Operation, payload: Vec<u8>) -> Result<TypedResult, Error> {
    match operation {
        Operation::TextToSpeech => decode_wav(payload).map(TypedResult::Audio),
        Operation::QrRecognition => {
            let response: QrResponse = parse_json(&payload)?;
            if !response.error.is_empty() {
                return Err(Error::Remote(response.error));
            }
            check_bounds(
                response.width,
                response.height,
                response.qr_codes.iter().map(|code| &code.bounds),
            )?;
            Ok(TypedResult::QrCodes(response.qr_codes))
        }
        Operation::FaceDetection => {
            let response: FaceResponse = parse_json(&payload)?;
            if !response.error.is_empty() {
                return Err(Error::Remote(response.error));
            }
            check_bounds(
                response.width,
                response.height,
                response.faces.iter().map(|face| &face.bounds),
            )?;
            Ok(TypedResult::Faces(response.faces))
        }
    }
}

fn parse_json<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, Error> {
    serde_json::from_slice(payload).map_err(|e| Error::Decode(format!("malformed result: {e}")))
}

fn check_bounds<'a>(
    width: u32,
    height: u32,
    boxes: impl Iterator<Item = &'a BoundingBox>,
) -> Result<(), Error> {
    for (index, bounds) in boxes.enumerate() {
        if !bounds.fits_within(width, height) {
            return Err(Error::Decode(format!(
                "box {index} {bounds:?} outside {width}x{height} image"
            )));
        }
    }
    Ok(())
}

fn le_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_le_bytes)
}

fn le_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
}

fn decode_wav(bytes: Vec<u8>) -> Result<Audio, Error> {
    const RIFF_HEADER: usize = 12;
    const CHUNK_HEADER: usize = 8;
    const FMT_SIZE: usize = 16;

    let truncated = |what: &str| Error::Decode(format!("truncated wav: {what}"));

    if bytes.len() < RIFF_HEADER {
        return Err(truncated("missing RIFF header"));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(Error::Decode("not a RIFF/WAVE stream".into()));
    }

    let riff_len = le_u32(&bytes, 4).ok_or_else(|| truncated("RIFF size"))? as usize;
    let end = riff_len
        .checked_add(CHUNK_HEADER)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| truncated("RIFF size exceeds stream"))?;

    let mut format: Option<(u16, u32, u16)> = None;
    let mut offset = RIFF_HEADER;

    while offset + CHUNK_HEADER <= end {
        let id = &bytes[offset..offset + 4];
        let size = le_u32(&bytes, offset + 4).ok_or_else(|| truncated("chunk header"))? as usize;
        let body = offset + CHUNK_HEADER;
        let body_end = body
            .checked_add(size)
            .filter(|body_end| *body_end <= end)
            .ok_or_else(|| truncated("chunk exceeds stream"))?;

        match id {
            b"fmt " => {
                if size < FMT_SIZE {
                    return Err(Error::Decode(format!("fmt chunk of {size} bytes")));
                }
                let channels = le_u16(&bytes, body + 2).ok_or_else(|| truncated("fmt"))?;
                let sample_rate = le_u32(&bytes, body + 4).ok_or_else(|| truncated("fmt"))?;
                let bits = le_u16(&bytes, body + 14).ok_or_else(|| truncated("fmt"))?;
                if channels == 0 || sample_rate == 0 || bits == 0 {
                    return Err(Error::Decode("wav format with zero field".into()));
                }
                format = Some((channels, sample_rate, bits));
            }
            b"data" => {
                let (channels, sample_rate, bits) =
                    format.ok_or_else(|| Error::Decode("data chunk before fmt chunk".into()))?;
                return Ok(Audio::new(bytes, channels, sample_rate, bits, size));
            }
            _ => {}
        }

        // Chunks are padded to an even length.
        offset = body_end + (size & 1);
    }

    Err(Error::Decode("wav stream without data chunk".into()))
}
