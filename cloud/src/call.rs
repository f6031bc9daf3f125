use protocol::Operation;
use serde::Serialize;

use crate::decoder::TypedResult;
use crate::objects::{Audio, Face, Picture, QrCode};
use crate::Error;

/// One remote invocation: which operation to run and its encoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    operation: Operation,
    payload: Vec<u8>,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    language: &'a str,
}

impl CallDescriptor {
    pub fn new(operation: Operation, payload: Vec<u8>) -> Self {
        Self { operation, payload }
    }

    pub fn text_to_speech(text: &str, language: &str) -> Result<Self, Error> {
        if text.trim().is_empty() {
            return Err(Error::Encode("text to speak is empty".into()));
        }
        if language.trim().is_empty() {
            return Err(Error::Encode("language is empty".into()));
        }

        let payload = serde_json::to_vec(&SpeechRequest { text, language })
            .map_err(|e| Error::Encode(e.to_string()))?;
        Ok(Self::new(Operation::TextToSpeech, payload))
    }

    pub fn qr_recognition(picture: Picture) -> Self {
        Self::new(Operation::QrRecognition, picture.into_bytes())
    }

    pub fn face_detection(picture: Picture) -> Self {
        Self::new(Operation::FaceDetection, picture.into_bytes())
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_parts(self) -> (Operation, Vec<u8>) {
        (self.operation, self.payload)
    }
}

/// A typed request whose callback receives the operation's own result type
/// instead of a [`TypedResult`].
pub trait CloudCall {
    type Output: Send + 'static;

    fn descriptor(self) -> Result<CallDescriptor, Error>;

    fn extract(result: TypedResult) -> Result<Self::Output, Error>;
}

fn mismatch(expected: Operation, result: &TypedResult) -> Error {
    Error::Decode(format!("expected {} result, got {}", expected, result.operation()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextToSpeech {
    pub text: String,
    pub language: String,
}

impl TextToSpeech {
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
        }
    }
}

impl CloudCall for TextToSpeech {
    type Output = Audio;

    fn descriptor(self) -> Result<CallDescriptor, Error> {
        CallDescriptor::text_to_speech(&self.text, &self.language)
    }

    fn extract(result: TypedResult) -> Result<Audio, Error> {
        match result {
            TypedResult::Audio(audio) => Ok(audio),
            other => Err(mismatch(Operation::TextToSpeech, &other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrRecognition(pub Picture);

impl CloudCall for QrRecognition {
    type Output = Vec<QrCode>;

    fn descriptor(self) -> Result<CallDescriptor, Error> {
        Ok(CallDescriptor::qr_recognition(self.0))
    }

    fn extract(result: TypedResult) -> Result<Vec<QrCode>, Error> {
        match result {
            TypedResult::QrCodes(codes) => Ok(codes),
            other => Err(mismatch(Operation::QrRecognition, &other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceDetection(pub Picture);

impl CloudCall for FaceDetection {
    type Output = Vec<Face>;

    fn descriptor(self) -> Result<CallDescriptor, Error> {
        Ok(CallDescriptor::face_detection(self.0))
    }

    fn extract(result: TypedResult) -> Result<Vec<Face>, Error> {
        match result {
            TypedResult::Faces(faces) => Ok(faces),
            other => Err(mismatch(Operation::FaceDetection, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_to_speech_descriptor() {
        let descriptor = TextToSpeech::new("hello world", "en").descriptor().unwrap();
        assert_eq!(descriptor.operation(), Operation::TextToSpeech);

        let body: serde_json::Value = serde_json::from_slice(descriptor.payload()).unwrap();
        assert_eq!(body["text"], "hello world");
        assert_eq!(body["language"], "en");
    }

    #[test]
    fn test_text_to_speech_rejects_empty() {
        assert!(matches!(
            CallDescriptor::text_to_speech("   ", "en"),
            Err(Error::Encode(_))
        ));
        assert!(matches!(
            CallDescriptor::text_to_speech("hello", ""),
            Err(Error::Encode(_))
        ));
    }

    #[test]
    fn test_picture_descriptor() {
        let bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];
        let (operation, payload) = QrRecognition(Picture::new(bytes.clone()))
            .descriptor()
            .unwrap()
            .into_parts();
        assert_eq!(operation, Operation::QrRecognition);
        assert_eq!(payload, bytes);

        let descriptor = FaceDetection(Picture::new(bytes)).descriptor().unwrap();
        assert_eq!(descriptor.operation(), Operation::FaceDetection);
    }

    #[test]
    fn test_extract_mismatch() {
        let result = TypedResult::Faces(vec![]);
        assert!(matches!(QrRecognition::extract(result), Err(Error::Decode(_))));
        assert_eq!(QrRecognition::extract(TypedResult::QrCodes(vec![])).unwrap(), vec![]);
    }
}
