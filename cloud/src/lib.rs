mod call;
mod completion;
mod controller;
mod decoder;
mod objects;
mod registry;
mod session;
mod settings;

pub use call::{CallDescriptor, CloudCall, FaceDetection, QrRecognition, TextToSpeech};
pub use controller::ServiceController;
pub use decoder::{decode, TypedResult};
pub use objects::{Audio, BoundingBox, Face, ImageFormat, Picture, QrCode};
pub use protocol::{ConfigError, Message, Operation, PlatformConfig, Status};
pub use registry::CallId;
pub use session::{Connector, TcpConnector};
pub use settings::{platform_from_env, Settings};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::Error),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Call timed out")]
    Timeout,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Platform error: {0}")]
    Remote(String),
    #[error("Call cancelled")]
    Cancelled,
    #[error("Controller is shut down")]
    Shutdown,
    #[error("Failed to start controller: {0}")]
    Startup(#[from] std::io::Error),
}
