#![allow(dead_code)]

mod mock_platform;

use std::time::Duration;

use cloud::{PlatformConfig, ServiceController, Settings};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

pub use mock_platform::{MockPlatform, Received, Reply};

pub const TOKEN: &str = "rapp_token";

pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

pub fn config() -> PlatformConfig {
    PlatformConfig::with_port("rapp.mock", 9001, TOKEN).unwrap()
}

pub fn controller(platform: &MockPlatform, settings: Settings) -> ServiceController {
    init_logger();
    ServiceController::with_connector(config(), settings, platform.clone(), Handle::current()).unwrap()
}

pub async fn next<T>(rx: &mut UnboundedReceiver<T>, within: Duration) -> T {
    timeout(within, rx.recv())
        .await
        .expect("no callback in time")
        .expect("callback channel closed")
}

/// Asserts nothing more arrives on `rx` for `quiet`.
pub async fn assert_silent<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<T>, quiet: Duration) {
    if let Ok(Some(extra)) = timeout(quiet, rx.recv()).await {
        panic!("unexpected callback: {extra:?}");
    }
}

pub fn wav(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// A QR result body with one code per message, stacked down a 640x480 image.
pub fn qr_result(messages: &[&str]) -> Vec<u8> {
    let codes: Vec<_> = messages
        .iter()
        .enumerate()
        .map(|(i, message)| {
            let top = i as u32 * 50;
            serde_json::json!({
                "left_x": 10,
                "left_y": top,
                "right_x": 60,
                "right_y": top + 40,
                "message": message,
            })
        })
        .collect();

    serde_json::to_vec(&serde_json::json!({
        "width": 640,
        "height": 480,
        "qr_codes": codes,
    }))
    .unwrap()
}
