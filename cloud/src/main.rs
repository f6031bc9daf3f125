use std::process::ExitCode;
use std::sync::mpsc;

use cloud::{platform_from_env, ServiceController, Settings, TextToSpeech};
use log::{error, info};

fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(text) = args.next() else {
        eprintln!("usage: cloud <text> [language] [output.wav]");
        return ExitCode::FAILURE;
    };
    let language = args.next().unwrap_or_else(|| "en".into());
    let output = args.next().unwrap_or_else(|| "speech.wav".into());

    let config = match platform_from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid platform configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid session settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let controller = match ServiceController::with_settings(config, settings) {
        Ok(controller) => controller,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let (tx, rx) = mpsc::channel();
    controller.call(TextToSpeech::new(text, language), move |result| {
        let _ = tx.send(result);
    });

    match rx.recv() {
        Ok(Ok(audio)) => {
            if let Err(e) = audio.save(&output) {
                error!("Failed to write {}: {}", output, e);
                return ExitCode::FAILURE;
            }
            info!(
                "Saved {:?} of speech ({} Hz, {} channels) to {}",
                audio.duration(),
                audio.sample_rate(),
                audio.channels(),
                output
            );
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!("Text to speech failed: {}", e);
            ExitCode::FAILURE
        }
        Err(_) => {
            error!("Controller stopped without a result");
            ExitCode::FAILURE
        }
    }
}
