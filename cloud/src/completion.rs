use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

use log::error;

use crate::decoder::TypedResult;
use crate::Error;

pub(crate) type Callback = Box<dyn FnOnce(Result<TypedResult, Error>) + Send + 'static>;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs user callbacks in submission order on a dedicated thread, away from
/// both the caller and the session tasks. The thread keeps draining until
/// every handle is dropped, so results settled during shutdown still arrive.
#[derive(Clone)]
pub(crate) struct Completions {
    sender: mpsc::Sender<Job>,
}

impl Completions {
    pub fn spawn() -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();

        thread::Builder::new()
            .name("cloud-callbacks".into())
            .spawn(move || {
                for job in receiver {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Call callback panicked");
                    }
                }
            })?;

        Ok(Self { sender })
    }

    pub fn deliver(&self, callback: Callback, result: Result<TypedResult, Error>) {
        if self.sender.send(Box::new(move || callback(result))).is_err() {
            error!("Callback thread is gone, dropping call result");
        }
    }
}
