use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use cloud::{Connector, Message, Operation, PlatformConfig, Status};
use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::{AbortHandle, JoinSet};

pub struct Reply {
    pub status: Status,
    pub payload: Vec<u8>,
    pub delay: Duration,
    /// Bytes written instead of an encoded response.
    pub raw: Option<Vec<u8>>,
    /// Close the connection instead of answering.
    pub hang_up: bool,
}

impl Reply {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: Status::Success,
            payload,
            delay: Duration::ZERO,
            raw: None,
            hang_up: false,
        }
    }

    pub fn failed(reason: &str) -> Self {
        Self {
            status: Status::Failed(reason.into()),
            ..Self::ok(Vec::new())
        }
    }

    pub fn raw(bytes: &[u8]) -> Self {
        Self {
            raw: Some(bytes.to_vec()),
            ..Self::ok(Vec::new())
        }
    }

    pub fn hang_up() -> Self {
        Self {
            hang_up: true,
            ..Self::ok(Vec::new())
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request as the platform saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub correlation_id: u64,
    pub operation: Operation,
    pub token: String,
    pub payload: Vec<u8>,
}

type Handler = dyn Fn(Operation, &[u8]) -> Option<Reply> + Send + Sync;

struct State {
    handler: Box<Handler>,
    connections: AtomicUsize,
    refusals: AtomicUsize,
    received: Mutex<Vec<Received>>,
    serving: Mutex<Vec<AbortHandle>>,
}

/// In-memory platform reached through duplex streams. `handler` decides the
/// reply to each request, `None` leaves the request unanswered.
#[derive(Clone)]
pub struct MockPlatform {
    state: Arc<State>,
}

impl MockPlatform {
    pub fn new<H>(handler: H) -> Self
    where
        H: Fn(Operation, &[u8]) -> Option<Reply> + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(State {
                handler: Box::new(handler),
                connections: AtomicUsize::new(0),
                refusals: AtomicUsize::new(0),
                received: Mutex::new(Vec::new()),
                serving: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Refuses the next `count` connection attempts.
    pub fn refuse(&self, count: usize) {
        self.state.refusals.store(count, Ordering::SeqCst);
    }

    /// Kills every open connection, dropping unsent replies.
    pub fn drop_connections(&self) {
        for task in self.state.serving.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }
}

impl Connector for MockPlatform {
    type Stream = DuplexStream;

    fn connect(&self, _config: &PlatformConfig) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        let state = self.state.clone();
        async move {
            let refused = state
                .refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "platform refused"));
            }

            let (client, server) = duplex(1 << 20);
            state.connections.fetch_add(1, Ordering::SeqCst);
            let task = tokio::spawn(serve(state.clone(), server));
            state.serving.lock().unwrap().push(task.abort_handle());
            Ok(client)
        }
    }
}

async fn serve(state: Arc<State>, stream: DuplexStream) {
    let (mut reader, writer) = split(stream);
    let writer = Arc::new(tokio::sync::Mutex::new(writer));
    let mut replies = JoinSet::new();
    let mut buffer = BytesMut::new();

    loop {
        match Message::decode(&buffer) {
            Ok((message, consumed)) => {
                buffer.advance(consumed);
                let Message::Request {
                    correlation_id,
                    operation,
                    token,
                    payload,
                } = message
                else {
                    panic!("platform received a response");
                };

                let reply = (state.handler)(operation, &payload);
                state.received.lock().unwrap().push(Received {
                    correlation_id,
                    operation,
                    token,
                    payload,
                });

                match reply {
                    Some(reply) if reply.hang_up => break,
                    Some(reply) => {
                        let writer = writer.clone();
                        replies.spawn(async move {
                            tokio::time::sleep(reply.delay).await;
                            let frame = match reply.raw {
                                Some(raw) => raw,
                                None => Message::Response {
                                    correlation_id,
                                    status: reply.status,
                                    payload: reply.payload,
                                }
                                .encode()
                                .unwrap(),
                            };
                            let _ = writer.lock().await.write_all(&frame).await;
                        });
                    }
                    None => {}
                }
            }
            Err(protocol::Error::InsufficientData) => match reader.read_buf(&mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
            Err(e) => panic!("platform received a corrupt frame: {e}"),
        }
    }

    // Let replies already scheduled go out before the stream closes.
    while replies.join_next().await.is_some() {}
}
