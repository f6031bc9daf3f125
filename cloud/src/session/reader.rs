use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, BytesMut};
use log::{debug, trace, warn};
use protocol::Message;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;

use super::events::SessionEvent;
use crate::completion::Completions;
use crate::decoder::{check_status, decode};
use crate::registry::Registry;
use crate::Error;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Reads response frames from one connection until it closes, resolving the
/// matching pending calls. Reports the loss to the session worker on exit.
/// `delivered` is raised once the first valid frame arrives.
pub(crate) async fn read_responses<R>(
    mut reader: R,
    registry: Arc<Registry>,
    completions: Completions,
    events: UnboundedSender<SessionEvent>,
    generation: u64,
    delivered: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

    let event = loop {
        match Message::decode(&buffer) {
            Ok((message, consumed)) => {
                buffer.advance(consumed);
                delivered.store(true, Ordering::Release);
                handle_message(message, &registry, &completions);
            }
            Err(protocol::Error::InsufficientData) => {
                // Grow once for a large frame instead of on every read.
                if let Ok(payload_len) = Message::peek_len(&buffer) {
                    let wanted = Message::HEADER_SIZE + payload_len;
                    buffer.reserve(wanted.saturating_sub(buffer.len()));
                }

                let reason = match reader.read_buf(&mut buffer).await {
                    Ok(0) => "connection closed by platform".to_string(),
                    Ok(n) => {
                        trace!("Read {} bytes on connection {}", n, generation);
                        continue;
                    }
                    Err(e) => format!("read failed: {e}"),
                };
                break SessionEvent::ConnectionLost { generation, reason };
            }
            Err(e) => {
                break SessionEvent::CorruptStream {
                    generation,
                    reason: format!("corrupt frame: {e}"),
                }
            }
        }
    };

    let _ = events.send(event);
}

fn handle_message(message: Message, registry: &Registry, completions: &Completions) {
    match message {
        Message::Response {
            correlation_id,
            status,
            payload,
        } => match registry.take(correlation_id) {
            Some(call) if call.deadline <= Instant::now() => {
                debug!("Response for call {} arrived past its deadline", correlation_id);
                call.resolve(completions, Err(Error::Timeout));
            }
            Some(call) => {
                let result = check_status(status).and_then(|_| decode(call.operation, payload));
                call.resolve(completions, result);
            }
            None => debug!("Discarding response for settled call {}", correlation_id),
        },
        Message::Request { correlation_id, .. } => {
            warn!("Ignoring request {} sent by platform", correlation_id)
        }
    }
}
