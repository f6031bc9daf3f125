use crate::registry::CallId;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A registered call ready to be written.
    Dispatch { id: CallId },
    /// The reader of connection `generation` stopped.
    ConnectionLost { generation: u64, reason: String },
    /// Connection `generation` sent bytes that are not a valid frame. The
    /// stream cannot be resynchronised.
    CorruptStream { generation: u64, reason: String },
}
