use crate::protocol::transport::{PinoutSignals, TransportError};

/// Notifications sent from the worker thread to its controller.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    PortStatusChanged(bool),
    Message { text: String, is_error: bool },
    /// Mid-session transport failure. Closing is up to the controller.
    Error(TransportError),
    /// New bytes are waiting in the read buffer; fetch them with `read_all`.
    ReadyRead,
    Progress { text: String, percent: f32 },
    /// A write batch completed (or was aborted).
    Finish,
    PinoutSignalsChanged(PinoutSignals),
}

impl WorkerEvent {
    pub fn message(text: impl Into<String>) -> Self {
        WorkerEvent::Message {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error_message(text: impl Into<String>) -> Self {
        WorkerEvent::Message {
            text: text.into(),
            is_error: true,
        }
    }
}
