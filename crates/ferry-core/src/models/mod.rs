pub mod event;
pub mod managed_file;
pub mod session_event;

pub use event::{
    emit, event_channel, EventReceiver, EventSender, MessageParams, TransferEvent,
    TransferEventKind,
};
pub use managed_file::{format_size, FileStatus, ManagedFile, RawSource};
pub use session_event::{
    aggregate_progress, count_status, SessionEvent, SessionEventKind, SessionId,
};
