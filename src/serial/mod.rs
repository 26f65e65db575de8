/// Serial imager protocol
///
/// The host drives a small loader program on the Heathkit (the client) over
/// a serial line. Every exchange is a command byte from the host answered by
/// a reply byte, with track data streamed in between.

/// Command bytes and reply structures
pub mod command;
/// Byte transports
pub mod link;
/// Session state machine
pub mod session;

pub use command::{BaudRate, Command, FormatPreset, QueryReply, TrackHeader};
pub use link::{open_port, IoLink, PortLink, ScriptedLink, SerialLink, PORT_READ_TIMEOUT};
pub use session::{
    AbortHandle, ControllerVariant, ReadResult, Session, SessionConfig, SessionState, WaitPolicy,
    WriteSummary,
};
