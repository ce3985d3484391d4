pub mod conversation;
pub mod ipc;

pub use conversation::{
    AudioClip, ConversationTurn, DispatchFailure, FailureKind, PollSnapshot, SessionState,
};
pub use ipc::{default_socket_path, Command, IpcError, Response};
