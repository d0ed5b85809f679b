//! Container runtime access over its local control socket.

pub mod client;
pub mod status;

pub use client::ControlSocketClient;
pub use status::{DockerStatusChecker, StatusProbe};
