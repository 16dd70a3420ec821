// haxxload - push a compressed file to a HAXX network loader over TCP

pub mod common;
pub mod source;
pub mod compress;
pub mod protocol;
pub mod transport;
pub mod client;
pub mod server;

pub use client::{
    Client, ProgressSink, ProgressUpdate, TransferEvent, TransferHandle, TransferOutcome,
    TransferReport, TransferRequest,
};
pub use common::{ClientConfig, DeflateFormat, Error, Phase, Result, ServerConfig, SessionState};
pub use protocol::{build_header, Magic};
pub use server::FileReceiver;
