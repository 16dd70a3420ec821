// Server module - loopback stand-in for a listening loader

mod receiver;

pub use receiver::{decode_transfer, DecodedTransfer, FileReceiver, ReceivedFile};
