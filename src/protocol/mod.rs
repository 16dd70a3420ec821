// Wire protocol: header framing and trailing file name field

pub mod header;

pub use header::{build_header, filename_field, Magic, ProtocolHeader};
