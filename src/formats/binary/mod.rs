//! Binary columnar container format
//!
//! A container is a fixed header describing the fields, followed by
//! length-prefixed records. See `header` for the layout.

mod block;
pub mod encoder;
pub mod header;
pub mod reader;

pub use encoder::ContainerWriter;
pub use header::{ContainerHeader, SchemaExtractor};
pub use reader::BinaryRecordReader;
