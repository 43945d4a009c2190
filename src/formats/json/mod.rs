//! JSON sources: a top-level array of objects, or one object per line

pub mod reader;

pub use reader::{JsonLayout, JsonSource};
