//! Source file access

pub mod uri;

pub use uri::SourceUri;

use std::fs::File;
use std::path::Path;

use crate::error::ConversionError;

/// Open a local source file and report its size in bytes
pub fn open_file(path: &Path) -> Result<(File, u64), ConversionError> {
    let open_error = |source| ConversionError::Open {
        path: path.display().to_string(),
        source,
    };
    let file = File::open(path).map_err(open_error)?;
    let size = file.metadata().map_err(open_error)?.len();
    Ok((file, size))
}
