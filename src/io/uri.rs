use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use url::Url;

/// Represents a parsed source URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUri {
    Local(PathBuf),
}

impl SourceUri {
    /// Parse a URI string into a SourceUri
    pub fn parse(uri: &str) -> Result<Self> {
        if uri.trim().is_empty() {
            return Err(anyhow!("Empty source URI"));
        }

        // Try parsing as URL first. Single-letter schemes are drive letters.
        if let Ok(url) = Url::parse(uri)
            && url.scheme().len() > 1
        {
            return match url.scheme() {
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|_| anyhow!("Invalid file:// URI: {}", uri))?;
                    Ok(SourceUri::Local(path))
                }
                scheme => Err(anyhow!("Unsupported URI scheme: {}", scheme)),
            };
        }

        // Treat as local file path
        Ok(SourceUri::Local(PathBuf::from(uri)))
    }

    pub fn path(&self) -> &Path {
        match self {
            SourceUri::Local(path) => path,
        }
    }
}
