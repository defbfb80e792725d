use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during hot-swap operations
#[derive(Error, Debug)]
pub enum HotSwapError {
    #[error("Failed to load library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    #[error("Missing required symbol '{symbol}' in module")]
    MissingSymbol { symbol: &'static str },

    #[error("Library directory does not exist: {0}")]
    MissingLibraryDirectory(PathBuf),

    #[error("Failed to create cache entry {cache_path} for {artifact}: {source}")]
    CacheCopy {
        artifact: PathBuf,
        cache_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Module '{name}' is already loaded from {loaded_from}")]
    DuplicateModule { name: String, loaded_from: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}
