//! Platform shared-library loading and the artifact name filter.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

#[cfg(unix)]
use libloading::os::unix::Library;
#[cfg(windows)]
use libloading::Library;
use regex::Regex;
use tracing::{error, trace};

use crate::error::HotSwapError;

/// Returns "" on Windows and "lib" on posix.
pub(crate) fn shared_library_prefix() -> &'static str {
    if cfg!(windows) { "" } else { "lib" }
}

/// Returns "dll" on Windows and "so" on posix.
pub(crate) fn shared_library_extension() -> &'static str {
    if cfg!(windows) { "dll" } else { "so" }
}

static ARTIFACT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Detects scripts_NAME.dll's / .so's
    Regex::new(&format!(
        "^{}[sS]cripts_[a-zA-Z0-9_]+\\.{}$",
        shared_library_prefix(),
        shared_library_extension()
    ))
    .unwrap()
});

/// Whether the given file name denotes a script-module artifact.
pub fn is_module_artifact(name: &str) -> bool {
    ARTIFACT_PATTERN.is_match(name)
}

/// An open shared library that owns its on-disk cache copy.
///
/// On drop the library is closed first and the cache file deleted
/// second; a failed close leaves the file in place.
pub(crate) struct SharedLibrary {
    library: Option<Library>,
    path: PathBuf,
}

impl SharedLibrary {
    /// Open the shared library at `path`, taking ownership of the file.
    #[cfg(unix)]
    pub(crate) fn open(path: &Path) -> Result<Self, HotSwapError> {
        // RTLD_NOW | RTLD_GLOBAL so modules can share host symbols
        let library =
            unsafe { Library::open(Some(path), libc::RTLD_NOW | libc::RTLD_GLOBAL) }?;
        Ok(Self {
            library: Some(library),
            path: path.to_path_buf(),
        })
    }

    /// Open the shared library at `path`, taking ownership of the file.
    #[cfg(windows)]
    pub(crate) fn open(path: &Path) -> Result<Self, HotSwapError> {
        let library = unsafe { Library::new(path) }?;
        Ok(Self {
            library: Some(library),
            path: path.to_path_buf(),
        })
    }

    /// Resolve an exported function, copying the pointer out of the
    /// library. The pointer stays valid for the lifetime of `self`.
    pub(crate) fn resolve<T: Copy>(&self, symbol: &'static str) -> Result<T, HotSwapError> {
        let library = self
            .library
            .as_ref()
            .expect("library is present until drop");
        unsafe {
            library
                .get::<T>(symbol.as_bytes())
                .map(|sym| *sym)
                .map_err(|_| HotSwapError::MissingSymbol { symbol })
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// A handle over an existing file with no library behind it. Drop
    /// still deletes the file.
    #[cfg(test)]
    pub(crate) fn dangling(path: PathBuf) -> Self {
        Self {
            library: None,
            path,
        }
    }
}

impl Drop for SharedLibrary {
    fn drop(&mut self) {
        if let Some(library) = self.library.take()
            && let Err(e) = library.close()
        {
            error!(
                target: "scripts.hotswap",
                "Failed to close the shared library \"{}\": {}",
                self.path.display(),
                e
            );
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => trace!(
                target: "scripts.hotswap",
                "Lazy unloaded and deleted the shared library \"{}\".",
                self.path.display()
            ),
            Err(e) => error!(
                target: "scripts.hotswap",
                "Failed to delete the shared library \"{}\": {}",
                self.path.display(),
                e
            ),
        }
    }
}
