//! The reference-counted handle for a loaded script module.
//!
//! A [`ScriptModule`] owns the opened shared library together with its
//! on-disk cache copy. While any `Arc<ScriptModule>` is alive the
//! library stays loaded and the cache file stays on disk; when the last
//! reference drops, the library is closed and the file deleted, in that
//! order.
//!
//! # Module ABI
//!
//! Each module artifact must export these C-linkage functions:
//! - `GetScriptModuleRevisionHash() -> *const c_char`
//! - `AddScripts()`
//! - `GetScriptModule() -> *const c_char`
//! - `GetBuildDirective() -> *const c_char`
//!
//! Use the [`export_script_module!`](crate::export_script_module) macro
//! to emit all four from a module crate.

use std::ffi::{CStr, OsStr, c_char};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::HotSwapError;
use crate::library::SharedLibrary;

/// Module entry-point signatures (C ABI)
pub type GetScriptModuleRevisionHashFn = unsafe extern "C" fn() -> *const c_char;
pub type AddScriptsFn = unsafe extern "C" fn();
pub type GetScriptModuleFn = unsafe extern "C" fn() -> *const c_char;
pub type GetBuildDirectiveFn = unsafe extern "C" fn() -> *const c_char;

/// Minimum number of usable characters for a revision-hash comparison.
/// Shorter prefixes are rejected to avoid false matches.
pub(crate) const MIN_REVISION_LENGTH: usize = 7;

/// Compares two revision hashes, truncated to the shorter of the two.
pub(crate) fn revision_matches(host: &str, module: &str) -> bool {
    let trim = host.len().min(module.len());
    if trim < MIN_REVISION_LENGTH {
        return false;
    }
    host.as_bytes()[..trim] == module.as_bytes()[..trim]
}

/// Unique cache file name for the `counter`-th load of `artifact`.
pub(crate) fn cache_file_name(artifact: &Path, counter: u32) -> String {
    let stem = artifact
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or_default();
    let extension = artifact
        .extension()
        .and_then(OsStr::to_str)
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    format!("{stem}.{counter}{extension}")
}

fn cstr_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// A loaded script module.
///
/// Handed out as `Arc<ScriptModule>`; external holders keep the library
/// alive past registry removal, deferring the unload to the last drop.
pub struct ScriptModule {
    library: SharedLibrary,
    get_revision_hash: GetScriptModuleRevisionHashFn,
    add_scripts: AddScriptsFn,
    get_module_name: GetScriptModuleFn,
    get_build_directive: GetBuildDirectiveFn,
}

impl ScriptModule {
    /// Materialize a module handle from the artifact at `artifact`.
    ///
    /// Copies the artifact into `cache_dir` under a unique name, opens
    /// the copy and resolves the four required entry points. On any
    /// failure the copy is closed and deleted again and `Err` is
    /// returned.
    pub(crate) fn load(
        artifact: &Path,
        cache_dir: &Path,
        counter: u32,
    ) -> Result<Arc<Self>, HotSwapError> {
        let cache_path = cache_dir.join(cache_file_name(artifact, counter));

        if cache_path.exists() {
            return Err(HotSwapError::CacheCopy {
                artifact: artifact.to_path_buf(),
                cache_path,
                source: std::io::Error::from(std::io::ErrorKind::AlreadyExists),
            });
        }

        if let Err(e) = std::fs::copy(artifact, &cache_path) {
            return Err(HotSwapError::CacheCopy {
                artifact: artifact.to_path_buf(),
                cache_path,
                source: e,
            });
        }

        debug!(
            target: "scripts.hotswap",
            "Loading module from: {}",
            cache_path.display()
        );

        let library = match SharedLibrary::open(&cache_path) {
            Ok(library) => library,
            Err(e) => {
                // The library never opened, so nothing owns the copy yet.
                let _ = std::fs::remove_file(&cache_path);
                return Err(e);
            }
        };

        // Resolution failures drop `library`, which closes the handle
        // and removes the cache copy again.
        let get_revision_hash =
            library.resolve::<GetScriptModuleRevisionHashFn>("GetScriptModuleRevisionHash")?;
        let add_scripts = library.resolve::<AddScriptsFn>("AddScripts")?;
        let get_module_name = library.resolve::<GetScriptModuleFn>("GetScriptModule")?;
        let get_build_directive = library.resolve::<GetBuildDirectiveFn>("GetBuildDirective")?;

        Ok(Arc::new(Self {
            library,
            get_revision_hash,
            add_scripts,
            get_module_name,
            get_build_directive,
        }))
    }

    /// Source revision the module was built from.
    pub fn revision_hash(&self) -> String {
        cstr_to_string(unsafe { (self.get_revision_hash)() })
    }

    /// Registers all of the module's scripts with the registry.
    pub fn add_scripts(&self) {
        unsafe { (self.add_scripts)() }
    }

    /// Logical module name.
    pub fn module_name(&self) -> String {
        cstr_to_string(unsafe { (self.get_module_name)() })
    }

    /// Build-configuration token used for rebuilds.
    pub fn build_directive(&self) -> String {
        cstr_to_string(unsafe { (self.get_build_directive)() })
    }

    /// Path of the cache copy this handle opened.
    pub fn cache_path(&self) -> &Path {
        self.library.path()
    }

    #[cfg(test)]
    pub(crate) fn fake(library: SharedLibrary) -> Arc<Self> {
        extern "C" fn revision() -> *const c_char {
            c"0123456789abcdef".as_ptr()
        }
        extern "C" fn add_scripts() {}
        extern "C" fn name() -> *const c_char {
            c"fake".as_ptr()
        }
        extern "C" fn directive() -> *const c_char {
            c"Release".as_ptr()
        }
        Arc::new(Self {
            library,
            get_revision_hash: revision,
            add_scripts,
            get_module_name: name,
            get_build_directive: directive,
        })
    }
}

/// Emit the four C ABI entry points a script-module crate must export.
///
/// # Example
///
/// ```ignore
/// fn add_scripts() {
///     // register script bindings with the current context
/// }
///
/// script_hotswap::export_script_module! {
///     name: "demo",
///     revision: "0123456789abcdef",
///     build_directive: "Release",
///     add_scripts: add_scripts,
/// }
/// ```
#[macro_export]
macro_rules! export_script_module {
    {
        name: $name:literal,
        revision: $revision:literal,
        build_directive: $directive:literal,
        add_scripts: $add:path $(,)?
    } => {
        #[unsafe(no_mangle)]
        #[allow(non_snake_case)]
        pub extern "C" fn GetScriptModuleRevisionHash() -> *const ::core::ffi::c_char {
            ::core::concat!($revision, "\0").as_ptr().cast()
        }

        #[unsafe(no_mangle)]
        #[allow(non_snake_case)]
        pub extern "C" fn AddScripts() {
            let add: fn() = $add;
            add();
        }

        #[unsafe(no_mangle)]
        #[allow(non_snake_case)]
        pub extern "C" fn GetScriptModule() -> *const ::core::ffi::c_char {
            ::core::concat!($name, "\0").as_ptr().cast()
        }

        #[unsafe(no_mangle)]
        #[allow(non_snake_case)]
        pub extern "C" fn GetBuildDirective() -> *const ::core::ffi::c_char {
            ::core::concat!($directive, "\0").as_ptr().cast()
        }
    };
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn cache_names_are_unique_per_counter() {
        let artifact = PathBuf::from("/scripts/libscripts_demo.so");
        assert_eq!(cache_file_name(&artifact, 0), "libscripts_demo.0.so");
        assert_eq!(cache_file_name(&artifact, 7), "libscripts_demo.7.so");

        let windows = PathBuf::from("scripts_demo.dll");
        assert_eq!(cache_file_name(&windows, 3), "scripts_demo.3.dll");
    }

    #[test]
    fn revision_comparison_requires_seven_characters() {
        assert!(revision_matches("0123456789abcdef", "0123456789abcdef"));
        // Shorter side wins the trim
        assert!(revision_matches("0123456789abcdef", "0123456"));
        assert!(!revision_matches("0123456789abcdef", "0123457"));
        // Below the minimum everything is rejected
        assert!(!revision_matches("012345", "012345"));
        assert!(!revision_matches("0123456789abcdef", ""));
    }

    #[test]
    fn load_refuses_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("libscripts_demo.so");
        let result = ScriptModule::load(&artifact, dir.path(), 0);
        assert!(matches!(result, Err(HotSwapError::CacheCopy { .. })));
    }

    #[test]
    fn load_refuses_existing_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("libscripts_demo.so");
        std::fs::write(&artifact, b"not a real library").unwrap();
        std::fs::write(dir.path().join("libscripts_demo.0.so"), b"stale").unwrap();

        let result = ScriptModule::load(&artifact, dir.path(), 0);
        assert!(matches!(result, Err(HotSwapError::CacheCopy { .. })));
    }

    #[test]
    fn failed_open_removes_cache_copy() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("libscripts_demo.so");
        std::fs::write(&artifact, b"not a real library").unwrap();

        let result = ScriptModule::load(&artifact, dir.path(), 0);
        assert!(result.is_err());
        assert!(!dir.path().join("libscripts_demo.0.so").exists());
        // The artifact itself is untouched
        assert!(artifact.exists());
    }

    mod exported {
        fn add_scripts() {}

        crate::export_script_module! {
            name: "demo",
            revision: "0123456789abcdef",
            build_directive: "Release",
            add_scripts: add_scripts,
        }
    }

    #[test]
    fn export_macro_emits_readable_strings() {
        let name = cstr_to_string(exported::GetScriptModule());
        assert_eq!(name, "demo");
        let revision = cstr_to_string(exported::GetScriptModuleRevisionHash());
        assert_eq!(revision, "0123456789abcdef");
        let directive = cstr_to_string(exported::GetBuildDirective());
        assert_eq!(directive, "Release");
        exported::AddScripts();
    }
}
