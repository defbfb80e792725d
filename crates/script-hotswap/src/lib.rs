//! Hot-swap manager for dynamically loaded script modules
//!
//! This crate lets a long-running server recompile, reload and
//! atomically swap native script modules without restarting. It watches
//! the artifact directory for new or changed shared libraries, watches
//! the module source tree to drive rebuilds through an external build
//! driver, and hands out stable references to loaded modules.
//!
//! # Module Interface
//!
//! Each module artifact must export these C ABI symbols:
//! - `GetScriptModuleRevisionHash() -> *const c_char` - Source revision of the module
//! - `AddScripts()` - Registers all scripts under the current context
//! - `GetScriptModule() -> *const c_char` - Logical module name
//! - `GetBuildDirective() -> *const c_char` - Build configuration used for rebuilds
//!
//! Use the [`export_script_module!`] macro to emit all four.
//!
//! # Driving the manager
//!
//! ```ignore
//! let mut manager = ReloadManager::new(config, registry);
//! manager.initialize()?;
//! loop {
//!     manager.update();
//!     // ... rest of the server tick
//! }
//! manager.unload();
//! ```
//!
//! # Safety
//!
//! Modules are trusted code. The loader assumes every artifact exports
//! the interface above with C linkage; nothing is sandboxed.

mod config;
mod error;
mod library;
mod manager;
mod module;
mod prefix;
mod recompiler;
mod registry;
mod source;
mod watcher;

pub use config::HotSwapConfig;
pub use error::HotSwapError;
pub use library::is_module_artifact;
pub use manager::ReloadManager;
pub use module::{
    AddScriptsFn, GetBuildDirectiveFn, GetScriptModuleFn, GetScriptModuleRevisionHashFn,
    ScriptModule,
};

/// The external script registry the manager swaps contexts on.
///
/// Scripts registered by a module's `AddScripts` are attributed to the
/// current context (the module's logical name), which allows releasing
/// them in bulk when the module is unloaded.
pub trait ScriptRegistry: Send + Sync {
    /// Set the context newly registered scripts are attributed to.
    fn set_context(&self, context: &str);

    /// Make all scripts registered since the last swap live.
    fn swap_context(&self);

    /// Release every script attributed to `context`.
    fn release_context(&self, context: &str);
}
