//! The reload manager: drives module loads, unloads, reloads and
//! rebuilds from its owner's update loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::ScriptRegistry;
use crate::config::HotSwapConfig;
use crate::error::HotSwapError;
use crate::library::is_module_artifact;
use crate::module::{ScriptModule, revision_matches};
use crate::prefix::correct_install_prefix;
use crate::recompiler::Recompiler;
use crate::registry::ModuleRegistry;
use crate::source::{SourceEvents, SourceWatcher};
use crate::watcher::{LibraryEvents, LibraryWatcher, ModuleIntent};

/// Owns the watchers, the registry and the build pipeline.
///
/// All three public operations run on the caller's thread; the watcher
/// callbacks and the build worker only touch the shared intent and
/// changed-modules state behind short-lived locks.
pub struct ReloadManager {
    config: HotSwapConfig,
    scripts: Arc<dyn ScriptRegistry>,
    registry: ModuleRegistry,
    library_events: Arc<LibraryEvents>,
    source_events: Arc<SourceEvents>,
    recompiler: Recompiler,
    library_watcher: Option<LibraryWatcher>,
    source_watcher: Option<SourceWatcher>,
    library_directory: PathBuf,
    cache_directory: PathBuf,
    library_counter: u32,
    initialized: bool,
}

impl ReloadManager {
    pub fn new(config: HotSwapConfig, scripts: Arc<dyn ScriptRegistry>) -> Self {
        let recompiler = Recompiler::new(&config);
        Self {
            config,
            scripts,
            registry: ModuleRegistry::default(),
            library_events: Arc::new(LibraryEvents::default()),
            source_events: Arc::new(SourceEvents::default()),
            recompiler,
            library_watcher: None,
            source_watcher: None,
            library_directory: PathBuf::new(),
            cache_directory: PathBuf::new(),
            library_counter: 0,
            initialized: false,
        }
    }

    /// Load every artifact already present in the script directory and
    /// start both watchers. A no-op when hot-swap is disabled.
    pub fn initialize(&mut self) -> Result<(), HotSwapError> {
        if !self.config.enabled {
            return Ok(());
        }

        let library_directory = std::path::absolute(&self.config.script_dir)?;
        if !library_directory.is_dir() {
            error!(
                target: "scripts.hotswap",
                "Library directory \"{}\" doesn't exist!",
                library_directory.display()
            );
            return Err(HotSwapError::MissingLibraryDirectory(library_directory));
        }
        self.library_directory = library_directory;

        // Recreate the cache so no copy from a previous run survives
        let cache_directory = self.library_directory.join(".cache");
        if cache_directory.exists() {
            std::fs::remove_dir_all(&cache_directory)?;
        }
        std::fs::create_dir(&cache_directory)?;
        self.cache_directory = cache_directory;

        if self.config.prefix_correction_enabled {
            correct_install_prefix(&self.config.build_dir, &self.config.build_command);
        }

        self.load_existing_libraries()?;

        self.library_watcher = Some(LibraryWatcher::start(
            &self.library_directory,
            Arc::clone(&self.library_events),
        )?);

        if self.config.recompiler_enabled {
            let source_directory = std::path::absolute(&self.config.source_dir)?;
            // The recompiler is an optional extra; a missing source
            // tree must not take the library reloader down with it.
            match SourceWatcher::start(&source_directory, Arc::clone(&self.source_events)) {
                Ok(watcher) => self.source_watcher = Some(watcher),
                Err(e) => error!(
                    target: "scripts.hotswap",
                    "Failed to initialize the script reloader on \"{}\": {}",
                    source_directory.display(),
                    e
                ),
            }
        }

        self.initialized = true;
        Ok(())
    }

    /// Advance the build pipeline, then apply all debounced module
    /// changes.
    pub fn update(&mut self) {
        if !self.initialized {
            return;
        }

        self.recompiler.update(&self.source_events);
        self.dispatch_module_changes();
    }

    /// Stop watching, wait out an in-flight build job and drop the
    /// registry. External references keep their modules alive.
    pub fn unload(&mut self) {
        self.library_watcher = None;
        self.source_watcher = None;

        // If a build is in progress wait for it to finish
        self.recompiler.wait();

        self.registry.clear();
        self.initialized = false;
    }

    /// Stable shared reference to the module registered under
    /// `context`, or `None`. The reference stays valid after the module
    /// is unloaded from the registry.
    pub fn module_reference(&self, context: &str) -> Option<Arc<ScriptModule>> {
        self.registry.get(context)
    }

    /// Names of all currently live modules.
    pub fn loaded_modules(&self) -> Vec<String> {
        self.registry.names()
    }

    fn load_existing_libraries(&mut self) -> Result<(), HotSwapError> {
        let mut count = 0u32;

        for entry in std::fs::read_dir(&self.library_directory)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if path.is_file() && is_module_artifact(name) {
                info!(target: "scripts.hotswap", ">> Loading script module \"{}\"...", name);
                // Don't swap the script context to do bulk loading
                self.process_load(&path, false);
                count += 1;
            }
        }

        self.scripts.swap_context();

        info!(target: "scripts.hotswap", "Loaded {} script modules.", count);
        Ok(())
    }

    fn dispatch_module_changes(&mut self) {
        let window = self.config.quiescence();
        if !self.library_events.quiet_for(window) {
            return;
        }
        // Defer while sources are still settling so a half-written
        // artifact is not picked up mid-build.
        if !self.source_events.quiet_for(window) {
            return;
        }

        for (path, intent) in self.library_events.drain() {
            match intent {
                ModuleIntent::Load => self.process_load(&path, true),
                ModuleIntent::Reload => self.process_reload(&path),
                ModuleIntent::Unload => self.process_unload(&path, true),
            }
        }
    }

    fn process_load(&mut self, path: &Path, swap_context: bool) {
        if self.registry.contains_path(path) {
            debug_assert!(
                false,
                "attempt to load \"{}\" which is already registered",
                path.display()
            );
            error!(
                target: "scripts.hotswap",
                "Attempt to load \"{}\" which is already registered!",
                path.display()
            );
            return;
        }

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Unique cache name for each load of the same artifact
        let counter = self.library_counter;
        self.library_counter += 1;

        let module = match ScriptModule::load(path, &self.cache_directory, counter) {
            Ok(module) => module,
            Err(e) => {
                error!(
                    target: "scripts.hotswap",
                    "Failed to load the script module \"{}\": {}",
                    filename,
                    e
                );
                return;
            }
        };

        let module_name = module.module_name();
        let module_revision = module.revision_hash();
        let display_revision: String = module_revision.chars().take(7).collect();

        info!(
            target: "scripts.hotswap",
            "Loaded script module \"{}\" (\"{}\" - {})...",
            filename,
            module_name,
            display_revision
        );

        if module_revision.is_empty() {
            warn!(
                target: "scripts.hotswap",
                "Script module \"{}\" has an empty revision hash!",
                filename
            );
        } else if !revision_matches(&self.config.host_revision, &module_revision) {
            warn!(
                target: "scripts.hotswap",
                "Script module \"{}\" has a different revision hash! \
                 Binary incompatibility could lead to unknown behaviour!",
                filename
            );
        }

        if let Some(loaded) = self.registry.get(&module_name) {
            error!(
                target: "scripts.hotswap",
                "Attempt to load a module twice \"{}\" (loaded module is at {})!",
                path.display(),
                loaded.cache_path().display()
            );
            // Dropping the rejected handle closes it and removes its
            // cache copy.
            return;
        }

        let directive = module.build_directive();

        self.scripts.set_context(&module_name);
        debug!(target: "scripts.hotswap", "Loading scripts of module {}...", module_name);
        module.add_scripts();

        if swap_context {
            self.scripts.swap_context();
        }

        self.source_events.track(&module_name);
        self.recompiler.record_directive(&module_name, directive);

        if let Err(e) = self.registry.insert(path, module_name, module) {
            error!(target: "scripts.hotswap", "Failed to register module: {}", e);
        }
    }

    fn process_reload(&mut self, path: &Path) {
        self.process_unload(path, false);
        self.process_load(path, true);
    }

    fn process_unload(&mut self, path: &Path, finish: bool) {
        let Some(name) = self.registry.name_of(path).map(str::to_owned) else {
            return;
        };

        self.scripts.release_context(&name);
        if finish {
            self.scripts.swap_context();
        }

        self.source_events.untrack(&name);

        info!(
            target: "scripts.hotswap",
            "Released script module \"{}\" (\"{}\")...",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            name
        );

        // The library itself may stay loaded behind external references
        self.registry.remove(path);
    }
}
