//! Source-tree watcher: maps changed C/C++ files back to the module
//! that owns them and queues that module for recompilation.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{info, trace, warn};

use crate::error::HotSwapError;

const SOURCE_EXTENSIONS: &[&str] = &["h", "hpp", "c", "cc", "cpp"];

/// Tracked module names, the changed-modules set and the source
/// debounce clock, shared between the watcher callback thread, the
/// manager and the recompiler.
#[derive(Default)]
pub(crate) struct SourceEvents {
    tracked: Mutex<HashSet<String>>,
    changed: Mutex<BTreeSet<String>>,
    last_event: Mutex<Option<Instant>>,
}

impl SourceEvents {
    pub(crate) fn track(&self, module: &str) {
        self.tracked.lock().insert(module.to_owned());
    }

    pub(crate) fn untrack(&self, module: &str) {
        self.tracked.lock().remove(module);
    }

    pub(crate) fn is_tracked(&self, module: &str) -> bool {
        self.tracked.lock().contains(module)
    }

    /// Queue `module` for a rebuild and bump the debounce clock.
    pub(crate) fn mark_changed(&self, module: &str) {
        self.changed.lock().insert(module.to_owned());
        *self.last_event.lock() = Some(Instant::now());
    }

    /// Whether no source event arrived within the last `window`.
    pub(crate) fn quiet_for(&self, window: Duration) -> bool {
        self.last_event
            .lock()
            .is_none_or(|at| at.elapsed() >= window)
    }

    /// Pop one changed module; only one is compiled per build cycle.
    /// Resets the debounce clock.
    pub(crate) fn pop_changed(&self) -> Option<String> {
        let module = self.changed.lock().pop_first()?;
        *self.last_event.lock() = None;
        Some(module)
    }
}

/// Resolve a source-file event to the name of the module owning it.
///
/// The module name is the top-level directory under `root` containing
/// the file; events for files directly under `root`, for non-source
/// extensions, or for paths outside `root` resolve to `None`.
pub(crate) fn owning_module(root: &Path, path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?;
    if !SOURCE_EXTENSIONS.contains(&extension) {
        return None;
    }

    let relative = path.strip_prefix(root).ok()?;
    let first = relative.components().next()?;
    let top_level = root.join(first);
    if top_level == path || !top_level.is_dir() {
        return None;
    }

    top_level
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
}

fn handle_source_path(root: &Path, path: &Path, events: &SourceEvents) {
    let Some(module) = owning_module(root, path) else {
        return;
    };

    if !events.is_tracked(&module) {
        trace!(
            target: "scripts.hotswap",
            "File {} (Module \"{}\") doesn't belong to an observed module, skipped!",
            path.display(),
            module
        );
        return;
    }

    trace!(
        target: "scripts.hotswap",
        "Detected source change on module \"{}\", queued for recompilation...",
        module
    );
    events.mark_changed(&module);
}

/// Watches the module source tree recursively. Dropping it stops the
/// watch.
pub(crate) struct SourceWatcher {
    _watcher: RecommendedWatcher,
}

impl SourceWatcher {
    pub(crate) fn start(root: &Path, events: Arc<SourceEvents>) -> Result<Self, HotSwapError> {
        let watched_root = root.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    for path in &event.paths {
                        handle_source_path(&watched_root, path, &events);
                    }
                }
                Err(e) => warn!(target: "scripts.hotswap", "Source watch error: {}", e),
            },
            notify::Config::default(),
        )?;

        watcher.watch(root, RecursiveMode::Recursive)?;

        info!(
            target: "scripts.hotswap",
            ">> Source recompiler is recursively listening on \"{}\".",
            root.display()
        );

        Ok(Self { _watcher: watcher })
    }
}
