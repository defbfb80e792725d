//! Artifact-directory watcher: classifies file events into load,
//! reload and unload intents and coalesces them per path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{error, info, trace, warn};

use crate::error::HotSwapError;
use crate::library::is_module_artifact;

/// Terminal operation scheduled for an artifact path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModuleIntent {
    Load,
    Reload,
    Unload,
}

/// A filesystem action reduced to the four cases the classifier knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FileAction {
    Add(PathBuf),
    Modify(PathBuf),
    Delete(PathBuf),
    Move { from: PathBuf, to: PathBuf },
}

/// Pending intents plus the debounce clock, shared between the watcher
/// callback thread and the manager's update loop.
#[derive(Default)]
pub(crate) struct LibraryEvents {
    intents: Mutex<HashMap<PathBuf, ModuleIntent>>,
    last_event: Mutex<Option<Instant>>,
}

impl LibraryEvents {
    /// Record an intent for `path`, overwriting any pending one
    /// (last-writer-wins), and bump the debounce clock.
    pub(crate) fn push(&self, path: PathBuf, intent: ModuleIntent) {
        *self.last_event.lock() = Some(Instant::now());
        self.intents.lock().insert(path, intent);
    }

    /// Whether no event arrived within the last `window`.
    pub(crate) fn quiet_for(&self, window: Duration) -> bool {
        self.last_event
            .lock()
            .is_none_or(|at| at.elapsed() >= window)
    }

    /// Take all pending intents. The clock is reset when anything was
    /// drained so the next burst starts a fresh window.
    pub(crate) fn drain(&self) -> HashMap<PathBuf, ModuleIntent> {
        let drained = std::mem::take(&mut *self.intents.lock());
        if !drained.is_empty() {
            *self.last_event.lock() = None;
        }
        drained
    }
}

/// Collapse a raw notify event into [`FileAction`]s.
pub(crate) fn map_event(event: &Event) -> Vec<FileAction> {
    match event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(FileAction::Add).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(FileAction::Delete).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                vec![FileAction::Move {
                    from: from.clone(),
                    to: to.clone(),
                }]
            } else {
                event.paths.iter().cloned().map(FileAction::Modify).collect()
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().cloned().map(FileAction::Delete).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().cloned().map(FileAction::Add).collect()
        }
        EventKind::Modify(_) => event.paths.iter().cloned().map(FileAction::Modify).collect(),
        _ => Vec::new(),
    }
}

fn matches_pattern(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(is_module_artifact)
}

/// Classify one action into the intents it schedules.
pub(crate) fn classify(action: FileAction) -> Vec<(PathBuf, ModuleIntent)> {
    match action {
        FileAction::Add(path) if matches_pattern(&path) => vec![(path, ModuleIntent::Load)],
        FileAction::Modify(path) if matches_pattern(&path) => vec![(path, ModuleIntent::Reload)],
        FileAction::Delete(path) if matches_pattern(&path) => vec![(path, ModuleIntent::Unload)],
        FileAction::Move { from, to } => {
            let mut intents = Vec::new();
            if matches_pattern(&from) {
                intents.push((from, ModuleIntent::Unload));
            }
            if matches_pattern(&to) {
                intents.push((to, ModuleIntent::Load));
            }
            intents
        }
        _ => Vec::new(),
    }
}

/// Watches the artifact directory. Dropping it stops the watch.
pub(crate) struct LibraryWatcher {
    _watcher: RecommendedWatcher,
}

impl LibraryWatcher {
    pub(crate) fn start(
        directory: &Path,
        events: Arc<LibraryEvents>,
    ) -> Result<Self, HotSwapError> {
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    for action in map_event(&event) {
                        trace!(
                            target: "scripts.hotswap",
                            "Library listener detected change: {:?}",
                            action
                        );
                        for (path, intent) in classify(action) {
                            events.push(path, intent);
                        }
                    }
                }
                Err(e) => warn!(target: "scripts.hotswap", "Library watch error: {}", e),
            },
            notify::Config::default(),
        )?;

        if let Err(e) = watcher.watch(directory, RecursiveMode::NonRecursive) {
            error!(
                target: "scripts.hotswap",
                "Failed to initialize the library reloader on \"{}\".",
                directory.display()
            );
            return Err(e.into());
        }

        info!(
            target: "scripts.hotswap",
            ">> Library reloader is listening on \"{}\".",
            directory.display()
        );

        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use notify::event::CreateKind;

    use super::*;

    fn lib(name: &str) -> PathBuf {
        PathBuf::from("/scripts").join(name)
    }

    #[test]
    fn add_modify_delete_of_recognized_names() {
        assert_eq!(
            classify(FileAction::Add(lib("libscripts_demo.so"))),
            vec![(lib("libscripts_demo.so"), ModuleIntent::Load)]
        );
        assert_eq!(
            classify(FileAction::Modify(lib("libscripts_demo.so"))),
            vec![(lib("libscripts_demo.so"), ModuleIntent::Reload)]
        );
        assert_eq!(
            classify(FileAction::Delete(lib("libscripts_demo.so"))),
            vec![(lib("libscripts_demo.so"), ModuleIntent::Unload)]
        );
    }

    #[test]
    fn unrecognized_names_are_ignored() {
        assert!(classify(FileAction::Add(lib("notscripts.so"))).is_empty());
        assert!(classify(FileAction::Modify(lib("libscripts_demo.txt"))).is_empty());
        assert!(classify(FileAction::Delete(lib("readme.md"))).is_empty());
        assert!(
            classify(FileAction::Move {
                from: lib("a.tmp"),
                to: lib("b.tmp"),
            })
            .is_empty()
        );
    }

    #[test]
    fn moves_split_into_unload_and_load() {
        // recognized -> recognized
        assert_eq!(
            classify(FileAction::Move {
                from: lib("libscripts_a.so"),
                to: lib("libscripts_b.so"),
            }),
            vec![
                (lib("libscripts_a.so"), ModuleIntent::Unload),
                (lib("libscripts_b.so"), ModuleIntent::Load),
            ]
        );
        // recognized -> unrecognized
        assert_eq!(
            classify(FileAction::Move {
                from: lib("libscripts_a.so"),
                to: lib("notscripts.so"),
            }),
            vec![(lib("libscripts_a.so"), ModuleIntent::Unload)]
        );
        // unrecognized -> recognized
        assert_eq!(
            classify(FileAction::Move {
                from: lib("notscripts.so"),
                to: lib("libscripts_b.so"),
            }),
            vec![(lib("libscripts_b.so"), ModuleIntent::Load)]
        );
    }

    #[test]
    fn rename_events_map_to_moves() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(lib("libscripts_a.so"))
            .add_path(lib("libscripts_b.so"));
        assert_eq!(
            map_event(&event),
            vec![FileAction::Move {
                from: lib("libscripts_a.so"),
                to: lib("libscripts_b.so"),
            }]
        );

        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(lib("libscripts_a.so"));
        assert_eq!(map_event(&event), vec![FileAction::Add(lib("libscripts_a.so"))]);
    }

    #[test]
    fn later_intents_overwrite_earlier_ones() {
        let events = LibraryEvents::default();
        events.push(lib("libscripts_demo.so"), ModuleIntent::Load);
        events.push(lib("libscripts_demo.so"), ModuleIntent::Unload);
        events.push(lib("libscripts_other.so"), ModuleIntent::Reload);

        let drained = events.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(
            drained.get(&lib("libscripts_demo.so")),
            Some(&ModuleIntent::Unload)
        );
        assert_eq!(
            drained.get(&lib("libscripts_other.so")),
            Some(&ModuleIntent::Reload)
        );
    }

    #[test]
    fn pushing_the_same_intent_twice_equals_once() {
        let events = LibraryEvents::default();
        events.push(lib("libscripts_demo.so"), ModuleIntent::Reload);
        events.push(lib("libscripts_demo.so"), ModuleIntent::Reload);
        assert_eq!(events.drain().len(), 1);
    }

    #[test]
    fn drain_resets_the_debounce_clock() {
        let events = LibraryEvents::default();
        assert!(events.quiet_for(Duration::from_secs(3600)));

        events.push(lib("libscripts_demo.so"), ModuleIntent::Load);
        assert!(!events.quiet_for(Duration::from_secs(3600)));
        assert!(events.quiet_for(Duration::ZERO));

        events.drain();
        assert!(events.quiet_for(Duration::from_secs(3600)));
        // A drain with nothing pending leaves the clock alone
        assert!(events.drain().is_empty());
    }
}
