//! Integration tests driving the reload manager against a real watched
//! directory. No test here needs an actual loadable library; everything
//! is exercised up to the load boundary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use script_hotswap::{HotSwapConfig, ReloadManager, ScriptRegistry};

struct NullRegistry;

impl ScriptRegistry for NullRegistry {
    fn set_context(&self, _context: &str) {}
    fn swap_context(&self) {}
    fn release_context(&self, _context: &str) {}
}

fn test_config(scripts: PathBuf) -> HotSwapConfig {
    HotSwapConfig {
        script_dir: scripts,
        recompiler_enabled: false,
        prefix_correction_enabled: false,
        quiescence_ms: 50,
        ..HotSwapConfig::default()
    }
}

/// Tick the manager for a while so debounce windows elapse and watcher
/// events are picked up.
fn settle(manager: &mut ReloadManager) {
    for _ in 0..20 {
        std::thread::sleep(Duration::from_millis(100));
        manager.update();
    }
}

#[test]
fn files_outside_the_module_pattern_are_never_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = dir.path().join("scripts");
    std::fs::create_dir_all(&scripts).unwrap();
    // Present before startup
    std::fs::write(scripts.join("notscripts.so"), b"ignored").unwrap();
    std::fs::write(scripts.join("README.md"), b"ignored").unwrap();

    let mut manager = ReloadManager::new(test_config(scripts.clone()), Arc::new(NullRegistry));
    manager.initialize().unwrap();
    assert!(manager.loaded_modules().is_empty());

    // Dropped in while watching
    std::fs::write(scripts.join("libscripts.so"), b"ignored").unwrap();
    std::fs::write(scripts.join("scripts_demo.txt"), b"ignored").unwrap();
    settle(&mut manager);

    assert!(manager.loaded_modules().is_empty());
    // Nothing was copied into the cache either
    let cache_entries = std::fs::read_dir(scripts.join(".cache")).unwrap().count();
    assert_eq!(cache_entries, 0);

    manager.unload();
}

#[test]
fn broken_artifacts_are_attempted_and_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = dir.path().join("scripts");
    std::fs::create_dir_all(&scripts).unwrap();

    let mut manager = ReloadManager::new(test_config(scripts.clone()), Arc::new(NullRegistry));
    manager.initialize().unwrap();

    // Matches the pattern but exports nothing; the load attempt must
    // fail and remove its cache copy again.
    std::fs::write(scripts.join("libscripts_bad.so"), b"not an elf").unwrap();
    settle(&mut manager);

    assert!(manager.loaded_modules().is_empty());
    assert!(manager.module_reference("bad").is_none());
    let cache_entries = std::fs::read_dir(scripts.join(".cache")).unwrap().count();
    assert_eq!(cache_entries, 0);

    // Deleting it again must not disturb anything
    std::fs::remove_file(scripts.join("libscripts_bad.so")).unwrap();
    settle(&mut manager);
    assert!(manager.loaded_modules().is_empty());

    manager.unload();
}

#[test]
fn unload_stops_the_watchers() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = dir.path().join("scripts");
    std::fs::create_dir_all(&scripts).unwrap();

    let mut manager = ReloadManager::new(test_config(scripts.clone()), Arc::new(NullRegistry));
    manager.initialize().unwrap();
    manager.unload();

    // Events arriving after unload are not dispatched
    std::fs::write(scripts.join("libscripts_late.so"), b"ignored").unwrap();
    settle(&mut manager);
    assert!(manager.loaded_modules().is_empty());
}
