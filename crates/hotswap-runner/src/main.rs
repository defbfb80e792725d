//! Generic host binary for the script hot-swap manager.
//!
//! Reads an optional JSON config file (first argument), then drives the
//! reload manager at a fixed tick rate until Ctrl-C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use script_hotswap::{HotSwapConfig, ReloadManager, ScriptRegistry};
use tracing::{debug, info};

/// Minimal in-process script registry: tracks the attribution context
/// and logs context transitions.
#[derive(Default)]
struct ContextRegistry {
    current: Mutex<Option<String>>,
}

impl ScriptRegistry for ContextRegistry {
    fn set_context(&self, context: &str) {
        debug!(target: "scripts.hotswap", "Script context set to \"{}\"", context);
        *self.current.lock() = Some(context.to_owned());
    }

    fn swap_context(&self) {
        if let Some(context) = self.current.lock().take() {
            info!(target: "scripts.hotswap", "Scripts of \"{}\" are now live", context);
        }
    }

    fn release_context(&self, context: &str) {
        info!(target: "scripts.hotswap", "Released scripts of \"{}\"", context);
    }
}

fn load_config() -> eyre::Result<HotSwapConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&content)?)
        }
        None => Ok(HotSwapConfig::default()),
    }
}

fn main() -> eyre::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hotswap_runner=info".parse()?)
                .add_directive("scripts.hotswap=info".parse()?),
        )
        .init();

    let config = load_config()?;
    info!("Starting hot-swap host (script dir: {})", config.script_dir.display());

    let registry = Arc::new(ContextRegistry::default());
    let mut manager = ReloadManager::new(config, registry);
    manager.initialize()?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })?;
    }

    info!("Hot-swap host running; press Ctrl-C to stop");

    while running.load(Ordering::SeqCst) {
        manager.update();
        std::thread::sleep(Duration::from_millis(50));
    }

    info!("Shutting down, waiting for in-flight builds...");
    manager.unload();

    Ok(())
}
