use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for the hot-swap manager.
///
/// The embedding application supplies this once when constructing the
/// [`ReloadManager`](crate::ReloadManager); all paths may be relative and
/// are resolved to absolute paths during initialization.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HotSwapConfig {
    /// Master switch. When false the manager is a complete no-op.
    pub enabled: bool,
    /// Watch the source tree and recompile changed modules.
    pub recompiler_enabled: bool,
    /// Run the install step after a successful compile.
    pub install_enabled: bool,
    /// Patch a stale CMAKE_INSTALL_PREFIX in the build cache on startup.
    pub prefix_correction_enabled: bool,
    /// Directory containing the compiled module artifacts.
    pub script_dir: PathBuf,
    /// Build-directive override. When unset, the directive reported by
    /// the module itself is used for rebuilds.
    pub build_type: Option<String>,
    /// The external build tree (where the build driver operates).
    pub build_dir: PathBuf,
    /// Root of the module source tree watched for recompilation.
    pub source_dir: PathBuf,
    /// Path of the external build driver executable.
    pub build_command: PathBuf,
    /// Revision hash of the host, compared against each module's.
    pub host_revision: String,
    /// Quiescence window for event debouncing, in milliseconds.
    pub quiescence_ms: u64,
    /// Bounded wait per update tick for a running build job, in milliseconds.
    pub build_poll_ms: u64,
}

impl Default for HotSwapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recompiler_enabled: true,
            install_enabled: true,
            prefix_correction_enabled: false,
            script_dir: PathBuf::from("scripts"),
            build_type: None,
            build_dir: PathBuf::from("."),
            source_dir: PathBuf::from("src/scripts"),
            build_command: PathBuf::from("cmake"),
            host_revision: String::new(),
            quiescence_ms: 1000,
            build_poll_ms: 3000,
        }
    }
}

impl HotSwapConfig {
    pub(crate) fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    pub(crate) fn build_poll(&self) -> Duration {
        Duration::from_millis(self.build_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference() {
        let config = HotSwapConfig::default();
        assert!(config.enabled);
        assert!(config.recompiler_enabled);
        assert!(!config.prefix_correction_enabled);
        assert_eq!(config.script_dir, PathBuf::from("scripts"));
        assert_eq!(config.build_type, None);
        assert_eq!(config.quiescence(), Duration::from_millis(1000));
        assert_eq!(config.build_poll(), Duration::from_millis(3000));
    }

    #[test]
    fn deserializes_partial_config() {
        let config: HotSwapConfig = serde_json::from_str(
            r#"{ "enabled": true, "script_dir": "modules", "build_type": "Release" }"#,
        )
        .unwrap();
        assert_eq!(config.script_dir, PathBuf::from("modules"));
        assert_eq!(config.build_type.as_deref(), Some("Release"));
        assert!(config.install_enabled);
    }
}
