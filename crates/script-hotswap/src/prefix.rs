//! One-shot correction of a stale CMAKE_INSTALL_PREFIX in the external
//! build cache. Every failure mode here is soft.

use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::recompiler::run_streaming;

const PREFIX_KEY: &str = "CMAKE_INSTALL_PREFIX:PATH=";

/// Extract the install-prefix value from the build-cache content.
pub(crate) fn extract_install_prefix(cache_content: &str) -> Option<&str> {
    let begin = cache_content.find(PREFIX_KEY)? + PREFIX_KEY.len();
    let value = cache_content[begin..]
        .split('\n')
        .next()
        .unwrap_or_default();
    Some(value.trim_end_matches('\r'))
}

/// Whether `path` is `ancestor` or lies below it, walking `path`
/// upwards component by component.
pub(crate) fn is_descendant(path: &Path, ancestor: &Path) -> bool {
    let mut branch = Some(path);
    while let Some(current) = branch {
        if current == ancestor {
            return true;
        }
        branch = current.parent();
    }
    false
}

/// Patch the install prefix in `<build_dir>/CMakeCache.txt` to the
/// current working directory, unless it already points there or the
/// build directory lives below the recorded prefix.
pub(crate) fn correct_install_prefix(build_dir: &Path, build_command: &Path) {
    let cache = build_dir.join("CMakeCache.txt");
    if !cache.exists() {
        error!(
            target: "scripts.hotswap",
            "CMake cache \"{}\" doesn't exist!",
            cache.display()
        );
        return;
    }

    info!(
        target: "scripts.hotswap",
        "Checking CMake cache (\"{}\") for the correct CMAKE_INSTALL_PREFIX location...",
        cache.display()
    );

    let content = match std::fs::read_to_string(&cache) {
        Ok(content) => content,
        Err(e) => {
            error!(
                target: "scripts.hotswap",
                "Failed to open the CMake cache \"{}\" for reading: {}",
                cache.display(),
                e
            );
            return;
        }
    };

    let current = match std::env::current_dir() {
        Ok(current) => current,
        Err(e) => {
            error!(
                target: "scripts.hotswap",
                "Failed to resolve the current working directory: {}",
                e
            );
            return;
        }
    };

    if let Some(value) = extract_install_prefix(&content) {
        let value = PathBuf::from(value);
        if value == current {
            info!(
                target: "scripts.hotswap",
                "CMAKE_INSTALL_PREFIX is equal to the current path of execution, skipped."
            );
            return;
        }

        // Leave the prefix alone when running from inside the install tree
        if is_descendant(build_dir, &value) {
            return;
        }

        info!(
            target: "scripts.hotswap",
            "Found outdated CMAKE_INSTALL_PREFIX (\"{}\")...",
            value.display()
        );
    }

    info!(target: "scripts.hotswap", "Invoking CMake cache correction...");

    let args = vec![
        format!("-DCMAKE_INSTALL_PREFIX:PATH={}", current.display()).into(),
        build_dir.into(),
    ];

    let failed = match run_streaming(build_command, &args) {
        Ok(status) => !status.success(),
        Err(_) => true,
    };
    if failed {
        error!(
            target: "scripts.hotswap",
            "Failed to update the CMAKE_INSTALL_PREFIX! This could lead to unexpected behaviour!"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_the_prefix_value() {
        let cache = "SOME_KEY:BOOL=ON\nCMAKE_INSTALL_PREFIX:PATH=/opt/server\nOTHER:STRING=x\n";
        assert_eq!(extract_install_prefix(cache), Some("/opt/server"));
    }

    #[test]
    fn extracts_a_value_at_end_of_file() {
        let cache = "CMAKE_INSTALL_PREFIX:PATH=/opt/server";
        assert_eq!(extract_install_prefix(cache), Some("/opt/server"));
    }

    #[test]
    fn handles_windows_line_endings() {
        let cache = "CMAKE_INSTALL_PREFIX:PATH=C:/server\r\nOTHER:BOOL=ON\r\n";
        assert_eq!(extract_install_prefix(cache), Some("C:/server"));
    }

    #[test]
    fn missing_key_yields_none() {
        assert_eq!(extract_install_prefix("OTHER:BOOL=ON\n"), None);
    }

    #[test]
    fn descendant_walks_up_to_the_ancestor() {
        assert!(is_descendant(Path::new("/opt/server/build"), Path::new("/opt/server")));
        assert!(is_descendant(Path::new("/opt/server"), Path::new("/opt/server")));
        assert!(!is_descendant(Path::new("/opt/server"), Path::new("/opt/server/build")));
        assert!(!is_descendant(Path::new("/srv/build"), Path::new("/opt/server")));
    }

    #[test]
    #[cfg(unix)]
    fn missing_cache_is_soft() {
        let dir = tempfile::tempdir().unwrap();
        // No CMakeCache.txt in the directory; must not panic or spawn
        correct_install_prefix(dir.path(), Path::new("/bin/true"));
    }

    #[test]
    #[cfg(unix)]
    fn matching_prefix_skips_the_correction() {
        let dir = tempfile::tempdir().unwrap();
        let current = std::env::current_dir().unwrap();
        std::fs::write(
            dir.path().join("CMakeCache.txt"),
            format!("CMAKE_INSTALL_PREFIX:PATH={}\n", current.display()),
        )
        .unwrap();
        // The driver is a command that would fail loudly if invoked
        correct_install_prefix(dir.path(), Path::new("/nonexistent/driver"));
    }
}
