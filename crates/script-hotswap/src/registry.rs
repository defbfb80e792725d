//! Index of live modules, by logical name and by artifact path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::HotSwapError;
use crate::module::ScriptModule;

/// The two mappings are kept mutually consistent: a module appears in
/// one iff it appears in the other. Only the reload manager's serial
/// update loop mutates this, so no lock is needed.
#[derive(Default)]
pub(crate) struct ModuleRegistry {
    modules: HashMap<String, Arc<ScriptModule>>,
    names_by_path: HashMap<PathBuf, String>,
}

impl ModuleRegistry {
    /// Register a loaded module under its logical name and the artifact
    /// path its load was keyed by. Rejects a name that is already live.
    pub(crate) fn insert(
        &mut self,
        artifact: &Path,
        name: String,
        module: Arc<ScriptModule>,
    ) -> Result<(), HotSwapError> {
        if let Some(loaded) = self.modules.get(&name) {
            return Err(HotSwapError::DuplicateModule {
                name,
                loaded_from: loaded.cache_path().to_path_buf(),
            });
        }

        self.names_by_path.insert(artifact.to_path_buf(), name.clone());
        self.modules.insert(name, module);
        Ok(())
    }

    /// Remove the module keyed by `artifact`, returning its name and
    /// handle. The library itself may stay loaded behind outstanding
    /// references; that is the handle's concern.
    pub(crate) fn remove(&mut self, artifact: &Path) -> Option<(String, Arc<ScriptModule>)> {
        let name = self.names_by_path.remove(artifact)?;
        let module = self
            .modules
            .remove(&name)
            .expect("name and path mappings are consistent");
        Some((name, module))
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<ScriptModule>> {
        self.modules.get(name).cloned()
    }

    pub(crate) fn contains_path(&self, artifact: &Path) -> bool {
        self.names_by_path.contains_key(artifact)
    }

    pub(crate) fn name_of(&self, artifact: &Path) -> Option<&str> {
        self.names_by_path.get(artifact).map(String::as_str)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        debug_assert_eq!(self.modules.len(), self.names_by_path.len());
        self.modules.len()
    }

    pub(crate) fn clear(&mut self) {
        self.modules.clear();
        self.names_by_path.clear();
    }
}
