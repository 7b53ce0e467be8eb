//! Module loading: path resolution, the module cache, and lifecycle
//! states.
//!
//! Resolution order for a requested path: exact absolute path, then
//! relative to the importer's directory, then relative to the entry-point
//! directory, then relative to the configured library root. The cache is
//! keyed by both the requested string (verbatim) and the canonicalised
//! absolute path, and both keys map to the same module object, so spelling
//! a path differently never loads a module twice.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use log::debug;

use crate::error::{VmError, VmResult};
use crate::execution_engine::VmArgs;
use crate::loader;
use crate::memory::{GcRef, MemoryManager};
use crate::object::{ObjFunctionProto, ObjModule};
use crate::value::Value;

/// Result of a load: a cache hit hands back the module as-is (it may still
/// be executing, which is how import cycles stay safe); a fresh load still
/// needs its main proto run by the engine.
pub enum LoadedModule {
    Cached(GcRef<ObjModule>),
    Fresh {
        module: GcRef<ObjModule>,
        main_proto: GcRef<ObjFunctionProto>,
    },
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadedModule::Cached(_) => f.debug_tuple("Cached").finish(),
            LoadedModule::Fresh { .. } => f.debug_struct("Fresh").finish_non_exhaustive(),
        }
    }
}

/// The module cache and loader front-end.
#[derive(Default)]
pub struct ModuleManager {
    cache: HashMap<String, GcRef<ObjModule>>,
}

impl ModuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `requested` on behalf of a module in `importer_dir`.
    pub fn load(
        &mut self,
        heap: &mut MemoryManager,
        requested: &str,
        importer_dir: &Path,
        args: &VmArgs,
    ) -> VmResult<LoadedModule> {
        if let Some(module) = self.cache.get(requested) {
            return Ok(LoadedModule::Cached(*module));
        }

        let resolved = self.resolve(requested, importer_dir, args)?;
        let canonical = resolved
            .canonicalize()
            .unwrap_or_else(|_| resolved.clone())
            .to_string_lossy()
            .into_owned();
        if let Some(module) = self.cache.get(&canonical) {
            let module = *module;
            // Remember this spelling too.
            self.cache.insert(requested.to_string(), module);
            return Ok(LoadedModule::Cached(module));
        }

        let source = std::fs::read_to_string(&resolved).map_err(|err| {
            VmError::module_load(requested.to_string(), err.to_string())
        })?;

        // Parse failures leave the cache untouched: the module is only
        // inserted after the protos exist.
        let protos = loader::parse_source(heap, &source, &canonical)?;
        let main_proto = *protos
            .get("main")
            .expect("parser guarantees a main proto");

        let file_name = resolved
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| requested.to_string());
        let file_name = heap.new_string(&file_name);
        let file_path = heap.new_string(&canonical);
        let module = heap.new_module(file_name, file_path, Some(main_proto));

        self.cache.insert(requested.to_string(), module);
        self.cache.insert(canonical.clone(), module);
        debug!("loaded module {canonical}");

        Ok(LoadedModule::Fresh { module, main_proto })
    }

    fn resolve(
        &self,
        requested: &str,
        importer_dir: &Path,
        args: &VmArgs,
    ) -> VmResult<PathBuf> {
        let candidate = Path::new(requested);
        if candidate.is_absolute() {
            if candidate.is_file() {
                return Ok(candidate.to_path_buf());
            }
            return Err(VmError::module_load(
                requested.to_string(),
                "absolute path does not exist".to_string(),
            ));
        }

        let mut search_roots = vec![importer_dir.to_path_buf(), args.entry_dir.clone()];
        if let Some(library_root) = &args.library_root {
            search_roots.push(library_root.clone());
        }
        for root in &search_roots {
            let joined = root.join(candidate);
            if joined.is_file() {
                return Ok(joined);
            }
        }

        Err(VmError::module_load(
            requested.to_string(),
            format!(
                "not found relative to importer, entry directory, or library root ({} roots tried)",
                search_roots.len()
            ),
        ))
    }

    /// A cached module by either of its keys.
    pub fn lookup(&self, key: &str) -> Option<GcRef<ObjModule>> {
        self.cache.get(key).copied()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Every cached module is a GC root.
    pub fn collect_roots(&self, roots: &mut Vec<Value>) {
        for module in self.cache.values() {
            roots.push(Value::Module(*module));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_module(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    fn args_for(dir: &Path) -> VmArgs {
        VmArgs::new(dir.join("entry.meow"), Vec::new())
    }

    const TRIVIAL: &str = ".func main\n.registers 1\n.upvalues 0\nHALT\n.endfunc\n";

    #[test]
    fn test_load_and_cache_by_both_keys() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "lib.meow", TRIVIAL);

        let mut heap = MemoryManager::new();
        let mut modules = ModuleManager::new();
        let args = args_for(dir.path());

        let first = modules
            .load(&mut heap, "lib.meow", dir.path(), &args)
            .unwrap();
        let module = match first {
            LoadedModule::Fresh { module, .. } => module,
            LoadedModule::Cached(_) => panic!("first load must be fresh"),
        };

        // Same spelling hits the cache.
        match modules
            .load(&mut heap, "lib.meow", dir.path(), &args)
            .unwrap()
        {
            LoadedModule::Cached(cached) => assert_eq!(cached, module),
            LoadedModule::Fresh { .. } => panic!("second load must be cached"),
        }

        // The canonical path reaches the same module.
        let canonical = dir
            .path()
            .join("lib.meow")
            .canonicalize()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        match modules.load(&mut heap, &canonical, dir.path(), &args).unwrap() {
            LoadedModule::Cached(cached) => assert_eq!(cached, module),
            LoadedModule::Fresh { .. } => panic!("canonical spelling must be cached"),
        }
    }

    #[test]
    fn test_resolution_falls_back_to_entry_dir() {
        let entry_dir = tempfile::tempdir().unwrap();
        let other_dir = tempfile::tempdir().unwrap();
        write_module(entry_dir.path(), "shared.meow", TRIVIAL);

        let mut heap = MemoryManager::new();
        let mut modules = ModuleManager::new();
        let args = args_for(entry_dir.path());

        // Importer lives elsewhere; the entry dir root finds it.
        assert!(modules
            .load(&mut heap, "shared.meow", other_dir.path(), &args)
            .is_ok());
    }

    #[test]
    fn test_resolution_uses_library_root() {
        let entry_dir = tempfile::tempdir().unwrap();
        let lib_dir = tempfile::tempdir().unwrap();
        write_module(lib_dir.path(), "dep.meow", TRIVIAL);

        let mut heap = MemoryManager::new();
        let mut modules = ModuleManager::new();
        let mut args = args_for(entry_dir.path());
        args.library_root = Some(lib_dir.path().to_path_buf());

        assert!(modules
            .load(&mut heap, "dep.meow", entry_dir.path(), &args)
            .is_ok());
    }

    #[test]
    fn test_unresolved_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut heap = MemoryManager::new();
        let mut modules = ModuleManager::new();
        let args = args_for(dir.path());

        let err = modules
            .load(&mut heap, "missing.meow", dir.path(), &args)
            .unwrap_err();
        assert!(matches!(err, VmError::ModuleLoad { .. }));
        assert_eq!(modules.cached_count(), 0);
    }

    #[test]
    fn test_parse_failure_evicts_nothing(){
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "broken.meow", ".func main\n");

        let mut heap = MemoryManager::new();
        let mut modules = ModuleManager::new();
        let args = args_for(dir.path());

        assert!(modules
            .load(&mut heap, "broken.meow", dir.path(), &args)
            .is_err());
        assert_eq!(modules.cached_count(), 0);
        assert!(modules.lookup("broken.meow").is_none());
    }
}
