// runtime_cache.rs — Fingerprints for compiled runtime objects
//
// A runtime object is reusable when it was built from the same runtime
// sources with the same numeric type and flags. The fingerprint is a
// SHA-256 over all of those. Known fingerprints are kept in memory for the
// life of the cache and in a `.sha256` stamp beside each object so later
// jobs can skip the build too.
//
// Preconditions: none.
// Postconditions: `is_fresh` is true only for an existing object whose
//                 recorded fingerprint matches.
// Failure modes: unreadable runtime directory or stamp write → `AbortRun::Io`.
// Side effects: `record` writes the stamp file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{AbortRun, Result};

/// Extensions of files that feed a runtime build.
const SOURCE_EXTENSIONS: &[&str] = &["h", "cc", "tcc"];

#[derive(Debug, Default)]
pub struct RuntimeCache {
    built: HashMap<PathBuf, String>,
}

impl RuntimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex SHA-256 of the runtime sources (sorted by name), the numeric
    /// type, and the compile flags.
    pub fn fingerprint(&self, runtime_dir: &Path, t: &str, flags: &[String]) -> Result<String> {
        let entries = std::fs::read_dir(runtime_dir).map_err(|e| AbortRun::io(runtime_dir, e))?;
        let mut sources = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| AbortRun::io(runtime_dir, e))?.path();
            let is_source = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e));
            if is_source {
                sources.push(path);
            }
        }
        sources.sort();

        let mut hasher = Sha256::new();
        for path in &sources {
            let bytes = std::fs::read(path).map_err(|e| AbortRun::io(path, e))?;
            if let Some(name) = path.file_name() {
                hasher.update(name.to_string_lossy().as_bytes());
            }
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(&bytes);
        }
        hasher.update(t.as_bytes());
        for flag in flags {
            hasher.update([0u8]);
            hasher.update(flag.as_bytes());
        }
        Ok(to_hex(&hasher.finalize()))
    }

    pub fn is_fresh(&self, object: &Path, fingerprint: &str) -> bool {
        if !object.exists() {
            return false;
        }
        if let Some(known) = self.built.get(object) {
            return known == fingerprint;
        }
        std::fs::read_to_string(stamp_path(object))
            .map(|s| s.trim() == fingerprint)
            .unwrap_or(false)
    }

    pub fn record(&mut self, object: &Path, fingerprint: &str) -> Result<()> {
        let stamp = stamp_path(object);
        std::fs::write(&stamp, fingerprint).map_err(|e| AbortRun::io(&stamp, e))?;
        self.built.insert(object.to_path_buf(), fingerprint.to_string());
        Ok(())
    }
}

fn stamp_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("runtime.h"), "// header\n").unwrap();
        std::fs::write(dir.path().join("runtime.cc"), "// body\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn fingerprint_depends_on_type_and_sources() {
        let dir = runtime_dir();
        let cache = RuntimeCache::new();
        let flags = vec!["-Dn2a_T=float".to_string()];
        let a = cache.fingerprint(dir.path(), "float", &flags).unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, cache.fingerprint(dir.path(), "float", &flags).unwrap());
        assert_ne!(a, cache.fingerprint(dir.path(), "double", &flags).unwrap());

        std::fs::write(dir.path().join("notes.txt"), "still ignored").unwrap();
        assert_eq!(a, cache.fingerprint(dir.path(), "float", &flags).unwrap());

        std::fs::write(dir.path().join("runtime.cc"), "// edited\n").unwrap();
        assert_ne!(a, cache.fingerprint(dir.path(), "float", &flags).unwrap());
    }

    #[test]
    fn recorded_object_is_fresh_across_caches() {
        let dir = runtime_dir();
        let object = dir.path().join("runtime_float.o");
        let mut cache = RuntimeCache::new();
        assert!(!cache.is_fresh(&object, "abc"));

        std::fs::write(&object, b"obj").unwrap();
        assert!(!cache.is_fresh(&object, "abc"));
        cache.record(&object, "abc").unwrap();
        assert!(cache.is_fresh(&object, "abc"));
        assert!(!cache.is_fresh(&object, "def"));

        let later = RuntimeCache::new();
        assert!(later.is_fresh(&object, "abc"));
    }

    #[test]
    fn missing_runtime_dir_is_io_error() {
        let cache = RuntimeCache::new();
        let err = cache.fingerprint(Path::new("/nonexistent/rt"), "float", &[]).unwrap_err();
        assert!(matches!(err, AbortRun::Io { .. }));
    }
}
