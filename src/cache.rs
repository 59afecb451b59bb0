//! The content-addressed cache (spec C2): a key→bytes store on disk, keyed
//! by `ActionId` digests, with deterministic sub-key derivation per artifact
//! kind and a stable filesystem path handed back for each key.

use crate::error::RunnerError;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// An opaque fixed-width digest identifying one cache entry.
pub type ActionId = blake3::Hash;

/// Streaming hash builder seeded with a salt (tool identity + package path).
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new(salt: &str) -> Self {
        let mut h = blake3::Hasher::new();
        h.update(salt.as_bytes());
        Hasher(h)
    }

    pub fn update(&mut self, field: &str) -> &mut Self {
        // A length-prefix-free separator is fine here: every caller feeds a
        // self-delimiting "tag value" string (see package_action.rs), so two
        // distinct field sequences never collide on concatenation.
        self.0.update(b"\n");
        self.0.update(field.as_bytes());
        self
    }

    pub fn finish(&self) -> ActionId {
        self.0.finalize()
    }
}

/// Artifact kinds within one action's cache footprint (spec.md §4.4/§4.7).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Vetx,
    Directives,
    Diagnostics,
    Unused,
}

impl Kind {
    fn tag(self) -> &'static str {
        match self {
            Kind::Vetx => "vetx",
            Kind::Directives => "directives",
            Kind::Diagnostics => "diagnostics",
            Kind::Unused => "unused",
        }
    }
}

pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Cache { root })
    }

    pub fn new_hash(&self, salt: &str) -> Hasher {
        Hasher::new(salt)
    }

    /// Deterministic derivation; collisions across `Kind`s are forbidden by
    /// folding the kind tag through a fresh hash rooted at the parent id.
    pub fn subkey(&self, parent: ActionId, kind: Kind) -> ActionId {
        let mut h = blake3::Hasher::new();
        h.update(parent.as_bytes());
        h.update(kind.tag().as_bytes());
        h.finalize()
    }

    pub fn put_bytes(&self, id: ActionId, bytes: &[u8]) -> Result<(), RunnerError> {
        let dest = self.path_for(id);
        let tmp = self.root.join(format!("{}.tmp-{}", id.to_hex(), std::process::id()));
        let write = || -> io::Result<()> {
            {
                let mut f = fs::File::create(&tmp)?;
                f.write_all(bytes)?;
                f.sync_all()?;
            }
            fs::rename(&tmp, &dest)?;
            Ok(())
        };
        if let Err(source) = write() {
            let _ = fs::remove_file(&tmp);
            log::warn!("cache: write failed for {}: {}", id.to_hex(), source);
            return Err(RunnerError::CacheIo { id, source });
        }
        log::debug!("cache: wrote {}", id.to_hex());
        Ok(())
    }

    /// Returns a path that may be opened read-only; entries are never
    /// mutated in place, only replaced wholesale via `put_bytes`'s rename.
    pub fn get_file(&self, id: ActionId) -> Option<(PathBuf, fs::Metadata)> {
        let path = self.path_for(id);
        match fs::metadata(&path) {
            Ok(meta) => {
                log::debug!("cache: hit {}", id.to_hex());
                Some((path, meta))
            }
            Err(_) => {
                log::debug!("cache: miss {}", id.to_hex());
                None
            }
        }
    }

    /// Content hash of a file already on disk, used to fold a dependency's
    /// actual output bytes into a dependent's cache key.
    pub fn file_hash(&self, path: &Path) -> io::Result<blake3::Hash> {
        let mut f = fs::File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; 65536];
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    fn path_for(&self, id: ActionId) -> PathBuf {
        self.root.join(id.to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let id = cache.new_hash("salt").update("pkg foo").finish();
        cache.put_bytes(id, b"hello").unwrap();
        let (path, _meta) = cache.get_file(id).expect("should hit");
        assert_eq!(fs::read(path).unwrap(), b"hello");
    }

    #[test]
    fn miss_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let id = cache.new_hash("salt").finish();
        assert!(cache.get_file(id).is_none());
    }

    #[test]
    fn subkeys_distinguish_kind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let parent = cache.new_hash("salt").update("pkg foo").finish();
        let vetx = cache.subkey(parent, Kind::Vetx);
        let diagnostics = cache.subkey(parent, Kind::Diagnostics);
        assert_ne!(vetx, diagnostics);
        assert_ne!(vetx, parent);
    }

    #[test]
    fn file_hash_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let id = cache.new_hash("salt").finish();
        cache.put_bytes(id, b"facts-bytes").unwrap();
        let (path, _) = cache.get_file(id).unwrap();
        let h1 = cache.file_hash(&path).unwrap();
        let h2 = cache.file_hash(&path).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_composition_is_order_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let a = cache.new_hash("salt").update("x").update("y").finish();
        let b = cache.new_hash("salt").update("y").update("x").finish();
        assert_ne!(a, b);
    }

    #[quickcheck_macros::quickcheck]
    fn same_fields_yield_the_same_action_id(salt: String, fields: Vec<String>) -> bool {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let build = || {
            let mut h = cache.new_hash(&salt);
            for f in &fields {
                h.update(f);
            }
            h.finish()
        };
        build() == build()
    }
}
