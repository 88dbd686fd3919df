//
// Copyright 2024 The Sigstore Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! On-disk store for trusted metadata and downloaded targets.
//!
//! Layout: one JSON file per role at the top level, target contents under
//! `targets/` keyed by target name. The store is single-writer; all writes
//! go through write-to-temp-then-rename so an interrupted update leaves the
//! previously trusted files intact.

use std::fs;
use std::path::{Path, PathBuf};

use super::TufError;

#[derive(Debug)]
pub struct FileSystemStore {
    base: PathBuf,
}

impl FileSystemStore {
    /// Opens (creating if necessary) a store rooted at `base`.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, TufError> {
        let base = base.into();
        fs::create_dir_all(base.join("targets"))?;
        Ok(Self { base })
    }

    /// Reads a metadata file (e.g. `root.json`), if present.
    pub fn read_meta(&self, name: &str) -> Result<Option<Vec<u8>>, TufError> {
        read_optional(&self.base.join(checked_name(name)?))
    }

    /// Atomically replaces a metadata file.
    pub fn write_meta(&self, name: &str, data: &[u8]) -> Result<(), TufError> {
        atomic_write(&self.base.join(checked_name(name)?), data)
    }

    /// Reads a cached target by name, if present.
    pub fn read_target(&self, name: &str) -> Result<Option<Vec<u8>>, TufError> {
        read_optional(&self.base.join("targets").join(checked_name(name)?))
    }

    /// Atomically caches target bytes under the target's name.
    pub fn write_target(&self, name: &str, data: &[u8]) -> Result<(), TufError> {
        let path = self.base.join("targets").join(checked_name(name)?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(&path, data)
    }
}

/// Rejects names that would escape the store directory.
fn checked_name(name: &str) -> Result<&Path, TufError> {
    let path = Path::new(name);
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
    if escapes {
        return Err(TufError::Malformed {
            role: name.to_string(),
            reason: "name is not a relative path".into(),
        });
    }
    Ok(path)
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, TufError> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), TufError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trip_meta_and_targets() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::open(dir.path()).unwrap();

        assert_eq!(store.read_meta("root.json").unwrap(), None);
        store.write_meta("root.json", b"{}").unwrap();
        assert_eq!(store.read_meta("root.json").unwrap().unwrap(), b"{}");

        store.write_target("trusted_root.json", b"abc").unwrap();
        assert_eq!(
            store.read_target("trusted_root.json").unwrap().unwrap(),
            b"abc"
        );
        assert!(dir.path().join("targets/trusted_root.json").exists());
    }

    #[test]
    fn replacement_is_total() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::open(dir.path()).unwrap();

        store.write_meta("timestamp.json", b"version-10").unwrap();
        store.write_meta("timestamp.json", b"v11").unwrap();
        assert_eq!(store.read_meta("timestamp.json").unwrap().unwrap(), b"v11");
        // No stray temp file left behind.
        assert!(!dir.path().join("timestamp.json.tmp").exists());
    }

    #[test]
    fn escaping_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::open(dir.path()).unwrap();

        assert!(store.read_meta("../outside.json").is_err());
        assert!(store.write_target("/etc/passwd", b"x").is_err());
        // Subdirectories within the store are fine.
        store.write_target("registry/keys.json", b"k").unwrap();
        assert_eq!(
            store.read_target("registry/keys.json").unwrap().unwrap(),
            b"k"
        );
    }
}
