//! The registry: `~/.config/kalico-flash/registry.json`,
//! persisted atomically via a temp-file-then-rename in the same directory.

use camino::Utf8PathBuf;
use tempfile::NamedTempFile;

use crate::error::RegistryError;
use crate::types::{DeviceEntry, GlobalConfig, RegistryData};

#[derive(Debug, Clone)]
pub struct Registry {
    path: Utf8PathBuf,
    data: RegistryData,
}

impl Registry {
    /// Default registry path, honoring `$XDG_CONFIG_HOME`.
    pub fn default_path() -> Utf8PathBuf {
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/root".into());
                Utf8PathBuf::from(home).join(".config")
            });
        base.join("kalico-flash").join("registry.json")
    }

    /// Loads the registry at `path`, creating an empty one in memory (not
    /// on disk) if the file does not yet exist.
    pub async fn load(path: Utf8PathBuf) -> Result<Self, RegistryError> {
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|source| RegistryError::Corrupt {
                path: path.to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryData::default(),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: path.to_string(),
                    source,
                })
            }
        };

        let mut data: RegistryData = data;
        for (key, entry) in data.devices.iter_mut() {
            entry.key = key.clone();
        }

        Ok(Registry { path, data })
    }

    /// Writes the registry atomically: serialize, write to a temp file in
    /// the same directory, fsync, then rename over the target path.
    pub async fn save(&self) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(&self.data).map_err(|source| {
            RegistryError::Corrupt {
                path: self.path.to_string(),
                source,
            }
        })?;

        let dir = self
            .path
            .parent()
            .map(|p| p.to_owned())
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| RegistryError::Io {
                path: self.path.to_string(),
                source,
            })?;

        let dir_std = dir.into_std_path_buf();
        let target = self.path.clone().into_std_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir_std)?;
            use std::io::Write as _;
            tmp.write_all(json.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target)?;
            Ok(())
        })
        .await
        .map_err(|e| RegistryError::Io {
            path: self.path.to_string(),
            source: std::io::Error::other(e),
        })?
        .map_err(|source| RegistryError::Io {
            path: self.path.to_string(),
            source,
        })
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.data.global
    }

    pub fn set_global(&mut self, global: GlobalConfig) {
        self.data.global = global;
    }

    pub fn get(&self, key: &str) -> Option<&DeviceEntry> {
        self.data.devices.get(key)
    }

    pub fn list(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.data.devices.values()
    }

    pub fn add(&mut self, entry: DeviceEntry) -> Result<(), RegistryError> {
        entry
            .validate()
            .map_err(|_| RegistryError::DuplicateKey(entry.key.clone()))?;
        if self.data.devices.contains_key(&entry.key) {
            return Err(RegistryError::DuplicateKey(entry.key.clone()));
        }
        self.data.devices.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Replaces an existing entry, optionally under a new key. Callers are
    /// responsible for moving the on-disk config cache directory (see
    /// [`crate::config_cache::ConfigCache::rename`]) before this commits,
    /// so a crash between the two never leaves an orphaned cache.
    pub fn update(&mut self, old_key: &str, new_entry: DeviceEntry) -> Result<(), RegistryError> {
        if !self.data.devices.contains_key(old_key) {
            return Err(RegistryError::MissingKey(old_key.to_string()));
        }
        if new_entry.key != old_key && self.data.devices.contains_key(&new_entry.key) {
            return Err(RegistryError::KeyCollision {
                old_key: old_key.to_string(),
                new_key: new_entry.key.clone(),
            });
        }
        self.data.devices.remove(old_key);
        self.data.devices.insert(new_entry.key.clone(), new_entry);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<DeviceEntry, RegistryError> {
        self.data
            .devices
            .remove(key)
            .ok_or_else(|| RegistryError::MissingKey(key.to_string()))
    }

    /// Derives a unique device key from `name` for `add` when the caller
    /// doesn't supply one explicitly: slugify, then suffix `-2`, `-3`, ...
    /// until the key is free.
    pub fn unique_key_from_name(&self, name: &str) -> Result<String, RegistryError> {
        let base = slugify(name).ok_or_else(|| RegistryError::InvalidName(name.to_string()))?;
        if !self.data.devices.contains_key(&base) {
            return Ok(base);
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{base}-{suffix}");
            if !self.data.devices.contains_key(&candidate) {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }
}

/// Strips path-unsafe characters (`/`, `\`, `..`, NUL), lowercases, and
/// collapses runs of anything else into a single `-`, trimming leading and
/// trailing dashes. Returns `None` if nothing alphanumeric survives.
pub fn slugify(name: &str) -> Option<String> {
    let without_traversal = name.replace("..", "");
    let safe: String = without_traversal
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect();

    let mut slug = String::new();
    for c in safe.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(key: &str) -> DeviceEntry {
        DeviceEntry::builder()
            .key(key)
            .name("Octopus Pro v1.1")
            .mcu("stm32h723")
            .serial_pattern("usb-Klipper_stm32h723xx_ABC*")
            .build()
    }

    #[tokio::test]
    async fn load_missing_file_yields_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        let registry = Registry::load(path).await.unwrap();
        assert_eq!(registry.list().count(), 0);
    }

    #[tokio::test]
    async fn load_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        tokio::fs::write(&path, b"not json").await.unwrap();
        let err = Registry::load(path).await.unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn add_then_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();

        let mut registry = Registry::load(path.clone()).await.unwrap();
        registry.add(sample_entry("octopus")).unwrap();
        registry.save().await.unwrap();

        let reloaded = Registry::load(path).await.unwrap();
        assert_eq!(reloaded.get("octopus").unwrap().name, "Octopus Pro v1.1");
    }

    #[tokio::test]
    async fn add_duplicate_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        let mut registry = Registry::load(path).await.unwrap();
        registry.add(sample_entry("octopus")).unwrap();
        let err = registry.add(sample_entry("octopus")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn update_rename_detects_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        let mut registry = Registry::load(path).await.unwrap();
        registry.add(sample_entry("octopus")).unwrap();
        registry.add(sample_entry("ender")).unwrap();

        let err = registry
            .update("octopus", sample_entry("ender"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::KeyCollision { .. }));
    }

    #[tokio::test]
    async fn remove_missing_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        let mut registry = Registry::load(path).await.unwrap();
        let err = registry.remove("nope").unwrap_err();
        assert!(matches!(err, RegistryError::MissingKey(_)));
    }

    #[test]
    fn slugify_lowercases_and_collapses_separators() {
        assert_eq!(slugify("Octopus Pro v1.1"), Some("octopus-pro-v1-1".into()));
    }

    #[test]
    fn slugify_strips_path_unsafe_characters() {
        assert_eq!(slugify("../etc/passwd"), Some("etc-passwd".into()));
        assert_eq!(slugify("a\\b/c\0d"), Some("a-b-c-d".into()));
    }

    #[test]
    fn slugify_returns_none_for_all_unsafe_input() {
        assert_eq!(slugify("../.."), None);
        assert_eq!(slugify("///"), None);
        assert_eq!(slugify(""), None);
    }

    #[tokio::test]
    async fn unique_key_from_name_suffixes_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        let mut registry = Registry::load(path).await.unwrap();
        registry.add(sample_entry("octopus-pro-v1-1")).unwrap();

        let key = registry.unique_key_from_name("Octopus Pro v1.1").unwrap();
        assert_eq!(key, "octopus-pro-v1-1-2");
    }

    #[tokio::test]
    async fn unique_key_from_name_rejects_unslugifiable_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        let registry = Registry::load(path).await.unwrap();
        let err = registry.unique_key_from_name("../..").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName(_)));
    }
}
