//! Per-device build-config cache with MCU cross-validation.

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;

use crate::error::ConfigError;

/// Name of the Klipper/Katapult build config file inside a build workspace.
const WORKSPACE_CONFIG_FILENAME: &str = ".config";

/// Owns the cache directory tree rooted at `config_root`
/// (`${XDG_CONFIG_HOME:-$HOME/.config}/kalico-flash/configs`).
#[derive(Debug, Clone)]
pub struct ConfigCache {
    config_root: Utf8PathBuf,
}

impl ConfigCache {
    pub fn new(config_root: Utf8PathBuf) -> Self {
        ConfigCache { config_root }
    }

    /// Default cache root derived from the XDG convention.
    pub fn from_xdg() -> Self {
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/root".into());
                Utf8PathBuf::from(home).join(".config")
            });
        ConfigCache::new(base.join("kalico-flash").join("configs"))
    }

    pub fn path_for(&self, device_key: &str) -> Utf8PathBuf {
        self.config_root.join(device_key)
    }

    fn config_file_for(&self, device_key: &str) -> Utf8PathBuf {
        self.path_for(device_key).join(WORKSPACE_CONFIG_FILENAME)
    }

    pub fn has_cached(&self, device_key: &str) -> bool {
        self.config_file_for(device_key).is_file()
    }

    /// Copies the cached config file into `build_workspace`'s expected
    /// `.config` filename.
    pub async fn load_into_workspace(
        &self,
        device_key: &str,
        build_workspace: &Utf8Path,
    ) -> Result<(), ConfigError> {
        let cached = self.config_file_for(device_key);
        if !cached.is_file() {
            return Err(ConfigError::NoCachedConfig(device_key.to_string()));
        }
        let dest = build_workspace.join(WORKSPACE_CONFIG_FILENAME);
        tokio::fs::copy(&cached, &dest)
            .await
            .map_err(|source| ConfigError::Io {
                key: device_key.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Copies the workspace's config back into the cache, atomically via a
    /// temp-file rename in the same directory.
    pub async fn save_from_workspace(
        &self,
        device_key: &str,
        build_workspace: &Utf8Path,
    ) -> Result<(), ConfigError> {
        let src = build_workspace.join(WORKSPACE_CONFIG_FILENAME);
        let dest_dir = self.path_for(device_key);
        let key = device_key.to_string();

        let content = tokio::fs::read(&src)
            .await
            .map_err(|source| ConfigError::Io { key: key.clone(), source })?;

        tokio::fs::create_dir_all(&dest_dir)
            .await
            .map_err(|source| ConfigError::Io { key: key.clone(), source })?;

        let dest_dir_std = dest_dir.clone().into_std_path_buf();
        let dest_file = self.config_file_for(device_key);
        tokio::task::spawn_blocking(move || -> Result<(), std::io::Error> {
            let mut tmp = NamedTempFile::new_in(&dest_dir_std)?;
            use std::io::Write as _;
            tmp.write_all(&content)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&dest_file)?;
            Ok(())
        })
        .await
        .map_err(|e| ConfigError::Io {
            key: key.clone(),
            source: std::io::Error::other(e),
        })?
        .map_err(|source| ConfigError::Io { key, source })
    }

    /// Moves a device's cached config directory to a new key, used by
    /// [`crate::registry::Registry::update`] before the rename's save
    /// cycle commits.
    pub async fn rename(&self, old_key: &str, new_key: &str) -> Result<(), ConfigError> {
        let old_dir = self.path_for(old_key);
        if !old_dir.exists() {
            return Ok(());
        }
        let new_dir = self.path_for(new_key);
        tokio::fs::rename(&old_dir, &new_dir)
            .await
            .map_err(|source| ConfigError::Io {
                key: old_key.to_string(),
                source,
            })
    }

    /// Removes a device's cached config directory entirely, used when a
    /// device is removed from the registry.
    pub async fn remove(&self, device_key: &str) -> Result<(), ConfigError> {
        let dir = self.path_for(device_key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ConfigError::Io {
                key: device_key.to_string(),
                source,
            }),
        }
    }
}

/// Extracts the MCU family from build-config text by looking for the key
/// that names the MCU, falling back to the board-directory key.
pub fn parse_mcu(config_text: &str) -> Option<String> {
    for line in config_text.lines() {
        let line = line.trim();
        if let Some(value) = extract_config_value(line, "CONFIG_MCU") {
            if let Some(mcu) = crate::discovery::extract_mcu(&format!("usb-Klipper_{value}_x")) {
                return Some(mcu);
            }
            let lowered = value.to_ascii_lowercase();
            if crate::discovery::is_valid_mcu_token(&lowered) {
                return Some(lowered);
            }
        }
    }
    for line in config_text.lines() {
        let line = line.trim();
        if let Some(value) = extract_config_value(line, "CONFIG_BOARD_DIRECTORY") {
            let lowered = value.trim_matches('"').to_ascii_lowercase();
            if crate::discovery::is_valid_mcu_token(&lowered) {
                return Some(lowered);
            }
        }
    }
    None
}

/// Parses a `CONFIG_KEY="value"` or `CONFIG_KEY=value` line, returning
/// `value` if the key matches.
fn extract_config_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?;
    let rest = rest.strip_prefix('=')?;
    Some(rest.trim_matches('"'))
}

/// Bidirectional prefix match (the hinge of the
/// wrong-firmware-to-wrong-board safety property).
pub fn validate_mcu(expected: &str, actual: &str) -> bool {
    expected.starts_with(actual) || actual.starts_with(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_into_workspace_fails_without_cache() {
        let cache = ConfigCache::new(Utf8PathBuf::from(
            tempfile::tempdir().unwrap().keep().to_string_lossy().into_owned(),
        ));
        let workspace = tempfile::tempdir().unwrap();
        let workspace_path = Utf8PathBuf::try_from(workspace.path().to_path_buf()).unwrap();
        let err = cache
            .load_into_workspace("missing-device", &workspace_path)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoCachedConfig(_)));
    }

    #[tokio::test]
    async fn save_then_load_round_trips_byte_for_byte() {
        let root = tempfile::tempdir().unwrap();
        let cache = ConfigCache::new(Utf8PathBuf::try_from(root.path().to_path_buf()).unwrap());

        let workspace = tempfile::tempdir().unwrap();
        let workspace_path = Utf8PathBuf::try_from(workspace.path().to_path_buf()).unwrap();
        let original = b"CONFIG_MCU=\"stm32h723\"\nCONFIG_BOARD_DIRECTORY=\"stm32\"\n";
        tokio::fs::write(workspace_path.join(".config"), original)
            .await
            .unwrap();

        cache.save_from_workspace("octopus", &workspace_path).await.unwrap();
        assert!(cache.has_cached("octopus"));

        let workspace2 = tempfile::tempdir().unwrap();
        let workspace2_path = Utf8PathBuf::try_from(workspace2.path().to_path_buf()).unwrap();
        cache
            .load_into_workspace("octopus", &workspace2_path)
            .await
            .unwrap();

        let loaded = tokio::fs::read(workspace2_path.join(".config")).await.unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn rename_moves_cache_directory() {
        let root = tempfile::tempdir().unwrap();
        let cache = ConfigCache::new(Utf8PathBuf::try_from(root.path().to_path_buf()).unwrap());
        let workspace = tempfile::tempdir().unwrap();
        let workspace_path = Utf8PathBuf::try_from(workspace.path().to_path_buf()).unwrap();
        tokio::fs::write(workspace_path.join(".config"), b"data")
            .await
            .unwrap();
        cache.save_from_workspace("old-key", &workspace_path).await.unwrap();

        cache.rename("old-key", "new-key").await.unwrap();
        assert!(!cache.has_cached("old-key"));
        assert!(cache.has_cached("new-key"));
    }

    #[test]
    fn parse_mcu_from_config_mcu_key() {
        let text = "CONFIG_MCU=\"stm32h723xx\"\nCONFIG_FOO=1\n";
        assert_eq!(parse_mcu(text).as_deref(), Some("stm32h723"));
    }

    #[test]
    fn parse_mcu_falls_back_to_board_directory() {
        let text = "CONFIG_FOO=1\nCONFIG_BOARD_DIRECTORY=\"rp2040\"\n";
        assert_eq!(parse_mcu(text).as_deref(), Some("rp2040"));
    }

    #[test]
    fn parse_mcu_returns_none_when_absent() {
        assert_eq!(parse_mcu("CONFIG_FOO=1\n"), None);
    }

    #[test]
    fn validate_mcu_bidirectional_prefix() {
        assert!(validate_mcu("stm32h723", "stm32h723xx"));
        assert!(validate_mcu("stm32h723xx", "stm32h723"));
        assert!(!validate_mcu("stm32h723", "stm32f411"));
        assert!(!validate_mcu("rp2040", "stm32h723"));
        assert!(validate_mcu("stm32h723", "stm32h723"));
    }
}
