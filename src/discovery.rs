//! USB discovery: enumerate the stable USB-serial-by-id directory, match
//! registry patterns against it, and extract the MCU family token from a
//! device filename.

use camino::Utf8PathBuf;
use glob::Pattern;
use tracing::debug;

use crate::error::DiscoveryError;
use crate::types::DiscoveredDevice;

/// Default location of the stable USB-serial-by-id directory on Linux.
pub const DEFAULT_SCAN_DIR: &str = "/dev/serial/by-id";

const KLIPPER_MARKER: &str = "usb-Klipper_";
const KATAPULT_MARKER: &str = "usb-katapult_";

/// Enumerates USB serial devices under `scan_dir`. Returns an empty list
/// if the directory does not exist (no device has ever been connected).
pub async fn scan(scan_dir: &Utf8PathBuf) -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
    let mut entries = match tokio::fs::read_dir(scan_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{scan_dir} does not exist, treating as no devices connected");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(DiscoveryError::ScanFailed {
                path: scan_dir.to_string(),
                source,
            })
        }
    };

    let mut devices = Vec::new();
    loop {
        let entry = entries
            .next_entry()
            .await
            .map_err(|source| DiscoveryError::ScanFailed {
                path: scan_dir.to_string(),
                source,
            })?;
        let Some(entry) = entry else { break };
        let filename = entry.file_name().to_string_lossy().into_owned();
        let path = Utf8PathBuf::try_from(entry.path())
            .unwrap_or_else(|_| scan_dir.join(&filename));
        devices.push(DiscoveredDevice { path, filename });
    }
    devices.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(devices)
}

/// Case-sensitive glob match of `pattern` against each device's filename.
pub fn match_all<'d>(
    pattern: &str,
    devices: &'d [DiscoveredDevice],
) -> Vec<&'d DiscoveredDevice> {
    let Ok(glob) = Pattern::new(pattern) else {
        return Vec::new();
    };
    devices
        .iter()
        .filter(|d| glob.matches(&d.filename))
        .collect()
}

/// True iff `s` is a syntactically valid MCU family token: lowercase
/// alphanumeric, non-empty. This is the shape `DeviceEntry::mcu` and the
/// output of [`extract_mcu`] both conform to.
pub fn is_valid_mcu_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Parses the MCU family token out of a `usb-<marker>_<family><variant>_<serial>…`
/// filename. Returns `None` on any other shape, including
/// unsupported markers like `Beacon_…`.
pub fn extract_mcu(filename: &str) -> Option<String> {
    let lower = filename.to_ascii_lowercase();
    let rest = lower
        .strip_prefix(&KLIPPER_MARKER.to_ascii_lowercase())
        .or_else(|| lower.strip_prefix(&KATAPULT_MARKER.to_ascii_lowercase()))?;

    // rest looks like "<family><variant>_<serial>…"; take the first
    // underscore-delimited segment as the family+variant blob.
    let family_variant = rest.split('_').next()?;
    if family_variant.is_empty() {
        return None;
    }

    // Strip a trailing variant suffix beginning with 'x' (e.g. "xx" in
    // stm32h723xx), but never strip down to an empty string.
    let stripped = match family_variant.find('x') {
        Some(idx) if idx > 0 => &family_variant[..idx],
        _ => family_variant,
    };

    is_valid_mcu_token(stripped).then(|| stripped.to_string())
}

/// Strips the `-if<N>` interface suffix and appends a trailing wildcard,
/// producing a glob that always matches `filename` itself (this is
/// tested as a universal invariant below).
pub fn generate_pattern(filename: &str) -> String {
    let base = match filename.rfind("-if") {
        Some(idx) if filename[idx + 3..].chars().all(|c| c.is_ascii_digit())
            && filename.len() > idx + 3 =>
        {
            &filename[..idx]
        }
        _ => filename,
    };
    format!("{base}*")
}

/// True iff `filename` begins with the Klipper or Katapult marker prefix
/// (case-insensitive). Devices that fail this check may be shown as
/// `blocked` but are never offered for flashing or registration.
pub fn is_supported(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.starts_with(&KLIPPER_MARKER.to_ascii_lowercase())
        || lower.starts_with(&KATAPULT_MARKER.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURES: &[(&str, Option<&str>)] = &[
        ("usb-Klipper_stm32h723xx_29001A001151313531383332-if00", Some("stm32h723")),
        ("usb-katapult_stm32h723xx_29001A001151313531383332-if00", Some("stm32h723")),
        ("usb-Klipper_rp2040_E6616407E3059529-if00", Some("rp2040")),
        ("usb-KLIPPER_stm32f103_abc-if00", Some("stm32f103")),
        ("usb-Beacon_eddy_1234-if00", None),
        ("", None),
        ("usb-Klipper_-if00", None),
        ("random-garbage", None),
    ];

    #[test]
    fn extract_mcu_matches_fixtures() {
        for (filename, expected) in FIXTURES {
            assert_eq!(
                extract_mcu(filename).as_deref(),
                *expected,
                "filename: {filename}"
            );
        }
    }

    #[test]
    fn extract_mcu_accepted_names_start_with_marker() {
        for (filename, expected) in FIXTURES {
            if expected.is_some() {
                let lower = filename.to_ascii_lowercase();
                assert!(
                    lower.starts_with("usb-klipper_") || lower.starts_with("usb-katapult_"),
                    "filename: {filename}"
                );
            }
        }
    }

    #[test]
    fn generate_pattern_always_matches_self() {
        for (filename, _) in FIXTURES {
            if filename.is_empty() {
                continue;
            }
            let pattern = generate_pattern(filename);
            let glob = Pattern::new(&pattern).unwrap();
            assert!(glob.matches(filename), "{pattern} should match {filename}");
        }
    }

    #[test]
    fn generate_pattern_strips_interface_suffix() {
        assert_eq!(
            generate_pattern("usb-Klipper_stm32h723xx_ABC-if00"),
            "usb-Klipper_stm32h723xx_ABC*"
        );
    }

    #[test]
    fn generate_pattern_without_if_suffix_just_appends_wildcard() {
        assert_eq!(generate_pattern("usb-Klipper_rp2040_XYZ"), "usb-Klipper_rp2040_XYZ*");
    }

    #[test]
    fn is_supported_checks_marker_prefix() {
        assert!(is_supported("usb-Klipper_stm32h723xx_ABC-if00"));
        assert!(is_supported("usb-katapult_stm32h723xx_ABC-if00"));
        assert!(!is_supported("usb-Beacon_eddy_1234-if00"));
        assert!(!is_supported(""));
    }

    #[test]
    fn match_all_is_case_sensitive() {
        let devices = vec![
            DiscoveredDevice {
                path: "/dev/serial/by-id/usb-Klipper_stm32h723xx_ABC-if00".into(),
                filename: "usb-Klipper_stm32h723xx_ABC-if00".into(),
            },
            DiscoveredDevice {
                path: "/dev/serial/by-id/usb-klipper_stm32h723xx_ABC-if00".into(),
                filename: "usb-klipper_stm32h723xx_ABC-if00".into(),
            },
        ];
        let matches = match_all("usb-Klipper_stm32h723xx_ABC*", &devices);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].filename, "usb-Klipper_stm32h723xx_ABC-if00");
    }

    #[test]
    fn scan_returns_empty_when_dir_missing() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(scan(&Utf8PathBuf::from("/nonexistent/path/for/test")));
        assert_eq!(result.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn scan_sorts_by_filename() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["usb-Klipper_b-if00", "usb-Klipper_a-if00"] {
            std::fs::File::create(dir.path().join(name)).unwrap();
        }
        let scan_dir = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let devices = scan(&scan_dir).await.unwrap();
        assert_eq!(devices[0].filename, "usb-Klipper_a-if00");
        assert_eq!(devices[1].filename, "usb-Klipper_b-if00");
    }
}
