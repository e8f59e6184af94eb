//! Domain error taxonomy and the recovery-step table the
//! orchestrator boundary consults before handing a failure to the
//! [`crate::output::OutputSink`].

use thiserror::Error;

/// Registry errors: corrupt file, I/O failure, duplicate key, missing key.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry file at {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error accessing registry at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("device key '{0}' already exists")]
    DuplicateKey(String),
    #[error("device key '{0}' not found")]
    MissingKey(String),
    #[error("new key '{new_key}' collides with an existing entry (renaming '{old_key}')")]
    KeyCollision { old_key: String, new_key: String },
    #[error("'{0}' has no characters usable in a device key")]
    InvalidName(String),
}

/// Discovery errors: scan directory inaccessible.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read USB serial-by-id directory {path}: {source}")]
    ScanFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Device errors: not registered, not connected, ambiguous match.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no device registered with key '{0}'")]
    NotRegistered(String),
    #[error("device '{0}' is not currently connected")]
    NotConnected(String),
    #[error("{count} USB devices match the pattern for '{key}', expected exactly one")]
    AmbiguousMatch { key: String, count: usize },
}

/// Config errors: no cached config, MCU mismatch, unparseable config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no cached build config for device '{0}'")]
    NoCachedConfig(String),
    #[error("cached config MCU '{config_mcu}' does not match registry MCU '{registry_mcu}' for '{key}'")]
    McuMismatch {
        key: String,
        registry_mcu: String,
        config_mcu: String,
    },
    #[error("could not parse an MCU family out of the build config for '{0}'")]
    Unparseable(String),
    #[error("I/O error accessing cached config for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Build errors: editor failed, clean failed, compile failed, timed out,
/// artifact not produced.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("interactive config editor exited with an error")]
    EditorFailed,
    #[error("`make clean` failed")]
    CleanFailed,
    #[error("compile failed")]
    CompileFailed,
    #[error("compile timed out after {0:?}")]
    CompileTimedOut(std::time::Duration),
    #[error("build succeeded but no firmware artifact was produced at {0}")]
    ArtifactNotProduced(String),
}

/// Service errors: stop failed, insufficient privilege.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to stop service '{service}': {reason}")]
    StopFailed { service: String, reason: String },
    #[error("insufficient privilege to control service '{0}' (passwordless sudo unavailable)")]
    InsufficientPrivilege(String),
}

/// Flash errors: all methods failed, verification timeout, device
/// disappeared mid-flash.
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("all flash methods failed for '{key}': {reason}")]
    AllMethodsFailed { key: String, reason: String },
    #[error("timed out waiting for '{0}' to re-enumerate after flashing")]
    VerificationTimeout(String),
    #[error("device '{0}' disappeared mid-flash")]
    DeviceDisappeared(String),
}

/// Safety errors: printer busy, Moonraker unreachable, hardware MCU
/// mismatch.
#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("printer is {state} (file: {filename}, progress: {progress:.0}%)")]
    PrinterBusy {
        state: String,
        filename: String,
        progress: f32,
    },
    #[error("Moonraker is unreachable")]
    MoonrakerUnreachable,
    #[error("hardware MCU '{hardware_mcu}' does not match registered MCU '{registry_mcu}' for '{key}'")]
    HardwareMcuMismatch {
        key: String,
        registry_mcu: String,
        hardware_mcu: String,
    },
}

/// Top-level error combining every component's taxonomy, used at the
/// orchestrator boundary before translation into a [`color_eyre::Report`].
#[derive(Debug, Error)]
pub enum KalicoError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Flash(#[from] FlashError),
    #[error(transparent)]
    Safety(#[from] SafetyError),
    #[error("interactive prompt failed: {0}")]
    Interactive(String),
}

/// Returns the numbered recovery steps shown to the user alongside a
/// failure's headline. Kept centralized so messaging stays consistent
/// across the single and batch orchestrators.
pub fn recovery_steps(err: &KalicoError) -> Vec<String> {
    match err {
        KalicoError::Registry(RegistryError::Corrupt { path, .. }) => vec![
            format!("Inspect {path} for malformed JSON"),
            "Restore from a backup, or delete the file to start with an empty registry".into(),
        ],
        KalicoError::Registry(RegistryError::DuplicateKey(key)) => vec![
            format!("Choose a different key than '{key}'"),
            format!("Or run `kalico-flash edit {key}` to modify the existing entry"),
        ],
        KalicoError::Registry(RegistryError::MissingKey(key)) => vec![
            format!("Run `kalico-flash list` to see registered device keys"),
            format!("Run `kalico-flash add` to register '{key}'"),
        ],
        KalicoError::Registry(_) => vec!["Check filesystem permissions on the registry path".into()],
        KalicoError::Discovery(DiscoveryError::ScanFailed { path, .. }) => vec![
            format!("Check that {path} exists and is readable"),
            "If no device has ever been connected, this directory may not exist yet".into(),
        ],
        KalicoError::Device(DeviceError::NotRegistered(key)) => {
            vec![format!("Run `kalico-flash add` to register '{key}' first")]
        }
        KalicoError::Device(DeviceError::NotConnected(key)) => vec![
            format!("Plug in the device registered as '{key}'"),
            "Run `kalico-flash list` to see which devices are currently connected".into(),
        ],
        KalicoError::Device(DeviceError::AmbiguousMatch { key, .. }) => vec![
            format!("Narrow the serial_pattern for '{key}' so it matches exactly one device"),
            "Unplug the other matching device and retry".into(),
        ],
        KalicoError::Config(ConfigError::NoCachedConfig(key)) => vec![
            format!("Run `kalico-flash flash {key}` interactively to create and cache a config"),
        ],
        KalicoError::Config(ConfigError::McuMismatch { key, .. }) => vec![
            format!("Re-run the config editor for '{key}' and select the correct board"),
            "This mismatch exists to prevent flashing the wrong firmware onto the wrong board".into(),
        ],
        KalicoError::Config(_) => vec!["Re-run the interactive config editor to regenerate the cached config".into()],
        KalicoError::Build(BuildError::CompileFailed) => vec![
            "Inspect the captured compiler output tail above".into(),
            "Run the build manually inside the Klipper tree to reproduce".into(),
        ],
        KalicoError::Build(BuildError::CompileTimedOut(_)) => vec![
            "Retry; transient resource contention can cause this".into(),
            "If it persists, check for a hung subprocess holding the build tree".into(),
        ],
        KalicoError::Build(_) => vec!["Inspect the captured build output tail above".into()],
        KalicoError::Service(ServiceError::InsufficientPrivilege(service)) => vec![
            format!("Configure passwordless sudo for systemctl on '{service}'"),
            "Or re-run with elevated privileges".into(),
        ],
        KalicoError::Service(_) => vec!["Check `systemctl status` for the printer daemon".into()],
        KalicoError::Flash(FlashError::AllMethodsFailed { .. }) => vec![
            "Check USB cabling and that the device is in the expected bootloader mode".into(),
            "Try the other flash method explicitly with --method".into(),
        ],
        KalicoError::Flash(FlashError::VerificationTimeout(key)) => vec![
            format!("Unplug and replug '{key}', then run `kalico-flash list` to check it re-enumerated"),
        ],
        KalicoError::Flash(FlashError::DeviceDisappeared(key)) => vec![
            format!("Check the USB connection to '{key}'"),
            "The flash may be incomplete; do not power off the board".into(),
        ],
        KalicoError::Safety(SafetyError::PrinterBusy { .. }) => vec![
            "Wait for the current print to finish, or cancel it from the UI".into(),
        ],
        KalicoError::Safety(SafetyError::MoonrakerUnreachable) => vec![
            "Check that the Klipper/Moonraker service is running".into(),
            "Proceed only if you are certain no print is active".into(),
        ],
        KalicoError::Safety(SafetyError::HardwareMcuMismatch { key, .. }) => vec![
            format!("Double check that '{key}' is the board you intend to flash"),
            "If this is intentional, override with explicit confirmation in interactive mode".into(),
        ],
        KalicoError::Interactive(_) => vec![
            "Re-run in a terminal that supports interactive prompts, or pass --yes".into(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_nonempty_recovery_steps() {
        let samples = vec![
            KalicoError::Registry(RegistryError::DuplicateKey("x".into())),
            KalicoError::Registry(RegistryError::MissingKey("x".into())),
            KalicoError::Discovery(DiscoveryError::ScanFailed {
                path: "/dev/serial/by-id".into(),
                source: std::io::Error::other("boom"),
            }),
            KalicoError::Device(DeviceError::NotRegistered("x".into())),
            KalicoError::Device(DeviceError::NotConnected("x".into())),
            KalicoError::Device(DeviceError::AmbiguousMatch {
                key: "x".into(),
                count: 2,
            }),
            KalicoError::Config(ConfigError::NoCachedConfig("x".into())),
            KalicoError::Config(ConfigError::McuMismatch {
                key: "x".into(),
                registry_mcu: "a".into(),
                config_mcu: "b".into(),
            }),
            KalicoError::Build(BuildError::CompileFailed),
            KalicoError::Build(BuildError::CompileTimedOut(std::time::Duration::from_secs(300))),
            KalicoError::Service(ServiceError::InsufficientPrivilege("klipper".into())),
            KalicoError::Flash(FlashError::AllMethodsFailed {
                key: "x".into(),
                reason: "nope".into(),
            }),
            KalicoError::Safety(SafetyError::MoonrakerUnreachable),
            KalicoError::Safety(SafetyError::HardwareMcuMismatch {
                key: "x".into(),
                registry_mcu: "a".into(),
                hardware_mcu: "b".into(),
            }),
        ];
        for err in samples {
            assert!(!recovery_steps(&err).is_empty(), "{err}");
        }
    }
}
