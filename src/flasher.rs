//! Dual-method flashing: Katapult's bootloader protocol or the build
//! toolchain's `make flash` target, with optional fallback to the other
//! method and post-flash re-enumeration verification.

use std::process::Stdio;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use tokio::process::Command;

use crate::discovery::{self, DEFAULT_SCAN_DIR};
use crate::error::FlashError;
use crate::types::{DeviceEntry, FlashMethod, FlashResult};

/// Ceiling on a single flash attempt, either method.
const FLASH_TIMEOUT: Duration = Duration::from_secs(60);
/// Ceiling on waiting for the board to re-enumerate with the Klipper
/// marker after a successful flash.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);
const VERIFY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Flashes `entry` using its configured method (or the global default),
/// falling back to the other method if `allow_fallback` is set and the
/// first attempt fails. `firmware_path` is the compiled artifact to write;
/// `build_dir` is the method's working directory, which for Katapult is a
/// separate checkout from the Klipper tree the firmware was built in.
pub async fn flash(
    entry: &DeviceEntry,
    device_path: &Utf8Path,
    firmware_path: &Utf8Path,
    build_dir: &Utf8Path,
    default_method: FlashMethod,
    allow_fallback: bool,
) -> Result<FlashResult, FlashError> {
    let primary = entry.flash_method.unwrap_or(default_method);
    let start = Instant::now();

    match attempt(primary, device_path, firmware_path, build_dir).await {
        Ok(()) => Ok(FlashResult {
            success: true,
            method_used: Some(primary),
            elapsed_seconds: start.elapsed().as_secs_f64(),
            error_message: None,
        }),
        Err(first_err) if allow_fallback => {
            let secondary = primary.other();
            match attempt(secondary, device_path, firmware_path, build_dir).await {
                Ok(()) => Ok(FlashResult {
                    success: true,
                    method_used: Some(secondary),
                    elapsed_seconds: start.elapsed().as_secs_f64(),
                    error_message: None,
                }),
                Err(second_err) => Err(FlashError::AllMethodsFailed {
                    key: entry.key.clone(),
                    reason: format!("{primary}: {first_err}; {secondary}: {second_err}"),
                }),
            }
        }
        Err(first_err) => Err(FlashError::AllMethodsFailed {
            key: entry.key.clone(),
            reason: format!("{primary}: {first_err}"),
        }),
    }
}

async fn attempt(
    method: FlashMethod,
    device_path: &Utf8Path,
    firmware_path: &Utf8Path,
    build_dir: &Utf8Path,
) -> Result<(), String> {
    let mut command = match method {
        FlashMethod::Katapult => {
            let mut cmd = Command::new("python3");
            cmd.arg("-m")
                .arg("katapult.flashtool")
                .arg("-d")
                .arg(device_path.as_str())
                .arg("-f")
                .arg(firmware_path.as_str())
                .current_dir(build_dir);
            cmd
        }
        FlashMethod::MakeFlash => {
            let mut cmd = Command::new("make");
            cmd.arg("flash")
                .arg(format!("FLASH_DEVICE={device_path}"))
                .arg(format!("FLASH_IMAGE={firmware_path}"))
                .current_dir(build_dir);
            cmd
        }
    };

    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| e.to_string())?;
    let output = tokio::time::timeout(FLASH_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| format!("timed out after {FLASH_TIMEOUT:?}"))?
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

/// Polls the USB-serial-by-id directory until a device matching
/// `serial_pattern` re-enumerates with the Klipper marker prefix, or
/// [`VERIFY_TIMEOUT`] elapses. Matching the pattern (not just the marker)
/// keeps an already-connected, unrelated Klipper board from registering
/// as a false positive for this flash.
pub async fn verify_reenumeration(serial_pattern: &str, key: &str) -> Result<(), FlashError> {
    let scan_dir = camino::Utf8PathBuf::from(DEFAULT_SCAN_DIR);
    let deadline = Instant::now() + VERIFY_TIMEOUT;

    loop {
        let devices = discovery::scan(&scan_dir)
            .await
            .map_err(|_| FlashError::VerificationTimeout(key.to_string()))?;
        let reenumerated = discovery::match_all(serial_pattern, &devices)
            .iter()
            .any(|d| d.filename.to_ascii_lowercase().starts_with("usb-klipper_"));
        if reenumerated {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(FlashError::VerificationTimeout(key.to_string()));
        }
        tokio::time::sleep(VERIFY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_method_toggles() {
        assert_eq!(FlashMethod::Katapult.other(), FlashMethod::MakeFlash);
        assert_eq!(FlashMethod::MakeFlash.other(), FlashMethod::Katapult);
    }
}
