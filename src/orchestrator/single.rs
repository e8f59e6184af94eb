//! Single-device flash pipeline: Discovery → Safety →
//! Version → Config → Build → Flash → Verify → Done.

use crate::config_cache;
use crate::discovery;
use crate::error::{DeviceError, KalicoError, SafetyError};
use crate::types::{DeviceEntry, FlashResult, PrintState};
use crate::{build, flasher, service};

use super::{build_workspace, Context};

/// Outcome of a full single-device run, surfaced to the `flash` command.
pub struct SingleRunOutcome {
    pub flash: FlashResult,
}

/// Runs the full pipeline for the device registered under `key`. `key`
/// may be `None`, in which case the caller is prompted interactively
/// among currently-connected registered devices.
pub async fn run(ctx: &mut Context<'_>, key: Option<&str>) -> Result<SingleRunOutcome, KalicoError> {
    ctx.output.phase("Discovery");
    let entry = discover_target(ctx, key).await?;
    let scan_dir = camino::Utf8PathBuf::from(discovery::DEFAULT_SCAN_DIR);
    let devices = discovery::scan(&scan_dir).await?;
    let matches = discovery::match_all(&entry.serial_pattern, &devices);
    let usb = match matches.as_slice() {
        [] => return Err(DeviceError::NotConnected(entry.key.clone()).into()),
        [one] => (*one).clone(),
        many => return Err(DeviceError::AmbiguousMatch {
            key: entry.key.clone(),
            count: many.len(),
        }.into()),
    };

    ctx.output.phase("Safety");
    safety_check(ctx, &entry, &usb.filename).await?;
    moonraker_gate(ctx).await?;

    ctx.output.phase("Version");
    version_report(ctx, &entry).await;

    ctx.output.phase("Config");
    let klipper_dir = ctx.registry.global().expand_klipper_dir();
    let workspace = build_workspace(&klipper_dir);
    config_phase(ctx, &entry, &workspace).await?;

    ctx.output.phase("Build");
    let skip_menuconfig = ctx
        .skip_menuconfig_override
        .unwrap_or(ctx.registry.global().skip_menuconfig);
    if !skip_menuconfig {
        build::edit_config(&workspace).await?;
        ctx.config_cache.save_from_workspace(&entry.key, &workspace).await?;
    }
    revalidate_config_mcu(ctx, &entry, &workspace).await?;
    build::clean(&workspace, false).await?;
    let artifact = build::expected_artifact_path(&workspace);
    let build_result = build::compile(&workspace, &artifact, false).await?;
    if !build_result.success {
        if let Some(tail) = &build_result.error_output {
            ctx.output.error_with_recovery("build failed", &[tail.clone()]);
        }
        return Err(crate::error::BuildError::CompileFailed.into());
    }
    let build_elapsed = humantime::format_duration(std::time::Duration::from_secs_f64(
        build_result.elapsed_seconds,
    ));
    ctx.output.success(&format!("build succeeded in {build_elapsed}"));

    ctx.output.phase("Flash");
    let default_method = ctx.registry.global().default_flash_method;
    let allow_fallback = ctx.registry.global().allow_flash_fallback;
    let katapult_dir = ctx.registry.global().expand_katapult_dir();
    let flash_dir = entry.flash_method.unwrap_or(default_method);
    let flash_build_dir = match flash_dir {
        crate::types::FlashMethod::Katapult => katapult_dir,
        crate::types::FlashMethod::MakeFlash => workspace.clone(),
    };

    let firmware_path = build_result
        .firmware_path
        .clone()
        .ok_or_else(|| crate::error::BuildError::ArtifactNotProduced(artifact.to_string()))?;
    let flash_result = service::with_service_stopped("klipper", || async {
        flasher::flash(
            &entry,
            &usb.path,
            &firmware_path,
            &flash_build_dir,
            default_method,
            allow_fallback,
        )
        .await
    })
    .await?
    .map_err(KalicoError::from)?;

    ctx.output.phase("Verify");
    flasher::verify_reenumeration(&entry.serial_pattern, &entry.key).await?;
    let flash_elapsed = humantime::format_duration(std::time::Duration::from_secs_f64(
        flash_result.elapsed_seconds,
    ));
    ctx.output.success(&format!(
        "'{}' flashed and verified in {flash_elapsed}",
        entry.key
    ));

    Ok(SingleRunOutcome { flash: flash_result })
}

async fn discover_target(ctx: &mut Context<'_>, key: Option<&str>) -> Result<DeviceEntry, KalicoError> {
    if let Some(key) = key {
        return ctx
            .registry
            .get(key)
            .cloned()
            .ok_or_else(|| DeviceError::NotRegistered(key.to_string()).into());
    }

    let scan_dir = camino::Utf8PathBuf::from(discovery::DEFAULT_SCAN_DIR);
    let devices = discovery::scan(&scan_dir).await?;
    let connected: Vec<&DeviceEntry> = ctx
        .registry
        .list()
        .filter(|e| !discovery::match_all(&e.serial_pattern, &devices).is_empty())
        .collect();

    match connected.as_slice() {
        [] => Err(DeviceError::NotConnected("<none connected>".to_string()).into()),
        [one] => {
            let entry = (*one).clone();
            if !ctx.assume_yes {
                let proceed = ctx
                    .output
                    .confirm(&format!("Flash '{}'?", entry.name), true)
                    .map_err(|e| KalicoError::Interactive(e.to_string()))?;
                if !proceed {
                    return Err(DeviceError::NotRegistered(entry.key).into());
                }
            }
            Ok(entry)
        }
        many => {
            for (i, e) in many.iter().enumerate() {
                ctx.output.info(&format!("{}) {} ({})", i + 1, e.name, e.key));
            }
            let choice = ctx
                .output
                .prompt("Select a device by number")
                .map_err(|e| KalicoError::Interactive(e.to_string()))?;
            let idx: usize = choice
                .trim()
                .parse()
                .map_err(|_| DeviceError::NotRegistered(choice.clone()))?;
            many.get(idx.wrapping_sub(1))
                .map(|e| (*e).clone())
                .ok_or_else(|| DeviceError::NotRegistered(choice).into())
        }
    }
}

async fn safety_check(ctx: &mut Context<'_>, entry: &DeviceEntry, filename: &str) -> Result<(), KalicoError> {
    let Some(hardware_mcu) = discovery::extract_mcu(filename) else {
        return Ok(());
    };
    if config_cache::validate_mcu(&entry.mcu, &hardware_mcu) {
        return Ok(());
    }

    let mismatch = SafetyError::HardwareMcuMismatch {
        key: entry.key.clone(),
        registry_mcu: entry.mcu.clone(),
        hardware_mcu: hardware_mcu.clone(),
    };

    if ctx.assume_yes {
        return Err(mismatch.into());
    }

    ctx.output.warning(&mismatch.to_string());
    let override_confirmed = ctx
        .output
        .confirm(
            "Hardware MCU does not match the registered MCU. Proceed anyway?",
            false,
        )
        .map_err(|e| KalicoError::Interactive(e.to_string()))?;
    if override_confirmed {
        Ok(())
    } else {
        Err(mismatch.into())
    }
}

async fn moonraker_gate(ctx: &mut Context<'_>) -> Result<(), KalicoError> {
    match ctx.moonraker.get_print_status().await {
        Some(status) if matches!(status.state, PrintState::Printing | PrintState::Paused) => {
            Err(SafetyError::PrinterBusy {
                state: format!("{:?}", status.state).to_lowercase(),
                filename: status.filename,
                progress: status.progress,
            }
            .into())
        }
        Some(_) => Ok(()),
        None => {
            ctx.output.warning("Moonraker is unreachable; cannot confirm the printer is idle");
            if ctx.assume_yes {
                return Err(SafetyError::MoonrakerUnreachable.into());
            }
            let proceed = ctx
                .output
                .confirm("Proceed without confirming the printer is idle?", false)
                .map_err(|e| KalicoError::Interactive(e.to_string()))?;
            if proceed {
                Ok(())
            } else {
                Err(SafetyError::MoonrakerUnreachable.into())
            }
        }
    }
}

async fn version_report(ctx: &mut Context<'_>, entry: &DeviceEntry) {
    let klipper_dir = ctx.registry.global().expand_klipper_dir();
    let host_version = ctx.moonraker.get_host_version(&klipper_dir).await;
    let mcu_versions = ctx.moonraker.get_mcu_versions().await;

    if let Some(host_version) = &host_version {
        ctx.output.info(&format!("host version: {host_version}"));
    }
    if let Some(versions) = &mcu_versions {
        for (mcu, version) in versions {
            ctx.output.info(&format!("{mcu}: {version}"));
            if let Some(host_version) = &host_version {
                if version != host_version {
                    ctx.output.warning(&format!(
                        "'{}' firmware version ({version}) differs from host ({host_version})",
                        entry.key
                    ));
                }
            }
        }
    }
}

async fn config_phase(
    ctx: &mut Context<'_>,
    entry: &DeviceEntry,
    workspace: &camino::Utf8PathBuf,
) -> Result<(), KalicoError> {
    if ctx.config_cache.has_cached(&entry.key) {
        ctx.config_cache.load_into_workspace(&entry.key, workspace).await?;
    }
    Ok(())
}

async fn revalidate_config_mcu(
    ctx: &mut Context<'_>,
    entry: &DeviceEntry,
    workspace: &camino::Utf8PathBuf,
) -> Result<(), KalicoError> {
    let config_path = workspace.join(".config");
    let Ok(text) = tokio::fs::read_to_string(&config_path).await else {
        return Ok(());
    };
    let Some(parsed) = config_cache::parse_mcu(&text) else {
        return Ok(());
    };
    if !config_cache::validate_mcu(&entry.mcu, &parsed) {
        return Err(crate::error::ConfigError::McuMismatch {
            key: entry.key.clone(),
            registry_mcu: entry.mcu.clone(),
            config_mcu: parsed,
        }
        .into());
    }
    ctx.output.info("config MCU matches registered MCU");
    Ok(())
}
