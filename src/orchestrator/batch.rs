//! Batch flash pipeline: Validation → Candidate filtering
//! → Version check → Build stage → Flash stage, each stage fully
//! preceding the next.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;

use crate::config_cache;
use crate::discovery;
use crate::error::{KalicoError, SafetyError};
use crate::types::{
    BatchDeviceResult, DeviceEntry, DiscoveredDevice, FlashCandidate, FlashResult, PrintState,
    SkipReason, SkipReasonKind,
};
use crate::{build, flasher, service};

use super::{build_workspace, Context};

pub struct BatchRunOutcome {
    pub skipped: Vec<SkipReason>,
    pub results: Vec<BatchDeviceResult>,
}

pub async fn run(ctx: &mut Context<'_>) -> Result<BatchRunOutcome, KalicoError> {
    ctx.output.phase("Validation");
    moonraker_gate(ctx).await?;

    ctx.output.phase("Candidate filtering");
    let scan_dir = Utf8PathBuf::from(discovery::DEFAULT_SCAN_DIR);
    let devices = discovery::scan(&scan_dir).await?;
    let (candidates, skipped) = filter_candidates(ctx, &devices).await;
    for skip in &skipped {
        ctx.output.warning(&format!("skipping '{}': {}", skip.entry_key, skip.reason));
    }
    if candidates.is_empty() {
        ctx.output.warning("no candidates remain after filtering");
        return Ok(BatchRunOutcome { skipped, results: Vec::new() });
    }
    ctx.output.success(&format!("{} candidate(s) to flash", candidates.len()));

    ctx.output.phase("Version check");
    version_advisory(ctx, &candidates).await;

    ctx.output.phase("Build stage");
    let klipper_dir = ctx.registry.global().expand_klipper_dir();
    let workspace = build_workspace(&klipper_dir);
    let mut built = Vec::new();
    for candidate in &candidates {
        ctx.output.info(&format!("building '{}'", candidate.entry.key));
        ctx.config_cache
            .load_into_workspace(&candidate.entry.key, &workspace)
            .await?;
        if let Err(e) = build::clean(&workspace, false).await {
            ctx.output.warning(&format!(
                "'make clean' failed for '{}', building against a possibly stale workspace: {e}",
                candidate.entry.key
            ));
        }
        let artifact = build::expected_artifact_path(&workspace);
        match build::compile(&workspace, &artifact, false).await {
            Ok(result) if result.success => {
                built.push((candidate.clone(), Some(result)));
            }
            Ok(result) => {
                ctx.output.warning(&format!("build failed for '{}'", candidate.entry.key));
                built.push((candidate.clone(), Some(result)));
            }
            Err(e) => {
                ctx.output.warning(&format!("build failed for '{}': {e}", candidate.entry.key));
                built.push((candidate.clone(), None));
            }
        }
    }

    ctx.output.phase("Flash stage");
    let default_method = ctx.registry.global().default_flash_method;
    let allow_fallback = ctx.registry.global().allow_flash_fallback;
    let katapult_dir = ctx.registry.global().expand_katapult_dir();
    let stagger = std::time::Duration::from_secs(ctx.registry.global().stagger_delay_seconds as u64);

    let cancel = ctx.cancel.clone();
    let flash_results = service::with_service_stopped("klipper", || async {
        let mut results = Vec::new();
        for (i, (candidate, build_result)) in built.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if i > 0 {
                tokio::time::sleep(stagger).await;
            }

            let Some(build_result) = build_result else {
                results.push(BatchDeviceResult {
                    entry: candidate.entry.clone(),
                    build: None,
                    flash: None,
                    verified: false,
                    skip_reason: None,
                });
                continue;
            };
            if !build_result.success {
                results.push(BatchDeviceResult {
                    entry: candidate.entry.clone(),
                    build: Some(build_result.clone()),
                    flash: None,
                    verified: false,
                    skip_reason: None,
                });
                continue;
            }

            let flash_dir = candidate.entry.flash_method.unwrap_or(default_method);
            let flash_build_dir = match flash_dir {
                crate::types::FlashMethod::Katapult => katapult_dir.clone(),
                crate::types::FlashMethod::MakeFlash => workspace.clone(),
            };

            let Some(firmware_path) = build_result.firmware_path.clone() else {
                results.push(BatchDeviceResult {
                    entry: candidate.entry.clone(),
                    build: Some(build_result.clone()),
                    flash: None,
                    verified: false,
                    skip_reason: None,
                });
                continue;
            };
            let flash_result = flasher::flash(
                &candidate.entry,
                &candidate.usb.path,
                &firmware_path,
                &flash_build_dir,
                default_method,
                allow_fallback,
            )
            .await;

            let (flash, verified) = match flash_result {
                Ok(flash) => {
                    let verified = flasher::verify_reenumeration(
                        &candidate.entry.serial_pattern,
                        &candidate.entry.key,
                    )
                    .await
                    .is_ok();
                    (Some(flash), verified)
                }
                Err(e) => (
                    Some(FlashResult {
                        success: false,
                        method_used: None,
                        elapsed_seconds: 0.0,
                        error_message: Some(e.to_string()),
                    }),
                    false,
                ),
            };

            results.push(BatchDeviceResult {
                entry: candidate.entry.clone(),
                build: Some(build_result.clone()),
                flash,
                verified,
                skip_reason: None,
            });
        }
        results
    })
    .await?;

    ctx.output.phase("Summary");
    for result in &flash_results {
        let status = match (&result.build, &result.flash, result.verified) {
            (Some(b), _, _) if !b.success => "build failed",
            (_, Some(f), _) if !f.success => "flash failed",
            (_, Some(_), true) => "ok",
            (_, Some(_), false) => "flashed, verification failed",
            _ => "skipped",
        };
        ctx.output.info(&format!("{}: {status}", result.entry.key));
    }

    Ok(BatchRunOutcome { skipped, results: flash_results })
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

/// Implements the six-check candidate filter, tracking
/// a used-paths set so no physical device is claimed twice.
async fn filter_candidates(
    ctx: &Context<'_>,
    devices: &[DiscoveredDevice],
) -> (Vec<FlashCandidate>, Vec<SkipReason>) {
    let global = ctx.registry.global();
    let mut candidates = Vec::new();
    let mut skipped = Vec::new();
    let mut used_paths = std::collections::BTreeSet::new();

    for entry in ctx.registry.list() {
        if !entry.flashable {
            skipped.push(skip(entry, SkipReasonKind::Excluded));
            continue;
        }
        if global.blocklist.iter().any(|k| k == &entry.key) {
            skipped.push(skip(entry, SkipReasonKind::Blocked));
            continue;
        }

        let matches = discovery::match_all(&entry.serial_pattern, devices);
        let usb = match matches.as_slice() {
            [] => {
                skipped.push(skip(entry, SkipReasonKind::NotConnected));
                continue;
            }
            [one] => (*one).clone(),
            _ => {
                skipped.push(skip(entry, SkipReasonKind::DuplicatePatternMatches));
                continue;
            }
        };

        if used_paths.contains(&usb.path) {
            skipped.push(skip(entry, SkipReasonKind::DuplicateUsbPath));
            continue;
        }

        if !ctx.config_cache.has_cached(&entry.key) {
            skipped.push(skip(entry, SkipReasonKind::NoCachedConfig));
            continue;
        }

        let config_path = ctx.config_cache.path_for(&entry.key).join(".config");
        if let Ok(text) = tokio::fs::read_to_string(&config_path).await {
            if let Some(parsed) = config_cache::parse_mcu(&text) {
                if !config_cache::validate_mcu(&entry.mcu, &parsed) {
                    skipped.push(skip(entry, SkipReasonKind::ConfigMcuMismatch));
                    continue;
                }
            }
        }

        if let Some(hardware_mcu) = discovery::extract_mcu(&usb.filename) {
            if !config_cache::validate_mcu(&entry.mcu, &hardware_mcu) {
                skipped.push(skip(entry, SkipReasonKind::HardwareMcuMismatch));
                continue;
            }
        }

        used_paths.insert(usb.path.clone());
        candidates.push(FlashCandidate {
            entry: entry.clone(),
            usb,
        });
    }

    (candidates, skipped)
}

fn skip(entry: &DeviceEntry, reason: SkipReasonKind) -> SkipReason {
    SkipReason {
        entry_key: entry.key.clone(),
        reason,
    }
}

/// Moonraker reports MCU firmware versions keyed by object name (`mcu`, or
/// `mcu <name>` for secondary MCUs), not by this registry's device keys, so
/// there is no way to attribute a given report to one `candidate`. Warn
/// generically for every reported MCU whose version differs from the host,
/// the same thing the single-device version report does.
async fn version_advisory(ctx: &mut Context<'_>, candidates: &[FlashCandidate]) {
    if candidates.is_empty() {
        return;
    }
    let klipper_dir = ctx.registry.global().expand_klipper_dir();
    let host_version = ctx.moonraker.get_host_version(&klipper_dir).await;
    let mcu_versions: BTreeMap<String, String> =
        ctx.moonraker.get_mcu_versions().await.unwrap_or_default();

    if let Some(host_version) = &host_version {
        ctx.output.info(&format!("host version: {host_version}"));
    }
    for (mcu, version) in &mcu_versions {
        if Some(version) != host_version.as_ref() {
            ctx.output.warning(&format!(
                "'{mcu}' firmware version ({version}) differs from host"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moonraker::MoonrakerClient;
    use crate::output::NullOutput;
    use crate::registry::Registry;

    fn device(filename: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            path: Utf8PathBuf::from(format!("/dev/serial/by-id/{filename}")),
            filename: filename.to_string(),
        }
    }

    fn entry(key: &str, mcu: &str, pattern: &str) -> DeviceEntry {
        DeviceEntry::builder()
            .key(key)
            .name(key)
            .mcu(mcu)
            .serial_pattern(pattern)
            .build()
    }

    async fn test_context<'a>(registry: &'a mut Registry, config_cache: &'a crate::config_cache::ConfigCache, moonraker: &'a MoonrakerClient, output: &'a NullOutput) -> Context<'a> {
        Context {
            registry,
            config_cache,
            moonraker,
            output,
            cancel: tokio_util::sync::CancellationToken::new(),
            assume_yes: true,
            skip_menuconfig_override: Some(true),
        }
    }

    #[tokio::test]
    async fn scenario_b_hardware_mismatch_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let registry_path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        let mut registry = Registry::load(registry_path).await.unwrap();
        registry
            .add(entry("octopus", "stm32h723", "usb-Klipper_*"))
            .unwrap();

        let config_cache = crate::config_cache::ConfigCache::new(
            Utf8PathBuf::try_from(dir.path().join("configs")).unwrap(),
        );
        let workspace = tempfile::tempdir().unwrap();
        let workspace_path = Utf8PathBuf::try_from(workspace.path().to_path_buf()).unwrap();
        tokio::fs::write(workspace_path.join(".config"), b"CONFIG_MCU=\"stm32h723\"\n")
            .await
            .unwrap();
        config_cache.save_from_workspace("octopus", &workspace_path).await.unwrap();

        let moonraker = MoonrakerClient::new();
        let output = NullOutput;
        let ctx = test_context(&mut registry, &config_cache, &moonraker, &output).await;

        let devices = vec![device("usb-Klipper_rp2040_XYZ-if00")];
        let (candidates, skipped) = filter_candidates(&ctx, &devices).await;

        assert!(candidates.is_empty());
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].reason, SkipReasonKind::HardwareMcuMismatch);
    }

    #[tokio::test]
    async fn scenario_c_ambiguous_pattern_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let registry_path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        let mut registry = Registry::load(registry_path).await.unwrap();
        registry
            .add(entry("octopus", "stm32h723", "usb-Klipper_stm32h723xx_*"))
            .unwrap();

        let config_cache = crate::config_cache::ConfigCache::new(
            Utf8PathBuf::try_from(dir.path().join("configs")).unwrap(),
        );
        let moonraker = MoonrakerClient::new();
        let output = NullOutput;
        let ctx = test_context(&mut registry, &config_cache, &moonraker, &output).await;

        let devices = vec![
            device("usb-Klipper_stm32h723xx_AAA-if00"),
            device("usb-Klipper_stm32h723xx_BBB-if00"),
        ];
        let (candidates, skipped) = filter_candidates(&ctx, &devices).await;

        assert!(candidates.is_empty());
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].reason, SkipReasonKind::DuplicatePatternMatches);
    }

    #[tokio::test]
    async fn blocklisted_entry_is_skipped_before_usb_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let registry_path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        let mut registry = Registry::load(registry_path).await.unwrap();
        registry
            .add(entry("octopus", "stm32h723", "usb-Klipper_*"))
            .unwrap();
        let mut global = registry.global().clone();
        global.blocklist.push("octopus".to_string());
        registry.set_global(global);

        let config_cache = crate::config_cache::ConfigCache::new(
            Utf8PathBuf::try_from(dir.path().join("configs")).unwrap(),
        );
        let moonraker = MoonrakerClient::new();
        let output = NullOutput;
        let ctx = test_context(&mut registry, &config_cache, &moonraker, &output).await;

        let (candidates, skipped) = filter_candidates(&ctx, &[]).await;
        assert!(candidates.is_empty());
        assert_eq!(skipped[0].reason, SkipReasonKind::Blocked);
    }

    #[tokio::test]
    async fn duplicate_usb_path_second_claimant_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let registry_path = Utf8PathBuf::try_from(dir.path().join("registry.json")).unwrap();
        let mut registry = Registry::load(registry_path).await.unwrap();
        registry
            .add(entry("a", "stm32h723", "usb-Klipper_stm32h723xx_AAA*"))
            .unwrap();
        registry
            .add(entry("b", "stm32h723", "usb-Klipper_stm32h723xx_AAA*"))
            .unwrap();

        let config_cache = crate::config_cache::ConfigCache::new(
            Utf8PathBuf::try_from(dir.path().join("configs")).unwrap(),
        );
        let moonraker = MoonrakerClient::new();
        let output = NullOutput;
        let ctx = test_context(&mut registry, &config_cache, &moonraker, &output).await;

        let devices = vec![device("usb-Klipper_stm32h723xx_AAA-if00")];
        let (candidates, skipped) = filter_candidates(&ctx, &devices).await;

        // Both entries match the same single physical device; one is
        // accepted (whichever sorts first by key) and the other is
        // skipped as a duplicate USB path, never both as candidates.
        assert_eq!(candidates.len(), 1);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].reason, SkipReasonKind::DuplicateUsbPath);
    }
}
