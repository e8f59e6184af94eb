use clap::Parser;
use color_eyre::Result;

use crate::output::OutputSink;

use crate::discovery::{self, DEFAULT_SCAN_DIR};

use super::GlobalArgs;

#[derive(Debug, Parser)]
pub struct Status {}

impl Status {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let registry = global.load_registry().await?;
        let moonraker = global.moonraker();
        let output = global.output();

        output.phase("Printer");
        match moonraker.get_print_status().await {
            Some(status) => output.info(&format!(
                "{:?} ({}, {:.0}%)",
                status.state, status.filename, status.progress
            )),
            None => output.warning("Moonraker is unreachable"),
        }

        let klipper_dir = registry.global().expand_klipper_dir();
        if let Some(host_version) = moonraker.get_host_version(&klipper_dir).await {
            output.info(&format!("host version: {host_version}"));
        }

        output.phase("USB devices");
        let scan_dir = camino::Utf8PathBuf::from(DEFAULT_SCAN_DIR);
        let devices = discovery::scan(&scan_dir).await?;
        for device in &devices {
            let mcu = discovery::extract_mcu(&device.filename).unwrap_or_else(|| "?".into());
            let registered = registry
                .list()
                .find(|e| !discovery::match_all(&e.serial_pattern, std::slice::from_ref(device)).is_empty());
            match registered {
                Some(entry) => output.info(&format!("{} -> '{}' (mcu={mcu})", device.filename, entry.key)),
                None => output.info(&format!("{} (mcu={mcu}, unregistered)", device.filename)),
            }
        }

        Ok(())
    }
}
