use clap::Parser;
use color_eyre::Result;

use crate::output::OutputSink;

use crate::discovery::{self, DEFAULT_SCAN_DIR};

use super::GlobalArgs;

#[derive(Debug, Parser)]
pub struct List {}

impl List {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let registry = global.load_registry().await?;
        let output = global.output();

        let scan_dir = camino::Utf8PathBuf::from(DEFAULT_SCAN_DIR);
        let devices = discovery::scan(&scan_dir).await?;

        output.phase("Registered devices");
        for entry in registry.list() {
            let connected = !discovery::match_all(&entry.serial_pattern, &devices).is_empty();
            let status = if connected { "connected" } else { "disconnected" };
            output.info(&format!(
                "{:<24} {:<18} mcu={:<12} flashable={} [{status}]",
                entry.key, entry.name, entry.mcu, entry.flashable
            ));
        }

        let unregistered: Vec<_> = devices
            .iter()
            .filter(|d| {
                registry
                    .list()
                    .all(|e| discovery::match_all(&e.serial_pattern, std::slice::from_ref(d)).is_empty())
            })
            .collect();
        if !unregistered.is_empty() {
            output.phase("Unregistered USB devices");
            for device in unregistered {
                let label = if discovery::is_supported(&device.filename) {
                    "unregistered"
                } else {
                    "blocked"
                };
                output.info(&format!("{} [{label}]", device.filename));
            }
        }

        Ok(())
    }
}
