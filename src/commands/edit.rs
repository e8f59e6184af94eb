use clap::Parser;
use color_eyre::Result;

use crate::output::OutputSink;

use crate::config_cache::ConfigCache;
use crate::types::FlashMethod;

use super::{CliFlashMethod, GlobalArgs};

#[derive(Debug, Parser)]
pub struct Edit {
    /// Existing registry key to modify.
    key: String,
    /// New key to rename this entry to.
    #[arg(long)]
    new_key: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    mcu: Option<String>,
    #[arg(long)]
    serial_pattern: Option<String>,
    #[arg(long, value_enum)]
    flash_method: Option<CliFlashMethod>,
    #[arg(long)]
    flashable: Option<bool>,
}

impl Edit {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let mut registry = global.load_registry().await?;
        let config_cache = ConfigCache::from_xdg();
        let output = global.output();

        let existing = registry
            .get(&self.key)
            .cloned()
            .ok_or_else(|| color_eyre::eyre::eyre!("no device registered with key '{}'", self.key))?;

        let new_key = self.new_key.clone().unwrap_or_else(|| existing.key.clone());
        let updated = crate::types::DeviceEntry::builder()
            .key(new_key.clone())
            .name(self.name.clone().unwrap_or(existing.name))
            .mcu(self.mcu.clone().unwrap_or(existing.mcu))
            .serial_pattern(self.serial_pattern.clone().unwrap_or(existing.serial_pattern))
            .maybe_flash_method(
                self.flash_method
                    .map(Into::<FlashMethod>::into)
                    .or(existing.flash_method),
            )
            .flashable(self.flashable.unwrap_or(existing.flashable))
            .build();

        updated
            .validate()
            .map_err(|reason| color_eyre::eyre::eyre!("invalid device entry: {reason}"))?;

        if new_key != self.key {
            config_cache.rename(&self.key, &new_key).await?;
        }
        registry.update(&self.key, updated)?;
        registry.save().await?;
        output.success(&format!("updated '{}'", new_key));
        Ok(())
    }
}
