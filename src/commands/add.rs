use clap::Parser;
use color_eyre::Result;

use crate::output::OutputSink;

use crate::types::DeviceEntry;

use super::{CliFlashMethod, GlobalArgs};

#[derive(Debug, Parser)]
pub struct Add {
    /// Human-readable label shown in `list`/`status`.
    name: String,
    /// MCU family, e.g. `stm32h723`.
    mcu: String,
    /// Glob pattern matched against USB-serial-by-id filenames.
    serial_pattern: String,
    /// Unique slug identifying this device, e.g. `octopus-pro-v1-1`.
    /// Derived from `name` (with a `-2`, `-3`, ... suffix on collision) if
    /// omitted.
    #[arg(long)]
    key: Option<String>,
    /// Flash method override; defaults to `global.default_flash_method`.
    #[arg(long, value_enum)]
    flash_method: Option<CliFlashMethod>,
    /// Register the entry but exclude it from `flash-all`.
    #[arg(long)]
    not_flashable: bool,
}

impl Add {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let mut registry = global.load_registry().await?;
        let output = global.output();

        let key = match &self.key {
            Some(key) => key.clone(),
            None => registry.unique_key_from_name(&self.name)?,
        };

        let entry = DeviceEntry::builder()
            .key(key.clone())
            .name(self.name.clone())
            .mcu(self.mcu.clone())
            .serial_pattern(self.serial_pattern.clone())
            .maybe_flash_method(self.flash_method.map(Into::into))
            .flashable(!self.not_flashable)
            .build();

        entry
            .validate()
            .map_err(|reason| color_eyre::eyre::eyre!("invalid device entry: {reason}"))?;

        registry.add(entry)?;
        registry.save().await?;
        output.success(&format!("registered '{key}'"));
        Ok(())
    }
}
