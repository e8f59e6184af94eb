use clap::Parser;
use color_eyre::Result;

use crate::config_cache::ConfigCache;
use crate::orchestrator::{self, Context};

use super::GlobalArgs;

#[derive(Debug, Parser)]
pub struct Flash {
    /// Registry key of the device to flash. Omit to pick interactively
    /// among currently connected registered devices.
    key: Option<String>,

    /// Skip the interactive menuconfig step and reuse the cached config
    /// as-is, overriding `global.skip_menuconfig`.
    #[arg(long)]
    skip_menuconfig: bool,
}

impl Flash {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let mut registry = global.load_registry().await?;
        let config_cache = ConfigCache::from_xdg();
        let moonraker = global.moonraker();
        let output = global.output();

        let mut ctx = Context {
            registry: &mut registry,
            config_cache: &config_cache,
            moonraker: &moonraker,
            output: &output,
            cancel: global.cancel.clone(),
            assume_yes: global.assume_yes,
            skip_menuconfig_override: self.skip_menuconfig.then_some(true),
        };

        orchestrator::single::run(&mut ctx, self.key.as_deref()).await?;
        Ok(())
    }
}
