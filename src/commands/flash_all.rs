use clap::Parser;
use color_eyre::Result;

use crate::output::OutputSink;

use crate::config_cache::ConfigCache;
use crate::orchestrator::{self, Context};

use super::GlobalArgs;

#[derive(Debug, Parser)]
pub struct FlashAll {}

impl FlashAll {
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
            skip_menuconfig_override: Some(true),
        };

        let outcome = orchestrator::batch::run(&mut ctx).await?;
        if !outcome.skipped.is_empty() {
            output.divider();
            output.info(&format!("{} device(s) skipped", outcome.skipped.len()));
        }
        Ok(())
    }
}
