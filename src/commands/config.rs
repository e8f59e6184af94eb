use clap::Parser;
use color_eyre::Result;

use crate::output::OutputSink;

use super::GlobalArgs;

#[derive(Debug, Parser)]
pub struct Config {
    #[arg(long)]
    klipper_dir: Option<String>,
    #[arg(long)]
    katapult_dir: Option<String>,
    #[arg(long, value_enum)]
    default_flash_method: Option<super::CliFlashMethod>,
    #[arg(long)]
    allow_flash_fallback: Option<bool>,
    #[arg(long)]
    stagger_delay_seconds: Option<u32>,
    #[arg(long)]
    return_delay_seconds: Option<u32>,
    #[arg(long)]
    skip_menuconfig: Option<bool>,
}

impl Config {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let mut registry = global.load_registry().await?;
        let output = global.output();

        let any_set = self.klipper_dir.is_some()
            || self.katapult_dir.is_some()
            || self.default_flash_method.is_some()
            || self.allow_flash_fallback.is_some()
            || self.stagger_delay_seconds.is_some()
            || self.return_delay_seconds.is_some()
            || self.skip_menuconfig.is_some();

        if !any_set {
            let global_config = registry.global();
            output.phase("Global configuration");
            output.info(&format!("klipper_dir: {}", global_config.klipper_dir));
            output.info(&format!("katapult_dir: {}", global_config.katapult_dir));
            output.info(&format!("default_flash_method: {}", global_config.default_flash_method));
            output.info(&format!("allow_flash_fallback: {}", global_config.allow_flash_fallback));
            output.info(&format!("stagger_delay_seconds: {}", global_config.stagger_delay_seconds));
            output.info(&format!("return_delay_seconds: {}", global_config.return_delay_seconds));
            output.info(&format!("skip_menuconfig: {}", global_config.skip_menuconfig));
            return Ok(());
        }

        let mut updated = registry.global().clone();
        if let Some(v) = &self.klipper_dir {
            updated.klipper_dir = v.clone();
        }
        if let Some(v) = &self.katapult_dir {
            updated.katapult_dir = v.clone();
        }
        if let Some(v) = self.default_flash_method {
            updated.default_flash_method = v.into();
        }
        if let Some(v) = self.allow_flash_fallback {
            updated.allow_flash_fallback = v;
        }
        if let Some(v) = self.stagger_delay_seconds {
            updated.stagger_delay_seconds = v;
        }
        if let Some(v) = self.return_delay_seconds {
            updated.return_delay_seconds = v;
        }
        if let Some(v) = self.skip_menuconfig {
            updated.skip_menuconfig = v;
        }

        updated
            .validate()
            .map_err(|reason| color_eyre::eyre::eyre!("invalid configuration: {reason}"))?;

        registry.set_global(updated);
        registry.save().await?;
        output.success("configuration updated");
        Ok(())
    }
}
