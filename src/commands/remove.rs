use clap::Parser;
use color_eyre::Result;

use crate::output::OutputSink;

use crate::config_cache::ConfigCache;

use super::GlobalArgs;

#[derive(Debug, Parser)]
pub struct Remove {
    key: String,
}

impl Remove {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let mut registry = global.load_registry().await?;
        let config_cache = ConfigCache::from_xdg();
        let output = global.output();

        registry.remove(&self.key)?;
        registry.save().await?;
        config_cache.remove(&self.key).await?;

        output.success(&format!("removed '{}'", self.key));
        Ok(())
    }
}
