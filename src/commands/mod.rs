//! CLI subcommands. Each module owns one `clap::Parser`
//! struct with a `run(&self, &GlobalArgs) -> color_eyre::Result<()>` method,
//! dispatched from `main`.

pub mod add;
pub mod config;
pub mod edit;
pub mod flash;
pub mod flash_all;
pub mod list;
pub mod remove;
pub mod status;

use camino::Utf8PathBuf;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;

use crate::moonraker::MoonrakerClient;
use crate::output::{OutputSink, TerminalOutput};
use crate::registry::Registry;
use crate::types::FlashMethod;

/// `clap::ValueEnum` mirror of [`FlashMethod`], shared by `add` and `edit`.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliFlashMethod {
    Katapult,
    MakeFlash,
}

impl From<CliFlashMethod> for FlashMethod {
    fn from(value: CliFlashMethod) -> Self {
        match value {
            CliFlashMethod::Katapult => FlashMethod::Katapult,
            CliFlashMethod::MakeFlash => FlashMethod::MakeFlash,
        }
    }
}

/// Flags parsed once in `main` and threaded into every subcommand, plus
/// the process-wide cancellation token a Ctrl-C handler triggers.
pub struct GlobalArgs {
    pub verbose: bool,
    pub registry_path: Option<Utf8PathBuf>,
    pub assume_yes: bool,
    pub cancel: CancellationToken,
}

impl GlobalArgs {
    pub fn resolve_registry_path(&self) -> Utf8PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(Registry::default_path)
    }

    pub async fn load_registry(&self) -> Result<Registry> {
        Ok(Registry::load(self.resolve_registry_path()).await?)
    }

    pub fn output(&self) -> impl OutputSink {
        TerminalOutput::new(self.verbose)
    }

    pub fn moonraker(&self) -> MoonrakerClient {
        MoonrakerClient::new()
    }
}
