//! Orchestration: wires the Registry, Discovery, Config cache, Build
//! driver, Service scope, Flasher, and Moonraker client into the two
//! single-device and batch flash pipelines.

pub mod batch;
pub mod single;

use camino::Utf8PathBuf;
use tokio_util::sync::CancellationToken;

use crate::config_cache::ConfigCache;
use crate::moonraker::MoonrakerClient;
use crate::output::OutputSink;
use crate::registry::Registry;

/// Shared dependencies both pipelines are built from. Each command
/// constructs one of these and hands it to [`single::run`] or
/// [`batch::run`].
pub struct Context<'a> {
    pub registry: &'a mut Registry,
    pub config_cache: &'a ConfigCache,
    pub moonraker: &'a MoonrakerClient,
    pub output: &'a dyn OutputSink,
    pub cancel: CancellationToken,
    pub assume_yes: bool,
    pub skip_menuconfig_override: Option<bool>,
}

/// The Klipper source tree doubles as the build workspace: every build and
/// flash subprocess runs with this as its working directory. Batch mode
/// still builds one device at a time into this same tree, since the tree
/// itself is the shared, non-parallelizable resource.
pub fn build_workspace(klipper_dir: &Utf8PathBuf) -> Utf8PathBuf {
    klipper_dir.clone()
}
