//! Read-only Moonraker client. Every call degrades to
//! `None` rather than raising: the safety checks that consume this client
//! treat "unreachable" as its own outcome, not an error to propagate.

use std::time::Duration;

use camino::Utf8Path;
use cmd_lib::run_fun;
use serde::Deserialize;

use crate::types::{PrintState, PrintStatus};

const DEFAULT_BASE_URL: &str = "http://localhost:7125";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MoonrakerClient {
    client: reqwest::Client,
    base_url: String,
}

impl MoonrakerClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static config should always build");
        MoonrakerClient {
            client,
            base_url: base_url.to_string(),
        }
    }

    /// `GET /printer/objects/query?print_stats=...`, returning `None` on
    /// any transport, HTTP, or parse failure.
    pub async fn get_print_status(&self) -> Option<PrintStatus> {
        let url = format!(
            "{}/printer/objects/query?print_stats=state,filename,progress&display_status=progress",
            self.base_url
        );
        let response = self.client.get(&url).send().await.ok()?;
        let body: ObjectsQueryResponse = response.json().await.ok()?;
        let print_stats = body.result.status.print_stats?;
        Some(PrintStatus {
            state: print_stats.state,
            filename: print_stats.filename.unwrap_or_default(),
            progress: print_stats.progress.unwrap_or(0.0),
        })
    }

    /// `GET /printer/objects/query?mcu=...` for every MCU the printer
    /// reports (just `mcu` in the single-MCU case). Returns `None` if the
    /// host is unreachable; an empty map if reachable but no MCU reports.
    pub async fn get_mcu_versions(&self) -> Option<std::collections::BTreeMap<String, String>> {
        let url = format!("{}/printer/objects/query?mcu=mcu_version", self.base_url);
        let response = self.client.get(&url).send().await.ok()?;
        let body: McuQueryResponse = response.json().await.ok()?;
        Some(body.result.status.mcu.map(|m| {
            let mut out = std::collections::BTreeMap::new();
            out.insert("mcu".to_string(), m.mcu_version);
            out
        }).unwrap_or_default())
    }

    /// Shells out to `git describe` inside `klipper_dir` to resolve the
    /// host-side Klipper version, the same string Moonraker itself reports.
    pub async fn get_host_version(&self, klipper_dir: &Utf8Path) -> Option<String> {
        let dir = klipper_dir.to_owned();
        tokio::task::spawn_blocking(move || -> Option<String> {
            run_fun!(cd $dir; git describe --always --tags --long --dirty).ok()
        })
        .await
        .ok()
        .flatten()
    }
}

impl Default for MoonrakerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ObjectsQueryResponse {
    result: ObjectsQueryResult,
}

#[derive(Debug, Deserialize)]
struct ObjectsQueryResult {
    status: ObjectsStatus,
}

#[derive(Debug, Deserialize)]
struct ObjectsStatus {
    print_stats: Option<PrintStats>,
}

#[derive(Debug, Deserialize)]
struct PrintStats {
    state: PrintState,
    filename: Option<String>,
    progress: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct McuQueryResponse {
    result: McuQueryResult,
}

#[derive(Debug, Deserialize)]
struct McuQueryResult {
    status: McuStatus,
}

#[derive(Debug, Deserialize)]
struct McuStatus {
    mcu: Option<McuObject>,
}

#[derive(Debug, Deserialize)]
struct McuObject {
    mcu_version: String,
}
