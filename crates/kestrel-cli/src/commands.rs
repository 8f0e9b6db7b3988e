//! CLI command implementations

use crate::output::{self, OutputFormat, TranscriptRow};
use anyhow::Context;
use kestrel_core::engine::sim::{SimAction, SimController, SimFactory};
use kestrel_core::{
    CacheManager, HeadlessPlatform, HostConfig, MethodCall, PlayerHost, RemoteCommand,
    SessionEvent,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

/// Script file accepted by `kestrel run`
#[derive(Debug, Deserialize)]
pub struct Script {
    /// Bundled assets known to the headless platform (key -> path)
    #[serde(default)]
    pub assets: HashMap<String, PathBuf>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Host method call, routed exactly as the UI would send it
    Call(MethodCall),
    /// Start collecting a session's events into the transcript
    Listen { texture_id: i64 },
    /// Drive the simulated engine behind a session
    Sim {
        texture_id: i64,
        #[serde(flatten)]
        action: SimAction,
    },
    /// Lock-screen command
    Remote(RemoteCommand),
    Wait { ms: u64 },
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<HostConfig> {
    match path {
        Some(path) => HostConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(HostConfig::default()),
    }
}

/// Run a script file
pub async fn run(
    config: HostConfig,
    script_path: &Path,
    settle_ms: u64,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script {}", script_path.display()))?;
    let script: Script = serde_json::from_str(&content).context("Invalid script")?;
    info!(steps = script.steps.len(), "Running script");

    let rows = execute(config, script, Duration::from_millis(settle_ms)).await?;
    output::print_transcript(&rows, format)
}

/// Executes every step, collecting call results and events in order
pub async fn execute(
    config: HostConfig,
    script: Script,
    settle: Duration,
) -> anyhow::Result<Vec<TranscriptRow>> {
    let platform = Arc::new(HeadlessPlatform::new());
    for (asset, path) in script.assets {
        platform.add_asset(asset, path);
    }
    let factory = SimFactory::new();
    let host = PlayerHost::new(config, platform, Arc::new(factory.clone()))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<(i64, SessionEvent)>();
    let mut controllers: HashMap<i64, SimController> = HashMap::new();
    let mut rows = Vec::new();

    for (index, step) in script.steps.into_iter().enumerate() {
        let step_no = index + 1;
        debug!(step = step_no, ?step, "Executing step");
        match step {
            Step::Call(call) => {
                let method = call.method.clone();
                let result = host.handle(call).await;
                if method == "create" {
                    if let Some(texture_id) = created_texture(&result) {
                        if let Some(controller) = factory.last() {
                            controllers.insert(texture_id, controller);
                        }
                    }
                }
                rows.push(TranscriptRow::call(step_no, &method, &result));
            }
            Step::Listen { texture_id } => {
                let mut stream = host.listen(texture_id).await?;
                let tx = event_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = stream.recv().await {
                        if tx.send((texture_id, event)).is_err() {
                            break;
                        }
                    }
                });
                rows.push(TranscriptRow::note(step_no, "listen", texture_id.to_string()));
            }
            Step::Sim { texture_id, action } => match controllers.get(&texture_id) {
                Some(controller) => {
                    rows.push(TranscriptRow::note(step_no, "sim", format!("{action:?}")));
                    controller.apply(action);
                }
                None => {
                    warn!(texture_id, "No simulated engine for texture");
                    rows.push(TranscriptRow::note(
                        step_no,
                        "sim",
                        format!("unknown texture {texture_id}"),
                    ));
                }
            },
            Step::Remote(command) => {
                let handled = host.handle_remote_command(command).await?;
                rows.push(TranscriptRow::note(
                    step_no,
                    "remote",
                    format!("{command:?} handled={handled}"),
                ));
            }
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        }

        // Let session tasks react before collecting what they emitted
        tokio::time::sleep(Duration::from_millis(1)).await;
        while let Ok((texture_id, event)) = event_rx.try_recv() {
            rows.push(TranscriptRow::event(step_no, texture_id, &event));
        }
    }

    tokio::time::sleep(settle).await;
    let last = rows.last().map_or(0, |row| row.step);
    while let Ok((texture_id, event)) = event_rx.try_recv() {
        rows.push(TranscriptRow::event(last, texture_id, &event));
    }

    host.init().await;
    Ok(rows)
}

fn created_texture(result: &kestrel_core::Result<serde_json::Value>) -> Option<i64> {
    result.as_ref().ok()?.get("textureId")?.as_i64()
}

/// Print the proxy URL for an origin URL
pub fn rewrite(config: HostConfig, url: &str, format: OutputFormat) -> anyhow::Result<()> {
    let origin = Url::parse(url)?;
    let cache = CacheManager::new(config.cache);
    let local = cache.rewrite(&origin)?;
    output::print_value(&local.as_str(), local.as_str(), format)
}

/// Print the origin URL behind a proxy URL
pub fn origin(config: HostConfig, url: &str, format: OutputFormat) -> anyhow::Result<()> {
    let local = Url::parse(url)?;
    let cache = CacheManager::new(config.cache);
    let origin = cache.origin_of(&local)?;
    output::print_value(&origin.as_str(), origin.as_str(), format)
}

/// Pre-cache a playlist
pub async fn precache(
    mut config: HostConfig,
    url: &str,
    segments: Option<usize>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let url = Url::parse(url)?;
    if segments.is_some() {
        config.cache.max_precache_segments = segments;
    }
    let cache = CacheManager::new(config.cache);
    let report = cache.pre_cache(&url).await?;
    let stats = cache.stats();
    info!(entries = stats.entries, bytes = stats.bytes, "Cache filled");
    output::print_report(url.as_str(), &report, format)
}

pub fn show_config(config: &HostConfig, format: OutputFormat) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    output::print_value(config, &json, format)
}
