// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `strand`: host a worker and client against a backend and log what happens.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use strand_app_core::config::{ConfigService, ConfigStore, Setting};
use strand_app_core::prefs::{ClientConfig, ClientPrefs};
use strand_client::{Client, ClientOptions};
use strand_config_fs::FsConfigStore;
use strand_proto::SessionContext;
use strand_registry::ExtensionRegistry;
use strand_state::StateNode;
use strand_store::DebounceConfig;
use strand_transport::HttpTransport;
use strand_worker::WorkerConfig;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a strand worker and client against a backend")]
struct Args {
    /// Backend base URL (overrides the saved setting)
    #[arg(long)]
    base_url: Option<Url>,
    /// Websocket endpoint for server push
    #[arg(long)]
    socket_url: Option<Url>,
    /// Workspace to open
    #[arg(long)]
    workspace: Option<String>,
    /// Directory holding client.json / prefs.json
    #[arg(long)]
    config: Option<PathBuf>,
    /// Cap each undo stack at this many entries
    #[arg(long)]
    undo_limit: Option<usize>,
    /// Ask the backend to trace graph calls
    #[arg(long)]
    graph_trace: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let (mut config, prefs) = load_settings(args.config.as_deref());
    if let Some(url) = &args.base_url {
        config.base_url = url.as_str().trim_end_matches('/').to_owned();
    }
    if let Some(url) = &args.socket_url {
        config.socket_url = Some(url.to_string());
    }
    if args.undo_limit.is_some() {
        config.undo_limit = args.undo_limit;
    }
    config.graph_trace_enable |= args.graph_trace;

    let source_guid = Uuid::new_v4().to_string();
    info!(base_url = %config.base_url, source_guid = %source_guid, "starting strand");

    let channels = strand_worker::spawn(
        Arc::new(HttpTransport::new(config.base_url.clone())),
        Arc::new(ExtensionRegistry::new()),
        WorkerConfig {
            undo_limit: config.undo_limit,
            focus: DebounceConfig::new(config.focus_debounce(), "focus"),
        },
    )
    .context("starting worker")?;
    let mut client = Client::connect(
        channels.to_worker,
        channels.from_worker,
        ClientOptions::from_settings(&config, &prefs),
    )
    .await
    .context("connecting to worker")?;
    client.update_context(SessionContext {
        current_workspace_id: args.workspace,
        csrf_token: None,
        socket_source_guid: Some(source_guid),
        graph_trace_enable: config.graph_trace_enable,
    })?;

    let (frames_tx, mut frames) = mpsc::unbounded_channel();
    if let Some(raw) = &config.socket_url {
        let url = Url::parse(raw).with_context(|| format!("invalid socket url {raw}"))?;
        tokio::spawn(async move {
            if let Err(err) = socket_feed(&url, frames_tx).await {
                warn!(error = %err, "socket feed stopped");
            }
        });
    }

    let mut events = client.take_events();
    let mut changes = client.mirror().subscribe();
    let mut previous = changes.borrow().clone();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = changes.borrow_and_update().clone();
                let slices = changed_slices(&previous, &current);
                info!(slices = ?slices, "state changed");
                previous = current;
            }
            Some(frame) = frames.recv() => client.socket_message(frame)?,
            Some(event) = events.next() => info!(event = %event.name, data = %event.data, "ui event"),
        }
    }
    Ok(())
}

/// Read saved settings, writing defaults when absent. Failures fall back to
/// defaults with a warning.
fn load_settings(dir: Option<&Path>) -> (ClientConfig, ClientPrefs) {
    let store = match dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    };
    let service = match store {
        Ok(store) => ConfigService::new(store),
        Err(err) => {
            warn!(error = %err, "config store unavailable; using defaults");
            return (ClientConfig::default(), ClientPrefs::default());
        }
    };
    (setting_or_default(&service), setting_or_default(&service))
}

/// Load one setting; unreadable, newer or invalid documents are kept on disk
/// and replaced by defaults for this run.
fn setting_or_default<T: Setting, S: ConfigStore>(service: &ConfigService<S>) -> T {
    service.load_or_init().unwrap_or_else(|err| {
        warn!(error = %err, key = T::KEY, "settings load failed; using defaults");
        T::default()
    })
}

/// Top-level slices whose subtree was replaced between two states.
fn changed_slices(before: &StateNode, after: &StateNode) -> Vec<String> {
    let (Some(before), Some(after)) = (before.as_object(), after.as_object()) else {
        return vec!["<root>".to_owned()];
    };
    after
        .iter()
        .filter(|(key, node)| before.get(*key).is_none_or(|old| !old.same_node(node)))
        .map(|(key, _)| key.clone())
        .collect()
}

async fn socket_feed(url: &Url, frames: mpsc::UnboundedSender<String>) -> Result<()> {
    let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {url}"))?;
    info!(%url, "socket connected");
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => {
                if frames.send(text.as_str().to_owned()).is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    info!("socket closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_proto::diff;

    #[test]
    fn only_patched_slices_are_reported() {
        let before = StateNode::from(json!({"screen": {"pixelRatio": 1}, "workspace": {"currentId": null}}));
        let after_value = json!({"screen": {"pixelRatio": 1}, "workspace": {"currentId": "w1"}});
        let after = before.apply(&diff(&before.to_value(), &after_value)).unwrap();
        assert_eq!(changed_slices(&before, &after), vec!["workspace".to_owned()]);
    }

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from([
            "strand",
            "--base-url",
            "http://localhost:8080/",
            "--workspace",
            "w1",
            "--graph-trace",
        ])
        .unwrap();
        assert_eq!(args.workspace.as_deref(), Some("w1"));
        assert!(args.graph_trace);
        assert!(args.socket_url.is_none());
    }

    #[test]
    fn bad_settings_fall_back_without_overwriting() {
        use std::collections::HashMap;
        use strand_app_core::prefs::CLIENT_CONFIG_KEY;
        use strand_dry_tests::InMemoryConfigStore;

        let doc = br#"{"version": 1, "base_url": "not a url"}"#.to_vec();
        let store = InMemoryConfigStore::with_data(HashMap::from([(CLIENT_CONFIG_KEY.to_owned(), doc.clone())]));
        let service = ConfigService::new(store.clone());
        let config: ClientConfig = setting_or_default(&service);
        assert_eq!(config, ClientConfig::default());
        assert_eq!(store.raw(CLIENT_CONFIG_KEY), Some(doc));

        let prefs: ClientPrefs = setting_or_default(&service);
        assert_eq!(prefs, ClientPrefs::default());
        assert!(store.contains_key("prefs"));
    }
}
