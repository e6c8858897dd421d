use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use serde_json::Value;
use tokio::{signal, sync::broadcast::error::RecvError};
use tracing::{info, warn};

use super::CliContext;
use flowtrace::{
    collab::{
        FileTokenStore, TransportEvent, TransportManager, TransportSettings, emit_tree_update,
        on_tree_update,
    },
    config::CONSOLE_TOKEN_FILE,
};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Document (workflow) id to join
    pub doc_id: String,

    /// JSON payload broadcast as a tree update once joined
    #[arg(long)]
    pub emit_tree: Option<String>,
}

pub async fn execute(args: WatchArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = &context.config_manager;
    let default_token = context.root.join("console_token");
    let token_file = config
        .get_or(CONSOLE_TOKEN_FILE, &default_token.to_string_lossy())
        .await;
    let settings = TransportSettings::from_config(config).await;
    let broadcast: Option<Value> = args
        .emit_tree
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--emit-tree must be JSON")?;

    let manager = TransportManager::websocket(settings, Arc::new(FileTokenStore::new(token_file)));
    let mut events = manager.subscribe();
    manager.connect(&args.doc_id)?;
    on_tree_update(&manager, &args.doc_id, |update| {
        if let Ok(line) = serde_json::to_string(&update) {
            println!("{line}");
        }
    });
    info!(doc_id = %args.doc_id, endpoint = %manager.settings().base_url, "watching");

    let outcome = loop {
        tokio::select! {
            _ = signal::ctrl_c() => break Ok(()),
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    match next_step(&event, &args.doc_id) {
                        Step::Wait => {}
                        Step::Broadcast => {
                            if let Some(payload) = &broadcast {
                                emit_tree_update(&manager, &args.doc_id, payload.clone());
                            }
                        }
                        Step::Stop(outcome) => break outcome,
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break Ok(()),
            }
        }
    };

    manager.disconnect_all();
    if let Err(error) = outcome {
        bail!("{error}");
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Step {
    Wait,
    Broadcast,
    Stop(Result<(), String>),
}

/// What `watch` does after a lifecycle event; events for other documents
/// are only printed.
fn next_step(event: &TransportEvent, doc_id: &str) -> Step {
    if event.doc_id() != doc_id {
        return Step::Wait;
    }
    match event {
        TransportEvent::Connected { .. } => Step::Wait,
        TransportEvent::Joined { .. } => Step::Broadcast,
        TransportEvent::Disconnected { reason, .. } => {
            info!(doc_id, %reason, "watched document disconnected");
            Step::Stop(Ok(()))
        }
        TransportEvent::ConnectError { error, .. } => {
            Step::Stop(Err(format!("connection refused: {error}")))
        }
        TransportEvent::JoinRejected { .. } => {
            Step::Stop(Err("join rejected: session unauthorized".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_watch_stops_when_document_goes_away() {
        let dropped = TransportEvent::Disconnected { doc_id: "d".into(), reason: "transport close".into() };
        assert_eq!(next_step(&dropped, "d"), Step::Stop(Ok(())));
        assert_eq!(next_step(&dropped, "other"), Step::Wait);

        let refused = TransportEvent::ConnectError { doc_id: "d".into(), error: json!({"message": "x"}) };
        assert!(matches!(next_step(&refused, "d"), Step::Stop(Err(_))));

        let rejected = TransportEvent::JoinRejected { doc_id: "d".into(), ack: vec![json!("unauthorized")] };
        assert!(matches!(next_step(&rejected, "d"), Step::Stop(Err(_))));
    }

    #[test]
    fn test_watch_broadcasts_once_joined() {
        let joined = TransportEvent::Joined { doc_id: "d".into(), ack: vec![] };
        assert_eq!(next_step(&joined, "d"), Step::Broadcast);
        let connected = TransportEvent::Connected { doc_id: "d".into(), socket_id: None };
        assert_eq!(next_step(&connected, "d"), Step::Wait);
    }
}
