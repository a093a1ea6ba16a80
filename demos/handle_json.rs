//! Exchanges JSON messages with a script over `send`/`recv`.
//!
//! Run with `cargo run --example handle_json`.

use anyhow::{Context, Result};
use jsworker::{discard_send_sync, Worker};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;

const SCRIPT: &str = include_str!("handle_json.js");

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    #[serde(rename = "messageType")]
    message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(default)]
    handled: bool,
}

fn run_worker(inbox: mpsc::Receiver<Message>, outbox: mpsc::Sender<Message>) -> Result<()> {
    let worker = Worker::new(
        move |raw| match serde_json::from_str::<Message>(raw) {
            Ok(message) => {
                let _ = outbox.send(message);
            }
            Err(err) => warn!(error = %err, "script sent malformed JSON"),
        },
        discard_send_sync,
    )?;

    worker.load("handle_json.js", SCRIPT)?;

    for message in inbox {
        let raw = serde_json::to_string(&message)?;
        if let Err(err) = worker.send(&raw) {
            warn!(error = %err, "delivery failed");
        }
    }

    worker.dispose();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let (to_worker, inbox) = mpsc::channel();
    let (outbox, from_worker) = mpsc::channel();

    let runner = thread::Builder::new()
        .name("handle-json-worker".to_string())
        .spawn(move || run_worker(inbox, outbox))?;

    for content in ["foo", "bar"] {
        to_worker.send(Message {
            message_type: "msg".to_string(),
            content: Some(content.into()),
            handled: false,
        })?;
    }
    drop(to_worker);

    for message in from_worker {
        info!(?message, "got message");
    }

    runner
        .join()
        .map_err(|_| anyhow::anyhow!("worker thread panicked"))?
        .context("worker failed")
}
