//! Terminal client for a peer session.
//!
//! Run with: cargo run -p peerlink-cli -- host [label]
//!       or: cargo run -p peerlink-cli -- join <code>
//!
//! Server, role and username come from `PEERLINK_SERVER_URL`,
//! `PEERLINK_ROLE` and `PEERLINK_USERNAME`.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, bail};
use futures::StreamExt;
use peerlink_core::{Body, Payload, Role};
use peerlink_session::{ClientConfig, SessionClient};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Feature tag the demo worker consumes.
const FEATURE: &str = "remote";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Ticks between follower tallies.
const LOGS_EVERY: u64 = 20;

enum Mode {
    Host(Option<String>),
    Join(String),
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Mode> {
    match args.next().as_deref() {
        Some("host") => Ok(Mode::Host(args.next())),
        Some("join") => Ok(Mode::Join(
            args.next().context("usage: peerlink-cli join <code>")?,
        )),
        Some(other) => bail!("unknown command `{other}`; expected `host` or `join`"),
        None => bail!("usage: peerlink-cli host [label] | join <code>"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mode = parse_args(std::env::args().skip(1))?;
    let config = ClientConfig::from_env();
    let client = Arc::new(SessionClient::connect(&config).context("building session client")?);
    tracing::info!(server = %config.base_url, role = %config.role, "starting");

    // Echo the local event log.
    let mut lines = client.event_lines();
    tokio::spawn(async move {
        while let Some(line) = lines.next().await {
            println!("{line}");
        }
    });

    client.start().await;
    let details = match mode {
        Mode::Host(label) => client.start_session(label.as_deref()).await,
        Mode::Join(code) => client.join_session(&code).await?,
    };
    tracing::info!(session = ?details.session_id, state = ?details.state, "session ready");

    let worker = tokio::spawn(run_worker(Arc::clone(&client)));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    worker.abort();
    client.leave_session().await;
    client.shutdown().await;
    Ok(())
}

/// One polling feature: consume tagged commands, report status, and have
/// followers send a periodic tally to their leaders.
async fn run_worker(client: Arc<SessionClient>) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut handled: u64 = 0;
    let mut ticks: u64 = 0;
    loop {
        ticker.tick().await;
        ticks += 1;

        for envelope in client.poll_feature(FEATURE, 10, None) {
            if let Body::Command(command) = &envelope.body {
                handled += 1;
                tracing::info!(
                    from = %envelope.from_client.short(),
                    command = %command.command,
                    "remote command"
                );
            }
        }
        for envelope in client.poll(10, None) {
            tracing::debug!(kind = %envelope.kind(), from = %envelope.from_client.short(), "event");
        }

        let role = client.context().role();
        client.publish_status(role, payload(json!({"feature": FEATURE, "role": role.as_str()})));

        if role == Role::Follower && ticks % LOGS_EVERY == 0 {
            let sent = client
                .send_logs(payload(json!({"handled": handled})), &[], None)
                .await;
            tracing::debug!(sent, "tally sent");
        }
    }
}

fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    }
}
