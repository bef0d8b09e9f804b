//! Console relay against the scripted chat page.
//!
//! Run with: cargo run -p console-relay-demo -- accounts.json [config.json]
//!
//! `accounts.json` holds `{ "testAccount": { "username": ..., "password": ... } }`.
//! A background task plays the other side of a few conversations so that
//! the relay has something to report.

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use chat_relay_core::{
    AccountCredentials, AdapterConfig, AdapterEvent, Envelope, EventBus, EventKind, SessionState,
    scripted::{LoginScript, Row, ScriptedPage},
};
use chat_relay_session::ChatAdapter;
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Deserialize)]
struct Accounts {
    #[serde(rename = "testAccount")]
    test_account: AccountCredentials,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let accounts_path = args
        .next()
        .map_or_else(|| PathBuf::from("accounts.json"), PathBuf::from);
    let config = match args.next() {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            AdapterConfig::from_json_str(&json)?
        }
        None => AdapterConfig::default(),
    };

    let json = std::fs::read_to_string(&accounts_path)
        .with_context(|| format!("reading accounts {}", accounts_path.display()))?;
    let accounts: Accounts = serde_json::from_str(&json).context("parsing accounts")?;

    let page = ScriptedPage::new(LoginScript::Success)
        .with_popup("OK")
        .with_chat("family")
        .with_chat("work")
        .with_open_chat("family");

    let adapter = ChatAdapter::new(page.clone(), config)?;
    subscribe_console(adapter.events());

    let state = adapter.start(accounts.test_account).await?;
    if state != SessionState::Authenticated {
        return Ok(());
    }

    tokio::spawn(play_conversations(page));

    tokio::signal::ctrl_c().await?;
    adapter.shutdown().await?;
    Ok(())
}

fn subscribe_console(bus: &EventBus) {
    for kind in EventKind::ALL {
        bus.subscribe(kind, |envelope: Envelope| async move {
            print_event(&envelope);
            Ok(())
        });
    }
}

fn print_event(envelope: &Envelope) {
    let adapter = envelope.adapter.id();
    match &envelope.event {
        AdapterEvent::Open => tracing::info!(%adapter, "page was opened"),
        AdapterEvent::Close => tracing::info!(%adapter, "page was closed"),
        AdapterEvent::Error { error } => tracing::error!(%adapter, %error, "adapter error"),
        AdapterEvent::LoginSucceeded => tracing::info!(%adapter, "login succeeded"),
        AdapterEvent::LoginFailed { message } => {
            tracing::warn!(%adapter, %message, "login failed");
        }
        AdapterEvent::VerificationCode { verification_code } => tracing::info!(
            %adapter,
            %verification_code,
            "verification code requested, enter it on your phone"
        ),
        AdapterEvent::Message { message } => tracing::debug!(
            chat = %message.chat,
            kind = message.kind.name(),
            "message received"
        ),
        AdapterEvent::Text { message } => tracing::info!(
            sender = %message.sender,
            time = %message.time,
            text = %message.text,
            "text message received"
        ),
        AdapterEvent::Image { message } => tracing::info!(
            sender = %message.sender,
            time = %message.time,
            "image message received"
        ),
    }
}

async fn play_conversations(page: ScriptedPage) {
    let script = [
        ("work", Row::text("w1", "Dana", "09:00", "standup in 5")),
        ("family", Row::text("f1", "Mom", "09:02", "call me later")),
        ("work", Row::image("w2", "Dana", "09:03")),
        ("work", Row::notice("Dana left the chat")),
        ("family", Row::sticker("f2", "Dad", "09:05")),
    ];

    for (n, (chat, row)) in script.into_iter().enumerate() {
        tokio::time::sleep(Duration::from_secs(2)).await;
        page.push(chat, row);
        page.emit_activity();
        tracing::debug!(step = n, chat, "pushed scripted row");
    }
}
