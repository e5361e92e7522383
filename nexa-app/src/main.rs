//! NEXA console host.
//!
//! Plain lines are chat input. `/attach <path>` stages a file for the next
//! message, `/voice` toggles the live voice session, `/devices` lists audio
//! devices, `/model`, `/mode` and `/lang` change the request profile and
//! `/quit` exits. Logs go to stderr so the transcript on stdout
//! stays readable.

mod chat;
mod commands;
mod gemini;
mod model_profiles;
mod settings;
mod state;
mod storage;
mod transform;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nexa_core::audio::device::{list_devices, DeviceDirection};
use nexa_core::{ClientStatusEvent, GeminiLiveTransport, LiveVoiceClient};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use chat::{ChatOutcome, ChatService, Conversation};
use commands::{ConsoleInput, Selection};
use gemini::{GeminiClient, GenerativeBackend};
use model_profiles::{model_profile_catalog, AiModel};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use state::{Attachment, Language, Message, NexaState, Role, SystemMode};
use storage::LocalStore;

/// Delay before the dashboard ticker is fetched, so boot output settles first.
const TICKER_DELAY: Duration = Duration::from_millis(800);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nexa=info")),
        )
        .init();

    info!("NEXA starting");

    let settings_path = default_settings_path();
    let mut app_settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        model = app_settings.model.as_str(),
        mode = app_settings.mode.as_str(),
        language = app_settings.language.as_str(),
        voice = %app_settings.voice_name,
        "settings loaded"
    );
    let api_key = app_settings.resolved_api_key().unwrap_or_default();
    if api_key.is_empty() {
        warn!("no API key configured; set GEMINI_API_KEY or apiKey in settings.json");
    }

    // ── Chat ──────────────────────────────────────────────────────────────
    let backend: Arc<dyn GenerativeBackend> = Arc::new(GeminiClient::new(api_key.clone())?);
    let store = LocalStore::new(LocalStore::default_db_path())
        .map_err(anyhow::Error::msg)
        .context("failed to initialize local encrypted storage")?;
    let nexa_state = NexaState {
        mode: app_settings.mode,
        model: app_settings.model,
        language: app_settings.language,
    };
    let mut conversation = Conversation::restore(
        nexa_state,
        ChatService::new(Arc::clone(&backend), app_settings.temperature),
        store,
    );

    let ticker = ChatService::new(Arc::clone(&backend), app_settings.temperature);
    tokio::spawn(async move {
        tokio::time::sleep(TICKER_DELAY).await;
        for line in ticker.dashboard_ticker().await {
            println!("  ▸ {line}");
        }
    });

    // ── Voice ─────────────────────────────────────────────────────────────
    let voice = LiveVoiceClient::with_cpal(
        app_settings.client_config(),
        Arc::new(GeminiLiveTransport::new(api_key)),
    );
    let mut status_rx = voice.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => print_status(&event),
                Err(RecvError::Lagged(n)) => {
                    warn!("status receiver lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!(
        "NEXA v7.3 ready. {} message(s) in memory. /attach <path>, /voice, /devices, /model, /mode, /lang, /quit",
        conversation.history().len()
    );

    // ── Console loop ──────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut staged: Option<Attachment> = None;
    loop {
        prompt().await;
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match ConsoleInput::parse(&line) {
            ConsoleInput::Empty => {}
            ConsoleInput::Quit => break,
            ConsoleInput::Unknown(cmd) => println!("unknown command: {cmd}"),
            ConsoleInput::Attach(path) => match Attachment::from_path(&path) {
                Ok(att) => {
                    println!(
                        "staged {} ({})",
                        att.file_name.as_deref().unwrap_or("attachment"),
                        att.mime_type
                    );
                    staged = Some(att);
                }
                Err(e) => println!("cannot attach {}: {e}", path.display()),
            },
            ConsoleInput::Devices => print_devices(),
            ConsoleInput::Voice => toggle_voice(&voice).await,
            ConsoleInput::Select(which, None) => print_choices(which),
            ConsoleInput::Select(which, Some(value)) => {
                if apply_selection(&mut app_settings, which, &value) {
                    conversation.set_state(NexaState {
                        mode: app_settings.mode,
                        model: app_settings.model,
                        language: app_settings.language,
                    });
                    if let Err(e) = save_settings(&settings_path, &app_settings) {
                        warn!("failed to save settings: {e}");
                    }
                    let state = conversation.state();
                    println!(
                        "Mode: {} | Model: {} | Language: {}",
                        state.mode.as_str(),
                        state.model.as_str(),
                        state.language.as_str()
                    );
                } else {
                    println!("unrecognized choice: {value}");
                }
            }
            ConsoleInput::Chat(text) => {
                let outcome = conversation.submit(&text, staged.take()).await;
                print_outcome(&outcome);
            }
        }
    }

    if let Err(e) = voice.stop().await {
        warn!("voice teardown failed: {e}");
    }
    info!("NEXA exiting");
    Ok(())
}

async fn prompt() {
    let mut stdout = tokio::io::stdout();
    let _ = stdout.write_all(b"> ").await;
    let _ = stdout.flush().await;
}

async fn toggle_voice(voice: &LiveVoiceClient) {
    if voice.state().is_busy() {
        if let Err(e) = voice.stop().await {
            println!("voice stop failed: {e}");
        }
    } else if let Err(e) = voice.start().await {
        // Reported through the status stream as well.
        warn!("voice start failed: {e}");
    }
}

fn apply_selection(settings: &mut AppSettings, which: Selection, value: &str) -> bool {
    match which {
        Selection::Model => AiModel::parse(value).map(|m| settings.model = m),
        Selection::Mode => SystemMode::parse(value).map(|m| settings.mode = m),
        Selection::Language => Language::parse(value).map(|l| settings.language = l),
    }
    .is_some()
}

fn print_choices(which: Selection) {
    match which {
        Selection::Model => {
            for profile in model_profile_catalog() {
                let thinking = profile
                    .thinking_budget
                    .map(|b| format!(", thinking budget {b}"))
                    .unwrap_or_default();
                println!("  {} -> {}{thinking}", profile.model.as_str(), profile.api_model);
            }
        }
        Selection::Mode => SystemMode::ALL
            .iter()
            .for_each(|m| println!("  {}", m.as_str())),
        Selection::Language => Language::ALL
            .iter()
            .for_each(|l| println!("  {}", l.as_str())),
    }
}

fn print_status(event: &ClientStatusEvent) {
    match &event.error {
        Some(err) => println!("[voice] {} ({err})", event.message),
        None => println!("[voice] {}", event.message),
    }
}

fn print_devices() {
    let devices = list_devices();
    if devices.is_empty() {
        println!("no audio devices found");
        return;
    }
    for device in devices {
        let direction = match device.direction {
            DeviceDirection::Input => "in ",
            DeviceDirection::Output => "out",
        };
        let default = if device.is_default { " (default)" } else { "" };
        let loopback = if device.is_loopback_like {
            " [loopback]"
        } else {
            ""
        };
        println!("  {direction} {}{default}{loopback}", device.name);
    }
}

fn print_outcome(outcome: &ChatOutcome) {
    match outcome {
        ChatOutcome::History(history) if history.is_empty() => println!("memory is empty"),
        ChatOutcome::History(history) => history.iter().for_each(print_message),
        ChatOutcome::Purged(notice) => print_message(notice),
        ChatOutcome::Reply(reply) => print_message(reply),
    }
}

fn print_message(message: &Message) {
    let stamp = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(message.timestamp)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_default();
    let who = match message.role {
        Role::User => "USER",
        Role::Model => "NEXA",
        Role::System => "SYSTEM",
    };
    println!("[{stamp}] {who}:");
    if let Some(att) = &message.attachment {
        println!("  (attachment: {})", att.file_name.as_deref().unwrap_or(&att.mime_type));
    }
    println!("{}\n", message.content);
}
