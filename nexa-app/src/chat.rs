//! Chat orchestration: local commands, transcript memory and model routing.
//!
//! Remote failures never escape as errors. They come back as transcript
//! text so the conversation can continue.

use std::sync::Arc;

use tracing::{info, warn};

use crate::commands::{ChatCommand, MEMORY_PURGED_MESSAGE};
use crate::gemini::{Content, GenerativeBackend, InlineData, Part, TextRequest};
use crate::model_profiles::{system_instruction, FILE_ANALYSIS_MODEL};
use crate::state::{Attachment, Message, NexaState, Role};
use crate::storage::LocalStore;
use crate::transform::{
    data_url, find_nano_request, is_edit_request, strip_data_url_prefix, substitute_nano,
};

pub const NO_DATA_REPLY: &str = "NEXA v7.3: No data received.";
pub const EDIT_FAILED_REPLY: &str = "> ⚠️ **NANO ERROR**: Edit failed.";
pub const DEFAULT_TICKER: [&str; 3] = [
    "NEXA v7.3 System Ready",
    "Universal File Core: Online",
    "Doc Analysis: Ready",
];

pub struct ChatService {
    backend: Arc<dyn GenerativeBackend>,
    temperature: f32,
}

impl ChatService {
    pub fn new(backend: Arc<dyn GenerativeBackend>, temperature: f32) -> Self {
        Self {
            backend,
            temperature,
        }
    }

    /// Produce the model's reply. `history` must not contain the pending message.
    pub async fn reply(
        &self,
        state: NexaState,
        history: &[Message],
        prompt: &str,
        attachment: Option<&Attachment>,
    ) -> String {
        match self.try_reply(state, history, prompt, attachment).await {
            Ok(text) => text,
            Err(e) => {
                warn!("generation failed: {e:#}");
                format!("⚠️ SYSTEM FAILURE: {e}")
            }
        }
    }

    async fn try_reply(
        &self,
        state: NexaState,
        history: &[Message],
        prompt: &str,
        attachment: Option<&Attachment>,
    ) -> anyhow::Result<String> {
        if let Some(image) = attachment.filter(|a| a.is_image()) {
            if is_edit_request(prompt) {
                return Ok(self.edit_image(prompt, image).await);
            }
        }

        let request = build_text_request(state, history, prompt, attachment, self.temperature);
        let text = self.backend.generate_text(&request).await?;
        let reply = if text.is_empty() {
            NO_DATA_REPLY.to_string()
        } else {
            text
        };

        let Some(nano) = find_nano_request(&reply) else {
            return Ok(reply);
        };
        info!(prompt = %nano.prompt, "NANO image request");
        let image = match self.backend.generate_image(&nano.prompt, None).await {
            Ok(image) => image,
            Err(e) => {
                warn!("NANO generation failed: {e:#}");
                None
            }
        };
        let url = image.map(|img| data_url(&img.mime_type, &img.data));
        Ok(substitute_nano(&reply, &nano, url.as_deref()))
    }

    async fn edit_image(&self, prompt: &str, image: &Attachment) -> String {
        let source = InlineData {
            mime_type: image.mime_type.clone(),
            data: strip_data_url_prefix(&image.data).to_string(),
        };
        match self.backend.generate_image(prompt, Some(&source)).await {
            Ok(Some(edited)) => format!(
                "**🖼️ VISUAL OUTPUT**\n\n![Edited Image]({})\n\n> *NANO EDIT COMPLETE*",
                data_url(&edited.mime_type, &edited.data)
            ),
            Ok(None) => EDIT_FAILED_REPLY.to_string(),
            Err(e) => {
                warn!("NANO edit failed: {e:#}");
                EDIT_FAILED_REPLY.to_string()
            }
        }
    }

    /// Status lines for the dashboard ticker, or the built-in list.
    pub async fn dashboard_ticker(&self) -> Vec<String> {
        let raw = match self.backend.dashboard_insights().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("dashboard insights unavailable: {e:#}");
                "[]".to_string()
            }
        };
        parse_ticker(&raw).unwrap_or_else(|| DEFAULT_TICKER.iter().map(|s| s.to_string()).collect())
    }
}

/// Build the text request: prior user/model turns without attachments, then
/// the current parts.
pub fn build_text_request(
    state: NexaState,
    history: &[Message],
    prompt: &str,
    attachment: Option<&Attachment>,
    temperature: f32,
) -> TextRequest {
    let mut contents: Vec<Content> = history
        .iter()
        .filter(|m| m.role != Role::System && m.attachment.is_none())
        .map(|m| Content {
            role: m.role.as_str().to_string(),
            parts: vec![Part::text(m.content.clone())],
        })
        .collect();

    let mut parts = Vec::with_capacity(2);
    if let Some(att) = attachment {
        parts.push(Part::inline(
            att.mime_type.clone(),
            strip_data_url_prefix(&att.data),
        ));
    }
    parts.push(Part::text(prompt));
    contents.push(Content {
        role: Role::User.as_str().to_string(),
        parts,
    });

    let profile = state.model.profile();
    let (model, thinking_budget) = match attachment {
        Some(_) => (FILE_ANALYSIS_MODEL, None),
        None => (profile.api_model, profile.thinking_budget),
    };

    TextRequest {
        model: model.to_string(),
        contents,
        system_instruction: system_instruction(state.mode, state.model, state.language),
        temperature,
        thinking_budget,
    }
}

/// A non-empty JSON array of status lines. Non-string entries are rendered as JSON.
pub fn parse_ticker(raw: &str) -> Option<Vec<String>> {
    let items: Vec<serde_json::Value> = serde_json::from_str(raw.trim()).ok()?;
    if items.is_empty() {
        return None;
    }
    Some(
        items
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
    )
}

/// What the host should render after one input.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    History(Vec<Message>),
    Purged(Message),
    Reply(Message),
}

/// The running transcript and its persistence.
pub struct Conversation {
    state: NexaState,
    history: Vec<Message>,
    chat: ChatService,
    store: LocalStore,
}

impl Conversation {
    /// Restore the saved transcript, if any.
    pub fn restore(state: NexaState, chat: ChatService, store: LocalStore) -> Self {
        let history = store.load_transcript();
        info!(messages = history.len(), "memory restored");
        Self {
            state,
            history,
            chat,
            store,
        }
    }

    pub fn state(&self) -> NexaState {
        self.state
    }

    pub fn set_state(&mut self, state: NexaState) {
        self.state = state;
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub async fn submit(&mut self, text: &str, attachment: Option<Attachment>) -> ChatOutcome {
        match ChatCommand::parse(text) {
            Some(ChatCommand::ShowHistory) => return ChatOutcome::History(self.history.clone()),
            Some(ChatCommand::ClearHistory) => return ChatOutcome::Purged(self.purge()),
            None => {}
        }

        self.history
            .push(Message::new(Role::User, text).with_attachment(attachment.clone()));
        self.persist();

        let prior = &self.history[..self.history.len() - 1];
        let reply = self
            .chat
            .reply(self.state, prior, text, attachment.as_ref())
            .await;

        let message = Message::new(Role::Model, reply);
        self.history.push(message.clone());
        self.persist();
        ChatOutcome::Reply(message)
    }

    fn purge(&mut self) -> Message {
        self.history.clear();
        if let Err(e) = self.store.clear_transcript() {
            warn!("failed to clear memory: {e}");
        }
        let notice = Message::new(Role::System, MEMORY_PURGED_MESSAGE);
        self.history.push(notice.clone());
        self.persist();
        info!("memory core purged");
        notice
    }

    fn persist(&self) {
        if let Err(e) = self.store.save_transcript(&self.history) {
            warn!("failed to persist memory: {e}");
        }
    }
}
