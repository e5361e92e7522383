//! Conversation state shared by the console host and the chat service.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model_profiles::AiModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
            Self::System => "system",
        }
    }
}

/// A staged file. `data` is base64, optionally with a `data:` URL prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub mime_type: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Attachment {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self {
            mime_type: guess_mime_type(path).into(),
            data: BASE64.encode(bytes),
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        })
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" | "md" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Millisecond ids, bumped when two messages land in the same millisecond.
fn next_message_id(timestamp: i64) -> i64 {
    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let id = timestamp.max(last + 1);
        match LAST_ID.compare_exchange_weak(last, id, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return id,
            Err(actual) => last = actual,
        }
    }
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let timestamp = Utc::now().timestamp_millis();
        Self {
            id: next_message_id(timestamp).to_string(),
            role,
            content: content.into(),
            timestamp,
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Option<Attachment>) -> Self {
        self.attachment = attachment;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemMode {
    ResearchConsole,
    CreativeStudio,
    DevCore,
    #[default]
    PersonalAssistant,
    AutonomousAgent,
}

impl SystemMode {
    pub const ALL: [SystemMode; 5] = [
        Self::ResearchConsole,
        Self::CreativeStudio,
        Self::DevCore,
        Self::PersonalAssistant,
        Self::AutonomousAgent,
    ];

    /// Accepts the wire name or its first word (`research`, `dev`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|m| {
            let name = m.as_str();
            name == key || name.split('_').next() == Some(key.as_str())
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResearchConsole => "RESEARCH_CONSOLE",
            Self::CreativeStudio => "CREATIVE_STUDIO",
            Self::DevCore => "DEV_CORE",
            Self::PersonalAssistant => "PERSONAL_ASSISTANT",
            Self::AutonomousAgent => "AUTONOMOUS_AGENT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    English,
    Hindi,
    Japanese,
    Korean,
    Spanish,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Self::English,
        Self::Hindi,
        Self::Japanese,
        Self::Korean,
        Self::Spanish,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim();
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(key))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Hindi => "Hindi",
            Self::Japanese => "Japanese",
            Self::Korean => "Korean",
            Self::Spanish => "Spanish",
        }
    }
}

/// The selections that shape every text request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NexaState {
    pub mode: SystemMode,
    pub model: AiModel,
    pub language: Language,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_like_the_stored_transcript() {
        let mut msg = Message::new(Role::Model, "hello");
        msg.id = "1".into();
        msg.timestamp = 1;
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "1", "role": "model", "content": "hello", "timestamp": 1})
        );
    }

    #[test]
    fn ids_are_unique_within_a_millisecond() {
        let a = Message::new(Role::User, "a");
        let b = Message::new(Role::Model, "b");
        assert_ne!(a.id, b.id);
        assert!(b.id.parse::<i64>().unwrap() > a.id.parse::<i64>().unwrap());
    }

    #[test]
    fn attachment_round_trips_camel_case() {
        let raw = r#"{"mimeType":"image/png","data":"AAAA","fileName":"a.png"}"#;
        let att: Attachment = serde_json::from_str(raw).unwrap();
        assert!(att.is_image());
        assert_eq!(att.file_name.as_deref(), Some("a.png"));
    }

    #[test]
    fn mode_uses_screaming_case() {
        let json = serde_json::to_string(&SystemMode::PersonalAssistant).unwrap();
        assert_eq!(json, "\"PERSONAL_ASSISTANT\"");
        assert_eq!(SystemMode::DevCore.as_str(), "DEV_CORE");
    }

    #[test]
    fn selections_parse_leniently() {
        assert_eq!(SystemMode::parse("dev"), Some(SystemMode::DevCore));
        assert_eq!(
            SystemMode::parse("autonomous agent"),
            Some(SystemMode::AutonomousAgent)
        );
        assert_eq!(SystemMode::parse("cooking"), None);
        assert_eq!(Language::parse(" hindi "), Some(Language::Hindi));
        assert_eq!(Language::parse("klingon"), None);
    }

    #[test]
    fn attachment_from_path_reads_and_encodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.TXT");
        std::fs::write(&path, b"hi").unwrap();
        let att = Attachment::from_path(&path).unwrap();
        assert_eq!(att.mime_type, "text/plain");
        assert_eq!(att.data, "aGk=");
        assert_eq!(att.file_name.as_deref(), Some("notes.TXT"));
    }
}
