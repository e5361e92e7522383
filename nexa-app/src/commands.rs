//! Input routing: chat commands typed as plain text and console slash commands.

use std::path::PathBuf;

pub const MEMORY_PURGED_MESSAGE: &str =
    "**⚡ SYSTEM STATUS**\n\nMemory Core Purged. Starting fresh session.";

/// Phrases handled locally instead of being sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand {
    ShowHistory,
    ClearHistory,
}

impl ChatCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        if matches!(
            lower.as_str(),
            "show history" | "open history" | "memory log"
        ) {
            return Some(Self::ShowHistory);
        }
        if lower.contains("clear history") || lower.contains("reset memory") {
            return Some(Self::ClearHistory);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Model,
    Mode,
    Language,
}

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Chat(String),
    Attach(PathBuf),
    Voice,
    Devices,
    /// `/model`, `/mode` or `/lang`; `None` lists the choices.
    Select(Selection, Option<String>),
    Quit,
    Empty,
    Unknown(String),
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Chat(line.to_string());
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match name.to_ascii_lowercase().as_str() {
            "attach" if !arg.is_empty() => Self::Attach(PathBuf::from(arg)),
            "voice" => Self::Voice,
            "devices" => Self::Devices,
            "model" => Self::Select(Selection::Model, non_empty(arg)),
            "mode" => Self::Select(Selection::Mode, non_empty(arg)),
            "lang" | "language" => Self::Select(Selection::Language, non_empty(arg)),
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

fn non_empty(arg: &str) -> Option<String> {
    (!arg.is_empty()).then(|| arg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_history_requires_exact_phrase() {
        assert_eq!(ChatCommand::parse("Show History"), Some(ChatCommand::ShowHistory));
        assert_eq!(ChatCommand::parse("MEMORY LOG"), Some(ChatCommand::ShowHistory));
        assert_eq!(ChatCommand::parse("please show history"), None);
    }

    #[test]
    fn clear_history_matches_anywhere() {
        assert_eq!(
            ChatCommand::parse("ok, clear history now"),
            Some(ChatCommand::ClearHistory)
        );
        assert_eq!(
            ChatCommand::parse("Reset Memory"),
            Some(ChatCommand::ClearHistory)
        );
        assert_eq!(ChatCommand::parse("what is memory?"), None);
    }

    #[test]
    fn console_lines_route_by_slash() {
        assert_eq!(ConsoleInput::parse("  "), ConsoleInput::Empty);
        assert_eq!(
            ConsoleInput::parse("hi there"),
            ConsoleInput::Chat("hi there".into())
        );
        assert_eq!(
            ConsoleInput::parse("/attach  ~/a b.png "),
            ConsoleInput::Attach(PathBuf::from("~/a b.png"))
        );
        assert_eq!(ConsoleInput::parse("/VOICE"), ConsoleInput::Voice);
        assert_eq!(ConsoleInput::parse("/devices"), ConsoleInput::Devices);
        assert_eq!(ConsoleInput::parse("/quit"), ConsoleInput::Quit);
        assert_eq!(
            ConsoleInput::parse("/model gemini-3-pro"),
            ConsoleInput::Select(Selection::Model, Some("gemini-3-pro".into()))
        );
        assert_eq!(
            ConsoleInput::parse("/lang"),
            ConsoleInput::Select(Selection::Language, None)
        );
        assert_eq!(
            ConsoleInput::parse("/attach"),
            ConsoleInput::Unknown("/attach".into())
        );
    }
}
