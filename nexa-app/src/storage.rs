//! Encrypted local key/value store holding the chat transcript.

use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::settings::default_data_dir;
use crate::state::Message;

/// Slot holding the serialized transcript.
pub const MEMORY_SLOT: &str = "nexa_memory_v7";

#[derive(Debug, Clone)]
pub struct LocalStore {
    db_path: PathBuf,
    cipher: SlotCipher,
}

/// Prefix of every sealed value; bumps with the key derivation.
const SEALED_PREFIX: &str = "v7:";
const NONCE_LEN: usize = 12;

/// AES-256-GCM sealing keyed per slot.
///
/// The root key is bound to the OS user, host and database path. Each slot
/// gets its own key derived from the root, and the slot name is authenticated
/// as associated data, so a value copied into another slot fails to open.
#[derive(Debug, Clone)]
struct SlotCipher {
    root: [u8; 32],
}

impl SlotCipher {
    fn for_database(db_path: &Path) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_default();
        let digest = Sha256::new()
            .chain_update(user.as_bytes())
            .chain_update(b"|")
            .chain_update(host.as_bytes())
            .chain_update(b"|")
            .chain_update(db_path.to_string_lossy().as_bytes())
            .chain_update(b"|nexa-memory-v7")
            .finalize();
        let mut root = [0u8; 32];
        root.copy_from_slice(&digest);
        Self { root }
    }

    fn slot_cipher(&self, slot: &str) -> Aes256Gcm {
        let key = Sha256::new()
            .chain_update(self.root)
            .chain_update(slot.as_bytes())
            .finalize();
        Aes256Gcm::new(&key)
    }

    fn seal(&self, slot: &str, plain: &str) -> Result<String, String> {
        if plain.is_empty() {
            return Ok(String::new());
        }
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .slot_cipher(slot)
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plain.as_bytes(),
                    aad: slot.as_bytes(),
                },
            )
            .map_err(|e| format!("seal {slot}: {e}"))?;
        Ok(format!(
            "{SEALED_PREFIX}{}",
            BASE64.encode([&nonce[..], &sealed].concat())
        ))
    }

    fn open(&self, slot: &str, stored: &str) -> Option<String> {
        if stored.is_empty() {
            return Some(String::new());
        }
        let bytes = BASE64.decode(stored.strip_prefix(SEALED_PREFIX)?).ok()?;
        if bytes.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let plain = self
            .slot_cipher(slot)
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: slot.as_bytes(),
                },
            )
            .ok()?;
        String::from_utf8(plain).ok()
    }
}

impl LocalStore {
    pub fn default_db_path() -> PathBuf {
        default_data_dir().join("nexa.db")
    }

    pub fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let store = Self {
            cipher: SlotCipher::for_database(&db_path),
            db_path,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, String> {
        Connection::open(&self.db_path).map_err(|e| e.to_string())
    }

    fn init_schema(&self) -> Result<(), String> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS memory_slots (
              slot TEXT PRIMARY KEY,
              value_enc TEXT NOT NULL,
              updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn get(&self, slot: &str) -> Result<Option<String>, String> {
        let conn = self.open()?;
        let encrypted: Option<String> = conn
            .query_row(
                "SELECT value_enc FROM memory_slots WHERE slot = ?1",
                params![slot],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.to_string())?;
        match encrypted {
            Some(enc) => self
                .cipher
                .open(slot, &enc)
                .map(Some)
                .ok_or_else(|| format!("slot {slot} could not be decrypted")),
            None => Ok(None),
        }
    }

    pub fn put(&self, slot: &str, value: &str) -> Result<(), String> {
        let encrypted = self.cipher.seal(slot, value)?;
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO memory_slots (slot, value_enc, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(slot) DO UPDATE SET value_enc = excluded.value_enc, updated_at = excluded.updated_at",
            params![slot, encrypted, Utc::now().timestamp_millis()],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn remove(&self, slot: &str) -> Result<bool, String> {
        let conn = self.open()?;
        let changed = conn
            .execute("DELETE FROM memory_slots WHERE slot = ?1", params![slot])
            .map_err(|e| e.to_string())?;
        Ok(changed > 0)
    }

    /// Load the saved transcript. An unreadable document is treated as empty.
    pub fn load_transcript(&self) -> Vec<Message> {
        let raw = match self.get(MEMORY_SLOT) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("memory read error: {e}");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<Message>>(&raw) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("memory read error: {e}");
                Vec::new()
            }
        }
    }

    /// Overwrite the saved transcript. An empty transcript leaves the slot alone.
    pub fn save_transcript(&self, messages: &[Message]) -> Result<(), String> {
        if messages.is_empty() {
            return Ok(());
        }
        let json = serde_json::to_string(messages).map_err(|e| e.to_string())?;
        self.put(MEMORY_SLOT, &json)
    }

    pub fn clear_transcript(&self) -> Result<bool, String> {
        self.remove(MEMORY_SLOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Role;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("nexa.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn transcript_survives_reopen() {
        let (dir, store) = store();
        let history = vec![
            Message::new(Role::User, "hello"),
            Message::new(Role::Model, "greetings"),
        ];
        store.save_transcript(&history).unwrap();

        let reopened = LocalStore::new(dir.path().join("nexa.db")).unwrap();
        assert_eq!(reopened.load_transcript(), history);
    }

    #[test]
    fn empty_transcript_is_not_written() {
        let (_dir, store) = store();
        store
            .save_transcript(&[Message::new(Role::User, "keep me")])
            .unwrap();
        store.save_transcript(&[]).unwrap();
        assert_eq!(store.load_transcript().len(), 1);
    }

    #[test]
    fn clear_removes_the_slot() {
        let (_dir, store) = store();
        store
            .save_transcript(&[Message::new(Role::User, "forget me")])
            .unwrap();
        assert!(store.clear_transcript().unwrap());
        assert!(store.load_transcript().is_empty());
        assert!(!store.clear_transcript().unwrap());
    }

    #[test]
    fn values_are_encrypted_at_rest() {
        let (dir, store) = store();
        store.put("secret", "plain secret").unwrap();

        let conn = Connection::open(dir.path().join("nexa.db")).unwrap();
        let raw: String = conn
            .query_row(
                "SELECT value_enc FROM memory_slots WHERE slot = 'secret'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(raw.starts_with(SEALED_PREFIX));
        assert!(!raw.contains("plain secret"));
        assert_eq!(store.get("secret").unwrap().as_deref(), Some("plain secret"));
    }

    #[test]
    fn sealed_value_does_not_open_under_another_slot() {
        let (dir, store) = store();
        store.put("secret", "plain secret").unwrap();

        let conn = Connection::open(dir.path().join("nexa.db")).unwrap();
        conn.execute(
            "INSERT INTO memory_slots (slot, value_enc, updated_at)
             SELECT 'copy', value_enc, updated_at FROM memory_slots WHERE slot = 'secret'",
            [],
        )
        .unwrap();
        assert!(store.get("copy").is_err());
        assert!(store.get("secret").is_ok());
    }

    #[test]
    fn garbage_document_loads_as_empty() {
        let (_dir, store) = store();
        store.put(MEMORY_SLOT, "{not an array").unwrap();
        assert!(store.load_transcript().is_empty());
    }
}
