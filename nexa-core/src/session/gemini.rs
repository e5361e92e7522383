//! Gemini Live over WebSocket.
//!
//! ```text
//! open():  connect ─► send {"setup": …} ─► spawn writer + reader tasks
//! writer:  UnboundedReceiver<Outbound> ─► {"realtimeInput":{"mediaChunks":[…]}}
//! reader:  frames ─► translate_server_message ─► mpsc<SessionEvent>
//! ```
//!
//! The reader emits exactly one terminal event (`Closed` or `Error`) and
//! then stops, so the event stream ends with it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{
    LiveConfig, LiveConnection, LiveSession, LiveTransport, SessionEvent, EVENT_CHANNEL_CAPACITY,
};
use crate::{
    codec::TransportChunk,
    error::{NexaError, Result},
};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Opens sessions against the Gemini Live bidirectional endpoint.
#[derive(Clone)]
pub struct GeminiLiveTransport {
    api_key: String,
    endpoint: String,
}

impl GeminiLiveTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl std::fmt::Debug for GeminiLiveTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveTransport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn open(&self, config: &LiveConfig) -> Result<LiveConnection> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| NexaError::Session(format!("connect failed: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        sink.send(Message::Text(setup_message(config).to_string()))
            .await
            .map_err(|e| NexaError::Session(format!("setup failed: {e}")))?;
        info!(model = config.model.as_str(), "live session setup sent");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            while let Some(outbound) = out_rx.recv().await {
                let result = match outbound {
                    Outbound::Audio(chunk) => {
                        sink.send(Message::Text(realtime_input_message(&chunk).to_string()))
                            .await
                    }
                    Outbound::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    warn!("live session write failed: {e}");
                    break;
                }
            }
            debug!("live session writer finished");
        });

        let reader_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            let terminal = loop {
                let payload = match stream.next().await {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Close(frame))) => {
                        break SessionEvent::Closed {
                            reason: frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty()),
                        }
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        break SessionEvent::Error {
                            message: e.to_string(),
                        }
                    }
                    None => break SessionEvent::Closed { reason: None },
                };

                let message: Value = match serde_json::from_slice(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("unparseable live message: {e}");
                        continue;
                    }
                };
                for event in translate_server_message(&message) {
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
            };
            reader_closed.store(true, Ordering::Release);
            let _ = event_tx.send(terminal).await;
            debug!("live session reader finished");
        });

        Ok(LiveConnection {
            session: Arc::new(GeminiLiveSession { out_tx, closed }),
            events: event_rx,
        })
    }
}

enum Outbound {
    Audio(TransportChunk),
    Close,
}

struct GeminiLiveSession {
    out_tx: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
}

impl LiveSession for GeminiLiveSession {
    fn send_realtime_input(&self, chunk: TransportChunk) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NexaError::Session("session is closed".into()));
        }
        self.out_tx
            .send(Outbound::Audio(chunk))
            .map_err(|_| NexaError::Session("session writer has stopped".into()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.out_tx.send(Outbound::Close);
            info!("live session close requested");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// First client message: model, audio response modality, voice and persona.
pub fn setup_message(config: &LiveConfig) -> Value {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };
    json!({
        "setup": {
            "model": model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice_name }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": config.system_instruction }]
            }
        }
    })
}

pub fn realtime_input_message(chunk: &TransportChunk) -> Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [{ "mimeType": chunk.mime_type, "data": chunk.data }]
        }
    })
}

/// Map one server message to session events, in the order they apply.
///
/// Every inline audio part of a model turn becomes its own `Audio` event.
pub fn translate_server_message(message: &Value) -> Vec<SessionEvent> {
    let mut events = Vec::new();

    if message.get("setupComplete").is_some() {
        events.push(SessionEvent::Open);
    }

    if let Some(content) = message.get("serverContent") {
        if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
            events.push(SessionEvent::Interrupted);
        }

        let parts = content
            .pointer("/modelTurn/parts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part.get("inlineData") else {
                continue;
            };
            let mime = inline.get("mimeType").and_then(Value::as_str);
            let data = inline.get("data").and_then(Value::as_str);
            if let (Some(mime), Some(data)) = (mime, data) {
                if mime.starts_with("audio/") {
                    events.push(SessionEvent::Audio(TransportChunk::new(mime, data)));
                }
            }
        }

        if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
            events.push(SessionEvent::TurnComplete);
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_message_carries_voice_and_persona() {
        let msg = setup_message(&LiveConfig::default());
        assert_eq!(
            msg["setup"]["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(
            msg["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            msg["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert!(msg["setup"]["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("You are NEXA"));
    }

    #[test]
    fn realtime_input_wraps_one_media_chunk() {
        let chunk = TransportChunk::new("audio/pcm;rate=16000", "AAA=");
        let msg = realtime_input_message(&chunk);
        assert_eq!(
            msg["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert_eq!(msg["realtimeInput"]["mediaChunks"][0]["data"], "AAA=");
    }

    #[test]
    fn setup_complete_opens() {
        let events = translate_server_message(&json!({ "setupComplete": {} }));
        assert_eq!(events, vec![SessionEvent::Open]);
    }

    #[test]
    fn every_audio_part_is_forwarded_in_order() {
        let events = translate_server_message(&json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQI=" } },
                    { "text": "ignored" },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AwQ=" } }
                ]},
                "turnComplete": true
            }
        }));
        assert_eq!(
            events,
            vec![
                SessionEvent::Audio(TransportChunk::new("audio/pcm;rate=24000", "AQI=")),
                SessionEvent::Audio(TransportChunk::new("audio/pcm;rate=24000", "AwQ=")),
                SessionEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn interruption_is_reported() {
        let events = translate_server_message(&json!({
            "serverContent": { "interrupted": true }
        }));
        assert_eq!(events, vec![SessionEvent::Interrupted]);
    }

    #[test]
    fn unrelated_messages_produce_nothing() {
        assert!(translate_server_message(&json!({ "toolCall": {} })).is_empty());
        assert!(translate_server_message(&json!({ "serverContent": {} })).is_empty());
    }
}
