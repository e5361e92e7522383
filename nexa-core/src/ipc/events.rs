//! Status events broadcast by the live voice client.
//!
//! ## Human-readable messages
//!
//! | State | Message |
//! |-------|---------|
//! | `Initializing` | `"Initializing Audio..."` |
//! | `Connecting` | `"Connecting to Gemini Live..."` |
//! | `Active` | `"Live Connection Active"` |
//! | `Closing` | `"Disconnecting..."` / `"Connection Closed"` |
//! | `Errored` | `"Start Failed: …"` / `"Live API Error: …"` |
//! | `Idle` | `"Idle"` |

use serde::{Deserialize, Serialize};

/// Lifecycle state of the live voice client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    /// Nothing held; `start()` is allowed.
    #[default]
    Idle,
    /// Acquiring device contexts and the microphone.
    Initializing,
    /// Waiting for the live session to open.
    Connecting,
    /// Audio flows both ways.
    Active,
    /// Teardown in progress.
    Closing,
    /// A failure was reported; teardown follows and the client returns to `Idle`.
    Errored,
}

impl ClientState {
    /// Edges of the lifecycle graph.
    pub fn can_transition_to(self, next: ClientState) -> bool {
        use ClientState::*;
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Initializing, Connecting)
                | (Initializing, Errored)
                | (Initializing, Closing)
                | (Connecting, Active)
                | (Connecting, Errored)
                | (Connecting, Closing)
                | (Active, Closing)
                | (Active, Errored)
                | (Closing, Idle)
                | (Errored, Closing)
                | (Errored, Idle)
        )
    }

    /// `true` while any resource may be held.
    pub fn is_busy(self) -> bool {
        self != ClientState::Idle
    }
}

/// One status report. `seq` increases by one per event for a client instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatusEvent {
    pub seq: u64,
    pub state: ClientState,
    pub message: String,
    /// Underlying error text when `state` is `Errored`.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_a_legal_walk() {
        let walk = [
            ClientState::Idle,
            ClientState::Initializing,
            ClientState::Connecting,
            ClientState::Active,
            ClientState::Closing,
            ClientState::Idle,
        ];
        for pair in walk.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn errored_is_reachable_from_every_busy_state_except_closing() {
        for state in [
            ClientState::Initializing,
            ClientState::Connecting,
            ClientState::Active,
        ] {
            assert!(state.can_transition_to(ClientState::Errored));
        }
        assert!(!ClientState::Idle.can_transition_to(ClientState::Errored));
        assert!(ClientState::Errored.can_transition_to(ClientState::Idle));
    }

    #[test]
    fn cannot_skip_straight_to_active() {
        assert!(!ClientState::Idle.can_transition_to(ClientState::Active));
        assert!(!ClientState::Initializing.can_transition_to(ClientState::Active));
        assert!(!ClientState::Active.can_transition_to(ClientState::Connecting));
    }

    #[test]
    fn status_event_serializes_with_camel_case_and_lowercase_state() {
        let event = ClientStatusEvent {
            seq: 4,
            state: ClientState::Errored,
            message: "Start Failed: microphone unavailable: denied".into(),
            error: Some("microphone unavailable: denied".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["state"], "errored");
        assert_eq!(json["error"], "microphone unavailable: denied");

        let round_trip: ClientStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn state_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<ClientState>(r#""Active""#).is_err());
    }
}
