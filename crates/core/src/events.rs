//! Signaling event model
//!
//! The data channel carries JSON control/event messages. Inbound
//! payloads are decoded at this boundary into a closed set of
//! variants plus an `Unhandled` fallback, so downstream code matches
//! exhaustively instead of comparing type strings. A malformed
//! payload decodes to `None`: logged by the caller and dropped, never
//! an error.

use serde::Serialize;
use serde_json::Value;

/// Decoded inbound signaling event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Session created or updated by the remote endpoint.
    SessionReady,
    /// A completed user utterance transcription.
    UserUtteranceTranscribed {
        item_id: String,
        text: String,
        timestamp_ms: u64,
    },
    /// The assistant began a response.
    AssistantUtteranceStarted {
        response_id: String,
        timestamp_ms: u64,
    },
    /// A partial transcript fragment for an open response.
    AssistantUtteranceDelta { response_id: String, delta: String },
    /// The assistant response finished; `text` is the wire-reported
    /// full transcript (the aggregator trusts its own accumulation).
    AssistantUtteranceCompleted { response_id: String, text: String },
    /// User speech detected on the input buffer.
    SpeechStarted,
    /// User speech ended.
    SpeechStopped,
    /// Recognized JSON with an event type we do not handle.
    Unhandled { raw_type: String },
}

impl ServerEvent {
    /// Decode one raw data-channel message.
    ///
    /// Returns `None` for payloads that are malformed or carry
    /// nothing actionable (e.g. a conversation item without a
    /// transcript). Provider-specific event types the session does
    /// not consume come back as `Unhandled` so callers can log them.
    pub fn decode(raw: &str, now_ms: u64) -> Option<ServerEvent> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let raw_type = value.get("type")?.as_str()?;

        let event = match raw_type {
            "session.created" | "session.updated" => ServerEvent::SessionReady,

            "conversation.item.created" => {
                // User items embed the transcript in the first
                // content entry; anything else carries no text here.
                let item = value.get("item")?;
                if item.get("role").and_then(Value::as_str) != Some("user") {
                    return None;
                }
                let text = item
                    .get("content")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("transcript"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let item_id = item.get("id").and_then(Value::as_str)?;
                ServerEvent::UserUtteranceTranscribed {
                    item_id: item_id.to_string(),
                    text: text.trim().to_string(),
                    timestamp_ms: now_ms,
                }
            }

            "response.created" => {
                let response_id = value
                    .get("response")
                    .and_then(|r| r.get("id"))
                    .and_then(Value::as_str)?;
                ServerEvent::AssistantUtteranceStarted {
                    response_id: response_id.to_string(),
                    timestamp_ms: now_ms,
                }
            }

            "response.audio_transcript.delta" => {
                let response_id = value.get("response_id").and_then(Value::as_str)?;
                let delta = value.get("delta").and_then(Value::as_str)?;
                ServerEvent::AssistantUtteranceDelta {
                    response_id: response_id.to_string(),
                    delta: delta.to_string(),
                }
            }

            "response.audio_transcript.done" => {
                let response_id = value.get("response_id").and_then(Value::as_str)?;
                let text = value
                    .get("transcript")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                ServerEvent::AssistantUtteranceCompleted {
                    response_id: response_id.to_string(),
                    text: text.to_string(),
                }
            }

            "input_audio_buffer.speech_started" => ServerEvent::SpeechStarted,
            "input_audio_buffer.speech_stopped" => ServerEvent::SpeechStopped,

            "conversation.item.input_audio_transcription.completed" => {
                let text = value.get("transcript").and_then(Value::as_str)?;
                if text.trim().is_empty() {
                    return None;
                }
                let item_id = value.get("item_id").and_then(Value::as_str)?;
                ServerEvent::UserUtteranceTranscribed {
                    item_id: item_id.to_string(),
                    text: text.trim().to_string(),
                    timestamp_ms: now_ms,
                }
            }

            other => ServerEvent::Unhandled {
                raw_type: other.to_string(),
            },
        };

        Some(event)
    }
}

/// Outbound control message for the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Partial update of the remote session settings.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionPatch },
}

/// Fields of a `session.update`; only set fields are serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionSettings>,
}

/// Input transcription settings sent with the initial session update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

impl ClientEvent {
    /// Update only the instruction text.
    pub fn instructions(text: impl Into<String>) -> Self {
        Self::SessionUpdate {
            session: SessionPatch {
                instructions: Some(text.into()),
                ..Default::default()
            },
        }
    }

    /// Update only the synthesized voice.
    pub fn voice(name: impl Into<String>) -> Self {
        Self::SessionUpdate {
            session: SessionPatch {
                voice: Some(name.into()),
                ..Default::default()
            },
        }
    }

    /// The full update sent once the channel opens: instructions,
    /// voice, and input transcription model together.
    pub fn initial(
        instructions: impl Into<String>,
        voice: impl Into<String>,
        transcription_model: impl Into<String>,
    ) -> Self {
        Self::SessionUpdate {
            session: SessionPatch {
                instructions: Some(instructions.into()),
                voice: Some(voice.into()),
                input_audio_transcription: Some(TranscriptionSettings {
                    model: transcription_model.into(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_session_created() {
        let event = ServerEvent::decode(r#"{"type":"session.created"}"#, 0);
        assert_eq!(event, Some(ServerEvent::SessionReady));
    }

    #[test]
    fn test_decode_user_item_with_transcript() {
        let raw = r#"{
            "type": "conversation.item.created",
            "item": {
                "id": "item_1",
                "role": "user",
                "content": [{"type": "input_audio", "transcript": " hello there "}]
            }
        }"#;
        let event = ServerEvent::decode(raw, 42).unwrap();
        assert_eq!(
            event,
            ServerEvent::UserUtteranceTranscribed {
                item_id: "item_1".into(),
                text: "hello there".into(),
                timestamp_ms: 42,
            }
        );
    }

    #[test]
    fn test_decode_assistant_item_created_is_dropped() {
        let raw = r#"{"type":"conversation.item.created","item":{"id":"i","role":"assistant"}}"#;
        assert_eq!(ServerEvent::decode(raw, 0), None);
    }

    #[test]
    fn test_decode_delta_and_done() {
        let delta = ServerEvent::decode(
            r#"{"type":"response.audio_transcript.delta","response_id":"r1","delta":"Hel"}"#,
            0,
        )
        .unwrap();
        assert_eq!(
            delta,
            ServerEvent::AssistantUtteranceDelta {
                response_id: "r1".into(),
                delta: "Hel".into(),
            }
        );

        let done = ServerEvent::decode(
            r#"{"type":"response.audio_transcript.done","response_id":"r1","transcript":"Hello"}"#,
            0,
        )
        .unwrap();
        assert_eq!(
            done,
            ServerEvent::AssistantUtteranceCompleted {
                response_id: "r1".into(),
                text: "Hello".into(),
            }
        );
    }

    #[test]
    fn test_decode_transcription_completed() {
        let raw = r#"{
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": "item_9",
            "transcript": "what is this"
        }"#;
        let event = ServerEvent::decode(raw, 7).unwrap();
        assert_eq!(
            event,
            ServerEvent::UserUtteranceTranscribed {
                item_id: "item_9".into(),
                text: "what is this".into(),
                timestamp_ms: 7,
            }
        );
    }

    #[test]
    fn test_decode_unknown_type_is_unhandled() {
        let event = ServerEvent::decode(r#"{"type":"rate_limits.updated"}"#, 0).unwrap();
        assert_eq!(
            event,
            ServerEvent::Unhandled {
                raw_type: "rate_limits.updated".into()
            }
        );
    }

    #[test]
    fn test_decode_malformed_payloads() {
        assert_eq!(ServerEvent::decode("not json", 0), None);
        assert_eq!(ServerEvent::decode(r#"{"no_type":true}"#, 0), None);
        assert_eq!(
            ServerEvent::decode(r#"{"type":"response.created","response":{}}"#, 0),
            None
        );
    }

    #[test]
    fn test_client_event_wire_shape() {
        let json = serde_json::to_value(ClientEvent::voice("echo")).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "echo");
        assert!(json["session"].get("instructions").is_none());

        let json = serde_json::to_value(ClientEvent::initial("be brief", "cove", "whisper-1"))
            .unwrap();
        assert_eq!(json["session"]["instructions"], "be brief");
        assert_eq!(json["session"]["input_audio_transcription"]["model"], "whisper-1");
    }
}
