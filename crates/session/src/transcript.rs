//! Transcript aggregation
//!
//! Folds the low-level signaling event stream into ordered,
//! deduplicated transcript messages. Assistant text accumulates as
//! delta fragments under one response id until the done signal; user
//! utterances arrive already complete, sometimes twice through two
//! different wire shapes, which is what the content dedup guards.

use std::collections::HashSet;

use voice_client_core::{ServerEvent, TranscriptMessage};
#[cfg(test)]
use voice_client_core::Role;

/// In-progress assistant response buffer.
#[derive(Debug)]
struct PendingResponse {
    response_id: String,
    text: String,
    timestamp_ms: u64,
}

/// Folds signaling events into finalized transcript messages.
///
/// The message list is always non-decreasing in timestamp; duplicate
/// ids and duplicate (role, content) pairs are suppressed.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    pending: Option<PendingResponse>,
    messages: Vec<TranscriptMessage>,
    seen_ids: HashSet<String>,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one event; returns the message it finalized, if any.
    pub fn ingest(&mut self, event: &ServerEvent) -> Option<TranscriptMessage> {
        match event {
            ServerEvent::UserUtteranceTranscribed {
                item_id,
                text,
                timestamp_ms,
            } => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                self.push(TranscriptMessage::user(item_id, trimmed, *timestamp_ms))
            }

            ServerEvent::AssistantUtteranceStarted {
                response_id,
                timestamp_ms,
            } => {
                if let Some(stale) = self.pending.take() {
                    tracing::debug!(
                        response_id = %stale.response_id,
                        "discarding unfinished assistant response"
                    );
                }
                self.pending = Some(PendingResponse {
                    response_id: response_id.clone(),
                    text: String::new(),
                    timestamp_ms: *timestamp_ms,
                });
                None
            }

            ServerEvent::AssistantUtteranceDelta { response_id, delta } => {
                match self.pending.as_mut() {
                    Some(pending) if pending.response_id == *response_id => {
                        pending.text.push_str(delta);
                    }
                    _ => {
                        // Delta outside its Started/Completed pair.
                        tracing::debug!(response_id = %response_id, "dropping orphan delta");
                    }
                }
                None
            }

            ServerEvent::AssistantUtteranceCompleted { response_id, .. } => {
                let pending = match self.pending.take() {
                    Some(p) if p.response_id == *response_id => p,
                    other => {
                        self.pending = other;
                        return None;
                    }
                };
                let text = pending.text.trim();
                if text.is_empty() {
                    return None;
                }
                self.push(TranscriptMessage::assistant(
                    response_id.clone(),
                    text,
                    pending.timestamp_ms,
                ))
            }

            ServerEvent::SessionReady
            | ServerEvent::SpeechStarted
            | ServerEvent::SpeechStopped
            | ServerEvent::Unhandled { .. } => None,
        }
    }

    /// The accumulated message list, ascending by timestamp.
    pub fn messages(&self) -> &[TranscriptMessage] {
        &self.messages
    }

    /// Drop all accumulated messages and dedup state.
    pub fn clear(&mut self) {
        self.pending = None;
        self.messages.clear();
        self.seen_ids.clear();
    }

    fn push(&mut self, message: TranscriptMessage) -> Option<TranscriptMessage> {
        if self.seen_ids.contains(&message.id) {
            tracing::debug!(id = %message.id, "suppressing duplicate message id");
            return None;
        }
        if self
            .messages
            .iter()
            .any(|m| m.role == message.role && m.content == message.content)
        {
            tracing::debug!(id = %message.id, "suppressing duplicate message content");
            return None;
        }

        self.seen_ids.insert(message.id.clone());
        let at = self
            .messages
            .partition_point(|m| m.timestamp_ms <= message.timestamp_ms);
        self.messages.insert(at, message.clone());
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(response_id: &str, ts: u64) -> ServerEvent {
        ServerEvent::AssistantUtteranceStarted {
            response_id: response_id.into(),
            timestamp_ms: ts,
        }
    }

    fn delta(response_id: &str, text: &str) -> ServerEvent {
        ServerEvent::AssistantUtteranceDelta {
            response_id: response_id.into(),
            delta: text.into(),
        }
    }

    fn completed(response_id: &str, text: &str) -> ServerEvent {
        ServerEvent::AssistantUtteranceCompleted {
            response_id: response_id.into(),
            text: text.into(),
        }
    }

    fn user(item_id: &str, text: &str, ts: u64) -> ServerEvent {
        ServerEvent::UserUtteranceTranscribed {
            item_id: item_id.into(),
            text: text.into(),
            timestamp_ms: ts,
        }
    }

    #[test]
    fn test_delta_fold_yields_one_message() {
        let mut agg = TranscriptAggregator::new();
        assert!(agg.ingest(&started("r1", 10)).is_none());
        assert!(agg.ingest(&delta("r1", "Hel")).is_none());
        assert!(agg.ingest(&delta("r1", "lo")).is_none());

        let msg = agg.ingest(&completed("r1", "Hello")).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.timestamp_ms, 10);
        assert_eq!(agg.messages().len(), 1);
    }

    #[test]
    fn test_empty_accumulation_yields_nothing() {
        let mut agg = TranscriptAggregator::new();
        agg.ingest(&started("r1", 0));
        agg.ingest(&delta("r1", "   "));
        assert!(agg.ingest(&completed("r1", "")).is_none());
        assert!(agg.messages().is_empty());
    }

    #[test]
    fn test_orphan_delta_is_dropped() {
        let mut agg = TranscriptAggregator::new();
        agg.ingest(&started("r1", 0));
        agg.ingest(&delta("r2", "wrong response"));
        agg.ingest(&delta("r1", "right"));
        let msg = agg.ingest(&completed("r1", "right")).unwrap();
        assert_eq!(msg.content, "right");
    }

    #[test]
    fn test_user_utterance_emits_immediately() {
        let mut agg = TranscriptAggregator::new();
        let msg = agg.ingest(&user("item_1", "hello", 5)).unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.id, "user-item_1");
    }

    #[test]
    fn test_duplicate_id_suppressed() {
        let mut agg = TranscriptAggregator::new();
        assert!(agg.ingest(&user("item_1", "first", 5)).is_some());
        assert!(agg.ingest(&user("item_1", "second wording", 6)).is_none());
        assert_eq!(agg.messages().len(), 1);
    }

    #[test]
    fn test_duplicate_content_suppressed_across_shapes() {
        // The same utterance reported through both wire shapes.
        let mut agg = TranscriptAggregator::new();
        assert!(agg.ingest(&user("item_1", "what is this", 5)).is_some());
        assert!(agg.ingest(&user("item_2", "what is this", 6)).is_none());
        assert_eq!(agg.messages().len(), 1);
    }

    #[test]
    fn test_messages_sorted_by_timestamp() {
        // Delayed assistant response: t1 < t3 < t2 arrival order.
        let mut agg = TranscriptAggregator::new();
        agg.ingest(&user("a", "first", 100));
        agg.ingest(&started("r1", 200));
        agg.ingest(&delta("r1", "slow answer"));
        agg.ingest(&user("b", "third", 300));
        agg.ingest(&completed("r1", "slow answer"));

        let stamps: Vec<u64> = agg.messages().iter().map(|m| m.timestamp_ms).collect();
        assert_eq!(stamps, vec![100, 200, 300]);
    }

    #[test]
    fn test_clear_resets_dedup_state() {
        let mut agg = TranscriptAggregator::new();
        agg.ingest(&user("item_1", "hello", 5));
        agg.clear();
        assert!(agg.messages().is_empty());
        assert!(agg.ingest(&user("item_1", "hello", 5)).is_some());
    }
}
