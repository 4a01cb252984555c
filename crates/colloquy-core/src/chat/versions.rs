//! Response versioning for assistant messages.
//!
//! Pure functions over a [`ChatMessage`]: history deduplication, the
//! "final responses" view, navigation between variants, position reporting,
//! and the retry lifecycle (begin, then finalize exactly once).
//!
//! `current_response_index` indexes the final-responses view, not the raw
//! history. Because in-flight and empty failed variants are not listed, the
//! stored index can drift while streams land; every reader therefore
//! re-derives the base index from the visible content first.

use std::collections::HashMap;

use colloquy_types::chat::{
    ChatMessage, MessageRole, MessageStatus, ResponseVariant, VariantKind, VariantState,
};
use colloquy_types::error::ChatError;
use colloquy_types::stream::StreamOutcome;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Navigation step between response variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Prev,
}

/// 1-based position of the visible variant among the final responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantPosition {
    pub position: usize,
    pub total: usize,
}

/// Collapse `history` to one entry per id.
///
/// The entry with the latest `created_at` wins (ties go to the later
/// position); survivors keep the order in which their id first appeared.
pub fn collapse_history(history: &[ResponseVariant]) -> Vec<ResponseVariant> {
    let mut out: Vec<ResponseVariant> = Vec::with_capacity(history.len());
    let mut seen: HashMap<Uuid, usize> = HashMap::with_capacity(history.len());

    for variant in history {
        match seen.get(&variant.id) {
            Some(&i) => {
                if variant.created_at >= out[i].created_at {
                    out[i] = variant.clone();
                }
            }
            None => {
                seen.insert(variant.id, out.len());
                out.push(variant.clone());
            }
        }
    }
    out
}

fn is_listed(variant: &ResponseVariant) -> bool {
    match variant.state {
        VariantState::Streaming => false,
        VariantState::Complete => true,
        VariantState::Errored | VariantState::Cancelled => !variant.content.is_empty(),
    }
}

/// Collapsed variants that have finished and have something to show.
pub fn final_responses(message: &ChatMessage) -> Vec<ResponseVariant> {
    collapse_history(&message.response_history)
        .into_iter()
        .filter(is_listed)
        .collect()
}

/// Index in `finals` of the variant currently on screen.
///
/// Stored index if its content matches, else the first content match, else
/// the stored index clamped into range.
fn base_index(message: &ChatMessage, finals: &[ResponseVariant]) -> usize {
    let stored = message.current_response_index;
    if finals
        .get(stored)
        .is_some_and(|v| v.content == message.content)
    {
        return stored;
    }
    finals
        .iter()
        .position(|v| v.content == message.content)
        .unwrap_or_else(|| stored.min(finals.len().saturating_sub(1)))
}

/// Move the visible variant one step. Clamps at both ends.
///
/// Returns whether the visible variant changed. A message with no final
/// responses is left untouched.
pub fn navigate(message: &mut ChatMessage, direction: Direction) -> bool {
    let finals = final_responses(message);
    if finals.is_empty() {
        return false;
    }

    let base = base_index(message, &finals);
    let target = match direction {
        Direction::Next => (base + 1).min(finals.len() - 1),
        Direction::Prev => base.saturating_sub(1),
    };

    let changed = target != message.current_response_index
        || finals[target].content != message.content;
    message.current_response_index = target;
    message.content = finals[target].content.clone();
    changed
}

/// Position of the visible content among the final responses.
pub fn position(message: &ChatMessage) -> VariantPosition {
    let finals = final_responses(message);
    if finals.is_empty() {
        return VariantPosition {
            position: 1,
            total: 1,
        };
    }

    let position = finals
        .iter()
        .position(|v| v.content == message.content)
        .unwrap_or_else(|| message.current_response_index.min(finals.len() - 1))
        + 1;
    VariantPosition {
        position,
        total: finals.len(),
    }
}

/// Open a new retry variant on an assistant message.
///
/// On the first retry the implicit original answer is materialized from the
/// current content. The visible content is not touched.
pub fn begin_retry(message: &mut ChatMessage, variant_id: Uuid) -> Result<(), ChatError> {
    if message.role != MessageRole::Assistant {
        return Err(ChatError::InvalidRequest(
            "only assistant messages can be regenerated".to_string(),
        ));
    }
    if message.status == MessageStatus::Streaming {
        return Err(ChatError::InvalidRequest(
            "the initial response is still streaming".to_string(),
        ));
    }

    if message.response_history.is_empty() {
        let state = match message.status {
            MessageStatus::Errored => VariantState::Errored,
            MessageStatus::Cancelled => VariantState::Cancelled,
            _ => VariantState::Complete,
        };
        message.response_history.push(ResponseVariant {
            id: Uuid::now_v7(),
            content: message.content.clone(),
            created_at: message.created_at,
            kind: VariantKind::Original,
            state,
        });
        message.current_response_index = 0;
    }

    message.response_history.push(ResponseVariant::pending_retry(variant_id));
    message.status = MessageStatus::Regenerating;
    Ok(())
}

fn outcome_state(outcome: &StreamOutcome) -> VariantState {
    match outcome {
        StreamOutcome::Completed => VariantState::Complete,
        StreamOutcome::Failed { .. } => VariantState::Errored,
        StreamOutcome::Cancelled => VariantState::Cancelled,
    }
}

/// Write the final content and state of a retry variant.
///
/// A listed completed or cancelled variant becomes current. A failed one
/// leaves the previously visible variant current and records the error.
pub fn finalize_variant(
    message: &mut ChatMessage,
    variant_id: Uuid,
    content: String,
    outcome: &StreamOutcome,
) -> Result<(), ChatError> {
    let before = final_responses(message);
    let shown_id = if before.is_empty() {
        None
    } else {
        Some(before[base_index(message, &before)].id)
    };

    message.response_history = collapse_history(&message.response_history);
    let variant = message
        .response_history
        .iter_mut()
        .find(|v| v.id == variant_id)
        .ok_or(ChatError::NotFound("response variant"))?;
    variant.content = content;
    variant.state = outcome_state(outcome);

    let finals = final_responses(message);
    let new_index = finals.iter().position(|v| v.id == variant_id);

    let keep_index = |id: Option<Uuid>| {
        id.and_then(|id| finals.iter().position(|v| v.id == id))
    };
    let pointer = match outcome {
        StreamOutcome::Failed { .. } => keep_index(shown_id),
        StreamOutcome::Completed | StreamOutcome::Cancelled => {
            new_index.or_else(|| keep_index(shown_id))
        }
    };
    if let Some(i) = pointer {
        message.current_response_index = i;
        message.content = finals[i].content.clone();
    }

    let failed = match outcome {
        StreamOutcome::Failed { error } => {
            message.error = Some(error.clone());
            true
        }
        _ => {
            message.error = None;
            false
        }
    };

    let still_streaming = message
        .response_history
        .iter()
        .any(|v| v.state == VariantState::Streaming);
    message.status = if still_streaming {
        MessageStatus::Regenerating
    } else if failed {
        MessageStatus::Errored
    } else {
        MessageStatus::Complete
    };
    Ok(())
}

/// Write the final content of an initial (non-retry) response.
pub fn finalize_initial(message: &mut ChatMessage, content: String, outcome: &StreamOutcome) {
    message.content = content;
    match outcome {
        StreamOutcome::Completed => {
            message.status = MessageStatus::Complete;
            message.error = None;
        }
        StreamOutcome::Failed { error } => {
            message.status = MessageStatus::Errored;
            message.error = Some(error.clone());
        }
        StreamOutcome::Cancelled => message.status = MessageStatus::Cancelled,
    }
}

/// Close out slots whose stream is gone for good.
///
/// Streaming slots keep whatever content they reached and are marked
/// cancelled, so the message can be regenerated again.
pub fn settle_interrupted(message: &mut ChatMessage) {
    for variant in &mut message.response_history {
        if variant.state == VariantState::Streaming {
            variant.state = VariantState::Cancelled;
        }
    }
    message.status = match message.status {
        MessageStatus::Streaming => MessageStatus::Cancelled,
        MessageStatus::Regenerating => MessageStatus::Complete,
        other => other,
    };
}

/// Apply a live partial to the slot a stream is still writing.
///
/// Finished slots are left alone so a late snapshot never overwrites
/// persisted final content.
pub fn overlay_partial(message: &mut ChatMessage, variant_id: Option<Uuid>, content: &str) {
    match variant_id {
        None => {
            if message.status == MessageStatus::Streaming {
                message.content = content.to_string();
            }
        }
        Some(id) => {
            if let Some(v) = message
                .response_history
                .iter_mut()
                .find(|v| v.id == id && v.state == VariantState::Streaming)
            {
                v.content = content.to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn answered(content: &str) -> ChatMessage {
        let mut msg = ChatMessage::assistant_placeholder("m");
        finalize_initial(&mut msg, content.to_string(), &StreamOutcome::Completed);
        msg
    }

    fn retry_to(msg: &mut ChatMessage, content: &str) -> Uuid {
        let id = Uuid::now_v7();
        begin_retry(msg, id).unwrap();
        finalize_variant(msg, id, content.to_string(), &StreamOutcome::Completed).unwrap();
        id
    }

    fn contents(msg: &ChatMessage) -> Vec<String> {
        final_responses(msg).into_iter().map(|v| v.content).collect()
    }

    #[test]
    fn test_collapse_keeps_latest_and_first_order() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let t0 = Utc::now();
        let variant = |id, content: &str, at| ResponseVariant {
            id,
            content: content.to_string(),
            created_at: at,
            kind: VariantKind::Retry,
            state: VariantState::Complete,
        };
        let history = vec![
            variant(a, "old a", t0),
            variant(b, "b", t0),
            variant(a, "new a", t0 + Duration::seconds(1)),
            variant(b, "stale b", t0 - Duration::seconds(1)),
        ];

        let collapsed = collapse_history(&history);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].id, a);
        assert_eq!(collapsed[0].content, "new a");
        assert_eq!(collapsed[1].content, "b");
    }

    #[test]
    fn test_collapse_tie_goes_to_later_entry() {
        let id = Uuid::now_v7();
        let at = Utc::now();
        let mut first = ResponseVariant::pending_retry(id);
        first.created_at = at;
        let mut second = first.clone();
        second.content = "later".to_string();
        second.state = VariantState::Complete;

        let collapsed = collapse_history(&[first, second]);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].content, "later");
    }

    #[test]
    fn test_empty_history_reports_one_of_one() {
        let msg = answered("A");
        assert_eq!(
            position(&msg),
            VariantPosition {
                position: 1,
                total: 1
            }
        );
    }

    #[test]
    fn test_first_retry_seeds_original() {
        let mut msg = answered("A");
        let created = msg.created_at;
        let retry_id = Uuid::now_v7();
        begin_retry(&mut msg, retry_id).unwrap();

        assert_eq!(msg.response_history.len(), 2);
        assert_eq!(msg.response_history[0].kind, VariantKind::Original);
        assert_eq!(msg.response_history[0].content, "A");
        assert_eq!(msg.response_history[0].created_at, created);
        assert_eq!(msg.response_history[1].id, retry_id);
        assert_eq!(msg.response_history[1].state, VariantState::Streaming);
        assert_eq!(msg.content, "A");
        assert_eq!(msg.status, MessageStatus::Regenerating);
        // The in-flight retry is not listed yet.
        assert_eq!(contents(&msg), vec!["A"]);
    }

    #[test]
    fn test_completed_retry_becomes_current() {
        let mut msg = answered("A");
        retry_to(&mut msg, "B");

        assert_eq!(msg.content, "B");
        assert_eq!(msg.current_response_index, 1);
        assert_eq!(msg.status, MessageStatus::Complete);
        assert_eq!(contents(&msg), vec!["A", "B"]);
        assert_eq!(
            position(&msg),
            VariantPosition {
                position: 2,
                total: 2
            }
        );
    }

    #[test]
    fn test_navigation_clamps_at_both_ends() {
        let mut msg = answered("A");
        retry_to(&mut msg, "B");

        assert!(!navigate(&mut msg, Direction::Next));
        assert_eq!(msg.content, "B");

        assert!(navigate(&mut msg, Direction::Prev));
        assert_eq!(msg.content, "A");
        assert_eq!(position(&msg).position, 1);

        assert!(!navigate(&mut msg, Direction::Prev));
        assert_eq!(msg.current_response_index, 0);
    }

    #[test]
    fn test_navigation_recovers_from_stale_index() {
        let mut msg = answered("A");
        retry_to(&mut msg, "B");
        retry_to(&mut msg, "C");
        msg.current_response_index = 7;
        msg.content = "B".to_string();

        assert_eq!(position(&msg).position, 2);
        navigate(&mut msg, Direction::Next);
        assert_eq!(msg.content, "C");
        assert_eq!(msg.current_response_index, 2);
    }

    #[test]
    fn test_position_clamps_stale_index_without_content_match() {
        let mut msg = answered("A");
        retry_to(&mut msg, "B");
        retry_to(&mut msg, "C");
        msg.current_response_index = 7;
        msg.content = "edited elsewhere".to_string();

        assert_eq!(
            position(&msg),
            VariantPosition {
                position: 3,
                total: 3
            }
        );
    }

    #[test]
    fn test_settle_interrupted_unblocks_retry() {
        let mut msg = ChatMessage::assistant_placeholder("m");
        msg.content = "Half an ans".to_string();
        assert!(begin_retry(&mut msg, Uuid::now_v7()).is_err());

        settle_interrupted(&mut msg);
        assert_eq!(msg.status, MessageStatus::Cancelled);
        assert_eq!(msg.content, "Half an ans");

        let id = Uuid::now_v7();
        begin_retry(&mut msg, id).unwrap();
        assert_eq!(msg.response_history[0].state, VariantState::Cancelled);
        assert_eq!(contents(&msg), vec!["Half an ans"]);
    }

    #[test]
    fn test_navigation_without_finals_is_noop() {
        let mut msg = ChatMessage::assistant_placeholder("m");
        assert!(!navigate(&mut msg, Direction::Next));
        assert!(msg.content.is_empty());
    }

    #[test]
    fn test_failed_retry_keeps_previous_current() {
        let mut msg = answered("A");
        let id = Uuid::now_v7();
        begin_retry(&mut msg, id).unwrap();
        finalize_variant(
            &mut msg,
            id,
            String::new(),
            &StreamOutcome::Failed {
                error: "boom".to_string(),
            },
        )
        .unwrap();

        assert_eq!(msg.content, "A");
        assert_eq!(msg.current_response_index, 0);
        assert_eq!(msg.status, MessageStatus::Errored);
        assert_eq!(msg.error.as_deref(), Some("boom"));
        assert_eq!(contents(&msg), vec!["A"]);
        assert_eq!(msg.response_history.len(), 2);
    }

    #[test]
    fn test_partial_failed_retry_is_listed_but_not_current() {
        let mut msg = answered("A");
        let id = Uuid::now_v7();
        begin_retry(&mut msg, id).unwrap();
        finalize_variant(
            &mut msg,
            id,
            "Parti".to_string(),
            &StreamOutcome::Failed {
                error: "reset".to_string(),
            },
        )
        .unwrap();

        assert_eq!(contents(&msg), vec!["A", "Parti"]);
        assert_eq!(msg.content, "A");
        assert_eq!(position(&msg).position, 1);
    }

    #[test]
    fn test_concurrent_retries_finish_out_of_order() {
        let mut msg = answered("A");
        let r1 = Uuid::now_v7();
        let r2 = Uuid::now_v7();
        begin_retry(&mut msg, r1).unwrap();
        begin_retry(&mut msg, r2).unwrap();
        assert_eq!(msg.response_history.len(), 3);

        finalize_variant(&mut msg, r2, "R2".to_string(), &StreamOutcome::Completed).unwrap();
        assert_eq!(msg.status, MessageStatus::Regenerating);
        assert_eq!(msg.content, "R2");
        assert_eq!(contents(&msg), vec!["A", "R2"]);

        finalize_variant(&mut msg, r1, "R1".to_string(), &StreamOutcome::Completed).unwrap();
        assert_eq!(msg.status, MessageStatus::Complete);
        assert_eq!(contents(&msg), vec!["A", "R1", "R2"]);
        assert_eq!(msg.content, "R1");
        assert_eq!(msg.current_response_index, 1);
    }

    #[test]
    fn test_failure_while_sibling_streams_realigns_pointer() {
        let mut msg = answered("A");
        let r1 = Uuid::now_v7();
        let r2 = Uuid::now_v7();
        begin_retry(&mut msg, r1).unwrap();
        begin_retry(&mut msg, r2).unwrap();
        finalize_variant(&mut msg, r2, "R2".to_string(), &StreamOutcome::Completed).unwrap();
        finalize_variant(
            &mut msg,
            r1,
            "half".to_string(),
            &StreamOutcome::Failed {
                error: "x".to_string(),
            },
        )
        .unwrap();

        assert_eq!(contents(&msg), vec!["A", "half", "R2"]);
        assert_eq!(msg.content, "R2");
        assert_eq!(msg.current_response_index, 2);
    }

    #[test]
    fn test_cancelled_retry_with_partial_becomes_current() {
        let mut msg = answered("A");
        let id = Uuid::now_v7();
        begin_retry(&mut msg, id).unwrap();
        finalize_variant(&mut msg, id, "Tru".to_string(), &StreamOutcome::Cancelled).unwrap();

        assert_eq!(msg.content, "Tru");
        assert_eq!(msg.status, MessageStatus::Complete);
        assert_eq!(
            msg.response_history[1].state,
            VariantState::Cancelled
        );
    }

    #[test]
    fn test_retry_after_errored_initial_keeps_errored_original() {
        let mut msg = ChatMessage::assistant_placeholder("m");
        finalize_initial(
            &mut msg,
            "Partial an".to_string(),
            &StreamOutcome::Failed {
                error: "reset".to_string(),
            },
        );
        assert_eq!(msg.status, MessageStatus::Errored);

        retry_to(&mut msg, "Full answer");
        assert_eq!(msg.response_history[0].state, VariantState::Errored);
        assert_eq!(msg.response_history[0].content, "Partial an");
        assert_eq!(contents(&msg), vec!["Partial an", "Full answer"]);
        assert!(msg.error.is_none());
    }

    #[test]
    fn test_begin_retry_rejects_user_message() {
        let mut msg = ChatMessage::user("hi");
        assert!(matches!(
            begin_retry(&mut msg, Uuid::now_v7()),
            Err(ChatError::InvalidRequest(_))
        ));
        assert!(msg.response_history.is_empty());
    }

    #[test]
    fn test_finalize_unknown_variant() {
        let mut msg = answered("A");
        let err = finalize_variant(
            &mut msg,
            Uuid::now_v7(),
            "x".to_string(),
            &StreamOutcome::Completed,
        )
        .unwrap_err();
        assert!(matches!(err, ChatError::NotFound("response variant")));
    }

    #[test]
    fn test_overlay_only_touches_streaming_slots() {
        let mut msg = answered("A");
        let id = Uuid::now_v7();
        begin_retry(&mut msg, id).unwrap();

        overlay_partial(&mut msg, Some(id), "Par");
        overlay_partial(&mut msg, None, "ignored");
        assert_eq!(msg.response_history[1].content, "Par");
        assert_eq!(msg.content, "A");

        finalize_variant(&mut msg, id, "Partial".to_string(), &StreamOutcome::Completed).unwrap();
        overlay_partial(&mut msg, Some(id), "Par");
        assert_eq!(msg.response_history[1].content, "Partial");
    }
}
