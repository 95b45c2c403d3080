//! Fragments, context and claimed batches

use crate::ConversationKey;
use serde::{Deserialize, Serialize};

/// Auxiliary context carried with each arrival
///
/// Only the context of the latest fragment in a burst is delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalContext {
    /// Reference to the group history the responder should read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_history: Option<String>,
    /// Profile/persona selector for the responder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// One arrival, as stored in a pending batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    #[serde(default)]
    pub context: ArrivalContext,
    /// Wall clock time the arrival was recorded (Unix milliseconds)
    pub received_at_ms: u64,
}

/// A pending batch removed from storage by a successful claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedBatch {
    pub key: ConversationKey,
    /// Fragments in arrival order
    pub fragments: Vec<Fragment>,
}

impl ClaimedBatch {
    pub fn new(key: ConversationKey, fragments: Vec<Fragment>) -> Self {
        Self { key, fragments }
    }

    /// Join the trimmed, non-empty fragments in arrival order
    pub fn combined(&self, separator: &str) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Context of the most recent fragment
    pub fn latest_context(&self) -> ArrivalContext {
        self.fragments
            .last()
            .map(|f| f.context.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(text: &str, profile: Option<&str>, at: u64) -> Fragment {
        Fragment {
            text: text.to_string(),
            context: ArrivalContext {
                group_history: None,
                profile: profile.map(str::to_string),
            },
            received_at_ms: at,
        }
    }

    #[test]
    fn test_combined_preserves_order() {
        let batch = ClaimedBatch::new(
            ConversationKey::new("chat-42").unwrap(),
            vec![
                fragment("hello", None, 0),
                fragment("are you there", None, 1000),
                fragment("?", None, 2000),
            ],
        );
        assert_eq!(batch.combined(" "), "hello are you there ?");
        assert_eq!(batch.combined("\n"), "hello\nare you there\n?");
    }

    #[test]
    fn test_combined_skips_blank_fragments() {
        let batch = ClaimedBatch::new(
            ConversationKey::new("k").unwrap(),
            vec![fragment("  ", None, 0), fragment(" hi\n", None, 1), fragment("", None, 2)],
        );
        assert_eq!(batch.combined(" "), "hi");

        let blank = ClaimedBatch::new(ConversationKey::new("k").unwrap(), vec![fragment(" ", None, 0)]);
        assert!(blank.combined(" ").is_empty());
    }

    #[test]
    fn test_latest_context_wins() {
        let batch = ClaimedBatch::new(
            ConversationKey::new("k").unwrap(),
            vec![fragment("a", Some("josh"), 0), fragment("b", Some("ops"), 1)],
        );
        assert_eq!(batch.latest_context().profile.as_deref(), Some("ops"));

        let empty = ClaimedBatch::new(ConversationKey::new("k").unwrap(), Vec::new());
        assert_eq!(empty.latest_context(), ArrivalContext::default());
    }
}
