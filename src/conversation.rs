//! Conversation window (§4.4): message-history trimming with head/tail
//! preservation.

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub max_messages: usize,
    pub preserve_first_n: usize,
    pub preserve_last_n: usize,
    pub summarize_on_trim: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: 100,
            preserve_first_n: 1,
            preserve_last_n: 20,
            summarize_on_trim: false,
        }
    }
}

/// Trim `messages` so the cap `max_messages` is respected (§4.4 algorithm).
/// `summarizer` receives the evicted text when `summarize_on_trim` is set
/// and at least 10 evictions have accumulated since the last summary; its
/// failure (returning `None`) falls back silently to plain eviction.
pub fn trim(messages: Vec<WindowMessage>, config: &ConversationConfig, summarizer: Option<&dyn Fn(&str) -> Option<String>>) -> Vec<WindowMessage> {
    debug!(count = messages.len(), max = config.max_messages, "trim: called");
    if config.max_messages == 0 || messages.len() <= config.max_messages {
        return messages;
    }

    let head_n = config.preserve_first_n.min(messages.len());
    let tail_n = config.preserve_last_n.min(messages.len().saturating_sub(head_n));

    let head: Vec<WindowMessage> = messages[..head_n].to_vec();
    let tail_start = messages.len() - tail_n;
    let tail: Vec<WindowMessage> = messages[tail_start..].to_vec();
    let middle: Vec<WindowMessage> = messages[head_n..tail_start].to_vec();

    if head_n + tail_n >= config.max_messages {
        debug!("trim: head+tail fill the cap, middle fully evicted");
        let mut result = head;
        result.extend(tail);
        return result;
    }

    let keep_from_middle = config.max_messages - head_n - tail_n;
    let evicted_count = middle.len().saturating_sub(keep_from_middle);
    let kept_middle: Vec<WindowMessage> = middle[evicted_count..].to_vec();
    let evicted: Vec<WindowMessage> = middle[..evicted_count].to_vec();

    let mut result = head;

    if config.summarize_on_trim && evicted.len() >= 10 {
        if let Some(summarizer) = summarizer {
            let evicted_text = evicted.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
            if let Some(summary) = summarizer(&evicted_text) {
                result.push(WindowMessage {
                    role: "assistant".to_string(),
                    content: format!("[Conversation Summary] {summary}"),
                });
            }
        }
    }

    result.extend(kept_middle);
    result.extend(tail);
    result
}

/// `ceil(totalChars / 4)` over string/array/object JSON contents.
pub fn estimate_tokens(value: &serde_json::Value) -> u64 {
    fn walk(value: &serde_json::Value, total: &mut usize) {
        match value {
            serde_json::Value::String(s) => *total += s.len(),
            serde_json::Value::Array(arr) => arr.iter().for_each(|v| walk(v, total)),
            serde_json::Value::Object(obj) => obj.values().for_each(|v| walk(v, total)),
            serde_json::Value::Number(n) => *total += n.to_string().len(),
            serde_json::Value::Bool(b) => *total += if *b { 4 } else { 5 },
            serde_json::Value::Null => {}
        }
    }
    let mut total = 0usize;
    walk(value, &mut total);
    ((total as u64) + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(n: usize) -> Vec<WindowMessage> {
        (0..n)
            .map(|i| WindowMessage {
                role: "user".to_string(),
                content: format!("msg-{i}"),
            })
            .collect()
    }

    #[test]
    fn no_trim_when_under_cap() {
        let config = ConversationConfig::default();
        let messages = msgs(10);
        let result = trim(messages.clone(), &config, None);
        assert_eq!(result, messages);
    }

    #[test]
    fn zero_cap_disables_trimming() {
        let config = ConversationConfig {
            max_messages: 0,
            ..Default::default()
        };
        let messages = msgs(500);
        assert_eq!(trim(messages.clone(), &config, None).len(), 500);
    }

    #[test]
    fn preserves_first_and_last_n() {
        let config = ConversationConfig {
            max_messages: 10,
            preserve_first_n: 2,
            preserve_last_n: 3,
            summarize_on_trim: false,
        };
        let messages = msgs(50);
        let result = trim(messages.clone(), &config, None);
        assert_eq!(result[0], messages[0]);
        assert_eq!(result[1], messages[1]);
        assert_eq!(result[result.len() - 1], messages[49]);
        assert_eq!(result[result.len() - 2], messages[48]);
        assert_eq!(result[result.len() - 3], messages[47]);
        assert_eq!(result.len(), 10);
    }

    #[test]
    fn head_plus_tail_exceeding_cap_never_evicts_tail() {
        let config = ConversationConfig {
            max_messages: 4,
            preserve_first_n: 2,
            preserve_last_n: 5,
            summarize_on_trim: false,
        };
        let messages = msgs(20);
        let result = trim(messages.clone(), &config, None);
        assert_eq!(result.len(), 2 + 5);
        assert_eq!(&result[2..], &messages[15..]);
    }

    #[test]
    fn summarizer_inserted_after_ten_evictions() {
        let config = ConversationConfig {
            max_messages: 10,
            preserve_first_n: 1,
            preserve_last_n: 1,
            summarize_on_trim: true,
        };
        let messages = msgs(30);
        let summarizer = |_: &str| Some("summary text".to_string());
        let result = trim(messages, &config, Some(&summarizer));
        assert!(result[1].content.contains("[Conversation Summary]"));
    }

    #[test]
    fn summarizer_failure_falls_back_to_plain_eviction() {
        let config = ConversationConfig {
            max_messages: 10,
            preserve_first_n: 1,
            preserve_last_n: 1,
            summarize_on_trim: true,
        };
        let messages = msgs(30);
        let summarizer = |_: &str| None;
        let result = trim(messages, &config, Some(&summarizer));
        assert!(!result.iter().any(|m| m.content.contains("Summary")));
    }

    #[test]
    fn estimate_tokens_walks_nested_json() {
        let value = serde_json::json!({"a": "abcd", "b": ["ef", "gh"]});
        assert_eq!(estimate_tokens(&value), 2);
    }
}
