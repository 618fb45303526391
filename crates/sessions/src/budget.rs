//! History budget applied at write time.
//!
//! Trimming never happens mid-turn; the store runs this on every save and
//! the gateway records a degradation note when anything was dropped.

use drost_domain::config::HistoryBudget;
use drost_domain::message::{ChatMessage, Role};

/// What a budget pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub trimmed: bool,
    pub dropped_messages: usize,
    pub dropped_characters: usize,
}

/// Trim `history` in place to fit the budget.
///
/// Oldest messages go first. When `preserve_system` is set, the leading run
/// of system messages is exempt (they are re-counted against the limits but
/// never dropped).
pub fn apply_budget(history: &mut Vec<ChatMessage>, budget: &HistoryBudget) -> TrimReport {
    let mut report = TrimReport::default();

    if budget.max_messages.is_none() && budget.max_chars.is_none() {
        return report;
    }

    let preserved = if budget.preserve_system {
        history
            .iter()
            .take_while(|m| m.role == Role::System)
            .count()
    } else {
        0
    };

    if let Some(max) = budget.max_messages {
        while history.len() > max.max(preserved) && history.len() > preserved {
            let dropped = history.remove(preserved);
            report.dropped_messages += 1;
            report.dropped_characters += dropped.content.len();
        }
    }

    if let Some(max_chars) = budget.max_chars {
        let mut total: usize = history.iter().map(|m| m.content.len()).sum();
        while total > max_chars && history.len() > preserved {
            let dropped = history.remove(preserved);
            total -= dropped.content.len();
            report.dropped_messages += 1;
            report.dropped_characters += dropped.content.len();
        }
    }

    report.trimmed = report.dropped_messages > 0;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| ChatMessage::user(format!("message-{i}")))
            .collect()
    }

    #[test]
    fn no_budget_means_no_trim() {
        let mut history = msgs(50);
        let report = apply_budget(&mut history, &HistoryBudget::default());
        assert!(!report.trimmed);
        assert_eq!(history.len(), 50);
    }

    #[test]
    fn max_messages_drops_oldest() {
        let mut history = msgs(10);
        let budget = HistoryBudget {
            max_messages: Some(4),
            max_chars: None,
            preserve_system: true,
        };
        let report = apply_budget(&mut history, &budget);
        assert!(report.trimmed);
        assert_eq!(report.dropped_messages, 6);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "message-6");
    }

    #[test]
    fn leading_system_messages_survive() {
        let mut history = vec![ChatMessage::system("rules")];
        history.extend(msgs(9));
        let budget = HistoryBudget {
            max_messages: Some(3),
            max_chars: None,
            preserve_system: true,
        };
        apply_budget(&mut history, &budget);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn max_chars_reported() {
        let mut history = vec![
            ChatMessage::user("aaaaaaaaaa"), // 10 chars
            ChatMessage::user("bbbbbbbbbb"),
            ChatMessage::user("cc"),
        ];
        let budget = HistoryBudget {
            max_messages: None,
            max_chars: Some(15),
            preserve_system: true,
        };
        let report = apply_budget(&mut history, &budget);
        assert_eq!(report.dropped_messages, 2);
        assert_eq!(report.dropped_characters, 20);
        assert_eq!(history.len(), 1);
    }
}
