#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
}

/// Checks applied to an inbound message before any conversation state is read
/// or written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagePolicy {
    pub max_message_chars: usize,
}

impl Default for MessagePolicy {
    fn default() -> Self {
        Self { max_message_chars: 4_000 }
    }
}

impl MessagePolicy {
    pub fn evaluate(&self, message: &str) -> GuardrailDecision {
        if message.trim().is_empty() {
            return GuardrailDecision::Deny {
                reason_code: "empty_message",
                user_message: "A mensagem não pode ser vazia.".to_string(),
            };
        }

        let length = message.chars().count();
        if length > self.max_message_chars {
            return GuardrailDecision::Deny {
                reason_code: "message_too_long",
                user_message: format!(
                    "A mensagem tem {length} caracteres; o limite é {}.",
                    self.max_message_chars
                ),
            };
        }

        GuardrailDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::{GuardrailDecision, MessagePolicy};

    #[test]
    fn ordinary_message_is_allowed() {
        let policy = MessagePolicy::default();
        assert_eq!(policy.evaluate("gastei 50 reais no mercado"), GuardrailDecision::Allow);
    }

    #[test]
    fn blank_message_is_denied() {
        let decision = MessagePolicy::default().evaluate(" \n\t ");

        let reason_code = match decision {
            GuardrailDecision::Deny { reason_code, .. } => reason_code,
            GuardrailDecision::Allow => "",
        };
        assert_eq!(reason_code, "empty_message");
    }

    #[test]
    fn length_limit_counts_characters_not_bytes() {
        let policy = MessagePolicy { max_message_chars: 5 };

        assert_eq!(policy.evaluate("ééééé"), GuardrailDecision::Allow);
        let (reason_code, user_message) = match policy.evaluate("ééééééé") {
            GuardrailDecision::Deny { reason_code, user_message } => (reason_code, user_message),
            GuardrailDecision::Allow => ("", String::new()),
        };
        assert_eq!(reason_code, "message_too_long");
        assert!(user_message.contains("limite é 5"));
    }
}
