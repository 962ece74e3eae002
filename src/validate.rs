//! Pre-send validation: confirms a candidate prompt fits the provider's
//! effective limit with the response budget reserved.

use crate::policy::{ProviderProfiles, TokenCounter};
use crate::storage::Message;
use std::sync::Arc;

/// Outcome of a fit check. Validation is pure: the same prompt always
/// yields the same result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Fit { tokens: u32 },
    Over { tokens: u32, limit: u32, by: u32 },
}

impl Validation {
    pub fn is_fit(&self) -> bool {
        matches!(self, Validation::Fit { .. })
    }

    pub fn tokens(&self) -> u32 {
        match *self {
            Validation::Fit { tokens } | Validation::Over { tokens, .. } => tokens,
        }
    }
}

/// Validates candidate prompts against the provider's pre-computed
/// effective size for the configured context profile.
pub struct ValidationService {
    profiles: Arc<dyn ProviderProfiles>,
    counter: Arc<dyn TokenCounter>,
    requested_size: u32,
    reserved_response: u32,
}

impl ValidationService {
    pub fn new(
        profiles: Arc<dyn ProviderProfiles>,
        counter: Arc<dyn TokenCounter>,
        requested_size: u32,
        reserved_response: u32,
    ) -> Self {
        Self {
            profiles,
            counter,
            requested_size,
            reserved_response,
        }
    }

    /// The token budget available for prompt contents: the provider's
    /// effective limit minus the reserved response budget.
    pub fn prompt_budget(&self, model_id: &str) -> u32 {
        self.profiles
            .effective_limit(model_id, self.requested_size)
            .saturating_sub(self.reserved_response)
    }

    /// Validate a materialized prompt. Uses each message's preset
    /// `token_count` when present, counting the content otherwise.
    pub fn validate(&self, prompt: &[Message], model_id: &str) -> Validation {
        let tokens: u32 = prompt
            .iter()
            .map(|m| {
                m.token_count
                    .unwrap_or_else(|| self.counter.count_tokens(&m.content))
            })
            .sum();

        let limit = self.prompt_budget(model_id);
        if tokens <= limit {
            Validation::Fit { tokens }
        } else {
            let by = tokens - limit;
            tracing::debug!(tokens, limit, by, "prompt over budget");
            Validation::Over { tokens, limit, by }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Message;

    struct FixedProfiles(u32);

    impl ProviderProfiles for FixedProfiles {
        fn effective_limit(&self, _model_id: &str, _requested_size: u32) -> u32 {
            self.0
        }

        fn context_limit(&self, _model_id: &str) -> u32 {
            self.0
        }
    }

    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count_tokens(&self, text: &str) -> u32 {
            text.chars().count() as u32
        }
    }

    fn service(limit: u32, reserved: u32) -> ValidationService {
        ValidationService::new(Arc::new(FixedProfiles(limit)), Arc::new(CharCounter), 8192, reserved)
    }

    #[test]
    fn test_fit_under_budget() {
        let svc = service(400, 50);
        let prompt = vec![Message::user("x".repeat(100))];
        match svc.validate(&prompt, "m") {
            Validation::Fit { tokens } => assert_eq!(tokens, 100),
            over => panic!("expected fit, got {over:?}"),
        }
    }

    #[test]
    fn test_over_reports_exact_overage() {
        let svc = service(400, 50);
        let prompt = vec![Message::user("x".repeat(400))];
        match svc.validate(&prompt, "m") {
            Validation::Over { tokens, limit, by } => {
                assert_eq!(tokens, 400);
                assert_eq!(limit, 350);
                assert_eq!(by, 50);
            }
            fit => panic!("expected over, got {fit:?}"),
        }
    }

    #[test]
    fn test_preset_token_count_wins() {
        let svc = service(400, 50);
        let prompt = vec![Message::user("irrelevant").with_token_count(340)];
        assert_eq!(svc.validate(&prompt, "m").tokens(), 340);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let svc = service(400, 50);
        let prompt = vec![
            Message::system("s".repeat(30)),
            Message::user("u".repeat(360)),
        ];
        let first = svc.validate(&prompt, "m");
        let second = svc.validate(&prompt, "m");
        assert_eq!(first, second);
    }
}
