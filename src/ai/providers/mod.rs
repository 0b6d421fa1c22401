// AI provider clients

//! # Providers
//!
//! One module per backend: `anthropic` and `openai` talk to the hosted
//! APIs, `ollama` to a local runtime (keyless, zero-cost models). Every
//! client implements [`crate::ai::AIProvider`] and ships a static model
//! catalog carrying the quality/cost/capability metadata the router scores.
//!
//! HTTP error mapping is uniform across clients: 429 becomes `RateLimited`,
//! 400 `InvalidRequest`, 404 `ModelNotFound`, auth failures and transport
//! errors `Unavailable`, and 5xx `Upstream`.

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAIConfig, OpenAIProvider};

use crate::ai::AIError;

/// Shared status-code classification for hosted provider APIs
pub(crate) fn classify_status(provider: &str, status: u16, body: &str) -> AIError {
    match status {
        429 => AIError::RateLimited(format!("{}: {}", provider, body)),
        400 => AIError::InvalidRequest(format!("{}: {}", provider, body)),
        404 => AIError::ModelNotFound(format!("{}: {}", provider, body)),
        401 | 403 => AIError::Unavailable(format!("{} rejected the credentials", provider)),
        status if status >= 500 => AIError::Upstream {
            status,
            message: format!("{}: {}", provider, body),
        },
        status => AIError::Internal(format!("{} returned HTTP {}: {}", provider, status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_matches_the_taxonomy() {
        assert!(matches!(
            classify_status("anthropic", 429, "slow down"),
            AIError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status("openai", 400, "bad params"),
            AIError::InvalidRequest(_)
        ));
        assert!(matches!(
            classify_status("openai", 404, "no such model"),
            AIError::ModelNotFound(_)
        ));
        assert!(matches!(
            classify_status("anthropic", 401, "bad key"),
            AIError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status("ollama", 503, "overloaded"),
            AIError::Upstream { status: 503, .. }
        ));
    }
}
