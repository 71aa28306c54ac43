use serde::{Deserialize, Serialize};

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of a successful call, as stored in the cache.
///
/// Only `content` matters for correctness; the rest is reporting metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Wall time of the call that produced this response, all attempts included.
    pub latency_ms: u64,
    /// Transport attempts it took to produce this response.
    pub attempts: u32,
    /// Set on responses served from the cache; never persisted as `true`.
    #[serde(default, skip_serializing)]
    pub cached: bool,
}

impl Response {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: None,
            usage: None,
            latency_ms: 0,
            attempts: 1,
            cached: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_flag_is_not_persisted() {
        let mut resp = Response::new("Quantum computing is...").with_model("x");
        resp.cached = true;
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("cached"));
        let back: Response = serde_json::from_str(&json).unwrap();
        assert!(!back.cached);
        assert_eq!(back.content, "Quantum computing is...");
        assert_eq!(back.model.as_deref(), Some("x"));
    }
}
