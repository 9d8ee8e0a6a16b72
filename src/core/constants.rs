//! Constants for chat roles, request parameters, and model families

/// Message role constants
pub mod role {
    /// User role identifier
    pub const USER: &str = "user";

    /// Assistant role identifier
    pub const ASSISTANT: &str = "assistant";

    /// System role identifier
    pub const SYSTEM: &str = "system";
}

/// Chat request parameters accepted by the Azure OpenAI deployment endpoint.
/// Anything else in the host body is dropped before dispatch.
pub const ALLOWED_CHAT_PARAMS: &[&str] = &[
    "messages",
    "temperature",
    "role",
    "content",
    "contentPart",
    "contentPartImage",
    "enhancements",
    "dataSources",
    "n",
    "stream",
    "stop",
    "max_tokens",
    "max_completion_tokens",
    "presence_penalty",
    "frequency_penalty",
    "logit_bias",
    "user",
    "function_call",
    "functions",
    "tools",
    "tool_choice",
    "top_p",
    "log_probs",
    "top_logprobs",
    "response_format",
    "seed",
];

/// Whether a model id belongs to the reasoning family.
///
/// Reasoning deployments reject `stream = true` and take
/// `max_completion_tokens` in place of `max_tokens`.
pub fn is_reasoning_model(model_id: &str) -> bool {
    if model_id == "o1" || model_id == "o1-mini" {
        return true;
    }
    let mut chars = model_id.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('o'), Some(c)) if c.is_ascii_digit()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_model_detection() {
        assert!(is_reasoning_model("o1"));
        assert!(is_reasoning_model("o1-mini"));
        assert!(is_reasoning_model("o3-mini"));
        assert!(!is_reasoning_model("gpt-4o"));
        assert!(!is_reasoning_model("gpt-4o-mini"));
        assert!(!is_reasoning_model("ollama"));
    }
}
