//! Adapter registry and provider identification (C2): maps an incoming
//! request to the one adapter that understands its wire format.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::ProviderKind;

use super::anthropic::AnthropicAdapter;
use super::bedrock::BedrockAdapter;
use super::gemini::GeminiAdapter;
use super::ollama::OllamaAdapter;
use super::openai::OpenaiAdapter;
use super::Adapter;

/// Case-insensitive header lookup. The gateway binary implements this
/// over whatever header map its HTTP framework hands it; tests and the
/// orchestrator's own unit tests use the `HashMap` impl below.
pub trait HeaderSource {
    fn get(&self, name: &str) -> Option<&str>;
}

impl HeaderSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.iter().find(|(k, _)| k.to_ascii_lowercase() == name).map(|(_, v)| v.as_str())
    }
}

/// Holds one boxed [`Adapter`] per [`ProviderKind`]. Built once at
/// startup and shared read-only afterward — there is no reason to
/// mutate it past setup, so it carries no interior synchronization.
pub struct AdapterRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn Adapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut adapters: HashMap<ProviderKind, Arc<dyn Adapter>> = HashMap::new();
        adapters.insert(ProviderKind::Anthropic, Arc::new(AnthropicAdapter));
        adapters.insert(ProviderKind::Openai, Arc::new(OpenaiAdapter));
        adapters.insert(ProviderKind::Gemini, Arc::new(GeminiAdapter));
        adapters.insert(ProviderKind::Ollama, Arc::new(OllamaAdapter));
        adapters.insert(ProviderKind::Bedrock, Arc::new(BedrockAdapter::default()));
        Self { adapters }
    }
}

impl AdapterRegistry {
    pub fn get(&self, provider: ProviderKind) -> Arc<dyn Adapter> {
        self.adapters
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| self.adapters[&ProviderKind::Openai].clone())
    }
}

/// Identifies which provider a request targets, in priority order:
/// an explicit `X-Provider` header, then URL-path conventions, then
/// API-shape headers, falling back to OpenAI when nothing matches.
pub fn identify_provider(headers: &dyn HeaderSource, path: &str) -> ProviderKind {
    if let Some(explicit) = headers.get("x-provider").and_then(parse_provider_header) {
        return explicit;
    }

    if let Some(provider) = identify_from_path(path) {
        return provider;
    }

    if headers.get("x-api-key").is_some() && headers.get("anthropic-version").is_some() {
        return ProviderKind::Anthropic;
    }

    if headers.get("x-goog-api-key").is_some() {
        return ProviderKind::Gemini;
    }

    ProviderKind::Openai
}

fn parse_provider_header(value: &str) -> Option<ProviderKind> {
    match value.to_ascii_lowercase().as_str() {
        "anthropic" => Some(ProviderKind::Anthropic),
        "openai" => Some(ProviderKind::Openai),
        "gemini" => Some(ProviderKind::Gemini),
        "ollama" => Some(ProviderKind::Ollama),
        "bedrock" => Some(ProviderKind::Bedrock),
        _ => None,
    }
}

fn identify_from_path(path: &str) -> Option<ProviderKind> {
    if path.ends_with("/v1/messages") {
        return Some(ProviderKind::Anthropic);
    }
    if path.ends_with("/v1/chat/completions") {
        return Some(ProviderKind::Openai);
    }
    if path.ends_with("/api/chat") || path.ends_with("/api/generate") {
        return Some(ProviderKind::Ollama);
    }
    if path.contains("/models/") && path.contains(":generateContent") {
        return Some(ProviderKind::Gemini);
    }
    if bedrock_model_id(path).is_some() {
        return Some(ProviderKind::Bedrock);
    }
    None
}

/// Pulls `{modelId}` out of a Bedrock `.../model/{modelId}/invoke` path.
pub fn bedrock_model_id(path: &str) -> Option<&str> {
    let after = path.split("/model/").nth(1)?;
    after.strip_suffix("/invoke").or_else(|| after.strip_suffix("/invoke-with-response-stream"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn explicit_header_wins_over_everything() {
        let h = headers(&[("X-Provider", "gemini")]);
        assert_eq!(identify_provider(&h, "/v1/messages"), ProviderKind::Gemini);
    }

    #[test]
    fn path_suffix_identifies_anthropic() {
        let h = headers(&[]);
        assert_eq!(identify_provider(&h, "/v1/messages"), ProviderKind::Anthropic);
    }

    #[test]
    fn path_suffix_identifies_ollama_chat_and_generate() {
        let h = headers(&[]);
        assert_eq!(identify_provider(&h, "/api/chat"), ProviderKind::Ollama);
        assert_eq!(identify_provider(&h, "/api/generate"), ProviderKind::Ollama);
    }

    #[test]
    fn gemini_generate_content_path_is_recognized() {
        let h = headers(&[]);
        assert_eq!(
            identify_provider(&h, "/v1beta/models/gemini-1.5-pro:generateContent"),
            ProviderKind::Gemini
        );
    }

    #[test]
    fn bedrock_invoke_path_is_recognized_and_model_id_extractable() {
        let path = "/model/anthropic.claude-3-5-sonnet-20241022-v2:0/invoke";
        assert_eq!(identify_provider(&headers(&[]), path), ProviderKind::Bedrock);
        assert_eq!(bedrock_model_id(path), Some("anthropic.claude-3-5-sonnet-20241022-v2:0"));
    }

    #[test]
    fn api_shape_headers_are_used_when_path_is_ambiguous() {
        let anthropic = headers(&[("x-api-key", "sk-1"), ("anthropic-version", "2023-06-01")]);
        assert_eq!(identify_provider(&anthropic, "/proxy"), ProviderKind::Anthropic);

        let gemini = headers(&[("x-goog-api-key", "key")]);
        assert_eq!(identify_provider(&gemini, "/proxy"), ProviderKind::Gemini);
    }

    #[test]
    fn falls_back_to_openai() {
        assert_eq!(identify_provider(&headers(&[]), "/unknown"), ProviderKind::Openai);
    }

    #[test]
    fn registry_returns_the_matching_adapter() {
        let registry = AdapterRegistry::default();
        assert_eq!(registry.get(ProviderKind::Gemini).provider(), ProviderKind::Gemini);
    }
}
