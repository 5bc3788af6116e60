use std::collections::{BTreeMap, HashMap};

/// An OpenAI-compatible chat completions endpoint known by provider name.
pub struct Endpoint {
    pub names: &'static [&'static str],
    pub url: &'static str,
    pub headers: &'static [(&'static str, &'static str)],
}

const ENDPOINTS: &[Endpoint] = &[
    Endpoint {
        names: &["ollama", "local"],
        url: "http://localhost:11434/v1/chat/completions",
        headers: &[],
    },
    Endpoint {
        names: &["gemini", "google"],
        url: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
        headers: &[],
    },
    Endpoint {
        names: &["groq"],
        url: "https://api.groq.com/openai/v1/chat/completions",
        headers: &[],
    },
    Endpoint {
        names: &["openrouter"],
        url: "https://openrouter.ai/api/v1/chat/completions",
        headers: &[("X-Title", "dago")],
    },
    Endpoint {
        names: &["together"],
        url: "https://api.together.xyz/v1/chat/completions",
        headers: &[],
    },
    Endpoint {
        names: &["mistral"],
        url: "https://api.mistral.ai/v1/chat/completions",
        headers: &[],
    },
    Endpoint {
        names: &["deepseek"],
        url: "https://api.deepseek.com/v1/chat/completions",
        headers: &[],
    },
];

pub fn lookup(provider: &str) -> Option<&'static Endpoint> {
    ENDPOINTS.iter().find(|e| e.names.contains(&provider))
}

impl Endpoint {
    /// The endpoint's own headers with configured ones layered on top.
    pub fn headers_with(&self, configured: &HashMap<String, String>) -> Vec<(String, String)> {
        let mut merged: BTreeMap<String, String> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        merged.extend(configured.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.into_iter().collect()
    }
}
