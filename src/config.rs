//! Environment-derived application settings.
//!
//! Everything is read once from the process environment; there is no
//! config file. API keys stay optional here — the HTTP clients report a
//! missing key as an upstream error at call time.

use once_cell::sync::OnceCell;

/// Default base model applied to freshly created variants.
pub const DEFAULT_BASE_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the feature-steerable inference service.
    pub inference_base_url: String,
    /// API key for the inference service.
    pub inference_api_key: Option<String>,
    /// Base URL of the analysis capability (OpenAI-compatible).
    pub analysis_base_url: String,
    /// API key for the analysis capability.
    pub analysis_api_key: Option<String>,
    /// Model name used for analysis calls.
    pub analysis_model: String,
    /// Base model for new variants.
    pub default_base_model: String,
    /// HTTP bind port.
    pub port: u16,
    /// Generation defaults.
    pub max_completion_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl Settings {
    /// Read settings from the environment, filling defaults for
    /// everything except the API keys.
    pub fn from_env() -> Self {
        Self {
            inference_base_url: std::env::var("INFERENCE_BASE_URL")
                .unwrap_or_else(|_| "https://api.goodfire.ai/api/inference/v1".to_string()),
            inference_api_key: std::env::var("INFERENCE_API_KEY").ok(),
            analysis_base_url: std::env::var("ANALYSIS_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            analysis_api_key: std::env::var("ANALYSIS_API_KEY").ok(),
            analysis_model: std::env::var("ANALYSIS_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            default_base_model: std::env::var("DEFAULT_BASE_MODEL")
                .unwrap_or_else(|_| DEFAULT_BASE_MODEL.to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            max_completion_tokens: std::env::var("MAX_COMPLETION_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(512),
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            inference_base_url: "https://api.goodfire.ai/api/inference/v1".to_string(),
            inference_api_key: None,
            analysis_base_url: "https://api.openai.com/v1".to_string(),
            analysis_api_key: None,
            analysis_model: "gpt-4o-mini".to_string(),
            default_base_model: DEFAULT_BASE_MODEL.to_string(),
            port: 8080,
            max_completion_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// Process-wide settings, initialized from the environment on first use.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(Settings::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_cell_is_process_wide() {
        let first = settings() as *const Settings;
        let second = settings() as *const Settings;
        assert_eq!(first, second);
        assert!(!settings().default_base_model.is_empty());
    }

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert_eq!(s.default_base_model, DEFAULT_BASE_MODEL);
        assert_eq!(s.port, 8080);
        assert_eq!(s.max_completion_tokens, 512);
        assert!(s.inference_api_key.is_none());
    }
}
