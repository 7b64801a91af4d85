use extract::{ModelClient, OllamaClient, OpenAiClient, RunOptions};
use grounding::GrounderConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Provider {provider} requires an API key (set LLM_API_KEY)")]
    MissingApiKey { provider: &'static str },
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub concurrency: ConcurrencyConfig,
    pub grounding: GroundingConfig,
    pub model: ProviderConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // More parallel calls, short timeout
    Accurate, // Few parallel calls, long timeout
    #[default]
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_llm_calls: usize,
    pub request_timeout_secs: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_llm_calls: 3,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingConfig {
    pub max_section_tokens: usize,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            max_section_tokens: GrounderConfig::default().max_section_tokens,
        }
    }
}

/// Which Model Client implementation to build.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    Ollama {
        base_url: String,
        model: String,
    },
    OpenAi {
        base_url: String,
        model: String,
        // Only ever read from the environment
        #[serde(skip)]
        api_key: Option<SecretString>,
    },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Ollama {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
        }
    }
}

impl ProviderConfig {
    fn openai_default() -> Self {
        ProviderConfig::OpenAi {
            base_url: OpenAiClient::DEFAULT_BASE_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Ollama { .. } => "ollama",
            ProviderConfig::OpenAi { .. } => "openai",
        }
    }

    /// Overlay `LLM_PROVIDER`, `LLM_BASE_URL`, `LLM_MODEL` and `LLM_API_KEY`.
    pub fn apply_env(self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    fn apply_vars(self, var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = match var("LLM_PROVIDER").map(|p| p.trim().to_lowercase()) {
            Some(p) if p == self.name() => self,
            Some(p) if p == "ollama" => ProviderConfig::default(),
            Some(p) if p == "openai" => Self::openai_default(),
            Some(other) => {
                warn!(provider = %other, "Unknown LLM_PROVIDER, keeping configured provider");
                self
            }
            None => self,
        };

        match &mut config {
            ProviderConfig::Ollama { base_url, model } => {
                overlay(base_url, var("LLM_BASE_URL"));
                overlay(model, var("LLM_MODEL"));
            }
            ProviderConfig::OpenAi {
                base_url,
                model,
                api_key,
            } => {
                overlay(base_url, var("LLM_BASE_URL"));
                overlay(model, var("LLM_MODEL"));
                if let Some(key) = var("LLM_API_KEY") {
                    *api_key = Some(SecretString::from(key));
                }
            }
        }
        config
    }

    pub fn build(&self) -> Result<Arc<dyn ModelClient>, ConfigError> {
        match self {
            ProviderConfig::Ollama { base_url, model } => {
                Ok(Arc::new(OllamaClient::new(base_url.clone(), model.clone())))
            }
            ProviderConfig::OpenAi {
                base_url,
                model,
                api_key,
            } => {
                let api_key = api_key
                    .as_ref()
                    .ok_or(ConfigError::MissingApiKey { provider: "openai" })?;
                Ok(Arc::new(OpenAiClient::new(
                    base_url.clone(),
                    model.clone(),
                    SecretString::from(api_key.expose_secret()),
                )))
            }
        }
    }
}

fn overlay(field: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *field = value;
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        Self {
            mode: OperationMode::Fast,
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 10,
                request_timeout_secs: 30,
            },
            grounding: GroundingConfig {
                max_section_tokens: 1500,
            },
            model: ProviderConfig::default(),
        }
    }

    pub fn accurate_mode() -> Self {
        Self {
            mode: OperationMode::Accurate,
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 2,
                request_timeout_secs: 120,
            },
            grounding: GroundingConfig {
                max_section_tokens: 600,
            },
            model: ProviderConfig::default(),
        }
    }

    /// Read a JSON config file (or use defaults) and overlay the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(Self {
            model: config.model.apply_env(),
            ..config
        })
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_concurrency: self.concurrency.max_concurrent_llm_calls,
            call_timeout: Duration::from_secs(self.concurrency.request_timeout_secs),
            ..RunOptions::default()
        }
    }

    pub fn grounder_config(&self) -> GrounderConfig {
        GrounderConfig {
            max_section_tokens: self.grounding.max_section_tokens,
        }
    }
}
