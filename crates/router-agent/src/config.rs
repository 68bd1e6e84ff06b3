use anyhow::{Context, Result};
use routing::{ModelProfile, RoutingConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// OpenAI-compatible endpoint the HTTP adapter talks to.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Base URL up to and including `/v1`
    pub base_url: String,
    /// Environment variable holding the provider API key
    pub api_key_var: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("ROUTER_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000/v1".into()),
            api_key_var: std::env::var("ROUTER_API_KEY_VAR")
                .unwrap_or_else(|_| "ROUTER_API_KEY".into()),
            max_tokens: std::env::var("ROUTER_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024),
            temperature: std::env::var("ROUTER_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.2),
        }
    }
}

impl EndpointConfig {
    /// API key from the configured variable, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub endpoint: EndpointConfig,
    /// TOML file with `[[profiles]]` entries and an optional `[routing]` table
    pub profiles_path: PathBuf,
    pub routing: RoutingConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            profiles_path: std::env::var("ROUTER_PROFILES")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/profiles.toml")),
            routing: RoutingConfig::from_env(),
        }
    }
}

/// Contents of the profiles file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfilesFile {
    /// Routing overrides; environment variables still win
    #[serde(default)]
    pub routing: Option<RoutingConfig>,
    #[serde(default)]
    pub profiles: Vec<ModelProfile>,
}

impl ProfilesFile {
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse profiles TOML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profiles file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid profiles file {}", path.display()))
    }
}

impl AgentConfig {
    /// Load the profiles file and merge its routing table under the environment.
    pub fn load_profiles(&mut self) -> Result<Vec<ModelProfile>> {
        let file = ProfilesFile::load(&self.profiles_path)?;
        if let Some(mut routing) = file.routing {
            routing.apply_overrides(|var| std::env::var(var).ok());
            self.routing = routing;
        }
        self.routing
            .validate()
            .context("Routing configuration rejected")?;
        Ok(file.profiles)
    }
}
