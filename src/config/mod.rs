//! Configuration management for gpt-relay.
//!
//! # Configuration File Format
//!
//! Configuration is stored in TOML format. The search order is:
//! 1. `./gpt-relay.toml` (project-local)
//! 2. `~/.config/gpt-relay/config.toml` (XDG config)
//!
//! # Example Configuration
//!
//! ```toml
//! platform = "openai"
//! model = "gpt-3.5-turbo"
//! max_tokens = 2000
//! stream_max_tokens = 2000
//! api_key_env = "OPENAI_API_KEY"
//! api_url = "https://api.openai.com"
//! http_proxy = "http://127.0.0.1:7890"
//!
//! # Only read when platform = "azure"
//! [azure]
//! resource_name = "contoso"
//! deployment_name = "gpt35"
//! api_token_env = "AZURE_OPENAI_KEY"
//!
//! [logging]
//! level = "Info"
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use gpt_relay::config;
//!
//! let config = config::load()?;
//! let backend = config.backend_profile()?;
//! ```

mod file;
mod types;

pub use file::{from_path, from_str, load, search_paths, xdg_config_dir};

pub use types::{
    AzureConfig, Platform, RelayConfig, DEFAULT_API_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
};
