//! Configuration management for bidi-oxide

use crate::{Error, Result};
use serde::Deserialize;
use std::env;

/// Overrides one config field from an environment variable, parsing into
/// the field's type where one is named.
macro_rules! env_override {
    ($cfg:ident.$field:ident, $var:expr) => {
        if let Ok(raw) = env::var($var) {
            $cfg.$field = raw;
        }
    };

    ($cfg:ident.$field:ident, $var:expr, $ty:ty) => {
        if let Ok(raw) = env::var($var) {
            $cfg.$field = raw
                .parse::<$ty>()
                .map_err(|_| Error::configuration(format!("{} has an invalid value", $var)))?;
        }
    };

    (optional $cfg:ident.$field:ident, $var:expr) => {
        if let Ok(raw) = env::var($var) {
            $cfg.$field = Some(raw);
        }
    };
}

/// Chrome release channel to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    Stable,
    Beta,
    Dev,
    Canary,
}

impl std::str::FromStr for ReleaseChannel {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stable" => Ok(ReleaseChannel::Stable),
            "beta" => Ok(ReleaseChannel::Beta),
            "dev" => Ok(ReleaseChannel::Dev),
            "canary" => Ok(ReleaseChannel::Canary),
            _ => Err(()),
        }
    }
}

/// How the session handles unhandled user prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptBehavior {
    Accept,
    Dismiss,
    Ignore,
}

impl std::str::FromStr for PromptBehavior {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "accept" => Ok(PromptBehavior::Accept),
            "dismiss" => Ok(PromptBehavior::Dismiss),
            "ignore" => Ok(PromptBehavior::Ignore),
            _ => Err(()),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Run the browser headless
    pub headless: bool,

    /// Chrome release channel
    pub channel: ReleaseChannel,

    /// Verbose protocol logging
    pub verbose: bool,

    /// Extra Chrome command-line arguments
    pub chrome_args: Vec<String>,

    /// Chrome executable path override
    pub chrome_binary: Option<String>,

    /// Accept TLS certificates the browser would reject
    pub accept_insecure_certs: bool,

    /// Prefix shared ids with the owning frame id
    pub shared_id_with_frame: bool,

    /// Default disposition for unhandled user prompts
    pub unhandled_prompt_behavior: PromptBehavior,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            headless: true,
            channel: ReleaseChannel::Stable,
            verbose: false,
            chrome_args: Vec::new(),
            chrome_binary: None,
            accept_insecure_certs: false,
            shared_id_with_frame: false,
            unhandled_prompt_behavior: PromptBehavior::Ignore,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        env_override!(config.host, "BIDI_HOST");
        env_override!(config.port, "BIDI_PORT", u16);
        env_override!(config.headless, "BIDI_HEADLESS", bool);
        env_override!(optional config.chrome_binary, "BIDI_CHROME_BINARY");
        env_override!(config.verbose, "BIDI_VERBOSE", bool);
        env_override!(config.accept_insecure_certs, "BIDI_ACCEPT_INSECURE_CERTS", bool);
        env_override!(config.shared_id_with_frame, "BIDI_SHARED_ID_WITH_FRAME", bool);

        if let Ok(raw) = env::var("BIDI_CHANNEL") {
            config.channel = raw
                .parse()
                .map_err(|_| Error::configuration("BIDI_CHANNEL has an invalid value"))?;
        }

        if let Ok(raw) = env::var("BIDI_CHROME_ARGS") {
            config.chrome_args = raw.split_whitespace().map(str::to_string).collect();
        }

        if let Ok(raw) = env::var("BIDI_UNHANDLED_PROMPT_BEHAVIOR") {
            config.unhandled_prompt_behavior = raw.parse().map_err(|_| {
                Error::configuration("BIDI_UNHANDLED_PROMPT_BEHAVIOR has an invalid value")
            })?;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Cannot read {}: {}", path, e)))?;
        toml::from_str(&raw)
            .map_err(|e| Error::configuration(format!("Malformed config in {}: {}", path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(config.headless);
        assert_eq!(config.channel, ReleaseChannel::Stable);
        assert_eq!(config.unhandled_prompt_behavior, PromptBehavior::Ignore);
    }

    #[test]
    fn channel_parsing() {
        assert_eq!("canary".parse(), Ok(ReleaseChannel::Canary));
        assert!("nightly".parse::<ReleaseChannel>().is_err());
    }
}
