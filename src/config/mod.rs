//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::engine::{ActionGating, GameConfig};
use crate::ws::protocol::{League, PlayMode};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Base URL of the data API
    pub api_url: String,
    /// Key sent as `x-api-key` on server-to-API calls
    pub api_key: String,
    /// Per-request timeout for the data API
    pub api_timeout: Duration,

    /// HS256 secret for client tokens
    pub jwt_secret: String,
    /// Key the lobby presents when creating matches
    pub internal_api_key: String,
    /// Allowed client origins for CORS, comma separated
    pub client_origin: String,

    /// Which mechanism decides when a unit may act
    pub gating: ActionGating,
    /// Global cooldown scaling
    pub cooldown_coefficient: f64,
    /// Send `rejected` events instead of dropping invalid actions silently
    pub explicit_rejections: bool,
    /// Team score cap
    pub max_audience_score: u32,
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3123".to_string())
        };

        let gating = match env::var("GATING_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => ActionGating::Cooldown,
        };

        let cooldown_coefficient: f64 = parse_or("COOLDOWN_COEFFICIENT", 1.0)?;
        if !cooldown_coefficient.is_finite() || cooldown_coefficient <= 0.0 {
            return Err(ConfigError::Invalid("COOLDOWN_COEFFICIENT"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            api_url: required("API_URL")?.trim_end_matches('/').to_string(),
            api_key: required("API_KEY")?,
            api_timeout: Duration::from_secs(parse_or("API_TIMEOUT_SECS", 15)?),

            jwt_secret: required("JWT_SECRET")?,
            internal_api_key: required("INTERNAL_API_KEY")?,
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),

            gating,
            cooldown_coefficient,
            explicit_rejections: parse_or("EXPLICIT_REJECTIONS", false)?,
            max_audience_score: parse_or("MAX_AUDIENCE_SCORE", 2000)?,
        })
    }

    /// Rules for one match of the given mode and league
    pub fn game_config(&self, mode: PlayMode, league: League) -> GameConfig {
        GameConfig {
            mode,
            league,
            gating: self.gating,
            cooldown_coefficient: self.cooldown_coefficient,
            explicit_rejections: self.explicit_rejections,
            max_score: self.max_audience_score,
            ..GameConfig::default()
        }
    }
}

impl FromStr for ActionGating {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cooldown" => Ok(ActionGating::Cooldown),
            "turns" | "turn_queue" => Ok(ActionGating::TurnQueue),
            _ => Err(ConfigError::Invalid("GATING_MODE")),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
