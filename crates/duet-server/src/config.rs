//! Server configuration from the environment.

use std::env;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port (`PORT`, default 8080).
    pub port: u16,
    /// Room-ID MAC secret (`ROOM_ID_SECRET`). When unset the server still
    /// starts, but room minting and joins fail closed per request.
    pub room_id_secret: Option<String>,
    /// Deployment tag bound into room-ID MACs (`ROOM_ID_ENV`, default `dev`).
    pub room_id_env: String,
    /// TURN relay hostname (`TURN_HOST`).
    pub turn_host: Option<String>,
    /// TURN shared secret (`TURN_SECRET`).
    pub turn_secret: Option<String>,
    /// Comma-separated origin allow-list (`ALLOWED_ORIGINS`).
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT is not a valid port number: {raw}"))?,
            Err(_) => 8080,
        };

        Ok(Self {
            port,
            room_id_secret: non_empty(env::var("ROOM_ID_SECRET").ok()),
            room_id_env: non_empty(env::var("ROOM_ID_ENV").ok()).unwrap_or_else(|| "dev".into()),
            turn_host: non_empty(env::var("TURN_HOST").ok()),
            turn_secret: non_empty(env::var("TURN_SECRET").ok()),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|raw| parse_origins(&raw))
                .unwrap_or_default(),
        })
    }

    /// TURN is usable only when both host and secret are present.
    pub fn turn_configured(&self) -> bool {
        self.turn_host.is_some() && self.turn_secret.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_origins_trims_and_skips_empty() {
        let origins = parse_origins("https://a.example, https://b.example ,, ");
        assert_eq!(origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn non_empty_filters_blank() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" x ".into())), Some("x".into()));
        assert_eq!(non_empty(None), None);
    }
}
