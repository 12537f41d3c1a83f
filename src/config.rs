use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Origin a viewer may announce in its `hello`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigin {
    Any,
    Exact(String),
}

impl AllowedOrigin {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s == "*" {
            AllowedOrigin::Any
        } else {
            AllowedOrigin::Exact(s.trim_end_matches('/').to_string())
        }
    }

    pub fn permits(&self, origin: &str) -> bool {
        match self {
            AllowedOrigin::Any => true,
            AllowedOrigin::Exact(allowed) => allowed == origin.trim().trim_end_matches('/'),
        }
    }
}

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_file: PathBuf,
    pub allowed_origin: AllowedOrigin,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable numbers fall
    /// back to their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let port = get("TABLETIME_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let bind = get("TABLETIME_BIND").unwrap_or_else(|| "0.0.0.0".into());
        let data_file = get("TABLETIME_DATA_FILE").unwrap_or_else(|| "./db.json".into());
        let origin = get("TABLETIME_ALLOWED_ORIGIN")
            .or_else(|| get("FRONTEND_URL"))
            .unwrap_or_else(|| DEFAULT_ORIGIN.into());
        let max_connections = get("TABLETIME_MAX_CONNECTIONS")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(256);
        let metrics_port: Option<u16> = get("TABLETIME_METRICS_PORT").and_then(|s| s.parse().ok());

        Self {
            bind,
            port,
            data_file: PathBuf::from(data_file),
            allowed_origin: AllowedOrigin::parse(&origin),
            max_connections,
            metrics_port,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
