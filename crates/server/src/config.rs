use std::net::SocketAddr;

use anyhow::Context;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How the current voter is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    /// Verify Supabase-issued bearer JWTs against this JWKS endpoint.
    Supabase { jwks_url: String },
    /// Trust the `X-Voter-Id` header. Local development and tests only.
    Header,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub auth: AuthConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bind_addr: SocketAddr = non_empty("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be a socket address like 0.0.0.0:3000")?;

        let max_connections: u32 = match non_empty("DB_MAX_CONNECTIONS") {
            Some(value) => value
                .parse::<u32>()
                .context("DB_MAX_CONNECTIONS must be a positive integer")?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be a positive integer");
        }

        let auth = match non_empty("SUPABASE_JWKS_URL") {
            Some(jwks_url) => AuthConfig::Supabase { jwks_url },
            None => AuthConfig::Header,
        };

        Ok(Config {
            bind_addr,
            database_url: non_empty("DATABASE_URL"),
            max_connections,
            auth,
        })
    }

    /// In-memory store, header auth, ephemeral port.
    pub fn local() -> Self {
        Config {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auth: AuthConfig::Header,
        }
    }
}
