use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use supabase_jwt::{Claims, JwksCache};

use crate::config::AuthConfig;
use crate::error::AppError;
use crate::models::VoterId;
use crate::routes::AppState;

/// Development identity header, honoured only with [`Authenticator::Header`].
pub const VOTER_HEADER: &str = "X-Voter-Id";

const MAX_VOTER_ID_LEN: usize = 128;

#[derive(Clone)]
pub enum Authenticator {
    Supabase(Arc<JwksCache>),
    Header,
}

impl Authenticator {
    pub fn from_config(config: &AuthConfig) -> Self {
        match config {
            AuthConfig::Supabase { jwks_url } => {
                Authenticator::Supabase(Arc::new(JwksCache::new(jwks_url.as_str())))
            }
            AuthConfig::Header => Authenticator::Header,
        }
    }

    pub async fn voter_id(&self, headers: &HeaderMap) -> Result<VoterId, AppError> {
        match self {
            Authenticator::Supabase(jwks_cache) => verify_jwt(jwks_cache, headers).await,
            Authenticator::Header => voter_from_header(headers),
        }
    }
}

/// Resolves the current voter and registers it on first sight.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<VoterId, AppError> {
    let voter = state.auth.voter_id(headers).await?;
    state.store.ensure_voter(&voter).await?;
    Ok(voter)
}

async fn verify_jwt(jwks_cache: &Arc<JwksCache>, headers: &HeaderMap) -> Result<VoterId, AppError> {
    let auth_header = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::BadRequest("no auth".into()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::BadRequest("no bearer".into()))?;

    fn is_expired(exp: i64) -> bool {
        Utc::now().timestamp() > exp
    }

    match Claims::from_token(token, jwks_cache).await {
        Err(_) => {
            tracing::warn!("rejected bearer token");
            Err(AppError::Unauthorized)
        }
        Ok(claims) if is_expired(claims.exp as i64) => {
            tracing::warn!("rejected expired bearer token");
            Err(AppError::Unauthorized)
        }
        Ok(claims) => Ok(claims.sub),
    }
}

fn voter_from_header(headers: &HeaderMap) -> Result<VoterId, AppError> {
    let voter = headers
        .get(VOTER_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(AppError::Unauthorized)?;

    if voter.len() > MAX_VOTER_ID_LEN {
        return Err(AppError::BadRequest("voter id too long".into()));
    }
    Ok(voter.to_string())
}
