// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Request authentication.
//!
//! Two credential families: Langfuse-style Basic auth (`public:secret`) on
//! the `/api/public` routes and `X-API-Key` on the `/api/v1` routes. Both
//! resolve to the project the request acts on.

use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AuthConfig, ProjectKeys};

/// Authentication context attached to each authenticated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub project_id: String,
    /// Credential-bound: the request may not act on other projects
    pub restricted: bool,
}

impl AuthContext {
    pub fn credential(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            restricted: true,
        }
    }

    /// Project a request acts on.
    ///
    /// Unrestricted contexts may name any project; restricted ones only
    /// their own, anything else yields `None`.
    pub fn resolve_project(&self, requested: Option<&str>) -> Option<String> {
        match requested.filter(|p| !p.is_empty()) {
            None => Some(self.project_id.clone()),
            Some(p) if !self.restricted || p == self.project_id => Some(p.to_string()),
            Some(_) => None,
        }
    }

    /// Whether a record owned by `project_id` is visible to this request
    pub fn can_access(&self, project_id: &str) -> bool {
        !self.restricted || self.project_id == project_id
    }
}

/// Authentication error
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Invalid authentication credentials")]
    InvalidCredentials,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Authenticator trait for pluggable auth strategies
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError>;
}

/// Basic auth over per-project public/secret key pairs
pub struct BasicKeyAuth {
    /// public key -> (secret key, project id)
    keys: HashMap<String, (String, String)>,
}

impl BasicKeyAuth {
    pub fn new(projects: &[ProjectKeys]) -> Self {
        let keys = projects
            .iter()
            .map(|p| {
                (
                    p.public_key.clone(),
                    (p.secret_key.clone(), p.project_id.clone()),
                )
            })
            .collect();
        Self { keys }
    }
}

impl Authenticator for BasicKeyAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let auth_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::MissingCredentials)?;

        let encoded = auth_header
            .strip_prefix("Basic ")
            .ok_or(AuthError::MissingCredentials)?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::InvalidCredentials)?;
        let credentials = String::from_utf8(decoded).map_err(|_| AuthError::InvalidCredentials)?;

        let (public_key, secret_key) = credentials
            .split_once(':')
            .filter(|(p, s)| !p.is_empty() && !s.is_empty())
            .ok_or(AuthError::InvalidCredentials)?;

        match self.keys.get(public_key) {
            Some((secret, project_id)) if secret == secret_key => {
                Ok(AuthContext::credential(project_id.clone()))
            }
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}

/// API Key authenticator
pub struct ApiKeyAuth {
    /// Map of API key -> project id
    keys: HashMap<String, String>,
}

impl ApiKeyAuth {
    pub fn new(api_keys: &[String]) -> Self {
        let keys = api_keys
            .iter()
            .filter_map(|entry| {
                // Format: "api_key:project_id"
                let (key, project) = entry.split_once(':')?;
                (!key.is_empty() && !project.is_empty())
                    .then(|| (key.to_string(), project.to_string()))
            })
            .collect();
        Self { keys }
    }
}

impl Authenticator for ApiKeyAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let api_key = headers
            .get("X-API-Key")
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::MissingCredentials)?;

        let project_id = self
            .keys
            .get(api_key)
            .ok_or(AuthError::InvalidCredentials)?;

        Ok(AuthContext::credential(project_id.clone()))
    }
}

/// No-op authenticator for development (no auth required)
pub struct NoAuth {
    default_project: String,
}

impl NoAuth {
    pub fn new(default_project: impl Into<String>) -> Self {
        Self {
            default_project: default_project.into(),
        }
    }
}

impl Authenticator for NoAuth {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        Ok(AuthContext {
            project_id: self.default_project.clone(),
            restricted: false,
        })
    }
}

/// Authenticators for the two route families
#[derive(Clone)]
pub struct Authenticators {
    pub public_api: Arc<dyn Authenticator>,
    pub api_key: Arc<dyn Authenticator>,
}

impl Authenticators {
    pub fn from_config(config: &AuthConfig) -> Self {
        if !config.enabled {
            let no_auth: Arc<dyn Authenticator> = Arc::new(NoAuth::new(&config.default_project));
            return Self {
                public_api: no_auth.clone(),
                api_key: no_auth,
            };
        }

        tracing::info!(
            "Authentication enabled ({} project key pairs, {} API keys)",
            config.projects.len(),
            config.api_keys.len()
        );
        Self {
            public_api: Arc::new(BasicKeyAuth::new(&config.projects)),
            api_key: Arc::new(ApiKeyAuth::new(&config.api_keys)),
        }
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    auth: Extension<Arc<dyn Authenticator>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let ctx = auth.authenticate(req.headers())?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}
