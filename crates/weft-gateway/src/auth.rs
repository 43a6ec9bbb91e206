use weft_core::config::{ApiKeyRole, GatewayConfig};

/// Caller identity after a successful bearer check.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub name: String,
    pub role: ApiKeyRole,
}

/// Bearer token -> api_keys -> shared token -> anonymous.
///
/// Anonymous access is granted only when neither a token nor api_keys are
/// configured. Returns `None` on auth failure.
pub fn validate_auth(config: &GatewayConfig, bearer: Option<&str>) -> Option<AuthResult> {
    if let Some(bearer_val) = bearer {
        if let Some(ak) = config.api_keys.iter().find(|ak| ak.key == bearer_val) {
            return Some(AuthResult {
                name: ak.name.clone(),
                role: ak.role.clone(),
            });
        }
        if config.token.as_deref() == Some(bearer_val) {
            return Some(AuthResult {
                name: "token".into(),
                role: ApiKeyRole::Admin,
            });
        }
        return None;
    }

    if config.token.is_none() && config.api_keys.is_empty() {
        Some(AuthResult {
            name: "anonymous".into(),
            role: ApiKeyRole::Admin,
        })
    } else {
        None
    }
}

/// Extract the token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim)
}

/// Read workflows and executions.
pub fn has_viewer_access(role: &ApiKeyRole) -> bool {
    matches!(role, ApiKeyRole::Viewer | ApiKeyRole::Operator | ApiKeyRole::Admin)
}

/// Start, resume and cancel runs; deliver callbacks.
pub fn has_operator_access(role: &ApiKeyRole) -> bool {
    matches!(role, ApiKeyRole::Operator | ApiKeyRole::Admin)
}

/// Save and delete workflow definitions.
pub fn has_admin_access(role: &ApiKeyRole) -> bool {
    matches!(role, ApiKeyRole::Admin)
}
