//! Token endpoint

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::Serialize;
use tokenserver_core::Verdict;

use crate::assignment::{Assignment, NodeAssignment};
use crate::error::{TokenServerError, AUTH_SCHEME};
use crate::runner::VerificationRunner;
use crate::state::AppState;

/// Older clients spell the scheme with a hyphen
const LEGACY_AUTH_SCHEME: &str = "Browser-ID";

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    /// The signed bearer token
    pub id: String,
    pub uid: u64,
    pub api_endpoint: String,
    /// Token lifetime in seconds
    pub duration: u64,
}

/// Extract the assertion from `Authorization: BrowserID <assertion>`
pub fn parse_authorization(headers: &HeaderMap) -> Result<&str, TokenServerError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(TokenServerError::MissingCredentials)?
        .to_str()
        .map_err(|_| TokenServerError::MissingCredentials)?;

    let (scheme, assertion) = value
        .trim()
        .split_once(char::is_whitespace)
        .ok_or(TokenServerError::MissingCredentials)?;

    if !scheme.eq_ignore_ascii_case(AUTH_SCHEME) && !scheme.eq_ignore_ascii_case(LEGACY_AUTH_SCHEME)
    {
        tracing::debug!(scheme, "Unsupported authorization scheme");
        return Err(TokenServerError::MissingCredentials);
    }
    Ok(assertion.trim())
}

/// GET /1.0/:app/:version
///
/// Verify the caller's assertion, look up (or allocate) its storage node and
/// hand back a token scoped to that node.
pub async fn get_token<R, B>(
    State(state): State<Arc<AppState<R, B>>>,
    Path((app, version)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, TokenServerError>
where
    R: VerificationRunner,
    B: NodeAssignment + 'static,
{
    if !state.serves(&app, &version) {
        return Err(TokenServerError::UnknownService(format!("{}/{}", app, version)));
    }

    let assertion = parse_authorization(&headers)?;
    let principal = match state.verifier.verify(assertion).await {
        Verdict::Verified { principal, .. } => principal,
        Verdict::Rejected { reason } => return Err(TokenServerError::Unauthorized(reason)),
    };

    let assignment = assign(&state, &principal).await?;
    let token = state.issuer.issue(
        &principal,
        assignment.node_id,
        &assignment.node_url,
        assignment.identity_id,
        state.clock.now_millis(),
    )?;

    let uid = assignment.identity_id.0;
    Ok(Json(TokenResponse {
        id: token.encoded,
        uid,
        api_endpoint: format!("{}/1.0/{}", assignment.node_url.trim_end_matches('/'), uid),
        duration: state.issuer.ttl().as_secs(),
    }))
}

/// Run the blocking backend call off the async workers, bounded by the
/// configured backend timeout.
async fn assign<R, B>(state: &AppState<R, B>, principal: &str) -> Result<Assignment, TokenServerError>
where
    R: VerificationRunner,
    B: NodeAssignment + 'static,
{
    let backend = Arc::clone(&state.backend);
    let owned = principal.to_string();
    let call = tokio::task::spawn_blocking(move || backend.assign(&owned));

    match tokio::time::timeout(state.backend_timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(TokenServerError::Internal(join_error.to_string())),
        Err(_) => {
            tracing::warn!(principal, timeout = ?state.backend_timeout, "Assignment backend timed out");
            Err(TokenServerError::BackendTimeout)
        }
    }
}
