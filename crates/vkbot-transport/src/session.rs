//! Long-poll session negotiation.
//!
//! | Variant | Method | Special errors |
//! |---------|--------|----------------|
//! | [`GroupSession`] | `groups.getLongPollServer` | 100: long-poll disabled, repaired once in force mode |
//! | [`UserSession`] | `messages.getLongPollServer` (`lp_version=3`) | 15: no access to the messages API |
//!
//! On both variants error 5 (token rejected) and 15 (access denied) are
//! [`SessionError::Auth`], which ends the ingestion loop.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use vkbot_core::{ApiError, Cursor, Position, SessionError, SessionNegotiator, SessionResult};

use crate::api::{ApiCaller, ERROR_ACCESS_DENIED, ERROR_AUTH_FAILED, ERROR_INVALID_PARAMETER};

/// Long-poll API version requested when long-poll is enabled remotely.
pub const REPAIR_API_VERSION: &str = "5.103";

/// Reads `{key, server, ts}` into a cursor.
///
/// With `https_prefix` the server (returned without a scheme for user
/// sessions) is prefixed with `https://`.
pub fn parse_session(response: &Value, https_prefix: bool) -> SessionResult<Cursor> {
    let field = |name: &str| {
        response.get(name).ok_or_else(|| {
            SessionError::Api(ApiError::Decode(format!(
                "long-poll server response has no '{name}'"
            )))
        })
    };
    let key = field("key")?.as_str().unwrap_or_default();
    let server = field("server")?.as_str().unwrap_or_default().replace(r"\/", "/");
    let position = Position::from_value(field("ts")?).ok_or_else(|| {
        SessionError::Api(ApiError::Decode("long-poll server returned an empty ts".into()))
    })?;

    let server = if https_prefix {
        format!("https://{server}")
    } else {
        server
    };
    Ok(Cursor::new(position, key, &server))
}

/// Maps a failed negotiation call to a session error.
///
/// `denied` explains error 15 for the calling variant.
fn classify(error: ApiError, denied: &str) -> SessionError {
    match error.code() {
        Some(ERROR_AUTH_FAILED) => SessionError::Auth(format!(
            "Access token was rejected, it is invalid or revoked ({error})"
        )),
        Some(ERROR_ACCESS_DENIED) => SessionError::Auth(denied.to_string()),
        _ => SessionError::Api(error),
    }
}

// =============================================================================
// GroupSession
// =============================================================================

const GROUP_ACCESS_DENIED: &str =
    "Token has no access to the group long-poll API. Check that it is a community token with manage rights";

/// Negotiates community long-poll sessions.
pub struct GroupSession {
    api: Arc<dyn ApiCaller>,
    group_id: i64,
    force: bool,
    repair_events: Vec<String>,
}

impl GroupSession {
    /// Creates a negotiator for `group_id`.
    pub fn new(api: Arc<dyn ApiCaller>, group_id: i64) -> Self {
        Self {
            api,
            group_id,
            force: false,
            repair_events: Vec::new(),
        }
    }

    /// Enables force mode: when long-poll is disabled, switch it on with
    /// every event in `events` enabled.
    pub fn force<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force = true;
        self.repair_events = events.into_iter().map(Into::into).collect();
        self
    }

    async fn request(&self) -> SessionResult<Cursor> {
        let response = self
            .api
            .call(
                "groups.getLongPollServer",
                json!({ "group_id": self.group_id }),
            )
            .await
            .map_err(|e| classify(e, GROUP_ACCESS_DENIED))?;
        parse_session(&response, false)
    }

    async fn enable_longpoll(&self) -> SessionResult<()> {
        let mut params = Map::new();
        params.insert("group_id".into(), json!(self.group_id));
        params.insert("enabled".into(), json!(1));
        params.insert("api_version".into(), json!(REPAIR_API_VERSION));
        for event in &self.repair_events {
            params.insert(event.clone(), json!(1));
        }
        self.api
            .call("groups.setLongPollSettings", Value::Object(params))
            .await
            .map_err(|e| classify(e, GROUP_ACCESS_DENIED))?;
        Ok(())
    }
}

fn is_longpoll_disabled(result: &SessionResult<Cursor>) -> bool {
    matches!(result, Err(SessionError::Api(e)) if e.code() == Some(ERROR_INVALID_PARAMETER))
}

#[async_trait]
impl SessionNegotiator for GroupSession {
    async fn negotiate(&self) -> SessionResult<Cursor> {
        let first = self.request().await;
        if !is_longpoll_disabled(&first) {
            debug!(group_id = self.group_id, ok = first.is_ok(), "Group long-poll negotiated");
            return first;
        }
        if !self.force {
            return Err(SessionError::Configuration(
                "Longpoll is disabled for this group. Enable longpoll or try force mode".into(),
            ));
        }

        warn!(group_id = self.group_id, "Long-poll is disabled, enabling it");
        self.enable_longpoll().await?;
        info!(group_id = self.group_id, "Long-poll enabled");

        let second = self.request().await;
        if is_longpoll_disabled(&second) {
            return Err(SessionError::Configuration(
                "Longpoll is still disabled after enabling it".into(),
            ));
        }
        second
    }
}

impl fmt::Debug for GroupSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSession")
            .field("group_id", &self.group_id)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// UserSession
// =============================================================================

/// Negotiates user-account long-poll sessions.
pub struct UserSession {
    api: Arc<dyn ApiCaller>,
}

impl UserSession {
    /// Long-poll protocol version requested.
    pub const LP_VERSION: u32 = 3;

    /// Creates a negotiator.
    pub fn new(api: Arc<dyn ApiCaller>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SessionNegotiator for UserSession {
    async fn negotiate(&self) -> SessionResult<Cursor> {
        let response = self
            .api
            .call(
                "messages.getLongPollServer",
                json!({ "lp_version": Self::LP_VERSION }),
            )
            .await
            .map_err(|e| {
                classify(
                    e,
                    "User has no access to messages API. Try generating a token with messages scope",
                )
            })?;
        let cursor = parse_session(&response, true)?;
        debug!(server = %cursor.server(), "User long-poll negotiated");
        Ok(cursor)
    }
}

impl fmt::Debug for UserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSession").finish_non_exhaustive()
    }
}
