//! Users and communities ("pages").

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};

/// A VK user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: i64,
    /// First name.
    #[serde(default)]
    pub first_name: String,
    /// Last name.
    #[serde(default)]
    pub last_name: String,
    /// Set when the profile is deleted or banned.
    #[serde(default)]
    pub deactivated: Option<String>,
}

impl User {
    /// "First Last".
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A VK community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Community id (positive).
    pub id: i64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Short address.
    #[serde(default)]
    pub screen_name: String,
}

/// Either kind of page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Page {
    /// A user.
    User(User),
    /// A community.
    Group(Group),
}

impl Page {
    /// Page id in owner form: users positive, communities negative.
    pub fn owner_id(&self) -> i64 {
        match self {
            Self::User(user) => user.id,
            Self::Group(group) => -group.id,
        }
    }

    /// Returns `true` for communities.
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    /// Reads the first profile of a `users.get` response.
    pub fn from_users_response(response: &Value) -> ModelResult<Option<Self>> {
        first_of(response, "users.get", |value| {
            User::deserialize(value).map(Self::User)
        })
    }

    /// Reads the first community of a `groups.getById` response.
    ///
    /// Accepts both the legacy array form and `{"groups": [...]}`.
    pub fn from_groups_response(response: &Value) -> ModelResult<Option<Self>> {
        let list = response.get("groups").unwrap_or(response);
        first_of(list, "groups.getById", |value| {
            Group::deserialize(value).map(Self::Group)
        })
    }
}

fn first_of<F>(list: &Value, what: &'static str, decode: F) -> ModelResult<Option<Page>>
where
    F: FnOnce(&Value) -> Result<Page, serde_json::Error>,
{
    let items = list
        .as_array()
        .ok_or_else(|| ModelError::malformed(what, "response is not a list"))?;
    items
        .first()
        .map(|value| decode(value).map_err(|e| ModelError::decode(what, e)))
        .transpose()
}

/// A group event that concerns a page, such as `group_join` or
/// `message_allow`. Carries the looked-up page and the event object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageEvent {
    /// The page the event is about.
    pub page: Page,
    /// The event object as sent by VK (`join_type`, `reason`, ...).
    pub details: Value,
}

/// `message_typing_state` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingState {
    /// Typing state, usually `typing`.
    pub state: String,
    /// Who is typing.
    pub from_id: i64,
    /// Whom they are typing to.
    pub to_id: i64,
}

impl TypingState {
    /// Decodes the event object.
    pub fn from_value(value: &Value) -> ModelResult<Self> {
        Self::deserialize(value).map_err(|e| ModelError::decode("typing state", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_users_response() {
        let page = Page::from_users_response(&json!([
            {"id": 1, "first_name": "Pavel", "last_name": "Durov"}
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(page.owner_id(), 1);
        assert!(!page.is_group());

        assert_eq!(Page::from_users_response(&json!([])).unwrap(), None);
    }

    #[test]
    fn test_groups_response_forms() {
        let legacy = Page::from_groups_response(&json!([{"id": 5, "name": "Bot"}]))
            .unwrap()
            .unwrap();
        let current = Page::from_groups_response(&json!({"groups": [{"id": 5, "name": "Bot"}]}))
            .unwrap()
            .unwrap();
        assert_eq!(legacy, current);
        assert_eq!(legacy.owner_id(), -5);
    }

    #[test]
    fn test_typing_state() {
        let state = TypingState::from_value(&json!({"state": "typing", "from_id": 1, "to_id": -5}))
            .unwrap();
        assert_eq!(state.to_id, -5);
        assert!(TypingState::from_value(&json!({"state": "typing"})).is_err());
    }
}
