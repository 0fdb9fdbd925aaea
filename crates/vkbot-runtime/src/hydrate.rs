//! Raw update → typed event.
//!
//! # Group routing
//!
//! | Update | Event | Argument | Mode |
//! |--------|-------|----------|------|
//! | `message_new` | `conversation_start`, the action type, or `message_new` | [`Message`] | ready, always |
//! | `message_reply`, `message_edit` | same | [`Message`] | ready |
//! | `message_typing_state` | same | [`TypingState`] | ready |
//! | `message_allow`, `message_deny`, `group_join`, `group_leave`, `user_block`, `user_unblock` | same | [`PageEvent`] | detached (page lookup) |
//! | other known events | same | [`GroupUpdate`] | ready |
//! | unknown events | `unknown` | [`RawUpdate`] | ready |
//!
//! Everything except `message_new` is only decoded when a handler or waiter
//! observes the resulting event.
//!
//! # User routing
//!
//! Code `4` becomes `message_new` with a [`UserMessage`], decoded in order
//! with the rest of the batch; attachments announced by the update are
//! fetched with `messages.getById`. Other codes become `unknown`.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use serde_json::{Value, json};
use tracing::{debug, trace};

use vkbot_core::{Dispatcher, Emission, EventArgs, Hydrated, Hydrator, RawUpdate};
use vkbot_model::{
    Attachment, DEFAULT_MAX_NESTING_DEPTH, GroupUpdate, Message, NEW_MESSAGE_CODE, Page,
    PageEvent, TypingState, UserMessage, is_implemented,
};
use vkbot_transport::ApiCaller;

/// Event name for updates no decoder knows.
pub const UNKNOWN_EVENT: &str = "unknown";

const PAGE_EVENTS: &[&str] = &[
    "message_allow",
    "message_deny",
    "group_join",
    "group_leave",
    "user_block",
    "user_unblock",
];

/// Looks up a user (positive id) or community (negative id).
pub async fn fetch_page(api: &dyn ApiCaller, id: i64) -> anyhow::Result<Page> {
    let page = if id > 0 {
        let response = api.call("users.get", json!({ "user_ids": id })).await?;
        Page::from_users_response(&response)?
    } else {
        let response = api
            .call("groups.getById", json!({ "group_id": -id }))
            .await?;
        Page::from_groups_response(&response)?
    };
    page.ok_or_else(|| anyhow!("page {id} not found"))
}

fn unknown(update: RawUpdate, dispatcher: &Dispatcher) -> Hydrated {
    if dispatcher.is_observed(UNKNOWN_EVENT) {
        Hydrated::ready(UNKNOWN_EVENT, EventArgs::one(update))
    } else {
        Hydrated::Ignored
    }
}

// =============================================================================
// GroupHydrator
// =============================================================================

/// Decodes community long-poll updates.
pub struct GroupHydrator {
    api: Arc<dyn ApiCaller>,
    max_depth: usize,
}

impl GroupHydrator {
    /// Creates a hydrator doing page lookups through `api`.
    pub fn new(api: Arc<dyn ApiCaller>) -> Self {
        Self {
            api,
            max_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }

    /// Sets the depth at which nested messages are cut.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    fn message(&self, event: String, object: &Value) -> anyhow::Result<Hydrated> {
        let message = Message::from_value(object, self.max_depth)?;
        Ok(Hydrated::ready(event, EventArgs::one(message)))
    }

    fn page_event(&self, event: String, object: Value) -> anyhow::Result<Hydrated> {
        let user_id = object
            .get("user_id")
            .and_then(Value::as_i64)
            .with_context(|| format!("{event} update has no user_id"))?;
        let api = Arc::clone(&self.api);
        Ok(Hydrated::detached(async move {
            let page = fetch_page(api.as_ref(), user_id)
                .await
                .with_context(|| format!("looking up page {user_id} for {event}"))?;
            let args = EventArgs::one(PageEvent {
                page,
                details: object,
            });
            Ok(Emission::new(event, args))
        }))
    }
}

impl Hydrator for GroupHydrator {
    fn hydrate(&self, update: RawUpdate, dispatcher: &Dispatcher) -> anyhow::Result<Hydrated> {
        if update.event_type == "message_new" {
            // API 5.103+ wraps the message as `object.message`.
            let object = update.payload.get("message").unwrap_or(&update.payload);
            let message = Message::from_value(object, self.max_depth)?;
            let event = message.event_name().to_string();
            return Ok(Hydrated::ready(event, EventArgs::one(message)));
        }

        if !is_implemented(&update.event_type) {
            return Ok(unknown(update, dispatcher));
        }
        if !dispatcher.is_observed(&update.event_type) {
            trace!(event = %update.event_type, "Skipping unobserved update");
            return Ok(Hydrated::Ignored);
        }

        let RawUpdate {
            event_type: event,
            payload: object,
        } = update;
        if matches!(event.as_str(), "message_reply" | "message_edit") {
            return self.message(event, &object);
        }
        if event == "message_typing_state" {
            let state = TypingState::from_value(&object)?;
            return Ok(Hydrated::ready(event, EventArgs::one(state)));
        }
        if PAGE_EVENTS.contains(&event.as_str()) {
            return self.page_event(event, object);
        }
        let update = GroupUpdate::new(event.clone(), object);
        Ok(Hydrated::ready(event, EventArgs::one(update)))
    }
}

impl fmt::Debug for GroupHydrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHydrator")
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// UserHydrator
// =============================================================================

/// Decodes user long-poll updates.
pub struct UserHydrator {
    api: Arc<dyn ApiCaller>,
}

impl UserHydrator {
    /// Creates a hydrator fetching attachments through `api`.
    pub fn new(api: Arc<dyn ApiCaller>) -> Self {
        Self { api }
    }
}

async fn resolve_attachments(api: &dyn ApiCaller, message_id: i64) -> anyhow::Result<Vec<Attachment>> {
    let response = api
        .call("messages.getById", json!({ "message_ids": message_id }))
        .await?;
    let Some(attachments) = response
        .pointer("/items/0/attachments")
        .and_then(Value::as_array)
    else {
        return Ok(Vec::new());
    };
    attachments
        .iter()
        .map(|value| Attachment::from_value(value).map_err(Into::into))
        .collect()
}

impl Hydrator for UserHydrator {
    fn hydrate(&self, update: RawUpdate, dispatcher: &Dispatcher) -> anyhow::Result<Hydrated> {
        let is_new_message = update
            .payload
            .get(0)
            .and_then(Value::as_i64)
            .is_some_and(|code| code == NEW_MESSAGE_CODE);
        if !is_new_message {
            return Ok(unknown(update, dispatcher));
        }

        let mut message = UserMessage::from_update(&update.payload)?;
        if !message.has_attachments() {
            return Ok(Hydrated::ready("message_new", EventArgs::one(message)));
        }

        let api = Arc::clone(&self.api);
        Ok(Hydrated::ordered(async move {
            match resolve_attachments(api.as_ref(), message.id).await {
                Ok(attachments) => message.resolved_attachments = attachments,
                Err(e) => debug!(
                    message_id = message.id,
                    error = %e,
                    "Could not fetch attachments, delivering raw ones"
                ),
            }
            Ok(Emission::new("message_new", EventArgs::one(message)))
        }))
    }
}

impl fmt::Debug for UserHydrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserHydrator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::runtime::Handle;
    use vkbot_core::{ApiError, ApiResult, TaskSupervisor};
    use vkbot_model::START_PAYLOAD;

    /// Answers `users.get` / `groups.getById` / `messages.getById` from fixed data.
    #[derive(Default)]
    struct FakeApi {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ApiCaller for FakeApi {
        async fn call(&self, method: &str, params: Value) -> ApiResult<Value> {
            self.calls.lock().push(method.to_string());
            match method {
                "users.get" => Ok(json!([
                    {"id": params["user_ids"], "first_name": "Ivan", "last_name": "Petrov"}
                ])),
                "groups.getById" => Ok(json!({"groups": [{"id": params["group_id"], "name": "Club"}]})),
                "messages.getById" => Ok(json!({"items": [{"attachments": [
                    {"type": "photo", "photo": {"owner_id": 1, "id": 2}}
                ]}]})),
                _ => Err(ApiError::Vk {
                    code: 3,
                    message: "Unknown method passed".into(),
                }),
            }
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(TaskSupervisor::new(Handle::current()))
    }

    fn group() -> (GroupHydrator, Arc<FakeApi>) {
        let api = Arc::new(FakeApi::default());
        (GroupHydrator::new(api.clone()).max_depth(4), api)
    }

    fn ready(hydrated: Hydrated) -> Emission {
        match hydrated {
            Hydrated::Ready(emission) => emission,
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_message_new_is_always_hydrated() {
        let (hydrator, _) = group();
        let update = RawUpdate::new(
            "message_new",
            json!({"message": {"id": 1, "peer_id": 2, "from_id": 3, "text": "hello"}}),
        );
        let emission = ready(hydrator.hydrate(update, &dispatcher()).unwrap());
        assert_eq!(emission.event, "message_new");
        assert_eq!(emission.args.first::<Message>().unwrap().text, "hello");
    }

    #[tokio::test]
    async fn test_start_payload_and_actions_rename_the_event() {
        let (hydrator, _) = group();
        let d = dispatcher();

        let start = RawUpdate::new(
            "message_new",
            json!({"message": {"id": 1, "peer_id": 2, "payload": START_PAYLOAD}}),
        );
        assert_eq!(ready(hydrator.hydrate(start, &d).unwrap()).event, "conversation_start");

        let invite = RawUpdate::new(
            "message_new",
            json!({"message": {"id": 2, "peer_id": 2000000001,
                "action": {"type": "chat_invite_user", "member_id": 5}}}),
        );
        assert_eq!(ready(hydrator.hydrate(invite, &d).unwrap()).event, "chat_invite_user");
    }

    #[tokio::test]
    async fn test_unobserved_events_are_ignored() {
        let (hydrator, api) = group();
        let d = dispatcher();
        for event in ["message_edit", "group_join", "wall_post_new", "donut_money_withdraw"] {
            let update = RawUpdate::new(event, json!({"user_id": 1}));
            assert!(matches!(hydrator.hydrate(update, &d).unwrap(), Hydrated::Ignored));
        }
        assert!(api.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_observed_group_update() {
        let (hydrator, _) = group();
        let d = dispatcher();
        d.on("wall_post_new", |_args: EventArgs| async { anyhow::Ok(()) });

        let update = RawUpdate::new("wall_post_new", json!({"id": 7, "owner_id": -1}));
        let emission = ready(hydrator.hydrate(update, &d).unwrap());
        let post = emission.args.first::<GroupUpdate>().unwrap();
        assert_eq!(post.i64_field("id"), Some(7));
    }

    #[tokio::test]
    async fn test_typing_state() {
        let (hydrator, _) = group();
        let d = dispatcher();
        let _wait = d.wait_for("message_typing_state").register();

        let update = RawUpdate::new(
            "message_typing_state",
            json!({"state": "typing", "from_id": 1, "to_id": -5}),
        );
        let emission = ready(hydrator.hydrate(update, &d).unwrap());
        assert_eq!(emission.args.first::<TypingState>().unwrap().from_id, 1);
    }

    #[tokio::test]
    async fn test_page_events_look_up_the_page() {
        let (hydrator, api) = group();
        let d = dispatcher();
        d.on("group_join", |_args: EventArgs| async { anyhow::Ok(()) });

        let update = RawUpdate::new("group_join", json!({"user_id": 42, "join_type": "join"}));
        let Hydrated::Detached(future) = hydrator.hydrate(update, &d).unwrap() else {
            panic!("expected a detached lookup");
        };
        assert!(api.calls.lock().is_empty());

        let emission = future.await.unwrap();
        assert_eq!(emission.event, "group_join");
        let event = emission.args.first::<PageEvent>().unwrap();
        assert_eq!(event.page.owner_id(), 42);
        assert_eq!(event.details["join_type"], "join");
        assert_eq!(*api.calls.lock(), vec!["users.get"]);
    }

    #[tokio::test]
    async fn test_page_event_without_user_id_fails() {
        let (hydrator, _) = group();
        let d = dispatcher();
        d.on("user_block", |_args: EventArgs| async { anyhow::Ok(()) });
        let update = RawUpdate::new("user_block", json!({"admin_id": 1}));
        assert!(hydrator.hydrate(update, &d).is_err());
    }

    #[tokio::test]
    async fn test_unknown_group_event() {
        let (hydrator, _) = group();
        let d = dispatcher();
        let _wait = d.wait_for(UNKNOWN_EVENT).register();

        let update = RawUpdate::new("donut_subscription_create", json!({"user_id": 1}));
        let emission = ready(hydrator.hydrate(update, &d).unwrap());
        assert_eq!(emission.event, UNKNOWN_EVENT);
        assert_eq!(
            emission.args.first::<RawUpdate>().unwrap().event_type,
            "donut_subscription_create"
        );
    }

    #[tokio::test]
    async fn test_fetch_group_page() {
        let api = FakeApi::default();
        let page = fetch_page(&api, -17).await.unwrap();
        assert!(page.is_group());
        assert_eq!(page.owner_id(), -17);
    }

    #[tokio::test]
    async fn test_user_message_without_attachments_is_ready() {
        let api = Arc::new(FakeApi::default());
        let hydrator = UserHydrator::new(api.clone());
        let update = RawUpdate::from_user(&json!([4, 10, 1, 42, 1700000000, "hello", {}, {}]))
            .unwrap();
        let emission = ready(hydrator.hydrate(update, &dispatcher()).unwrap());
        assert_eq!(emission.event, "message_new");
        assert_eq!(emission.args.first::<UserMessage>().unwrap().text, "hello");
        assert!(api.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_user_message_attachments_are_fetched_in_order() {
        let api = Arc::new(FakeApi::default());
        let hydrator = UserHydrator::new(api.clone());
        let update = RawUpdate::from_user(&json!([
            4, 11, 1, 42, 1700000000, "look", {}, {"attach1_type": "photo", "attach1": "1_2"}
        ]))
        .unwrap();
        let Hydrated::Ordered(future) = hydrator.hydrate(update, &dispatcher()).unwrap() else {
            panic!("expected an ordered hydration");
        };
        let emission = future.await.unwrap();
        let message = emission.args.first::<UserMessage>().unwrap();
        assert_eq!(message.resolved_attachments.len(), 1);
        assert_eq!(message.resolved_attachments[0].reference().as_deref(), Some("photo1_2"));
    }

    #[tokio::test]
    async fn test_other_user_codes_are_unknown() {
        let hydrator = UserHydrator::new(Arc::new(FakeApi::default()));
        let d = dispatcher();
        let update = RawUpdate::from_user(&json!([8, -42, 1])).unwrap();
        assert!(matches!(hydrator.hydrate(update.clone(), &d).unwrap(), Hydrated::Ignored));

        d.on(UNKNOWN_EVENT, |_args: EventArgs| async { anyhow::Ok(()) });
        assert_eq!(ready(hydrator.hydrate(update, &d).unwrap()).event, UNKNOWN_EVENT);
    }
}
