//! The client: configuration in, running ingestion loop out.
//!
//! ```text
//! ┌──────────────┐  identify   ┌────────────────┐  build   ┌───────────────┐
//! │ VkbotConfig  │────────────▶│ credential and │─────────▶│ IngestionLoop │
//! │ (figment)    │  users.get  │ owner checks   │          │ (until signal)│
//! └──────────────┘  groups.get └────────────────┘          └───────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use vkbot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = VkClient::builder().token("vk1.a....").build()?;
//!
//!     client.on("message_new", |args: EventArgs| async move {
//!         if let Some(message) = args.first::<Message>() {
//!             info!(text = %message.text, "New message");
//!         }
//!         anyhow::Ok(())
//!     });
//!
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vkbot_core::{Dispatcher, ErrorHook, Handler, TaskSupervisor, WaitFor};
use vkbot_model::{IMPLEMENTED_EVENTS, LongPollSettings, Page, SettingsWarning};
use vkbot_transport::{
    ApiCaller, GroupSession, HttpClient, HttpPollTransport, UpdateFormat, UserSession, VkApi,
};

use crate::config::{ClientVariant, ConfigLoader, VkbotConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::hydrate::{GroupHydrator, UserHydrator};
use crate::ingest::IngestionLoop;
use crate::logging;

// =============================================================================
// Startup checks
// =============================================================================

/// Finds the page owning the token: `users.get` without ids answers for a
/// user token and returns an empty list for a community token.
pub async fn identify(api: &dyn ApiCaller) -> RuntimeResult<Page> {
    let users = api.call("users.get", Value::Null).await?;
    if let Some(page) = Page::from_users_response(&users)? {
        return Ok(page);
    }
    let groups = api.call("groups.getById", Value::Null).await?;
    Page::from_groups_response(&groups)?.ok_or(RuntimeError::UnknownPage)
}

/// Checks the identified page against the configured variant and owner.
///
/// `owner_id = 0` means "no owner".
pub fn check_credentials(
    variant: ClientVariant,
    page: &Page,
    owner_id: Option<i64>,
) -> RuntimeResult<()> {
    if let Some(id) = owner_id
        && id < 0
    {
        return Err(RuntimeError::InvalidOwnerId(id));
    }
    match (variant, page) {
        (ClientVariant::Group, Page::User(_)) => Err(RuntimeError::WrongCredentials(
            "User token passed to group client".into(),
        )),
        (ClientVariant::User, Page::Group(_)) => Err(RuntimeError::WrongCredentials(
            "Group token passed to user client".into(),
        )),
        (ClientVariant::Group, Page::Group(_)) if owner_id.is_some_and(|id| id > 0) => {
            Err(RuntimeError::OwnerIdWithGroupToken)
        }
        _ => Ok(()),
    }
}

/// Fetches the community's long-poll settings and lists what is wrong
/// with them.
pub async fn settings_warnings(
    api: &dyn ApiCaller,
    group_id: i64,
) -> RuntimeResult<Vec<SettingsWarning>> {
    let response = api
        .call("groups.getLongPollSettings", json!({ "group_id": group_id }))
        .await?;
    Ok(LongPollSettings::from_value(&response)?.warnings())
}

// =============================================================================
// VkClient
// =============================================================================

/// A configured bot client.
///
/// Handlers and waits can be registered before and while [`VkClient::run`]
/// is in progress. A client runs once: shutting down cancels its
/// supervisor for good.
pub struct VkClient {
    config: VkbotConfig,
    api: Arc<dyn ApiCaller>,
    http: HttpClient,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl VkClient {
    /// Creates a builder loading configuration from files and environment.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client from validated configuration.
    ///
    /// Installs the logging subscriber unless one is already set. Must be
    /// called inside a Tokio runtime.
    pub fn from_config(config: VkbotConfig) -> RuntimeResult<Self> {
        validate_config(&config)?;
        logging::init_from_config(&config.logging);

        let http = HttpClient::new(&config.effective_http())?;
        let api: Arc<dyn ApiCaller> = Arc::new(VkApi::new(
            http.clone(),
            config.client.token.clone(),
            config.client.api_version.clone(),
        ));
        Ok(Self::with_api(config, http, api))
    }

    /// Creates a client calling methods through `api`.
    pub fn with_api(config: VkbotConfig, http: HttpClient, api: Arc<dyn ApiCaller>) -> Self {
        let supervisor = TaskSupervisor::new(Handle::current());
        Self {
            config,
            api,
            http,
            dispatcher: Dispatcher::new(supervisor),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replaces the handler failure hook. Starts a fresh dispatcher, so call
    /// it before binding handlers.
    pub fn with_error_hook(mut self, hook: impl ErrorHook) -> Self {
        let supervisor = self.dispatcher.supervisor().clone().with_error_hook(hook);
        self.dispatcher = Dispatcher::new(supervisor);
        self
    }

    /// The validated configuration the client was built from.
    pub fn config(&self) -> &VkbotConfig {
        &self.config
    }

    /// The method caller, for use inside handlers.
    pub fn api(&self) -> Arc<dyn ApiCaller> {
        self.api.clone()
    }

    /// The dispatcher events are routed through; clone it into handlers.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The configured owner, if any.
    pub fn owner_id(&self) -> Option<i64> {
        self.config.client.owner_id.filter(|id| *id > 0)
    }

    /// Binds `handler` to `event`, replacing any previous binding.
    pub fn on<H: Handler>(&self, event: &str, handler: H) -> &Self {
        if self.dispatcher.on(event, handler).is_some() {
            debug!(event, "Handler replaced");
        }
        self
    }

    /// Starts building a one-shot wait for the next `event`.
    pub fn wait_for(&self, event: &str) -> WaitFor {
        self.dispatcher.wait_for(event)
    }

    /// Token that stops [`VkClient::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        #[cfg(unix)]
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        self.run_until(async move {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
            }

            #[cfg(not(unix))]
            {
                let _ = signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down");
            }
        })
        .await
    }

    /// Runs until `shutdown` completes, the shutdown token is cancelled, or
    /// negotiation fails fatally.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let result = match self.start().await {
            Ok(mut ingest) => {
                tokio::select! {
                    result = ingest.run() => result.map_err(RuntimeError::from),
                    _ = shutdown => Ok(()),
                }
            }
            Err(e) => Err(e),
        };
        self.stop().await;
        result
    }

    /// Identifies the token and assembles the ingestion loop.
    async fn start(&self) -> RuntimeResult<IngestionLoop> {
        let client = &self.config.client;
        let page = identify(self.api.as_ref()).await?;
        check_credentials(client.variant, &page, client.owner_id)?;
        info!(variant = %client.variant, owner_id = page.owner_id(), "Token identified");

        let longpoll = &self.config.longpoll;
        let ingest = match page {
            Page::Group(group) => {
                let mut session = GroupSession::new(self.api.clone(), group.id);
                if client.force {
                    session = session.force(IMPLEMENTED_EVENTS.iter().copied());
                }
                let hydrator =
                    GroupHydrator::new(self.api.clone()).max_depth(longpoll.max_nesting_depth);
                let transport = HttpPollTransport::new(self.http.clone(), UpdateFormat::Group)
                    .with_wait(longpoll.wait());

                let api = self.api.clone();
                IngestionLoop::new(
                    Arc::new(transport),
                    Arc::new(session),
                    Arc::new(hydrator),
                    self.dispatcher.clone(),
                )
                .on_startup(move || async move {
                    match settings_warnings(api.as_ref(), group.id).await {
                        Ok(warnings) => {
                            for warning in warnings {
                                warn!(group_id = group.id, "{warning}");
                            }
                        }
                        Err(e) => debug!(error = %e, "Could not check long-poll settings"),
                    }
                })
            }
            Page::User(_) => {
                let transport = HttpPollTransport::new(self.http.clone(), UpdateFormat::User)
                    .with_wait(longpoll.wait());
                IngestionLoop::new(
                    Arc::new(transport),
                    Arc::new(UserSession::new(self.api.clone())),
                    Arc::new(UserHydrator::new(self.api.clone())),
                    self.dispatcher.clone(),
                )
            }
        };

        Ok(ingest
            .retry_delay(longpoll.retry_delay)
            .shutdown_on(self.shutdown.child_token()))
    }

    /// Cancels the loop and every running handler, then waits for them.
    async fn stop(&self) {
        self.shutdown.cancel();
        let supervisor = self.dispatcher.supervisor();
        supervisor.shutdown();
        supervisor.wait_idle().await;
        info!("Client stopped");
    }
}

impl std::fmt::Debug for VkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkClient")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ClientBuilder
// =============================================================================

/// Builder for [`VkClient`].
///
/// ```rust,ignore
/// let client = VkClient::builder()
///     .config_file("config/production.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct ClientBuilder {
    config_loader: ConfigLoader,
    config: Option<VkbotConfig>,
    token: Option<String>,
    variant: Option<ClientVariant>,
}

impl ClientBuilder {
    /// Creates a builder searching the current directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            config: None,
            token: None,
            variant: None,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Uses `config` as is, skipping files and environment.
    pub fn config(mut self, config: VkbotConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides `client.token`.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Overrides `client.variant`.
    pub fn variant(mut self, variant: ClientVariant) -> Self {
        self.variant = Some(variant);
        self
    }

    /// Resolves the configuration without building a client.
    pub fn resolve(self) -> RuntimeResult<VkbotConfig> {
        let mut config = match self.config {
            Some(config) => config,
            None => self.config_loader.load_unchecked()?,
        };
        if let Some(token) = self.token {
            config.client.token = token;
        }
        if let Some(variant) = self.variant {
            config.client.variant = variant;
        }
        validate_config(&config)?;
        Ok(config)
    }

    /// Builds the client. Must be called inside a Tokio runtime.
    pub fn build(self) -> RuntimeResult<VkClient> {
        VkClient::from_config(self.resolve()?)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use vkbot_core::{ApiError, ApiResult};
    use vkbot_transport::HttpConfig;

    /// Answers as VK does for a user or a community token.
    struct IdentityApi {
        user_token: bool,
        calls: Mutex<Vec<String>>,
    }

    impl IdentityApi {
        fn new(user_token: bool) -> Arc<Self> {
            Arc::new(Self {
                user_token,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ApiCaller for IdentityApi {
        async fn call(&self, method: &str, _params: Value) -> ApiResult<Value> {
            self.calls.lock().push(method.to_string());
            match method {
                "users.get" if self.user_token => Ok(json!([
                    {"id": 7, "first_name": "Ivan", "last_name": "Petrov"}
                ])),
                "users.get" => Ok(json!([])),
                "groups.getById" => Ok(json!({"groups": [{"id": 42, "name": "Club"}]})),
                "groups.getLongPollSettings" => Ok(json!({
                    "is_enabled": true,
                    "api_version": "5.95",
                    "events": {"message_new": 0, "group_join": 1}
                })),
                _ => Err(ApiError::Vk {
                    code: 5,
                    message: "User authorization failed".into(),
                }),
            }
        }
    }

    fn config(variant: ClientVariant) -> VkbotConfig {
        let mut config = VkbotConfig::default();
        config.client.token = "vk1.a.token".into();
        config.client.variant = variant;
        config
    }

    #[tokio::test]
    async fn test_identify_user_token() {
        let api = IdentityApi::new(true);
        let page = identify(api.as_ref()).await.unwrap();
        assert_eq!(page.owner_id(), 7);
        assert_eq!(*api.calls.lock(), vec!["users.get"]);
    }

    #[tokio::test]
    async fn test_identify_falls_back_to_group() {
        let api = IdentityApi::new(false);
        let page = identify(api.as_ref()).await.unwrap();
        assert!(page.is_group());
        assert_eq!(page.owner_id(), -42);
        assert_eq!(*api.calls.lock(), vec!["users.get", "groups.getById"]);
    }

    #[tokio::test]
    async fn test_credential_checks() {
        let user = identify(IdentityApi::new(true).as_ref()).await.unwrap();
        let group = identify(IdentityApi::new(false).as_ref()).await.unwrap();

        assert!(check_credentials(ClientVariant::User, &user, None).is_ok());
        assert!(check_credentials(ClientVariant::Group, &group, Some(0)).is_ok());
        assert!(matches!(
            check_credentials(ClientVariant::Group, &user, None),
            Err(RuntimeError::WrongCredentials(msg)) if msg.contains("group client")
        ));
        assert!(matches!(
            check_credentials(ClientVariant::User, &group, None),
            Err(RuntimeError::WrongCredentials(msg)) if msg.contains("user client")
        ));
        assert!(matches!(
            check_credentials(ClientVariant::Group, &group, Some(5)),
            Err(RuntimeError::OwnerIdWithGroupToken)
        ));
        assert!(matches!(
            check_credentials(ClientVariant::User, &user, Some(-3)),
            Err(RuntimeError::InvalidOwnerId(-3))
        ));
    }

    #[tokio::test]
    async fn test_settings_warnings() {
        let api = IdentityApi::new(false);
        let warnings = settings_warnings(api.as_ref(), 42).await.unwrap();
        assert_eq!(
            warnings,
            vec![
                SettingsWarning::MessageNewDisabled,
                SettingsWarning::OutdatedApiVersion("5.95".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_run_fails_on_wrong_credentials() {
        let http = HttpClient::new(&HttpConfig::default()).unwrap();
        let client = VkClient::with_api(config(ClientVariant::Group), http, IdentityApi::new(true));

        let result = client
            .run_until(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(RuntimeError::WrongCredentials(_))));
        assert!(client.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_owner_id_filter() {
        let http = HttpClient::new(&HttpConfig::default()).unwrap();
        let mut cfg = config(ClientVariant::User);
        cfg.client.owner_id = Some(0);
        let client = VkClient::with_api(cfg.clone(), http.clone(), IdentityApi::new(true));
        assert_eq!(client.owner_id(), None);

        cfg.client.owner_id = Some(12);
        let client = VkClient::with_api(cfg, http, IdentityApi::new(true));
        assert_eq!(client.owner_id(), Some(12));
    }

    #[test]
    fn test_builder_overrides() {
        let resolved = ClientBuilder::new()
            .config(VkbotConfig::default())
            .token("vk1.a.override")
            .variant(ClientVariant::User)
            .resolve()
            .unwrap();
        assert_eq!(resolved.client.token, "vk1.a.override");
        assert_eq!(resolved.client.variant, ClientVariant::User);
    }

    #[test]
    fn test_builder_rejects_missing_token() {
        let result = ClientBuilder::new().config(VkbotConfig::default()).resolve();
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }
}
