//! # vkbot Transport
//!
//! Network implementations of the traits defined in `vkbot-core`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │  vkbot-runtime           │  (ingestion loop, client)
//! ├──────────────────────────┤
//! │  vkbot-core              │  (PollTransport, SessionNegotiator)
//! ├──────────────────────────┤
//! │  vkbot-transport         │  <- This crate (implementations)
//! ├──────────────────────────┤
//! │  reqwest (HTTPS)         │
//! └──────────────────────────┘
//! ```
//!
//! ## Components
//!
//! | Type | Role |
//! |------|------|
//! | [`HttpClient`] | "send request, get JSON or text", retried 5 times (1s, 3s, 5s, 7s, 9s) |
//! | [`VkApi`] | [`ApiCaller`] adding credentials and retrying transient API errors |
//! | [`HttpPollTransport`] | one `a_check` poll per call |
//! | [`GroupSession`] / [`UserSession`] | session negotiation per client variant |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vkbot_transport::{GroupSession, HttpClient, HttpConfig, HttpPollTransport, UpdateFormat, VkApi};
//!
//! let http = HttpClient::new(&HttpConfig::default())?;
//! let api = Arc::new(VkApi::new(http.clone(), token, "5.131"));
//! let negotiator = GroupSession::new(api, group_id);
//! let transport = HttpPollTransport::new(http, UpdateFormat::Group);
//! ```

pub mod api;
pub mod config;
pub mod http;
pub mod longpoll;
pub mod session;

pub use api::{ApiCaller, VkApi, transient_delay, unwrap_envelope};
pub use config::{DEFAULT_API_BASE, HttpConfig, KATE_MOBILE_USER_AGENT};
pub use http::{HttpClient, Method, ResponseBody, encode_params};
pub use longpoll::{HttpPollTransport, UpdateFormat, parse_poll_response};
pub use session::{GroupSession, UserSession, parse_session};
