//! HTTP plumbing: client, retries and parameter encoding.

pub mod client;
pub mod params;

pub use client::{HttpClient, Method, ResponseBody};
pub use params::encode_params;
