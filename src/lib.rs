//! # pipedrive-dispatch
//!
//! Rate-limited, caching, retrying dispatch core for the Pipedrive CRM REST
//! API.
//!
//! Every call goes through a [`RequestScheduler`] that bounds both the rate
//! and the concurrency of outbound requests, a [`Transport`] that normalizes
//! responses into [`Envelope`]s and retries transient failures, and an
//! opt-in [`ResponseCache`] for reads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pipedrive_dispatch::{CacheOptions, Client, ClientConfig, QueryParams};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(ClientConfig::from_env()?)?;
//!
//!     let deal = client.post("/v1/deals", Some(json!({ "title": "Acme renewal" }))).await?;
//!     println!("created {deal}");
//!
//!     let open: Vec<serde_json::Value> = client
//!         .paginate("/v1/deals", QueryParams::new().with("status", "open"), CacheOptions::disabled())
//!         .fetch_all(100, Some(500))
//!         .await?;
//!     println!("{} open deals", open.len());
//!     Ok(())
//! }
//! ```

// ── Core ──────────────────────────────────────────────────────────────────────
pub mod config;
pub mod error;
pub mod http;

// ── Dispatch pipeline ─────────────────────────────────────────────────────────
pub mod cache;
pub mod client;
pub mod pagination;
pub mod scheduler;
pub mod transport;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheKey, CacheOptions, CacheStats, ResponseCache};
pub use client::Client;
pub use config::{ClientConfig, Credential, SchedulerConfig};
pub use error::{ApiError, ApiResult};
pub use http::{ApiRequest, Envelope, FileUpload, Method, QueryParams};
pub use pagination::{Page, PageIter, PageMarker, PageRequest, Paginator};
pub use scheduler::{RequestScheduler, RequestState, SchedulerStats};
pub use transport::{HttpSender, RetryPolicy, Sender, Transport};
