//! # abtest-session
//!
//! Client-side visitor identity and A/B experiment assignment.
//!
//! A [`Session`] establishes a durable visitor id (`client_id`) and a
//! per-visit counter (`session_id`), persisting both in a cookie jar or a
//! local key-value store on page hosts, and then offers two operations
//! against the experiment service:
//!
//! - **participate**: get (and cache) the alternative to show for an experiment
//! - **convert**: report a goal event for an experiment
//!
//! ## Architecture
//!
//! ```text
//! Session ─┬─ IdentityResolver ── StorageAdapter ─┬─ CookieJar
//!          │                                      └─ LocalStore (memory / SQLite)
//!          └─ participate / convert ── Transport ─┬─ HttpTransport (reqwest)
//!                                                 └─ ScriptTagTransport
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use abtest_session::{Config, ParticipateOptions, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::headless(Config::from_env()?).await?;
//!     let response = session
//!         .participate("show-bieber", &["trolled", "not-trolled"], ParticipateOptions::default())
//!         .await?;
//!     println!("{:?}", response.alternative_name());
//!     Ok(())
//! }
//! ```

/// Configuration management.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Experiment session: participate and convert.
pub mod experiment;
/// Visitor and session identity resolution.
pub mod identity;
/// Host environment abstraction.
pub mod platform;
/// Cookie and local-store persistence.
pub mod storage;
/// Remote request transports.
pub mod transport;

pub use config::Config;
pub use error::{AppError, AppResult, TransportError, UsageError, ValidationError};
pub use experiment::{
    ConvertResponse, ParticipateOptions, ParticipateResponse, Session, Status, TrailingArg,
};
pub use identity::Identity;
pub use platform::{HeadlessPlatform, PagePlatform, Platform};
pub use transport::{HttpTransport, ScriptTagTransport, Transport};
