//! Client-side core for Girder data-management servers.
//!
//! - [`collection`]: paginated listings with client-side filtering and exact
//!   backward navigation.
//! - [`upload`]: resumable uploads, server-mediated or direct to storage.
//!
//! Both talk to the server through [`http::Transport`] and report through the
//! event bus of an explicit [`context::AppContext`].
//!
//! [`testing`] is public test support: a scripted [`http::Transport`] for
//! exercising collections and uploads without a server.

pub mod collection;
pub mod config;
pub mod context;
pub mod events;
pub mod http;
pub mod models;
pub mod testing;
pub mod upload;

pub use collection::{Collection, FetchError};
pub use context::AppContext;
pub use http::{HttpError, RestClient, Transport};
pub use models::Record;
pub use upload::{UploadError, Uploader};
