//! Text File Service
//!
//! Stores and serves line-oriented text artifacts (READMEs, SBOM text,
//! swagger documents) for components. A document is kept as one row per
//! base64 fragment, keyed by component ID, file type and line number.
//!
//! ## Features
//!
//! - **Whole-file replace**: writes delete every existing line for the file
//!   and insert the new ones in a single transaction
//! - **Retry on transient failure**: lost connections rerun the whole
//!   operation on a fresh pooled connection, a bounded number of times
//! - **Content type inference**: reads come back as markdown, JSON, YAML or
//!   plain text depending on file type and content
//! - **External authorization**: every request is checked against the
//!   validate-user service before storage is touched
//!
//! ## Architecture
//!
//! ```text
//!  HTTP request
//!       │
//!       ▼
//! ┌──────────────┐   cookie   ┌──────────────┐
//! │ Request      │───────────▶│ Validate-    │
//! │ Handler      │            │ user service │
//! └──────────────┘            └──────────────┘
//!       │
//!       ▼
//! ┌──────────────┐   retry    ┌──────────────┐          PostgreSQL
//! │ Storage      │───────────▶│ Line         │─────────▶┌──────────────┐
//! │ Gateway      │            │ Store        │          │ dm_textfile  │
//! └──────────────┘            └──────────────┘          └──────────────┘
//!       │
//!       ▼
//! ┌──────────────┐
//! │ Content      │
//! │ Codec        │
//! └──────────────┘
//! ```

pub mod api;
pub mod authorizer;
pub mod config;
pub mod content_codec;
pub mod error;
pub mod line_store;
pub mod request_handler;
pub mod storage_gateway;

pub use api::{create_router, AppState};
pub use authorizer::{AuthError, Authorizer, HttpAuthorizer};
pub use config::Config;
pub use content_codec::{ContentKind, DecodeError, TextFileKey, TextFileLine};
pub use error::ServiceError;
pub use line_store::{LineStore, PgLineStore, StoreError};
pub use request_handler::{Message, ReadParams, RequestHandler, TextDocument};
pub use storage_gateway::{RetryPolicy, StorageGateway};
