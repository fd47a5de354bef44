//! trawl - declarative, manifest-driven API crawler
//!
//! A YAML manifest describes a tree of `request` and `forEach` steps. The
//! crawler executes the tree against a stack of named data contexts: each
//! request drives a pagination state machine, carries credentials from a
//! pluggable authenticator, transforms its JSON response with jq, and merges
//! the result into a designated context. The crawl produces one aggregated
//! value, or a stream of top-level records when `stream: true`.
//!
//! ## Architecture
//!
//! - `manifest`: serde types parsed from the YAML manifest
//! - `validate`: pre-execution structural checks with dotted locations
//! - `expr`: jq expression engine (jaq) with a compile cache
//! - `template`: `{{ .context.field }}` URL template resolver
//! - `context`: named contexts and the shadowed-immutable context store
//! - `paginator`: per-request pagination state machine
//! - `auth`: basic/bearer/oauth/cookie/jwt/custom credential providers
//! - `limits`: token-bucket rate limiting for forEach iterations
//! - `crawler`: the step interpreter driving all of the above
//! - `profile`: optional hierarchical lifecycle event stream
//! - `error`: error types with stable TRAWL-xxx codes
//!
//! ## Example
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use trawl::ApiCrawler;
//!
//! # async fn demo() -> Result<(), trawl::CrawlError> {
//! let crawler = ApiCrawler::from_path("crawl.yaml")?;
//! let data = crawler.run(CancellationToken::new()).await?;
//! println!("{data}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod context;
pub mod crawler;
pub mod error;
pub mod expr;
pub mod limits;
pub mod manifest;
pub mod paginator;
pub mod profile;
pub mod template;
pub mod validate;

pub use crawler::ApiCrawler;
pub use error::{CrawlError, FixSuggestion, Result};
pub use manifest::Manifest;
pub use profile::{ProfileEvent, ProfileEventKind};
pub use validate::{validate_manifest, Diagnostic};
