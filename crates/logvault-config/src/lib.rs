#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Archive policy configuration for logvault runs.
//!
//! Layout: `model.rs` (typed policy and overrides), `defaults.rs` (built-in
//! values), `validate.rs` (range checks), `loader.rs` (JSON policy files).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_policy, load_policy_file};
pub use model::{ArchivePolicy, PolicyOverrides};
