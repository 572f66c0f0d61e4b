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
#![allow(clippy::redundant_pub_crate)]

//! Command-line front end for archiving a tree of match logs.
//!
//! Layout:
//! - `cli.rs`: argument parsing, policy assembly and the run loop
//! - `error.rs`: CLI error type and exit codes
//! - `output.rs`: summary renderers
//! - `main.rs`: thin entrypoint delegating to `run()`

pub(crate) mod cli;
pub(crate) mod error;
pub(crate) mod output;

pub use cli::run;
