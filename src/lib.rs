//! # Toolstall Core Library
//!
//! This crate contains the engine behind the `toolstall` CLI: one install pipeline that
//! every developer tool goes through, driven by declarative tool descriptors instead of
//! one hand-written install script per tool.
//!
//! ```text
//! ToolDescriptor + request
//!   -> version -> platform -> release -> fetch -> extract -> installer -> verify
//! ```
//!
//! Every stage either hands the next one what it needs or aborts the install with an
//! [`error::InstallError`] naming the stage. There is no retry and no rollback; the
//! scratch directory is removed on every exit path, including interruption.
//!
//! Installs are sequential and blocking. Two concurrent installs of the same tool into the
//! same directory are not coordinated; the last rename wins.
//!
//! ## Modules Overview
//! - [`registry`] – Tool descriptors and the built-in table
//! - [`version`] – Normalizing user-supplied versions per tool
//! - [`platform`] – Host detection and per-tool OS/arch names
//! - [`release`] – Turning a version and platform into one download URL
//! - [`fetch`] – HTTPS downloads, checksums and scratch directories
//! - [`extract`] – Unpacking archives and locating the binary
//! - [`script`] – Running vendor installer scripts
//! - [`installer`] – Install scope, binary placement and symlinks
//! - [`verify`] – Running the installed binary
//! - [`profile`] – Idempotent shell profile edits
//! - [`pipeline`] – The stages wired together
//! - [`config`] – `config.toml` and environment overrides
//! - [`error`] – Error taxonomy
//! - [`util`] – Templates, paths and small helpers

pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod installer;
pub mod pipeline;
pub mod platform;
pub mod profile;
pub mod registry;
pub mod release;
pub mod script;
pub mod util;
pub mod verify;
pub mod version;

pub use error::{InstallError, StageResult};
pub use pipeline::{InstallRequest, InstallResult, Pipeline};
pub use registry::{Registry, ToolDescriptor};
