//! # ftk
//!
//! Core of the `ftk` file toolkit: hashing and checksum manifests,
//! verification and tree diffs, find, size, list, archives and a periodic
//! command runner.
//!
//! ## Key Modules
//!
//! - [`hash`]: digests and the concurrent hash pool.
//! - [`manifest`]: the checksum manifest codec and [`manifest::VirtualHashMap`].
//! - [`verify`]: `check` and `diff`.
//! - [`find`]: serial and concurrent searchers over [`matcher`] and [`action`].
//! - [`size`]: parallel size accumulation.
//! - [`list`]: directory listing with grid and table output.
//! - [`archive`]: pack, unpack and preview for zip, tar and single-stream formats.
//! - [`watch`]: periodic command runner.
//!
//! The binary is a thin shell over [`cli`] and [`cli_runner`].

pub mod action;
pub mod archive;
pub mod bufpool;
pub mod cancel;
pub mod classify;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod error;
pub mod find;
pub mod hash;
pub mod humansize;
pub mod list;
pub mod manifest;
pub mod matcher;
pub mod pathx;
pub mod platform;
pub mod pretty;
pub mod progress;
pub mod size;
pub mod verify;
pub mod walk;
pub mod watch;

pub use error::{ErrorList, Result, ToolError};
