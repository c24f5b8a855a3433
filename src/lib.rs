//! reelkeeper — video retention for browser-grid test runs.
//!
//! Each test appends a keep/delete decision for its video to a shared
//! manifest. After the run, the coordinating process waits until every
//! browser container has been destroyed by the grid, then attaches kept videos
//! to their Allure results and deletes the rest.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod manifest;
pub mod policy;
pub mod record;

pub mod resolver;
pub mod runtime;
pub mod waiter;

pub mod processor;
pub mod report;
pub mod session;
