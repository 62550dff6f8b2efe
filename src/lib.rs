//! # confcollect - fleet configuration backup
//!
//! `confcollect` pulls the running configuration of many heterogeneous
//! network devices concurrently and writes each one to a per-host file inside
//! a version-controlled tree. Every device family has its own adapter speaking
//! that family's protocol: HTTP config export, authenticated HTTP sessions,
//! Telnet, SSH shells, SCP and SSH-triggered pushes.
//!
//! ## Features
//!
//! - **Typed roster**: one parameter struct per device type, unknown keys
//!   rejected when the roster is loaded
//! - **Isolated jobs**: a failing or panicking adapter never affects its siblings
//! - **Safe writes**: a failed or empty fetch leaves the previous artifact untouched
//! - **Prompt state machine**: privilege modes reached by path-finding over
//!   the platform's transitions
//! - **Legacy SSH**: algorithm tables wide enough for old switch firmware
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use confcollect::adapters::DeviceCollector;
//! use confcollect::dispatch::Dispatcher;
//! use confcollect::roster::Roster;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let roster = Roster::load("etc/confcollect.toml".as_ref())?;
//!     let summary = Dispatcher::new(DeviceCollector, 32).run(roster.jobs).await;
//!     println!("{} failed", summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`roster::Roster`] - Builds jobs from a TOML or JSON roster
//! - [`dispatch::Dispatcher`] - Bounded worker pool over a shared job queue
//! - [`adapters::DeviceCollector`] - Routes each job to its device adapter
//! - [`writer`] - Text normalization and write-if-changed
//! - [`session`] - SSH and Telnet shells driven by [`device::DeviceHandler`]
//! - [`git::commit_and_push`] - Records the run in the repository

pub mod adapters;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod git;
pub mod job;
pub mod logging;
pub mod roster;
pub mod scp;
pub mod serde;
pub mod session;
pub mod templates;
pub mod uu;
pub mod writer;
