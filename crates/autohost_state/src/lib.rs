//! # Autohost State
//!
//! Configuration and persistent-state layer of the autohost bot. Several bot
//! instances, tools and plugins read and change the same settings and small
//! datasets (bans, preferences, user history, map metadata), stored as flat
//! files that may be shared between instances running on one host.
//!
//! ## Subsystems
//!
//! * **Preset resolver** ([`preset`]) - Typed `key: value` configuration
//!   files with includes, macros and section inheritance, applied to a live
//!   [`Settings`](preset::Settings) map
//! * **Table formats** ([`table`]) - The `table` and `fastTable` line formats
//!   used by rule files and datasets
//! * **Shared data** ([`shared`]) - Private or lock-protected shared storage
//!   of a dataset, refreshed when another process rewrote it
//! * **Matching** ([`matching`]) - Filter based lookups behind access
//!   levels, command rights and bans, plus the account/IP/name
//!   correlation index of [`user_data`]
//!
//! ## Usage
//!
//! Build one [`StateContext`] at startup and pass it to the code that needs
//! settings or data:
//!
//! ```no_run
//! use autohost_state::{StateContext, StateOptions};
//!
//! # fn main() -> Result<(), autohost_state::StateError> {
//! let mut state = StateContext::open(StateOptions {
//!     conf_file: "etc/autohost.conf".into(),
//!     ..Default::default()
//! })?;
//! state.apply_preset("duel")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Each subsystem has its own error enum ([`ConfError`], [`TableError`],
//! [`SyncError`], [`StoreError`]); context operations return [`StateError`].
//! Configuration errors are fatal at startup, data errors abort the single
//! operation and keep the last good in-memory value.

pub use context::{StateContext, StateOptions};
pub use error::{ConfError, StateError, StoreError, SyncError, TableError};

pub mod access;
pub mod bans;
pub mod certificates;
pub mod constants;
pub mod context;
pub mod error;
pub mod maps;
pub mod matching;
pub mod preset;
pub mod shared;
pub mod store;
pub mod table;
pub mod types;
pub mod user_data;

#[cfg(test)]
mod tests;
