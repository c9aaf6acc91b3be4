//! # Contact Harvest
//!
//! Periodically mirrors a remote messaging directory (friends, groups,
//! official accounts and group memberships) into a local SQLite database.
//!
//! The I/O-free engine (cursor walk, batched detail resolution,
//! normalization, reconciliation) lives in `contact-harvest-core`. This
//! crate supplies the HTTP client, the SQLite store and the `harvester` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │   Remote    │──▶│  Walk → Resolve →    │──▶│  SQLite  │
//! │ HTTP (JSON) │   │ Normalize → Reconcile│   │ contacts │
//! └─────────────┘   └──────────────────────┘   └────┬─────┘
//!                                                   │
//!                                              ┌────▼─────┐
//!                                              │   CLI    │
//!                                              │(harvester)│
//!                                              └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvester init                 # create database
//! harvester sync all             # contacts, then groups and members
//! harvester stats                # counts and last runs
//! harvester get 12345@chatroom   # one contact with its members
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation and checks |
//! | [`sqlite_store`] | SQLite implementation of the directory store |
//! | [`http_client`] | HTTP implementation of the directory client |
//! | [`harvest`] | Per-target harvest orchestration |
//! | [`runs`] | Harvest run ledger |
//! | [`progress`] | Progress reporting on stderr |
//! | [`get`] | Contact lookup and listing |
//! | [`stats`] | Database statistics |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod db;
pub mod get;
pub mod harvest;
pub mod http_client;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod runs;
pub mod sqlite_store;
pub mod stats;
