//! # CSV Vault
//!
//! A deduplicating store for uploaded CSV data.
//!
//! Every row is fingerprinted by its content, independent of column order,
//! and stored at most once across all files. Stored rows can be listed,
//! searched, summarized, exported back to CSV, and mailed to contacts as
//! an attachment. Everything is available through the `vault` CLI and a
//! JSON HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │  Upload  │──▶│  Parse   │──▶│  Ingest   │──▶│  Store   │
//! │ CLI/HTTP │   │ CSV→Rows │   │ hash+dedup│   │ SQLite   │
//! └──────────┘   └──────────┘   └───────────┘   └────┬─────┘
//!                                                    │
//!                      ┌─────────────────────────────┤
//!                      ▼                             ▼
//!                 ┌──────────┐                 ┌──────────┐
//!                 │  Query   │                 │   Mail   │
//!                 │ + Export │                 │ (spool)  │
//!                 └──────────┘                 └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vault init
//! vault upload people.csv
//! vault search anna --field name
//! vault export --output out.csv
//! vault serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Library error type |
//! | [`parse`] | CSV text to rows |
//! | [`hash`] | Order-independent row fingerprints |
//! | [`store`] | Storage trait and in-memory backend |
//! | [`sqlite_store`] | SQLite backend |
//! | [`ingest`] | Upload and deduplication pipeline |
//! | [`query`] | Listing, search, and statistics |
//! | [`export`] | Rows back to CSV |
//! | [`contacts`] | Mail recipients |
//! | [`mail`] | Composing, sending, and logging mail |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod contacts;
pub mod db;
pub mod error;
pub mod export;
pub mod hash;
pub mod ingest;
pub mod mail;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod query;
pub mod server;
pub mod sqlite_store;
pub mod store;

pub use error::{Result, VaultError};
