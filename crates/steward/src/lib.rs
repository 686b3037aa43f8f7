// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Steward - backup and restore of tables into PIT repositories
//!
//! The steward connects the outside world to a `pitlog` repository. Backup
//! resolves tables through a [`Catalog`], walks each table's metadata graph,
//! stores changed files in the content area and appends one PIT. Restore
//! replays a PIT chain and writes every live file at a new location, with
//! metadata paths rewritten for that location.

mod backup;
mod catalog;
mod config;
mod copy;
mod error;
mod restore;
mod snapshot;
mod stores;

pub use backup::{BackupExecutor, BackupOptions, BackupOutcome};
pub use catalog::{Catalog, CatalogDocument, JsonCatalog, MemoryCatalog, TableEntry};
pub use config::{CONFIG_ENV, CatalogConfig, Config};
pub use copy::TransferOptions;
pub use error::{ErrorKind, Result, StewardError};
pub use restore::{
    RegisterAs, RestoreExecutor, RestoreOptions, RestoreOutcome, RestoredTable, register_restored,
};
pub use snapshot::{CaptureOptions, CapturedFile, TableSnapshot, capture_table, payload_kind};
pub use stores::{Located, StoreConfig, StoreRegistry, build_object_store, normalize_uri};
