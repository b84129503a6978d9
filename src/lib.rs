/*!
# Contract Tracker

Contract, bill and bank-guarantee tracking, built in Rust.

## Overview

Three editable tables make up the tracker: the **contractor list**, the
**bill tracker** and the **EPBG tracker** (extended performance bank
guarantees). Each is an ordered grid of rows with snapshot undo/redo, a
debounced writer that saves to the REST API and falls back to a local store,
and expiry metrics derived from the row dates. A rule-based analytics layer
summarizes the tables and scores contractor risk.

## Architecture

### Editing core
- **Row Schema Registry** - field sets, aliases, storage keys and endpoints per table
- **Grid State Store** - ordered rows with contiguous `1..N` serial numbers
- **Snapshot History** - bounded linear undo/redo over serialized states
- **Grid Controller** - one table page: store, history and persistence together

### Persistence Layer
- Remote tier: blocking REST client (`ureq`) used from `spawn_blocking`
- Local tiers: a session-scoped memory store and gzip-compressed files on disk
- Debounced, last-write-wins saving with remote → local → mirror → recovery reads
- Whole-workbook backups as gzip-compressed bincode
- CSV / XLSX import and export

### Server (feature `web`)
- axum REST API with cookie sessions and Argon2 password hashes
- Read endpoints need a session; writes need the admin or staff role

## Modules

- **schema**: table definitions and field-name resolution
- **record**: a typed row, its attachments and its JSON shape
- **grid**: the ordered row store
- **history**: snapshot undo/redo
- **storage**: local key/value tiers
- **client**: REST client and the remote tier trait
- **sync**: debounced persistence with fallback
- **metrics**: days remaining, expiry tiers, risk score, date and amount parsing
- **insights**: summary, insights, recommendations and the analytics report
- **controller**: the page controller tying the above together
- **renewal**: expiring contracts, contract analysis and the renewal ledger
- **import** / **export**: CSV and XLSX
- **backup**: workbook persistence with compression
- **login**: roles, accounts and sessions
- **config** / **logging**: command-line configuration and tracing setup
- **app**: routing and handlers

## REST API Endpoints

- `GET|POST /api/contractor-list`, `/api/bill-tracker`, `/api/epbg` - table rows
- `GET /api/contract-renewal/expiring`, `POST /api/contract-renewal/{analyze,process-renewal,process-payment,confirm}`
- `GET /api/check-auth`, `POST /api/login`, `POST /api/logout`, `PUT /api/user/theme`
- `GET /api/export/{table}/{csv|xlsx}`, `POST /api/excel-upload/{table}`
- `GET /api/analytics/report`, `GET /api/health`
*/

pub mod backup;
pub mod client;
pub mod config;
pub mod controller;
pub mod export;
pub mod grid;
pub mod history;
pub mod import;
pub mod insights;
pub mod logging;
pub mod login;
pub mod metrics;
pub mod record;
pub mod renewal;
pub mod schema;
pub mod storage;
pub mod sync;

#[cfg(feature = "web")]
pub mod app;

pub use backup::Workbook;
pub use client::{ApiClient, RemoteError, RemoteTier};
pub use controller::{ControllerError, GridController, RowView};
pub use grid::{GridError, GridStore};
pub use history::{HistoryPhase, SnapshotHistory};
pub use insights::AnalyticsReport;
pub use metrics::{Expiry, ExpiryTier, TierThresholds, days_remaining, risk_score};
pub use record::RowRecord;
pub use schema::{RowVariant, StorageScope};
pub use storage::{FileStore, LocalStore, LocalTiers, MemoryStore};
pub use sync::{LoadSource, PersistenceSynchronizer, SyncConfig, SyncError, SyncStatus, WriteOutcome};
