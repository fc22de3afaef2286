//! # Repository Module
//!
//! Database repository implementations for the offline store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Bridge / Sync Engine                                                  │
//! │       │                                                                 │
//! │       │  db.transactions().pending()                                   │
//! │       ▼                                                                 │
//! │  TransactionRepository            ActivityLogRepository                │
//! │  ├── create(items, user_id)       ├── log(event, status, details)      │
//! │  ├── pending()                    └── recent(limit)                    │
//! │  ├── mark_synced(ids)                                                  │
//! │  ├── pending_count()                                                   │
//! │  └── purge_synced(days)                                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database (shared write lock)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`TransactionRepository`](transaction::TransactionRepository) - Offline deposits
//! - [`ActivityLogRepository`](activity::ActivityLogRepository) - Diagnostic trail

pub mod activity;
pub mod transaction;
