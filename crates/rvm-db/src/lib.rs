//! # rvm-db: Durable Offline Store
//!
//! SQLite storage for deposits recorded while the reverse-vending machine
//! has no backend connection, plus the local activity trail.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        RVM Edge Data Flow                               │
//! │                                                                         │
//! │  Kiosk deposit (bridge)          Sync engine (after reconnect)         │
//! │       │                                │                                │
//! │       ▼                                ▼                                │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     rvm-db (THIS CRATE)                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │ SqlitePool    │◄───│ Transactions   │    │ 001_offline_ │  │   │
//! │  │   │ write lock    │    │ ActivityLog    │    │   store.sql  │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  offline.db (WAL)                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rvm_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("/var/lib/rvm/offline.db")).await?;
//! let session_id = db.transactions().create(&items, Some(user_id)).await?;
//! let backlog = db.transactions().pending().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::activity::ActivityLogRepository;
pub use repository::transaction::TransactionRepository;
