//! Database utilities: connection helpers and embedded schema migrations.
//!
//! - [`connection::connect_sqlite`] applies WAL, foreign_keys=ON, and a 5000ms busy_timeout.
//! - [`migrate::run_sqlite`] applies all embedded migrations, creating the database file
//!   on first use.
//!
//! Example:
//! ```no_run
//! use ledger::db::{migrate, connection};
//!
//! let db_path = std::env::temp_dir().join("ledger_example.db");
//! migrate::run_sqlite(db_path.to_str().unwrap()).expect("migrations");
//! let _conn = connection::connect_sqlite(db_path.to_str().unwrap()).expect("connect");
//! ```

pub mod connection;
pub mod migrate;
