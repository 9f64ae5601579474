//! A native PostgreSQL wire-protocol client.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: protocol logic is separated from I/O
//!   and shared by the blocking and tokio drivers
//! - **Typed values**: an OID-keyed codec registry covering both the
//!   text and binary wire formats, including arrays, composites, ranges
//!   and multiranges
//! - **Full protocol support**: simple and extended queries, prepared
//!   statement caching, portals, batches, COPY, LISTEN/NOTIFY,
//!   cancellation
//! - **Pooling**: a bounded pool with health checks and generational
//!   invalidation
//!
//! # Example
//!
//! ```no_run
//! use pglink::sync::Conn;
//! use pglink::{Config, Value};
//!
//! fn main() -> pglink::Result<()> {
//!     let config = Config {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         database: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         ..Config::default()
//!     };
//!
//!     let mut conn = Conn::connect(config)?;
//!
//!     let rows: Vec<(i32, String)> =
//!         conn.exec_collect("SELECT id, name FROM users WHERE id > $1", &[Value::from(10_i32)])?;
//!     println!("{} rows", rows.len());
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

// private
mod buffer_set;
mod config;
mod error;
mod statement;
#[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
mod tls;

// pub
pub mod copy;
pub mod handler;
pub mod protocol;
pub mod state;
pub mod types;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use buffer_set::BufferSet;
pub use config::{Config, SslMode, StatementCacheMode, TargetSessionAttrs};
pub use error::{Error, PoolError, Result, ServerError};
pub use handler::{CollectHandler, CopySink, DropHandler, FirstRowHandler, RowHandler};
pub use state::{AsyncMessage, BatchOutcome, Notification};
pub use statement::{StatementCache, StatementDescription};
pub use types::{ConnInfo, FromRow, FromValue, PgValue, Value};
