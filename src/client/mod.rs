//! Database client seam.
//!
//! The lifecycle opens a database from a cluster file and, between tests,
//! clears the whole key space. [`Connector`] and [`Database`] are the only
//! client calls it depends on. The FoundationDB binding lives in
//! [`fdb`] behind the `fdb` feature; [`crate::testing::MemoryConnector`] is
//! an in-process stand-in.

#[cfg(feature = "fdb")]
pub mod fdb;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ClientError;

#[cfg(feature = "fdb")]
pub use self::fdb::{FdbConnector, FdbDatabase};

/// Result type for client calls.
pub type Result<T> = std::result::Result<T, ClientError>;

/// First key of the user key space. The empty key is a valid key.
pub const KEYSPACE_BEGIN: &[u8] = b"";
/// End (exclusive) of the user key space.
pub const KEYSPACE_END: &[u8] = &[0xff];

/// An open database. Each call runs as its own transaction.
#[async_trait]
pub trait Database: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete every key in `[begin, end)`.
    async fn clear_range(&self, begin: &[u8], end: &[u8]) -> Result<()>;

    /// Delete every user key. Succeeds on an empty database.
    async fn clear_all(&self) -> Result<()> {
        self.clear_range(KEYSPACE_BEGIN, KEYSPACE_END).await
    }
}

/// Opens databases from cluster files.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, descriptor: &Path) -> Result<Arc<dyn Database>>;

    /// Client API version, for the startup log.
    fn api_version(&self) -> Option<i32> {
        None
    }
}
