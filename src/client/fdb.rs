//! FoundationDB binding of the client seam.

use std::path::Path;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use foundationdb::FdbBindingError;

use crate::client::{Connector, Database, Result};
use crate::error::ClientError;

static BOOT: Once = Once::new();

/// Start the client network thread once per process.
///
/// The stop guard is leaked: the network lives as long as the test binary.
fn boot_network() {
    BOOT.call_once(|| {
        // SAFETY: called exactly once per process, and the guard is never
        // dropped, so the network is not stopped while handles are alive.
        let network = unsafe { foundationdb::boot() };
        std::mem::forget(network);
        tracing::debug!("foundationdb client network started");
    });
}

fn transaction_error(e: FdbBindingError) -> ClientError {
    ClientError::Transaction(e.to_string())
}

/// Opens [`FdbDatabase`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct FdbConnector;

impl FdbConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for FdbConnector {
    async fn open(&self, descriptor: &Path) -> Result<Arc<dyn Database>> {
        boot_network();

        let path = descriptor.to_str().ok_or_else(|| {
            ClientError::InvalidDescriptor(format!("non UTF-8 path: {}", descriptor.display()))
        })?;
        let db = foundationdb::Database::from_path(path)
            .map_err(|e| ClientError::Open(e.to_string()))?;

        Ok(Arc::new(FdbDatabase { inner: db }))
    }

    fn api_version(&self) -> Option<i32> {
        Some(foundationdb::api::get_max_api_version())
    }
}

/// An open FoundationDB database.
pub struct FdbDatabase {
    inner: foundationdb::Database,
}

impl FdbDatabase {
    /// The underlying binding handle, for tests that need the full API.
    pub fn inner(&self) -> &foundationdb::Database {
        &self.inner
    }
}

#[async_trait]
impl Database for FdbDatabase {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner
            .run(|trx, _maybe_committed| {
                let key = key.to_vec();
                async move {
                    let value = trx.get(&key, false).await?;
                    Ok(value.map(|v| v.to_vec()))
                }
            })
            .await
            .map_err(transaction_error)
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner
            .run(|trx, _maybe_committed| {
                trx.set(key, value);
                async { Ok(()) }
            })
            .await
            .map_err(transaction_error)
    }

    async fn clear_range(&self, begin: &[u8], end: &[u8]) -> Result<()> {
        self.inner
            .run(|trx, _maybe_committed| {
                trx.clear_range(begin, end);
                async { Ok(()) }
            })
            .await
            .map_err(transaction_error)
    }
}
