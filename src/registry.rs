//! Process-wide shared server.
//!
//! A test binary usually wants one database for all of its tests, reset
//! with [`ServerHandle::clear`] between them. [`Registry`] owns that one
//! handle. First-time provisioning runs under the registry's lock, so
//! concurrent first calls from parallel tests start a single container and
//! every caller gets the same handle.
//!
//! The handle lives until [`Registry::destroy`] is called. Statics are never
//! dropped, so the global registry also removes its container from a process
//! exit hook; a test that panics before its teardown still leaves nothing
//! running once the test binary exits.

use std::future::Future;
use std::sync::{Arc, LazyLock};

use tokio::sync::Mutex;

use crate::error::Result;
use crate::server::{LifecycleState, ServerHandle, Teardown};

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

#[ctor::dtor]
fn remove_shared_server() {
    GLOBAL.destroy_blocking();
}

/// Holds at most one started [`ServerHandle`].
#[derive(Default)]
pub struct Registry {
    slot: Mutex<Option<Arc<ServerHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Return the shared handle, starting one from `factory` if there is
    /// none or the previous one was destroyed.
    ///
    /// `factory` must build an unstarted handle. If starting it fails the
    /// handle is dropped (removing its container) and nothing is stored.
    pub async fn get_or_start_with<F, Fut>(&self, factory: F) -> Result<Arc<ServerHandle>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ServerHandle>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(handle) = slot.as_ref() {
            if handle.state().await == LifecycleState::Started {
                return Ok(handle.clone());
            }
            tracing::debug!("shared foundationdb server is no longer running, replacing it");
        }

        let handle = factory().await?;
        handle.start().await?;

        let handle = Arc::new(handle);
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// [`get_or_start_with`](Self::get_or_start_with), aborting the test on error.
    pub async fn must_get_or_start_with<F, Fut>(&self, factory: F) -> Arc<ServerHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ServerHandle>>,
    {
        match self.get_or_start_with(factory).await {
            Ok(handle) => handle,
            Err(e) => panic!("Registry::must_get_or_start(): start failed with {e}"),
        }
    }

    /// The current handle, if one was started.
    pub async fn get(&self) -> Option<Arc<ServerHandle>> {
        self.slot.lock().await.clone()
    }

    /// Destroy the shared handle and empty the registry.
    ///
    /// The next `get_or_start*` call provisions a new server.
    pub async fn destroy(&self) -> Result<Teardown> {
        let handle = self.slot.lock().await.take();
        match handle {
            Some(handle) => handle.destroy().await,
            None => Ok(Teardown::NothingToRemove),
        }
    }

    /// Remove the shared container without an async runtime and empty the
    /// registry. Runs at process exit for [`Registry::global`].
    pub fn destroy_blocking(&self) {
        let handle = match self.slot.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                tracing::warn!("shared foundationdb server is being started at exit, skipping removal");
                return;
            }
        };
        if let Some(handle) = handle {
            handle.destroy_blocking();
        }
    }
}

/// Shared server from the global registry, wired to Docker and FoundationDB.
#[cfg(feature = "fdb")]
pub async fn get_or_start() -> Result<Arc<ServerHandle>> {
    Registry::global()
        .get_or_start_with(ServerHandle::with_defaults)
        .await
}

/// [`get_or_start`], aborting the test on error.
#[cfg(feature = "fdb")]
pub async fn must_get_or_start() -> Arc<ServerHandle> {
    Registry::global()
        .must_get_or_start_with(ServerHandle::with_defaults)
        .await
}
