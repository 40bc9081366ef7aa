//! Server handle: the lifecycle of one test database.
//!
//! ```text
//!   Unstarted ──start──▶ Starting ──ok──▶ Started ──destroy──▶ Destroyed
//!                           │                                     ▲
//!                           └──err──▶ Failed ─────destroy─────────┘
//! ```
//!
//! `start` runs launch, initialize, discover, write cluster file and open in
//! strict sequence. Nothing is published until every phase succeeded: on
//! error the handle only remembers the container (if one was launched) so
//! that `destroy` or `Drop` can remove it. A `start` future dropped before
//! it finishes leaves the handle `Failed` the same way.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::client::{Connector, Database};
use crate::config::HarnessConfig;
use crate::descriptor::{ConnectionDescriptor, DescriptorFile, write_descriptor};
use crate::error::{HarnessError, Phase, Result, within};
use crate::instance::InstanceId;
use crate::runtime::{ContainerRuntime, Removal};
use crate::{launcher, network, probe};

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unstarted,
    Starting,
    Started,
    Failed,
    Destroyed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unstarted => "unstarted",
            LifecycleState::Starting => "starting",
            LifecycleState::Started => "started",
            LifecycleState::Failed => "failed",
            LifecycleState::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `destroy` did. None of these outcomes is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The container was removed.
    Removed,
    /// The runtime had already lost the container.
    AlreadyGone,
    /// `destroy` already ran on this handle.
    AlreadyDestroyed,
    /// No container was ever launched.
    NothingToRemove,
}

struct Running {
    instance: InstanceId,
    descriptor: ConnectionDescriptor,
    // owns the temp dir; removed with the handle
    file: DescriptorFile,
    database: Arc<dyn Database>,
}

enum Inner {
    Unstarted,
    Starting { instance: Option<InstanceId> },
    Started(Running),
    Failed { instance: Option<InstanceId> },
    Destroyed,
}

impl Inner {
    fn state(&self) -> LifecycleState {
        match self {
            Inner::Unstarted => LifecycleState::Unstarted,
            Inner::Starting { .. } => LifecycleState::Starting,
            Inner::Started(_) => LifecycleState::Started,
            Inner::Failed { .. } => LifecycleState::Failed,
            Inner::Destroyed => LifecycleState::Destroyed,
        }
    }

    fn take_instance(&mut self) -> Option<InstanceId> {
        match std::mem::replace(self, Inner::Destroyed) {
            Inner::Starting { instance } | Inner::Failed { instance } => instance,
            Inner::Started(running) => Some(running.instance),
            other => {
                *self = other;
                None
            }
        }
    }
}

/// One FoundationDB container under test control.
///
/// `start` and `destroy` must not race each other on the same handle; they
/// take the state lock only between phases, never across an external call.
pub struct ServerHandle {
    config: HarnessConfig,
    runtime: Arc<dyn ContainerRuntime>,
    connector: Arc<dyn Connector>,
    session: String,
    inner: RwLock<Inner>,
    start_in_flight: AtomicBool,
}

/// Held by `start` while it provisions. Dropped before `completed` is set,
/// it demotes `Starting` to `Failed` so the container stays removable.
struct StartGuard<'a> {
    inner: &'a RwLock<Inner>,
    in_flight: &'a AtomicBool,
    completed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.completed
            && let Ok(mut inner) = self.inner.try_write()
            && let Inner::Starting { instance } = &mut *inner
        {
            let instance = instance.take();
            tracing::warn!(
                container = ?instance.as_ref().map(InstanceId::short),
                "foundationdb start cancelled"
            );
            *inner = Inner::Failed { instance };
        }
        self.in_flight.store(false, Ordering::Release);
    }
}

impl ServerHandle {
    /// Create an unstarted handle.
    pub fn new(
        config: HarnessConfig,
        runtime: Arc<dyn ContainerRuntime>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            runtime,
            connector,
            session: uuid::Uuid::new_v4().to_string(),
            inner: RwLock::new(Inner::Unstarted),
            start_in_flight: AtomicBool::new(false),
        }
    }

    /// Unstarted handle wired to the local Docker daemon and the
    /// FoundationDB client, configured from `FDBTEST_*` variables.
    #[cfg(feature = "fdb")]
    pub async fn with_defaults() -> Result<Self> {
        let config = HarnessConfig::resolve()?;
        let runtime = crate::runtime::DockerRuntime::connect()
            .await
            .map_err(|e| HarnessError::Launch {
                image: config.image(),
                reason: e.to_string(),
                output: String::new(),
            })?
            .with_blocking_timeout(config.timeouts.teardown);

        Ok(Self::new(
            config,
            Arc::new(runtime),
            Arc::new(crate::client::FdbConnector::new()),
        ))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Session label carried by this handle's container.
    pub fn session(&self) -> &str {
        &self.session
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.read().await.state()
    }

    /// Container id once started.
    pub async fn instance_id(&self) -> Option<InstanceId> {
        match &*self.inner.read().await {
            Inner::Started(running) => Some(running.instance.clone()),
            _ => None,
        }
    }

    /// Path of the generated cluster file once started.
    pub async fn descriptor_path(&self) -> Option<PathBuf> {
        match &*self.inner.read().await {
            Inner::Started(running) => Some(running.file.path().to_path_buf()),
            _ => None,
        }
    }

    /// Cluster file contents once started.
    pub async fn descriptor(&self) -> Option<ConnectionDescriptor> {
        match &*self.inner.read().await {
            Inner::Started(running) => Some(running.descriptor.clone()),
            _ => None,
        }
    }

    /// The open database once started.
    pub async fn database(&self) -> Option<Arc<dyn Database>> {
        match &*self.inner.read().await {
            Inner::Started(running) => Some(running.database.clone()),
            _ => None,
        }
    }

    /// Launch, initialize and connect to a fresh database.
    ///
    /// Only valid on an unstarted handle. On error the handle is `Failed`
    /// and exposes nothing; call [`destroy`](Self::destroy) (or drop it) to
    /// remove the container.
    pub async fn start(&self) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            let state = inner.state();
            if state != LifecycleState::Unstarted {
                return Err(HarnessError::InvalidState {
                    operation: "start",
                    state,
                });
            }
            *inner = Inner::Starting { instance: None };
            self.start_in_flight.store(true, Ordering::Release);
        }

        let mut guard = StartGuard {
            inner: &self.inner,
            in_flight: &self.start_in_flight,
            completed: false,
        };

        let result = self.provision().await;

        let mut inner = self.inner.write().await;
        guard.completed = true;
        match result {
            Ok(running) => {
                *inner = Inner::Started(running);
                Ok(())
            }
            Err(e) => {
                let instance = inner.take_instance();
                *inner = Inner::Failed { instance };
                tracing::warn!(phase = ?e.phase(), "foundationdb start failed: {}", e);
                Err(e)
            }
        }
    }

    /// [`start`](Self::start), aborting the test on error.
    pub async fn must_start(&self) {
        if let Err(e) = self.start().await {
            panic!("ServerHandle::must_start(): start failed with {e}");
        }
    }

    async fn provision(&self) -> Result<Running> {
        let instance = launcher::launch(self.runtime.as_ref(), &self.config, &self.session).await?;
        *self.inner.write().await = Inner::Starting {
            instance: Some(instance.clone()),
        };

        probe::initialize(self.runtime.as_ref(), &self.config, &instance).await?;

        let address: Ipv4Addr =
            network::discover_address(self.runtime.as_ref(), &self.config, &instance).await?;

        let descriptor =
            ConnectionDescriptor::new(self.config.credentials.clone(), address, self.config.port);
        let file = write_descriptor(&descriptor)?;

        if let Some(version) = self.connector.api_version() {
            tracing::info!("foundationdb client api version: {}", version);
        }

        let database = within(Phase::Open, self.config.timeouts.open, async {
            self.connector
                .open(file.path())
                .await
                .map_err(|source| HarnessError::ClientOpen {
                    path: file.path().to_path_buf(),
                    source,
                })
        })
        .await?;

        Ok(Running {
            instance,
            descriptor,
            file,
            database,
        })
    }

    /// Delete every key in the database.
    ///
    /// Resets state between tests without paying for a new container.
    /// Clearing an empty database succeeds.
    pub async fn clear(&self) -> Result<()> {
        let database = match &*self.inner.read().await {
            Inner::Started(running) => running.database.clone(),
            other => {
                return Err(HarnessError::InvalidState {
                    operation: "clear",
                    state: other.state(),
                });
            }
        };

        database.clear_all().await.map_err(HarnessError::Transaction)
    }

    /// [`clear`](Self::clear), aborting the test on error.
    pub async fn must_clear(&self) {
        if let Err(e) = self.clear().await {
            panic!("ServerHandle::must_clear(): clear failed with {e}");
        }
    }

    /// Kill and remove the container.
    ///
    /// Safe to call repeatedly. A failed removal leaves the handle `Failed`
    /// so that a later call, or `Drop`, tries again.
    pub async fn destroy(&self) -> Result<Teardown> {
        let instance = {
            let mut inner = self.inner.write().await;
            match &*inner {
                Inner::Destroyed => return Ok(Teardown::AlreadyDestroyed),
                Inner::Unstarted => return Ok(Teardown::NothingToRemove),
                Inner::Starting { .. } if self.start_in_flight.load(Ordering::Acquire) => {
                    return Err(HarnessError::InvalidState {
                        operation: "destroy",
                        state: LifecycleState::Starting,
                    });
                }
                Inner::Starting { .. } | Inner::Started(_) | Inner::Failed { .. } => {}
            }
            match inner.take_instance() {
                Some(instance) => instance,
                None => return Ok(Teardown::NothingToRemove),
            }
        };

        log_command!(self.config.verbose, "+docker rm --force {}", instance.as_str());

        let removal = within(Phase::Teardown, self.config.timeouts.teardown, async {
            self.runtime
                .force_remove(instance.as_str())
                .await
                .map_err(|e| HarnessError::Teardown {
                    instance: instance.short().to_string(),
                    reason: e.to_string(),
                })
        })
        .await;

        match removal {
            Ok(Removal::Removed) => {
                tracing::info!(container = %instance, "foundationdb container removed");
                Ok(Teardown::Removed)
            }
            Ok(Removal::NotFound) => {
                tracing::debug!(container = %instance, "foundationdb container already gone");
                Ok(Teardown::AlreadyGone)
            }
            Err(e) => {
                tracing::warn!(container = %instance, "foundationdb teardown failed: {}", e);
                *self.inner.write().await = Inner::Failed {
                    instance: Some(instance),
                };
                Err(e)
            }
        }
    }
}

impl ServerHandle {
    /// Remove the container without an async runtime.
    ///
    /// For exit paths where nothing can be awaited. Skipped if a `start` or
    /// `destroy` holds the state lock.
    pub fn destroy_blocking(&self) {
        let instance = match self.inner.try_write() {
            Ok(mut inner) => inner.take_instance(),
            Err(_) => {
                tracing::warn!("foundationdb handle busy at exit, container may remain running");
                return;
            }
        };
        if let Some(instance) = instance {
            self.remove_blocking(instance, "exit");
        }
    }

    fn remove_blocking(&self, instance: InstanceId, trigger: &str) {
        if self.config.keep_on_drop {
            tracing::warn!(
                container = %instance,
                "Keeping foundationdb container running (keep_on_drop=true)"
            );
            return;
        }

        match self.runtime.force_remove_blocking(instance.as_str()) {
            Ok(Removal::Removed) => {
                tracing::info!(container = %instance, "foundationdb container removed on {}", trigger);
            }
            Ok(Removal::NotFound) => {}
            Err(e) => {
                tracing::warn!(
                    container = %instance,
                    "foundationdb container may remain running: {}",
                    e
                );
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(instance) = self.inner.get_mut().take_instance() {
            self.remove_blocking(instance, "drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{FakeRuntime, MemoryConnector, TEST_INSTANCE_ID};

    fn handle(runtime: &FakeRuntime, connector: &MemoryConnector) -> ServerHandle {
        ServerHandle::new(
            HarnessConfig::default(),
            Arc::new(runtime.clone()),
            Arc::new(connector.clone()),
        )
    }

    #[tokio::test]
    async fn test_start_publishes_everything() {
        let runtime = FakeRuntime::new();
        let connector = MemoryConnector::new();
        let server = handle(&runtime, &connector);
        assert_eq!(server.state().await, LifecycleState::Unstarted);
        assert!(server.database().await.is_none());

        server.start().await.unwrap();

        assert_eq!(server.state().await, LifecycleState::Started);
        let id = server.instance_id().await.unwrap();
        assert_eq!(id.as_str(), TEST_INSTANCE_ID);
        let path = server.descriptor_path().await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "docker:docker@172.17.0.2:4500"
        );
        assert_eq!(connector.opened(), vec![path]);
        assert!(server.database().await.is_some());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let runtime = FakeRuntime::new();
        let server = handle(&runtime, &MemoryConnector::new());
        server.start().await.unwrap();

        let err = server.start().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::InvalidState {
                operation: "start",
                state: LifecycleState::Started
            }
        ));
        assert_eq!(runtime.runs().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_start_exposes_nothing() {
        let runtime = FakeRuntime::new().with_address("not-an-ip");
        let connector = MemoryConnector::new();
        let server = handle(&runtime, &connector);

        let err = server.start().await.unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Discover));
        assert_eq!(server.state().await, LifecycleState::Failed);
        assert!(server.instance_id().await.is_none());
        assert!(server.descriptor_path().await.is_none());
        assert!(server.database().await.is_none());
        assert!(connector.opened().is_empty());

        // the launched container is still tracked for teardown
        assert_eq!(server.destroy().await.unwrap(), Teardown::Removed);
        assert_eq!(runtime.removals(), vec![TEST_INSTANCE_ID.to_string()]);
    }

    #[tokio::test]
    async fn test_open_failure() {
        let runtime = FakeRuntime::new();
        let connector = MemoryConnector::new().failing_open("connection refused");
        let server = handle(&runtime, &connector);

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, HarnessError::ClientOpen { .. }));
        assert_eq!(server.state().await, LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_clear_requires_started() {
        let server = handle(&FakeRuntime::new(), &MemoryConnector::new());
        let err = server.clear().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::InvalidState {
                operation: "clear",
                state: LifecycleState::Unstarted
            }
        ));
    }

    #[tokio::test]
    async fn test_clear_transaction_failure() {
        let connector = MemoryConnector::new();
        let server = handle(&FakeRuntime::new(), &connector);
        server.start().await.unwrap();

        connector.set_failing(true);
        let err = server.clear().await.unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Clear));
    }

    #[tokio::test]
    async fn test_destroy_outcomes() {
        let runtime = FakeRuntime::new();
        let server = handle(&runtime, &MemoryConnector::new());
        assert_eq!(server.destroy().await.unwrap(), Teardown::NothingToRemove);
        assert_eq!(server.state().await, LifecycleState::Unstarted);

        server.start().await.unwrap();
        let path = server.descriptor_path().await.unwrap();
        assert_eq!(server.destroy().await.unwrap(), Teardown::Removed);
        assert_eq!(server.state().await, LifecycleState::Destroyed);
        assert!(!path.exists());

        assert_eq!(server.destroy().await.unwrap(), Teardown::AlreadyDestroyed);
        assert_eq!(runtime.removals().len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_container_already_gone() {
        let runtime = FakeRuntime::new();
        let server = handle(&runtime, &MemoryConnector::new());
        server.start().await.unwrap();

        runtime.kill(TEST_INSTANCE_ID);
        assert_eq!(server.destroy().await.unwrap(), Teardown::AlreadyGone);
    }

    #[tokio::test]
    async fn test_destroy_failure_can_be_retried() {
        let runtime = FakeRuntime::new();
        let server = handle(&runtime, &MemoryConnector::new());
        server.start().await.unwrap();

        runtime.set_remove_failure(Some("daemon hung up"));
        let err = server.destroy().await.unwrap_err();
        assert!(matches!(err, HarnessError::Teardown { .. }));
        assert_eq!(server.state().await, LifecycleState::Failed);

        runtime.set_remove_failure(None);
        assert_eq!(server.destroy().await.unwrap(), Teardown::Removed);
    }

    #[tokio::test]
    async fn test_drop_removes_container() {
        let runtime = FakeRuntime::new();
        let server = handle(&runtime, &MemoryConnector::new());
        server.start().await.unwrap();
        assert_eq!(runtime.running().len(), 1);

        drop(server);
        assert!(runtime.running().is_empty());
    }

    #[tokio::test]
    async fn test_drop_after_failed_start_removes_container() {
        let runtime = FakeRuntime::new().with_address("");
        let server = handle(&runtime, &MemoryConnector::new());
        assert!(server.start().await.is_err());
        assert_eq!(runtime.running().len(), 1);

        drop(server);
        assert!(runtime.running().is_empty());
    }

    #[tokio::test]
    async fn test_keep_on_drop() {
        let runtime = FakeRuntime::new();
        let server = ServerHandle::new(
            HarnessConfig::default().with_keep_on_drop(true),
            Arc::new(runtime.clone()),
            Arc::new(MemoryConnector::new()),
        );
        server.start().await.unwrap();

        drop(server);
        assert_eq!(runtime.running().len(), 1);
    }

    #[test]
    fn test_new_handle_is_unstarted() {
        let runtime = FakeRuntime::new();
        let server = handle(&runtime, &MemoryConnector::new());

        assert_eq!(
            tokio_test::block_on(server.state()),
            LifecycleState::Unstarted
        );
        assert!(tokio_test::block_on(server.instance_id()).is_none());
    }

    #[test]
    fn test_drop_outside_runtime_removes_container() {
        let runtime = FakeRuntime::new();
        let server = handle(&runtime, &MemoryConnector::new());
        tokio_test::block_on(server.start()).unwrap();

        drop(server);
        assert!(runtime.running().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_start_can_be_destroyed() {
        let runtime = FakeRuntime::new().with_delay(Duration::from_millis(50));
        let server = handle(&runtime, &MemoryConnector::new());

        // launch and init finish, discovery is cut off
        let cancelled = tokio::time::timeout(Duration::from_millis(120), server.start()).await;
        assert!(cancelled.is_err());
        assert_eq!(runtime.running().len(), 1);
        assert_eq!(server.state().await, LifecycleState::Failed);

        assert_eq!(server.destroy().await.unwrap(), Teardown::Removed);
        assert!(runtime.running().is_empty());
        assert_eq!(server.state().await, LifecycleState::Destroyed);
    }

    #[tokio::test]
    async fn test_destroy_during_start_is_rejected() {
        let runtime = FakeRuntime::new().with_delay(Duration::from_millis(50));
        let server = Arc::new(handle(&runtime, &MemoryConnector::new()));

        let starting = tokio::spawn({
            let server = server.clone();
            async move { server.start().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = server.destroy().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::InvalidState {
                state: LifecycleState::Starting,
                ..
            }
        ));

        starting.await.unwrap().unwrap();
        assert_eq!(server.destroy().await.unwrap(), Teardown::Removed);
    }

    #[tokio::test]
    async fn test_clear_covers_empty_key() {
        let runtime = FakeRuntime::new();
        let server = handle(&runtime, &MemoryConnector::new());
        server.start().await.unwrap();

        let db = server.database().await.unwrap();
        db.set(b"", b"first").await.unwrap();
        db.set(b"\x00", b"second").await.unwrap();
        server.clear().await.unwrap();

        assert_eq!(db.get(b"").await.unwrap(), None);
        assert_eq!(db.get(b"\x00").await.unwrap(), None);
    }

    #[test]
    fn test_destroy_blocking() {
        let runtime = FakeRuntime::new();
        let server = handle(&runtime, &MemoryConnector::new());
        tokio_test::block_on(server.start()).unwrap();

        server.destroy_blocking();
        assert!(runtime.running().is_empty());
        assert_eq!(
            tokio_test::block_on(server.state()),
            LifecycleState::Destroyed
        );
        assert_eq!(
            tokio_test::block_on(server.destroy()).unwrap(),
            Teardown::AlreadyDestroyed
        );
    }

    #[tokio::test]
    #[should_panic(expected = "must_start(): start failed")]
    async fn test_must_start_panics() {
        let runtime = FakeRuntime::new().with_run_output("");
        let server = handle(&runtime, &MemoryConnector::new());
        server.must_start().await;
    }
}
