//! In-process stand-ins for Docker and the database client.
//!
//! Provides:
//! - [`FakeRuntime`]: a scriptable [`ContainerRuntime`] that records calls
//! - [`MemoryConnector`] / [`MemoryDatabase`]: an ordered in-memory key space
//!   opened from a real cluster file
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fdbtest::config::HarnessConfig;
//! use fdbtest::server::ServerHandle;
//! use fdbtest::testing::{FakeRuntime, MemoryConnector};
//!
//! # async fn example() {
//! let runtime = FakeRuntime::new();
//! let server = ServerHandle::new(
//!     HarnessConfig::default(),
//!     Arc::new(runtime.clone()),
//!     Arc::new(MemoryConnector::new()),
//! );
//! server.must_start().await;
//! assert_eq!(runtime.running().len(), 1);
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{self, Connector, Database};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{ClientError, RuntimeError};
use crate::runtime::{self, ContainerRuntime, ExecOutput, Removal, RunRequest};

/// Id reported for the first container a [`FakeRuntime`] starts.
pub const TEST_INSTANCE_ID: &str =
    "4f1c2a9b8e7d6c5b4a39281706f5e4d3c2b1a0918273645546372819a0b1c2d3";

/// Address reported unless overridden.
pub const TEST_ADDRESS: &str = "172.17.0.2";

fn fake_id(n: usize) -> String {
    if n == 0 {
        TEST_INSTANCE_ID.to_string()
    } else {
        format!("{:04x}{}", n, &TEST_INSTANCE_ID[4..])
    }
}

#[derive(Default)]
struct FakeState {
    run_output: Option<String>,
    run_failure: Option<String>,
    exec_output: Option<ExecOutput>,
    address: Option<String>,
    remove_failure: Option<String>,
    delay: Option<Duration>,
    // id -> (session, initialized)
    containers: HashMap<String, (String, bool)>,
    runs: Vec<RunRequest>,
    execs: Vec<(String, Vec<String>)>,
    removals: Vec<String>,
}

/// Scriptable container runtime.
///
/// By default it behaves like a healthy Docker daemon running the
/// FoundationDB image: runs yield a fresh 64-character id, the first
/// `configure new` in a container prints `Database created` and later ones
/// fail, and every container sits at [`TEST_ADDRESS`]. Clones share state.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Report `output` as the raw id for every run.
    pub fn with_run_output(self, output: impl Into<String>) -> Self {
        self.lock().run_output = Some(output.into());
        self
    }

    /// Fail every run with `reason`.
    pub fn failing_run(self, reason: impl Into<String>) -> Self {
        self.lock().run_failure = Some(reason.into());
        self
    }

    /// Answer every exec with `output`.
    pub fn with_exec_output(self, output: ExecOutput) -> Self {
        self.lock().exec_output = Some(output);
        self
    }

    /// Report `address` for every container.
    pub fn with_address(self, address: impl Into<String>) -> Self {
        self.lock().address = Some(address.into());
        self
    }

    /// Sleep before answering each async call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = Some(delay);
        self
    }

    /// Make removals fail with `reason`, or succeed again with `None`.
    pub fn set_remove_failure(&self, reason: Option<&str>) {
        self.lock().remove_failure = reason.map(str::to_string);
    }

    /// Make a container vanish, as if it exited and was auto-removed.
    pub fn kill(&self, id: &str) {
        self.lock().containers.remove(id);
    }

    /// Ids of containers currently running.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn runs(&self) -> Vec<RunRequest> {
        self.lock().runs.clone()
    }

    /// `(container id, command)` for every exec.
    pub fn execs(&self) -> Vec<(String, Vec<String>)> {
        self.lock().execs.clone()
    }

    /// Ids passed to every removal, successful or not.
    pub fn removals(&self) -> Vec<String> {
        self.lock().removals.clone()
    }

    async fn pause(&self) {
        let delay = self.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn remove_now(&self, id: &str) -> runtime::Result<Removal> {
        let mut state = self.lock();
        state.removals.push(id.to_string());
        if let Some(reason) = state.remove_failure.clone() {
            return Err(RuntimeError::RemoveFailed {
                id: id.to_string(),
                reason,
            });
        }
        Ok(match state.containers.remove(id) {
            Some(_) => Removal::Removed,
            None => Removal::NotFound,
        })
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run_detached(&self, request: &RunRequest) -> runtime::Result<String> {
        self.pause().await;
        let mut state = self.lock();
        state.runs.push(request.clone());

        if let Some(reason) = state.run_failure.clone() {
            return Err(RuntimeError::ContainerCreationFailed {
                image: request.image.clone(),
                reason,
            });
        }
        if let Some(output) = state.run_output.clone() {
            return Ok(output);
        }

        let id = fake_id(state.runs.len() - 1);
        state
            .containers
            .insert(id.clone(), (request.session.clone(), false));
        Ok(format!("{id}\n"))
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> runtime::Result<ExecOutput> {
        self.pause().await;
        let mut state = self.lock();
        state.execs.push((id.to_string(), cmd.to_vec()));

        if let Some(output) = state.exec_output.clone() {
            return Ok(output);
        }

        let Some((_, initialized)) = state.containers.get_mut(id) else {
            return Err(RuntimeError::ExecFailed {
                id: id.to_string(),
                reason: "No such container".to_string(),
            });
        };
        if *initialized {
            return Ok(ExecOutput {
                exit_code: Some(1),
                output: "ERROR: Database already exists! To change configuration, don't say `new'\n"
                    .to_string(),
            });
        }
        *initialized = true;
        Ok(ExecOutput {
            exit_code: Some(0),
            output: "Database created\n".to_string(),
        })
    }

    async fn network_address(&self, id: &str, _network: &str) -> runtime::Result<String> {
        self.pause().await;
        let state = self.lock();
        if let Some(address) = state.address.clone() {
            return Ok(address);
        }
        if !state.containers.contains_key(id) {
            return Err(RuntimeError::InspectFailed {
                id: id.to_string(),
                reason: "No such container".to_string(),
            });
        }
        Ok(format!("{TEST_ADDRESS}\n"))
    }

    async fn force_remove(&self, id: &str) -> runtime::Result<Removal> {
        self.pause().await;
        self.remove_now(id)
    }

    fn force_remove_blocking(&self, id: &str) -> runtime::Result<Removal> {
        self.remove_now(id)
    }

    async fn list_instances(&self, session: &str) -> runtime::Result<Vec<String>> {
        self.pause().await;
        Ok(self
            .lock()
            .containers
            .iter()
            .filter(|(_, (owner, _))| owner == session)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[derive(Default)]
struct ConnectorState {
    open_failure: Option<String>,
    opened: Vec<PathBuf>,
}

/// Opens [`MemoryDatabase`]s from cluster files.
///
/// The cluster file is read and parsed on open, so a malformed file fails
/// here the way it would in the real client. Clones share state, including
/// the failure toggle of every database they opened.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
    failing: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every open with `reason`.
    pub fn failing_open(self, reason: impl Into<String>) -> Self {
        self.lock().open_failure = Some(reason.into());
        self
    }

    /// Toggle whether transactions on opened databases fail.
    pub fn set_failing(&self, fail: bool) {
        self.failing.store(fail, Ordering::Relaxed);
    }

    /// Cluster files opened so far.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.lock().opened.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, descriptor: &Path) -> client::Result<Arc<dyn Database>> {
        if let Some(reason) = self.lock().open_failure.clone() {
            return Err(ClientError::Open(reason));
        }

        let contents = tokio::fs::read_to_string(descriptor).await?;
        let parsed: ConnectionDescriptor = contents.parse()?;
        self.lock().opened.push(descriptor.to_path_buf());

        Ok(Arc::new(MemoryDatabase {
            descriptor: parsed,
            data: Mutex::new(BTreeMap::new()),
            failing: self.failing.clone(),
        }))
    }
}

/// Ordered in-memory key space.
pub struct MemoryDatabase {
    descriptor: ConnectionDescriptor,
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryDatabase {
    /// The cluster file this database was opened from.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn data(&self) -> client::Result<MutexGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(ClientError::Transaction(
                "transaction_too_old (1007)".to_string(),
            ));
        }
        Ok(self.data.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn get(&self, key: &[u8]) -> client::Result<Option<Vec<u8>>> {
        Ok(self.data()?.get(key).cloned())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> client::Result<()> {
        self.data()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn clear_range(&self, begin: &[u8], end: &[u8]) -> client::Result<()> {
        let mut data = self.data()?;
        if begin >= end {
            return Ok(());
        }
        data.retain(|key, _| key.as_slice() < begin || key.as_slice() >= end);
        Ok(())
    }
}
