//! Error types for the test-database harness.

use std::path::PathBuf;
use std::time::Duration;

use crate::server::LifecycleState;

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// The phase of `ServerHandle::start` (or teardown) an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Launch,
    Initialize,
    Discover,
    WriteDescriptor,
    Open,
    Clear,
    Teardown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Launch => "launch",
            Phase::Initialize => "initialize",
            Phase::Discover => "discover",
            Phase::WriteDescriptor => "write descriptor",
            Phase::Open => "open",
            Phase::Clear => "clear",
            Phase::Teardown => "teardown",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the server lifecycle.
///
/// Every `start` phase has its own variant so callers can tell which step
/// broke. Variants that follow a runtime command keep its raw output.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The container failed to start or reported a malformed identifier.
    #[error("launch failed for image '{image}': {reason}")]
    Launch {
        image: String,
        reason: String,
        /// Raw launcher output, if any was captured.
        output: String,
    },

    /// The `configure new` command failed or printed something unexpected.
    #[error("database initialization failed in container {instance}: {reason}\n{output}")]
    Initialization {
        instance: String,
        reason: String,
        output: String,
    },

    /// The container address lookup failed or returned garbage.
    #[error("network discovery failed for container {instance}: {reason}")]
    NetworkDiscovery {
        instance: String,
        reason: String,
        output: String,
    },

    /// The cluster file could not be created or written.
    #[error("failed to write cluster file {}: {source}", path.display())]
    DescriptorWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The client library refused the cluster file.
    #[error("failed to open database from {}: {source}", path.display())]
    ClientOpen {
        path: PathBuf,
        #[source]
        source: ClientError,
    },

    /// Removing the container failed.
    #[error("teardown of container {instance} failed: {reason}")]
    Teardown { instance: String, reason: String },

    /// An external call did not answer in time.
    #[error("{phase} timed out after {timeout:?}")]
    Timeout { phase: Phase, timeout: Duration },

    /// The operation is not valid in the handle's current state.
    #[error("cannot {operation} a server handle that is {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// A transaction issued by the harness itself failed.
    #[error("transaction failed: {0}")]
    Transaction(#[source] ClientError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HarnessError {
    /// The lifecycle phase this error belongs to, if it belongs to one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            HarnessError::Launch { .. } => Some(Phase::Launch),
            HarnessError::Initialization { .. } => Some(Phase::Initialize),
            HarnessError::NetworkDiscovery { .. } => Some(Phase::Discover),
            HarnessError::DescriptorWrite { .. } => Some(Phase::WriteDescriptor),
            HarnessError::ClientOpen { .. } => Some(Phase::Open),
            HarnessError::Teardown { .. } => Some(Phase::Teardown),
            HarnessError::Timeout { phase, .. } => Some(*phase),
            HarnessError::Transaction(_) => Some(Phase::Clear),
            HarnessError::InvalidState { .. } | HarnessError::Config(_) => None,
        }
    }
}

/// Run `fut` with a deadline, mapping expiry to [`HarnessError::Timeout`].
pub(crate) async fn within<T, F>(phase: Phase, timeout: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| HarnessError::Timeout { phase, timeout })?
}

/// Errors talking to the container runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Docker not available: {reason}")]
    DockerNotAvailable { reason: String },

    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("Failed to create container from '{image}': {reason}")]
    ContainerCreationFailed { image: String, reason: String },

    #[error("Failed to start container {id}: {reason}")]
    ContainerStartFailed { id: String, reason: String },

    #[error("exec in container {id} failed: {reason}")]
    ExecFailed { id: String, reason: String },

    #[error("inspect of container {id} failed: {reason}")]
    InspectFailed { id: String, reason: String },

    #[error("removal of container {id} failed: {reason}")]
    RemoveFailed { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the database client library.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid cluster file: {0}")]
    InvalidDescriptor(String),

    #[error("client open failed: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
