//! Container runtime seam.
//!
//! The lifecycle only needs five things from a container runtime: start a
//! detached, self-removing container; exec a command in it; read its address
//! on a network; force-remove it; and list the containers a session owns.
//! [`DockerRuntime`] implements these against the Docker Engine API.
//! [`crate::testing::FakeRuntime`] implements them in memory.

pub mod docker;

use async_trait::async_trait;

use crate::error::RuntimeError;

pub use docker::{DockerRuntime, connect_docker};

/// Result type for runtime calls.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Label set on every container the harness starts.
pub const MANAGED_LABEL: &str = "fdbtest.managed";
/// Label carrying the owning handle's session id.
pub const SESSION_LABEL: &str = "fdbtest.session";

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Image reference, `repository:tag`.
    pub image: String,
    /// Session id written to [`SESSION_LABEL`].
    pub session: String,
    /// Pull the image first if it is missing locally.
    pub auto_pull: bool,
}

impl RunRequest {
    /// Labels applied to the container.
    pub fn labels(&self) -> Vec<(String, String)> {
        vec![
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (SESSION_LABEL.to_string(), self.session.clone()),
        ]
    }
}

/// Output of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, if the runtime reported one.
    pub exit_code: Option<i64>,
    /// Interleaved stdout and stderr.
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Outcome of a force removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The container existed and was removed.
    Removed,
    /// The runtime no longer knew the container.
    NotFound,
}

/// Operations the lifecycle needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a detached container that removes itself when it exits.
    ///
    /// Returns the raw identifier text exactly as the runtime reported it;
    /// validation is the launcher's job.
    async fn run_detached(&self, request: &RunRequest) -> Result<String>;

    /// Run a command inside a running container and capture its output.
    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput>;

    /// Raw address of the container on `network`, empty if it has none.
    async fn network_address(&self, id: &str, network: &str) -> Result<String>;

    /// Kill and remove the container.
    async fn force_remove(&self, id: &str) -> Result<Removal>;

    /// Blocking variant of [`force_remove`](Self::force_remove) for use from
    /// `Drop`, where no executor can be awaited.
    fn force_remove_blocking(&self, id: &str) -> Result<Removal>;

    /// Full ids of running containers labelled with `session`.
    async fn list_instances(&self, session: &str) -> Result<Vec<String>>;
}
