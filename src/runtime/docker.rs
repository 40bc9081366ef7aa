//! Docker Engine implementation of [`ContainerRuntime`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::{StreamExt, TryStreamExt};

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, ExecOutput, Removal, Result, RunRequest, SESSION_LABEL};

/// Connect to the local Docker daemon.
///
/// Tries bollard's defaults first (`DOCKER_HOST` or `/var/run/docker.sock`),
/// then the Docker Desktop socket under the home directory and the rootless
/// socket under the runtime directory.
pub async fn connect_docker() -> Result<Docker> {
    let mut last_error = match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    #[cfg(unix)]
    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let Some(path) = socket.to_str() else {
            continue;
        };
        match Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION) {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker via {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = e.to_string(),
            },
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(RuntimeError::DockerNotAvailable { reason: last_error })
}

#[cfg(unix)]
fn fallback_sockets() -> Vec<std::path::PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker/run/docker.sock"));
    }
    if let Some(runtime) = dirs::runtime_dir() {
        sockets.push(runtime.join("docker.sock"));
    }
    sockets
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// A removal that is already running (auto-remove racing a force remove)
/// ends with the container gone as well.
fn is_removal_in_progress(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code: 409, message }
            if message.contains("already in progress")
    )
}

async fn remove_with(docker: &Docker, id: &str) -> Result<Removal> {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    match docker.remove_container(id, Some(options)).await {
        Ok(()) => Ok(Removal::Removed),
        Err(e) if is_not_found(&e) || is_removal_in_progress(&e) => Ok(Removal::NotFound),
        Err(e) => Err(RuntimeError::RemoveFailed {
            id: id.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Docker-backed container runtime.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    blocking_timeout: Duration,
}

impl DockerRuntime {
    /// Wrap an existing connection.
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            blocking_timeout: Duration::from_secs(30),
        }
    }

    /// Connect to the local daemon.
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(connect_docker().await?))
    }

    /// Bound on [`ContainerRuntime::force_remove_blocking`].
    pub fn with_blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = timeout;
        self
    }

    /// Pull `image` unless the daemon already has it. Returns whether a
    /// pull ran.
    async fn ensure_image(&self, image: &str) -> std::result::Result<bool, BollardError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(false),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e),
        }

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_for_each(|progress| {
                if let Some(status) = progress.status {
                    tracing::trace!(image, "{}", status);
                }
                futures::future::ok(())
            })
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run_detached(&self, request: &RunRequest) -> Result<String> {
        if request.auto_pull {
            let pulled = self.ensure_image(&request.image).await.map_err(|e| {
                RuntimeError::ImagePullFailed {
                    image: request.image.clone(),
                    reason: e.to_string(),
                }
            })?;
            if pulled {
                tracing::info!(image = %request.image, "pulled foundationdb image");
            }
        }

        let host_config = HostConfig {
            auto_remove: Some(true),
            ..Default::default()
        };
        let config = Config {
            image: Some(request.image.clone()),
            labels: Some(request.labels().into_iter().collect()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| RuntimeError::ContainerCreationFailed {
                image: request.image.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // auto-remove only fires for containers that ran; clean up the
            // created-but-never-started one here
            let _ = remove_with(&self.docker, &created.id).await;
            return Err(RuntimeError::ContainerStartFailed {
                id: created.id,
                reason: e.to_string(),
            });
        }

        Ok(created.id)
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput> {
        let exec_failed = |e: BollardError| RuntimeError::ExecFailed {
            id: id.to_string(),
            reason: e.to_string(),
        };

        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(exec_failed)?;

        let mut output = Vec::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(exec_failed)?
        {
            StartExecResults::Attached {
                output: mut stream, ..
            } => {
                while let Some(chunk) = stream.next().await {
                    output.extend_from_slice(&chunk.map_err(exec_failed)?.into_bytes());
                }
            }
            StartExecResults::Detached => {
                return Err(RuntimeError::ExecFailed {
                    id: id.to_string(),
                    reason: "exec started detached, no output attached".to_string(),
                });
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(exec_failed)?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code,
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }

    async fn network_address(&self, id: &str, network: &str) -> Result<String> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| RuntimeError::InspectFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(info
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|mut networks| networks.remove(network))
            .and_then(|endpoint| endpoint.ip_address)
            .unwrap_or_default())
    }

    async fn force_remove(&self, id: &str) -> Result<Removal> {
        remove_with(&self.docker, id).await
    }

    fn force_remove_blocking(&self, id: &str) -> Result<Removal> {
        // The pooled connection may belong to the runtime that is dropping
        // us, so use a private runtime and a fresh connection.
        let id = id.to_string();
        let timeout = self.blocking_timeout;
        let worker = std::thread::spawn(move || -> Result<Removal> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(async {
                let docker = connect_docker().await?;
                tokio::time::timeout(timeout, remove_with(&docker, &id))
                    .await
                    .map_err(|_| RuntimeError::RemoveFailed {
                        id: id.clone(),
                        reason: format!("timed out after {timeout:?}"),
                    })?
            })
        });

        worker.join().map_err(|_| RuntimeError::RemoveFailed {
            id: String::new(),
            reason: "removal thread panicked".to_string(),
        })?
    }

    async fn list_instances(&self, session: &str) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{SESSION_LABEL}={session}")],
        );
        let options = ListContainersOptions {
            all: false,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::InspectFailed {
                id: session.to_string(),
                reason: e.to_string(),
            })?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let gone = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        assert!(is_not_found(&gone));

        let racing = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "removal of container abc is already in progress".to_string(),
        };
        assert!(!is_not_found(&racing));
        assert!(is_removal_in_progress(&racing));

        let conflict = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "container is paused".to_string(),
        };
        assert!(!is_removal_in_progress(&conflict));
    }

    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn test_ensure_image_pulls_once() {
        let runtime = DockerRuntime::connect().await.unwrap();
        let image = crate::config::HarnessConfig::default().image();

        runtime.ensure_image(&image).await.unwrap();
        assert!(!runtime.ensure_image(&image).await.unwrap());

        let err = runtime
            .ensure_image("fdbtest/does-not-exist:0")
            .await
            .unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_fallback_sockets_are_socket_paths() {
        for socket in fallback_sockets() {
            assert!(socket.ends_with("docker.sock"));
        }
    }
}
