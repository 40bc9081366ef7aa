//! Starts the database container.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Phase, Result, within};
use crate::instance::InstanceId;
use crate::runtime::{ContainerRuntime, RunRequest};

/// Start a detached, self-removing container from the configured image.
///
/// The identifier the runtime reports must be a single full-length id.
/// Anything else is a [`HarnessError::Launch`]; nothing is retried, the
/// runtime's auto-remove is the backstop for a container that did start.
pub async fn launch(
    runtime: &dyn ContainerRuntime,
    config: &HarnessConfig,
    session: &str,
) -> Result<InstanceId> {
    let request = RunRequest {
        image: config.image(),
        session: session.to_string(),
        auto_pull: config.auto_pull,
    };

    log_command!(config.verbose, "+docker run --rm --detach {}", request.image);

    let raw = within(Phase::Launch, config.timeouts.launch, async {
        runtime
            .run_detached(&request)
            .await
            .map_err(|e| HarnessError::Launch {
                image: request.image.clone(),
                reason: e.to_string(),
                output: String::new(),
            })
    })
    .await?;

    log_command!(config.verbose, "{}", raw.trim());

    let id = raw.parse::<InstanceId>().map_err(|e| HarnessError::Launch {
        image: request.image.clone(),
        reason: format!("invalid container id in output: {e}"),
        output: raw.clone(),
    })?;

    tracing::info!(
        container = %id,
        image = %request.image,
        "foundationdb container started: {}",
        id.as_str()
    );
    Ok(id)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::PhaseTimeouts;
    use crate::testing::{FakeRuntime, TEST_INSTANCE_ID};

    #[tokio::test]
    async fn test_launch_parses_full_id() {
        let runtime = FakeRuntime::new();
        let id = launch(&runtime, &HarnessConfig::default(), "s1")
            .await
            .unwrap();

        assert_eq!(id.as_str(), TEST_INSTANCE_ID);
        let runs = runtime.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].image, "foundationdb/foundationdb:7.3.43");
        assert_eq!(runs[0].session, "s1");
    }

    #[tokio::test]
    async fn test_launch_uses_configured_version() {
        let runtime = FakeRuntime::new();
        let config = HarnessConfig::default().with_version("7.1.61");
        launch(&runtime, &config, "s1").await.unwrap();
        assert_eq!(runtime.runs()[0].image, "foundationdb/foundationdb:7.1.61");
    }

    #[tokio::test]
    async fn test_launch_rejects_malformed_ids() {
        for output in ["", "abc123", "deadbeef deadbeef"] {
            let runtime = FakeRuntime::new().with_run_output(output);
            let err = launch(&runtime, &HarnessConfig::default(), "s1")
                .await
                .unwrap_err();
            match err {
                HarnessError::Launch { output: raw, .. } => assert_eq!(raw, output),
                other => panic!("expected launch error for {output:?}, got {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_launch_runtime_failure() {
        let runtime = FakeRuntime::new().failing_run("image not found");
        let err = launch(&runtime, &HarnessConfig::default(), "s1")
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Launch));
        assert!(err.to_string().contains("image not found"));
    }

    #[tokio::test]
    async fn test_launch_timeout() {
        let runtime = FakeRuntime::new().with_delay(Duration::from_secs(5));
        let config = HarnessConfig::default().with_timeouts(PhaseTimeouts {
            launch: Duration::from_millis(20),
            ..Default::default()
        });
        let err = launch(&runtime, &config, "s1").await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Timeout {
                phase: Phase::Launch,
                ..
            }
        ));
    }
}
