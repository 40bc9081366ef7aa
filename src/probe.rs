//! Readiness probe: creates the database inside a fresh container.
//!
//! `configure new` only succeeds once. Running it against an initialized
//! cluster prints a different message, which is reported as a failure.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Phase, Result, within};
use crate::instance::InstanceId;
use crate::runtime::ContainerRuntime;

/// Run the init command in `id` and require the ready marker in its output.
///
/// Returns the command output on success.
pub async fn initialize(
    runtime: &dyn ContainerRuntime,
    config: &HarnessConfig,
    id: &InstanceId,
) -> Result<String> {
    let cmd = config.init_command();
    log_command!(config.verbose, "+docker exec {} {:?}", id.as_str(), cmd);

    let result = within(Phase::Initialize, config.timeouts.initialize, async {
        runtime
            .exec(id.as_str(), &cmd)
            .await
            .map_err(|e| HarnessError::Initialization {
                instance: id.short().to_string(),
                reason: e.to_string(),
                output: String::new(),
            })
    })
    .await?;

    if !result.success() {
        tracing::warn!(
            container = %id,
            exit_code = ?result.exit_code,
            "initialize database error:\n{}",
            result.output
        );
        return Err(HarnessError::Initialization {
            instance: id.short().to_string(),
            reason: match result.exit_code {
                Some(code) => format!("init command exited with {code}"),
                None => "init command reported no exit code".to_string(),
            },
            output: result.output,
        });
    }

    if !result.output.contains(&config.ready_marker) {
        return Err(HarnessError::Initialization {
            instance: id.short().to_string(),
            reason: format!(
                "unexpected configure database output, missing '{}'",
                config.ready_marker
            ),
            output: result.output,
        });
    }

    log_command!(
        config.verbose,
        "database initialize command succeeded: {}",
        result.output.trim()
    );
    Ok(result.output)
}
