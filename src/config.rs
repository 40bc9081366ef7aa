//! Harness configuration.
//!
//! Defaults pin a known-good FoundationDB release: the readiness marker
//! printed by `fdbcli` differs between versions, so a floating tag is not
//! safe. Every field can be overridden through `FDBTEST_*` environment
//! variables (optionally loaded from a `.env` file).

use std::time::Duration;

use crate::error::ConfigError;

/// Pinned FoundationDB server version.
pub const DEFAULT_VERSION: &str = "7.3.43";
/// Image repository the server version is pulled from.
pub const DEFAULT_IMAGE_REPOSITORY: &str = "foundationdb/foundationdb";
/// Credential pair the official image writes into its own cluster file.
pub const DEFAULT_CREDENTIALS: &str = "docker:docker";
/// Default coordination port of `fdbserver`.
pub const DEFAULT_PORT: u16 = 4500;
/// Substring `fdbcli` prints after a successful `configure new`.
pub const DEFAULT_READY_MARKER: &str = "Database created";

/// Per-phase bounds on external calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    /// Image pull, container create and start.
    pub launch: Duration,
    /// The `configure new` exec.
    pub initialize: Duration,
    /// Container inspect for the bridge address.
    pub discover: Duration,
    /// Client library open.
    pub open: Duration,
    /// Force removal.
    pub teardown: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            launch: Duration::from_secs(300),
            initialize: Duration::from_secs(60),
            discover: Duration::from_secs(30),
            open: Duration::from_secs(30),
            teardown: Duration::from_secs(30),
        }
    }
}

/// Configuration for one test database instance.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Image repository (without tag).
    pub image_repository: String,
    /// Server version, used as the image tag.
    pub version: String,
    /// `user:password` written in front of the address in the cluster file.
    pub credentials: String,
    /// Port written into the cluster file.
    pub port: u16,
    /// Docker network whose address clients connect to.
    pub network: String,
    /// Redundancy mode passed to `configure new`.
    pub redundancy: String,
    /// Storage engine passed to `configure new`.
    pub storage_engine: String,
    /// Output substring that confirms initialization.
    pub ready_marker: String,
    /// Pull the image if it is not present locally.
    pub auto_pull: bool,
    /// Leave the container running when the handle is dropped (for debugging).
    pub keep_on_drop: bool,
    /// Log every runtime command and its raw output at info level.
    pub verbose: bool,
    pub timeouts: PhaseTimeouts,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            image_repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            version: DEFAULT_VERSION.to_string(),
            credentials: DEFAULT_CREDENTIALS.to_string(),
            port: DEFAULT_PORT,
            network: "bridge".to_string(),
            redundancy: "single".to_string(),
            storage_engine: "ssd".to_string(),
            ready_marker: DEFAULT_READY_MARKER.to_string(),
            auto_pull: true,
            keep_on_drop: false,
            verbose: false,
            timeouts: PhaseTimeouts::default(),
        }
    }
}

impl HarnessConfig {
    /// Resolve configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn resolve() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::resolve_from(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary key lookup.
    pub fn resolve_from<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let defaults = Self::default();
        let default_timeouts = defaults.timeouts;

        Ok(Self {
            image_repository: env
                .string("FDBTEST_IMAGE_REPOSITORY")
                .unwrap_or(defaults.image_repository),
            version: env.string("FDBTEST_VERSION").unwrap_or(defaults.version),
            credentials: env
                .string("FDBTEST_CREDENTIALS")
                .unwrap_or(defaults.credentials),
            port: env.parse("FDBTEST_PORT", defaults.port)?,
            network: env.string("FDBTEST_NETWORK").unwrap_or(defaults.network),
            redundancy: env
                .string("FDBTEST_REDUNDANCY")
                .unwrap_or(defaults.redundancy),
            storage_engine: env
                .string("FDBTEST_STORAGE_ENGINE")
                .unwrap_or(defaults.storage_engine),
            ready_marker: defaults.ready_marker,
            auto_pull: env.bool("FDBTEST_AUTO_PULL", defaults.auto_pull)?,
            keep_on_drop: env.bool("FDBTEST_KEEP_ON_DROP", defaults.keep_on_drop)?,
            verbose: env.bool("FDBTEST_VERBOSE", defaults.verbose)?,
            timeouts: PhaseTimeouts {
                launch: env.secs("FDBTEST_LAUNCH_TIMEOUT_SECS", default_timeouts.launch)?,
                initialize: env.secs("FDBTEST_INIT_TIMEOUT_SECS", default_timeouts.initialize)?,
                discover: env.secs("FDBTEST_DISCOVER_TIMEOUT_SECS", default_timeouts.discover)?,
                open: env.secs("FDBTEST_OPEN_TIMEOUT_SECS", default_timeouts.open)?,
                teardown: env.secs("FDBTEST_TEARDOWN_TIMEOUT_SECS", default_timeouts.teardown)?,
            },
        })
    }

    /// Full image reference, `repository:version`.
    pub fn image(&self) -> String {
        format!("{}:{}", self.image_repository, self.version)
    }

    /// Command run inside the container to create the database.
    pub fn init_command(&self) -> Vec<String> {
        vec![
            "fdbcli".to_string(),
            "--exec".to_string(),
            format!("configure new {} {}", self.redundancy, self.storage_engine),
        ]
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = credentials.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_keep_on_drop(mut self, keep: bool) -> Self {
        self.keep_on_drop = keep;
        self
    }

    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Typed accessors over a key lookup. Empty values count as unset.
struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
            None => Ok(default),
        }
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key) {
            Some(raw) => match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("must be 'true' or 'false', got '{raw}'"),
                }),
            },
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.parse(key, default.as_secs())?;
        if secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: "timeout must be at least one second".to_string(),
            });
        }
        Ok(Duration::from_secs(secs))
    }
}
