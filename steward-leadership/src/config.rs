use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use steward_core::coordination::{ConnectionSettings, RetryPolicy};

use crate::errors::{LeadershipError, Result};
use crate::session::SessionOptions;

pub const DEFAULT_ELECTION_PATH: &str = "/steward/leader";

const ENV_COORDINATION_ADDR: &str = "STEWARD_COORDINATION_ADDR";
const ENV_CONNECTION_TIMEOUT_MS: &str = "STEWARD_CONNECTION_TIMEOUT_MS";
const ENV_SESSION_TIMEOUT_MS: &str = "STEWARD_SESSION_TIMEOUT_MS";
const ENV_CONNECTION_RETRIES: &str = "STEWARD_CONNECTION_RETRIES";
const ENV_RETRY_SLEEP_MS: &str = "STEWARD_RETRY_SLEEP_MS";
const ENV_WATCH_RETRY_INTERVAL_MS: &str = "STEWARD_WATCH_RETRY_INTERVAL_MS";
const ENV_ELECTION_PATH: &str = "STEWARD_ELECTION_PATH";
const ENV_CONTENDER_ID: &str = "STEWARD_CONTENDER_ID";
const ENV_DUTY_FAILURE_POLICY: &str = "STEWARD_DUTY_FAILURE_POLICY";

/// What the lifecycle driver does when duties fail to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutyFailurePolicy {
    /// Fail the transition only: the contender steps back and contends again.
    #[default]
    Isolate,
    /// Stop the driver and leave the election.
    Fatal,
}

impl FromStr for DutyFailurePolicy {
    type Err = LeadershipError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(DutyFailurePolicy::Isolate),
            "fatal" => Ok(DutyFailurePolicy::Fatal),
            other => Err(LeadershipError::Config(format!(
                "unknown duty failure policy {other:?}, expected isolate or fatal"
            ))),
        }
    }
}

impl fmt::Display for DutyFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DutyFailurePolicy::Isolate => f.write_str("isolate"),
            DutyFailurePolicy::Fatal => f.write_str("fatal"),
        }
    }
}

/// configuration settings loaded from the config file
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfiguration {
    /// Coordination service connection, omit for single-instance deployments
    pub coordination: Option<CoordinationNode>,
    /// Election settings for this duty type
    pub election: ElectionNode,
}

/// Coordination service section of the config file
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationNode {
    pub address: Option<String>,
    pub connection_timeout_ms: Option<u64>,
    pub session_timeout_ms: Option<u64>,
    pub retries: Option<usize>,
    pub retry_sleep_ms: Option<u64>,
}

/// Election section of the config file
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionNode {
    pub path: Option<String>,
    pub contender_id: Option<String>,
    pub watch_retry_interval_ms: Option<u64>,
    pub duty_failure_policy: Option<DutyFailurePolicy>,
}

/// Resolved election settings.
///
/// Precedence, lowest first: defaults, config file, `STEWARD_*` environment variables,
/// then whatever the caller overrides (the agent applies its CLI flags last).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    /// Absent means single-instance mode: duties start without any coordination.
    pub coordination_addr: Option<String>,
    pub connection_timeout: Duration,
    pub session_timeout: Duration,
    pub connection_retries: usize,
    pub retry_sleep: Duration,
    pub watch_retry_interval: Duration,
    pub election_path: String,
    pub contender_id: String,
    pub duty_failure_policy: DutyFailurePolicy,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            coordination_addr: None,
            connection_timeout: Duration::from_millis(15_000),
            session_timeout: Duration::from_millis(15_000),
            connection_retries: 10,
            retry_sleep: Duration::from_millis(5_000),
            watch_retry_interval: Duration::from_millis(3_000),
            election_path: DEFAULT_ELECTION_PATH.to_string(),
            contender_id: local_identity(),
            duty_failure_policy: DutyFailurePolicy::Isolate,
        }
    }
}

/// Implementing the TryFrom trait to transform LoadConfiguration into ElectionConfig
impl TryFrom<LoadConfiguration> for ElectionConfig {
    type Error = LeadershipError;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let mut resolved = ElectionConfig::default();

        if let Some(coordination) = config.coordination {
            resolved.coordination_addr = non_empty(coordination.address);
            if let Some(ms) = coordination.connection_timeout_ms {
                resolved.connection_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = coordination.session_timeout_ms {
                resolved.session_timeout = Duration::from_millis(ms);
            }
            if let Some(retries) = coordination.retries {
                resolved.connection_retries = retries;
            }
            if let Some(ms) = coordination.retry_sleep_ms {
                resolved.retry_sleep = Duration::from_millis(ms);
            }
        }

        let election = config.election;
        if let Some(path) = election.path {
            resolved.election_path = path;
        }
        if let Some(id) = non_empty(election.contender_id) {
            resolved.contender_id = id;
        }
        if let Some(ms) = election.watch_retry_interval_ms {
            resolved.watch_retry_interval = Duration::from_millis(ms);
        }
        if let Some(policy) = election.duty_failure_policy {
            resolved.duty_failure_policy = policy;
        }

        resolved.validate()?;
        Ok(resolved)
    }
}

impl ElectionConfig {
    /// Load the YAML config file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            LeadershipError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let load_config: LoadConfiguration = serde_yaml::from_str(content)
            .map_err(|err| LeadershipError::Config(format!("malformed config file: {err}")))?;
        load_config.try_into()
    }

    /// Override settings from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override settings from `lookup`, which resolves `STEWARD_*` variable names.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(ENV_COORDINATION_ADDR) {
            self.coordination_addr = non_empty(Some(addr));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_CONNECTION_TIMEOUT_MS)? {
            self.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_SESSION_TIMEOUT_MS)? {
            self.session_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var::<usize, _>(&lookup, ENV_CONNECTION_RETRIES)? {
            self.connection_retries = retries;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_RETRY_SLEEP_MS)? {
            self.retry_sleep = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_WATCH_RETRY_INTERVAL_MS)? {
            self.watch_retry_interval = Duration::from_millis(ms);
        }
        if let Some(path) = lookup(ENV_ELECTION_PATH) {
            self.election_path = path;
        }
        if let Some(id) = non_empty(lookup(ENV_CONTENDER_ID)) {
            self.contender_id = id;
        }
        if let Some(policy) = lookup(ENV_DUTY_FAILURE_POLICY) {
            self.duty_failure_policy = policy.parse()?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let path = &self.election_path;
        if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') || path.contains("//") {
            return Err(LeadershipError::Config(format!(
                "election path {path:?} must be absolute without a trailing slash"
            )));
        }
        if self.contender_id.is_empty() {
            return Err(LeadershipError::Config("contender id is empty".to_string()));
        }
        Ok(())
    }

    pub fn is_distributed(&self) -> bool {
        self.coordination_addr.is_some()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.connection_retries, self.retry_sleep)
    }

    /// Options for joining the election, `None` in single-instance mode.
    pub fn session_options(&self) -> Option<SessionOptions> {
        let address = self.coordination_addr.clone()?;
        Some(SessionOptions {
            identity: self.contender_id.clone(),
            election_path: self.election_path.clone(),
            connection: ConnectionSettings {
                address,
                connection_timeout: self.connection_timeout,
                session_timeout: self.session_timeout,
            },
            retry: self.retry_policy(),
            watch_retry_interval: self.watch_retry_interval,
        })
    }
}

/// `<hostname>/<pid>`, the identity a contender advertises by default.
pub fn local_identity() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}/{}", host, std::process::id())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LeadershipError::Config(format!("{key} has an invalid value {raw:?}"))),
    }
}
