//! Configuration types for rar-hunter
//!
//! Every section has sensible defaults, so an empty TOML file (or
//! `Config::default()`) is a valid configuration:
//!
//! ```toml
//! [bus]
//! workers = 4
//! job_timeout = 30
//! publish_timeout = "500ms"
//!
//! [tools]
//! unrar_path = "/usr/bin/unrar"
//!
//! [runner]
//! max_concurrent = 2
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Event bus settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of each job queue (default: 100)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of dispatch workers (default: 1)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deadline shared by all handlers of one job (default: 30 seconds)
    #[serde(default = "default_job_timeout", with = "duration_serde")]
    pub job_timeout: Duration,

    /// How long `publish_wait` waits for queue capacity (default: 5 seconds)
    #[serde(default = "default_publish_timeout", with = "duration_serde")]
    pub publish_timeout: Duration,

    /// Route each event kind to a fixed worker so dispatch order per kind
    /// matches enqueue order (default: false)
    #[serde(default)]
    pub partition_by_kind: bool,

    /// Publish a `DispatchFailed` event for every failing handler (default: false)
    #[serde(default)]
    pub report_handler_failures: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            job_timeout: default_job_timeout(),
            publish_timeout: default_publish_timeout(),
            partition_by_kind: false,
            report_handler_failures: false,
        }
    }
}

/// External archiver settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to unrar executable (auto-detected if None)
    #[serde(default)]
    pub unrar_path: Option<PathBuf>,

    /// Whether to search PATH for unrar if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Arguments placed before the archive name when extracting (default: `e -o-`)
    #[serde(default = "default_extract_args")]
    pub extract_args: Vec<String>,

    /// Arguments placed before the archive path when listing contents (default: `lb`)
    #[serde(default = "default_list_args")]
    pub list_args: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            unrar_path: None,
            search_path: true,
            extract_args: default_extract_args(),
            list_args: default_list_args(),
        }
    }
}

/// Process runner settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum archivers running at once (None = one per target)
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Give up collecting results after this long (None = wait forever)
    ///
    /// Targets that have not reported by then are killed and recorded as failed.
    #[serde(default, with = "duration_serde::option")]
    pub collect_timeout: Option<Duration>,
}

/// Directory discovery and validation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HuntConfig {
    /// Extension of the checksum manifest, without the dot (default: "sfv")
    #[serde(default = "default_manifest_ext")]
    pub manifest_ext: String,

    /// Extension of the archive to extract, without the dot (default: "rar")
    #[serde(default = "default_archive_ext")]
    pub archive_ext: String,

    /// Longest wait for the next directory verdict (default: 120 seconds)
    #[serde(default = "default_verdict_timeout", with = "duration_serde")]
    pub verdict_timeout: Duration,

    /// Bound on draining and stopping the bus at the end of a hunt (default: 5 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Report candidates without running the archiver (default: false)
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for HuntConfig {
    fn default() -> Self {
        Self {
            manifest_ext: default_manifest_ext(),
            archive_ext: default_archive_ext(),
            verdict_timeout: default_verdict_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            dry_run: false,
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Event bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// External archiver settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Process runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Discovery and validation settings
    #[serde(default)]
    pub hunt: HuntConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })
    }

    /// Check settings that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.bus.workers == 0 {
            return Err(Error::config("must be at least 1", "bus.workers"));
        }
        if self.bus.queue_capacity == 0 {
            return Err(Error::config("must be at least 1", "bus.queue_capacity"));
        }
        if self.bus.job_timeout.is_zero() {
            return Err(Error::config("must be greater than zero", "bus.job_timeout"));
        }
        if self.runner.max_concurrent == Some(0) {
            return Err(Error::config(
                "must be at least 1 (omit for no limit)",
                "runner.max_concurrent",
            ));
        }
        if self.tools.extract_args.iter().any(|a| a.is_empty()) {
            return Err(Error::config(
                "arguments must not be empty strings",
                "tools.extract_args",
            ));
        }
        for (key, ext) in [
            ("hunt.manifest_ext", &self.hunt.manifest_ext),
            ("hunt.archive_ext", &self.hunt.archive_ext),
        ] {
            if ext.is_empty() || ext.starts_with('.') {
                return Err(Error::config(
                    "must be a non-empty extension without the leading dot",
                    key,
                ));
            }
        }
        Ok(())
    }
}

fn default_queue_capacity() -> usize {
    100
}

fn default_workers() -> usize {
    1
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_extract_args() -> Vec<String> {
    vec!["e".to_string(), "-o-".to_string()]
}

fn default_list_args() -> Vec<String> {
    vec!["lb".to_string()]
}

fn default_manifest_ext() -> String {
    "sfv".to_string()
}

fn default_archive_ext() -> String {
    "rar".to_string()
}

fn default_verdict_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Durations in config files: whole seconds (`30`) or a number with a unit
/// suffix (`"250ms"`, `"30s"`, `"2m"`, `"1h"`). Sub-second bus timeouts need
/// the suffixed form.
mod duration_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Deserialize, Serialize)]
    #[serde(untagged)]
    enum Repr {
        Seconds(u64),
        Text(String),
    }

    impl Repr {
        fn from_duration(duration: Duration) -> Self {
            if duration.subsec_nanos() == 0 {
                Repr::Seconds(duration.as_secs())
            } else {
                Repr::Text(format!("{}ms", duration.as_millis()))
            }
        }

        fn into_duration(self) -> Result<Duration, String> {
            match self {
                Repr::Seconds(secs) => Ok(Duration::from_secs(secs)),
                Repr::Text(text) => parse(&text),
            }
        }
    }

    pub(super) fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let value: u64 = number
            .parse()
            .map_err(|_| format!("invalid duration {text:?}, expected e.g. 30, \"30s\" or \"250ms\""))?;
        match unit.trim() {
            "ms" => Ok(Duration::from_millis(value)),
            "" | "s" => Ok(Duration::from_secs(value)),
            "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
            "h" => Ok(Duration::from_secs(value.saturating_mul(3600))),
            other => Err(format!("unknown duration unit {other:?} in {text:?}")),
        }
    }

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        Repr::from_duration(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Repr::deserialize(deserializer)?
            .into_duration()
            .map_err(D::Error::custom)
    }

    /// Same format for optional settings; absent means no limit
    pub mod option {
        use super::Repr;
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            duration.map(Repr::from_duration).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<Repr>::deserialize(deserializer)?
                .map(Repr::into_duration)
                .transpose()
                .map_err(D::Error::custom)
        }
    }
}
