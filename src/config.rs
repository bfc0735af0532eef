//! Suite configuration.
//!
//! Loaded from `r2r.yaml` (or `r2r.toml`) in the test root. Every field has a
//! default, so the file is optional.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum number of subject processes in flight at once.
pub const DEFAULT_JOBS: usize = 8;

/// Hard timeout for fuzz executions, in seconds.
pub const DEFAULT_FUZZ_TIMEOUT_SECS: u64 = 60;

/// Suite-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    /// Schema version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Subject executable to test (looked up in PATH when not a path).
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Maximum number of concurrently running subject processes.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Pass commands through a scratch script file (`-i`) instead of inline (`-c`).
    #[serde(default = "default_true")]
    pub use_script: bool,

    /// Timeout in seconds for fuzz executions.
    #[serde(default = "default_fuzz_timeout")]
    pub fuzz_timeout: u64,

    /// Sample files every structural-output (JSON) command runs against.
    #[serde(default = "default_json_samples")]
    pub json_samples: Vec<String>,

    /// Environment variables set to `1` to disable plugin loading in the subject.
    #[serde(default = "default_plugin_env")]
    pub plugin_env: Vec<String>,

    /// Directory against which `FILE=` values starting with `.` are resolved.
    /// Defaults to the directory containing the config file.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            subject: default_subject(),
            jobs: default_jobs(),
            use_script: true,
            fuzz_timeout: default_fuzz_timeout(),
            json_samples: default_json_samples(),
            plugin_env: default_plugin_env(),
            root: None,
        }
    }
}

impl SuiteConfig {
    pub fn fuzz_timeout(&self) -> Duration {
        Duration::from_secs(self.fuzz_timeout)
    }
}

fn default_version() -> u32 {
    1
}

fn default_subject() -> String {
    "radare2".to_string()
}

fn default_jobs() -> usize {
    DEFAULT_JOBS
}

fn default_true() -> bool {
    true
}

fn default_fuzz_timeout() -> u64 {
    DEFAULT_FUZZ_TIMEOUT_SECS
}

fn default_json_samples() -> Vec<String> {
    [
        "bins/elf/crackme0x00b",
        "bins/pe/version_std.exe",
        "bins/mach0/hello-objc-osx",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_plugin_env() -> Vec<String> {
    ["R2_NOPLUGINS", "RABIN2_NOPLUGINS", "RASM2_NOPLUGINS"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Generate the JSON Schema for the suite configuration file.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(SuiteConfig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_uses_defaults() {
        let config: SuiteConfig = serde_yaml::from_str("version: 1\n").unwrap();
        assert_eq!(config.subject, "radare2");
        assert_eq!(config.jobs, DEFAULT_JOBS);
        assert!(config.use_script);
        assert_eq!(config.fuzz_timeout(), Duration::from_secs(60));
        assert_eq!(config.json_samples.len(), 3);
        assert!(config.plugin_env.contains(&"R2_NOPLUGINS".to_string()));
        assert!(config.root.is_none());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
version: 1
subject: /opt/r2/bin/radare2
jobs: 2
use_script: false
fuzz_timeout: 5
json_samples: [bins/a]
plugin_env: []
root: /src/r2-regressions
"#;
        let config: SuiteConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.subject, "/opt/r2/bin/radare2");
        assert_eq!(config.jobs, 2);
        assert!(!config.use_script);
        assert_eq!(config.fuzz_timeout, 5);
        assert_eq!(config.json_samples, vec!["bins/a"]);
        assert!(config.plugin_env.is_empty());
        assert_eq!(config.root, Some(PathBuf::from("/src/r2-regressions")));
    }

    #[test]
    fn parse_toml() {
        let config: SuiteConfig = toml::from_str("subject = \"r2\"\njobs = 4\n").unwrap();
        assert_eq!(config.subject, "r2");
        assert_eq!(config.jobs, 4);
        assert_eq!(config.version, 1);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_yaml::from_str::<SuiteConfig>("bogus: 1\n").is_err());
    }

    #[test]
    fn schema_names_fields() {
        let schema = serde_json::to_string(&generate_schema()).unwrap();
        assert!(schema.contains("json_samples"));
        assert!(schema.contains("plugin_env"));
    }
}
