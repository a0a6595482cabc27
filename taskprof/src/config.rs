use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "taskprof.toml";
const ENV_CONFIG_PATH: &str = "TASKPROF_CONFIG";

/// Tool configuration. The file carries the Chrome-trace content toggles
/// that the command line does not expose; command-line options override it.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Directory holding the binary trace files.
    #[serde(default = "default_input")]
    pub input: PathBuf,
    /// Prefix for every emitted artifact.
    #[serde(default = "default_output")]
    pub output: String,
    /// Terminal progress display.
    #[serde(default)]
    pub progress: bool,
    /// Dump the repaired record log and the blocked-tasks log.
    #[serde(default)]
    pub records: bool,
    /// Emit one Chrome-trace duration event per schedule pair.
    #[serde(default = "default_schedule")]
    pub schedule: bool,
    /// Emit creation/deletion events and their control arrows.
    #[serde(default)]
    pub creation: bool,
    /// Emit dependency arrows between schedule lanes.
    #[serde(default)]
    pub dependencies: bool,
    /// Emit send/recv arrows between ranks.
    #[serde(default)]
    pub communications: bool,
    /// Color schedule events from the task's color index.
    #[serde(default)]
    pub color: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: default_input(),
            output: default_output(),
            progress: false,
            records: false,
            schedule: default_schedule(),
            creation: false,
            dependencies: false,
            communications: false,
            color: false,
        }
    }
}

fn default_input() -> PathBuf {
    PathBuf::from("traces")
}

fn default_output() -> String {
    "traces".to_string()
}

fn default_schedule() -> bool {
    true
}

impl Config {
    /// Load configuration from file. The path can be overridden with the
    /// `TASKPROF_CONFIG` environment variable. If the file is missing or
    /// fails to parse, defaults are returned.
    pub fn load() -> Self {
        let path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        match fs::read_to_string(PathBuf::from(path)) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }

    /// Path of an emitted artifact: `<prefix><suffix>`.
    pub fn artifact(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.output, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_config_defaults() {
        let toml = r#"
input = "run/traces"
output = "run/out"
dependencies = true
"#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.input, PathBuf::from("run/traces"));
        assert_eq!(cfg.output, "run/out");
        assert!(cfg.schedule);
        assert!(cfg.dependencies);
        assert!(!cfg.communications);
        assert!(!cfg.progress);
    }

    #[test]
    fn env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "communications = true").unwrap();
        std::env::set_var(ENV_CONFIG_PATH, file.path());
        let cfg = Config::load();
        assert!(cfg.communications);
        std::env::remove_var(ENV_CONFIG_PATH);
    }

    #[test]
    fn artifact_paths_share_the_prefix() {
        let cfg = Config {
            output: "out/run1".into(),
            ..Config::default()
        };
        assert_eq!(cfg.artifact("-stats.json"), PathBuf::from("out/run1-stats.json"));
        assert_eq!(cfg.artifact(".json"), PathBuf::from("out/run1.json"));
    }
}
