//! Configuration vault – reads/writes `~/.handlink/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use handlink_controller::{ControllerConfig, HAND_DOF_COUNT};
use handlink_types::HandError;
use serde::{Deserialize, Serialize};

/// Persisted link configuration. Every field has a default, so a partial
/// file (or none at all) is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket URL of the `rosbridge_server` in front of the hand driver.
    #[serde(default = "default_rosbridge_url")]
    pub rosbridge_url: String,

    /// ROS namespace of the hand driver (`/<namespace>/handstate`, …).
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Robot DOFs driven by the hand, in the driver's finger order.
    #[serde(default = "default_dof_indices")]
    pub dof_indices: Vec<usize>,

    /// Number of DOFs of the simulated robot.
    #[serde(default = "default_robot_dof_count")]
    pub robot_dof_count: usize,

    /// Upper bound on a remote call in milliseconds; `0` waits forever.
    #[serde(default)]
    pub call_timeout_ms: u64,

    /// Host loop rate.
    #[serde(default = "default_step_hz")]
    pub step_hz: u32,
}

fn default_rosbridge_url() -> String {
    "ws://localhost:9090".to_string()
}
fn default_namespace() -> String {
    "bhd".to_string()
}
fn default_dof_indices() -> Vec<usize> {
    (0..HAND_DOF_COUNT).collect()
}
fn default_robot_dof_count() -> usize {
    HAND_DOF_COUNT
}
fn default_step_hz() -> u32 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rosbridge_url: default_rosbridge_url(),
            namespace: default_namespace(),
            dof_indices: default_dof_indices(),
            robot_dof_count: default_robot_dof_count(),
            call_timeout_ms: 0,
            step_hz: default_step_hz(),
        }
    }
}

impl Config {
    /// Reject configurations the controller would refuse at `init`.
    pub fn validate(&self) -> Result<(), HandError> {
        if self.dof_indices.len() != HAND_DOF_COUNT {
            return Err(HandError::Config(format!(
                "dof_indices must list exactly {HAND_DOF_COUNT} DOFs, got {}",
                self.dof_indices.len()
            )));
        }
        if let Some(&bad) = self
            .dof_indices
            .iter()
            .find(|&&i| i >= self.robot_dof_count)
        {
            return Err(HandError::Config(format!(
                "DOF index {bad} is out of range for a robot with {} DOFs",
                self.robot_dof_count
            )));
        }
        if self.step_hz == 0 {
            return Err(HandError::Config("step_hz must be positive".to_string()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }

    pub fn step_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.step_hz.max(1)))
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            dof_count: HAND_DOF_COUNT,
            call_timeout: self.call_timeout(),
        }
    }
}

/// Return the path to `~/.handlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".handlink").join("config.toml")
}

/// Load the config from `path` (the default location when `None`) with
/// environment overrides applied. A missing file yields the defaults.
pub fn load(path: Option<&Path>) -> Result<Config, HandError> {
    let mut cfg = match path {
        Some(path) => load_from(path)?,
        None => load_from(&config_path())?,
    }
    .unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from `path` as written. Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, HandError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        HandError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| HandError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `HANDLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HANDLINK_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `HANDLINK_NAMESPACE` | `namespace` |
/// | `HANDLINK_CALL_TIMEOUT_MS` | `call_timeout_ms` |
/// | `HANDLINK_STEP_HZ` | `step_hz` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HANDLINK_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
    if let Ok(v) = std::env::var("HANDLINK_NAMESPACE") {
        cfg.namespace = v;
    }
    if let Ok(v) = std::env::var("HANDLINK_CALL_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.call_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("HANDLINK_STEP_HZ")
        && let Ok(hz) = v.parse::<u32>()
    {
        cfg.step_hz = hz;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), HandError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            HandError::Config(format!("failed to create {}: {e}", parent.display()))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                HandError::Config(format!("failed to restrict {}: {e}", parent.display()))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| HandError::Config(format!("failed to serialize config: {e}")))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| {
                HandError::Config(format!("failed to write config at {}: {e}", path.display()))
            })?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| {
        HandError::Config(format!("failed to write config at {}: {e}", path.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.dof_indices, vec![0, 1, 2, 3]);
        assert_eq!(cfg.call_timeout(), None);
        assert_eq!(cfg.step_period(), Duration::from_millis(10));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            namespace = "right/bhd"
            dof_indices = [7, 8, 9, 10]
            robot_dof_count = 11
            call_timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rosbridge_url, "ws://localhost:9090");
        assert_eq!(cfg.namespace, "right/bhd");
        assert_eq!(cfg.step_hz, 100);
        assert!(cfg.validate().is_ok());
        assert_eq!(
            cfg.controller_config().call_timeout,
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn validate_rejects_wrong_dof_count() {
        let cfg = Config {
            dof_indices: vec![0, 1, 2],
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(HandError::Config(_))));
    }

    #[test]
    fn validate_rejects_index_beyond_robot() {
        let cfg = Config {
            dof_indices: vec![0, 1, 2, 4],
            robot_dof_count: 4,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("DOF index 4"));
    }

    #[test]
    fn validate_rejects_zero_rate() {
        let cfg = Config {
            step_hz: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_path_points_to_handlink_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".handlink"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "step_hz = \"fast\"").unwrap();
        assert!(matches!(load_from(&path), Err(HandError::Config(_))));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let cfg = Config {
            namespace: "left/bhd".to_string(),
            call_timeout_ms: 250,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.namespace, "left/bhd");
        assert_eq!(loaded.call_timeout_ms, 250);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        // SAFETY: the only test touching these variables.
        unsafe {
            std::env::set_var("HANDLINK_NAMESPACE", "/sim/bhd");
            std::env::set_var("HANDLINK_CALL_TIMEOUT_MS", "750");
            std::env::set_var("HANDLINK_STEP_HZ", "not-a-number");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.namespace, "/sim/bhd");
        assert_eq!(cfg.call_timeout_ms, 750);
        assert_eq!(cfg.step_hz, 100);
        unsafe {
            std::env::remove_var("HANDLINK_NAMESPACE");
            std::env::remove_var("HANDLINK_CALL_TIMEOUT_MS");
            std::env::remove_var("HANDLINK_STEP_HZ");
        }
    }
}
