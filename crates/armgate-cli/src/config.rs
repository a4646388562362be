//! Operator configuration – reads/writes `~/.armgate/config.toml`.

use armgate_hal::{DeviceDescriptor, PixelLayout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One camera, keyed by role in [`Config::cameras`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Raw frame stream to read. Absent selects the simulated camera.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub layout: PixelLayout,
}

/// Per-operation overrides, keyed by operation name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationConfig {
    /// Argv of the external inference program. Empty runs the simulator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

/// Persisted operator configuration stored in `~/.armgate/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding images, analysis sidecars and `master_log.jsonl`.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Vision model id stamped into every analysis record.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Camera role used for captures.
    #[serde(default = "default_capture_role")]
    pub capture_role: String,

    /// Multiplier on simulated runner durations (`0.1` = ten times faster).
    #[serde(default = "default_sim_time_scale")]
    pub sim_time_scale: f64,

    #[serde(default = "default_cameras")]
    pub cameras: BTreeMap<String, CameraConfig>,

    #[serde(default)]
    pub operations: BTreeMap<String, OperationConfig>,
}

fn default_log_dir() -> PathBuf {
    armgate_dir_for_home(&home_dir()).join("vision_logs")
}
fn default_vision_model() -> String {
    "gpt-4o".to_string()
}
fn default_capture_role() -> String {
    "top".to_string()
}
fn default_sim_time_scale() -> f64 {
    1.0
}
fn default_cameras() -> BTreeMap<String, CameraConfig> {
    BTreeMap::from([(default_capture_role(), CameraConfig::default())])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            vision_model: default_vision_model(),
            capture_role: default_capture_role(),
            sim_time_scale: default_sim_time_scale(),
            cameras: default_cameras(),
            operations: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Reject values that would only fail later, mid-request.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.sim_time_scale.is_finite() && self.sim_time_scale >= 0.0) {
            return Err(format!(
                "sim_time_scale must be a non-negative number, got {}",
                self.sim_time_scale
            ));
        }
        if self.capture_role.trim().is_empty() {
            return Err("capture_role must not be empty".to_string());
        }
        Ok(())
    }

    /// Camera descriptors in the form the capture manager expects.
    pub fn device_descriptors(&self) -> Vec<DeviceDescriptor> {
        self.cameras
            .iter()
            .map(|(role, cam)| DeviceDescriptor {
                role: role.clone(),
                path: cam.path.clone(),
                width: cam.width,
                height: cam.height,
                layout: cam.layout,
            })
            .collect()
    }

    /// External program configured for `operation`, if any.
    pub fn command_for(&self, operation: &str) -> Option<&[String]> {
        self.operations
            .get(operation)
            .map(|op| op.command.as_slice())
            .filter(|argv| !argv.is_empty())
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn armgate_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armgate")
}

/// Return the path to `~/.armgate/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    armgate_dir_for_home(home).join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {e}", path.display()))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {e}"))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `ARMGATE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMGATE_LOG_DIR` | `log_dir` |
/// | `ARMGATE_VISION_MODEL` | `vision_model` |
/// | `ARMGATE_CAPTURE_ROLE` | `capture_role` |
/// | `ARMGATE_SIM_TIME_SCALE` | `sim_time_scale` (ignored unless numeric) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ARMGATE_LOG_DIR") {
        cfg.log_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("ARMGATE_VISION_MODEL") {
        cfg.vision_model = v;
    }
    if let Ok(v) = std::env::var("ARMGATE_CAPTURE_ROLE") {
        cfg.capture_role = v;
    }
    if let Ok(v) = std::env::var("ARMGATE_SIM_TIME_SCALE")
        && let Ok(scale) = v.trim().parse::<f64>()
    {
        cfg.sim_time_scale = scale;
    }
}

/// Save the config to disk, creating `~/.armgate/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {e}"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {e}"))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {e}"))?;
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
            .map_err(|e| format!("Failed to write config at {}: {e}", path.display()))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {e}", path.display()))?;
    Ok(())
}
