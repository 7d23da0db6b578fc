use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

use crate::control::DEFAULT_POLL_INTERVAL;
use crate::error::{PickError, PickResult};
use crate::orchestrator::PickStep;
use crate::services::ArmId;
use crate::shelf::ShelfLayout;
use crate::types::NamedPose;

/// What the queue driver does after an order fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run; the cell needs a human to look at it.
    #[default]
    Halt,
    /// Log the failure and move on to the next order.
    Continue,
}

/// Tunables of a pick run. Every field has a default, so an empty `{}` file
/// (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PickConfig {
    pub dual_arm: bool,
    pub start_pose: NamedPose,
    pub right_arm_dropoff_pose: NamedPose,
    pub left_arm_dropoff_pose: NamedPose,
    pub main_velocity_scaling_factor: f64,
    /// Seconds to dwell at the grasp pose before closing
    pub wait_before_grasp: f64,
    /// Seconds to dwell after closing
    pub wait_after_grasp: f64,
    pub lift_distance_desired: f64,
    pub place_goal_down_distance_desired: f64,
    pub approach_distance_desired: f64,
    pub skip_homing_step: bool,
    /// Tolerance band around the bin box, meters
    pub pose_tolerance: f64,
    pub perception_timeout_secs: f64,
    pub gate_poll_interval_ms: u64,
    /// Steps that only full autonomy may pass without a release
    pub breakpoints: Vec<usize>,
    pub failure_policy: FailurePolicy,
    pub log_dir: String,
    pub shelf: ShelfLayout,
}

impl Default for PickConfig {
    fn default() -> Self {
        Self {
            dual_arm: false,
            start_pose: NamedPose::new("home"),
            right_arm_dropoff_pose: NamedPose::new("right_dropoff"),
            left_arm_dropoff_pose: NamedPose::new("left_dropoff"),
            main_velocity_scaling_factor: 0.4,
            wait_before_grasp: 0.5,
            wait_after_grasp: 0.5,
            lift_distance_desired: 0.05,
            place_goal_down_distance_desired: 0.2,
            approach_distance_desired: 0.05,
            skip_homing_step: true,
            pose_tolerance: 0.02,
            perception_timeout_secs: 30.0,
            gate_poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            breakpoints: Vec::new(),
            failure_policy: FailurePolicy::Halt,
            log_dir: "logs".to_string(),
            shelf: ShelfLayout::default(),
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

impl PickConfig {
    /// Load from the first config file found, or fall back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        match resolve_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Unable to read {}: {}", path.display(), e))?;
        let config = Self::from_json_str(&raw)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse, expand `${VAR}` references and validate.
    pub fn from_json_str(raw: &str) -> PickResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| PickError::Config(format!("Malformed configuration: {}", e)))?;
        let config = config.expanded();
        config.validate()?;
        Ok(config)
    }

    fn expanded(mut self) -> Self {
        for pose in [
            &mut self.start_pose,
            &mut self.right_arm_dropoff_pose,
            &mut self.left_arm_dropoff_pose,
        ] {
            *pose = NamedPose::new(expand_env_vars(pose.as_str()));
        }
        self.log_dir = expand_env_vars(&self.log_dir);
        self
    }

    pub fn validate(&self) -> PickResult<()> {
        if !(self.main_velocity_scaling_factor > 0.0 && self.main_velocity_scaling_factor <= 1.0) {
            return Err(PickError::Config(format!(
                "main_velocity_scaling_factor must be in (0, 1], got {}",
                self.main_velocity_scaling_factor
            )));
        }
        if self.pose_tolerance < 0.0 {
            return Err(PickError::Config(format!(
                "pose_tolerance must not be negative, got {}",
                self.pose_tolerance
            )));
        }
        if self.gate_poll_interval_ms == 0 {
            return Err(PickError::Config(
                "gate_poll_interval_ms must be positive".to_string(),
            ));
        }
        if let Some(bad) = self
            .breakpoints
            .iter()
            .find(|b| PickStep::from_index(**b).is_none())
        {
            return Err(PickError::Config(format!(
                "breakpoint {} is not a step index",
                bad
            )));
        }
        Ok(())
    }

    pub fn perception_timeout(&self) -> Duration {
        seconds(self.perception_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.gate_poll_interval_ms)
    }

    pub fn wait_before_grasp(&self) -> Duration {
        seconds(self.wait_before_grasp)
    }

    pub fn wait_after_grasp(&self) -> Duration {
        seconds(self.wait_after_grasp)
    }

    pub fn dropoff_pose(&self, arm: ArmId) -> &NamedPose {
        match arm {
            ArmId::Left => &self.left_arm_dropoff_pose,
            ArmId::Right => &self.right_arm_dropoff_pose,
        }
    }

    /// Arms driven by this cell.
    pub fn arms(&self) -> Vec<ArmId> {
        if self.dual_arm {
            vec![ArmId::Right, ArmId::Left]
        } else {
            vec![ArmId::Right]
        }
    }

    pub fn is_breakpoint(&self, step: PickStep) -> bool {
        self.breakpoints.contains(&step.index())
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.log_dir)
    }
}

/// Config file location: `APC_CONFIG`, then
/// `$XDG_CONFIG_HOME/apc/config.json`, then `./apc_config.json`.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("APC_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("apc").join("config.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("apc_config.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}
