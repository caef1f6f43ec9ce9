use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const MAX_EXPLODE_FACTOR: f32 = 1.0;
pub const MAX_MESH_SPACING_PERCENT: f32 = 50.0;
pub const MIN_TARGET_FPS: u32 = 1;
pub const MAX_TARGET_FPS: u32 = 240;
pub const DEFAULT_FLOOR_SPACING_UNIT: f32 = 4.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown view mode '{0}' (expected normal, exploded, section or xray)")]
    UnknownViewMode(String),
    #[error("unknown selection mode '{0}' (expected element or mesh)")]
    UnknownSelectionMode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Normal,
    Exploded,
    Section,
    Xray,
}

impl ViewMode {
    pub const ALL: [ViewMode; 4] = [
        ViewMode::Normal,
        ViewMode::Exploded,
        ViewMode::Section,
        ViewMode::Xray,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ViewMode::Normal => "normal",
            ViewMode::Exploded => "exploded",
            ViewMode::Section => "section",
            ViewMode::Xray => "xray",
        }
    }
}

impl FromStr for ViewMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(ViewMode::Normal),
            "exploded" | "explode" => Ok(ViewMode::Exploded),
            "section" => Ok(ViewMode::Section),
            "xray" | "x-ray" => Ok(ViewMode::Xray),
            _ => Err(ConfigError::UnknownViewMode(value.to_string())),
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl<'de> Deserialize<'de> for ViewMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    Element,
    #[default]
    Mesh,
}

impl SelectionMode {
    pub fn label(self) -> &'static str {
        match self {
            SelectionMode::Element => "element",
            SelectionMode::Mesh => "mesh",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SelectionMode::Element => SelectionMode::Mesh,
            SelectionMode::Mesh => SelectionMode::Element,
        }
    }
}

impl FromStr for SelectionMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "element" => Ok(SelectionMode::Element),
            "mesh" => Ok(SelectionMode::Mesh),
            _ => Err(ConfigError::UnknownSelectionMode(value.to_string())),
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl<'de> Deserialize<'de> for SelectionMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

/// Viewer knobs the host can hand in, either from a JSON file or flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    #[serde(alias = "viewMode")]
    pub view_mode: ViewMode,
    #[serde(alias = "explodeFactor")]
    pub explode_factor: f32,
    #[serde(alias = "selectionMode")]
    pub selection_mode: SelectionMode,
    #[serde(alias = "meshSpacingPercent")]
    pub mesh_spacing_percent: f32,
    #[serde(alias = "targetFps")]
    pub target_fps: u32,
    #[serde(alias = "floorSpacingUnit")]
    pub floor_spacing_unit: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        ViewerConfig {
            view_mode: ViewMode::Normal,
            explode_factor: 0.0,
            selection_mode: SelectionMode::Mesh,
            mesh_spacing_percent: 0.0,
            target_fps: 60,
            floor_spacing_unit: DEFAULT_FLOOR_SPACING_UNIT,
        }
    }
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading viewer config {}", path.display()))?;
        let config: ViewerConfig = serde_json::from_str(&data)
            .with_context(|| format!("parsing viewer config {}", path.display()))?;
        Ok(config.sanitized())
    }

    /// Clamp every numeric knob into its supported range.
    pub fn sanitized(mut self) -> Self {
        self.explode_factor = clamp_logged(
            "explode_factor",
            self.explode_factor,
            0.0,
            MAX_EXPLODE_FACTOR,
        );
        self.mesh_spacing_percent = clamp_logged(
            "mesh_spacing_percent",
            self.mesh_spacing_percent,
            0.0,
            MAX_MESH_SPACING_PERCENT,
        );
        let fps = self.target_fps.clamp(MIN_TARGET_FPS, MAX_TARGET_FPS);
        if fps != self.target_fps {
            log::warn!(
                "[config] target_fps {} out of range, using {fps}",
                self.target_fps
            );
            self.target_fps = fps;
        }
        if !(self.floor_spacing_unit.is_finite() && self.floor_spacing_unit > 0.0) {
            log::warn!(
                "[config] floor_spacing_unit {} is not positive, using {}",
                self.floor_spacing_unit,
                DEFAULT_FLOOR_SPACING_UNIT
            );
            self.floor_spacing_unit = DEFAULT_FLOOR_SPACING_UNIT;
        }
        self
    }
}

pub(crate) fn clamp_logged(name: &str, value: f32, min: f32, max: f32) -> f32 {
    if !value.is_finite() {
        log::warn!("[config] {name} is not finite, using {min}");
        return min;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        log::warn!("[config] {name} {value} out of range, using {clamped}");
    }
    clamped
}
