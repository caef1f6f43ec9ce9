//! Persisted building-element records as the host backend hands them over.
//!
//! Mesh bindings arrive in two shapes: a JSON-encoded integer array stored in
//! a string column, or a native JSON array. Both are accepted on read; records
//! written back always use the native array form.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Wall,
    Column,
    Slab,
    Beam,
    Foundation,
    Roof,
    #[default]
    Other,
}

impl ElementKind {
    pub const ALL: [ElementKind; 7] = [
        ElementKind::Wall,
        ElementKind::Column,
        ElementKind::Slab,
        ElementKind::Beam,
        ElementKind::Foundation,
        ElementKind::Roof,
        ElementKind::Other,
    ];

    /// Position of the variant in [`ElementKind::ALL`], for table lookups.
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "wall" => ElementKind::Wall,
            "column" => ElementKind::Column,
            "slab" => ElementKind::Slab,
            "beam" => ElementKind::Beam,
            "foundation" => ElementKind::Foundation,
            "roof" => ElementKind::Roof,
            _ => ElementKind::Other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ElementKind::Wall => "wall",
            ElementKind::Column => "column",
            ElementKind::Slab => "slab",
            ElementKind::Beam => "beam",
            ElementKind::Foundation => "foundation",
            ElementKind::Roof => "roof",
            ElementKind::Other => "other",
        }
    }
}

impl<'de> Deserialize<'de> for ElementKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(ElementKind::from_label(&label))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl TrackingStatus {
    pub fn label(self) -> &'static str {
        match self {
            TrackingStatus::NotStarted => "not_started",
            TrackingStatus::InProgress => "in_progress",
            TrackingStatus::Completed => "completed",
        }
    }
}

/// Element identifiers come from the backend as either numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        ElementId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ElementId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(value) => ElementId(value.to_string()),
            RawId::Text(value) => ElementId(value),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde(default)]
    pub width: Option<f32>,
    #[serde(default)]
    pub height: Option<f32>,
    #[serde(default)]
    pub depth: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRecord {
    pub id: ElementId,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "type", alias = "elementType")]
    pub element_type: ElementKind,
    #[serde(default = "default_floor_level", alias = "floorLevel")]
    pub floor_level: i32,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default, alias = "trackingStatus")]
    pub tracking_status: TrackingStatus,
    #[serde(default, alias = "completionPercentage")]
    pub completion_percentage: f32,
    #[serde(
        default,
        alias = "meshIndices",
        skip_serializing_if = "Option::is_none"
    )]
    pub mesh_indices: Option<Value>,
}

fn default_floor_level() -> i32 {
    1
}

impl ElementRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ElementKind) -> Self {
        ElementRecord {
            id: ElementId::new(id),
            name: name.into(),
            element_type: kind,
            floor_level: default_floor_level(),
            dimensions: None,
            tracking_status: TrackingStatus::default(),
            completion_percentage: 0.0,
            mesh_indices: None,
        }
    }

    /// Completion clamped to the 0..=100 range the backend promises.
    pub fn completion(&self) -> f32 {
        if self.completion_percentage.is_finite() {
            self.completion_percentage.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    pub fn index_binding(&self) -> std::result::Result<BTreeSet<u32>, BindingError> {
        match self.mesh_indices.as_ref() {
            Some(value) => parse_index_binding(value),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Replace the stored binding with the canonical native-array form.
    pub fn set_canonical_binding<'a, I>(&mut self, indices: I)
    where
        I: IntoIterator<Item = &'a u32>,
    {
        let values = indices
            .into_iter()
            .map(|&index| Value::from(index))
            .collect();
        self.mesh_indices = Some(Value::Array(values));
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("binding string is not a JSON integer array: {0}")]
    InvalidJson(String),
    #[error("binding entry {position} is not a valid mesh index: {value}")]
    InvalidEntry { position: usize, value: String },
    #[error("unsupported binding shape: {0}")]
    UnsupportedShape(&'static str),
}

/// Parse either binding shape into a set of mesh indices. `null` and empty
/// strings mean "unbound".
pub fn parse_index_binding(value: &Value) -> std::result::Result<BTreeSet<u32>, BindingError> {
    match value {
        Value::Null => Ok(BTreeSet::new()),
        Value::Array(entries) => parse_index_array(entries),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(BTreeSet::new());
            }
            let decoded: Value = serde_json::from_str(trimmed)
                .map_err(|err| BindingError::InvalidJson(err.to_string()))?;
            match decoded {
                Value::Array(entries) => parse_index_array(&entries),
                Value::Null => Ok(BTreeSet::new()),
                _ => Err(BindingError::InvalidJson(format!(
                    "expected an array, found {trimmed}"
                ))),
            }
        }
        Value::Bool(_) => Err(BindingError::UnsupportedShape("boolean")),
        Value::Number(_) => Err(BindingError::UnsupportedShape("number")),
        Value::Object(_) => Err(BindingError::UnsupportedShape("object")),
    }
}

fn parse_index_array(entries: &[Value]) -> std::result::Result<BTreeSet<u32>, BindingError> {
    entries
        .iter()
        .enumerate()
        .map(|(position, entry)| {
            entry
                .as_u64()
                .and_then(|raw| u32::try_from(raw).ok())
                .ok_or_else(|| BindingError::InvalidEntry {
                    position,
                    value: entry.to_string(),
                })
        })
        .collect()
}

pub fn parse_element_records(text: &str) -> Result<Vec<ElementRecord>> {
    let records: Vec<ElementRecord> =
        serde_json::from_str(text).context("parsing element records")?;
    Ok(records)
}

pub fn load_element_records(path: &Path) -> Result<Vec<ElementRecord>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading element records {}", path.display()))?;
    let records = parse_element_records(&data)
        .with_context(|| format!("parsing element records {}", path.display()))?;
    log::info!(
        "[formats] loaded {} element records from {}",
        records.len(),
        path.display()
    );
    Ok(records)
}

pub fn save_element_records(path: &Path, records: &[ElementRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(records).context("serialising element records")?;
    fs::write(path, json)
        .with_context(|| format!("writing element records {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn accepts_both_binding_shapes() {
        let native = parse_index_binding(&json!([4, 1, 4, 9])).unwrap();
        let encoded = parse_index_binding(&json!("[9, 4, 1]")).unwrap();
        assert_eq!(native, BTreeSet::from([1, 4, 9]));
        assert_eq!(native, encoded);
        assert!(parse_index_binding(&json!(null)).unwrap().is_empty());
        assert!(parse_index_binding(&json!("  ")).unwrap().is_empty());
    }

    #[test]
    fn malformed_bindings_report_the_offending_entry() {
        assert!(matches!(
            parse_index_binding(&json!("[1, 2")),
            Err(BindingError::InvalidJson(_))
        ));
        assert_eq!(
            parse_index_binding(&json!([1, -2])),
            Err(BindingError::InvalidEntry {
                position: 1,
                value: String::from("-2")
            })
        );
        assert!(matches!(
            parse_index_binding(&json!([1.5])),
            Err(BindingError::InvalidEntry { position: 0, .. })
        ));
        assert_eq!(
            parse_index_binding(&json!({"a": 1})),
            Err(BindingError::UnsupportedShape("object"))
        );
        assert!(parse_index_binding(&json!("{\"a\":1}")).is_err());
    }

    #[test]
    fn parses_backend_records_with_mixed_spellings() {
        let text = r#"[
            {"id": 7, "name": "Core wall", "elementType": "Wall", "floorLevel": 2,
             "trackingStatus": "in_progress", "completionPercentage": 140,
             "meshIndices": "[3, 4]"},
            {"id": "b-1", "name": "Beam", "element_type": "girder",
             "mesh_indices": [5]},
            {"id": 9}
        ]"#;
        let records = parse_element_records(text).unwrap();
        assert_eq!(records.len(), 3);

        let wall = &records[0];
        assert_eq!(wall.id.as_str(), "7");
        assert_eq!(wall.element_type, ElementKind::Wall);
        assert_eq!(wall.floor_level, 2);
        assert_eq!(wall.tracking_status, TrackingStatus::InProgress);
        assert_eq!(wall.completion(), 100.0);
        assert_eq!(wall.index_binding().unwrap(), BTreeSet::from([3, 4]));

        assert_eq!(records[1].element_type, ElementKind::Other);
        assert_eq!(records[2].floor_level, 1);
        assert!(records[2].index_binding().unwrap().is_empty());
    }

    #[test]
    fn saved_records_use_the_native_array_form() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("elements.json");
        let mut record = ElementRecord::new("1", "Slab", ElementKind::Slab);
        record.mesh_indices = Some(json!("[2, 1]"));
        let canonical = record.index_binding().unwrap();
        record.set_canonical_binding(&canonical);
        save_element_records(&path, &[record]).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[0]["mesh_indices"], json!([1, 2]));
        let reloaded = load_element_records(&path).unwrap();
        assert_eq!(reloaded[0].index_binding().unwrap(), BTreeSet::from([1, 2]));
    }

    #[test]
    fn kinds_have_stable_ordinals() {
        for (position, kind) in ElementKind::ALL.iter().enumerate() {
            assert_eq!(kind.ordinal(), position);
            assert_eq!(ElementKind::from_label(kind.label()), *kind);
        }
        assert_eq!(ElementKind::default(), ElementKind::Other);
    }
}
