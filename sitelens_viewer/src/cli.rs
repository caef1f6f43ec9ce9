use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use glam::Vec2;
use sitelens_engine::{PickRect, SelectionMode, ViewMode, ViewerConfig};
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(about = "Interactive building model viewer with box selection", version)]
pub struct Args {
    /// Model to load: a GLB path or file:// URL
    #[arg(long)]
    pub model: Option<String>,

    /// Element records JSON (array of building elements)
    #[arg(long)]
    pub elements: Option<PathBuf>,

    /// Viewer config JSON; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// normal, exploded, section or xray
    #[arg(long)]
    pub view_mode: Option<ViewMode>,

    /// Explode factor, 0..1
    #[arg(long)]
    pub explode: Option<f32>,

    /// element or mesh
    #[arg(long)]
    pub selection_mode: Option<SelectionMode>,

    /// Mesh spacing percent, 0..50
    #[arg(long)]
    pub spacing: Option<f32>,

    /// Frame rate cap
    #[arg(long)]
    pub target_fps: Option<u32>,

    /// Skip the window; print the load report and exit
    #[arg(long)]
    pub headless: bool,

    /// Headless box selection as normalised x0,y0,x1,y1
    #[arg(long, value_parser = parse_select_rect)]
    pub select: Option<PickRect>,

    /// Viewport size used by headless selection
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Bind the headless selection to this element id
    #[arg(long, requires = "select")]
    pub bind_to: Option<String>,

    /// Write the element records (canonical bindings) here after a headless run
    #[arg(long)]
    pub save_elements: Option<PathBuf>,

    /// Print the headless report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectRectError {
    #[error("expected four comma separated values, got {0}")]
    WrongArity(usize),
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("coordinates must lie in 0..1, got {0}")]
    OutOfRange(String),
}

pub fn parse_select_rect(value: &str) -> Result<PickRect, SelectRectError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(SelectRectError::WrongArity(parts.len()));
    }
    let mut coords = [0.0f32; 4];
    for (slot, part) in coords.iter_mut().zip(&parts) {
        let parsed: f32 = part
            .parse()
            .map_err(|_| SelectRectError::NotANumber(part.to_string()))?;
        if !(0.0..=1.0).contains(&parsed) {
            return Err(SelectRectError::OutOfRange(part.to_string()));
        }
        *slot = parsed;
    }
    Ok(PickRect::from_corners(
        Vec2::new(coords[0], coords[1]),
        Vec2::new(coords[2], coords[3]),
    ))
}

/// Config file (or defaults) with command-line overrides applied on top.
pub fn resolve_config(args: &Args) -> Result<ViewerConfig> {
    let mut config = match args.config.as_deref() {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    if let Some(mode) = args.view_mode {
        config.view_mode = mode;
    }
    if let Some(explode) = args.explode {
        config.explode_factor = explode;
    }
    if let Some(mode) = args.selection_mode {
        config.selection_mode = mode;
    }
    if let Some(spacing) = args.spacing {
        config.mesh_spacing_percent = spacing;
    }
    if let Some(fps) = args.target_fps {
        config.target_fps = fps;
    }
    Ok(config.sanitized())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn select_rect_parses_and_orders_corners() {
        let rect = parse_select_rect("0.8, 0.1,0.2,0.6").unwrap();
        assert_eq!(rect.min, Vec2::new(0.2, 0.1));
        assert_eq!(rect.max, Vec2::new(0.8, 0.6));
        assert_eq!(
            parse_select_rect("0.1,0.2"),
            Err(SelectRectError::WrongArity(2))
        );
        assert!(matches!(
            parse_select_rect("0,0,x,1"),
            Err(SelectRectError::NotANumber(_))
        ));
        assert!(matches!(
            parse_select_rect("0,0,1.5,1"),
            Err(SelectRectError::OutOfRange(_))
        ));
    }

    #[test]
    fn flags_override_the_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("viewer.json");
        fs::write(
            &path,
            r#"{"viewMode": "xray", "explode_factor": 0.4, "target_fps": 30}"#,
        )
        .unwrap();

        let args = Args::parse_from([
            "sitelens_viewer",
            "--config",
            path.to_str().unwrap(),
            "--explode",
            "2.5",
            "--selection-mode",
            "Element",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.view_mode, ViewMode::Xray);
        assert_eq!(config.explode_factor, 1.0);
        assert_eq!(config.selection_mode, SelectionMode::Element);
        assert_eq!(config.target_fps, 30);
    }

    #[test]
    fn bind_to_needs_a_selection() {
        let result = Args::try_parse_from(["sitelens_viewer", "--headless", "--bind-to", "7"]);
        assert!(result.is_err());
    }
}
