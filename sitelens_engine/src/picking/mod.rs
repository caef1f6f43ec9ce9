//! Rectangle picking.
//!
//! Every primitive gets a flat colour encoding `index + 1` as 24-bit RGB;
//! colour 0 means "no primitive". A query renders only the pixels under the
//! selection rectangle and decodes the distinct colours it reads back. When
//! the backend fails, the same rectangle is resolved on the CPU by
//! rasterising the frustum-culled candidates with identical rules.

pub mod raster;

use std::collections::BTreeSet;

use glam::{Mat4, Vec2, Vec4};
use serde::Serialize;
use thiserror::Error;

use crate::geometry::Frustum;
use crate::scene::SceneModel;
use crate::spatial::SpatialIndex;

pub use raster::{RegionTarget, SoftwarePickBackend, rasterize_region};

/// Largest primitive count the 24-bit colour space can address with 0
/// reserved.
pub const MAX_PICKABLE: u32 = (1 << 24) - 2;
/// Consecutive backend failures after which the backend is left alone for the
/// rest of the model session.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PickError {
    #[error("pick backend failed: {0}")]
    Backend(String),
    #[error("pick read-back failed: {0}")]
    Readback(String),
    #[error("pick region {region:?} exceeds viewport {viewport:?}")]
    RegionOutOfRange { region: PixelRegion, viewport: Viewport },
    #[error("{count} primitives exceed the {max} pickable colours")]
    TableOverflow { count: usize, max: u32 },
    #[error("read-back colour {0:#08x} is not in the pick table")]
    UnknownColor(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Viewport { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Integer pixel rectangle inside a viewport, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        PixelRegion {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn check_within(&self, viewport: Viewport) -> Result<(), PickError> {
        if self.is_empty() || self.right() > viewport.width || self.bottom() > viewport.height {
            return Err(PickError::RegionOutOfRange {
                region: *self,
                viewport,
            });
        }
        Ok(())
    }
}

/// Selection rectangle in normalised `[0, 1]²` viewport coordinates,
/// top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PickRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl PickRect {
    /// Any two opposite corners, in any order. Clamped to the unit square.
    pub fn from_corners(a: Vec2, b: Vec2) -> Self {
        let clamp = |v: Vec2| {
            if v.is_finite() {
                v.clamp(Vec2::ZERO, Vec2::ONE)
            } else {
                Vec2::ZERO
            }
        };
        let (a, b) = (clamp(a), clamp(b));
        PickRect {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// `[floor(min·size), ceil(max·size))`, clamped. None when it covers no
    /// pixel.
    pub fn to_region(&self, viewport: Viewport) -> Option<PixelRegion> {
        if viewport.is_empty() {
            return None;
        }
        let size = Vec2::new(viewport.width as f32, viewport.height as f32);
        let lo = (self.min * size).floor().max(Vec2::ZERO);
        let hi = (self.max * size).ceil().min(size);
        let (x0, y0) = (lo.x as u32, lo.y as u32);
        let (x1, y1) = (hi.x as u32, hi.y as u32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRegion::new(x0, y0, x1 - x0, y1 - y0))
    }
}

pub fn pack_color([r, g, b]: [u8; 3]) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

pub fn unpack_color(raw: u32) -> [u8; 3] {
    [(raw >> 16) as u8, (raw >> 8) as u8, raw as u8]
}

/// Bijection between primitive indices and pick colours for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PickingColorTable {
    count: u32,
    generation: u64,
}

impl PickingColorTable {
    pub fn build(scene: &SceneModel) -> Result<Self, PickError> {
        let count = scene.len();
        if count > MAX_PICKABLE as usize {
            return Err(PickError::TableOverflow {
                count,
                max: MAX_PICKABLE,
            });
        }
        Ok(PickingColorTable {
            count: count as u32,
            generation: scene.generation(),
        })
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn encode(&self, index: u32) -> Option<[u8; 3]> {
        (index < self.count).then(|| unpack_color(index + 1))
    }

    /// `Ok(None)` for the background colour.
    pub fn decode(&self, color: [u8; 3]) -> Result<Option<u32>, PickError> {
        match pack_color(color) {
            0 => Ok(None),
            raw if raw <= self.count => Ok(Some(raw - 1)),
            raw => Err(PickError::UnknownColor(raw)),
        }
    }

    /// Colour as the normalised RGBA a shader writes into an `Rgba8Unorm`
    /// target.
    pub fn shader_color(&self, index: u32) -> Option<[f32; 4]> {
        self.encode(index).map(|[r, g, b]| {
            [
                f32::from(r) / 255.0,
                f32::from(g) / 255.0,
                f32::from(b) / 255.0,
                1.0,
            ]
        })
    }
}

/// Read-back of a pick region: one packed RGB colour per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdBuffer {
    pub region: PixelRegion,
    pub colors: Vec<u32>,
}

impl IdBuffer {
    /// Decode RGBA8 rows; `bytes_per_row` may include padding.
    pub fn from_rgba(region: PixelRegion, bytes: &[u8], bytes_per_row: usize) -> Result<Self, PickError> {
        let row_bytes = region.width as usize * 4;
        if bytes_per_row < row_bytes {
            return Err(PickError::Readback(format!(
                "row pitch {bytes_per_row} is smaller than {row_bytes}"
            )));
        }
        let needed = if region.height == 0 {
            0
        } else {
            (region.height as usize - 1) * bytes_per_row + row_bytes
        };
        if bytes.len() < needed {
            return Err(PickError::Readback(format!(
                "expected at least {needed} bytes, got {}",
                bytes.len()
            )));
        }

        let mut colors = Vec::with_capacity(region.pixel_count());
        for row in 0..region.height as usize {
            let start = row * bytes_per_row;
            colors.extend(
                bytes[start..start + row_bytes]
                    .chunks_exact(4)
                    .map(|px| pack_color([px[0], px[1], px[2]])),
            );
        }
        Ok(IdBuffer { region, colors })
    }

    pub fn decode(&self, table: &PickingColorTable) -> Result<BTreeSet<u32>, PickError> {
        let mut seen = BTreeSet::new();
        let mut indices = BTreeSet::new();
        for &raw in &self.colors {
            if raw == 0 || !seen.insert(raw) {
                continue;
            }
            if let Some(index) = table.decode(unpack_color(raw))? {
                indices.insert(index);
            }
        }
        Ok(indices)
    }
}

/// Anything that can render the pick pass for a region and read it back.
pub trait PickingBackend {
    fn name(&self) -> &str;

    fn render_region(
        &mut self,
        scene: &SceneModel,
        table: &PickingColorTable,
        view_proj: Mat4,
        viewport: Viewport,
        region: PixelRegion,
    ) -> Result<IdBuffer, PickError>;
}

/// Maps the region's slice of NDC onto the full `[-1, 1]` range so a target
/// sized to the region sees exactly those pixels.
pub fn pick_matrix(viewport: Viewport, region: PixelRegion) -> Mat4 {
    let (w, h) = (viewport.width.max(1) as f32, viewport.height.max(1) as f32);
    let left = 2.0 * region.x as f32 / w - 1.0;
    let right = 2.0 * region.right() as f32 / w - 1.0;
    let top = 1.0 - 2.0 * region.y as f32 / h;
    let bottom = 1.0 - 2.0 * region.bottom() as f32 / h;
    let (dx, dy) = ((right - left).max(f32::EPSILON), (top - bottom).max(f32::EPSILON));
    Mat4::from_cols(
        Vec4::new(2.0 / dx, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 / dy, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(-(left + right) / dx, -(top + bottom) / dy, 0.0, 1.0),
    )
}

/// CPU fallback: frustum-cull with the octree, then rasterise the survivors.
pub fn cpu_pick(
    scene: &SceneModel,
    spatial: &SpatialIndex,
    view_proj: Mat4,
    viewport: Viewport,
    region: PixelRegion,
) -> BTreeSet<u32> {
    if region.is_empty() || viewport.is_empty() {
        return BTreeSet::new();
    }
    let frustum = Frustum::from_matrix(pick_matrix(viewport, region) * view_proj);
    let candidates = spatial.query_frustum(&frustum);
    let target = rasterize_region(scene, candidates, view_proj, viewport, region, |index| {
        Some(index + 1)
    });
    target
        .ids()
        .iter()
        .filter(|&&id| id != 0)
        .map(|&id| id - 1)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PickPath {
    Backend,
    Cpu,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PickStats {
    pub backend_queries: u64,
    pub cpu_queries: u64,
    pub backend_failures: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickOutcome {
    pub indices: BTreeSet<u32>,
    pub path: PickPath,
}

impl PickOutcome {
    fn skipped() -> Self {
        PickOutcome {
            indices: BTreeSet::new(),
            path: PickPath::Skipped,
        }
    }
}

/// Owns the colour table and the backend failure policy for one model
/// session.
#[derive(Debug, Clone)]
pub struct PickingService {
    table: Option<PickingColorTable>,
    consecutive_failures: u32,
    backend_disabled: bool,
    stats: PickStats,
}

impl PickingService {
    pub fn new(scene: &SceneModel) -> Self {
        let table = match PickingColorTable::build(scene) {
            Ok(table) => Some(table),
            Err(err) => {
                log::warn!("[picking] {err}; rectangle picks will use the CPU path");
                None
            }
        };
        PickingService {
            table,
            consecutive_failures: 0,
            backend_disabled: false,
            stats: PickStats::default(),
        }
    }

    pub fn table(&self) -> Option<&PickingColorTable> {
        self.table.as_ref()
    }

    pub fn is_backend_disabled(&self) -> bool {
        self.backend_disabled
    }

    pub fn stats(&self) -> &PickStats {
        &self.stats
    }

    pub fn pick_rect(
        &mut self,
        backend: Option<&mut dyn PickingBackend>,
        scene: &SceneModel,
        spatial: &SpatialIndex,
        view_proj: Mat4,
        viewport: Viewport,
        rect: PickRect,
    ) -> PickOutcome {
        match rect.to_region(viewport) {
            Some(region) => self.pick_region(backend, scene, spatial, view_proj, viewport, region),
            None => PickOutcome::skipped(),
        }
    }

    pub fn pick_region(
        &mut self,
        backend: Option<&mut dyn PickingBackend>,
        scene: &SceneModel,
        spatial: &SpatialIndex,
        view_proj: Mat4,
        viewport: Viewport,
        region: PixelRegion,
    ) -> PickOutcome {
        if region.is_empty() || scene.is_empty() {
            return PickOutcome::skipped();
        }

        if let (Some(backend), Some(table)) = (backend, self.table.as_ref()) {
            if !self.backend_disabled {
                if table.generation() != scene.generation() {
                    log::debug!(
                        "[picking] dropping query for stale model generation {}",
                        table.generation()
                    );
                    return PickOutcome::skipped();
                }
                let result = backend
                    .render_region(scene, table, view_proj, viewport, region)
                    .and_then(|buffer| {
                        if buffer.region != region {
                            return Err(PickError::Readback(format!(
                                "backend returned region {:?}",
                                buffer.region
                            )));
                        }
                        buffer.decode(table)
                    });
                match result {
                    Ok(indices) => {
                        self.consecutive_failures = 0;
                        self.stats.backend_queries += 1;
                        return PickOutcome {
                            indices,
                            path: PickPath::Backend,
                        };
                    }
                    Err(err) => {
                        self.consecutive_failures += 1;
                        self.stats.backend_failures += 1;
                        log::warn!(
                            "[picking] {} backend failed ({err}); using CPU path",
                            backend.name()
                        );
                        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            log::warn!(
                                "[picking] {} consecutive failures, disabling {} backend for this model",
                                self.consecutive_failures,
                                backend.name()
                            );
                            self.backend_disabled = true;
                        }
                    }
                }
            }
        }

        self.stats.cpu_queries += 1;
        PickOutcome {
            indices: cpu_pick(scene, spatial, view_proj, viewport, region),
            path: PickPath::Cpu,
        }
    }
}
