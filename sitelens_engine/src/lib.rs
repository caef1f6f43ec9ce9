//! Selection and visualisation core for building models: primitive indexing,
//! element bindings, an octree, rectangle picking, dirty-tracked materials
//! and view transforms, all owned by [`ViewerController`].

pub mod binder;
pub mod camera;
pub mod config;
pub mod controller;
pub mod events;
pub mod frame;
pub mod geometry;
pub mod materials;
pub mod picking;
pub mod scene;
pub mod selection;
pub mod spatial;
pub mod view_transform;

pub use binder::{BinderError, BindingReport, BuildingElement, ElementBinder};
pub use camera::OrbitCamera;
pub use config::{ConfigError, SelectionMode, ViewMode, ViewerConfig};
pub use controller::{FrameUpdate, LoadReport, LoadStatus, ViewerController};
pub use events::{EventQueue, ViewerEvent};
pub use frame::FramePacer;
pub use geometry::{Aabb, Frustum, Ray};
pub use materials::{resolve_material, Highlight, MaterialUpdater, Occupancy};
pub use picking::{
    pick_matrix, IdBuffer, PickError, PickOutcome, PickPath, PickRect, PickingBackend,
    PickingColorTable, PickingService, PixelRegion, SoftwarePickBackend, Viewport,
};
pub use scene::{MaterialState, MeshPrimitive, SceneModel, SceneOrigin};
pub use selection::{BoxSelectController, DragState, SelectionState};
pub use spatial::{RayHit, SpatialError, SpatialIndex};
pub use view_transform::{ViewTransformEngine, ViewTransformParams};
