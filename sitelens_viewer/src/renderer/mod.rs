//! wgpu side of the viewer. `Renderer` owns the surface, the scene geometry
//! for the current model generation and the per-primitive instance buffer
//! that mirrors materials and positions. `init` builds the device and
//! pipelines, `render` records the frame.

mod init;
pub mod mesh;
pub mod picking;
mod render;
mod shaders;

use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use bytemuck::cast_slice;
use sitelens_engine::{FrameUpdate, PickRect, SceneModel};
use wgpu::SurfaceError;
use wgpu::util::DeviceExt;
use winit::{dpi::PhysicalSize, window::Window};

use mesh::{MeshInstance, MeshUniforms, PrimitiveRange, SceneVertex};
pub use picking::GpuPickBackend;

pub(crate) const MESH_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![1 => Float32x4, 2 => Float32x4];

/// Vertex then instance layout shared by the mesh and pick pipelines.
pub(crate) fn scene_buffer_layouts() -> [wgpu::VertexBufferLayout<'static>; 2] {
    [
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<SceneVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRIBUTES,
        },
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshInstance>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &INSTANCE_ATTRIBUTES,
        },
    ]
}

pub(crate) fn create_uniform_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<MeshUniforms>() as u64),
            },
            count: None,
        }],
    })
}

/// Uploaded geometry for one model generation. Shared with the pick backend.
pub struct SceneBuffers {
    pub generation: u64,
    pub vertex: wgpu::Buffer,
    pub index: wgpu::Buffer,
    pub ranges: Vec<PrimitiveRange>,
}

impl SceneBuffers {
    fn upload(device: &wgpu::Device, scene: &SceneModel) -> Self {
        let packed = mesh::pack_geometry(scene);
        // Zero-sized buffers are not allowed; keep one dummy element.
        let vertices: &[SceneVertex] = if packed.vertices.is_empty() {
            &[SceneVertex { position: [0.0; 3] }]
        } else {
            &packed.vertices
        };
        let indices: &[u32] = if packed.indices.is_empty() {
            &[0, 0, 0]
        } else {
            &packed.indices
        };
        let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("scene-vertex-buffer"),
            contents: cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("scene-index-buffer"),
            contents: cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        log::info!(
            "[sitelens_viewer] uploaded generation {}: {} vertices, {} indices, {} primitives",
            scene.generation(),
            packed.vertices.len(),
            packed.indices.len(),
            packed.ranges.len()
        );
        SceneBuffers {
            generation: scene.generation(),
            vertex,
            index,
            ranges: packed.ranges,
        }
    }
}

pub struct Renderer {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
    background: wgpu::Color,
    opaque_pipeline: wgpu::RenderPipeline,
    translucent_pipeline: wgpu::RenderPipeline,
    overlay_pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    _depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    geometry: Option<Rc<SceneBuffers>>,
    instances: Vec<MeshInstance>,
    instance_buffer: wgpu::Buffer,
    instance_capacity: usize,
    overlay_buffer: wgpu::Buffer,
    overlay_capacity: usize,
    picker: GpuPickBackend,
}

/// Above this share of dirty primitives the whole instance buffer is
/// rewritten in one call.
const FULL_REWRITE_RATIO: f32 = 0.5;

impl Renderer {
    pub async fn new(window: Arc<Window>) -> Result<Self> {
        init::new(window).await
    }

    pub fn window(&self) -> &Window {
        self.window.as_ref()
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        let (texture, view) = init::create_mesh_depth_texture(&self.device, new_size);
        self._depth_texture = texture;
        self.depth_view = view;
    }

    pub fn picker_mut(&mut self) -> &mut GpuPickBackend {
        &mut self.picker
    }

    /// Upload geometry when the model generation changed. Returns true when
    /// it did.
    pub fn sync_scene(&mut self, scene: &SceneModel) -> bool {
        let current = self
            .geometry
            .as_ref()
            .is_some_and(|geometry| geometry.generation == scene.generation());
        if current {
            return false;
        }
        let geometry = Rc::new(SceneBuffers::upload(&self.device, scene));
        self.picker.set_geometry(Rc::clone(&geometry));
        self.geometry = Some(geometry);
        self.instances = mesh::shaded_instances(scene);
        self.ensure_instance_capacity(self.instances.len());
        self.queue
            .write_buffer(&self.instance_buffer, 0, cast_slice(&self.instances));
        true
    }

    /// Push the instance slots a frame touched.
    pub fn apply_update(&mut self, scene: &SceneModel, update: &FrameUpdate) {
        if self.instances.len() != scene.len() {
            log::warn!(
                "[sitelens_viewer] instance mirror out of sync ({} vs {}), rebuilding",
                self.instances.len(),
                scene.len()
            );
            self.geometry = None;
            self.sync_scene(scene);
            return;
        }
        let mut dirty: Vec<u32> = update
            .recolored
            .iter()
            .chain(&update.moved)
            .copied()
            .filter(|&index| (index as usize) < self.instances.len())
            .collect();
        if dirty.is_empty() {
            return;
        }
        dirty.sort_unstable();
        dirty.dedup();
        for &index in &dirty {
            if let Some(primitive) = scene.get(index) {
                self.instances[index as usize] = mesh::shaded_instance(primitive);
            }
        }

        let stride = std::mem::size_of::<MeshInstance>();
        if dirty.len() as f32 > self.instances.len() as f32 * FULL_REWRITE_RATIO {
            self.queue
                .write_buffer(&self.instance_buffer, 0, cast_slice(&self.instances));
            return;
        }
        for run in mesh::contiguous_runs(&dirty) {
            let slice = &self.instances[run.start as usize..run.end as usize];
            self.queue.write_buffer(
                &self.instance_buffer,
                (run.start as usize * stride) as u64,
                cast_slice(slice),
            );
        }
    }

    pub fn render(
        &mut self,
        view_projection: glam::Mat4,
        drag_rect: Option<PickRect>,
    ) -> Result<(), SurfaceError> {
        render::render(self, view_projection, drag_rect)
    }

    fn ensure_instance_capacity(&mut self, required: usize) {
        if required <= self.instance_capacity {
            return;
        }
        let mut capacity = self.instance_capacity.max(1);
        while capacity < required {
            capacity *= 2;
        }
        let label = format!("mesh-instance-buffer({capacity})");
        self.instance_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label.as_str()),
            size: (capacity * std::mem::size_of::<MeshInstance>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.instance_capacity = capacity;
    }
}
