//! GPU rectangle picking. Renders the id pass into an offscreen target sized
//! to the query region and reads it back row by row.

use std::borrow::Cow;
use std::rc::Rc;
use std::sync::{Arc, mpsc};

use bytemuck::cast_slice;
use glam::Mat4;
use pollster::FutureExt;
use sitelens_engine::{
    IdBuffer, PickError, PickingBackend, PickingColorTable, PixelRegion, SceneModel, Viewport,
    pick_matrix,
};
use wgpu::{COPY_BYTES_PER_ROW_ALIGNMENT, Maintain};

use super::mesh::{MeshInstance, pick_instances, view_projection_uniform};
use super::shaders::PICK_SHADER_SOURCE;
use super::{MESH_DEPTH_FORMAT, SceneBuffers, create_uniform_layout, scene_buffer_layouts};

const PICK_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Row pitch for a `width`-pixel RGBA8 copy, rounded up to the copy alignment.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let bytes_per_row = 4 * width;
    bytes_per_row.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT
}

struct PickTarget {
    width: u32,
    height: u32,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

pub struct GpuPickBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    instance_buffer: wgpu::Buffer,
    instance_capacity: usize,
    geometry: Option<Rc<SceneBuffers>>,
    target: Option<PickTarget>,
    queries: u64,
}

impl GpuPickBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let bind_group_layout = create_uniform_layout(&device, "pick-uniform-layout");
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pick-uniform-buffer"),
            size: std::mem::size_of::<super::mesh::MeshUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pick-uniform-bind-group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("pick-shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(PICK_SHADER_SOURCE)),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pick-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("pick-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "pick_vs_main",
                buffers: &scene_buffer_layouts(),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "pick_fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: PICK_COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            // Both faces: the CPU fallback does not cull either.
            primitive: wgpu::PrimitiveState {
                cull_mode: None,
                ..wgpu::PrimitiveState::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: MESH_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let instance_capacity = 64usize;
        let instance_buffer = create_instance_buffer(&device, instance_capacity);

        GpuPickBackend {
            device,
            queue,
            pipeline,
            uniform_buffer,
            bind_group,
            instance_buffer,
            instance_capacity,
            geometry: None,
            target: None,
            queries: 0,
        }
    }

    pub(super) fn set_geometry(&mut self, geometry: Rc<SceneBuffers>) {
        self.geometry = Some(geometry);
    }

    fn ensure_instance_capacity(&mut self, required: usize) {
        if required <= self.instance_capacity {
            return;
        }
        let mut capacity = self.instance_capacity.max(1);
        while capacity < required {
            capacity *= 2;
        }
        self.instance_buffer = create_instance_buffer(&self.device, capacity);
        self.instance_capacity = capacity;
    }

    fn ensure_target(&mut self, region: PixelRegion) {
        let reuse = self
            .target
            .as_ref()
            .is_some_and(|t| t.width == region.width && t.height == region.height);
        if !reuse {
            self.target = Some(create_pick_target(&self.device, region.width, region.height));
        }
    }

    fn encode_and_submit(
        &mut self,
        geometry: &SceneBuffers,
        instances: &[MeshInstance],
        matrix: Mat4,
    ) -> Result<(), PickError> {
        self.ensure_instance_capacity(instances.len());
        self.queue
            .write_buffer(&self.instance_buffer, 0, cast_slice(instances));
        self.queue.write_buffer(
            &self.uniform_buffer,
            0,
            cast_slice(&[view_projection_uniform(matrix)]),
        );

        let target = self
            .target
            .as_ref()
            .ok_or_else(|| PickError::Backend(String::from("pick target missing")))?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pick-encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("pick-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.set_vertex_buffer(0, geometry.vertex.slice(..));
            pass.set_vertex_buffer(1, self.instance_buffer.slice(..));
            pass.set_index_buffer(geometry.index.slice(..), wgpu::IndexFormat::Uint32);
            for (slot, (range, instance)) in geometry.ranges.iter().zip(instances).enumerate() {
                if range.index_count == 0 || !instance.is_drawn() {
                    continue;
                }
                let slot = slot as u32;
                pass.draw_indexed(range.indices(), range.base_vertex, slot..slot + 1);
            }
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &target.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_bytes_per_row),
                    rows_per_image: Some(target.height),
                },
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_back(&self, region: PixelRegion) -> Result<IdBuffer, PickError> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| PickError::Readback(String::from("pick target missing")))?;
        let slice = target.readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(PickError::Readback(format!("mapping pick buffer: {err}"))),
            Err(err) => return Err(PickError::Readback(format!("waiting for pick buffer: {err}"))),
        }
        let mapped = slice.get_mapped_range();
        let decoded = IdBuffer::from_rgba(region, &mapped, target.padded_bytes_per_row as usize);
        drop(mapped);
        target.readback.unmap();
        decoded
    }
}

impl PickingBackend for GpuPickBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn render_region(
        &mut self,
        scene: &SceneModel,
        table: &PickingColorTable,
        view_proj: Mat4,
        viewport: Viewport,
        region: PixelRegion,
    ) -> Result<IdBuffer, PickError> {
        region.check_within(viewport)?;
        let geometry = self
            .geometry
            .clone()
            .filter(|geometry| geometry.generation == scene.generation())
            .ok_or_else(|| {
                PickError::Backend(format!(
                    "no geometry uploaded for model generation {}",
                    scene.generation()
                ))
            })?;
        let limit = self.device.limits().max_texture_dimension_2d;
        if region.width > limit || region.height > limit {
            return Err(PickError::Backend(format!(
                "pick region {}x{} exceeds texture limit {limit}",
                region.width, region.height
            )));
        }

        let instances = pick_instances(scene, table);
        let matrix = pick_matrix(viewport, region) * view_proj;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.ensure_target(region);
        let submitted = self.encode_and_submit(&geometry, &instances, matrix);
        let out_of_memory = self.device.pop_error_scope().block_on();
        let validation = self.device.pop_error_scope().block_on();
        submitted?;
        if let Some(err) = out_of_memory.or(validation) {
            // Drop the cached target; it may be what failed.
            self.target = None;
            return Err(PickError::Backend(err.to_string()));
        }

        self.queries += 1;
        log::debug!(
            "[sitelens_viewer] gpu pick #{} over {}x{} at ({}, {})",
            self.queries,
            region.width,
            region.height,
            region.x,
            region.y
        );
        self.read_back(region)
    }
}

fn create_instance_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
    let label = format!("pick-instance-buffer({capacity})");
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label.as_str()),
        size: (capacity * std::mem::size_of::<MeshInstance>()) as u64,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_pick_target(device: &wgpu::Device, width: u32, height: u32) -> PickTarget {
    let extent = wgpu::Extent3d {
        width: width.max(1),
        height: height.max(1),
        depth_or_array_layers: 1,
    };
    let color = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("pick-color-target"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: PICK_COLOR_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("pick-depth-target"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: MESH_DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
    let padded = padded_bytes_per_row(extent.width);
    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("pick-readback"),
        size: padded as u64 * extent.height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    PickTarget {
        width: extent.width,
        height: extent.height,
        color,
        color_view,
        depth_view,
        readback,
        padded_bytes_per_row: padded,
    }
}
