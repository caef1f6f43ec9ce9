use std::borrow::Cow;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytemuck::cast_slice;
use glam::Mat4;
use wgpu::util::DeviceExt;
use winit::{dpi::PhysicalSize, window::Window};

use super::mesh::{MeshInstance, view_projection_uniform};
use super::picking::GpuPickBackend;
use super::shaders::{MESH_SHADER_SOURCE, OVERLAY_SHADER_SOURCE, OverlayVertex};
use super::{MESH_DEPTH_FORMAT, Renderer, create_uniform_layout, scene_buffer_layouts};

/// Bundles the wgpu objects tied to the viewer window.
struct WgpuBootstrap {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_format: wgpu::TextureFormat,
    present_mode: wgpu::PresentMode,
    alpha_mode: wgpu::CompositeAlphaMode,
}

const INITIAL_INSTANCE_CAPACITY: usize = 64;
const OVERLAY_CAPACITY: usize = 32;

pub(super) async fn new(window: Arc<Window>) -> Result<Renderer> {
    let size = window.inner_size();
    let wgpu = bootstrap_wgpu(window.clone()).await?;
    let device = Arc::new(wgpu.device);
    let queue = Arc::new(wgpu.queue);

    let config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format: wgpu.surface_format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode: wgpu.present_mode,
        desired_maximum_frame_latency: 2,
        alpha_mode: wgpu.alpha_mode,
        view_formats: vec![],
    };
    wgpu.surface.configure(&device, &config);

    let bind_group_layout = create_uniform_layout(&device, "mesh-uniform-layout");
    let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("mesh-uniform-buffer"),
        contents: cast_slice(&[view_projection_uniform(Mat4::IDENTITY)]),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    });
    let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("mesh-uniform-bind-group"),
        layout: &bind_group_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }],
    });

    let opaque_pipeline =
        create_mesh_pipeline(&device, &bind_group_layout, wgpu.surface_format, true);
    let translucent_pipeline =
        create_mesh_pipeline(&device, &bind_group_layout, wgpu.surface_format, false);
    let overlay_pipeline = create_overlay_pipeline(&device, wgpu.surface_format);

    let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("mesh-instance-buffer"),
        size: (INITIAL_INSTANCE_CAPACITY * std::mem::size_of::<MeshInstance>()) as u64,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let overlay_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("overlay-vertex-buffer"),
        size: (OVERLAY_CAPACITY * std::mem::size_of::<OverlayVertex>()) as u64,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let (depth_texture, depth_view) = create_mesh_depth_texture(&device, size);
    let picker = GpuPickBackend::new(Arc::clone(&device), Arc::clone(&queue));

    log::info!(
        "[sitelens_viewer] surface {}x{} format {:?} present mode {:?}",
        config.width,
        config.height,
        config.format,
        config.present_mode
    );

    Ok(Renderer {
        window,
        surface: wgpu.surface,
        device,
        queue,
        config,
        size,
        background: wgpu::Color {
            r: 0.08,
            g: 0.09,
            b: 0.11,
            a: 1.0,
        },
        opaque_pipeline,
        translucent_pipeline,
        overlay_pipeline,
        uniform_buffer,
        uniform_bind_group,
        _depth_texture: depth_texture,
        depth_view,
        geometry: None,
        instances: Vec::new(),
        instance_buffer,
        instance_capacity: INITIAL_INSTANCE_CAPACITY,
        overlay_buffer,
        overlay_capacity: OVERLAY_CAPACITY,
        picker,
    })
}

async fn bootstrap_wgpu(window: Arc<Window>) -> Result<WgpuBootstrap> {
    let instance = wgpu::Instance::default();
    let surface = instance
        .create_surface(window)
        .context("creating wgpu surface")?;

    let adapter = match instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
        })
        .await
    {
        Some(adapter) => adapter,
        None => {
            log::warn!("[sitelens_viewer] no hardware adapter, trying the fallback adapter");
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    force_fallback_adapter: true,
                    compatible_surface: Some(&surface),
                })
                .await
                .context("requesting wgpu adapter")?
        }
    };
    log::info!("[sitelens_viewer] adapter: {:?}", adapter.get_info());

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sitelens-viewer-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        )
        .await
        .context("requesting wgpu device")?;

    let surface_caps = surface.get_capabilities(&adapter);
    let surface_format = surface_caps
        .formats
        .iter()
        .copied()
        .find(|format| format.is_srgb())
        .or_else(|| surface_caps.formats.first().copied())
        .context("surface reports no texture formats")?;
    let present_mode = surface_caps
        .present_modes
        .iter()
        .copied()
        .find(|mode| *mode == wgpu::PresentMode::Mailbox)
        .unwrap_or(wgpu::PresentMode::Fifo);
    let alpha_mode = surface_caps
        .alpha_modes
        .first()
        .copied()
        .unwrap_or(wgpu::CompositeAlphaMode::Opaque);

    Ok(WgpuBootstrap {
        surface,
        device,
        queue,
        surface_format,
        present_mode,
        alpha_mode,
    })
}

/// Opaque primitives write depth; translucent ones (x-ray, section ghosts)
/// blend over them without occluding each other.
fn create_mesh_pipeline(
    device: &wgpu::Device,
    bind_group_layout: &wgpu::BindGroupLayout,
    surface_format: wgpu::TextureFormat,
    opaque: bool,
) -> wgpu::RenderPipeline {
    let label = if opaque {
        "mesh-opaque"
    } else {
        "mesh-translucent"
    };
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("mesh-shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(MESH_SHADER_SOURCE)),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("mesh-pipeline-layout"),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: "mesh_vs_main",
            buffers: &scene_buffer_layouts(),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: "mesh_fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format: surface_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        // Imported building meshes have inconsistent winding.
        primitive: wgpu::PrimitiveState {
            cull_mode: None,
            ..wgpu::PrimitiveState::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: MESH_DEPTH_FORMAT,
            depth_write_enabled: opaque,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

fn create_overlay_pipeline(
    device: &wgpu::Device,
    surface_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("overlay-shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(OVERLAY_SHADER_SOURCE)),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("overlay-pipeline-layout"),
        bind_group_layouts: &[],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("overlay-pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: "overlay_vs_main",
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<OverlayVertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x4],
            }],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: "overlay_fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format: surface_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

pub(super) fn create_mesh_depth_texture(
    device: &wgpu::Device,
    size: PhysicalSize<u32>,
) -> (wgpu::Texture, wgpu::TextureView) {
    let extent = wgpu::Extent3d {
        width: size.width.max(1),
        height: size.height.max(1),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("mesh-depth-texture"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: MESH_DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}
