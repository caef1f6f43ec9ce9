use bytemuck::cast_slice;
use glam::Mat4;
use sitelens_engine::PickRect;
use wgpu::SurfaceError;

use super::Renderer;
use super::mesh::view_projection_uniform;
use super::shaders::selection_rect_vertices;

pub(super) fn render(
    state: &mut Renderer,
    view_projection: Mat4,
    drag_rect: Option<PickRect>,
) -> Result<(), SurfaceError> {
    let frame = state.surface.get_current_texture()?;
    let view = frame
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());
    let mut encoder = state
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sitelens-viewer-encoder"),
        });

    state.queue.write_buffer(
        &state.uniform_buffer,
        0,
        cast_slice(&[view_projection_uniform(view_projection)]),
    );

    draw_scene(state, &view, &mut encoder);
    if let Some(rect) = drag_rect {
        draw_selection_rect(state, &view, &mut encoder, rect);
    }

    state.queue.submit(std::iter::once(encoder.finish()));
    frame.present();
    Ok(())
}

/// Opaque primitives first with depth writes, then translucent ones on top.
fn draw_scene(state: &Renderer, view: &wgpu::TextureView, encoder: &mut wgpu::CommandEncoder) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("mesh-pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(state.background),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &state.depth_view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });

    let Some(geometry) = state.geometry.as_ref() else {
        return;
    };
    pass.set_bind_group(0, &state.uniform_bind_group, &[]);
    pass.set_vertex_buffer(0, geometry.vertex.slice(..));
    pass.set_vertex_buffer(1, state.instance_buffer.slice(..));
    pass.set_index_buffer(geometry.index.slice(..), wgpu::IndexFormat::Uint32);

    for (pipeline, opaque) in [(&state.opaque_pipeline, true), (&state.translucent_pipeline, false)] {
        pass.set_pipeline(pipeline);
        for (slot, (range, instance)) in geometry.ranges.iter().zip(&state.instances).enumerate() {
            if range.index_count == 0 || !instance.is_drawn() || instance.is_opaque() != opaque {
                continue;
            }
            let slot = slot as u32;
            pass.draw_indexed(range.indices(), range.base_vertex, slot..slot + 1);
        }
    }
}

fn draw_selection_rect(
    state: &Renderer,
    view: &wgpu::TextureView,
    encoder: &mut wgpu::CommandEncoder,
    rect: PickRect,
) {
    let vertices = selection_rect_vertices(rect.min.to_array(), rect.max.to_array());
    if vertices.len() > state.overlay_capacity {
        log::warn!(
            "[sitelens_viewer] overlay needs {} vertices, buffer holds {}",
            vertices.len(),
            state.overlay_capacity
        );
        return;
    }
    state
        .queue
        .write_buffer(&state.overlay_buffer, 0, cast_slice(&vertices));

    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("overlay-pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    pass.set_pipeline(&state.overlay_pipeline);
    pass.set_vertex_buffer(0, state.overlay_buffer.slice(..));
    pass.draw(0..vertices.len() as u32, 0..1);
}
