use bytemuck::{Pod, Zeroable};

/// Flat-shaded building geometry. Normals come from screen-space derivatives
/// so imported meshes need no normal attribute.
pub(super) const MESH_SHADER_SOURCE: &str = r#"
struct MeshUniforms {
    view_projection: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> uniforms: MeshUniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
};

struct InstanceInput {
    @location(1) offset: vec4<f32>,
    @location(2) color: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) color: vec4<f32>,
};

@vertex
fn mesh_vs_main(vertex: VertexInput, instance: InstanceInput) -> VertexOutput {
    let world = vertex.position + instance.offset.xyz;
    var out: VertexOutput;
    out.clip_position = uniforms.view_projection * vec4<f32>(world, 1.0);
    out.world_position = world;
    out.color = instance.color;
    return out;
}

@fragment
fn mesh_fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let normal = normalize(cross(dpdx(input.world_position), dpdy(input.world_position)));
    let light_dir = normalize(vec3<f32>(0.4, 0.9, 0.3));
    let diffuse = abs(dot(normal, light_dir));
    let shade = 0.35 + 0.65 * diffuse;
    return vec4<f32>(input.color.rgb * shade, input.color.a);
}
"#;

/// Id pass: every fragment writes its primitive's flat pick colour.
pub(super) const PICK_SHADER_SOURCE: &str = r#"
struct PickUniforms {
    view_projection: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> uniforms: PickUniforms;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) @interpolate(flat) color: vec4<f32>,
};

@vertex
fn pick_vs_main(
    @location(0) position: vec3<f32>,
    @location(1) offset: vec4<f32>,
    @location(2) color: vec4<f32>,
) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = uniforms.view_projection * vec4<f32>(position + offset.xyz, 1.0);
    out.color = color;
    return out;
}

@fragment
fn pick_fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return input.color;
}
"#;

/// Box-selection rectangle drawn over the scene in NDC.
pub(super) const OVERLAY_SHADER_SOURCE: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn overlay_vs_main(
    @location(0) position: vec2<f32>,
    @location(1) color: vec4<f32>,
) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.color = color;
    return out;
}

@fragment
fn overlay_fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return input.color;
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(super) struct OverlayVertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
}

const RECT_FILL: [f32; 4] = [0.25, 0.55, 1.0, 0.18];
const RECT_EDGE: [f32; 4] = [0.35, 0.65, 1.0, 0.9];
/// Edge thickness in NDC units along each axis.
const EDGE_WIDTH: f32 = 0.004;

/// Triangle list for a filled rectangle with a border. Corners are
/// normalised viewport coordinates (top-left origin).
pub(super) fn selection_rect_vertices(min: [f32; 2], max: [f32; 2]) -> Vec<OverlayVertex> {
    let to_ndc = |[x, y]: [f32; 2]| [x * 2.0 - 1.0, 1.0 - y * 2.0];
    let [x0, y1] = to_ndc(min);
    let [x1, y0] = to_ndc(max);

    let mut vertices = Vec::with_capacity(30);
    push_quad(&mut vertices, [x0, y0], [x1, y1], RECT_FILL);
    let (ex, ey) = (EDGE_WIDTH, EDGE_WIDTH);
    push_quad(&mut vertices, [x0, y1 - ey], [x1, y1], RECT_EDGE);
    push_quad(&mut vertices, [x0, y0], [x1, y0 + ey], RECT_EDGE);
    push_quad(&mut vertices, [x0, y0], [x0 + ex, y1], RECT_EDGE);
    push_quad(&mut vertices, [x1 - ex, y0], [x1, y1], RECT_EDGE);
    vertices
}

fn push_quad(out: &mut Vec<OverlayVertex>, lo: [f32; 2], hi: [f32; 2], color: [f32; 4]) {
    let corners = [
        [lo[0], lo[1]],
        [hi[0], lo[1]],
        [hi[0], hi[1]],
        [lo[0], lo[1]],
        [hi[0], hi[1]],
        [lo[0], hi[1]],
    ];
    out.extend(corners.into_iter().map(|position| OverlayVertex { position, color }));
}
