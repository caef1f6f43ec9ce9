use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Cursor, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail, ensure};
use byteorder::{LittleEndian, ReadBytesExt};
use glam::{Mat3, Mat4, Vec3};
use memmap2::MmapOptions;
use serde::Serialize;

const GLB_MAGIC: u32 = 0x4654_6c67; // 'glTF' little-endian
const GLB_VERSION: u32 = 2;
const GLB_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_JSON: u32 = 0x4e4f_534a; // 'JSON'
const CHUNK_BIN: u32 = 0x004e_4942; // 'BIN\0'

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GlbChunkKind {
    Json,
    Bin,
    Unknown(u32),
}

impl GlbChunkKind {
    fn from_raw(raw: u32) -> Self {
        match raw {
            CHUNK_JSON => GlbChunkKind::Json,
            CHUNK_BIN => GlbChunkKind::Bin,
            other => GlbChunkKind::Unknown(other),
        }
    }

    pub fn label(self) -> String {
        match self {
            GlbChunkKind::Json => String::from("JSON"),
            GlbChunkKind::Bin => String::from("BIN"),
            GlbChunkKind::Unknown(raw) => format!("{raw:#010x}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GlbChunk {
    pub kind: GlbChunkKind,
    /// Offset of the chunk payload (after its 8 byte header).
    pub offset: usize,
    pub length: u32,
}

/// Container-level metadata read without touching the JSON document.
#[derive(Debug, Clone, Serialize)]
pub struct GlbHeader {
    pub version: u32,
    pub declared_length: u32,
    pub chunks: Vec<GlbChunk>,
}

impl GlbHeader {
    pub fn bin_chunk(&self) -> Option<&GlbChunk> {
        self.chunks
            .iter()
            .find(|chunk| chunk.kind == GlbChunkKind::Bin)
    }
}

/// Validate the GLB container framing so corrupt uploads fail with a precise
/// message before the glTF parser sees them.
pub fn peek_glb_header(bytes: &[u8]) -> Result<GlbHeader> {
    ensure!(
        bytes.len() >= GLB_HEADER_LEN,
        "GLB file is too small to contain a header ({} bytes)",
        bytes.len()
    );

    let mut cursor = Cursor::new(bytes);
    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != GLB_MAGIC {
        bail!("unexpected GLB magic {magic:#010x}, expected 'glTF'");
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    ensure!(
        version == GLB_VERSION,
        "unsupported GLB container version {version}"
    );
    let declared_length = cursor.read_u32::<LittleEndian>()?;
    ensure!(
        declared_length as usize <= bytes.len(),
        "GLB declares {declared_length} bytes but only {} are present",
        bytes.len()
    );

    let mut chunks = Vec::new();
    let mut offset = GLB_HEADER_LEN;
    while offset + CHUNK_HEADER_LEN <= declared_length as usize {
        cursor.seek(SeekFrom::Start(offset as u64))?;
        let length = cursor.read_u32::<LittleEndian>()?;
        let kind = GlbChunkKind::from_raw(cursor.read_u32::<LittleEndian>()?);
        let payload = offset + CHUNK_HEADER_LEN;
        let end = payload
            .checked_add(length as usize)
            .ok_or_else(|| anyhow!("GLB chunk {} length overflow", chunks.len()))?;
        ensure!(
            end <= declared_length as usize,
            "GLB chunk {} ({}) extends beyond the container",
            chunks.len(),
            kind.label()
        );
        chunks.push(GlbChunk {
            kind,
            offset: payload,
            length,
        });
        offset = end;
    }

    match chunks.first() {
        Some(chunk) if chunk.kind == GlbChunkKind::Json => {}
        Some(chunk) => bail!("GLB must start with a JSON chunk, found {}", chunk.kind.label()),
        None => bail!("GLB container has no chunks"),
    }

    Ok(GlbHeader {
        version,
        declared_length,
        chunks,
    })
}

/// Pack a JSON document and an optional binary payload into a GLB container.
pub fn encode_glb(json: &[u8], bin: Option<&[u8]>) -> Vec<u8> {
    let json_padded = padded_len(json.len());
    let bin_padded = bin.map(|data| padded_len(data.len()));
    let total = GLB_HEADER_LEN
        + CHUNK_HEADER_LEN
        + json_padded
        + bin_padded.map_or(0, |len| CHUNK_HEADER_LEN + len);

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());

    out.extend_from_slice(&(json_padded as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(json);
    out.resize(out.len() + json_padded - json.len(), b' ');

    if let (Some(data), Some(len)) = (bin, bin_padded) {
        out.extend_from_slice(&(len as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(data);
        out.resize(out.len() + len - data.len(), 0);
    }
    out
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(4) * 4
}

/// One drawable extracted from the asset, with its world transform resolved.
///
/// The linear part of the world matrix is baked into `positions`; the
/// translation is kept separate so the viewer can displace primitives without
/// touching vertex data.
#[derive(Debug, Clone, Serialize)]
pub struct ImportedPrimitive {
    pub node_name: Option<String>,
    pub mesh_name: Option<String>,
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub translation: [f32; 3],
}

impl ImportedPrimitive {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn label(&self) -> String {
        match (&self.node_name, &self.mesh_name) {
            (Some(node), Some(mesh)) if node != mesh => format!("{node}/{mesh}"),
            (Some(node), _) => node.clone(),
            (None, Some(mesh)) => mesh.clone(),
            (None, None) => String::from("<unnamed>"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub nodes_visited: usize,
    pub primitives: usize,
    pub skipped_topology: usize,
    pub skipped_unreadable: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelAsset {
    pub primitives: Vec<ImportedPrimitive>,
    pub report: ImportReport,
}

impl ModelAsset {
    pub fn from_glb_bytes(bytes: &[u8]) -> Result<Self> {
        peek_glb_header(bytes).context("validating GLB container")?;
        let gltf = gltf::Gltf::from_slice(bytes).context("parsing glTF document")?;
        let blob = gltf.blob.as_deref();
        let document = &gltf.document;

        let roots: Vec<gltf::Node> = match document
            .default_scene()
            .or_else(|| document.scenes().next())
        {
            Some(scene) => scene.nodes().collect(),
            None => {
                let children: BTreeSet<usize> = document
                    .nodes()
                    .flat_map(|node| node.children().map(|child| child.index()))
                    .collect();
                document
                    .nodes()
                    .filter(|node| !children.contains(&node.index()))
                    .collect()
            }
        };

        let mut report = ImportReport::default();
        let mut primitives = Vec::new();
        // Depth-first in document order; pushing children reversed keeps the
        // visiting order stable so indices match across imports.
        let mut stack: Vec<(gltf::Node, Mat4, usize)> = roots
            .into_iter()
            .rev()
            .map(|node| (node, Mat4::IDENTITY, 0))
            .collect();
        // Node indices from the root down to the node being visited.
        let mut ancestry: Vec<usize> = Vec::new();

        while let Some((node, parent, depth)) = stack.pop() {
            ancestry.truncate(depth);
            if ancestry.contains(&node.index()) {
                bail!(
                    "node hierarchy has a cycle through node {} (path {:?})",
                    node.index(),
                    ancestry
                );
            }
            ancestry.push(node.index());
            report.nodes_visited += 1;
            let local = Mat4::from_cols_array_2d(&node.transform().matrix());
            let world = parent * local;

            if let Some(mesh) = node.mesh() {
                for primitive in mesh.primitives() {
                    if primitive.mode() != gltf::mesh::Mode::Triangles {
                        report.skipped_topology += 1;
                        continue;
                    }
                    match read_primitive(&primitive, blob, world) {
                        Some((positions, indices, translation)) => {
                            primitives.push(ImportedPrimitive {
                                node_name: node.name().map(str::to_string),
                                mesh_name: mesh.name().map(str::to_string),
                                positions,
                                indices,
                                translation,
                            });
                        }
                        None => {
                            log::warn!(
                                "[formats] skipping unreadable primitive {} of mesh {}",
                                primitive.index(),
                                mesh.index()
                            );
                            report.skipped_unreadable += 1;
                        }
                    }
                }
            }

            let children: Vec<gltf::Node> = node.children().collect();
            for child in children.into_iter().rev() {
                stack.push((child, world, depth + 1));
            }
        }

        report.primitives = primitives.len();
        Ok(ModelAsset { primitives, report })
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }
}

fn read_primitive(
    primitive: &gltf::Primitive,
    blob: Option<&[u8]>,
    world: Mat4,
) -> Option<(Vec<[f32; 3]>, Vec<u32>, [f32; 3])> {
    let reader = primitive.reader(|buffer| match buffer.source() {
        gltf::buffer::Source::Bin => blob,
        gltf::buffer::Source::Uri(_) => None,
    });
    let local_positions: Vec<[f32; 3]> = reader.read_positions()?.collect();
    if local_positions.is_empty() {
        return None;
    }
    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..local_positions.len() as u32).collect(),
    };
    let vertex_count = local_positions.len() as u32;
    if indices.len() % 3 != 0 || indices.iter().any(|&index| index >= vertex_count) {
        return None;
    }

    let linear = Mat3::from_mat4(world);
    let translation = world.w_axis.truncate();
    let positions = local_positions
        .into_iter()
        .map(|position| (linear * Vec3::from(position)).to_array())
        .collect();
    Some((positions, indices, translation.to_array()))
}

/// Accepts plain filesystem paths and `file://` URLs. Remote schemes are
/// rejected; fetching assets is the host's job.
pub fn resolve_model_reference(reference: &str) -> Result<PathBuf> {
    let trimmed = reference.trim();
    ensure!(!trimmed.is_empty(), "model reference is empty");
    if let Some(path) = trimmed.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = trimmed.split_once("://") {
        bail!("unsupported model reference scheme '{scheme}' in {trimmed}");
    }
    Ok(PathBuf::from(trimmed))
}

pub fn load_model_file<P: AsRef<Path>>(path: P) -> Result<ModelAsset> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("opening model asset {}", path.display()))?;
    let mmap = unsafe { MmapOptions::new().map(&file) }
        .with_context(|| format!("memory-mapping model asset {}", path.display()))?;
    let asset = ModelAsset::from_glb_bytes(&mmap)
        .with_context(|| format!("importing model asset {}", path.display()))?;
    log::info!(
        "[formats] imported {} primitives from {} ({} nodes, {} skipped topology, {} unreadable)",
        asset.report.primitives,
        path.display(),
        asset.report.nodes_visited,
        asset.report.skipped_topology,
        asset.report.skipped_unreadable
    );
    Ok(asset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// One triangle (3 positions, no index buffer) referenced by `primitive_count`
    /// primitives of a single mesh, instanced by two nodes.
    fn triangle_glb(primitive_count: usize, extra_points_primitive: bool) -> Vec<u8> {
        let mut bin = Vec::new();
        for value in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            bin.extend_from_slice(&value.to_le_bytes());
        }
        let mut primitives: Vec<String> = (0..primitive_count)
            .map(|_| String::from(r#"{"attributes":{"POSITION":0},"mode":4}"#))
            .collect();
        if extra_points_primitive {
            primitives.push(String::from(r#"{"attributes":{"POSITION":0},"mode":0}"#));
        }
        let json = format!(
            r#"{{
  "asset": {{"version": "2.0"}},
  "scene": 0,
  "scenes": [{{"nodes": [0]}}],
  "nodes": [
    {{"name": "floor", "mesh": 0, "translation": [1.0, 2.0, 3.0], "children": [1]}},
    {{"name": "slab", "mesh": 0, "scale": [2.0, 2.0, 2.0]}}
  ],
  "meshes": [{{"name": "tri", "primitives": [{}]}}],
  "buffers": [{{"byteLength": 36}}],
  "bufferViews": [{{"buffer": 0, "byteOffset": 0, "byteLength": 36}}],
  "accessors": [{{
    "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
    "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
  }}]
}}"#,
            primitives.join(",")
        );
        encode_glb(json.as_bytes(), Some(&bin))
    }

    #[test]
    fn peeks_chunk_table() {
        let bytes = triangle_glb(1, false);
        let header = peek_glb_header(&bytes).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.declared_length as usize, bytes.len());
        assert_eq!(header.chunks.len(), 2);
        assert_eq!(header.chunks[0].kind, GlbChunkKind::Json);
        assert_eq!(header.bin_chunk().map(|chunk| chunk.length), Some(36));
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let mut bytes = triangle_glb(1, false);
        let err = peek_glb_header(&bytes[..8]).unwrap_err();
        assert!(err.to_string().contains("too small"));

        let truncated = &bytes[..bytes.len() - 4];
        let err = peek_glb_header(truncated).unwrap_err();
        assert!(err.to_string().contains("declares"));

        bytes[0] = b'x';
        let err = peek_glb_header(&bytes).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn enumerates_every_triangle_primitive_once() {
        let bytes = triangle_glb(3, true);
        let asset = ModelAsset::from_glb_bytes(&bytes).unwrap();
        // Two nodes instance the mesh, three triangle primitives each.
        assert_eq!(asset.primitive_count(), 6);
        assert_eq!(asset.report.skipped_topology, 2);
        assert_eq!(asset.report.nodes_visited, 2);
        assert!(asset.primitives.iter().all(|p| p.triangle_count() == 1));
    }

    #[test]
    fn bakes_linear_part_and_keeps_translation() {
        let bytes = triangle_glb(1, false);
        let asset = ModelAsset::from_glb_bytes(&bytes).unwrap();
        let parent = &asset.primitives[0];
        assert_eq!(parent.translation, [1.0, 2.0, 3.0]);
        assert_eq!(parent.positions[1], [1.0, 0.0, 0.0]);
        assert_eq!(parent.label(), "floor/tri");

        let child = &asset.primitives[1];
        assert_eq!(child.translation, [1.0, 2.0, 3.0]);
        assert_eq!(child.positions[1], [2.0, 0.0, 0.0]);
        assert_eq!(child.positions[2], [0.0, 2.0, 0.0]);
        assert_eq!(child.indices, vec![0, 1, 2]);
    }

    #[test]
    fn cyclic_node_hierarchy_is_an_error() {
        let json = r#"{
  "asset": {"version": "2.0"},
  "scene": 0,
  "scenes": [{"nodes": [0]}],
  "nodes": [
    {"name": "a", "children": [1]},
    {"name": "b", "children": [0]}
  ]
}"#;
        let bytes = encode_glb(json.as_bytes(), None);
        let err = ModelAsset::from_glb_bytes(&bytes).unwrap_err();
        assert!(format!("{err:#}").contains("cycle"));
    }

    #[test]
    fn loads_from_disk_and_resolves_file_urls() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&triangle_glb(2, false)).unwrap();
        let url = format!("file://{}", file.path().display());
        let path = resolve_model_reference(&url).unwrap();
        let asset = load_model_file(&path).unwrap();
        assert_eq!(asset.primitive_count(), 4);
    }

    #[test]
    fn rejects_remote_references() {
        let err = resolve_model_reference("https://example.com/model.glb").unwrap_err();
        assert!(err.to_string().contains("https"));
        assert!(resolve_model_reference("   ").is_err());
        assert_eq!(
            resolve_model_reference("models/site.glb").unwrap(),
            PathBuf::from("models/site.glb")
        );
    }
}
