pub mod elements;
pub mod glb;

pub use elements::{
    BindingError, Dimensions, ElementId, ElementKind, ElementRecord, TrackingStatus,
    load_element_records, parse_element_records, parse_index_binding, save_element_records,
};
pub use glb::{
    GlbChunk, GlbChunkKind, GlbHeader, ImportReport, ImportedPrimitive, ModelAsset, encode_glb,
    load_model_file, peek_glb_header, resolve_model_reference,
};
