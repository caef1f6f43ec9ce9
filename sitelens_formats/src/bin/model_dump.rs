//! Print the container layout and drawable primitives of a GLB model, and
//! optionally cross-check element bindings against it.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sitelens_formats::{load_element_records, load_model_file, peek_glb_header};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// GLB model to inspect
    #[arg(long)]
    model: PathBuf,

    /// Optional element records JSON to validate against the model
    #[arg(long)]
    elements: Option<PathBuf>,

    /// Write the imported primitive table as JSON
    #[arg(long)]
    json: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let bytes = std::fs::read(&args.model)
        .with_context(|| format!("reading {}", args.model.display()))?;
    let header = peek_glb_header(&bytes)?;
    println!(
        "{}: GLB v{} ({} bytes, {} chunks)",
        args.model.display(),
        header.version,
        header.declared_length,
        header.chunks.len()
    );
    for chunk in &header.chunks {
        println!(
            "  chunk {:<10} offset {:>10} length {:>10}",
            chunk.kind.label(),
            chunk.offset,
            chunk.length
        );
    }

    let asset = load_model_file(&args.model)?;
    println!(
        "{} primitives ({} nodes visited, {} non-triangle skipped, {} unreadable)",
        asset.report.primitives,
        asset.report.nodes_visited,
        asset.report.skipped_topology,
        asset.report.skipped_unreadable
    );
    for (index, primitive) in asset.primitives.iter().enumerate() {
        println!(
            "{index:>6} {label:<40} {verts:>8} verts {tris:>8} tris  at [{x:.2}, {y:.2}, {z:.2}]",
            label = primitive.label(),
            verts = primitive.positions.len(),
            tris = primitive.triangle_count(),
            x = primitive.translation[0],
            y = primitive.translation[1],
            z = primitive.translation[2],
        );
    }

    if let Some(path) = args.elements.as_ref() {
        let records = load_element_records(path)?;
        let count = asset.primitive_count() as u32;
        let mut bound = BTreeSet::new();
        for record in &records {
            match record.index_binding() {
                Ok(indices) => {
                    let missing = indices.iter().filter(|&&index| index >= count).count();
                    if missing > 0 {
                        println!(
                            "element {} ({}) references {missing} indices outside the model",
                            record.id, record.name
                        );
                    }
                    bound.extend(indices.into_iter().filter(|&index| index < count));
                }
                Err(err) => println!("element {} ({}) malformed binding: {err}", record.id, record.name),
            }
        }
        println!(
            "{} elements bind {} of {} primitives",
            records.len(),
            bound.len(),
            count
        );
    }

    if let Some(path) = args.json.as_ref() {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &asset)?;
        writer.flush()?;
    }

    Ok(())
}
