//! Window-less run: load, optionally box-select through the software pick
//! backend, optionally bind the result, and print what happened.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;
use sitelens_engine::{
    LoadReport, PickPath, SoftwarePickBackend, ViewerController, ViewerEvent,
};
use sitelens_formats::{ElementId, save_element_records};

use crate::cli::Args;

#[derive(Debug, Serialize)]
pub struct HeadlessSummary {
    pub report: LoadReport,
    pub pick: Option<PickPath>,
    pub selected: Vec<u32>,
    pub bound_to: Option<String>,
    pub events: Vec<ViewerEvent>,
}

pub fn run(args: &Args, controller: &mut ViewerController) -> Result<()> {
    let summary = execute(args, controller)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    print_summary(&mut out, &summary, args.json)?;
    Ok(())
}

pub fn execute(args: &Args, controller: &mut ViewerController) -> Result<HeadlessSummary> {
    controller.set_viewport(args.width, args.height);
    // Settles initial materials and layout before any pick.
    controller.frame(0.0, None);

    let mut pick = None;
    if let Some(rect) = args.select {
        let mut backend = SoftwarePickBackend::new();
        controller.pointer_down(rect.min);
        controller.pointer_move(rect.max);
        controller.pointer_up(rect.max);
        let update = controller.frame(0.0, Some(&mut backend));
        pick = update.pick;
        log::info!(
            "[sitelens_viewer] headless selection {:?}: {} primitives selected",
            update.pick,
            controller.selection().selected.len()
        );
    }

    if let Some(id) = args.bind_to.as_deref() {
        let id = ElementId::new(id);
        controller
            .bind_selection(&id)
            .with_context(|| format!("binding selection to element {id}"))?;
        controller.frame(0.0, None);
    }

    if let Some(path) = args.save_elements.as_deref() {
        let records = controller.element_records();
        save_element_records(path, &records)
            .with_context(|| format!("saving element records to {}", path.display()))?;
        log::info!(
            "[sitelens_viewer] wrote {} element records to {}",
            records.len(),
            path.display()
        );
    }

    Ok(HeadlessSummary {
        report: controller.report(),
        pick,
        selected: controller.selection().selected.iter().copied().collect(),
        bound_to: args.bind_to.clone(),
        events: controller.drain_events(),
    })
}

pub fn print_summary<W: Write>(out: &mut W, summary: &HeadlessSummary, json: bool) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, summary).context("serialising summary")?;
        writeln!(out)?;
        return Ok(());
    }

    let report = &summary.report;
    match report.status.error() {
        Some(reason) => writeln!(out, "Load: {:?} ({reason})", report.origin)?,
        None => writeln!(out, "Load: {:?}", report.origin)?,
    }
    writeln!(
        out,
        "  generation {}: {} primitives, {} triangles, {} skipped",
        report.generation, report.primitives, report.triangles, report.skipped_primitives
    )?;
    writeln!(
        out,
        "  elements {} ({} bound), malformed bindings {}, out-of-range indices {}",
        report.elements,
        report.bound_elements,
        report.malformed_bindings,
        report.out_of_range_indices
    )?;
    if report.linear_scan {
        writeln!(out, "  octree: linear scan fallback")?;
    } else if report.excluded_from_octree > 0 {
        writeln!(
            out,
            "  octree: {} primitives excluded",
            report.excluded_from_octree
        )?;
    }
    if let Some(path) = summary.pick {
        writeln!(
            out,
            "Selection via {path:?}: {} primitives {:?}",
            summary.selected.len(),
            summary.selected
        )?;
    }
    if let Some(id) = summary.bound_to.as_deref() {
        writeln!(out, "Bound selection to element {id}")?;
    }
    for event in &summary.events {
        writeln!(out, "{}", serde_json::to_string(event)?)?;
    }
    Ok(())
}
