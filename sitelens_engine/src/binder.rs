//! Element–mesh binding.
//!
//! The binder owns the building elements of the current session, the
//! index→owners map and the global assignment set. The assignment set is kept
//! equal to the union of every element's bound indices; every mutation goes
//! through this type so the two never drift apart.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use sitelens_formats::{Dimensions, ElementId, ElementKind, ElementRecord, TrackingStatus};
use thiserror::Error;

use crate::scene::{SceneModel, SceneOrigin};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BinderError {
    #[error("unknown element {0}")]
    UnknownElement(ElementId),
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildingElement {
    pub id: ElementId,
    pub name: String,
    pub kind: ElementKind,
    pub floor_level: i32,
    pub dimensions: Option<Dimensions>,
    pub tracking_status: TrackingStatus,
    pub completion_percentage: f32,
    assigned: BTreeSet<u32>,
}

impl BuildingElement {
    pub fn from_record(record: &ElementRecord) -> Self {
        BuildingElement {
            id: record.id.clone(),
            name: record.name.clone(),
            kind: record.element_type,
            floor_level: record.floor_level,
            dimensions: record.dimensions,
            tracking_status: record.tracking_status,
            completion_percentage: record.completion(),
            assigned: BTreeSet::new(),
        }
    }

    pub fn assigned_indices(&self) -> &BTreeSet<u32> {
        &self.assigned
    }

    /// Back to the persisted shape, with the binding in canonical form.
    pub fn to_record(&self) -> ElementRecord {
        let mut record = ElementRecord::new(self.id.as_str(), self.name.clone(), self.kind);
        record.floor_level = self.floor_level;
        record.dimensions = self.dimensions;
        record.tracking_status = self.tracking_status;
        record.completion_percentage = self.completion_percentage;
        record.set_canonical_binding(&self.assigned);
        record
    }
}

/// Outcome of reading persisted bindings, for the load report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindingReport {
    pub elements: usize,
    pub bound_elements: usize,
    pub malformed: usize,
    pub out_of_range: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ElementBinder {
    elements: Vec<BuildingElement>,
    by_id: HashMap<ElementId, usize>,
    /// Element positions (input order) owning each index.
    owners: BTreeMap<u32, BTreeSet<usize>>,
    assignment: BTreeSet<u32>,
    primitive_count: usize,
    report: BindingReport,
}

impl ElementBinder {
    /// Bind records against a scene. For an asset scene the persisted
    /// bindings are used; a synthetic scene binds element `i` to primitive
    /// `i`.
    pub fn from_records(records: &[ElementRecord], scene: &SceneModel) -> Self {
        let mut binder = ElementBinder {
            primitive_count: scene.len(),
            ..ElementBinder::default()
        };

        for record in records {
            let position = binder.elements.len();
            if binder.by_id.contains_key(&record.id) {
                log::warn!(
                    "[binder] duplicate element id {}; lookups resolve to the first",
                    record.id
                );
            } else {
                binder.by_id.insert(record.id.clone(), position);
            }
            binder.elements.push(BuildingElement::from_record(record));

            let indices = match scene.origin() {
                SceneOrigin::Synthetic => BTreeSet::from([position as u32]),
                SceneOrigin::Asset | SceneOrigin::Empty => match record.index_binding() {
                    Ok(indices) => indices,
                    Err(err) => {
                        log::warn!(
                            "[binder] element {} ({}) has a malformed mesh binding, leaving it unbound: {err}",
                            record.id,
                            record.name
                        );
                        binder.report.malformed += 1;
                        continue;
                    }
                },
            };
            let dropped = indices
                .iter()
                .filter(|&&index| index as usize >= binder.primitive_count)
                .count();
            if dropped > 0 {
                log::debug!(
                    "[binder] element {} references {dropped} indices outside the model",
                    record.id
                );
                binder.report.out_of_range += dropped;
            }
            binder.insert_at(position, indices);
        }

        binder.report.elements = binder.elements.len();
        binder.report.bound_elements = binder
            .elements
            .iter()
            .filter(|element| !element.assigned.is_empty())
            .count();
        log::info!(
            "[binder] {} elements, {} bound, {} assigned primitives of {}",
            binder.report.elements,
            binder.report.bound_elements,
            binder.assignment.len(),
            binder.primitive_count
        );
        binder
    }

    pub fn report(&self) -> &BindingReport {
        &self.report
    }

    pub fn elements(&self) -> &[BuildingElement] {
        &self.elements
    }

    pub fn element(&self, id: &ElementId) -> Option<&BuildingElement> {
        self.by_id.get(id).map(|&position| &self.elements[position])
    }

    fn position_of(&self, id: &ElementId) -> Result<usize, BinderError> {
        self.by_id
            .get(id)
            .copied()
            .ok_or_else(|| BinderError::UnknownElement(id.clone()))
    }

    pub fn assignment_set(&self) -> &BTreeSet<u32> {
        &self.assignment
    }

    pub fn is_assigned(&self, index: u32) -> bool {
        self.assignment.contains(&index)
    }

    /// Elements owning `index`, in element order.
    pub fn owners(&self, index: u32) -> Vec<&BuildingElement> {
        self.owners
            .get(&index)
            .map(|positions| positions.iter().map(|&p| &self.elements[p]).collect())
            .unwrap_or_default()
    }

    /// First owner of `index` in element order.
    pub fn element_for_index(&self, index: u32) -> Option<&BuildingElement> {
        self.owners
            .get(&index)
            .and_then(|positions| positions.iter().next())
            .map(|&position| &self.elements[position])
    }

    /// Floor used by the explode transform; unowned primitives sit on floor 1.
    pub fn floor_for_index(&self, index: u32) -> i32 {
        self.element_for_index(index)
            .map(|element| element.floor_level)
            .unwrap_or(1)
    }

    pub fn tracking_for_index(&self, index: u32) -> Option<TrackingStatus> {
        self.element_for_index(index)
            .map(|element| element.tracking_status)
    }

    /// Add `indices` to an element. Indices outside the model are ignored.
    /// Returns the indices whose owners changed.
    pub fn bind<I>(&mut self, id: &ElementId, indices: I) -> Result<Vec<u32>, BinderError>
    where
        I: IntoIterator<Item = u32>,
    {
        let position = self.position_of(id)?;
        Ok(self.insert_at(position, indices))
    }

    fn insert_at<I>(&mut self, position: usize, indices: I) -> Vec<u32>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut changed = Vec::new();
        for index in indices {
            if index as usize >= self.primitive_count {
                continue;
            }
            if self.elements[position].assigned.insert(index) {
                self.owners.entry(index).or_default().insert(position);
                self.assignment.insert(index);
                changed.push(index);
            }
        }
        changed
    }

    /// Remove `indices` from an element. Returns the indices whose owners
    /// changed.
    pub fn unbind<I>(&mut self, id: &ElementId, indices: I) -> Result<Vec<u32>, BinderError>
    where
        I: IntoIterator<Item = u32>,
    {
        let position = self.position_of(id)?;
        let mut changed = Vec::new();
        for index in indices {
            if !self.elements[position].assigned.remove(&index) {
                continue;
            }
            if let Some(owners) = self.owners.get_mut(&index) {
                owners.remove(&position);
                if owners.is_empty() {
                    self.owners.remove(&index);
                    self.assignment.remove(&index);
                }
            }
            changed.push(index);
        }
        Ok(changed)
    }

    pub fn clear_element(&mut self, id: &ElementId) -> Result<Vec<u32>, BinderError> {
        let position = self.position_of(id)?;
        let indices: Vec<u32> = self.elements[position].assigned.iter().copied().collect();
        self.unbind(id, indices)
    }

    /// Update progress. Returns the element's indices, whose tint depends on
    /// the status.
    pub fn set_tracking(
        &mut self,
        id: &ElementId,
        status: TrackingStatus,
        completion_percentage: f32,
    ) -> Result<Vec<u32>, BinderError> {
        let position = self.position_of(id)?;
        let element = &mut self.elements[position];
        element.tracking_status = status;
        element.completion_percentage = if completion_percentage.is_finite() {
            completion_percentage.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Ok(element.assigned.iter().copied().collect())
    }

    pub fn to_records(&self) -> Vec<ElementRecord> {
        self.elements.iter().map(BuildingElement::to_record).collect()
    }
}
