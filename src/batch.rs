//! Reconstruction of every electrode of an implant in one pass
//!
//! Inputs are planning points in RAS, as exported by the planning software.
//! They are converted to the LPS search frame, reconstructed against one
//! shared threshold, and reported back in RAS with per-contact labels.

use serde::Serialize;

use crate::electrode_model::ModelTable;
use crate::error::{BatchError, ModelError};
use crate::fiducials::Pairing;
use crate::trajectory::{
    ContactEstimate, Endpoints, HeadEstimate, TailEstimate, TrajectoryConstructor,
};
use crate::utils::vector::{add, distance, mul, scale, sub, Point3};
use crate::volume::{Volume, RAS_LPS_FLIP};

/// Distance of the direction end point past the last contact (mm)
pub const DIRECTION_EXTENSION: f64 = 3.0;

/// One electrode to reconstruct
#[derive(Clone, Debug, PartialEq)]
pub struct ElectrodeRequest {
    pub name: String,
    /// Planned entry (RAS)
    pub entry: Point3,
    /// Planned target (RAS)
    pub target: Point3,
    /// Key into the model table
    pub model: String,
    /// The entry already marks the head of the electrode
    pub entry_is_head: bool,
    /// The target already marks the tail of the electrode
    pub target_is_tail: bool,
}

impl ElectrodeRequest {
    pub fn new(name: impl Into<String>, entry: Point3, target: Point3, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry,
            target,
            model: model.into(),
            entry_is_head: false,
            target_is_tail: false,
        }
    }

    /// Endpoints in the LPS search frame
    pub fn endpoints(&self) -> Endpoints {
        let entry = mul(self.entry, RAS_LPS_FLIP);
        let target = mul(self.target, RAS_LPS_FLIP);
        Endpoints::new(
            if self.entry_is_head { HeadEstimate::Head(entry) } else { HeadEstimate::Entry(entry) },
            if self.target_is_tail { TailEstimate::Tail(target) } else { TailEstimate::Target(target) },
        )
    }
}

/// Requests for paired fiducials, each with the model closest to its planned length
pub fn requests_from_pairing(pairing: &Pairing, models: &ModelTable) -> Result<Vec<ElectrodeRequest>, ModelError> {
    pairing
        .electrodes
        .iter()
        .map(|electrode| {
            let model = models.closest_to_length(electrode.length()).ok_or(ModelError::Empty)?;
            tracing::debug!(
                electrode = %electrode.name,
                model = %model.name,
                planned_length = electrode.length(),
                "model selected"
            );
            Ok(ElectrodeRequest {
                entry_is_head: electrode.entry_is_head,
                target_is_tail: electrode.target_is_tail,
                ..ElectrodeRequest::new(
                    electrode.name.clone(),
                    electrode.entry,
                    electrode.target,
                    model.name.clone(),
                )
            })
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LabelledContact {
    pub label: String,
    /// Contact center (RAS)
    pub position: Point3,
    pub refined: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ElectrodeReport {
    pub name: String,
    pub model: String,
    pub contacts: Vec<LabelledContact>,
    /// Point `DIRECTION_EXTENSION` past the last contact along the first→last axis
    pub direction_end: Option<Point3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ElectrodeReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchReport {
    pub threshold: f64,
    pub electrodes: Vec<ElectrodeReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.electrodes.iter().filter(|e| e.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.electrodes.len() - self.succeeded()
    }
}

/// Point `extension` past the last contact, along the first→last direction
///
/// `None` with fewer than two distinct contacts.
pub fn direction_end_point(contacts: &[Point3], extension: f64) -> Option<Point3> {
    let (first, last) = (*contacts.first()?, *contacts.last()?);
    let delta = distance(first, last);
    if delta == 0.0 {
        return None;
    }
    Some(add(last, scale(sub(last, first), extension / delta)))
}

fn label_contacts(name: &str, contacts: &[ContactEstimate]) -> Vec<LabelledContact> {
    contacts
        .iter()
        .enumerate()
        .map(|(k, c)| LabelledContact {
            label: format!("{}{}", name, k + 1),
            position: c.position,
            refined: c.refined,
        })
        .collect()
}

fn reconstruct_one(
    constructor: &TrajectoryConstructor<'_>,
    models: &ModelTable,
    request: &ElectrodeRequest,
) -> Result<Vec<ContactEstimate>, BatchError> {
    let model = models.get(&request.model)?;
    Ok(constructor.reconstruct(&request.endpoints(), &model.geometry)?)
}

/// Reconstruct all `requests` against `volume`
///
/// The threshold is computed once from the volume when not given. A failing
/// electrode keeps its error in the report and does not stop the batch.
pub fn run_batch(
    volume: &Volume,
    requests: &[ElectrodeRequest],
    models: &ModelTable,
    threshold: Option<f64>,
) -> Result<BatchReport, BatchError> {
    let constructor = TrajectoryConstructor::new(volume, threshold)?;
    tracing::info!(
        electrodes = requests.len(),
        threshold = constructor.threshold(),
        "starting batch reconstruction"
    );

    let electrodes = requests
        .iter()
        .map(|request| match reconstruct_one(&constructor, models, request) {
            Ok(contacts) => {
                let positions: Vec<Point3> = contacts.iter().map(|c| c.position).collect();
                ElectrodeReport {
                    name: request.name.clone(),
                    model: request.model.clone(),
                    contacts: label_contacts(&request.name, &contacts),
                    direction_end: direction_end_point(&positions, DIRECTION_EXTENSION),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(electrode = %request.name, error = %e, "reconstruction failed");
                ElectrodeReport {
                    name: request.name.clone(),
                    model: request.model.clone(),
                    contacts: Vec::new(),
                    direction_end: None,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect();

    let report = BatchReport { threshold: constructor.threshold(), electrodes };
    tracing::info!(succeeded = report.succeeded(), failed = report.failed(), "batch done");
    Ok(report)
}
