//! Pairing of planning fiducials into per-electrode entry/target points
//!
//! Planning software marks each electrode with two labelled points, e.g.
//! `A` and `A1` or `B` and `B_1`. Labels are reduced to the electrode name by
//! removing every `_1`/`1`, and the two points of a name are ordered so that
//! the entry is the one farther from the origin (outside the brain).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::vector::{distance, Point3};

/// One labelled point in RAS coordinates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fiducial {
    pub label: String,
    pub position: Point3,
    #[serde(default = "selected_by_default")]
    pub selected: bool,
    /// The point already sits on the electrode end, so no head/tail search
    #[serde(default)]
    pub exact: bool,
}

fn selected_by_default() -> bool {
    true
}

impl Fiducial {
    pub fn new(label: impl Into<String>, position: Point3) -> Self {
        Self { label: label.into(), position, selected: true, exact: false }
    }
}

/// Entry and target of one electrode (RAS)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ElectrodeFiducials {
    pub name: String,
    pub entry: Point3,
    pub target: Point3,
    /// Entry came from an `exact` fiducial
    pub entry_is_head: bool,
    /// Target came from an `exact` fiducial
    pub target_is_tail: bool,
}

impl ElectrodeFiducials {
    /// Planned entry–target distance
    pub fn length(&self) -> f64 {
        distance(self.entry, self.target)
    }
}

/// Problems found while pairing; none of them aborts the pairing
#[derive(Clone, Debug, PartialEq)]
pub enum PairingIssue {
    /// More than two points share a name; the latest one replaced the target
    Duplicate { name: String },
    /// Only one point has this name; the electrode is dropped
    MissingEndpoint { name: String },
}

impl fmt::Display for PairingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingIssue::Duplicate { name } => write!(f, "\"{}\" has been defined more than 2 times", name),
            PairingIssue::MissingEndpoint { name } => write!(f, "\"{}\" is missing entry or target", name),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Pairing {
    /// Complete electrodes sorted by name
    pub electrodes: Vec<ElectrodeFiducials>,
    pub issues: Vec<PairingIssue>,
}

/// Electrode name of a fiducial label: every `_1` or `1` removed, left to right
pub fn electrode_name(label: &str) -> String {
    let mut name = String::with_capacity(label.len());
    let mut chars = label.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '_' if chars.peek() == Some(&'1') => {
                chars.next();
            }
            '1' => {}
            _ => name.push(c),
        }
    }
    name
}

fn squared_norm(p: Point3) -> f64 {
    p[0] * p[0] + p[1] * p[1] + p[2] * p[2]
}

/// Group selected fiducials by electrode name into entry/target pairs
pub fn pair_fiducials(fiducials: &[Fiducial]) -> Pairing {
    // (name, entry, target), each point with its `exact` flag; insertion order
    // is kept until the final sort
    type Marked = (Point3, bool);
    let mut partial: Vec<(String, Marked, Option<Marked>)> = Vec::new();
    let mut issues = Vec::new();

    for fiducial in fiducials.iter().filter(|f| f.selected) {
        let name = electrode_name(&fiducial.label);
        let p2 = (fiducial.position, fiducial.exact);

        match partial.iter_mut().find(|(n, _, _)| *n == name) {
            Some((_, entry, target)) => {
                if target.is_some() {
                    issues.push(PairingIssue::Duplicate { name: name.clone() });
                }
                let p1 = *entry;
                if squared_norm(p2.0) - squared_norm(p1.0) > 0.0 {
                    *entry = p2;
                    *target = Some(p1);
                } else {
                    *target = Some(p2);
                }
            }
            None => partial.push((name, p2, None)),
        }
    }

    let mut electrodes = Vec::with_capacity(partial.len());
    for (name, (entry, entry_is_head), target) in partial {
        match target {
            Some((target, target_is_tail)) => electrodes.push(ElectrodeFiducials {
                name,
                entry,
                target,
                entry_is_head,
                target_is_tail,
            }),
            None => issues.push(PairingIssue::MissingEndpoint { name }),
        }
    }
    electrodes.sort_by(|a, b| a.name.cmp(&b.name));

    for issue in &issues {
        tracing::warn!(%issue, "fiducial pairing");
    }
    Pairing { electrodes, issues }
}
