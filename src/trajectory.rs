//! Electrode trajectory reconstruction
//!
//! Reconstructs the contacts of a linear SEEG electrode from a post-implant CT:
//! 1. Locate the head (tip nearest the skull) around the planned entry point
//! 2. Walk from the head past the planned target along the bright shaft to
//!    find the tail
//! 3. Place each contact center along the tail→head axis, snapping it to the
//!    local intensity centroid when that is plausible
//!
//! Every search step relies on one primitive: the intensity-weighted centroid
//! of a cubic voxel region that grows until it contains signal.
//!
//! Search points live in the volume's physical (LPS) frame. Returned contacts
//! are converted with [`LPS_TO_RAS`].

use crate::error::{TrajectoryError, TrajectoryResult};
use crate::region::{is_valid_region, Region, VoxelIndex};
use crate::utils::vector::{distance, mul, next_point, Point3};
use crate::volume::{Volume, RAS_LPS_FLIP};

/// Nominal distance between consecutive contacts along the shaft (mm)
pub const CONTACTS_DIST: f64 = 3.5;
/// Smallest half extent of a centroid search region (voxels)
pub const MIN_REGION_SIZE: i64 = 3;
/// Largest half extent of a centroid search region (voxels)
pub const MAX_REGION_SIZE: i64 = 10;

pub const DEFAULT_CONTACT_LENGTH: f64 = 2.0;
pub const DEFAULT_CONTACT_RADIUS: f64 = 0.8;

/// Output transform applied to every contact: LPS search frame to RAS
///
/// Depends on the orientation convention of the volume loader;
/// [`Volume::from_nifti`] produces LPS, so x and y are negated.
pub const LPS_TO_RAS: Point3 = RAS_LPS_FLIP;

/// Tuning constants of the trajectory search
#[derive(Clone, Debug)]
pub struct SearchParams {
    /// Step between successive shaft samples (default 3.5 mm)
    pub contacts_dist: f64,
    /// Initial half extent of centroid regions (default 3 voxels)
    pub min_region_size: i64,
    /// Half extent of the head scan and cap for centroid growth (default 10 voxels)
    pub max_region_size: i64,
    /// Maximum number of shaft steps while looking for the tail (default 20)
    pub tail_iterations: usize,
    /// Shaft samples closer than this have reached the end of the shaft (default 2.5 mm)
    pub collapse_distance: f64,
    /// Half width of the accepted snap distance around `contacts_dist` (default 0.5 mm)
    pub contact_band: f64,
    /// Initial overshoot when extending the tail to the end of the metal (default 0.5 mm)
    pub extension_start: f64,
    /// Increment of the tail extension (default 0.25 mm)
    pub extension_step: f64,
    /// Cap on tail extension steps (default 1000)
    pub max_extension_steps: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            contacts_dist: CONTACTS_DIST,
            min_region_size: MIN_REGION_SIZE,
            max_region_size: MAX_REGION_SIZE,
            tail_iterations: 20,
            collapse_distance: 2.5,
            contact_band: 0.5,
            extension_start: 0.5,
            extension_step: 0.25,
            max_extension_steps: 1000,
        }
    }
}

/// How the proximal end of the electrode is given
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HeadEstimate {
    /// Exact head position, used as is
    Head(Point3),
    /// Planned entry point; the head is searched around it
    Entry(Point3),
}

/// How the distal end of the electrode is given
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TailEstimate {
    /// Exact tail position, used as is
    Tail(Point3),
    /// Planned target point; the tail is searched past it
    Target(Point3),
}

/// Pair of landmarks defining one electrode
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Endpoints {
    pub head: HeadEstimate,
    pub tail: TailEstimate,
}

impl Endpoints {
    pub fn new(head: HeadEstimate, tail: TailEstimate) -> Self {
        Self { head, tail }
    }

    /// Build from optional inputs: exactly one of head/entry and one of target/tail
    pub fn from_options(
        head: Option<Point3>,
        entry: Option<Point3>,
        target: Option<Point3>,
        tail: Option<Point3>,
    ) -> TrajectoryResult<Self> {
        let head = match (head, entry) {
            (Some(h), None) => HeadEstimate::Head(h),
            (None, Some(e)) => HeadEstimate::Entry(e),
            _ => return Err(TrajectoryError::InvalidEndpointSpecification),
        };
        let tail = match (target, tail) {
            (Some(t), None) => TailEstimate::Target(t),
            (None, Some(l)) => TailEstimate::Tail(l),
            _ => return Err(TrajectoryError::InvalidEndpointSpecification),
        };
        Ok(Self { head, tail })
    }

    fn points(&self) -> [Point3; 2] {
        let head = match self.head {
            HeadEstimate::Head(p) | HeadEstimate::Entry(p) => p,
        };
        let tail = match self.tail {
            TailEstimate::Tail(p) | TailEstimate::Target(p) => p,
        };
        [head, tail]
    }
}

/// Physical layout of an electrode model
#[derive(Clone, Debug, PartialEq)]
pub struct ElectrodeGeometry {
    /// Length of each cylindrical contact (mm)
    pub contact_length: f64,
    /// Contact radius (mm); carried along, not used by the search
    pub contact_radius: f64,
    /// Gap between consecutive contacts, one entry per pair (mm)
    pub distances: Vec<f64>,
}

impl ElectrodeGeometry {
    pub fn new(contact_length: f64, contact_radius: f64, distances: Vec<f64>) -> Self {
        Self { contact_length, contact_radius, distances }
    }

    /// `num_contacts` contacts of default size separated by `spacing`
    pub fn uniform(num_contacts: usize, spacing: f64) -> Self {
        Self::new(
            DEFAULT_CONTACT_LENGTH,
            DEFAULT_CONTACT_RADIUS,
            vec![spacing; num_contacts.saturating_sub(1)],
        )
    }

    pub fn num_contacts(&self) -> usize {
        self.distances.len() + 1
    }

    pub fn validate(&self) -> TrajectoryResult<()> {
        if !(self.contact_length.is_finite() && self.contact_length > 0.0) {
            return Err(TrajectoryError::InvalidGeometry(format!(
                "contact length must be positive, got {}",
                self.contact_length
            )));
        }
        if let Some(d) = self.distances.iter().find(|d| !d.is_finite()) {
            return Err(TrajectoryError::InvalidGeometry(format!(
                "inter-contact distance must be finite, got {}",
                d
            )));
        }
        Ok(())
    }
}

/// One placed contact
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactEstimate {
    /// Contact center in the output (RAS) frame
    pub position: Point3,
    /// Whether the center was snapped to the local intensity centroid
    pub refined: bool,
}

/// Trajectory search bound to one CT volume and intensity threshold
///
/// Holds no per-call state; one constructor can serve many electrodes, and
/// the borrowed volume can be shared between constructors.
#[derive(Clone, Debug)]
pub struct TrajectoryConstructor<'a> {
    volume: &'a Volume,
    threshold: f64,
    params: SearchParams,
}

impl<'a> TrajectoryConstructor<'a> {
    /// Bind to `volume`; the threshold is derived from the volume when not given
    pub fn new(volume: &'a Volume, threshold: Option<f64>) -> TrajectoryResult<Self> {
        Self::with_params(volume, threshold, SearchParams::default())
    }

    pub fn with_params(
        volume: &'a Volume,
        threshold: Option<f64>,
        params: SearchParams,
    ) -> TrajectoryResult<Self> {
        let threshold = match threshold {
            Some(t) => t,
            None => volume.compute_threshold()?,
        };
        tracing::debug!(threshold, "trajectory constructor ready");
        Ok(Self { volume, threshold, params })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Intensity centroid near `center`, growing the region from `min_region_size`
    ///
    /// The region grows by one voxel while it holds no mass. A region that
    /// leaves the volume lowers the size cap by one instead. The first size is
    /// always tried, even when `min_region_size >= max_region_size`.
    pub fn point_with_highest_momentum(
        &self,
        center: VoxelIndex,
        min_region_size: i64,
        max_region_size: i64,
    ) -> TrajectoryResult<Point3> {
        let bounds = self.volume.bounds();
        let mut size = min_region_size;
        let mut max_size = max_region_size;
        loop {
            let region = Region::around(center, size);
            if is_valid_region(&region, &bounds) {
                match self.volume.center_of_gravity(&region) {
                    Some(cog) => return Ok(cog),
                    None => size += 1,
                }
            } else {
                max_size -= 1;
            }
            if size >= max_size {
                break;
            }
        }
        Err(TrajectoryError::DegenerateRegion(center))
    }

    /// Centroid near the voxel containing `point`
    fn refine(&self, point: Point3, min_region_size: i64, max_region_size: i64) -> Option<Point3> {
        let center = self.volume.physical_to_index(point);
        self.point_with_highest_momentum(center, min_region_size, max_region_size).ok()
    }

    /// Summed intensity of the in-volume voxels within `region_size` of `index`
    pub fn region_value(&self, index: VoxelIndex, region_size: i64) -> f64 {
        self.volume.region_sum(&Region::around(index, region_size))
    }

    fn is_above_threshold(&self, point: Point3) -> bool {
        self.volume
            .intensity_at_point(point)
            .map_or(false, |v| v > self.threshold)
    }

    /// Head of the electrode near `entry`
    ///
    /// Scans the region around the entry voxel for the first voxel above
    /// threshold whose neighbourhood is also bright (a cluster, not a noise
    /// spike), then refines it to a sub-voxel centroid.
    pub fn find_head(&self, entry: Point3) -> Option<Point3> {
        let (min, max) = (self.params.min_region_size, self.params.max_region_size);
        let center = self.volume.physical_to_index(entry);
        let cluster_mass = min as f64 * self.threshold;

        let seed = Region::around(center, max)
            .clipped(&self.volume.bounds())
            .points()
            .find(|&index| {
                self.volume.intensity_at(index).map_or(false, |v| v > self.threshold)
                    && self.region_value(index, min) > cluster_mass
            })?;

        tracing::debug!(?entry, ?seed, "head seed voxel");
        self.point_with_highest_momentum(seed, min, max).ok()
    }

    /// Tail of the electrode, walking from `head` through and past `target`
    ///
    /// `None` when the walk cannot start: head and target coincide, or no
    /// signal lies beyond the head.
    pub fn find_tail(&self, head: Point3, target: Point3) -> Option<Point3> {
        let p = &self.params;
        let step = p.contacts_dist;
        let (min, max) = (p.min_region_size, p.max_region_size);

        let mut p2 = self.refine(next_point(head, head, target, 2.0 * step)?, min, max)?;
        let p3_geometric = next_point(p2, head, p2, step)?;
        let mut p3 = self.refine(p3_geometric, min, min).unwrap_or(p3_geometric);
        let mut p1 = head;

        for iteration in 0..p.tail_iterations {
            p1 = p2;
            p2 = p3;
            let candidate = next_point(p2, p1, p2, step)?;
            match self.refine(candidate, min, min) {
                Some(refined) => p3 = refined,
                None => {
                    p3 = next_point(p2, p1, p2, step)?;
                    tracing::debug!(iteration, "shaft signal lost, extrapolating");
                    break;
                }
            }
            if distance(p3, p2) < p.collapse_distance {
                tracing::debug!(iteration, "shaft samples collapsed");
                break;
            }
            if self.region_value(self.volume.physical_to_index(p3), 1) < self.threshold {
                tracing::debug!(iteration, "shaft signal below threshold");
                break;
            }
        }

        let p3_intensity = self.volume.intensity_at_point(p3);
        if p3_intensity.map_or(true, |v| v < self.threshold) {
            p3 = p2;
        }

        // follow the metal past the last sample
        let mut dist = distance(p3, p2) + p.extension_start;
        let mut lookahead = p3;
        let mut steps = 0usize;
        while self.is_above_threshold(lookahead) {
            if steps == p.max_extension_steps {
                tracing::warn!(steps, "tail extension hit its step cap");
                break;
            }
            p3 = lookahead;
            lookahead = next_point(p2, p1, p2, dist)?;
            dist += p.extension_step;
            steps += 1;
        }

        tracing::debug!(?head, tail = ?p3, extension_steps = steps, "tail found");
        Some(p3)
    }

    /// Contact centers from `tail` towards `head`, with their snap status
    ///
    /// The first center sits half a contact length from the tail; each next
    /// one is `contact_length + distances[i]` further. A centroid snap is kept
    /// for the first contact, and for the others only when it moves the center
    /// by a plausible inter-contact distance.
    pub fn place_contacts(
        &self,
        head: Point3,
        tail: Point3,
        geometry: &ElectrodeGeometry,
    ) -> TrajectoryResult<Vec<ContactEstimate>> {
        geometry.validate()?;
        let min = self.params.min_region_size;
        let snap_min = self.params.contacts_dist - self.params.contact_band;
        let snap_max = self.params.contacts_dist + self.params.contact_band;
        let contact_length = geometry.contact_length;

        let offsets = std::iter::once(-contact_length / 2.0).chain(geometry.distances.iter().copied());
        let mut center = tail;
        let mut contacts = Vec::with_capacity(geometry.num_contacts());

        for (i, offset) in offsets.enumerate() {
            center = next_point(center, tail, head, contact_length + offset)
                .ok_or(TrajectoryError::CoincidentEndpoints)?;
            let snapped = self.refine(center, min, min).filter(|&refined| {
                let shift = distance(center, refined);
                i == 0 || (snap_min < shift && shift < snap_max)
            });
            contacts.push(ContactEstimate {
                position: mul(snapped.unwrap_or(center), LPS_TO_RAS),
                refined: snapped.is_some(),
            });
        }
        Ok(contacts)
    }

    /// Contact centers from `tail` towards `head`, in the output frame
    pub fn compute_trajectory(
        &self,
        head: Point3,
        tail: Point3,
        geometry: &ElectrodeGeometry,
    ) -> TrajectoryResult<Vec<Point3>> {
        Ok(self
            .place_contacts(head, tail, geometry)?
            .into_iter()
            .map(|c| c.position)
            .collect())
    }

    /// Resolve both endpoints and place all contacts
    pub fn reconstruct(
        &self,
        endpoints: &Endpoints,
        geometry: &ElectrodeGeometry,
    ) -> TrajectoryResult<Vec<ContactEstimate>> {
        if endpoints.points().iter().flatten().any(|c| !c.is_finite()) {
            return Err(TrajectoryError::InvalidEndpointSpecification);
        }

        let head = match endpoints.head {
            HeadEstimate::Head(head) => head,
            HeadEstimate::Entry(entry) => self.find_head(entry).ok_or(TrajectoryError::HeadNotFound)?,
        };
        let tail = match endpoints.tail {
            TailEstimate::Tail(tail) => tail,
            TailEstimate::Target(target) => {
                self.find_tail(head, target).ok_or(TrajectoryError::TailNotFound)?
            }
        };
        if distance(head, tail) == 0.0 {
            return Err(TrajectoryError::CoincidentEndpoints);
        }

        let contacts = self.place_contacts(head, tail, geometry)?;
        tracing::info!(
            ?head,
            ?tail,
            contacts = contacts.len(),
            snapped = contacts.iter().filter(|c| c.refined).count(),
            "electrode reconstructed"
        );
        Ok(contacts)
    }

    /// Contact positions of one electrode, tail first
    pub fn compute_electrode_trajectory(
        &self,
        endpoints: &Endpoints,
        geometry: &ElectrodeGeometry,
    ) -> TrajectoryResult<Vec<Point3>> {
        Ok(self
            .reconstruct(endpoints, geometry)?
            .into_iter()
            .map(|c| c.position)
            .collect())
    }
}
