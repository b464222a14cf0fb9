//! Cubic index regions on 3D voxel grids
//!
//! A region is an axis-aligned box of voxel indices described per axis by a
//! half-open range `[start, stop)`. Regions are built around a center index
//! with a half extent (the "region size"), optionally clipped to a set of
//! bounds, and enumerated with x varying fastest to match the Fortran order
//! of the volume data.

/// Integer voxel index (x, y, z); may be negative before clipping
pub type VoxelIndex = [i64; 3];

/// Index bounds used for clipping and validity checks
///
/// Both `min` and `max` are inclusive clip values. For a volume they are
/// `[0, 0, 0]` and the volume size, so a region `[start, stop)` lies inside
/// the volume exactly when `start >= min` and `stop <= max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub min: VoxelIndex,
    pub max: VoxelIndex,
}

impl Bounds {
    pub fn new(min: VoxelIndex, max: VoxelIndex) -> Self {
        Self { min, max }
    }

    /// Whether `index` addresses a voxel, i.e. `min <= index < max`
    pub fn contains(&self, index: VoxelIndex) -> bool {
        (0..3).all(|a| index[a] >= self.min[a] && index[a] < self.max[a])
    }
}

/// Axis-aligned region of voxel indices, `start` inclusive, `stop` exclusive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub start: VoxelIndex,
    pub stop: VoxelIndex,
}

impl Region {
    /// Region spanning `center ± half_size` on every axis
    pub fn around(center: VoxelIndex, half_size: i64) -> Self {
        let mut start = [0i64; 3];
        let mut stop = [0i64; 3];
        for a in 0..3 {
            start[a] = center[a] - half_size;
            stop[a] = center[a] + half_size + 1;
        }
        Self { start, stop }
    }

    /// Clamp start and stop of every axis into `[bounds.min, bounds.max]`
    ///
    /// A region lying entirely outside the bounds collapses to an empty one.
    pub fn clipped(self, bounds: &Bounds) -> Self {
        let mut start = self.start;
        let mut stop = self.stop;
        for a in 0..3 {
            start[a] = start[a].clamp(bounds.min[a], bounds.max[a]);
            stop[a] = stop[a].clamp(bounds.min[a], bounds.max[a]);
        }
        Self { start, stop }
    }

    /// True iff the region does not exceed `bounds` on any side
    pub fn is_within(&self, bounds: &Bounds) -> bool {
        (0..3).all(|a| self.start[a] >= bounds.min[a] && self.stop[a] <= bounds.max[a])
    }

    /// Number of indices per axis
    pub fn extent(&self) -> [i64; 3] {
        let mut extent = [0i64; 3];
        for a in 0..3 {
            extent[a] = (self.stop[a] - self.start[a]).max(0);
        }
        extent
    }

    pub fn is_empty(&self) -> bool {
        self.extent().iter().any(|&e| e == 0)
    }

    pub fn len(&self) -> usize {
        self.extent().iter().product::<i64>() as usize
    }

    /// Every index of the region, x fastest and z outermost
    pub fn points(&self) -> RegionPoints {
        RegionPoints {
            region: *self,
            next: if self.is_empty() { None } else { Some(self.start) },
        }
    }
}

/// Build the region `center ± half_size`, clipped when `clip` is given
pub fn region(center: VoxelIndex, half_size: i64, clip: Option<&Bounds>) -> Region {
    let region = Region::around(center, half_size);
    match clip {
        Some(bounds) => region.clipped(bounds),
        None => region,
    }
}

/// Whether `region` lies inside `bounds` (see [`Region::is_within`])
pub fn is_valid_region(region: &Region, bounds: &Bounds) -> bool {
    region.is_within(bounds)
}

/// Iterator over the indices of a [`Region`]
#[derive(Clone, Debug)]
pub struct RegionPoints {
    region: Region,
    next: Option<VoxelIndex>,
}

impl Iterator for RegionPoints {
    type Item = VoxelIndex;

    fn next(&mut self) -> Option<VoxelIndex> {
        let current = self.next?;
        let Region { start, stop } = self.region;

        let mut following = current;
        self.next = None;
        for a in 0..3 {
            following[a] += 1;
            if following[a] < stop[a] {
                self.next = Some(following);
                break;
            }
            following[a] = start[a];
        }
        Some(current)
    }
}
