//! CT volume accessor
//!
//! Wraps a 3D scalar image together with its voxel-to-physical affine and the
//! inverse mapping. Physical coordinates follow the LPS convention used by
//! ITK-based tools: NIfTI (RAS) affines are converted on load by negating
//! their first two rows.

use std::path::Path;

use nalgebra::{Matrix4, Vector4};

use crate::error::{TrajectoryError, VolumeError};
use crate::nifti_io::{read_nifti_file, NiftiData};
use crate::region::{Bounds, Region, VoxelIndex};
use crate::utils::threshold::electrode_threshold;
use crate::utils::vector::{add, scale, Point3};

/// Componentwise factor converting between RAS and LPS coordinates
pub const RAS_LPS_FLIP: Point3 = [-1.0, -1.0, 1.0];

/// Read-only 3D intensity volume
#[derive(Clone, Debug)]
pub struct Volume {
    data: Vec<f64>,
    dims: (usize, usize, usize),
    /// Voxel-to-physical transform
    to_physical: Matrix4<f64>,
    /// Physical-to-voxel transform
    to_index: Matrix4<f64>,
}

impl Volume {
    /// Build a volume from Fortran-ordered data and a 4x4 row-major affine
    ///
    /// The affine maps voxel indices to physical coordinates in the frame the
    /// caller works in; no orientation change is applied here.
    pub fn new(
        data: Vec<f64>,
        dims: (usize, usize, usize),
        affine: [f64; 16],
    ) -> Result<Self, VolumeError> {
        let expected = dims.0 * dims.1 * dims.2;
        if data.len() != expected {
            return Err(VolumeError::DimensionMismatch { dims, expected, actual: data.len() });
        }

        let mut to_physical = Matrix4::identity();
        for r in 0..3 {
            for c in 0..4 {
                to_physical[(r, c)] = affine[r * 4 + c];
            }
        }
        let to_index = invert_affine(&to_physical)?;

        Ok(Self { data, dims, to_physical, to_index })
    }

    /// Volume with unit voxels and no offset, physical == index
    pub fn with_identity(data: Vec<f64>, dims: (usize, usize, usize)) -> Result<Self, VolumeError> {
        let mut affine = [0.0; 16];
        affine[0] = 1.0;
        affine[5] = 1.0;
        affine[10] = 1.0;
        affine[15] = 1.0;
        Self::new(data, dims, affine)
    }

    /// Convert a loaded NIfTI image, moving its RAS affine into LPS
    pub fn from_nifti(nifti: NiftiData) -> Result<Self, VolumeError> {
        let mut affine = nifti.affine;
        for c in 0..4 {
            affine[c] *= RAS_LPS_FLIP[0];
            affine[4 + c] *= RAS_LPS_FLIP[1];
        }
        Self::new(nifti.data, nifti.dims, affine)
    }

    /// Read a `.nii` / `.nii.gz` CT volume from disk
    pub fn open(path: &Path) -> Result<Self, TrajectoryError> {
        let nifti = read_nifti_file(path)?;
        tracing::debug!(
            path = %path.display(),
            dims = ?nifti.dims,
            voxel_size = ?nifti.voxel_size,
            "loaded CT volume"
        );
        Ok(Self::from_nifti(nifti)?)
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Valid index range `[0, size)`, expressed as clip bounds `(0, size)`
    pub fn bounds(&self) -> Bounds {
        let (nx, ny, nz) = self.dims;
        Bounds::new([0, 0, 0], [nx as i64, ny as i64, nz as i64])
    }

    /// Nearest voxel of a physical point (halves round up)
    pub fn physical_to_index(&self, point: Point3) -> VoxelIndex {
        let continuous = self.to_index * Vector4::new(point[0], point[1], point[2], 1.0);
        [0, 1, 2].map(|a| (continuous[a] + 0.5).floor() as i64)
    }

    /// Physical position of a voxel center
    pub fn index_to_physical(&self, index: VoxelIndex) -> Point3 {
        let h = Vector4::new(index[0] as f64, index[1] as f64, index[2] as f64, 1.0);
        let point = self.to_physical * h;
        [point[0], point[1], point[2]]
    }

    /// Intensity of a voxel, `None` outside the volume
    pub fn intensity_at(&self, index: VoxelIndex) -> Option<f64> {
        if !self.bounds().contains(index) {
            return None;
        }
        let (nx, ny, _) = self.dims;
        let linear = index[0] as usize + index[1] as usize * nx + index[2] as usize * nx * ny;
        Some(self.data[linear])
    }

    /// Intensity at the voxel nearest to a physical point
    pub fn intensity_at_point(&self, point: Point3) -> Option<f64> {
        self.intensity_at(self.physical_to_index(point))
    }

    /// Sum of intensities over the in-volume part of `region`
    pub fn region_sum(&self, region: &Region) -> f64 {
        region
            .clipped(&self.bounds())
            .points()
            .filter_map(|index| self.intensity_at(index))
            .sum()
    }

    /// Intensity-weighted mean physical position of the voxels in `region`
    ///
    /// Voxels outside the volume carry no mass. `None` when the total mass is zero.
    pub fn center_of_gravity(&self, region: &Region) -> Option<Point3> {
        let mut weighted = [0.0; 3];
        let mut total_mass = 0.0;
        for index in region.clipped(&self.bounds()).points() {
            let Some(value) = self.intensity_at(index) else { continue };
            weighted = add(weighted, scale(self.index_to_physical(index), value));
            total_mass += value;
        }
        if total_mass == 0.0 {
            return None;
        }
        Some(scale(weighted, 1.0 / total_mass))
    }

    /// Electrode intensity threshold of this volume
    pub fn compute_threshold(&self) -> Result<f64, VolumeError> {
        electrode_threshold(&self.data).ok_or(VolumeError::NoNonZeroVoxels)
    }
}

/// Inverse of a homogeneous voxel-to-physical transform
fn invert_affine(m: &Matrix4<f64>) -> Result<Matrix4<f64>, VolumeError> {
    let det = m.determinant();
    if det.abs() < 1e-12 || !det.is_finite() {
        return Err(VolumeError::SingularAffine(det));
    }
    (*m).try_inverse().ok_or(VolumeError::SingularAffine(det))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[rustfmt::skip]
    fn oblique_affine() -> [f64; 16] {
        // 0.5 mm voxels with a 30 degree rotation about z and an offset
        let (s, c) = (30f64.to_radians().sin(), 30f64.to_radians().cos());
        [
            0.5 * c, -0.5 * s, 0.0, 12.0,
            0.5 * s, 0.5 * c, 0.0, -7.5,
            0.0, 0.0, 0.8, 3.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = Volume::with_identity(vec![0.0; 7], (2, 2, 2)).unwrap_err();
        assert!(matches!(err, VolumeError::DimensionMismatch { expected: 8, actual: 7, .. }));
    }

    #[test]
    fn test_singular_affine() {
        let err = Volume::new(vec![0.0; 8], (2, 2, 2), [0.0; 16]).unwrap_err();
        assert!(matches!(err, VolumeError::SingularAffine(_)));
    }

    #[test]
    fn test_index_roundtrip_axis_aligned() {
        #[rustfmt::skip]
        let affine = [
            0.4, 0.0, 0.0, -20.0,
            0.0, 0.4, 0.0, 15.0,
            0.0, 0.0, 1.2, -3.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let volume = Volume::new(vec![0.0; 6 * 5 * 4], (6, 5, 4), affine).unwrap();
        for index in (Region { start: [0, 0, 0], stop: [6, 5, 4] }).points() {
            assert_eq!(volume.physical_to_index(volume.index_to_physical(index)), index);
        }
    }

    #[test]
    fn test_index_roundtrip_oblique() {
        let volume = Volume::new(vec![0.0; 1000], (10, 10, 10), oblique_affine()).unwrap();
        for index in [[0, 0, 0], [9, 9, 9], [3, 7, 1], [5, 0, 8]] {
            assert_eq!(volume.physical_to_index(volume.index_to_physical(index)), index);
        }
    }

    #[test]
    fn test_physical_to_index_rounds_half_up() {
        let volume = Volume::with_identity(vec![0.0; 27], (3, 3, 3)).unwrap();
        assert_eq!(volume.physical_to_index([0.5, 1.49, -0.5]), [1, 1, 0]);
        assert_eq!(volume.physical_to_index([2.5, -1.6, 1.5]), [3, -2, 2]);
    }

    #[test]
    fn test_from_nifti_flips_to_lps() {
        #[rustfmt::skip]
        let nifti = NiftiData {
            data: vec![0.0; 8],
            dims: (2, 2, 2),
            voxel_size: (1.0, 1.0, 1.0),
            affine: [
                1.0, 0.0, 0.0, 10.0,
                0.0, 1.0, 0.0, 20.0,
                0.0, 0.0, 1.0, 30.0,
                0.0, 0.0, 0.0, 1.0,
            ],
            scl_slope: 1.0,
            scl_inter: 0.0,
        };
        let volume = Volume::from_nifti(nifti).unwrap();
        assert_eq!(volume.index_to_physical([1, 1, 1]), [-11.0, -21.0, 31.0]);
        assert_eq!(volume.physical_to_index([-11.0, -21.0, 31.0]), [1, 1, 1]);
    }

    #[test]
    fn test_intensity_lookup_and_bounds() {
        let data: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let volume = Volume::with_identity(data, (4, 3, 2)).unwrap();
        assert_eq!(volume.intensity_at([1, 2, 1]), Some((1 + 2 * 4 + 12) as f64));
        assert_eq!(volume.intensity_at([4, 0, 0]), None);
        assert_eq!(volume.intensity_at([0, -1, 0]), None);
        assert_eq!(volume.bounds(), Bounds::new([0, 0, 0], [4, 3, 2]));
    }

    #[test]
    fn test_center_of_gravity_weighted() {
        let mut data = vec![0.0; 125];
        data[1 + 2 * 5 + 2 * 25] = 1.0;
        data[3 + 2 * 5 + 2 * 25] = 3.0;
        let volume = Volume::with_identity(data, (5, 5, 5)).unwrap();

        let cog = volume.center_of_gravity(&Region::around([2, 2, 2], 2)).unwrap();
        assert_abs_diff_eq!(cog[0], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(cog[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cog[2], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_center_of_gravity_zero_mass() {
        let volume = Volume::with_identity(vec![0.0; 27], (3, 3, 3)).unwrap();
        assert!(volume.center_of_gravity(&Region::around([1, 1, 1], 1)).is_none());
    }

    #[test]
    fn test_region_sum_clips() {
        let volume = Volume::with_identity(vec![2.0; 27], (3, 3, 3)).unwrap();
        // corner voxel: only the 2x2x2 part inside the volume counts
        assert_eq!(volume.region_sum(&Region::around([0, 0, 0], 1)), 16.0);
        assert_eq!(volume.region_sum(&Region::around([10, 10, 10], 1)), 0.0);
    }

    #[test]
    fn test_compute_threshold_requires_signal() {
        let volume = Volume::with_identity(vec![0.0; 8], (2, 2, 2)).unwrap();
        assert!(matches!(volume.compute_threshold(), Err(VolumeError::NoNonZeroVoxels)));
    }
}
