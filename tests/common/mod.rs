//! Common test utilities for deeto-core integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use deeto_core::nifti_io::save_nifti_to_file;
use deeto_core::utils::{distance, Point3};

/// Side of the synthetic CT cube (voxels)
pub const SIZE: usize = 40;
/// Intensity of electrode metal in the synthetic CT
pub const METAL: f64 = 1000.0;
/// Intensity of the tissue slab in the synthetic CT
pub const TISSUE: f64 = 200.0;
/// First and last voxel of the synthetic shaft along x
pub const SHAFT: (usize, usize) = (8, 31);

/// Synthetic post-implant CT
///
/// 1 mm voxels, RAS = index - 20 so the volume is centered on the origin.
/// One electrode shaft runs along x at y = z = 20 (voxel), and a tissue slab
/// fills the two lowest z planes.
pub struct SyntheticCt {
    pub data: Vec<f64>,
    pub dims: (usize, usize, usize),
    pub affine: [f64; 16],
}

impl SyntheticCt {
    pub fn new() -> Self {
        let n = SIZE;
        let mut data = vec![0.0; n * n * n];
        for z in 0..2 {
            for y in 0..n {
                for x in 0..n {
                    data[x + y * n + z * n * n] = TISSUE;
                }
            }
        }
        for x in SHAFT.0..=SHAFT.1 {
            data[x + 20 * n + 20 * n * n] = METAL;
        }

        #[rustfmt::skip]
        let affine = [
            1.0, 0.0, 0.0, -20.0,
            0.0, 1.0, 0.0, -20.0,
            0.0, 0.0, 1.0, -20.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        Self { data, dims: (n, n, n), affine }
    }

    /// RAS position of a voxel along the shaft axis
    pub fn shaft_ras(x: f64) -> Point3 {
        [x - 20.0, 0.0, 0.0]
    }

    /// Write the volume as a NIfTI file into `dir`
    pub fn write(&self, dir: &Path, file_name: &str) -> PathBuf {
        let path = dir.join(file_name);
        save_nifti_to_file(&path, &self.data, self.dims, (1.0, 1.0, 1.0), &self.affine)
            .expect("failed to write synthetic CT");
        path
    }
}

/// Mean distance between paired points; the shorter list bounds the pairing
pub fn average_distance(a: &[Point3], b: &[Point3]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    a.iter().zip(b).map(|(p, q)| distance(*p, *q)).sum::<f64>() / n as f64
}
