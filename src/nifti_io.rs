//! NIfTI volume I/O
//!
//! Loads CT volumes from `.nii` / `.nii.gz` files (gzip is auto-detected) and
//! writes float32 NIfTI-1 files. Data is flattened in Fortran order
//! (x varies fastest): `index = x + y*nx + z*nx*ny`.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use nalgebra::{Matrix4, Vector3};
use ndarray::{Array, IxDyn};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::NiftiError;

/// Size of a NIfTI-1 header in bytes
const NIFTI1_HEADER_SIZE: usize = 348;

/// Offset of the voxel data in files written by [`save_nifti`]
const VOX_OFFSET: usize = 352;

/// NIfTI volume loaded into memory
#[derive(Clone, Debug)]
pub struct NiftiData {
    /// Voxel intensities (scaling already applied), Fortran order
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Voxel-to-world affine (4x4, row-major, RAS)
    pub affine: [f64; 16],
    /// Data scaling slope as stored in the header
    pub scl_slope: f64,
    /// Data scaling intercept as stored in the header
    pub scl_inter: f64,
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Short description of the raw header fields, attached to decode errors
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < NIFTI1_HEADER_SIZE {
        return format!(
            "File too small ({} bytes, need at least {})",
            bytes.len(),
            NIFTI1_HEADER_SIZE
        );
    }
    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

fn decode_object(bytes: &[u8]) -> Result<InMemNiftiObject, NiftiError> {
    if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes))).map_err(|e| {
            let mut decompressed = Vec::new();
            let header_info = match GzDecoder::new(Cursor::new(bytes)).read_to_end(&mut decompressed) {
                Ok(_) => get_header_info(&decompressed),
                Err(_) => "Could not decompress".to_string(),
            };
            NiftiError::Decode { message: e.to_string(), header_info }
        })
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes)).map_err(|e| NiftiError::Decode {
            message: e.to_string(),
            header_info: get_header_info(bytes),
        })
    }
}

/// Load a NIfTI volume from bytes
///
/// 4D inputs are reduced to their first volume.
pub fn load_nifti(bytes: &[u8]) -> Result<NiftiData, NiftiError> {
    let obj = decode_object(bytes)?;
    let header = obj.header();

    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(NiftiError::NotVolumetric(ndim));
    }

    let voxel_size = (
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64,
    );
    let scl_slope = if header.scl_slope == 0.0 { 1.0 } else { header.scl_slope as f64 };
    let scl_inter = header.scl_inter as f64;
    let affine = get_affine(header);

    let array: Array<f64, IxDyn> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| NiftiError::Decode {
            message: format!("Failed to convert to ndarray: {}", e),
            header_info: String::new(),
        })?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(NiftiError::NotVolumetric(shape.len()));
    }
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);

    let mut data = Vec::with_capacity(nx * ny * nz);
    let mut index = vec![0usize; shape.len()];
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                index[0] = i;
                index[1] = j;
                index[2] = k;
                data.push(array[&index[..]]);
            }
        }
    }

    Ok(NiftiData {
        data,
        dims: (nx, ny, nz),
        voxel_size,
        affine,
        scl_slope,
        scl_inter,
    })
}

/// Voxel-to-world affine from the header
///
/// Prefers the sform, then the qform (quaternion, qfac and offsets), and
/// falls back to a pure voxel scaling when neither transform code is set.
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    let matrix: Matrix4<f64> = if header.sform_code != 0 || header.qform_code != 0 {
        qform_safe(header).affine::<f64>()
    } else {
        let p = &header.pixdim;
        Matrix4::new_nonuniform_scaling(&Vector3::new(p[1] as f64, p[2] as f64, p[3] as f64))
    };

    let mut affine = [0.0; 16];
    for r in 0..4 {
        for c in 0..4 {
            affine[r * 4 + c] = matrix[(r, c)];
        }
    }
    affine
}

/// Header copy whose qform inputs satisfy the nifti crate's preconditions
///
/// A qfac other than -1 is read as 1 and negative spacings by their magnitude.
fn qform_safe(header: &NiftiHeader) -> NiftiHeader {
    let mut header = header.clone();
    header.pixdim[0] = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    for p in &mut header.pixdim[1..4] {
        *p = p.abs();
    }
    header
}

/// Encode a volume as an uncompressed float32 NIfTI-1 file
pub fn save_nifti(
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<Vec<u8>, NiftiError> {
    let (nx, ny, nz) = dims;
    let mut header = [0u8; NIFTI1_HEADER_SIZE];
    let mut put = |offset: usize, bytes: &[u8]| {
        header[offset..offset + bytes.len()].copy_from_slice(bytes);
    };

    put(0, &(NIFTI1_HEADER_SIZE as i32).to_le_bytes());

    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        put(40 + i * 2, &d.to_le_bytes());
    }

    // FLOAT32, 32 bits per voxel
    put(70, &16i16.to_le_bytes());
    put(72, &32i16.to_le_bytes());

    #[rustfmt::skip]
    let pixdim: [f32; 8] = [
        1.0,
        voxel_size.0 as f32,
        voxel_size.1 as f32,
        voxel_size.2 as f32,
        1.0, 1.0, 1.0, 1.0,
    ];
    for (i, p) in pixdim.iter().enumerate() {
        put(76 + i * 4, &p.to_le_bytes());
    }

    put(108, &(VOX_OFFSET as f32).to_le_bytes());
    put(112, &1.0f32.to_le_bytes());
    put(116, &0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat), followed by the three sform rows
    put(254, &1i16.to_le_bytes());
    for row in 0..3 {
        for col in 0..4 {
            let value = affine[row * 4 + col] as f32;
            put(280 + row * 16 + col * 4, &value.to_le_bytes());
        }
    }

    put(344, b"n+1\0");

    let mut buffer = Vec::with_capacity(VOX_OFFSET + data.len() * 4);
    buffer.write_all(&header)?;
    buffer.write_all(&[0u8; VOX_OFFSET - NIFTI1_HEADER_SIZE])?;
    for &value in data {
        buffer.write_all(&(value as f32).to_le_bytes())?;
    }
    Ok(buffer)
}

/// Encode a volume as a gzipped NIfTI-1 file
pub fn save_nifti_gz(
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<Vec<u8>, NiftiError> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let raw = save_nifti(data, dims, voxel_size, affine)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

/// Read a NIfTI volume from disk
pub fn read_nifti_file(path: &Path) -> Result<NiftiData, NiftiError> {
    let bytes = std::fs::read(path).map_err(|source| NiftiError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    load_nifti(&bytes)
}

/// Write a NIfTI volume to disk, gzipped when the path ends with `.nii.gz`
pub fn save_nifti_to_file(
    path: &Path,
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<(), NiftiError> {
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        save_nifti_gz(data, dims, voxel_size, affine)?
    } else {
        save_nifti(data, dims, voxel_size, affine)?
    };
    std::fs::write(path, &bytes).map_err(|source| NiftiError::WriteFile {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    const IDENTITY: [f64; 16] = [
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ];

    #[test]
    fn test_gzip_detection() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x00]));
        assert!(!is_gzip(&[0x00, 0x00, 0x00]));
        assert!(!is_gzip(&[0x1f]));
    }

    #[test]
    fn test_affine_falls_back_to_voxel_size() {
        let mut header = NiftiHeader::default();
        header.pixdim[1] = 0.5;
        header.pixdim[2] = 0.6;
        header.pixdim[3] = 0.7;
        header.sform_code = 0;

        let affine = get_affine(&header);
        assert!((affine[0] - 0.5).abs() < 1e-6);
        assert!((affine[5] - 0.6).abs() < 1e-6);
        assert!((affine[10] - 0.7).abs() < 1e-6);
        assert_eq!(affine[3], 0.0);
    }

    #[test]
    fn test_affine_uses_sform() {
        let mut header = NiftiHeader::default();
        header.sform_code = 1;
        header.srow_x = [-0.5, 0.0, 0.0, 90.0];
        header.srow_y = [0.0, 0.5, 0.0, -120.0];
        header.srow_z = [0.0, 0.0, 0.5, -60.0];

        let affine = get_affine(&header);
        assert_eq!(affine[0], -0.5);
        assert_eq!(affine[3], 90.0);
        assert_eq!(affine[7], -120.0);
        assert_eq!(affine[11], -60.0);
        assert_eq!(affine[15], 1.0);
    }

    /// Rewrite a file from `save_nifti` so that only its qform is set
    fn with_qform(mut bytes: Vec<u8>, qfac: f32, quatern: [f32; 3], offset: [f32; 3]) -> Vec<u8> {
        bytes[76..80].copy_from_slice(&qfac.to_le_bytes());
        bytes[252..254].copy_from_slice(&1i16.to_le_bytes());
        bytes[254..256].copy_from_slice(&0i16.to_le_bytes());
        for (i, v) in quatern.iter().chain(offset.iter()).enumerate() {
            bytes[256 + i * 4..260 + i * 4].copy_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_affine_uses_qform_offset() {
        let bytes = save_nifti(&[0.0; 8], (2, 2, 2), (0.5, 0.5, 2.0), &IDENTITY).unwrap();
        let loaded = load_nifti(&with_qform(bytes, 1.0, [0.0; 3], [10.0, 20.0, 30.0])).unwrap();

        #[rustfmt::skip]
        let expected = [
            0.5, 0.0, 0.0, 10.0,
            0.0, 0.5, 0.0, 20.0,
            0.0, 0.0, 2.0, 30.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        for i in 0..16 {
            assert!((loaded.affine[i] - expected[i]).abs() < 1e-6, "affine[{}] = {}", i, loaded.affine[i]);
        }
    }

    #[test]
    fn test_affine_uses_qform_rotation() {
        // b = c = 0, d = 1: half turn about z
        let bytes = save_nifti(&[0.0; 8], (2, 2, 2), (0.5, 0.5, 2.0), &IDENTITY).unwrap();
        let loaded = load_nifti(&with_qform(bytes, 1.0, [0.0, 0.0, 1.0], [-4.0, 6.0, 1.0])).unwrap();

        assert!((loaded.affine[0] + 0.5).abs() < 1e-6);
        assert!((loaded.affine[5] + 0.5).abs() < 1e-6);
        assert!((loaded.affine[10] - 2.0).abs() < 1e-6);
        assert!(loaded.affine[1].abs() < 1e-6 && loaded.affine[4].abs() < 1e-6);
        assert!((loaded.affine[3] + 4.0).abs() < 1e-6);
        assert!((loaded.affine[7] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_qform_qfac() {
        let bytes = save_nifti(&[0.0; 8], (2, 2, 2), (1.0, 1.0, 2.0), &IDENTITY).unwrap();

        // qfac = -1 flips the slice axis
        let flipped = load_nifti(&with_qform(bytes.clone(), -1.0, [0.0; 3], [0.0; 3])).unwrap();
        assert!((flipped.affine[10] + 2.0).abs() < 1e-6);

        // qfac = 0 is read as 1
        let unset = load_nifti(&with_qform(bytes, 0.0, [0.0; 3], [0.0; 3])).unwrap();
        assert!((unset.affine[10] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_save_nifti_header_layout() {
        let data = vec![0.0; 8];
        let bytes = save_nifti(&data, (2, 2, 2), (1.0, 1.0, 1.0), &IDENTITY).unwrap();

        assert_eq!(bytes.len(), VOX_OFFSET + 8 * 4);
        assert_eq!(&bytes[344..348], b"n+1\0");
        assert_eq!(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 348);
        assert_eq!(i16::from_le_bytes([bytes[70], bytes[71]]), 16);
        assert_eq!(i16::from_le_bytes([bytes[254], bytes[255]]), 1);
    }

    #[test]
    fn test_ct_roundtrip_keeps_intensities_and_affine() {
        let dims = (5, 4, 3);
        let n = dims.0 * dims.1 * dims.2;
        #[rustfmt::skip]
        let affine = [
            -0.4, 0.0, 0.0, 100.0,
            0.0, 0.4, 0.0, -80.0,
            0.0, 0.0, 0.8, -40.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let data: Vec<f64> = (0..n).map(|i| if i % 7 == 0 { 3000.0 } else { (i * 3) as f64 }).collect();

        let bytes = save_nifti(&data, dims, (0.4, 0.4, 0.8), &affine).unwrap();
        let loaded = load_nifti(&bytes).unwrap();

        assert_eq!(loaded.dims, dims);
        assert_eq!(loaded.data, data);
        for i in 0..16 {
            assert!((loaded.affine[i] - affine[i]).abs() < 1e-4, "affine[{}] mismatch", i);
        }
        assert!((loaded.scl_slope - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fortran_order_is_preserved() {
        let dims = (3, 2, 2);
        let data: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let bytes = save_nifti(&data, dims, (1.0, 1.0, 1.0), &IDENTITY).unwrap();
        let loaded = load_nifti(&bytes).unwrap();

        // voxel (2, 1, 1) sits at 2 + 1*3 + 1*6
        assert_eq!(loaded.data[2 + 3 + 6], 11.0);
    }

    #[test]
    fn test_gzip_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ct.nii.gz");
        let data: Vec<f64> = (0..27).map(|i| i as f64).collect();

        save_nifti_to_file(&path, &data, (3, 3, 3), (1.0, 1.0, 1.0), &IDENTITY).unwrap();
        assert!(is_gzip(&std::fs::read(&path).unwrap()));

        let loaded = read_nifti_file(&path).unwrap();
        assert_eq!(loaded.data, data);
    }

    #[test]
    fn test_invalid_bytes_are_rejected() {
        assert!(load_nifti(&[0u8; 10]).is_err());
        assert!(load_nifti(&[0x1f, 0x8b, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_header_info_reports_short_files() {
        assert!(get_header_info(&[0u8; 10]).contains("too small"));

        let mut bytes = vec![0u8; 348];
        bytes[0..4].copy_from_slice(&348i32.to_le_bytes());
        bytes[70..72].copy_from_slice(&4i16.to_le_bytes());
        let info = get_header_info(&bytes);
        assert!(info.contains("sizeof_hdr=348"));
        assert!(info.contains("datatype=4"));
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_nifti_file(Path::new("/tmp/deeto_missing_ct_12345.nii")).unwrap_err();
        assert!(matches!(err, NiftiError::ReadFile { .. }));
        assert!(err.to_string().contains("Failed to read file"));
    }
}
