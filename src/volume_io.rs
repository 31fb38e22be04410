//! NIfTI volume I/O
//!
//! Reads CT volumes from `.nii` / `.nii.gz` files and writes label maps back
//! with the same geometry. Gzip is detected from the magic bytes on read and
//! from the `.nii.gz` extension on write.

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use ndarray::{Array, Axis, Ix3, IxDyn};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::assembler::LabelMap;
use crate::errors::{AirwayError, Result};
use crate::volume::{Geometry, Volume};

const HEADER_SIZE: usize = 348;
/// Header plus the 4-byte empty extension block
const VOX_OFFSET: usize = 352;

const DT_UINT8: i16 = 2;
const DT_FLOAT32: i16 = 16;

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Read a CT volume from a NIfTI file
pub fn read_volume<P: AsRef<Path>>(path: P) -> Result<Volume> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    load_volume(&bytes)
}

/// Decode a NIfTI volume from bytes (plain or gzipped).
///
/// Intensities come back with `scl_slope`/`scl_inter` already applied. For 4D
/// inputs the first volume is used.
pub fn load_volume(bytes: &[u8]) -> Result<Volume> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))
            .map_err(|e| AirwayError::Nifti(format!("Failed to read gzipped NIfTI: {}", e)))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| AirwayError::Nifti(format!("Failed to read NIfTI: {}", e)))?
    };

    let header = obj.header().clone();
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(AirwayError::InvalidVolume(format!(
            "Expected at least 3D volume, got {}D",
            ndim
        )));
    }

    let mut array: Array<f32, IxDyn> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| AirwayError::Nifti(format!("Failed to convert to ndarray: {}", e)))?;

    while array.ndim() > 3 {
        let last = array.ndim() - 1;
        array = array.index_axis_move(Axis(last), 0);
    }
    let array = array
        .into_dimensionality::<Ix3>()
        .map_err(|e| AirwayError::InvalidVolume(format!("Unexpected volume shape: {}", e)))?;

    let (nx, ny, nz) = array.dim();
    let mut data = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                data.push(array[[i, j, k]]);
            }
        }
    }

    let geometry = Geometry::from_affine((nx, ny, nz), &header_affine(&header))?;
    Volume::new(data, geometry)
}

/// Affine from the header: sform when present, otherwise voxel scaling only
fn header_affine(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        let spacing = |d: usize| {
            let v = header.pixdim[d].abs() as f64;
            if v > 0.0 { v } else { 1.0 }
        };
        [
            spacing(1), 0.0, 0.0, 0.0,
            0.0, spacing(2), 0.0, 0.0,
            0.0, 0.0, spacing(3), 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// NIfTI-1 single-file header for the given geometry and datatype
fn build_header(geometry: &Geometry, datatype: i16, bitpix: i16, cal_max: f32) -> Result<[u8; HEADER_SIZE]> {
    let (nx, ny, nz) = geometry.dims;
    let to_dim = |n: usize| {
        i16::try_from(n).map_err(|_| {
            AirwayError::Nifti(format!("Dimension {} exceeds the NIfTI-1 limit", n))
        })
    };

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());

    let dim: [i16; 8] = [3, to_dim(nx)?, to_dim(ny)?, to_dim(nz)?, 1, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    header[70..72].copy_from_slice(&datatype.to_le_bytes());
    header[72..74].copy_from_slice(&bitpix.to_le_bytes());

    let [sx, sy, sz] = geometry.spacing;
    let pixdim: [f32; 8] = [1.0, sx as f32, sy as f32, sz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    header[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes()); // scl_slope
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes()); // scl_inter
    header[123] = 2; // xyzt_units: mm
    header[124..128].copy_from_slice(&cal_max.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    let affine = geometry.affine();
    for row in 0..3 {
        for col in 0..4 {
            let offset = 280 + row * 16 + col * 4;
            header[offset..offset + 4].copy_from_slice(&(affine[row * 4 + col] as f32).to_le_bytes());
        }
    }

    header[344..348].copy_from_slice(b"n+1\0");
    Ok(header)
}

fn encode(header: &[u8; HEADER_SIZE], payload: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(VOX_OFFSET + payload.len());
    buffer.extend_from_slice(header);
    buffer.extend_from_slice(&[0u8; 4]);
    buffer.extend_from_slice(payload);
    buffer
}

fn write_bytes(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let gzip = path.to_string_lossy().ends_with(".nii.gz");
    let bytes = if gzip {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()?
    } else {
        bytes
    };
    fs::write(path, bytes)?;
    Ok(())
}

/// Encode a label map as an uncompressed uint8 NIfTI-1 file
pub fn encode_label_map(labels: &LabelMap) -> Result<Vec<u8>> {
    if labels.data.len() != labels.geometry.voxel_count() {
        return Err(AirwayError::InvalidVolume(format!(
            "label data has {} voxels, geometry expects {}",
            labels.data.len(),
            labels.geometry.voxel_count()
        )));
    }
    let header = build_header(&labels.geometry, DT_UINT8, 8, labels.label_value as f32)?;
    Ok(encode(&header, &labels.data))
}

/// Write a label map; `.nii.gz` paths are gzip compressed
pub fn write_label_map<P: AsRef<Path>>(path: P, labels: &LabelMap) -> Result<()> {
    let bytes = encode_label_map(labels)?;
    write_bytes(path.as_ref(), bytes)
}

/// Write an intensity volume as float32 NIfTI-1
pub fn write_volume<P: AsRef<Path>>(path: P, volume: &Volume) -> Result<()> {
    let header = build_header(volume.geometry(), DT_FLOAT32, 32, 0.0)?;
    let payload: Vec<u8> = volume.data().iter().flat_map(|v| v.to_le_bytes()).collect();
    write_bytes(path.as_ref(), encode(&header, &payload))
}
