//! Density volume export
//!
//! A snapshot is the raw density field as little-endian `f32` in solver
//! index order (`x + y*W + z*W*H`), plus a JSON sidecar next to it that
//! records the grid and a few summary values.

use serde::{Deserialize, Serialize};
use solver::GridDims;
use std::fs;
use std::path::{Path, PathBuf};

/// Sidecar metadata written next to the raw volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Cells along x, y, z
    pub dims: [u32; 3],
    /// Frame the volume was read after
    pub frame: u64,
    /// Smallest density value
    pub min: f32,
    /// Largest density value
    pub max: f32,
    /// Sum over all cells
    pub total: f64,
    /// Always `"f32le"`
    pub format: String,
    /// Always `"x + y*W + z*W*H"`
    pub layout: String,
}

/// Path of the sidecar for a given volume path
pub fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("json")
}

/// Write `data` to `path` and its metadata to [`sidecar_path`].
///
/// Values are written in host byte order; the sidecar's `"f32le"` holds on
/// the little-endian targets wgpu runs on.
pub fn write_density_snapshot(
    path: &Path,
    dims: GridDims,
    frame: u64,
    data: &[f32],
) -> Result<SnapshotMeta, String> {
    if data.len() != dims.cell_count() {
        return Err(format!(
            "Snapshot has {} values but grid {} has {} cells",
            data.len(),
            dims,
            dims.cell_count()
        ));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }

    fs::write(path, bytemuck::cast_slice::<f32, u8>(data))
        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;

    let meta = SnapshotMeta {
        dims: [dims.width, dims.height, dims.depth],
        frame,
        min: data.iter().copied().fold(f32::INFINITY, f32::min),
        max: data.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        total: data.iter().map(|&v| v as f64).sum(),
        format: "f32le".to_string(),
        layout: "x + y*W + z*W*H".to_string(),
    };
    let meta_path = sidecar_path(path);
    let json = serde_json::to_string_pretty(&meta)
        .map_err(|e| format!("Failed to serialize snapshot metadata: {}", e))?;
    fs::write(&meta_path, json)
        .map_err(|e| format!("Failed to write {}: {}", meta_path.display(), e))?;

    tracing::info!(
        "Wrote density snapshot {} ({} cells, frame {}, total {:.4})",
        path.display(),
        data.len(),
        frame,
        meta.total
    );
    Ok(meta)
}

/// Read a volume written by [`write_density_snapshot`] back into memory.
pub fn read_density_snapshot(path: &Path) -> Result<(SnapshotMeta, Vec<f32>), String> {
    let meta_path = sidecar_path(path);
    let json = fs::read_to_string(&meta_path)
        .map_err(|e| format!("Failed to read {}: {}", meta_path.display(), e))?;
    let meta: SnapshotMeta = serde_json::from_str(&json)
        .map_err(|e| format!("Failed to parse {}: {}", meta_path.display(), e))?;

    let bytes = fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let expected = meta.dims.iter().map(|&d| d as usize).product::<usize>() * 4;
    if bytes.len() != expected {
        return Err(format!(
            "{} holds {} bytes, metadata expects {}",
            path.display(),
            bytes.len(),
            expected
        ));
    }
    Ok((meta, bytemuck::pod_collect_to_vec::<u8, f32>(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("orchestrator-snapshot-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_snapshot_writes_volume_and_sidecar() {
        let dir = scratch_dir("write");
        let dims = GridDims::from_size(2).unwrap();
        let data: Vec<f32> = (0..dims.cell_count()).map(|i| i as f32 * 0.5).collect();
        let path = dir.join("nested/density.raw");

        let meta = write_density_snapshot(&path, dims, 42, &data).unwrap();
        assert_eq!(meta.dims, [2, 4, 2]);
        assert_eq!(meta.frame, 42);
        assert_eq!(meta.min, 0.0);
        assert_eq!(meta.max, 7.5);
        assert_eq!(meta.total, 60.0);

        assert_eq!(fs::metadata(&path).unwrap().len(), 64);
        let (read_meta, read_data) = read_density_snapshot(&path).unwrap();
        assert_eq!(read_meta, meta);
        assert_eq!(read_data, data);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_snapshot_rejects_wrong_length() {
        let dir = scratch_dir("length");
        let dims = GridDims::from_size(2).unwrap();
        let err = write_density_snapshot(&dir.join("d.raw"), dims, 0, &[0.0; 3]).unwrap_err();
        assert!(err.contains("16 cells"), "{err}");
        assert!(!dir.exists());
    }

    #[test]
    fn test_snapshot_bytes_are_little_endian_f32() {
        let dir = scratch_dir("endian");
        let dims = GridDims::new(1, 1, 2).unwrap();
        let path = dir.join("d.raw");
        write_density_snapshot(&path, dims, 1, &[0.5, -2.0]).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-2.0f32).to_le_bytes());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_sidecar_replaces_extension() {
        assert_eq!(sidecar_path(Path::new("out/density.raw")), Path::new("out/density.json"));
        assert_eq!(sidecar_path(Path::new("density")), Path::new("density.json"));
    }
}
