//! Z-chunk ownership, chunk planning and the offload scratch format.
//!
//! A chunk owns a contiguous Z-slab of the wave field. Adjacent chunk
//! storages overlap by exactly two planes so the halo exchange refers to
//! the same global planes on both sides. Offloaded chunks live as raw
//! little-endian f32 scratch files with no header; the array order is
//! fixed and positional.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Serialization order of the 13 per-chunk field arrays.
pub const FIELD_COUNT: usize = 13;

/// Minimum chunk depth in planes.
const MIN_CHUNK_DEPTH: usize = 8;

/// The thirteen per-chunk field arrays, each `width * height * depth` long.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFields {
    pub vx: Vec<f32>,
    pub vy: Vec<f32>,
    pub vz: Vec<f32>,
    pub sxx: Vec<f32>,
    pub syy: Vec<f32>,
    pub szz: Vec<f32>,
    pub sxy: Vec<f32>,
    pub sxz: Vec<f32>,
    pub syz: Vec<f32>,
    pub damage: Vec<f32>,
    pub max_abs_vx: Vec<f32>,
    pub max_abs_vy: Vec<f32>,
    pub max_abs_vz: Vec<f32>,
}

impl ChunkFields {
    pub(crate) fn zeroed(len: usize) -> Self {
        Self {
            vx: vec![0.0; len],
            vy: vec![0.0; len],
            vz: vec![0.0; len],
            sxx: vec![0.0; len],
            syy: vec![0.0; len],
            szz: vec![0.0; len],
            sxy: vec![0.0; len],
            sxz: vec![0.0; len],
            syz: vec![0.0; len],
            damage: vec![0.0; len],
            max_abs_vx: vec![0.0; len],
            max_abs_vy: vec![0.0; len],
            max_abs_vz: vec![0.0; len],
        }
    }

    /// Arrays in serialization order.
    pub fn ordered(&self) -> [&[f32]; FIELD_COUNT] {
        [
            &self.vx,
            &self.vy,
            &self.vz,
            &self.sxx,
            &self.syy,
            &self.szz,
            &self.sxy,
            &self.sxz,
            &self.syz,
            &self.damage,
            &self.max_abs_vx,
            &self.max_abs_vy,
            &self.max_abs_vz,
        ]
    }

    /// Mutable arrays in serialization order.
    pub fn ordered_mut(&mut self) -> [&mut Vec<f32>; FIELD_COUNT] {
        [
            &mut self.vx,
            &mut self.vy,
            &mut self.vz,
            &mut self.sxx,
            &mut self.syy,
            &mut self.szz,
            &mut self.sxy,
            &mut self.sxz,
            &mut self.syz,
            &mut self.damage,
            &mut self.max_abs_vx,
            &mut self.max_abs_vy,
            &mut self.max_abs_vz,
        ]
    }
}

/// One Z-slab of the wave field, the unit of residency and dispatch.
#[derive(Debug)]
pub struct WaveFieldChunk {
    /// First global Z plane of the storage range.
    pub start_z: usize,
    /// One past the last global Z plane.
    pub end_z: usize,
    plane_size: usize,
    fields: Option<Box<ChunkFields>>,
    offload_path: Option<PathBuf>,
}

impl WaveFieldChunk {
    /// Create a resident, zero-filled chunk.
    pub fn allocate(start_z: usize, end_z: usize, width: usize, height: usize) -> Self {
        debug_assert!(end_z - start_z >= 2, "chunk too thin for halos");
        let plane_size = width * height;
        Self {
            start_z,
            end_z,
            plane_size,
            fields: Some(Box::new(ChunkFields::zeroed(plane_size * (end_z - start_z)))),
            offload_path: None,
        }
    }

    /// Storage depth in planes.
    #[inline]
    pub fn depth(&self) -> usize {
        self.end_z - self.start_z
    }

    /// Voxels per Z plane.
    #[inline]
    pub fn plane_size(&self) -> usize {
        self.plane_size
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        self.fields.is_some()
    }

    #[inline]
    pub fn contains_global_z(&self, z: usize) -> bool {
        (self.start_z..self.end_z).contains(&z)
    }

    /// Resident field arrays. Panics when offloaded; residency is the
    /// scheduler's invariant to uphold.
    #[inline]
    pub fn fields(&self) -> &ChunkFields {
        self.fields.as_ref().expect("chunk not resident")
    }

    #[inline]
    pub fn fields_mut(&mut self) -> &mut ChunkFields {
        self.fields.as_mut().expect("chunk not resident")
    }

    /// Scratch file name for this chunk inside the offload directory.
    pub fn scratch_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("chunk_{}.tmp", self.start_z))
    }

    /// Write all field arrays to the scratch file and release them.
    ///
    /// The format is positional: 13 contiguous raw little-endian f32
    /// arrays in the fixed `ordered()` sequence, no header or trailer.
    pub fn offload(&mut self, dir: &Path) -> io::Result<()> {
        let fields = self.fields.take().expect("offloading a non-resident chunk");
        let path = self.scratch_path(dir);
        let result = (|| -> io::Result<()> {
            let mut writer = BufWriter::new(File::create(&path)?);
            for array in fields.ordered() {
                write_f32_slice(&mut writer, array)?;
            }
            writer.flush()
        })();
        match result {
            Ok(()) => {
                self.offload_path = Some(path);
                Ok(())
            }
            Err(e) => {
                // Keep the chunk resident on failure; the caller decides
                // whether to keep running without offloading.
                self.fields = Some(fields);
                Err(e)
            }
        }
    }

    /// Read the field arrays back from the scratch file.
    ///
    /// A missing or truncated file is an error and the chunk stays
    /// non-resident. Already-resident chunks reload as a no-op.
    pub fn reload(&mut self) -> io::Result<()> {
        if self.fields.is_some() {
            return Ok(());
        }
        let path = self
            .offload_path
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "chunk has no offload path"))?;
        let len = self.plane_size * self.depth();
        let mut reader = BufReader::new(File::open(&path)?);
        let mut fields = Box::new(ChunkFields::zeroed(len));
        for array in fields.ordered_mut() {
            read_f32_slice(&mut reader, array)?;
        }
        self.fields = Some(fields);
        self.offload_path = Some(path);
        Ok(())
    }

    /// Forget the offload path (after an I/O failure the chunk reverts to
    /// in-memory residency).
    pub fn clear_offload_path(&mut self) {
        self.offload_path = None;
    }

    /// Replace the fields with zero-filled arrays (last resort when a
    /// reload fails and the run must continue).
    pub fn reset_zeroed(&mut self) {
        let len = self.plane_size * self.depth();
        self.fields = Some(Box::new(ChunkFields::zeroed(len)));
    }

    pub fn offload_path(&self) -> Option<&Path> {
        self.offload_path.as_deref()
    }
}

/// Compute the chunk storage ranges for a volume.
///
/// Target bytes `B = max(chunk_size_mb, 256) MiB`, per-plane footprint
/// `P = width * height * 4 * 16`; the chunk depth is `B/P` clamped to
/// `[8, depth]`. Interiors tile the volume; storages overlap by two planes.
pub fn plan_chunks(
    width: usize,
    height: usize,
    depth: usize,
    chunk_size_mb: usize,
) -> Vec<(usize, usize)> {
    let target_bytes = chunk_size_mb.max(256) << 20;
    let plane_bytes = width * height * 4 * 16;
    let chunk_depth = (target_bytes / plane_bytes).clamp(MIN_CHUNK_DEPTH.min(depth), depth);

    if chunk_depth >= depth {
        return vec![(0, depth)];
    }

    let mut ranges = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + chunk_depth).min(depth);
        ranges.push((start, end));
        if end == depth {
            break;
        }
        // Two-plane overlap keeps halo planes globally consistent.
        start = end - 2;
    }
    ranges
}

/// Allocate resident zero-filled chunks for the whole volume.
pub fn allocate_chunks(
    width: usize,
    height: usize,
    depth: usize,
    chunk_size_mb: usize,
) -> Vec<WaveFieldChunk> {
    plan_chunks(width, height, depth, chunk_size_mb)
        .into_iter()
        .map(|(s, e)| WaveFieldChunk::allocate(s, e, width, height))
        .collect()
}

/// Remove all scratch files. Missing files are ignored.
pub fn delete_scratch(chunks: &mut [WaveFieldChunk]) {
    for chunk in chunks {
        if let Some(path) = chunk.offload_path.take()
            && let Err(e) = fs::remove_file(&path)
            && e.kind() != io::ErrorKind::NotFound
        {
            log::warn!("failed to remove scratch file {}: {}", path.display(), e);
        }
    }
}

fn write_f32_slice<W: Write>(w: &mut W, data: &[f32]) -> io::Result<()> {
    let mut bytes = vec![0u8; data.len() * 4];
    for (i, &v) in data.iter().enumerate() {
        bytes[i * 4..(i + 1) * 4].copy_from_slice(&v.to_le_bytes());
    }
    w.write_all(&bytes)
}

fn read_f32_slice<R: Read>(r: &mut R, out: &mut [f32]) -> io::Result<()> {
    let mut bytes = vec![0u8; out.len() * 4];
    r.read_exact(&mut bytes)?;
    for (i, v) in out.iter_mut().enumerate() {
        let b = &bytes[i * 4..(i + 1) * 4];
        *v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_single_chunk_when_volume_fits() {
        // 64x64 planes: P = 256 KiB, 256 MiB target -> 1024 planes
        let ranges = plan_chunks(64, 64, 64, 1);
        assert_eq!(ranges, vec![(0, 64)]);
    }

    #[test]
    fn test_chunks_overlap_by_two_planes() {
        // 512x512 planes: P = 16 MiB, 256 MiB target -> depth 16
        let ranges = plan_chunks(512, 512, 100, 1);
        assert!(ranges.len() > 1);
        assert_eq!(ranges[0].0, 0);
        assert_eq!(ranges.last().unwrap().1, 100);
        for pair in ranges.windows(2) {
            assert_eq!(pair[1].0, pair[0].1 - 2);
        }
        for &(s, e) in &ranges {
            assert!(e - s >= 3);
        }
    }

    #[test]
    fn test_interiors_tile_volume() {
        let depth = 100;
        let ranges = plan_chunks(512, 512, depth, 1);
        // Kernel-updated interior of chunk (s, e) is [s+1, e-1); together
        // with the two boundary planes they must cover [0, depth).
        let mut covered = vec![0u32; depth];
        for &(s, e) in &ranges {
            for z in (s + 1)..(e - 1) {
                covered[z] += 1;
            }
        }
        for z in 1..depth - 1 {
            assert_eq!(covered[z], 1, "plane {} covered {} times", z, covered[z]);
        }
    }

    #[test]
    fn test_offload_reload_roundtrip() {
        let dir = tempdir().unwrap();
        let mut chunk = WaveFieldChunk::allocate(4, 12, 8, 8);
        let len = chunk.plane_size() * chunk.depth();
        for (k, array) in chunk.fields_mut().ordered_mut().iter_mut().enumerate() {
            for (i, v) in array.iter_mut().enumerate() {
                *v = (k * len + i) as f32 * 0.125 - 3.0;
            }
        }
        let original = chunk.fields().clone();

        chunk.offload(dir.path()).unwrap();
        assert!(!chunk.is_resident());
        assert!(chunk.offload_path().unwrap().exists());

        chunk.reload().unwrap();
        assert!(chunk.is_resident());
        assert_eq!(*chunk.fields(), original);
    }

    #[test]
    fn test_scratch_file_size_and_name() {
        let dir = tempdir().unwrap();
        let mut chunk = WaveFieldChunk::allocate(16, 24, 4, 4);
        chunk.offload(dir.path()).unwrap();
        let path = dir.path().join("chunk_16.tmp");
        assert!(path.exists());
        let expected = (FIELD_COUNT * 4 * 4 * 8 * 4) as u64;
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
    }

    #[test]
    fn test_reload_missing_file_keeps_chunk_nonresident() {
        let dir = tempdir().unwrap();
        let mut chunk = WaveFieldChunk::allocate(0, 8, 4, 4);
        chunk.offload(dir.path()).unwrap();
        std::fs::remove_file(chunk.offload_path().unwrap()).unwrap();
        assert!(chunk.reload().is_err());
        assert!(!chunk.is_resident());
    }

    #[test]
    fn test_delete_scratch_ignores_missing() {
        let dir = tempdir().unwrap();
        let mut chunks = vec![
            WaveFieldChunk::allocate(0, 8, 4, 4),
            WaveFieldChunk::allocate(6, 14, 4, 4),
        ];
        chunks[0].offload(dir.path()).unwrap();
        chunks[1].offload(dir.path()).unwrap();
        std::fs::remove_file(chunks[1].offload_path().unwrap()).unwrap();

        delete_scratch(&mut chunks);
        assert!(!dir.path().join("chunk_0.tmp").exists());
        assert!(chunks.iter().all(|c| c.offload_path().is_none()));
    }

    proptest! {
        #[test]
        fn prop_f32_bytes_roundtrip_bit_identical(bits in prop::collection::vec(any::<u32>(), 1..256)) {
            let data: Vec<f32> = bits.iter().map(|&b| f32::from_bits(b)).collect();
            let mut buf = Vec::new();
            write_f32_slice(&mut buf, &data).unwrap();
            let mut back = vec![0.0f32; data.len()];
            read_f32_slice(&mut &buf[..], &mut back).unwrap();
            for (a, b) in data.iter().zip(back.iter()) {
                prop_assert_eq!(a.to_bits(), b.to_bits());
            }
        }
    }
}
