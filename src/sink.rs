//! Accumulation sink for projected planes.
//!
//! The sink holds one logical (field, channel, row, column) u16 buffer. Each field of view owns a
//! disjoint slot. Workers get mutable access to their own slots only, so concurrent writes need
//! no locking.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use memmap2::MmapMut;
use ndarray::{Array3, ArrayView4};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::array;
use crate::error::MaxProjError;
use crate::models::{PlaneShape, SinkKind};

/// Temporary backing file, removed on drop unless preserved.
#[derive(Debug)]
struct BackingFile {
    path: PathBuf,
    preserve: bool,
}

impl Drop for BackingFile {
    fn drop(&mut self) {
        if self.preserve {
            info!(path = %self.path.display(), "Preserving accumulation buffer file");
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed accumulation buffer file"),
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "Failed to remove accumulation buffer file"
            ),
        }
    }
}

#[derive(Debug)]
enum Storage {
    Resident(Vec<u16>),
    // The mapping is dropped before the file is removed.
    Disk { map: MmapMut, file: BackingFile },
}

impl Storage {
    fn values(&self) -> Result<&[u16], MaxProjError> {
        match self {
            Storage::Resident(values) => Ok(values.as_slice()),
            Storage::Disk { map, .. } => array::from_bytes(map),
        }
    }

    fn values_mut(&mut self) -> Result<&mut [u16], MaxProjError> {
        match self {
            Storage::Resident(values) => Ok(values.as_mut_slice()),
            Storage::Disk { map, .. } => array::from_bytes_mut(map),
        }
    }
}

/// The accumulation buffer of one run.
#[derive(Debug)]
pub struct AccumulationSink {
    total: usize,
    plane: PlaneShape,
    storage: Storage,
    written: Vec<AtomicBool>,
}

impl AccumulationSink {
    /// Returns a sink allocated in memory.
    pub fn resident(total: usize, plane: PlaneShape) -> Result<Self, MaxProjError> {
        let len = buffer_len(total, plane)?;
        Ok(Self::with_storage(total, plane, Storage::Resident(vec![0; len])))
    }

    /// Returns a sink backed by a memory-mapped file created in `dir`.
    ///
    /// The file is named `{basename}.{uuid}.mmap`, created exclusively and sized to hold every
    /// slot.
    pub fn disk(
        total: usize,
        plane: PlaneShape,
        dir: &Path,
        basename: &str,
    ) -> Result<Self, MaxProjError> {
        let len = buffer_len(total, plane)?;
        let bytes = len
            .checked_mul(std::mem::size_of::<u16>())
            .ok_or_else(|| MaxProjError::InvalidConfig("output buffer is too large".to_string()))?;
        let path = dir.join(format!("{}.{}.mmap", basename, Uuid::new_v4()));
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        // From here on the file is removed again if anything fails.
        let file = BackingFile {
            path,
            preserve: false,
        };
        handle.set_len(u64::try_from(bytes)?)?;
        // Safety: the file was created exclusively for this sink and is not shared.
        let map = unsafe { MmapMut::map_mut(&handle)? };
        info!(path = %file.path.display(), bytes, "Created disk-backed accumulation buffer");
        Ok(Self::with_storage(total, plane, Storage::Disk { map, file }))
    }

    fn with_storage(total: usize, plane: PlaneShape, storage: Storage) -> Self {
        Self {
            total,
            plane,
            storage,
            written: (0..total).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Kind of backing store.
    pub fn kind(&self) -> SinkKind {
        match self.storage {
            Storage::Resident(_) => SinkKind::Resident,
            Storage::Disk { .. } => SinkKind::Disk,
        }
    }

    /// Path of the backing file, for a disk-backed sink.
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Resident(_) => None,
            Storage::Disk { file, .. } => Some(&file.path),
        }
    }

    /// Number of fields of view.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Shape of each slot.
    pub fn plane(&self) -> PlaneShape {
        self.plane
    }

    /// Store `plane` at `index`, replacing anything written there before.
    pub fn write(&mut self, index: usize, plane: &Array3<u16>) -> Result<(), MaxProjError> {
        let total = self.total;
        let mut slots = self.slots(&[index])?;
        match slots.pop() {
            Some(mut slot) => slot.write(plane),
            None => Err(MaxProjError::FieldOfViewOutOfRange { index, total }),
        }
    }

    /// Returns writers for the slots of `indices`, in the same order.
    ///
    /// The writers borrow disjoint parts of the buffer and may be moved to different threads.
    pub fn slots(&mut self, indices: &[usize]) -> Result<Vec<SlotWriter<'_>>, MaxProjError> {
        for (i, index) in indices.iter().enumerate() {
            if *index >= self.total {
                return Err(MaxProjError::FieldOfViewOutOfRange {
                    index: *index,
                    total: self.total,
                });
            }
            if indices[..i].contains(index) {
                return Err(MaxProjError::OverlappingSlot { index: *index });
            }
        }
        let plane = self.plane;
        let written = &self.written;
        let mut slots: Vec<Option<SlotWriter<'_>>> = indices.iter().map(|_| None).collect();
        for (index, values) in self
            .storage
            .values_mut()?
            .chunks_exact_mut(plane.len())
            .enumerate()
        {
            if let Some(position) = indices.iter().position(|wanted| *wanted == index) {
                slots[position] = Some(SlotWriter {
                    index,
                    plane,
                    values,
                    written: &written[index],
                });
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Whether `index` has been written.
    pub fn is_written(&self, index: usize) -> bool {
        self.written
            .get(index)
            .map_or(false, |flag| flag.load(Ordering::Acquire))
    }

    /// Indices that have not been written yet.
    pub fn missing_indices(&self) -> Vec<usize> {
        (0..self.total).filter(|i| !self.is_written(*i)).collect()
    }

    /// Whether every index has been written.
    pub fn is_complete(&self) -> bool {
        (0..self.total).all(|i| self.is_written(i))
    }

    /// Returns a read-only view of the full buffer in (field, channel, row, column) order.
    ///
    /// Fails if any index was never written.
    pub fn finalize(&self) -> Result<ArrayView4<'_, u16>, MaxProjError> {
        let missing = self.missing_indices();
        if let Some(first) = missing.first() {
            return Err(MaxProjError::IncompleteBuffer {
                missing: missing.len(),
                first: *first,
                total: self.total,
            });
        }
        if let Storage::Disk { map, .. } = &self.storage {
            map.flush()?;
        }
        let shape = (
            self.total,
            self.plane.channels,
            self.plane.rows,
            self.plane.columns,
        );
        Ok(ArrayView4::from_shape(shape, self.storage.values()?)?)
    }

    /// Keep the backing file when the sink is dropped. Returns its path, if any.
    pub fn preserve(&mut self) -> Option<PathBuf> {
        match &mut self.storage {
            Storage::Resident(_) => None,
            Storage::Disk { file, .. } => {
                file.preserve = true;
                Some(file.path.clone())
            }
        }
    }

    /// Release the buffer and remove any backing file that is not preserved.
    pub fn release(self) {
        debug!(kind = ?self.kind(), "Releasing accumulation buffer");
    }
}

/// Number of u16 values in a buffer of `total` slots.
fn buffer_len(total: usize, plane: PlaneShape) -> Result<usize, MaxProjError> {
    if total == 0 {
        return Err(MaxProjError::InvalidConfig(
            "at least one field of view is required".to_string(),
        ));
    }
    if plane.is_empty() {
        return Err(MaxProjError::InvalidConfig(format!(
            "plane shape {:?} is empty",
            plane.as_array()
        )));
    }
    total
        .checked_mul(plane.len())
        .ok_or_else(|| MaxProjError::InvalidConfig("output buffer is too large".to_string()))
}

/// Exclusive write access to one slot of a sink.
#[derive(Debug)]
pub struct SlotWriter<'a> {
    index: usize,
    plane: PlaneShape,
    values: &'a mut [u16],
    written: &'a AtomicBool,
}

impl SlotWriter<'_> {
    /// Field of view index of the slot.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Copy `plane` into the slot.
    pub fn write(&mut self, plane: &Array3<u16>) -> Result<(), MaxProjError> {
        if plane.dim() != (self.plane.channels, self.plane.rows, self.plane.columns) {
            return Err(MaxProjError::PlaneShape {
                expected: self.plane.as_array(),
                actual: plane.shape().to_vec(),
            });
        }
        for (dst, src) in self.values.iter_mut().zip(plane.iter()) {
            *dst = *src;
        }
        self.written.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(value: u16, shape: PlaneShape) -> Array3<u16> {
        Array3::from_elem((shape.channels, shape.rows, shape.columns), value)
    }

    #[test]
    fn resident_write_and_finalize() {
        let shape = PlaneShape::new(2, 2, 3);
        let mut sink = AccumulationSink::resident(3, shape).unwrap();
        assert_eq!(SinkKind::Resident, sink.kind());
        assert!(sink.path().is_none());
        for index in [2, 0, 1] {
            sink.write(index, &plane(index as u16 + 1, shape)).unwrap();
        }
        let view = sink.finalize().unwrap();
        assert_eq!(&[3, 2, 2, 3], view.shape());
        assert_eq!(1, view[[0, 1, 1, 2]]);
        assert_eq!(3, view[[2, 0, 0, 0]]);
    }

    #[test]
    fn rewrite_is_last_write_wins() {
        let shape = PlaneShape::new(1, 2, 2);
        let mut sink = AccumulationSink::resident(3, shape).unwrap();
        sink.write(0, &plane(5, shape)).unwrap();
        sink.write(1, &plane(6, shape)).unwrap();
        sink.write(2, &plane(7, shape)).unwrap();
        sink.write(1, &plane(9, shape)).unwrap();
        let view = sink.finalize().unwrap();
        assert!(view.index_axis(ndarray::Axis(0), 0).iter().all(|v| *v == 5));
        assert!(view.index_axis(ndarray::Axis(0), 1).iter().all(|v| *v == 9));
        assert!(view.index_axis(ndarray::Axis(0), 2).iter().all(|v| *v == 7));
    }

    #[test]
    fn finalize_requires_every_index() {
        let shape = PlaneShape::new(1, 1, 1);
        let mut sink = AccumulationSink::resident(4, shape).unwrap();
        sink.write(0, &plane(1, shape)).unwrap();
        sink.write(2, &plane(1, shape)).unwrap();
        assert!(!sink.is_complete());
        assert_eq!(vec![1, 3], sink.missing_indices());
        match sink.finalize().unwrap_err() {
            MaxProjError::IncompleteBuffer {
                missing: 2,
                first: 1,
                total: 4,
            } => (),
            _ => panic!("expected incomplete buffer error"),
        }
        sink.write(1, &plane(1, shape)).unwrap();
        sink.write(3, &plane(1, shape)).unwrap();
        assert!(sink.is_complete());
        sink.finalize().unwrap();
    }

    #[test]
    fn write_checks_index_and_shape() {
        let shape = PlaneShape::new(1, 2, 2);
        let mut sink = AccumulationSink::resident(2, shape).unwrap();
        assert!(matches!(
            sink.write(2, &plane(1, shape)),
            Err(MaxProjError::FieldOfViewOutOfRange { index: 2, total: 2 })
        ));
        assert!(matches!(
            sink.write(0, &plane(1, PlaneShape::new(1, 2, 3))),
            Err(MaxProjError::PlaneShape { .. })
        ));
        assert!(!sink.is_written(0));
    }

    #[test]
    fn overlapping_slots_rejected() {
        let mut sink = AccumulationSink::resident(3, PlaneShape::new(1, 1, 1)).unwrap();
        match sink.slots(&[0, 2, 0]).unwrap_err() {
            MaxProjError::OverlappingSlot { index: 0 } => (),
            _ => panic!("expected overlapping slot error"),
        }
    }

    #[test]
    fn concurrent_slot_writes() {
        let shape = PlaneShape::new(1, 8, 8);
        let mut sink = AccumulationSink::resident(4, shape).unwrap();
        let slots = sink.slots(&[3, 1, 0, 2]).unwrap();
        assert_eq!(vec![3, 1, 0, 2], slots.iter().map(|s| s.index()).collect::<Vec<_>>());
        std::thread::scope(|scope| {
            for mut slot in slots {
                scope.spawn(move || {
                    let value = slot.index() as u16 * 10;
                    slot.write(&plane(value, shape)).unwrap();
                });
            }
        });
        let view = sink.finalize().unwrap();
        for index in 0..4 {
            let expected = index as u16 * 10;
            assert!(view
                .index_axis(ndarray::Axis(0), index)
                .iter()
                .all(|v| *v == expected));
        }
    }

    #[test]
    fn zero_fields_rejected() {
        assert!(AccumulationSink::resident(0, PlaneShape::new(1, 1, 1)).is_err());
        assert!(AccumulationSink::resident(1, PlaneShape::new(0, 1, 1)).is_err());
    }

    #[test]
    fn disk_file_sized_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let shape = PlaneShape::new(2, 3, 5);
        let mut sink = AccumulationSink::disk(4, shape, dir.path(), "out.tif").unwrap();
        assert_eq!(SinkKind::Disk, sink.kind());
        let path = sink.path().unwrap().to_path_buf();
        assert_eq!(4 * 2 * 3 * 5 * 2, fs::metadata(&path).unwrap().len());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("out.tif."));
        assert!(name.ends_with(".mmap"));

        for index in 0..4 {
            sink.write(index, &plane(index as u16 + 100, shape)).unwrap();
        }
        {
            let view = sink.finalize().unwrap();
            assert_eq!(103, view[[3, 1, 2, 4]]);
        }
        sink.release();
        assert!(!path.exists());
    }

    #[test]
    fn disk_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let shape = PlaneShape::new(1, 1, 1);
        let first = AccumulationSink::disk(1, shape, dir.path(), "out").unwrap();
        let second = AccumulationSink::disk(1, shape, dir.path(), "out").unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn preserved_file_survives_drop() {
        let dir = tempfile::tempdir().unwrap();
        let shape = PlaneShape::new(1, 2, 2);
        let mut sink = AccumulationSink::disk(2, shape, dir.path(), "out").unwrap();
        sink.write(0, &plane(42, shape)).unwrap();
        let path = sink.preserve().unwrap();
        drop(sink);
        let bytes = fs::read(&path).unwrap();
        assert_eq!(16, bytes.len());
        assert_eq!(42, u16::from_ne_bytes([bytes[0], bytes[1]]));
        assert_eq!(0, u16::from_ne_bytes([bytes[8], bytes[9]]));
    }

    #[test]
    fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AccumulationSink::disk(1, PlaneShape::new(1, 1, 1), &dir.path().join("nope"), "out");
        assert!(matches!(result, Err(MaxProjError::Io(_))));
    }
}
