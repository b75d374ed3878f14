//! Pixel buffer storage
//!
//! A `PixelBuffer` is a shared handle: cloning it retains the same storage,
//! the way capture frameworks hand out reference-counted image buffers.
//! Access to the pixel memory goes through an exclusive RAII lock.

use super::attachments::Attachments;
use super::format::{PixelFormat, PlaneLayout};
use super::PixelBufferError;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How long `lock` waits for another holder before giving up
const LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// One contiguous memory region (a plane, or the whole image for packed formats)
#[derive(Debug)]
pub(crate) struct Region {
    pub(crate) layout: PlaneLayout,
    pub(crate) bytes_per_row: usize,
    pub(crate) data: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct Storage {
    pub(crate) regions: Vec<Region>,
}

struct Shared {
    width: usize,
    height: usize,
    format: PixelFormat,
    region_count: usize,
    attachments: Mutex<Attachments>,
    storage: Mutex<Storage>,
}

/// Image buffer with one or more memory planes
#[derive(Clone)]
pub struct PixelBuffer {
    shared: Arc<Shared>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.shared.width)
            .field("height", &self.shared.height)
            .field("format", &self.shared.format)
            .finish_non_exhaustive()
    }
}

impl PixelBuffer {
    /// Allocate a zeroed buffer with 64-byte aligned rows
    pub fn new(width: usize, height: usize, format: PixelFormat) -> Result<Self, PixelBufferError> {
        AlignedAllocator::default().allocate(width, height, format)
    }

    /// Allocate a zeroed buffer with explicit row strides, one per region
    pub fn with_bytes_per_row(
        width: usize,
        height: usize,
        format: PixelFormat,
        bytes_per_row: &[usize],
    ) -> Result<Self, PixelBufferError> {
        let layouts = validated_layouts(width, height, format, bytes_per_row)?;

        let mut regions = Vec::with_capacity(layouts.len());
        for (layout, stride) in layouts.into_iter().zip(bytes_per_row) {
            let len = stride
                .checked_mul(layout.height)
                .ok_or(PixelBufferError::InvalidDimensions { width, height })?;
            let mut data = Vec::new();
            data.try_reserve_exact(len)
                .map_err(|_| PixelBufferError::AllocationFailed(len))?;
            data.resize(len, 0);
            regions.push(Region {
                layout,
                bytes_per_row: *stride,
                data,
            });
        }

        Ok(Self::from_regions(width, height, format, regions))
    }

    /// Wrap existing packed pixel data (e.g. a frame read from a decoder)
    pub fn from_packed_data(
        width: usize,
        height: usize,
        format: PixelFormat,
        bytes_per_row: usize,
        data: Vec<u8>,
    ) -> Result<Self, PixelBufferError> {
        if format.is_planar() {
            return Err(PixelBufferError::InvalidLayout(format!(
                "{format} is planar, packed data needs a packed format"
            )));
        }

        let mut layouts = validated_layouts(width, height, format, &[bytes_per_row])?;
        let layout = layouts.remove(0);

        let expected = bytes_per_row
            .checked_mul(height)
            .ok_or(PixelBufferError::InvalidDimensions { width, height })?;
        if data.len() < expected {
            return Err(PixelBufferError::InvalidLayout(format!(
                "expected {expected} bytes, got {}",
                data.len()
            )));
        }

        let mut data = data;
        data.truncate(expected);

        Ok(Self::from_regions(
            width,
            height,
            format,
            vec![Region {
                layout,
                bytes_per_row,
                data,
            }],
        ))
    }

    fn from_regions(
        width: usize,
        height: usize,
        format: PixelFormat,
        regions: Vec<Region>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                width,
                height,
                format,
                region_count: regions.len(),
                attachments: Mutex::new(Attachments::new()),
                storage: Mutex::new(Storage { regions }),
            }),
        }
    }

    pub fn width(&self) -> usize {
        self.shared.width
    }

    pub fn height(&self) -> usize {
        self.shared.height
    }

    pub fn format(&self) -> PixelFormat {
        self.shared.format
    }

    /// Number of planes; zero for packed formats
    pub fn plane_count(&self) -> usize {
        if self.shared.format.is_planar() {
            self.shared.region_count
        } else {
            0
        }
    }

    /// Snapshot of the attachment table
    pub fn attachments(&self) -> Attachments {
        self.shared.attachments.lock().clone()
    }

    pub fn set_attachments(&self, attachments: Attachments) {
        *self.shared.attachments.lock() = attachments;
    }

    /// Mutate the attachment table in place
    pub fn update_attachments<F: FnOnce(&mut Attachments)>(&self, update: F) {
        update(&mut self.shared.attachments.lock());
    }

    /// Whether two handles refer to the same storage
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Take the exclusive lock on the pixel memory.
    ///
    /// The lock is released when the returned guard is dropped.
    pub fn lock(&self) -> Result<PixelBufferGuard<'_>, PixelBufferError> {
        let storage = self
            .shared
            .storage
            .try_lock_for(LOCK_TIMEOUT)
            .ok_or(PixelBufferError::LockFailed)?;

        Ok(PixelBufferGuard {
            buffer: self,
            storage,
        })
    }
}

fn validated_layouts(
    width: usize,
    height: usize,
    format: PixelFormat,
    bytes_per_row: &[usize],
) -> Result<Vec<PlaneLayout>, PixelBufferError> {
    if width == 0 || height == 0 {
        return Err(PixelBufferError::InvalidDimensions { width, height });
    }

    let layouts = format.regions(width, height);
    if layouts.len() != bytes_per_row.len() {
        return Err(PixelBufferError::InvalidLayout(format!(
            "{format} needs {} row strides, got {}",
            layouts.len(),
            bytes_per_row.len()
        )));
    }

    for (index, (layout, stride)) in layouts.iter().zip(bytes_per_row).enumerate() {
        let min = layout
            .min_bytes_per_row()
            .ok_or(PixelBufferError::InvalidDimensions { width, height })?;
        if *stride < min {
            return Err(PixelBufferError::InvalidStride {
                plane: index,
                bytes_per_row: *stride,
                min,
            });
        }
    }

    Ok(layouts)
}

/// Read-only view of one plane
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub width: usize,
    pub height: usize,
    pub bytes_per_pixel: usize,
    pub bytes_per_row: usize,
    pub data: &'a [u8],
}

impl<'a> Plane<'a> {
    /// Bytes of row `y`, without stride padding
    pub fn row(&self, y: usize) -> &'a [u8] {
        let start = y * self.bytes_per_row;
        &self.data[start..start + self.width * self.bytes_per_pixel]
    }
}

/// Mutable view of one plane
#[derive(Debug)]
pub struct PlaneMut<'a> {
    pub width: usize,
    pub height: usize,
    pub bytes_per_pixel: usize,
    pub bytes_per_row: usize,
    pub data: &'a mut [u8],
}

/// Exclusive access to a locked pixel buffer
pub struct PixelBufferGuard<'a> {
    buffer: &'a PixelBuffer,
    storage: MutexGuard<'a, Storage>,
}

impl fmt::Debug for PixelBufferGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBufferGuard")
            .field("buffer", self.buffer)
            .finish_non_exhaustive()
    }
}

impl<'a> PixelBufferGuard<'a> {
    pub fn buffer(&self) -> &'a PixelBuffer {
        self.buffer
    }

    /// Number of planes; zero for packed formats
    pub fn plane_count(&self) -> usize {
        if self.buffer.format().is_planar() {
            self.storage.regions.len()
        } else {
            0
        }
    }

    /// Number of memory regions (one for packed formats)
    pub fn region_count(&self) -> usize {
        self.storage.regions.len()
    }

    /// Plane `index`; packed formats expose their single region as plane 0
    pub fn plane(&self, index: usize) -> Option<Plane<'_>> {
        self.storage.regions.get(index).map(|r| Plane {
            width: r.layout.width,
            height: r.layout.height,
            bytes_per_pixel: r.layout.bytes_per_pixel,
            bytes_per_row: r.bytes_per_row,
            data: &r.data,
        })
    }

    pub fn plane_mut(&mut self, index: usize) -> Option<PlaneMut<'_>> {
        self.storage.regions.get_mut(index).map(|r| PlaneMut {
            width: r.layout.width,
            height: r.layout.height,
            bytes_per_pixel: r.layout.bytes_per_pixel,
            bytes_per_row: r.bytes_per_row,
            data: &mut r.data,
        })
    }

    /// Fill every region with `value`, padding included
    pub fn fill(&mut self, value: u8) {
        for region in &mut self.storage.regions {
            region.data.fill(value);
        }
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }
}

/// Source of destination buffers for copies
pub trait PixelBufferAllocator {
    fn allocate(
        &self,
        width: usize,
        height: usize,
        format: PixelFormat,
    ) -> Result<PixelBuffer, PixelBufferError>;
}

/// Allocates zeroed buffers whose rows are padded to a fixed alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedAllocator {
    pub row_alignment: usize,
}

impl Default for AlignedAllocator {
    fn default() -> Self {
        Self { row_alignment: 64 }
    }
}

impl PixelBufferAllocator for AlignedAllocator {
    fn allocate(
        &self,
        width: usize,
        height: usize,
        format: PixelFormat,
    ) -> Result<PixelBuffer, PixelBufferError> {
        let alignment = self.row_alignment.max(1);
        let strides = format
            .regions(width, height)
            .iter()
            .map(|layout| {
                layout
                    .min_bytes_per_row()
                    .and_then(|min| min.checked_next_multiple_of(alignment))
                    .ok_or(PixelBufferError::InvalidDimensions { width, height })
            })
            .collect::<Result<Vec<usize>, _>>()?;

        PixelBuffer::with_bytes_per_row(width, height, format, &strides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_allocation() {
        let buffer = PixelBuffer::new(10, 4, PixelFormat::Bgra32).unwrap();
        let guard = buffer.lock().unwrap();
        let plane = guard.plane(0).unwrap();
        assert_eq!(plane.bytes_per_row, 64);
        assert_eq!(plane.data.len(), 64 * 4);
        assert_eq!(guard.plane_count(), 0);
        assert_eq!(guard.region_count(), 1);
    }

    #[test]
    fn test_invalid_stride_rejected() {
        let err = PixelBuffer::with_bytes_per_row(10, 4, PixelFormat::Bgra32, &[39]).unwrap_err();
        assert_eq!(
            err,
            PixelBufferError::InvalidStride {
                plane: 0,
                bytes_per_row: 39,
                min: 40
            }
        );

        let err = PixelBuffer::new(0, 4, PixelFormat::Nv12).unwrap_err();
        assert_eq!(err, PixelBufferError::InvalidDimensions { width: 0, height: 4 });
    }

    #[test]
    fn test_oversized_dimensions_fail_without_panicking() {
        let huge = 1usize << (usize::BITS / 2 - 1);
        let err = PixelBuffer::with_bytes_per_row(huge, huge, PixelFormat::Bgra32, &[huge * 4])
            .unwrap_err();
        assert_eq!(
            err,
            PixelBufferError::InvalidDimensions {
                width: huge,
                height: huge
            }
        );

        // Row size overflows
        let err = PixelBuffer::new(usize::MAX / 2, 1, PixelFormat::Bgra32).unwrap_err();
        assert!(matches!(err, PixelBufferError::InvalidDimensions { .. }));

        // Row alignment overflows
        let err = PixelBuffer::new(usize::MAX / 4 - 1, 1, PixelFormat::Bgra32).unwrap_err();
        assert!(matches!(err, PixelBufferError::InvalidDimensions { .. }));

        let rows = usize::MAX / 4;
        let err = PixelBuffer::with_bytes_per_row(1, rows, PixelFormat::Bgra32, &[4]).unwrap_err();
        assert!(matches!(err, PixelBufferError::AllocationFailed(_)));

        let err = PixelBuffer::from_packed_data(1, usize::MAX, PixelFormat::Rgba32, 4, Vec::new())
            .unwrap_err();
        assert!(matches!(err, PixelBufferError::InvalidDimensions { .. }));
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let buffer = PixelBuffer::new(2, 2, PixelFormat::Nv12).unwrap();
        let clone = buffer.clone();

        {
            let _guard = buffer.lock().unwrap();
            assert_eq!(clone.lock().unwrap_err(), PixelBufferError::LockFailed);
        }

        assert!(clone.lock().is_ok());
        assert_eq!(buffer.plane_count(), 2);
        assert!(buffer.ptr_eq(&clone));
    }

    #[test]
    fn test_from_packed_data() {
        let data: Vec<u8> = (0..32).collect();
        let buffer = PixelBuffer::from_packed_data(2, 2, PixelFormat::Rgba32, 16, data).unwrap();
        let guard = buffer.lock().unwrap();
        assert_eq!(guard.plane(0).unwrap().row(1), &(16..32).collect::<Vec<u8>>()[..]);

        assert!(PixelBuffer::from_packed_data(2, 2, PixelFormat::Nv12, 2, vec![0; 8]).is_err());
    }
}
