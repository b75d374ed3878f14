//! Deep copies of pixel buffers
//!
//! Each plane is copied independently. Source and destination strides may
//! differ (allocators pad rows differently), in which case the copy walks
//! scanlines and moves `min(src_stride, dst_stride)` bytes per row.

use super::buffer::{AlignedAllocator, PixelBuffer, PixelBufferAllocator};
use super::PixelBufferError;

impl PixelBuffer {
    /// Duplicate this buffer into a newly allocated one of the same size and format
    pub fn copy(&self) -> Result<PixelBuffer, PixelBufferError> {
        self.copy_with(&AlignedAllocator::default())
    }

    /// Duplicate this buffer using `allocator` for the destination
    pub fn copy_with(
        &self,
        allocator: &dyn PixelBufferAllocator,
    ) -> Result<PixelBuffer, PixelBufferError> {
        let copy = allocator.allocate(self.width(), self.height(), self.format())?;

        if copy.width() != self.width()
            || copy.height() != self.height()
            || copy.format() != self.format()
        {
            return Err(PixelBufferError::InvalidLayout(format!(
                "allocator returned {}x{} {}, expected {}x{} {}",
                copy.width(),
                copy.height(),
                copy.format(),
                self.width(),
                self.height(),
                self.format()
            )));
        }

        copy.set_attachments(self.attachments().propagated());

        {
            let source = self.lock()?;
            let mut destination = copy.lock()?;

            let src_regions = &source.storage().regions;
            let dst_regions = &mut destination.storage_mut().regions;

            for (src, dst) in src_regions.iter().zip(dst_regions.iter_mut()) {
                copy_rows(
                    &src.data,
                    src.bytes_per_row,
                    &mut dst.data,
                    dst.bytes_per_row,
                    src.layout.height,
                );
            }
        }

        Ok(copy)
    }
}

/// Copy `rows` scanlines between two strided regions
pub(crate) fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    rows: usize,
) {
    if src_stride == dst_stride {
        let len = (src_stride * rows).min(src.len()).min(dst.len());
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }

    let row_len = src_stride.min(dst_stride);

    for (src_row, dst_row) in src
        .chunks(src_stride)
        .zip(dst.chunks_mut(dst_stride))
        .take(rows)
    {
        let len = row_len.min(src_row.len()).min(dst_row.len());
        dst_row[..len].copy_from_slice(&src_row[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::attachments::{AttachmentMode, COLOR_PRIMARIES};
    use crate::pixel::PixelFormat;
    use serde_json::json;

    /// Allocator with a fixed extra padding per row
    struct PaddedAllocator(usize);

    impl PixelBufferAllocator for PaddedAllocator {
        fn allocate(
            &self,
            width: usize,
            height: usize,
            format: PixelFormat,
        ) -> Result<PixelBuffer, PixelBufferError> {
            let strides: Vec<usize> = format
                .regions(width, height)
                .iter()
                .map(|l| l.min_bytes_per_row().unwrap() + self.0)
                .collect();
            PixelBuffer::with_bytes_per_row(width, height, format, &strides)
        }
    }

    struct FailingAllocator;

    impl PixelBufferAllocator for FailingAllocator {
        fn allocate(
            &self,
            _: usize,
            _: usize,
            _: PixelFormat,
        ) -> Result<PixelBuffer, PixelBufferError> {
            Err(PixelBufferError::AllocationFailed(0))
        }
    }

    fn patterned(format: PixelFormat, width: usize, height: usize) -> PixelBuffer {
        let buffer = PixelBuffer::new(width, height, format).unwrap();
        {
            let mut guard = buffer.lock().unwrap();
            for index in 0..guard.region_count() {
                let plane = guard.plane_mut(index).unwrap();
                for (i, byte) in plane.data.iter_mut().enumerate() {
                    *byte = (i * 7 + index * 31) as u8;
                }
            }
        }
        buffer
    }

    #[test]
    fn test_copy_planar_is_identical_and_independent() {
        let source = patterned(PixelFormat::Nv12, 6, 4);
        let copy = source.copy().unwrap();

        assert!(!copy.ptr_eq(&source));
        assert_eq!(copy.width(), 6);
        assert_eq!(copy.height(), 4);
        assert_eq!(copy.format(), PixelFormat::Nv12);
        assert_eq!(copy.plane_count(), 2);

        {
            let src = source.lock().unwrap();
            let dst = copy.lock().unwrap();
            for index in 0..2 {
                assert_eq!(src.plane(index).unwrap().data, dst.plane(index).unwrap().data);
            }
        }

        copy.lock().unwrap().fill(0xEE);

        let src = source.lock().unwrap();
        assert_eq!(src.plane(0).unwrap().data[0], 0);
        assert_eq!(src.plane(1).unwrap().data[1], (7 + 31) as u8);
    }

    #[test]
    fn test_copy_with_wider_destination_stride_leaves_padding_untouched() {
        let source = PixelBuffer::with_bytes_per_row(2, 3, PixelFormat::Bgra32, &[8]).unwrap();
        source.lock().unwrap().fill(0xAB);

        let copy = source.copy_with(&PaddedAllocator(5)).unwrap();
        let guard = copy.lock().unwrap();
        let plane = guard.plane(0).unwrap();
        assert_eq!(plane.bytes_per_row, 13);

        for y in 0..3 {
            let row = &plane.data[y * 13..(y + 1) * 13];
            assert!(row[..8].iter().all(|b| *b == 0xAB), "row {y}");
            assert!(row[8..].iter().all(|b| *b == 0), "row {y} tail");
        }
    }

    #[test]
    fn test_copy_with_narrower_destination_stride_copies_min_bytes() {
        let source = PixelBuffer::with_bytes_per_row(2, 2, PixelFormat::I420, &[6, 4, 4]).unwrap();
        {
            let mut guard = source.lock().unwrap();
            let plane = guard.plane_mut(0).unwrap();
            plane.data.copy_from_slice(&[1, 2, 9, 9, 9, 9, 3, 4, 9, 9, 9, 9]);
        }

        let copy = source.copy_with(&PaddedAllocator(0)).unwrap();
        let guard = copy.lock().unwrap();
        let plane = guard.plane(0).unwrap();
        assert_eq!(plane.bytes_per_row, 2);
        assert_eq!(plane.data, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_copy_propagates_only_propagating_attachments() {
        let source = PixelBuffer::new(2, 2, PixelFormat::Bgra32).unwrap();
        source.update_attachments(|a| {
            a.set(COLOR_PRIMARIES, json!("P3_D65"), AttachmentMode::Propagate);
            a.set("FrameID", json!(12), AttachmentMode::DoNotPropagate);
        });

        let copy = source.copy().unwrap();
        let attachments = copy.attachments();
        assert_eq!(attachments.len(), 1);
        assert!(attachments.get(COLOR_PRIMARIES).is_some());
    }

    #[test]
    fn test_copy_fails_when_allocation_fails() {
        let source = PixelBuffer::new(2, 2, PixelFormat::Bgra32).unwrap();
        assert_eq!(
            source.copy_with(&FailingAllocator).unwrap_err(),
            PixelBufferError::AllocationFailed(0)
        );
    }

    #[test]
    fn test_copy_fails_while_source_is_locked() {
        let source = PixelBuffer::new(2, 2, PixelFormat::Bgra32).unwrap();
        let handle = source.clone();
        let _guard = handle.lock().unwrap();
        assert_eq!(source.copy().unwrap_err(), PixelBufferError::LockFailed);
    }
}
