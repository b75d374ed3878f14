//! Overlay drawing
//!
//! Exposes the first plane of a 32-bit buffer as a drawing surface with an
//! optional pre-applied flip. Pixels are stored premultiplied; colors passed
//! in are straight alpha. The surface origin is the top-left corner.

use super::buffer::{PixelBuffer, PlaneMut};
use super::{PixelBufferError, PixelFormat};
use crate::flip::FlipOptions;
use crate::geometry::{AffineTransform, Point, Rect};

/// Straight-alpha RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const CLEAR: Self = Self::rgba(0, 0, 0, 0);
    pub const BLACK: Self = Self::rgba(0, 0, 0, 255);
    pub const WHITE: Self = Self::rgba(255, 255, 255, 255);
    pub const RED: Self = Self::rgba(255, 0, 0, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Byte offsets of the R, G, B and A components inside a 32-bit pixel
fn channel_offsets(format: PixelFormat) -> Option<[usize; 4]> {
    match format {
        PixelFormat::Bgra32 => Some([2, 1, 0, 3]),
        PixelFormat::Rgba32 => Some([0, 1, 2, 3]),
        PixelFormat::Argb32 => Some([1, 2, 3, 0]),
        PixelFormat::Nv12 | PixelFormat::I420 => None,
    }
}

/// Drawing surface over a locked pixel buffer
pub struct DrawingSurface<'a> {
    data: &'a mut [u8],
    width: usize,
    height: usize,
    bytes_per_row: usize,
    offsets: [usize; 4],
    ctm: AffineTransform,
}

impl std::fmt::Debug for DrawingSurface<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawingSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_per_row", &self.bytes_per_row)
            .field("ctm", &self.ctm)
            .finish_non_exhaustive()
    }
}

impl<'a> DrawingSurface<'a> {
    pub(crate) fn new(
        plane: PlaneMut<'a>,
        format: PixelFormat,
        flip: FlipOptions,
    ) -> Result<Self, PixelBufferError> {
        let offsets = channel_offsets(format)
            .filter(|_| plane.bytes_per_pixel == 4)
            .ok_or(PixelBufferError::UnsupportedDrawingSurface(format))?;

        let bounds = Rect::new(0.0, 0.0, plane.width as f64, plane.height as f64);

        Ok(Self {
            data: plane.data,
            width: plane.width,
            height: plane.height,
            bytes_per_row: plane.bytes_per_row,
            offsets,
            ctm: flip.drawing_transform(bounds),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Bounding rectangle in user space
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width as f64, self.height as f64)
    }

    /// Current user-to-device transform
    pub fn ctm(&self) -> AffineTransform {
        self.ctm
    }

    pub fn translate_by(&mut self, tx: f64, ty: f64) {
        self.ctm = self.ctm.translated_by(tx, ty);
    }

    pub fn scale_by(&mut self, sx: f64, sy: f64) {
        self.ctm = self.ctm.scaled_by(sx, sy);
    }

    /// Composite `color` over every pixel covered by `rect`
    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        let Some((x0, x1, y0, y1)) = self.device_span(rect) else {
            return;
        };

        for y in y0..y1 {
            for x in x0..x1 {
                self.blend(x, y, color);
            }
        }
    }

    /// Set every pixel covered by `rect` to transparent black
    pub fn clear_rect(&mut self, rect: Rect) {
        let Some((x0, x1, y0, y1)) = self.device_span(rect) else {
            return;
        };

        for y in y0..y1 {
            for x in x0..x1 {
                let idx = y * self.bytes_per_row + x * 4;
                self.data[idx..idx + 4].fill(0);
            }
        }
    }

    /// Composite a straight-alpha RGBA image scaled into `rect` (nearest neighbor)
    pub fn draw_image(&mut self, rgba: &[u8], image_width: usize, image_height: usize, rect: Rect) {
        if image_width == 0 || image_height == 0 || rgba.len() < image_width * image_height * 4 {
            return;
        }
        if rect.width() == 0.0 || rect.height() == 0.0 {
            return;
        }
        let Some(inverse) = self.ctm.inverted() else {
            return;
        };
        let Some((x0, x1, y0, y1)) = self.device_span(rect) else {
            return;
        };

        for y in y0..y1 {
            for x in x0..x1 {
                let user = inverse.apply(Point::new(x as f64 + 0.5, y as f64 + 0.5));
                let u = (user.x - rect.min_x()) / rect.width().abs();
                let v = (user.y - rect.min_y()) / rect.height().abs();
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }

                let src_x = ((u * image_width as f64) as usize).min(image_width - 1);
                let src_y = ((v * image_height as f64) as usize).min(image_height - 1);
                let src_idx = (src_y * image_width + src_x) * 4;

                let color = Color::rgba(
                    rgba[src_idx],
                    rgba[src_idx + 1],
                    rgba[src_idx + 2],
                    rgba[src_idx + 3],
                );
                if color.a == 0 {
                    continue;
                }
                self.blend(x, y, color);
            }
        }
    }

    /// Straight-alpha color of the device pixel at `(x, y)`
    pub fn pixel(&self, x: usize, y: usize) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let idx = y * self.bytes_per_row + x * 4;
        let [ro, go, bo, ao] = self.offsets;
        let px = &self.data[idx..idx + 4];
        let a = px[ao];

        let unpremultiply = |c: u8| -> u8 {
            if a == 0 {
                0
            } else {
                ((u32::from(c) * 255 + u32::from(a) / 2) / u32::from(a)).min(255) as u8
            }
        };

        Some(Color::rgba(
            unpremultiply(px[ro]),
            unpremultiply(px[go]),
            unpremultiply(px[bo]),
            a,
        ))
    }

    /// Device pixel range covered by a user-space rectangle, clipped to the surface
    fn device_span(&self, rect: Rect) -> Option<(usize, usize, usize, usize)> {
        let device = self.ctm.apply_rect(rect);
        let clamp_x = |v: f64| v.round().clamp(0.0, self.width as f64) as usize;
        let clamp_y = |v: f64| v.round().clamp(0.0, self.height as f64) as usize;

        let (x0, x1) = (clamp_x(device.min_x()), clamp_x(device.max_x()));
        let (y0, y1) = (clamp_y(device.min_y()), clamp_y(device.max_y()));

        (x0 < x1 && y0 < y1).then_some((x0, x1, y0, y1))
    }

    /// Source-over composite in premultiplied space
    fn blend(&mut self, x: usize, y: usize, color: Color) {
        let idx = y * self.bytes_per_row + x * 4;
        let [ro, go, bo, ao] = self.offsets;
        let px = &mut self.data[idx..idx + 4];

        let src_a = u32::from(color.a);
        let premultiply = |c: u8| (u32::from(c) * src_a + 127) / 255;
        let over = |src: u32, dst: u8| {
            (src + (u32::from(dst) * (255 - src_a) + 127) / 255).min(255) as u8
        };

        px[ro] = over(premultiply(color.r), px[ro]);
        px[go] = over(premultiply(color.g), px[go]);
        px[bo] = over(premultiply(color.b), px[bo]);
        px[ao] = over(src_a, px[ao]);
    }
}

impl PixelBuffer {
    /// Draw onto this buffer in place.
    ///
    /// The buffer is locked for the duration of the call; `draw` receives the
    /// surface (already flipped per `flip`) and its bounds.
    pub fn apply_overlay<F>(&self, flip: FlipOptions, draw: F) -> Result<(), PixelBufferError>
    where
        F: FnOnce(&mut DrawingSurface<'_>, Rect),
    {
        let format = self.format();
        let mut guard = self.lock()?;
        let plane = guard
            .plane_mut(0)
            .ok_or(PixelBufferError::UnsupportedDrawingSurface(format))?;

        let mut surface = DrawingSurface::new(plane, format, flip)?;
        let bounds = surface.bounds();
        draw(&mut surface, bounds);

        Ok(())
    }

    /// Copy this buffer and draw onto the copy; `self` is left untouched
    pub fn copy_with_overlay<F>(
        &self,
        flip: FlipOptions,
        draw: F,
    ) -> Result<PixelBuffer, PixelBufferError>
    where
        F: FnOnce(&mut DrawingSurface<'_>, Rect),
    {
        let copy = self.copy()?;
        copy.apply_overlay(flip, draw)?;
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn bgra(width: usize, height: usize) -> PixelBuffer {
        PixelBuffer::new(width, height, PixelFormat::Bgra32).unwrap()
    }

    fn memory_pixel(buffer: &PixelBuffer, x: usize, y: usize) -> [u8; 4] {
        let guard = buffer.lock().unwrap();
        let plane = guard.plane(0).unwrap();
        let idx = y * plane.bytes_per_row + x * 4;
        [plane.data[idx], plane.data[idx + 1], plane.data[idx + 2], plane.data[idx + 3]]
    }

    #[test]
    fn test_fill_rect_writes_bgra_memory_order() {
        let buffer = bgra(4, 4);
        buffer
            .apply_overlay(FlipOptions::empty(), |surface, bounds| {
                assert_eq!(bounds, Rect::new(0.0, 0.0, 4.0, 4.0));
                surface.fill_rect(Rect::new(0.0, 0.0, 1.0, 1.0), Color::RED);
            })
            .unwrap();

        assert_eq!(memory_pixel(&buffer, 0, 0), [0, 0, 255, 255]);
        assert_eq!(memory_pixel(&buffer, 1, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn test_flip_moves_drawing_to_opposite_corner() {
        let cases = [
            (FlipOptions::empty(), (0, 0)),
            (FlipOptions::HORIZONTAL, (3, 0)),
            (FlipOptions::VERTICAL, (0, 1)),
            (FlipOptions::all(), (3, 1)),
        ];

        for (flip, (x, y)) in cases {
            let buffer = bgra(4, 2);
            buffer
                .apply_overlay(flip, |surface, _| {
                    surface.fill_rect(Rect::new(0.0, 0.0, 1.0, 1.0), Color::WHITE);
                })
                .unwrap();

            assert_eq!(memory_pixel(&buffer, x, y), [255, 255, 255, 255], "{flip:?}");
        }
    }

    #[test]
    fn test_half_transparent_blend_is_premultiplied() {
        let buffer = bgra(1, 1);
        buffer
            .apply_overlay(FlipOptions::empty(), |surface, bounds| {
                surface.fill_rect(bounds, Color::rgba(255, 0, 0, 128));
                assert_eq!(surface.pixel(0, 0), Some(Color::rgba(255, 0, 0, 128)));
            })
            .unwrap();

        assert_eq!(memory_pixel(&buffer, 0, 0), [0, 0, 128, 128]);
    }

    #[test]
    fn test_draw_image_scales_nearest_neighbor() {
        #[rustfmt::skip]
        let image = [
            255, 0, 0, 255,   0, 255, 0, 255,
            0, 0, 255, 255,   0, 0, 0, 0,
        ];
        let buffer = bgra(4, 4);
        buffer
            .apply_overlay(FlipOptions::empty(), |surface, bounds| {
                surface.draw_image(&image, 2, 2, bounds);
                assert_eq!(surface.pixel(0, 0), Some(Color::RED));
                assert_eq!(surface.pixel(3, 1), Some(Color::rgba(0, 255, 0, 255)));
                assert_eq!(surface.pixel(1, 3), Some(Color::rgba(0, 0, 255, 255)));
                assert_eq!(surface.pixel(3, 3), Some(Color::CLEAR));
            })
            .unwrap();
    }

    #[test]
    fn test_copy_with_overlay_leaves_source_untouched() {
        let source = bgra(2, 2);
        let copy = source
            .copy_with_overlay(FlipOptions::empty(), |surface, bounds| {
                surface.fill_rect(bounds, Color::BLACK);
            })
            .unwrap();

        assert_eq!(memory_pixel(&copy, 1, 1), [0, 0, 0, 255]);
        assert_eq!(memory_pixel(&source, 1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn test_planar_buffer_cannot_host_surface() {
        let buffer = PixelBuffer::new(4, 4, PixelFormat::Nv12).unwrap();
        let mut called = false;
        let result = buffer.apply_overlay(FlipOptions::empty(), |_, _| called = true);

        assert_eq!(
            result,
            Err(PixelBufferError::UnsupportedDrawingSurface(PixelFormat::Nv12))
        );
        assert!(!called);
    }

    #[test]
    fn test_lock_released_when_drawing_panics() {
        let buffer = bgra(2, 2);
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = buffer.apply_overlay(FlipOptions::empty(), |_, _| panic!("drawing failed"));
        }));

        assert!(result.is_err());
        assert!(buffer.lock().is_ok());
    }
}
