use bytemuck::{cast_slice, cast_slice_mut};
use model::{Color, ResourceFormat, TileRect};

/// CPU pixel target for software playback. Pixel (0, 0) of the
/// underlying buffer corresponds to the top-left of `target_rect` in
/// content space; drawing is clipped to the buffer.
pub struct PixelCanvas<'a> {
    pixels: &'a mut [u8],
    width: i32,
    height: i32,
    format: ResourceFormat,
    target_rect: TileRect,
}

impl<'a> PixelCanvas<'a> {
    pub fn new(
        pixels: &'a mut [u8],
        width: i32,
        height: i32,
        format: ResourceFormat,
        target_rect: TileRect,
    ) -> Self {
        assert!(
            width > 0 && height > 0,
            "canvas dimensions must be positive, got {width}x{height}"
        );
        let expected_len = (width as i64)
            .checked_mul(height as i64)
            .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
            .expect("canvas byte length overflow");
        assert!(
            pixels.len() as i64 == expected_len,
            "canvas byte length {} does not match {width}x{height} {format:?}",
            pixels.len()
        );
        Self {
            pixels,
            width,
            height,
            format,
            target_rect,
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn format(&self) -> ResourceFormat {
        self.format
    }

    pub fn target_rect(&self) -> TileRect {
        self.target_rect
    }

    /// Fill a content-space rect, clipped against the canvas target.
    pub fn fill_rect(&mut self, rect: TileRect, color: Color) {
        let clipped = rect.intersection(self.target_rect);
        if clipped.is_empty() {
            return;
        }
        let local_x = clipped.x - self.target_rect.x;
        let local_y = clipped.y - self.target_rect.y;
        let row_pixels = self.width as usize;
        match self.format {
            ResourceFormat::Rgba8888 => {
                let pixels: &mut [Color] = cast_slice_mut(self.pixels);
                for row in 0..clipped.height as usize {
                    let start = (local_y as usize + row) * row_pixels + local_x as usize;
                    pixels[start..start + clipped.width as usize].fill(color);
                }
            }
            ResourceFormat::Rgba4444 => {
                let packed = pack_rgba4444(color).to_le_bytes();
                for row in 0..clipped.height as usize {
                    let start = ((local_y as usize + row) * row_pixels + local_x as usize) * 2;
                    let row_bytes =
                        &mut self.pixels[start..start + clipped.width as usize * 2];
                    for pixel in row_bytes.chunks_exact_mut(2) {
                        pixel.copy_from_slice(&packed);
                    }
                }
            }
        }
    }

    /// Read back one content-space pixel. Test and debug helper.
    pub fn pixel_at(&self, x: i32, y: i32) -> Color {
        assert!(
            self.target_rect
                .contains(TileRect::new(x, y, 1, 1)),
            "pixel ({x}, {y}) is outside the canvas target rect"
        );
        let local_x = (x - self.target_rect.x) as usize;
        let local_y = (y - self.target_rect.y) as usize;
        let index = local_y * self.width as usize + local_x;
        match self.format {
            ResourceFormat::Rgba8888 => {
                let pixels: &[Color] = cast_slice(self.pixels);
                pixels[index]
            }
            ResourceFormat::Rgba4444 => {
                let offset = index * 2;
                let word = u16::from_le_bytes([self.pixels[offset], self.pixels[offset + 1]]);
                unpack_rgba4444(word)
            }
        }
    }
}

fn pack_rgba4444(color: Color) -> u16 {
    let r = (color.r >> 4) as u16;
    let g = (color.g >> 4) as u16;
    let b = (color.b >> 4) as u16;
    let a = (color.a >> 4) as u16;
    (r << 12) | (g << 8) | (b << 4) | a
}

fn unpack_rgba4444(word: u16) -> Color {
    let expand = |nibble: u16| -> u8 {
        let nibble = (nibble & 0xf) as u8;
        (nibble << 4) | nibble
    };
    Color {
        r: expand(word >> 12),
        g: expand(word >> 8),
        b: expand(word >> 4),
        a: expand(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_rect_clips_to_the_target_rect() {
        let mut pixels = vec![0u8; 4 * 4 * 4];
        let target = TileRect::new(100, 200, 4, 4);
        let mut canvas = PixelCanvas::new(&mut pixels, 4, 4, ResourceFormat::Rgba8888, target);

        let red = Color::opaque(255, 0, 0);
        canvas.fill_rect(TileRect::new(98, 198, 4, 4), red);

        assert_eq!(canvas.pixel_at(100, 200), red);
        assert_eq!(canvas.pixel_at(101, 201), red);
        assert_eq!(canvas.pixel_at(102, 200), Color::TRANSPARENT);
        assert_eq!(canvas.pixel_at(100, 202), Color::TRANSPARENT);
    }

    #[test]
    fn rgba4444_round_trips_high_nibbles() {
        let mut pixels = vec![0u8; 2 * 2 * 2];
        let target = TileRect::new(0, 0, 2, 2);
        let mut canvas = PixelCanvas::new(&mut pixels, 2, 2, ResourceFormat::Rgba4444, target);

        canvas.fill_rect(target, Color::opaque(0xf0, 0x70, 0x30));
        assert_eq!(
            canvas.pixel_at(1, 1),
            Color {
                r: 0xff,
                g: 0x77,
                b: 0x33,
                a: 0xff,
            }
        );
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn mismatched_buffer_length_is_fatal() {
        let mut pixels = vec![0u8; 7];
        let _ = PixelCanvas::new(
            &mut pixels,
            2,
            2,
            ResourceFormat::Rgba8888,
            TileRect::from_size(2, 2),
        );
    }
}
