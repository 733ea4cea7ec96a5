//! Heat-map rendering.
//!
//! A small brush image is stamped, centred, at every valid gaze point with
//! source-over alpha compositing. Places looked at more often accumulate
//! more opaque colour. The compositing routine works directly on RGBA8
//! buffers; the `image` crate is only used for PNG decode and encode.

use crate::tracker::types::Frame;
use chrono::{DateTime, Duration, Utc};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from a single render call.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load image {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode PNG: {0}")]
    Encode(#[from] image::ImageError),

    #[error("invalid canvas size {width}x{height}")]
    InvalidCanvas { width: u32, height: u32 },
}

/// Load a PNG (or any format the `image` crate was built with) as RGBA8.
pub fn load_image(path: impl AsRef<Path>) -> Result<RgbaImage, RenderError> {
    let path = path.as_ref();
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|source| RenderError::Load {
            path: path.to_path_buf(),
            source,
        })
}

/// The image stamped at each gaze point.
#[derive(Debug, Clone)]
pub struct Brush {
    image: RgbaImage,
}

impl Brush {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        load_image(path).map(Self::from_image)
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Square brush of a single colour.
    pub fn solid(size: u32, rgba: [u8; 4]) -> Self {
        Self::from_image(RgbaImage::from_pixel(size, size, image::Rgba(rgba)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

/// Parameters of one render.
#[derive(Debug, Clone, Copy)]
pub struct HeatmapOptions<'a> {
    pub width: u32,
    pub height: u32,
    /// Only frames received within this long after `start` are drawn.
    pub cutoff: Option<Duration>,
    /// Reference time for `cutoff`; defaults to the first frame.
    pub start: Option<DateTime<Utc>>,
    /// Drawn unscaled at the origin beneath the gaze layer.
    pub background: Option<&'a RgbaImage>,
}

impl<'a> HeatmapOptions<'a> {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cutoff: None,
            start: None,
            background: None,
        }
    }

    /// Limit to the first `secs` seconds. Negative means no limit.
    pub fn with_cutoff_secs(mut self, secs: i64) -> Self {
        self.cutoff = (secs >= 0).then(|| Duration::seconds(secs));
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_background(mut self, background: &'a RgbaImage) -> Self {
        self.background = Some(background);
        self
    }
}

/// Render `frames` (oldest first) into an RGBA image.
pub fn render_heatmap(
    frames: &[Frame],
    brush: &Brush,
    options: &HeatmapOptions<'_>,
) -> Result<RgbaImage, RenderError> {
    let (width, height) = (options.width, options.height);
    if width == 0 || height == 0 {
        return Err(RenderError::InvalidCanvas { width, height });
    }

    let deadline = options.cutoff.and_then(|cutoff| {
        options
            .start
            .or_else(|| frames.first().map(|f| f.received_at))
            .map(|start| start + cutoff)
    });

    let mut gaze_layer = RgbaImage::new(width, height);
    let half_w = brush.width() as f64 / 2.0;
    let half_h = brush.height() as f64 / 2.0;

    for frame in frames {
        if deadline.is_some_and(|deadline| frame.received_at > deadline) {
            continue;
        }
        let Some(point) = frame.gaze() else {
            continue;
        };
        let left = (point.x - half_w).floor() as i64;
        let top = (point.y - half_h).floor() as i64;
        draw_over(&mut gaze_layer, brush.image(), left, top);
    }

    let Some(background) = options.background else {
        return Ok(gaze_layer);
    };

    let mut canvas = RgbaImage::new(width, height);
    draw_over(&mut canvas, background, 0, 0);
    draw_over(&mut canvas, &gaze_layer, 0, 0);
    Ok(canvas)
}

/// Encode as PNG.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, RenderError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Composite `src` over `dst` with its top-left corner at (`left`, `top`),
/// clipped to `dst`.
pub fn draw_over(dst: &mut RgbaImage, src: &RgbaImage, left: i64, top: i64) {
    let (dst_w, dst_h) = (dst.width() as i64, dst.height() as i64);
    let x0 = left.max(0);
    let y0 = top.max(0);
    let x1 = left.saturating_add(src.width() as i64).min(dst_w);
    let y1 = top.saturating_add(src.height() as i64).min(dst_h);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    for y in y0..y1 {
        for x in x0..x1 {
            let s = src.get_pixel((x - left) as u32, (y - top) as u32).0;
            let d = dst.get_pixel_mut(x as u32, y as u32);
            d.0 = blend_over(d.0, s);
        }
    }
}

/// Source-over compositing of straight (non-premultiplied) RGBA8.
fn blend_over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    let src_a = src[3] as u32;
    if src_a == 0 {
        return dst;
    }
    if src_a == 255 {
        return src;
    }

    let dst_a = dst[3] as u32;
    let inv = 255 - src_a;
    // Output alpha scaled by 255.
    let out_a = src_a * 255 + dst_a * inv;
    if out_a == 0 {
        return [0; 4];
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let value = src[c] as u32 * src_a * 255 + dst[c] as u32 * dst_a * inv;
        out[c] = ((value + out_a / 2) / out_a) as u8;
    }
    out[3] = ((out_a + 127) / 255) as u8;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];

    fn frames(points: &[(f64, f64, i64)]) -> Vec<Frame> {
        let start = DateTime::from_timestamp(1_400_000_000, 0).unwrap();
        points
            .iter()
            .map(|&(x, y, secs)| Frame::with_gaze(x, y, start + Duration::seconds(secs)))
            .collect()
    }

    #[test]
    fn test_blend_over_basics() {
        let transparent = [0, 0, 0, 0];
        assert_eq!(blend_over(transparent, RED), RED);
        assert_eq!(blend_over(RED, transparent), RED);

        let half_blue = [0, 0, 255, 128];
        assert_eq!(blend_over(transparent, half_blue), half_blue);

        let mixed = blend_over(RED, half_blue);
        assert_eq!(mixed[3], 255);
        assert!(mixed[0] > 100 && mixed[2] > 100);
    }

    #[test]
    fn test_brush_is_centred_on_gaze() {
        let brush = Brush::solid(4, RED);
        let options = HeatmapOptions::new(20, 20);
        let image = render_heatmap(&frames(&[(10.0, 10.0, 0)]), &brush, &options).unwrap();

        assert_eq!(image.get_pixel(8, 8).0, RED);
        assert_eq!(image.get_pixel(11, 11).0, RED);
        assert_eq!(image.get_pixel(7, 7).0[3], 0);
        assert_eq!(image.get_pixel(12, 12).0[3], 0);
    }

    #[test]
    fn test_repeated_stamps_saturate() {
        let brush = Brush::solid(2, [255, 128, 0, 64]);
        let once =
            render_heatmap(&frames(&[(5.0, 5.0, 0)]), &brush, &HeatmapOptions::new(10, 10))
                .unwrap();
        let thrice = render_heatmap(
            &frames(&[(5.0, 5.0, 0), (5.0, 5.0, 0), (5.0, 5.0, 0)]),
            &brush,
            &HeatmapOptions::new(10, 10),
        )
        .unwrap();

        assert_eq!(once.get_pixel(5, 5).0[3], 64);
        assert!(thrice.get_pixel(5, 5).0[3] > once.get_pixel(5, 5).0[3]);
    }

    #[test]
    fn test_brush_clipped_at_edges() {
        let brush = Brush::solid(6, RED);
        let sequence = frames(&[(1.0, 1.0, 0), (99.0, 49.0, 0)]);
        let image = render_heatmap(&sequence, &brush, &HeatmapOptions::new(100, 50)).unwrap();

        assert_eq!(image.get_pixel(0, 0).0, RED);
        assert_eq!(image.get_pixel(99, 49).0, RED);
    }

    #[test]
    fn test_far_off_canvas_gaze_is_clipped() {
        let now = Utc::now();
        let frames = [
            Frame::with_gaze(1e300, 1e300, now),
            Frame::with_gaze(-1e300, 5.0, now),
            Frame::with_gaze(f64::MAX, f64::MIN, now),
        ];
        let image = render_heatmap(&frames, &Brush::solid(4, RED), &HeatmapOptions::new(16, 16))
            .unwrap();
        assert!(image.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_sentinel_frames_draw_nothing() {
        let brush = Brush::solid(4, RED);
        let sequence = frames(&[(0.0, 0.0, 0), (-5.0, -5.0, 1)]);
        let image = render_heatmap(&sequence, &brush, &HeatmapOptions::new(8, 8)).unwrap();
        assert!(image.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_cutoff_limits_frames() {
        let brush = Brush::solid(2, RED);
        let sequence = frames(&[(5.0, 5.0, 0), (15.0, 5.0, 3), (25.0, 5.0, 8)]);

        let unlimited = HeatmapOptions::new(30, 10).with_cutoff_secs(-1);
        let all = render_heatmap(&sequence, &brush, &unlimited).unwrap();
        assert_eq!(all.get_pixel(25, 5).0, RED);

        let five_secs = HeatmapOptions::new(30, 10).with_cutoff_secs(5);
        let first_five = render_heatmap(&sequence, &brush, &five_secs).unwrap();
        assert_eq!(first_five.get_pixel(5, 5).0, RED);
        assert_eq!(first_five.get_pixel(15, 5).0, RED);
        assert_eq!(first_five.get_pixel(25, 5).0[3], 0);

        // Measured from an explicit start rather than the first frame.
        let start = sequence[0].received_at + Duration::seconds(4);
        let shifted = render_heatmap(
            &sequence,
            &brush,
            &HeatmapOptions::new(30, 10).with_cutoff_secs(5).with_start(start),
        )
        .unwrap();
        assert_eq!(shifted.get_pixel(25, 5).0, RED);
    }

    #[test]
    fn test_background_is_drawn_beneath() {
        let brush = Brush::solid(2, RED);
        let background = RgbaImage::from_pixel(6, 6, image::Rgba([0, 0, 255, 255]));
        let options = HeatmapOptions::new(10, 10).with_background(&background);
        let image = render_heatmap(&frames(&[(3.0, 3.0, 0)]), &brush, &options).unwrap();

        assert_eq!(image.get_pixel(3, 3).0, RED);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 255, 255]);
        // Background is not scaled to the canvas.
        assert_eq!(image.get_pixel(8, 8).0[3], 0);
    }

    #[test]
    fn test_render_is_deterministic() {
        let brush = Brush::solid(5, [200, 50, 10, 90]);
        let sequence = frames(&[(4.0, 4.0, 0), (6.0, 5.0, 1), (0.0, 0.0, 2), (12.0, 9.0, 3)]);
        let options = HeatmapOptions::new(16, 16);

        let first = render_heatmap(&sequence, &brush, &options).unwrap();
        let second = render_heatmap(&sequence, &brush, &options).unwrap();
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn test_empty_input_gives_transparent_canvas() {
        let image = render_heatmap(&[], &Brush::solid(3, RED), &HeatmapOptions::new(4, 3)).unwrap();
        assert_eq!(image.dimensions(), (4, 3));
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn test_zero_canvas_is_rejected() {
        let result = render_heatmap(&[], &Brush::solid(3, RED), &HeatmapOptions::new(0, 10));
        assert!(matches!(result, Err(RenderError::InvalidCanvas { .. })));
    }

    #[test]
    fn test_png_encoding_round_trips() {
        let options = HeatmapOptions::new(5, 5);
        let image = render_heatmap(&frames(&[(2.0, 2.0, 0)]), &Brush::solid(2, RED), &options)
            .unwrap();
        let bytes = encode_png(&image).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");

        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.as_raw(), image.as_raw());
    }

    #[test]
    fn test_missing_brush_file() {
        let result = Brush::load("/nonexistent/heatmap_brush.png");
        assert!(matches!(result, Err(RenderError::Load { .. })));
    }
}
