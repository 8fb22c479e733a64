//! Software 2D context behind the `canvas` import namespace
//!
//! Plugins use this for page-image descrambling: draw regions of a source
//! image into a context in a different order, occasionally with paths or
//! overlay text, then hand back the composed image. Everything renders
//! into an RGBA buffer; `get_image_data` re-encodes as PNG.

use crate::abi::CanvasError;
use ab_glyph::{Font as _, FontArc, ScaleFont as _};
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Path segments as decoded from plugin memory. Variant order is fixed
/// by the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PathOp {
    MoveTo(Point),
    LineTo(Point),
    QuadTo(Point, Point),
    CubicTo(Point, Point, Point),
    /// center, radius, start angle (radians), sweep (radians)
    Arc(Point, f32, f32, f32),
    Close,
}

/// Stroke description as decoded from plugin memory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
    pub width: f32,
}

/// RGBA color with components in 0..=1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Color {
    fn to_rgba(self) -> Rgba<u8> {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgba([
            channel(self.red),
            channel(self.green),
            channel(self.blue),
            channel(self.alpha),
        ])
    }
}

/// A decoded raster image resource
#[derive(Debug, Clone)]
pub struct CanvasImage {
    pub image: RgbaImage,
}

impl CanvasImage {
    /// Decode raw bytes (PNG, JPEG, WebP, GIF).
    pub fn decode(bytes: &[u8]) -> Result<Self, CanvasError> {
        let image = image::load_from_memory(bytes).map_err(|err| {
            tracing::debug!(%err, len = bytes.len(), "image decode failed");
            CanvasError::InvalidImage
        })?;
        Ok(Self {
            image: image.to_rgba8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// A fresh PNG encoding of the image contents.
    pub fn png_bytes(&self) -> Result<Vec<u8>, CanvasError> {
        let mut out = std::io::Cursor::new(Vec::new());
        self.image
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|_| CanvasError::InvalidResult)?;
        Ok(out.into_inner())
    }
}

/// A font resource for `draw_text`
#[derive(Debug, Clone)]
pub struct CanvasFont {
    font: FontArc,
}

impl CanvasFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CanvasError> {
        let font = FontArc::try_from_vec(bytes).map_err(|_| CanvasError::FontLoadFailed)?;
        Ok(Self { font })
    }

    /// Look up an installed font by family name. Headless hosts commonly
    /// have none, in which case the plugin sees `FontLoadFailed`.
    pub fn system(name: &str) -> Result<Self, CanvasError> {
        const FONT_DIRS: &[&str] = &[
            "/usr/share/fonts",
            "/usr/local/share/fonts",
            "/System/Library/Fonts",
            "C:\\Windows\\Fonts",
        ];
        let needle = name.to_ascii_lowercase().replace(' ', "");
        for dir in FONT_DIRS {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_ascii_lowercase()
                    .replace(' ', "");
                let is_font = matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("ttf") | Some("otf")
                );
                if is_font && (stem == needle || stem.starts_with(&needle)) {
                    if let Ok(bytes) = std::fs::read(&path) {
                        if let Ok(font) = Self::from_bytes(bytes) {
                            return Ok(font);
                        }
                    }
                }
            }
        }
        Err(CanvasError::FontLoadFailed)
    }
}

/// 2D affine transform `[a, b, c, d, tx, ty]`
type Transform = [f32; 6];

const IDENTITY: Transform = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

fn apply(t: &Transform, p: (f32, f32)) -> (f32, f32) {
    (
        t[0] * p.0 + t[2] * p.1 + t[4],
        t[1] * p.0 + t[3] * p.1 + t[5],
    )
}

/// A software drawing context
#[derive(Debug)]
pub struct CanvasContext {
    image: RgbaImage,
    transform: Transform,
}

impl CanvasContext {
    pub fn new(width: f32, height: f32) -> Result<Self, CanvasError> {
        if !(width.is_finite() && height.is_finite()) || width < 1.0 || height < 1.0 {
            return Err(CanvasError::InvalidBounds);
        }
        const MAX_DIMENSION: f32 = 16_384.0;
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(CanvasError::InvalidBounds);
        }
        Ok(Self {
            image: RgbaImage::new(width as u32, height as u32),
            transform: IDENTITY,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Draw the whole source image into a destination rect.
    pub fn draw_image(&mut self, source: &CanvasImage, dest: Rect) -> Result<(), CanvasError> {
        let full = Rect {
            x: 0.0,
            y: 0.0,
            width: source.width() as f32,
            height: source.height() as f32,
        };
        self.copy_image(source, full, dest)
    }

    /// Draw a region of the source image into a destination rect.
    pub fn copy_image(
        &mut self,
        source: &CanvasImage,
        src: Rect,
        dest: Rect,
    ) -> Result<(), CanvasError> {
        if src.width <= 0.0
            || src.height <= 0.0
            || src.x < 0.0
            || src.y < 0.0
            || src.x + src.width > source.width() as f32
            || src.y + src.height > source.height() as f32
        {
            return Err(CanvasError::InvalidSrcRect);
        }
        if dest.width <= 0.0 || dest.height <= 0.0 {
            return Err(CanvasError::InvalidBounds);
        }

        let cropped = image::imageops::crop_imm(
            &source.image,
            src.x as u32,
            src.y as u32,
            src.width as u32,
            src.height as u32,
        )
        .to_image();
        let (origin_x, origin_y) = apply(&self.transform, (dest.x, dest.y));
        let scaled = if cropped.width() == dest.width as u32
            && cropped.height() == dest.height as u32
        {
            cropped
        } else {
            image::imageops::resize(
                &cropped,
                (dest.width as u32).max(1),
                (dest.height as u32).max(1),
                FilterType::Triangle,
            )
        };
        self.blit(&scaled, origin_x.round() as i64, origin_y.round() as i64);
        Ok(())
    }

    fn blit(&mut self, source: &RgbaImage, origin_x: i64, origin_y: i64) {
        for (x, y, pixel) in source.enumerate_pixels() {
            let dest_x = origin_x + x as i64;
            let dest_y = origin_y + y as i64;
            if dest_x < 0
                || dest_y < 0
                || dest_x >= self.image.width() as i64
                || dest_y >= self.image.height() as i64
            {
                continue;
            }
            blend_pixel(&mut self.image, dest_x as u32, dest_y as u32, *pixel);
        }
    }

    /// Even-odd fill of a path.
    pub fn fill(&mut self, ops: &[PathOp], color: Color) -> Result<(), CanvasError> {
        let subpaths = flatten_path(ops).ok_or(CanvasError::InvalidPath)?;
        self.fill_subpaths(&subpaths, color.to_rgba());
        Ok(())
    }

    /// Stroke a path by filling a quad per flattened segment.
    pub fn stroke(&mut self, ops: &[PathOp], style: &StrokeStyle) -> Result<(), CanvasError> {
        if !style.width.is_finite() || style.width <= 0.0 {
            return Err(CanvasError::InvalidStyle);
        }
        let color = Color {
            red: style.red,
            green: style.green,
            blue: style.blue,
            alpha: style.alpha,
        }
        .to_rgba();
        let half = style.width / 2.0;
        let subpaths = flatten_path(ops).ok_or(CanvasError::InvalidPath)?;
        for subpath in &subpaths {
            for segment in subpath.windows(2) {
                let (x0, y0) = segment[0];
                let (x1, y1) = segment[1];
                let (dx, dy) = (x1 - x0, y1 - y0);
                let length = (dx * dx + dy * dy).sqrt();
                if length == 0.0 {
                    continue;
                }
                let (nx, ny) = (-dy / length * half, dx / length * half);
                let quad = vec![
                    (x0 + nx, y0 + ny),
                    (x1 + nx, y1 + ny),
                    (x1 - nx, y1 - ny),
                    (x0 - nx, y0 - ny),
                ];
                self.fill_subpaths(&[quad], color);
            }
        }
        Ok(())
    }

    fn fill_subpaths(&mut self, subpaths: &[Vec<(f32, f32)>], color: Rgba<u8>) {
        let mut edges: Vec<((f32, f32), (f32, f32))> = Vec::new();
        for subpath in subpaths {
            if subpath.len() < 2 {
                continue;
            }
            let points: Vec<(f32, f32)> = subpath
                .iter()
                .map(|&p| apply(&self.transform, p))
                .collect();
            for pair in points.windows(2) {
                edges.push((pair[0], pair[1]));
            }
            // Implicit closing edge.
            if points.first() != points.last() {
                edges.push((*points.last().unwrap(), points[0]));
            }
        }
        if edges.is_empty() {
            return;
        }

        let min_y = edges
            .iter()
            .map(|e| e.0 .1.min(e.1 .1))
            .fold(f32::INFINITY, f32::min)
            .floor()
            .max(0.0) as u32;
        let max_y = edges
            .iter()
            .map(|e| e.0 .1.max(e.1 .1))
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min(self.image.height() as f32) as u32;

        for y in min_y..max_y {
            let scan = y as f32 + 0.5;
            let mut crossings: Vec<f32> = edges
                .iter()
                .filter_map(|&((x0, y0), (x1, y1))| {
                    let (top, bottom) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
                    if scan < top || scan >= bottom || top == bottom {
                        return None;
                    }
                    Some(x0 + (scan - y0) / (y1 - y0) * (x1 - x0))
                })
                .collect();
            crossings.sort_by(|a, b| a.total_cmp(b));
            for span in crossings.chunks_exact(2) {
                let start = span[0].round().max(0.0) as u32;
                let end = (span[1].round() as i64).min(self.image.width() as i64);
                for x in start as i64..end {
                    blend_pixel(&mut self.image, x as u32, y, color);
                }
            }
        }
    }

    /// Draw a line of text with its baseline at `(x, y)`.
    pub fn draw_text(
        &mut self,
        text: &str,
        font: &CanvasFont,
        size: f32,
        x: f32,
        y: f32,
        color: Color,
    ) -> Result<(), CanvasError> {
        if !size.is_finite() || size <= 0.0 {
            return Err(CanvasError::InvalidBounds);
        }
        let rgba = color.to_rgba();
        let scaled = font.font.as_scaled(ab_glyph::PxScale::from(size));
        let (origin_x, origin_y) = apply(&self.transform, (x, y));
        let mut caret = origin_x;
        for c in text.chars() {
            let glyph_id = scaled.glyph_id(c);
            let glyph = glyph_id.with_scale_and_position(
                ab_glyph::PxScale::from(size),
                ab_glyph::point(caret, origin_y),
            );
            caret += scaled.h_advance(glyph_id);
            let Some(outlined) = scaled.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            let (width, height) = (self.image.width(), self.image.height());
            let image = &mut self.image;
            outlined.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i64 + gx as i64;
                let py = bounds.min.y as i64 + gy as i64;
                if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                    return;
                }
                let alpha = (rgba.0[3] as f32 * coverage) as u8;
                blend_pixel(
                    image,
                    px as u32,
                    py as u32,
                    Rgba([rgba.0[0], rgba.0[1], rgba.0[2], alpha]),
                );
            });
        }
        Ok(())
    }

    /// Snapshot the context contents as an image resource.
    pub fn get_image(&self) -> CanvasImage {
        CanvasImage {
            image: self.image.clone(),
        }
    }
}

fn blend_pixel(image: &mut RgbaImage, x: u32, y: u32, src: Rgba<u8>) {
    let alpha = src.0[3] as f32 / 255.0;
    if alpha <= 0.0 {
        return;
    }
    let dst = image.get_pixel_mut(x, y);
    for i in 0..3 {
        dst.0[i] = (src.0[i] as f32 * alpha + dst.0[i] as f32 * (1.0 - alpha)).round() as u8;
    }
    dst.0[3] = ((alpha + dst.0[3] as f32 / 255.0 * (1.0 - alpha)) * 255.0).round() as u8;
}

/// Flatten path ops to polyline subpaths. Returns `None` when the path
/// references a current point it never established.
fn flatten_path(ops: &[PathOp]) -> Option<Vec<Vec<(f32, f32)>>> {
    const CURVE_STEPS: u32 = 16;
    let mut subpaths: Vec<Vec<(f32, f32)>> = Vec::new();
    let mut current: Vec<(f32, f32)> = Vec::new();

    for op in ops {
        match *op {
            PathOp::MoveTo(p) => {
                if current.len() > 1 {
                    subpaths.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
                current.push((p.x, p.y));
            }
            PathOp::LineTo(p) => {
                if current.is_empty() {
                    return None;
                }
                current.push((p.x, p.y));
            }
            PathOp::QuadTo(to, control) => {
                let &(x0, y0) = current.last()?;
                for step in 1..=CURVE_STEPS {
                    let t = step as f32 / CURVE_STEPS as f32;
                    let u = 1.0 - t;
                    let x = u * u * x0 + 2.0 * u * t * control.x + t * t * to.x;
                    let y = u * u * y0 + 2.0 * u * t * control.y + t * t * to.y;
                    current.push((x, y));
                }
            }
            PathOp::CubicTo(to, c1, c2) => {
                let &(x0, y0) = current.last()?;
                for step in 1..=CURVE_STEPS {
                    let t = step as f32 / CURVE_STEPS as f32;
                    let u = 1.0 - t;
                    let x = u * u * u * x0
                        + 3.0 * u * u * t * c1.x
                        + 3.0 * u * t * t * c2.x
                        + t * t * t * to.x;
                    let y = u * u * u * y0
                        + 3.0 * u * u * t * c1.y
                        + 3.0 * u * t * t * c2.y
                        + t * t * t * to.y;
                    current.push((x, y));
                }
            }
            PathOp::Arc(center, radius, start, sweep) => {
                if !radius.is_finite() || radius < 0.0 {
                    return None;
                }
                let steps = (CURVE_STEPS as f32 * (sweep.abs() / std::f32::consts::PI).max(0.25))
                    .ceil() as u32;
                for step in 0..=steps {
                    let t = step as f32 / steps as f32;
                    let angle = start + sweep * t;
                    current.push((
                        center.x + radius * angle.cos(),
                        center.y + radius * angle.sin(),
                    ));
                }
            }
            PathOp::Close => {
                if let Some(&first) = current.first() {
                    current.push(first);
                    subpaths.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if current.len() > 1 {
        subpaths.push(current);
    }
    Some(subpaths)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color {
        red: 1.0,
        green: 0.0,
        blue: 0.0,
        alpha: 1.0,
    };

    fn rect_path(x: f32, y: f32, w: f32, h: f32) -> Vec<PathOp> {
        vec![
            PathOp::MoveTo(Point { x, y }),
            PathOp::LineTo(Point { x: x + w, y }),
            PathOp::LineTo(Point { x: x + w, y: y + h }),
            PathOp::LineTo(Point { x, y: y + h }),
            PathOp::Close,
        ]
    }

    #[test]
    fn test_fill_rect() {
        let mut context = CanvasContext::new(16.0, 16.0).unwrap();
        context.fill(&rect_path(4.0, 4.0, 8.0, 8.0), RED).unwrap();
        let snapshot = context.get_image();
        assert_eq!(snapshot.image.get_pixel(8, 8).0, [255, 0, 0, 255]);
        assert_eq!(snapshot.image.get_pixel(1, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_transform_translates_fill() {
        let mut context = CanvasContext::new(16.0, 16.0).unwrap();
        context.set_transform([1.0, 0.0, 0.0, 1.0, 8.0, 0.0]);
        context.fill(&rect_path(0.0, 0.0, 4.0, 4.0), RED).unwrap();
        let snapshot = context.get_image();
        assert_eq!(snapshot.image.get_pixel(9, 1).0, [255, 0, 0, 255]);
        assert_eq!(snapshot.image.get_pixel(1, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_path_without_current_point() {
        let mut context = CanvasContext::new(8.0, 8.0).unwrap();
        let bad = vec![PathOp::LineTo(Point { x: 4.0, y: 4.0 })];
        assert_eq!(context.fill(&bad, RED), Err(CanvasError::InvalidPath));
    }

    #[test]
    fn test_copy_image_validates_src_rect() {
        let mut context = CanvasContext::new(8.0, 8.0).unwrap();
        let source = CanvasImage {
            image: RgbaImage::from_pixel(4, 4, Rgba([0, 255, 0, 255])),
        };
        let ok_dest = Rect {
            x: 0.0,
            y: 0.0,
            width: 4.0,
            height: 4.0,
        };
        let bad_src = Rect {
            x: 2.0,
            y: 2.0,
            width: 4.0,
            height: 4.0,
        };
        assert_eq!(
            context.copy_image(&source, bad_src, ok_dest),
            Err(CanvasError::InvalidSrcRect)
        );
        let ok_src = Rect {
            x: 0.0,
            y: 0.0,
            width: 4.0,
            height: 4.0,
        };
        context.copy_image(&source, ok_src, ok_dest).unwrap();
        assert_eq!(context.get_image().image.get_pixel(1, 1).0, [0, 255, 0, 255]);
    }

    #[test]
    fn test_png_roundtrip() {
        let source = CanvasImage {
            image: RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])),
        };
        let png = source.png_bytes().unwrap();
        let decoded = CanvasImage::decode(&png).unwrap();
        assert_eq!(decoded.width(), 3);
        assert_eq!(decoded.height(), 2);
        assert_eq!(decoded.image.get_pixel(2, 1).0, [1, 2, 3, 255]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert_eq!(
            CanvasImage::decode(&[1, 2, 3]).unwrap_err(),
            CanvasError::InvalidImage
        );
    }

    #[test]
    fn test_stroke_line() {
        let mut context = CanvasContext::new(16.0, 16.0).unwrap();
        let path = vec![
            PathOp::MoveTo(Point { x: 2.0, y: 8.0 }),
            PathOp::LineTo(Point { x: 14.0, y: 8.0 }),
        ];
        let style = StrokeStyle {
            red: 1.0,
            green: 0.0,
            blue: 0.0,
            alpha: 1.0,
            width: 4.0,
        };
        context.stroke(&path, &style).unwrap();
        assert_eq!(context.get_image().image.get_pixel(8, 8).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_path_roundtrip_encoding() {
        let ops = vec![
            PathOp::MoveTo(Point { x: 0.0, y: 0.0 }),
            PathOp::QuadTo(Point { x: 4.0, y: 0.0 }, Point { x: 2.0, y: 2.0 }),
            PathOp::Close,
        ];
        let bytes = postcard::to_allocvec(&ops).unwrap();
        assert_eq!(bytes[1], 0);
        let back: Vec<PathOp> = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, ops);
    }
}
