//! SVG rendering of a room and its incrementally maintained cache.
//!
//! The cache is built lazily on the first image read and then extended by
//! every append, never rebuilt:
//!
//! ```text
//! strokes:   [ s1 | s2 | s3 | s4 | s5 ]
//!                               ▲
//!                 rendered = 3 ─┘   gap closed on append / read
//!
//! document:  <?xml…><svg …> <polyline s1/> <polyline s2/> <polyline s3/> </svg>
//!                                                         ▲ truncate footer,
//!                                                           append s4 s5, re-close
//! compressed: lz4(document)   recomputed after each extension
//! ```
//!
//! Markup generation for an append is proportional to the new stroke's
//! point count; recompression is proportional to the whole document.
//! Readers receive `Arc`s, so a read is O(1) and an image already handed
//! out is never mutated underneath its holder.

use std::io::{self, Write};
use std::sync::Arc;

use crate::error::{Result, RoomError};
use crate::model::{RoomInfo, Stroke, StrokeRecord};

/// Closing tag of every rendered document.
pub const SVG_FOOTER: &[u8] = b"</svg>";

/// Write the fixed document header sized to the canvas.
pub fn write_header(buf: &mut impl Write, canvas_width: u32, canvas_height: u32) -> io::Result<()> {
    let (w, h) = (canvas_width, canvas_height);
    write!(
        buf,
        r#"<?xml version="1.0" standalone="no"?><!DOCTYPE svg PUBLIC "-//W3C//DTD SVG 1.1//EN" "http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd"><svg xmlns="http://www.w3.org/2000/svg" version="1.1" baseProfile="full" width="{w}" height="{h}" style="width:{w}px;height:{h}px;background-color:white;" viewBox="0 0 {w} {h}">"#
    )
}

/// Write one stroke as a `<polyline>` element, points in stored order.
pub fn write_stroke(buf: &mut impl Write, stroke: &StrokeRecord) -> io::Result<()> {
    write!(
        buf,
        r#"<polyline id="{}" stroke="rgba({},{},{},"#,
        stroke.id, stroke.red, stroke.green, stroke.blue
    )?;
    write_shortest(buf, stroke.alpha)?;
    write!(
        buf,
        r#")" stroke-width="{}" stroke-linecap="round" stroke-linejoin="round" fill="none" points=""#,
        stroke.width
    )?;
    for (i, point) in stroke.points.iter().enumerate() {
        if i > 0 {
            buf.write_all(b" ")?;
        }
        write!(buf, "{:.4},{:.4}", point.x, point.y)?;
    }
    buf.write_all(br#""></polyline>"#)
}

/// Shortest round-trip form of `value`, in scientific notation with a
/// signed two-digit exponent outside `[1e-4, 1e6)`
/// (`0.5`, `1`, `1e-05`, `2.5e-07`).
fn write_shortest(buf: &mut impl Write, value: f64) -> io::Result<()> {
    if value == 0.0 || !value.is_finite() {
        return write!(buf, "{value}");
    }
    let scientific = format!("{value:e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return write!(buf, "{value}");
    };
    let exponent: i32 = exponent
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if (-4..6).contains(&exponent) {
        write!(buf, "{value}")
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        write!(buf, "{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    }
}

/// Render a complete document from scratch.
pub fn render_document<'a>(
    info: &RoomInfo,
    strokes: impl IntoIterator<Item = &'a StrokeRecord>,
) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(1024);
    write_header(&mut buf, info.canvas_width, info.canvas_height).map_err(render_error)?;
    for stroke in strokes {
        write_stroke(&mut buf, stroke).map_err(render_error)?;
    }
    buf.extend_from_slice(SVG_FOOTER);
    Ok(buf)
}

fn render_error(e: io::Error) -> RoomError {
    RoomError::Internal(format!("render image: {e}"))
}

/// Compress a rendered document (LZ4 block, size-prefixed).
pub fn compress(document: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(document)
}

/// Inverse of [`compress`].
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| RoomError::Internal(format!("decompress image: {e}")))
}

/// A rendered image as handed to readers.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    /// Complete SVG document.
    pub document: Arc<Vec<u8>>,
    /// LZ4 encoding of `document`.
    pub compressed: Arc<Vec<u8>>,
    /// Number of strokes folded into the document.
    pub stroke_count: usize,
}

#[derive(Debug)]
struct Rendered {
    document: Arc<Vec<u8>>,
    compressed: Arc<Vec<u8>>,
    /// Render cursor: the first `rendered` strokes are in `document`.
    rendered: usize,
}

impl Rendered {
    fn build(info: &RoomInfo, strokes: &[Arc<Stroke>]) -> Result<Self> {
        let document = render_document(info, strokes.iter().map(|s| s.record()))?;
        let compressed = compress(&document);
        Ok(Self {
            document: Arc::new(document),
            compressed: Arc::new(compressed),
            rendered: strokes.len(),
        })
    }

    /// Fold `strokes[rendered..]` into the document. Returns whether
    /// anything was added; on error the document is left as it was.
    fn fold(&mut self, strokes: &[Arc<Stroke>]) -> Result<bool> {
        if self.rendered >= strokes.len() {
            return Ok(false);
        }

        let mut tail = Vec::new();
        for stroke in &strokes[self.rendered..] {
            write_stroke(&mut tail, stroke).map_err(render_error)?;
        }
        tail.extend_from_slice(SVG_FOOTER);

        // Clones only if a reader still holds the previous document.
        let document = Arc::make_mut(&mut self.document);
        debug_assert!(document.ends_with(SVG_FOOTER));
        document.truncate(document.len().saturating_sub(SVG_FOOTER.len()));
        document.extend_from_slice(&tail);

        self.compressed = Arc::new(compress(document));
        self.rendered = strokes.len();
        Ok(true)
    }

    fn image(&self) -> RenderedImage {
        RenderedImage {
            document: self.document.clone(),
            compressed: self.compressed.clone(),
            stroke_count: self.rendered,
        }
    }
}

/// Lazily built, append-extended rendering of one room.
#[derive(Debug, Default)]
pub struct RenderCache {
    built: Option<Rendered>,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Number of strokes already folded in (0 while unbuilt).
    pub fn rendered(&self) -> usize {
        self.built.as_ref().map_or(0, |r| r.rendered)
    }

    /// Current image, if built. Does not close any gap.
    pub fn image(&self) -> Option<RenderedImage> {
        self.built.as_ref().map(Rendered::image)
    }

    /// Build on first use, close the gap to `strokes`, return the image.
    pub fn materialize(&mut self, info: &RoomInfo, strokes: &[Arc<Stroke>]) -> Result<RenderedImage> {
        match &mut self.built {
            Some(rendered) => {
                rendered.fold(strokes)?;
                Ok(rendered.image())
            }
            None => {
                let rendered = Rendered::build(info, strokes)?;
                log::debug!(
                    "Rendered room {} ({} strokes, {} bytes)",
                    info.id,
                    rendered.rendered,
                    rendered.document.len()
                );
                let image = rendered.image();
                self.built = Some(rendered);
                Ok(image)
            }
        }
    }

    /// Fold newly appended strokes into a built cache; no-op while unbuilt.
    pub fn extend(&mut self, strokes: &[Arc<Stroke>]) -> Result<bool> {
        match &mut self.built {
            Some(rendered) => rendered.fold(strokes),
            None => Ok(false),
        }
    }

    /// Re-render a built cache from scratch. Only needed when a stroke is
    /// inserted inside the already rendered prefix.
    pub fn rebuild(&mut self, info: &RoomInfo, strokes: &[Arc<Stroke>]) -> Result<()> {
        if self.built.is_some() {
            self.built = Some(Rendered::build(info, strokes)?);
        }
        Ok(())
    }

    /// Drop the built rendering; the next read builds it again.
    pub fn clear(&mut self) {
        self.built = None;
    }
}
