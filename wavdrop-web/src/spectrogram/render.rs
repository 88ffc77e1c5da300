//! Spectrogram figure rasterization
//!
//! A [`Figure`] owns an RGB pixel buffer that plotters draws into through
//! `BitMapBackend::with_buffer`. The buffer is encoded with the `png` crate so
//! the title can also be stored as a `Title` text chunk. Visible text (title,
//! axis names, color-bar ticks) is drawn with an embedded DejaVu Sans face
//! registered with plotters' `ab_glyph` backend, so no system fonts are needed.

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::Array2;
use once_cell::sync::OnceCell;
use plotters::prelude::*;
use plotters::style::register_font;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

pub const FIGURE_WIDTH: u32 = 800;
pub const FIGURE_HEIGHT: u32 = 300;

// Plot layout in pixels
const MARGIN_LEFT: i32 = 56;
const MARGIN_TOP: i32 = 32;
const MARGIN_BOTTOM: i32 = 36;
const COLORBAR_GAP: i32 = 16;
const COLORBAR_WIDTH: i32 = 18;
const COLORBAR_LABELS: i32 = 60;

const FONT_FAMILY: &str = "sans-serif";
static FONT_BYTES: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");
static FONT_REGISTERED: OnceCell<bool> = OnceCell::new();

static LIVE_FIGURES: AtomicUsize = AtomicUsize::new(0);

/// Register the embedded face under `sans-serif` once per process
fn ensure_font() -> PipelineResult<()> {
    let registered = *FONT_REGISTERED
        .get_or_init(|| register_font(FONT_FAMILY, FontStyle::Normal, FONT_BYTES).is_ok());
    if registered {
        Ok(())
    } else {
        Err(PipelineError::Render(
            "Embedded font could not be parsed".to_string(),
        ))
    }
}

/// Number of figures currently allocated
///
/// Zero whenever no render is in progress.
pub fn live_figures() -> usize {
    LIVE_FIGURES.load(Ordering::SeqCst)
}

/// Scoped drawing surface, released when dropped
pub struct Figure {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Figure {
    pub fn new(width: u32, height: u32) -> Self {
        LIVE_FIGURES.fetch_add(1, Ordering::SeqCst);
        Self {
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize * 3],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Draw a dB spectrogram (rows = mel bands, columns = frames)
    ///
    /// Low bands are drawn at the bottom. Colors span the data range, so the
    /// loudest cell is the brightest.
    pub fn draw_spectrogram(&mut self, db: &Array2<f32>, title: &str) -> PipelineResult<()> {
        let (n_mels, n_frames) = db.dim();
        if n_mels == 0 || n_frames == 0 {
            return Err(PipelineError::Render(
                "Spectrogram has no data to draw".to_string(),
            ));
        }

        let (lo, hi) = db
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let span = hi - lo;
        let normalize = |v: f32| if span > 0.0 { (v - lo) / span } else { 0.0 };

        ensure_font()?;

        let (width, height) = (self.width as i32, self.height as i32);
        let plot_w = width - MARGIN_LEFT - COLORBAR_GAP - COLORBAR_WIDTH - COLORBAR_LABELS;
        let plot_h = height - MARGIN_TOP - MARGIN_BOTTOM;
        if plot_w <= 0 || plot_h <= 0 {
            return Err(PipelineError::Render(format!(
                "Figure {}x{} too small",
                self.width, self.height
            )));
        }

        let root = BitMapBackend::with_buffer(&mut self.pixels, (self.width, self.height))
            .into_drawing_area();
        root.fill(&WHITE).map_err(render_err)?;

        let plot = root
            .clone()
            .shrink((MARGIN_LEFT, MARGIN_TOP), (plot_w, plot_h));
        for px in 0..plot_w {
            let frame = (px as usize * n_frames) / plot_w as usize;
            for py in 0..plot_h {
                let band = ((plot_h - 1 - py) as usize * n_mels) / plot_h as usize;
                let color = magma(normalize(db[[band, frame]]));
                plot.draw_pixel((px, py), &color).map_err(render_err)?;
            }
        }

        let bar_x = MARGIN_LEFT + plot_w + COLORBAR_GAP;
        let bar = root
            .clone()
            .shrink((bar_x, MARGIN_TOP), (COLORBAR_WIDTH, plot_h));
        for py in 0..plot_h {
            let t = (plot_h - 1 - py) as f32 / (plot_h - 1).max(1) as f32;
            let color = magma(t);
            for px in 0..COLORBAR_WIDTH {
                bar.draw_pixel((px, py), &color).map_err(render_err)?;
            }
        }

        root.draw(&Rectangle::new(
            [
                (MARGIN_LEFT - 1, MARGIN_TOP - 1),
                (MARGIN_LEFT + plot_w, MARGIN_TOP + plot_h),
            ],
            BLACK.stroke_width(1),
        ))
        .map_err(render_err)?;
        root.draw(&Rectangle::new(
            [
                (bar_x - 1, MARGIN_TOP - 1),
                (bar_x + COLORBAR_WIDTH, MARGIN_TOP + plot_h),
            ],
            BLACK.stroke_width(1),
        ))
        .map_err(render_err)?;

        draw_labels(&root, title, (lo, hi), (plot_w, plot_h), bar_x)?;

        root.present().map_err(render_err)?;
        Ok(())
    }

    /// Encode the pixel buffer as an RGB PNG with a `Title` text chunk
    pub fn encode_png(&self, title: &str) -> PipelineResult<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            encoder
                .add_text_chunk("Title".to_string(), title.to_string())
                .map_err(png_err)?;
            encoder
                .add_text_chunk("Software".to_string(), "wavdrop".to_string())
                .map_err(png_err)?;

            let mut writer = encoder.write_header().map_err(png_err)?;
            writer.write_image_data(&self.pixels).map_err(png_err)?;
            writer.finish().map_err(png_err)?;
        }
        Ok(out)
    }
}

impl Drop for Figure {
    fn drop(&mut self) {
        LIVE_FIGURES.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Render a dB spectrogram to PNG bytes at the standard figure size
pub fn render_png(db: &Array2<f32>, title: &str) -> PipelineResult<Vec<u8>> {
    let mut figure = Figure::new(FIGURE_WIDTH, FIGURE_HEIGHT);
    figure.draw_spectrogram(db, title)?;
    let bytes = figure.encode_png(title)?;

    debug!(
        title,
        frames = db.ncols(),
        bands = db.nrows(),
        png_bytes = bytes.len(),
        "Spectrogram rendered"
    );
    Ok(bytes)
}

fn draw_labels<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    title: &str,
    (lo, hi): (f32, f32),
    (plot_w, plot_h): (i32, i32),
    bar_x: i32,
) -> PipelineResult<()> {
    let title_style = TextStyle::from((FONT_FAMILY, 16).into_font()).color(&BLACK);
    let label_style = TextStyle::from((FONT_FAMILY, 12).into_font()).color(&BLACK);

    root.draw_text(title, &title_style, (MARGIN_LEFT, 8))
        .map_err(render_err)?;
    root.draw_text(
        "Time",
        &label_style,
        (MARGIN_LEFT + plot_w / 2 - 14, MARGIN_TOP + plot_h + 10),
    )
    .map_err(render_err)?;
    root.draw_text("Mel", &label_style, (12, MARGIN_TOP + plot_h / 2))
        .map_err(render_err)?;

    // One tick per 10 dB inside the data range
    let span = hi - lo;
    let mut level = (hi / 10.0).floor() * 10.0;
    while level >= lo {
        let t = if span > 0.0 { (level - lo) / span } else { 1.0 };
        let y = MARGIN_TOP + ((1.0 - t) * (plot_h - 1) as f32) as i32 - 6;
        root.draw_text(
            &format_db_tick(level),
            &label_style,
            (bar_x + COLORBAR_WIDTH + 6, y),
        )
        .map_err(render_err)?;
        if span <= 0.0 {
            break;
        }
        level -= 10.0;
    }
    Ok(())
}

/// Color-bar tick text, e.g. `+0 dB`, `-40 dB`
pub fn format_db_tick(level: f32) -> String {
    let rounded = level.round();
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:+.0} dB", rounded)
}

/// Magma-like color scale, `t` in [0, 1]
pub fn magma(t: f32) -> RGBColor {
    const STOPS: [(u8, u8, u8); 9] = [
        (0, 0, 4),
        (28, 16, 68),
        (79, 18, 123),
        (129, 37, 129),
        (181, 54, 122),
        (229, 80, 100),
        (251, 135, 97),
        (254, 194, 135),
        (252, 253, 191),
    ];

    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let scaled = t * (STOPS.len() - 1) as f32;
    let i = (scaled.floor() as usize).min(STOPS.len() - 2);
    let frac = scaled - i as f32;

    let (a, b) = (STOPS[i], STOPS[i + 1]);
    let lerp = |x: u8, y: u8| (x as f32 + (y as f32 - x as f32) * frac).round() as u8;
    RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

fn render_err(err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Render(err.to_string())
}

fn png_err(err: png::EncodingError) -> PipelineError {
    PipelineError::Render(format!("PNG encode failed: {}", err))
}
