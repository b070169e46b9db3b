//! Frame grids: pack consecutive frames into one image for vision models.
//!
//! Sending every frame separately multiplies image-token cost. A 3×3 grid
//! carries nine frames for roughly the price of one image. Tiles are laid
//! out in timestamp order, left-to-right then top-to-bottom; the last grid
//! keeps only the rows it needs.
//!
//! Decoding and resizing are CPU-bound, so composition runs in
//! `spawn_blocking`.

use super::sampler::Frame;
use crate::error::SamplerError;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use tracing::debug;

/// Widest tile in a grid, in pixels. Keeps a 6×6 grid under ~3k px wide.
const MAX_TILE_WIDTH: u32 = 480;

/// A composite of up to `grid_size²` consecutive frames.
#[derive(Debug, Clone)]
pub struct FrameGrid {
    /// Timestamp of the first tile.
    pub start: f64,
    /// Timestamp of the last tile.
    pub end: f64,
    /// [`Frame::index`] of each tile, in layout order.
    pub frame_indices: Vec<usize>,
    pub image: DynamicImage,
}

/// Compose grids from frames already sorted by timestamp.
pub async fn compose_grids(frames: Vec<Frame>, grid_size: u32) -> Result<Vec<FrameGrid>, SamplerError> {
    if grid_size == 0 {
        return Err(SamplerError::InvalidParameter(
            "grid size must be >= 1".to_string(),
        ));
    }
    tokio::task::spawn_blocking(move || compose_blocking(&frames, grid_size))
        .await
        .map_err(|e| SamplerError::Image(format!("grid task panicked: {e}")))?
}

fn compose_blocking(frames: &[Frame], grid_size: u32) -> Result<Vec<FrameGrid>, SamplerError> {
    let per_grid = (grid_size * grid_size) as usize;
    let mut grids = Vec::with_capacity(frames.len().div_ceil(per_grid));

    for chunk in frames.chunks(per_grid) {
        let images = chunk
            .iter()
            .map(|f| {
                image::open(&f.path)
                    .map_err(|e| SamplerError::Image(format!("{}: {e}", f.path.display())))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (tile_w, tile_h) = tile_size(&images[0]);
        let cols = grid_size;
        let rows = (chunk.len() as u32).div_ceil(cols);
        let mut canvas = RgbImage::from_pixel(tile_w * cols, tile_h * rows, Rgb([0, 0, 0]));

        for (i, img) in images.iter().enumerate() {
            let tile = img.resize_exact(tile_w, tile_h, FilterType::Triangle).to_rgb8();
            let col = i as u32 % cols;
            let row = i as u32 / cols;
            imageops::overlay(&mut canvas, &tile, (col * tile_w) as i64, (row * tile_h) as i64);
        }

        // chunks() never yields an empty slice
        let first = &chunk[0];
        let last = &chunk[chunk.len() - 1];
        debug!(
            "Grid {}: {} frames, {}x{} px",
            grids.len(),
            chunk.len(),
            canvas.width(),
            canvas.height()
        );
        grids.push(FrameGrid {
            start: first.timestamp,
            end: last.timestamp,
            frame_indices: chunk.iter().map(|f| f.index).collect(),
            image: DynamicImage::ImageRgb8(canvas),
        });
    }

    Ok(grids)
}

fn tile_size(first: &DynamicImage) -> (u32, u32) {
    let (w, h) = first.dimensions();
    if w <= MAX_TILE_WIDTH {
        return (w.max(1), h.max(1));
    }
    let scaled_h = ((h as u64 * MAX_TILE_WIDTH as u64) / w as u64).max(1) as u32;
    (MAX_TILE_WIDTH, scaled_h)
}
