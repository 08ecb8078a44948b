//! Colorization hook
//!
//! The engine hands raw samples and metadata to a [`TileRenderer`] supplied by
//! the caller. It only checks the shape of what comes back.

use crate::error::{Result, TileError};
use crate::metadata::CogMetadata;
use crate::xyz_tile::{TileBuffer, TileKind};

/// Turns raw tile samples into display-ready RGBA pixels
pub trait TileRenderer: Send + Sync {
    /// Return `tile.width * tile.height * 4` bytes of RGBA.
    fn render(&self, tile: &TileBuffer, metadata: &CogMetadata) -> Result<Vec<u8>>;
}

/// Renderer output for one tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTile {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Origin of the samples that were rendered
    pub kind: TileKind,
}

pub(crate) fn render_checked(
    renderer: &dyn TileRenderer,
    tile: &TileBuffer,
    metadata: &CogMetadata,
) -> Result<RenderedTile> {
    let rgba = renderer.render(tile, metadata)?;
    let expected = tile.pixel_count() * 4;
    if rgba.len() != expected {
        return Err(TileError::Render(format!(
            "renderer returned {} bytes for a {}x{} tile, expected {expected}",
            rgba.len(),
            tile.width,
            tile.height
        )));
    }
    Ok(RenderedTile {
        rgba,
        width: tile.width,
        height: tile.height,
        kind: tile.kind,
    })
}
