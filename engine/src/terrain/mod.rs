//! Terrain tile cache.
//!
//! The terrain is a height field sampled on a fixed grid. Renderers ask the [`TileSupplier`]
//! for rectangular tiles of it; each tile carries the height range of the samples it covers
//! (plus a texture slot once available), computed in the background and cached between
//! frames until it falls out of use.

mod height;
mod supplier;
mod tile;

pub use height::{HeightField, HeightRange, HeightSource, TileOutput, compute_height_range};
pub use supplier::{SupplierConfig, SupplierStats, TileSupplier};
pub use tile::{TileData, TileDataReference, TileId, TileState};
