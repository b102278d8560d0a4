//! Tile payload files.
//!
//! Each tile is `tiles/<tile_row>_<tile_col>.bin`, a bincode-encoded
//! [`TilePayload`] holding the tile's cells in row-major order. Compressed
//! layers wrap the same bytes in gzip and add `.gz`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::coord::TileId;
use crate::error::{MidasError, Result};

use super::manifest::Compression;

/// Directory holding tile files inside a grid dataset.
pub const TILES_DIR: &str = "tiles";

/// On-disk tile contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilePayload<T> {
    pub rows: u32,
    pub cols: u32,
    pub values: Vec<T>,
}

pub fn tile_path(dir: &Path, tile: TileId, compression: Compression) -> PathBuf {
    dir.join(TILES_DIR)
        .join(format!("{}.bin{}", tile, compression.suffix()))
}

/// Reads one tile and checks its dimensions.
pub fn read_tile<T: DeserializeOwned>(
    dir: &Path,
    tile: TileId,
    compression: Compression,
    dims: (usize, usize),
) -> Result<Vec<T>> {
    let path = tile_path(dir, tile, compression);
    let file = File::open(&path).map_err(|source| MidasError::ReadFailed {
        path: path.clone(),
        source,
    })?;
    let reader: Box<dyn Read> = match compression {
        Compression::None => Box::new(BufReader::new(file)),
        Compression::Gzip => Box::new(GzDecoder::new(BufReader::new(file))),
    };

    let payload: TilePayload<T> = bincode::deserialize_from(reader)
        .map_err(|e| MidasError::invalid_dataset(&path, format!("corrupt tile: {}", e)))?;

    let (rows, cols) = dims;
    if payload.rows as usize != rows
        || payload.cols as usize != cols
        || payload.values.len() != rows * cols
    {
        return Err(MidasError::invalid_dataset(
            &path,
            format!(
                "tile is {}x{} with {} values, expected {}x{}",
                payload.rows,
                payload.cols,
                payload.values.len(),
                rows,
                cols
            ),
        ));
    }
    Ok(payload.values)
}

/// Writes one tile, creating the tiles directory if needed.
pub fn write_tile<T: Serialize>(
    dir: &Path,
    tile: TileId,
    compression: Compression,
    payload: &TilePayload<T>,
) -> Result<()> {
    let path = tile_path(dir, tile, compression);
    let write_err = |source| MidasError::WriteFailed {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(dir.join(TILES_DIR)).map_err(write_err)?;
    let file = File::create(&path).map_err(write_err)?;
    let writer = BufWriter::new(file);

    let encode_err = |e: bincode::Error| MidasError::EncodeFailed {
        path: path.clone(),
        reason: e.to_string(),
    };

    let mut writer = match compression {
        Compression::None => {
            let mut writer = writer;
            bincode::serialize_into(&mut writer, payload).map_err(encode_err)?;
            writer
        }
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
            bincode::serialize_into(&mut encoder, payload).map_err(encode_err)?;
            encoder.finish().map_err(write_err)?
        }
    };
    writer.flush().map_err(write_err)
}
