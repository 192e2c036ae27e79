//! On-disk cache for the precomputed distance tables.
//!
//! The tables are a deterministic function of `(mode, palette)` but take a
//! while to build, so they are serialized to a gzip side file and reused.
//! Any validation failure discards the file and rebuilds.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::dist::TableSet;
use crate::error::{EncodeError, Result};
use crate::mode::{Palette, VideoMode};
use crate::window::WINDOW_BITS;

const MAGIC: [u8; 4] = *b"A2VD";
const FORMAT_VERSION: u8 = 1;

/// Cache file path for a `(mode, palette)` pair.
pub fn cache_path(dir: &Path, mode: VideoMode, palette: Palette) -> PathBuf {
    dir.join(format!(
        "{}_palette_{}_edit_distance.bin.gz",
        mode.name(),
        palette.id()
    ))
}

fn expected_len(class: usize) -> usize {
    1usize << (2 * WINDOW_BITS[class])
}

/// Load cached tables, or build and cache them on any miss.
///
/// A failure to write the cache back is logged and otherwise ignored; the
/// freshly built tables are still returned.
pub fn load_or_build(dir: &Path, mode: VideoMode, palette: Palette) -> TableSet {
    let path = cache_path(dir, mode, palette);
    match load(&path, mode, palette) {
        Ok(tables) => {
            log::info!("loaded distance tables from {}", path.display());
            tables
        }
        Err(e) => {
            log::warn!(
                "distance table cache unusable ({}), rebuilding {} {}",
                e,
                mode.name(),
                palette.name()
            );
            let tables = TableSet::build(mode, palette);
            if let Err(e) = store(&path, &tables) {
                log::warn!("could not write distance table cache {}: {}", path.display(), e);
            }
            tables
        }
    }
}

/// Load and validate a cache file.
pub fn load(path: &Path, mode: VideoMode, palette: Palette) -> Result<TableSet> {
    let file = File::open(path).map_err(|e| bad_cache(format!("open: {}", e)))?;
    let mut reader = GzDecoder::new(BufReader::new(file));

    let mut header = [0u8; 7];
    read_exact(&mut reader, &mut header)?;
    if header[..4] != MAGIC {
        return Err(bad_cache("bad magic".into()));
    }
    if header[4] != FORMAT_VERSION {
        return Err(bad_cache(format!("format version {}", header[4])));
    }
    if header[5] != mode.tag() {
        return Err(bad_cache("mode mismatch".into()));
    }
    if header[6] != palette.id() {
        return Err(bad_cache("palette mismatch".into()));
    }

    let mut substitute: [Vec<u16>; 4] = Default::default();
    let mut error: [Vec<u16>; 4] = Default::default();
    for tables in [&mut substitute, &mut error] {
        for (class, table) in tables.iter_mut().enumerate() {
            *table = read_table(&mut reader, expected_len(class))?;
        }
    }

    // The stream must be fully consumed; trailing bytes mean corruption.
    let mut trailer = [0u8; 1];
    match reader.read(&mut trailer) {
        Ok(0) => {}
        Ok(_) => return Err(bad_cache("trailing data".into())),
        Err(e) => return Err(bad_cache(format!("read: {}", e))),
    }

    Ok(TableSet::from_parts(mode, palette, substitute, error))
}

/// Write a cache file for the given tables.
pub fn store(path: &Path, tables: &TableSet) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut writer = GzEncoder::new(BufWriter::new(file), Compression::default());

    writer.write_all(&MAGIC)?;
    writer.write_all(&[
        FORMAT_VERSION,
        tables.mode().tag(),
        tables.palette().id(),
    ])?;

    for variant in [&tables.substitute, &tables.error] {
        for table in variant.iter() {
            writer.write_all(&(table.len() as u32).to_le_bytes())?;
            let mut bytes = Vec::with_capacity(table.len() * 2);
            for &v in table.iter() {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            writer.write_all(&bytes)?;
        }
    }

    writer.finish()?.flush()?;
    Ok(())
}

fn read_table<R: Read>(reader: &mut R, expected: usize) -> Result<Vec<u16>> {
    let mut len_buf = [0u8; 4];
    read_exact(reader, &mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len != expected {
        return Err(bad_cache(format!("table length {} != {}", len, expected)));
    }

    let mut bytes = vec![0u8; len * 2];
    read_exact(reader, &mut bytes)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|e| bad_cache(format!("read: {}", e)))
}

fn bad_cache(reason: String) -> EncodeError {
    EncodeError::BadCache { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_tables(mode: VideoMode, palette: Palette) -> TableSet {
        let make = || {
            [
                vec![0u16; expected_len(0)],
                vec![0u16; expected_len(1)],
                vec![0u16; expected_len(2)],
                vec![0u16; expected_len(3)],
            ]
        };
        TableSet::from_parts(mode, palette, make(), make())
    }

    #[test]
    fn test_cache_path_names() {
        let path = cache_path(Path::new("data"), VideoMode::Hgr, Palette::Ntsc);
        assert_eq!(
            path,
            Path::new("data").join("HGR_palette_5_edit_distance.bin.gz")
        );
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(dir.path(), VideoMode::Hgr, Palette::Iigs);

        let mut tables = zero_tables(VideoMode::Hgr, Palette::Iigs);
        tables.substitute[0][42] = 7;
        tables.error[3][1] = 25;
        store(&path, &tables).unwrap();

        let loaded = load(&path, VideoMode::Hgr, Palette::Iigs).unwrap();
        assert_eq!(loaded.substitution(0, 0, 42), 7);
        assert_eq!(loaded.error(3, 0, 1), 25);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HGR_palette_5_edit_distance.bin.gz");
        std::fs::write(&path, b"not a cache").unwrap();
        assert!(matches!(
            load(&path, VideoMode::Hgr, Palette::Ntsc),
            Err(EncodeError::BadCache { .. })
        ));
    }

    #[test]
    fn test_load_rejects_wrong_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin.gz");
        let tables = zero_tables(VideoMode::Hgr, Palette::Ntsc);
        store(&path, &tables).unwrap();
        assert!(load(&path, VideoMode::Dhgr, Palette::Ntsc).is_err());
        assert!(load(&path, VideoMode::Hgr, Palette::Iigs).is_err());
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(dir.path(), VideoMode::Dhgr, Palette::Ntsc);
        assert!(load(&path, VideoMode::Dhgr, Palette::Ntsc).is_err());
    }
}
