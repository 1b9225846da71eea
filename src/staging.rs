//! Per-run scratch directory.
//!
//! Holds the local copy of the source (and its extracted archive members) and
//! the per-quadrant warped rasters. The directory is removed when the
//! [`StagingArea`] is dropped, whichever way the run ends.

use std::fs::File;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{PyramidError, PyramidResult};
use crate::raster::{RasterDriver, RasterSource};
use crate::zoom::TileRange;

const EXTRACT_DIR: &str = "extracted";

pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create a fresh directory under `workdir`, or the system temp dir.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(workdir: Option<&Path>) -> PyramidResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pyramid-");
        let dir = match workdir {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(|e| PyramidError::io(parent, e))?;
                builder.tempdir_in(parent).map_err(|e| PyramidError::io(parent, e))?
            }
            None => builder.tempdir().map_err(|e| PyramidError::io(std::env::temp_dir(), e))?,
        };
        debug!(path = %dir.path().display(), "Created staging area");
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copy `source` into the staging area and return the local path.
    ///
    /// # Errors
    /// Returns [`PyramidError::SourceUnreadable`] if the file cannot be copied.
    pub fn materialize(&self, source: &Path) -> PyramidResult<PathBuf> {
        let name = source.file_name().ok_or_else(|| PyramidError::SourceUnreadable {
            path: source.to_path_buf(),
            reason: "source has no file name".to_string(),
        })?;
        let local = self.path().join(name);
        std::fs::copy(source, &local).map_err(|e| PyramidError::SourceUnreadable {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(local)
    }

    /// Files that may hold the raster.
    ///
    /// A `.zip` file is extracted and replaced by its members (files with an
    /// extension, in path order); any other file is its own only candidate.
    ///
    /// # Errors
    /// Returns [`PyramidError::SourceUnreadable`] for a corrupt archive.
    pub fn candidates(&self, local: &Path) -> PyramidResult<Vec<PathBuf>> {
        if !is_zip(local) {
            return Ok(vec![local.to_path_buf()]);
        }

        let unreadable = |reason: String| PyramidError::SourceUnreadable {
            path: local.to_path_buf(),
            reason,
        };
        let target = self.path().join(EXTRACT_DIR);
        {
            let file = File::open(local).map_err(|e| unreadable(e.to_string()))?;
            let mut archive = zip::ZipArchive::new(file).map_err(|e| unreadable(e.to_string()))?;
            archive.extract(&target).map_err(|e| unreadable(e.to_string()))?;
        }
        std::fs::remove_file(local).map_err(|e| PyramidError::io(local, e))?;

        let members: Vec<PathBuf> = WalkDir::new(&target)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && e.path().extension().is_some())
            .map(walkdir::DirEntry::into_path)
            .collect();
        debug!(archive = %local.display(), members = members.len(), "Extracted archive");
        Ok(members)
    }

    /// Open the first candidate the driver accepts.
    ///
    /// # Errors
    /// Returns [`PyramidError::SourceUnreadable`] if none opens.
    pub fn open_first(
        &self,
        driver: &dyn RasterDriver,
        source: &Path,
        candidates: &[PathBuf],
    ) -> PyramidResult<Box<dyn RasterSource>> {
        let mut last_error = None;
        for candidate in candidates {
            match driver.open(candidate) {
                Ok(raster) => {
                    debug!(path = %candidate.display(), "Opened raster");
                    return Ok(raster);
                }
                Err(e) => {
                    debug!(path = %candidate.display(), error = %e, "Not a readable raster");
                    last_error = Some(e);
                }
            }
        }
        Err(PyramidError::SourceUnreadable {
            path: source.to_path_buf(),
            reason: last_error.map_or_else(|| "archive contains no files".to_string(), |e| e.to_string()),
        })
    }

    /// Scratch path of a quadrant's warped raster.
    #[must_use]
    pub fn quadrant_path(&self, zoom: u8, range: &TileRange) -> PathBuf {
        self.path()
            .join(format!("quadrant-{zoom}-{}-{}.tif", range.min_x, range.min_y))
    }

    /// Remove the directory now, reporting failures.
    ///
    /// # Errors
    /// Returns an error if removal fails.
    pub fn close(self) -> PyramidResult<()> {
        let path = self.path().to_path_buf();
        self.dir.close().map_err(|e| PyramidError::io(path, e))
    }
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoTransform;
    use crate::raster::{GeoTiffDriver, MemoryRaster};
    use std::io::Write;

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in members {
            zip.start_file(*name, zip::write::SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn geotiff_bytes() -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.tif");
        MemoryRaster::filled(2, 2, 1, GeoTransform::north_up(0.0, 0.0, 1.0, -1.0), Some(3857), 1.0, None)
            .unwrap()
            .persist(&path)
            .unwrap();
        std::fs::read(path).unwrap()
    }

    #[test]
    fn test_staging_dir_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let staging = StagingArea::new(Some(parent.path())).unwrap();
            assert!(staging.path().starts_with(parent.path()));
            staging.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_plain_file_is_single_candidate() {
        let src = tempfile::tempdir().unwrap();
        let source = src.path().join("raster.tif");
        std::fs::write(&source, b"data").unwrap();

        let staging = StagingArea::new(None).unwrap();
        let local = staging.materialize(&source).unwrap();
        assert_eq!(staging.candidates(&local).unwrap(), vec![local]);
    }

    #[test]
    fn test_zip_opens_first_readable_member() {
        let src = tempfile::tempdir().unwrap();
        let source = src.path().join("bundle.ZIP");
        let tiff = geotiff_bytes();
        write_zip(&source, &[("a_readme.txt", b"hello"), ("b_raster.tif", &tiff), ("noext", b"x")]);

        let staging = StagingArea::new(None).unwrap();
        let local = staging.materialize(&source).unwrap();
        let candidates = staging.candidates(&local).unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(!local.exists());

        let raster = staging.open_first(&GeoTiffDriver, &source, &candidates).unwrap();
        assert_eq!(raster.width(), 2);
    }

    #[test]
    fn test_zip_without_raster_is_unreadable() {
        let src = tempfile::tempdir().unwrap();
        let source = src.path().join("bundle.zip");
        write_zip(&source, &[("readme.txt", b"hello")]);

        let staging = StagingArea::new(None).unwrap();
        let local = staging.materialize(&source).unwrap();
        let candidates = staging.candidates(&local).unwrap();
        let err = staging.open_first(&GeoTiffDriver, &source, &candidates).err().unwrap();
        assert!(matches!(err, PyramidError::SourceUnreadable { .. }));
    }

    #[test]
    fn test_missing_source() {
        let staging = StagingArea::new(None).unwrap();
        let err = staging.materialize(Path::new("/does/not/exist.tif")).unwrap_err();
        assert!(matches!(err, PyramidError::SourceUnreadable { .. }));
    }
}
