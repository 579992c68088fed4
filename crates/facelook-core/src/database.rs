//! Reference database: labeled face crops built from a directory of images
//! and cached next to them.
//!
//! The cache file is authoritative. Once `face_database.bin` exists it is
//! loaded as-is; changes to the image directory are not picked up until the
//! cache is deleted.

use crate::detector::{DetectorError, FaceDetector};
use crate::extractor;
use crate::types::{FaceCrop, ReferenceEntry};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cache file written inside the reference directory.
pub const CACHE_FILE_NAME: &str = "face_database.bin";

/// Extensions considered reference images. Matching is case-sensitive.
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("reference directory not found: {0}")]
    NotFound(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache serialization failed for {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("corrupt cache {path}: {features} feature arrays but {labels} labels")]
    CorruptCache {
        path: PathBuf,
        features: usize,
        labels: usize,
    },
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

impl DatabaseError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// On-disk layout: two parallel sequences.
#[derive(Serialize, Deserialize)]
struct CacheFile {
    features: Vec<Vec<f32>>,
    labels: Vec<String>,
}

/// What happened to one candidate file during a build.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Added(FaceCrop),
    NoFace,
    Unreadable(String),
}

/// Per-build accounting of added and skipped files.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BuildReport {
    pub added: usize,
    pub no_face: Vec<PathBuf>,
    pub unreadable: Vec<(PathBuf, String)>,
}

impl BuildReport {
    pub fn skipped(&self) -> usize {
        self.no_face.len() + self.unreadable.len()
    }
}

/// Where a loaded database came from.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadSource {
    Cache,
    Built(BuildReport),
}

/// Ordered sequence of labeled reference crops. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceDatabase {
    entries: Vec<ReferenceEntry>,
}

impl ReferenceDatabase {
    pub fn new(entries: Vec<ReferenceEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }

    /// Cache file location for a reference directory.
    pub fn cache_path(dir: &Path) -> PathBuf {
        dir.join(CACHE_FILE_NAME)
    }

    /// Load the cache if present, otherwise build from images and write it.
    pub fn load_or_build<D: FaceDetector + ?Sized>(
        dir: &Path,
        detector: &mut D,
    ) -> Result<(Self, LoadSource), DatabaseError> {
        let cache = Self::cache_path(dir);
        if cache.exists() {
            let db = Self::load_cache(&cache)?;
            tracing::info!(path = %cache.display(), entries = db.len(), "loaded reference cache");
            return Ok((db, LoadSource::Cache));
        }

        let (db, report) = Self::build(dir, detector)?;
        Ok((db, LoadSource::Built(report)))
    }

    /// Scan `dir` for reference images, extract one crop per image and write
    /// the cache. Files are processed in file-name order.
    pub fn build<D: FaceDetector + ?Sized>(
        dir: &Path,
        detector: &mut D,
    ) -> Result<(Self, BuildReport), DatabaseError> {
        let files = list_reference_images(dir)?;
        tracing::info!(
            dir = %dir.display(),
            candidates = files.len(),
            "building reference database"
        );

        let mut entries = Vec::with_capacity(files.len());
        let mut report = BuildReport::default();

        for path in files {
            match process_file(&path, detector)? {
                FileOutcome::Added(crop) => {
                    let label = label_for(&path);
                    tracing::debug!(path = %path.display(), label, "added reference face");
                    entries.push(ReferenceEntry { label, crop });
                    report.added += 1;
                }
                FileOutcome::NoFace => {
                    tracing::debug!(path = %path.display(), "no face found, skipping");
                    report.no_face.push(path);
                }
                FileOutcome::Unreadable(reason) => {
                    tracing::warn!(
                        path = %path.display(),
                        %reason,
                        "could not decode image, skipping"
                    );
                    report.unreadable.push((path, reason));
                }
            }
        }

        let db = Self::new(entries);
        db.save_cache(&Self::cache_path(dir))?;

        tracing::info!(
            added = report.added,
            no_face = report.no_face.len(),
            unreadable = report.unreadable.len(),
            "reference database built"
        );

        Ok((db, report))
    }

    /// Deserialize a cache file.
    pub fn load_cache(path: &Path) -> Result<Self, DatabaseError> {
        let bytes = fs::read(path).map_err(|e| DatabaseError::io(path, e))?;
        let cache: CacheFile = bincode::deserialize(&bytes).map_err(|source| DatabaseError::Cache {
            path: path.to_path_buf(),
            source,
        })?;

        if cache.features.len() != cache.labels.len() {
            return Err(DatabaseError::CorruptCache {
                path: path.to_path_buf(),
                features: cache.features.len(),
                labels: cache.labels.len(),
            });
        }

        let entries = cache
            .labels
            .into_iter()
            .zip(cache.features)
            .map(|(label, values)| ReferenceEntry {
                label,
                crop: FaceCrop::from_raw(values),
            })
            .collect();

        Ok(Self { entries })
    }

    /// Serialize to `path`, replacing any existing file atomically.
    pub fn save_cache(&self, path: &Path) -> Result<(), DatabaseError> {
        let cache = CacheFile {
            features: self.entries.iter().map(|e| e.crop.values().to_vec()).collect(),
            labels: self.entries.iter().map(|e| e.label.clone()).collect(),
        };

        let tmp = path.with_extension("bin.tmp");
        let file = File::create(&tmp).map_err(|e| DatabaseError::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &cache).map_err(|source| DatabaseError::Cache {
            path: tmp.clone(),
            source,
        })?;
        writer.flush().map_err(|e| DatabaseError::io(&tmp, e))?;
        drop(writer);

        fs::rename(&tmp, path).map_err(|e| DatabaseError::io(path, e))?;
        tracing::debug!(path = %path.display(), entries = self.len(), "wrote reference cache");
        Ok(())
    }
}

/// Reference image files in `dir`, sorted by file name.
fn list_reference_images(dir: &Path) -> Result<Vec<PathBuf>, DatabaseError> {
    if !dir.is_dir() {
        return Err(DatabaseError::NotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| DatabaseError::io(dir, e))? {
        let path = entry.map_err(|e| DatabaseError::io(dir, e))?.path();
        let has_image_ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext));
        if has_image_ext && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Decode one file and extract its face crop.
///
/// Decode failures become [`FileOutcome::Unreadable`]; detector failures
/// propagate.
pub fn process_file<D: FaceDetector + ?Sized>(
    path: &Path,
    detector: &mut D,
) -> Result<FileOutcome, DetectorError> {
    let image = match image::open(path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => return Ok(FileOutcome::Unreadable(e.to_string())),
    };

    Ok(match extractor::extract(detector, &image)? {
        Some(crop) => FileOutcome::Added(crop),
        None => FileOutcome::NoFace,
    })
}

/// Label for a reference image: file name up to its first `.`.
pub fn label_for(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    name.split('.').next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_for_strips_extension() {
        assert_eq!(label_for(Path::new("/refs/alice.jpg")), "alice");
        assert_eq!(label_for(Path::new("bob.png")), "bob");
    }

    #[test]
    fn test_label_for_stops_at_first_dot() {
        assert_eq!(label_for(Path::new("carol.smith.jpeg")), "carol");
    }

    #[test]
    fn test_build_report_skipped() {
        let report = BuildReport {
            added: 2,
            no_face: vec![PathBuf::from("a.png")],
            unreadable: vec![(PathBuf::from("b.jpg"), "bad".into())],
        };
        assert_eq!(report.skipped(), 2);
    }

    #[test]
    fn test_list_reference_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zed.png", "amy.jpg", "bob.jpeg", "notes.txt", "upper.JPG", CACHE_FILE_NAME] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("folder.png")).unwrap();

        let files = list_reference_images(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["amy.jpg", "bob.jpeg", "zed.png"]);
    }

    #[test]
    fn test_list_reference_images_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            list_reference_images(&missing),
            Err(DatabaseError::NotFound(p)) if p == missing
        ));
    }

    #[test]
    fn test_cache_rejects_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE_NAME);
        let cache = CacheFile {
            features: vec![vec![0.0; 3]],
            labels: vec!["a".into(), "b".into()],
        };
        fs::write(&path, bincode::serialize(&cache).unwrap()).unwrap();

        assert!(matches!(
            ReferenceDatabase::load_cache(&path),
            Err(DatabaseError::CorruptCache { features: 1, labels: 2, .. })
        ));
    }

    #[test]
    fn test_cache_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE_NAME);
        fs::write(&path, b"\xff\xff").unwrap();
        assert!(matches!(
            ReferenceDatabase::load_cache(&path),
            Err(DatabaseError::Cache { .. })
        ));
    }
}
