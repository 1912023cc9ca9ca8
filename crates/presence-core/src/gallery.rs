//! Enrolled identities and the sample directory they are built from.

use crate::extractor::{ExtractError, Extractor};
use crate::types::{Embedding, Identity};
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SAMPLE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("sample source {path} is not accessible: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot store sample {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("name must not be empty")]
    EmptyName,
    #[error("extraction: {0}")]
    Extract(#[from] ExtractError),
}

/// One raw enrollment sample, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEntry {
    pub name: String,
    pub origin: PathBuf,
}

/// Where enrollment samples come from.
pub trait SampleSource {
    /// List samples in a stable order. Fails only if the source itself is
    /// unreachable.
    fn entries(&self) -> Result<Vec<SampleEntry>, GalleryError>;

    /// Decode one sample.
    fn read(&self, entry: &SampleEntry) -> Result<GrayImage, GalleryError>;
}

/// A directory of `<display_name>.{png,jpg,jpeg}` images.
#[derive(Debug, Clone)]
pub struct SampleDir {
    root: PathBuf,
}

impl SampleDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_exists(&self) -> Result<(), GalleryError> {
        std::fs::create_dir_all(&self.root).map_err(|source| GalleryError::SourceUnavailable {
            path: self.root.clone(),
            source,
        })
    }

    /// Save a captured sample for `name`, replacing any previous one.
    pub fn store(&self, name: &str, image: &GrayImage) -> Result<PathBuf, GalleryError> {
        let file_name = sample_file_name(name).ok_or(GalleryError::EmptyName)?;
        self.ensure_exists()?;
        let path = self.root.join(file_name);
        image.save(&path).map_err(|source| GalleryError::Store { path: path.clone(), source })?;
        tracing::info!(path = %path.display(), "stored enrollment sample");
        Ok(path)
    }
}

impl SampleSource for SampleDir {
    fn entries(&self) -> Result<Vec<SampleEntry>, GalleryError> {
        let dir = std::fs::read_dir(&self.root).map_err(|source| GalleryError::SourceUnavailable {
            path: self.root.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for item in dir {
            let path = match item {
                Ok(item) => item.path(),
                Err(e) => {
                    tracing::warn!(
                        dir = %self.root.display(),
                        error = %e,
                        "skipping unreadable directory entry"
                    );
                    continue;
                }
            };
            if !is_sample_file(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            entries.push(SampleEntry { name: display_name(stem), origin: path });
        }
        // read_dir order is platform-defined; gallery order decides ties.
        entries.sort_by(|a, b| a.origin.cmp(&b.origin));
        Ok(entries)
    }

    fn read(&self, entry: &SampleEntry) -> Result<GrayImage, GalleryError> {
        image::open(&entry.origin)
            .map(|img| img.to_luma8())
            .map_err(|source| GalleryError::Decode { path: entry.origin.clone(), source })
    }
}

fn is_sample_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SAMPLE_EXTENSIONS.iter().any(|ok| e.eq_ignore_ascii_case(ok)))
}

/// `alice_smith` -> `alice smith`.
pub fn display_name(stem: &str) -> String {
    stem.replace('_', " ")
}

/// `Alice Smith` -> `alice_smith.jpg`; `None` for a blank name.
pub fn sample_file_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(format!("{}.jpg", name.to_lowercase().replace(' ', "_")))
}

/// Why a sample did not contribute an identity.
#[derive(Debug, Clone)]
pub struct SkippedSample {
    pub origin: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<SkippedSample>,
}

/// The enrolled set. Built once, replaced wholesale on rebuild.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from identities; the first embedding for a name wins.
    pub fn from_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        let mut gallery = Self::new();
        for identity in identities {
            gallery.insert(identity.name, identity.embedding);
        }
        gallery
    }

    /// Add `name` unless already present. Returns whether it was added.
    pub fn insert(&mut self, name: String, embedding: Embedding) -> bool {
        if self.contains(&name) {
            return false;
        }
        self.identities.push(Identity { name, embedding });
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.identities.iter().any(|i| i.name == name)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.name.as_str())
    }

    /// Build a gallery from `source`, one embedding per name taken from the
    /// first face of the first usable sample.
    ///
    /// Unreadable samples and samples without a face are skipped and listed
    /// in the report; only an inaccessible source is an error.
    pub fn load(
        source: &dyn SampleSource,
        extractor: &mut dyn Extractor,
    ) -> Result<(Self, LoadReport), GalleryError> {
        let mut gallery = Self::new();
        let mut report = LoadReport::default();

        for entry in source.entries()? {
            if gallery.contains(&entry.name) {
                continue;
            }
            match first_embedding(source, extractor, &entry) {
                Ok(embedding) => {
                    tracing::info!(
                        name = %entry.name,
                        origin = %entry.origin.display(),
                        "loaded identity"
                    );
                    gallery.insert(entry.name, embedding);
                }
                Err(reason) => {
                    tracing::warn!(
                        origin = %entry.origin.display(),
                        %reason,
                        "skipping enrollment sample"
                    );
                    report.skipped.push(SkippedSample { origin: entry.origin, reason });
                }
            }
        }

        report.loaded = gallery.len();
        tracing::info!(loaded = report.loaded, skipped = report.skipped.len(), "gallery built");
        Ok((gallery, report))
    }
}

fn first_embedding(
    source: &dyn SampleSource,
    extractor: &mut dyn Extractor,
    entry: &SampleEntry,
) -> Result<Embedding, String> {
    let image = source.read(entry).map_err(|e| e.to_string())?;
    let probes = extractor.extract(&image).map_err(|e| e.to_string())?;
    probes
        .into_iter()
        .next()
        .map(|p| p.embedding)
        .ok_or_else(|| "no face found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceBox, Probe, Region};
    use image::Luma;
    use std::collections::HashMap;

    /// Embeds a face as `[first pixel / 255]`; a zero pixel means no face.
    struct PixelExtractor;

    impl Extractor for PixelExtractor {
        fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceBox>, ExtractError> {
            Ok(self
                .extract(image)?
                .into_iter()
                .map(|p| FaceBox { region: p.region, score: 1.0, landmarks: None })
                .collect())
        }

        fn extract(&mut self, image: &GrayImage) -> Result<Vec<Probe>, ExtractError> {
            let v = image.get_pixel(0, 0).0[0];
            if v == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![Probe {
                embedding: Embedding::new(vec![v as f32 / 255.0]),
                region: Region::new(0, 0, 1, 1),
            }])
        }
    }

    struct MemorySource {
        entries: Vec<SampleEntry>,
        images: HashMap<PathBuf, Option<GrayImage>>,
    }

    impl MemorySource {
        fn new(samples: &[(&str, &str, Option<u8>)]) -> Self {
            let mut entries = Vec::new();
            let mut images = HashMap::new();
            for (name, origin, pixel) in samples {
                let origin = PathBuf::from(origin);
                entries.push(SampleEntry { name: name.to_string(), origin: origin.clone() });
                images.insert(origin, pixel.map(|p| GrayImage::from_pixel(4, 4, Luma([p]))));
            }
            Self { entries, images }
        }
    }

    impl SampleSource for MemorySource {
        fn entries(&self) -> Result<Vec<SampleEntry>, GalleryError> {
            Ok(self.entries.clone())
        }

        fn read(&self, entry: &SampleEntry) -> Result<GrayImage, GalleryError> {
            self.images
                .get(&entry.origin)
                .cloned()
                .flatten()
                .ok_or_else(|| GalleryError::Decode {
                    path: entry.origin.clone(),
                    source: image::ImageError::IoError(std::io::Error::other("corrupt")),
                })
        }
    }

    #[test]
    fn test_load_skips_corrupt_and_faceless_samples() {
        let source = MemorySource::new(&[
            ("alice", "a.jpg", Some(51)),
            ("bob", "b.jpg", None),
            ("carol", "c.jpg", Some(0)),
        ]);
        let (gallery, report) = Gallery::load(&source, &mut PixelExtractor).unwrap();
        assert_eq!(gallery.names().collect::<Vec<_>>(), vec!["alice"]);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[1].reason, "no face found");
    }

    #[test]
    fn test_load_first_usable_sample_wins() {
        let source = MemorySource::new(&[
            ("alice", "a1.jpg", Some(0)),
            ("alice", "a2.jpg", Some(102)),
            ("alice", "a3.jpg", Some(204)),
        ]);
        let (gallery, _) = Gallery::load(&source, &mut PixelExtractor).unwrap();
        assert_eq!(gallery.len(), 1);
        assert!((gallery.identities()[0].embedding.values[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_from_identities_keeps_first_duplicate() {
        let gallery = Gallery::from_identities(vec![
            Identity { name: "Alice".into(), embedding: Embedding::new(vec![1.0]) },
            Identity { name: "Alice".into(), embedding: Embedding::new(vec![2.0]) },
        ]);
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.identities()[0].embedding.values, vec![1.0]);
        assert!(!Gallery::new().contains("Alice"));
        assert!(Gallery::new().is_empty());
    }

    #[test]
    fn test_sample_dir_lists_images_sorted_with_display_names() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["zoe_ng.PNG", "alice_smith.jpg", "notes.txt", "bob.jpeg"] {
            std::fs::write(dir.path().join(file), b"x").unwrap();
        }
        let entries = SampleDir::new(dir.path()).entries().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alice smith", "bob", "zoe ng"]);
    }

    #[test]
    fn test_sample_dir_missing_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = SampleDir::new(dir.path().join("nope"));
        assert!(matches!(missing.entries(), Err(GalleryError::SourceUnavailable { .. })));
    }

    #[test]
    fn test_store_then_load_roundtrip_via_disk() {
        let dir = tempfile::tempdir().unwrap();
        let samples = SampleDir::new(dir.path().join("known_faces"));
        let sample = GrayImage::from_pixel(8, 8, Luma([128]));
        let path = samples.store("  Alice Smith ", &sample).unwrap();
        assert_eq!(path.file_name().unwrap(), "alice_smith.jpg");

        std::fs::write(samples.root().join("broken.png"), b"not an image").unwrap();
        let (gallery, report) = Gallery::load(&samples, &mut PixelExtractor).unwrap();
        assert_eq!(gallery.names().collect::<Vec<_>>(), vec!["alice smith"]);
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn test_sample_file_name() {
        assert_eq!(sample_file_name("Alice Smith").as_deref(), Some("alice_smith.jpg"));
        assert_eq!(sample_file_name("   "), None);
        assert_eq!(display_name("mary_jane_watson"), "mary jane watson");
    }
}
