use crate::common::error::{PanelError, Result};
use crate::core::provider::{Encoding, FaceEncodingProvider};
use std::path::Path;

/// One authorized person: display name plus the encoding of their reference
/// image. Names come from file stems and are not deduplicated; matching is
/// stable so earlier entries shadow later duplicates.
#[derive(Debug, Clone)]
pub struct KnownFace {
    pub name: String,
    pub encoding: Encoding,
}

/// Authorized-person encodings, loaded once at startup and passed by
/// reference to consumers.
#[derive(Debug, Default)]
pub struct KnownFaceRegistry {
    faces: Vec<KnownFace>,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

impl KnownFaceRegistry {
    pub fn new() -> Self {
        Self { faces: Vec::new() }
    }

    /// Loads every image in `dir` (sorted by filename). Files with no
    /// detectable face are skipped with a warning; files with several faces
    /// contribute only the first. An empty result is a configuration error.
    pub fn load_dir(provider: &dyn FaceEncodingProvider, dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(PanelError::Configuration(format!(
                "Authorised faces directory not found: {}. \
                 Please create it and add authorised person images.",
                dir.display()
            )));
        }

        tracing::info!("Loading authorised faces from: {}", dir.display());

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut registry = Self::new();
        for path in paths {
            let name = match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };

            let image = match image::open(&path) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!("Skipping unreadable image {}: {}", path.display(), e);
                    continue;
                }
            };

            let encodings = match provider.encodings(&image) {
                Ok(encodings) => encodings,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            match encodings.len() {
                0 => {
                    tracing::warn!("No faces found in {}", path.display());
                    continue;
                }
                1 => {}
                n => {
                    tracing::warn!(
                        "Multiple faces ({}) in {}. Using first face.",
                        n,
                        path.display()
                    );
                }
            }

            let encoding = encodings.into_iter().next().unwrap_or_default();
            tracing::info!("Loaded authorised person: {}", name);
            registry.add(name, encoding);
        }

        if registry.is_empty() {
            return Err(PanelError::Configuration(format!(
                "No authorised faces found in {}",
                dir.display()
            )));
        }

        Ok(registry)
    }

    pub fn add(&mut self, name: impl Into<String>, encoding: Encoding) {
        self.faces.push(KnownFace { name: name.into(), encoding });
    }

    pub fn faces(&self) -> &[KnownFace] {
        &self.faces
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.faces.iter().map(|face| face.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::FaceLocation;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::collections::HashMap;

    /// Test provider keyed by image width: each width maps to the encodings
    /// "found" in that image.
    struct StubProvider {
        by_width: HashMap<u32, Vec<Encoding>>,
    }

    impl FaceEncodingProvider for StubProvider {
        fn face_locations(&self, frame: &DynamicImage) -> crate::common::error::Result<Vec<FaceLocation>> {
            let count = self.by_width.get(&frame.width()).map_or(0, Vec::len);
            Ok((0..count)
                .map(|i| FaceLocation { top: 0, right: 8 * (i as i32 + 1), bottom: 8, left: 0 })
                .collect())
        }

        fn encode(
            &self,
            frame: &DynamicImage,
            location: &FaceLocation,
        ) -> crate::common::error::Result<Encoding> {
            let index = (location.right / 8 - 1) as usize;
            Ok(self.by_width[&frame.width()][index].clone())
        }
    }

    fn write_image(dir: &Path, name: &str, width: u32) {
        let image = RgbImage::from_pixel(width, 8, Rgb([128, 128, 128]));
        image.save(dir.join(name)).unwrap();
    }

    #[test]
    fn empty_faces_skipped_single_face_loaded() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "alice.png", 16);
        write_image(dir.path(), "statue.png", 24);

        let provider = StubProvider {
            by_width: HashMap::from([
                (16, vec![vec![0.1, 0.2]]),
                (24, vec![]), // zero faces: skipped with a warning
            ]),
        };

        let registry = KnownFaceRegistry::load_dir(&provider, dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["alice"]);
    }

    #[test]
    fn multiple_faces_use_first() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "bob.jpg", 32);

        let provider = StubProvider {
            by_width: HashMap::from([(32, vec![vec![1.0], vec![2.0]])]),
        };

        let registry = KnownFaceRegistry::load_dir(&provider, dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.faces()[0].encoding, vec![1.0]);
    }

    #[test]
    fn all_faceless_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "empty.png", 24);

        let provider = StubProvider {
            by_width: HashMap::from([(24, vec![])]),
        };

        let result = KnownFaceRegistry::load_dir(&provider, dir.path());
        assert!(matches!(result, Err(PanelError::Configuration(_))));
    }

    #[test]
    fn missing_directory_is_a_configuration_error() {
        let provider = StubProvider { by_width: HashMap::new() };
        let result =
            KnownFaceRegistry::load_dir(&provider, Path::new("/nonexistent/authorised"));
        assert!(matches!(result, Err(PanelError::Configuration(_))));
    }

    #[test]
    fn non_image_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "carol.jpeg", 16);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let provider = StubProvider {
            by_width: HashMap::from([(16, vec![vec![0.5]])]),
        };

        let registry = KnownFaceRegistry::load_dir(&provider, dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
