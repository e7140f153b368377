use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;

use crate::types::GarmentImage;

const GARMENT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum GarmentError {
    #[error("garment directory {} not found", .0.display())]
    MissingDirectory(PathBuf),
    #[error("no garment images found in {}", .0.display())]
    EmptyCatalog(PathBuf),
    #[error("invalid garment index {index} (catalog has {count} entries)")]
    OutOfRange { index: usize, count: usize },
    #[error("could not read garment image {}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to list garment directory {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Ordered list of garment files, fixed once built.
#[derive(Clone, Debug)]
pub struct GarmentCatalog {
    dir: PathBuf,
    files: Vec<String>,
}

impl GarmentCatalog {
    /// Builds the catalog from `dir`. With `wanted`, keeps the listed files that
    /// exist in their given order; otherwise takes every image file sorted by name.
    pub fn scan(dir: &Path, wanted: Option<&[String]>) -> Result<Self, GarmentError> {
        if !dir.is_dir() {
            return Err(GarmentError::MissingDirectory(dir.to_path_buf()));
        }

        let files = match wanted {
            Some(names) => names
                .iter()
                .filter(|name| dir.join(name).is_file())
                .cloned()
                .collect(),
            None => list_image_files(dir)?,
        };

        if files.is_empty() {
            return Err(GarmentError::EmptyCatalog(dir.to_path_buf()));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn path_of(&self, index: usize) -> Result<PathBuf, GarmentError> {
        self.files
            .get(index)
            .map(|name| self.dir.join(name))
            .ok_or(GarmentError::OutOfRange {
                index,
                count: self.files.len(),
            })
    }

    pub fn load(&self, index: usize) -> Result<GarmentImage, GarmentError> {
        let path = self.path_of(index)?;
        let decoded = image::open(&path).map_err(|source| GarmentError::Decode {
            path: path.clone(),
            source,
        })?;
        Ok(GarmentImage::from_dynamic(decoded))
    }
}

fn list_image_files(dir: &Path) -> Result<Vec<String>, GarmentError> {
    let io_err = |source| GarmentError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() {
            continue;
        }
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                GARMENT_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if let (true, Some(name)) = (is_image, path.file_name().and_then(|n| n.to_str())) {
            files.push(name.to_string());
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug)]
struct Selection {
    index: usize,
    image: Arc<GarmentImage>,
}

/// The catalog plus the currently selected garment.
///
/// Decoding happens outside the lock; only the swap of the selected image is
/// exclusive, so the frame loop never waits on disk I/O.
#[derive(Debug)]
pub struct GarmentStore {
    catalog: GarmentCatalog,
    current: Mutex<Selection>,
}

impl GarmentStore {
    /// Loads entry 0 eagerly. Any error here is a startup error.
    pub fn open(catalog: GarmentCatalog) -> Result<Self, GarmentError> {
        let image = catalog.load(0)?;
        log::info!(
            "loaded {} garments, starting with {}",
            catalog.len(),
            catalog.files()[0]
        );
        Ok(Self {
            catalog,
            current: Mutex::new(Selection {
                index: 0,
                image: Arc::new(image),
            }),
        })
    }

    pub fn list(&self) -> &[String] {
        self.catalog.files()
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn select(&self, index: usize) -> Result<Arc<GarmentImage>, GarmentError> {
        let image = Arc::new(self.catalog.load(index)?);
        let mut current = self.lock();
        current.index = index;
        current.image = image.clone();
        log::info!("selected garment {index}: {}", self.catalog.files()[index]);
        Ok(image)
    }

    pub fn current(&self) -> Option<Arc<GarmentImage>> {
        Some(self.lock().image.clone())
    }

    pub fn current_index(&self) -> usize {
        self.lock().index
    }

    pub fn current_file(&self) -> &str {
        &self.catalog.files()[self.current_index()]
    }

    pub fn next(&self) -> usize {
        self.step(1)
    }

    pub fn previous(&self) -> usize {
        self.step(self.len() - 1)
    }

    fn step(&self, offset: usize) -> usize {
        let current = self.current_index();
        let target = (current + offset) % self.len();
        match self.select(target) {
            Ok(_) => target,
            Err(err) => {
                log::warn!("keeping garment {current}: {err}");
                current
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Selection> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn garment_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(4, 6, Rgba([255, 0, 0, 255]))
            .save(dir.path().join("top1_front.png"))
            .unwrap();
        RgbImage::from_pixel(5, 3, Rgb([0, 200, 0]))
            .save(dir.path().join("top2_front.jpg"))
            .unwrap();
        RgbaImage::from_pixel(2, 2, Rgba([0, 0, 255, 128]))
            .save(dir.path().join("top5_front.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        dir
    }

    #[test]
    fn scan_lists_images_sorted() {
        let dir = garment_dir();
        let catalog = GarmentCatalog::scan(dir.path(), None).unwrap();
        assert_eq!(
            catalog.files(),
            ["top1_front.png", "top2_front.jpg", "top5_front.png"]
        );
    }

    #[test]
    fn scan_keeps_configured_order_and_drops_missing() {
        let dir = garment_dir();
        let wanted = vec![
            "top5_front.png".to_string(),
            "top4_front.png".to_string(),
            "top1_front.png".to_string(),
        ];
        let catalog = GarmentCatalog::scan(dir.path(), Some(&wanted)).unwrap();
        assert_eq!(catalog.files(), ["top5_front.png", "top1_front.png"]);
    }

    #[test]
    fn missing_directory_and_empty_catalog_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("clothes_images");
        assert!(matches!(
            GarmentCatalog::scan(&missing, None),
            Err(GarmentError::MissingDirectory(_))
        ));
        assert!(matches!(
            GarmentCatalog::scan(dir.path(), None),
            Err(GarmentError::EmptyCatalog(_))
        ));
    }

    #[test]
    fn open_loads_first_entry() {
        let dir = garment_dir();
        let store = GarmentStore::open(GarmentCatalog::scan(dir.path(), None).unwrap()).unwrap();
        let current = store.current().unwrap();
        assert_eq!(store.current_index(), 0);
        assert_eq!((current.width, current.height, current.channels), (4, 6, 4));
    }

    #[test]
    fn select_then_current_returns_that_entry() {
        let dir = garment_dir();
        let catalog = GarmentCatalog::scan(dir.path(), None).unwrap();
        let store = GarmentStore::open(catalog.clone()).unwrap();

        for index in 0..store.len() {
            store.select(index).unwrap();
            assert_eq!(*store.current().unwrap(), catalog.load(index).unwrap());
            assert_eq!(store.current_file(), catalog.files()[index]);
        }
    }

    #[test]
    fn out_of_range_select_keeps_current() {
        let dir = garment_dir();
        let store = GarmentStore::open(GarmentCatalog::scan(dir.path(), None).unwrap()).unwrap();
        store.select(1).unwrap();
        let before = store.current().unwrap();

        let err = store.select(3).unwrap_err();
        assert!(matches!(err, GarmentError::OutOfRange { index: 3, count: 3 }));
        assert_eq!(store.current_index(), 1);
        assert_eq!(store.current().unwrap(), before);
    }

    #[test]
    fn corrupt_file_is_a_decode_error_and_keeps_current() {
        let dir = garment_dir();
        fs::write(dir.path().join("top9_front.png"), b"\x89PNG broken").unwrap();
        let store = GarmentStore::open(GarmentCatalog::scan(dir.path(), None).unwrap()).unwrap();

        let err = store.select(3).unwrap_err();
        assert!(matches!(err, GarmentError::Decode { .. }));
        assert_eq!(store.current_index(), 0);
    }

    #[test]
    fn cycling_wraps_in_both_directions() {
        let dir = garment_dir();
        let store = GarmentStore::open(GarmentCatalog::scan(dir.path(), None).unwrap()).unwrap();
        assert_eq!(store.previous(), 2);
        assert_eq!(store.next(), 0);
        assert_eq!(store.next(), 1);
        assert_eq!(store.current_file(), "top2_front.jpg");
        assert_eq!(store.current().unwrap().channels, 3);
    }

    #[test]
    fn readers_never_see_a_partial_selection() {
        let dir = garment_dir();
        let store = GarmentStore::open(GarmentCatalog::scan(dir.path(), None).unwrap()).unwrap();
        let known = [(4, 6, 4), (5, 3, 3), (2, 2, 4)];

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..60 {
                    store.select(round % store.len()).unwrap();
                }
            });
            for _ in 0..3 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        let image = store.current().unwrap();
                        let shape = (image.width, image.height, image.channels);
                        assert!(known.contains(&shape), "unexpected garment {shape:?}");
                        let expected = (image.width * image.height) as usize * image.channels as usize;
                        assert_eq!(image.pixels.len(), expected);
                        assert!(store.current_index() < store.len());
                    }
                });
            }
        });
    }
}
