use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use image::{ImageReader, RgbaImage};
use thiserror::Error;
use tracing::{debug, warn};

use super::asset_keys::{resolve_asset_path, AssetKeyError};
use super::StageData;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("invalid asset key {key:?}: {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: AssetKeyError,
    },
    #[error("asset root is not configured; cannot load {key:?}")]
    NoRoot { key: String },
    #[error("failed to open image {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {key:?}: {source}")]
    Decode {
        key: String,
        #[source]
        source: image::ImageError,
    },
    #[error("unknown sound {name:?}")]
    UnknownSound { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle(pub u32);

/// Read-only source of decoded bitmaps and sounds, shared by the renderer
/// and the prerender pass once loading has finished.
pub trait AssetProvider {
    fn image(&self, id: &str) -> Option<&RgbaImage>;

    fn image_size(&self, id: &str) -> Option<(u32, u32)> {
        self.image(id).map(RgbaImage::dimensions)
    }

    fn sound(&self, _name: &str) -> Option<SoundHandle> {
        None
    }

    fn play_sound(&self, name: &str, _looped: bool) -> Result<(), AssetError> {
        Err(AssetError::UnknownSound {
            name: name.to_string(),
        })
    }
}

pub type AssetErrorCallback = Box<dyn Fn(&AssetError)>;
pub type SoundSink = Box<dyn Fn(SoundHandle, bool)>;

#[derive(Default)]
pub struct ImageAssets {
    root: Option<PathBuf>,
    images: HashMap<String, RgbaImage>,
    sounds: HashMap<String, SoundHandle>,
    on_error: Option<AssetErrorCallback>,
    sound_sink: Option<SoundSink>,
}

impl ImageAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn set_error_callback(&mut self, callback: AssetErrorCallback) {
        self.on_error = Some(callback);
    }

    pub fn set_sound_sink(&mut self, sink: SoundSink) {
        self.sound_sink = Some(sink);
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn insert_image(&mut self, id: impl Into<String>, image: RgbaImage) {
        self.images.insert(id.into(), image);
    }

    pub fn insert_encoded(&mut self, id: &str, bytes: &[u8]) -> Result<(), AssetError> {
        let decoded = image::load_from_memory(bytes).map_err(|source| AssetError::Decode {
            key: id.to_string(),
            source,
        })?;
        self.images.insert(id.to_string(), decoded.to_rgba8());
        Ok(())
    }

    pub fn load_image(&mut self, id: &str) -> Result<(), AssetError> {
        let root = self.root.as_ref().ok_or_else(|| AssetError::NoRoot {
            key: id.to_string(),
        })?;
        let path = resolve_asset_path(root, id).map_err(|source| AssetError::InvalidKey {
            key: id.to_string(),
            source,
        })?;
        let reader = ImageReader::open(&path).map_err(|source| AssetError::Open {
            path: path.clone(),
            source,
        })?;
        let decoded = reader.decode().map_err(|source| AssetError::Decode {
            key: id.to_string(),
            source,
        })?;
        self.images.insert(id.to_string(), decoded.to_rgba8());
        debug!(image = id, path = %path.display(), "image_loaded");
        Ok(())
    }

    /// Loads every id, reporting failures to the error callback instead of
    /// aborting. Returns the number of images that decoded.
    pub fn load_images<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let mut loaded = 0usize;
        for id in ids {
            match self.load_image(id) {
                Ok(()) => loaded += 1,
                Err(error) => self.report(&error),
            }
        }
        loaded
    }

    pub fn load_stage_images(&mut self, data: &StageData) -> usize {
        let ids = referenced_image_ids(data);
        self.load_images(ids.iter().map(String::as_str))
    }

    pub fn register_sound(&mut self, name: impl Into<String>) -> SoundHandle {
        let next = SoundHandle(self.sounds.len() as u32);
        *self.sounds.entry(name.into()).or_insert(next)
    }

    fn report(&self, error: &AssetError) {
        warn!(error = %error, "asset_unavailable");
        if let Some(callback) = &self.on_error {
            callback(error);
        }
    }
}

impl AssetProvider for ImageAssets {
    fn image(&self, id: &str) -> Option<&RgbaImage> {
        self.images.get(id)
    }

    fn sound(&self, name: &str) -> Option<SoundHandle> {
        self.sounds.get(name).copied()
    }

    fn play_sound(&self, name: &str, looped: bool) -> Result<(), AssetError> {
        let Some(handle) = self.sound(name) else {
            let error = AssetError::UnknownSound {
                name: name.to_string(),
            };
            self.report(&error);
            return Err(error);
        };
        match &self.sound_sink {
            Some(sink) => sink(handle, looped),
            None => debug!(sound = name, looped, "sound_play_without_sink"),
        }
        Ok(())
    }
}

pub fn referenced_image_ids(data: &StageData) -> BTreeSet<String> {
    let tile_frames = data.tiles.values().flat_map(|tile| tile.frames.iter());
    let entity_frames = data.entities.values().flat_map(|entity| entity.frames.iter());
    tile_frames
        .chain(entity_frames)
        .map(|frame| frame.id.0.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn loads_png_from_root_and_reports_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]));
        image.save(dir.path().join("a.png")).expect("save png");

        let failures = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&failures);
        let mut assets = ImageAssets::with_root(dir.path());
        assets.set_error_callback(Box::new(move |error| {
            sink.borrow_mut().push(error.to_string());
        }));

        let loaded = assets.load_images(["a.png", "missing.png", "../escape.png"]);
        assert_eq!(loaded, 1);
        assert_eq!(assets.image_size("a.png"), Some((4, 3)));
        assert_eq!(failures.borrow().len(), 2);
    }

    #[test]
    fn encoded_bytes_round_trip_through_decoder() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode");

        let mut assets = ImageAssets::new();
        assets.insert_encoded("x", &bytes).expect("decode");
        assert_eq!(assets.image("x").map(|img| *img.get_pixel(1, 1)), Some(Rgba([1, 2, 3, 255])));
    }

    #[test]
    fn play_sound_requires_registration() {
        let played = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&played);
        let mut assets = ImageAssets::new();
        assets.set_sound_sink(Box::new(move |handle, looped| {
            sink.borrow_mut().push((handle, looped));
        }));
        let handle = assets.register_sound("jump");

        assert!(assets.play_sound("jump", true).is_ok());
        assert!(matches!(
            assets.play_sound("boom", false),
            Err(AssetError::UnknownSound { .. })
        ));
        assert_eq!(played.borrow().as_slice(), &[(handle, true)]);
    }
}
