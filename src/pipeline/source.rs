use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use image::RgbaImage;

use crate::{error::EngineError, types::Frame};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Something the scheduler can pull display frames from: a camera, a clip,
/// a still image.
pub trait FrameSource {
    fn dimensions(&self) -> (u32, u32);

    /// Not paused or ended, and reporting a positive size.
    fn is_ready(&self) -> bool;

    /// The frame to draw now. `None` means nothing could be read this time.
    fn current_frame(&mut self) -> Option<Frame>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn current_frame(&mut self) -> Option<Frame> {
        (**self).current_frame()
    }
}

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// One image, repeated forever.
pub struct StaticImageSource {
    image: RgbaImage,
}

impl StaticImageSource {
    pub fn new(image: RgbaImage) -> std::result::Result<Self, EngineError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidDimensions { width, height });
        }
        Ok(Self { image })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to open image {}", path.display()))?
            .to_rgba8();
        Ok(Self::new(image)?)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl FrameSource for StaticImageSource {
    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn current_frame(&mut self) -> Option<Frame> {
        Some(Frame::from_image(self.image.clone()))
    }
}

enum SequenceEntry {
    File(PathBuf),
    Image(RgbaImage),
}

/// Ordered frames that advance one per pull. Once exhausted the source
/// reports not ready unless it loops.
pub struct ImageSequenceSource {
    entries: Vec<((u32, u32), SequenceEntry)>,
    position: usize,
    looping: bool,
}

impl ImageSequenceSource {
    /// Every image file in `dir`, sorted by file name.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("failed to read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_path(path))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(anyhow!("no image files in {}", dir.display()));
        }

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let dims = image::image_dimensions(&path)
                .with_context(|| format!("failed to read header of {}", path.display()))?;
            entries.push((dims, SequenceEntry::File(path)));
        }
        log::info!("loaded {} frame(s) from {}", entries.len(), dir.display());

        Ok(Self {
            entries,
            position: 0,
            looping: false,
        })
    }

    pub fn from_images(images: Vec<RgbaImage>) -> Self {
        let entries = images
            .into_iter()
            .map(|image| (image.dimensions(), SequenceEntry::Image(image)))
            .collect();
        Self {
            entries,
            position: 0,
            looping: false,
        }
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        !self.looping && self.position >= self.entries.len()
    }

    fn current_index(&self) -> Option<usize> {
        if self.entries.is_empty() || self.is_finished() {
            return None;
        }
        Some(self.position % self.entries.len())
    }
}

impl FrameSource for ImageSequenceSource {
    fn dimensions(&self) -> (u32, u32) {
        self.current_index()
            .map(|index| self.entries[index].0)
            .unwrap_or((0, 0))
    }

    fn is_ready(&self) -> bool {
        let (width, height) = self.dimensions();
        width > 0 && height > 0
    }

    fn current_frame(&mut self) -> Option<Frame> {
        let index = self.current_index()?;
        self.position += 1;
        if self.looping {
            self.position %= self.entries.len();
        }

        match &self.entries[index].1 {
            SequenceEntry::Image(image) => Some(Frame::from_image(image.clone())),
            SequenceEntry::File(path) => match image::open(path) {
                Ok(image) => Some(Frame::from_image(image.to_rgba8())),
                Err(err) => {
                    log::warn!("failed to decode frame {}: {err}", path.display());
                    None
                }
            },
        }
    }
}
