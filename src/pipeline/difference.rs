//! Live-vs-target shape scoring on a downsampled grid.

use image::{GrayImage, RgbaImage, imageops};
use rayon::prelude::*;

use super::{
    glyphs,
    resample::{self, Filter},
};
use crate::{
    config::DifferenceConfig,
    error::{EngineError, Result, ensure_same_dimensions},
    types::ScoreResult,
};

pub const MATCH_COLOR: [u8; 4] = [0, 255, 0, 255];
pub const LIVE_ONLY_COLOR: [u8; 4] = [255, 0, 0, 255];
pub const TARGET_ONLY_COLOR: [u8; 4] = [255, 255, 255, 255];
pub const NEITHER_COLOR: [u8; 4] = [0, 0, 0, 0];

const LABEL_MARGIN: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelClass {
    Match,
    LiveOnly,
    TargetOnly,
    Neither,
}

impl PixelClass {
    pub fn classify(live_on: bool, target_on: bool) -> Self {
        match (live_on, target_on) {
            (true, true) => PixelClass::Match,
            (true, false) => PixelClass::LiveOnly,
            (false, true) => PixelClass::TargetOnly,
            (false, false) => PixelClass::Neither,
        }
    }

    pub fn color(&self) -> [u8; 4] {
        match self {
            PixelClass::Match => MATCH_COLOR,
            PixelClass::LiveOnly => LIVE_ONLY_COLOR,
            PixelClass::TargetOnly => TARGET_ONLY_COLOR,
            PixelClass::Neither => NEITHER_COLOR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub matched: u32,
    pub live_only: u32,
    pub target_only: u32,
    pub neither: u32,
}

impl ClassCounts {
    fn add(mut self, class: PixelClass) -> Self {
        match class {
            PixelClass::Match => self.matched += 1,
            PixelClass::LiveOnly => self.live_only += 1,
            PixelClass::TargetOnly => self.target_only += 1,
            PixelClass::Neither => self.neither += 1,
        }
        self
    }

    fn merge(self, other: Self) -> Self {
        Self {
            matched: self.matched + other.matched,
            live_only: self.live_only + other.live_only,
            target_only: self.target_only + other.target_only,
            neither: self.neither + other.neither,
        }
    }

    pub fn total(&self) -> u32 {
        self.matched + self.live_only + self.target_only + self.neither
    }

    pub fn target_on(&self) -> u32 {
        self.matched + self.target_only
    }

    pub fn score(&self) -> ScoreResult {
        ScoreResult::from_counts(self.matched, self.target_on())
    }
}

/// Low-resolution classification grid.
#[derive(Clone, Debug)]
pub struct Classification {
    pub width: u32,
    pub height: u32,
    pub cells: Vec<PixelClass>,
    pub counts: ClassCounts,
}

impl Classification {
    pub fn score(&self) -> ScoreResult {
        self.counts.score()
    }

    pub fn to_image(&self) -> RgbaImage {
        let mut image = RgbaImage::new(self.width, self.height);
        let buffer: &mut [u8] = &mut image;
        buffer
            .par_chunks_exact_mut(4)
            .zip(self.cells.par_iter())
            .for_each(|(px, class)| px.copy_from_slice(&class.color()));
        image
    }
}

#[derive(Clone, Debug)]
pub struct DifferenceOutput {
    pub score: ScoreResult,
    pub visualization: RgbaImage,
}

pub struct DifferenceScorer {
    cfg: DifferenceConfig,
}

impl DifferenceScorer {
    pub fn new(cfg: DifferenceConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &DifferenceConfig {
        &self.cfg
    }

    pub fn reduced_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let factor = self.cfg.downsample_factor.max(1);
        ((width / factor).max(1), (height / factor).max(1))
    }

    /// Downsamples both masks and classifies every cell. The masks must share
    /// dimensions; they are never rescaled to fit each other.
    pub fn classify(&self, live: &GrayImage, target: &GrayImage) -> Result<Classification> {
        ensure_same_dimensions(target.dimensions(), live.dimensions())?;
        let (width, height) = target.dimensions();
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidDimensions { width, height });
        }

        let (small_w, small_h) = self.reduced_dimensions(width, height);
        let live_small = resample::resize_mask(live, small_w, small_h, Filter::Box)?;
        let target_small = resample::resize_mask(target, small_w, small_h, Filter::Box)?;

        let threshold = self.cfg.on_threshold;
        let cells: Vec<PixelClass> = live_small
            .as_raw()
            .par_iter()
            .zip(target_small.as_raw().par_iter())
            .map(|(&l, &t)| PixelClass::classify(l > threshold, t > threshold))
            .collect();
        let counts = cells
            .par_iter()
            .fold(ClassCounts::default, |acc, &class| acc.add(class))
            .reduce(ClassCounts::default, ClassCounts::merge);

        Ok(Classification {
            width: small_w,
            height: small_h,
            cells,
            counts,
        })
    }

    /// Blows the grid up to `width`×`height` without smoothing.
    pub fn render(&self, classification: &Classification, width: u32, height: u32) -> Result<RgbaImage> {
        resample::resize_rgba(&classification.to_image(), width, height, Filter::Nearest)
    }

    /// Percentage text in the top-left corner.
    pub fn draw_label(&self, image: &mut RgbaImage, score: &ScoreResult) {
        if !self.cfg.draw_label {
            return;
        }
        glyphs::draw_label(
            image,
            &score.display_text(),
            LABEL_MARGIN,
            LABEL_MARGIN,
            self.cfg.label_scale,
        );
    }

    /// Classify, render at output size and label. With `mirror` the grid is
    /// flipped while the text stays readable.
    pub fn score(
        &self,
        live: &GrayImage,
        target: &GrayImage,
        out_width: u32,
        out_height: u32,
        mirror: bool,
    ) -> Result<DifferenceOutput> {
        let classification = self.classify(live, target)?;
        let score = classification.score();
        let mut visualization = self.render(&classification, out_width, out_height)?;
        if mirror {
            imageops::flip_horizontal_in_place(&mut visualization);
        }
        self.draw_label(&mut visualization, &score);
        Ok(DifferenceOutput {
            score,
            visualization,
        })
    }
}
