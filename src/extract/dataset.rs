//! FaceForensics++ source layout and extracted-corpus statistics.

use std::path::{Path, PathBuf};

use super::{ExtractionReport, FrameExtractor};
use crate::discovery::{discover_files, IMAGE_EXTENSIONS};
use crate::error::Result;
use crate::faces::FaceDetect;
use crate::label::Label;
use crate::video::VideoBackend;

/// Manipulation methods shipped with FaceForensics++.
pub const MANIPULATION_METHODS: &[&str] = &["Deepfakes", "Face2Face", "FaceSwap", "NeuralTextures"];

const COMPRESSION: &str = "c23";

/// Video directories of a FaceForensics++ download, with their label.
pub fn faceforensics_sources(dataset_root: &Path) -> Vec<(PathBuf, Label)> {
    let mut sources: Vec<(PathBuf, Label)> = MANIPULATION_METHODS
        .iter()
        .map(|method| {
            let dir = dataset_root
                .join("manipulated_sequences")
                .join(method)
                .join(COMPRESSION)
                .join("videos");
            (dir, Label::Fake)
        })
        .collect();

    sources.push((
        dataset_root
            .join("original_sequences")
            .join("youtube")
            .join(COMPRESSION)
            .join("videos"),
        Label::Real,
    ));

    sources
}

impl<D: FaceDetect, B: VideoBackend> FrameExtractor<D, B> {
    /// Extract every manipulated and original sequence of a FaceForensics++
    /// dataset. Missing method directories are warned about and skipped.
    pub fn extract_faceforensics(&mut self, dataset_root: &Path, sample_count: usize) -> Result<ExtractionReport> {
        let mut report = ExtractionReport::default();

        for (dir, label) in faceforensics_sources(dataset_root) {
            tracing::info!(directory = %dir.display(), label = %label, "Extracting sequences");
            let part = self.extract_directory(&dir, label, sample_count)?;
            report.merge(&part);
        }

        let stats = corpus_stats(self.output_root());
        tracing::info!(
            real = stats.real,
            fake = stats.fake,
            total = stats.total(),
            balance = stats.balance_ratio(),
            videos_processed = report.videos_processed,
            videos_skipped = report.videos_skipped,
            "Extraction complete"
        );

        Ok(report)
    }
}

/// Images per class in an extracted corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub real: usize,
    pub fake: usize,
}

impl CorpusStats {
    pub fn total(&self) -> usize {
        self.real + self.fake
    }

    /// REAL/FAKE ratio; 0 when there are no FAKE images.
    pub fn balance_ratio(&self) -> f64 {
        if self.fake == 0 {
            0.0
        } else {
            self.real as f64 / self.fake as f64
        }
    }
}

pub fn corpus_stats(root: &Path) -> CorpusStats {
    let count = |label: Label| discover_files(&root.join(label.dir_name()), IMAGE_EXTENSIONS, false).len();
    CorpusStats {
        real: count(Label::Real),
        fake: count(Label::Fake),
    }
}
