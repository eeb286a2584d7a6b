use std::sync::Arc;

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::PreprocessError;
use crate::ingest::Subject;

/// Edge length the classifier expects on both axes.
pub const INPUT_SIZE: u32 = 224;

const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

static EMOJI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        "[",
        r"\x{1F600}-\x{1F64F}",
        r"\x{1F300}-\x{1F5FF}",
        r"\x{1F680}-\x{1F6FF}",
        r"\x{1F1E0}-\x{1F1FF}",
        r"\x{2700}-\x{27BF}",
        r"\x{1F900}-\x{1F9FF}",
        r"\x{2600}-\x{26FF}",
        r"\x{2B00}-\x{2BFF}",
        r"\x{1FA70}-\x{1FAFF}",
        "]+"
    ))
    .unwrap()
});
static NOT_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SINGLE_CHAR_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\b").unwrap());
static NOT_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Normalizes text read off an image before it reaches the classifier.
///
/// Rules apply in a fixed order: emoji are stripped, the text is lowercased
/// and trimmed, anything outside `a-z`, `0-9` and whitespace is dropped,
/// whitespace runs collapse to one space and single-character words are
/// removed. Removing a word leaves its surrounding spaces in place.
pub fn preprocess_text(text: &str) -> String {
    let text = EMOJI.replace_all(text, "");
    let text = text.to_lowercase();
    let text = NOT_ALPHANUMERIC.replace_all(text.trim(), "");
    let text = WHITESPACE_RUN.replace_all(&text, " ");
    let text = SINGLE_CHAR_WORD.replace_all(&text, "");
    NOT_WORD.replace_all(&text, "").into_owned()
}

/// Text read off the subject, raw and normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedText {
    pub raw: String,
    pub normalized: String,
}

impl ExtractedText {
    /// Joins recognized segments with single spaces, then normalizes.
    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Self {
        let raw = segments
            .iter()
            .map(|segment| segment.as_ref())
            .collect::<Vec<_>>()
            .join(" ");
        let normalized = preprocess_text(&raw);
        Self { raw, normalized }
    }
}

/// Reads text segments off an image during the Text Processing stage.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, subject: &Subject) -> Result<Vec<String>, PreprocessError>;
}

/// Extractor for deployments without OCR. Always reads no text.
pub struct NoTextExtractor;

#[async_trait]
impl TextExtractor for NoTextExtractor {
    fn name(&self) -> &'static str {
        "NoTextExtractor"
    }

    async fn extract(&self, _subject: &Subject) -> Result<Vec<String>, PreprocessError> {
        Ok(Vec::new())
    }
}

/// Normalized RGB planes in `[batch, channel, height, width]` order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value at channel `c`, row `y`, column `x` of the single batch entry.
    pub fn get(&self, c: usize, y: usize, x: usize) -> Option<f32> {
        let [_, channels, height, width] = self.shape;
        if c >= channels || y >= height || x >= width {
            return None;
        }
        self.data.get((c * height + y) * width + x).copied()
    }
}

/// Decodes `bytes`, resizes to [`INPUT_SIZE`] squared and normalizes each
/// channel with the ImageNet mean and standard deviation.
pub fn preprocess_image(bytes: &[u8]) -> Result<ImageTensor, PreprocessError> {
    let rgb = image::load_from_memory(bytes)
        .map_err(|e| PreprocessError::Decode(e.to_string()))?
        .to_rgb8();
    let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let side = INPUT_SIZE as usize;
    let plane = side * side;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = y as usize * side + x as usize;
        for c in 0..3 {
            let value = f32::from(pixel[c]) / 255.0;
            data[c * plane + offset] = (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
        }
    }

    Ok(ImageTensor {
        shape: [1, 3, side, side],
        data,
    })
}

/// What the Visual Analysis and Text Processing stages hand to the scorer.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub subject: Subject,
    pub image: Arc<ImageTensor>,
    pub text: ExtractedText,
}

impl PreparedInput {
    pub fn summary(&self) -> InputSummary {
        InputSummary {
            text: self.text.raw.clone(),
            preprocessed_text: self.text.normalized.clone(),
            image_tensor_shape: self.image.shape(),
        }
    }
}

/// The preprocessing facts reported alongside a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSummary {
    pub text: String,
    pub preprocessed_text: String,
    pub image_tensor_shape: [usize; 4],
}

/// Encodes a solid-colour PNG, for tests that need bytes that decode.
#[cfg(test)]
pub(crate) fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_are_stripped() {
        assert_eq!(preprocess_text("when the code works 😂🔥"), "when the code works");
        assert_eq!(preprocess_text("☀ sunny 🇵🇭 day"), "sunny day");
    }

    #[test]
    fn text_is_lowercased_and_trimmed() {
        assert_eq!(preprocess_text("  HELLO World  "), "hello world");
    }

    #[test]
    fn punctuation_is_dropped() {
        assert_eq!(preprocess_text("Wait... WHAT?!"), "wait what");
        assert_eq!(preprocess_text("it's 100% real"), "its 100 real");
    }

    #[test]
    fn whitespace_runs_collapse() {
        assert_eq!(preprocess_text("too\t\tmany\n\nspaces"), "too many spaces");
    }

    #[test]
    fn single_character_words_are_removed() {
        assert_eq!(preprocess_text("i am a cat"), " am  cat");
        assert_eq!(preprocess_text("x"), "");
        assert_eq!(preprocess_text("top 5 memes"), "top  memes");
    }

    #[test]
    fn non_latin_letters_are_dropped() {
        assert_eq!(preprocess_text("café mañana"), "caf maana");
    }

    #[test]
    fn segments_are_joined_before_normalizing() {
        let text = ExtractedText::from_segments(&["WHEN YOU", "see it 👀"]);
        assert_eq!(text.raw, "WHEN YOU see it 👀");
        assert_eq!(text.normalized, "when you see it");
        assert_eq!(ExtractedText::from_segments::<&str>(&[]), ExtractedText::default());
    }

    #[test]
    fn image_becomes_a_normalized_batch_of_one() {
        let tensor = preprocess_image(&solid_png(40, 30, [255, 0, 128])).expect("decodes");
        assert_eq!(tensor.shape(), [1, 3, 224, 224]);
        assert_eq!(tensor.data().len(), 3 * 224 * 224);

        let expected = [
            (1.0 - 0.485) / 0.229,
            (0.0 - 0.456) / 0.224,
            (128.0 / 255.0 - 0.406) / 0.225,
        ];
        for (c, value) in expected.iter().enumerate() {
            for (y, x) in [(0, 0), (111, 57), (223, 223)] {
                let actual = tensor.get(c, y, x).expect("in bounds");
                assert!((actual - value).abs() < 1e-4, "channel {c}: {actual} vs {value}");
            }
        }
        assert_eq!(tensor.get(3, 0, 0), None);
        assert_eq!(tensor.get(0, 224, 0), None);
    }

    #[test]
    fn undecodable_bytes_are_an_error() {
        let err = preprocess_image(&[0x89, b'P', b'N', b'G']).unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }

    #[tokio::test]
    async fn no_text_extractor_reads_nothing() {
        let mut controller = crate::ingest::IngestionController::default();
        controller.select_file(crate::ingest::ImageFile::new(
            "meme.png",
            "image/png",
            solid_png(2, 2, [0, 0, 0]),
        ));
        let subject = controller.subject().cloned().expect("subject");
        let segments = NoTextExtractor.extract(&subject).await.expect("never fails");
        assert!(segments.is_empty());
    }
}
