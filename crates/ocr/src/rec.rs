//! 文字识别模块
//!
//! 单张图像的完整流程：等比例缩放 → 打包 tensor → 推理 → CTC 解码。

use image::DynamicImage;
use std::path::Path;
use std::time::Instant;

use crate::backend::{InferenceBackend, OnnxBackend};
use crate::config::ModelConfig;
use crate::ctc::{CtcDecoder, Recognition};
use crate::error::OcrError;
use crate::preprocess::{self, ResizeOptions};
use crate::vocab::Vocabulary;

/// 文字识别器
///
/// 字符集和推理后端在构造时注入，识别过程不保留任何请求状态。
pub struct TextRecognizer<B> {
    backend: B,
    vocab: Vocabulary,
    decoder: CtcDecoder,
    resize: ResizeOptions,
}

impl TextRecognizer<OnnxBackend> {
    /// 按配置加载字符集和 ONNX 模型
    pub fn from_config(config: &ModelConfig) -> Result<Self, OcrError> {
        let vocab = config.vocabulary()?;
        log::info!("[OCR] 加载字符集: {} 个字符", vocab.len());

        let model_path = config.onnx_model_path();
        log::info!("[OCR] 加载识别模型: {}", model_path.display());
        let backend = OnnxBackend::new(&model_path, config.input_shape())?;

        Ok(Self::new(backend, vocab)
            .with_decoder(config.decoder())
            .with_resize_options(config.resize_options()))
    }
}

impl<B: InferenceBackend> TextRecognizer<B> {
    pub fn new(backend: B, vocab: Vocabulary) -> Self {
        Self {
            backend,
            vocab,
            decoder: CtcDecoder::default(),
            resize: ResizeOptions::default(),
        }
    }

    pub fn with_decoder(mut self, decoder: CtcDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_resize_options(mut self, resize: ResizeOptions) -> Self {
        self.resize = resize;
        self
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// 识别单张图像中的文字
    pub fn recognize(&mut self, img: &DynamicImage) -> Result<String, OcrError> {
        Ok(self.recognize_with_confidence(img)?.text)
    }

    /// 识别单张图像，同时返回置信度
    pub fn recognize_with_confidence(&mut self, img: &DynamicImage) -> Result<Recognition, OcrError> {
        let start = Instant::now();
        let shape = *self.backend.input_shape();

        let resized =
            preprocess::resize_maintaining_aspect_ratio(img, shape.width, shape.height, &self.resize)?;
        let input = preprocess::to_input_tensor(&resized, &shape)?;

        let output = self
            .backend
            .infer(input)
            .map_err(OcrError::InferenceBackend)?;
        if output.shape()[0] > 1 {
            log::warn!("[OCR] 推理输出 batch 为 {}，只使用第一个样本", output.shape()[0]);
        }
        let matrix = output
            .outer_iter()
            .next()
            .ok_or_else(|| OcrError::InvalidPrediction("推理输出 batch 为空".to_string()))?;

        let result = self.decoder.decode(matrix, &self.vocab)?;

        log::debug!("[OCR] 识别结果: \"{}\" (置信度: {:.2})", result.text, result.confidence);
        log::info!("[OCR] 识别耗时: {} ms", start.elapsed().as_millis());
        Ok(result)
    }

    /// 识别上传的图像数据（PNG、JPEG 等编码格式）
    pub fn recognize_bytes(&mut self, bytes: &[u8]) -> Result<String, OcrError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| OcrError::InvalidImage(format!("解码图片失败: {}", e)))?;
        self.recognize(&img)
    }

    /// 识别图片文件中的文字
    pub fn recognize_file(&mut self, image_path: &Path) -> Result<String, OcrError> {
        let img = image::open(image_path)
            .map_err(|e| OcrError::InvalidImage(format!("打开图片失败: {}", e)))?;
        self.recognize(&img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InputShape;
    use crate::ctc::{BlankIndex, DecodeMethod};
    use crate::error::BackendError;
    use image::{ImageBuffer, Rgb};
    use ndarray::{Array3, Array4};
    use std::error::Error as _;

    /// 每帧在 `peaks[t]` 处输出最大 logit
    struct PeakBackend {
        shape: InputShape,
        peaks: Vec<usize>,
        classes: usize,
        calls: usize,
        input_dims: Option<Vec<usize>>,
    }

    impl PeakBackend {
        fn new(peaks: &[usize], classes: usize) -> Self {
            Self {
                shape: InputShape::new(128, 32),
                peaks: peaks.to_vec(),
                classes,
                calls: 0,
                input_dims: None,
            }
        }
    }

    impl InferenceBackend for PeakBackend {
        fn input_shape(&self) -> &InputShape {
            &self.shape
        }

        fn infer(&mut self, input: Array4<f32>) -> Result<Array3<f32>, BackendError> {
            self.calls += 1;
            self.input_dims = Some(input.shape().to_vec());
            let mut output = Array3::<f32>::zeros((1, self.peaks.len(), self.classes));
            for (t, &c) in self.peaks.iter().enumerate() {
                output[[0, t, c]] = 5.0;
            }
            Ok(output)
        }
    }

    struct FailingBackend {
        shape: InputShape,
    }

    impl InferenceBackend for FailingBackend {
        fn input_shape(&self) -> &InputShape {
            &self.shape
        }

        fn infer(&mut self, _input: Array4<f32>) -> Result<Array3<f32>, BackendError> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "session crashed").into())
        }
    }

    fn word_image() -> DynamicImage {
        // 40 高 x 120 宽
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(120, 40, |x, _| {
            if x % 10 < 3 {
                Rgb([20, 20, 20])
            } else {
                Rgb([240, 240, 240])
            }
        }))
    }

    fn hi_vocab() -> Vocabulary {
        // 5 -> 'h', 7 -> '!', 12 -> 'i'
        Vocabulary::from_chars("_abcdhg!efjki").unwrap()
    }

    #[test]
    fn test_end_to_end_word() {
        let vocab = hi_vocab();
        assert_eq!(
            (vocab.get(5), vocab.get(7), vocab.get(12)),
            (Some("h"), Some("!"), Some("i"))
        );

        let mut backend = PeakBackend::new(&[5, 5, 0, 12, 12, 12, 0, 7], 13);
        let text = {
            let mut recognizer = TextRecognizer::new(&mut backend, vocab)
                .with_decoder(CtcDecoder::new().with_blank(BlankIndex::At(0)));
            recognizer.recognize(&word_image()).unwrap()
        };

        assert_eq!(text, "hi!");
        assert_eq!(backend.calls, 1);
        assert_eq!(backend.input_dims, Some(vec![1, 32, 128, 3]));
    }

    #[test]
    fn test_beam_search_is_selectable() {
        let backend = PeakBackend::new(&[5, 5, 0, 12, 12, 12, 0, 7], 13);
        let decoder = CtcDecoder::new()
            .with_blank(BlankIndex::At(0))
            .with_method(DecodeMethod::BeamSearch { width: 4 });
        let mut recognizer = TextRecognizer::new(backend, hi_vocab()).with_decoder(decoder);

        let result = recognizer.recognize_with_confidence(&word_image()).unwrap();
        assert_eq!(result.text, "hi!");
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn test_boxed_backend() {
        let backend: Box<dyn InferenceBackend> = Box::new(PeakBackend::new(&[1, 2, 0], 3));
        let mut recognizer = TextRecognizer::new(backend, Vocabulary::from_chars("_xy").unwrap())
            .with_decoder(CtcDecoder::new().with_blank(BlankIndex::At(0)));
        assert_eq!(recognizer.recognize(&word_image()).unwrap(), "xy");
    }

    #[test]
    fn test_invalid_image_skips_backend() {
        let mut backend = PeakBackend::new(&[0], 2);
        let err = {
            let mut recognizer = TextRecognizer::new(&mut backend, Vocabulary::from_chars("x").unwrap());
            recognizer.recognize(&DynamicImage::new_rgb8(0, 0)).unwrap_err()
        };
        assert!(matches!(err, OcrError::InvalidImage(_)));
        assert_eq!(backend.calls, 0);
    }

    #[test]
    fn test_backend_failure_is_wrapped() {
        let backend = FailingBackend {
            shape: InputShape::new(64, 16),
        };
        let mut recognizer = TextRecognizer::new(backend, Vocabulary::from_chars("x").unwrap());
        let err = recognizer.recognize(&word_image()).unwrap_err();

        assert!(matches!(err, OcrError::InferenceBackend(_)));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("session crashed"));
    }

    #[test]
    fn test_vocabulary_mismatch_propagates() {
        let backend = PeakBackend::new(&[0, 3], 4);
        let mut recognizer = TextRecognizer::new(backend, Vocabulary::from_chars("ab").unwrap());
        let err = recognizer.recognize(&word_image()).unwrap_err();
        assert!(matches!(err, OcrError::InvalidVocabulary { index: 3, len: 2 }));
    }

    #[test]
    fn test_recognize_encoded_bytes() {
        let mut encoded = std::io::Cursor::new(Vec::new());
        word_image()
            .write_to(&mut encoded, image::ImageFormat::Png)
            .unwrap();

        let backend = PeakBackend::new(&[5, 0, 12], 13);
        let mut recognizer = TextRecognizer::new(backend, hi_vocab())
            .with_decoder(CtcDecoder::new().with_blank(BlankIndex::At(0)));
        assert_eq!(recognizer.recognize_bytes(encoded.get_ref()).unwrap(), "hi");

        let err = recognizer.recognize_bytes(b"not an image").unwrap_err();
        assert!(matches!(err, OcrError::InvalidImage(_)));
    }

    #[test]
    fn test_recognize_missing_file() {
        let backend = PeakBackend::new(&[0], 2);
        let mut recognizer = TextRecognizer::new(backend, Vocabulary::from_chars("x").unwrap());
        let err = recognizer
            .recognize_file(Path::new("/nonexistent/scribble.png"))
            .unwrap_err();
        assert!(matches!(err, OcrError::InvalidImage(_)));
    }
}
