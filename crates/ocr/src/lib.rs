//! 手写文字识别
//!
//! 基于 ONNX Runtime 的单行/单词识别库：等比例缩放图像，送入识别网络，
//! 再用 CTC 解码得到文本。
//!
//! ```no_run
//! use scribble_ocr::{ModelConfig, TextRecognizer};
//! use std::path::Path;
//!
//! let config = ModelConfig::load(Path::new("Models/Sentence/configs.yaml"))?;
//! let mut recognizer = TextRecognizer::from_config(&config)?;
//! let text = recognizer.recognize_file(Path::new("word.png"))?;
//! println!("{}", text);
//! # Ok::<(), scribble_ocr::OcrError>(())
//! ```

mod backend;
mod config;
mod ctc;
mod error;
mod metrics;
mod preprocess;
mod rec;
mod response;
mod threading;
mod vocab;

pub use backend::{ChannelOrder, InferenceBackend, InputShape, OnnxBackend, TensorLayout};
pub use config::ModelConfig;
pub use ctc::{ctc_decode, BlankIndex, CtcDecoder, DecodeMethod, Recognition, ScoreKind};
pub use error::{BackendError, OcrError};
pub use metrics::{cer, edit_distance, wer};
pub use preprocess::{
    resize_maintaining_aspect_ratio, scale_factor, to_input_tensor, Placement, ResizeOptions,
};
pub use rec::TextRecognizer;
pub use response::PredictionResponse;
pub use threading::thread_settings;
pub use vocab::Vocabulary;

/// 检查配置中的模型文件是否存在
pub fn is_model_installed(config: &ModelConfig) -> bool {
    config.onnx_model_path().is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_not_installed() {
        let raw = "model_path: /nonexistent/model.onnx\nvocab: ab\nheight: 32\nwidth: 128\n";
        let config = ModelConfig::from_yaml(raw).unwrap();
        assert!(!is_model_installed(&config));
    }

    #[test]
    fn test_installed_model_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"onnx").unwrap();
        let raw = format!(
            "model_path: {}\nvocab: ab\nheight: 32\nwidth: 128\n",
            dir.path().display()
        );
        let config = ModelConfig::from_yaml(&raw).unwrap();
        assert!(is_model_installed(&config));
    }

    #[test]
    fn test_shared_types_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Vocabulary>();
        assert_send_sync::<CtcDecoder>();
        assert_send_sync::<OcrError>();
    }
}
