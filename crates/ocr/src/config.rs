//! 模型配置
//!
//! 兼容 mltu 训练时导出的 `configs.yaml`，也支持 JSON。未识别的字段（学习率、批大小等训练参数）会被忽略。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backend::{ChannelOrder, InputShape, TensorLayout};
use crate::ctc::{BlankIndex, CtcDecoder, DecodeMethod, ScoreKind};
use crate::error::OcrError;
use crate::preprocess::{Placement, ResizeOptions};
use crate::vocab::Vocabulary;

/// 目录形式的 `model_path` 下默认的模型文件名
const DEFAULT_MODEL_FILE: &str = "model.onnx";

/// 识别模型配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// ONNX 模型文件，或包含 `model.onnx` 的目录
    pub model_path: PathBuf,
    /// 字符集，每个字符对应一个类别
    #[serde(default)]
    pub vocab: String,
    /// 字典文件（每行一个符号），设置后优先于 `vocab`
    #[serde(default)]
    pub vocab_path: Option<PathBuf>,
    /// 模型输入高度
    pub height: u32,
    /// 模型输入宽度
    pub width: u32,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default)]
    pub layout: TensorLayout,
    #[serde(default)]
    pub channel_order: ChannelOrder,
    /// 空白符索引，不设置时为字符集长度
    #[serde(default)]
    pub blank_index: Option<usize>,
    /// 设置后使用束搜索解码
    #[serde(default)]
    pub beam_width: Option<usize>,
    /// 模型输出的得分类型，mltu 导出的模型末层为 softmax
    #[serde(default = "default_scores")]
    pub scores: ScoreKind,
    #[serde(default)]
    pub placement: Placement,
    /// 填充颜色 (RGB)
    #[serde(default)]
    pub pad_color: [u8; 3],
}

fn default_channels() -> usize {
    3
}

fn default_scores() -> ScoreKind {
    ScoreKind::Probabilities
}

impl ModelConfig {
    /// 从文件加载，按扩展名选择 YAML 或 JSON
    ///
    /// 相对路径按配置文件所在目录解析。
    pub fn load(path: &Path) -> Result<Self, OcrError> {
        let raw = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let mut config = match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml(&raw)?,
            Some("json") => Self::from_json(&raw)?,
            _ => {
                return Err(OcrError::Config(format!(
                    "不支持的配置文件格式: {}",
                    path.display()
                )))
            }
        };

        if let Some(base) = path.parent() {
            config.model_path = resolve(base, &config.model_path);
            config.vocab_path = config.vocab_path.map(|p| resolve(base, &p));
        }

        log::info!("[OCR] 加载配置: {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, OcrError> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| OcrError::Config(format!("解析 YAML 失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, OcrError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| OcrError::Config(format!("解析 JSON 失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), OcrError> {
        if self.width == 0 || self.height == 0 {
            return Err(OcrError::Config(format!(
                "模型输入尺寸无效: {}x{}",
                self.width, self.height
            )));
        }
        if self.channels != 1 && self.channels != 3 {
            return Err(OcrError::Config(format!("不支持的通道数: {}", self.channels)));
        }
        if self.vocab.is_empty() && self.vocab_path.is_none() {
            return Err(OcrError::Config("未配置字符集".to_string()));
        }
        Ok(())
    }

    /// 实际的 ONNX 文件路径
    ///
    /// 目录取其中的 `model.onnx`，Keras 的 `.h5` 路径换成同名 `.onnx`。
    pub fn onnx_model_path(&self) -> PathBuf {
        if self.model_path.is_dir() {
            return self.model_path.join(DEFAULT_MODEL_FILE);
        }
        match self.model_path.extension().and_then(|ext| ext.to_str()) {
            Some("h5") => self.model_path.with_extension("onnx"),
            _ => self.model_path.clone(),
        }
    }

    pub fn input_shape(&self) -> InputShape {
        InputShape {
            width: self.width,
            height: self.height,
            channels: self.channels,
            layout: self.layout,
            channel_order: self.channel_order,
        }
    }

    pub fn vocabulary(&self) -> Result<Vocabulary, OcrError> {
        match &self.vocab_path {
            Some(path) => Vocabulary::load(path),
            None => Vocabulary::from_chars(&self.vocab),
        }
    }

    pub fn decoder(&self) -> CtcDecoder {
        let blank = self.blank_index.map(BlankIndex::At).unwrap_or_default();
        let method = self
            .beam_width
            .map(|width| DecodeMethod::BeamSearch { width })
            .unwrap_or_default();
        CtcDecoder::new()
            .with_blank(blank)
            .with_method(method)
            .with_scores(self.scores)
    }

    pub fn resize_options(&self) -> ResizeOptions {
        ResizeOptions {
            placement: self.placement,
            fill: self.pad_color,
        }
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MLTU_YAML: &str = r#"
model_path: Models/Sentence/202301131202
vocab: " !abc"
height: 96
width: 1408
max_text_length: 93
batch_size: 32
learning_rate: 0.0005
train_epochs: 1000
"#;

    #[test]
    fn test_parse_mltu_yaml_with_defaults() {
        let config = ModelConfig::from_yaml(MLTU_YAML).unwrap();
        assert_eq!(config.height, 96);
        assert_eq!(config.width, 1408);
        assert_eq!(config.channels, 3);
        assert_eq!(config.layout, TensorLayout::Nhwc);
        assert_eq!(config.channel_order, ChannelOrder::Bgr);
        assert_eq!(config.placement, Placement::Center);
        assert_eq!(config.pad_color, [0, 0, 0]);
        assert_eq!(config.scores, ScoreKind::Probabilities);

        let vocab = config.vocabulary().unwrap();
        assert_eq!(vocab.len(), 5);
        assert_eq!(vocab.get(0), Some(" "));
        assert_eq!(config.decoder().method(), DecodeMethod::Greedy);
    }

    #[test]
    fn test_parse_json_with_overrides() {
        let raw = r#"{
            "model_path": "model.onnx",
            "vocab": "_abcdefghijklmnopqrstuvwxyz",
            "height": 32,
            "width": 128,
            "channels": 1,
            "layout": "nchw",
            "channel_order": "rgb",
            "blank_index": 0,
            "beam_width": 8,
            "scores": "logits",
            "placement": "top_left",
            "pad_color": [127, 127, 127]
        }"#;
        let config = ModelConfig::from_json(raw).unwrap();
        let shape = config.input_shape();
        assert_eq!(shape.tensor_dims(), [1, 1, 32, 128]);
        assert_eq!(shape.channel_order, ChannelOrder::Rgb);
        assert_eq!(config.decoder().method(), DecodeMethod::BeamSearch { width: 8 });
        assert_eq!(
            config.resize_options(),
            ResizeOptions {
                placement: Placement::TopLeft,
                fill: [127, 127, 127],
            }
        );
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let zero = "model_path: m.onnx\nvocab: ab\nheight: 0\nwidth: 10\n";
        assert!(matches!(ModelConfig::from_yaml(zero), Err(OcrError::Config(_))));

        let channels = "model_path: m.onnx\nvocab: ab\nheight: 10\nwidth: 10\nchannels: 4\n";
        assert!(matches!(ModelConfig::from_yaml(channels), Err(OcrError::Config(_))));

        let no_vocab = "model_path: m.onnx\nheight: 10\nwidth: 10\n";
        assert!(matches!(ModelConfig::from_yaml(no_vocab), Err(OcrError::Config(_))));

        assert!(matches!(ModelConfig::from_json("{"), Err(OcrError::Config(_))));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("weights");
        fs::create_dir(&model_dir).unwrap();
        fs::write(dir.path().join("dict.txt"), "a\nb\n").unwrap();

        let config_path = dir.path().join("configs.yaml");
        fs::write(
            &config_path,
            "model_path: weights\nvocab_path: dict.txt\nheight: 32\nwidth: 128\n",
        )
        .unwrap();

        let config = ModelConfig::load(&config_path).unwrap();
        assert_eq!(config.model_path, model_dir);
        assert_eq!(config.onnx_model_path(), model_dir.join("model.onnx"));
        assert_eq!(config.vocabulary().unwrap().symbols(), &["a", "b"]);
    }

    #[test]
    fn test_h5_path_maps_to_onnx() {
        let raw = "model_path: /models/line/model.h5\nvocab: ab\nheight: 32\nwidth: 128\n";
        let config = ModelConfig::from_yaml(raw).unwrap();
        assert_eq!(config.onnx_model_path(), PathBuf::from("/models/line/model.onnx"));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configs.toml");
        fs::write(&path, "").unwrap();
        assert!(matches!(ModelConfig::load(&path), Err(OcrError::Config(_))));
    }
}
