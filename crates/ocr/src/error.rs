//! OCR 错误类型

use thiserror::Error;

/// 推理后端返回的错误
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("无效图像: {0}")]
    InvalidImage(String),

    #[error("字符集与模型不匹配: 类别索引 {index} 超出字符集范围 (长度 {len})")]
    InvalidVocabulary { index: usize, len: usize },

    #[error("无效的预测矩阵: {0}")]
    InvalidPrediction(String),

    #[error("推理失败: {0}")]
    InferenceBackend(#[source] BackendError),

    #[error("模型加载失败: {0}")]
    ModelLoad(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}
