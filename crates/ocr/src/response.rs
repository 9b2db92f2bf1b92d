//! 对外返回的 JSON 结构：成功为 `{"prediction": ...}`，失败为 `{"error": ...}`

use serde::{Deserialize, Serialize};

use crate::error::OcrError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionResponse {
    Prediction(String),
    Error(String),
}

impl PredictionResponse {
    pub fn to_json(&self) -> String {
        // 只含字符串字段，序列化不会失败
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

impl From<Result<String, OcrError>> for PredictionResponse {
    fn from(result: Result<String, OcrError>) -> Self {
        match result {
            Ok(text) => PredictionResponse::Prediction(text),
            Err(err) => {
                log::warn!("[OCR] 识别失败: {}", err);
                PredictionResponse::Error(err.to_string())
            }
        }
    }
}
