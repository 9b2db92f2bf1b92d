//! 字符集
//!
//! 类别索引 i 对应字符集第 i 项。加载后不可变，克隆只增加引用计数。

use std::path::Path;
use std::sync::Arc;

use crate::error::OcrError;

/// 有序字符集
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    symbols: Arc<[String]>,
}

impl Vocabulary {
    /// 每个字符作为一个类别，例如 mltu 配置中的 `vocab` 字符串
    pub fn from_chars(chars: &str) -> Result<Self, OcrError> {
        Self::from_symbols(chars.chars().map(String::from).collect())
    }

    pub fn from_symbols(symbols: Vec<String>) -> Result<Self, OcrError> {
        if symbols.is_empty() {
            return Err(OcrError::Config("字符集为空".to_string()));
        }
        Ok(Self {
            symbols: symbols.into(),
        })
    }

    /// 从字典文件加载，每行一个符号
    pub fn load(path: &Path) -> Result<Self, OcrError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OcrError::ModelLoad(format!("加载字符集失败: {}", e)))?;
        let symbols: Vec<String> = content
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        Self::from_symbols(symbols)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.symbols.get(index).map(String::as_str)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}
