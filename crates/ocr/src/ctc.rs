//! CTC 解码
//!
//! 将逐帧类别得分 (T, C) 还原为字符序列：合并连续重复的类别，去掉空白符。
//! 支持贪心解码和前缀束搜索两种方式，两者的合并规则一致。

use ndarray::{ArrayView1, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::OcrError;
use crate::vocab::Vocabulary;

/// 判断一行得分是否已经是概率分布的容差
const PROB_SUM_TOLERANCE: f32 = 1e-3;

/// 空白符所在的类别索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlankIndex {
    /// 字符集长度 V，即最后一个类别
    #[default]
    Last,
    /// 指定索引，字符集在该位置放占位符
    At(usize),
}

impl BlankIndex {
    pub fn resolve(self, vocab_len: usize) -> usize {
        match self {
            BlankIndex::Last => vocab_len,
            BlankIndex::At(index) => index,
        }
    }
}

/// 解码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMethod {
    /// 每帧取最大类别
    #[default]
    Greedy,
    /// 前缀束搜索，保留 `width` 个候选前缀
    BeamSearch { width: usize },
}

/// 模型输出的得分类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    /// 逐行判断：非负且和为 1 (容差 1e-3) 视为概率，否则视为 logits
    ///
    /// 恰好满足该条件的 logits 会被误判，例如 `[0.0, 1.0]` 按概率处理时置信度为 1.0，
    /// 按 logits 处理应为 0.731。已知输出类型时应显式指定。
    #[default]
    Auto,
    Logits,
    Probabilities,
}

/// 单个样本的解码结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub text: String,
    /// 贪心解码：所选路径上各帧概率的平均值；束搜索：最优前缀的路径概率
    pub confidence: f32,
}

impl Recognition {
    fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
        }
    }
}

/// CTC 解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct CtcDecoder {
    blank: BlankIndex,
    method: DecodeMethod,
    scores: ScoreKind,
}

impl CtcDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blank(mut self, blank: BlankIndex) -> Self {
        self.blank = blank;
        self
    }

    pub fn with_method(mut self, method: DecodeMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_scores(mut self, scores: ScoreKind) -> Self {
        self.scores = scores;
        self
    }

    pub fn method(&self) -> DecodeMethod {
        self.method
    }

    /// 批量解码 (N, T, C)，每个样本返回一个结果
    pub fn decode_batch(
        &self,
        predictions: ArrayView3<f32>,
        vocab: &Vocabulary,
    ) -> Result<Vec<Recognition>, OcrError> {
        predictions
            .outer_iter()
            .map(|matrix| self.decode(matrix, vocab))
            .collect()
    }

    /// 解码单个样本 (T, C)
    pub fn decode(&self, matrix: ArrayView2<f32>, vocab: &Vocabulary) -> Result<Recognition, OcrError> {
        let (steps, classes) = matrix.dim();
        if steps == 0 {
            return Ok(Recognition::empty());
        }
        if classes == 0 {
            return Err(OcrError::InvalidPrediction(format!("{} 帧但类别数为 0", steps)));
        }

        let blank = self.blank.resolve(vocab.len());
        match self.method {
            DecodeMethod::Greedy => self.decode_greedy(matrix, vocab, blank),
            DecodeMethod::BeamSearch { width } => self.decode_beam(matrix, vocab, blank, width.max(1)),
        }
    }

    fn decode_greedy(
        &self,
        matrix: ArrayView2<f32>,
        vocab: &Vocabulary,
        blank: usize,
    ) -> Result<Recognition, OcrError> {
        let mut labels = Vec::new();
        let mut confidence_sum = 0.0f32;
        let mut last_idx: Option<usize> = None;

        for row in matrix.rows() {
            let max_idx = argmax(row);
            confidence_sum += self.probabilities(row)[max_idx];

            if max_idx != blank && Some(max_idx) != last_idx {
                labels.push(max_idx);
            }
            last_idx = Some(max_idx);
        }

        Ok(Recognition {
            text: labels_to_text(&labels, vocab)?,
            confidence: confidence_sum / matrix.nrows() as f32,
        })
    }

    fn decode_beam(
        &self,
        matrix: ArrayView2<f32>,
        vocab: &Vocabulary,
        blank: usize,
        width: usize,
    ) -> Result<Recognition, OcrError> {
        let mut beams: Vec<(Vec<usize>, Beam)> = vec![(Vec::new(), Beam::START)];

        for row in matrix.rows() {
            let log_probs: Vec<f32> = self.probabilities(row).into_iter().map(f32::ln).collect();
            let candidates = top_classes(&log_probs, width, blank);

            let mut next: HashMap<Vec<usize>, Beam> = HashMap::new();
            for (prefix, beam) in &beams {
                let total = beam.total();
                for &c in &candidates {
                    let lp = log_probs[c];
                    if lp == f32::NEG_INFINITY {
                        continue;
                    }

                    if c == blank {
                        let entry = next.entry(prefix.clone()).or_insert(Beam::EMPTY);
                        entry.blank = log_add(entry.blank, total + lp);
                        continue;
                    }

                    let mut extended = prefix.clone();
                    extended.push(c);
                    if prefix.last() == Some(&c) {
                        // 相同字符只有隔着空白才能再次输出
                        let entry = next.entry(extended).or_insert(Beam::EMPTY);
                        entry.non_blank = log_add(entry.non_blank, beam.blank + lp);
                        let entry = next.entry(prefix.clone()).or_insert(Beam::EMPTY);
                        entry.non_blank = log_add(entry.non_blank, beam.non_blank + lp);
                    } else {
                        let entry = next.entry(extended).or_insert(Beam::EMPTY);
                        entry.non_blank = log_add(entry.non_blank, total + lp);
                    }
                }
            }

            if next.is_empty() {
                continue;
            }

            let mut ranked: Vec<(Vec<usize>, Beam)> = next.into_iter().collect();
            ranked.sort_by(|a, b| {
                b.1.total()
                    .partial_cmp(&a.1.total())
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            ranked.truncate(width);
            beams = ranked;
        }

        let Some((labels, beam)) = beams.into_iter().next() else {
            return Ok(Recognition::empty());
        };
        Ok(Recognition {
            text: labels_to_text(&labels, vocab)?,
            confidence: beam.total().exp(),
        })
    }

    /// 将一行得分转换为概率
    fn probabilities(&self, row: ArrayView1<f32>) -> Vec<f32> {
        match self.scores {
            ScoreKind::Probabilities => row.to_vec(),
            ScoreKind::Logits => softmax(row),
            ScoreKind::Auto if is_distribution(row) => row.to_vec(),
            ScoreKind::Auto => softmax(row),
        }
    }
}

/// 使用默认设置（贪心、空白在最后）批量解码，只返回文本
pub fn ctc_decode(predictions: ArrayView3<f32>, vocab: &Vocabulary) -> Result<Vec<String>, OcrError> {
    let results = CtcDecoder::new().decode_batch(predictions, vocab)?;
    Ok(results.into_iter().map(|r| r.text).collect())
}

/// 对数空间下某前缀的两类路径概率
#[derive(Debug, Clone, Copy)]
struct Beam {
    /// 以空白结尾
    blank: f32,
    /// 以最后一个字符结尾
    non_blank: f32,
}

impl Beam {
    const START: Beam = Beam {
        blank: 0.0,
        non_blank: f32::NEG_INFINITY,
    };
    const EMPTY: Beam = Beam {
        blank: f32::NEG_INFINITY,
        non_blank: f32::NEG_INFINITY,
    };

    fn total(&self) -> f32 {
        log_add(self.blank, self.non_blank)
    }
}

fn log_add(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// 最大值索引，相同时取第一个，NaN 不参与比较
fn argmax(row: ArrayView1<f32>) -> usize {
    let mut max_val = f32::NEG_INFINITY;
    let mut max_idx = 0;
    for (idx, &val) in row.iter().enumerate() {
        if val > max_val {
            max_val = val;
            max_idx = idx;
        }
    }
    max_idx
}

/// 概率最高的 `k` 个类别，空白符总是保留
fn top_classes(log_probs: &[f32], k: usize, blank: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..log_probs.len()).collect();
    order.sort_by(|&a, &b| {
        log_probs[b]
            .partial_cmp(&log_probs[a])
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });
    order.truncate(k);
    if blank < log_probs.len() && !order.contains(&blank) {
        order.push(blank);
    }
    order
}

fn is_distribution(row: ArrayView1<f32>) -> bool {
    let mut sum = 0.0f32;
    for &val in row.iter() {
        if !val.is_finite() || val < 0.0 {
            return false;
        }
        sum += val;
    }
    (sum - 1.0).abs() <= PROB_SUM_TOLERANCE
}

/// 数值稳定的 softmax
fn softmax(row: ArrayView1<f32>) -> Vec<f32> {
    let mut max = f32::NEG_INFINITY;
    for &val in row.iter() {
        if val.is_finite() && val > max {
            max = val;
        }
    }
    let mut exps = Vec::with_capacity(row.len());
    let mut sum = 0.0f32;
    for &val in row.iter() {
        let exp = if val.is_finite() { (val - max).exp() } else { 0.0 };
        exps.push(exp);
        sum += exp;
    }
    if sum == 0.0 {
        return vec![0.0; row.len()];
    }
    exps.into_iter().map(|v| v / sum).collect()
}

fn labels_to_text(labels: &[usize], vocab: &Vocabulary) -> Result<String, OcrError> {
    let mut text = String::new();
    for &index in labels {
        let symbol = vocab.get(index).ok_or(OcrError::InvalidVocabulary {
            index,
            len: vocab.len(),
        })?;
        text.push_str(symbol);
    }
    Ok(text)
}
