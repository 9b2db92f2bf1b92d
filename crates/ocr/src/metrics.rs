//! 识别质量评估：字符错误率 (CER) 与词错误率 (WER)

use crate::error::OcrError;

/// 两个序列之间的编辑距离（插入、删除、替换代价均为 1）
pub fn edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let a: Vec<&T> = a.iter().collect();
    let b: Vec<&T> = b.iter().collect();
    strsim::generic_levenshtein(&a, &b)
}

/// 字符错误率：编辑距离总和 / 目标字符总数
pub fn cer<P: AsRef<str>, T: AsRef<str>>(predictions: &[P], targets: &[T]) -> Result<f32, OcrError> {
    error_rate(predictions, targets, |s| s.chars().collect::<Vec<char>>())
}

/// 词错误率：按空白分词后计算
pub fn wer<P: AsRef<str>, T: AsRef<str>>(predictions: &[P], targets: &[T]) -> Result<f32, OcrError> {
    error_rate(predictions, targets, |s| s.split_whitespace().collect::<Vec<&str>>())
}

fn error_rate<'a, P, T, F, U>(predictions: &'a [P], targets: &'a [T], tokenize: F) -> Result<f32, OcrError>
where
    P: AsRef<str>,
    T: AsRef<str>,
    F: Fn(&'a str) -> Vec<U>,
    U: PartialEq,
{
    if predictions.len() != targets.len() {
        return Err(OcrError::Config(format!(
            "预测数量 ({}) 与目标数量 ({}) 不一致",
            predictions.len(),
            targets.len()
        )));
    }

    let mut errors = 0usize;
    let mut total = 0usize;
    for (pred, target) in predictions.iter().zip(targets) {
        let pred = tokenize(pred.as_ref());
        let target = tokenize(target.as_ref());
        errors += edit_distance(&pred, &target);
        total += target.len();
    }

    if total == 0 {
        return Ok(if errors == 0 { 0.0 } else { 1.0 });
    }
    Ok(errors as f32 / total as f32)
}
