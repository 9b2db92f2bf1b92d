//! ONNX Runtime 线程设置

use ort::session::builder::SessionBuilder;
use ort::Error;

const DEFAULT_MAX_THREADS: usize = 4;

const THREADS_ENV: &str = "SCRIBBLE_OCR_THREADS";
const INTER_THREADS_ENV: &str = "SCRIBBLE_OCR_INTER_THREADS";

fn parse_env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse::<usize>().ok()
}

fn default_thread_count() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_MAX_THREADS);
    available.min(DEFAULT_MAX_THREADS).max(1)
}

/// 返回 (intra, inter) 线程数，环境变量中的 0 或非法值按未设置处理
pub fn thread_settings() -> (usize, usize) {
    let intra = parse_env_usize(THREADS_ENV)
        .filter(|v| *v > 0)
        .unwrap_or_else(default_thread_count);
    let inter = parse_env_usize(INTER_THREADS_ENV)
        .filter(|v| *v > 0)
        .unwrap_or(1);
    (intra, inter)
}

pub fn apply_session_threads(builder: SessionBuilder) -> Result<SessionBuilder, Error> {
    let (intra, inter) = thread_settings();

    log::info!("[OCR] 线程设置: intra={}, inter={}", intra, inter);

    let builder = builder.with_intra_threads(intra)?;
    let builder = builder.with_inter_threads(inter)?;
    builder.with_parallel_execution(false)
}
