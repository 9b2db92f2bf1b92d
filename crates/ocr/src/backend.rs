//! 推理后端
//!
//! 识别网络被视为黑盒：输入固定尺寸的图像 tensor，输出 (N, T, C) 的逐帧类别得分。

use ndarray::{Array3, Array4, Axis, Ix3};
use ort::session::Session;
use ort::value::{Tensor, ValueType};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BackendError, OcrError};
use crate::threading::apply_session_threads;

/// 输入 tensor 的维度顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// (1, H, W, C)，Keras 导出的模型
    #[default]
    Nhwc,
    /// (1, C, H, W)
    Nchw,
}

/// 输入通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Bgr,
    Rgb,
}

/// 后端声明的输入形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub width: u32,
    pub height: u32,
    /// 3 (彩色) 或 1 (灰度)
    pub channels: usize,
    pub layout: TensorLayout,
    pub channel_order: ChannelOrder,
}

impl InputShape {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channels: 3,
            layout: TensorLayout::default(),
            channel_order: ChannelOrder::default(),
        }
    }

    /// 含 batch 维的 tensor 形状
    pub fn tensor_dims(&self) -> [usize; 4] {
        let (h, w, c) = (self.height as usize, self.width as usize, self.channels);
        match self.layout {
            TensorLayout::Nhwc => [1, h, w, c],
            TensorLayout::Nchw => [1, c, h, w],
        }
    }
}

/// 推理后端：给定输入 tensor，返回逐帧类别得分
///
/// `infer` 需要独占访问；并发调用方需自行串行化（例如放在 `Mutex` 中）。
pub trait InferenceBackend {
    fn input_shape(&self) -> &InputShape;

    fn infer(&mut self, input: Array4<f32>) -> Result<Array3<f32>, BackendError>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for &mut B {
    fn input_shape(&self) -> &InputShape {
        (**self).input_shape()
    }

    fn infer(&mut self, input: Array4<f32>) -> Result<Array3<f32>, BackendError> {
        (**self).infer(input)
    }
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn input_shape(&self) -> &InputShape {
        (**self).input_shape()
    }

    fn infer(&mut self, input: Array4<f32>) -> Result<Array3<f32>, BackendError> {
        (**self).infer(input)
    }
}

/// 基于 ONNX Runtime 的推理后端
pub struct OnnxBackend {
    session: Session,
    shape: InputShape,
}

impl OnnxBackend {
    /// 从 ONNX 模型文件创建后端
    ///
    /// 输入尺寸以模型声明的为准，动态维度 (-1) 取 `fallback` 中的配置值。
    pub fn new(model_path: &Path, fallback: InputShape) -> Result<Self, OcrError> {
        let builder = Session::builder()
            .map_err(|e: ort::Error| OcrError::ModelLoad(e.to_string()))?;
        let builder = apply_session_threads(builder)
            .map_err(|e| OcrError::ModelLoad(e.to_string()))?;
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| OcrError::ModelLoad(format!("加载识别模型失败: {}", e)))?;

        let shape = match declared_input_dims(&session) {
            Some(dims) => merge_declared_shape(&dims, fallback),
            None => {
                log::warn!("[OCR] 模型未声明输入形状，使用配置尺寸");
                fallback
            }
        };

        log::info!(
            "[OCR] 识别模型已加载: {} (输入 {}x{}x{}, {:?})",
            model_path.display(),
            shape.height,
            shape.width,
            shape.channels,
            shape.layout
        );
        Ok(Self { session, shape })
    }
}

/// 第一个输入的声明维度，动态维度为 -1
fn declared_input_dims(session: &Session) -> Option<Vec<i64>> {
    let input = session.inputs().first()?;
    match input.dtype() {
        ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
        _ => None,
    }
}

fn is_channel_dim(dim: i64) -> bool {
    dim == 1 || dim == 3
}

/// 合并模型声明的 4 维输入形状与配置
///
/// 布局由通道维所在位置判断，无法判断时沿用配置；固定维度优先，与配置不一致时告警。
pub fn merge_declared_shape(declared: &[i64], fallback: InputShape) -> InputShape {
    let [_, d1, d2, d3] = declared else {
        log::warn!("[OCR] 模型输入不是 4 维: {:?}，使用配置尺寸", declared);
        return fallback;
    };
    let (d1, d2, d3) = (*d1, *d2, *d3);

    let layout = match (is_channel_dim(d1), is_channel_dim(d3)) {
        (false, true) => TensorLayout::Nhwc,
        (true, false) => TensorLayout::Nchw,
        _ => fallback.layout,
    };
    let (h, w, c) = match layout {
        TensorLayout::Nhwc => (d1, d2, d3),
        TensorLayout::Nchw => (d2, d3, d1),
    };

    if layout != fallback.layout {
        log::warn!(
            "[OCR] 模型输入布局为 {:?}，与配置 {:?} 不一致",
            layout,
            fallback.layout
        );
    }

    let height = pick_dim("高度", h, fallback.height as i64) as u32;
    let width = pick_dim("宽度", w, fallback.width as i64) as u32;
    let channels = if is_channel_dim(c) {
        pick_dim("通道数", c, fallback.channels as i64) as usize
    } else {
        fallback.channels
    };

    InputShape {
        width,
        height,
        channels,
        layout,
        channel_order: fallback.channel_order,
    }
}

fn pick_dim(name: &str, declared: i64, configured: i64) -> i64 {
    if declared <= 0 {
        return configured;
    }
    if declared != configured {
        log::warn!(
            "[OCR] 模型声明的输入{}为 {}，配置为 {}，以模型为准",
            name,
            declared,
            configured
        );
    }
    declared
}

impl InferenceBackend for OnnxBackend {
    fn input_shape(&self) -> &InputShape {
        &self.shape
    }

    fn infer(&mut self, input: Array4<f32>) -> Result<Array3<f32>, BackendError> {
        let input_tensor = Tensor::from_array(input)?;
        let outputs = self.session.run(ort::inputs![input_tensor])?;

        let output_view = outputs[0].try_extract_array::<f32>()?;
        let output_owned = output_view.to_owned();
        drop(outputs);

        let output = match output_owned.ndim() {
            2 => output_owned.insert_axis(Axis(0)),
            3 => output_owned,
            n => return Err(format!("意外的输出维度: {} (形状 {:?})", n, output_owned.shape()).into()),
        };
        Ok(output.into_dimensionality::<Ix3>()?)
    }
}
