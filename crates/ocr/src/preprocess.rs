//! 图像预处理模块
//!
//! 等比例缩放到模型输入尺寸，剩余区域填充固定颜色，再打包为模型需要的 tensor。

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::backend::{ChannelOrder, InputShape, TensorLayout};
use crate::error::OcrError;

/// 缩放后图像在画布上的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// 居中，两侧平均填充
    #[default]
    Center,
    /// 左上角对齐，填充在右侧和下方
    TopLeft,
}

/// 等比例缩放参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOptions {
    pub placement: Placement,
    /// 填充颜色 (RGB)
    pub fill: [u8; 3],
}

impl Default for ResizeOptions {
    fn default() -> Self {
        Self {
            placement: Placement::Center,
            fill: [0, 0, 0],
        }
    }
}

/// 缩放比例：由受限的一边决定
pub fn scale_factor(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> f64 {
    let sx = dst_w as f64 / src_w as f64;
    let sy = dst_h as f64 / src_h as f64;
    sx.min(sy)
}

fn scaled_side(src: u32, scale: f64, limit: u32) -> u32 {
    ((src as f64 * scale).round() as u32).clamp(1, limit)
}

/// 等比例缩放到 `width` x `height`
///
/// 1. 按 `scale_factor` 缩放，缩小用 Lanczos3，放大用双线性
/// 2. 按 `options.placement` 放到填充色画布上
///
/// 尺寸已经一致时原样返回，不做重采样。
pub fn resize_maintaining_aspect_ratio(
    img: &DynamicImage,
    width: u32,
    height: u32,
    options: &ResizeOptions,
) -> Result<RgbImage, OcrError> {
    let (src_w, src_h) = (img.width(), img.height());
    if src_w == 0 || src_h == 0 {
        return Err(OcrError::InvalidImage(format!("图像尺寸为 {}x{}", src_w, src_h)));
    }
    if width == 0 || height == 0 {
        return Err(OcrError::InvalidImage(format!("目标尺寸为 {}x{}", width, height)));
    }

    let rgb = img.to_rgb8();
    if src_w == width && src_h == height {
        return Ok(rgb);
    }

    let scale = scale_factor(src_w, src_h, width, height);
    let new_w = scaled_side(src_w, scale, width);
    let new_h = scaled_side(src_h, scale, height);

    let resized = if new_w == src_w && new_h == src_h {
        rgb
    } else {
        let filter = if scale < 1.0 {
            FilterType::Lanczos3
        } else {
            FilterType::Triangle
        };
        imageops::resize(&rgb, new_w, new_h, filter)
    };

    let (x, y) = match options.placement {
        Placement::Center => ((width - new_w) / 2, (height - new_h) / 2),
        Placement::TopLeft => (0, 0),
    };

    let mut canvas: RgbImage = ImageBuffer::from_pixel(width, height, Rgb(options.fill));
    imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
    Ok(canvas)
}

/// 将图像打包为 batch 为 1 的 f32 tensor，像素值保持 0..255
pub fn to_input_tensor(img: &RgbImage, shape: &InputShape) -> Result<Array4<f32>, OcrError> {
    if img.width() != shape.width || img.height() != shape.height {
        return Err(OcrError::InvalidImage(format!(
            "图像尺寸 {}x{} 与模型输入 {}x{} 不一致",
            img.width(),
            img.height(),
            shape.width,
            shape.height
        )));
    }

    let mut tensor = Array4::<f32>::zeros(shape.tensor_dims());
    match shape.channels {
        3 => {
            for (x, y, pixel) in img.enumerate_pixels() {
                let [r, g, b] = pixel.0;
                let values = match shape.channel_order {
                    ChannelOrder::Bgr => [b, g, r],
                    ChannelOrder::Rgb => [r, g, b],
                };
                for (c, value) in values.into_iter().enumerate() {
                    set_value(&mut tensor, shape.layout, x, y, c, value);
                }
            }
        }
        1 => {
            let gray = imageops::grayscale(img);
            for (x, y, pixel) in gray.enumerate_pixels() {
                set_value(&mut tensor, shape.layout, x, y, 0, pixel.0[0]);
            }
        }
        n => {
            return Err(OcrError::InvalidImage(format!("不支持的通道数: {}", n)));
        }
    }

    Ok(tensor)
}

fn set_value(tensor: &mut Array4<f32>, layout: TensorLayout, x: u32, y: u32, c: usize, value: u8) {
    let (x, y) = (x as usize, y as usize);
    let index = match layout {
        TensorLayout::Nhwc => [0, y, x, c],
        TensorLayout::Nchw => [0, c, y, x],
    };
    tensor[index] = value as f32;
}
