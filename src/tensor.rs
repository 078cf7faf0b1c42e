// 该文件是 Qianli （千里眼） 项目的一部分。
// src/tensor.rs - 输入输出张量编解码
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{borrow::Cow, fmt, str::FromStr};

use thiserror::Error;

use crate::frame::{RGB_CHANNELS, RgbNhwcFrame};

const F32_SIZE: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
  #[error("输入规格无效: {0}")]
  InvalidSpec(String),
  #[error("输入尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: (usize, usize),
    actual: (usize, usize),
  },
  #[error("量化张量缺少量化参数")]
  MissingQuantization,
  #[error("缓冲区长度 {len} 不是元素大小 {element} 的整数倍")]
  MisalignedBuffer { len: usize, element: usize },
  #[error("无法识别的张量类型: {0}")]
  UnknownType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
  UInt8,
  Float32,
}

impl ElementType {
  pub fn size(&self) -> usize {
    match self {
      ElementType::UInt8 => 1,
      ElementType::Float32 => F32_SIZE,
    }
  }
}

impl fmt::Display for ElementType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ElementType::UInt8 => write!(f, "u8"),
      ElementType::Float32 => write!(f, "f32"),
    }
  }
}

impl FromStr for ElementType {
  type Err = TensorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "u8" | "uint8" => Ok(ElementType::UInt8),
      "f32" | "float32" => Ok(ElementType::Float32),
      _ => Err(TensorError::UnknownType(s.to_string())),
    }
  }
}

/// 浮点模型的归一化参数，`(byte - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
  pub mean: f32,
  pub std: f32,
}

impl Default for Normalization {
  fn default() -> Self {
    // 映射到 [-1, 1]
    Self {
      mean: 127.5,
      std: 127.5,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizationParams {
  pub scale: f32,
  pub zero_point: i32,
}

/// 模型加载时确定的输入规格，之后不再改变
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInputSpec {
  pub width: usize,
  pub height: usize,
  pub channels: usize,
  pub batch: usize,
  pub element_type: ElementType,
  pub normalization: Normalization,
}

impl ModelInputSpec {
  pub fn quantized(width: usize, height: usize) -> Self {
    Self {
      width,
      height,
      channels: RGB_CHANNELS,
      batch: 1,
      element_type: ElementType::UInt8,
      normalization: Normalization::default(),
    }
  }

  pub fn float(width: usize, height: usize, normalization: Normalization) -> Self {
    Self {
      element_type: ElementType::Float32,
      normalization,
      ..Self::quantized(width, height)
    }
  }

  pub fn with_batch(mut self, batch: usize) -> Self {
    self.batch = batch;
    self
  }

  pub fn is_quantized(&self) -> bool {
    self.element_type == ElementType::UInt8
  }

  pub fn element_count(&self) -> usize {
    self.batch * self.channels * self.width * self.height
  }

  pub fn byte_len(&self) -> usize {
    self.element_count() * self.element_type.size()
  }

  pub fn validate(&self) -> Result<(), TensorError> {
    if self.width == 0 || self.height == 0 {
      return Err(TensorError::InvalidSpec(format!(
        "输入尺寸为空: {}x{}",
        self.width, self.height
      )));
    }
    if self.channels != RGB_CHANNELS {
      return Err(TensorError::InvalidSpec(format!(
        "仅支持 {} 通道输入, 实际为 {}",
        RGB_CHANNELS, self.channels
      )));
    }
    if self.batch == 0 {
      return Err(TensorError::InvalidSpec("批大小为 0".to_string()));
    }
    if !self.is_quantized() {
      let Normalization { mean, std } = self.normalization;
      if !mean.is_finite() || !std.is_finite() || std == 0.0 {
        return Err(TensorError::InvalidSpec(format!(
          "归一化参数无效: mean={}, std={}",
          mean, std
        )));
      }
    }
    Ok(())
  }
}

/// 输入张量缓冲区
///
/// 按 [`ModelInputSpec`] 分配一次，之后每帧复用。批大小大于 1 时只写入第一个批次，
/// 其余批次保持为零。
#[derive(Debug)]
pub struct InputTensor {
  spec: ModelInputSpec,
  data: Box<[u8]>,
}

impl InputTensor {
  pub fn new(spec: ModelInputSpec) -> Result<Self, TensorError> {
    spec.validate()?;
    Ok(Self {
      spec,
      data: vec![0u8; spec.byte_len()].into_boxed_slice(),
    })
  }

  pub fn spec(&self) -> &ModelInputSpec {
    &self.spec
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn write(&mut self, pixels: &RgbNhwcFrame) -> Result<(), TensorError> {
    let expected = (self.spec.width, self.spec.height);
    let actual = (pixels.width(), pixels.height());
    if expected != actual {
      return Err(TensorError::ShapeMismatch { expected, actual });
    }

    let src = pixels.as_nhwc();
    match self.spec.element_type {
      ElementType::UInt8 => {
        self.data[..src.len()].copy_from_slice(src);
      }
      ElementType::Float32 => {
        let Normalization { mean, std } = self.spec.normalization;
        for (dst, &byte) in self.data.chunks_exact_mut(F32_SIZE).zip(src) {
          dst.copy_from_slice(&((byte as f32 - mean) / std).to_ne_bytes());
        }
      }
    }
    Ok(())
  }
}

/// 推理引擎返回的一路原始输出
#[derive(Debug, Clone)]
pub struct RawOutput<'a> {
  data: Cow<'a, [u8]>,
  element_type: ElementType,
  quantization: Option<QuantizationParams>,
}

impl<'a> RawOutput<'a> {
  pub fn new(
    data: impl Into<Cow<'a, [u8]>>,
    element_type: ElementType,
    quantization: Option<QuantizationParams>,
  ) -> Self {
    Self {
      data: data.into(),
      element_type,
      quantization,
    }
  }

  pub fn from_f32(values: &[f32]) -> RawOutput<'static> {
    let data = values.iter().flat_map(|v| v.to_ne_bytes()).collect::<Vec<u8>>();
    RawOutput::new(data, ElementType::Float32, None)
  }

  pub fn element_type(&self) -> ElementType {
    self.element_type
  }

  pub fn read(&self) -> Result<Vec<f32>, TensorError> {
    read_output(&self.data, self.element_type, self.quantization)
  }
}

/// 将原始输出还原为浮点数组
///
/// 量化张量按 `scale * (byte - zero_point)` 反量化；浮点张量按本机字节序逐元素解释。
pub fn read_output(
  raw: &[u8],
  element_type: ElementType,
  quantization: Option<QuantizationParams>,
) -> Result<Vec<f32>, TensorError> {
  match element_type {
    ElementType::UInt8 => {
      let QuantizationParams { scale, zero_point } =
        quantization.ok_or(TensorError::MissingQuantization)?;
      Ok(
        raw
          .iter()
          .map(|&byte| scale * (byte as i32 - zero_point) as f32)
          .collect(),
      )
    }
    ElementType::Float32 => {
      if raw.len() % F32_SIZE != 0 {
        return Err(TensorError::MisalignedBuffer {
          len: raw.len(),
          element: F32_SIZE,
        });
      }
      Ok(
        raw
          .chunks_exact(F32_SIZE)
          .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
          .collect(),
      )
    }
  }
}
