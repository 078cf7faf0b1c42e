// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model.rs - 模型输出解码
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

use std::{fmt, str::FromStr};

use image::Rgb;
use thiserror::Error;

use crate::convert::ResizeMode;

pub const DEFAULT_TOP_N: usize = 3;
pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("标签数量 {labels} 与分数数量 {scores} 不一致")]
  LabelCountMismatch { labels: usize, scores: usize },
  #[error("类别索引 {class_index} 超出标签表范围 (共 {labels} 项)")]
  LabelOutOfRange { class_index: f32, labels: usize },
  #[error("输出 {name} 长度不足: 期望至少 {expected}, 实际 {actual}")]
  OutputTooShort {
    name: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("模型输出数量不足: 期望 {expected}, 实际 {actual}")]
  MissingOutput { expected: usize, actual: usize },
  #[error("未知的解码模式: {0}")]
  UnknownMode(String),
}

impl DecodeError {
  /// 标签表与模型不匹配属于配置错误，重试没有意义
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      DecodeError::LabelCountMismatch { .. }
        | DecodeError::LabelOutOfRange { .. }
        | DecodeError::UnknownMode(_)
    )
  }
}

/// 源图像像素坐标下的矩形
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyItem {
  pub label: String,
  pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  /// 已加上背景偏移的标签索引
  pub class_id: usize,
  pub label: String,
  pub score: f32,
  pub rect: Rect,
  pub color: Rgb<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeResult {
  Classification(Box<[ClassifyItem]>),
  Detection(Box<[DetectItem]>),
}

impl DecodeResult {
  pub fn len(&self) -> usize {
    match self {
      DecodeResult::Classification(items) => items.len(),
      DecodeResult::Detection(items) => items.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 构建流水线时确定的解码模式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeMode {
  Classification { top_n: usize },
  Detection { threshold: f32 },
}

impl DecodeMode {
  pub fn classification() -> Self {
    DecodeMode::Classification {
      top_n: DEFAULT_TOP_N,
    }
  }

  pub fn detection() -> Self {
    DecodeMode::Detection {
      threshold: DEFAULT_THRESHOLD,
    }
  }

  /// 分类模型裁剪居中正方形，检测模型直接缩放
  pub fn resize_mode(&self) -> ResizeMode {
    match self {
      DecodeMode::Classification { .. } => ResizeMode::CenterCrop,
      DecodeMode::Detection { .. } => ResizeMode::Stretch,
    }
  }

  /// 解码需要的模型输出数量
  pub fn output_count(&self) -> usize {
    match self {
      DecodeMode::Classification { .. } => 1,
      DecodeMode::Detection { .. } => DetectionDecoder::OUTPUT_COUNT,
    }
  }
}

impl fmt::Display for DecodeMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DecodeMode::Classification { top_n } => write!(f, "classification(top {})", top_n),
      DecodeMode::Detection { threshold } => write!(f, "detection(threshold {})", threshold),
    }
  }
}

impl FromStr for DecodeMode {
  type Err = DecodeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "classification" | "classify" => Ok(DecodeMode::classification()),
      "detection" | "detect" => Ok(DecodeMode::detection()),
      _ => Err(DecodeError::UnknownMode(s.to_string())),
    }
  }
}

/// 按模式选定的解码器
#[derive(Debug, Clone)]
pub enum Decoder {
  Classification(ClassificationDecoder),
  Detection(DetectionDecoder),
}

impl From<DecodeMode> for Decoder {
  fn from(mode: DecodeMode) -> Self {
    match mode {
      DecodeMode::Classification { top_n } => {
        Decoder::Classification(ClassificationDecoder::new(top_n))
      }
      DecodeMode::Detection { threshold } => Decoder::Detection(DetectionDecoder::new(threshold)),
    }
  }
}

impl Decoder {
  pub fn output_count(&self) -> usize {
    match self {
      Decoder::Classification(_) => 1,
      Decoder::Detection(_) => DetectionDecoder::OUTPUT_COUNT,
    }
  }

  /// 解码一次推理的全部输出
  ///
  /// `outputs` 按引擎输出索引排列；检测模型依次为框、类别、分数、数量。
  pub fn decode(
    &self,
    outputs: &[Vec<f32>],
    labels: &Labels,
    source_size: (u32, u32),
  ) -> Result<DecodeResult, DecodeError> {
    if outputs.len() < self.output_count() {
      return Err(DecodeError::MissingOutput {
        expected: self.output_count(),
        actual: outputs.len(),
      });
    }

    match self {
      Decoder::Classification(decoder) => decoder
        .decode(&outputs[0], labels)
        .map(DecodeResult::Classification),
      Decoder::Detection(decoder) => {
        let count = outputs[3].first().copied().unwrap_or(0.0);
        decoder
          .decode(
            &outputs[0],
            &outputs[1],
            &outputs[2],
            count,
            source_size,
            labels,
          )
          .map(DecodeResult::Detection)
      }
    }
  }
}

mod classification;
mod detection;
mod labels;
pub use self::classification::ClassificationDecoder;
pub use self::detection::DetectionDecoder;
pub use self::labels::{LabelError, Labels};

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::Result;

  #[test]
  fn mode_selects_resize_and_outputs() {
    let mode: DecodeMode = "classification".parse().unwrap();
    assert_eq!(mode, DecodeMode::Classification { top_n: 3 });
    assert_eq!(mode.resize_mode(), ResizeMode::CenterCrop);
    assert_eq!(mode.output_count(), 1);

    let mode: DecodeMode = "detection".parse().unwrap();
    assert_eq!(mode, DecodeMode::Detection { threshold: 0.5 });
    assert_eq!(mode.resize_mode(), ResizeMode::Stretch);
    assert_eq!(mode.output_count(), 4);

    assert!("segmentation".parse::<DecodeMode>().is_err());
  }

  #[test]
  fn decoder_checks_output_count() -> Result<()> {
    let labels = Labels::from_names(["???", "person"])?;
    let decoder = Decoder::from(DecodeMode::detection());
    let err = decoder
      .decode(&[vec![0.0; 4], vec![0.0]], &labels, (10, 10))
      .unwrap_err();
    assert_eq!(err, DecodeError::MissingOutput { expected: 4, actual: 2 });
    assert!(!err.is_fatal());
    Ok(())
  }

  #[test]
  fn detection_outputs_are_routed_in_order() -> Result<()> {
    let labels = Labels::from_names(["???", "person", "bicycle"])?;
    let decoder = Decoder::from(DecodeMode::detection());
    let outputs = vec![
      vec![0.0, 0.0, 0.5, 0.5],
      vec![1.0],
      vec![0.8],
      vec![1.0],
    ];
    let DecodeResult::Detection(items) = decoder.decode(&outputs, &labels, (100, 200))? else {
      panic!("期望检测结果");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].label, "bicycle");
    assert_eq!(
      items[0].rect,
      Rect {
        x: 0.0,
        y: 0.0,
        width: 50.0,
        height: 100.0
      }
    );
    Ok(())
  }

  #[test]
  fn classification_result_is_tagged() -> Result<()> {
    let labels = Labels::from_names(["cat", "dog", "bird"])?;
    let decoder = Decoder::from(DecodeMode::Classification { top_n: 2 });
    let result = decoder.decode(&[vec![0.1, 0.7, 0.2]], &labels, (4, 4))?;
    assert!(matches!(result, DecodeResult::Classification(_)));
    assert_eq!(result.len(), 2);
    Ok(())
  }
}
