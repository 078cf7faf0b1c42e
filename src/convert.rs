// 该文件是 Qianli （千里眼） 项目的一部分。
// src/convert.rs - 像素格式转换
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

//! # 像素格式转换
//!
//! 将相机给出的四通道交错缓冲区（ARGB / BGRA / RGBA）转换为模型输入所需的
//! 三通道 RGB 缓冲区：
//!
//! 1. 按模式裁剪：分类模型取居中最大正方形，检测模型保留整幅画面；
//! 2. 缩放到目标尺寸；
//! 3. 去掉 alpha 通道并统一为 RGB 字节顺序。
//!
//! 源缓冲区通过 `image::flat` 以带行跨度的视图借用，裁剪不做拷贝。

use image::{
  Rgba,
  flat::{self, FlatSamples, SampleLayout},
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::debug;

use crate::frame::{PACKED_CHANNELS, PixelFormat, RGB_CHANNELS, RawFrame, RgbNhwcFrame};

#[derive(Error, Debug)]
pub enum ConvertError {
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(PixelFormat),
  #[error("目标尺寸无效: {width}x{height}")]
  InvalidTarget { width: usize, height: usize },
  #[error("像素缓冲区布局无效: {0}")]
  Layout(#[from] flat::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
  /// 裁剪居中的最大正方形后缩放
  #[default]
  CenterCrop,
  /// 直接缩放整幅画面
  Stretch,
}

#[derive(Debug, Clone, Copy)]
pub struct PixelConverter {
  mode: ResizeMode,
  filter: FilterType,
}

impl PixelConverter {
  pub fn new(mode: ResizeMode) -> Self {
    Self {
      mode,
      filter: FilterType::Triangle,
    }
  }

  pub fn with_filter(mut self, filter: FilterType) -> Self {
    self.filter = filter;
    self
  }

  pub fn mode(&self) -> ResizeMode {
    self.mode
  }

  pub fn supports(&self, format: PixelFormat) -> bool {
    format.is_supported()
  }

  /// 返回 `(x, y, width, height)` 形式的裁剪区域
  pub fn crop_region(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
    match self.mode {
      ResizeMode::Stretch => (0, 0, width, height),
      ResizeMode::CenterCrop => {
        let side = width.min(height);
        ((width - side) / 2, (height - side) / 2, side, side)
      }
    }
  }

  /// 转换到新分配的缓冲区
  pub fn convert(
    &self,
    frame: &RawFrame<'_>,
    target: (usize, usize),
  ) -> Result<RgbNhwcFrame, ConvertError> {
    let mut output = RgbNhwcFrame::with_shape(target.1, target.0);
    self.convert_into(frame, &mut output)?;
    Ok(output)
  }

  /// 转换到已有缓冲区，目标尺寸取自 `target` 本身
  pub fn convert_into(
    &self,
    frame: &RawFrame<'_>,
    target: &mut RgbNhwcFrame,
  ) -> Result<(), ConvertError> {
    let offsets = frame
      .format()
      .rgb_offsets()
      .ok_or(ConvertError::UnsupportedFormat(frame.format()))?;

    let (target_w, target_h) = (target.width(), target.height());
    if target_w == 0 || target_h == 0 {
      return Err(ConvertError::InvalidTarget {
        width: target_w,
        height: target_h,
      });
    }

    let (x, y, w, h) = self.crop_region(frame.width(), frame.height());
    debug!(
      "裁剪区域 ({}, {}) {}x{} -> 缩放到 {}x{}",
      x, y, w, h, target_w, target_h
    );

    // 裁剪通过偏移起点并缩小宽高完成，行跨度保持不变
    let offset = y as usize * frame.stride() + x as usize * PACKED_CHANNELS;
    let samples = FlatSamples {
      samples: &frame.data()[offset..],
      layout: SampleLayout {
        channels: PACKED_CHANNELS as u8,
        channel_stride: 1,
        width: w,
        width_stride: PACKED_CHANNELS,
        height: h,
        height_stride: frame.stride(),
      },
      color_hint: None,
    };
    // 这里的 Rgba 只表示“四个 u8 通道”，真实顺序由 offsets 决定
    let cropped = samples.as_view::<Rgba<u8>>()?;
    let scaled = imageops::resize(&cropped, target_w as u32, target_h as u32, self.filter);

    for (dst, src) in target
      .as_mut()
      .chunks_exact_mut(RGB_CHANNELS)
      .zip(scaled.as_raw().chunks_exact(PACKED_CHANNELS))
    {
      dst[0] = src[offsets[0]];
      dst[1] = src[offsets[1]];
      dst[2] = src[offsets[2]];
    }

    Ok(())
  }
}
