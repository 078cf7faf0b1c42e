// 该文件是 Qianli （千里眼） 项目的一部分。
// src/frame.rs - 相机帧与 NHWC 帧定义
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

use image::RgbaImage;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;
pub const PACKED_CHANNELS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("帧尺寸为空: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("行跨度过小: 每行至少 {row} 字节, 实际 {stride} 字节")]
  StrideTooSmall { stride: usize, row: usize },
  #[error("缓冲区长度不足: 期望至少 {expected} 字节, 实际 {actual} 字节")]
  BufferTooSmall { expected: usize, actual: usize },
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(PixelFormat),
  #[error("无法识别的像素格式: {0}")]
  UnknownFormat(String),
}

/// 32 位交错像素格式
///
/// `Other` 保存硬件给出的 FourCC，用于在启动阶段报告不支持的格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
  Argb32,
  Bgra32,
  Rgba32,
  Other(u32),
}

impl PixelFormat {
  pub const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
  }

  pub fn from_fourcc(code: u32) -> Self {
    match &code.to_be_bytes() {
      b"ARGB" => PixelFormat::Argb32,
      b"BGRA" => PixelFormat::Bgra32,
      b"RGBA" => PixelFormat::Rgba32,
      _ => PixelFormat::Other(code),
    }
  }

  /// 四字节像素中 R、G、B 分量所在的偏移
  pub fn rgb_offsets(&self) -> Option<[usize; 3]> {
    match self {
      PixelFormat::Argb32 => Some([1, 2, 3]),
      PixelFormat::Bgra32 => Some([2, 1, 0]),
      PixelFormat::Rgba32 => Some([0, 1, 2]),
      PixelFormat::Other(_) => None,
    }
  }

  fn alpha_offset(&self) -> Option<usize> {
    match self {
      PixelFormat::Argb32 => Some(0),
      PixelFormat::Bgra32 | PixelFormat::Rgba32 => Some(3),
      PixelFormat::Other(_) => None,
    }
  }

  pub fn is_supported(&self) -> bool {
    self.rgb_offsets().is_some()
  }
}

impl fmt::Display for PixelFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PixelFormat::Argb32 => write!(f, "ARGB32"),
      PixelFormat::Bgra32 => write!(f, "BGRA32"),
      PixelFormat::Rgba32 => write!(f, "RGBA32"),
      PixelFormat::Other(code) => {
        let bytes = code.to_be_bytes();
        if bytes.iter().all(u8::is_ascii_graphic) {
          write!(f, "FourCC({})", String::from_utf8_lossy(&bytes))
        } else {
          write!(f, "FourCC({:#010x})", code)
        }
      }
    }
  }
}

impl FromStr for PixelFormat {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "argb" | "argb32" => Ok(PixelFormat::Argb32),
      "bgra" | "bgra32" => Ok(PixelFormat::Bgra32),
      "rgba" | "rgba32" => Ok(PixelFormat::Rgba32),
      _ => match <&[u8; 4]>::try_from(s.as_bytes()) {
        Ok(code) => Ok(PixelFormat::from_fourcc(PixelFormat::fourcc(code))),
        Err(_) => Err(FrameError::UnknownFormat(s.to_string())),
      },
    }
  }
}

/// 借用自采集子系统的硬件像素缓冲区
///
/// 只在一次回调期间有效，流水线不得持有它。
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
  data: &'a [u8],
  width: u32,
  height: u32,
  stride: usize,
  format: PixelFormat,
}

impl<'a> RawFrame<'a> {
  pub fn new(
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::EmptyFrame { width, height });
    }

    let row = width as usize * PACKED_CHANNELS;
    if stride < row {
      return Err(FrameError::StrideTooSmall { stride, row });
    }

    // 最后一行可以不带填充
    let expected = stride * (height as usize - 1) + row;
    if data.len() < expected {
      return Err(FrameError::BufferTooSmall {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data,
      width,
      height,
      stride,
      format,
    })
  }

  pub fn data(&self) -> &'a [u8] {
    self.data
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn stride(&self) -> usize {
    self.stride
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }
}

/// 采集通道与推理通道之间传递的帧，拥有自己的像素数据
#[derive(Debug, Clone)]
pub struct CapturedFrame {
  pub index: u64,
  data: Box<[u8]>,
  width: u32,
  height: u32,
  stride: usize,
  format: PixelFormat,
}

impl CapturedFrame {
  pub fn new(
    index: u64,
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
  ) -> Self {
    Self {
      index,
      data: data.into_boxed_slice(),
      width,
      height,
      stride,
      format,
    }
  }

  /// 将 RGBA 图像按指定通道顺序打包为四通道缓冲区，每行附加 `pad` 字节填充
  pub fn pack(image: &RgbaImage, format: PixelFormat, pad: usize) -> Result<Self, FrameError> {
    let (rgb, alpha) = match (format.rgb_offsets(), format.alpha_offset()) {
      (Some(rgb), Some(alpha)) => (rgb, alpha),
      _ => return Err(FrameError::UnsupportedFormat(format)),
    };

    let (width, height) = image.dimensions();
    let stride = width as usize * PACKED_CHANNELS + pad;
    let mut data = vec![0u8; stride * height as usize];

    for (y, row) in data.chunks_exact_mut(stride).enumerate() {
      for x in 0..width {
        let pixel = image.get_pixel(x, y as u32);
        let dst = &mut row[x as usize * PACKED_CHANNELS..(x as usize + 1) * PACKED_CHANNELS];
        dst[rgb[0]] = pixel[0];
        dst[rgb[1]] = pixel[1];
        dst[rgb[2]] = pixel[2];
        dst[alpha] = pixel[3];
      }
    }

    Ok(Self::new(0, data, width, height, stride, format))
  }

  pub fn with_index(mut self, index: u64) -> Self {
    self.index = index;
    self
  }

  pub fn as_raw(&self) -> Result<RawFrame<'_>, FrameError> {
    RawFrame::new(
      &self.data,
      self.width,
      self.height,
      self.stride,
      self.format,
    )
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }
}

/// 紧密排列的三通道 RGB 帧（NHWC，单批次）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RgbNhwcFrame {
  data: Box<[u8]>,
  width: usize,
  height: usize,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let size = RGB_CHANNELS * width * height;
    Self {
      data: vec![0u8; size].into_boxed_slice(),
      width,
      height,
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
    let idx = (y * self.width + x) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgba;

  #[test]
  fn raw_frame_checks_stride_and_length() {
    let data = vec![0u8; 4 * 4 * 2];
    assert!(RawFrame::new(&data, 4, 2, 16, PixelFormat::Bgra32).is_ok());
    assert_eq!(
      RawFrame::new(&data, 4, 2, 12, PixelFormat::Bgra32).unwrap_err(),
      FrameError::StrideTooSmall { stride: 12, row: 16 }
    );
    assert_eq!(
      RawFrame::new(&data, 4, 3, 16, PixelFormat::Bgra32).unwrap_err(),
      FrameError::BufferTooSmall {
        expected: 48,
        actual: 32
      }
    );
    assert!(matches!(
      RawFrame::new(&data, 0, 2, 16, PixelFormat::Bgra32),
      Err(FrameError::EmptyFrame { .. })
    ));
  }

  #[test]
  fn last_row_may_omit_padding() {
    // 两行，每行 8 字节像素 + 4 字节填充，最后一行不带填充
    let data = vec![0u8; 12 + 8];
    let frame = RawFrame::new(&data, 2, 2, 12, PixelFormat::Rgba32).unwrap();
    assert_eq!(frame.stride(), 12);
    assert_eq!(frame.size(), (2, 2));
  }

  #[test]
  fn pixel_format_parses_names_and_fourcc() {
    assert_eq!("BGRA".parse::<PixelFormat>().unwrap(), PixelFormat::Bgra32);
    assert_eq!("argb32".parse::<PixelFormat>().unwrap(), PixelFormat::Argb32);
    assert_eq!("rgba".parse::<PixelFormat>().unwrap(), PixelFormat::Rgba32);

    let nv12 = "NV12".parse::<PixelFormat>().unwrap();
    assert_eq!(nv12, PixelFormat::Other(PixelFormat::fourcc(b"NV12")));
    assert!(!nv12.is_supported());
    assert_eq!(nv12.to_string(), "FourCC(NV12)");

    assert!(matches!(
      "yuv420p".parse::<PixelFormat>(),
      Err(FrameError::UnknownFormat(_))
    ));
  }

  #[test]
  fn pack_places_channels_by_format() {
    let image = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 255]));

    let bgra = CapturedFrame::pack(&image, PixelFormat::Bgra32, 0).unwrap();
    assert_eq!(bgra.as_raw().unwrap().data(), &[30, 20, 10, 255]);

    let argb = CapturedFrame::pack(&image, PixelFormat::Argb32, 0).unwrap();
    assert_eq!(argb.as_raw().unwrap().data(), &[255, 10, 20, 30]);

    let rgba = CapturedFrame::pack(&image, PixelFormat::Rgba32, 4).unwrap();
    let raw = rgba.as_raw().unwrap();
    assert_eq!(raw.stride(), 8);
    assert_eq!(&raw.data()[..4], &[10, 20, 30, 255]);

    assert!(matches!(
      CapturedFrame::pack(&image, PixelFormat::Other(0), 0),
      Err(FrameError::UnsupportedFormat(_))
    ));
  }
}
