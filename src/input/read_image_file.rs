// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/read_image_file.rs - 图像文件模拟相机输入
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

//! 读取一张图像，按指定的通道顺序和行填充打包成相机缓冲区，并按帧率重复推送。
//!
//! ```text
//! image:///path/frame.png?format=bgra&repeat=30&fps=30&pad=16
//! ```
//!
//! - `format`: `argb` / `bgra` / `rgba`，默认 `bgra`
//! - `repeat`: 推送次数，默认 1；`0` 表示无限重复
//! - `fps`: 推送帧率，缺省时不限速
//! - `pad`: 每行附加的填充字节数，默认 0

use std::{
  collections::HashMap,
  str::FromStr,
  thread,
  time::{Duration, Instant},
};

use image::{ImageReader, RgbaImage};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{CapturedFrame, FrameError, PixelFormat},
  input::CaptureSource,
  query_map,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数 {key} 的值 '{value}' 无效")]
  InvalidParam { key: &'static str, value: String },
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(image::ImageError),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
}

impl From<std::io::Error> for ImageFileInputError {
  fn from(err: std::io::Error) -> Self {
    ImageFileInputError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileInputError {
  fn from(err: image::ImageError) -> Self {
    ImageFileInputError::ImageLoadError(err)
  }
}

pub struct ImageFileInput {
  template: CapturedFrame,
  repeat: Option<u64>,
  interval: Option<Duration>,
  emitted: u64,
  next_due: Option<Instant>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let query = query_map(url);
    let format = match query.get("format") {
      Some(format) => format.parse::<PixelFormat>()?,
      None => PixelFormat::Bgra32,
    };
    let repeat = param(&query, "repeat")?.unwrap_or(1u64);
    let fps = param::<f64>(&query, "fps")?;
    if fps.is_some_and(|fps| !(fps.is_finite() && fps > 0.0)) {
      return Err(invalid(&query, "fps"));
    }
    let pad = param(&query, "pad")?.unwrap_or(0usize);

    let path = url.path();
    info!("读取图像文件: {}", path);
    let image = ImageReader::open(path)?.decode()?.to_rgba8();

    let input = Self::from_image(&image, format, pad)?
      .with_repeat((repeat > 0).then_some(repeat))
      .with_fps(fps);
    Ok(input)
  }
}

fn invalid(query: &HashMap<String, String>, key: &'static str) -> ImageFileInputError {
  let value = query.get(key).cloned().unwrap_or_default();
  error!("输入参数 {} 无效: {}", key, value);
  ImageFileInputError::InvalidParam { key, value }
}

fn param<T: FromStr>(
  query: &HashMap<String, String>,
  key: &'static str,
) -> Result<Option<T>, ImageFileInputError> {
  match query.get(key) {
    None => Ok(None),
    Some(value) => value
      .parse::<T>()
      .map(Some)
      .map_err(|_| invalid(query, key)),
  }
}

impl ImageFileInput {
  pub fn from_image(
    image: &RgbaImage,
    format: PixelFormat,
    pad: usize,
  ) -> Result<Self, ImageFileInputError> {
    let template = CapturedFrame::pack(image, format, pad)?;
    debug!(
      "模拟相机帧: {}x{}, 格式 {}, 行填充 {} 字节",
      template.width(),
      template.height(),
      format,
      pad
    );
    Ok(Self {
      template,
      repeat: Some(1),
      interval: None,
      emitted: 0,
      next_due: None,
    })
  }

  /// `None` 表示无限重复
  pub fn with_repeat(mut self, repeat: Option<u64>) -> Self {
    self.repeat = repeat;
    self
  }

  pub fn with_fps(mut self, fps: Option<f64>) -> Self {
    self.interval = fps
      .filter(|fps| fps.is_finite() && *fps > 0.0)
      .map(|fps| Duration::from_secs_f64(1.0 / fps));
    self
  }
}

impl Iterator for ImageFileInput {
  type Item = CapturedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.repeat.is_some_and(|repeat| self.emitted >= repeat) {
      return None;
    }

    if let Some(interval) = self.interval {
      let now = Instant::now();
      if let Some(due) = self.next_due.filter(|due| *due > now) {
        thread::sleep(due - now);
      }
      let base = self.next_due.map_or(now, |due| due.max(now));
      self.next_due = Some(base + interval);
    }

    let frame = self.template.clone().with_index(self.emitted);
    self.emitted += 1;
    Some(frame)
  }
}

impl CaptureSource for ImageFileInput {
  fn pixel_format(&self) -> PixelFormat {
    self.template.format()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::Result;
  use image::Rgba;

  #[test]
  fn repeats_with_increasing_index() -> Result<()> {
    let image = RgbaImage::from_pixel(4, 2, Rgba([1, 2, 3, 255]));
    let input = ImageFileInput::from_image(&image, PixelFormat::Argb32, 8)?.with_repeat(Some(3));
    assert_eq!(input.pixel_format(), PixelFormat::Argb32);

    let frames = input.collect::<Vec<_>>();
    assert_eq!(frames.iter().map(|f| f.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(frames[0].as_raw()?.stride(), 4 * 4 + 8);
    Ok(())
  }

  #[test]
  fn unbounded_repeat_keeps_going() -> Result<()> {
    let image = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
    let input = ImageFileInput::from_image(&image, PixelFormat::Bgra32, 0)?.with_repeat(None);
    assert_eq!(input.take(100).count(), 100);
    Ok(())
  }

  #[test]
  fn paced_by_fps() -> Result<()> {
    let image = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
    let input = ImageFileInput::from_image(&image, PixelFormat::Bgra32, 0)?
      .with_repeat(Some(3))
      .with_fps(Some(50.0));
    let start = Instant::now();
    assert_eq!(input.count(), 3);
    // 三帧之间有两个 20ms 间隔
    assert!(start.elapsed() >= Duration::from_millis(35));
    Ok(())
  }

  #[test]
  fn loads_from_url() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("frame.png");
    RgbaImage::from_pixel(3, 3, Rgba([9, 8, 7, 255])).save(&path)?;

    let url = Url::parse(&format!(
      "image://{}?format=rgba&repeat=2&pad=4",
      path.display()
    ))?;
    let input = ImageFileInput::from_url(&url)?;
    assert_eq!(input.pixel_format(), PixelFormat::Rgba32);

    let frames = input.collect::<Vec<_>>();
    assert_eq!(frames.len(), 2);
    let raw = frames[1].as_raw()?;
    assert_eq!(raw.stride(), 16);
    assert_eq!(&raw.data()[..4], &[9, 8, 7, 255]);
    Ok(())
  }

  #[test]
  fn rejects_invalid_params() -> Result<()> {
    for (query, key) in [
      ("repeat=-1", "repeat"),
      ("repeat=ten", "repeat"),
      ("fps=fast", "fps"),
      ("fps=0", "fps"),
      ("pad=4px", "pad"),
    ] {
      let url = Url::parse(&format!("image:///no/such/frame.png?{}", query))?;
      match ImageFileInput::from_url(&url) {
        Err(ImageFileInputError::InvalidParam { key: actual, .. }) => assert_eq!(actual, key),
        Err(other) => panic!("{}: 错误类型不符: {}", query, other),
        Ok(_) => panic!("{}: 应当被拒绝", query),
      }
    }
    Ok(())
  }

  #[test]
  fn rejects_wrong_scheme_and_format() -> Result<()> {
    let url = Url::parse("video:///dev/video0")?;
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemeMismatch)
    ));

    let image = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
    let nv12 = PixelFormat::Other(PixelFormat::fourcc(b"NV12"));
    assert!(matches!(
      ImageFileInput::from_image(&image, nv12, 0),
      Err(ImageFileInputError::FrameError(FrameError::UnsupportedFormat(_)))
    ));
    Ok(())
  }
}
