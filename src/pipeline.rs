// 该文件是 Qianli （千里眼） 项目的一部分。
// src/pipeline.rs - 单帧推理流水线
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

//! # 推理流水线
//!
//! 每帧依次经过：限流 → 像素转换 → 写入输入张量 → 推理 → 读取输出 → 解码。
//!
//! 状态机为 `Idle → Converting → Inferring → Decoding → Idle`，任一阶段失败都会
//! 放弃当前帧并回到 `Idle`，不产生部分结果。配置类错误直接返回 `Err`，
//! 单帧错误记录日志后以 [`FrameOutcome::Failed`] 返回。

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  convert::{ConvertError, PixelConverter},
  engine::InferenceEngine,
  frame::{CapturedFrame, FrameError, PixelFormat, RawFrame},
  model::{DecodeError, DecodeMode, DecodeResult, Decoder, Labels},
  pool::FramePool,
  tensor::{InputTensor, TensorError},
  throttle::{DEFAULT_MIN_INTERVAL, FrameThrottle},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("输入规格无效: {0}")]
  InvalidSpec(TensorError),
  #[error("模型输出数量不足: 解码需要 {expected} 个, 模型只有 {actual} 个")]
  OutputCount { expected: usize, actual: usize },
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(PixelFormat),
  #[error("帧无效: {0}")]
  Frame(#[from] FrameError),
  #[error("像素转换失败: {0}")]
  Convert(#[from] ConvertError),
  #[error("张量编解码失败: {0}")]
  Tensor(#[from] TensorError),
  #[error("推理引擎错误: {0}")]
  Engine(Box<dyn std::error::Error + Send + Sync>),
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
}

impl PipelineError {
  pub fn engine<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    PipelineError::Engine(Box::new(err))
  }

  /// 配置错误会终止流水线，其余错误只丢弃当前帧
  pub fn is_fatal(&self) -> bool {
    match self {
      PipelineError::InvalidSpec(_)
      | PipelineError::OutputCount { .. }
      | PipelineError::UnsupportedFormat(_) => true,
      PipelineError::Decode(err) => err.is_fatal(),
      PipelineError::Frame(_)
      | PipelineError::Convert(_)
      | PipelineError::Tensor(_)
      | PipelineError::Engine(_) => false,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
  #[default]
  Idle,
  Converting,
  Inferring,
  Decoding,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
  pub mode: DecodeMode,
  pub min_interval: Duration,
  pub pool_capacity: usize,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      mode: DecodeMode::detection(),
      min_interval: DEFAULT_MIN_INTERVAL,
      pool_capacity: 1,
    }
  }
}

impl PipelineConfig {
  pub fn with_mode(mut self, mode: DecodeMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
    self.min_interval = min_interval;
    self
  }
}

/// 交给展示端的单帧结果，独立拥有全部数据
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
  pub index: u64,
  /// 结果坐标所在的源图像尺寸
  pub image_size: (u32, u32),
  pub inference_time: Duration,
  pub total_time: Duration,
  pub result: DecodeResult,
}

#[derive(Debug)]
pub enum FrameOutcome {
  Throttled,
  Failed(PipelineError),
  Completed(FrameResult),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
  pub received: u64,
  pub throttled: u64,
  pub failed: u64,
  pub completed: u64,
}

pub struct Pipeline<E> {
  engine: E,
  labels: Labels,
  decoder: Decoder,
  converter: PixelConverter,
  pool: FramePool,
  input: InputTensor,
  throttle: FrameThrottle,
  state: PipelineState,
  stats: PipelineStats,
}

impl<E: InferenceEngine> Pipeline<E> {
  pub fn new(engine: E, labels: Labels, config: PipelineConfig) -> Result<Self, PipelineError> {
    let spec = *engine.input_spec();
    let input = InputTensor::new(spec).map_err(|e| {
      error!("模型输入规格无效: {}", e);
      PipelineError::InvalidSpec(e)
    })?;

    let decoder = Decoder::from(config.mode);
    if engine.num_outputs() < decoder.output_count() {
      error!(
        "模型输出数量为 {}, {} 解码需要 {}",
        engine.num_outputs(),
        config.mode,
        decoder.output_count()
      );
      return Err(PipelineError::OutputCount {
        expected: decoder.output_count(),
        actual: engine.num_outputs(),
      });
    }

    info!(
      "流水线就绪: {}, 输入 {}x{}x{} ({}), 批大小 {}, 最小间隔 {:?}",
      config.mode,
      spec.width,
      spec.height,
      spec.channels,
      spec.element_type,
      spec.batch,
      config.min_interval
    );

    Ok(Self {
      engine,
      labels,
      decoder,
      converter: PixelConverter::new(config.mode.resize_mode()),
      pool: FramePool::new(spec.width, spec.height, config.pool_capacity),
      input,
      throttle: FrameThrottle::new(config.min_interval),
      state: PipelineState::Idle,
      stats: PipelineStats::default(),
    })
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  pub fn stats(&self) -> PipelineStats {
    self.stats
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  /// 启动时检查采集端的像素格式
  pub fn validate_format(&self, format: PixelFormat) -> Result<(), PipelineError> {
    if !self.converter.supports(format) {
      error!("采集端像素格式 {} 不受支持", format);
      return Err(PipelineError::UnsupportedFormat(format));
    }
    Ok(())
  }

  /// 处理一帧，先经过限流
  pub fn process(
    &mut self,
    frame: &RawFrame<'_>,
    index: u64,
    now: Instant,
  ) -> Result<FrameOutcome, PipelineError> {
    self.stats.received += 1;
    if !self.throttle.admit(now) {
      self.stats.throttled += 1;
      return Ok(FrameOutcome::Throttled);
    }

    let result = self.run(frame, index);
    self.settle(index, result)
  }

  pub fn process_captured(
    &mut self,
    frame: &CapturedFrame,
    now: Instant,
  ) -> Result<FrameOutcome, PipelineError> {
    match frame.as_raw() {
      Ok(raw) => self.process(&raw, frame.index, now),
      Err(err) => {
        self.stats.received += 1;
        self.settle(frame.index, Err(err.into()))
      }
    }
  }

  /// 跳过限流直接处理一帧，单次与重复任务使用
  pub fn infer(&mut self, frame: &RawFrame<'_>, index: u64) -> Result<FrameResult, PipelineError> {
    self.stats.received += 1;
    let result = self.run(frame, index);
    match &result {
      Ok(_) => self.stats.completed += 1,
      Err(_) => self.stats.failed += 1,
    }
    result
  }

  fn settle(
    &mut self,
    index: u64,
    result: Result<FrameResult, PipelineError>,
  ) -> Result<FrameOutcome, PipelineError> {
    match result {
      Ok(result) => {
        self.stats.completed += 1;
        Ok(FrameOutcome::Completed(result))
      }
      Err(err) if err.is_fatal() => {
        error!("第 {} 帧出现配置错误, 流水线终止: {}", index, err);
        self.stats.failed += 1;
        Err(err)
      }
      Err(err) => {
        warn!("第 {} 帧处理失败, 丢弃: {}", index, err);
        self.stats.failed += 1;
        Ok(FrameOutcome::Failed(err))
      }
    }
  }

  fn run(&mut self, frame: &RawFrame<'_>, index: u64) -> Result<FrameResult, PipelineError> {
    let result = self.run_stages(frame, index);
    self.state = PipelineState::Idle;
    result
  }

  fn run_stages(&mut self, frame: &RawFrame<'_>, index: u64) -> Result<FrameResult, PipelineError> {
    let start = Instant::now();

    self.state = PipelineState::Converting;
    {
      let mut pixels = self.pool.acquire();
      self.converter.convert_into(frame, &mut pixels)?;
      self.input.write(&pixels)?;
    }

    self.state = PipelineState::Inferring;
    self
      .engine
      .set_input(&self.input)
      .map_err(PipelineError::engine)?;
    let infer_start = Instant::now();
    self.engine.invoke().map_err(PipelineError::engine)?;
    let inference_time = infer_start.elapsed();

    self.state = PipelineState::Decoding;
    let mut outputs = Vec::with_capacity(self.decoder.output_count());
    for i in 0..self.decoder.output_count() {
      let raw = self.engine.output(i).map_err(PipelineError::engine)?;
      outputs.push(raw.read()?);
    }
    let result = self.decoder.decode(&outputs, &self.labels, frame.size())?;

    let total_time = start.elapsed();
    debug!(
      "第 {} 帧完成: {} 项结果, 推理 {:.2?}, 总计 {:.2?}",
      index,
      result.len(),
      inference_time,
      total_time
    );

    Ok(FrameResult {
      index,
      image_size: frame.size(),
      inference_time,
      total_time,
      result,
    })
  }
}
