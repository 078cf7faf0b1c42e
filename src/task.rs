// 该文件是 Qianli （千里眼） 项目的一部分。
// src/task.rs - 任务调度
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use anyhow::anyhow;
use crossbeam_channel::{TrySendError, bounded, unbounded};
use tracing::{debug, info, warn};

use crate::{
  engine::InferenceEngine,
  frame::CapturedFrame,
  input::CaptureSource,
  output::Render,
  pipeline::{FrameOutcome, FrameResult, Pipeline, PipelineStats},
};

/// 预热次数，统计平均推理时间时跳过
const WARMUP_RUNS: usize = 2;

pub trait Task<I, E, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: Pipeline<E>, output: O) -> Result<TaskSummary, Self::Error>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSummary {
  pub stats: PipelineStats,
  /// 采集到的帧数
  pub captured: u64,
  /// 推理线程忙而被丢弃的帧数
  pub busy_dropped: u64,
  pub rendered: u64,
  pub render_failed: u64,
  pub average_inference: Option<Duration>,
}

fn average_inference(times: &[Duration]) -> Option<Duration> {
  let measured = if times.len() > WARMUP_RUNS {
    &times[WARMUP_RUNS..]
  } else {
    times
  };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

fn render_or_warn<O>(output: &O, result: &FrameResult, summary: &mut TaskSummary)
where
  O: Render,
  O::Error: std::fmt::Display,
{
  match output.render_result(result) {
    Ok(()) => summary.rendered += 1,
    Err(e) => {
      warn!("第 {} 帧渲染失败: {}", result.index, e);
      summary.render_failed += 1;
    }
  }
}

fn first_frame<I: CaptureSource>(input: &mut I) -> anyhow::Result<CapturedFrame> {
  input.next().ok_or_else(|| anyhow!("没有输入帧"))
}

pub struct OneShotTask;

impl<I, E, O> Task<I, E, O> for OneShotTask
where
  I: CaptureSource,
  E: InferenceEngine,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    mut pipeline: Pipeline<E>,
    output: O,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    pipeline.validate_format(input.pixel_format())?;
    let frame = first_frame(&mut input)?;
    info!("输入帧获取成功，开始推理...");

    let result = pipeline.infer(&frame.as_raw()?, frame.index)?;
    info!(
      "推理完成，耗时: {:.2?} / {:.2?}",
      result.inference_time, result.total_time
    );
    output.render_result(&result)?;
    info!("渲染完成");

    Ok(TaskSummary {
      stats: pipeline.stats(),
      captured: 1,
      rendered: 1,
      average_inference: Some(result.inference_time),
      ..TaskSummary::default()
    })
  }
}

/// 同一帧重复推理，用于测量平均推理时间
pub struct RepeatShotTask {
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat;
    self
  }
}

impl<I, E, O> Task<I, E, O> for RepeatShotTask
where
  I: CaptureSource,
  E: InferenceEngine,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    mut pipeline: Pipeline<E>,
    output: O,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    pipeline.validate_format(input.pixel_format())?;
    let frame = first_frame(&mut input)?;
    let raw = frame.as_raw()?;
    info!("输入帧获取成功，开始推理...");

    let mut summary = TaskSummary {
      captured: 1,
      ..TaskSummary::default()
    };
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let result = pipeline.infer(&raw, i as u64)?;
      info!(
        "({})推理完成，耗时: {:.2?} / {:.2?}",
        i, result.inference_time, result.total_time
      );
      times.push(result.inference_time);
      output.render_result(&result)?;
      summary.rendered += 1;
    }

    summary.stats = pipeline.stats();
    summary.average_inference = average_inference(&times);
    if let Some(average) = summary.average_inference {
      warn!("平均推理时间: {:.2?}", average);
    }
    Ok(summary)
  }
}

/// 持续处理采集流
///
/// 采集在调用线程上进行，推理与展示各占一个线程。采集端通过零容量通道
/// 交给推理线程：只有推理线程正在等待时交接才会成功，否则该帧直接丢弃，
/// 通道中不会积压旧帧。第一帧等待推理线程就绪后交接。
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  interrupt: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 安装 Ctrl-C 处理器，收到信号后停止采集
  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }
}

impl<I, E, O> Task<I, E, O> for ContinuousTask
where
  I: CaptureSource,
  E: InferenceEngine + Send,
  O: Render + Send,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    mut pipeline: Pipeline<E>,
    output: O,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    pipeline.validate_format(input.pixel_format())?;

    let stop = Arc::new(AtomicBool::new(false));
    if self.interrupt {
      let stop = stop.clone();
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        stop.store(true, Ordering::SeqCst);
      })?;
    }

    let (frame_tx, frame_rx) = bounded::<CapturedFrame>(0);
    let (result_tx, result_rx) = unbounded::<FrameResult>();

    let lane = &mut pipeline;
    let (captured, busy_dropped, worker, presenter) = thread::scope(|s| {
      let worker = s.spawn(move || -> anyhow::Result<()> {
        for frame in frame_rx.iter() {
          match lane.process_captured(&frame, Instant::now())? {
            FrameOutcome::Completed(result) => {
              if result_tx.send(result).is_err() {
                warn!("展示线程已退出");
                break;
              }
            }
            FrameOutcome::Throttled => debug!("第 {} 帧被限流丢弃", frame.index),
            FrameOutcome::Failed(_) => {}
          }
        }
        Ok(())
      });

      let presenter = s.spawn(move || {
        let mut summary = TaskSummary::default();
        for result in result_rx.iter() {
          render_or_warn(&output, &result, &mut summary);
        }
        (summary.rendered, summary.render_failed)
      });

      let mut captured = 0u64;
      let mut busy_dropped = 0u64;
      for frame in input {
        if stop.load(Ordering::SeqCst) {
          warn!("中断信号接收，退出任务循环");
          break;
        }

        captured += 1;
        let index = frame.index;
        let handoff = if captured == 1 {
          frame_tx
            .send(frame)
            .map_err(|err| TrySendError::Disconnected(err.into_inner()))
        } else {
          frame_tx.try_send(frame)
        };
        match handoff {
          Ok(()) => {}
          Err(TrySendError::Full(_)) => {
            busy_dropped += 1;
            debug!("推理线程忙，丢弃第 {} 帧", index);
          }
          Err(TrySendError::Disconnected(_)) => {
            warn!("推理线程已退出，停止采集");
            break;
          }
        }

        if self.frame_number.is_some_and(|n| captured >= n as u64) {
          info!("达到指定帧数 {}, 退出任务循环", captured);
          break;
        }
      }
      drop(frame_tx);

      (captured, busy_dropped, worker.join(), presenter.join())
    });

    worker.map_err(|_| anyhow!("推理线程异常退出"))??;
    let (rendered, render_failed) = presenter.map_err(|_| anyhow!("展示线程异常退出"))?;

    let summary = TaskSummary {
      stats: pipeline.stats(),
      captured,
      busy_dropped,
      rendered,
      render_failed,
      average_inference: None,
    };
    info!(
      "任务完成: 采集 {} 帧, 忙丢弃 {}, 限流 {}, 失败 {}, 完成 {}, 渲染 {}",
      summary.captured,
      summary.busy_dropped,
      summary.stats.throttled,
      summary.stats.failed,
      summary.stats.completed,
      summary.rendered
    );
    Ok(summary)
  }
}
