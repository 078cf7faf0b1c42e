// 该文件是 Qianli （千里眼） 项目的一部分。
// src/throttle.rs - 帧率限流
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

use std::time::{Duration, Instant};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(200);

/// 距上次运行是否已经过了至少 `min_interval`
///
/// `now` 早于 `last` 时视为间隔为零。
pub fn should_run(now: Instant, last: Instant, min_interval: Duration) -> bool {
  now.saturating_duration_since(last) >= min_interval
}

/// 流水线持有的限流状态
///
/// 第一帧总是被放行；放行时立即记录时间戳，随后的慢速处理不会推迟下一次放行的计时起点。
#[derive(Debug, Clone)]
pub struct FrameThrottle {
  min_interval: Duration,
  last_run: Option<Instant>,
}

impl Default for FrameThrottle {
  fn default() -> Self {
    Self::new(DEFAULT_MIN_INTERVAL)
  }
}

impl FrameThrottle {
  pub fn new(min_interval: Duration) -> Self {
    Self {
      min_interval,
      last_run: None,
    }
  }

  pub fn min_interval(&self) -> Duration {
    self.min_interval
  }

  pub fn last_run(&self) -> Option<Instant> {
    self.last_run
  }

  pub fn admit(&mut self, now: Instant) -> bool {
    let admitted = match self.last_run {
      None => true,
      Some(last) => should_run(now, last, self.min_interval),
    };
    if admitted {
      self.last_run = Some(now);
    }
    admitted
  }
}
