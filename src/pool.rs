// 该文件是 Qianli （千里眼） 项目的一部分。
// src/pool.rs - 复用的 RGB 缓冲池
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

use std::ops::{Deref, DerefMut};

use tracing::debug;

use crate::frame::RgbNhwcFrame;

/// 固定尺寸的 RGB 帧缓冲池
///
/// 尺寸在创建时确定，之后不再改变。通过 [`FramePool::acquire`] 取出的缓冲区
/// 在守卫释放时自动归还，无论是正常返回还是提前出错。
#[derive(Debug)]
pub struct FramePool {
  width: usize,
  height: usize,
  free: Vec<RgbNhwcFrame>,
}

impl FramePool {
  pub fn new(width: usize, height: usize, capacity: usize) -> Self {
    let free = (0..capacity.max(1))
      .map(|_| RgbNhwcFrame::with_shape(height, width))
      .collect();
    Self {
      width,
      height,
      free,
    }
  }

  pub fn acquire(&mut self) -> PooledFrame<'_> {
    let frame = match self.free.pop() {
      Some(frame) => frame,
      None => {
        debug!("缓冲池已空, 追加分配 {}x{} 缓冲区", self.width, self.height);
        RgbNhwcFrame::with_shape(self.height, self.width)
      }
    };
    PooledFrame { pool: self, frame }
  }

  pub fn available(&self) -> usize {
    self.free.len()
  }

  pub fn shape(&self) -> (usize, usize) {
    (self.width, self.height)
  }
}

pub struct PooledFrame<'a> {
  pool: &'a mut FramePool,
  frame: RgbNhwcFrame,
}

impl Deref for PooledFrame<'_> {
  type Target = RgbNhwcFrame;

  fn deref(&self) -> &Self::Target {
    &self.frame
  }
}

impl DerefMut for PooledFrame<'_> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.frame
  }
}

impl Drop for PooledFrame<'_> {
  fn drop(&mut self) {
    self.pool.free.push(std::mem::take(&mut self.frame));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fill_then_fail(pool: &mut FramePool) -> Result<(), &'static str> {
    let mut frame = pool.acquire();
    frame.as_mut().fill(7);
    Err("转换失败")
  }

  #[test]
  fn buffer_returns_on_drop() {
    let mut pool = FramePool::new(2, 2, 1);
    assert_eq!(pool.available(), 1);
    {
      let frame = pool.acquire();
      assert_eq!(frame.width(), 2);
      assert_eq!(frame.as_nhwc().len(), 12);
    }
    assert_eq!(pool.available(), 1);
  }

  #[test]
  fn buffer_returns_on_error_path() {
    let mut pool = FramePool::new(4, 3, 1);
    assert!(fill_then_fail(&mut pool).is_err());
    assert_eq!(pool.available(), 1);

    // 归还后的缓冲区被复用，而不是重新分配
    let frame = pool.acquire();
    assert!(frame.as_nhwc().iter().all(|&v| v == 7));
  }

  #[test]
  fn pool_keeps_at_least_one_buffer() {
    let mut pool = FramePool::new(3, 5, 1);
    let first = pool.acquire();
    drop(first);
    assert_eq!(pool.available(), 1);

    let mut pool = FramePool::new(3, 5, 0);
    assert_eq!(pool.available(), 1);
    let frame = pool.acquire();
    assert_eq!((frame.width(), frame.height()), (3, 5));
  }
}
