// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/labels.rs - 标签表
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

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("标签表为空")]
  Empty,
}

/// 启动时加载一次的标签表
///
/// 检测模型的第 0 项保留给背景类。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Box<[String]>,
}

impl Labels {
  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let contents = std::fs::read_to_string(path)?;
    let labels = Self::parse(&contents)?;
    debug!("标签数量: {}", labels.len());
    Ok(labels)
  }

  /// 按行切分，去掉行尾的 `\r` 以及文件末尾的空行
  pub fn parse(contents: &str) -> Result<Self, LabelError> {
    let mut names = contents
      .lines()
      .map(|line| line.trim_end_matches('\r').to_string())
      .collect::<Vec<_>>();
    while names.last().is_some_and(|name| name.trim().is_empty()) {
      names.pop();
    }
    Self::from_names(names)
  }

  pub fn from_names<S: Into<String>>(
    names: impl IntoIterator<Item = S>,
  ) -> Result<Self, LabelError> {
    let names = names.into_iter().map(Into::into).collect::<Box<[String]>>();
    if names.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Self { names })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}
