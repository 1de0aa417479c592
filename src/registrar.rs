//! 目录注册
//!
//! 递归遍历根目录，把每个子目录（含根）以非递归方式注册到监听器。
//! 按物理目录标识（inode / file index）去重，符号链接成环时也能结束。
//! 目录被删除后需要 [`Registrar::forget`]，否则复用同一 inode 的新目录会被跳过。

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use file_id::FileId;
use notify::{RecursiveMode, Watcher};

use crate::error::{Error, Result};

/// 可注册监听的目标
pub trait WatchTarget: Send {
    /// 监听单个目录或文件（非递归）
    fn add(&mut self, path: &Path) -> notify::Result<()>;
}

impl WatchTarget for notify::RecommendedWatcher {
    fn add(&mut self, path: &Path) -> notify::Result<()> {
        self.watch(path, RecursiveMode::NonRecursive)
    }
}

/// 一次遍历的结果
#[derive(Debug, Default)]
pub struct WalkSummary {
    /// 新注册的目录数
    pub directories: usize,
    /// 遍历中遇到的普通文件
    pub files: Vec<PathBuf>,
}

/// 目录注册器，保存已访问的物理目录
#[derive(Debug, Default)]
pub struct Registrar {
    visited: HashSet<FileId>,
    /// 注册路径 → 物理标识；删除后按路径查找
    watched: HashMap<PathBuf, FileId>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 `root` 下所有目录
    ///
    /// `root` 不是目录时什么都不做。任一目录注册失败即返回 [`Error::WatchSetup`]，
    /// 已注册的目录不回滚。
    pub fn walk<W: WatchTarget + ?Sized>(
        &mut self,
        target: &mut W,
        root: &Path,
    ) -> Result<WalkSummary> {
        let mut summary = WalkSummary::default();
        if !root.is_dir() {
            return Ok(summary);
        }

        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let id = file_id::get_file_id(&dir).map_err(|e| setup_error(&dir, e))?;
            if !self.visited.insert(id) {
                tracing::debug!("Skipping already registered directory {:?}", dir);
                continue;
            }

            if let Err(source) = target.add(&dir) {
                self.visited.remove(&id);
                return Err(Error::WatchSetup { path: dir, source });
            }
            self.watched.insert(dir.clone(), id);
            summary.directories += 1;
            tracing::trace!("👁️ Watching directory {:?}", dir);

            for entry in fs::read_dir(&dir).map_err(|e| setup_error(&dir, e))? {
                let entry = entry.map_err(|e| setup_error(&dir, e))?;
                let path = entry.path();

                // 跟随符号链接；悬空链接直接跳过
                let metadata = match fs::metadata(&path) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!("Skipping unreadable entry {:?}: {}", path, e);
                        continue;
                    }
                };

                if metadata.is_dir() {
                    stack.push(path);
                } else if metadata.is_file() {
                    summary.files.push(path);
                }
            }
        }

        Ok(summary)
    }

    /// 忘记 `path` 及其下所有已注册目录，返回忘记的数量
    ///
    /// 删除事件触发；监听器在目录删除时已自动移除对应 watch。
    pub fn forget(&mut self, path: &Path) -> usize {
        let gone: Vec<PathBuf> = self
            .watched
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();

        for p in &gone {
            if let Some(id) = self.watched.remove(p) {
                self.visited.remove(&id);
            }
        }
        gone.len()
    }

    /// 已注册的物理目录数
    pub fn registered(&self) -> usize {
        self.visited.len()
    }
}

fn setup_error(path: &Path, err: std::io::Error) -> Error {
    Error::WatchSetup {
        path: path.to_path_buf(),
        source: notify::Error::io(err),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// 记录注册路径，可指定某个路径注册失败
    #[derive(Debug, Default)]
    pub struct RecordingTarget {
        pub added: Vec<PathBuf>,
        pub fail_on: Option<PathBuf>,
    }

    impl WatchTarget for RecordingTarget {
        fn add(&mut self, path: &Path) -> notify::Result<()> {
            if self.fail_on.as_deref() == Some(path) {
                return Err(notify::Error::generic("refused"));
            }
            self.added.push(path.to_path_buf());
            Ok(())
        }
    }
}
