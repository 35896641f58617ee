//! 持久槽 - 保存序列化后的通知历史

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::notification::codec::EMPTY_DOCUMENT;

/// 跨进程重启保留的单个字符串记录
///
/// 调用是阻塞的，异步调用方应放在 `spawn_blocking` 中执行。
pub trait DurableSlot: Send + Sync {
    /// 当前值；尚未写入时返回空列表文档
    fn read(&self) -> Result<String>;

    /// 替换存储的值
    fn write(&self, value: &str) -> Result<()>;
}

/// 基于文件的持久槽。持有旁路锁文件的排他锁，先写临时文件再重命名覆盖
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 用户配置目录下的默认位置
    pub fn default_path() -> PathBuf {
        crate::config::NotifyConfig::config_dir().join("notifications.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn open_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        Ok(lock)
    }
}

impl DurableSlot for FileSlot {
    fn read(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(EMPTY_DOCUMENT.to_string());
        }

        let lock = self.open_lock()?;
        lock.lock_shared()?;
        let mut content = String::new();
        let result = File::open(&self.path)
            .and_then(|mut f| f.read_to_string(&mut content))
            .with_context(|| format!("reading {}", self.path.display()));
        lock.unlock()?;
        result?;

        if content.trim().is_empty() {
            return Ok(EMPTY_DOCUMENT.to_string());
        }
        Ok(content)
    }

    fn write(&self, value: &str) -> Result<()> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()?;

        let temp_path = self.path.with_extension("tmp");
        let result = fs::write(&temp_path, value)
            .and_then(|_| fs::rename(&temp_path, &self.path))
            .with_context(|| format!("writing {}", self.path.display()));

        lock.unlock()?;
        result
    }
}

/// 进程内持久槽，用于测试和回环演示
#[derive(Default)]
pub struct MemorySlot {
    value: Mutex<Option<String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置文档的持久槽
    pub fn with_value(value: impl Into<String>) -> Self {
        let slot = Self::default();
        if let Ok(mut guard) = slot.value.lock() {
            *guard = Some(value.into());
        }
        slot
    }

    /// 已存储的原始值
    pub fn value(&self) -> Option<String> {
        self.value.lock().ok().and_then(|g| g.clone())
    }

    /// 让后续读取失败
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// 让后续写入失败
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl DurableSlot for MemorySlot {
    fn read(&self) -> Result<String> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("memory slot read failure"));
        }
        let guard = self.value.lock().map_err(|_| anyhow!("memory slot poisoned"))?;
        Ok(guard.clone().unwrap_or_else(|| EMPTY_DOCUMENT.to_string()))
    }

    fn write(&self, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("memory slot write failure"));
        }
        let mut guard = self.value.lock().map_err(|_| anyhow!("memory slot poisoned"))?;
        *guard = Some(value.to_string());
        Ok(())
    }
}
