//! 本地文件展示器 - 把提醒追加到 JSONL 托盘文件

use anyhow::Result;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::debug;

use crate::notification::event::NotificationKind;
use crate::notification::presenter::{Alert, AlertPresenter, PresentResult};

/// 托盘文件中的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub ts: DateTime<Utc>,
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    /// 截断后的消息
    pub summary: String,
}

/// 每条提醒追加到 JSONL 文件；全部撤下时清空文件
pub struct LocalFilePresenter {
    path: PathBuf,
}

impl LocalFilePresenter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 托盘中的提醒，按时间从旧到新
    pub fn read_all(&self) -> Vec<AlertRecord> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }

    fn append(&self, record: &AlertRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.lock_exclusive()?;
        let written = writeln!(file, "{}", serde_json::to_string(record)?);
        file.unlock()?;
        written?;
        Ok(())
    }
}

impl AlertPresenter for LocalFilePresenter {
    fn name(&self) -> &str {
        "local_file"
    }

    fn present(&self, alert: &Alert) -> Result<PresentResult> {
        let record = AlertRecord {
            ts: Utc::now(),
            id: alert.id.clone(),
            kind: alert.kind,
            title: alert.title.clone(),
            summary: truncate_summary(&alert.message, 100),
        };
        self.append(&record)?;
        debug!(presenter = "local_file", id = %alert.id, "Alert appended to tray");
        Ok(PresentResult::Shown)
    }

    fn dismiss_all(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.lock_exclusive()?;
        let truncated = file.set_len(0);
        file.unlock()?;
        Ok(truncated?)
    }
}

/// 按字符边界截断并追加省略号
fn truncate_summary(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_present_appends_and_dismiss_truncates() {
        let dir = TempDir::new().unwrap();
        let presenter = LocalFilePresenter::new(dir.path().join("tray").join("alerts.jsonl"));

        presenter.present(&Alert::new("a", "New booking", "Table for 2")).unwrap();
        presenter.present(&Alert::new("b", "New booking", "Table for 4")).unwrap();
        let records = presenter.read_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, "b");

        presenter.dismiss_all().unwrap();
        assert!(presenter.read_all().is_empty());
    }

    #[test]
    fn test_dismiss_without_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let presenter = LocalFilePresenter::new(dir.path().join("missing.jsonl"));
        presenter.dismiss_all().unwrap();
    }

    #[test]
    fn test_truncate_summary() {
        assert_eq!(truncate_summary("short", 10), "short");
        assert_eq!(truncate_summary("this is a long message", 10), "this is...");
        assert_eq!(truncate_summary("预订已确认请准时到达", 5), "预订...");
    }
}
