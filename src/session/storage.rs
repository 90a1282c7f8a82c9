//! 会话存储后端
//!
//! - NoopStorage：丢弃所有事件
//! - MemoryStorage：进程内 HashMap（测试与嵌入使用）
//! - FileStorage：每个会话一个 JSONL 文件 `{dir}/{session_id}.jsonl`，只追加；
//!   读取时跳过损坏或截断的行

use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};

use crate::session::SessionEvent;

/// 存储错误
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Event serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 事件日志存储
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn append(&self, session_id: &str, event: &SessionEvent) -> Result<(), SessionError>;

    /// 按追加顺序返回全部事件；会话不存在时返回空
    async fn read_all(&self, session_id: &str) -> Result<Vec<SessionEvent>, SessionError>;

    async fn exists(&self, session_id: &str) -> Result<bool, SessionError>;

    async fn flush(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// 丢弃事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

#[async_trait]
impl SessionStorage for NoopStorage {
    async fn append(&self, _session_id: &str, _event: &SessionEvent) -> Result<(), SessionError> {
        Ok(())
    }

    async fn read_all(&self, _session_id: &str) -> Result<Vec<SessionEvent>, SessionError> {
        Ok(Vec::new())
    }

    async fn exists(&self, _session_id: &str) -> Result<bool, SessionError> {
        Ok(false)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    sessions: RwLock<HashMap<String, Vec<SessionEvent>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 截断某会话到前 n 条事件（用于模拟崩溃）
    pub async fn truncate(&self, session_id: &str, n: usize) {
        if let Some(events) = self.sessions.write().await.get_mut(session_id) {
            events.truncate(n);
        }
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn append(&self, session_id: &str, event: &SessionEvent) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn read_all(&self, session_id: &str) -> Result<Vec<SessionEvent>, SessionError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn exists(&self, session_id: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.read().await.contains_key(session_id))
    }
}

/// JSONL 文件存储
pub struct FileStorage {
    dir: PathBuf,
    /// 串行化追加，保证并发工具结果各自成行；集合内为本进程已检查过结尾的文件
    write_lock: Mutex<HashSet<PathBuf>>,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(HashSet::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf, SessionError> {
        let invalid = session_id.is_empty()
            || session_id == "."
            || session_id == ".."
            || session_id.contains(['/', '\\', '\0']);
        if invalid {
            return Err(SessionError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.dir.join(format!("{session_id}.jsonl")))
    }
}

/// 文件非空且最后一个字节不是换行
async fn ends_mid_line(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

#[async_trait]
impl SessionStorage for FileStorage {
    async fn append(&self, session_id: &str, event: &SessionEvent) -> Result<(), SessionError> {
        let path = self.session_path(session_id)?;
        let mut line = event.to_json_line()?;
        line.push('\n');

        let mut checked = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;
        // 上次进程崩溃可能留下没有换行的半行；先补换行，新事件另起一行
        if checked.insert(path.clone()) && ends_mid_line(&mut file).await? {
            tracing::warn!(session = %session_id, "session log ends with a partial line, starting a new line");
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn read_all(&self, session_id: &str) -> Result<Vec<SessionEvent>, SessionError> {
        let path = self.session_path(session_id)?;
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);

        let mut events = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        session = %session_id,
                        line = lineno + 1,
                        error = %e,
                        "skipping corrupt session event"
                    );
                }
            }
        }
        Ok(events)
    }

    async fn exists(&self, session_id: &str) -> Result<bool, SessionError> {
        let path = self.session_path(session_id)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn flush(&self) -> Result<(), SessionError> {
        // 每次追加都在锁内完成写入；拿到锁即表示没有进行中的写
        let _guard = self.write_lock.lock().await;
        Ok(())
    }
}
