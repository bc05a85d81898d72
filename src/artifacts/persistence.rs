//! Durable 层持久化接口与实现
//!
//! 宿主应用提供 get/put 键值接口，按 thread id 寻址；这里提供内存实现与 JSON 文件实现。
//! 文件实现每个 thread 一个 JSON 对象：`<dir>/<thread>.json`，内容为 path -> content。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::core::AgentError;

/// Durable 层的键值持久化接口
#[async_trait]
pub trait DurablePersistence: Send + Sync {
    async fn get(&self, thread_id: &str, path: &str) -> Result<Option<String>, AgentError>;

    async fn put(&self, thread_id: &str, path: &str, content: &str) -> Result<(), AgentError>;

    /// 某 thread 下的全部路径（有序）
    async fn keys(&self, thread_id: &str) -> Result<Vec<String>, AgentError>;
}

/// 进程内实现（未配置 durable_dir 时使用；进程退出即丢失）
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    threads: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurablePersistence for InMemoryPersistence {
    async fn get(&self, thread_id: &str, path: &str) -> Result<Option<String>, AgentError> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .and_then(|files| files.get(path).cloned()))
    }

    async fn put(&self, thread_id: &str, path: &str, content: &str) -> Result<(), AgentError> {
        self.threads
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn keys(&self, thread_id: &str) -> Result<Vec<String>, AgentError> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// thread id 只保留 [A-Za-z0-9_-]，其余替换为 '_'
pub fn sanitize_thread_id(thread_id: &str) -> String {
    let cleaned: String = thread_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

/// JSON 文件实现
#[derive(Debug)]
pub struct FilePersistence {
    dir: PathBuf,
    /// 串行化同一进程内的读-改-写
    write_lock: Mutex<()>,
}

impl FilePersistence {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn thread_file(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_thread_id(thread_id)))
    }

    /// 文件不存在时返回空表
    async fn load(&self, thread_id: &str) -> anyhow::Result<BTreeMap<String, String>> {
        let path = self.thread_file(thread_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
    }

    async fn save(&self, thread_id: &str, files: &BTreeMap<String, String>) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.thread_file(thread_id);
        let data = serde_json::to_string_pretty(files)?;
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }
}

fn persistence_err(e: anyhow::Error) -> AgentError {
    AgentError::Persistence(format!("{e:#}"))
}

#[async_trait]
impl DurablePersistence for FilePersistence {
    async fn get(&self, thread_id: &str, path: &str) -> Result<Option<String>, AgentError> {
        let files = self.load(thread_id).await.map_err(persistence_err)?;
        Ok(files.get(path).cloned())
    }

    async fn put(&self, thread_id: &str, path: &str, content: &str) -> Result<(), AgentError> {
        let _guard = self.write_lock.lock().await;
        let mut files = self.load(thread_id).await.map_err(persistence_err)?;
        files.insert(path.to_string(), content.to_string());
        self.save(thread_id, &files).await.map_err(persistence_err)
    }

    async fn keys(&self, thread_id: &str) -> Result<Vec<String>, AgentError> {
        let files = self.load(thread_id).await.map_err(persistence_err)?;
        Ok(files.into_keys().collect())
    }
}
