//! 分层产物存储
//!
//! - Ephemeral：本次编排调用内有效，批次结束随 store 一起丢弃
//! - Durable：按 thread id 寻址，经 DurablePersistence 跨运行保存
//!
//! 同一运行内的写入按程序顺序对后续读取立即可见。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::artifacts::DurablePersistence;
use crate::core::AgentError;

/// 最终报告的约定文件名
pub const FINAL_REPORT_PATH: &str = "final_report.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Ephemeral,
    Durable,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Ephemeral => "ephemeral",
            Tier::Durable => "durable",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "ephemeral" | "short" | "short-term" => Ok(Tier::Ephemeral),
            "durable" | "long" | "long-term" => Ok(Tier::Durable),
            other => Err(AgentError::ToolExecutionFailed(format!(
                "unknown tier '{other}', expected 'ephemeral' or 'durable'"
            ))),
        }
    }
}

/// 单个产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub content: String,
    pub tier: Tier,
    pub last_writer: String,
}

/// 规范化路径：去掉前导 `./` 与 `/`，拒绝空路径与 `..` 段
pub fn normalize_path(path: &str) -> Result<String, AgentError> {
    let mut p = path.trim();
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest;
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest;
        } else {
            break;
        }
    }
    if p.is_empty() {
        return Err(AgentError::NotFound(format!("'{path}' (empty path)")));
    }
    if p.split('/').any(|seg| seg == "..") {
        return Err(AgentError::NotFound(format!(
            "'{path}' (paths may not leave the artifact root)"
        )));
    }
    Ok(p.to_string())
}

/// 替换结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOutcome {
    pub replacements: usize,
}

/// 纯函数版 edit：返回新内容；出现次数不符合要求时返回 AmbiguousEdit，不产生修改
pub fn apply_edit(
    path: &str,
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<(String, usize), AgentError> {
    let occurrences = if old.is_empty() { 0 } else { content.matches(old).count() };
    let acceptable = if replace_all { occurrences >= 1 } else { occurrences == 1 };
    if !acceptable {
        return Err(AgentError::AmbiguousEdit {
            path: path.to_string(),
            occurrences,
        });
    }
    let updated = if replace_all {
        content.replace(old, new)
    } else {
        content.replacen(old, new, 1)
    };
    Ok((updated, occurrences))
}

/// 两层产物存储；一次编排调用（含其子智能体）共享同一实例
pub struct ArtifactStore {
    thread_id: String,
    ephemeral: RwLock<BTreeMap<String, Artifact>>,
    durable: Arc<dyn DurablePersistence>,
    /// 本次运行中 Durable 产物的最后写入者
    durable_writers: RwLock<HashMap<String, String>>,
    /// 本次运行写过的产物（按首次写入顺序）
    touched: Mutex<Vec<String>>,
}

impl ArtifactStore {
    pub fn new(thread_id: impl Into<String>, durable: Arc<dyn DurablePersistence>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ephemeral: RwLock::new(BTreeMap::new()),
            durable,
            durable_writers: RwLock::new(HashMap::new()),
            touched: Mutex::new(Vec::new()),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub async fn list(&self, tier: Tier) -> Result<Vec<String>, AgentError> {
        match tier {
            Tier::Ephemeral => Ok(self.ephemeral.read().await.keys().cloned().collect()),
            Tier::Durable => self.durable.keys(&self.thread_id).await,
        }
    }

    pub async fn read(&self, tier: Tier, path: &str) -> Result<String, AgentError> {
        Ok(self.artifact(tier, path).await?.content)
    }

    pub async fn artifact(&self, tier: Tier, path: &str) -> Result<Artifact, AgentError> {
        let path = normalize_path(path)?;
        match tier {
            Tier::Ephemeral => self
                .ephemeral
                .read()
                .await
                .get(&path)
                .cloned()
                .ok_or(AgentError::NotFound(path)),
            Tier::Durable => {
                let content = self
                    .durable
                    .get(&self.thread_id, &path)
                    .await?
                    .ok_or_else(|| AgentError::NotFound(path.clone()))?;
                let last_writer = self
                    .durable_writers
                    .read()
                    .await
                    .get(&path)
                    .cloned()
                    .unwrap_or_default();
                Ok(Artifact {
                    path,
                    content,
                    tier,
                    last_writer,
                })
            }
        }
    }

    /// 创建或覆盖
    pub async fn write(
        &self,
        tier: Tier,
        path: &str,
        content: &str,
        writer: &str,
    ) -> Result<(), AgentError> {
        let path = normalize_path(path)?;
        self.store(tier, &path, content, writer).await?;
        tracing::debug!(tier = %tier, path = %path, writer, bytes = content.len(), "artifact written");
        Ok(())
    }

    /// 精确替换：默认要求 old 恰好出现一次；路径不存在为 NotFound
    pub async fn edit(
        &self,
        tier: Tier,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
        writer: &str,
    ) -> Result<EditOutcome, AgentError> {
        let path = normalize_path(path)?;
        let current = self.read(tier, &path).await?;
        let (updated, replacements) = apply_edit(&path, &current, old, new, replace_all)?;
        self.store(tier, &path, &updated, writer).await?;
        tracing::debug!(tier = %tier, path = %path, writer, replacements, "artifact edited");
        Ok(EditOutcome { replacements })
    }

    async fn store(&self, tier: Tier, path: &str, content: &str, writer: &str) -> Result<(), AgentError> {
        match tier {
            Tier::Ephemeral => {
                self.ephemeral.write().await.insert(
                    path.to_string(),
                    Artifact {
                        path: path.to_string(),
                        content: content.to_string(),
                        tier,
                        last_writer: writer.to_string(),
                    },
                );
            }
            Tier::Durable => {
                self.durable.put(&self.thread_id, path, content).await?;
                self.durable_writers
                    .write()
                    .await
                    .insert(path.to_string(), writer.to_string());
            }
        }
        let label = format!("{tier}:{path}");
        let mut touched = self.touched.lock().await;
        if !touched.contains(&label) {
            touched.push(label);
        }
        Ok(())
    }

    /// 本次运行写过的产物，形如 `ephemeral:notes.md`
    pub async fn touched(&self) -> Vec<String> {
        self.touched.lock().await.clone()
    }

    /// 优先 Ephemeral 层的 final_report.md，其次本次运行写过的 Durable 层版本；空内容视为不存在
    pub async fn final_report(&self) -> Option<String> {
        let durable_label = format!("{}:{FINAL_REPORT_PATH}", Tier::Durable);
        let durable_written = self.touched.lock().await.contains(&durable_label);
        for tier in [Tier::Ephemeral, Tier::Durable] {
            if tier == Tier::Durable && !durable_written {
                continue;
            }
            if let Ok(content) = self.read(tier, FINAL_REPORT_PATH).await {
                if !content.trim().is_empty() {
                    return Some(content);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryPersistence;

    fn store() -> ArtifactStore {
        ArtifactStore::new("thread-1", Arc::new(InMemoryPersistence::new()))
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./notes.md").unwrap(), "notes.md");
        assert_eq!(normalize_path("/dir/a.md").unwrap(), "dir/a.md");
        assert!(matches!(normalize_path("../x"), Err(AgentError::NotFound(_))));
        assert!(matches!(normalize_path("a/../../x"), Err(AgentError::NotFound(_))));
        assert!(normalize_path("  ").is_err());
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("durable".parse::<Tier>().unwrap(), Tier::Durable);
        assert_eq!("".parse::<Tier>().unwrap(), Tier::Ephemeral);
        assert!("cold".parse::<Tier>().is_err());
    }

    #[tokio::test]
    async fn test_write_edit_read() {
        let s = store();
        s.write(Tier::Ephemeral, "notes.md", "draft", "lead").await.unwrap();
        s.edit(Tier::Ephemeral, "notes.md", "draft", "final", false, "lead")
            .await
            .unwrap();
        assert_eq!(s.read(Tier::Ephemeral, "notes.md").await.unwrap(), "final");
    }

    #[tokio::test]
    async fn test_edit_requires_exactly_one_occurrence() {
        let s = store();
        s.write(Tier::Ephemeral, "a.md", "x x", "lead").await.unwrap();
        for old in ["x", "missing", ""] {
            let before = s.read(Tier::Ephemeral, "a.md").await.unwrap();
            let err = s
                .edit(Tier::Ephemeral, "a.md", old, "y", false, "lead")
                .await
                .unwrap_err();
            assert!(matches!(err, AgentError::AmbiguousEdit { .. }));
            assert_eq!(s.read(Tier::Ephemeral, "a.md").await.unwrap(), before);
        }
        let outcome = s
            .edit(Tier::Ephemeral, "a.md", "x x", "z", false, "lead")
            .await
            .unwrap();
        assert_eq!(outcome.replacements, 1);
    }

    #[tokio::test]
    async fn test_edit_replace_all() {
        let s = store();
        s.write(Tier::Ephemeral, "a.md", "x x x", "lead").await.unwrap();
        let outcome = s
            .edit(Tier::Ephemeral, "a.md", "x", "y", true, "lead")
            .await
            .unwrap();
        assert_eq!(outcome.replacements, 3);
        assert_eq!(s.read(Tier::Ephemeral, "a.md").await.unwrap(), "y y y");
        let err = s
            .edit(Tier::Ephemeral, "a.md", "x", "y", true, "lead")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::AmbiguousEdit { occurrences: 0, .. }));
    }

    #[tokio::test]
    async fn test_edit_missing_path_is_not_found() {
        let s = store();
        let err = s
            .edit(Tier::Durable, "nope.md", "a", "b", false, "lead")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_tiers_are_separate_and_writer_tracked() {
        let s = store();
        s.write(Tier::Durable, "facts.md", "durable", "research").await.unwrap();
        assert!(s.read(Tier::Ephemeral, "facts.md").await.is_err());
        let art = s.artifact(Tier::Durable, "facts.md").await.unwrap();
        assert_eq!(art.last_writer, "research");
        s.write(Tier::Durable, "facts.md", "durable v2", "critique").await.unwrap();
        let art = s.artifact(Tier::Durable, "facts.md").await.unwrap();
        assert_eq!(art.last_writer, "critique");
        assert_eq!(s.list(Tier::Durable).await.unwrap(), vec!["facts.md"]);
        assert_eq!(s.touched().await, vec!["durable:facts.md"]);
    }

    #[tokio::test]
    async fn test_durable_survives_new_store_on_same_thread() {
        let backend: Arc<dyn DurablePersistence> = Arc::new(InMemoryPersistence::new());
        let first = ArtifactStore::new("t", backend.clone());
        first.write(Tier::Durable, "keep.md", "k", "lead").await.unwrap();
        first.write(Tier::Ephemeral, "scratch.md", "s", "lead").await.unwrap();

        let second = ArtifactStore::new("t", backend);
        assert_eq!(second.read(Tier::Durable, "keep.md").await.unwrap(), "k");
        assert!(second.list(Tier::Ephemeral).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_final_report_ignores_durable_from_earlier_run() {
        let backend: Arc<dyn DurablePersistence> = Arc::new(InMemoryPersistence::new());
        let earlier = ArtifactStore::new("t", backend.clone());
        earlier.write(Tier::Durable, FINAL_REPORT_PATH, "stale", "lead").await.unwrap();
        assert_eq!(earlier.final_report().await.as_deref(), Some("stale"));

        let current = ArtifactStore::new("t", backend);
        assert_eq!(current.read(Tier::Durable, FINAL_REPORT_PATH).await.unwrap(), "stale");
        assert_eq!(current.final_report().await, None);
    }

    #[tokio::test]
    async fn test_final_report_prefers_ephemeral() {
        let s = store();
        assert_eq!(s.final_report().await, None);
        s.write(Tier::Durable, FINAL_REPORT_PATH, "old", "lead").await.unwrap();
        assert_eq!(s.final_report().await.as_deref(), Some("old"));
        s.write(Tier::Ephemeral, FINAL_REPORT_PATH, "new", "lead").await.unwrap();
        assert_eq!(s.final_report().await.as_deref(), Some("new"));
    }
}
