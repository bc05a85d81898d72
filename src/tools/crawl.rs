//! Crawl 工具：域名白名单、超时、结果大小限制
//!
//! 仅允许配置中的域名；GET 请求带超时与 User-Agent；
//! 对 HTML 响应使用 html2text 提取可读文本；超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::tools::{parse_args, Tool, ToolContext, ToolKind};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!") || head.starts_with("<html") || head.contains("<head") || head.contains("<body")
}

/// 从 URL 中提取 host（去掉端口与路径）
pub fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

fn truncate_chars(body: String, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

#[derive(Debug, Deserialize)]
struct CrawlArgs {
    url: String,
}

pub struct CrawlTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

impl CrawlTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains,
            max_result_chars,
        }
    }

    /// 白名单匹配域名本身及其子域名
    pub fn is_allowed(&self, url: &str) -> Result<(), AgentError> {
        let domain = extract_domain(url)
            .ok_or_else(|| AgentError::ToolExecutionFailed(format!("Invalid or missing URL: {url}")))?;
        let allowed = self
            .allowed_domains
            .iter()
            .any(|d| domain == *d || domain.ends_with(&format!(".{d}")));
        if allowed {
            Ok(())
        } else {
            Err(AgentError::ToolExecutionFailed(format!(
                "Domain not in allowlist: {domain}"
            )))
        }
    }

    fn html_to_text(html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, AgentError> {
        self.is_allowed(url)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(AgentError::ToolExecutionFailed(format!("HTTP {}", resp.status())));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read body: {e}")))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            Self::html_to_text(body)
        } else {
            body.to_string()
        };
        Ok(truncate_chars(text, self.max_result_chars))
    }
}

#[async_trait]
impl Tool for CrawlTool {
    fn name(&self) -> &str {
        "crawl"
    }

    fn description(&self) -> &str {
        "Fetch a web page from an allowlisted domain and return it as plain text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "url": { "type": "string", "description": "http(s) URL" } },
            "required": ["url"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::External
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, AgentError> {
        let args: CrawlArgs = parse_args(self.name(), args)?;
        let url = args.url.trim();
        if url.is_empty() {
            return Err(AgentError::ToolExecutionFailed("Missing url".to_string()));
        }
        tracing::info!(url = %url, "crawl fetch");
        self.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://Docs.rs/tokio"), Some("docs.rs".into()));
        assert_eq!(extract_domain("http://example.com:8080?q=1"), Some("example.com".into()));
        assert_eq!(extract_domain("ftp://example.com"), None);
    }

    #[test]
    fn test_allowlist_includes_subdomains() {
        let tool = CrawlTool::new(vec!["wikipedia.org".into()], 5, 100);
        assert!(tool.is_allowed("https://en.wikipedia.org/wiki/Rust").is_ok());
        assert!(tool.is_allowed("https://evilwikipedia.org").is_err());
        assert!(tool.is_allowed("not a url").is_err());
    }

    #[test]
    fn test_html_handling_and_truncation() {
        assert!(looks_like_html("<!DOCTYPE html><html></html>"));
        assert!(!looks_like_html("plain text"));
        assert_eq!(strip_html_tags("<p>a</p><p>b</p>"), "a b");
        assert_eq!(truncate_chars("abcdef".into(), 3), "abc\n...[truncated]");
        assert_eq!(truncate_chars("abc".into(), 3), "abc");
    }
}
