//! Deep Research - 研究计划执行核心
//!
//! 模块划分：
//! - **agent**: 无头运行时（从配置装配并执行整份计划）
//! - **artifacts**: 两层产物存储（Ephemeral / Durable）与持久化后端
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、循环状态、会话监管、DeepAgentOrchestrator
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与重试
//! - **memory**: 工作上下文（ConversationTurn）、Budget 与 token 估算
//! - **middleware**: 模型调用前的有序管线（工具调用修复、上下文压缩、计时）
//! - **react**: Planner、主循环、事件、专家子智能体
//! - **tools**: 工具注册表、执行器、产物工具、外部工具与 crawl
//! - **workflow**: 计划步骤、成对调度、brief 组装与 Reporter 交接

pub mod agent;
pub mod artifacts;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod middleware;
pub mod observability;
pub mod react;
pub mod tools;
pub mod workflow;
