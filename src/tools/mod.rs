//! 工具层：注册表（封闭分派表）、执行器、产物工具、外部工具适配与 crawl

pub mod crawl;
pub mod executor;
pub mod external;
pub mod filesystem;
pub mod registry;
pub mod schema;

pub use crawl::CrawlTool;
pub use executor::{ToolExecutor, ToolOutcome};
pub use external::{ExternalToolAdapter, ExternalTools};
pub use filesystem::{EditFileTool, LsTool, ReadFileTool, WriteFileTool};
pub use registry::{parse_args, Tool, ToolContext, ToolKind, ToolRegistry};
pub use schema::tool_call_schema_json;

/// 注册全部产物工具
pub fn register_artifact_tools(registry: &mut ToolRegistry) {
    registry.register(LsTool);
    registry.register(ReadFileTool);
    registry.register(WriteFileTool);
    registry.register(EditFileTool);
}
