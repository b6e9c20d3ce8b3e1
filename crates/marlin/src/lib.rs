pub mod ast;
mod build;
pub mod cache;
pub mod chunk;
pub mod chunk_graph;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
mod group_chunk;
mod link;
pub mod module;
pub mod module_graph;
pub mod parse;
pub mod plugin;
pub mod resolve;
pub mod scope;
pub mod statement_graph;
pub mod test_helper;
mod tree_shaking;
pub mod variable;

pub use cache::BuildCache;
pub use chunk::{Chunk, ChunkKind};
pub use compiler::Compiler;
pub use config::{Config, ManualChunks};
pub use diagnostics::{Warning, WarningCode};
pub use error::CompileError;
pub use module::{ModuleId, ModuleInfoView};
pub use plugin::Plugin;
