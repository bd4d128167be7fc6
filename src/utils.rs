pub mod args;
pub mod logger;
pub mod error;
pub mod source_map;

pub use error::{CompilerError, Diagnostic, DiagnosticKind};
pub use source_map::SourceMap;
