use std::fmt;

use crate::front::ast::Span;

/// 诊断类别：编译器能报告的所有致命错误种类。
/// 首个诊断即终止编译，没有错误恢复。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    LexError,
    ParseError,
    UndeclaredName,
    DuplicateName,
    TypeMismatch,
    NotAnLvalue,
    ArityMismatch,
    ProcNotExpr,
    MissingReturn,
    ArrayIndexType,
    BadArraySize,
    InternalError,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DiagnosticKind::LexError => "LexError",
            DiagnosticKind::ParseError => "ParseError",
            DiagnosticKind::UndeclaredName => "UndeclaredName",
            DiagnosticKind::DuplicateName => "DuplicateName",
            DiagnosticKind::TypeMismatch => "TypeMismatch",
            DiagnosticKind::NotAnLvalue => "NotAnLvalue",
            DiagnosticKind::ArityMismatch => "ArityMismatch",
            DiagnosticKind::ProcNotExpr => "ProcNotExpr",
            DiagnosticKind::MissingReturn => "MissingReturn",
            DiagnosticKind::ArrayIndexType => "ArrayIndexType",
            DiagnosticKind::BadArraySize => "BadArraySize",
            DiagnosticKind::InternalError => "InternalError",
        };
        write!(f, "{}", name)
    }
}

/// 带源码位置的诊断。span.begin 决定报告的 line/col。
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }
}

#[derive(Debug)]
pub enum CompilerError {
    // I/O 错误
    IoError(std::io::Error),
    // 参数解析错误
    ArgsError(String),
    // 带位置的诊断（词法/语法/语义/内部）
    Diagnostic(Diagnostic),
}

impl CompilerError {
    pub fn diag(kind: DiagnosticKind, message: impl Into<String>, span: Span) -> Self {
        CompilerError::Diagnostic(Diagnostic::new(kind, message, span))
    }

    /// 代码生成阶段的内部错误：语义检查应当已经排除这些情况，
    /// 走到这里说明编译器自身有 bug。
    pub fn internal(message: impl Into<String>) -> Self {
        CompilerError::Diagnostic(Diagnostic::new(
            DiagnosticKind::InternalError,
            message,
            Span::default(),
        ))
    }

    pub fn kind(&self) -> Option<DiagnosticKind> {
        match self {
            CompilerError::Diagnostic(d) => Some(d.kind),
            _ => None,
        }
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompilerError::IoError(e) => write!(f, "I/O error: {}", e),
            CompilerError::ArgsError(msg) => write!(f, "Argument error: {}", msg),
            CompilerError::Diagnostic(d) => write!(f, "{}: {}", d.kind, d.message),
        }
    }
}

impl std::error::Error for CompilerError {}

// 实现 From trait 以便自动转换
impl From<std::io::Error> for CompilerError {
    fn from(err: std::io::Error) -> Self {
        CompilerError::IoError(err)
    }
}
