use super::{CapturedVar, Span};
use crate::front::types::Type;

/// 表达式节点。`ty` 由语义分析填入；通过语义检查后保证为 `Some`。
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: Option<Type>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntConst(i32),
    CharConst(u8),
    // 左值作右值使用
    Lval(Lval),
    UnOp(UnOp, Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Call(FuncCall),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnOp {
    Plus,  // +
    Minus, // -
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

// Lval ::= IDENT | IDENT "[" Expr "]" | STRING
#[derive(Debug, Clone, PartialEq)]
pub struct Lval {
    pub kind: LvalKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LvalKind {
    Id {
        name: String,
        /// 名字解析到引用形参时置位（表达式层面引用是透明的）
        by_ref: bool,
    },
    ArrayAccess {
        name: String,
        index: Box<Expr>,
    },
    // 字符串字面量也是左值：一个以 NUL 结尾的 byte 常量数组
    StringConst(Vec<u8>),
}

/// 函数调用：语义分析补上 `nested`（被调方是嵌套函数）和被调方的捕获表。
/// 代码生成据此在实参之后追加捕获指针。
#[derive(Debug, Clone, PartialEq)]
pub struct FuncCall {
    pub name: String,
    pub args: Vec<Expr>,
    pub span: Span,
    pub nested: bool,
    pub captures: Vec<CapturedVar>,
}

impl FuncCall {
    pub fn new(name: String, args: Vec<Expr>, span: Span) -> Self {
        Self {
            name,
            args,
            span,
            nested: false,
            captures: Vec::new(),
        }
    }
}
