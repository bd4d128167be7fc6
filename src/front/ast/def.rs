use super::{Span, Stmt};
use crate::front::types::Type;

/// 形参传递方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    Value,
    Reference,
}

// Fpar ::= ["reference"] IDENT ":" DataType ["[" [INT] "]"]
#[derive(Debug, Clone, PartialEq)]
pub struct Fpar {
    pub name: String,
    pub ty: Type,
    pub kind: ParamKind,
    pub span: Span,
}

// VarDef ::= IDENT ":" DataType ["[" INT "]"] ";"
#[derive(Debug, Clone, PartialEq)]
pub struct VarDef {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalDef {
    Var(VarDef),
    Func(FuncDef),
}

/// 一个被嵌套函数捕获的外层变量。
/// `ty` 是被捕获者的值类型；被捕获者本身是引用形参时 `kind` 保留其引用性。
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedVar {
    pub name: String,
    pub ty: Type,
    pub kind: ParamKind,
}

/// 函数定义。`captures` 与 `has_return` 由语义分析填入。
///
/// `captures` 恰好是函数体内（经由嵌套调用传递闭包）引用到的、
/// 解析到严格外层（非全局）作用域的名字集合，按首次出现的顺序排列。
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub name: String,
    pub ret_ty: Type,
    pub params: Vec<Fpar>,
    pub locals: Vec<LocalDef>,
    pub body: Stmt,
    pub span: Span,
    pub captures: Vec<CapturedVar>,
    pub has_return: bool,
}

/// 函数体花括号里定义与语句可以交错出现；parser 用它装载两类条目，
/// 再由 `FuncDef::from_items` 拆成定义表和语句表（定义保持源码顺序）。
#[derive(Debug, Clone, PartialEq)]
pub enum BlockItem {
    Def(LocalDef),
    Stmt(Stmt),
}

impl FuncDef {
    pub fn from_items(
        name: String,
        ret_ty: Type,
        params: Vec<Fpar>,
        items: Vec<BlockItem>,
        span: Span,
    ) -> Self {
        let mut locals = Vec::new();
        let mut stmts = Vec::new();
        for item in items {
            match item {
                BlockItem::Def(def) => locals.push(def),
                BlockItem::Stmt(stmt) => stmts.push(stmt),
            }
        }
        Self {
            name,
            ret_ty,
            params,
            locals,
            body: Stmt::List(stmts, span),
            span,
            captures: Vec::new(),
            has_return: false,
        }
    }
}
