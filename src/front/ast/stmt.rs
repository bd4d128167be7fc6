use super::{Cond, Expr, FuncCall, Lval, Span};

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    // "{" Stmt* "}"
    List(Vec<Stmt>, Span),
    // Lval "<-" Expr ";"
    Let {
        lval: Lval,
        expr: Expr,
        span: Span,
    },
    // "if" "(" Cond ")" Stmt ["else" Stmt]
    If {
        cond: Cond,
        then_stmt: Box<Stmt>,
        else_stmt: Option<Box<Stmt>>,
        span: Span,
    },
    // "while" "(" Cond ")" Stmt
    While {
        cond: Cond,
        body: Box<Stmt>,
        span: Span,
    },
    // "return" [Expr] ";"
    Return {
        expr: Option<Expr>,
        span: Span,
    },
    // FuncCall ";"
    ProcCall(FuncCall),
    // ";"
    Empty(Span),
}
