use std::collections::HashSet;

use crate::front::ast::{CapturedVar, Span};
use crate::front::sem::symbol::{Symbol, SymbolTable};
use crate::front::types::Type;
use crate::utils::DiagnosticKind;
use crate::CompilerError;

/// 当前正在分析的函数的状态。
pub struct FuncFrame {
    pub ret_ty: Type,
    /// 函数体作用域的深度（= 函数符号深度 + 1）
    pub scope_depth: usize,
    /// 按首次出现顺序记录的捕获（名字构成集合）
    pub captures: Vec<CapturedVar>,
    seen: HashSet<String>,
}

impl FuncFrame {
    fn new(ret_ty: Type, scope_depth: usize) -> Self {
        Self {
            ret_ty,
            scope_depth,
            captures: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn record(&mut self, capture: CapturedVar) {
        if self.seen.insert(capture.name.clone()) {
            self.captures.push(capture);
        }
    }
}

pub struct SemContext {
    pub table: SymbolTable,
    frames: Vec<FuncFrame>,
}

impl SemContext {
    pub fn new() -> Self {
        Self {
            table: SymbolTable::new(),
            frames: Vec::new(),
        }
    }

    pub fn push_frame(&mut self, ret_ty: Type) {
        let scope_depth = self.table.depth();
        self.frames.push(FuncFrame::new(ret_ty, scope_depth));
    }

    pub fn pop_frame(&mut self) -> FuncFrame {
        self.frames.pop().expect("no function frame")
    }

    pub fn current_frame(&self) -> &FuncFrame {
        self.frames.last().expect("no function frame")
    }

    pub fn error(
        &self,
        kind: DiagnosticKind,
        message: impl Into<String>,
        span: Span,
    ) -> CompilerError {
        CompilerError::diag(kind, message, span)
    }

    /// 解析一个名字，并按需把它记入当前函数的捕获表。
    ///
    /// 解析到的变量/形参位于严格外层且非全局（0 < depth < 当前函数体深度）
    /// 时构成一次捕获；被捕获者本身是引用形参时保留其引用性。
    pub fn resolve(&mut self, name: &str, span: Span) -> Result<Symbol, CompilerError> {
        let sym = match self.table.lookup(name) {
            Some(sym) => sym.clone(),
            None => {
                return Err(self.error(
                    DiagnosticKind::UndeclaredName,
                    format!("`{}` is not declared", name),
                    span,
                ));
            }
        };
        if !sym.is_function() {
            let frame = self.frames.last_mut().expect("no function frame");
            if sym.depth >= 1 && sym.depth < frame.scope_depth {
                frame.record(CapturedVar {
                    name: sym.name.clone(),
                    ty: sym.value_ty().clone(),
                    kind: sym.param_kind(),
                });
            }
        }
        Ok(sym)
    }

    /// 被调方的一项捕获在调用点按名转发：当前可见的同名符号
    /// 必须与记录的捕获类型一致，否则遮蔽会产生错型的指针。
    pub fn forward_capture(
        &mut self,
        capture: &CapturedVar,
        callee: &str,
        span: Span,
    ) -> Result<(), CompilerError> {
        let sym = self.resolve(&capture.name, span).map_err(|_| {
            self.error(
                DiagnosticKind::UndeclaredName,
                format!(
                    "`{}` captured by `{}` is not visible at this call",
                    capture.name, callee
                ),
                span,
            )
        })?;
        if sym.is_function() {
            return Err(self.error(
                DiagnosticKind::TypeMismatch,
                format!(
                    "`{}` captured by `{}` is shadowed by a function here",
                    capture.name, callee
                ),
                span,
            ));
        }
        if sym.value_ty() != &capture.ty {
            return Err(self.error(
                DiagnosticKind::TypeMismatch,
                format!(
                    "`{}` captured by `{}` has type {} here, but {} at its definition",
                    capture.name,
                    callee,
                    sym.value_ty(),
                    capture.ty
                ),
                span,
            ));
        }
        Ok(())
    }

    /// 插入符号，当前作用域同名即报 DuplicateName。
    pub fn insert_checked(&mut self, symbol: Symbol, span: Span) -> Result<(), CompilerError> {
        let name = symbol.name.clone();
        if !self.table.insert(symbol) {
            return Err(self.error(
                DiagnosticKind::DuplicateName,
                format!("`{}` is already declared in this scope", name),
                span,
            ));
        }
        Ok(())
    }
}
