pub mod context;
pub mod expr_sem;
pub mod symbol;

use crate::front::ast::*;
use crate::front::runtime::runtime_functions;
use crate::front::sem::expr_sem::{analyze_call, analyze_cond, analyze_expr, analyze_lval};
use crate::front::sem::symbol::{ParamSig, Symbol, SymbolKind};
use crate::front::types::Type;
use crate::utils::DiagnosticKind;
use crate::CompilerError;

pub use crate::front::sem::context::SemContext;

/// 语义分析入口：单次自顶向下遍历，原地给 AST 填类型、
/// 引用标记与捕获表。第一条诊断即失败返回。
pub fn analyze_program(prog: &mut FuncDef) -> Result<(), CompilerError> {
    if !prog.params.is_empty() {
        return Err(CompilerError::diag(
            DiagnosticKind::TypeMismatch,
            "the top-level procedure takes no parameters",
            prog.span,
        ));
    }
    if prog.ret_ty != Type::Void {
        return Err(CompilerError::diag(
            DiagnosticKind::TypeMismatch,
            "the top-level function must be a procedure",
            prog.span,
        ));
    }

    let mut ctx = SemContext::new();
    // 第 0 层作用域：运行时库 + 程序入口。这里的符号不参与捕获。
    ctx.table.enter_scope();
    for lib in runtime_functions() {
        let params = lib
            .params
            .iter()
            .enumerate()
            .map(|(i, (kind, ty))| ParamSig {
                name: format!("a{}", i),
                ty: ty.clone(),
                kind: *kind,
            })
            .collect();
        ctx.table.insert(Symbol {
            name: lib.name.to_string(),
            ty: lib.ret_ty.clone(),
            kind: SymbolKind::Function {
                params,
                captures: Vec::new(),
            },
            depth: 0,
        });
    }

    prog.analyze(&mut ctx)?;
    ctx.table.exit_scope();
    Ok(())
}

pub trait Analyze {
    type Output;
    fn analyze(&mut self, ctx: &mut SemContext) -> Result<Self::Output, CompilerError>;
}

impl Analyze for FuncDef {
    type Output = ();

    fn analyze(&mut self, ctx: &mut SemContext) -> Result<Self::Output, CompilerError> {
        // 先把函数符号插进外层作用域，让递归调用可见
        let params = param_sigs(&self.params, ctx)?;
        ctx.insert_checked(
            Symbol {
                name: self.name.clone(),
                ty: self.ret_ty.clone(),
                kind: SymbolKind::Function {
                    params,
                    captures: Vec::new(),
                },
                depth: 0,
            },
            self.span,
        )?;

        ctx.table.enter_scope();
        ctx.push_frame(self.ret_ty.clone());

        for param in &self.params {
            let ty = if param.kind == ParamKind::Reference && !param.ty.is_array() {
                Type::reference(param.ty.clone())
            } else {
                param.ty.clone()
            };
            ctx.insert_checked(
                Symbol {
                    name: param.name.clone(),
                    ty,
                    kind: SymbolKind::Parameter(param.kind),
                    depth: 0,
                },
                param.span,
            )?;
        }

        // 局部定义按源码顺序处理，先定义者先可见
        for local in &mut self.locals {
            match local {
                LocalDef::Var(var) => {
                    check_array_size(&var.ty, var.span, ctx)?;
                    ctx.insert_checked(
                        Symbol {
                            name: var.name.clone(),
                            ty: var.ty.clone(),
                            kind: SymbolKind::Variable,
                            depth: 0,
                        },
                        var.span,
                    )?;
                }
                LocalDef::Func(func) => func.analyze(ctx)?,
            }
        }

        let has_return = self.body.analyze(ctx)?;
        if self.ret_ty != Type::Void && !has_return {
            return Err(ctx.error(
                DiagnosticKind::MissingReturn,
                format!("`{}` does not return on every path", self.name),
                self.span,
            ));
        }

        let frame = ctx.pop_frame();
        self.captures = frame.captures;
        self.has_return = has_return;
        ctx.table.exit_scope();
        // 捕获表回填到符号上，后续调用点据此转发
        ctx.table
            .set_function_captures(&self.name, self.captures.clone());
        Ok(())
    }
}

fn param_sigs(params: &[Fpar], ctx: &mut SemContext) -> Result<Vec<ParamSig>, CompilerError> {
    let mut sigs = Vec::with_capacity(params.len());
    for param in params {
        check_array_size(&param.ty, param.span, ctx)?;
        sigs.push(ParamSig {
            name: param.name.clone(),
            ty: param.ty.clone(),
            kind: param.kind,
        });
    }
    Ok(sigs)
}

fn check_array_size(ty: &Type, span: Span, ctx: &SemContext) -> Result<(), CompilerError> {
    if let Type::Array { size: Some(n), .. } = ty {
        if *n <= 0 {
            return Err(ctx.error(
                DiagnosticKind::BadArraySize,
                format!("array size must be positive, got {}", n),
                span,
            ));
        }
    }
    Ok(())
}

impl Analyze for Stmt {
    /// 返回该语句是否在语法上保证执行到 return。
    type Output = bool;

    fn analyze(&mut self, ctx: &mut SemContext) -> Result<Self::Output, CompilerError> {
        match self {
            Stmt::List(stmts, _) => {
                let mut has_return = false;
                for stmt in stmts {
                    has_return |= stmt.analyze(ctx)?;
                }
                Ok(has_return)
            }
            Stmt::Let { lval, expr, span } => {
                if matches!(lval.kind, LvalKind::StringConst(_)) {
                    return Err(ctx.error(
                        DiagnosticKind::NotAnLvalue,
                        "a string literal is not an assignable l-value",
                        lval.span,
                    ));
                }
                let lhs_ty = analyze_lval(lval, ctx)?;
                if lhs_ty.is_array() {
                    return Err(ctx.error(
                        DiagnosticKind::TypeMismatch,
                        "arrays cannot be assigned as a whole",
                        lval.span,
                    ));
                }
                let rhs_ty = analyze_expr(expr, ctx)?;
                if lhs_ty != rhs_ty {
                    return Err(ctx.error(
                        DiagnosticKind::TypeMismatch,
                        format!("cannot assign {} to {}", rhs_ty, lhs_ty),
                        *span,
                    ));
                }
                Ok(false)
            }
            Stmt::If {
                cond,
                then_stmt,
                else_stmt,
                ..
            } => {
                analyze_cond(cond, ctx)?;
                let then_returns = then_stmt.analyze(ctx)?;
                match else_stmt {
                    Some(else_stmt) => {
                        let else_returns = else_stmt.analyze(ctx)?;
                        Ok(then_returns && else_returns)
                    }
                    None => Ok(false),
                }
            }
            Stmt::While { cond, body, .. } => {
                analyze_cond(cond, ctx)?;
                body.analyze(ctx)?;
                // 循环体不保证执行
                Ok(false)
            }
            Stmt::Return { expr, span } => {
                let ret_ty = ctx.current_frame().ret_ty.clone();
                match (ret_ty == Type::Void, expr) {
                    (true, Some(_)) => Err(ctx.error(
                        DiagnosticKind::TypeMismatch,
                        "a procedure cannot return a value",
                        *span,
                    )),
                    (true, None) => Ok(true),
                    (false, None) => Err(ctx.error(
                        DiagnosticKind::TypeMismatch,
                        format!("this function must return {}", ret_ty),
                        *span,
                    )),
                    (false, Some(expr)) => {
                        let expr_ty = analyze_expr(expr, ctx)?;
                        if expr_ty != ret_ty {
                            return Err(ctx.error(
                                DiagnosticKind::TypeMismatch,
                                format!("return type is {}, got {}", ret_ty, expr_ty),
                                *span,
                            ));
                        }
                        Ok(true)
                    }
                }
            }
            Stmt::ProcCall(call) => {
                let ret_ty = analyze_call(call, ctx)?;
                if ret_ty != Type::Void {
                    return Err(ctx.error(
                        DiagnosticKind::TypeMismatch,
                        format!(
                            "`{}` returns {} and cannot be used as a statement",
                            call.name, ret_ty
                        ),
                        call.span,
                    ));
                }
                Ok(false)
            }
            Stmt::Empty(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lexer::Lexer;
    use crate::sl::ProgramParser;

    fn parse(src: &str) -> FuncDef {
        ProgramParser::new()
            .parse(Lexer::new(src))
            .expect("parse error")
    }

    fn analyzed(src: &str) -> FuncDef {
        let mut prog = parse(src);
        analyze_program(&mut prog).expect("semantic error");
        prog
    }

    fn sem_error(src: &str) -> DiagnosticKind {
        let mut prog = parse(src);
        match analyze_program(&mut prog) {
            Err(e) => e.kind().expect("expected a diagnostic"),
            Ok(()) => panic!("expected a semantic error"),
        }
    }

    fn nested<'a>(prog: &'a FuncDef, name: &str) -> &'a FuncDef {
        prog.locals
            .iter()
            .find_map(|l| match l {
                LocalDef::Func(f) if f.name == name => Some(f),
                _ => None,
            })
            .expect("nested function not found")
    }

    #[test]
    fn factorial_program_typechecks() {
        let prog = analyzed(
            r#"
            main () : proc {
                fact (n : int) : int {
                    if (n <= 1) return 1;
                    return n * fact(n - 1);
                }
                writeInteger(fact(5));
            }
            "#,
        );
        let fact = nested(&prog, "fact");
        assert!(fact.has_return);
        assert!(fact.captures.is_empty());
    }

    #[test]
    fn every_expression_gets_a_type() {
        let prog = analyzed(
            r#"
            main () : proc {
                x : int;
                x <- 1 + 2 * 3;
                writeInteger(x);
            }
            "#,
        );
        // Let 的右手边：类型在分析后必须就位
        if let Stmt::List(stmts, _) = &prog.body {
            if let Stmt::Let { expr, .. } = &stmts[0] {
                assert_eq!(expr.ty, Some(Type::Int));
                if let ExprKind::BinOp(_, lhs, rhs) = &expr.kind {
                    assert_eq!(lhs.ty, Some(Type::Int));
                    assert_eq!(rhs.ty, Some(Type::Int));
                }
                return;
            }
        }
        panic!("unexpected body shape");
    }

    #[test]
    fn nested_function_captures_outer_local() {
        let prog = analyzed(
            r#"
            f () : proc {
                x : int;
                g () : proc {
                    x <- x + 1;
                }
                x <- 10;
                g();
                g();
                writeInteger(x);
            }
            "#,
        );
        let g = nested(&prog, "g");
        assert_eq!(g.captures.len(), 1);
        assert_eq!(g.captures[0].name, "x");
        assert_eq!(g.captures[0].ty, Type::Int);
        // 外层函数自己不捕获
        assert!(prog.captures.is_empty());
    }

    #[test]
    fn shadowed_local_is_not_a_capture() {
        let prog = analyzed(
            r#"
            outer () : proc {
                x : int;
                inner () : proc {
                    x : int;
                    x <- 2;
                    writeInteger(x);
                }
                x <- 1;
                inner();
                writeInteger(x);
            }
            "#,
        );
        let inner = nested(&prog, "inner");
        assert!(inner.captures.is_empty());
    }

    #[test]
    fn captures_propagate_through_nested_calls() {
        let prog = analyzed(
            r#"
            f () : proc {
                x : int;
                g () : proc {
                    x <- x + 1;
                }
                h () : proc {
                    g();
                }
                x <- 0;
                h();
            }
            "#,
        );
        // h 只调用 g，但必须捕获 x 才能转发给 g
        let h = nested(&prog, "h");
        assert_eq!(h.captures.len(), 1);
        assert_eq!(h.captures[0].name, "x");
    }

    #[test]
    fn reference_parameter_capture_keeps_its_kind() {
        let prog = analyzed(
            r#"
            f (reference r : int) : proc {
                g () : proc {
                    r <- r + 1;
                }
                g();
            }
            "#,
        );
        let g = nested(&prog, "g");
        assert_eq!(g.captures.len(), 1);
        assert_eq!(g.captures[0].kind, ParamKind::Reference);
    }

    #[test]
    fn capture_order_is_first_encounter() {
        let prog = analyzed(
            r#"
            f () : proc {
                a : int;
                b : int;
                g () : proc {
                    b <- 1;
                    a <- 2;
                    b <- 3;
                }
                g();
            }
            "#,
        );
        let g = nested(&prog, "g");
        let names: Vec<&str> = g.captures.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn call_sites_record_the_callee_identity_and_captures() {
        let prog = analyzed(
            r#"
            f () : proc {
                x : int;
                g () : proc {
                    x <- x + 1;
                }
                x <- 0;
                g();
                writeInteger(x);
            }
            "#,
        );
        let Stmt::List(stmts, _) = &prog.body else {
            panic!("unexpected body shape");
        };
        let mut calls = stmts.iter().filter_map(|s| match s {
            Stmt::ProcCall(call) => Some(call),
            _ => None,
        });
        let g_call = calls.next().expect("call to g");
        assert!(g_call.nested);
        assert_eq!(g_call.captures.len(), 1);
        assert_eq!(g_call.captures[0].name, "x");
        // 运行时库调用不是嵌套调用，也不带捕获
        let lib_call = calls.next().expect("call to writeInteger");
        assert!(!lib_call.nested);
        assert!(lib_call.captures.is_empty());
    }

    #[test]
    fn byte_widening_assignment_is_rejected() {
        // 规格 §8 场景 6
        let kind = sem_error(
            r#"
            main () : proc {
                x : byte;
                x <- 300;
            }
            "#,
        );
        assert_eq!(kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn undeclared_name_is_reported() {
        let kind = sem_error("main () : proc { x <- 1; }");
        assert_eq!(kind, DiagnosticKind::UndeclaredName);
    }

    #[test]
    fn duplicate_name_in_scope_is_reported() {
        let kind = sem_error(
            r#"
            main () : proc {
                x : int;
                x : byte;
            }
            "#,
        );
        assert_eq!(kind, DiagnosticKind::DuplicateName);
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let kind = sem_error("main () : proc { writeInteger(1, 2); }");
        assert_eq!(kind, DiagnosticKind::ArityMismatch);
    }

    #[test]
    fn proc_call_in_expression_is_rejected() {
        let kind = sem_error(
            r#"
            main () : proc {
                x : int;
                x <- writeInteger(1);
            }
            "#,
        );
        assert_eq!(kind, DiagnosticKind::ProcNotExpr);
    }

    #[test]
    fn missing_return_is_reported() {
        let kind = sem_error(
            r#"
            main () : proc {
                f (n : int) : int {
                    if (n > 0) return 1;
                }
                writeInteger(f(1));
            }
            "#,
        );
        assert_eq!(kind, DiagnosticKind::MissingReturn);
    }

    #[test]
    fn if_with_both_arms_returning_guarantees_return() {
        analyzed(
            r#"
            main () : proc {
                sign (n : int) : int {
                    if (n >= 0) return 1;
                    else return 0 - 1;
                }
                writeInteger(sign(5));
            }
            "#,
        );
    }

    #[test]
    fn while_does_not_guarantee_return() {
        let kind = sem_error(
            r#"
            main () : proc {
                f () : int {
                    while (true) return 1;
                }
                writeInteger(f());
            }
            "#,
        );
        assert_eq!(kind, DiagnosticKind::MissingReturn);
    }

    #[test]
    fn non_int_array_index_is_reported() {
        let kind = sem_error(
            r#"
            main () : proc {
                a : int[4];
                c : byte;
                c <- 'x';
                a[c] <- 1;
            }
            "#,
        );
        assert_eq!(kind, DiagnosticKind::ArrayIndexType);
    }

    #[test]
    fn zero_array_size_is_reported() {
        let kind = sem_error(
            r#"
            main () : proc {
                a : int[0];
            }
            "#,
        );
        assert_eq!(kind, DiagnosticKind::BadArraySize);
    }

    #[test]
    fn string_literal_assignment_target_is_rejected() {
        let kind = sem_error(
            r#"
            main () : proc {
                "abc" <- 'x';
            }
            "#,
        );
        assert_eq!(kind, DiagnosticKind::NotAnLvalue);
    }

    #[test]
    fn reference_argument_must_be_an_lvalue() {
        let kind = sem_error(
            r#"
            main () : proc {
                swap (reference a : int, reference b : int) : proc {
                    t : int;
                    t <- a;
                    a <- b;
                    b <- t;
                }
                x : int;
                x <- 3;
                swap(x, 7);
            }
            "#,
        );
        assert_eq!(kind, DiagnosticKind::NotAnLvalue);
    }

    #[test]
    fn string_literal_matches_byte_array_parameter() {
        analyzed(r#"hello () : proc { writeString("hello\n"); }"#);
    }

    #[test]
    fn top_level_function_must_be_a_parameterless_procedure() {
        let kind = sem_error("main (n : int) : proc { ; }");
        assert_eq!(kind, DiagnosticKind::TypeMismatch);
        let kind = sem_error("main () : int { return 1; }");
        assert_eq!(kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn reference_is_transparent_in_expressions() {
        let prog = analyzed(
            r#"
            f (reference r : int) : proc {
                g () : proc {
                    r <- r + 1;
                }
                g();
            }
            "#,
        );
        let g = nested(&prog, "g");
        // 捕获记录被引用者的值类型
        assert_eq!(g.captures[0].ty, Type::Int);
    }
}
