use crate::front::ast::*;
use crate::front::sem::context::SemContext;
use crate::front::sem::symbol::{ParamSig, SymbolKind};
use crate::front::types::Type;
use crate::utils::DiagnosticKind;
use crate::CompilerError;

/// 类型检查一个表达式并把结果类型写回节点。
pub fn analyze_expr(expr: &mut Expr, ctx: &mut SemContext) -> Result<Type, CompilerError> {
    let span = expr.span;
    let ty = match &mut expr.kind {
        ExprKind::IntConst(_) => Type::Int,
        ExprKind::CharConst(_) => Type::Byte,
        ExprKind::Lval(lval) => analyze_lval(lval, ctx)?,
        ExprKind::UnOp(_, operand) => {
            let operand_ty = analyze_expr(operand, ctx)?;
            if operand_ty != Type::Int {
                return Err(ctx.error(
                    DiagnosticKind::TypeMismatch,
                    format!("unary operator expects int, got {}", operand_ty),
                    span,
                ));
            }
            Type::Int
        }
        ExprKind::BinOp(_, lhs, rhs) => {
            let lhs_ty = analyze_expr(lhs, ctx)?;
            let rhs_ty = analyze_expr(rhs, ctx)?;
            if !lhs_ty.is_arith() || lhs_ty != rhs_ty {
                return Err(ctx.error(
                    DiagnosticKind::TypeMismatch,
                    format!(
                        "arithmetic operands must share a type, got {} and {}",
                        lhs_ty, rhs_ty
                    ),
                    span,
                ));
            }
            lhs_ty
        }
        ExprKind::Call(call) => {
            let ret_ty = analyze_call(call, ctx)?;
            if ret_ty == Type::Void {
                return Err(ctx.error(
                    DiagnosticKind::ProcNotExpr,
                    format!("`{}` returns proc and cannot be used as an expression", call.name),
                    span,
                ));
            }
            ret_ty
        }
    };
    expr.ty = Some(ty.clone());
    Ok(ty)
}

/// 类型检查一个左值。Id 解析顺带记录捕获与引用透明性。
pub fn analyze_lval(lval: &mut Lval, ctx: &mut SemContext) -> Result<Type, CompilerError> {
    let span = lval.span;
    match &mut lval.kind {
        LvalKind::Id { name, by_ref } => {
            let sym = ctx.resolve(name, span)?;
            if sym.is_function() {
                return Err(ctx.error(
                    DiagnosticKind::TypeMismatch,
                    format!("`{}` is a function, not a variable", name),
                    span,
                ));
            }
            *by_ref = sym.is_by_ref();
            Ok(sym.value_ty().clone())
        }
        LvalKind::ArrayAccess { name, index } => {
            let sym = ctx.resolve(name, span)?;
            if sym.is_function() {
                return Err(ctx.error(
                    DiagnosticKind::TypeMismatch,
                    format!("`{}` is a function, not an array", name),
                    span,
                ));
            }
            let elem_ty = match sym.value_ty().elem_ty() {
                Some(elem) => elem.clone(),
                None => {
                    return Err(ctx.error(
                        DiagnosticKind::TypeMismatch,
                        format!("`{}` has type {} and cannot be indexed", name, sym.value_ty()),
                        span,
                    ));
                }
            };
            let index_ty = analyze_expr(index, ctx)?;
            if index_ty != Type::Int {
                return Err(ctx.error(
                    DiagnosticKind::ArrayIndexType,
                    format!("array index must be int, got {}", index_ty),
                    index.span,
                ));
            }
            Ok(elem_ty)
        }
        // 以 NUL 结尾的 byte 常量数组
        LvalKind::StringConst(bytes) => {
            Ok(Type::array(Type::Byte, Some(bytes.len() as i32 + 1)))
        }
    }
}

/// 检查一次调用：解析被调方、核对实参、登记嵌套与捕获转发。
/// 返回被调方的返回类型。
pub fn analyze_call(call: &mut FuncCall, ctx: &mut SemContext) -> Result<Type, CompilerError> {
    let span = call.span;
    let sym = ctx.resolve(&call.name, span)?;
    let (params, captures) = match &sym.kind {
        SymbolKind::Function { params, captures } => (params.clone(), captures.clone()),
        _ => {
            return Err(ctx.error(
                DiagnosticKind::TypeMismatch,
                format!("`{}` is not a function", call.name),
                span,
            ));
        }
    };

    if call.args.len() != params.len() {
        return Err(ctx.error(
            DiagnosticKind::ArityMismatch,
            format!(
                "`{}` expects {} argument(s), got {}",
                call.name,
                params.len(),
                call.args.len()
            ),
            span,
        ));
    }

    for (param, arg) in params.iter().zip(call.args.iter_mut()) {
        check_argument(param, arg, &call.name, ctx)?;
    }

    // 记录被调方身份；代码生成据此在实参后追加捕获指针。
    // 被调方的每一项捕获都要在本调用点按名可见且同型。
    call.nested = sym.depth >= 1;
    for capture in &captures {
        ctx.forward_capture(capture, &call.name, span)?;
    }
    call.captures = captures;

    Ok(sym.ty.clone())
}

fn check_argument(
    param: &ParamSig,
    arg: &mut Expr,
    callee: &str,
    ctx: &mut SemContext,
) -> Result<(), CompilerError> {
    let arg_ty = analyze_expr(arg, ctx)?;
    // reference 标量形参要求实参是同型左值
    if param.kind == ParamKind::Reference && !param.ty.is_array() {
        if !is_lvalue(arg) {
            return Err(ctx.error(
                DiagnosticKind::NotAnLvalue,
                format!(
                    "argument for reference parameter `{}` of `{}` must be an l-value",
                    param.name, callee
                ),
                arg.span,
            ));
        }
        if arg_ty != param.ty {
            return Err(ctx.error(
                DiagnosticKind::TypeMismatch,
                format!(
                    "reference parameter `{}` of `{}` expects {}, got {}",
                    param.name, callee, param.ty, arg_ty
                ),
                arg.span,
            ));
        }
        return Ok(());
    }
    if !Type::matches(&param.ty, &arg_ty) {
        return Err(ctx.error(
            DiagnosticKind::TypeMismatch,
            format!(
                "parameter `{}` of `{}` expects {}, got {}",
                param.name, callee, param.ty, arg_ty
            ),
            arg.span,
        ));
    }
    Ok(())
}

fn is_lvalue(expr: &Expr) -> bool {
    matches!(&expr.kind, ExprKind::Lval(_))
}

/// 类型检查一个条件。
pub fn analyze_cond(cond: &mut Cond, ctx: &mut SemContext) -> Result<(), CompilerError> {
    match cond {
        Cond::BoolConst(..) => Ok(()),
        Cond::Comp { lhs, rhs, span, .. } => {
            let lhs_ty = analyze_expr(lhs, ctx)?;
            let rhs_ty = analyze_expr(rhs, ctx)?;
            if !lhs_ty.is_arith() || lhs_ty != rhs_ty {
                return Err(ctx.error(
                    DiagnosticKind::TypeMismatch,
                    format!(
                        "comparison operands must share an arithmetic type, got {} and {}",
                        lhs_ty, rhs_ty
                    ),
                    *span,
                ));
            }
            Ok(())
        }
        Cond::Bool { lhs, rhs, .. } => {
            analyze_cond(lhs, ctx)?;
            analyze_cond(rhs, ctx)
        }
        Cond::Not { cond, .. } => analyze_cond(cond, ctx),
    }
}
