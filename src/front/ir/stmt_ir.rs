use koopa::ir::builder_traits::*;

use crate::front::ast::*;
use crate::front::ir::context::IrContext;
use crate::front::ir::expr_ir::{gen_call, gen_lval_addr};
use crate::front::ir::GenerateIr;
use crate::front::types::Type;
use crate::CompilerError;

/// 当前块还开着就补一条到 target 的跳转。
fn jump_to_if_open(
    ctx: &mut IrContext,
    target: koopa::ir::BasicBlock,
) -> Result<(), CompilerError> {
    let bb = ctx.get_current_bb()?;
    if !ctx.has_terminator(bb)? {
        let jump = ctx.dfg_mut()?.new_value().jump(target);
        ctx.push_inst(jump)?;
    }
    Ok(())
}

pub fn gen_stmt_list(stmts: &[Stmt], ctx: &mut IrContext) -> Result<(), CompilerError> {
    for stmt in stmts {
        // 当前块已经终结时，其后的语句不可达，不再发射
        let bb = ctx.get_current_bb()?;
        if ctx.has_terminator(bb)? {
            break;
        }
        stmt.generate(ctx)?;
    }
    Ok(())
}

pub fn gen_let(lval: &Lval, expr: &Expr, ctx: &mut IrContext) -> Result<(), CompilerError> {
    let value = expr.generate(ctx)?;
    let addr = gen_lval_addr(lval, ctx)?;
    let store = ctx.dfg_mut()?.new_value().store(value, addr);
    ctx.push_inst(store)
}

/// if 的块结构：then、（可选的）else、汇合块。
/// 没有 else 时假分支直接落到汇合块；两个分支都已终结时省略汇合块，
/// 后续语句由不可达检查拦下。
pub fn gen_if(
    cond: &Cond,
    then_stmt: &Stmt,
    else_stmt: Option<&Stmt>,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    let cond_val = cond.generate(ctx)?;

    match else_stmt {
        None => {
            let then_bb = ctx.new_bb()?;
            let end_bb = ctx.new_bb()?;
            let branch = ctx.dfg_mut()?.new_value().branch(cond_val, then_bb, end_bb);
            ctx.push_inst(branch)?;

            ctx.set_current_bb(then_bb);
            then_stmt.generate(ctx)?;
            jump_to_if_open(ctx, end_bb)?;
            ctx.set_current_bb(end_bb);
        }
        Some(else_stmt) => {
            let then_bb = ctx.new_bb()?;
            let else_bb = ctx.new_bb()?;
            let branch = ctx.dfg_mut()?.new_value().branch(cond_val, then_bb, else_bb);
            ctx.push_inst(branch)?;

            ctx.set_current_bb(then_bb);
            then_stmt.generate(ctx)?;
            let then_end = ctx.get_current_bb()?;
            let then_open = !ctx.has_terminator(then_end)?;

            ctx.set_current_bb(else_bb);
            else_stmt.generate(ctx)?;
            let else_end = ctx.get_current_bb()?;
            let else_open = !ctx.has_terminator(else_end)?;

            if then_open || else_open {
                let end_bb = ctx.new_bb()?;
                if then_open {
                    ctx.set_current_bb(then_end);
                    let jump = ctx.dfg_mut()?.new_value().jump(end_bb);
                    ctx.push_inst(jump)?;
                }
                if else_open {
                    ctx.set_current_bb(else_end);
                    let jump = ctx.dfg_mut()?.new_value().jump(end_bb);
                    ctx.push_inst(jump)?;
                }
                ctx.set_current_bb(end_bb);
            } else {
                // 两个分支都终结：不造汇合块，当前块保持已终结状态
                ctx.set_current_bb(else_end);
            }
        }
    }
    Ok(())
}

/// while 的块结构：条件头、循环体、出口。
/// 体内未终结则跳回条件头。
pub fn gen_while(cond: &Cond, body: &Stmt, ctx: &mut IrContext) -> Result<(), CompilerError> {
    let header_bb = ctx.new_bb()?;
    let jump = ctx.dfg_mut()?.new_value().jump(header_bb);
    ctx.push_inst(jump)?;

    ctx.set_current_bb(header_bb);
    let cond_val = cond.generate(ctx)?;
    let body_bb = ctx.new_bb()?;
    let exit_bb = ctx.new_bb()?;
    let branch = ctx.dfg_mut()?.new_value().branch(cond_val, body_bb, exit_bb);
    ctx.push_inst(branch)?;

    ctx.set_current_bb(body_bb);
    body.generate(ctx)?;
    jump_to_if_open(ctx, header_bb)?;

    ctx.set_current_bb(exit_bb);
    Ok(())
}

/// return：过程发射 `ret`（入口过程发射 `ret 0`），函数发射 `ret value`。
pub fn gen_return(expr: Option<&Expr>, ctx: &mut IrContext) -> Result<(), CompilerError> {
    let ret_inst = match expr {
        Some(expr) => {
            let value = expr.generate(ctx)?;
            ctx.dfg_mut()?.new_value().ret(Some(value))
        }
        None => {
            if ctx.is_entry_func {
                let zero = ctx.dfg_mut()?.new_value().integer(0);
                ctx.dfg_mut()?.new_value().ret(Some(zero))
            } else {
                ctx.dfg_mut()?.new_value().ret(None)
            }
        }
    };
    ctx.push_inst(ret_inst)
}

pub fn gen_proc_call(call: &FuncCall, ctx: &mut IrContext) -> Result<(), CompilerError> {
    gen_call(call, ctx)?;
    Ok(())
}

/// 函数收尾：最后一个块缺 terminator 时补一条隐式 ret。
/// 非 proc 函数这里补 0（语义检查已把真正缺 return 的程序拦下）。
pub fn seal_function(ret_ty: &Type, is_entry: bool, ctx: &mut IrContext) -> Result<(), CompilerError> {
    let bb = ctx.get_current_bb()?;
    if ctx.has_terminator(bb)? {
        return Ok(());
    }
    let ret_inst = if is_entry || *ret_ty != Type::Void {
        let zero = ctx.dfg_mut()?.new_value().integer(0);
        ctx.dfg_mut()?.new_value().ret(Some(zero))
    } else {
        ctx.dfg_mut()?.new_value().ret(None)
    };
    ctx.push_inst(ret_inst)
}
