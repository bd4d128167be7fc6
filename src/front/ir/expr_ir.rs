use koopa::ir::builder_traits::*;
use koopa::ir::{BinaryOp as IrBinaryOp, Type as IrType, Value};

use crate::front::ast::*;
use crate::front::ir::context::{IrContext, Slot};
use crate::front::ir::GenerateIr;
use crate::front::types::Type;
use crate::CompilerError;

fn create_integer(n: i32, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    Ok(ctx.dfg_mut()?.new_value().integer(n))
}

fn push_binary(
    op: IrBinaryOp,
    lhs: Value,
    rhs: Value,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let inst = ctx.dfg_mut()?.new_value().binary(op, lhs, rhs);
    ctx.push_inst(inst)?;
    Ok(inst)
}

/// byte 的加减乘在 i32 里回绕，按 255 掩码保持值域 0..=255。
/// 除法与取模不会越界，不需要掩码。
fn mask_byte(val: Value, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    let mask = create_integer(0xff, ctx)?;
    push_binary(IrBinaryOp::And, val, mask, ctx)
}

/// 元素地址：局部数组（指向 [i32, n]）用 getelemptr，
/// 形参数组（已退化的元素指针）用 getptr。
pub fn gen_elem_addr(
    name: &str,
    index: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let info = ctx.lookup_var(name)?;
    let index_val = index.generate(ctx)?;
    let addr = match info.slot {
        Slot::LocalArray(ptr) => ctx.dfg_mut()?.new_value().get_elem_ptr(ptr, index_val),
        Slot::ParamArray(ptr) => ctx.dfg_mut()?.new_value().get_ptr(ptr, index_val),
        Slot::Scalar(_) => {
            return Err(CompilerError::internal(format!(
                "`{}` has type {} but is stored as a scalar",
                name, info.ty
            )));
        }
    };
    ctx.push_inst(addr)?;
    Ok(addr)
}

/// 左值取地址：Let 的目标和 reference 实参都从这里走。
/// 语义检查保证目标是标量 Id 或数组元素。
pub fn gen_lval_addr(lval: &Lval, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    match &lval.kind {
        LvalKind::Id { name, .. } => {
            let info = ctx.lookup_var(name)?;
            match info.slot {
                Slot::Scalar(ptr) => Ok(ptr),
                _ => Err(CompilerError::internal(format!(
                    "`{}` is an array and has no scalar address",
                    name
                ))),
            }
        }
        LvalKind::ArrayAccess { name, index } => gen_elem_addr(name, index, ctx),
        LvalKind::StringConst(_) => Err(CompilerError::internal(
            "string literal has no assignable address",
        )),
    }
}

/// 左值取值。标量 load；数组和字符串退化成元素指针
/// （它们只会作为数组实参出现）。
pub fn gen_lval_value(lval: &Lval, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    match &lval.kind {
        LvalKind::Id { name, .. } => {
            let info = ctx.lookup_var(name)?;
            match info.slot {
                Slot::Scalar(ptr) => {
                    let load = ctx.dfg_mut()?.new_value().load(ptr);
                    ctx.push_inst(load)?;
                    Ok(load)
                }
                Slot::LocalArray(ptr) => {
                    let zero = create_integer(0, ctx)?;
                    let decayed = ctx.dfg_mut()?.new_value().get_elem_ptr(ptr, zero);
                    ctx.push_inst(decayed)?;
                    Ok(decayed)
                }
                Slot::ParamArray(ptr) => Ok(ptr),
            }
        }
        LvalKind::ArrayAccess { name, index } => {
            let addr = gen_elem_addr(name, index, ctx)?;
            let load = ctx.dfg_mut()?.new_value().load(addr);
            ctx.push_inst(load)?;
            Ok(load)
        }
        LvalKind::StringConst(bytes) => {
            let global = ctx.intern_string(bytes);
            let zero = create_integer(0, ctx)?;
            let decayed = ctx.dfg_mut()?.new_value().get_elem_ptr(global, zero);
            ctx.push_inst(decayed)?;
            Ok(decayed)
        }
    }
}

pub fn gen_expr(expr: &Expr, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    match &expr.kind {
        ExprKind::IntConst(n) => create_integer(*n, ctx),
        ExprKind::CharConst(c) => create_integer(*c as i32, ctx),
        ExprKind::Lval(lval) => gen_lval_value(lval, ctx),
        ExprKind::UnOp(op, operand) => {
            let operand_val = operand.generate(ctx)?;
            match op {
                UnOp::Plus => Ok(operand_val),
                UnOp::Minus => {
                    let zero = create_integer(0, ctx)?;
                    push_binary(IrBinaryOp::Sub, zero, operand_val, ctx)
                }
            }
        }
        ExprKind::BinOp(op, lhs, rhs) => {
            let lhs_val = lhs.generate(ctx)?;
            let rhs_val = rhs.generate(ctx)?;
            let ir_op = match op {
                BinOp::Add => IrBinaryOp::Add,
                BinOp::Sub => IrBinaryOp::Sub,
                BinOp::Mul => IrBinaryOp::Mul,
                BinOp::Div => IrBinaryOp::Div,
                BinOp::Mod => IrBinaryOp::Mod,
            };
            let result = push_binary(ir_op, lhs_val, rhs_val, ctx)?;
            let is_byte = expr.ty.as_ref() == Some(&Type::Byte);
            if is_byte && matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul) {
                mask_byte(result, ctx)
            } else {
                Ok(result)
            }
        }
        ExprKind::Call(call) => gen_call(call, ctx),
    }
}

/// 生成一次调用。
///
/// 实参顺序：声明形参（reference 标量传地址，数组传退化指针，
/// 其余传值），随后按捕获顺序追加当前可见的存储指针——
/// 本函数自己捕获的名字转发形参指针，否则是本地 alloc。
pub fn gen_call(call: &FuncCall, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    let info = ctx.lookup_func(&call.name)?;
    let mut args = Vec::with_capacity(info.params.len() + info.captures.len());
    for ((kind, ty), arg) in info.params.iter().zip(call.args.iter()) {
        let value = if *kind == ParamKind::Reference && !ty.is_array() {
            match &arg.kind {
                ExprKind::Lval(lval) => gen_lval_addr(lval, ctx)?,
                _ => {
                    return Err(CompilerError::internal(
                        "reference argument is not an l-value",
                    ));
                }
            }
        } else {
            arg.generate(ctx)?
        };
        args.push(value);
    }
    for capture in &info.captures {
        let var = ctx.lookup_var(&capture.name)?;
        args.push(var.slot.ptr());
    }
    let call_inst = ctx.dfg_mut()?.new_value().call(info.func, args);
    ctx.push_inst(call_inst)?;
    Ok(call_inst)
}

/// 生成一个条件，结果是 0/1 的 i32。
pub fn gen_cond(cond: &Cond, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    match cond {
        Cond::BoolConst(b, _) => create_integer(*b as i32, ctx),
        Cond::Comp { op, lhs, rhs, .. } => {
            // byte 操作数恒在 0..=255，带符号比较与无符号比较一致
            let lhs_val = lhs.generate(ctx)?;
            let rhs_val = rhs.generate(ctx)?;
            let ir_op = match op {
                CompOp::Eq => IrBinaryOp::Eq,
                CompOp::Ne => IrBinaryOp::NotEq,
                CompOp::Lt => IrBinaryOp::Lt,
                CompOp::Gt => IrBinaryOp::Gt,
                CompOp::Le => IrBinaryOp::Le,
                CompOp::Ge => IrBinaryOp::Ge,
            };
            push_binary(ir_op, lhs_val, rhs_val, ctx)
        }
        Cond::Not { cond, .. } => {
            let val = cond.generate(ctx)?;
            let zero = create_integer(0, ctx)?;
            push_binary(IrBinaryOp::Eq, val, zero, ctx)
        }
        Cond::Bool { op, lhs, rhs, .. } => gen_short_circuit(*op, lhs, rhs, ctx),
    }
}

/// 短路求值：结果落在入口块的临时 alloc 里。
///
/// `A & B`：tmp <- A；A 为真才求 B 并覆写 tmp。
/// `A | B`：tmp <- A；A 为假才求 B 并覆写 tmp。
/// 条件值恒为 0/1，可以直接存储无需归一化。
fn gen_short_circuit(
    op: BoolOp,
    lhs: &Cond,
    rhs: &Cond,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let tmp_alloc = ctx.alloc_in_entry(IrType::get_i32())?;

    let lhs_val = lhs.generate(ctx)?;
    let store_lhs = ctx.dfg_mut()?.new_value().store(lhs_val, tmp_alloc);
    ctx.push_inst(store_lhs)?;

    let rhs_bb = ctx.new_bb()?;
    let end_bb = ctx.new_bb()?;
    let branch = match op {
        BoolOp::And => ctx.dfg_mut()?.new_value().branch(lhs_val, rhs_bb, end_bb),
        BoolOp::Or => ctx.dfg_mut()?.new_value().branch(lhs_val, end_bb, rhs_bb),
    };
    ctx.push_inst(branch)?;

    ctx.set_current_bb(rhs_bb);
    let rhs_val = rhs.generate(ctx)?;
    let store_rhs = ctx.dfg_mut()?.new_value().store(rhs_val, tmp_alloc);
    ctx.push_inst(store_rhs)?;
    let jump = ctx.dfg_mut()?.new_value().jump(end_bb);
    ctx.push_inst(jump)?;

    ctx.set_current_bb(end_bb);
    let load = ctx.dfg_mut()?.new_value().load(tmp_alloc);
    ctx.push_inst(load)?;
    Ok(load)
}
