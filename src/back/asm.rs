//! Koopa IR -> RV32IM 指令选择。
//!
//! 策略：不开优化时所有值都在栈上，计算时借 scratch 寄存器
//! （t4-t6）装载；开 `-O` 后大部分值直接住在分配到的 t/s 寄存器里。
//! 函数声明（没有入口基本块）不产生代码。

use koopa::ir::entities::ValueData;
use koopa::ir::values::{Binary, Branch, Call, GetElemPtr, GetPtr, Jump, Load, Return, Store};
use koopa::ir::{BinaryOp, FunctionData, Program, TypeKind, Value, ValueKind};

use crate::back::context::Context;
use crate::back::insts::{Instruction, Reg};
use crate::back::regalloc::{allocate, Loc};
use crate::CompilerError;

pub trait GenerateAsm {
    fn generate(&self, program: &Program, ctx: &mut Context) -> Result<(), CompilerError>;
}

impl GenerateAsm for Program {
    fn generate(&self, program: &Program, ctx: &mut Context) -> Result<(), CompilerError> {
        // .data 段：字符串字面量的全局字数组
        for &global in self.inst_layout() {
            let data = program.borrow_value(global);
            if let ValueKind::GlobalAlloc(alloc) = data.kind() {
                let name = data
                    .name()
                    .as_ref()
                    .map(|n| n[1..].to_string())
                    .ok_or_else(|| CompilerError::internal("unnamed global value"))?;
                ctx.globals.insert(global, name.clone());
                ctx.program.push(Instruction::Section(".data".to_string()));
                ctx.program.push(Instruction::Global(name.clone()));
                ctx.program.push(Instruction::Label(name));
                emit_global_words(alloc.init(), program, ctx)?;
            }
        }

        // .text 段：跳过运行时库声明
        for &func in self.func_layout() {
            let func_data = self.func(func);
            if func_data.layout().entry_bb().is_none() {
                continue;
            }
            ctx.current_func = Some(func);
            func_data.generate(program, ctx)?;
        }
        Ok(())
    }
}

fn emit_global_words(
    init: Value,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let data = program.borrow_value(init);
    match data.kind() {
        ValueKind::Integer(i) => {
            ctx.program.push(Instruction::Word(i.value()));
            Ok(())
        }
        ValueKind::Aggregate(agg) => {
            for &elem in agg.elems() {
                emit_global_words(elem, program, ctx)?;
            }
            Ok(())
        }
        other => Err(CompilerError::internal(format!(
            "unsupported global initializer: {:?}",
            other
        ))),
    }
}

impl GenerateAsm for FunctionData {
    fn generate(&self, program: &Program, ctx: &mut Context) -> Result<(), CompilerError> {
        let name = self.name()[1..].to_string();
        ctx.reset_for_function();
        ctx.current_func_name = name.clone();
        ctx.program.push(Instruction::Section(".text".to_string()));
        ctx.program.push(Instruction::Global(name.clone()));
        ctx.program.push(Instruction::Label(name.clone()));

        // 寄存器分配（不开优化则全体落栈）
        let optimize = ctx.optimize;
        ctx.locs = allocate(self, &ctx.target, optimize);

        // 形参与被用到的被调用者保存寄存器先占栈槽
        for &param in self.params() {
            if matches!(ctx.locs.get(&param), Some(Loc::Stack)) {
                ctx.reserve_value_slot(param);
            }
        }
        let mut used_callee_saved: Vec<Reg> = ctx
            .locs
            .values()
            .filter_map(|loc| match loc {
                Loc::Reg(r) if ctx.target.callee_saved.contains(r) => Some(*r),
                _ => None,
            })
            .collect();
        used_callee_saved.sort_by_key(|r| format!("{}", r));
        used_callee_saved.dedup();
        for reg in used_callee_saved {
            ctx.reserve_callee_saved_slot(reg);
        }

        // 扫描：统计调用、给 alloc 和溢出值分配栈槽
        for (_bb, node) in self.layout().bbs() {
            for &inst in node.insts().keys() {
                let data = self.dfg().value(inst);
                if let ValueKind::Call(call) = data.kind() {
                    ctx.has_call = true;
                    ctx.max_call_args = ctx.max_call_args.max(call.args().len());
                }
                if let ValueKind::Alloc(_) = data.kind() {
                    ctx.reserve_alloc_slot(inst, alloc_size(data)?);
                } else if !data.ty().is_unit()
                    && matches!(ctx.locs.get(&inst), Some(Loc::Stack))
                {
                    ctx.reserve_value_slot(inst);
                }
            }
        }

        ctx.finalize_frame();

        // 基本块标签：入口复用函数标签
        for (idx, (bb, _)) in self.layout().bbs().iter().enumerate() {
            let label = if idx == 0 {
                name.clone()
            } else {
                format!("{}_bb{}", name, idx - 1)
            };
            ctx.bb_labels.insert(*bb, label);
        }

        // prologue
        if ctx.stack_size > 0 {
            ctx.adjust_sp(-ctx.stack_size);
        }
        if ctx.has_call {
            let ra_offset = ctx.ra_offset;
            ctx.store_at(Reg::Ra, ra_offset);
        }
        let saved: Vec<(Reg, i32)> = ctx.callee_saved_slots.clone();
        for (reg, offset) in saved {
            let offset = offset + ctx.arg_area;
            ctx.store_at(reg, offset);
        }
        emit_param_moves(self, ctx)?;

        // 指令体
        for (idx, (bb, node)) in self.layout().bbs().iter().enumerate() {
            if idx > 0 {
                let label = ctx.bb_labels[bb].clone();
                ctx.program.push(Instruction::Label(label));
            }
            for &inst in node.insts().keys() {
                ctx.current_inst = Some(inst);
                self.dfg().value(inst).generate(program, ctx)?;
            }
        }
        Ok(())
    }
}

fn alloc_size(data: &ValueData) -> Result<i32, CompilerError> {
    match data.ty().kind() {
        TypeKind::Pointer(base) => Ok(base.size() as i32),
        _ => Err(CompilerError::internal(format!(
            "alloc has non-pointer type {:?}",
            data.ty()
        ))),
    }
}

/// 入口处把 a0-a7 以及栈传的形参搬到各自的落点。
fn emit_param_moves(func: &FunctionData, ctx: &mut Context) -> Result<(), CompilerError> {
    let arg_regs = [
        Reg::A0, Reg::A1, Reg::A2, Reg::A3, Reg::A4, Reg::A5, Reg::A6, Reg::A7,
    ];
    for (idx, &param) in func.params().iter().enumerate() {
        match ctx.locs.get(&param).copied() {
            Some(Loc::Reg(reg)) => {
                if idx < 8 {
                    if reg != arg_regs[idx] {
                        ctx.program.push(Instruction::Mv(reg, arg_regs[idx]));
                    }
                } else {
                    // 第 9 个起在调用者栈帧里，偏移越过本函数的整个栈帧
                    let offset = ctx.stack_size + ((idx - 8) * 4) as i32;
                    ctx.load_at(reg, offset);
                }
            }
            Some(Loc::Stack) => {
                let slot = ctx.value_slot_offset(param)?;
                if idx < 8 {
                    ctx.store_at(arg_regs[idx], slot);
                } else {
                    let offset = ctx.stack_size + ((idx - 8) * 4) as i32;
                    let tmp = ctx.scratch();
                    ctx.load_at(tmp, offset);
                    ctx.store_at(tmp, slot);
                }
            }
            None => {}
        }
    }
    Ok(())
}

impl GenerateAsm for ValueData {
    fn generate(&self, program: &Program, ctx: &mut Context) -> Result<(), CompilerError> {
        let func = ctx
            .current_func
            .ok_or_else(|| CompilerError::internal("no current function"))?;
        let func_data = program.func(func);
        match self.kind() {
            ValueKind::Return(ret) => gen_return(ret, func_data, ctx),
            ValueKind::Binary(bin) => gen_binary(bin, func_data, ctx),
            ValueKind::Alloc(_) => Ok(()),
            ValueKind::Load(load) => gen_load(load, ctx),
            ValueKind::Store(store) => gen_store(store, func_data, ctx),
            ValueKind::Branch(branch) => gen_branch(branch, func_data, ctx),
            ValueKind::Jump(jump) => gen_jump(jump, ctx),
            ValueKind::Call(call) => gen_call(call, program, func_data, ctx),
            ValueKind::GetElemPtr(gep) => gen_get_elem_ptr(gep, program, func_data, ctx),
            ValueKind::GetPtr(gp) => gen_get_ptr(gp, program, func_data, ctx),
            other => Err(CompilerError::internal(format!(
                "unsupported instruction in backend: {:?}",
                other
            ))),
        }
    }
}

fn gen_return(
    ret: &Return,
    func_data: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    if let Some(val) = ret.value() {
        let reg = ctx.operand_reg(val, func_data)?;
        if reg != Reg::A0 {
            ctx.program.push(Instruction::Mv(Reg::A0, reg));
        }
    }
    let saved: Vec<(Reg, i32)> = ctx.callee_saved_slots.clone();
    for (reg, offset) in saved {
        let offset = offset + ctx.arg_area;
        ctx.load_at(reg, offset);
    }
    if ctx.has_call {
        let ra_offset = ctx.ra_offset;
        ctx.load_at(Reg::Ra, ra_offset);
    }
    if ctx.stack_size > 0 {
        ctx.adjust_sp(ctx.stack_size);
    }
    ctx.program.push(Instruction::Ret);
    Ok(())
}

fn gen_binary(
    bin: &Binary,
    func_data: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let inst = ctx
        .current_inst
        .ok_or_else(|| CompilerError::internal("no current instruction"))?;
    let lhs = ctx.operand_reg(bin.lhs(), func_data)?;
    let rhs = ctx.operand_reg(bin.rhs(), func_data)?;
    let (dest, spill) = ctx.dest_reg(inst);

    match bin.op() {
        BinaryOp::Add => ctx.program.push(Instruction::Add(dest, lhs, rhs)),
        BinaryOp::Sub => ctx.program.push(Instruction::Sub(dest, lhs, rhs)),
        BinaryOp::Mul => ctx.program.push(Instruction::Mul(dest, lhs, rhs)),
        BinaryOp::Div => ctx.program.push(Instruction::Div(dest, lhs, rhs)),
        BinaryOp::Mod => ctx.program.push(Instruction::Rem(dest, lhs, rhs)),
        BinaryOp::And => ctx.program.push(Instruction::And(dest, lhs, rhs)),
        BinaryOp::Or => ctx.program.push(Instruction::Or(dest, lhs, rhs)),
        BinaryOp::Xor => ctx.program.push(Instruction::Xor(dest, lhs, rhs)),
        BinaryOp::Eq => {
            ctx.program.push(Instruction::Xor(dest, lhs, rhs));
            ctx.program.push(Instruction::Seqz(dest, dest));
        }
        BinaryOp::NotEq => {
            ctx.program.push(Instruction::Xor(dest, lhs, rhs));
            ctx.program.push(Instruction::Snez(dest, dest));
        }
        BinaryOp::Lt => ctx.program.push(Instruction::Slt(dest, lhs, rhs)),
        BinaryOp::Gt => ctx.program.push(Instruction::Slt(dest, rhs, lhs)),
        BinaryOp::Le => {
            // a <= b 即 !(b < a)
            ctx.program.push(Instruction::Slt(dest, rhs, lhs));
            ctx.program.push(Instruction::Seqz(dest, dest));
        }
        BinaryOp::Ge => {
            ctx.program.push(Instruction::Slt(dest, lhs, rhs));
            ctx.program.push(Instruction::Seqz(dest, dest));
        }
        other => {
            return Err(CompilerError::internal(format!(
                "unsupported binary operator {:?}",
                other
            )));
        }
    }
    if spill {
        ctx.save_result(inst, dest)?;
    }
    Ok(())
}

fn gen_load(load: &Load, ctx: &mut Context) -> Result<(), CompilerError> {
    let inst = ctx
        .current_inst
        .ok_or_else(|| CompilerError::internal("no current instruction"))?;
    let addr = ctx.address_reg(load.src())?;
    let (dest, spill) = ctx.dest_reg(inst);
    ctx.program.push(Instruction::Lw(dest, 0, addr));
    if spill {
        ctx.save_result(inst, dest)?;
    }
    Ok(())
}

fn gen_store(
    store: &Store,
    func_data: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let addr = ctx.address_reg(store.dest())?;
    let value = ctx.operand_reg(store.value(), func_data)?;
    ctx.program.push(Instruction::Sw(value, 0, addr));
    Ok(())
}

/// 指针运算公用的尾段：offset = index * elem_size，dest = base + offset。
/// mul 的目的寄存器复用 size 寄存器，整个序列只需要三个同时活跃的寄存器。
fn gen_pointer_offset(
    base: Reg,
    index: Reg,
    elem_size: i32,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let inst = ctx
        .current_inst
        .ok_or_else(|| CompilerError::internal("no current instruction"))?;
    let size = ctx.scratch_excluding(&[base, index]);
    ctx.program.push(Instruction::Li(size, elem_size));
    ctx.program.push(Instruction::Mul(size, index, size));
    let (dest, spill) = ctx.dest_reg(inst);
    ctx.program.push(Instruction::Add(dest, base, size));
    if spill {
        ctx.save_result(inst, dest)?;
    }
    Ok(())
}

fn gen_get_elem_ptr(
    gep: &GetElemPtr,
    program: &Program,
    func_data: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let elem_size = {
        let ty = pointer_value_ty(gep.src(), program, func_data, ctx)?;
        match ty.kind() {
            TypeKind::Pointer(base) => match base.kind() {
                TypeKind::Array(elem, _) => elem.size() as i32,
                _ => {
                    return Err(CompilerError::internal(
                        "getelemptr source is not a pointer to an array",
                    ));
                }
            },
            _ => return Err(CompilerError::internal("getelemptr source is not a pointer")),
        }
    };
    let base = ctx.address_reg(gep.src())?;
    let index = ctx.operand_reg(gep.index(), func_data)?;
    gen_pointer_offset(base, index, elem_size, ctx)
}

fn gen_get_ptr(
    gp: &GetPtr,
    program: &Program,
    func_data: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let elem_size = {
        let ty = pointer_value_ty(gp.src(), program, func_data, ctx)?;
        match ty.kind() {
            TypeKind::Pointer(base) => base.size() as i32,
            _ => return Err(CompilerError::internal("getptr source is not a pointer")),
        }
    };
    let base = ctx.address_reg(gp.src())?;
    let index = ctx.operand_reg(gp.index(), func_data)?;
    gen_pointer_offset(base, index, elem_size, ctx)
}

fn pointer_value_ty(
    val: Value,
    program: &Program,
    func_data: &FunctionData,
    ctx: &Context,
) -> Result<koopa::ir::Type, CompilerError> {
    if ctx.globals.contains_key(&val) {
        Ok(program.borrow_value(val).ty().clone())
    } else {
        Ok(func_data.dfg().value(val).ty().clone())
    }
}

fn gen_branch(
    branch: &Branch,
    func_data: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let cond = ctx.operand_reg(branch.cond(), func_data)?;
    let true_label = ctx.bb_labels[&branch.true_bb()].clone();
    let false_label = ctx.bb_labels[&branch.false_bb()].clone();
    // beqz 的跳转范围有限，经由本地标签中转，远目标都走 j
    let skip = ctx.fresh_label("br");
    ctx.program.push(Instruction::Beqz(cond, skip.clone()));
    ctx.program.push(Instruction::J(true_label));
    ctx.program.push(Instruction::Label(skip));
    ctx.program.push(Instruction::J(false_label));
    Ok(())
}

fn gen_jump(jump: &Jump, ctx: &mut Context) -> Result<(), CompilerError> {
    let label = ctx.bb_labels[&jump.target()].clone();
    ctx.program.push(Instruction::J(label));
    Ok(())
}

fn gen_call(
    call: &Call,
    program: &Program,
    func_data: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let inst = ctx
        .current_inst
        .ok_or_else(|| CompilerError::internal("no current instruction"))?;
    let arg_regs = [
        Reg::A0, Reg::A1, Reg::A2, Reg::A3, Reg::A4, Reg::A5, Reg::A6, Reg::A7,
    ];
    for (idx, &arg) in call.args().iter().enumerate() {
        let reg = ctx.operand_reg(arg, func_data)?;
        if idx < 8 {
            if reg != arg_regs[idx] {
                ctx.program.push(Instruction::Mv(arg_regs[idx], reg));
            }
        } else {
            // 出参区从 sp+0 开始
            let offset = ((idx - 8) * 4) as i32;
            ctx.store_at(reg, offset);
        }
    }

    let callee = program.func(call.callee());
    let callee_name = callee.name()[1..].to_string();
    ctx.program.push(Instruction::Call(callee_name));

    let returns_value = match callee.ty().kind() {
        TypeKind::Function(_, ret) => !ret.is_unit(),
        _ => false,
    };
    if returns_value {
        match ctx.locs.get(&inst).copied() {
            Some(Loc::Reg(reg)) => {
                if reg != Reg::A0 {
                    ctx.program.push(Instruction::Mv(reg, Reg::A0));
                }
            }
            Some(Loc::Stack) => {
                let offset = ctx.value_slot_offset(inst)?;
                ctx.store_at(Reg::A0, offset);
            }
            None => {}
        }
    }
    Ok(())
}
