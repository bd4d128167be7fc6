use std::collections::HashMap;

use koopa::ir::{BasicBlock, Function, Value, ValueKind};

use crate::back::insts::{Instruction, Reg};
use crate::back::program::AsmProgram;
use crate::back::regalloc::Loc;
use crate::back::target::TargetRegInfo;
use crate::CompilerError;

/// 汇编生成上下文。
///
/// 栈帧布局（自 sp 向上）：
///
/// ```text
/// +--------------------+ <- sp + 栈帧大小
/// |   保存的 ra        |   （函数里有 call 时）
/// +--------------------+
/// |   局部与溢出槽     |
/// +--------------------+
/// |   出参区           |   （某次调用实参超过 8 个时）
/// +--------------------+ <- sp
/// ```
///
/// 栈帧大小对齐到 16 字节。值槽的偏移在记录时不含出参区，
/// 访问时由这里统一加上。
pub struct Context {
    pub program: AsmProgram,
    pub target: TargetRegInfo,
    pub optimize: bool,
    pub current_func: Option<Function>,
    pub current_func_name: String,
    pub current_inst: Option<Value>,
    /// 寄存器分配结果
    pub locs: HashMap<Value, Loc>,
    /// 溢出值 -> 栈偏移（不含出参区）
    pub value_slots: HashMap<Value, i32>,
    /// alloc -> 栈偏移（不含出参区）
    pub alloc_slots: HashMap<Value, i32>,
    /// 全局值 -> 汇编符号名
    pub globals: HashMap<Value, String>,
    pub bb_labels: HashMap<BasicBlock, String>,
    pub stack_size: i32,
    pub has_call: bool,
    pub max_call_args: usize,
    pub ra_offset: i32,
    pub arg_area: i32,
    pub callee_saved_slots: Vec<(Reg, i32)>,
    next_scratch: usize,
    next_label: usize,
    used_slots: i32,
}

impl Context {
    pub fn new(target: TargetRegInfo, optimize: bool) -> Self {
        Self {
            program: AsmProgram::new(),
            target,
            optimize,
            current_func: None,
            current_func_name: String::new(),
            current_inst: None,
            locs: HashMap::new(),
            value_slots: HashMap::new(),
            alloc_slots: HashMap::new(),
            globals: HashMap::new(),
            bb_labels: HashMap::new(),
            stack_size: 0,
            has_call: false,
            max_call_args: 0,
            ra_offset: 0,
            arg_area: 0,
            callee_saved_slots: Vec::new(),
            next_scratch: 0,
            next_label: 0,
            used_slots: 0,
        }
    }

    pub fn reset_for_function(&mut self) {
        self.current_inst = None;
        self.current_func_name.clear();
        self.locs.clear();
        self.value_slots.clear();
        self.alloc_slots.clear();
        self.bb_labels.clear();
        self.stack_size = 0;
        self.has_call = false;
        self.max_call_args = 0;
        self.ra_offset = 0;
        self.arg_area = 0;
        self.callee_saved_slots.clear();
        self.next_scratch = 0;
        self.next_label = 0;
        self.used_slots = 0;
    }

    pub fn fresh_label(&mut self, prefix: &str) -> String {
        let id = self.next_label;
        self.next_label += 1;
        format!("L{}_{}_{}", self.current_func_name, prefix, id)
    }

    /// 轮转借用一个 scratch 寄存器
    pub fn scratch(&mut self) -> Reg {
        let regs = &self.target.scratch;
        let reg = regs[self.next_scratch % regs.len()];
        self.next_scratch += 1;
        reg
    }

    pub fn scratch_excluding(&mut self, exclude: &[Reg]) -> Reg {
        for _ in 0..self.target.scratch.len() {
            let reg = self.scratch();
            if !exclude.contains(&reg) {
                return reg;
            }
        }
        self.scratch()
    }

    /// 给一个溢出值留 4 字节栈槽
    pub fn reserve_value_slot(&mut self, val: Value) {
        let offset = self.used_slots;
        self.used_slots += 4;
        self.value_slots.insert(val, offset);
    }

    /// 给 alloc 留一块按类型大小的栈空间
    pub fn reserve_alloc_slot(&mut self, val: Value, size: i32) {
        let offset = self.used_slots;
        self.used_slots += size;
        self.alloc_slots.insert(val, offset);
    }

    pub fn reserve_callee_saved_slot(&mut self, reg: Reg) {
        let offset = self.used_slots;
        self.used_slots += 4;
        self.callee_saved_slots.push((reg, offset));
    }

    /// 结算栈帧：值槽 + ra + 出参区，对齐 16 字节。
    pub fn finalize_frame(&mut self) {
        let ra = if self.has_call { 4 } else { 0 };
        let arg_area = if self.max_call_args > 8 {
            ((self.max_call_args - 8) * 4) as i32
        } else {
            0
        };
        self.arg_area = arg_area;
        let total = self.used_slots + ra + arg_area;
        self.stack_size = (total + 15) / 16 * 16;
        if self.has_call {
            self.ra_offset = self.stack_size - 4;
        }
    }

    /// sp 相对访存，偏移超出 imm12 时经由 scratch 合成地址。
    pub fn load_at(&mut self, reg: Reg, offset: i32) {
        if (-2048..=2047).contains(&offset) {
            self.program.push(Instruction::Lw(reg, offset, Reg::Sp));
        } else {
            let addr = self.scratch_excluding(&[reg]);
            self.program.push(Instruction::Li(addr, offset));
            self.program.push(Instruction::Add(addr, Reg::Sp, addr));
            self.program.push(Instruction::Lw(reg, 0, addr));
        }
    }

    pub fn store_at(&mut self, reg: Reg, offset: i32) {
        if (-2048..=2047).contains(&offset) {
            self.program.push(Instruction::Sw(reg, offset, Reg::Sp));
        } else {
            let addr = self.scratch_excluding(&[reg]);
            self.program.push(Instruction::Li(addr, offset));
            self.program.push(Instruction::Add(addr, Reg::Sp, addr));
            self.program.push(Instruction::Sw(reg, 0, addr));
        }
    }

    pub fn adjust_sp(&mut self, offset: i32) {
        if (-2048..=2047).contains(&offset) {
            self.program
                .push(Instruction::Addi(Reg::Sp, Reg::Sp, offset));
        } else {
            let tmp = self.scratch();
            self.program.push(Instruction::Li(tmp, offset));
            self.program.push(Instruction::Add(Reg::Sp, Reg::Sp, tmp));
        }
    }

    /// 把 sp+offset 的地址合成进一个寄存器
    pub fn materialize_sp_offset(&mut self, offset: i32) -> Reg {
        let reg = self.scratch();
        if (-2048..=2047).contains(&offset) {
            self.program.push(Instruction::Addi(reg, Reg::Sp, offset));
        } else {
            self.program.push(Instruction::Li(reg, offset));
            self.program.push(Instruction::Add(reg, Reg::Sp, reg));
        }
        reg
    }

    /// 读一个操作数进寄存器。
    ///
    /// - 常量 0 直接用 x0，其余立即数 li 进 scratch
    /// - 分到寄存器的值原地返回
    /// - 溢出值从栈槽装载
    /// - alloc 与全局作为操作数时取的是地址（捕获指针、引用实参）
    pub fn operand_reg(
        &mut self,
        val: Value,
        func_data: &koopa::ir::FunctionData,
    ) -> Result<Reg, CompilerError> {
        if let ValueKind::Integer(i) = func_data.dfg().value(val).kind() {
            if i.value() == 0 {
                return Ok(Reg::X0);
            }
            let reg = self.scratch();
            self.program.push(Instruction::Li(reg, i.value()));
            return Ok(reg);
        }
        match self.locs.get(&val) {
            Some(Loc::Reg(reg)) => return Ok(*reg),
            Some(Loc::Stack) => {
                let offset = self.value_slot_offset(val)?;
                let reg = self.scratch();
                self.load_at(reg, offset);
                return Ok(reg);
            }
            None => {}
        }
        if let Some(offset) = self.alloc_slots.get(&val).copied() {
            return Ok(self.materialize_sp_offset(offset + self.arg_area));
        }
        if let Some(name) = self.globals.get(&val).cloned() {
            let reg = self.scratch();
            self.program.push(Instruction::La(reg, name));
            return Ok(reg);
        }
        Err(CompilerError::internal(format!(
            "operand {:?} has no location",
            val
        )))
    }

    /// 指针操作数的地址寄存器（load/store/getelemptr/getptr 的基址）。
    pub fn address_reg(&mut self, val: Value) -> Result<Reg, CompilerError> {
        if let Some(Loc::Reg(reg)) = self.locs.get(&val) {
            return Ok(*reg);
        }
        if let Some(name) = self.globals.get(&val).cloned() {
            let reg = self.scratch();
            self.program.push(Instruction::La(reg, name));
            return Ok(reg);
        }
        if let Some(offset) = self.alloc_slots.get(&val).copied() {
            return Ok(self.materialize_sp_offset(offset + self.arg_area));
        }
        if self.value_slots.contains_key(&val) {
            let offset = self.value_slot_offset(val)?;
            let reg = self.scratch();
            self.load_at(reg, offset);
            return Ok(reg);
        }
        Err(CompilerError::internal(format!(
            "pointer {:?} has no address",
            val
        )))
    }

    /// 结果寄存器；第二个分量表示是否还要写回栈槽。
    pub fn dest_reg(&mut self, val: Value) -> (Reg, bool) {
        match self.locs.get(&val) {
            Some(Loc::Reg(reg)) => (*reg, false),
            _ => (self.scratch(), true),
        }
    }

    /// 把指令结果写回它的栈槽（若有）。
    pub fn save_result(&mut self, val: Value, reg: Reg) -> Result<(), CompilerError> {
        if self.value_slots.contains_key(&val) {
            let offset = self.value_slot_offset(val)?;
            self.store_at(reg, offset);
        }
        Ok(())
    }

    pub fn value_slot_offset(&self, val: Value) -> Result<i32, CompilerError> {
        self.value_slots
            .get(&val)
            .map(|off| off + self.arg_area)
            .ok_or_else(|| CompilerError::internal(format!("value {:?} has no stack slot", val)))
    }
}
