use std::collections::{HashMap, HashSet};

use koopa::ir::builder_traits::*;
use koopa::ir::dfg::DataFlowGraph;
use koopa::ir::layout::Layout;
use koopa::ir::{BasicBlock, Function, Program, Type as IrType, Value, ValueKind};

use crate::front::ast::{CapturedVar, ParamKind};
use crate::front::types::Type;
use crate::CompilerError;

/// 一个名字在生成期的存储形态。三种形态都承载一个指针值，
/// 区别在于指针指向什么、用哪种索引指令。
#[derive(Debug, Clone, Copy)]
pub enum Slot {
    /// 指向标量存储：局部 alloc、值形参的 alloc、引用形参本身、标量捕获形参
    Scalar(Value),
    /// 指向 [i32, n]：局部数组的 alloc、局部数组捕获形参；用 getelemptr 索引
    LocalArray(Value),
    /// 已退化的元素指针：数组形参、形参数组捕获形参；用 getptr 索引
    ParamArray(Value),
}

impl Slot {
    pub fn ptr(&self) -> Value {
        match self {
            Slot::Scalar(v) | Slot::LocalArray(v) | Slot::ParamArray(v) => *v,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VarInfo {
    pub slot: Slot,
    pub ty: Type,
}

/// 生成期的函数信息：调用点要靠它拿形参约定和捕获表
/// （递归调用也以此为准，而不是调用节点上分析期的副本）。
#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub func: Function,
    pub params: Vec<(ParamKind, Type)>,
    pub captures: Vec<CapturedVar>,
}

#[derive(Debug, Clone)]
pub enum GenEntry {
    Var(VarInfo),
    Func(FuncInfo),
}

/// 代码生成上下文：Koopa 程序、当前函数状态、生成期作用域栈、
/// 字符串字面量驻留表。
pub struct IrContext {
    pub program: Program,
    pub current_func: Option<Function>,
    pub current_bb: Option<BasicBlock>,
    /// 当前函数入口基本块（一次性 alloc 放这里）
    pub entry_bb: Option<BasicBlock>,
    pub scopes: Vec<HashMap<String, GenEntry>>,
    /// 顶层过程以 `@main : () -> i32` 形式发射，return 落成 `ret 0`
    pub is_entry_func: bool,
    strings: HashMap<Vec<u8>, Value>,
    func_names: HashSet<String>,
}

impl IrContext {
    pub fn new() -> Self {
        Self {
            program: Program::new(),
            current_func: None,
            current_bb: None,
            entry_bb: None,
            scopes: Vec::new(),
            is_entry_func: false,
            strings: HashMap::new(),
            func_names: HashSet::new(),
        }
    }

    pub fn dfg_mut(&mut self) -> Result<&mut DataFlowGraph, CompilerError> {
        let f = self
            .current_func
            .ok_or_else(|| CompilerError::internal("no current function"))?;
        Ok(self.program.func_mut(f).dfg_mut())
    }

    pub fn layout(&mut self) -> Result<&mut Layout, CompilerError> {
        let f = self
            .current_func
            .ok_or_else(|| CompilerError::internal("no current function"))?;
        Ok(self.program.func_mut(f).layout_mut())
    }

    pub fn get_current_bb(&self) -> Result<BasicBlock, CompilerError> {
        self.current_bb
            .ok_or_else(|| CompilerError::internal("no current basic block"))
    }

    pub fn set_current_bb(&mut self, bb: BasicBlock) {
        self.current_bb = Some(bb);
    }

    /// 新建基本块并挂到布局末尾。名字交给 Koopa 自动分配。
    pub fn new_bb(&mut self) -> Result<BasicBlock, CompilerError> {
        let bb = self.dfg_mut()?.new_bb().basic_block(None);
        self.layout()?
            .bbs_mut()
            .push_key_back(bb)
            .map_err(|_| CompilerError::internal("failed to add basic block"))?;
        Ok(bb)
    }

    pub fn push_inst(&mut self, inst: Value) -> Result<(), CompilerError> {
        let bb = self.get_current_bb()?;
        self.layout()?
            .bb_mut(bb)
            .insts_mut()
            .push_key_back(inst)
            .map_err(|_| CompilerError::internal("failed to insert instruction"))
    }

    pub fn has_terminator(&mut self, bb: BasicBlock) -> Result<bool, CompilerError> {
        let last_inst = self.layout()?.bb_mut(bb).insts().keys().last().copied();
        if let Some(inst) = last_inst {
            let value_data = self.dfg_mut()?.value(inst);
            Ok(matches!(
                value_data.kind(),
                ValueKind::Return(_) | ValueKind::Jump(_) | ValueKind::Branch(_)
            ))
        } else {
            Ok(false)
        }
    }

    /// 在函数入口块头部插入 alloc（避免循环里反复分配；
    /// 放在最前面保证不会落到 terminator 之后）。
    pub fn alloc_in_entry(&mut self, ty: IrType) -> Result<Value, CompilerError> {
        let entry_bb = self
            .entry_bb
            .ok_or_else(|| CompilerError::internal("no entry basic block"))?;
        let alloc_inst = self.dfg_mut()?.new_value().alloc(ty);
        self.layout()?
            .bb_mut(entry_bb)
            .insts_mut()
            .push_key_front(alloc_inst)
            .map_err(|_| CompilerError::internal("failed to add entry alloc"))?;
        Ok(alloc_inst)
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn insert_var(&mut self, name: String, info: VarInfo) -> Result<(), CompilerError> {
        self.scopes
            .last_mut()
            .ok_or_else(|| CompilerError::internal("no scope on stack"))?
            .insert(name, GenEntry::Var(info));
        Ok(())
    }

    pub fn insert_func(&mut self, name: String, info: FuncInfo) -> Result<(), CompilerError> {
        self.scopes
            .last_mut()
            .ok_or_else(|| CompilerError::internal("no scope on stack"))?
            .insert(name, GenEntry::Func(info));
        Ok(())
    }

    pub fn lookup_var(&self, name: &str) -> Result<VarInfo, CompilerError> {
        for scope in self.scopes.iter().rev() {
            match scope.get(name) {
                Some(GenEntry::Var(info)) => return Ok(info.clone()),
                Some(GenEntry::Func(_)) => break,
                None => {}
            }
        }
        Err(CompilerError::internal(format!(
            "variable `{}` missing from generation scope",
            name
        )))
    }

    pub fn lookup_func(&self, name: &str) -> Result<FuncInfo, CompilerError> {
        for scope in self.scopes.iter().rev() {
            match scope.get(name) {
                Some(GenEntry::Func(info)) => return Ok(info.clone()),
                Some(GenEntry::Var(_)) => break,
                None => {}
            }
        }
        Err(CompilerError::internal(format!(
            "function `{}` missing from generation scope",
            name
        )))
    }

    /// 字符串字面量驻留：同一内容共享一个私有全局常量数组。
    /// 返回指向 `[i32, len + 1]` 的全局 alloc。
    pub fn intern_string(&mut self, bytes: &[u8]) -> Value {
        if let Some(&global) = self.strings.get(bytes) {
            return global;
        }
        let mut elems = Vec::with_capacity(bytes.len() + 1);
        for &b in bytes {
            elems.push(self.program.new_value().integer(b as i32));
        }
        elems.push(self.program.new_value().integer(0));
        let aggregate = self.program.new_value().aggregate(elems);
        let global = self.program.new_value().global_alloc(aggregate);
        let name = format!("@str_{}", self.strings.len());
        self.program.set_value_name(global, Some(name));
        self.strings.insert(bytes.to_vec(), global);
        global
    }

    /// 给（可能同名的）嵌套函数起全局唯一的符号名。
    pub fn unique_func_name(&mut self, base: &str) -> String {
        let mut name = base.to_string();
        let mut next = 1;
        while self.func_names.contains(&name) {
            name = format!("{}_{}", base, next);
            next += 1;
        }
        self.func_names.insert(name.clone());
        format!("@{}", name)
    }

    /// 预订一个符号名（入口 `main` 与运行时库）。
    pub fn reserve_func_name(&mut self, name: &str) {
        self.func_names.insert(name.to_string());
    }
}
