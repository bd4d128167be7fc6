use crate::back::insts::Reg;

/// 目标寄存器约定。scratch 与 allocatable 不相交：
/// 溢出值的装载永远不会踩到分配结果。
#[derive(Clone)]
pub struct TargetRegInfo {
    pub allocatable: Vec<Reg>,
    pub caller_saved: Vec<Reg>,
    pub callee_saved: Vec<Reg>,
    pub scratch: Vec<Reg>,
}

impl TargetRegInfo {
    pub fn riscv32() -> Self {
        Self {
            allocatable: vec![
                Reg::T0, Reg::T1, Reg::T2, Reg::T3,
                Reg::S0, Reg::S1, Reg::S2, Reg::S3, Reg::S4, Reg::S5,
                Reg::S6, Reg::S7, Reg::S8, Reg::S9, Reg::S10, Reg::S11,
            ],
            caller_saved: vec![
                Reg::T0, Reg::T1, Reg::T2, Reg::T3, Reg::T4, Reg::T5, Reg::T6,
            ],
            callee_saved: vec![
                Reg::S0, Reg::S1, Reg::S2, Reg::S3, Reg::S4, Reg::S5,
                Reg::S6, Reg::S7, Reg::S8, Reg::S9, Reg::S10, Reg::S11,
            ],
            scratch: vec![Reg::T4, Reg::T5, Reg::T6],
        }
    }
}
