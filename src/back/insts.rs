use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reg {
    X0,             // 恒零
    Sp,             // 栈指针
    Ra,             // 返回地址
    A0, A1, A2, A3, // 参数与返回值
    A4, A5, A6, A7,
    T0, T1, T2, T3, // 调用者保存
    T4, T5, T6,
    S0, S1, S2, S3, // 被调用者保存
    S4, S5, S6, S7,
    S8, S9, S10, S11,
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Reg::X0 => "x0",
            Reg::Sp => "sp",
            Reg::Ra => "ra",
            Reg::A0 => "a0", Reg::A1 => "a1", Reg::A2 => "a2", Reg::A3 => "a3",
            Reg::A4 => "a4", Reg::A5 => "a5", Reg::A6 => "a6", Reg::A7 => "a7",
            Reg::T0 => "t0", Reg::T1 => "t1", Reg::T2 => "t2", Reg::T3 => "t3",
            Reg::T4 => "t4", Reg::T5 => "t5", Reg::T6 => "t6",
            Reg::S0 => "s0", Reg::S1 => "s1", Reg::S2 => "s2", Reg::S3 => "s3",
            Reg::S4 => "s4", Reg::S5 => "s5", Reg::S6 => "s6", Reg::S7 => "s7",
            Reg::S8 => "s8", Reg::S9 => "s9", Reg::S10 => "s10", Reg::S11 => "s11",
        };
        write!(f, "{}", name)
    }
}

/// 后端用到的 RV32IM 指令子集（含伪指令与汇编指示符）。
pub enum Instruction {
    // 加载与移动
    Li(Reg, i32),
    La(Reg, String),
    Mv(Reg, Reg),
    // 访存
    Lw(Reg, i32, Reg),
    Sw(Reg, i32, Reg),
    // 运算
    Add(Reg, Reg, Reg),
    Sub(Reg, Reg, Reg),
    Mul(Reg, Reg, Reg),
    Div(Reg, Reg, Reg),
    Rem(Reg, Reg, Reg),
    And(Reg, Reg, Reg),
    Or(Reg, Reg, Reg),
    Xor(Reg, Reg, Reg),
    Slt(Reg, Reg, Reg),
    Addi(Reg, Reg, i32),
    // 比较伪指令
    Seqz(Reg, Reg),
    Snez(Reg, Reg),
    // 控制转移
    Beqz(Reg, String),
    J(String),
    Call(String),
    Ret,
    // 汇编指示符
    Label(String),
    Global(String),
    Section(String),
    Word(i32),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::Li(rd, imm) => write!(f, "  li {}, {}", rd, imm),
            Instruction::La(rd, label) => write!(f, "  la {}, {}", rd, label),
            Instruction::Mv(rd, rs) => write!(f, "  mv {}, {}", rd, rs),
            Instruction::Lw(rd, imm, rs) => write!(f, "  lw {}, {}({})", rd, imm, rs),
            Instruction::Sw(rs2, imm, rs1) => write!(f, "  sw {}, {}({})", rs2, imm, rs1),
            Instruction::Add(rd, r1, r2) => write!(f, "  add {}, {}, {}", rd, r1, r2),
            Instruction::Sub(rd, r1, r2) => write!(f, "  sub {}, {}, {}", rd, r1, r2),
            Instruction::Mul(rd, r1, r2) => write!(f, "  mul {}, {}, {}", rd, r1, r2),
            Instruction::Div(rd, r1, r2) => write!(f, "  div {}, {}, {}", rd, r1, r2),
            Instruction::Rem(rd, r1, r2) => write!(f, "  rem {}, {}, {}", rd, r1, r2),
            Instruction::And(rd, r1, r2) => write!(f, "  and {}, {}, {}", rd, r1, r2),
            Instruction::Or(rd, r1, r2) => write!(f, "  or {}, {}, {}", rd, r1, r2),
            Instruction::Xor(rd, r1, r2) => write!(f, "  xor {}, {}, {}", rd, r1, r2),
            Instruction::Slt(rd, r1, r2) => write!(f, "  slt {}, {}, {}", rd, r1, r2),
            Instruction::Addi(rd, rs, imm) => write!(f, "  addi {}, {}, {}", rd, rs, imm),
            Instruction::Seqz(rd, rs) => write!(f, "  seqz {}, {}", rd, rs),
            Instruction::Snez(rd, rs) => write!(f, "  snez {}, {}", rd, rs),
            Instruction::Beqz(rs, label) => write!(f, "  beqz {}, {}", rs, label),
            Instruction::J(label) => write!(f, "  j {}", label),
            Instruction::Call(label) => write!(f, "  call {}", label),
            Instruction::Ret => write!(f, "  ret"),
            Instruction::Label(name) => write!(f, "{}:", name),
            Instruction::Global(name) => write!(f, "  .globl {}", name),
            Instruction::Section(name) => write!(f, "  {}", name),
            Instruction::Word(value) => write!(f, "  .word {}", value),
        }
    }
}
