use std::env::args;

use crate::CompilerError;

/// 命令行参数。
///
/// - 无参数：从标准输入读源码，IR 写到标准输出
/// - `-i`：同上（显式形式）
/// - `-f`：输出 RISC-V 汇编而不是 IR
/// - `-O`：启用后端优化（寄存器分配）
/// - 位置参数：输入文件，同时生成 `<name>.imm` 和 `<name>.asm`
#[derive(Debug, Clone)]
pub struct Params {
    pub input: Option<String>,
    pub emit_ir: bool,
    pub emit_asm: bool,
    pub optimize: bool,
}

impl Params {
    pub fn from_args() -> Result<Self, CompilerError> {
        let mut args = args();
        args.next();

        let mut input = None;
        let mut emit_ir = false;
        let mut emit_asm = false;
        let mut optimize = false;

        for arg in args {
            match arg.as_str() {
                "-O" => {
                    optimize = true;
                }
                "-i" => {
                    emit_ir = true;
                }
                "-f" => {
                    emit_asm = true;
                }
                _ if arg.starts_with('-') => {
                    return Err(CompilerError::ArgsError(format!("Unknown flag `{}`", arg)));
                }
                _ => {
                    if input.is_none() {
                        input = Some(arg);
                    } else {
                        return Err(CompilerError::ArgsError(
                            "Multiple input files are not supported".to_string(),
                        ));
                    }
                }
            }
        }
        if emit_ir && emit_asm {
            return Err(CompilerError::ArgsError(
                "-i and -f are mutually exclusive".to_string(),
            ));
        }
        if input.is_some() && (emit_ir || emit_asm) {
            return Err(CompilerError::ArgsError(
                "-i/-f write to stdout and cannot be combined with an input file".to_string(),
            ));
        }
        Ok(Params {
            input,
            emit_ir,
            emit_asm,
            optimize,
        })
    }

    /// 本次运行是否需要生成汇编（决定是否按 riscv32 设置指针宽度）。
    pub fn needs_asm(&self) -> bool {
        self.emit_asm || self.input.is_some()
    }
}
