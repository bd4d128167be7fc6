//! 后端：把 Koopa IR 翻译成 RISC-V (RV32IM) 汇编。
//!
//! - `insts`：指令与寄存器模型
//! - `program`:汇编程序表示与输出
//! - `context`：栈帧布局与值落点管理
//! - `regalloc`：活跃性分析 + 图着色（`-O` 时启用）
//! - `asm`：逐条 IR 指令的选择逻辑

pub mod asm;
pub mod context;
pub mod insts;
pub mod program;
pub mod regalloc;
pub mod target;

use koopa::ir::Program;

use crate::back::asm::GenerateAsm;
use crate::back::context::Context;
use crate::back::target::TargetRegInfo;
use crate::CompilerError;

/// 从 Koopa IR 程序生成汇编文本。
/// `optimize` 控制寄存器分配：关闭时所有值都落在栈上。
pub fn generate_asm(program: &Program, optimize: bool) -> Result<String, CompilerError> {
    let mut ctx = Context::new(TargetRegInfo::riscv32(), optimize);
    program.generate(program, &mut ctx)?;
    Ok(ctx.program.dump())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front;
    use crate::front::lexer::Lexer;
    use crate::sl::ProgramParser;

    fn assemble(src: &str, optimize: bool) -> String {
        koopa::ir::Type::set_ptr_size(4);
        let mut prog = ProgramParser::new()
            .parse(Lexer::new(src))
            .expect("parse error");
        let program = front::compile(&mut prog).expect("frontend error");
        generate_asm(&program, optimize).expect("backend error")
    }

    const HELLO: &str = r#"hello () : proc { writeString("hi\n"); }"#;

    #[test]
    fn entry_function_gets_a_global_main_label() {
        let asm = assemble(HELLO, false);
        assert!(asm.contains(".globl main"));
        assert!(asm.contains("main:"));
        assert!(asm.contains("call writeString"));
        assert!(asm.contains("ret"));
    }

    #[test]
    fn string_literals_land_in_the_data_section() {
        let asm = assemble(HELLO, false);
        assert!(asm.contains(".data"));
        assert!(asm.contains("str_0:"));
        // 'h' = 104、'i' = 105、'\n' = 10、NUL
        assert!(asm.contains(".word 104"));
        assert!(asm.contains(".word 105"));
        assert!(asm.contains(".word 10"));
        assert!(asm.contains(".word 0"));
    }

    #[test]
    fn runtime_declarations_emit_no_code() {
        let asm = assemble("main () : proc { ; }", false);
        assert!(!asm.contains("writeInteger:"));
        assert!(!asm.contains("strcmp:"));
    }

    const LOOPY: &str = r#"
        main () : proc {
            i : int;
            s : int;
            i <- 0;
            s <- 0;
            while (i < 100) {
                s <- s + i;
                i <- i + 1;
            }
            writeInteger(s);
        }
    "#;

    #[test]
    fn loops_produce_labels_and_branches() {
        let asm = assemble(LOOPY, false);
        assert!(asm.contains("main_bb0:"));
        assert!(asm.contains("beqz"));
        assert!(asm.contains("  j "));
    }

    #[test]
    fn optimized_allocation_still_assembles_calls_and_frames() {
        let asm = assemble(LOOPY, true);
        assert!(asm.contains("main:"));
        assert!(asm.contains("call writeInteger"));
        // 有调用的函数要保存恢复 ra
        assert!(asm.contains("sw ra") || asm.contains("sw ra,"));
        assert!(asm.contains("ret"));
    }

    #[test]
    fn nested_capture_call_passes_a_stack_address() {
        let asm = assemble(
            r#"
            f () : proc {
                x : int;
                g () : proc {
                    x <- x + 1;
                }
                x <- 10;
                g();
                writeInteger(x);
            }
            "#,
            false,
        );
        // 捕获实参是 sp 相对地址
        assert!(asm.contains("addi"));
        assert!(asm.contains("call g"));
        assert!(asm.contains("g:"));
    }
}
