pub mod ast;
pub mod ir;
pub mod lexer;
pub mod runtime;
pub mod sem;
pub mod types;

use koopa::ir::Program;

use crate::front::ast::FuncDef;
use crate::CompilerError;

/// 前端流水线：语义分析原地标注 AST，随后生成 Koopa IR。
pub fn compile(prog: &mut FuncDef) -> Result<Program, CompilerError> {
    sem::analyze_program(prog)?;
    ir::generate_ir(prog)
}
