use std::fs::read_to_string;
use std::io::Read;
use std::path::Path;

use koopa::back::KoopaGenerator;
use koopa::ir::Type as IrType;
use lalrpop_util::{lalrpop_mod, ParseError};

mod back;
mod front;
mod utils;

use crate::front::ast::Span;
use crate::front::lexer::{Lexer, LexicalError, Token};
use utils::args::Params;
use utils::logger::print_error_and_exit;
use utils::{DiagnosticKind, SourceMap};

pub use utils::CompilerError;

// 引用 lalrpop 生成的解析器（src/sl.lalrpop）
lalrpop_mod!(pub sl);

fn main() {
    let params = match Params::from_args() {
        Ok(params) => params,
        Err(e) => print_error_and_exit(&e, "slc", None, 1),
    };

    // 面向 riscv32 生成汇编，指针宽度 4 字节
    if params.needs_asm() {
        IrType::set_ptr_size(4);
    }

    let (input_text, file_label) = match read_input(&params) {
        Ok(pair) => pair,
        Err(e) => print_error_and_exit(&e, "slc", None, 1),
    };
    let source_map = SourceMap::new(&input_text);

    if let Err(e) = run(&params, &input_text) {
        print_error_and_exit(&e, &file_label, Some(&source_map), 1);
    }
}

fn read_input(params: &Params) -> Result<(String, String), CompilerError> {
    match &params.input {
        Some(path) => Ok((read_to_string(path)?, path.clone())),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok((buf, "<stdin>".to_string()))
        }
    }
}

fn format_expected(expected: Vec<String>) -> String {
    if expected.is_empty() {
        "no expected tokens".to_string()
    } else {
        expected.join(", ")
    }
}

/// lalrpop 的错误映射成带位置的诊断；
/// 词法器透传上来的错误保持 LexError 类别。
fn map_parse_error(err: ParseError<usize, Token, LexicalError>) -> CompilerError {
    match err {
        ParseError::InvalidToken { location } => CompilerError::diag(
            DiagnosticKind::ParseError,
            "invalid token",
            Span::from_span(location, location),
        ),
        ParseError::UnrecognizedEof { location, expected } => CompilerError::diag(
            DiagnosticKind::ParseError,
            format!("unexpected end of file, expected: {}", format_expected(expected)),
            Span::from_span(location, location),
        ),
        ParseError::UnrecognizedToken { token, expected } => {
            let (start, tok, end) = token;
            CompilerError::diag(
                DiagnosticKind::ParseError,
                format!("unexpected `{}`, expected: {}", tok, format_expected(expected)),
                Span::from_span(start, end),
            )
        }
        ParseError::ExtraToken { token } => {
            let (start, tok, end) = token;
            CompilerError::diag(
                DiagnosticKind::ParseError,
                format!("extra token `{}` after the top-level function", tok),
                Span::from_span(start, end),
            )
        }
        ParseError::User { error } => CompilerError::diag(
            DiagnosticKind::LexError,
            error.message.clone(),
            Span::from_span(error.offset, error.offset),
        ),
    }
}

fn run(params: &Params, input: &str) -> Result<(), CompilerError> {
    let mut ast = sl::ProgramParser::new()
        .parse(Lexer::new(input))
        .map_err(map_parse_error)?;

    let program = front::compile(&mut ast)?;

    match &params.input {
        Some(path) => {
            // 文件模式：同时写 <name>.imm 和 <name>.asm
            let imm_path = Path::new(path).with_extension("imm");
            KoopaGenerator::from_path(&imm_path)?.generate_on(&program)?;
            let asm = back::generate_asm(&program, params.optimize)?;
            std::fs::write(Path::new(path).with_extension("asm"), asm + "\n")?;
        }
        None if params.emit_asm => {
            let asm = back::generate_asm(&program, params.optimize)?;
            println!("{}", asm);
        }
        None => {
            KoopaGenerator::new(std::io::stdout()).generate_on(&program)?;
        }
    }
    Ok(())
}
