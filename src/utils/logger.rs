use colored::Colorize;

use crate::utils::SourceMap;
use crate::CompilerError;

/// 按 `file:line:col: kind: message` 渲染一条编译错误。
/// 没有位置信息的错误（I/O、参数）只渲染消息本身。
pub fn render_error(error: &CompilerError, file: &str, source_map: Option<&SourceMap>) -> String {
    match error {
        CompilerError::Diagnostic(d) => {
            let loc = source_map
                .map(|sm| sm.format_location(d.span.begin))
                .unwrap_or_else(|| "0:0".to_string());
            format!("{}:{}: {}: {}", file, loc, d.kind, d.message)
        }
        other => other.to_string(),
    }
}

/// 打印错误信息并退出程序
pub fn print_error_and_exit(
    error: &CompilerError,
    file: &str,
    source_map: Option<&SourceMap>,
    exit_code: i32,
) -> ! {
    let rendered = render_error(error, file, source_map);
    eprintln!("{} {}", "error:".red().bold(), rendered.bold());
    std::process::exit(exit_code)
}
