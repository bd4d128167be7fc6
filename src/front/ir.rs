pub mod context;
pub mod expr_ir;
pub mod stmt_ir;

use koopa::ir::builder_traits::*;
use koopa::ir::{FunctionData, Program, Type as IrType, Value};

use crate::front::ast::*;
use crate::front::ir::context::{FuncInfo, Slot, VarInfo};
use crate::front::ir::expr_ir::{gen_cond, gen_expr};
use crate::front::ir::stmt_ir::*;
use crate::front::runtime::runtime_functions;
use crate::front::types::Type;
use crate::CompilerError;

pub use crate::front::ir::context::IrContext;

pub trait GenerateIr {
    type Output;
    fn generate(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError>;
}

impl GenerateIr for Expr {
    type Output = Value;

    fn generate(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        gen_expr(self, ctx)
    }
}

impl GenerateIr for Cond {
    type Output = Value;

    fn generate(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        gen_cond(self, ctx)
    }
}

impl GenerateIr for Stmt {
    type Output = ();

    fn generate(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        match self {
            Stmt::List(stmts, _) => gen_stmt_list(stmts, ctx),
            Stmt::Let { lval, expr, .. } => gen_let(lval, expr, ctx),
            Stmt::If {
                cond,
                then_stmt,
                else_stmt,
                ..
            } => gen_if(cond, then_stmt, else_stmt.as_deref(), ctx),
            Stmt::While { cond, body, .. } => gen_while(cond, body, ctx),
            Stmt::Return { expr, .. } => gen_return(expr.as_ref(), ctx),
            Stmt::ProcCall(call) => gen_proc_call(call, ctx),
            Stmt::Empty(_) => Ok(()),
        }
    }
}

/// 代码生成入口：声明运行时库，把顶层过程发射成 `@main`。
pub fn generate_ir(prog: &FuncDef) -> Result<Program, CompilerError> {
    let mut ctx = IrContext::new();
    ctx.push_scope();
    ctx.reserve_func_name("main");
    declare_runtime(&mut ctx)?;
    emit_func(prog, &mut ctx, true)?;
    ctx.pop_scope();
    Ok(ctx.program)
}

/// 运行时库函数只声明不定义（不挂基本块），链接期由运行时库解析。
fn declare_runtime(ctx: &mut IrContext) -> Result<(), CompilerError> {
    for lib in runtime_functions() {
        let param_tys: Vec<IrType> = lib
            .params
            .iter()
            .map(|(_, ty)| {
                if ty.is_array() {
                    IrType::get_pointer(IrType::get_i32())
                } else {
                    IrType::get_i32()
                }
            })
            .collect();
        let ret_ty = match lib.ret_ty {
            Type::Void => IrType::get_unit(),
            _ => IrType::get_i32(),
        };
        let data = FunctionData::new(format!("@{}", lib.name), param_tys, ret_ty);
        let f = ctx.program.new_func(data);
        ctx.reserve_func_name(lib.name);
        ctx.insert_func(
            lib.name.to_string(),
            FuncInfo {
                func: f,
                params: lib.params.clone(),
                captures: Vec::new(),
            },
        )?;
    }
    Ok(())
}

/// 声明形参的 IR 类型：标量值形参传值，
/// reference 形参和数组形参都是指针。
fn param_ir_type(param: &Fpar) -> IrType {
    if param.ty.is_array() || param.kind == ParamKind::Reference {
        IrType::get_pointer(IrType::get_i32())
    } else {
        IrType::get_i32()
    }
}

/// 捕获形参的 IR 类型：一律是指向被捕获存储的指针。
/// 局部数组指向整个数组，形参数组转发的已经是元素指针。
fn capture_ir_type(capture: &CapturedVar) -> IrType {
    match &capture.ty {
        Type::Array { size: Some(n), .. } => {
            IrType::get_pointer(IrType::get_array(IrType::get_i32(), *n as usize))
        }
        Type::Array { size: None, .. } => IrType::get_pointer(IrType::get_i32()),
        _ => IrType::get_pointer(IrType::get_i32()),
    }
}

/// 发射一个函数定义（顶层或嵌套）。
///
/// 形参表 = 声明形参 + 按捕获顺序追加的捕获指针形参。
/// 入口过程固定叫 `@main` 且返回 i32（退出码 0）。
fn emit_func(def: &FuncDef, ctx: &mut IrContext, is_entry: bool) -> Result<(), CompilerError> {
    let name = if is_entry {
        "@main".to_string()
    } else {
        ctx.unique_func_name(&def.name)
    };
    let mut param_tys: Vec<IrType> = def.params.iter().map(param_ir_type).collect();
    for capture in &def.captures {
        param_tys.push(capture_ir_type(capture));
    }
    let ret_ty = if is_entry {
        IrType::get_i32()
    } else {
        match def.ret_ty {
            Type::Void => IrType::get_unit(),
            _ => IrType::get_i32(),
        }
    };
    let f = ctx.program.new_func(FunctionData::new(name, param_tys, ret_ty));

    // 先登记到外层作用域：递归和后续兄弟函数都要能看到
    ctx.insert_func(
        def.name.clone(),
        FuncInfo {
            func: f,
            params: def.params.iter().map(|p| (p.kind, p.ty.clone())).collect(),
            captures: def.captures.clone(),
        },
    )?;

    // 嵌套发射：挂起外层函数的生成状态
    let saved_func = ctx.current_func;
    let saved_bb = ctx.current_bb;
    let saved_entry = ctx.entry_bb;
    let saved_is_entry = ctx.is_entry_func;
    ctx.current_func = Some(f);
    ctx.is_entry_func = is_entry;

    let entry_bb = ctx.new_bb()?;
    ctx.set_current_bb(entry_bb);
    ctx.entry_bb = Some(entry_bb);

    ctx.push_scope();

    let param_values: Vec<Value> = ctx.program.func(f).params().to_vec();

    for (idx, param) in def.params.iter().enumerate() {
        let value = param_values[idx];
        if param.ty.is_array() {
            // 数组形参保持指针原样
            ctx.insert_var(
                param.name.clone(),
                VarInfo {
                    slot: Slot::ParamArray(value),
                    ty: param.ty.clone(),
                },
            )?;
        } else if param.kind == ParamKind::Reference {
            // 引用形参本身就是存储地址
            ctx.insert_var(
                param.name.clone(),
                VarInfo {
                    slot: Slot::Scalar(value),
                    ty: param.ty.clone(),
                },
            )?;
        } else {
            // 标量值形参：alloc + store，让它有左值存储
            let alloc = ctx.dfg_mut()?.new_value().alloc(IrType::get_i32());
            ctx.dfg_mut()?
                .set_value_name(alloc, Some(format!("%{}", param.name)));
            ctx.push_inst(alloc)?;
            let store = ctx.dfg_mut()?.new_value().store(value, alloc);
            ctx.push_inst(store)?;
            ctx.insert_var(
                param.name.clone(),
                VarInfo {
                    slot: Slot::Scalar(alloc),
                    ty: param.ty.clone(),
                },
            )?;
        }
    }

    for (idx, capture) in def.captures.iter().enumerate() {
        let value = param_values[def.params.len() + idx];
        let slot = match &capture.ty {
            Type::Array { size: Some(_), .. } => Slot::LocalArray(value),
            Type::Array { size: None, .. } => Slot::ParamArray(value),
            _ => Slot::Scalar(value),
        };
        ctx.insert_var(
            capture.name.clone(),
            VarInfo {
                slot,
                ty: capture.ty.clone(),
            },
        )?;
    }

    for local in &def.locals {
        match local {
            LocalDef::Var(var) => {
                let ir_ty = match &var.ty {
                    Type::Array { size: Some(n), .. } => {
                        IrType::get_array(IrType::get_i32(), *n as usize)
                    }
                    _ => IrType::get_i32(),
                };
                let alloc = ctx.dfg_mut()?.new_value().alloc(ir_ty);
                ctx.dfg_mut()?
                    .set_value_name(alloc, Some(format!("%{}", var.name)));
                ctx.push_inst(alloc)?;
                let slot = if var.ty.is_array() {
                    Slot::LocalArray(alloc)
                } else {
                    Slot::Scalar(alloc)
                };
                ctx.insert_var(
                    var.name.clone(),
                    VarInfo {
                        slot,
                        ty: var.ty.clone(),
                    },
                )?;
            }
            LocalDef::Func(func) => emit_func(func, ctx, false)?,
        }
    }

    def.body.generate(ctx)?;
    seal_function(&def.ret_ty, is_entry, ctx)?;

    ctx.pop_scope();
    ctx.current_func = saved_func;
    ctx.current_bb = saved_bb;
    ctx.entry_bb = saved_entry;
    ctx.is_entry_func = saved_is_entry;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lexer::Lexer;
    use crate::front::sem::analyze_program;
    use crate::sl::ProgramParser;

    fn compile(src: &str) -> String {
        let mut prog = ProgramParser::new()
            .parse(Lexer::new(src))
            .expect("parse error");
        analyze_program(&mut prog).expect("semantic error");
        let program = generate_ir(&prog).expect("codegen error");
        let mut gen = koopa::back::KoopaGenerator::new(Vec::new());
        gen.generate_on(&program).expect("emit error");
        std::str::from_utf8(&gen.writer()).unwrap().to_string()
    }

    fn func_line<'a>(text: &'a str, name: &str) -> &'a str {
        let needle = format!("fun {}(", name);
        text.lines()
            .find(|line| line.contains(&needle))
            .unwrap_or_else(|| panic!("no function {} in:\n{}", name, text))
    }

    #[test]
    fn hello_world_interns_the_string_and_calls_write_string() {
        let text = compile(r#"hello () : proc { writeString("hello\n"); }"#);
        assert!(text.contains("global @str_0"));
        // 'h' = 104，NUL 结尾
        assert!(text.contains("104"));
        assert!(text.contains("call @writeString"));
        // 顶层过程变成返回 i32 的 @main，隐式 ret 0
        assert!(func_line(&text, "@main").contains("i32"));
        assert!(text.contains("ret 0"));
    }

    #[test]
    fn string_literals_are_interned_once() {
        let text = compile(
            r#"
            main () : proc {
                writeString("dup");
                writeString("dup");
            }
            "#,
        );
        assert!(text.contains("@str_0"));
        assert!(!text.contains("@str_1"));
    }

    #[test]
    fn factorial_recursion_calls_itself() {
        let text = compile(
            r#"
            main () : proc {
                fact (n : int) : int {
                    if (n <= 1) return 1;
                    return n * fact(n - 1);
                }
                writeInteger(fact(5));
            }
            "#,
        );
        assert!(text.contains("fun @fact"));
        assert!(text.contains("call @fact"));
        assert!(text.contains("ret 1"));
    }

    #[test]
    fn reference_parameters_are_pointer_typed() {
        let text = compile(
            r#"
            main () : proc {
                swap (reference a : int, reference b : int) : proc {
                    t : int;
                    t <- a;
                    a <- b;
                    b <- t;
                }
                x : int;
                y : int;
                x <- 3;
                y <- 7;
                swap(x, y);
                writeInteger(x);
                writeInteger(y);
            }
            "#,
        );
        let swap = func_line(&text, "@swap");
        assert!(swap.contains("*i32"));
        // 调用点传的是 x、y 的存储地址
        assert!(text.contains("call @swap(%x, %y)"));
    }

    #[test]
    fn nested_capture_extends_the_parameter_list() {
        let text = compile(
            r#"
            f () : proc {
                x : int;
                g () : proc {
                    x <- x + 1;
                }
                x <- 10;
                g();
                g();
                writeInteger(x);
            }
            "#,
        );
        // g 多出一个指针形参，调用点转发 &x
        let g = func_line(&text, "@g");
        assert!(g.contains("*i32"));
        assert!(text.contains("call @g(%x)"));
    }

    #[test]
    fn shadowing_gets_a_fresh_slot_not_a_capture() {
        let text = compile(
            r#"
            outer () : proc {
                x : int;
                inner () : proc {
                    x : int;
                    x <- 2;
                    writeInteger(x);
                }
                x <- 1;
                inner();
                writeInteger(x);
            }
            "#,
        );
        let inner = func_line(&text, "@inner");
        // inner 没有捕获形参，自己 alloc 一份 x
        assert!(inner.contains("fun @inner()"));
        assert!(text.contains("call @inner()"));
    }

    #[test]
    fn transitive_capture_is_forwarded_through_the_middle_function() {
        let text = compile(
            r#"
            f () : proc {
                x : int;
                g () : proc {
                    x <- x + 1;
                }
                h () : proc {
                    g();
                }
                x <- 0;
                h();
                writeInteger(x);
            }
            "#,
        );
        // h 捕获 x 才能转发给 g；h 里对 g 的调用用的是 h 的捕获形参
        let h = func_line(&text, "@h");
        assert!(h.contains("*i32"));
        assert!(text.contains("call @h(%x)"));
    }

    #[test]
    fn byte_arithmetic_is_masked() {
        let text = compile(
            r#"
            main () : proc {
                b : byte;
                b <- 'a';
                b <- b + 'b';
                writeByte(b);
            }
            "#,
        );
        assert!(text.contains("255"));
    }

    #[test]
    fn while_loops_jump_back_to_the_header() {
        let text = compile(
            r#"
            main () : proc {
                i : int;
                i <- 0;
                while (i < 10) {
                    i <- i + 1;
                }
                writeInteger(i);
            }
            "#,
        );
        assert!(text.contains("jump"));
        assert!(text.contains("br"));
    }

    #[test]
    fn if_with_both_arms_returning_omits_the_merge_block() {
        // 两个分支都 return：不应再有落空的汇合块
        let text = compile(
            r#"
            main () : proc {
                sign (n : int) : int {
                    if (n >= 0) return 1;
                    else return 0 - 1;
                }
                writeInteger(sign(7));
            }
            "#,
        );
        assert!(text.contains("fun @sign"));
    }

    #[test]
    fn short_circuit_branches_between_blocks() {
        let text = compile(
            r#"
            main () : proc {
                x : int;
                x <- 1;
                if (x > 0 & x < 10) writeInteger(x);
            }
            "#,
        );
        assert!(text.contains("br"));
    }

    #[test]
    fn runtime_stubs_are_declared_without_bodies() {
        let text = compile("main () : proc { ; }");
        assert!(text.contains("decl @writeInteger(i32)"));
        assert!(text.contains("decl @readInteger(): i32"));
        assert!(text.contains("decl @strcmp(*i32, *i32): i32"));
        assert!(text.contains("decl @shrink(i32): i32"));
    }

    #[test]
    fn array_access_uses_getelemptr_for_locals() {
        let text = compile(
            r#"
            main () : proc {
                a : int[4];
                a[0] <- 1;
                writeInteger(a[0]);
            }
            "#,
        );
        assert!(text.contains("getelemptr"));
        assert!(text.contains("alloc [i32, 4]"));
    }

    #[test]
    fn array_parameters_use_getptr() {
        let text = compile(
            r#"
            main () : proc {
                sum (a : int[], n : int) : int {
                    s : int;
                    i : int;
                    s <- 0;
                    i <- 0;
                    while (i < n) {
                        s <- s + a[i];
                        i <- i + 1;
                    }
                    return s;
                }
                xs : int[3];
                xs[0] <- 1;
                xs[1] <- 2;
                xs[2] <- 3;
                writeInteger(sum(xs, 3));
            }
            "#,
        );
        assert!(text.contains("getptr"));
        // 本地数组作实参时退化成元素指针
        assert!(text.contains("getelemptr"));
    }

    #[test]
    fn two_nested_functions_with_the_same_name_get_distinct_symbols() {
        let text = compile(
            r#"
            main () : proc {
                a () : proc {
                    g () : proc { ; }
                    g();
                }
                b () : proc {
                    g () : proc { ; }
                    g();
                }
                a();
                b();
            }
            "#,
        );
        assert!(text.contains("fun @g("));
        assert!(text.contains("fun @g_1("));
    }
}
