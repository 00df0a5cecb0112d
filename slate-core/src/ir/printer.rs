//! Compact textual form of the IR.
//!
//! One statement per line, nested blocks indented by two spaces. The output
//! is fully deterministic: two structurally identical trees print
//! byte-identically, which is what the SSA tests key on.

use std::fmt::Write;

use super::{Block, Body, ConstVal, ExprId, ExprKind, ForKind, Func, Stmt, StmtKind};

pub fn print_func(body: &Body, func: &Func) -> String {
    let mut out = String::new();
    let params: Vec<String> = func.params.iter().map(|&p| param_to_string(body, p)).collect();
    let _ = write!(out, "func {}({})", func.name, params.join(", "));
    if let Some(ret) = func.ret {
        let _ = write!(out, " -> {}", ret.name());
    }
    out.push_str(" {\n");
    write_block(&mut out, body, &func.body, 1);
    out.push_str("}\n");
    out
}

pub fn print_stmt(body: &Body, stmt: &Stmt) -> String {
    let mut out = String::new();
    write_stmt(&mut out, body, stmt, 0);
    out
}

fn param_to_string(body: &Body, id: ExprId) -> String {
    let dtype = body.dtype_of(id);
    match &body.get(id).kind {
        ExprKind::Var { name } => format!("{}: {}", name, dtype.name()),
        ExprKind::Tensor { name } => format!("{}: tensor<{}>", name, dtype.name()),
        other => format!("<{:?}>", other),
    }
}

fn write_block(out: &mut String, body: &Body, block: &Block, indent: usize) {
    for stmt in &block.stmts {
        write_stmt(out, body, stmt, indent);
    }
}

fn write_stmt(out: &mut String, body: &Body, stmt: &Stmt, indent: usize) {
    let pad = "  ".repeat(indent);
    match &stmt.kind {
        StmtKind::Define { var, init, .. } => {
            let name = body.name_of(*var).unwrap_or("<expr>");
            let dtype = dtype_suffix(body, *var);
            match init {
                Some(init) => {
                    let _ = writeln!(out, "{}define {}{} = {}", pad, name, dtype, expr_to_string(body, *init));
                }
                None => {
                    let _ = writeln!(out, "{}define {}{}", pad, name, dtype);
                }
            }
        }
        StmtKind::Assign { lhs, rhs } => {
            let _ = writeln!(out, "{}{} = {}", pad, expr_to_string(body, *lhs), expr_to_string(body, *rhs));
        }
        StmtKind::Eval { value } => {
            let _ = writeln!(out, "{}eval {}", pad, expr_to_string(body, *value));
        }
        StmtKind::For {
            var,
            begin,
            end,
            step,
            body: loop_body,
            kind,
            ..
        } => {
            let prefix = match kind {
                ForKind::Serial => "for",
                ForKind::Parallel => "parallel for",
            };
            let _ = writeln!(
                out,
                "{}{} {}{} in ({}, {}, {}) {{",
                pad,
                prefix,
                body.name_of(*var).unwrap_or("<expr>"),
                dtype_suffix(body, *var),
                expr_to_string(body, *begin),
                expr_to_string(body, *end),
                expr_to_string(body, *step),
            );
            write_block(out, body, loop_body, indent + 1);
            let _ = writeln!(out, "{}}}", pad);
        }
        StmtKind::If {
            cond,
            then_block,
            else_block,
        } => {
            let _ = writeln!(out, "{}if {} {{", pad, expr_to_string(body, *cond));
            write_block(out, body, then_block, indent + 1);
            if let Some(else_block) = else_block {
                let _ = writeln!(out, "{}}} else {{", pad);
                write_block(out, body, else_block, indent + 1);
            }
            let _ = writeln!(out, "{}}}", pad);
        }
        StmtKind::Return { value } => match value {
            Some(v) => {
                let _ = writeln!(out, "{}return {}", pad, expr_to_string(body, *v));
            }
            None => {
                let _ = writeln!(out, "{}return", pad);
            }
        },
        StmtKind::Scope(block) => {
            let _ = writeln!(out, "{}{{", pad);
            write_block(out, body, block, indent + 1);
            let _ = writeln!(out, "{}}}", pad);
        }
    }
}

fn dtype_suffix(body: &Body, id: ExprId) -> String {
    let dtype = body.dtype_of(id);
    if body.is_tensor(id) {
        format!(": tensor<{}>", dtype.name())
    } else {
        format!(": {}", dtype.name())
    }
}

pub fn expr_to_string(body: &Body, id: ExprId) -> String {
    match &body.get(id).kind {
        ExprKind::Var { name } | ExprKind::Tensor { name } => name.clone(),
        ExprKind::Const(c) => const_to_string(c),
        ExprKind::Indexing { base, indices } => {
            let idx: Vec<String> = indices.iter().map(|&i| expr_to_string(body, i)).collect();
            format!("{}[{}]", expr_to_string(body, *base), idx.join(", "))
        }
        ExprKind::Phi { values } => {
            let ops: Vec<String> = values.iter().map(|&v| expr_to_string(body, v)).collect();
            format!("phi({})", ops.join(", "))
        }
        ExprKind::BinOp { op, lhs, rhs } => {
            format!(
                "({} {} {})",
                expr_to_string(body, *lhs),
                op.symbol(),
                expr_to_string(body, *rhs)
            )
        }
        ExprKind::UnOp { op, operand } => {
            format!("({}{})", op.symbol(), expr_to_string(body, *operand))
        }
        ExprKind::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(|&a| expr_to_string(body, a)).collect();
            format!("{}({})", callee, args.join(", "))
        }
    }
}

fn const_to_string(c: &ConstVal) -> String {
    match c {
        ConstVal::Int(v) => format!("{}", v),
        // Debug formatting keeps a trailing ".0" on round floats, so ints
        // and floats never print identically.
        ConstVal::Float(v) => format!("{:?}", v),
        ConstVal::Bool(v) => format!("{}", v),
    }
}
