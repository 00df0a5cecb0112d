#![cfg(test)]

use crate::ir::printer::{print_func, print_stmt};
use crate::ir::{
    attr_keys, AttrValue, BinOpKind, Block, Body, ConstVal, DType, ExprId, ExprKind, ForKind, Func,
    Linkage, Stmt, StmtKind,
};
use crate::ssa::{transform_func, transform_stmt, verify_func, verify_stmt};
use crate::CompilerError;

fn func(name: &str, params: Vec<ExprId>, body: Vec<Stmt>) -> Func {
    Func {
        name: name.to_string(),
        params,
        ret: None,
        body: Block::new(body),
        attrs: Default::default(),
    }
}

fn int(body: &mut Body, v: i64) -> ExprId {
    body.make_const_int(v, DType::I32)
}

fn var(body: &mut Body, name: &str) -> ExprId {
    body.make_var(name, DType::I32)
}

fn add(body: &mut Body, lhs: ExprId, rhs: ExprId) -> ExprId {
    body.make_binop(BinOpKind::Add, lhs, rhs)
}

fn global_var(body: &mut Body, name: &str, offset: i64) -> ExprId {
    let v = body.make_var(name, DType::I32);
    body.get_mut(v)
        .attrs
        .insert(attr_keys::MODULE_GLOBAL_OFFSET.to_string(), AttrValue::Int(offset));
    v
}

/// Count `define` statements in a block, recursively.
fn count_defines(body: &Body, block: &Block) -> usize {
    let mut n = 0;
    for stmt in &block.stmts {
        match &stmt.kind {
            StmtKind::Define { .. } => n += 1,
            StmtKind::For { body: b, .. } => n += count_defines(body, b),
            StmtKind::If {
                then_block,
                else_block,
                ..
            } => {
                n += count_defines(body, then_block);
                if let Some(e) = else_block {
                    n += count_defines(body, e);
                }
            }
            StmtKind::Scope(b) => n += count_defines(body, b),
            _ => {}
        }
    }
    n
}

/// Collect (name, operand names) for every phi definition, recursively.
fn collect_phis(body: &Body, block: &Block) -> Vec<(String, Vec<String>)> {
    let mut out = Vec::new();
    for stmt in &block.stmts {
        match &stmt.kind {
            StmtKind::Define {
                var,
                init: Some(init),
                ..
            } => {
                if let ExprKind::Phi { values } = &body.get(*init).kind {
                    let name = body.name_of(*var).unwrap().to_string();
                    let ops = values.iter().map(|&v| body.name_of(v).unwrap().to_string()).collect();
                    out.push((name, ops));
                }
            }
            StmtKind::For { body: b, .. } => out.extend(collect_phis(body, b)),
            StmtKind::If {
                then_block,
                else_block,
                ..
            } => {
                out.extend(collect_phis(body, then_block));
                if let Some(e) = else_block {
                    out.extend(collect_phis(body, e));
                }
            }
            StmtKind::Scope(b) => out.extend(collect_phis(body, b)),
            _ => {}
        }
    }
    out
}

// =========================================================================
// Straight-line code
// =========================================================================

/// `define a; a = 1; a = a + 2; b = a` becomes three single-assignment
/// definitions and no phis.
#[test]
fn straight_line_redefinition() {
    let mut body = Body::new();
    let a_def = var(&mut body, "a");
    let a1 = var(&mut body, "a");
    let one = int(&mut body, 1);
    let a2 = var(&mut body, "a");
    let a_use = var(&mut body, "a");
    let two = int(&mut body, 2);
    let sum = add(&mut body, a_use, two);
    let b = var(&mut body, "b");
    let a_use2 = var(&mut body, "a");

    let f = func(
        "f",
        vec![],
        vec![
            Stmt::define(a_def, Linkage::Local, None),
            Stmt::assign(a1, one),
            Stmt::assign(a2, sum),
            Stmt::assign(b, a_use2),
        ],
    );

    let out = transform_func(&mut body, &f).unwrap();
    assert_eq!(count_defines(&body, &out.body), 3);
    assert!(collect_phis(&body, &out.body).is_empty());
    assert_eq!(
        print_func(&body, &out),
        "func f() {\n  define a_0: i32 = 1\n  define a_1: i32 = (a_0 + 2)\n  define b_2: i32 = a_1\n}\n"
    );
    verify_func(&body, &out).unwrap();
}

#[test]
fn applying_twice_is_stable_on_straight_line_code() {
    let mut body = Body::new();
    let a_def = var(&mut body, "a");
    let a1 = var(&mut body, "a");
    let one = int(&mut body, 1);
    let a2 = var(&mut body, "a");
    let a_use = var(&mut body, "a");
    let two = int(&mut body, 2);
    let sum = add(&mut body, a_use, two);
    let b = var(&mut body, "b");
    let a_use2 = var(&mut body, "a");

    let f = func(
        "f",
        vec![],
        vec![
            Stmt::define(a_def, Linkage::Local, None),
            Stmt::assign(a1, one),
            Stmt::assign(a2, sum),
            Stmt::assign(b, a_use2),
        ],
    );

    let once = transform_func(&mut body, &f).unwrap();
    let twice = transform_func(&mut body, &once).unwrap();
    assert_eq!(print_func(&body, &once), print_func(&body, &twice));
}

// =========================================================================
// If merges
// =========================================================================

/// `define x = 1; if (c) { x = 2 }; y = x` merges against the pre-if value.
#[test]
fn if_then_without_else() {
    let mut body = Body::new();
    let c = body.make_var("c", DType::Bool);
    let x_def = var(&mut body, "x");
    let one = int(&mut body, 1);
    let c_use = body.make_var("c", DType::Bool);
    let x1 = var(&mut body, "x");
    let two = int(&mut body, 2);
    let y = var(&mut body, "y");
    let x_use = var(&mut body, "x");

    let f = func(
        "f",
        vec![c],
        vec![
            Stmt::define(x_def, Linkage::Local, Some(one)),
            Stmt::if_else(c_use, Block::new(vec![Stmt::assign(x1, two)]), None),
            Stmt::assign(y, x_use),
        ],
    );

    let out = transform_func(&mut body, &f).unwrap();
    let phis = collect_phis(&body, &out.body);
    assert_eq!(phis, vec![("x_1".to_string(), vec!["x".to_string(), "x_0".to_string()])]);
    assert_eq!(
        print_func(&body, &out),
        "func f(c: bool) {\n  define x: i32 = 1\n  if c {\n    define x_0: i32 = 2\n  }\n  define x_1: i32 = phi(x, x_0)\n  define y_2: i32 = x_1\n}\n"
    );
    verify_func(&body, &out).unwrap();
}

/// `define x = 0; if (c) { x = 1 } else { x = 2 }; y = x` merges the two
/// arm values.
#[test]
fn if_then_else() {
    let mut body = Body::new();
    let c = body.make_var("c", DType::Bool);
    let x_def = var(&mut body, "x");
    let zero = int(&mut body, 0);
    let c_use = body.make_var("c", DType::Bool);
    let x1 = var(&mut body, "x");
    let one = int(&mut body, 1);
    let x2 = var(&mut body, "x");
    let two = int(&mut body, 2);
    let y = var(&mut body, "y");
    let x_use = var(&mut body, "x");

    let f = func(
        "f",
        vec![c],
        vec![
            Stmt::define(x_def, Linkage::Local, Some(zero)),
            Stmt::if_else(
                c_use,
                Block::new(vec![Stmt::assign(x1, one)]),
                Some(Block::new(vec![Stmt::assign(x2, two)])),
            ),
            Stmt::assign(y, x_use),
        ],
    );

    let out = transform_func(&mut body, &f).unwrap();
    let phis = collect_phis(&body, &out.body);
    assert_eq!(
        phis,
        vec![("x_2".to_string(), vec!["x_0".to_string(), "x_1".to_string()])]
    );
    verify_func(&body, &out).unwrap();
}

/// A variable assigned in only one arm of a two-armed `if` still merges
/// against the pre-if value, so the phi keeps one operand per predecessor
/// rather than collapsing to a single-operand merge.
#[test]
fn one_arm_assignment_merges_with_pre_if_value() {
    let mut body = Body::new();
    let c = body.make_var("c", DType::Bool);
    let x_def = var(&mut body, "x");
    let zero = int(&mut body, 0);
    let z_def = var(&mut body, "z");
    let five = int(&mut body, 5);
    let c_use = body.make_var("c", DType::Bool);
    let x1 = var(&mut body, "x");
    let one = int(&mut body, 1);
    let z1 = var(&mut body, "z");
    let two = int(&mut body, 2);

    let f = func(
        "f",
        vec![c],
        vec![
            Stmt::define(x_def, Linkage::Local, Some(zero)),
            Stmt::define(z_def, Linkage::Local, Some(five)),
            Stmt::if_else(
                c_use,
                Block::new(vec![Stmt::assign(x1, one)]),
                Some(Block::new(vec![Stmt::assign(z1, two)])),
            ),
        ],
    );

    let out = transform_func(&mut body, &f).unwrap();
    let phis = collect_phis(&body, &out.body);
    // x assigned in then only: phi(then value, pre-if value)
    // z assigned in else only: phi(pre-if value, else value)
    assert_eq!(
        phis,
        vec![
            ("x_2".to_string(), vec!["x_0".to_string(), "x".to_string()]),
            ("z_3".to_string(), vec!["z".to_string(), "z_1".to_string()]),
        ]
    );
    verify_func(&body, &out).unwrap();
}

// =========================================================================
// Loops
// =========================================================================

fn counted_loop(body: &mut Body, iter: ExprId, end: ExprId, stmts: Vec<Stmt>) -> Stmt {
    let begin = int(body, 0);
    let step = int(body, 1);
    Stmt::for_loop(iter, begin, end, step, Block::new(stmts), true, ForKind::Serial)
}

/// `define s = 0; for i in 0..n { s = s + i }; r = s` gets a loop-head phi
/// (patched with the back-edge value) and a post-loop phi.
#[test]
fn loop_carried_dependence() {
    let mut body = Body::new();
    let n = var(&mut body, "n");
    let s_def = var(&mut body, "s");
    let zero = int(&mut body, 0);
    let i = var(&mut body, "i");
    let n_use = var(&mut body, "n");
    let s1 = var(&mut body, "s");
    let s_use = var(&mut body, "s");
    let i_use = var(&mut body, "i");
    let sum = add(&mut body, s_use, i_use);
    let r = var(&mut body, "r");
    let s_use2 = var(&mut body, "s");

    let loop_stmt = counted_loop(&mut body, i, n_use, vec![Stmt::assign(s1, sum)]);
    let f = func(
        "f",
        vec![n],
        vec![
            Stmt::define(s_def, Linkage::Local, Some(zero)),
            loop_stmt,
            Stmt::assign(r, s_use2),
        ],
    );

    let out = transform_func(&mut body, &f).unwrap();
    let phis = collect_phis(&body, &out.body);
    assert_eq!(
        phis,
        vec![
            // loop-head phi: pre-loop value plus the patched back edge
            ("s_0".to_string(), vec!["s".to_string(), "s_1".to_string()]),
            // post-loop phi: the loop may run zero times
            ("s_2".to_string(), vec!["s".to_string(), "s_1".to_string()]),
        ]
    );
    assert_eq!(
        print_func(&body, &out),
        "func f(n: i32) {\n  define s: i32 = 0\n  for i: i32 in (0, n, 1) {\n    define s_0: i32 = phi(s, s_1)\n    define s_1: i32 = (s_0 + i)\n  }\n  define s_2: i32 = phi(s, s_1)\n  define r_3: i32 = s_2\n}\n"
    );
    verify_func(&body, &out).unwrap();
}

/// A variable read inside a loop but never reassigned gets a one-operand
/// loop phi and no post-loop merge.
#[test]
fn unmodified_outer_var_inside_loop() {
    let mut body = Body::new();
    let n = var(&mut body, "n");
    let k_def = var(&mut body, "k");
    let seven = int(&mut body, 7);
    let i = var(&mut body, "i");
    let n_use = var(&mut body, "n");
    let k_use = var(&mut body, "k");
    let call = body.make_call("use", vec![k_use], DType::I32);

    let loop_stmt = counted_loop(&mut body, i, n_use, vec![Stmt::eval(call)]);
    let f = func(
        "f",
        vec![n],
        vec![Stmt::define(k_def, Linkage::Local, Some(seven)), loop_stmt],
    );

    let out = transform_func(&mut body, &f).unwrap();
    let phis = collect_phis(&body, &out.body);
    assert_eq!(phis, vec![("k_0".to_string(), vec!["k".to_string()])]);
    assert_eq!(
        print_func(&body, &out),
        "func f(n: i32) {\n  define k: i32 = 7\n  for i: i32 in (0, n, 1) {\n    define k_0: i32 = phi(k)\n    eval use(k_0)\n  }\n}\n"
    );
    verify_func(&body, &out).unwrap();
}

// =========================================================================
// Globals
// =========================================================================

/// `g = g + 1` for a module global becomes a load definition, a flattened
/// add, and an explicit store; `g` is never renamed.
#[test]
fn global_variable_semantics() {
    let mut body = Body::new();
    let g_lhs = global_var(&mut body, "g", 0);
    let g_use = global_var(&mut body, "g", 0);
    let one = int(&mut body, 1);
    let sum = add(&mut body, g_use, one);

    let out = transform_stmt(&mut body, &Stmt::assign(g_lhs, sum)).unwrap();
    assert_eq!(
        print_stmt(&body, &out),
        "{\n  define __tmp0: i32 = g\n  define __tmp1: i32 = (__tmp0 + 1)\n  g = __tmp1\n}\n"
    );
    verify_stmt(&body, &out).unwrap();
}

/// Every read of a global is its own load definition.
#[test]
fn global_reads_are_separate_loads() {
    let mut body = Body::new();
    let g1 = global_var(&mut body, "g", 8);
    let g2 = global_var(&mut body, "g", 8);
    let sum = add(&mut body, g1, g2);
    let x = var(&mut body, "x");

    let out = transform_stmt(&mut body, &Stmt::assign(x, sum)).unwrap();
    assert_eq!(
        print_stmt(&body, &out),
        "{\n  define __tmp0: i32 = g\n  define __tmp1: i32 = g\n  define x_0: i32 = (__tmp0 + __tmp1)\n}\n"
    );
    verify_stmt(&body, &out).unwrap();
}

// =========================================================================
// Tensors
// =========================================================================

/// Tensor element stores keep the addressable indexing target; the value
/// is flattened to a leaf.
#[test]
fn tensor_store_keeps_indexing_target() {
    let mut body = Body::new();
    let a = body.make_tensor("A", DType::F32);
    let i = var(&mut body, "i");
    let x = body.make_var("x", DType::F32);
    let a_use = body.make_tensor("A", DType::F32);
    let i_use = var(&mut body, "i");
    let idx = body.make_indexing(a_use, vec![i_use]);
    let x_use = body.make_var("x", DType::F32);
    let one = body.make_const(ConstVal::Float(1.0), DType::F32);
    let sum = add(&mut body, x_use, one);

    let f = func("f", vec![a, i, x], vec![Stmt::assign(idx, sum)]);
    let out = transform_func(&mut body, &f).unwrap();
    assert_eq!(
        print_func(&body, &out),
        "func f(A: tensor<f32>, i: i32, x: f32) {\n  define __tmp0: f32 = (x + 1.0)\n  A[i] = __tmp0\n}\n"
    );
    verify_func(&body, &out).unwrap();
}

// =========================================================================
// Determinism and errors
// =========================================================================

#[test]
fn output_is_deterministic() {
    let build = || {
        let mut body = Body::new();
        let n = var(&mut body, "n");
        let s_def = var(&mut body, "s");
        let zero = int(&mut body, 0);
        let t_def = var(&mut body, "t");
        let one = int(&mut body, 1);
        let i = var(&mut body, "i");
        let n_use = var(&mut body, "n");
        let s1 = var(&mut body, "s");
        let s_use = var(&mut body, "s");
        let i_use = var(&mut body, "i");
        let sum = add(&mut body, s_use, i_use);
        let t1 = var(&mut body, "t");
        let t_use = var(&mut body, "t");
        let two = int(&mut body, 2);
        let prod = body.make_binop(BinOpKind::Mul, t_use, two);

        let loop_stmt = counted_loop(
            &mut body,
            i,
            n_use,
            vec![Stmt::assign(s1, sum), Stmt::assign(t1, prod)],
        );
        let f = func(
            "f",
            vec![n],
            vec![
                Stmt::define(s_def, Linkage::Local, Some(zero)),
                Stmt::define(t_def, Linkage::Local, Some(one)),
                loop_stmt,
            ],
        );
        let out = transform_func(&mut body, &f).unwrap();
        print_func(&body, &out)
    };
    assert_eq!(build(), build());
}

#[test]
fn undefined_variable_is_an_error() {
    let mut body = Body::new();
    let x = var(&mut body, "x");
    let y_use = var(&mut body, "y");
    let err = transform_stmt(&mut body, &Stmt::assign(x, y_use)).unwrap_err();
    assert!(matches!(err, CompilerError::UndefinedVariable(name) if name == "y"));
}

#[test]
fn statement_attributes_are_preserved() {
    let mut body = Body::new();
    let n = var(&mut body, "n");
    let i = var(&mut body, "i");
    let n_use = var(&mut body, "n");
    let x1 = var(&mut body, "x");
    let one = int(&mut body, 1);

    let mut loop_stmt = counted_loop(&mut body, i, n_use, vec![Stmt::assign(x1, one)]);
    loop_stmt
        .attrs
        .insert("unroll".to_string(), AttrValue::Int(4));

    let f = func("f", vec![n], vec![loop_stmt]);
    let out = transform_func(&mut body, &f).unwrap();
    let rewritten_for = out
        .body
        .stmts
        .iter()
        .find(|s| matches!(s.kind, StmtKind::For { .. }))
        .unwrap();
    assert_eq!(rewritten_for.attrs.get("unroll"), Some(&AttrValue::Int(4)));
}
