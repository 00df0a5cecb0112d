//! SSA verification pass.
//!
//! Checks that a transformed function satisfies the key invariants of the
//! SSA form produced by [`super::transform`]:
//! - Every local var use has a textually earlier definition (parameters and
//!   globals are exempt)
//! - No name is defined twice
//! - Operands of composite expressions are named leaves or constants
//! - Phi definitions appear only inside loop bodies (where the first read
//!   of a loop-carried value introduces them) or in the run of definitions
//!   immediately following an `if` or `for`
//! - Merge phis after an `if` or `for` have exactly two operands; loop phis
//!   have at least one

use std::collections::HashSet;

use crate::ir::{Block, Body, ExprId, ExprKind, Func, Stmt, StmtKind};

/// Verification error.
#[derive(Debug, Clone)]
pub enum VerifyError {
    /// A var or tensor was used without an earlier definition.
    UndefinedUse { name: String },
    /// A name was bound by more than one definition.
    DuplicateDef { name: String },
    /// A composite expression has a composite operand.
    CompositeOperand { context: String },
    /// A phi definition outside any join position.
    MisplacedPhi { name: String },
    /// A phi with no operands.
    EmptyPhi { name: String },
    /// A merge phi whose operand count does not match its two predecessors.
    MergePhiArity { name: String, got: usize },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::UndefinedUse { name } => {
                write!(f, "Use of undefined value `{}`", name)
            }
            VerifyError::DuplicateDef { name } => {
                write!(f, "Name `{}` is defined more than once", name)
            }
            VerifyError::CompositeOperand { context } => {
                write!(f, "Composite operand inside {}", context)
            }
            VerifyError::MisplacedPhi { name } => {
                write!(f, "Phi definition of `{}` outside a join position", name)
            }
            VerifyError::EmptyPhi { name } => {
                write!(f, "Phi definition of `{}` has no operands", name)
            }
            VerifyError::MergePhiArity { name, got } => {
                write!(f, "Merge phi `{}` has {} operands, expected 2", name, got)
            }
        }
    }
}

impl std::error::Error for VerifyError {}

/// Verify a transformed function.
pub fn verify_func(body: &Body, func: &Func) -> Result<(), Vec<VerifyError>> {
    let mut verifier = Verifier::new(body);
    for &p in &func.params {
        if let Some(name) = body.name_of(p) {
            verifier.defined.insert(name.to_string());
            verifier.all_defined.insert(name.to_string());
        }
    }
    verifier.collect_defined(&func.body);
    verifier.verify_block(&func.body, false);
    if verifier.errors.is_empty() {
        Ok(())
    } else {
        Err(verifier.errors)
    }
}

/// Verify a transformed standalone statement.
pub fn verify_stmt(body: &Body, stmt: &Stmt) -> Result<(), Vec<VerifyError>> {
    let mut verifier = Verifier::new(body);
    let block = Block::new(vec![stmt.clone()]);
    verifier.collect_defined(&block);
    verifier.verify_block(&block, false);
    if verifier.errors.is_empty() {
        Ok(())
    } else {
        Err(verifier.errors)
    }
}

struct Verifier<'a> {
    body: &'a Body,
    /// Names defined so far, in textual order.
    defined: HashSet<String>,
    /// Every name defined anywhere in the tree. Phi operands may reference
    /// a loop back-edge value defined textually later, so they are checked
    /// against this set instead of the textual one.
    all_defined: HashSet<String>,
    errors: Vec<VerifyError>,
}

impl<'a> Verifier<'a> {
    fn new(body: &'a Body) -> Self {
        Verifier {
            body,
            defined: HashSet::new(),
            all_defined: HashSet::new(),
            errors: Vec::new(),
        }
    }

    fn collect_defined(&mut self, block: &Block) {
        for stmt in &block.stmts {
            match &stmt.kind {
                StmtKind::Define { var, .. } => {
                    if let Some(name) = self.body.name_of(*var) {
                        self.all_defined.insert(name.to_string());
                    }
                }
                StmtKind::For { var, body, .. } => {
                    if let Some(name) = self.body.name_of(*var) {
                        self.all_defined.insert(name.to_string());
                    }
                    self.collect_defined(body);
                }
                StmtKind::If {
                    then_block,
                    else_block,
                    ..
                } => {
                    self.collect_defined(then_block);
                    if let Some(else_block) = else_block {
                        self.collect_defined(else_block);
                    }
                }
                StmtKind::Scope(block) => self.collect_defined(block),
                _ => {}
            }
        }
    }

    fn verify_block(&mut self, block: &Block, in_loop: bool) {
        // Whether the next definition may be a merge phi: set right after
        // an `if` or `for`, kept through a run of phi definitions.
        let mut merge_run = false;
        for stmt in &block.stmts {
            let is_phi_def = self.verify_stmt_inner(stmt, in_loop, merge_run);
            merge_run = match &stmt.kind {
                StmtKind::If { .. } | StmtKind::For { .. } => true,
                StmtKind::Define { .. } => merge_run && is_phi_def,
                _ => false,
            };
        }
    }

    /// Returns true iff the statement is a phi definition.
    fn verify_stmt_inner(&mut self, stmt: &Stmt, in_loop: bool, merge_run: bool) -> bool {
        match &stmt.kind {
            StmtKind::Define { var, init, .. } => {
                let mut is_phi = false;
                if let Some(init) = init {
                    self.verify_expr(*init);
                    if let ExprKind::Phi { values } = &self.body.get(*init).kind {
                        is_phi = true;
                        let name = self.body.name_of(*var).unwrap_or("<unnamed>").to_string();
                        if values.is_empty() {
                            self.errors.push(VerifyError::EmptyPhi { name: name.clone() });
                        }
                        if merge_run && !values.is_empty() && values.len() != 2 {
                            self.errors.push(VerifyError::MergePhiArity {
                                name: name.clone(),
                                got: values.len(),
                            });
                        }
                        if !in_loop && !merge_run {
                            self.errors.push(VerifyError::MisplacedPhi { name });
                        }
                    }
                }
                self.define_name(*var);
                is_phi
            }
            StmtKind::Assign { lhs, rhs } => {
                self.verify_expr(*lhs);
                self.verify_expr(*rhs);
                false
            }
            StmtKind::Eval { value } => {
                self.verify_expr(*value);
                false
            }
            StmtKind::Return { value } => {
                if let Some(v) = value {
                    self.verify_expr(*v);
                }
                false
            }
            StmtKind::For {
                var,
                begin,
                end,
                step,
                body,
                ..
            } => {
                self.verify_expr(*begin);
                self.verify_expr(*end);
                self.verify_expr(*step);
                self.define_name(*var);
                self.verify_block(body, true);
                false
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                self.verify_expr(*cond);
                self.verify_block(then_block, in_loop);
                if let Some(else_block) = else_block {
                    self.verify_block(else_block, in_loop);
                }
                false
            }
            StmtKind::Scope(block) => {
                self.verify_block(block, in_loop);
                false
            }
        }
    }

    fn define_name(&mut self, var: ExprId) {
        if let Some(name) = self.body.name_of(var) {
            if !self.defined.insert(name.to_string()) {
                self.errors.push(VerifyError::DuplicateDef { name: name.to_string() });
            }
        }
    }

    /// Check uses and operand leafness. A statement operand or definition
    /// initialiser may itself be composite, but every operand one level
    /// down must be a named leaf or a constant.
    fn verify_expr(&mut self, e: ExprId) {
        let expr = self.body.get(e);
        match &expr.kind {
            ExprKind::Var { name } | ExprKind::Tensor { name } => {
                let exempt = expr
                    .ssa
                    .as_ref()
                    .map(|s| s.is_param || s.is_global)
                    .unwrap_or(false);
                if !exempt && !self.defined.contains(name.as_str()) {
                    self.errors.push(VerifyError::UndefinedUse { name: name.clone() });
                }
            }
            ExprKind::Const(_) => {}
            ExprKind::Indexing { base, indices } => {
                self.check_operand(*base, "an indexing expression");
                for &idx in indices {
                    self.check_operand(idx, "an indexing expression");
                }
            }
            ExprKind::Phi { values } => {
                for &v in values {
                    if !self.body.is_leaf(v) && !self.body.is_const(v) {
                        self.errors.push(VerifyError::CompositeOperand {
                            context: "a phi node".to_string(),
                        });
                        continue;
                    }
                    self.verify_phi_operand(v);
                }
            }
            ExprKind::BinOp { lhs, rhs, .. } => {
                self.check_operand(*lhs, "a binary operation");
                self.check_operand(*rhs, "a binary operation");
            }
            ExprKind::UnOp { operand, .. } => {
                self.check_operand(*operand, "a unary operation");
            }
            ExprKind::Call { args, .. } => {
                for &a in args {
                    self.check_operand(a, "a call");
                }
            }
        }
    }

    fn check_operand(&mut self, operand: ExprId, context: &str) {
        if !self.body.is_leaf(operand) && !self.body.is_const(operand) {
            self.errors.push(VerifyError::CompositeOperand {
                context: context.to_string(),
            });
        }
        self.verify_expr(operand);
    }

    /// Phi operands may be loop back-edge values whose definitions come
    /// textually later, so they only need a definition somewhere in the
    /// tree.
    fn verify_phi_operand(&mut self, operand: ExprId) {
        let expr = self.body.get(operand);
        if let ExprKind::Var { name } | ExprKind::Tensor { name } = &expr.kind {
            let exempt = expr
                .ssa
                .as_ref()
                .map(|s| s.is_param || s.is_global)
                .unwrap_or(false);
            if !exempt && !self.all_defined.contains(name.as_str()) {
                self.errors.push(VerifyError::UndefinedUse { name: name.clone() });
            }
        }
    }
}
