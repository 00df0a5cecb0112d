//! SSA construction over the structured kernel IR.
//!
//! The pass walks a function top-down with a scope stack, rewriting it so
//! that:
//! - every local scalar is bound exactly once, by a `define`,
//! - composite expressions are flattened into named temporaries,
//! - values that cross a control-flow join (loop back-edges, `if` merges)
//!   are reconciled by explicit phi definitions.
//!
//! Globals (vars carrying [`attr_keys::MODULE_GLOBAL_OFFSET`]) keep
//! load/store semantics: every read becomes its own load definition and
//! writes stay explicit assignments. Tensors are reference values and are
//! neither versioned nor merged.
//!
//! Loop phis are created before the loop body has been fully analysed, with
//! the pre-loop value as their only operand; when the loop scope pops, the
//! back-edge operand is appended by index into the expression arena.

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::error::Result;
use crate::ir::{
    attr_keys, Block, Body, Expr, ExprId, ExprKind, ForKind, Func, Linkage, SsaInfo, Stmt, StmtKind,
};
use crate::{bail_ssa, err_ssa, err_undef};

use super::rewriter::DefBuffers;
use super::scope::{OldVarKind, ScopeKind, ScopeStack, SsaScope, VarKey};

/// Rewrite a whole function into SSA form.
///
/// Old nodes are treated as read-only; the returned function references
/// only nodes allocated during the rewrite.
pub fn transform_func(body: &mut Body, func: &Func) -> Result<Func> {
    trace!("ssa: transforming function `{}`", func.name);
    let mut t = SsaTransformer::new(body);
    t.rewrite_func(func)
}

/// Rewrite a standalone statement tree.
///
/// If the rewrite expands the statement into several (flattening
/// temporaries, merge definitions), the result is wrapped in a scope
/// statement.
pub fn transform_stmt(body: &mut Body, stmt: &Stmt) -> Result<Stmt> {
    trace!("ssa: transforming standalone statement");
    let mut t = SsaTransformer::new(body);
    t.scopes.push(ScopeKind::Normal);
    let block = t.rewrite_block(&Block::new(vec![stmt.clone()]))?;
    t.scopes.pop();
    let mut stmts = block.stmts;
    if stmts.len() == 1 {
        Ok(stmts.pop().unwrap())
    } else {
        Ok(Stmt::scope(Block::new(stmts)))
    }
}

struct SsaTransformer<'a> {
    body: &'a mut Body,
    scopes: ScopeStack,
    defs: DefBuffers,
    /// Whether the result of the next `dispatch` must be reduced to a
    /// named leaf. Reset to the default before every child dispatch.
    need_flatten: bool,
    /// Counter for `__tmp<N>` names minted by `add_def`.
    tmp_idx: u64,
    /// Counter for `<name>_<N>` version suffixes.
    version_idx: u64,
}

impl<'a> SsaTransformer<'a> {
    fn new(body: &'a mut Body) -> Self {
        SsaTransformer {
            body,
            scopes: ScopeStack::new(),
            defs: DefBuffers::new(),
            need_flatten: true,
            tmp_idx: 0,
            version_idx: 0,
        }
    }

    // =========================================================================
    // Function and block rewriting
    // =========================================================================

    fn rewrite_func(&mut self, f: &Func) -> Result<Func> {
        self.scopes.push(ScopeKind::Normal);
        let mut new_params = Vec::with_capacity(f.params.len());
        for &p in &f.params {
            let key = VarKey::from_expr(self.body, p)
                .ok_or_else(|| err_ssa!("function parameter is not a var or tensor"))?;
            let newp = self.body.remake(p);
            self.body.ssa_info_mut(newp).is_param = true;
            self.scopes.insert_local(key, Some(newp));
            new_params.push(newp);
        }
        let new_body = self.rewrite_block(&f.body)?;
        self.scopes.pop();
        Ok(Func {
            name: f.name.clone(),
            params: new_params,
            ret: f.ret,
            body: new_body,
            attrs: f.attrs.clone(),
        })
    }

    fn rewrite_block(&mut self, block: &Block) -> Result<Block> {
        self.defs.enter_block();
        let mut out = Vec::new();
        for stmt in &block.stmts {
            let rewritten = self.rewrite_stmt(stmt)?;
            out.append(&mut self.defs.take_before());
            if let Some(s) = rewritten {
                out.push(s);
            }
            out.append(&mut self.defs.take_after());
        }
        self.defs.leave_block();
        Ok(Block::new(out))
    }

    /// Rewrite one statement. `None` means the statement was absorbed into
    /// the scope state (local defines and local assignments emit nothing
    /// themselves).
    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Result<Option<Stmt>> {
        match &stmt.kind {
            StmtKind::Define { var, linkage, init } => self.rewrite_define(stmt, *var, *linkage, *init),
            StmtKind::Assign { lhs, rhs } => self.rewrite_assign(stmt, *lhs, *rhs),
            StmtKind::Eval { value } => {
                let v = self.dispatch_no_flatten(*value)?;
                Ok(Some(Stmt::eval(v).with_attrs_of(stmt)))
            }
            StmtKind::Return { value } => {
                let v = match value {
                    Some(v) => Some(self.dispatch_operand(*v)?),
                    None => None,
                };
                Ok(Some(Stmt::ret(v).with_attrs_of(stmt)))
            }
            StmtKind::For {
                var,
                begin,
                end,
                step,
                body,
                incremental,
                kind,
            } => self.rewrite_for(stmt, *var, *begin, *end, *step, body, *incremental, *kind),
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => self.rewrite_if(stmt, *cond, then_block, else_block.as_ref()),
            StmtKind::Scope(block) => {
                let b = self.rewrite_block(block)?;
                Ok(Some(Stmt::scope(b).with_attrs_of(stmt)))
            }
        }
    }

    // =========================================================================
    // Expression dispatch
    // =========================================================================

    /// Dispatch an expression. If flattening was requested at this call
    /// site (the default), any result that is not a named leaf is bound to
    /// a fresh temporary via `add_def`.
    fn dispatch(&mut self, e: ExprId) -> Result<ExprId> {
        let flatten = std::mem::replace(&mut self.need_flatten, true);
        let ret = self.rewrite_expr(e)?;
        if flatten && !self.body.is_leaf(ret) {
            return Ok(self.add_def(ret));
        }
        Ok(ret)
    }

    /// Dispatch without flattening the root. Children still flatten.
    fn dispatch_no_flatten(&mut self, e: ExprId) -> Result<ExprId> {
        self.need_flatten = false;
        self.dispatch(e)
    }

    /// Dispatch for an operand position: composites are flattened but
    /// constants remain legal operands and stay inline.
    fn dispatch_operand(&mut self, e: ExprId) -> Result<ExprId> {
        let flatten = std::mem::replace(&mut self.need_flatten, true);
        let ret = self.rewrite_expr(e)?;
        if flatten && !self.body.is_leaf(ret) && !self.body.is_const(ret) {
            return Ok(self.add_def(ret));
        }
        Ok(ret)
    }

    fn rewrite_expr(&mut self, e: ExprId) -> Result<ExprId> {
        let kind = self.body.get(e).kind.clone();
        match kind {
            ExprKind::Var { .. } => self.visit_var(e),
            ExprKind::Tensor { .. } => self.visit_tensor(e),
            ExprKind::Const(_) => {
                let c = self.body.remake(e);
                self.body.ssa_info_mut(c);
                Ok(c)
            }
            ExprKind::Indexing { base, indices } => {
                let base = self.dispatch_operand(base)?;
                let mut new_indices = Vec::with_capacity(indices.len());
                for idx in indices {
                    new_indices.push(self.dispatch_operand(idx)?);
                }
                Ok(self.rebuild(
                    e,
                    ExprKind::Indexing {
                        base,
                        indices: new_indices,
                    },
                ))
            }
            ExprKind::Phi { values } => {
                let mut new_values = Vec::with_capacity(values.len());
                for v in values {
                    new_values.push(self.dispatch_operand(v)?);
                }
                Ok(self.rebuild(e, ExprKind::Phi { values: new_values }))
            }
            ExprKind::BinOp { op, lhs, rhs } => {
                let lhs = self.dispatch_operand(lhs)?;
                let rhs = self.dispatch_operand(rhs)?;
                Ok(self.rebuild(e, ExprKind::BinOp { op, lhs, rhs }))
            }
            ExprKind::UnOp { op, operand } => {
                let operand = self.dispatch_operand(operand)?;
                Ok(self.rebuild(e, ExprKind::UnOp { op, operand }))
            }
            ExprKind::Call { callee, args } => {
                let mut new_args = Vec::with_capacity(args.len());
                for a in args {
                    new_args.push(self.dispatch_operand(a)?);
                }
                Ok(self.rebuild(
                    e,
                    ExprKind::Call {
                        callee,
                        args: new_args,
                    },
                ))
            }
        }
    }

    /// Allocate a rewritten composite, carrying the source node's dtype and
    /// attributes.
    fn rebuild(&mut self, old: ExprId, kind: ExprKind) -> ExprId {
        let src = self.body.get(old);
        let expr = Expr {
            kind,
            dtype: src.dtype,
            attrs: src.attrs.clone(),
            ssa: Some(SsaInfo::default()),
        };
        self.body.alloc(expr)
    }

    // =========================================================================
    // Variable and tensor use
    // =========================================================================

    fn visit_var(&mut self, e: ExprId) -> Result<ExprId> {
        let key = VarKey::from_expr(self.body, e).expect("visit_var on a non-var node");
        if self.scopes.lookup(&key).is_none() && self.is_old_var_global(e) {
            self.bind_global(e, &key);
        }
        let (def_idx, cur) = match self.scopes.lookup(&key) {
            Some((idx, status)) => match status.current_value {
                Some(cur) => (idx, cur),
                None => return Err(err_undef!("{}", key.name)),
            },
            None => return Err(err_undef!("{}", key.name)),
        };

        if self.body.ssa(cur).map_or(false, |s| s.is_global) {
            // every read of a global is its own load definition
            return Ok(self.add_def(cur));
        }

        let def_depth = self.scopes.for_depth_at(def_idx);
        if self.scopes.top_for_depth() > def_depth {
            // The value was created outside the enclosing loop. Introduce a
            // loop phi with the outer value as its only operand; the loop
            // close appends the back-edge value if the variable is
            // reassigned in the body.
            let phi = self.body.make_phi(vec![cur]);
            self.body.ssa_info_mut(phi);
            let phi_var = self.add_def(phi);
            self.rename_with_version(phi_var, &key.name);
            let status = self.scopes.insert_local(key, Some(phi_var));
            status.for_loop_phi.push(phi_var);
            return Ok(phi_var);
        }
        Ok(cur)
    }

    fn visit_tensor(&mut self, e: ExprId) -> Result<ExprId> {
        let key = VarKey::from_expr(self.body, e).expect("visit_tensor on a non-tensor node");
        match self.scopes.lookup(&key) {
            Some((_, status)) => status.current_value.ok_or_else(|| err_undef!("{}", key.name)),
            None => Err(err_undef!("{}", key.name)),
        }
    }

    fn is_old_var_global(&self, e: ExprId) -> bool {
        self.body.is_var(e) && self.body.get(e).attrs.contains_key(attr_keys::MODULE_GLOBAL_OFFSET)
    }

    /// Bind a never-seen global in the root scope. Globals are not scoped;
    /// the single binding holds the attributed global node itself.
    fn bind_global(&mut self, old: ExprId, key: &VarKey) -> ExprId {
        let g = self.body.remake(old);
        self.body.ssa_info_mut(g).is_global = true;
        self.scopes.insert_root(key.clone(), g);
        g
    }

    // =========================================================================
    // Definitions and assignments
    // =========================================================================

    fn rewrite_define(
        &mut self,
        stmt: &Stmt,
        var: ExprId,
        linkage: Linkage,
        init: Option<ExprId>,
    ) -> Result<Option<Stmt>> {
        if linkage != Linkage::Local {
            bail_ssa!("non-local linkage on a function-body define");
        }
        let key = VarKey::from_expr(self.body, var)
            .ok_or_else(|| err_ssa!("define binds a node that is not a var or tensor"))?;

        let is_scalar = key.kind == OldVarKind::Var;
        let is_global = is_scalar && self.is_old_var_global(var);

        if is_scalar && !is_global && init.is_none() {
            // A bare local declaration: map the variable to a zero constant
            // and emit nothing. The first assignment becomes its defining
            // statement.
            let dtype = self.body.dtype_of(var);
            let zero = self.body.make_const_int(0, dtype);
            self.body.ssa_info_mut(zero);
            self.scopes.insert_local(key, Some(zero));
            return Ok(None);
        }

        let newvar = self.body.remake(var);
        self.body.ssa_info_mut(newvar);
        if is_global {
            self.body.ssa_info_mut(newvar).is_global = true;
        }
        self.scopes.insert_local(key, Some(newvar));

        let new_init = match init {
            Some(i) => Some(self.dispatch_no_flatten(i)?),
            None => None,
        };
        if let Some(i) = new_init {
            self.body.ssa_info_mut(newvar).value = Some(i);
        }
        Ok(Some(Stmt::define(newvar, linkage, new_init).with_attrs_of(stmt)))
    }

    fn rewrite_assign(&mut self, stmt: &Stmt, lhs: ExprId, rhs: ExprId) -> Result<Option<Stmt>> {
        if self.body.is_var(lhs) {
            let key = VarKey::from_expr(self.body, lhs).expect("var node");
            let watermark = self.body.len() as u32;
            let rhs_new = self.dispatch(rhs)?;

            if self.is_old_var_global(lhs) {
                // globals keep store semantics
                if self.scopes.lookup(&key).is_none() {
                    self.bind_global(lhs, &key);
                }
                let cur = self
                    .scopes
                    .lookup_for_update(&key, true)
                    .and_then(|status| status.current_value)
                    .ok_or_else(|| err_undef!("{}", key.name))?;
                return Ok(Some(Stmt::assign(cur, rhs_new).with_attrs_of(stmt)));
            }

            // A local write rebinds the variable; no statement is emitted
            // for the assignment itself.
            let cur = if self.body.is_var(rhs_new) {
                if rhs_new.0 >= watermark {
                    // temporary minted while dispatching this RHS: it becomes
                    // the new version directly
                    self.rename_with_version(rhs_new, &key.name);
                    rhs_new
                } else {
                    // copying an existing value: the binding gets its own
                    // definition so the source keeps its name
                    let newv = self.body.remake(lhs);
                    self.body.ssa_info_mut(newv).value = Some(rhs_new);
                    self.defs
                        .push_before(Stmt::define(newv, Linkage::Local, Some(rhs_new)).with_attrs_of(stmt));
                    self.rename_with_version(newv, &key.name);
                    newv
                }
            } else if self.body.is_const(rhs_new) {
                rhs_new
            } else {
                bail_ssa!("assignment RHS did not reduce to a var or constant");
            };
            let status = self
                .scopes
                .lookup_for_update(&key, false)
                .expect("local update always yields an entry");
            status.current_value = Some(cur);
            return Ok(None);
        }

        if matches!(self.body.get(lhs).kind, ExprKind::Indexing { .. }) {
            // tensor element store: the target must stay an addressable
            // indexing expression
            let lhs_new = self.dispatch_no_flatten(lhs)?;
            let rhs_new = self.dispatch(rhs)?;
            return Ok(Some(Stmt::assign(lhs_new, rhs_new).with_attrs_of(stmt)));
        }

        bail_ssa!("assignment target must be a var or an indexing expression")
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    fn rewrite_for(
        &mut self,
        stmt: &Stmt,
        var: ExprId,
        begin: ExprId,
        end: ExprId,
        step: ExprId,
        body: &Block,
        incremental: bool,
        kind: ForKind,
    ) -> Result<Option<Stmt>> {
        let begin = self.dispatch_no_flatten(begin)?;
        let end = self.dispatch_no_flatten(end)?;
        let step = self.dispatch_no_flatten(step)?;

        self.scopes.push(ScopeKind::ForLoop);
        let ikey = VarKey::from_expr(self.body, var)
            .ok_or_else(|| err_ssa!("loop iterator is not a var"))?;
        let iter_new = self.body.remake(var);
        self.body.ssa_info_mut(iter_new);
        self.scopes.insert_local(ikey, Some(iter_new));

        let new_body = self.rewrite_block(body)?;
        let loop_scope = self.scopes.pop();

        for (key, status) in &loop_scope.vars {
            if key.kind != OldVarKind::Var {
                continue;
            }
            let Some(cur) = status.current_value else { continue };
            let Some((_, parent)) = self.scopes.lookup(key) else { continue };
            let Some(parent_cur) = parent.current_value else { continue };

            if status.for_loop_phi.contains(&cur) {
                // Read in the loop but never reassigned: the loop phi keeps
                // its single operand and the value after the loop is still
                // the pre-loop one.
                continue;
            }
            for &phi_var in &status.for_loop_phi {
                if phi_var == cur {
                    continue;
                }
                self.patch_loop_phi(phi_var, cur)?;
                debug!("ssa: patched loop phi for `{}`", key.name);
            }

            // The loop may run zero times, so the post-loop value merges the
            // pre-loop value with the last in-loop one.
            let phi = self.body.make_phi(vec![parent_cur, cur]);
            self.body.ssa_info_mut(phi);
            let newv = self.add_def_after_current_stmt(phi);
            self.rename_with_version(newv, &key.name);
            let status_up = self
                .scopes
                .lookup_for_update(key, false)
                .expect("local update always yields an entry");
            status_up.current_value = Some(newv);
        }

        Ok(Some(
            Stmt::for_loop(iter_new, begin, end, step, new_body, incremental, kind).with_attrs_of(stmt),
        ))
    }

    /// Append the back-edge value to a loop phi created earlier, resolved
    /// through the phi variable's defining expression.
    fn patch_loop_phi(&mut self, phi_var: ExprId, back_edge: ExprId) -> Result<()> {
        let phi_expr = self
            .body
            .ssa(phi_var)
            .and_then(|s| s.value)
            .ok_or_else(|| err_ssa!("loop phi variable has no defining expression"))?;
        match &mut self.body.get_mut(phi_expr).kind {
            ExprKind::Phi { values } => {
                values.push(back_edge);
                Ok(())
            }
            _ => Err(err_ssa!("loop phi variable is not defined by a phi node")),
        }
    }

    fn rewrite_if(
        &mut self,
        stmt: &Stmt,
        cond: ExprId,
        then_block: &Block,
        else_block: Option<&Block>,
    ) -> Result<Option<Stmt>> {
        let cond = self.dispatch_no_flatten(cond)?;

        self.scopes.push(ScopeKind::IfThen);
        let new_then = self.rewrite_block(then_block)?;
        let then_scope = self.scopes.pop();

        let new_else = match else_block {
            Some(else_block) => {
                self.scopes.push(ScopeKind::IfElse);
                let b = self.rewrite_block(else_block)?;
                let else_scope = self.scopes.pop();
                self.merge_two_arms(&then_scope, &else_scope)?;
                Some(b)
            }
            None => {
                self.merge_then_only(&then_scope)?;
                None
            }
        };

        Ok(Some(Stmt::if_else(cond, new_then, new_else).with_attrs_of(stmt)))
    }

    /// Merge the arms of a two-armed `if`. A variable touched by only one
    /// arm merges against the pre-`if` value, so every phi here has one
    /// operand per predecessor. Variables with no binding outside the `if`
    /// merge only when both arms assigned them; otherwise they die with
    /// their arm.
    fn merge_two_arms(&mut self, then_scope: &SsaScope, else_scope: &SsaScope) -> Result<()> {
        let mut merged: BTreeMap<VarKey, (Option<ExprId>, Option<ExprId>)> = BTreeMap::new();
        for (key, status) in &then_scope.vars {
            if key.kind != OldVarKind::Var {
                continue;
            }
            if let Some(cur) = status.current_value {
                merged.entry(key.clone()).or_default().0 = Some(cur);
            }
        }
        for (key, status) in &else_scope.vars {
            if key.kind != OldVarKind::Var {
                continue;
            }
            if let Some(cur) = status.current_value {
                merged.entry(key.clone()).or_default().1 = Some(cur);
            }
        }

        for (key, (then_v, else_v)) in merged {
            let parent_cur = self.scopes.lookup(&key).and_then(|(_, s)| s.current_value);
            let operands = match (then_v, else_v, parent_cur) {
                (Some(t), Some(e), _) => vec![t, e],
                (Some(t), None, Some(p)) => vec![t, p],
                (None, Some(e), Some(p)) => vec![p, e],
                // assigned in a single arm with no prior binding: the value
                // is local to that arm
                _ => continue,
            };
            let mut propagated = Vec::new();
            if let Some(status) = then_scope.vars.get(&key) {
                propagated.extend_from_slice(&status.for_loop_phi);
            }
            if let Some(status) = else_scope.vars.get(&key) {
                propagated.extend_from_slice(&status.for_loop_phi);
            }
            debug!("ssa: if merge for `{}`", key.name);
            self.finish_merge(key, operands, propagated);
        }
        Ok(())
    }

    /// Merge after an `if` without an else arm: each variable redefined in
    /// the arm and visible outside merges the pre-`if` value with the arm's
    /// final one.
    fn merge_then_only(&mut self, then_scope: &SsaScope) -> Result<()> {
        for (key, status) in &then_scope.vars {
            if key.kind != OldVarKind::Var {
                continue;
            }
            let Some(cur) = status.current_value else { continue };
            let Some((_, parent)) = self.scopes.lookup(key) else { continue };
            let Some(parent_cur) = parent.current_value else { continue };
            debug!("ssa: if merge for `{}`", key.name);
            self.finish_merge(key.clone(), vec![parent_cur, cur], status.for_loop_phi.clone());
        }
        Ok(())
    }

    /// Emit a merge phi after the current statement, rebind the variable in
    /// the enclosing scope, and keep any pending loop phis visible to an
    /// enclosing loop.
    fn finish_merge(&mut self, key: VarKey, operands: Vec<ExprId>, propagated: Vec<ExprId>) {
        let phi = self.body.make_phi(operands);
        self.body.ssa_info_mut(phi);
        let newv = self.add_def_after_current_stmt(phi);
        self.rename_with_version(newv, &key.name);
        let status = self
            .scopes
            .lookup_for_update(&key, false)
            .expect("local update always yields an entry");
        status.for_loop_phi.extend(propagated);
        status.current_value = Some(newv);
    }

    // =========================================================================
    // Temporaries and naming
    // =========================================================================

    /// Bind an expression to a fresh temporary definition emitted before
    /// the current statement, returning the temporary.
    fn add_def(&mut self, value: ExprId) -> ExprId {
        let v = self.fresh_tmp(value);
        self.defs.push_before(Stmt::define(v, Linkage::Local, Some(value)));
        v
    }

    /// Like `add_def`, but the definition lands immediately after the
    /// current statement (merge phis).
    fn add_def_after_current_stmt(&mut self, value: ExprId) -> ExprId {
        let v = self.fresh_tmp(value);
        self.defs.push_after(Stmt::define(v, Linkage::Local, Some(value)));
        v
    }

    fn fresh_tmp(&mut self, value: ExprId) -> ExprId {
        let dtype = self.body.dtype_of(value);
        let name = format!("__tmp{}", self.tmp_idx);
        self.tmp_idx += 1;
        let v = self.body.make_var(name, dtype);
        self.body.ssa_info_mut(v).value = Some(value);
        v
    }

    /// Give a freshly created local var a versioned name derived from the
    /// source variable it stands for. Globals and parameters keep their
    /// names.
    fn rename_with_version(&mut self, v: ExprId, old_name: &str) {
        let is_local = self.body.ssa(v).map_or(false, |s| s.is_local());
        if !is_local {
            return;
        }
        if let ExprKind::Var { name } = &mut self.body.get_mut(v).kind {
            *name = format!("{}_{}", old_name, self.version_idx);
            self.version_idx += 1;
        }
    }
}
