//! Node constructors for the kernel IR.
//!
//! Expression constructors allocate into a [`Body`] arena; statement
//! constructors build owned [`Stmt`] trees. `remake` duplicates a node
//! identity-less (fresh arena slot, SSA metadata cleared), which is how
//! rewriting passes mint the "new" version of an "old" node.

use super::{
    AttrMap, BinOpKind, Block, Body, ConstVal, DType, Expr, ExprId, ExprKind, ForKind, Linkage, Stmt,
    StmtKind, UnOpKind,
};

impl Body {
    pub fn make_var(&mut self, name: impl Into<String>, dtype: DType) -> ExprId {
        self.alloc(Expr::new(ExprKind::Var { name: name.into() }, dtype))
    }

    pub fn make_tensor(&mut self, name: impl Into<String>, elem: DType) -> ExprId {
        self.alloc(Expr::new(ExprKind::Tensor { name: name.into() }, elem))
    }

    pub fn make_const(&mut self, value: ConstVal, dtype: DType) -> ExprId {
        self.alloc(Expr::new(ExprKind::Const(value), dtype))
    }

    pub fn make_const_int(&mut self, value: i64, dtype: DType) -> ExprId {
        self.make_const(ConstVal::Int(value), dtype)
    }

    pub fn make_const_bool(&mut self, value: bool) -> ExprId {
        self.make_const(ConstVal::Bool(value), DType::Bool)
    }

    /// Binary operation. Comparisons get a `bool` result type, everything
    /// else takes the dtype of the left operand.
    pub fn make_binop(&mut self, op: BinOpKind, lhs: ExprId, rhs: ExprId) -> ExprId {
        let dtype = if op.is_comparison() { DType::Bool } else { self.dtype_of(lhs) };
        self.alloc(Expr::new(ExprKind::BinOp { op, lhs, rhs }, dtype))
    }

    pub fn make_unop(&mut self, op: UnOpKind, operand: ExprId) -> ExprId {
        let dtype = self.dtype_of(operand);
        self.alloc(Expr::new(ExprKind::UnOp { op, operand }, dtype))
    }

    pub fn make_call(&mut self, callee: impl Into<String>, args: Vec<ExprId>, dtype: DType) -> ExprId {
        self.alloc(Expr::new(
            ExprKind::Call {
                callee: callee.into(),
                args,
            },
            dtype,
        ))
    }

    /// Element address into a tensor. The result dtype is the tensor's
    /// element type.
    pub fn make_indexing(&mut self, base: ExprId, indices: Vec<ExprId>) -> ExprId {
        let dtype = self.dtype_of(base);
        self.alloc(Expr::new(ExprKind::Indexing { base, indices }, dtype))
    }

    /// N-ary merge node. The dtype is taken from the first operand.
    pub fn make_phi(&mut self, values: Vec<ExprId>) -> ExprId {
        assert!(!values.is_empty(), "phi with no operands");
        let dtype = self.dtype_of(values[0]);
        self.alloc(Expr::new(ExprKind::Phi { values }, dtype))
    }

    /// Duplicate a node identity-less: same kind, dtype, and attributes in
    /// a fresh arena slot, SSA metadata cleared. Child references of
    /// composite kinds are copied as-is.
    pub fn remake(&mut self, id: ExprId) -> ExprId {
        let src = self.get(id);
        let copy = Expr {
            kind: src.kind.clone(),
            dtype: src.dtype,
            attrs: src.attrs.clone(),
            ssa: None,
        };
        self.alloc(copy)
    }
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Stmt {
            kind,
            attrs: AttrMap::new(),
        }
    }

    pub fn define(var: ExprId, linkage: Linkage, init: Option<ExprId>) -> Self {
        Stmt::new(StmtKind::Define { var, linkage, init })
    }

    pub fn assign(lhs: ExprId, rhs: ExprId) -> Self {
        Stmt::new(StmtKind::Assign { lhs, rhs })
    }

    pub fn eval(value: ExprId) -> Self {
        Stmt::new(StmtKind::Eval { value })
    }

    pub fn for_loop(
        var: ExprId,
        begin: ExprId,
        end: ExprId,
        step: ExprId,
        body: Block,
        incremental: bool,
        kind: ForKind,
    ) -> Self {
        Stmt::new(StmtKind::For {
            var,
            begin,
            end,
            step,
            body,
            incremental,
            kind,
        })
    }

    pub fn if_else(cond: ExprId, then_block: Block, else_block: Option<Block>) -> Self {
        Stmt::new(StmtKind::If {
            cond,
            then_block,
            else_block,
        })
    }

    pub fn ret(value: Option<ExprId>) -> Self {
        Stmt::new(StmtKind::Return { value })
    }

    pub fn scope(body: Block) -> Self {
        Stmt::new(StmtKind::Scope(body))
    }

    /// Carry the source statement's attributes onto this rewritten one.
    pub fn with_attrs_of(mut self, src: &Stmt) -> Self {
        self.attrs = src.attrs.clone();
        self
    }
}
