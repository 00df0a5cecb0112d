//! The structured kernel IR.
//!
//! This representation assumes:
//! - Programs are tree shaped: statements own their nested blocks, control
//!   flow is structured (`if`/`else` and counted `for` loops only)
//! - Expressions live in a flat arena ([`Body`]) and reference each other
//!   by [`ExprId`]
//! - Scalars are named `var` nodes, aggregates are named `tensor` nodes
//!   addressed through `indexing` expressions
//! - Global variables are ordinary `var` nodes whose attribute map carries
//!   [`attr_keys::MODULE_GLOBAL_OFFSET`]
//!
//! Nodes carry an optional SSA metadata record ([`SsaInfo`]) which is
//! attached lazily by SSA-producing passes and left `None` everywhere else.

use std::collections::BTreeMap;

pub mod builder;
pub mod printer;


/// Expression handle into a [`Body`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ExprId {
    fn from(id: u32) -> Self {
        ExprId(id)
    }
}

impl std::fmt::Display for ExprId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Scalar data types. A tensor expression's `dtype` is its element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Bool,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

/// Constant values. The dtype is stored out of band on the [`Expr`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConstVal {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOpKind {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mul => "*",
            BinOpKind::Div => "/",
            BinOpKind::Rem => "%",
            BinOpKind::And => "&&",
            BinOpKind::Or => "||",
            BinOpKind::Eq => "==",
            BinOpKind::Ne => "!=",
            BinOpKind::Lt => "<",
            BinOpKind::Le => "<=",
            BinOpKind::Gt => ">",
            BinOpKind::Ge => ">=",
        }
    }

    /// Comparisons produce `bool` regardless of operand type.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOpKind::Eq | BinOpKind::Ne | BinOpKind::Lt | BinOpKind::Le | BinOpKind::Gt | BinOpKind::Ge
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOpKind {
    Neg,
    Not,
}

impl UnOpKind {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOpKind::Neg => "-",
            UnOpKind::Not => "!",
        }
    }
}

/// Recognised attribute keys.
pub mod attr_keys {
    /// Present on a `var` node iff the variable is a module global.
    /// Globals keep load/store semantics and are never renamed.
    pub const MODULE_GLOBAL_OFFSET: &str = "module_global_offset";
}

/// Attribute values attachable to expressions and statements.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

/// Attribute map with deterministic iteration order.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// SSA metadata attached to an expression node by SSA-producing passes.
#[derive(Debug, Clone, Default)]
pub struct SsaInfo {
    /// The node denotes (the current version of) a module global that must
    /// be read and written through explicit loads and stores.
    pub is_global: bool,
    /// The node is a function parameter.
    pub is_param: bool,
    /// For a var bound by a definition, the expression defining it.
    pub value: Option<ExprId>,
}

impl SsaInfo {
    /// Not a global and not a parameter.
    pub fn is_local(&self) -> bool {
        !self.is_global && !self.is_param
    }
}

/// Expression kinds.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// A named scalar.
    Var { name: String },
    /// A named aggregate, referenced by name (never versioned).
    Tensor { name: String },
    /// A constant value.
    Const(ConstVal),
    /// Element address into a tensor.
    Indexing { base: ExprId, indices: Vec<ExprId> },
    /// N-ary merge of values at a control-flow join.
    Phi { values: Vec<ExprId> },
    /// A binary operation.
    BinOp { op: BinOpKind, lhs: ExprId, rhs: ExprId },
    /// A unary operation.
    UnOp { op: UnOpKind, operand: ExprId },
    /// A call to a named function or intrinsic.
    Call { callee: String, args: Vec<ExprId> },
}

/// An expression node: kind, dtype, attributes, and the SSA metadata slot.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub dtype: DType,
    pub attrs: AttrMap,
    pub ssa: Option<SsaInfo>,
}

impl Expr {
    pub fn new(kind: ExprKind, dtype: DType) -> Self {
        Expr {
            kind,
            dtype,
            attrs: AttrMap::new(),
            ssa: None,
        }
    }
}

/// Expression arena. Statements and functions reference expressions by
/// [`ExprId`]; both the pre-pass and post-pass trees of a rewrite may share
/// one arena, with the old nodes treated as read-only.
#[derive(Debug, Clone, Default)]
pub struct Body {
    exprs: Vec<Expr>,
}

impl Body {
    pub fn new() -> Self {
        Body { exprs: Vec::new() }
    }

    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn get_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    /// Number of expressions allocated so far.
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn dtype_of(&self, id: ExprId) -> DType {
        self.get(id).dtype
    }

    /// A leaf is a named value: a var or a tensor.
    pub fn is_leaf(&self, id: ExprId) -> bool {
        matches!(self.get(id).kind, ExprKind::Var { .. } | ExprKind::Tensor { .. })
    }

    pub fn is_var(&self, id: ExprId) -> bool {
        matches!(self.get(id).kind, ExprKind::Var { .. })
    }

    pub fn is_tensor(&self, id: ExprId) -> bool {
        matches!(self.get(id).kind, ExprKind::Tensor { .. })
    }

    pub fn is_const(&self, id: ExprId) -> bool {
        matches!(self.get(id).kind, ExprKind::Const(_))
    }

    /// Name of a var or tensor node.
    pub fn name_of(&self, id: ExprId) -> Option<&str> {
        match &self.get(id).kind {
            ExprKind::Var { name } | ExprKind::Tensor { name } => Some(name),
            _ => None,
        }
    }

    /// SSA metadata of a node, if attached.
    pub fn ssa(&self, id: ExprId) -> Option<&SsaInfo> {
        self.get(id).ssa.as_ref()
    }

    /// SSA metadata of a node, created on first need.
    pub fn ssa_info_mut(&mut self, id: ExprId) -> &mut SsaInfo {
        self.get_mut(id).ssa.get_or_insert_with(SsaInfo::default)
    }
}

/// Linkage of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    Local,
    Public,
}

/// Scheduling kind of a counted loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForKind {
    Serial,
    Parallel,
}

/// A statement with its attributes.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub attrs: AttrMap,
}

/// Statement kinds.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Bind a var or tensor, optionally with an initialiser.
    Define {
        var: ExprId,
        linkage: Linkage,
        init: Option<ExprId>,
    },
    /// Store to a var (scalar write) or an indexing (tensor element write).
    Assign { lhs: ExprId, rhs: ExprId },
    /// Evaluate an expression for its effects.
    Eval { value: ExprId },
    /// Counted loop over `begin..end` with the given step.
    For {
        var: ExprId,
        begin: ExprId,
        end: ExprId,
        step: ExprId,
        body: Block,
        incremental: bool,
        kind: ForKind,
    },
    /// Conditional with an optional else arm.
    If {
        cond: ExprId,
        then_block: Block,
        else_block: Option<Block>,
    },
    /// Return from the enclosing function.
    Return { value: Option<ExprId> },
    /// A nested statement sequence.
    Scope(Block),
}

/// A sequence of statements.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Block { stmts }
    }
}

/// A function: named parameters (var or tensor nodes), an optional return
/// type, and a body block.
#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub params: Vec<ExprId>,
    pub ret: Option<DType>,
    pub body: Block,
    pub attrs: AttrMap,
}
