//! Statement emission machinery for the SSA rewrite.
//!
//! The rewrite turns one source statement into a run of output statements:
//! the temporary definitions minted while flattening its expressions, the
//! rewritten statement itself, and the merge definitions that belong
//! immediately after it (loop and if phis). [`DefBuffers`] holds the two
//! pending queues. Each queue is a single flat statement buffer; block
//! rewriting records a frame mark on entry, so definitions minted for an
//! inner block can never leak into the statement run of an outer one.

use crate::ir::Stmt;

/// A pending-definition queue: a flat buffer of definition statements with
/// block frames tracked as start indices into it.
#[derive(Debug, Default)]
struct PendingDefs {
    stmts: Vec<Stmt>,
    /// Start index of each open block frame, outermost first.
    marks: Vec<usize>,
}

impl PendingDefs {
    /// Mark the start of a block frame.
    fn open_frame(&mut self) {
        self.marks.push(self.stmts.len());
    }

    /// Close the innermost frame. The frame must have been drained; a
    /// definition still pending here would silently drop a statement.
    fn close_frame(&mut self) {
        let mark = self.marks.pop().expect("close_frame without an open frame");
        debug_assert_eq!(self.stmts.len(), mark, "pending definitions at block exit");
        self.stmts.truncate(mark);
    }

    fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    /// Hand back everything pushed since the innermost frame mark.
    fn drain_frame(&mut self) -> Vec<Stmt> {
        let mark = self.marks.last().copied().unwrap_or(0);
        self.stmts.split_off(mark)
    }
}

/// Pending definition queues for the statement currently being rewritten.
#[derive(Debug, Default)]
pub struct DefBuffers {
    /// Definitions to emit before the current statement, in evaluation
    /// order (expression flattening, load defs, loop phis).
    before: PendingDefs,
    /// Definitions to emit immediately after the current statement
    /// (loop and if merge phis).
    after: PendingDefs,
}

impl DefBuffers {
    pub fn new() -> Self {
        DefBuffers::default()
    }

    /// Open a fresh pair of frames for a nested block.
    pub fn enter_block(&mut self) {
        self.before.open_frame();
        self.after.open_frame();
    }

    /// Close the block's frames. Both must have been drained.
    pub fn leave_block(&mut self) {
        self.before.close_frame();
        self.after.close_frame();
    }

    pub fn push_before(&mut self, stmt: Stmt) {
        self.before.push(stmt);
    }

    pub fn push_after(&mut self, stmt: Stmt) {
        self.after.push(stmt);
    }

    pub fn take_before(&mut self) -> Vec<Stmt> {
        self.before.drain_frame()
    }

    pub fn take_after(&mut self) -> Vec<Stmt> {
        self.after.drain_frame()
    }
}
