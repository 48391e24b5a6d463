//! The bytecode generator.
//!
//! Walks the AST of each collected function and emits index-addressed,
//! three-operand instructions through [`CodeBuilder`]. Slot layout comes from
//! the resolver: declared locals occupy the low offsets of the frame slab and
//! temporaries bump-allocate above them, released at statement boundaries.
//! Control flow lowers to forward-patched or back-edge displacements;
//! `try/finally` re-emits the finally body on every early exit out of the
//! protected range.

use crate::{
    ast::{Arena, AstKind, BinOp, ListId, NodeId, PropKind, UnOp},
    bytecode::{builder::CodeBuilder, builder::JumpLabel, code::TryEntry, op::Opcode},
    error::JsError,
    intern::{StaticStrings, StringId},
    parser::{FuncDef, Parser},
    scope::{Region, Resolution, SlotIndex},
    types::Lambda,
    value::Value,
};

/// Compiles every function the parser collected into a lambda table.
///
/// Lambda indices equal the parser's function indices, so `FunctionNew`
/// operands stay valid as emitted.
pub(crate) fn generate(parser: &Parser) -> Result<Vec<Lambda>, JsError> {
    let mut lambdas = Vec::with_capacity(parser.funcs.len());
    for (index, func) in parser.funcs.iter().enumerate() {
        let compiler = FnCompiler::new(parser, func, index == 0);
        lambdas.push(compiler.compile()?);
    }
    Ok(lambdas)
}

/// Break/continue context: a loop, switch, or labelled statement.
struct LoopCtx {
    label: Option<StringId>,
    /// Continue jumps back to this offset; None while the target is not yet
    /// known (for-loop update clause) or for non-loop contexts.
    continue_target: Option<usize>,
    breaks: Vec<JumpLabel>,
    continues: Vec<JumpLabel>,
    allows_continue: bool,
    /// Finally nesting depth at entry; early exits crossing this run the
    /// intervening finally bodies.
    finally_depth: usize,
}

/// Per-function code generator.
struct FnCompiler<'a> {
    arena: &'a Arena,
    parser: &'a Parser,
    func: &'a FuncDef,
    builder: CodeBuilder,
    /// First temp slot: everything below is a declared local.
    temp_base: u32,
    next_temp: u32,
    max_temp: u32,
    loops: Vec<LoopCtx>,
    /// Bodies of enclosing `finally` clauses, innermost last.
    finallies: Vec<NodeId>,
    /// Label waiting to attach to the next loop.
    pending_label: Option<StringId>,
    /// Main's completion value: the result of the last expression statement.
    completion: Option<SlotIndex>,
}

impl<'a> FnCompiler<'a> {
    fn new(parser: &'a Parser, func: &'a FuncDef, is_main: bool) -> Self {
        let temp_base = parser.scopes.local_base(func.scope);
        let mut compiler = Self {
            arena: &parser.arena,
            parser,
            func,
            builder: CodeBuilder::new(),
            temp_base,
            next_temp: temp_base,
            max_temp: temp_base,
            loops: Vec::new(),
            finallies: Vec::new(),
            pending_label: None,
            completion: None,
        };
        if is_main {
            compiler.completion = Some(compiler.alloc_temp());
        }
        compiler
    }

    fn compile(mut self) -> Result<Lambda, JsError> {
        self.builder.set_line(self.func.line);
        let scope = self.parser.scopes.get(self.func.scope);

        // Prologue: spill captured parameters into the locals slab, then
        // materialize hoisted function declarations.
        for &(arg_index, local) in &scope.param_spills {
            self.builder.emit_ss(
                Opcode::Move,
                SlotIndex::new(Region::Local, local),
                SlotIndex::new(Region::Arguments, arg_index + 1),
            );
        }
        for &(name, fid) in &scope.hoisted_fns {
            let var = &scope.vars[&name];
            let region = if scope.depth == 0 { Region::Global } else { Region::Local };
            self.builder
                .emit_su(Opcode::FunctionNew, SlotIndex::new(region, var.slot), fid.raw());
        }

        let body = self
            .func
            .body
            .ok_or_else(|| JsError::internal("function parsed without a body"))?;
        self.compile_stmt(body)?;

        // Epilogue: main returns its completion value, everything else
        // returns undefined (explicit returns bypass this).
        match self.completion {
            Some(slot) => self.builder.emit_s(Opcode::Return, slot),
            None => {
                let slot = self.alloc_temp();
                self.builder.emit_s(Opcode::LoadUndefined, slot);
                self.builder.emit_s(Opcode::Return, slot);
            }
        }

        let scope = self.parser.scopes.get(self.func.scope);
        Ok(Lambda {
            name: self.func.name,
            code: self.builder.build(),
            param_count: self.func.param_count,
            local_count: self.max_temp,
            nesting: scope.depth,
            is_arrow: self.func.is_arrow,
            arguments_slot: scope.arguments_slot,
        })
    }

    // ----- slot management -----

    fn alloc_temp(&mut self) -> SlotIndex {
        let slot = self.next_temp;
        self.next_temp += 1;
        self.max_temp = self.max_temp.max(self.next_temp);
        SlotIndex::new(Region::Local, slot)
    }

    fn temp_mark(&self) -> u32 {
        self.next_temp
    }

    fn release_temps(&mut self, mark: u32) {
        self.next_temp = mark;
    }

    fn resolution(&self, node: NodeId) -> Result<Resolution, JsError> {
        match self.arena.kind(node) {
            AstKind::Ident { ref_id, .. } => Ok(self.parser.scopes.resolution(*ref_id)),
            _ => Err(JsError::internal("expected identifier node")),
        }
    }

    // ----- statements -----

    fn compile_stmt(&mut self, node: NodeId) -> Result<(), JsError> {
        self.builder.set_line(self.arena.line(node));
        let mark = self.temp_mark();
        match self.arena.kind(node).clone() {
            AstKind::Block { body, .. } => {
                for &stmt in self.arena.list(body) {
                    self.compile_stmt(stmt)?;
                }
            }
            AstKind::VarDecl { decls, .. } => {
                for &decl in self.arena.list(decls) {
                    let AstKind::VarInit { target, init } = self.arena.kind(decl).clone() else {
                        return Err(JsError::internal("malformed var declaration"));
                    };
                    if let Some(init) = init {
                        let value = self.expr_value(init)?;
                        self.store_target(target, value)?;
                    }
                }
            }
            AstKind::ExprStmt(expr) => {
                if let Some(completion) = self.completion {
                    self.expr_to(expr, completion)?;
                } else {
                    self.expr_value(expr)?;
                }
            }
            AstKind::Empty => {}
            AstKind::If { cond, then, otherwise } => {
                let test = self.expr_value(cond)?;
                let skip_then = self.builder.emit_jump(Opcode::JumpIfFalsy, Some(test));
                self.release_temps(mark);
                self.compile_stmt(then)?;
                match otherwise {
                    Some(otherwise) => {
                        let skip_else = self.builder.emit_jump(Opcode::Jump, None);
                        self.builder.patch_jump(skip_then);
                        self.compile_stmt(otherwise)?;
                        self.builder.patch_jump(skip_else);
                    }
                    None => self.builder.patch_jump(skip_then),
                }
            }
            AstKind::While { cond, body } => {
                let head = self.builder.offset();
                let test = self.expr_value(cond)?;
                let exit = self.builder.emit_jump(Opcode::JumpIfFalsy, Some(test));
                self.release_temps(mark);
                self.enter_loop(None, Some(head));
                self.compile_stmt(body)?;
                self.builder.emit_jump_back(Opcode::Jump, None, head);
                self.builder.patch_jump(exit);
                self.exit_loop(None);
            }
            AstKind::DoWhile { body, cond } => {
                let head = self.builder.offset();
                self.enter_loop(None, None);
                self.compile_stmt(body)?;
                let cond_offset = self.builder.offset();
                let test = self.expr_value(cond)?;
                self.builder.emit_jump_back(Opcode::JumpIfTruthy, Some(test), head);
                self.exit_loop(Some(cond_offset));
            }
            AstKind::For { init, cond, update, body } => {
                if let Some(init) = init {
                    match self.arena.kind(init) {
                        AstKind::VarDecl { .. } => self.compile_stmt(init)?,
                        _ => {
                            self.expr_value(init)?;
                        }
                    }
                    self.release_temps(mark);
                }
                let head = self.builder.offset();
                let exit = match cond {
                    Some(cond) => {
                        let test = self.expr_value(cond)?;
                        let exit = self.builder.emit_jump(Opcode::JumpIfFalsy, Some(test));
                        self.release_temps(mark);
                        Some(exit)
                    }
                    None => None,
                };
                self.enter_loop(None, None);
                self.compile_stmt(body)?;
                let update_offset = self.builder.offset();
                if let Some(update) = update {
                    self.expr_value(update)?;
                    self.release_temps(mark);
                }
                self.builder.emit_jump_back(Opcode::Jump, None, head);
                if let Some(exit) = exit {
                    self.builder.patch_jump(exit);
                }
                self.exit_loop(Some(update_offset));
            }
            AstKind::ForIn { target, object, body } => {
                let object_slot = self.expr_value(object)?;
                let iter = self.alloc_temp();
                self.builder.emit_ss(Opcode::ForInInit, iter, object_slot);
                let key = self.alloc_temp();
                let head = self.builder.offset();
                let done = self.builder.emit_for_in_next(key, iter);
                self.store_target(target, key)?;
                self.enter_loop(None, Some(head));
                self.compile_stmt(body)?;
                self.builder.emit_jump_back(Opcode::Jump, None, head);
                self.builder.patch_jump(done);
                self.exit_loop(None);
            }
            AstKind::Switch { discriminant, cases } => {
                self.compile_switch(discriminant, cases, mark)?;
            }
            AstKind::Break(label) => {
                self.compile_break(label, self.arena.line(node))?;
            }
            AstKind::Continue(label) => {
                self.compile_continue(label, self.arena.line(node))?;
            }
            AstKind::Return(expr) => {
                let slot = match expr {
                    Some(expr) => self.expr_value(expr)?,
                    None => {
                        let slot = self.alloc_temp();
                        self.builder.emit_s(Opcode::LoadUndefined, slot);
                        slot
                    }
                };
                // Returning out of a try runs the pending finally bodies.
                self.run_finallies_down_to(0)?;
                self.builder.emit_s(Opcode::Return, slot);
            }
            AstKind::ExportDefault(expr) => {
                let slot = self.expr_value(expr)?;
                self.builder.emit_s(Opcode::Return, slot);
            }
            AstKind::Throw(expr) => {
                let slot = self.expr_value(expr)?;
                self.builder.emit_s(Opcode::Throw, slot);
            }
            AstKind::Try { block, catch, finally } => {
                self.compile_try(block, catch, finally)?;
            }
            AstKind::Labelled { label, body } => {
                self.compile_labelled(label, body)?;
            }
            AstKind::ImportDecl { target, func } => {
                let slot = self.alloc_temp();
                self.builder.emit_su(Opcode::ImportModule, slot, func.raw());
                self.store_target(target, slot)?;
            }
            _ => return Err(JsError::internal("expression node in statement position")),
        }
        self.release_temps(mark);
        Ok(())
    }

    fn compile_switch(&mut self, discriminant: NodeId, cases: ListId, mark: u32) -> Result<(), JsError> {
        let disc = self.expr_value(discriminant)?;
        let case_nodes: Vec<NodeId> = self.arena.list(cases).to_vec();
        let mut body_labels = Vec::with_capacity(case_nodes.len());

        // Dispatch section: one strict comparison per tested case; a None
        // label marks the default clause.
        for &case in &case_nodes {
            let AstKind::Case { test, .. } = self.arena.kind(case).clone() else {
                return Err(JsError::internal("malformed switch case"));
            };
            match test {
                Some(test) => {
                    let test_slot = self.expr_value(test)?;
                    let matched = self.alloc_temp();
                    self.builder.emit_sss(Opcode::StrictEq, matched, disc, test_slot);
                    body_labels.push(Some(self.builder.emit_jump(Opcode::JumpIfTruthy, Some(matched))));
                }
                None => {
                    body_labels.push(None);
                }
            }
        }
        let to_default = self.builder.emit_jump(Opcode::Jump, None);

        self.enter_breakable();
        let mut default_offset = None;
        for (i, &case) in case_nodes.iter().enumerate() {
            match body_labels[i] {
                Some(label) => self.builder.patch_jump(label),
                None => default_offset = Some(self.builder.offset()),
            }
            let AstKind::Case { body, .. } = self.arena.kind(case).clone() else {
                return Err(JsError::internal("malformed switch case"));
            };
            for &stmt in self.arena.list(body) {
                self.compile_stmt(stmt)?;
            }
        }
        // Falling off the last body exits; a dispatch miss jumps to the
        // default body (through a trampoline, since it sits behind us) or
        // straight to the end.
        match default_offset {
            Some(offset) => {
                let over = self.builder.emit_jump(Opcode::Jump, None);
                self.builder.patch_jump(to_default);
                self.builder.emit_jump_back(Opcode::Jump, None, offset);
                self.builder.patch_jump(over);
            }
            None => self.builder.patch_jump(to_default),
        }
        self.exit_loop(None);
        self.release_temps(mark);
        Ok(())
    }

    fn compile_try(
        &mut self,
        block: NodeId,
        catch: Option<NodeId>,
        finally: Option<NodeId>,
    ) -> Result<(), JsError> {
        // The exception slot for the finally path must outlive the protected
        // range, so it is allocated before anything else.
        let finally_exc = finally.map(|_| self.alloc_temp());
        let outer_start = self.builder.offset();
        if let Some(finally) = finally {
            self.finallies.push(finally);
        }

        match catch {
            Some(clause) => {
                let AstKind::CatchClause { param, body } = self.arena.kind(clause).clone() else {
                    return Err(JsError::internal("malformed catch clause"));
                };
                let catch_slot = match param {
                    Some(param) => match self.resolution(param)? {
                        Resolution::Slot(slot) => slot,
                        Resolution::GlobalName(_) => return Err(JsError::internal("catch binding resolved globally")),
                    },
                    None => self.alloc_temp(),
                };
                let start = self.builder.offset();
                self.compile_stmt(block)?;
                let end = self.builder.offset();
                let over = self.builder.emit_jump(Opcode::Jump, None);
                let target = self.builder.offset();
                self.add_try_entry(start, end, target, catch_slot)?;
                self.compile_stmt(body)?;
                self.builder.patch_jump(over);
            }
            None => {
                self.compile_stmt(block)?;
            }
        }

        if let Some(finally) = finally {
            self.finallies.pop();
            let outer_end = self.builder.offset();
            let exc = finally_exc.expect("finally without exception slot");
            // Normal completion path.
            self.compile_stmt(finally)?;
            let done = self.builder.emit_jump(Opcode::Jump, None);
            // Exceptional path: the unwinder lands here with the thrown
            // value already stored in `exc`.
            let handler = self.builder.offset();
            self.add_try_entry(outer_start, outer_end, handler, exc)?;
            self.compile_stmt(finally)?;
            self.builder.emit_s(Opcode::Throw, exc);
            self.builder.patch_jump(done);
        }
        Ok(())
    }

    fn add_try_entry(&mut self, start: usize, end: usize, target: usize, slot: SlotIndex) -> Result<(), JsError> {
        self.builder.add_try_entry(TryEntry {
            start: u32::try_from(start).expect("code offset exceeds u32"),
            end: u32::try_from(end).expect("code offset exceeds u32"),
            target: u32::try_from(target).expect("code offset exceeds u32"),
            slot: slot.raw(),
        });
        Ok(())
    }

    fn compile_labelled(&mut self, label: StringId, body: NodeId) -> Result<(), JsError> {
        // A label names the loop it precedes; any other statement becomes a
        // break-only context.
        match self.arena.kind(body).clone() {
            AstKind::While { .. } | AstKind::DoWhile { .. } | AstKind::For { .. } | AstKind::ForIn { .. } => {
                self.pending_label = Some(label);
                self.compile_stmt(body)
            }
            _ => {
                self.loops.push(LoopCtx {
                    label: Some(label),
                    continue_target: None,
                    breaks: Vec::new(),
                    continues: Vec::new(),
                    allows_continue: false,
                    finally_depth: self.finallies.len(),
                });
                self.compile_stmt(body)?;
                let ctx = self.loops.pop().expect("labelled context missing");
                for jump in ctx.breaks {
                    self.builder.patch_jump(jump);
                }
                Ok(())
            }
        }
    }

    fn enter_loop(&mut self, label: Option<StringId>, continue_target: Option<usize>) {
        let label = label.or_else(|| self.pending_label.take());
        self.loops.push(LoopCtx {
            label,
            continue_target,
            breaks: Vec::new(),
            continues: Vec::new(),
            allows_continue: true,
            finally_depth: self.finallies.len(),
        });
    }

    /// A break-only context: `switch`.
    fn enter_breakable(&mut self) {
        self.loops.push(LoopCtx {
            label: self.pending_label.take(),
            continue_target: None,
            breaks: Vec::new(),
            continues: Vec::new(),
            allows_continue: false,
            finally_depth: self.finallies.len(),
        });
    }

    /// Closes a loop context: forward continues land on trampoline back
    /// edges (skipped by the normal fall-through), then breaks patch to the
    /// instruction after everything.
    fn exit_loop(&mut self, continue_offset: Option<usize>) {
        let ctx = self.loops.pop().expect("loop context missing");
        if !ctx.continues.is_empty() {
            let target = continue_offset
                .or(ctx.continue_target)
                .expect("continue without a target");
            let over = self.builder.emit_jump(Opcode::Jump, None);
            for jump in ctx.continues {
                self.builder.patch_jump(jump);
                self.builder.emit_jump_back(Opcode::Jump, None, target);
            }
            self.builder.patch_jump(over);
        }
        for jump in ctx.breaks {
            self.builder.patch_jump(jump);
        }
    }

    fn find_loop(&self, label: Option<StringId>, need_continue: bool) -> Option<usize> {
        for (index, ctx) in self.loops.iter().enumerate().rev() {
            let matches = match label {
                Some(label) => ctx.label == Some(label),
                None => !need_continue || ctx.allows_continue,
            };
            if matches && (!need_continue || ctx.allows_continue) {
                return Some(index);
            }
        }
        None
    }

    fn compile_break(&mut self, label: Option<StringId>, line: u32) -> Result<(), JsError> {
        let Some(index) = self.find_loop(label, false) else {
            return Err(JsError::syntax("illegal break statement", line));
        };
        self.run_finallies_down_to(self.loops[index].finally_depth)?;
        let jump = self.builder.emit_jump(Opcode::Jump, None);
        self.loops[index].breaks.push(jump);
        Ok(())
    }

    fn compile_continue(&mut self, label: Option<StringId>, line: u32) -> Result<(), JsError> {
        let Some(index) = self.find_loop(label, true) else {
            return Err(JsError::syntax("illegal continue statement", line));
        };
        self.run_finallies_down_to(self.loops[index].finally_depth)?;
        match self.loops[index].continue_target {
            Some(target) => self.builder.emit_jump_back(Opcode::Jump, None, target),
            None => {
                let jump = self.builder.emit_jump(Opcode::Jump, None);
                self.loops[index].continues.push(jump);
            }
        }
        Ok(())
    }

    /// Emits the finally bodies between the current nesting depth and
    /// `depth`, innermost first — the early-exit path out of try/finally.
    ///
    /// The stack is split off while emitting so a jump inside a finally body
    /// cannot re-enter the body it is escaping from.
    fn run_finallies_down_to(&mut self, depth: usize) -> Result<(), JsError> {
        let tail = self.finallies.split_off(depth);
        for &finally in tail.iter().rev() {
            self.compile_stmt(finally)?;
        }
        self.finallies.extend(tail);
        Ok(())
    }

    // ----- expressions -----

    /// Evaluates into a caller-chosen destination slot.
    fn expr_to(&mut self, node: NodeId, dst: SlotIndex) -> Result<(), JsError> {
        self.builder.set_line(self.arena.line(node));
        match self.arena.kind(node).clone() {
            AstKind::Paren(inner) => self.expr_to(inner, dst),
            AstKind::Number(n) => {
                let idx = self.builder.add_const(Value::Number(n));
                self.builder.emit_su(Opcode::LoadConst, dst, idx);
                Ok(())
            }
            AstKind::StringLit(sid) => {
                let idx = self.builder.add_const(Value::Str(sid));
                self.builder.emit_su(Opcode::LoadConst, dst, idx);
                Ok(())
            }
            AstKind::Bool(b) => {
                let idx = self.builder.add_const(Value::Bool(b));
                self.builder.emit_su(Opcode::LoadConst, dst, idx);
                Ok(())
            }
            AstKind::Null => {
                let idx = self.builder.add_const(Value::Null);
                self.builder.emit_su(Opcode::LoadConst, dst, idx);
                Ok(())
            }
            AstKind::This => {
                self.builder.emit_ss(Opcode::Move, dst, SlotIndex::new(Region::Arguments, 0));
                Ok(())
            }
            AstKind::Ident { name, ref_id } => match self.parser.scopes.resolution(ref_id) {
                Resolution::Slot(slot) => {
                    self.builder.emit_ss(Opcode::Move, dst, slot);
                    Ok(())
                }
                Resolution::GlobalName(_) => {
                    self.builder.emit_su(Opcode::GetGlobal, dst, name.raw());
                    Ok(())
                }
            },
            AstKind::Regexp(index) => {
                self.builder.emit_su(Opcode::RegexpNew, dst, index);
                Ok(())
            }
            AstKind::FunctionNode(fid) => {
                self.builder.emit_su(Opcode::FunctionNew, dst, fid.raw());
                Ok(())
            }
            AstKind::Array(list) => self.compile_array(list, dst),
            AstKind::Object(list) => self.compile_object(list, dst),
            AstKind::Template(list) => self.compile_template(list, dst),
            AstKind::Binary { op, left, right } => self.compile_binary(op, left, right, dst),
            AstKind::Unary { op, operand } => self.compile_unary(op, operand, dst, node),
            AstKind::Update { inc, prefix, target } => self.compile_update(inc, prefix, target, dst),
            AstKind::Cond { cond, then, otherwise } => {
                let test = self.expr_value(cond)?;
                let to_else = self.builder.emit_jump(Opcode::JumpIfFalsy, Some(test));
                self.expr_to(then, dst)?;
                let to_end = self.builder.emit_jump(Opcode::Jump, None);
                self.builder.patch_jump(to_else);
                self.expr_to(otherwise, dst)?;
                self.builder.patch_jump(to_end);
                Ok(())
            }
            AstKind::Assign { op, target, value } => {
                let result = self.compile_assign(op, target, value)?;
                self.builder.emit_ss(Opcode::Move, dst, result);
                Ok(())
            }
            AstKind::Member { obj, prop, computed, optional } => {
                let obj_slot = self.expr_value(obj)?;
                let over = if optional {
                    self.builder.emit_s(Opcode::LoadUndefined, dst);
                    Some(self.builder.emit_jump(Opcode::JumpIfNullish, Some(obj_slot)))
                } else {
                    None
                };
                let key = self.member_key(prop, computed)?;
                self.builder.emit_sss(Opcode::PropGet, dst, obj_slot, key);
                if let Some(over) = over {
                    self.builder.patch_jump(over);
                }
                Ok(())
            }
            AstKind::Call { callee, args, optional } => self.compile_call(callee, args, optional, dst),
            AstKind::NewExpr { callee, args } => {
                let ctor = self.expr_value(callee)?;
                let (base, argc) = self.compile_args(args)?;
                self.builder.emit_new(dst, ctor, base, argc);
                Ok(())
            }
            AstKind::Elision => {
                let idx = self.builder.add_const(Value::Hole);
                self.builder.emit_su(Opcode::LoadConst, dst, idx);
                Ok(())
            }
            _ => Err(JsError::internal("statement node in expression position")),
        }
    }

    /// Evaluates to a readable slot: resolved variables are read in place,
    /// everything else lands in a fresh temp.
    fn expr_value(&mut self, node: NodeId) -> Result<SlotIndex, JsError> {
        match self.arena.kind(node) {
            AstKind::Paren(inner) => {
                let inner = *inner;
                self.expr_value(inner)
            }
            AstKind::Ident { ref_id, .. } => match self.parser.scopes.resolution(*ref_id) {
                Resolution::Slot(slot) => Ok(slot),
                Resolution::GlobalName(_) => {
                    let dst = self.alloc_temp();
                    self.expr_to(node, dst)?;
                    Ok(dst)
                }
            },
            AstKind::Assign { .. } => {
                let (op, target, value) = match self.arena.kind(node).clone() {
                    AstKind::Assign { op, target, value } => (op, target, value),
                    _ => unreachable!(),
                };
                self.compile_assign(op, target, value)
            }
            _ => {
                let dst = self.alloc_temp();
                self.expr_to(node, dst)?;
                Ok(dst)
            }
        }
    }

    fn compile_array(&mut self, list: ListId, dst: SlotIndex) -> Result<(), JsError> {
        let elements: Vec<NodeId> = self.arena.list(list).to_vec();
        self.builder
            .emit_su(Opcode::ArrayNew, dst, u32::try_from(elements.len()).expect("array literal exceeds u32"));
        for element in elements {
            let mark = self.temp_mark();
            let slot = self.expr_value(element)?;
            self.builder.emit_ss(Opcode::ArrayAppend, dst, slot);
            self.release_temps(mark);
        }
        Ok(())
    }

    fn compile_object(&mut self, list: ListId, dst: SlotIndex) -> Result<(), JsError> {
        self.builder.emit_s(Opcode::ObjectNew, dst);
        let props: Vec<NodeId> = self.arena.list(list).to_vec();
        for prop in props {
            let mark = self.temp_mark();
            let AstKind::Prop { key, value, kind, computed } = self.arena.kind(prop).clone() else {
                return Err(JsError::internal("malformed object literal member"));
            };
            let key_slot = self.member_key(key, computed)?;
            let value_slot = self.expr_value(value)?;
            let op = match kind {
                PropKind::Init => Opcode::PropInit,
                PropKind::Get => Opcode::PropInitGetter,
                PropKind::Set => Opcode::PropInitSetter,
            };
            self.builder.emit_sss(op, dst, key_slot, value_slot);
            self.release_temps(mark);
        }
        Ok(())
    }

    fn compile_template(&mut self, list: ListId, dst: SlotIndex) -> Result<(), JsError> {
        let parts: Vec<NodeId> = self.arena.list(list).to_vec();
        if parts.is_empty() {
            let idx = self.builder.add_const(Value::Str(StaticStrings::Empty.id()));
            self.builder.emit_su(Opcode::LoadConst, dst, idx);
            return Ok(());
        }
        let mark = self.temp_mark();
        let first = self.expr_value(parts[0])?;
        self.builder.emit_ss(Opcode::ToString, dst, first);
        self.release_temps(mark);
        for &part in &parts[1..] {
            let mark = self.temp_mark();
            let raw = self.expr_value(part)?;
            let piece = self.alloc_temp();
            self.builder.emit_ss(Opcode::ToString, piece, raw);
            self.builder.emit_sss(Opcode::Add, dst, dst, piece);
            self.release_temps(mark);
        }
        Ok(())
    }

    fn compile_binary(&mut self, op: BinOp, left: NodeId, right: NodeId, dst: SlotIndex) -> Result<(), JsError> {
        match op {
            BinOp::And => {
                self.expr_to(left, dst)?;
                let short = self.builder.emit_jump(Opcode::JumpIfFalsy, Some(dst));
                self.expr_to(right, dst)?;
                self.builder.patch_jump(short);
                Ok(())
            }
            BinOp::Or => {
                self.expr_to(left, dst)?;
                let short = self.builder.emit_jump(Opcode::JumpIfTruthy, Some(dst));
                self.expr_to(right, dst)?;
                self.builder.patch_jump(short);
                Ok(())
            }
            BinOp::Coalesce => {
                self.expr_to(left, dst)?;
                let short = self.builder.emit_jump(Opcode::JumpIfNotNullish, Some(dst));
                self.expr_to(right, dst)?;
                self.builder.patch_jump(short);
                Ok(())
            }
            BinOp::Comma => {
                self.expr_value(left)?;
                self.expr_to(right, dst)
            }
            _ => {
                let a = self.expr_value(left)?;
                let b = self.expr_value(right)?;
                let opcode = binary_opcode(op);
                self.builder.emit_sss(opcode, dst, a, b);
                Ok(())
            }
        }
    }

    fn compile_unary(&mut self, op: UnOp, operand: NodeId, dst: SlotIndex, node: NodeId) -> Result<(), JsError> {
        match op {
            UnOp::Typeof => {
                // typeof of a bare unresolved name must not throw.
                if let AstKind::Ident { name, ref_id } = *self.arena.kind(operand) {
                    if let Resolution::GlobalName(_) = self.parser.scopes.resolution(ref_id) {
                        self.builder.emit_su(Opcode::TypeofGlobal, dst, name.raw());
                        return Ok(());
                    }
                }
                let slot = self.expr_value(operand)?;
                self.builder.emit_ss(Opcode::Typeof, dst, slot);
                Ok(())
            }
            UnOp::Void => {
                self.expr_value(operand)?;
                self.builder.emit_s(Opcode::LoadUndefined, dst);
                Ok(())
            }
            UnOp::Delete => self.compile_delete(operand, dst, self.arena.line(node)),
            _ => {
                let slot = self.expr_value(operand)?;
                let opcode = match op {
                    UnOp::Neg => Opcode::Neg,
                    UnOp::Plus => Opcode::ToNumber,
                    UnOp::Not => Opcode::Not,
                    UnOp::BitNot => Opcode::BitNot,
                    _ => unreachable!("handled above"),
                };
                self.builder.emit_ss(opcode, dst, slot);
                Ok(())
            }
        }
    }

    fn compile_delete(&mut self, operand: NodeId, dst: SlotIndex, _line: u32) -> Result<(), JsError> {
        match self.arena.kind(operand).clone() {
            AstKind::Member { obj, prop, computed, .. } => {
                let obj_slot = self.expr_value(obj)?;
                let key = self.member_key(prop, computed)?;
                self.builder.emit_sss(Opcode::PropDelete, dst, obj_slot, key);
                Ok(())
            }
            AstKind::Ident { name, ref_id } => match self.parser.scopes.resolution(ref_id) {
                // A declared binding is not deletable.
                Resolution::Slot(_) => {
                    let idx = self.builder.add_const(Value::Bool(false));
                    self.builder.emit_su(Opcode::LoadConst, dst, idx);
                    Ok(())
                }
                Resolution::GlobalName(_) => {
                    self.builder.emit_su(Opcode::DeleteGlobal, dst, name.raw());
                    Ok(())
                }
            },
            _ => {
                self.expr_value(operand)?;
                let idx = self.builder.add_const(Value::Bool(true));
                self.builder.emit_su(Opcode::LoadConst, dst, idx);
                Ok(())
            }
        }
    }

    fn compile_update(&mut self, inc: bool, prefix: bool, target: NodeId, dst: SlotIndex) -> Result<(), JsError> {
        let one = {
            let idx = self.builder.add_const(Value::Number(1.0));
            let slot = self.alloc_temp();
            self.builder.emit_su(Opcode::LoadConst, slot, idx);
            slot
        };
        let op = if inc { Opcode::Add } else { Opcode::Sub };
        let current = self.load_target(target)?;
        if prefix {
            self.builder.emit_ss(Opcode::ToNumber, dst, current);
            self.builder.emit_sss(op, dst, dst, one);
            self.store_target(target, dst)?;
        } else {
            self.builder.emit_ss(Opcode::ToNumber, dst, current);
            let updated = self.alloc_temp();
            self.builder.emit_sss(op, updated, dst, one);
            self.store_target(target, updated)?;
        }
        Ok(())
    }

    /// Compiles an assignment, returning the slot holding the value.
    fn compile_assign(&mut self, op: Option<BinOp>, target: NodeId, value: NodeId) -> Result<SlotIndex, JsError> {
        match op {
            None => match self.arena.kind(target).clone() {
                AstKind::Paren(inner) => self.compile_assign(None, inner, value),
                AstKind::Ident { name, ref_id } => match self.parser.scopes.resolution(ref_id) {
                    Resolution::Slot(slot) => {
                        self.expr_to(value, slot)?;
                        Ok(slot)
                    }
                    Resolution::GlobalName(_) => {
                        let slot = self.expr_value(value)?;
                        self.builder.emit_us(Opcode::SetGlobal, name.raw(), slot);
                        Ok(slot)
                    }
                },
                AstKind::Member { obj, prop, computed, .. } => {
                    let obj_slot = self.expr_value(obj)?;
                    let key = self.member_key(prop, computed)?;
                    let slot = self.expr_value(value)?;
                    self.builder.emit_sss(Opcode::PropSet, obj_slot, key, slot);
                    Ok(slot)
                }
                _ => Err(JsError::internal("invalid assignment target survived parsing")),
            },
            Some(op) => {
                let current = self.load_target(target)?;
                let rhs = self.expr_value(value)?;
                let result = self.alloc_temp();
                self.builder.emit_sss(binary_opcode(op), result, current, rhs);
                self.store_target(target, result)?;
                Ok(result)
            }
        }
    }

    /// Loads the current value of an assignment target into a slot.
    fn load_target(&mut self, target: NodeId) -> Result<SlotIndex, JsError> {
        match self.arena.kind(target).clone() {
            AstKind::Paren(inner) => self.load_target(inner),
            AstKind::Ident { .. } => self.expr_value(target),
            AstKind::Member { .. } => {
                let slot = self.alloc_temp();
                self.expr_to(target, slot)?;
                Ok(slot)
            }
            _ => Err(JsError::internal("invalid assignment target survived parsing")),
        }
    }

    /// Stores a slot into an assignment target.
    fn store_target(&mut self, target: NodeId, value: SlotIndex) -> Result<(), JsError> {
        match self.arena.kind(target).clone() {
            AstKind::Paren(inner) => self.store_target(inner, value),
            AstKind::Ident { name, ref_id } => match self.parser.scopes.resolution(ref_id) {
                Resolution::Slot(slot) => {
                    if slot != value {
                        self.builder.emit_ss(Opcode::Move, slot, value);
                    }
                    Ok(())
                }
                Resolution::GlobalName(_) => {
                    self.builder.emit_us(Opcode::SetGlobal, name.raw(), value);
                    Ok(())
                }
            },
            AstKind::Member { obj, prop, computed, .. } => {
                let obj_slot = self.expr_value(obj)?;
                let key = self.member_key(prop, computed)?;
                self.builder.emit_sss(Opcode::PropSet, obj_slot, key, value);
                Ok(())
            }
            _ => Err(JsError::internal("invalid assignment target survived parsing")),
        }
    }

    /// A property key as a slot: constant string for `a.b`, evaluated
    /// expression for `a[b]`.
    fn member_key(&mut self, prop: NodeId, computed: bool) -> Result<SlotIndex, JsError> {
        if computed {
            self.expr_value(prop)
        } else {
            match *self.arena.kind(prop) {
                AstKind::StringLit(sid) => {
                    let idx = self.builder.add_const(Value::Str(sid));
                    let slot = self.alloc_temp();
                    self.builder.emit_su(Opcode::LoadConst, slot, idx);
                    Ok(slot)
                }
                AstKind::Number(n) => {
                    let idx = self.builder.add_const(Value::Number(n));
                    let slot = self.alloc_temp();
                    self.builder.emit_su(Opcode::LoadConst, slot, idx);
                    Ok(slot)
                }
                _ => Err(JsError::internal("non-literal property key marked non-computed")),
            }
        }
    }

    fn compile_call(&mut self, callee: NodeId, args: ListId, optional: bool, dst: SlotIndex) -> Result<(), JsError> {
        // A member callee becomes a method call carrying its receiver.
        let callee_kind = self.arena.kind(callee).clone();
        if let AstKind::Member { obj, prop, computed, optional: member_optional } = callee_kind {
            let obj_slot = self.expr_value(obj)?;
            let over = if member_optional || optional {
                self.builder.emit_s(Opcode::LoadUndefined, dst);
                Some(self.builder.emit_jump(Opcode::JumpIfNullish, Some(obj_slot)))
            } else {
                None
            };
            let key = self.member_key(prop, computed)?;
            let func = self.alloc_temp();
            self.builder.emit_sss(Opcode::PropGet, func, obj_slot, key);
            let (base, argc) = self.compile_args(args)?;
            self.builder.emit_call_method(dst, func, obj_slot, base, argc);
            if let Some(over) = over {
                self.builder.patch_jump(over);
            }
            return Ok(());
        }

        let func = self.expr_value(callee)?;
        let over = if optional {
            self.builder.emit_s(Opcode::LoadUndefined, dst);
            Some(self.builder.emit_jump(Opcode::JumpIfNullish, Some(func)))
        } else {
            None
        };
        let (base, argc) = self.compile_args(args)?;
        self.builder.emit_call(dst, func, base, argc);
        if let Some(over) = over {
            self.builder.patch_jump(over);
        }
        Ok(())
    }

    /// Evaluates arguments into consecutive temps, returning (base, count).
    fn compile_args(&mut self, args: ListId) -> Result<(u32, u32), JsError> {
        let nodes: Vec<NodeId> = self.arena.list(args).to_vec();
        let base = self.next_temp;
        let slots: Vec<SlotIndex> = (0..nodes.len()).map(|_| self.alloc_temp()).collect();
        for (node, slot) in nodes.iter().zip(&slots) {
            self.expr_to(*node, *slot)?;
        }
        Ok((base, u32::try_from(nodes.len()).expect("argument count exceeds u32")))
    }
}

fn binary_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Rem => Opcode::Rem,
        BinOp::Exp => Opcode::Exp,
        BinOp::Shl => Opcode::Shl,
        BinOp::Shr => Opcode::Shr,
        BinOp::Ushr => Opcode::Ushr,
        BinOp::BitAnd => Opcode::BitAnd,
        BinOp::BitOr => Opcode::BitOr,
        BinOp::BitXor => Opcode::BitXor,
        BinOp::Eq => Opcode::Eq,
        BinOp::Neq => Opcode::Neq,
        BinOp::StrictEq => Opcode::StrictEq,
        BinOp::StrictNeq => Opcode::StrictNeq,
        BinOp::Lt => Opcode::Lt,
        BinOp::Lte => Opcode::Lte,
        BinOp::Gt => Opcode::Gt,
        BinOp::Gte => Opcode::Gte,
        BinOp::In => Opcode::In,
        BinOp::InstanceOf => Opcode::InstanceOf,
        BinOp::And | BinOp::Or | BinOp::Coalesce | BinOp::Comma => {
            unreachable!("short-circuit operators lower to jumps")
        }
    }
}
