//! The parser: a resumable trampoline over an explicit continuation stack.
//!
//! There is no recursive descent. The parser's continuation is a stack of
//! `(state, optional)` entries; the driver loop pops the current state, runs
//! it against the current token, and the state either consumes tokens and
//! sets the next state, pushes successor states (pre-order continuation), or
//! produces a node into `self.node` and pops the stack. A state can signal
//! `Declined`, which unwinds optional entries — that is how the restricted
//! productions (postfix `++` after a newline) back out without consuming
//! anything.
//!
//! This shape keeps host-stack usage bounded regardless of input nesting,
//! lets the grammar peek arbitrarily far through the lexer's token FIFO, and
//! makes the parser resumable: in accumulative mode the same parser instance
//! picks up appended source at the statement boundary where it stopped.
//!
//! Statement grammar lives here; expression grammar is in `expr.rs`.

mod expr;

use ahash::AHashMap;

use crate::{
    ast::{Arena, AstKind, ListId, NodeId, PropKind},
    error::JsError,
    intern::{Interns, StaticStrings, StringId},
    lexer::{self, Lexer, Token, TokenKind},
    module::ModuleLoader,
    scope::{DeclKind, ScopeId, ScopeKind, ScopeTree},
    types::FunctionId,
};

pub(crate) use expr::BinOpLevel;

/// A regexp literal collected during parsing; compiled against the host
/// matcher when the engine is built.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub(crate) struct RegexpLit {
    pub pattern: StringId,
    pub flags: StringId,
    pub line: u32,
}

/// One function collected during parsing: declaration, expression, arrow,
/// accessor, module body, or the top-level program (always index 0).
#[derive(Debug)]
pub(crate) struct FuncDef {
    pub name: StringId,
    pub param_count: u32,
    /// Block node holding the body; the program's is filled when parsing
    /// completes.
    pub body: Option<NodeId>,
    pub scope: ScopeId,
    pub is_arrow: bool,
    pub is_module: bool,
    pub line: u32,
}

/// What a state handler tells the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Keep driving.
    Again,
    /// The continuation stack is exhausted; parsing is complete.
    Done,
    /// Back out: unwind optional stack entries without consuming input.
    Declined,
}

/// Grammar states. One variant per continuation point; payloads are the
/// values a recursive parser would have kept in locals.
#[derive(Debug, Clone, Copy)]
enum State {
    // ----- statements -----
    StmtList { list: ListId, end: TokenKind },
    StmtListCollect { list: ListId, end: TokenKind },
    Stmt,
    BlockRestore { outer: ScopeId },
    VarDeclNext { kind: DeclKind, list: ListId, in_for: bool },
    VarInitFinish { kind: DeclKind, list: ListId, target: NodeId, in_for: bool },
    IfAfterCond,
    IfAfterThen { cond: NodeId },
    IfFinish { cond: NodeId, then: NodeId },
    WhileAfterCond,
    WhileBody { cond: NodeId },
    DoAfterBody,
    DoFinish { body: NodeId },
    ForInit,
    ForAfterInitVar,
    ForAfterInitExpr,
    ForCond { init: Option<NodeId> },
    ForCondFinish { init: Option<NodeId> },
    ForUpdate { init: Option<NodeId>, cond: Option<NodeId> },
    ForUpdateFinish { init: Option<NodeId>, cond: Option<NodeId> },
    ForBodyFinish { init: Option<NodeId>, cond: Option<NodeId>, update: Option<NodeId> },
    ForInAfterObj { target: NodeId },
    ForInBodyFinish { target: NodeId, object: NodeId },
    SwitchAfterDisc,
    SwitchCaseList { discriminant: NodeId, cases: ListId },
    SwitchCaseTest { discriminant: NodeId, cases: ListId },
    SwitchCaseBody { discriminant: NodeId, cases: ListId, test: Option<NodeId>, body: ListId },
    SwitchCaseBodyCollect { discriminant: NodeId, cases: ListId, test: Option<NodeId>, body: ListId },
    ReturnFinish,
    ThrowFinish,
    TryAfterBlock,
    TryAfterCatch { block: NodeId, param: Option<NodeId>, outer: ScopeId },
    TryFinallyFinish { block: NodeId, catch: Option<NodeId> },
    LabelledFinish { label: StringId },
    ExprStmtFinish,
    ExportFinish,

    // ----- expressions -----
    Expr { no_in: bool },
    ExprCommaLoop { no_in: bool },
    ExprCommaRhs { no_in: bool, left: NodeId },
    AssignExpr { no_in: bool },
    AssignAfterLhs { no_in: bool },
    AssignFinish { op: Option<crate::ast::BinOp>, left: NodeId },
    CondAfterTest { no_in: bool },
    CondAfterThen { cond: NodeId, no_in: bool },
    CondFinish { cond: NodeId, then: NodeId },
    BinaryLevel { level: BinOpLevel, no_in: bool },
    BinaryLoop { level: BinOpLevel, no_in: bool },
    BinaryRhs { level: BinOpLevel, no_in: bool, op: crate::ast::BinOp, left: NodeId },
    UnaryExpr,
    UnaryFinish { op: crate::ast::UnOp },
    PrefixUpdateFinish { inc: bool },
    PostfixExpr,
    PostfixCheck,
    LhsExpr { allow_call: bool },
    NewAfterCallee,
    CallLoop { allow_call: bool },
    MemberIndexFinish { obj: NodeId, allow_call: bool, optional: bool },
    CallArgs { callee: NodeId, list: ListId, is_new: bool, optional: bool },
    CallArgsCollect { callee: NodeId, list: ListId, is_new: bool, optional: bool },
    Primary,
    ParenFinish,
    ArrayLit { list: ListId },
    ArrayLitCollect { list: ListId },
    ObjectLit { list: ListId, has_proto: bool },
    ObjectComputedKey { list: ListId, has_proto: bool },
    ObjectValueFinish { list: ListId, key: NodeId, computed: bool, has_proto: bool },
    ObjectAccessorFinish { list: ListId, key: NodeId, prop_kind: PropKind, has_proto: bool },
    TemplateCollect { list: ListId },
    FunctionBodyFinish { func: FunctionId, outer: ScopeId },
    ArrowExprFinish { func: FunctionId, outer: ScopeId },
}

#[derive(Debug, Clone, Copy)]
struct StackEntry {
    state: State,
    optional: bool,
}

/// The parser instance. Kept alive across `compile` calls in accumulative
/// mode; everything it accumulates (arena, scopes, functions) feeds the
/// generator.
#[derive(Debug)]
pub(crate) struct Parser {
    lexer: Lexer,
    pub arena: Arena,
    pub scopes: ScopeTree,
    pub funcs: Vec<FuncDef>,
    pub regexps: Vec<RegexpLit>,
    /// Canonical module path -> compiled module lambda.
    modules: AHashMap<String, FunctionId>,
    loader: Option<ModuleLoader>,
    current_scope: ScopeId,
    stack: Vec<StackEntry>,
    state: State,
    /// The last completed production; continuations read it when resumed.
    node: Option<NodeId>,
    program_body: ListId,
    /// Reject missing semicolons even where ASI would accept them.
    strict_semicolon: bool,
    is_module: bool,
    module_has_default: bool,
}

impl Parser {
    pub fn new(source: String, loader: Option<ModuleLoader>, is_module: bool, strict_semicolon: bool) -> Self {
        let mut arena = Arena::new();
        let program_body = arena.new_list();
        let scopes = ScopeTree::new();
        let funcs = vec![FuncDef {
            name: StaticStrings::Main.id(),
            param_count: 0,
            body: None,
            scope: ScopeId::GLOBAL,
            is_arrow: false,
            is_module,
            line: 1,
        }];
        Self {
            lexer: Lexer::new(source, Interns::new()),
            arena,
            scopes,
            funcs,
            regexps: Vec::new(),
            modules: AHashMap::new(),
            loader,
            current_scope: ScopeId::GLOBAL,
            stack: Vec::new(),
            state: State::StmtList {
                list: program_body,
                end: TokenKind::End,
            },
            node: None,
            program_body,
            strict_semicolon,
            is_module,
            module_has_default: false,
        }
    }

    /// Runs the driver to completion over the current source.
    pub fn parse(&mut self) -> Result<(), JsError> {
        self.drive()?;
        self.funcs[0].body = self.node;
        Ok(())
    }

    /// Appends source in accumulative mode and resumes at the statement
    /// boundary the previous parse stopped at.
    pub fn parse_more(&mut self, source: &str) -> Result<(), JsError> {
        self.lexer.append_source(source);
        self.state = State::StmtList {
            list: self.program_body,
            end: TokenKind::End,
        };
        self.stack.clear();
        self.drive()?;
        self.funcs[0].body = self.node;
        Ok(())
    }

    /// Resolves all recorded references; call once after the last parse.
    pub fn resolve(&mut self) {
        self.scopes.resolve(&self.lexer.interns);
    }

    pub fn interns(&self) -> &Interns {
        &self.lexer.interns
    }

    // ----- driver -----

    fn drive(&mut self) -> Result<(), JsError> {
        loop {
            match self.step()? {
                Step::Again => {}
                Step::Done => return Ok(()),
                Step::Declined => {
                    // Unwind optional entries; the first non-optional entry
                    // becomes the current state. An empty stack means the
                    // decline reached the program level, which is a bug.
                    loop {
                        let Some(entry) = self.stack.pop() else {
                            return Err(JsError::syntax("unexpected end of input", self.lexer.line()));
                        };
                        if !entry.optional {
                            self.state = entry.state;
                            break;
                        }
                    }
                }
            }
        }
    }

    fn step(&mut self) -> Result<Step, JsError> {
        let state = self.state;
        match state {
            // Statement machinery
            State::StmtList { list, end } => self.state_stmt_list(list, end),
            State::StmtListCollect { list, end } => {
                let stmt = self.take_node()?;
                self.arena.list_push(list, stmt);
                self.state = State::StmtList { list, end };
                Ok(Step::Again)
            }
            State::Stmt => self.state_stmt(),
            State::BlockRestore { outer } => {
                self.current_scope = outer;
                self.pop_state()
            }
            State::VarDeclNext { kind, list, in_for } => self.state_var_decl_next(kind, list, in_for),
            State::VarInitFinish { kind, list, target, in_for } => {
                let init = self.take_node()?;
                let line = self.arena.line(target);
                let decl = self.arena.push(
                    AstKind::VarInit {
                        target,
                        init: Some(init),
                    },
                    line,
                );
                self.arena.list_push(list, decl);
                self.var_decl_continue(kind, list, in_for)
            }
            State::IfAfterCond => {
                let cond = self.take_node()?;
                self.expect(TokenKind::RParen)?;
                self.push(State::IfAfterThen { cond }, false);
                self.state = State::Stmt;
                Ok(Step::Again)
            }
            State::IfAfterThen { cond } => {
                let then = self.take_node()?;
                if self.eat(TokenKind::Else)?.is_some() {
                    self.push(State::IfFinish { cond, then }, false);
                    self.state = State::Stmt;
                    Ok(Step::Again)
                } else {
                    let line = self.arena.line(cond);
                    self.node = Some(self.arena.push(
                        AstKind::If {
                            cond,
                            then,
                            otherwise: None,
                        },
                        line,
                    ));
                    self.pop_state()
                }
            }
            State::IfFinish { cond, then } => {
                let otherwise = self.take_node()?;
                let line = self.arena.line(cond);
                self.node = Some(self.arena.push(
                    AstKind::If {
                        cond,
                        then,
                        otherwise: Some(otherwise),
                    },
                    line,
                ));
                self.pop_state()
            }
            State::WhileAfterCond => {
                let cond = self.take_node()?;
                self.expect(TokenKind::RParen)?;
                self.push(State::WhileBody { cond }, false);
                self.state = State::Stmt;
                Ok(Step::Again)
            }
            State::WhileBody { cond } => {
                let body = self.take_node()?;
                let line = self.arena.line(cond);
                self.node = Some(self.arena.push(AstKind::While { cond, body }, line));
                self.pop_state()
            }
            State::DoAfterBody => {
                let body = self.take_node()?;
                self.expect(TokenKind::While)?;
                self.expect(TokenKind::LParen)?;
                self.push(State::DoFinish { body }, false);
                self.state = State::Expr { no_in: false };
                Ok(Step::Again)
            }
            State::DoFinish { body } => {
                let cond = self.take_node()?;
                self.expect(TokenKind::RParen)?;
                // The semicolon after do..while is always optional.
                let _ = self.eat(TokenKind::Semicolon)?;
                let line = self.arena.line(body);
                self.node = Some(self.arena.push(AstKind::DoWhile { body, cond }, line));
                self.pop_state()
            }
            State::ForInit => self.state_for_init(),
            State::ForAfterInitVar => {
                let init = self.take_node()?;
                self.expect(TokenKind::Semicolon)?;
                self.state = State::ForCond { init: Some(init) };
                Ok(Step::Again)
            }
            State::ForAfterInitExpr => {
                let init = self.take_node()?;
                if self.eat(TokenKind::In)?.is_some() {
                    self.check_assign_target(init)?;
                    self.push(State::ForInAfterObj { target: init }, false);
                    self.state = State::Expr { no_in: false };
                } else {
                    self.expect(TokenKind::Semicolon)?;
                    self.state = State::ForCond { init: Some(init) };
                }
                Ok(Step::Again)
            }
            State::ForCond { init } => {
                if self.eat(TokenKind::Semicolon)?.is_some() {
                    self.state = State::ForUpdate { init, cond: None };
                } else {
                    self.push(State::ForCondFinish { init }, false);
                    self.state = State::Expr { no_in: false };
                }
                Ok(Step::Again)
            }
            State::ForCondFinish { init } => {
                let cond = self.take_node()?;
                self.expect(TokenKind::Semicolon)?;
                self.state = State::ForUpdate { init, cond: Some(cond) };
                Ok(Step::Again)
            }
            State::ForUpdate { init, cond } => {
                if self.eat(TokenKind::RParen)?.is_some() {
                    self.push(State::ForBodyFinish { init, cond, update: None }, false);
                    self.state = State::Stmt;
                } else {
                    self.push(State::ForUpdateFinish { init, cond }, false);
                    self.state = State::Expr { no_in: false };
                }
                Ok(Step::Again)
            }
            State::ForUpdateFinish { init, cond } => {
                let update = self.take_node()?;
                self.expect(TokenKind::RParen)?;
                self.push(
                    State::ForBodyFinish {
                        init,
                        cond,
                        update: Some(update),
                    },
                    false,
                );
                self.state = State::Stmt;
                Ok(Step::Again)
            }
            State::ForBodyFinish { init, cond, update } => {
                let body = self.take_node()?;
                let line = self.arena.line(body);
                self.node = Some(self.arena.push(AstKind::For { init, cond, update, body }, line));
                self.pop_state()
            }
            State::ForInAfterObj { target } => {
                let object = self.take_node()?;
                self.expect(TokenKind::RParen)?;
                self.push(State::ForInBodyFinish { target, object }, false);
                self.state = State::Stmt;
                Ok(Step::Again)
            }
            State::ForInBodyFinish { target, object } => {
                let body = self.take_node()?;
                let line = self.arena.line(target);
                self.node = Some(self.arena.push(AstKind::ForIn { target, object, body }, line));
                self.pop_state()
            }
            State::SwitchAfterDisc => {
                let discriminant = self.take_node()?;
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::LBrace)?;
                let cases = self.arena.new_list();
                self.state = State::SwitchCaseList { discriminant, cases };
                Ok(Step::Again)
            }
            State::SwitchCaseList { discriminant, cases } => self.state_switch_case_list(discriminant, cases),
            State::SwitchCaseTest { discriminant, cases } => {
                let test = self.take_node()?;
                self.expect(TokenKind::Colon)?;
                let body = self.arena.new_list();
                self.state = State::SwitchCaseBody {
                    discriminant,
                    cases,
                    test: Some(test),
                    body,
                };
                Ok(Step::Again)
            }
            State::SwitchCaseBody {
                discriminant,
                cases,
                test,
                body,
            } => {
                let token = self.peek()?;
                if matches!(token.kind, TokenKind::Case | TokenKind::Default | TokenKind::RBrace) {
                    let case = self.arena.push(AstKind::Case { test, body }, token.line);
                    self.arena.list_push(cases, case);
                    self.state = State::SwitchCaseList { discriminant, cases };
                } else {
                    self.push(
                        State::SwitchCaseBodyCollect {
                            discriminant,
                            cases,
                            test,
                            body,
                        },
                        false,
                    );
                    self.state = State::Stmt;
                }
                Ok(Step::Again)
            }
            State::SwitchCaseBodyCollect {
                discriminant,
                cases,
                test,
                body,
            } => {
                let stmt = self.take_node()?;
                self.arena.list_push(body, stmt);
                self.state = State::SwitchCaseBody {
                    discriminant,
                    cases,
                    test,
                    body,
                };
                Ok(Step::Again)
            }
            State::ReturnFinish => {
                let value = self.take_node()?;
                self.semicolon()?;
                let line = self.arena.line(value);
                self.node = Some(self.arena.push(AstKind::Return(Some(value)), line));
                self.pop_state()
            }
            State::ThrowFinish => {
                let value = self.take_node()?;
                self.semicolon()?;
                let line = self.arena.line(value);
                self.node = Some(self.arena.push(AstKind::Throw(value), line));
                self.pop_state()
            }
            State::TryAfterBlock => self.state_try_after_block(),
            State::TryAfterCatch { block, param, outer } => {
                let body = self.take_node()?;
                self.current_scope = outer;
                let line = self.arena.line(body);
                let clause = self.arena.push(AstKind::CatchClause { param, body }, line);
                if self.eat(TokenKind::Finally)?.is_some() {
                    self.expect_peek(TokenKind::LBrace)?;
                    self.push(
                        State::TryFinallyFinish {
                            block,
                            catch: Some(clause),
                        },
                        false,
                    );
                    self.state = State::Stmt;
                } else {
                    self.node = Some(self.arena.push(
                        AstKind::Try {
                            block,
                            catch: Some(clause),
                            finally: None,
                        },
                        line,
                    ));
                    return self.pop_state();
                }
                Ok(Step::Again)
            }
            State::TryFinallyFinish { block, catch } => {
                let finally = self.take_node()?;
                let line = self.arena.line(block);
                self.node = Some(self.arena.push(
                    AstKind::Try {
                        block,
                        catch,
                        finally: Some(finally),
                    },
                    line,
                ));
                self.pop_state()
            }
            State::LabelledFinish { label } => {
                let body = self.take_node()?;
                let line = self.arena.line(body);
                self.node = Some(self.arena.push(AstKind::Labelled { label, body }, line));
                self.pop_state()
            }
            State::ExprStmtFinish => {
                let expr = self.take_node()?;
                self.semicolon()?;
                let line = self.arena.line(expr);
                self.node = Some(self.arena.push(AstKind::ExprStmt(expr), line));
                self.pop_state()
            }
            State::ExportFinish => {
                let value = self.take_node()?;
                self.semicolon()?;
                let line = self.arena.line(value);
                self.node = Some(self.arena.push(AstKind::ExportDefault(value), line));
                self.pop_state()
            }

            // Expression machinery lives in expr.rs.
            other => self.step_expr(other),
        }
    }

    // ----- statement states -----

    fn state_stmt_list(&mut self, list: ListId, end: TokenKind) -> Result<Step, JsError> {
        let token = self.peek()?;
        if token.kind == end {
            if end != TokenKind::End {
                self.advance()?;
            }
            let block = self.arena.push(
                AstKind::Block {
                    body: list,
                    scope: self.current_scope,
                },
                token.line,
            );
            self.node = Some(block);
            return self.pop_state();
        }
        if token.kind == TokenKind::End {
            return Err(JsError::syntax("unexpected end of input", token.line));
        }
        self.push(State::StmtListCollect { list, end }, false);
        self.state = State::Stmt;
        Ok(Step::Again)
    }

    fn state_stmt(&mut self) -> Result<Step, JsError> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::LBrace => {
                self.advance()?;
                let outer = self.current_scope;
                let scope = self.scopes.push(outer, ScopeKind::Block, false).map_err(|e| e.with_line(token.line))?;
                self.current_scope = scope;
                let list = self.arena.new_list();
                self.push(State::BlockRestore { outer }, false);
                self.state = State::StmtList {
                    list,
                    end: TokenKind::RBrace,
                };
            }
            TokenKind::Semicolon => {
                self.advance()?;
                self.node = Some(self.arena.push(AstKind::Empty, token.line));
                return self.pop_state();
            }
            TokenKind::Var | TokenKind::Let | TokenKind::Const => {
                self.advance()?;
                let kind = decl_kind_for(token.kind);
                let list = self.arena.new_list();
                self.state = State::VarDeclNext { kind, list, in_for: false };
            }
            TokenKind::If => {
                self.advance()?;
                self.expect(TokenKind::LParen)?;
                self.push(State::IfAfterCond, false);
                self.state = State::Expr { no_in: false };
            }
            TokenKind::While => {
                self.advance()?;
                self.expect(TokenKind::LParen)?;
                self.push(State::WhileAfterCond, false);
                self.state = State::Expr { no_in: false };
            }
            TokenKind::Do => {
                self.advance()?;
                self.push(State::DoAfterBody, false);
                self.state = State::Stmt;
            }
            TokenKind::For => {
                self.advance()?;
                self.expect(TokenKind::LParen)?;
                self.state = State::ForInit;
            }
            TokenKind::Switch => {
                self.advance()?;
                self.expect(TokenKind::LParen)?;
                self.push(State::SwitchAfterDisc, false);
                self.state = State::Expr { no_in: false };
            }
            TokenKind::Break | TokenKind::Continue => {
                self.advance()?;
                let label = self.optional_label()?;
                self.semicolon()?;
                let kind = if token.kind == TokenKind::Break {
                    AstKind::Break(label)
                } else {
                    AstKind::Continue(label)
                };
                self.node = Some(self.arena.push(kind, token.line));
                return self.pop_state();
            }
            TokenKind::Return => {
                if self.scopes.get(self.current_scope).depth == 0 {
                    return Err(JsError::syntax("return outside of function", token.line));
                }
                self.advance()?;
                let next = self.peek()?;
                if next.newline_before
                    || matches!(next.kind, TokenKind::Semicolon | TokenKind::RBrace | TokenKind::End)
                {
                    self.semicolon()?;
                    self.node = Some(self.arena.push(AstKind::Return(None), token.line));
                    return self.pop_state();
                }
                self.push(State::ReturnFinish, false);
                self.state = State::Expr { no_in: false };
            }
            TokenKind::Throw => {
                self.advance()?;
                let next = self.peek()?;
                if next.newline_before {
                    return Err(JsError::syntax("illegal newline after throw", token.line));
                }
                self.push(State::ThrowFinish, false);
                self.state = State::Expr { no_in: false };
            }
            TokenKind::Try => {
                self.advance()?;
                self.expect_peek(TokenKind::LBrace)?;
                self.push(State::TryAfterBlock, false);
                self.state = State::Stmt;
            }
            TokenKind::Function => {
                self.advance()?;
                self.parse_function_declaration(token.line)?;
                self.node = Some(self.arena.push(AstKind::Empty, token.line));
                return self.pop_state();
            }
            TokenKind::Import => {
                self.advance()?;
                return self.parse_import(token.line);
            }
            TokenKind::Export => {
                if !self.is_module {
                    return Err(JsError::syntax("export outside of module", token.line));
                }
                if self.module_has_default {
                    return Err(JsError::syntax("duplicate default export", token.line));
                }
                self.advance()?;
                self.expect(TokenKind::Default)?;
                self.module_has_default = true;
                self.push(State::ExportFinish, false);
                self.state = State::AssignExpr { no_in: false };
            }
            TokenKind::Name => {
                // A label is a name directly followed by a colon.
                if self.lexer.peek(1)?.kind == TokenKind::Colon {
                    self.advance()?;
                    self.advance()?;
                    self.push(State::LabelledFinish { label: token.sid }, false);
                    self.state = State::Stmt;
                } else {
                    self.push(State::ExprStmtFinish, false);
                    self.state = State::Expr { no_in: false };
                }
            }
            TokenKind::Debugger => {
                // Accepted and ignored.
                self.advance()?;
                self.semicolon()?;
                self.node = Some(self.arena.push(AstKind::Empty, token.line));
                return self.pop_state();
            }
            TokenKind::Class | TokenKind::With => {
                return Err(JsError::syntax("Not supported in this version", token.line));
            }
            TokenKind::End => {
                return Err(JsError::syntax("unexpected end of input", token.line));
            }
            _ => {
                self.push(State::ExprStmtFinish, false);
                self.state = State::Expr { no_in: false };
            }
        }
        Ok(Step::Again)
    }

    fn state_var_decl_next(&mut self, kind: DeclKind, list: ListId, in_for: bool) -> Result<Step, JsError> {
        let token = self.peek()?;
        if matches!(token.kind, TokenKind::LBracket | TokenKind::LBrace) {
            return Err(JsError::syntax("Not supported in this version", token.line));
        }
        let name = self.expect(TokenKind::Name)?;
        self.scopes
            .declare(self.current_scope, name.sid, kind, name.line)
            .map_err(|e| e.with_line(name.line))?;
        let target = self.ident_node(name.sid, name.line);

        // `for (var x in y)` short-circuits the declaration path into an
        // iteration head on the `in` keyword.
        if in_for && self.arena.list(list).is_empty() && self.peek()?.kind == TokenKind::In {
            self.advance()?;
            self.push(State::ForInAfterObj { target }, false);
            self.state = State::Expr { no_in: false };
            return Ok(Step::Again);
        }

        if self.eat(TokenKind::Assign)?.is_some() {
            self.push(State::VarInitFinish { kind, list, target, in_for }, false);
            self.state = State::AssignExpr { no_in: in_for };
            return Ok(Step::Again);
        }
        let decl = self.arena.push(AstKind::VarInit { target, init: None }, name.line);
        self.arena.list_push(list, decl);
        self.var_decl_continue(kind, list, in_for)
    }

    fn var_decl_continue(&mut self, kind: DeclKind, list: ListId, in_for: bool) -> Result<Step, JsError> {
        if self.eat(TokenKind::Comma)?.is_some() {
            self.state = State::VarDeclNext { kind, list, in_for };
            return Ok(Step::Again);
        }
        let line = self.arena.list(list).first().map_or(0, |&n| self.arena.line(n));
        if !in_for {
            self.semicolon()?;
        }
        self.node = Some(self.arena.push(AstKind::VarDecl { kind, decls: list }, line));
        self.pop_state()
    }

    fn state_for_init(&mut self) -> Result<Step, JsError> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::Semicolon => {
                self.advance()?;
                self.state = State::ForCond { init: None };
            }
            TokenKind::Var | TokenKind::Let | TokenKind::Const => {
                self.advance()?;
                let kind = decl_kind_for(token.kind);
                let list = self.arena.new_list();
                self.push(State::ForAfterInitVar, false);
                self.state = State::VarDeclNext { kind, list, in_for: true };
            }
            _ => {
                self.push(State::ForAfterInitExpr, false);
                self.state = State::Expr { no_in: true };
            }
        }
        Ok(Step::Again)
    }

    fn state_switch_case_list(&mut self, discriminant: NodeId, cases: ListId) -> Result<Step, JsError> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::Case => {
                self.advance()?;
                self.push(State::SwitchCaseTest { discriminant, cases }, false);
                self.state = State::Expr { no_in: false };
            }
            TokenKind::Default => {
                if self
                    .arena
                    .list(cases)
                    .iter()
                    .any(|&c| matches!(self.arena.kind(c), AstKind::Case { test: None, .. }))
                {
                    return Err(JsError::syntax("duplicate default clause in switch", token.line));
                }
                self.advance()?;
                self.expect(TokenKind::Colon)?;
                let body = self.arena.new_list();
                self.state = State::SwitchCaseBody {
                    discriminant,
                    cases,
                    test: None,
                    body,
                };
            }
            TokenKind::RBrace => {
                self.advance()?;
                self.node = Some(self.arena.push(AstKind::Switch { discriminant, cases }, token.line));
                return self.pop_state();
            }
            _ => {
                return Err(self.unexpected(token));
            }
        }
        Ok(Step::Again)
    }

    fn state_try_after_block(&mut self) -> Result<Step, JsError> {
        let block = self.take_node()?;
        let token = self.peek()?;
        match token.kind {
            TokenKind::Catch => {
                self.advance()?;
                let outer = self.current_scope;
                let scope = self
                    .scopes
                    .push(outer, ScopeKind::Catch, false)
                    .map_err(|e| e.with_line(token.line))?;
                let param = if self.eat(TokenKind::LParen)?.is_some() {
                    let name = self.expect(TokenKind::Name)?;
                    self.scopes
                        .declare(scope, name.sid, DeclKind::Catch, name.line)
                        .map_err(|e| e.with_line(name.line))?;
                    self.current_scope = scope;
                    let ident = self.ident_node(name.sid, name.line);
                    self.current_scope = outer;
                    self.expect(TokenKind::RParen)?;
                    Some(ident)
                } else {
                    None
                };
                self.expect(TokenKind::LBrace)?;
                self.current_scope = scope;
                let list = self.arena.new_list();
                self.push(State::TryAfterCatch { block, param, outer }, false);
                self.state = State::StmtList {
                    list,
                    end: TokenKind::RBrace,
                };
            }
            TokenKind::Finally => {
                self.advance()?;
                self.expect_peek(TokenKind::LBrace)?;
                self.push(State::TryFinallyFinish { block, catch: None }, false);
                self.state = State::Stmt;
            }
            _ => {
                return Err(JsError::syntax("missing catch or finally after try", token.line));
            }
        }
        Ok(Step::Again)
    }

    // ----- functions and imports -----

    /// Parses a function declaration after the consumed `function` keyword,
    /// declaring and hoisting the binding.
    fn parse_function_declaration(&mut self, line: u32) -> Result<(), JsError> {
        if self.peek()?.kind == TokenKind::Star {
            return Err(JsError::syntax("Not supported in this version", line));
        }
        let name = self.expect(TokenKind::Name)?;
        self.scopes
            .declare(self.current_scope, name.sid, DeclKind::Function, name.line)
            .map_err(|e| e.with_line(name.line))?;
        let func = self.begin_function(name.sid, line, false)?;
        self.scopes.record_hoisted_fn(self.current_scope, name.sid, func);
        Ok(())
    }

    /// Parses the parameter list and pushes the body states for a function
    /// (declaration or expression). Returns the new function's id; the
    /// body completes through `FunctionBodyFinish`.
    fn begin_function(&mut self, name: StringId, line: u32, _is_expr: bool) -> Result<FunctionId, JsError> {
        let outer = self.current_scope;
        let scope = self
            .scopes
            .push(outer, ScopeKind::Function, false)
            .map_err(|e| e.with_line(line))?;
        self.expect(TokenKind::LParen)?;
        let mut param_count = 0u32;
        if self.eat(TokenKind::RParen)?.is_none() {
            loop {
                let param = self.expect(TokenKind::Name)?;
                self.scopes
                    .declare(scope, param.sid, DeclKind::Argument, param.line)
                    .map_err(|e| e.with_line(param.line))?;
                param_count += 1;
                if self.eat(TokenKind::Comma)?.is_none() {
                    self.expect(TokenKind::RParen)?;
                    break;
                }
            }
        }
        self.expect(TokenKind::LBrace)?;
        let func = FunctionId::new(u32::try_from(self.funcs.len()).expect("function table exceeds u32"));
        self.funcs.push(FuncDef {
            name,
            param_count,
            body: None,
            scope,
            is_arrow: false,
            is_module: false,
            line,
        });
        self.current_scope = scope;
        let list = self.arena.new_list();
        self.push(State::FunctionBodyFinish { func, outer }, false);
        self.state = State::StmtList {
            list,
            end: TokenKind::RBrace,
        };
        Ok(func)
    }

    /// `import name from 'path'`: resolve, compile the module in place, and
    /// bind its memoized result.
    fn parse_import(&mut self, line: u32) -> Result<Step, JsError> {
        let name = self.expect(TokenKind::Name)?;
        let from = self.expect(TokenKind::Name)?;
        if self.interns().get(from.sid) != "from" {
            return Err(self.unexpected(from));
        }
        let path_token = self.peek()?;
        if !matches!(path_token.kind, TokenKind::String | TokenKind::EscapeString) {
            return Err(self.unexpected(path_token));
        }
        self.advance()?;
        let path_sid = self.string_value(path_token)?;
        let specifier = self.interns().get(path_sid).to_owned();

        let func = self.load_module(&specifier, line)?;

        self.scopes
            .declare(self.current_scope, name.sid, DeclKind::Shim, name.line)
            .map_err(|e| e.with_line(name.line))?;
        let target = self.ident_node(name.sid, name.line);
        self.semicolon()?;
        self.node = Some(self.arena.push(AstKind::ImportDecl { target, func }, line));
        self.pop_state()
    }

    /// Compiles a module into its own function-scope lambda, reusing the
    /// registry entry when the path was already seen (including the
    /// in-progress entry that breaks import cycles).
    fn load_module(&mut self, specifier: &str, line: u32) -> Result<FunctionId, JsError> {
        let Some(loader) = self.loader.clone() else {
            return Err(JsError::syntax("imports are not enabled", line));
        };
        let (key, source) = loader.load(specifier).map_err(|msg| JsError::syntax(msg, line))?;
        if let Some(&func) = self.modules.get(&key) {
            return Ok(func);
        }

        let scope = self
            .scopes
            .push(ScopeId::GLOBAL, ScopeKind::Function, false)
            .map_err(|e| e.with_line(line))?;
        let func = FunctionId::new(u32::try_from(self.funcs.len()).expect("function table exceeds u32"));
        self.funcs.push(FuncDef {
            name: StaticStrings::Module.id(),
            param_count: 0,
            body: None,
            scope,
            is_arrow: false,
            is_module: true,
            line: 1,
        });
        self.modules.insert(key, func);

        // Run a nested parse over the module source with a fresh driver but
        // shared arena, scope tree, and intern table.
        let mut saved_lexer = std::mem::replace(&mut self.lexer, Lexer::new(source, Interns::default()));
        self.lexer.interns = std::mem::take(&mut saved_lexer.interns);
        let saved_state = self.state;
        let saved_stack = std::mem::take(&mut self.stack);
        let saved_node = self.node.take();
        let saved_scope = self.current_scope;
        let saved_is_module = self.is_module;
        let saved_has_default = self.module_has_default;

        self.current_scope = scope;
        self.is_module = true;
        self.module_has_default = false;
        let list = self.arena.new_list();
        self.state = State::StmtList {
            list,
            end: TokenKind::End,
        };
        let result = self.drive();
        let body = self.node.take();

        // Restore the outer parse, moving the interns back to its lexer.
        saved_lexer.interns = std::mem::take(&mut self.lexer.interns);
        self.lexer = saved_lexer;
        self.state = saved_state;
        self.stack = saved_stack;
        self.node = saved_node;
        self.current_scope = saved_scope;
        self.is_module = saved_is_module;
        self.module_has_default = saved_has_default;

        result?;
        self.funcs[func.index()].body = body;
        Ok(func)
    }

    // ----- shared helpers -----

    fn push(&mut self, state: State, optional: bool) {
        self.stack.push(StackEntry { state, optional });
    }

    /// Restores the continuation after a production completed.
    fn pop_state(&mut self) -> Result<Step, JsError> {
        match self.stack.pop() {
            Some(entry) => {
                self.state = entry.state;
                Ok(Step::Again)
            }
            None => Ok(Step::Done),
        }
    }

    /// Takes the node produced by the state that just completed.
    fn take_node(&mut self) -> Result<NodeId, JsError> {
        self.node
            .take()
            .ok_or_else(|| JsError::internal("parser continuation without a node"))
    }

    fn peek(&mut self) -> Result<Token, JsError> {
        self.lexer.peek(0)
    }

    fn advance(&mut self) -> Result<Token, JsError> {
        self.lexer.next()
    }

    /// Consumes the next token, requiring the given kind.
    fn expect(&mut self, kind: TokenKind) -> Result<Token, JsError> {
        let token = self.advance()?;
        if token.kind == kind {
            Ok(token)
        } else {
            Err(self.unexpected(token))
        }
    }

    /// Requires the next token kind without consuming it.
    fn expect_peek(&mut self, kind: TokenKind) -> Result<Token, JsError> {
        let token = self.peek()?;
        if token.kind == kind { Ok(token) } else { Err(self.unexpected(token)) }
    }

    /// Consumes the next token if it matches.
    fn eat(&mut self, kind: TokenKind) -> Result<Option<Token>, JsError> {
        if self.peek()?.kind == kind {
            Ok(Some(self.advance()?))
        } else {
            Ok(None)
        }
    }

    fn unexpected(&mut self, token: Token) -> JsError {
        if token.kind == TokenKind::End {
            JsError::syntax("unexpected end of input", token.line)
        } else {
            let text = self.lexer.slice(token.start, token.end).to_owned();
            JsError::syntax(format!("unexpected token \"{text}\""), token.line)
        }
    }

    /// Automatic semicolon insertion: a real `;`, a closing brace or end of
    /// input, or a preceding line terminator (unless strict-semicolon mode
    /// is on) all terminate the statement.
    fn semicolon(&mut self) -> Result<(), JsError> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::Semicolon => {
                self.advance()?;
                Ok(())
            }
            TokenKind::RBrace | TokenKind::End => Ok(()),
            _ if token.newline_before && !self.strict_semicolon => Ok(()),
            _ => Err(self.unexpected(token)),
        }
    }

    /// Break/continue label: a name on the same line.
    fn optional_label(&mut self) -> Result<Option<StringId>, JsError> {
        let token = self.peek()?;
        if token.kind == TokenKind::Name && !token.newline_before {
            self.advance()?;
            Ok(Some(token.sid))
        } else {
            Ok(None)
        }
    }

    /// Creates an identifier node, recording the pending reference.
    fn ident_node(&mut self, name: StringId, line: u32) -> NodeId {
        let ref_id = self.scopes.reference(self.current_scope, name);
        self.arena.push(AstKind::Ident { name, ref_id }, line)
    }

    /// The decoded string id of a String/EscapeString token.
    fn string_value(&mut self, token: Token) -> Result<StringId, JsError> {
        if token.kind == TokenKind::String {
            return Ok(token.sid);
        }
        let raw = self.interns().get(token.sid).to_owned();
        let decoded = lexer::decode_escapes(&raw, token.line)?;
        Ok(self.lexer.interns.intern(&decoded))
    }

    /// Assignment targets are identifiers or member expressions, looking
    /// through parentheses.
    fn check_assign_target(&self, node: NodeId) -> Result<(), JsError> {
        let mut cursor = node;
        loop {
            match self.arena.kind(cursor) {
                AstKind::Paren(inner) => cursor = *inner,
                AstKind::Ident { .. } | AstKind::Member { .. } => return Ok(()),
                _ => {
                    return Err(JsError::syntax(
                        "invalid left-hand side in assignment",
                        self.arena.line(node),
                    ));
                }
            }
        }
    }
}

fn decl_kind_for(kind: TokenKind) -> DeclKind {
    match kind {
        TokenKind::Let => DeclKind::Let,
        TokenKind::Const => DeclKind::Const,
        _ => DeclKind::Var,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<Parser, JsError> {
        let mut parser = Parser::new(source.to_owned(), None, false, false);
        parser.parse()?;
        Ok(parser)
    }

    fn parse_err(source: &str) -> JsError {
        parse(source).expect_err("expected a syntax error")
    }

    #[test]
    fn statements_parse() {
        let parser = parse(
            "var a = 1, b;\n\
             function f(x) { if (x > 0) { return x; } else return -x; }\n\
             for (var i = 0; i < 3; i++) a += i;\n\
             for (var k in { x: 1 }) b = k;\n\
             try { throw a; } catch (e) { b = e; } finally { a = 0; }\n\
             switch (a) { case 1: break; default: b = 2; }\n\
             do { a--; } while (a > 0);\n\
             outer: while (true) { break outer; }",
        )
        .unwrap();
        assert!(parser.funcs[0].body.is_some());
        assert_eq!(parser.funcs.len(), 2, "one collected function plus main");
    }

    #[test]
    fn expressions_parse() {
        assert!(parse("x = a ?? b || c && d | e ^ f & g == h < i << j + k * l ** m").is_ok());
        assert!(parse("o = { a: 1, 'b': 2, 3: 4, [k]: 5, m() { return 1 }, get g() { return 2 }, s }").is_ok());
        assert!(parse("a = [1, , 2, ]; t = `x${1 + 2}y`; r = /ab+c/gi; n = new F(1)(2).m[3]").is_ok());
        assert!(parse("f = x => x + 1; g = (a, b) => { return a + b }; h = () => 0").is_ok());
        assert!(parse("v = a ? b : c, w = (p, q)").is_ok());
        assert!(parse("u = a?.b?.[0]?.()").is_ok());
    }

    #[test]
    fn asi_accepts_newline_and_brace() {
        assert!(parse("a = 1\nb = 2").is_ok());
        assert!(parse("function f() { return 1 }").is_ok());
        assert!(parse("a = 1 b = 2").is_err());
    }

    #[test]
    fn strict_semicolon_mode_rejects_asi() {
        let mut parser = Parser::new("a = 1\nb = 2".to_owned(), None, false, true);
        assert!(parser.parse().is_err());
    }

    #[test]
    fn restricted_productions() {
        // The returned expression stays behind; `1` becomes its own statement.
        assert!(parse("function f() { return\n1 }").is_ok());
        // A newline forbids attaching the postfix update.
        assert!(parse("a = b\n++c").is_ok());
        let err = parse_err("function f() { throw\n1 }");
        assert!(err.message.contains("newline after throw"), "{}", err.message);
    }

    #[test]
    fn duplicate_proto_key_rejected() {
        let err = parse_err("o = { __proto__: a, __proto__: b }");
        assert!(err.message.contains("__proto__"), "{}", err.message);
        assert!(parse("o = { __proto__: a, ['__proto__']: b }").is_ok(), "computed keys are exempt");
    }

    #[test]
    fn exponent_unary_lhs_rejected() {
        assert!(parse("x = -a ** 2").is_err());
        assert!(parse("x = (-a) ** 2").is_ok());
        assert!(parse("x = a ** -b").is_ok());
    }

    #[test]
    fn unsupported_constructs_reject_uniformly() {
        for source in [
            "class A {}",
            "function* g() {}",
            "with (o) { a = 1 }",
            "var [a, b] = c;",
            "f(...args)",
            "new.target",
        ] {
            let err = parse_err(source);
            assert!(
                err.message.contains("Not supported in this version"),
                "{source}: {}",
                err.message
            );
        }
    }

    #[test]
    fn deep_nesting_is_bounded() {
        // 20 nested functions exceed the nesting limit without touching
        // the host stack.
        let mut source = String::new();
        for _ in 0..20 {
            source.push_str("function f() { ");
        }
        source.push_str("var x;");
        for _ in 0..20 {
            source.push_str(" }");
        }
        let err = parse_err(&source);
        assert!(err.message.contains("nesting"), "{}", err.message);
    }

    #[test]
    fn accumulative_resume_extends_program() {
        let mut parser = Parser::new("var a = 1;".to_owned(), None, false, false);
        parser.parse().unwrap();
        let after_first = parser.arena.len();
        parser.parse_more("var b = a + 1;").unwrap();
        assert!(parser.arena.len() > after_first);

        // The accumulated program parses to the same statement list as the
        // concatenated source, statement for statement.
        let whole = parse("var a = 1;var b = a + 1;").unwrap();
        let split_body = match parser.arena.kind(parser.funcs[0].body.unwrap()) {
            AstKind::Block { body, .. } => parser.arena.list(*body).len(),
            _ => panic!("program root is a block"),
        };
        let whole_body = match whole.arena.kind(whole.funcs[0].body.unwrap()) {
            AstKind::Block { body, .. } => whole.arena.list(*body).len(),
            _ => panic!("program root is a block"),
        };
        assert_eq!(split_body, whole_body);
    }

    #[test]
    fn export_requires_module() {
        assert!(parse("export default 1").is_err());
        let mut parser = Parser::new("export default 40 + 2".to_owned(), None, true, false);
        assert!(parser.parse().is_ok());
    }
}
