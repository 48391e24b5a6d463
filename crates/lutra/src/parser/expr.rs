//! Expression grammar states.
//!
//! Binary operators are parsed through a precedence ladder driven by a
//! per-level operator table: `BinaryLevel` descends, `BinaryLoop` folds
//! left-associatively at its level, and exponentiation recurses at its own
//! level for right associativity. Everything else — conditionals,
//! assignments, unary chains, the member/call loop, literals, arrows,
//! templates — is its own continuation state.

use crate::{
    ast::{AstKind, BinOp, ListId, NodeId, PropKind, UnOp},
    error::JsError,
    intern::{StaticStrings, StringId},
    lexer::{Token, TokenKind},
    scope::{DeclKind, ScopeKind},
    types::{regexp::RegexpFlags, FunctionId},
};

use super::{FuncDef, Parser, RegexpLit, State, Step};

/// Precedence level in the binary ladder; lower binds looser.
pub(crate) type BinOpLevel = u8;

pub(super) const LEVEL_COALESCE: BinOpLevel = 0;
const LEVEL_EXPONENT: BinOpLevel = 11;
const LEVEL_RELATIONAL: BinOpLevel = 7;

/// Operator table for one precedence level.
fn ops_at(level: BinOpLevel) -> &'static [(TokenKind, BinOp)] {
    use TokenKind as T;
    match level {
        LEVEL_COALESCE => &[(T::Coalesce, BinOp::Coalesce)],
        1 => &[(T::Or, BinOp::Or)],
        2 => &[(T::And, BinOp::And)],
        3 => &[(T::BitOr, BinOp::BitOr)],
        4 => &[(T::BitXor, BinOp::BitXor)],
        5 => &[(T::BitAnd, BinOp::BitAnd)],
        6 => &[
            (T::StrictEq, BinOp::StrictEq),
            (T::StrictNeq, BinOp::StrictNeq),
            (T::Eq, BinOp::Eq),
            (T::Neq, BinOp::Neq),
        ],
        LEVEL_RELATIONAL => &[
            (T::Le, BinOp::Lte),
            (T::Ge, BinOp::Gte),
            (T::Lt, BinOp::Lt),
            (T::Gt, BinOp::Gt),
            (T::Instanceof, BinOp::InstanceOf),
            (T::In, BinOp::In),
        ],
        8 => &[(T::Shl, BinOp::Shl), (T::Ushr, BinOp::Ushr), (T::Shr, BinOp::Shr)],
        9 => &[(T::Plus, BinOp::Add), (T::Minus, BinOp::Sub)],
        10 => &[(T::Star, BinOp::Mul), (T::Slash, BinOp::Div), (T::Percent, BinOp::Rem)],
        LEVEL_EXPONENT => &[(T::StarStar, BinOp::Exp)],
        _ => &[],
    }
}

/// Compound-assignment operator mapping; None is plain `=`.
fn assign_op(kind: TokenKind) -> Option<Option<BinOp>> {
    use TokenKind as T;
    Some(match kind {
        T::Assign => None,
        T::AddAssign => Some(BinOp::Add),
        T::SubAssign => Some(BinOp::Sub),
        T::MulAssign => Some(BinOp::Mul),
        T::DivAssign => Some(BinOp::Div),
        T::RemAssign => Some(BinOp::Rem),
        T::ExpAssign => Some(BinOp::Exp),
        T::ShlAssign => Some(BinOp::Shl),
        T::ShrAssign => Some(BinOp::Shr),
        T::UshrAssign => Some(BinOp::Ushr),
        T::BitAndAssign => Some(BinOp::BitAnd),
        T::BitXorAssign => Some(BinOp::BitXor),
        T::BitOrAssign => Some(BinOp::BitOr),
        _ => return None,
    })
}

impl Parser {
    /// Dispatches the expression-machinery states.
    pub(super) fn step_expr(&mut self, state: State) -> Result<Step, JsError> {
        match state {
            State::Expr { no_in } => {
                self.push(State::ExprCommaLoop { no_in }, false);
                self.state = State::AssignExpr { no_in };
                Ok(Step::Again)
            }
            State::ExprCommaLoop { no_in } => {
                if self.peek()?.kind == TokenKind::Comma {
                    self.advance()?;
                    let left = self.take_node()?;
                    self.push(State::ExprCommaRhs { no_in, left }, false);
                    self.state = State::AssignExpr { no_in };
                    Ok(Step::Again)
                } else {
                    self.pop_state()
                }
            }
            State::ExprCommaRhs { no_in, left } => {
                let right = self.take_node()?;
                let line = self.arena.line(left);
                self.node = Some(self.arena.push(
                    AstKind::Binary {
                        op: BinOp::Comma,
                        left,
                        right,
                    },
                    line,
                ));
                self.state = State::ExprCommaLoop { no_in };
                Ok(Step::Again)
            }
            State::AssignExpr { no_in } => {
                self.push(State::AssignAfterLhs { no_in }, false);
                self.push(State::CondAfterTest { no_in }, false);
                self.state = State::BinaryLevel {
                    level: LEVEL_COALESCE,
                    no_in,
                };
                Ok(Step::Again)
            }
            State::AssignAfterLhs { no_in } => {
                let token = self.peek()?;
                if let Some(op) = assign_op(token.kind) {
                    let left = self.take_node()?;
                    self.check_assign_target(left)?;
                    self.advance()?;
                    self.push(State::AssignFinish { op, left }, false);
                    self.state = State::AssignExpr { no_in };
                    Ok(Step::Again)
                } else {
                    self.pop_state()
                }
            }
            State::AssignFinish { op, left } => {
                let value = self.take_node()?;
                let line = self.arena.line(left);
                self.node = Some(self.arena.push(AstKind::Assign { op, target: left, value }, line));
                self.pop_state()
            }
            State::CondAfterTest { no_in } => {
                if self.peek()?.kind == TokenKind::Conditional {
                    self.advance()?;
                    let cond = self.take_node()?;
                    self.push(State::CondAfterThen { cond, no_in }, false);
                    self.state = State::AssignExpr { no_in: false };
                    Ok(Step::Again)
                } else {
                    self.pop_state()
                }
            }
            State::CondAfterThen { cond, no_in } => {
                let then = self.take_node()?;
                self.expect(TokenKind::Colon)?;
                self.push(State::CondFinish { cond, then }, false);
                self.state = State::AssignExpr { no_in };
                Ok(Step::Again)
            }
            State::CondFinish { cond, then } => {
                let otherwise = self.take_node()?;
                let line = self.arena.line(cond);
                self.node = Some(self.arena.push(AstKind::Cond { cond, then, otherwise }, line));
                self.pop_state()
            }
            State::BinaryLevel { level, no_in } => {
                self.push(State::BinaryLoop { level, no_in }, false);
                self.state = if level == LEVEL_EXPONENT {
                    State::UnaryExpr
                } else {
                    State::BinaryLevel { level: level + 1, no_in }
                };
                Ok(Step::Again)
            }
            State::BinaryLoop { level, no_in } => self.state_binary_loop(level, no_in),
            State::BinaryRhs { level, no_in, op, left } => {
                let right = self.take_node()?;
                let line = self.arena.line(left);
                self.node = Some(self.arena.push(AstKind::Binary { op, left, right }, line));
                self.state = State::BinaryLoop { level, no_in };
                Ok(Step::Again)
            }
            State::UnaryExpr => self.state_unary(),
            State::UnaryFinish { op } => {
                let operand = self.take_node()?;
                let line = self.arena.line(operand);
                self.node = Some(self.arena.push(AstKind::Unary { op, operand }, line));
                self.pop_state()
            }
            State::PrefixUpdateFinish { inc } => {
                let target = self.take_node()?;
                self.check_assign_target(target)?;
                let line = self.arena.line(target);
                self.node = Some(self.arena.push(
                    AstKind::Update {
                        inc,
                        prefix: true,
                        target,
                    },
                    line,
                ));
                self.pop_state()
            }
            State::PostfixExpr => {
                self.push(State::PostfixCheck, true);
                self.state = State::LhsExpr { allow_call: true };
                Ok(Step::Again)
            }
            State::PostfixCheck => {
                let token = self.peek()?;
                // `a [newline] ++` never attaches the update to `a`.
                if matches!(token.kind, TokenKind::Inc | TokenKind::Dec) && !token.newline_before {
                    self.advance()?;
                    let target = self.take_node()?;
                    self.check_assign_target(target)?;
                    let line = self.arena.line(target);
                    self.node = Some(self.arena.push(
                        AstKind::Update {
                            inc: token.kind == TokenKind::Inc,
                            prefix: false,
                            target,
                        },
                        line,
                    ));
                    self.pop_state()
                } else {
                    Ok(Step::Declined)
                }
            }
            State::LhsExpr { allow_call } => {
                let token = self.peek()?;
                if token.kind == TokenKind::New {
                    if self.lexer.peek(1)?.kind == TokenKind::Dot {
                        return Err(JsError::syntax("Not supported in this version", token.line));
                    }
                    self.advance()?;
                    self.push(State::NewAfterCallee, false);
                    self.state = State::LhsExpr { allow_call: false };
                } else {
                    self.push(State::CallLoop { allow_call }, false);
                    self.state = State::Primary;
                }
                Ok(Step::Again)
            }
            State::NewAfterCallee => {
                let callee = self.take_node()?;
                let line = self.arena.line(callee);
                if self.peek()?.kind == TokenKind::LParen {
                    self.advance()?;
                    let list = self.arena.new_list();
                    self.state = State::CallArgs {
                        callee,
                        list,
                        is_new: true,
                        optional: false,
                    };
                } else {
                    let args = self.arena.new_list();
                    self.node = Some(self.arena.push(AstKind::NewExpr { callee, args }, line));
                    self.state = State::CallLoop { allow_call: true };
                }
                Ok(Step::Again)
            }
            State::CallLoop { allow_call } => self.state_call_loop(allow_call),
            State::MemberIndexFinish { obj, allow_call, optional } => {
                let prop = self.take_node()?;
                self.expect(TokenKind::RBracket)?;
                let line = self.arena.line(obj);
                self.node = Some(self.arena.push(
                    AstKind::Member {
                        obj,
                        prop,
                        computed: true,
                        optional,
                    },
                    line,
                ));
                self.state = State::CallLoop { allow_call };
                Ok(Step::Again)
            }
            State::CallArgs {
                callee,
                list,
                is_new,
                optional,
            } => {
                let token = self.peek()?;
                if token.kind == TokenKind::RParen {
                    self.advance()?;
                    self.finish_call(callee, list, is_new, optional);
                    return Ok(Step::Again);
                }
                if token.kind == TokenKind::Ellipsis {
                    return Err(JsError::syntax("Not supported in this version", token.line));
                }
                self.push(
                    State::CallArgsCollect {
                        callee,
                        list,
                        is_new,
                        optional,
                    },
                    false,
                );
                self.state = State::AssignExpr { no_in: false };
                Ok(Step::Again)
            }
            State::CallArgsCollect {
                callee,
                list,
                is_new,
                optional,
            } => {
                let arg = self.take_node()?;
                self.arena.list_push(list, arg);
                let token = self.peek()?;
                match token.kind {
                    TokenKind::Comma => {
                        self.advance()?;
                        self.state = State::CallArgs {
                            callee,
                            list,
                            is_new,
                            optional,
                        };
                        Ok(Step::Again)
                    }
                    TokenKind::RParen => {
                        self.advance()?;
                        self.finish_call(callee, list, is_new, optional);
                        Ok(Step::Again)
                    }
                    _ => Err(self.unexpected(token)),
                }
            }
            State::Primary => self.state_primary(),
            State::ParenFinish => {
                let inner = self.take_node()?;
                self.expect(TokenKind::RParen)?;
                let line = self.arena.line(inner);
                self.node = Some(self.arena.push(AstKind::Paren(inner), line));
                self.pop_state()
            }
            State::ArrayLit { list } => {
                let token = self.peek()?;
                match token.kind {
                    TokenKind::RBracket => {
                        self.advance()?;
                        self.node = Some(self.arena.push(AstKind::Array(list), token.line));
                        self.pop_state()
                    }
                    TokenKind::Comma => {
                        self.advance()?;
                        let hole = self.arena.push(AstKind::Elision, token.line);
                        self.arena.list_push(list, hole);
                        Ok(Step::Again)
                    }
                    _ => {
                        self.push(State::ArrayLitCollect { list }, false);
                        self.state = State::AssignExpr { no_in: false };
                        Ok(Step::Again)
                    }
                }
            }
            State::ArrayLitCollect { list } => {
                let element = self.take_node()?;
                self.arena.list_push(list, element);
                let token = self.peek()?;
                match token.kind {
                    TokenKind::Comma => {
                        self.advance()?;
                        self.state = State::ArrayLit { list };
                        Ok(Step::Again)
                    }
                    TokenKind::RBracket => {
                        self.advance()?;
                        self.node = Some(self.arena.push(AstKind::Array(list), token.line));
                        self.pop_state()
                    }
                    _ => Err(self.unexpected(token)),
                }
            }
            State::ObjectLit { list, has_proto } => {
                let token = self.peek()?;
                if token.kind == TokenKind::RBrace {
                    self.advance()?;
                    self.node = Some(self.arena.push(AstKind::Object(list), token.line));
                    return self.pop_state();
                }
                self.parse_object_member(list, has_proto)
            }
            State::ObjectComputedKey { list, has_proto } => {
                let key = self.take_node()?;
                self.expect(TokenKind::RBracket)?;
                self.expect(TokenKind::Colon)?;
                self.push(
                    State::ObjectValueFinish {
                        list,
                        key,
                        computed: true,
                        has_proto,
                    },
                    false,
                );
                self.state = State::AssignExpr { no_in: false };
                Ok(Step::Again)
            }
            State::ObjectValueFinish {
                list,
                key,
                computed,
                has_proto,
            } => {
                let value = self.take_node()?;
                let line = self.arena.line(key);
                let prop = self.arena.push(
                    AstKind::Prop {
                        key,
                        value,
                        kind: PropKind::Init,
                        computed,
                    },
                    line,
                );
                self.arena.list_push(list, prop);
                self.object_member_end(list, has_proto)
            }
            State::ObjectAccessorFinish {
                list,
                key,
                prop_kind,
                has_proto,
            } => {
                let value = self.take_node()?;
                let line = self.arena.line(key);
                let prop = self.arena.push(
                    AstKind::Prop {
                        key,
                        value,
                        kind: prop_kind,
                        computed: false,
                    },
                    line,
                );
                self.arena.list_push(list, prop);
                self.object_member_end(list, has_proto)
            }
            State::TemplateCollect { list } => {
                let expr = self.take_node()?;
                self.arena.list_push(list, expr);
                self.expect(TokenKind::RBrace)?;
                self.template_continue(list)
            }
            State::FunctionBodyFinish { func, outer } => {
                let body = self.take_node()?;
                self.funcs[func.index()].body = Some(body);
                self.current_scope = outer;
                let line = self.funcs[func.index()].line;
                self.node = Some(self.arena.push(AstKind::FunctionNode(func), line));
                self.pop_state()
            }
            State::ArrowExprFinish { func, outer } => {
                let expr = self.take_node()?;
                let line = self.arena.line(expr);
                let ret = self.arena.push(AstKind::Return(Some(expr)), line);
                let body_list = self.arena.new_list();
                self.arena.list_push(body_list, ret);
                let block = self.arena.push(
                    AstKind::Block {
                        body: body_list,
                        scope: self.current_scope,
                    },
                    line,
                );
                self.funcs[func.index()].body = Some(block);
                self.current_scope = outer;
                self.node = Some(self.arena.push(AstKind::FunctionNode(func), line));
                self.pop_state()
            }
            other => Err(JsError::internal(format!("unhandled parser state {other:?}"))),
        }
    }

    fn state_binary_loop(&mut self, level: BinOpLevel, no_in: bool) -> Result<Step, JsError> {
        let token = self.peek()?;
        let found = ops_at(level)
            .iter()
            .find(|(kind, _)| *kind == token.kind)
            .map(|&(_, op)| op);
        let Some(op) = found else {
            return self.pop_state();
        };
        if no_in && level == LEVEL_RELATIONAL && op == BinOp::In {
            return self.pop_state();
        }
        let left = self.take_node()?;
        if level == LEVEL_EXPONENT && matches!(self.arena.kind(left), AstKind::Unary { .. }) {
            return Err(JsError::syntax(
                "unparenthesized unary expression cannot be left-hand side of \"**\"",
                token.line,
            ));
        }
        self.advance()?;
        self.push(State::BinaryRhs { level, no_in, op, left }, false);
        // Exponentiation is right-associative: its right side re-enters the
        // same level. Everything else descends one level.
        self.state = if level == LEVEL_EXPONENT {
            State::BinaryLevel { level, no_in }
        } else {
            State::BinaryLevel { level: level + 1, no_in }
        };
        Ok(Step::Again)
    }

    fn state_unary(&mut self) -> Result<Step, JsError> {
        let token = self.peek()?;
        let op = match token.kind {
            TokenKind::Not => Some(UnOp::Not),
            TokenKind::BitNot => Some(UnOp::BitNot),
            TokenKind::Plus => Some(UnOp::Plus),
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Typeof => Some(UnOp::Typeof),
            TokenKind::Void => Some(UnOp::Void),
            TokenKind::Delete => Some(UnOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.advance()?;
            self.push(State::UnaryFinish { op }, false);
            self.state = State::UnaryExpr;
            return Ok(Step::Again);
        }
        if matches!(token.kind, TokenKind::Inc | TokenKind::Dec) {
            self.advance()?;
            self.push(
                State::PrefixUpdateFinish {
                    inc: token.kind == TokenKind::Inc,
                },
                false,
            );
            self.state = State::UnaryExpr;
            return Ok(Step::Again);
        }
        self.state = State::PostfixExpr;
        Ok(Step::Again)
    }

    fn state_call_loop(&mut self, allow_call: bool) -> Result<Step, JsError> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::Dot => {
                self.advance()?;
                let prop = self.member_name()?;
                let left = self.take_node()?;
                let line = self.arena.line(left);
                self.node = Some(self.arena.push(
                    AstKind::Member {
                        obj: left,
                        prop,
                        computed: false,
                        optional: false,
                    },
                    line,
                ));
                Ok(Step::Again)
            }
            TokenKind::LBracket => {
                self.advance()?;
                let obj = self.take_node()?;
                self.push(
                    State::MemberIndexFinish {
                        obj,
                        allow_call,
                        optional: false,
                    },
                    false,
                );
                self.state = State::Expr { no_in: false };
                Ok(Step::Again)
            }
            TokenKind::LParen if allow_call => {
                self.advance()?;
                let callee = self.take_node()?;
                let list = self.arena.new_list();
                self.state = State::CallArgs {
                    callee,
                    list,
                    is_new: false,
                    optional: false,
                };
                Ok(Step::Again)
            }
            TokenKind::OptionalChain => {
                self.advance()?;
                let next = self.peek()?;
                match next.kind {
                    TokenKind::LBracket => {
                        self.advance()?;
                        let obj = self.take_node()?;
                        self.push(
                            State::MemberIndexFinish {
                                obj,
                                allow_call,
                                optional: true,
                            },
                            false,
                        );
                        self.state = State::Expr { no_in: false };
                    }
                    TokenKind::LParen if allow_call => {
                        self.advance()?;
                        let callee = self.take_node()?;
                        let list = self.arena.new_list();
                        self.state = State::CallArgs {
                            callee,
                            list,
                            is_new: false,
                            optional: true,
                        };
                    }
                    _ => {
                        let prop = self.member_name()?;
                        let left = self.take_node()?;
                        let line = self.arena.line(left);
                        self.node = Some(self.arena.push(
                            AstKind::Member {
                                obj: left,
                                prop,
                                computed: false,
                                optional: true,
                            },
                            line,
                        ));
                    }
                }
                Ok(Step::Again)
            }
            TokenKind::Grave => Err(JsError::syntax("Not supported in this version", token.line)),
            _ => self.pop_state(),
        }
    }

    fn state_primary(&mut self) -> Result<Step, JsError> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::Number => {
                self.advance()?;
                self.node = Some(self.arena.push(AstKind::Number(token.num), token.line));
                self.pop_state()
            }
            TokenKind::String | TokenKind::EscapeString => {
                self.advance()?;
                let sid = self.string_value(token)?;
                self.node = Some(self.arena.push(AstKind::StringLit(sid), token.line));
                self.pop_state()
            }
            TokenKind::True | TokenKind::False => {
                self.advance()?;
                self.node = Some(
                    self.arena
                        .push(AstKind::Bool(token.kind == TokenKind::True), token.line),
                );
                self.pop_state()
            }
            TokenKind::Null => {
                self.advance()?;
                self.node = Some(self.arena.push(AstKind::Null, token.line));
                self.pop_state()
            }
            TokenKind::This => {
                self.advance()?;
                self.node = Some(self.arena.push(AstKind::This, token.line));
                self.pop_state()
            }
            TokenKind::Name => {
                if self.lexer.peek(1)?.kind == TokenKind::Arrow && !self.lexer.peek(1)?.newline_before {
                    return self.parse_arrow_single(token);
                }
                self.advance()?;
                let node = self.ident_node(token.sid, token.line);
                self.node = Some(node);
                self.pop_state()
            }
            // The lexer emitted a division token; at expression start it can
            // only be a regexp literal, so re-scan it as one.
            TokenKind::Slash | TokenKind::DivAssign => {
                let slash = self.advance()?;
                let regexp = self.lexer.relex_regexp(slash)?;
                let flags_text = self.interns().get(regexp.aux_sid).to_owned();
                RegexpFlags::parse(&flags_text, regexp.line)?;
                let index = u32::try_from(self.regexps.len()).expect("regexp table exceeds u32");
                self.regexps.push(RegexpLit {
                    pattern: regexp.sid,
                    flags: regexp.aux_sid,
                    line: regexp.line,
                });
                self.node = Some(self.arena.push(AstKind::Regexp(index), regexp.line));
                self.pop_state()
            }
            TokenKind::LParen => {
                if self.paren_starts_arrow()? {
                    return self.parse_arrow_parens(token);
                }
                self.advance()?;
                self.push(State::ParenFinish, false);
                self.state = State::Expr { no_in: false };
                Ok(Step::Again)
            }
            TokenKind::LBracket => {
                self.advance()?;
                let list = self.arena.new_list();
                self.state = State::ArrayLit { list };
                Ok(Step::Again)
            }
            TokenKind::LBrace => {
                self.advance()?;
                let list = self.arena.new_list();
                self.state = State::ObjectLit { list, has_proto: false };
                Ok(Step::Again)
            }
            TokenKind::Function => {
                self.advance()?;
                if self.peek()?.kind == TokenKind::Star {
                    return Err(JsError::syntax("Not supported in this version", token.line));
                }
                let name = if self.peek()?.kind == TokenKind::Name {
                    self.advance()?.sid
                } else {
                    StaticStrings::Anonymous.id()
                };
                self.begin_function(name, token.line, true)?;
                Ok(Step::Again)
            }
            TokenKind::Grave => {
                self.advance()?;
                let list = self.arena.new_list();
                self.template_continue(list)
            }
            TokenKind::Class | TokenKind::Super | TokenKind::Yield => {
                Err(JsError::syntax("Not supported in this version", token.line))
            }
            _ => Err(self.unexpected(token)),
        }
    }

    /// Finishes a call or `new` expression once the argument list closed.
    fn finish_call(&mut self, callee: NodeId, list: ListId, is_new: bool, optional: bool) {
        let line = self.arena.line(callee);
        let kind = if is_new {
            AstKind::NewExpr { callee, args: list }
        } else {
            AstKind::Call {
                callee,
                args: list,
                optional,
            }
        };
        self.node = Some(self.arena.push(kind, line));
        self.state = State::CallLoop { allow_call: true };
    }

    /// A property name after `.` — an identifier, or any keyword taken as
    /// its source text.
    fn member_name(&mut self) -> Result<NodeId, JsError> {
        let token = self.advance()?;
        let sid = match token.kind {
            TokenKind::Name => token.sid,
            kind if is_word_token(kind) => {
                let text = self.lexer.slice(token.start, token.end).to_owned();
                self.lexer.interns.intern(&text)
            }
            _ => return Err(self.unexpected(token)),
        };
        Ok(self.arena.push(AstKind::StringLit(sid), token.line))
    }

    /// Scans the template chunk after the opening back-tick or a closed
    /// substitution and either finishes the literal or parses the next
    /// substitution expression.
    fn template_continue(&mut self, list: ListId) -> Result<Step, JsError> {
        let chunk = self.lexer.template_chunk()?;
        let sid = self.lexer.interns.intern(&chunk.cooked);
        let piece = self.arena.push(AstKind::StringLit(sid), chunk.line);
        self.arena.list_push(list, piece);
        if chunk.substitution {
            self.push(State::TemplateCollect { list }, false);
            self.state = State::Expr { no_in: false };
            Ok(Step::Again)
        } else {
            self.node = Some(self.arena.push(AstKind::Template(list), chunk.line));
            self.pop_state()
        }
    }

    /// Looks ahead from an opening parenthesis for `) =>`, balancing nested
    /// parentheses through the lexer's token FIFO.
    fn paren_starts_arrow(&mut self) -> Result<bool, JsError> {
        let mut depth = 0usize;
        let mut k = 0usize;
        loop {
            let token = self.lexer.peek(k)?;
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(self.lexer.peek(k + 1)?.kind == TokenKind::Arrow);
                    }
                }
                TokenKind::End => return Ok(false),
                _ => {}
            }
            k += 1;
        }
    }

    /// `name => body`
    fn parse_arrow_single(&mut self, name: Token) -> Result<Step, JsError> {
        self.advance()?;
        self.expect(TokenKind::Arrow)?;
        self.begin_arrow(vec![name.sid], name.line)
    }

    /// `(a, b) => body`
    fn parse_arrow_parens(&mut self, open: Token) -> Result<Step, JsError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if self.eat(TokenKind::RParen)?.is_none() {
            loop {
                let param = self.expect(TokenKind::Name)?;
                params.push(param.sid);
                if self.eat(TokenKind::Comma)?.is_none() {
                    self.expect(TokenKind::RParen)?;
                    break;
                }
            }
        }
        self.expect(TokenKind::Arrow)?;
        self.begin_arrow(params, open.line)
    }

    fn begin_arrow(&mut self, params: Vec<StringId>, line: u32) -> Result<Step, JsError> {
        let outer = self.current_scope;
        let scope = self
            .scopes
            .push(outer, ScopeKind::Function, true)
            .map_err(|e| e.with_line(line))?;
        for &param in &params {
            self.scopes
                .declare(scope, param, DeclKind::Argument, line)
                .map_err(|e| e.with_line(line))?;
        }
        let func = FunctionId::new(u32::try_from(self.funcs.len()).expect("function table exceeds u32"));
        self.funcs.push(FuncDef {
            name: StaticStrings::Anonymous.id(),
            param_count: u32::try_from(params.len()).expect("parameter count exceeds u32"),
            body: None,
            scope,
            is_arrow: true,
            is_module: false,
            line,
        });
        self.current_scope = scope;
        if self.eat(TokenKind::LBrace)?.is_some() {
            let list = self.arena.new_list();
            self.push(State::FunctionBodyFinish { func, outer }, false);
            self.state = State::StmtList {
                list,
                end: TokenKind::RBrace,
            };
        } else {
            self.push(State::ArrowExprFinish { func, outer }, false);
            self.state = State::AssignExpr { no_in: false };
        }
        Ok(Step::Again)
    }

    /// One object-literal member: data property, shorthand, method,
    /// accessor, or computed key.
    fn parse_object_member(&mut self, list: ListId, has_proto: bool) -> Result<Step, JsError> {
        let token = self.peek()?;

        // Accessor: `get`/`set` followed by a property name.
        if token.kind == TokenKind::Name {
            let is_get = self.interns().get(token.sid) == "get";
            let is_set = !is_get && self.interns().get(token.sid) == "set";
            if (is_get || is_set)
                && !matches!(
                    self.lexer.peek(1)?.kind,
                    TokenKind::Colon | TokenKind::Comma | TokenKind::RBrace | TokenKind::LParen
                )
            {
                let prop_kind = if is_get { PropKind::Get } else { PropKind::Set };
                self.advance()?;
                return self.parse_object_accessor(list, prop_kind, has_proto);
            }
        }

        match token.kind {
            TokenKind::LBracket => {
                self.advance()?;
                self.push(State::ObjectComputedKey { list, has_proto }, false);
                self.state = State::AssignExpr { no_in: false };
                Ok(Step::Again)
            }
            TokenKind::Number => {
                self.advance()?;
                let key = self.arena.push(AstKind::Number(token.num), token.line);
                self.expect(TokenKind::Colon)?;
                self.push(
                    State::ObjectValueFinish {
                        list,
                        key,
                        computed: false,
                        has_proto,
                    },
                    false,
                );
                self.state = State::AssignExpr { no_in: false };
                Ok(Step::Again)
            }
            TokenKind::String | TokenKind::EscapeString => {
                self.advance()?;
                let sid = self.string_value(token)?;
                let key = self.arena.push(AstKind::StringLit(sid), token.line);
                let has_proto = self.check_proto_key(sid, has_proto, token.line)?;
                self.expect(TokenKind::Colon)?;
                self.push(
                    State::ObjectValueFinish {
                        list,
                        key,
                        computed: false,
                        has_proto,
                    },
                    false,
                );
                self.state = State::AssignExpr { no_in: false };
                Ok(Step::Again)
            }
            kind if kind == TokenKind::Name || is_word_token(kind) => {
                self.advance()?;
                let sid = if kind == TokenKind::Name {
                    token.sid
                } else {
                    let text = self.lexer.slice(token.start, token.end).to_owned();
                    self.lexer.interns.intern(&text)
                };
                let key = self.arena.push(AstKind::StringLit(sid), token.line);
                let next = self.peek()?;
                match next.kind {
                    TokenKind::LParen => {
                        // Method shorthand.
                        self.push(
                            State::ObjectAccessorFinish {
                                list,
                                key,
                                prop_kind: PropKind::Init,
                                has_proto,
                            },
                            false,
                        );
                        self.begin_function(sid, token.line, true)?;
                        Ok(Step::Again)
                    }
                    TokenKind::Colon => {
                        let has_proto = self.check_proto_key(sid, has_proto, token.line)?;
                        self.advance()?;
                        self.push(
                            State::ObjectValueFinish {
                                list,
                                key,
                                computed: false,
                                has_proto,
                            },
                            false,
                        );
                        self.state = State::AssignExpr { no_in: false };
                        Ok(Step::Again)
                    }
                    TokenKind::Comma | TokenKind::RBrace if kind == TokenKind::Name => {
                        // Shorthand property.
                        let value = self.ident_node(sid, token.line);
                        let prop = self.arena.push(
                            AstKind::Prop {
                                key,
                                value,
                                kind: PropKind::Init,
                                computed: false,
                            },
                            token.line,
                        );
                        self.arena.list_push(list, prop);
                        self.object_member_end(list, has_proto)
                    }
                    _ => Err(self.unexpected(next)),
                }
            }
            _ => Err(self.unexpected(token)),
        }
    }

    fn parse_object_accessor(&mut self, list: ListId, prop_kind: PropKind, has_proto: bool) -> Result<Step, JsError> {
        let token = self.advance()?;
        let key = match token.kind {
            TokenKind::Name => {
                let sid = token.sid;
                self.arena.push(AstKind::StringLit(sid), token.line)
            }
            TokenKind::String | TokenKind::EscapeString => {
                let sid = self.string_value(token)?;
                self.arena.push(AstKind::StringLit(sid), token.line)
            }
            TokenKind::Number => self.arena.push(AstKind::Number(token.num), token.line),
            kind if is_word_token(kind) => {
                let text = self.lexer.slice(token.start, token.end).to_owned();
                let sid = self.lexer.interns.intern(&text);
                self.arena.push(AstKind::StringLit(sid), token.line)
            }
            _ => return Err(self.unexpected(token)),
        };
        self.push(
            State::ObjectAccessorFinish {
                list,
                key,
                prop_kind,
                has_proto,
            },
            false,
        );
        let name = if prop_kind == PropKind::Get {
            StaticStrings::Get.id()
        } else {
            StaticStrings::Set.id()
        };
        self.begin_function(name, token.line, true)?;
        Ok(Step::Again)
    }

    /// After a property has been appended: `,` continues the literal, `}`
    /// closes it.
    fn object_member_end(&mut self, list: ListId, has_proto: bool) -> Result<Step, JsError> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::Comma => {
                self.advance()?;
                self.state = State::ObjectLit { list, has_proto };
                Ok(Step::Again)
            }
            TokenKind::RBrace => {
                self.advance()?;
                self.node = Some(self.arena.push(AstKind::Object(list), token.line));
                self.pop_state()
            }
            _ => Err(self.unexpected(token)),
        }
    }

    /// A second literal `__proto__:` key is a SyntaxError.
    fn check_proto_key(&mut self, sid: StringId, has_proto: bool, line: u32) -> Result<bool, JsError> {
        if self.interns().get(sid) == "__proto__" {
            if has_proto {
                return Err(JsError::syntax("duplicate __proto__ fields are not allowed", line));
            }
            return Ok(true);
        }
        Ok(has_proto)
    }
}

/// Keyword tokens usable as property names.
fn is_word_token(kind: TokenKind) -> bool {
    use TokenKind as T;
    matches!(
        kind,
        T::Var
            | T::Let
            | T::Const
            | T::Function
            | T::Return
            | T::If
            | T::Else
            | T::While
            | T::Do
            | T::For
            | T::Break
            | T::Continue
            | T::Switch
            | T::Case
            | T::Default
            | T::Try
            | T::Catch
            | T::Finally
            | T::Throw
            | T::New
            | T::Delete
            | T::Typeof
            | T::Instanceof
            | T::In
            | T::Void
            | T::This
            | T::Null
            | T::True
            | T::False
            | T::Import
            | T::Export
            | T::Class
            | T::Extends
            | T::Super
            | T::Static
            | T::Enum
            | T::With
            | T::Yield
            | T::Debugger
    )
}
