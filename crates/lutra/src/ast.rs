//! The syntax tree.
//!
//! Nodes are uniform: a tag with a small payload, child node ids, and a
//! source line, allocated in a flat arena. Node lists (statement bodies,
//! argument lists, literal elements) live in a side table so a node stays a
//! fixed-size record. The tree is consumed by the generator and dropped with
//! the parser arena.

use crate::{
    intern::StringId,
    scope::{DeclKind, RefId, ScopeId},
    types::FunctionId,
};

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a node list in the arena's side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListId(u32);

/// Binary operators, shared between the parser and the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Exp,
    Shl,
    Shr,
    Ushr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Neq,
    StrictEq,
    StrictNeq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    InstanceOf,
    And,
    Or,
    Coalesce,
    /// The comma operator: evaluate left for effect, yield right.
    Comma,
}

impl BinOp {
    /// Short-circuit operators evaluate their right side conditionally; the
    /// generator lowers them to jumps rather than a binary instruction.
    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Coalesce)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnOp {
    Neg,
    Plus,
    Not,
    BitNot,
    Typeof,
    Void,
    Delete,
}

/// Object-literal property flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PropKind {
    Init,
    Get,
    Set,
}

/// The node tag and payload.
#[derive(Debug, Clone)]
pub(crate) enum AstKind {
    // Expressions
    Number(f64),
    StringLit(StringId),
    /// Index into the parser's regexp-literal table.
    Regexp(u32),
    Bool(bool),
    Null,
    This,
    Ident {
        name: StringId,
        ref_id: RefId,
    },
    /// Parenthesized expression. Kept as a node because a handful of
    /// grammar restrictions (`-a ** b`, assignment targets) care whether
    /// the operand was parenthesized; the generator looks through it.
    Paren(NodeId),
    /// Elided array element.
    Elision,
    Array(ListId),
    Object(ListId),
    Prop {
        /// StringLit / Number key, or an arbitrary expression when computed.
        key: NodeId,
        value: NodeId,
        kind: PropKind,
        computed: bool,
    },
    /// Template literal: parts are StringLit and expression nodes in order.
    Template(ListId),
    Binary {
        op: BinOp,
        left: NodeId,
        right: NodeId,
    },
    Unary {
        op: UnOp,
        operand: NodeId,
    },
    Update {
        inc: bool,
        prefix: bool,
        target: NodeId,
    },
    Cond {
        cond: NodeId,
        then: NodeId,
        otherwise: NodeId,
    },
    Assign {
        /// None for plain `=`, the operator for compound assignment.
        op: Option<BinOp>,
        target: NodeId,
        value: NodeId,
    },
    Member {
        obj: NodeId,
        /// StringLit for `a.b`, any expression for `a[b]`.
        prop: NodeId,
        computed: bool,
        optional: bool,
    },
    Call {
        callee: NodeId,
        args: ListId,
        optional: bool,
    },
    NewExpr {
        callee: NodeId,
        args: ListId,
    },
    /// Function expression, declaration, or arrow; the payload indexes the
    /// parser's function table.
    FunctionNode(FunctionId),

    // Statements
    Block {
        body: ListId,
        scope: ScopeId,
    },
    VarDecl {
        kind: DeclKind,
        decls: ListId,
    },
    VarInit {
        target: NodeId,
        init: Option<NodeId>,
    },
    If {
        cond: NodeId,
        then: NodeId,
        otherwise: Option<NodeId>,
    },
    While {
        cond: NodeId,
        body: NodeId,
    },
    DoWhile {
        body: NodeId,
        cond: NodeId,
    },
    For {
        init: Option<NodeId>,
        cond: Option<NodeId>,
        update: Option<NodeId>,
        body: NodeId,
    },
    ForIn {
        /// Ident, Member, or a single-binding VarDecl.
        target: NodeId,
        object: NodeId,
        body: NodeId,
    },
    Switch {
        discriminant: NodeId,
        cases: ListId,
    },
    Case {
        /// None for `default:`.
        test: Option<NodeId>,
        body: ListId,
    },
    Break(Option<StringId>),
    Continue(Option<StringId>),
    Return(Option<NodeId>),
    Throw(NodeId),
    Try {
        block: NodeId,
        catch: Option<NodeId>,
        finally: Option<NodeId>,
    },
    CatchClause {
        /// The bound identifier, resolved in the catch scope.
        param: Option<NodeId>,
        body: NodeId,
    },
    Labelled {
        label: StringId,
        body: NodeId,
    },
    ExprStmt(NodeId),
    Empty,
    /// `import X from 'path'`: assign the module lambda's memoized result.
    ImportDecl {
        target: NodeId,
        func: FunctionId,
    },
    /// `export default expr` inside a module body.
    ExportDefault(NodeId),
}

#[derive(Debug, Clone)]
pub(crate) struct AstNode {
    pub kind: AstKind,
    pub line: u32,
}

/// Flat node storage plus the list side table.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    nodes: Vec<AstNode>,
    lists: Vec<Vec<NodeId>>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: AstKind, line: u32) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("AST arena exceeds u32"));
        self.nodes.push(AstNode { kind, line });
        id
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn kind(&self, id: NodeId) -> &AstKind {
        &self.nodes[id.index()].kind
    }

    #[inline]
    pub fn line(&self, id: NodeId) -> u32 {
        self.nodes[id.index()].line
    }

    pub fn new_list(&mut self) -> ListId {
        let id = ListId(u32::try_from(self.lists.len()).expect("AST list table exceeds u32"));
        self.lists.push(Vec::new());
        id
    }

    pub fn list_push(&mut self, list: ListId, node: NodeId) {
        self.lists[list.0 as usize].push(node);
    }

    #[inline]
    pub fn list(&self, list: ListId) -> &[NodeId] {
        &self.lists[list.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Structured dump for the `-a` CLI option, one node per line.
    pub fn dump(&self, root: NodeId, interns: &crate::intern::Interns, out: &mut String) {
        self.dump_node(root, interns, 0, out);
    }

    fn dump_node(&self, id: NodeId, interns: &crate::intern::Interns, depth: usize, out: &mut String) {
        use std::fmt::Write;
        let node = self.get(id);
        for _ in 0..depth {
            out.push_str("  ");
        }
        match &node.kind {
            AstKind::Number(n) => {
                let _ = writeln!(out, "Number {n}");
            }
            AstKind::StringLit(sid) => {
                let _ = writeln!(out, "String {:?}", interns.get(*sid));
            }
            AstKind::Ident { name, .. } => {
                let _ = writeln!(out, "Ident {}", interns.get(*name));
            }
            other => {
                let name: &str = ast_kind_name(other);
                let _ = writeln!(out, "{name}");
                for child in self.children_of(id) {
                    self.dump_node(child, interns, depth + 1, out);
                }
            }
        }
    }

    /// Children in evaluation order, for the AST dump.
    fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        use AstKind::*;
        match &self.get(id).kind {
            Paren(inner) => vec![*inner],
            Array(list) | Object(list) | Template(list) => self.list(*list).to_vec(),
            Prop { key, value, .. } => vec![*key, *value],
            Binary { left, right, .. } => vec![*left, *right],
            Unary { operand, .. } => vec![*operand],
            Update { target, .. } => vec![*target],
            Cond { cond, then, otherwise } => vec![*cond, *then, *otherwise],
            Assign { target, value, .. } => vec![*target, *value],
            Member { obj, prop, .. } => vec![*obj, *prop],
            Call { callee, args, .. } => {
                let mut children = vec![*callee];
                children.extend_from_slice(self.list(*args));
                children
            }
            NewExpr { callee, args } => {
                let mut children = vec![*callee];
                children.extend_from_slice(self.list(*args));
                children
            }
            Block { body, .. } => self.list(*body).to_vec(),
            VarDecl { decls, .. } => self.list(*decls).to_vec(),
            VarInit { target, init } => {
                let mut children = vec![*target];
                children.extend(init.iter().copied());
                children
            }
            If { cond, then, otherwise } => {
                let mut children = vec![*cond, *then];
                children.extend(otherwise.iter().copied());
                children
            }
            While { cond, body } => vec![*cond, *body],
            DoWhile { body, cond } => vec![*body, *cond],
            For { init, cond, update, body } => {
                let mut children = Vec::new();
                children.extend(init.iter().copied());
                children.extend(cond.iter().copied());
                children.extend(update.iter().copied());
                children.push(*body);
                children
            }
            ForIn { target, object, body } => vec![*target, *object, *body],
            Switch { discriminant, cases } => {
                let mut children = vec![*discriminant];
                children.extend_from_slice(self.list(*cases));
                children
            }
            Case { test, body } => {
                let mut children = Vec::new();
                children.extend(test.iter().copied());
                children.extend_from_slice(self.list(*body));
                children
            }
            Return(expr) => expr.iter().copied().collect(),
            Throw(expr) | ExprStmt(expr) | ExportDefault(expr) => vec![*expr],
            Try { block, catch, finally } => {
                let mut children = vec![*block];
                children.extend(catch.iter().copied());
                children.extend(finally.iter().copied());
                children
            }
            CatchClause { param, body } => {
                let mut children = Vec::new();
                children.extend(param.iter().copied());
                children.push(*body);
                children
            }
            Labelled { body, .. } => vec![*body],
            ImportDecl { target, .. } => vec![*target],
            _ => Vec::new(),
        }
    }
}

fn ast_kind_name(kind: &AstKind) -> &'static str {
    use AstKind::*;
    match kind {
        Number(_) => "Number",
        StringLit(_) => "String",
        Regexp(_) => "Regexp",
        Bool(_) => "Bool",
        Null => "Null",
        This => "This",
        Ident { .. } => "Ident",
        Paren(_) => "Paren",
        Elision => "Elision",
        Array(_) => "Array",
        Object(_) => "Object",
        Prop { .. } => "Prop",
        Template(_) => "Template",
        Binary { .. } => "Binary",
        Unary { .. } => "Unary",
        Update { .. } => "Update",
        Cond { .. } => "Cond",
        Assign { .. } => "Assign",
        Member { .. } => "Member",
        Call { .. } => "Call",
        NewExpr { .. } => "New",
        FunctionNode(_) => "Function",
        Block { .. } => "Block",
        VarDecl { .. } => "VarDecl",
        VarInit { .. } => "VarInit",
        If { .. } => "If",
        While { .. } => "While",
        DoWhile { .. } => "DoWhile",
        For { .. } => "For",
        ForIn { .. } => "ForIn",
        Switch { .. } => "Switch",
        Case { .. } => "Case",
        Break(_) => "Break",
        Continue(_) => "Continue",
        Return(_) => "Return",
        Throw(_) => "Throw",
        Try { .. } => "Try",
        CatchClause { .. } => "Catch",
        Labelled { .. } => "Labelled",
        ExprStmt(_) => "ExprStmt",
        Empty => "Empty",
        ImportDecl { .. } => "Import",
        ExportDefault(_) => "ExportDefault",
    }
}
