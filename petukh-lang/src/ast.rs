use serde::Serialize;

use crate::lexer::Token;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Default, Serialize)]
pub struct SourceInfo {
    pub line: u32,
    pub col: u32,
}

impl SourceInfo {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl From<&Token> for SourceInfo {
    fn from(token: &Token) -> Self {
        Self::new(token.line, token.col)
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize)]
pub enum NodeKind {
    Program,
    Function,
    FuncArg,
    Block,
    VarDeclList,
    VarDecl,
    If,
    ElseIf,
    While,
    DoWhile,
    For,
    Return,
    Break,
    Continue,
    ExprStmt,

    Assign,
    CommaExpr,
    Binary,
    Unary,
    Number,
    String,
    Identifier,
    Call,
    Index,
    TypeNode,

    /// Placeholder for an omitted `for` header slot.
    Empty,
}

/// One node of the syntax tree. The meaning of `text` and of each child
/// position depends on `kind`:
///
/// - `Function`: text = name; children = return `TypeNode`, `FuncArg`*, body `Block`
/// - `FuncArg`: text = name; children = `TypeNode`; `is_array` for `name[]`
/// - `VarDeclList`: children = `TypeNode`, `VarDecl`+
/// - `VarDecl`: text = name; zero children, or one (initializer, or the
///   size expression when `is_array`)
/// - `If`: children = condition, then `Block`, `ElseIf`*, optional else `Block`
/// - `ElseIf` / `While`: children = condition, `Block`
/// - `DoWhile`: children = `Block`, condition
/// - `For`: always 4 children, init | cond | step | body; absent slots are `Empty`
/// - `Binary` / `Unary` / `Assign` / `CommaExpr`: text = operator spelling
/// - `Call`: children = callee, arguments...
/// - `Index`: children = base, index
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub kind: NodeKind,
    pub text: String,
    pub is_array: bool,
    pub children: Vec<Node>,
    pub src: SourceInfo,
}

// Locations don't take part in equality, so trees parsed from differently
// formatted sources compare equal.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.text == other.text
            && self.is_array == other.is_array
            && self.children == other.children
    }
}

impl Node {
    pub fn new(kind: NodeKind, text: impl Into<String>, src: SourceInfo) -> Self {
        Self {
            kind,
            text: text.into(),
            is_array: false,
            children: Vec::new(),
            src,
        }
    }

    pub fn empty(src: SourceInfo) -> Self {
        Self::new(NodeKind::Empty, "", src)
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn push(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn child(&self, i: usize) -> Option<&Node> {
        self.children.get(i).filter(|c| c.kind != NodeKind::Empty)
    }

    pub fn is(&self, kind: NodeKind) -> bool {
        self.kind == kind
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }
}
