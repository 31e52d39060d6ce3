//! The AST node taxonomy and arena (spec §3.2, §4.4, §4.6.4).
//!
//! Nodes live in a flat arena (`Ast::nodes`) rather than behind `Box`/`Rc`
//! pointers: a [`NodeId`] is just an index, so every child reference is
//! `Copy` and the arena can be walked without touching a reference count.
//! The parser allocates a node only after all of its children (children
//! end up with smaller ids than their parent), which is the natural order
//! for a recursive-descent parser but is the reverse of CompactAST's
//! required wire order (§4.6.2's depth-first pre-order, root first); the
//! writer in [`crate::compact_ast`] re-numbers nodes into pre-order before
//! encoding rather than forcing the parser to build the arena that way.
//!
//! "Named children" (spec §3.2: "a set of named children (semantic
//! slots)") are not stored as a second, parallel map. Each node kind has a
//! fixed, documented ordering for its positional children (§4.6.4's table);
//! the accessor methods below (`Ast::if_parts`, `Ast::binary_parts`, ...)
//! realize the named slots by indexing into that fixed order. This avoids
//! keeping two copies of the same edges in sync.

use std::fmt;

use crate::span::Span;

/// An index into [`Ast::nodes`]. Also the node's position in CompactAST's
/// on-wire node-record array (see the module doc comment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The node-type tags from spec §6.2. Discriminants are the stable wire
/// codes CompactAST uses, so `kind as u8` and [`NodeKind::from_u8`] are the
/// entire encode/decode of this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    Program = 0x01,
    Error = 0x02,
    Comment = 0x03,
    CompoundStmt = 0x10,
    ExpressionStmt = 0x11,
    If = 0x12,
    While = 0x13,
    DoWhile = 0x14,
    For = 0x15,
    RangeFor = 0x16,
    Switch = 0x17,
    Case = 0x18,
    Return = 0x19,
    Break = 0x1A,
    Continue = 0x1B,
    Empty = 0x1C,
    VarDecl = 0x20,
    FuncDef = 0x21,
    FuncDecl = 0x22,
    Struct = 0x23,
    Enum = 0x24,
    Class = 0x25,
    Typedef = 0x26,
    Template = 0x27,
    BinaryOp = 0x30,
    UnaryOp = 0x31,
    Assignment = 0x32,
    FuncCall = 0x33,
    MemberAccess = 0x34,
    ArrayAccess = 0x35,
    Cast = 0x36,
    Sizeof = 0x37,
    Ternary = 0x38,
    NumberLiteral = 0x40,
    StringLiteral = 0x41,
    CharLiteral = 0x42,
    Identifier = 0x43,
    Constant = 0x44,
    ArrayInitializer = 0x45,
    Type = 0x50,
    Declarator = 0x51,
    Param = 0x52,
    Postfix = 0x53,
    StructType = 0x54,
    FunctionPointerDeclarator = 0x55,
    Comma = 0x56,
    ArrayDeclarator = 0x57,
    PointerDeclarator = 0x58,
    ConstructorCall = 0x59,
}

impl NodeKind {
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => Self::Program,
            0x02 => Self::Error,
            0x03 => Self::Comment,
            0x10 => Self::CompoundStmt,
            0x11 => Self::ExpressionStmt,
            0x12 => Self::If,
            0x13 => Self::While,
            0x14 => Self::DoWhile,
            0x15 => Self::For,
            0x16 => Self::RangeFor,
            0x17 => Self::Switch,
            0x18 => Self::Case,
            0x19 => Self::Return,
            0x1A => Self::Break,
            0x1B => Self::Continue,
            0x1C => Self::Empty,
            0x20 => Self::VarDecl,
            0x21 => Self::FuncDef,
            0x22 => Self::FuncDecl,
            0x23 => Self::Struct,
            0x24 => Self::Enum,
            0x25 => Self::Class,
            0x26 => Self::Typedef,
            0x27 => Self::Template,
            0x30 => Self::BinaryOp,
            0x31 => Self::UnaryOp,
            0x32 => Self::Assignment,
            0x33 => Self::FuncCall,
            0x34 => Self::MemberAccess,
            0x35 => Self::ArrayAccess,
            0x36 => Self::Cast,
            0x37 => Self::Sizeof,
            0x38 => Self::Ternary,
            0x40 => Self::NumberLiteral,
            0x41 => Self::StringLiteral,
            0x42 => Self::CharLiteral,
            0x43 => Self::Identifier,
            0x44 => Self::Constant,
            0x45 => Self::ArrayInitializer,
            0x50 => Self::Type,
            0x51 => Self::Declarator,
            0x52 => Self::Param,
            0x53 => Self::Postfix,
            0x54 => Self::StructType,
            0x55 => Self::FunctionPointerDeclarator,
            0x56 => Self::Comma,
            0x57 => Self::ArrayDeclarator,
            0x58 => Self::PointerDeclarator,
            0x59 => Self::ConstructorCall,
            _ => return None,
        })
    }
}

/// A node's primitive payload (spec §3.2 "an optional primitive value").
///
/// Doubles as the in-memory representation of a CompactAST value (§4.6.3);
/// [`crate::compact_ast`] narrows `Int32`/`UInt32`/`Float64` to the
/// smallest wire type that round-trips exactly, per §4.6.3's "writers MUST
/// pick the narrowest integer type" rule. Operator strings (every
/// `BinaryOp`/`UnaryOp`/`Assignment`/`Postfix` node, §3.2's invariant),
/// identifier names, and string-literal contents are all `Str`.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Explicit void/undefined value (wire tag `0x00`), distinct from a
    /// node having no value at all (`Node::value == None`, no value bytes
    /// on the wire).
    Void,
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Float64(f64),
    Str(String),
    Char(char),
    Null,
}

impl Literal {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A single AST node: a kind, an optional primitive payload, and ordered
/// children (spec §3.2). See the module doc comment for why there is no
/// separate named-children map.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub value: Option<Literal>,
    pub children: Vec<NodeId>,
    pub span: Span,
}

impl Node {
    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

/// The parsed AST: an arena of nodes plus the root, and the side-channel
/// preprocessor metadata from spec §4.2's output ("`activeLibraries`,
/// final `macros` map").
#[derive(Debug, Clone)]
pub struct Ast {
    pub nodes: Vec<Node>,
    pub root: NodeId,
    pub active_libraries: Vec<String>,
    pub macros: indexmap::IndexMap<String, String>,
}

impl Ast {
    #[must_use]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[must_use]
    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.index()].kind
    }

    /// Whether any node in the tree is an [`NodeKind::Error`] (spec §4.3
    /// "An AST that contains any `ErrorNode` is still returned; the caller
    /// can scan for errors").
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.nodes.iter().any(|n| n.kind == NodeKind::Error)
    }

    /// `condition, consequent, [alternate]` (§4.6.4).
    #[must_use]
    pub fn if_parts(&self, id: NodeId) -> (NodeId, NodeId, Option<NodeId>) {
        let c = &self.get(id).children;
        (c[0], c[1], c.get(2).copied())
    }

    /// `condition, body`; for `DoWhile` the wire order is swapped but this
    /// accessor always returns `(condition, body)` regardless of kind.
    #[must_use]
    pub fn while_parts(&self, id: NodeId) -> (NodeId, NodeId) {
        let node = self.get(id);
        let c = &node.children;
        match node.kind {
            NodeKind::DoWhile => (c[1], c[0]),
            _ => (c[0], c[1]),
        }
    }

    /// `initializer, condition, increment, body` (§4.6.4).
    #[must_use]
    pub fn for_parts(&self, id: NodeId) -> (NodeId, NodeId, NodeId, NodeId) {
        let c = &self.get(id).children;
        (c[0], c[1], c[2], c[3])
    }

    /// `variable, iterable, body` (§4.6.4).
    #[must_use]
    pub fn range_for_parts(&self, id: NodeId) -> (NodeId, NodeId, NodeId) {
        let c = &self.get(id).children;
        (c[0], c[1], c[2])
    }

    /// `discriminant, case*` (§4.6.4).
    #[must_use]
    pub fn switch_parts(&self, id: NodeId) -> (NodeId, &[NodeId]) {
        let c = &self.get(id).children;
        (c[0], &c[1..])
    }

    /// `test, consequent*`; `test` is `None` for a `default:` case (marked
    /// by a `Literal::Null` payload — see [`AstBuilder`] callers in the
    /// parser).
    #[must_use]
    pub fn case_parts(&self, id: NodeId) -> (Option<NodeId>, &[NodeId]) {
        let node = &self.get(id);
        let c = &node.children;
        if node.value == Some(Literal::Null) {
            (None, c)
        } else {
            (Some(c[0]), &c[1..])
        }
    }

    /// `condition, consequent, alternate` (§4.6.4).
    #[must_use]
    pub fn ternary_parts(&self, id: NodeId) -> (NodeId, NodeId, NodeId) {
        let c = &self.get(id).children;
        (c[0], c[1], c[2])
    }

    /// `left, right` (`BinaryOp`/`Assignment`/`Comma`, §4.6.4).
    #[must_use]
    pub fn binary_parts(&self, id: NodeId) -> (NodeId, NodeId) {
        let c = &self.get(id).children;
        (c[0], c[1])
    }

    /// `operand` (`UnaryOp`/`Postfix`, §4.6.4).
    #[must_use]
    pub fn operand(&self, id: NodeId) -> NodeId {
        self.get(id).children[0]
    }

    /// `callee, argument*` (§4.6.4, §4.4 "Every `FuncCall` has a `callee`").
    #[must_use]
    pub fn call_parts(&self, id: NodeId) -> (NodeId, &[NodeId]) {
        let c = &self.get(id).children;
        (c[0], &c[1..])
    }

    /// `object, property` (`MemberAccess`, §4.6.4).
    #[must_use]
    pub fn member_parts(&self, id: NodeId) -> (NodeId, NodeId) {
        let c = &self.get(id).children;
        (c[0], c[1])
    }

    /// `object, index` (`ArrayAccess`, §4.6.4).
    #[must_use]
    pub fn array_access_parts(&self, id: NodeId) -> (NodeId, NodeId) {
        let c = &self.get(id).children;
        (c[0], c[1])
    }

    /// `type, (declarator, initializer)*` (§4.6.4): each declarator is
    /// always paired with a child slot, a [`NodeKind::Empty`] sentinel
    /// standing in for "no initializer" so the pairing stays fixed-width
    /// without a side-channel count.
    #[must_use]
    pub fn var_decl_parts(&self, id: NodeId) -> (NodeId, Vec<(NodeId, Option<NodeId>)>) {
        let c = &self.get(id).children;
        let ty = c[0];
        let out = c[1..]
            .chunks_exact(2)
            .map(|pair| {
                let init = pair[1];
                let init = if self.kind(init) == NodeKind::Empty { None } else { Some(init) };
                (pair[0], init)
            })
            .collect();
        (ty, out)
    }

    /// `returnType, declarator, param*, body` (§4.6.4).
    #[must_use]
    pub fn func_def_parts(&self, id: NodeId) -> (NodeId, NodeId, &[NodeId], NodeId) {
        let c = &self.get(id).children;
        let ret = c[0];
        let decl = c[1];
        let body = *c.last().unwrap();
        let params = &c[2..c.len() - 1];
        (ret, decl, params, body)
    }

    /// `paramType, declarator, [defaultValue]` (§4.6.4).
    #[must_use]
    pub fn param_parts(&self, id: NodeId) -> (NodeId, NodeId, Option<NodeId>) {
        let c = &self.get(id).children;
        (c[0], c[1], c.get(2).copied())
    }

    /// `expression` (`ExpressionStatement`, §4.6.4, §4.4 invariant).
    #[must_use]
    pub fn expr_stmt_expr(&self, id: NodeId) -> NodeId {
        self.get(id).children[0]
    }

    /// The operator text stored on a `BinaryOp`/`UnaryOp`/`Assignment`/
    /// `Postfix` node (§3.2 invariant).
    #[must_use]
    pub fn operator(&self, id: NodeId) -> &str {
        match &self.get(id).value {
            Some(Literal::Str(s)) => s.as_str(),
            _ => "",
        }
    }

    /// The variable/function name carried by a `Declarator`, looking
    /// through any wrapping `PointerDeclarator`/`ArrayDeclarator`/
    /// `FunctionPointerDeclarator` node down to the base name.
    #[must_use]
    pub fn declarator_name(&self, id: NodeId) -> &str {
        let node = self.get(id);
        match node.kind {
            NodeKind::Declarator => node.value.as_ref().and_then(Literal::as_str).unwrap_or(""),
            NodeKind::PointerDeclarator | NodeKind::ArrayDeclarator => self.declarator_name(node.children[0]),
            NodeKind::FunctionPointerDeclarator => self.declarator_name(node.children[0]),
            NodeKind::Identifier => node.value.as_ref().and_then(Literal::as_str).unwrap_or(""),
            _ => "",
        }
    }

    /// The pointer indirection level of a declarator (`int **p` → 2).
    #[must_use]
    pub fn declarator_pointer_level(&self, id: NodeId) -> u8 {
        match self.get(id).kind {
            NodeKind::PointerDeclarator => 1 + self.declarator_pointer_level(self.get(id).children[0]),
            NodeKind::ArrayDeclarator => self.declarator_pointer_level(self.get(id).children[0]),
            _ => 0,
        }
    }

    /// Whether a `Declarator` (or something wrapping one) is an
    /// `ArrayDeclarator`, and if so its (optional) size expression.
    #[must_use]
    pub fn declarator_array_size(&self, id: NodeId) -> Option<Option<NodeId>> {
        let node = self.get(id);
        match node.kind {
            NodeKind::ArrayDeclarator => Some(node.children.first().copied()),
            NodeKind::PointerDeclarator => self.declarator_array_size(node.children[0]),
            _ => None,
        }
    }

    /// Splits a `Type` node's raw text (e.g. `"static const int"`) into its
    /// qualifier flags and base type name (spec §3.4's `const`/`static`/
    /// `volatile`/`extern` binding flags are folded into the type text by
    /// the parser rather than stored as a separate field).
    #[must_use]
    pub fn type_flags(&self, id: NodeId) -> (crate::scope::BindingFlags, &str) {
        let text = match &self.get(id).value {
            Some(Literal::Str(s)) => s.as_str(),
            _ => "",
        };
        let mut flags = crate::scope::BindingFlags::default();
        let mut base_start = 0;
        for word in text.split_whitespace() {
            match word {
                "const" => flags.is_const = true,
                "static" => flags.is_static = true,
                "volatile" => flags.is_volatile = true,
                "extern" => flags.is_extern = true,
                _ => break,
            }
            base_start += word.len() + 1;
        }
        (flags, text.get(base_start.min(text.len())..).unwrap_or("").trim())
    }
}

/// A builder used by the parser to allocate nodes in depth-first pre-order
/// (children before their parent is finalized — see the module doc
/// comment on why this matters for CompactAST).
#[derive(Debug, Default)]
pub struct AstBuilder {
    nodes: Vec<Node>,
}

impl AstBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: NodeKind, value: Option<Literal>, children: Vec<NodeId>, span: Span) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("node arena overflow"));
        self.nodes.push(Node {
            kind,
            value,
            children,
            span,
        });
        id
    }

    #[must_use]
    pub fn finish(self, root: NodeId, active_libraries: Vec<String>, macros: indexmap::IndexMap<String, String>) -> Ast {
        Ast {
            nodes: self.nodes,
            root,
            active_libraries,
            macros,
        }
    }
}
