//! The CompactAST binary codec (spec §4.6): a bit-exact, little-endian,
//! string-deduplicated serialization of an [`Ast`].
//!
//! The in-memory arena is built bottom-up by the parser (a node's
//! children are always allocated before the node itself, so children have
//! *smaller* [`NodeId`]s) — the opposite order CompactAST's wire format
//! requires ("depth-first pre-order, root first", spec §4.6.2). The
//! writer's first job is therefore a pre-order re-numbering pass
//! (`order_preorder`) before it ever touches bytes; the reader rebuilds
//! its arena directly in that same pre-order, so after a round trip
//! `NodeId`s are a renumbering of the original tree but every accessor in
//! [`crate::ast`] is index-based, not order-based, so nothing downstream
//! notices or cares.

use indexmap::IndexMap;

use crate::{
    ast::{Ast, AstBuilder, Literal, Node, NodeId, NodeKind},
    span::Span,
};

const MAGIC: u32 = 0x5054_5341;
const VERSION: u16 = 1;

const FLAG_HAS_CHILDREN: u8 = 0b01;
const FLAG_HAS_VALUE: u8 = 0b10;

const VAL_VOID: u8 = 0x00;
const VAL_BOOL: u8 = 0x01;
const VAL_INT8: u8 = 0x02;
const VAL_UINT8: u8 = 0x03;
const VAL_INT16: u8 = 0x04;
const VAL_UINT16: u8 = 0x05;
const VAL_INT32: u8 = 0x06;
const VAL_UINT32: u8 = 0x07;
const VAL_FLOAT32: u8 = 0x0A;
const VAL_FLOAT64: u8 = 0x0B;
const VAL_STRING: u8 = 0x0C;
const VAL_NULL: u8 = 0x0E;

/// Errors the reader can raise while validating a CompactAST blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactAstError {
    BadMagic,
    UnsupportedVersion(u16),
    Truncated,
    UnknownNodeType(u8),
    UnknownValueTag(u8),
    BadStringIndex(u16),
    BadChildIndex(u16),
    BadCharCodePoint(u32),
}

impl std::fmt::Display for CompactAstError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad CompactAST magic"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported CompactAST version {v}"),
            Self::Truncated => write!(f, "truncated CompactAST blob"),
            Self::UnknownNodeType(t) => write!(f, "unknown node type 0x{t:02X}"),
            Self::UnknownValueTag(t) => write!(f, "unknown value tag 0x{t:02X}"),
            Self::BadStringIndex(i) => write!(f, "string table index {i} out of range"),
            Self::BadChildIndex(i) => write!(f, "child index {i} out of range"),
            Self::BadCharCodePoint(n) => write!(f, "char literal code point {n} is not a valid Unicode scalar value"),
        }
    }
}

impl std::error::Error for CompactAstError {}

/// Performs a depth-first pre-order walk of `ast`, returning the
/// original `NodeId`s in wire order.
fn order_preorder(ast: &Ast) -> Vec<NodeId> {
    fn visit(ast: &Ast, id: NodeId, order: &mut Vec<NodeId>) {
        order.push(id);
        for &child in &ast.get(id).children {
            visit(ast, child, order);
        }
    }
    let mut order = Vec::with_capacity(ast.nodes.len());
    visit(ast, ast.root, &mut order);
    order
}

/// Picks the globally narrowest tag for a signed 32-bit value (spec §4.6.3
/// MUST, §8 "narrower always wins"). Non-negative values also fit the
/// unsigned tags, which are exactly as wide as their signed counterparts
/// but cover twice the positive range, so e.g. `200` (too big for `i8`)
/// still narrows to `UINT8` rather than jumping to `INT16`.
fn narrow_int32(n: i32, out: &mut Vec<u8>) {
    if let Ok(v) = i8::try_from(n) {
        out.push(VAL_INT8);
        out.push(v as u8);
    } else if n >= 0 {
        // u16's range (0..=65535) is a superset of the non-negative half
        // of i16's, so any n that would fit i16 here already fit u16.
        if let Ok(v) = u8::try_from(n) {
            out.push(VAL_UINT8);
            out.push(v);
        } else if let Ok(v) = u16::try_from(n) {
            out.push(VAL_UINT16);
            out.extend_from_slice(&v.to_le_bytes());
        } else {
            out.push(VAL_INT32);
            out.extend_from_slice(&n.to_le_bytes());
        }
    } else if let Ok(v) = i16::try_from(n) {
        out.push(VAL_INT16);
        out.extend_from_slice(&v.to_le_bytes());
    } else {
        out.push(VAL_INT32);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

fn narrow_uint32(n: u32, out: &mut Vec<u8>) {
    if let Ok(v) = u8::try_from(n) {
        out.push(VAL_UINT8);
        out.push(v);
    } else if let Ok(v) = u16::try_from(n) {
        out.push(VAL_UINT16);
        out.extend_from_slice(&v.to_le_bytes());
    } else {
        out.push(VAL_UINT32);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

fn encode_value(value: &Literal, strings: &mut IndexMap<String, u16>, out: &mut Vec<u8>) {
    match value {
        Literal::Void => out.push(VAL_VOID),
        Literal::Null => out.push(VAL_NULL),
        Literal::Bool(b) => {
            out.push(VAL_BOOL);
            out.push(u8::from(*b));
        }
        Literal::Int32(n) => narrow_int32(*n, out),
        Literal::UInt32(n) => narrow_uint32(*n, out),
        Literal::Char(c) => narrow_uint32(*c as u32, out),
        Literal::Float64(f) => {
            // Writers MUST pick float32 when the round-trip is exact
            // (spec §4.6.3).
            let as_f32 = *f as f32;
            if f64::from(as_f32) == *f {
                out.push(VAL_FLOAT32);
                out.extend_from_slice(&as_f32.to_le_bytes());
            } else {
                out.push(VAL_FLOAT64);
                out.extend_from_slice(&f.to_le_bytes());
            }
        }
        Literal::Str(s) => {
            let len = strings.len();
            let idx = *strings.entry(s.clone()).or_insert_with(|| u16::try_from(len).expect("string table overflow"));
            out.push(VAL_STRING);
            out.extend_from_slice(&idx.to_le_bytes());
        }
    }
}

/// Serializes `ast` to the CompactAST binary format (spec §4.6.2).
#[must_use]
pub fn export_compact_ast(ast: &Ast) -> Vec<u8> {
    let order = order_preorder(ast);
    let mut index_of = vec![0u32; ast.nodes.len()];
    for (new_idx, &old_id) in order.iter().enumerate() {
        index_of[old_id.index()] = u32::try_from(new_idx).expect("node count overflow");
    }

    let mut strings: IndexMap<String, u16> = IndexMap::new();
    let mut node_records: Vec<u8> = Vec::new();

    for &old_id in &order {
        let node: &Node = ast.get(old_id);
        let mut flags = 0u8;
        let mut body = Vec::new();
        if let Some(value) = &node.value {
            flags |= FLAG_HAS_VALUE;
            encode_value(value, &mut strings, &mut body);
        }
        if !node.children.is_empty() {
            flags |= FLAG_HAS_CHILDREN;
            for &child in &node.children {
                let idx = index_of[child.index()];
                let idx = u16::try_from(idx).expect("child index overflow (tree too large for u16 wire indices)");
                body.extend_from_slice(&idx.to_le_bytes());
            }
        }
        node_records.push(node.kind as u8);
        node_records.push(flags);
        let data_size = u16::try_from(body.len()).expect("node data too large");
        node_records.extend_from_slice(&data_size.to_le_bytes());
        node_records.extend_from_slice(&body);
    }

    let mut string_section = Vec::new();
    string_section.extend_from_slice(&u32::try_from(strings.len()).unwrap().to_le_bytes());
    for s in strings.keys() {
        let bytes = s.as_bytes();
        string_section.extend_from_slice(&u16::try_from(bytes.len()).expect("string too long").to_le_bytes());
        string_section.extend_from_slice(bytes);
        string_section.push(0); // NUL terminator
    }
    while string_section.len() % 4 != 0 {
        string_section.push(0);
    }

    let mut out = Vec::with_capacity(16 + string_section.len() + node_records.len());
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // flags, reserved
    out.extend_from_slice(&u32::try_from(order.len()).unwrap().to_le_bytes());
    out.extend_from_slice(&u32::try_from(string_section.len()).unwrap().to_le_bytes());
    out.extend_from_slice(&string_section);
    out.extend_from_slice(&node_records);
    out
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CompactAstError> {
        let end = self.pos.checked_add(n).ok_or(CompactAstError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(CompactAstError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CompactAstError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CompactAstError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, CompactAstError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

/// `kind` is the node the value belongs to — `encode_value` narrows a
/// `Literal::Char` down to whichever `narrow_uint32` tag fits its code
/// point (spec §4.6.3 has no dedicated char tag), so the reader needs the
/// owning node's kind to know a `VAL_UINT*` payload should come back as
/// `Literal::Char` rather than `Literal::UInt32` for `NodeKind::CharLiteral`
/// nodes.
fn decode_value(buf: &[u8], strings: &[String], kind: NodeKind) -> Result<(Literal, usize), CompactAstError> {
    let mut r = Reader { buf, pos: 0 };
    let tag = r.u8()?;
    let is_char = kind == NodeKind::CharLiteral;
    let value = match tag {
        VAL_VOID => Literal::Void,
        VAL_NULL => Literal::Null,
        VAL_BOOL => Literal::Bool(r.u8()? != 0),
        VAL_INT8 => Literal::Int32(i32::from(r.u8()? as i8)),
        VAL_UINT8 => decode_uint32_value(u32::from(r.u8()?), is_char)?,
        VAL_INT16 => Literal::Int32(i32::from(i16::from_le_bytes(r.take(2)?.try_into().unwrap()))),
        VAL_UINT16 => decode_uint32_value(u32::from(u16::from_le_bytes(r.take(2)?.try_into().unwrap())), is_char)?,
        VAL_INT32 => Literal::Int32(i32::from_le_bytes(r.take(4)?.try_into().unwrap())),
        VAL_UINT32 => decode_uint32_value(u32::from_le_bytes(r.take(4)?.try_into().unwrap()), is_char)?,
        VAL_FLOAT32 => Literal::Float64(f64::from(f32::from_le_bytes(r.take(4)?.try_into().unwrap()))),
        VAL_FLOAT64 => Literal::Float64(f64::from_le_bytes(r.take(8)?.try_into().unwrap())),
        VAL_STRING => {
            let idx = r.u16()?;
            let s = strings.get(idx as usize).ok_or(CompactAstError::BadStringIndex(idx))?;
            Literal::Str(s.clone())
        }
        other => return Err(CompactAstError::UnknownValueTag(other)),
    };
    Ok((value, r.pos))
}

fn decode_uint32_value(n: u32, is_char: bool) -> Result<Literal, CompactAstError> {
    if is_char {
        char::from_u32(n).map(Literal::Char).ok_or(CompactAstError::BadCharCodePoint(n))
    } else {
        Ok(Literal::UInt32(n))
    }
}

/// Parses a CompactAST blob back into an [`Ast`] (spec §4.6.2/§4.6.4).
///
/// This reconstructs the tree's shape and payload exactly but does not
/// round-trip the preprocessor side-channel metadata (`activeLibraries`,
/// `macros`) — that metadata is not part of the CompactAST wire format
/// (spec §4.6 only specifies the node-tree container) and is left empty.
pub fn parse_compact_ast(bytes: &[u8]) -> Result<Ast, CompactAstError> {
    let mut r = Reader { buf: bytes, pos: 0 };
    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(CompactAstError::BadMagic);
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(CompactAstError::UnsupportedVersion(version));
    }
    let _flags = r.u16()?;
    let node_count = r.u32()?;
    let string_table_bytes = r.u32()?;

    let string_section_start = r.pos;
    let string_count = r.u32()?;
    let mut strings = Vec::with_capacity(string_count as usize);
    for _ in 0..string_count {
        let len = r.u16()? as usize;
        let bytes = r.take(len)?;
        let s = String::from_utf8_lossy(bytes).into_owned();
        strings.push(s);
        r.u8()?; // NUL terminator
    }
    // Node records begin exactly `string_table_bytes` after the header,
    // regardless of how many bytes the string entries we just parsed
    // actually occupied — this absorbs the alignment padding without the
    // reader needing to recompute it (see module doc comment).
    r.pos = string_section_start + string_table_bytes as usize;

    let mut builder = AstBuilder::new();
    let mut raw_nodes = Vec::with_capacity(node_count as usize);
    for _ in 0..node_count {
        let tag = r.u8()?;
        let kind = NodeKind::from_u8(tag).ok_or(CompactAstError::UnknownNodeType(tag))?;
        let flags = r.u8()?;
        let data_size = r.u16()? as usize;
        let body = r.take(data_size)?;
        let mut offset = 0;
        let value = if flags & FLAG_HAS_VALUE != 0 {
            let (v, consumed) = decode_value(&body[offset..], &strings, kind)?;
            offset += consumed;
            Some(v)
        } else {
            None
        };
        let mut children = Vec::new();
        if flags & FLAG_HAS_CHILDREN != 0 {
            let rest = &body[offset..];
            for chunk in rest.chunks_exact(2) {
                let idx = u16::from_le_bytes([chunk[0], chunk[1]]);
                children.push(idx);
            }
        }
        raw_nodes.push((kind, value, children));
    }

    // Validate and build, preserving the wire's pre-order as the new
    // arena order (index i here IS the NodeId the reader assigns).
    for (kind, value, children) in &raw_nodes {
        let resolved: Vec<NodeId> = children
            .iter()
            .map(|&idx| {
                if (idx as usize) < raw_nodes.len() {
                    Ok(NodeId(u32::from(idx)))
                } else {
                    Err(CompactAstError::BadChildIndex(idx))
                }
            })
            .collect::<Result<_, _>>()?;
        builder.push(*kind, value.clone(), resolved, Span::synthetic());
    }

    let root = NodeId(0);
    Ok(builder.finish(root, Vec::new(), indexmap::IndexMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer::tokenize, parser::parse_tokens};

    fn parse(src: &str) -> Ast {
        let (ast, errs) = parse_tokens(tokenize(src), Vec::new(), indexmap::IndexMap::new());
        assert!(errs.is_empty(), "unexpected parse errors: {errs:?}");
        ast
    }

    fn structurally_equal(a: &Ast, b: &Ast) -> bool {
        fn walk(a: &Ast, an: NodeId, b: &Ast, bn: NodeId) -> bool {
            let na = a.get(an);
            let nb = b.get(bn);
            if na.kind != nb.kind || na.value != nb.value || na.children.len() != nb.children.len() {
                return false;
            }
            na.children.iter().zip(nb.children.iter()).all(|(&ca, &cb)| walk(a, ca, b, cb))
        }
        walk(a, a.root, b, b.root)
    }

    #[test]
    fn round_trips_blink_sketch() {
        let ast = parse("void setup(){ pinMode(13,OUTPUT); } void loop(){ digitalWrite(13,HIGH); delay(1000); }");
        let bytes = export_compact_ast(&ast);
        let back = parse_compact_ast(&bytes).unwrap();
        assert!(structurally_equal(&ast, &back));
    }

    #[test]
    fn expression_statement_children_survive_round_trip() {
        let ast = parse("void loop(){ foo(1,2,3); }");
        let bytes = export_compact_ast(&ast);
        let back = parse_compact_ast(&bytes).unwrap();
        let has_call = back.nodes.iter().any(|n| n.kind == NodeKind::FuncCall && n.children.len() == 4);
        assert!(has_call, "FuncCall must retain its callee + 3 arguments after round trip");
    }

    #[test]
    fn operator_strings_survive_round_trip() {
        let ast = parse("void loop(){ int x = a + b * (c - d) && e || !f; }");
        let bytes = export_compact_ast(&ast);
        let back = parse_compact_ast(&bytes).unwrap();
        let ops: Vec<_> = back
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::BinaryOp | NodeKind::UnaryOp))
            .filter_map(|n| n.value.as_ref().and_then(Literal::as_str))
            .collect();
        assert!(ops.contains(&"+"));
        assert!(ops.contains(&"*"));
        assert!(ops.contains(&"-"));
        assert!(ops.contains(&"&&"));
        assert!(ops.contains(&"||"));
        assert!(ops.contains(&"!"));
    }

    #[test]
    fn number_classification_picks_narrowest_type() {
        let ast = parse("void loop(){ int a=100; int b=200; int c=40000; int d=-100; }");
        let bytes = export_compact_ast(&ast);
        // INT8 for 100 and -100 (fits -128..=127). 200 doesn't fit i8 but
        // is non-negative and fits u8, so UINT8 (spec §8: "0..255 as
        // UINT8; narrower always wins"), not INT16. 40000 doesn't fit i16
        // or u8 but does fit u16, so UINT16.
        let mut r = Reader { buf: &bytes, pos: 0 };
        let _ = r.u32();
        let _ = r.u16();
        let _ = r.u16();
        let _node_count = r.u32().unwrap();
        let string_table_bytes = r.u32().unwrap();
        r.pos += string_table_bytes as usize;
        let mut tags = Vec::new();
        while r.pos < bytes.len() {
            let _kind = r.u8().unwrap();
            let flags = r.u8().unwrap();
            let data_size = r.u16().unwrap() as usize;
            let body = r.take(data_size).unwrap();
            if flags & FLAG_HAS_VALUE != 0 {
                tags.push(body[0]);
            }
        }
        assert!(tags.contains(&VAL_INT8));
        assert!(tags.contains(&VAL_UINT8), "200 must narrow to UINT8, not a signed tag");
        assert!(tags.contains(&VAL_UINT16), "40000 must narrow to UINT16, not INT32");
    }

    #[test]
    fn string_table_deduplicates() {
        let ast = parse(r#"void loop(){ Serial.println("hi"); Serial.println("hi"); }"#);
        let bytes = export_compact_ast(&ast);
        let mut r = Reader { buf: &bytes, pos: 0 };
        let _ = r.u32();
        let _ = r.u16();
        let _ = r.u16();
        let _ = r.u32();
        let _string_table_bytes = r.u32().unwrap();
        let count = r.u32().unwrap();
        let hi_count = (0..count)
            .map(|_| {
                let len = r.u16().unwrap() as usize;
                let s = String::from_utf8(r.take(len).unwrap().to_vec()).unwrap();
                r.u8().unwrap();
                s
            })
            .filter(|s| s == "hi")
            .count();
        assert_eq!(hi_count, 1);
    }

    #[test]
    fn rejects_bad_magic() {
        assert_eq!(parse_compact_ast(&[0, 0, 0, 0]), Err(CompactAstError::Truncated));
        let mut bytes = vec![0xFFu8; 16];
        assert_eq!(parse_compact_ast(&bytes), Err(CompactAstError::BadMagic));
        bytes[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        bytes[4..6].copy_from_slice(&999u16.to_le_bytes());
        assert_eq!(parse_compact_ast(&bytes), Err(CompactAstError::UnsupportedVersion(999)));
    }
}
