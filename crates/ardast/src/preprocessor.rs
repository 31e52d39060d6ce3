//! The preprocessor (spec §4.2): macro expansion, `#include` library
//! activation, and conditional compilation.
//!
//! Macro expansion happens on the *token* stream the lexer already
//! produced, never by re-scanning raw characters — spec §4.2 calls this out
//! explicitly ("to avoid re-lexing substring hazards"), and it falls out
//! naturally here since [`crate::lexer::tokenize`] already ran before this
//! module sees anything.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::{
    error::ParseError,
    lexer::{tokenize, Lexer},
    platform::PlatformProfile,
    token::{Punct, Token, TokenKind},
};

/// A registered macro. Function macros keep their parameter list textual
/// (no token-level parsing needed beyond commas at the top nesting level).
#[derive(Debug, Clone)]
enum MacroDef {
    Object(Vec<Token>),
    Function { params: Vec<String>, body: Vec<Token> },
}

/// Known `#include` headers and the library each one activates, with any
/// constants it injects as macros. Unknown headers are a silent no-op with
/// a diagnostic (spec §8 "Unknown `#include` path is a no-op with a
/// diagnostic; parsing continues").
const LIBRARY_HEADERS: &[(&str, &str, &[(&str, &str)])] = &[
    ("Adafruit_NeoPixel.h", "NeoPixel", &[("NEO_GRB", "1"), ("NEO_RGB", "2"), ("NEO_KHZ800", "0x0000")]),
    ("Servo.h", "Servo", &[]),
    ("Wire.h", "Wire", &[]),
    ("SPI.h", "SPI", &[("MSBFIRST", "1"), ("LSBFIRST", "0")]),
    ("EEPROM.h", "EEPROM", &[]),
    ("LiquidCrystal.h", "LCD", &[]),
    ("SoftwareSerial.h", "SoftwareSerial", &[]),
];

/// Side-channel metadata produced alongside the expanded token stream
/// (spec §4.2 output: "`activeLibraries`, final `macros` map").
#[derive(Debug, Clone, Default)]
pub struct PreprocessorOutput {
    pub active_libraries: Vec<String>,
    pub macros: IndexMap<String, String>,
    pub diagnostics: Vec<ParseError>,
}

struct CondFrame {
    /// Whether this frame's currently selected branch should emit tokens,
    /// combined with all enclosing frames.
    active: bool,
    /// Whether any branch of this `#if`/`#elif`/.../`#endif` chain has been
    /// taken yet (an `#elif`/`#else` after a taken branch is always false).
    any_taken: bool,
    /// Whether an `#else` has already been seen (a second one is an error,
    /// tolerated here by just ignoring it).
    seen_else: bool,
}

pub struct Preprocessor<'p> {
    profile: &'p PlatformProfile,
    macros: IndexMap<String, MacroDef>,
    active_libraries: Vec<String>,
    diagnostics: Vec<ParseError>,
}

impl<'p> Preprocessor<'p> {
    #[must_use]
    pub fn new(profile: &'p PlatformProfile) -> Self {
        let mut macros = IndexMap::new();
        for (name, value) in &profile.defines {
            macros.insert(name.clone(), MacroDef::Object(tokenize(value).into_iter().filter(|t| !t.is_eof()).collect()));
        }
        Self {
            profile,
            macros,
            active_libraries: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Runs the full pipeline: tokenize, process directives, expand
    /// macros. Returns the expanded token stream (terminated by `Eof`)
    /// plus the side-channel metadata.
    pub fn run(mut self, source: &str) -> (Vec<Token>, PreprocessorOutput) {
        let tokens = tokenize(source);
        let mut out = Vec::new();
        let mut cond_stack: Vec<CondFrame> = Vec::new();
        let mut masked: HashSet<String> = HashSet::new();

        let mut i = 0;
        while i < tokens.len() {
            let tok = &tokens[i];
            match &tok.kind {
                TokenKind::Eof => break,
                TokenKind::Directive(line) => {
                    self.handle_directive(line, &mut cond_stack, tok.span);
                }
                _ => {
                    let active = cond_stack.iter().all(|f| f.active);
                    if active {
                        self.expand_token(&tokens, &mut i, &mut out, &mut masked);
                        continue;
                    }
                }
            }
            i += 1;
        }
        out.push(Token::new(TokenKind::Eof, tokens.last().map_or_else(crate::span::Span::synthetic, |t| t.span)));

        let mut macro_map = IndexMap::new();
        for (name, def) in &self.macros {
            let text = match def {
                MacroDef::Object(toks) => render_tokens(toks),
                MacroDef::Function { params, body } => format!("({}) {}", params.join(","), render_tokens(body)),
            };
            macro_map.insert(name.clone(), text);
        }

        (
            out,
            PreprocessorOutput {
                active_libraries: self.active_libraries,
                macros: macro_map,
                diagnostics: self.diagnostics,
            },
        )
    }

    fn handle_directive(&mut self, line: &str, cond_stack: &mut Vec<CondFrame>, span: crate::span::Span) {
        let line = line.trim();
        let (keyword, rest) = split_first_word(line);
        let currently_active = cond_stack.iter().all(|f| f.active);

        match keyword {
            "ifdef" | "ifndef" => {
                let name = rest.trim();
                let defined = self.macros.contains_key(name);
                let taken = if keyword == "ifdef" { defined } else { !defined };
                let active = currently_active && taken;
                cond_stack.push(CondFrame {
                    active,
                    any_taken: taken,
                    seen_else: false,
                });
            }
            "if" => {
                let taken = currently_active && self.eval_if_expr(rest) != 0;
                cond_stack.push(CondFrame {
                    active: taken,
                    any_taken: taken,
                    seen_else: false,
                });
            }
            "elif" => {
                if let Some(frame) = cond_stack.last_mut() {
                    let parent_active = cond_stack[..cond_stack.len() - 1].iter().all(|f| f.active);
                    if frame.any_taken || frame.seen_else {
                        frame.active = false;
                    } else {
                        let taken = parent_active && self.eval_if_expr(rest) != 0;
                        frame.active = taken;
                        frame.any_taken = taken;
                    }
                } else {
                    self.diagnostics.push(ParseError::new(
                        crate::error::ParseErrorKind::Preprocess,
                        "#elif without matching #if",
                        span,
                    ));
                }
            }
            "else" => {
                if let Some(frame) = cond_stack.last_mut() {
                    let parent_active = cond_stack[..cond_stack.len() - 1].iter().all(|f| f.active);
                    let taken = !frame.any_taken;
                    frame.active = parent_active && taken;
                    frame.any_taken = true;
                    frame.seen_else = true;
                } else {
                    self.diagnostics.push(ParseError::new(
                        crate::error::ParseErrorKind::Preprocess,
                        "#else without matching #if",
                        span,
                    ));
                }
            }
            "endif" => {
                if cond_stack.pop().is_none() {
                    self.diagnostics.push(ParseError::new(
                        crate::error::ParseErrorKind::Preprocess,
                        "#endif without matching #if",
                        span,
                    ));
                }
            }
            "define" if currently_active => self.handle_define(rest),
            "undef" if currently_active => {
                self.macros.shift_remove(rest.trim());
            }
            "include" if currently_active => self.handle_include(rest),
            _ => {}
        }
    }

    fn handle_define(&mut self, rest: &str) {
        let rest = rest.trim_start();
        let bytes = rest.as_bytes();
        let mut name_end = 0;
        while name_end < bytes.len() && (bytes[name_end].is_ascii_alphanumeric() || bytes[name_end] == b'_') {
            name_end += 1;
        }
        let name = rest[..name_end].to_owned();
        if name.is_empty() {
            return;
        }
        if bytes.get(name_end) == Some(&b'(') {
            // Function-like macro: parse parameter list up to the matching ')'.
            let mut depth = 1;
            let mut j = name_end + 1;
            let params_start = j;
            while j < bytes.len() && depth > 0 {
                match bytes[j] {
                    b'(' => depth += 1,
                    b')' => depth -= 1,
                    _ => {}
                }
                if depth == 0 {
                    break;
                }
                j += 1;
            }
            let params_text = &rest[params_start..j];
            let params: Vec<String> = if params_text.trim().is_empty() {
                Vec::new()
            } else {
                params_text.split(',').map(|p| p.trim().to_owned()).collect()
            };
            let body_text = rest.get(j + 1..).unwrap_or("").trim();
            let body = tokenize(body_text).into_iter().filter(|t| !t.is_eof()).collect();
            self.macros.insert(name, MacroDef::Function { params, body });
        } else {
            let body_text = rest[name_end..].trim();
            let body = tokenize(body_text).into_iter().filter(|t| !t.is_eof()).collect();
            self.macros.insert(name, MacroDef::Object(body));
        }
    }

    fn handle_include(&mut self, rest: &str) {
        let path = rest.trim().trim_start_matches('<').trim_end_matches('>').trim_start_matches('"').trim_end_matches('"');
        let header = path.rsplit('/').next().unwrap_or(path);
        match LIBRARY_HEADERS.iter().find(|(h, ..)| *h == header) {
            Some((_, lib, defines)) => {
                if !self.active_libraries.contains(&(*lib).to_owned()) {
                    self.active_libraries.push((*lib).to_owned());
                }
                for (macro_name, value) in *defines {
                    self.macros.entry((*macro_name).to_owned()).or_insert_with(|| {
                        MacroDef::Object(tokenize(value).into_iter().filter(|t| !t.is_eof()).collect())
                    });
                }
            }
            None => {
                self.diagnostics.push(ParseError::new(
                    crate::error::ParseErrorKind::Preprocess,
                    format!("unknown #include path '{path}' ignored"),
                    crate::span::Span::synthetic(),
                ));
            }
        }
    }

    /// Expands the token at `tokens[*i]` (and, for function macros, its
    /// argument list) into `out`, advancing `*i` past everything consumed.
    fn expand_token(&mut self, tokens: &[Token], i: &mut usize, out: &mut Vec<Token>, masked: &mut HashSet<String>) {
        let tok = tokens[*i].clone();
        let TokenKind::Identifier(name) = &tok.kind else {
            out.push(tok);
            *i += 1;
            return;
        };
        if masked.contains(name) {
            out.push(tok);
            *i += 1;
            return;
        }
        let Some(def) = self.macros.get(name).cloned() else {
            out.push(tok);
            *i += 1;
            return;
        };

        match def {
            MacroDef::Object(body) => {
                *i += 1;
                masked.insert(name.clone());
                let mut j = 0;
                while j < body.len() {
                    self.expand_token(&body, &mut j, out, masked);
                }
                masked.remove(name);
            }
            MacroDef::Function { params, body } => {
                // Require `(` immediately following (spec: "Function macros
                // require parenthesized arguments; unmatched forms emit a
                // diagnostic and the identifier is left unexpanded").
                let next_non_eof = tokens.get(*i + 1);
                if !matches!(next_non_eof.map(|t| &t.kind), Some(TokenKind::Punct(Punct::LParen))) {
                    self.diagnostics.push(ParseError::new(
                        crate::error::ParseErrorKind::Preprocess,
                        format!("function macro '{name}' used without parentheses"),
                        tok.span,
                    ));
                    out.push(tok);
                    *i += 1;
                    return;
                }
                let mut j = *i + 2;
                let mut depth = 1;
                let mut args: Vec<Vec<Token>> = Vec::new();
                let mut current = Vec::new();
                while j < tokens.len() && depth > 0 {
                    match &tokens[j].kind {
                        TokenKind::Punct(Punct::LParen) => {
                            depth += 1;
                            current.push(tokens[j].clone());
                        }
                        TokenKind::Punct(Punct::RParen) => {
                            depth -= 1;
                            if depth > 0 {
                                current.push(tokens[j].clone());
                            }
                        }
                        TokenKind::Punct(Punct::Comma) if depth == 1 => {
                            args.push(std::mem::take(&mut current));
                        }
                        _ => current.push(tokens[j].clone()),
                    }
                    j += 1;
                }
                if depth != 0 {
                    self.diagnostics.push(ParseError::new(
                        crate::error::ParseErrorKind::Preprocess,
                        format!("function macro '{name}' missing closing ')'"),
                        tok.span,
                    ));
                    out.push(tok);
                    *i += 1;
                    return;
                }
                if !(current.is_empty() && params.is_empty()) {
                    args.push(current);
                }

                let substituted = substitute_params(&body, &params, &args);
                *i = j;
                masked.insert(name.clone());
                let mut k = 0;
                while k < substituted.len() {
                    self.expand_token(&substituted, &mut k, out, masked);
                }
                masked.remove(name);
            }
        }
    }

    /// Evaluates a `#if`/`#elif` guard expression per spec §4.2: integer
    /// literals, `defined(X)`, `!`, `&&`, `||`, parentheses, comparisons;
    /// undefined identifiers resolve to 0.
    fn eval_if_expr(&self, expr: &str) -> i64 {
        let tokens = tokenize(expr);
        let mut parser = IfExprParser {
            tokens: &tokens,
            pos: 0,
            macros: &self.macros,
        };
        parser.parse_or()
    }
}

fn split_first_word(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], s[idx..].trim_start()),
        None => (s, ""),
    }
}

fn render_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| match &t.kind {
            TokenKind::Identifier(s) | TokenKind::StringLiteral(s) => s.clone(),
            TokenKind::IntLiteral { text, .. } | TokenKind::FloatLiteral(text) => text.clone(),
            TokenKind::CharLiteral(c) => c.to_string(),
            TokenKind::Punct(p) => p.as_str().to_owned(),
            _ => String::new(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn substitute_params(body: &[Token], params: &[String], args: &[Vec<Token>]) -> Vec<Token> {
    let mut out = Vec::new();
    for tok in body {
        if let TokenKind::Identifier(name) = &tok.kind {
            if let Some(idx) = params.iter().position(|p| p == name) {
                if let Some(arg) = args.get(idx) {
                    out.extend(arg.iter().cloned());
                    continue;
                }
            }
        }
        out.push(tok.clone());
    }
    out
}

/// Minimal recursive-descent evaluator for `#if` expressions.
struct IfExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    macros: &'a IndexMap<String, MacroDef>,
}

impl IfExprParser<'_> {
    fn peek(&self) -> TokenKind {
        self.tokens.get(self.pos).map_or(TokenKind::Eof, |t| t.kind.clone())
    }

    fn bump(&mut self) -> TokenKind {
        let k = self.peek();
        self.pos += 1;
        k
    }

    fn parse_or(&mut self) -> i64 {
        let mut lhs = self.parse_and();
        while matches!(self.peek(), TokenKind::Punct(Punct::PipePipe)) {
            self.bump();
            let rhs = self.parse_and();
            lhs = i64::from(lhs != 0 || rhs != 0);
        }
        lhs
    }

    fn parse_and(&mut self) -> i64 {
        let mut lhs = self.parse_cmp();
        while matches!(self.peek(), TokenKind::Punct(Punct::AmpAmp)) {
            self.bump();
            let rhs = self.parse_cmp();
            lhs = i64::from(lhs != 0 && rhs != 0);
        }
        lhs
    }

    fn parse_cmp(&mut self) -> i64 {
        let lhs = self.parse_unary();
        let op = match self.peek() {
            TokenKind::Punct(p @ (Punct::EqEq | Punct::Ne | Punct::Lt | Punct::Gt | Punct::Le | Punct::Ge)) => p,
            _ => return lhs,
        };
        self.bump();
        let rhs = self.parse_unary();
        i64::from(match op {
            Punct::EqEq => lhs == rhs,
            Punct::Ne => lhs != rhs,
            Punct::Lt => lhs < rhs,
            Punct::Gt => lhs > rhs,
            Punct::Le => lhs <= rhs,
            Punct::Ge => lhs >= rhs,
            _ => unreachable!(),
        })
    }

    fn parse_unary(&mut self) -> i64 {
        if matches!(self.peek(), TokenKind::Punct(Punct::Bang)) {
            self.bump();
            return i64::from(self.parse_unary() == 0);
        }
        if matches!(self.peek(), TokenKind::Punct(Punct::Minus)) {
            self.bump();
            return -self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> i64 {
        match self.bump() {
            TokenKind::Punct(Punct::LParen) => {
                let v = self.parse_or();
                if matches!(self.peek(), TokenKind::Punct(Punct::RParen)) {
                    self.bump();
                }
                v
            }
            TokenKind::IntLiteral { text, base } => parse_int_literal(&text, base),
            TokenKind::Identifier(name) if name == "defined" => {
                let has_paren = matches!(self.peek(), TokenKind::Punct(Punct::LParen));
                if has_paren {
                    self.bump();
                }
                let target = match self.bump() {
                    TokenKind::Identifier(n) => n,
                    _ => String::new(),
                };
                if has_paren && matches!(self.peek(), TokenKind::Punct(Punct::RParen)) {
                    self.bump();
                }
                i64::from(self.macros.contains_key(&target))
            }
            TokenKind::Identifier(name) => match self.macros.get(&name) {
                Some(MacroDef::Object(toks)) if toks.len() == 1 => {
                    if let TokenKind::IntLiteral { text, base } = &toks[0].kind {
                        parse_int_literal(text, *base)
                    } else {
                        0
                    }
                }
                _ => 0,
            },
            _ => 0,
        }
    }
}

fn parse_int_literal(text: &str, base: crate::token::IntBase) -> i64 {
    let digits: String = text.chars().take_while(|c| c.is_ascii_alphanumeric()).collect();
    match base {
        crate::token::IntBase::Hex => i64::from_str_radix(digits.trim_start_matches("0x").trim_start_matches("0X"), 16).unwrap_or(0),
        crate::token::IntBase::Binary => i64::from_str_radix(digits.trim_start_matches("0b").trim_start_matches("0B"), 2).unwrap_or(0),
        crate::token::IntBase::Octal => i64::from_str_radix(&digits, 8).unwrap_or(0),
        crate::token::IntBase::Decimal => digits.trim_end_matches(['l', 'L', 'u', 'U']).parse().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Platform, PlatformProfile};

    fn run(source: &str) -> (Vec<Token>, PreprocessorOutput) {
        let profile = PlatformProfile::for_platform(Platform::ArduinoUno);
        Preprocessor::new(&profile).run(source)
    }

    fn ident_names(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Identifier(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn object_macro_expands_to_literal() {
        let (tokens, _) = run("#define LED_COUNT 60\nint n = LED_COUNT;");
        let has_60 = tokens
            .iter()
            .any(|t| matches!(&t.kind, TokenKind::IntLiteral { text, .. } if text == "60"));
        assert!(has_60);
        assert!(!ident_names(&tokens).contains(&"LED_COUNT".to_owned()));
    }

    #[test]
    fn function_macro_substitutes_params() {
        let (tokens, _) = run("#define DOUBLE(x) ((x)*2)\nint y = DOUBLE(5);");
        let ints: Vec<_> = tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::IntLiteral { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert!(ints.contains(&"5".to_owned()));
        assert!(ints.contains(&"2".to_owned()));
    }

    #[test]
    fn self_recursive_macro_does_not_loop() {
        let (tokens, _) = run("#define X X + 1\nint y = X;");
        // Must terminate; the un-expandable second `X` survives as an identifier.
        assert!(ident_names(&tokens).contains(&"X".to_owned()));
    }

    #[test]
    fn ifdef_false_branch_emits_no_tokens() {
        let (tokens, _) = run("#ifdef NOT_DEFINED\nint hidden;\n#endif\nint visible;");
        let names = ident_names(&tokens);
        assert!(!names.contains(&"hidden".to_owned()));
        assert!(names.contains(&"visible".to_owned()));
    }

    #[test]
    fn if_expr_with_defined_and_logic() {
        let (tokens, _) = run("#define FOO 1\n#if defined(FOO) && FOO == 1\nint yes;\n#else\nint no;\n#endif");
        let names = ident_names(&tokens);
        assert!(names.contains(&"yes".to_owned()));
        assert!(!names.contains(&"no".to_owned()));
    }

    #[test]
    fn include_activates_library_and_injects_constants() {
        let (tokens, out) = run("#include <Adafruit_NeoPixel.h>\nint grb = NEO_GRB;");
        assert_eq!(out.active_libraries, vec!["NeoPixel".to_owned()]);
        let has_1 = tokens
            .iter()
            .any(|t| matches!(&t.kind, TokenKind::IntLiteral { text, .. } if text == "1"));
        assert!(has_1);
    }

    #[test]
    fn unknown_include_is_noop_with_diagnostic() {
        let (_, out) = run("#include <NotARealLibrary.h>\nint x;");
        assert!(out.active_libraries.is_empty());
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn preprocessing_is_idempotent_on_expanded_source() {
        let (tokens, _) = run("#define N 3\nint a = N;");
        let rendered = render_tokens(&tokens);
        let (tokens2, _) = run(&rendered);
        assert_eq!(ident_names(&tokens), ident_names(&tokens2));
    }
}
