#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "wire/value narrowing is bounds-checked at the call site")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts model C's implicit conversions")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the Arduino core's integer types")]
#![expect(clippy::too_many_lines, reason = "the top-level driver and expression dispatch read best as one function")]

pub mod ast;
pub mod compact_ast;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod platform;
pub mod preprocessor;
pub mod scope;
pub mod span;
pub mod token;
pub mod value;

pub use crate::{
    ast::{Ast, Literal, Node, NodeId, NodeKind},
    compact_ast::{export_compact_ast, parse_compact_ast, CompactAstError},
    error::{ErrorKind, InterpError, ParseError, ParseErrorKind},
    interpreter::{
        command::{Command, CommandKind, CommandValue},
        library::{LibraryDescriptor, MethodKind, MethodSignature, Registry},
        tracer::{InterpTracer, NoopTracer, StderrTracer},
        ExecState, Interpreter, InterpreterEvent, InterpreterOptions, TimeoutConfig,
    },
    platform::{Platform, PlatformProfile},
    value::{Numeric, Value},
};

use preprocessor::Preprocessor;

/// Runs the full front end — lex, preprocess, parse — and hands back the
/// resulting AST along with any diagnostics collected along the way (spec
/// §4's pipeline: Lexer → Preprocessor → Parser).
///
/// `active_libraries`/`macros` come entirely from the preprocessor stage
/// (spec §4.2); `strict` controls whether a non-empty diagnostic list
/// fails the call outright or is left for the caller to inspect via
/// [`Ast::has_errors`] and the returned error list.
pub fn parse(source: &str, platform: Platform, strict: bool) -> Result<Ast, Vec<ParseError>> {
    let profile = PlatformProfile::for_platform(platform);
    let (tokens, pp_out) = Preprocessor::new(&profile).run(source);
    let (ast, mut errors) = parser::parse_tokens(tokens, pp_out.active_libraries, pp_out.macros);
    errors.extend(pp_out.diagnostics);
    if strict && !errors.is_empty() {
        return Err(errors);
    }
    Ok(ast)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_sketch() {
        let ast = parse("void setup() {}\nvoid loop() {}\n", Platform::ArduinoUno, true).expect("parses cleanly");
        assert!(!ast.has_errors());
    }

    #[test]
    fn strict_mode_surfaces_diagnostics() {
        let result = parse("void setup( { }", Platform::ArduinoUno, true);
        assert!(result.is_err());
    }
}
