use ardast::{
    export_compact_ast, parse, parse_compact_ast, CommandKind, CompactAstError, Interpreter, InterpreterEvent, InterpreterOptions, Literal, NodeKind,
    Platform,
};

#[test]
fn round_trips_a_small_sketch_through_the_binary_codec() {
    let source = "void setup() {\n  pinMode(13, OUTPUT);\n}\nvoid loop() {\n  digitalWrite(13, HIGH);\n  delay(1000);\n}\n";
    let original = parse(source, Platform::ArduinoUno, true).expect("parses");

    let bytes = export_compact_ast(&original);
    let decoded = parse_compact_ast(&bytes).expect("round trip decodes");

    let funcs: Vec<_> = decoded.get(decoded.root).children.iter().copied().filter(|&id| decoded.kind(id) == NodeKind::FuncDef).collect();
    assert_eq!(funcs.len(), 2);

    let (_, decl, _, body) = decoded.func_def_parts(funcs[0]);
    assert_eq!(decoded.declarator_name(decl), "setup");
    assert_eq!(decoded.kind(body), NodeKind::CompoundStmt);
}

#[test]
fn preserves_the_operator_string_on_binary_expression_nodes() {
    let source = "void setup() {}\nvoid loop() {\n  int x = 1 + 2 * 3;\n}\n";
    let original = parse(source, Platform::ArduinoUno, true).expect("parses");
    let bytes = export_compact_ast(&original);
    let decoded = parse_compact_ast(&bytes).expect("round trip decodes");

    let loop_fn = decoded.get(decoded.root).children[1];
    let (_, _, _, body) = decoded.func_def_parts(loop_fn);
    let var_decl = decoded.get(body).children[0];
    let (_, decls) = decoded.var_decl_parts(var_decl);
    let init = decls[0].1.expect("x has an initializer");

    assert_eq!(decoded.kind(init), NodeKind::BinaryOp);
    assert_eq!(decoded.operator(init), "+");
    let (lhs, rhs) = decoded.binary_parts(init);
    assert_eq!(decoded.get(lhs).value, Some(Literal::Int32(1)));
    assert_eq!(decoded.kind(rhs), NodeKind::BinaryOp);
    assert_eq!(decoded.operator(rhs), "*");
}

#[test]
fn narrowest_integer_tag_round_trips_at_the_int8_uint8_boundary() {
    let source = "void setup() {}\nvoid loop() {\n  int a = -128;\n  int b = 127;\n  int c = 200;\n}\n";
    let original = parse(source, Platform::ArduinoUno, true).expect("parses");
    let bytes = export_compact_ast(&original);
    let decoded = parse_compact_ast(&bytes).expect("round trip decodes");

    let loop_fn = decoded.get(decoded.root).children[1];
    let (_, _, _, body) = decoded.func_def_parts(loop_fn);
    let values: Vec<_> = decoded
        .get(body)
        .children
        .iter()
        .map(|&stmt| {
            let (_, decls) = decoded.var_decl_parts(stmt);
            decoded.get(decls[0].1.unwrap()).value.clone().unwrap()
        })
        .collect();
    // 200 doesn't fit i8 but is non-negative and fits u8, so the narrowest
    // wire tag is UINT8 (spec §8: "0..255 as UINT8; narrower always wins"),
    // which the reader hands back as `Literal::UInt32`, not `Int32` — the
    // wire format narrows to the smallest faithful *value*, not the
    // original Rust-level variant.
    assert_eq!(values, vec![Literal::Int32(-128), Literal::Int32(127), Literal::UInt32(200)]);
}

#[test]
fn char_literal_round_trips_as_a_char_not_a_bare_uint() {
    let source = "void setup() {}\nvoid loop() {\n  char c = 'A';\n}\n";
    let original = parse(source, Platform::ArduinoUno, true).expect("parses");
    let bytes = export_compact_ast(&original);
    let decoded = parse_compact_ast(&bytes).expect("round trip decodes");

    let loop_fn = decoded.get(decoded.root).children[1];
    let (_, _, _, body) = decoded.func_def_parts(loop_fn);
    let var_decl = decoded.get(body).children[0];
    let (_, decls) = decoded.var_decl_parts(var_decl);
    let init = decls[0].1.expect("c has an initializer");
    assert_eq!(decoded.get(init).value, Some(Literal::Char('A')));

    // And the round-tripped tree still evaluates the char literal to its
    // code point rather than falling through to the `CharLiteral` eval
    // arm's zero default (spec §8 "same literal values").
    let source = "void setup() {}\nvoid loop() {\n  char c = 'A';\n  Serial.println((int)c);\n}\n";
    let original = parse(source, Platform::ArduinoUno, true).expect("parses");
    let bytes = export_compact_ast(&original);
    let decoded = parse_compact_ast(&bytes).expect("round trip decodes");

    let mut options = InterpreterOptions::default();
    options.max_loop_iterations = 1;
    let mut interpreter = Interpreter::new(&decoded, options);
    interpreter.start();
    let mut printed = None;
    while let Some(event) = interpreter.step_until_event() {
        match event {
            InterpreterEvent::Command(command) => {
                if let CommandKind::SerialPrintln { data, .. } = &command.kind {
                    printed = Some(data.clone());
                }
            }
            InterpreterEvent::Complete => break,
        }
    }
    assert_eq!(printed.as_deref(), Some("65"));
}

#[test]
fn rejects_a_blob_with_the_wrong_magic_number() {
    let err = parse_compact_ast(&[0, 0, 0, 0, 0, 0, 0, 0]).expect_err("bad magic must fail");
    assert_eq!(err, CompactAstError::BadMagic);
}

#[test]
fn rejects_a_truncated_blob() {
    let source = "void setup() {}\nvoid loop() {}\n";
    let ast = parse(source, Platform::ArduinoUno, true).expect("parses");
    let mut bytes = export_compact_ast(&ast);
    bytes.truncate(bytes.len() / 2);
    assert!(parse_compact_ast(&bytes).is_err());
}
