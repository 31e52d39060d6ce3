use ardast::{parse, Literal, NodeKind, Platform};

#[test]
fn object_macro_substitutes_into_a_number_literal() {
    let ast = parse("#define LED_COUNT 60\nint n = LED_COUNT;\n", Platform::ArduinoUno, true).expect("parses");
    let root = ast.get(ast.root);
    let var_decl = root.children.iter().copied().find(|&id| ast.kind(id) == NodeKind::VarDecl).expect("a VarDecl");
    let (_, decls) = ast.var_decl_parts(var_decl);
    let (_, init) = decls[0];
    let init = init.expect("LED_COUNT has an initializer");
    assert_eq!(ast.kind(init), NodeKind::NumberLiteral);
    assert_eq!(ast.get(init).value, Some(Literal::Int32(60)));
}

#[test]
fn include_of_a_known_header_activates_its_library() {
    let ast = parse("#include <Servo.h>\nvoid setup() {}\nvoid loop() {}\n", Platform::ArduinoUno, true).expect("parses");
    assert!(ast.active_libraries.iter().any(|lib| lib == "Servo"));
}

#[test]
fn include_of_an_unknown_header_is_a_no_op_diagnostic_not_a_failure() {
    let ast = parse("#include <NotARealHeader.h>\nvoid setup() {}\nvoid loop() {}\n", Platform::ArduinoUno, false).expect("parsing continues after an unknown #include");
    assert!(!ast.active_libraries.iter().any(|lib| lib == "NotARealHeader"));
}

#[test]
fn conditional_compilation_selects_the_true_branch() {
    let source = "#define DEBUG 1\n#if DEBUG\nint mode = 1;\n#else\nint mode = 0;\n#endif\n";
    let ast = parse(source, Platform::ArduinoUno, true).expect("parses");
    let root = ast.get(ast.root);
    let var_decl = root.children.iter().copied().find(|&id| ast.kind(id) == NodeKind::VarDecl).expect("a VarDecl");
    let (_, decls) = ast.var_decl_parts(var_decl);
    let init = decls[0].1.expect("mode has an initializer");
    assert_eq!(ast.get(init).value, Some(Literal::Int32(1)));
}

#[test]
fn function_macro_expands_with_argument_substitution() {
    let source = "#define TWICE(x) ((x) + (x))\nint n = TWICE(21);\n";
    let ast = parse(source, Platform::ArduinoUno, true).expect("parses");
    let root = ast.get(ast.root);
    let var_decl = root.children.iter().copied().find(|&id| ast.kind(id) == NodeKind::VarDecl).expect("a VarDecl");
    let (_, decls) = ast.var_decl_parts(var_decl);
    let init = decls[0].1.expect("n has an initializer");
    assert_eq!(ast.kind(init), NodeKind::BinaryOp);
}
