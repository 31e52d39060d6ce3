use ardast::{parse, Literal, NodeKind, Platform};

fn top_level(ast: &ardast::Ast, kind: NodeKind) -> Vec<ardast::NodeId> {
    ast.get(ast.root).children.iter().copied().filter(|&id| ast.kind(id) == kind).collect()
}

#[test]
fn parses_function_definitions_with_their_bodies() {
    let ast = parse("void setup() {\n  pinMode(13, OUTPUT);\n}\nvoid loop() {}\n", Platform::ArduinoUno, true).expect("parses");
    assert!(!ast.has_errors());
    let funcs = top_level(&ast, NodeKind::FuncDef);
    assert_eq!(funcs.len(), 2);

    let (_, decl, params, body) = ast.func_def_parts(funcs[0]);
    assert_eq!(ast.declarator_name(decl), "setup");
    assert!(params.is_empty());
    assert_eq!(ast.kind(body), NodeKind::CompoundStmt);
    assert_eq!(ast.get(body).children.len(), 1);
}

#[test]
fn pratt_precedence_nests_multiplication_under_addition() {
    let ast = parse("void setup() {}\nvoid loop() {\n  int x = 1 + 2 * 3;\n}\n", Platform::ArduinoUno, true).expect("parses");
    let loop_fn = top_level(&ast, NodeKind::FuncDef)[1];
    let (_, _, _, body) = ast.func_def_parts(loop_fn);
    let var_decl = ast.get(body).children[0];
    assert_eq!(ast.kind(var_decl), NodeKind::VarDecl);
    let (_, decls) = ast.var_decl_parts(var_decl);
    let init = decls[0].1.expect("x has an initializer");

    assert_eq!(ast.kind(init), NodeKind::BinaryOp);
    assert_eq!(ast.operator(init), "+");
    let (lhs, rhs) = ast.binary_parts(init);
    assert_eq!(ast.kind(lhs), NodeKind::NumberLiteral);
    assert_eq!(ast.get(lhs).value, Some(Literal::Int32(1)));
    assert_eq!(ast.kind(rhs), NodeKind::BinaryOp);
    assert_eq!(ast.operator(rhs), "*");
}

#[test]
fn ternary_expression_parses_into_its_three_parts() {
    let ast = parse("void setup() {}\nvoid loop() {\n  int x = (1 < 2) ? 10 : 20;\n}\n", Platform::ArduinoUno, true).expect("parses");
    let loop_fn = top_level(&ast, NodeKind::FuncDef)[1];
    let (_, _, _, body) = ast.func_def_parts(loop_fn);
    let var_decl = ast.get(body).children[0];
    let (_, decls) = ast.var_decl_parts(var_decl);
    let init = decls[0].1.expect("x has an initializer");

    assert_eq!(ast.kind(init), NodeKind::Ternary);
    let (cond, then_branch, else_branch) = ast.ternary_parts(init);
    assert_eq!(ast.kind(cond), NodeKind::BinaryOp);
    assert_eq!(ast.get(then_branch).value, Some(Literal::Int32(10)));
    assert_eq!(ast.get(else_branch).value, Some(Literal::Int32(20)));
}

#[test]
fn switch_statement_keeps_every_case_including_fall_through() {
    let source = "void setup() {}\nvoid loop() {\n  switch (1) {\n    case 1:\n    case 2:\n      break;\n    default:\n      break;\n  }\n}\n";
    let ast = parse(source, Platform::ArduinoUno, true).expect("parses");
    let loop_fn = top_level(&ast, NodeKind::FuncDef)[1];
    let (_, _, _, body) = ast.func_def_parts(loop_fn);
    let switch_stmt = ast.get(body).children[0];
    assert_eq!(ast.kind(switch_stmt), NodeKind::Switch);
    let (_, cases) = ast.switch_parts(switch_stmt);
    assert_eq!(cases.len(), 3);
    let (last_label, _) = ast.case_parts(cases[2]);
    assert!(last_label.is_none(), "the final case is the default label");
}

#[test]
fn a_malformed_top_level_declaration_becomes_an_error_node_without_aborting_the_parse() {
    let ast = parse("@@@ not a declaration @@@\nvoid setup() {}\nvoid loop() {}\n", Platform::ArduinoUno, false).expect("parsing continues past a syntax error");
    assert!(ast.has_errors());
    let funcs = top_level(&ast, NodeKind::FuncDef);
    assert_eq!(funcs.len(), 2, "both function definitions still parsed despite the leading garbage");
}
