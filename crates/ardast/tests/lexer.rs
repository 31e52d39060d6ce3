use ardast::lexer::tokenize;
use ardast::token::{IntBase, Keyword, Punct, TokenKind};

#[test]
fn tokenizes_a_function_signature() {
    let tokens = tokenize("void setup() {}");
    let kinds: Vec<_> = tokens.iter().map(|t| &t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            &TokenKind::Keyword(Keyword::Void),
            &TokenKind::Identifier("setup".to_owned()),
            &TokenKind::Punct(Punct::LParen),
            &TokenKind::Punct(Punct::RParen),
            &TokenKind::Punct(Punct::LBrace),
            &TokenKind::Punct(Punct::RBrace),
            &TokenKind::Eof,
        ]
    );
}

#[test]
fn classifies_integer_literal_bases() {
    let tokens = tokenize("0x1A 0b101 010 42");
    let bases: Vec<_> = tokens
        .iter()
        .filter_map(|t| match &t.kind {
            TokenKind::IntLiteral { base, .. } => Some(*base),
            _ => None,
        })
        .collect();
    assert_eq!(bases, vec![IntBase::Hex, IntBase::Binary, IntBase::Octal, IntBase::Decimal]);
}

#[test]
fn directive_line_folds_backslash_continuation() {
    let tokens = tokenize("#define LED_COUNT \\\n  60\nint n;");
    let directive = tokens.iter().find_map(|t| match &t.kind {
        TokenKind::Directive(line) => Some(line.clone()),
        _ => None,
    });
    let directive = directive.expect("a directive token");
    assert!(directive.contains("LED_COUNT") && directive.contains("60"));
}

#[test]
fn unrecognized_characters_become_error_tokens_without_aborting() {
    let tokens = tokenize("int x = 1 @ 2;");
    assert!(tokens.iter().any(|t| matches!(t.kind, TokenKind::ErrorToken('@'))));
    assert!(tokens.iter().any(|t| t.kind == TokenKind::Punct(Punct::Semi)));
    assert!(tokens.last().is_some_and(|t| t.is_eof()));
}

#[test]
fn string_and_char_literals_are_unescaped() {
    let tokens = tokenize(r#" "hi\n" 'a' "#);
    let mut kinds = tokens.into_iter().map(|t| t.kind);
    assert_eq!(kinds.next(), Some(TokenKind::StringLiteral("hi\n".to_owned())));
    assert_eq!(kinds.next(), Some(TokenKind::CharLiteral('a')));
}
