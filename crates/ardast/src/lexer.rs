//! The lexer (spec §4.1): a single-pass, restartable tokenizer.
//!
//! Comments are stripped here and never surface as tokens. Preprocessor
//! directive lines (`#...` through the next non-continued newline) are
//! captured whole as a single [`TokenKind::Directive`] — folding,
//! expansion, and conditional-compilation logic live in
//! [`crate::preprocessor`], not here; the lexer's job stops at "this is a
//! directive line, here is its raw text."

use crate::{
    span::{Position, Span},
    token::{IntBase, Keyword, Punct, Token, TokenKind},
};

/// Produces tokens lazily; the parser (via the preprocessor) may peek one
/// token ahead, matching spec §4.1 "finite, non-restartable; parser may
/// peek one token ahead."
pub struct Lexer<'src> {
    src: &'src [u8],
    text: &'src str,
    pos: usize,
    position: Position,
}

impl<'src> Lexer<'src> {
    #[must_use]
    pub fn new(text: &'src str) -> Self {
        Self {
            src: text.as_bytes(),
            text,
            pos: 0,
            position: Position::new(1, 1),
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.text[self.pos..].chars().next()?;
        self.pos += ch.len_utf8();
        self.position.advance(ch);
        Some(ch)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.text[self.pos..].starts_with(s)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_byte() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek_byte() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.bump();
                    self.bump();
                    while !self.starts_with("*/") && self.peek_byte().is_some() {
                        self.bump();
                    }
                    if self.starts_with("*/") {
                        self.bump();
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Produces the next token, or `TokenKind::Eof` once the input is
    /// exhausted. Calling this past EOF keeps returning `Eof` tokens.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        let start_byte = u32::try_from(self.pos).unwrap_or(u32::MAX);
        let start_pos = self.position;

        let Some(ch) = self.peek_byte() else {
            return Token::new(TokenKind::Eof, Span::new(start_byte, start_byte, start_pos));
        };

        let kind = if ch == b'#' {
            self.lex_directive()
        } else if ch.is_ascii_digit() || (ch == b'.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())) {
            self.lex_number()
        } else if is_ident_start(ch) {
            self.lex_ident_or_keyword()
        } else if ch == b'\'' {
            self.lex_char()
        } else if ch == b'"' {
            self.lex_string()
        } else {
            self.lex_punct_or_error()
        };

        let end_byte = u32::try_from(self.pos).unwrap_or(u32::MAX);
        Token::new(kind, Span::new(start_byte, end_byte, start_pos))
    }

    fn lex_directive(&mut self) -> TokenKind {
        self.bump(); // '#'
        let mut line = String::new();
        loop {
            match self.peek_byte() {
                None => break,
                Some(b'\\') if matches!(self.peek_at(1), Some(b'\n') | Some(b'\r')) => {
                    self.bump();
                    if self.peek_byte() == Some(b'\r') {
                        self.bump();
                    }
                    if self.peek_byte() == Some(b'\n') {
                        self.bump();
                    }
                    line.push(' ');
                }
                Some(b'\n') => break,
                Some(_) => {
                    if let Some(c) = self.bump() {
                        line.push(c);
                    }
                }
            }
        }
        TokenKind::Directive(line.trim().to_owned())
    }

    fn lex_number(&mut self) -> TokenKind {
        let start = self.pos;
        let mut base = IntBase::Decimal;
        let mut is_float = false;

        if self.peek_byte() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            base = IntBase::Hex;
            self.bump();
            self.bump();
            while self.peek_byte().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
        } else if self.peek_byte() == Some(b'0') && matches!(self.peek_at(1), Some(b'b' | b'B')) {
            base = IntBase::Binary;
            self.bump();
            self.bump();
            while matches!(self.peek_byte(), Some(b'0' | b'1')) {
                self.bump();
            }
        } else {
            while self.peek_byte().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
            if self.peek_byte() == Some(b'.') && !self.starts_with("..") {
                is_float = true;
                self.bump();
                while self.peek_byte().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
            if matches!(self.peek_byte(), Some(b'e' | b'E')) {
                let save = self.pos;
                let save_pos = self.position;
                self.bump();
                if matches!(self.peek_byte(), Some(b'+' | b'-')) {
                    self.bump();
                }
                if self.peek_byte().is_some_and(|c| c.is_ascii_digit()) {
                    is_float = true;
                    while self.peek_byte().is_some_and(|c| c.is_ascii_digit()) {
                        self.bump();
                    }
                } else {
                    self.pos = save;
                    self.position = save_pos;
                }
            }
            if !is_float
                && self.peek_byte() == Some(b'0')
                && self.text[start..self.pos].len() > 1
                && self.text.as_bytes()[start] == b'0'
            {
                base = IntBase::Octal;
            } else if !is_float && self.text.as_bytes()[start] == b'0' && self.pos - start > 1 {
                base = IntBase::Octal;
            }
        }
        // trailing numeric suffixes: L, UL, LL, ULL, F, f (case-insensitive)
        while matches!(self.peek_byte(), Some(b'l' | b'L' | b'u' | b'U' | b'f' | b'F')) {
            if matches!(self.peek_byte(), Some(b'f' | b'F')) {
                is_float = true;
            }
            self.bump();
        }

        let text = self.text[start..self.pos].to_owned();
        if is_float {
            TokenKind::FloatLiteral(text)
        } else {
            TokenKind::IntLiteral { text, base }
        }
    }

    fn lex_ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek_byte().is_some_and(is_ident_continue) {
            self.bump();
        }
        let text = self.text[start..self.pos].to_owned();
        match Keyword::from_ident(&text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Identifier(text),
        }
    }

    fn lex_char(&mut self) -> TokenKind {
        self.bump(); // opening '
        let ch = match self.peek_byte() {
            Some(b'\\') => {
                self.bump();
                self.lex_escape()
            }
            _ => self.bump().unwrap_or('\0'),
        };
        if self.peek_byte() == Some(b'\'') {
            self.bump();
        }
        TokenKind::CharLiteral(ch)
    }

    fn lex_escape(&mut self) -> char {
        match self.peek_byte() {
            Some(b'n') => {
                self.bump();
                '\n'
            }
            Some(b't') => {
                self.bump();
                '\t'
            }
            Some(b'r') => {
                self.bump();
                '\r'
            }
            Some(b'\\') => {
                self.bump();
                '\\'
            }
            Some(b'\'') => {
                self.bump();
                '\''
            }
            Some(b'"') => {
                self.bump();
                '"'
            }
            Some(b'0') => {
                self.bump();
                '\0'
            }
            Some(b'x') => {
                self.bump();
                let mut val: u32 = 0;
                let mut count = 0;
                while count < 2 && self.peek_byte().is_some_and(|c| c.is_ascii_hexdigit()) {
                    let c = self.bump().unwrap();
                    val = val * 16 + c.to_digit(16).unwrap_or(0);
                    count += 1;
                }
                char::from_u32(val).unwrap_or('\0')
            }
            Some(_) => self.bump().unwrap_or('\0'),
            None => '\0',
        }
    }

    fn lex_string(&mut self) -> TokenKind {
        self.bump(); // opening "
        let mut s = String::new();
        loop {
            match self.peek_byte() {
                None | Some(b'"') => break,
                Some(b'\\') => {
                    self.bump();
                    s.push(self.lex_escape());
                }
                Some(_) => {
                    if let Some(c) = self.bump() {
                        s.push(c);
                    }
                }
            }
        }
        if self.peek_byte() == Some(b'"') {
            self.bump();
        }
        TokenKind::StringLiteral(s)
    }

    fn lex_punct_or_error(&mut self) -> TokenKind {
        // Longest-match-first, so `<<=` wins over `<<` wins over `<`.
        const PUNCTS: &[(&str, Punct)] = &[
            ("...", Punct::Ellipsis),
            ("<<=", Punct::ShlEq),
            (">>=", Punct::ShrEq),
            ("::", Punct::ColonColon),
            ("->", Punct::Arrow),
            ("++", Punct::PlusPlus),
            ("--", Punct::MinusMinus),
            ("<<", Punct::Shl),
            (">>", Punct::Shr),
            ("<=", Punct::Le),
            (">=", Punct::Ge),
            ("==", Punct::EqEq),
            ("!=", Punct::Ne),
            ("&&", Punct::AmpAmp),
            ("||", Punct::PipePipe),
            ("+=", Punct::PlusEq),
            ("-=", Punct::MinusEq),
            ("*=", Punct::StarEq),
            ("/=", Punct::SlashEq),
            ("%=", Punct::PercentEq),
            ("&=", Punct::AmpEq),
            ("|=", Punct::PipeEq),
            ("^=", Punct::CaretEq),
            ("(", Punct::LParen),
            (")", Punct::RParen),
            ("{", Punct::LBrace),
            ("}", Punct::RBrace),
            ("[", Punct::LBracket),
            ("]", Punct::RBracket),
            (";", Punct::Semi),
            (",", Punct::Comma),
            (":", Punct::Colon),
            ("?", Punct::Question),
            (".", Punct::Dot),
            ("+", Punct::Plus),
            ("-", Punct::Minus),
            ("*", Punct::Star),
            ("/", Punct::Slash),
            ("%", Punct::Percent),
            ("&", Punct::Amp),
            ("|", Punct::Pipe),
            ("^", Punct::Caret),
            ("~", Punct::Tilde),
            ("!", Punct::Bang),
            ("=", Punct::Assign),
            ("<", Punct::Lt),
            (">", Punct::Gt),
        ];
        for (text, punct) in PUNCTS {
            if self.starts_with(text) {
                for _ in 0..text.len() {
                    self.bump();
                }
                return TokenKind::Punct(*punct);
            }
        }
        let ch = self.bump().unwrap_or('\0');
        TokenKind::ErrorToken(ch)
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Tokenizes the full input into a `Vec`, terminated with one `Eof`
/// token. Convenience wrapper around [`Lexer`] for callers (the
/// preprocessor, tests) that don't need streaming.
#[must_use]
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token();
        let is_eof = tok.is_eof();
        tokens.push(tok);
        if is_eof {
            break;
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_keywords_and_idents() {
        let toks = tokenize("void setup() {}");
        assert_eq!(toks[0].kind, TokenKind::Keyword(Keyword::Void));
        assert_eq!(toks[1].kind, TokenKind::Identifier("setup".to_owned()));
        assert_eq!(toks[2].kind, TokenKind::Punct(Punct::LParen));
    }

    #[test]
    fn classifies_number_bases() {
        let toks = tokenize("10 0x1A 010 0b101 3.14 1e3");
        assert!(matches!(&toks[0].kind, TokenKind::IntLiteral { base: IntBase::Decimal, .. }));
        assert!(matches!(&toks[1].kind, TokenKind::IntLiteral { base: IntBase::Hex, .. }));
        assert!(matches!(&toks[2].kind, TokenKind::IntLiteral { base: IntBase::Octal, .. }));
        assert!(matches!(&toks[3].kind, TokenKind::IntLiteral { base: IntBase::Binary, .. }));
        assert!(matches!(&toks[4].kind, TokenKind::FloatLiteral(_)));
        assert!(matches!(&toks[5].kind, TokenKind::FloatLiteral(_)));
    }

    #[test]
    fn strips_comments() {
        let toks = tokenize("int x; // trailing\n/* block */ int y;");
        let idents: Vec<_> = toks
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Identifier(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(idents, vec!["x", "y"]);
    }

    #[test]
    fn greedy_multichar_operators() {
        let toks = tokenize("a <<= b; a << b; a < b;");
        let puncts: Vec<_> = toks
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Punct(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(puncts[1], Punct::ShlEq);
        assert_eq!(puncts[4], Punct::Shl);
        assert_eq!(puncts[7], Punct::Lt);
    }

    #[test]
    fn char_escapes() {
        let toks = tokenize(r"'\n' '\t' '\x41'");
        assert_eq!(toks[0].kind, TokenKind::CharLiteral('\n'));
        assert_eq!(toks[1].kind, TokenKind::CharLiteral('\t'));
        assert_eq!(toks[2].kind, TokenKind::CharLiteral('A'));
    }

    #[test]
    fn directive_line_continuation() {
        let toks = tokenize("#define FOO \\\n  1\nint x;");
        assert!(matches!(&toks[0].kind, TokenKind::Directive(s) if s.contains("FOO") && s.contains('1')));
    }

    #[test]
    fn unknown_char_is_error_token_and_continues() {
        let toks = tokenize("int x `= 1;");
        assert!(toks.iter().any(|t| matches!(t.kind, TokenKind::ErrorToken('`'))));
        assert!(toks.iter().any(|t| t.kind == TokenKind::Punct(Punct::Semi)));
    }
}
