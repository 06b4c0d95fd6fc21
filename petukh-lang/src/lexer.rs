use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    // keywords
    KwFn,
    KwInt,
    KwChar,
    KwDouble,
    KwString,
    KwIf,
    KwElse,
    KwWhile,
    KwDo,
    KwFor,
    KwReturn,
    KwBreak,
    KwContinue,

    Identifier,
    Number,
    StringLiteral,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Assign,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,

    EndOfFile,
    Unknown,
}

impl TokenKind {
    pub fn is_type_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::KwInt | TokenKind::KwChar | TokenKind::KwDouble | TokenKind::KwString
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            TokenKind::KwFn => "KW_FN",
            TokenKind::KwInt => "KW_INT",
            TokenKind::KwChar => "KW_CHAR",
            TokenKind::KwDouble => "KW_DOUBLE",
            TokenKind::KwString => "KW_STRING",
            TokenKind::KwIf => "KW_IF",
            TokenKind::KwElse => "KW_ELSE",
            TokenKind::KwWhile => "KW_WHILE",
            TokenKind::KwDo => "KW_DO",
            TokenKind::KwFor => "KW_FOR",
            TokenKind::KwReturn => "KW_RETURN",
            TokenKind::KwBreak => "KW_BREAK",
            TokenKind::KwContinue => "KW_CONTINUE",
            TokenKind::Identifier => "IDENTIFIER",
            TokenKind::Number => "NUMBER",
            TokenKind::StringLiteral => "STRING_LITERAL",
            TokenKind::Plus => "PLUS",
            TokenKind::Minus => "MINUS",
            TokenKind::Star => "STAR",
            TokenKind::Slash => "SLASH",
            TokenKind::Percent => "PERCENT",
            TokenKind::Bang => "BANG",
            TokenKind::Assign => "ASSIGN",
            TokenKind::Eq => "EQ",
            TokenKind::Neq => "NEQ",
            TokenKind::Lt => "LT",
            TokenKind::Le => "LE",
            TokenKind::Gt => "GT",
            TokenKind::Ge => "GE",
            TokenKind::LParen => "LPAREN",
            TokenKind::RParen => "RPAREN",
            TokenKind::LBrace => "LBRACE",
            TokenKind::RBrace => "RBRACE",
            TokenKind::LBracket => "LBRACKET",
            TokenKind::RBracket => "RBRACKET",
            TokenKind::Semicolon => "SEMICOLON",
            TokenKind::Comma => "COMMA",
            TokenKind::EndOfFile => "EOF",
            TokenKind::Unknown => "UNKNOWN",
        }
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub col: u32,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

/// Exact-match keyword lookup, no case folding.
struct KeywordTable {
    words: HashMap<&'static str, TokenKind>,
}

impl KeywordTable {
    fn new() -> Self {
        let words = HashMap::from([
            ("if", TokenKind::KwIf),
            ("else", TokenKind::KwElse),
            ("for", TokenKind::KwFor),
            ("while", TokenKind::KwWhile),
            ("do", TokenKind::KwDo),
            ("fn", TokenKind::KwFn),
            ("int", TokenKind::KwInt),
            ("char", TokenKind::KwChar),
            ("double", TokenKind::KwDouble),
            ("string", TokenKind::KwString),
            ("return", TokenKind::KwReturn),
            ("break", TokenKind::KwBreak),
            ("continue", TokenKind::KwContinue),
        ]);
        Self { words }
    }

    fn get(&self, word: &str) -> Option<TokenKind> {
        self.words.get(word).copied()
    }
}

/// Turns source text into tokens. Never fails: characters it does not
/// recognize come out as `Unknown` tokens for the parser to report.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    keywords: KeywordTable,
    buffered: Option<Token>,
}

impl Lexer {
    pub fn new(source: impl Into<String>) -> Self {
        let source: String = source.into();
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            keywords: KeywordTable::new(),
            buffered: None,
        }
    }

    /// Drain the lexer. The result always ends in exactly one `EndOfFile`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::EndOfFile;
            tokens.push(token);
            if done {
                break;
            }
        }
        log::debug!("lexed {} tokens", tokens.len());
        tokens
    }

    pub fn peek_token(&mut self) -> Token {
        if let Some(token) = &self.buffered {
            return token.clone();
        }
        let token = self.scan();
        self.buffered = Some(token.clone());
        token
    }

    pub fn next_token(&mut self) -> Token {
        match self.buffered.take() {
            Some(token) => token,
            None => self.scan(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn advance_if(&mut self, expected: char) -> bool {
        if self.peek(0) == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek(0).is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn scan(&mut self) -> Token {
        self.skip_whitespace();
        let (line, col) = (self.line, self.col);
        let Some(c) = self.peek(0) else {
            return Token::new(TokenKind::EndOfFile, "", line, col);
        };
        if is_letter(c) {
            self.identifier(line, col)
        } else if c.is_ascii_digit() {
            self.number(line, col)
        } else if c == '"' {
            self.string_literal(line, col)
        } else {
            self.symbol(line, col)
        }
    }

    fn identifier(&mut self, line: u32, col: u32) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if !(is_letter(c) || c.is_ascii_digit()) {
                break;
            }
            text.push(c);
            self.advance();
        }
        let kind = self.keywords.get(&text).unwrap_or(TokenKind::Identifier);
        Token::new(kind, text, line, col)
    }

    fn number(&mut self, line: u32, col: u32) -> Token {
        let mut text = String::new();
        self.digits(&mut text);
        // the dot belongs to the number only when a digit follows it
        if self.peek(0) == Some('.') && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            self.digits(&mut text);
        }
        Token::new(TokenKind::Number, text, line, col)
    }

    fn digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek(0).filter(char::is_ascii_digit) {
            text.push(c);
            self.advance();
        }
    }

    // No escape processing: backslashes are kept verbatim.
    fn string_literal(&mut self, line: u32, col: u32) -> Token {
        let mut text = String::new();
        self.advance();
        while let Some(c) = self.peek(0) {
            if c == '"' {
                break;
            }
            text.push(c);
            self.advance();
        }
        self.advance();
        Token::new(TokenKind::StringLiteral, text, line, col)
    }

    fn symbol(&mut self, line: u32, col: u32) -> Token {
        let Some(c) = self.advance() else {
            return Token::new(TokenKind::EndOfFile, "", line, col);
        };
        #[rustfmt::skip]
        let (kind, text) = match c {
            '+' => (TokenKind::Plus, "+"),
            '-' => (TokenKind::Minus, "-"),
            '*' => (TokenKind::Star, "*"),
            '/' => (TokenKind::Slash, "/"),
            '%' => (TokenKind::Percent, "%"),
            '(' => (TokenKind::LParen, "("),
            ')' => (TokenKind::RParen, ")"),
            '{' => (TokenKind::LBrace, "{"),
            '}' => (TokenKind::RBrace, "}"),
            '[' => (TokenKind::LBracket, "["),
            ']' => (TokenKind::RBracket, "]"),
            ',' => (TokenKind::Comma, ","),
            ';' => (TokenKind::Semicolon, ";"),
            '=' => if self.advance_if('=') { (TokenKind::Eq, "==") } else { (TokenKind::Assign, "=") },
            '!' => if self.advance_if('=') { (TokenKind::Neq, "!=") } else { (TokenKind::Bang, "!") },
            '<' => if self.advance_if('=') { (TokenKind::Le, "<=") } else { (TokenKind::Lt, "<") },
            '>' => if self.advance_if('=') { (TokenKind::Ge, ">=") } else { (TokenKind::Gt, ">") },
            other => return Token::new(TokenKind::Unknown, other.to_string(), line, col),
        };
        Token::new(kind, text, line, col)
    }
}

fn is_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::TokenKind::*;
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_main_program() {
        let source = "fn int main() { int x = 2 + 3; printInt(x); return 0; }";
        assert_eq!(
            kinds(source),
            vec![
                KwFn, KwInt, Identifier, LParen, RParen, LBrace, KwInt, Identifier, Assign,
                Number, Plus, Number, Semicolon, Identifier, LParen, Identifier, RParen,
                Semicolon, KwReturn, Number, Semicolon, RBrace, EndOfFile,
            ]
        );
        let tokens = tokenize(source);
        assert_eq!(tokens[2].text, "main");
        assert_eq!(tokens[13].text, "printInt");
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("int a;\n  a = 10;");
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].col), (1, 5));
        assert_eq!((tokens[3].line, tokens[3].col), (2, 3));
        assert_eq!((tokens[5].line, tokens[5].col), (2, 7));
        assert_eq!(tokens[5].text, "10");
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("3.14 42 7.");
        assert_eq!(tokens[0].text, "3.14");
        assert_eq!(tokens[1].text, "42");
        assert_eq!(tokens[2].text, "7");
        // dangling dot is left for the symbol path
        assert_eq!(tokens[3].kind, Unknown);
        assert_eq!(tokens[3].text, ".");
        assert_eq!(tokens[4].kind, EndOfFile);
    }

    #[test]
    fn test_string_literal() {
        let tokens = tokenize(r#"printStr("a\n b");"#);
        assert_eq!(tokens[2].kind, StringLiteral);
        assert_eq!(tokens[2].text, r"a\n b");
        assert_eq!(tokens[3].kind, RParen);
    }

    #[test]
    fn test_unterminated_string() {
        let tokens = tokenize("\"abc");
        assert_eq!(tokens[0].kind, StringLiteral);
        assert_eq!(tokens[0].text, "abc");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("= == ! != < <= > >= % @"),
            vec![Assign, Eq, Bang, Neq, Lt, Le, Gt, Ge, Percent, Unknown, EndOfFile]
        );
    }

    #[test]
    fn test_keywords_exact_match() {
        assert_eq!(
            kinds("while While whilex do_ continue"),
            vec![KwWhile, Identifier, Identifier, Identifier, KwContinue, EndOfFile]
        );
    }

    #[test]
    fn test_eof_has_no_text() {
        let tokens = tokenize("   \n ");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, EndOfFile);
        assert!(tokens[0].text.is_empty());
    }

    #[test]
    fn test_peek_is_idempotent() {
        let mut lexer = Lexer::new("a b");
        assert_eq!(lexer.peek_token().text, "a");
        assert_eq!(lexer.peek_token().text, "a");
        assert_eq!(lexer.next_token().text, "a");
        assert_eq!(lexer.next_token().text, "b");
        assert_eq!(lexer.next_token().kind, EndOfFile);
        assert_eq!(lexer.next_token().kind, EndOfFile);
    }
}
