// Grammar, loosest binding first:
//
// program    = { function | statement | ";" }
// function   = "fn" type IDENT "(" [ arg { "," arg } ] ")" block
// arg        = type IDENT [ "[" "]" ]
// block      = "{" { statement | ";" } "}"
// statement  = block | if | while | do_while | for | return | break | continue
//            | var_decls | expression ";"
// var_decls  = type var { "," var } ";"
// var        = IDENT [ "=" assignment ] [ "[" expression "]" ]
// if         = "if" "(" expression ")" block { "else" "if" "(" expression ")" block } [ "else" block ]
// for        = "for" "(" ( var_decls | [ expression ] ";" ) [ expression ] ";" [ expression ] ")" block
//
// expression = assignment [ "," expression ]          (right associative)
// assignment = equality [ "=" assignment ]            (right associative)
// equality   = relational { ( "==" | "!=" ) relational }
// relational = additive { ( "<" | "<=" | ">" | ">=" ) additive }
// additive   = term { ( "+" | "-" ) term }
// term       = unary { ( "*" | "/" | "%" ) unary }
// unary      = ( "+" | "-" | "!" ) unary | postfix
// postfix    = IDENT { "(" [ assignment { "," assignment } ] ")" | "[" expression "]" }
//            | primary
// primary    = NUMBER | STRING | IDENT | "(" expression ")"

use crate::ast::{Node, NodeKind, SourceInfo};
use crate::error::Error;
use crate::lexer::{Token, TokenKind};

pub struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    errors: Vec<Error>,
    eof: Token,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        let eof = match tokens.last() {
            Some(last) => Token::new(TokenKind::EndOfFile, "", last.line, last.col),
            None => Token::new(TokenKind::EndOfFile, "", 1, 1),
        };
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
            eof,
        }
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }

    /// Parse the whole token stream. Always returns a `Program` node, syntax
    /// errors are collected on the side.
    pub fn parse_program(&mut self) -> Node {
        let mut program = Node::new(NodeKind::Program, "Program", SourceInfo::new(1, 1));
        while !self.at_end() {
            if self.matches(TokenKind::Semicolon) {
                continue;
            }
            let item = if self.check(TokenKind::KwFn) {
                self.function()
            } else {
                self.statement()
            };
            program.push(item);
        }
        log::debug!(
            "parsed {} top-level items with {} syntax errors",
            program.children.len(),
            self.errors.len()
        );
        program
    }

    // Token helpers

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn src(&self) -> SourceInfo {
        SourceInfo::from(self.peek())
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::EndOfFile
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        let token = self.peek();
        self.errors.push(Error::Parse {
            line: token.line,
            column: token.col,
            message: message.into(),
        });
    }

    /// Consume a token of `kind`. On mismatch the error is recorded, one
    /// token is discarded (unless at the end) and a placeholder is returned
    /// so the caller can keep building its node.
    fn expect(&mut self, kind: TokenKind, message: &str) -> Token {
        if self.check(kind) {
            return self.advance();
        }
        let message = if self.at_end() {
            message.to_owned()
        } else {
            format!("{} at '{}'", message, self.peek().text)
        };
        self.error(message);
        if self.at_end() {
            return self.eof.clone();
        }
        let skipped = self.advance();
        Token::new(TokenKind::Unknown, "", skipped.line, skipped.col)
    }

    /// A type keyword, or `int` assumed (without consuming) when missing.
    fn type_node(&mut self, message: &str) -> Node {
        let src = self.src();
        if self.peek().kind.is_type_keyword() {
            let token = self.advance();
            return Node::new(NodeKind::TypeNode, token.text, src);
        }
        self.error(message);
        Node::new(NodeKind::TypeNode, "int", src)
    }

    // Declarations

    fn function(&mut self) -> Node {
        let src = self.src();
        self.expect(TokenKind::KwFn, "expected 'fn'");
        let return_type = self.type_node("expected return type after 'fn'");
        let name = self.expect(TokenKind::Identifier, "expected function name");

        let mut function = Node::new(NodeKind::Function, name.text, src);
        function.push(return_type);

        self.expect(TokenKind::LParen, "expected '(' after function name");
        if !self.matches(TokenKind::RParen) {
            loop {
                let arg_type = self.type_node("expected argument type");
                let name = self.expect(TokenKind::Identifier, "expected argument name");
                let mut arg = Node::new(NodeKind::FuncArg, name.text, arg_type.src);
                arg.push(arg_type);
                if self.matches(TokenKind::LBracket) {
                    self.expect(TokenKind::RBracket, "expected ']'");
                    arg.is_array = true;
                }
                function.push(arg);

                if self.matches(TokenKind::Comma) {
                    continue;
                }
                self.expect(TokenKind::RParen, "expected ')' after arguments");
                break;
            }
        }

        function.push(self.block());
        function
    }

    fn var_decl_list(&mut self) -> Node {
        let src = self.src();
        let type_node = self.type_node("expected type");
        let mut list = Node::new(NodeKind::VarDeclList, "VarDeclList", src);
        list.push(type_node);

        loop {
            let name = self.expect(TokenKind::Identifier, "expected variable name");
            let mut var = Node::new(NodeKind::VarDecl, name.text.clone(), SourceInfo::from(&name));

            if self.matches(TokenKind::Assign) {
                var.push(self.assignment());
            }
            if self.matches(TokenKind::LBracket) {
                if !var.children.is_empty() {
                    self.error("array declaration cannot have an initializer");
                    var.children.clear();
                }
                var.is_array = true;
                var.push(self.expression());
                self.expect(TokenKind::RBracket, "expected ']'");
            }
            list.push(var);

            if !self.matches(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::Semicolon, "expected ';' after variable list");
        list
    }

    // Statements

    fn block(&mut self) -> Node {
        let src = self.src();
        self.expect(TokenKind::LBrace, "expected '{'");
        let mut block = Node::new(NodeKind::Block, "Block", src);
        while !self.at_end() && !self.check(TokenKind::RBrace) {
            if self.matches(TokenKind::Semicolon) {
                continue;
            }
            block.push(self.statement());
        }
        self.expect(TokenKind::RBrace, "expected '}'");
        block
    }

    fn statement(&mut self) -> Node {
        let kind = self.peek().kind;
        match kind {
            TokenKind::LBrace => self.block(),
            TokenKind::KwIf => self.if_statement(),
            TokenKind::KwWhile => self.while_statement(),
            TokenKind::KwDo => self.do_while_statement(),
            TokenKind::KwFor => self.for_statement(),
            TokenKind::KwReturn => self.return_statement(),
            TokenKind::KwBreak => self.jump_statement(NodeKind::Break, "break"),
            TokenKind::KwContinue => self.jump_statement(NodeKind::Continue, "continue"),
            kind if kind.is_type_keyword() => self.var_decl_list(),
            _ => self.expression_statement(),
        }
    }

    fn if_statement(&mut self) -> Node {
        let src = self.src();
        self.expect(TokenKind::KwIf, "expected 'if'");
        self.expect(TokenKind::LParen, "expected '(' after if");
        let condition = self.expression();
        self.expect(TokenKind::RParen, "expected ')' after if condition");
        let then_block = self.block();

        let mut node = Node::new(NodeKind::If, "If", src).with_children(vec![condition, then_block]);

        while self.check(TokenKind::KwElse) {
            let else_src = self.src();
            self.advance();
            if !self.matches(TokenKind::KwIf) {
                node.push(self.block());
                break;
            }
            self.expect(TokenKind::LParen, "expected '(' after else if");
            let condition = self.expression();
            self.expect(TokenKind::RParen, "expected ')' after else if condition");
            let block = self.block();
            node.push(Node::new(NodeKind::ElseIf, "ElseIf", else_src).with_children(vec![condition, block]));
        }
        node
    }

    fn while_statement(&mut self) -> Node {
        let src = self.src();
        self.expect(TokenKind::KwWhile, "expected 'while'");
        self.expect(TokenKind::LParen, "expected '(' after while");
        let condition = self.expression();
        self.expect(TokenKind::RParen, "expected ')' after while condition");
        let body = self.block();
        Node::new(NodeKind::While, "While", src).with_children(vec![condition, body])
    }

    fn do_while_statement(&mut self) -> Node {
        let src = self.src();
        self.expect(TokenKind::KwDo, "expected 'do'");
        let body = self.block();
        self.expect(TokenKind::KwWhile, "expected 'while' after do-block");
        self.expect(TokenKind::LParen, "expected '(' after while");
        let condition = self.expression();
        self.expect(TokenKind::RParen, "expected ')'");
        self.expect(TokenKind::Semicolon, "expected ';' after do-while");
        Node::new(NodeKind::DoWhile, "DoWhile", src).with_children(vec![body, condition])
    }

    fn for_statement(&mut self) -> Node {
        let src = self.src();
        self.expect(TokenKind::KwFor, "expected 'for'");
        self.expect(TokenKind::LParen, "expected '(' after for");

        let init = if self.peek().kind.is_type_keyword() {
            // consumes its own ';'
            self.var_decl_list()
        } else if !self.check(TokenKind::Semicolon) {
            let init_src = self.src();
            let expr = self.expression();
            self.expect(TokenKind::Semicolon, "expected ';' after for-init expression");
            Node::new(NodeKind::ExprStmt, "ExprStmt", init_src).with_children(vec![expr])
        } else {
            let empty = Node::empty(self.src());
            self.advance();
            empty
        };

        let condition = if self.check(TokenKind::Semicolon) {
            Node::empty(self.src())
        } else {
            self.expression()
        };
        self.expect(TokenKind::Semicolon, "expected ';' after for condition");

        let step = if self.check(TokenKind::RParen) {
            Node::empty(self.src())
        } else {
            self.expression()
        };
        self.expect(TokenKind::RParen, "expected ')' after for header");

        let body = self.block();
        Node::new(NodeKind::For, "For", src).with_children(vec![init, condition, step, body])
    }

    fn return_statement(&mut self) -> Node {
        let src = self.src();
        self.expect(TokenKind::KwReturn, "expected 'return'");
        let mut node = Node::new(NodeKind::Return, "Return", src);
        if !self.check(TokenKind::Semicolon) {
            node.push(self.expression());
        }
        self.expect(TokenKind::Semicolon, "expected ';' after return");
        node
    }

    fn jump_statement(&mut self, kind: NodeKind, keyword: &str) -> Node {
        let src = self.src();
        self.advance();
        self.expect(TokenKind::Semicolon, &format!("expected ';' after {}", keyword));
        let text = match kind {
            NodeKind::Break => "Break",
            _ => "Continue",
        };
        Node::new(kind, text, src)
    }

    fn expression_statement(&mut self) -> Node {
        let src = self.src();
        let expr = self.expression();
        self.expect(TokenKind::Semicolon, "expected ';' after expression");
        Node::new(NodeKind::ExprStmt, "ExprStmt", src).with_children(vec![expr])
    }

    // Expressions

    fn expression(&mut self) -> Node {
        let left = self.assignment();
        if !self.check(TokenKind::Comma) {
            return left;
        }
        self.advance();
        let right = self.expression();
        Node::new(NodeKind::CommaExpr, ",", left.src).with_children(vec![left, right])
    }

    fn assignment(&mut self) -> Node {
        let target = self.equality();
        if !self.matches(TokenKind::Assign) {
            return target;
        }
        if !matches!(target.kind, NodeKind::Identifier | NodeKind::Index) {
            self.error("left side of assignment must be variable or array element");
        }
        let value = self.assignment();
        Node::new(NodeKind::Assign, "=", target.src).with_children(vec![target, value])
    }

    /// One left-associative binary precedence level.
    fn binary_level(&mut self, operators: &[TokenKind], operand: fn(&mut Self) -> Node) -> Node {
        let mut node = operand(self);
        while operators.contains(&self.peek().kind) {
            let op = self.advance();
            let rhs = operand(self);
            node = Node::new(NodeKind::Binary, op.text, node.src).with_children(vec![node, rhs]);
        }
        node
    }

    fn equality(&mut self) -> Node {
        self.binary_level(&[TokenKind::Eq, TokenKind::Neq], Self::relational)
    }

    fn relational(&mut self) -> Node {
        self.binary_level(
            &[TokenKind::Lt, TokenKind::Le, TokenKind::Gt, TokenKind::Ge],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Node {
        self.binary_level(&[TokenKind::Plus, TokenKind::Minus], Self::term)
    }

    fn term(&mut self) -> Node {
        self.binary_level(
            &[TokenKind::Star, TokenKind::Slash, TokenKind::Percent],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Node {
        if matches!(
            self.peek().kind,
            TokenKind::Plus | TokenKind::Minus | TokenKind::Bang
        ) {
            let op = self.advance();
            let operand = self.unary();
            return Node::new(NodeKind::Unary, op.text.clone(), SourceInfo::from(&op))
                .with_children(vec![operand]);
        }
        self.postfix()
    }

    // Calls and indexing only follow a name.
    fn postfix(&mut self) -> Node {
        let mut node = self.primary();
        if !node.is(NodeKind::Identifier) {
            return node;
        }
        loop {
            if self.matches(TokenKind::LParen) {
                let src = node.src;
                let mut call = Node::new(NodeKind::Call, "Call", src);
                call.push(node);
                if !self.matches(TokenKind::RParen) {
                    call.push(self.assignment());
                    while self.matches(TokenKind::Comma) {
                        call.push(self.assignment());
                    }
                    self.expect(TokenKind::RParen, "expected ')'");
                }
                node = call;
            } else if self.matches(TokenKind::LBracket) {
                let index = self.expression();
                self.expect(TokenKind::RBracket, "expected ']'");
                node = Node::new(NodeKind::Index, "Index", node.src).with_children(vec![node, index]);
            } else {
                return node;
            }
        }
    }

    fn primary(&mut self) -> Node {
        let src = self.src();
        let kind = self.peek().kind;
        match kind {
            TokenKind::Number => Node::new(NodeKind::Number, self.advance().text, src),
            TokenKind::StringLiteral => Node::new(NodeKind::String, self.advance().text, src),
            TokenKind::Identifier => Node::new(NodeKind::Identifier, self.advance().text, src),
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression();
                self.expect(TokenKind::RParen, "expected ')'");
                expr
            }
            TokenKind::EndOfFile => {
                self.error("unexpected end of input in expression");
                Node::new(NodeKind::Number, "0", src)
            }
            _ => {
                let message = format!("unexpected token in expression: '{}'", self.peek().text);
                self.error(message);
                self.advance();
                Node::new(NodeKind::Number, "0", src)
            }
        }
    }
}

/// Parse a token sequence into a `Program` node plus every syntax error found.
pub fn parse_program(tokens: &[Token]) -> (Node, Vec<Error>) {
    let mut parser = Parser::new(tokens);
    let program = parser.parse_program();
    (program, parser.into_errors())
}
