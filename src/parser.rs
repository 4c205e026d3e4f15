// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Hand-written recursive descent parser for equation bodies.
//!
//! An equation body is a sequence of assignment statements separated by
//! newlines or semicolons, with `#` comments stripped to end of line.
//! Each statement is lexed and parsed independently; error offsets are
//! relative to the statement's own source text.

use crate::ast::{BinaryOp, Expr, Stmt, UnaryOp};
use crate::common::{EquationError, EquationResult, ErrorCode};
use crate::eqn_err;
use crate::token::{Lexer, Spanned, Token};

/// TokenKind discriminant for efficient peek comparisons without payload matching
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenKind {
    If,
    Then,
    Else,
    Not,
    Mod,
    And,
    Or,
    Assign,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Plus,
    Minus,
    Mul,
    Div,
    Exp,
    LParen,
    RParen,
    Comma,
    Ident,
    Num,
}

impl<'a> From<&Token<'a>> for TokenKind {
    fn from(token: &Token<'a>) -> Self {
        match token {
            Token::If => TokenKind::If,
            Token::Then => TokenKind::Then,
            Token::Else => TokenKind::Else,
            Token::Not => TokenKind::Not,
            Token::Mod => TokenKind::Mod,
            Token::And => TokenKind::And,
            Token::Or => TokenKind::Or,
            Token::Assign => TokenKind::Assign,
            Token::Eq => TokenKind::Eq,
            Token::Neq => TokenKind::Neq,
            Token::Lt => TokenKind::Lt,
            Token::Lte => TokenKind::Lte,
            Token::Gt => TokenKind::Gt,
            Token::Gte => TokenKind::Gte,
            Token::Plus => TokenKind::Plus,
            Token::Minus => TokenKind::Minus,
            Token::Mul => TokenKind::Mul,
            Token::Div => TokenKind::Div,
            Token::Exp => TokenKind::Exp,
            Token::LParen => TokenKind::LParen,
            Token::RParen => TokenKind::RParen,
            Token::Comma => TokenKind::Comma,
            Token::Ident(_) => TokenKind::Ident,
            Token::Num(_) => TokenKind::Num,
        }
    }
}

struct Parser<'input> {
    tokens: Vec<Spanned<Token<'input>>>,
    pos: usize,
}

impl<'input> Parser<'input> {
    fn new(lexer: Lexer<'input>) -> EquationResult<Self> {
        let mut tokens = Vec::new();
        for result in lexer {
            match result {
                Ok(tok) => tokens.push(tok),
                Err(e) => return Err(e),
            }
        }
        Ok(Parser { tokens, pos: 0 })
    }

    fn peek(&self) -> Option<&Spanned<Token<'input>>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|(_, tok, _)| TokenKind::from(tok))
    }

    fn advance(&mut self) -> Option<&Spanned<Token<'input>>> {
        if self.pos < self.tokens.len() {
            let tok = &self.tokens[self.pos];
            self.pos += 1;
            Some(tok)
        } else {
            None
        }
    }

    fn expect(&mut self, expected: TokenKind) -> EquationResult<&Spanned<Token<'input>>> {
        if self.peek_kind() == Some(expected) {
            Ok(self.advance().unwrap())
        } else if let Some((start, _, _)) = self.peek() {
            eqn_err!(UnrecognizedToken, *start)
        } else {
            eqn_err!(UnrecognizedEof, self.eof_position())
        }
    }

    fn eof_position(&self) -> usize {
        if let Some((_, _, end)) = self.tokens.last() {
            *end
        } else {
            0
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Parse a whole statement: `target = expr`.
    /// Returns Ok(None) for empty or comment-only input.
    fn parse_stmt(&mut self) -> EquationResult<Option<Stmt>> {
        if self.is_at_end() {
            return Ok(None);
        }

        let target = match self.peek() {
            Some(&(start, Token::Ident(name), _)) => {
                // the target must be a bare identifier followed by `=`
                if self.tokens.get(self.pos + 1).map(|(_, t, _)| TokenKind::from(t))
                    != Some(TokenKind::Assign)
                {
                    return eqn_err!(BadAssignTarget, start);
                }
                name.to_string()
            }
            Some(&(start, _, _)) => {
                return eqn_err!(BadAssignTarget, start);
            }
            None => unreachable!(),
        };
        self.advance();
        self.advance(); // consume '='

        let value = self.parse_expr()?;

        if let Some((start, _, _)) = self.peek() {
            return eqn_err!(ExtraToken, *start);
        }

        Ok(Some(Stmt { target, value }))
    }

    /// Parse a top-level expression (includes if-then-else)
    fn parse_expr(&mut self) -> EquationResult<Expr> {
        if self.peek_kind() == Some(TokenKind::If) {
            self.parse_if()
        } else {
            self.parse_logical()
        }
    }

    fn parse_if(&mut self) -> EquationResult<Expr> {
        self.expect(TokenKind::If)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Then)?;
        let then_expr = self.parse_expr()?;
        self.expect(TokenKind::Else)?;
        let else_expr = self.parse_expr()?;
        Ok(Expr::If(
            Box::new(cond),
            Box::new(then_expr),
            Box::new(else_expr),
        ))
    }

    /// Parse logical operators (and, or) - lowest precedence binary ops
    fn parse_logical(&mut self) -> EquationResult<Expr> {
        let mut left = self.parse_equality()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::And) => BinaryOp::And,
                Some(TokenKind::Or) => BinaryOp::Or,
                _ => break,
            };
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Op2(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// Parse equality operators (==, !=)
    fn parse_equality(&mut self) -> EquationResult<Expr> {
        let mut left = self.parse_comparison()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Eq) => BinaryOp::Eq,
                Some(TokenKind::Neq) => BinaryOp::Neq,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Op2(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// Parse comparison operators (<, <=, >, >=)
    fn parse_comparison(&mut self) -> EquationResult<Expr> {
        let mut left = self.parse_additive()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Lt) => BinaryOp::Lt,
                Some(TokenKind::Lte) => BinaryOp::Lte,
                Some(TokenKind::Gt) => BinaryOp::Gt,
                Some(TokenKind::Gte) => BinaryOp::Gte,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Op2(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// Parse additive operators (+, -)
    fn parse_additive(&mut self) -> EquationResult<Expr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Op2(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// Parse multiplicative operators (*, /, %, mod)
    fn parse_multiplicative(&mut self) -> EquationResult<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Mul) => BinaryOp::Mul,
                Some(TokenKind::Div) => BinaryOp::Div,
                Some(TokenKind::Mod) => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Op2(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// Parse unary operators (+, -, not)
    fn parse_unary(&mut self) -> EquationResult<Expr> {
        let op = match self.peek_kind() {
            Some(TokenKind::Plus) => UnaryOp::Positive,
            Some(TokenKind::Minus) => UnaryOp::Negative,
            Some(TokenKind::Not) => UnaryOp::Not,
            _ => return self.parse_exponentiation(),
        };
        self.advance();
        let operand = self.parse_exponentiation()?;
        Ok(Expr::Op1(op, Box::new(operand)))
    }

    /// Parse exponentiation operator (^) - left associative
    fn parse_exponentiation(&mut self) -> EquationResult<Expr> {
        let mut left = self.parse_app()?;

        while self.peek_kind() == Some(TokenKind::Exp) {
            self.advance();
            let right = self.parse_app()?;
            left = Expr::Op2(BinaryOp::Exp, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// Parse function application: id(args)
    fn parse_app(&mut self) -> EquationResult<Expr> {
        if self.peek_kind() == Some(TokenKind::Ident)
            && self.pos + 1 < self.tokens.len()
            && TokenKind::from(&self.tokens[self.pos + 1].1) == TokenKind::LParen
        {
            let (_, tok, _) = *self.advance().unwrap();
            let name = if let Token::Ident(s) = tok {
                s.to_lowercase()
            } else {
                unreachable!()
            };

            self.advance(); // consume '('
            let args = self.parse_comma_separated_exprs()?;
            self.expect(TokenKind::RParen)?;

            return Ok(Expr::App(name, args));
        }

        self.parse_atom()
    }

    /// Parse an atomic expression (number, identifier, parenthesized expression)
    fn parse_atom(&mut self) -> EquationResult<Expr> {
        match self.peek_kind() {
            Some(TokenKind::Num) => {
                let (start, tok, _) = *self.advance().unwrap();
                if let Token::Num(s) = tok {
                    match s.parse::<f64>() {
                        Ok(n) => Ok(Expr::Const(s.to_string(), n)),
                        Err(_) => eqn_err!(ExpectedNumber, start),
                    }
                } else {
                    unreachable!()
                }
            }
            Some(TokenKind::Ident) => {
                let (_, tok, _) = *self.advance().unwrap();
                if let Token::Ident(s) = tok {
                    Ok(Expr::Var(s.to_string()))
                } else {
                    unreachable!()
                }
            }
            Some(TokenKind::LParen) => {
                self.advance(); // consume '('
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            Some(_) => {
                let (start, _, _) = self.peek().unwrap();
                eqn_err!(UnrecognizedToken, *start)
            }
            None => eqn_err!(UnrecognizedEof, self.eof_position()),
        }
    }

    fn parse_comma_separated_exprs(&mut self) -> EquationResult<Vec<Expr>> {
        let mut exprs = Vec::new();

        if self.peek_kind() == Some(TokenKind::RParen) {
            return Ok(exprs);
        }

        exprs.push(self.parse_expr()?);

        while self.peek_kind() == Some(TokenKind::Comma) {
            self.advance(); // consume ','

            if self.peek_kind() == Some(TokenKind::RParen) {
                break;
            }

            exprs.push(self.parse_expr()?);
        }

        Ok(exprs)
    }
}

fn parse_single_stmt(line: &str) -> EquationResult<Option<Stmt>> {
    let lexer = Lexer::new(line);
    let mut parser = Parser::new(lexer)?;
    parser.parse_stmt()
}

/// Parse an equation body into its statement list.
///
/// Returns `Err` with every statement-level error found; a body with no
/// statements at all is an `empty_equation` error.
pub fn parse(source: &str) -> Result<Vec<Stmt>, Vec<EquationError>> {
    let mut stmts = Vec::new();
    let mut errors = Vec::new();

    for line in source.split('\n') {
        // a comment runs to end of line, so it must be stripped before
        // the line is split on `;`
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        for fragment in line.split(';') {
            match parse_single_stmt(fragment) {
                Ok(Some(stmt)) => stmts.push(stmt),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    if stmts.is_empty() {
        return Err(vec![EquationError {
            location: 0,
            code: ErrorCode::EmptyEquation,
        }]);
    }

    Ok(stmts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::print_stmt;

    fn parse_one(source: &str) -> Stmt {
        let mut stmts = parse(source).unwrap();
        assert_eq!(stmts.len(), 1);
        stmts.pop().unwrap()
    }

    #[test]
    fn test_parse_precedence() {
        let stmt = parse_one("scope.y = scope.a + scope.b * scope.c");
        assert_eq!(
            "scope.y = (scope.a + (scope.b * scope.c))",
            print_stmt(&stmt)
        );

        let stmt = parse_one("scope.y = -scope.a ^ 2");
        assert_eq!("scope.y = -(scope.a ^ 2)", print_stmt(&stmt));

        let stmt = parse_one("scope.y = (scope.a + scope.b) * scope.c");
        assert_eq!(
            "scope.y = ((scope.a + scope.b) * scope.c)",
            print_stmt(&stmt)
        );
    }

    #[test]
    fn test_parse_if() {
        let stmt = parse_one("scope.y = if scope.a > 0 then scope.a else 0");
        assert_eq!(
            "scope.y = if ((scope.a > 0)) then (scope.a) else (0)",
            print_stmt(&stmt)
        );
    }

    #[test]
    fn test_parse_app() {
        let stmt = parse_one("scope.y = MAX(scope.a, 0.0)");
        assert_eq!("scope.y = max(scope.a, 0.0)", print_stmt(&stmt));
    }

    #[test]
    fn test_parse_multiple_statements() {
        let stmts = parse(
            "scope.q = scope.k * (scope.t2 - scope.t1)  # flux\n\
             scope.t1_dot = scope.q / scope.c1\n\
             scope.t2_dot = -scope.q / scope.c2",
        )
        .unwrap();
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[1].target, "scope.t1_dot");
    }

    #[test]
    fn test_parse_semicolon_separator() {
        let stmts = parse("scope.a = 1; scope.b = scope.a + 1").unwrap();
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn test_parse_semicolon_in_comment() {
        let stmts = parse("scope.x_dot = scope.x # decay; see notes").unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].target, "scope.x_dot");

        let stmts = parse("scope.a = 1; scope.b = 2 # a; b\nscope.c = 3").unwrap();
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn test_parse_empty() {
        let errs = parse("  # only a comment\n\n").unwrap_err();
        assert_eq!(errs[0].code, ErrorCode::EmptyEquation);
    }

    #[test]
    fn test_parse_bad_target() {
        let errs = parse("3 = scope.a").unwrap_err();
        assert_eq!(errs[0].code, ErrorCode::BadAssignTarget);

        let errs = parse("scope.a + 1").unwrap_err();
        assert_eq!(errs[0].code, ErrorCode::BadAssignTarget);
    }

    #[test]
    fn test_parse_extra_token() {
        let errs = parse("scope.a = 1 2").unwrap_err();
        assert_eq!(errs[0].code, ErrorCode::ExtraToken);
    }
}
