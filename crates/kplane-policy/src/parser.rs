//! Recursive-descent parser.
//!
//! Precedence, loosest first: `?:`, `||`, `&&`, `== !=`,
//! `< <= > >= in`, `+ -`, `* / %`, unary `! -`, postfix `.x [i]`.
//! Nesting depth is bounded so hostile input cannot exhaust the stack.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{PolicyError, PolicyResult};
use crate::lexer::{Spanned, Token, tokenize};
use crate::value::Value;

pub fn parse(src: &str, max_depth: usize) -> PolicyResult<Expr> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let expr = parser.expression()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected trailing token {other:?}"))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> PolicyResult<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    fn error(&self, message: String) -> PolicyError {
        PolicyError::Parse {
            pos: self.offset(),
            message,
        }
    }

    fn enter(&mut self) -> PolicyResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(PolicyError::TooDeep {
                limit: self.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expression(&mut self) -> PolicyResult<Expr> {
        self.enter()?;
        let result = self.ternary();
        self.leave();
        result
    }

    fn ternary(&mut self) -> PolicyResult<Expr> {
        let cond = self.binary(0)?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.expression()?;
        self.expect(Token::Colon)?;
        let otherwise = self.expression()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    /// Precedence climbing over the binary operator table.
    fn binary(&mut self, min_level: u8) -> PolicyResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some((op, level)) = binary_op(self.peek()) {
            if level < min_level {
                break;
            }
            self.advance();
            self.enter()?;
            let rhs = self.binary(level + 1);
            self.leave();
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PolicyResult<Expr> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.advance();
        self.enter()?;
        let inner = self.unary();
        self.leave();
        Ok(Expr::Unary(op, Box::new(inner?)))
    }

    fn postfix(&mut self) -> PolicyResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.advance() {
                    Token::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                    other => return Err(self.error(format!("expected field name, found {other:?}"))),
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.expression()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> PolicyResult<Expr> {
        let token = self.advance();
        match token {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let items = self.sequence(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.sequence(Token::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }

    /// Comma-separated expressions up to `close` (already past the opener).
    fn sequence(&mut self, close: Token) -> PolicyResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat(&close) {
                return Ok(items);
            }
            self.expect(Token::Comma)?;
        }
    }
}

/// Operator and binding level (higher binds tighter).
fn binary_op(token: &Token) -> Option<(BinaryOp, u8)> {
    Some(match token {
        Token::OrOr => (BinaryOp::Or, 0),
        Token::AndAnd => (BinaryOp::And, 1),
        Token::EqEq => (BinaryOp::Eq, 2),
        Token::NotEq => (BinaryOp::Ne, 2),
        Token::Lt => (BinaryOp::Lt, 3),
        Token::Le => (BinaryOp::Le, 3),
        Token::Gt => (BinaryOp::Gt, 3),
        Token::Ge => (BinaryOp::Ge, 3),
        Token::In => (BinaryOp::In, 3),
        Token::Plus => (BinaryOp::Add, 4),
        Token::Minus => (BinaryOp::Sub, 4),
        Token::Star => (BinaryOp::Mul, 5),
        Token::Slash => (BinaryOp::Div, 5),
        Token::Percent => (BinaryOp::Rem, 5),
        _ => return None,
    })
}
