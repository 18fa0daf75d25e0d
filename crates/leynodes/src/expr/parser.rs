use super::lexer::{tokenize, Spanned, Token};
use super::{ExprError, MAX_DEPTH};
use leycore::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
}

/// Short-circuiting operators; they yield one of their operands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LogicalOp {
    And,
    Or,
    Nullish,
}

pub(crate) fn parse(source: &str) -> Result<Expr, ExprError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
        end: source.len(),
    };

    if matches!(parser.peek(), Some(Token::Ident(word)) if word == "return") {
        parser.pos += 1;
    }
    let expr = parser.expression()?;
    while parser.eat(&Token::Semicolon) {}

    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some(extra) => Err(ExprError::Syntax {
            pos: extra.pos,
            message: format!("unexpected {:?} after expression", extra.token),
        }),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |s| s.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ExprError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", token)))
        }
    }

    fn error(&self, message: String) -> ExprError {
        ExprError::Syntax {
            pos: self.position(),
            message,
        }
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        let expr = self.conditional();
        self.depth -= 1;
        expr
    }

    fn conditional(&mut self) -> Result<Expr, ExprError> {
        let condition = self.logical(0)?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }
        let then = self.expression()?;
        self.expect(Token::Colon)?;
        let otherwise = self.expression()?;
        Ok(Expr::Conditional(
            Box::new(condition),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    /// Precedence climbing over the binary operator table.
    fn logical(&mut self, min_prec: u8) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;

        while let Some((prec, op)) = self.peek().and_then(binary_op) {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let right = self.logical(prec + 1)?;
            left = match op {
                Op::Binary(op) => Expr::Binary(op, Box::new(left), Box::new(right)),
                Op::Logical(op) => Expr::Logical(op, Box::new(left), Box::new(right)),
            };
        }

        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => {
                self.pos += 1;
                return self.unary();
            }
            _ => return self.postfix(),
        };
        self.pos += 1;

        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        let operand = self.unary();
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand?)))
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.peek().cloned() {
                    Some(Token::Ident(name)) => {
                        self.pos += 1;
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    _ => return Err(self.error("expected property name after '.'".to_string())),
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

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of expression".to_string()));
        };
        self.pos += 1;

        match token {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                _ if self.eat(&Token::LParen) => {
                    let args = self.list(Token::RParen)?;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Ident(name)),
            },
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::Array(self.list(Token::RBracket)?)),
            Token::LBrace => self.object(),
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {:?}", other)))
            }
        }
    }

    /// Comma separated expressions up to `close`; a trailing comma is allowed.
    fn list(&mut self, close: Token) -> Result<Vec<Expr>, ExprError> {
        let mut items = Vec::new();
        while !self.eat(&close) {
            items.push(self.expression()?);
            if !self.eat(&Token::Comma) {
                self.expect(close.clone())?;
                break;
            }
        }
        Ok(items)
    }

    fn object(&mut self) -> Result<Expr, ExprError> {
        let mut fields = Vec::new();
        while !self.eat(&Token::RBrace) {
            let key = match self.peek().cloned() {
                Some(Token::Ident(name)) => name,
                Some(Token::Str(name)) => name,
                _ => return Err(self.error("expected object key".to_string())),
            };
            self.pos += 1;
            self.expect(Token::Colon)?;
            fields.push((key, self.expression()?));
            if !self.eat(&Token::Comma) {
                self.expect(Token::RBrace)?;
                break;
            }
        }
        Ok(Expr::Object(fields))
    }
}

enum Op {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn binary_op(token: &Token) -> Option<(u8, Op)> {
    let entry = match token {
        Token::NullishCoalesce => (1, Op::Logical(LogicalOp::Nullish)),
        Token::OrOr => (2, Op::Logical(LogicalOp::Or)),
        Token::AndAnd => (3, Op::Logical(LogicalOp::And)),
        Token::EqEq => (4, Op::Binary(BinaryOp::Eq)),
        Token::NotEq => (4, Op::Binary(BinaryOp::NotEq)),
        Token::Lt => (5, Op::Binary(BinaryOp::Lt)),
        Token::Le => (5, Op::Binary(BinaryOp::Le)),
        Token::Gt => (5, Op::Binary(BinaryOp::Gt)),
        Token::Ge => (5, Op::Binary(BinaryOp::Ge)),
        Token::Plus => (6, Op::Binary(BinaryOp::Add)),
        Token::Minus => (6, Op::Binary(BinaryOp::Sub)),
        Token::Star => (7, Op::Binary(BinaryOp::Mul)),
        Token::Slash => (7, Op::Binary(BinaryOp::Div)),
        Token::Percent => (7, Op::Binary(BinaryOp::Rem)),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Literal(Value::Number(n)))
    }

    #[test]
    fn multiplication_binds_tighter() {
        assert_eq!(
            parse("1 + 2 * 3").unwrap(),
            Expr::Binary(
                BinaryOp::Add,
                num(1.0),
                Box::new(Expr::Binary(BinaryOp::Mul, num(2.0), num(3.0)))
            )
        );
    }

    #[test]
    fn subtraction_is_left_associative() {
        assert_eq!(
            parse("8 - 4 - 2").unwrap(),
            Expr::Binary(
                BinaryOp::Sub,
                Box::new(Expr::Binary(BinaryOp::Sub, num(8.0), num(4.0))),
                num(2.0)
            )
        );
    }

    #[test]
    fn return_and_semicolon_are_accepted() {
        assert_eq!(parse("return input;").unwrap(), Expr::Ident("input".into()));
    }

    #[test]
    fn member_index_and_call() {
        let expr = parse("len(item.tags[0])").unwrap();
        let Expr::Call(name, args) = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "len");
        assert!(matches!(&args[0], Expr::Index(inner, _) if matches!(**inner, Expr::Member(_, ref f) if f == "tags")));
    }

    #[test]
    fn object_and_array_literals() {
        assert!(matches!(parse("{a: 1, 'b': [1, 2,]}").unwrap(), Expr::Object(fields) if fields.len() == 2));
    }

    #[test]
    fn reports_trailing_tokens() {
        assert!(matches!(parse("a b"), Err(ExprError::Syntax { pos: 2, .. })));
        assert!(parse("(1 + 2").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(matches!(parse(&deep), Err(ExprError::TooDeep(_))));
        let negations = format!("{}true", "!".repeat(MAX_DEPTH + 1));
        assert!(matches!(parse(&negations), Err(ExprError::TooDeep(_))));
    }
}
