use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Question,
    NullishCoalesce,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
}

/// Token plus the byte offset it started at
#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|(_, c)| *c);

    while let Some(&(pos, c)) = chars.get(i) {
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (token, width) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '{' => (Token::LBrace, 1),
            '}' => (Token::RBrace, 1),
            ',' => (Token::Comma, 1),
            ':' => (Token::Colon, 1),
            ';' => (Token::Semicolon, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '.' if !peek(i + 1).is_some_and(|n| n.is_ascii_digit()) => (Token::Dot, 1),
            '?' if peek(i + 1) == Some('?') => (Token::NullishCoalesce, 2),
            '?' => (Token::Question, 1),
            '<' if peek(i + 1) == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if peek(i + 1) == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            // `===` and `!==` behave like `==` and `!=`
            '=' if peek(i + 1) == Some('=') => {
                (Token::EqEq, if peek(i + 2) == Some('=') { 3 } else { 2 })
            }
            '!' if peek(i + 1) == Some('=') => {
                (Token::NotEq, if peek(i + 2) == Some('=') { 3 } else { 2 })
            }
            '!' => (Token::Bang, 1),
            '&' if peek(i + 1) == Some('&') => (Token::AndAnd, 2),
            '|' if peek(i + 1) == Some('|') => (Token::OrOr, 2),
            '"' | '\'' => {
                let (text, width) = lex_string(&chars, i, c)?;
                (Token::Str(text), width)
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                let mut end = i;
                while chars
                    .get(end)
                    .is_some_and(|(_, d)| d.is_ascii_digit() || *d == '.')
                {
                    end += 1;
                }
                let text: String = chars[start..end].iter().map(|(_, d)| d).collect();
                let number = text.parse::<f64>().map_err(|_| ExprError::Syntax {
                    pos,
                    message: format!("invalid number '{}'", text),
                })?;
                (Token::Number(number), end - start)
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                let mut end = i;
                while chars
                    .get(end)
                    .is_some_and(|(_, d)| d.is_alphanumeric() || *d == '_' || *d == '$')
                {
                    end += 1;
                }
                let name: String = chars[start..end].iter().map(|(_, d)| d).collect();
                (Token::Ident(name), end - start)
            }
            other => {
                return Err(ExprError::Syntax {
                    pos,
                    message: format!("unexpected character '{}'", other),
                })
            }
        };

        tokens.push(Spanned { token, pos });
        i += width;
    }

    Ok(tokens)
}

/// Returns the unescaped text and the number of chars consumed, quotes included.
fn lex_string(chars: &[(usize, char)], start: usize, quote: char) -> Result<(String, usize), ExprError> {
    let mut text = String::new();
    let mut i = start + 1;

    loop {
        let Some(&(_, c)) = chars.get(i) else {
            return Err(ExprError::Syntax {
                pos: chars[start].0,
                message: "unterminated string".to_string(),
            });
        };
        i += 1;

        if c == quote {
            return Ok((text, i - start));
        }
        if c != '\\' {
            text.push(c);
            continue;
        }

        let Some(&(_, escaped)) = chars.get(i) else {
            continue;
        };
        i += 1;
        text.push(match escaped {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            other => other,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn operators_and_literals() {
        assert_eq!(
            kinds("a.b >= 2.5 ?? 'x'"),
            vec![
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into()),
                Token::Ge,
                Token::Number(2.5),
                Token::NullishCoalesce,
                Token::Str("x".into()),
            ]
        );
    }

    #[test]
    fn strict_equality_is_plain_equality() {
        assert_eq!(kinds("a === b"), kinds("a == b"));
        assert_eq!(kinds("a !== b"), kinds("a != b"));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(kinds(r#""a\"b\n""#), vec![Token::Str("a\"b\n".into())]);
    }

    #[test]
    fn rejects_stray_characters() {
        assert!(matches!(tokenize("a # b"), Err(ExprError::Syntax { pos: 2, .. })));
        assert!(tokenize("'open").is_err());
        assert!(tokenize("a = b").is_err());
    }
}
