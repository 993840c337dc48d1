//! NanoQL parser
//!
//! Recursive descent over the token stream:
//!
//! ```text
//! or      := and ("OR" and)*
//! and     := not ("AND" not)*
//! not     := "NOT" not | primary
//! primary := "(" or ")" | STRING | IDENT | IDENT ":" value | IDENT "!=" value
//! value   := STRING | IDENT
//! ```

use super::lexer::{is_ident_char, Lexer, Token};
use crate::{NanoError, Result};
use std::fmt;

/// Match operator of a leaf expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Eq,
    Neq,
    Contains,
}

/// A leaf match. An empty `key` means full-text CONTAINS across all fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchExpr {
    pub key: String,
    pub value: String,
    pub op: MatchOp,
}

/// NanoQL AST node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Match(MatchExpr),
}

/// Parse a query string. Empty (or all-whitespace) input yields `None`,
/// which the evaluator treats as match-all.
pub fn parse(input: &str) -> Result<Option<Expr>> {
    if input.trim().is_empty() {
        return Ok(None);
    }

    let mut parser = Parser::new(input)?;
    let expr = parser.parse_or()?;
    if parser.current != Token::Eof {
        return Err(NanoError::Syntax(format!(
            "unexpected trailing input: {:?}",
            parser.current
        )));
    }
    Ok(Some(expr))
}

struct Parser {
    lexer: Lexer,
    current: Token,
}

impl Parser {
    fn new(input: &str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.current == Token::Not {
            self.advance()?;
            let inner = self.parse_not()?; // right-associative
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match std::mem::replace(&mut self.current, Token::Eof) {
            Token::LParen => {
                self.advance()?;
                let expr = self.parse_or()?;
                if self.current != Token::RParen {
                    return Err(NanoError::Syntax(format!(
                        "expected ')' but got {:?}",
                        self.current
                    )));
                }
                self.advance()?;
                Ok(expr)
            }
            Token::Str(value) => {
                self.advance()?;
                Ok(Expr::Match(MatchExpr {
                    key: String::new(),
                    value,
                    op: MatchOp::Contains,
                }))
            }
            Token::Ident(key) => {
                self.advance()?;
                match self.current {
                    Token::Colon => {
                        self.advance()?;
                        self.parse_value(key, MatchOp::Eq)
                    }
                    Token::Neq => {
                        self.advance()?;
                        self.parse_value(key, MatchOp::Neq)
                    }
                    // Bare word: full-text search
                    _ => Ok(Expr::Match(MatchExpr {
                        key: String::new(),
                        value: key,
                        op: MatchOp::Contains,
                    })),
                }
            }
            tok => Err(NanoError::Syntax(format!("unexpected token: {tok:?}"))),
        }
    }

    fn parse_value(&mut self, key: String, op: MatchOp) -> Result<Expr> {
        let value = match std::mem::replace(&mut self.current, Token::Eof) {
            Token::Str(value) | Token::Ident(value) => value,
            tok => {
                return Err(NanoError::Syntax(format!(
                    "expected value for field '{key}' but got {tok:?}"
                )))
            }
        };
        self.advance()?;
        Ok(Expr::Match(MatchExpr { key, value, op }))
    }
}

/// Render back to query syntax. Binary expressions are parenthesized, so
/// re-parsing a rendered expression yields an equivalent AST.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::And(left, right) => write!(f, "({left} AND {right})"),
            Expr::Or(left, right) => write!(f, "({left} OR {right})"),
            Expr::Not(inner) => write!(f, "NOT {inner}"),
            Expr::Match(m) => match m.op {
                MatchOp::Eq => write!(f, "{}:{}", m.key, quote_value(&m.value)),
                MatchOp::Neq => write!(f, "{}!={}", m.key, quote_value(&m.value)),
                MatchOp::Contains => write!(f, "{}", quote_always(&m.value)),
            },
        }
    }
}

fn is_bare_ident(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    // Keywords would be re-lexed as operators
    if matches!(value.to_ascii_uppercase().as_str(), "AND" | "OR" | "NOT") {
        return false;
    }
    chars.all(is_ident_char)
}

fn quote_value(value: &str) -> String {
    if is_bare_ident(value) {
        value.to_string()
    } else {
        quote_always(value)
    }
}

fn quote_always(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_parse(input: &str) -> Expr {
        parse(input).unwrap().unwrap()
    }

    #[test]
    fn test_empty_is_match_all() {
        assert!(parse("").unwrap().is_none());
        assert!(parse("   ").unwrap().is_none());
    }

    #[test]
    fn test_simple_match() {
        assert_eq!(
            must_parse("service:order"),
            Expr::Match(MatchExpr {
                key: "service".into(),
                value: "order".into(),
                op: MatchOp::Eq,
            })
        );
        assert_eq!(
            must_parse(r#"level:"ERROR""#),
            Expr::Match(MatchExpr {
                key: "level".into(),
                value: "ERROR".into(),
                op: MatchOp::Eq,
            })
        );
        assert_eq!(
            must_parse(r#"host!="web-1""#),
            Expr::Match(MatchExpr {
                key: "host".into(),
                value: "web-1".into(),
                op: MatchOp::Neq,
            })
        );
    }

    #[test]
    fn test_full_text() {
        assert_eq!(
            must_parse(r#""timeout""#),
            Expr::Match(MatchExpr {
                key: String::new(),
                value: "timeout".into(),
                op: MatchOp::Contains,
            })
        );
        // Bare word is also full-text
        assert_eq!(
            must_parse("timeout"),
            Expr::Match(MatchExpr {
                key: String::new(),
                value: "timeout".into(),
                op: MatchOp::Contains,
            })
        );
    }

    #[test]
    fn test_precedence_and_over_or() {
        // a OR b AND c == a OR (b AND c)
        let expr = must_parse("a OR b AND c");
        match expr {
            Expr::Or(_, right) => assert!(matches!(*right, Expr::And(_, _))),
            other => panic!("expected Or at root, got {other:?}"),
        }
    }

    #[test]
    fn test_parens_override() {
        // (a OR b) AND c
        let expr = must_parse("(a OR b) AND c");
        match expr {
            Expr::And(left, _) => assert!(matches!(*left, Expr::Or(_, _))),
            other => panic!("expected And at root, got {other:?}"),
        }
    }

    #[test]
    fn test_not_right_associative() {
        let expr = must_parse("NOT NOT a");
        match expr {
            Expr::Not(inner) => assert!(matches!(*inner, Expr::Not(_))),
            other => panic!("expected Not, got {other:?}"),
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("(a").is_err());
        assert!(parse("service:").is_err());
        assert!(parse("a AND").is_err());
        assert!(parse("AND a").is_err());
        assert!(parse("a b").is_err());
        assert!(parse(")").is_err());
    }

    #[test]
    fn test_render_roundtrip() {
        let inputs = [
            "service:order",
            r#"level:"ERROR""#,
            "service:order AND level:ERROR",
            "a OR b AND c",
            "(a OR b) AND c",
            "NOT (svc:billing OR lvl:DEBUG)",
            r#"host!=web-1 OR "connection reset""#,
            "timeout",
            r#"msg:"with \"quotes\" inside""#,
        ];
        for input in inputs {
            let once = must_parse(input);
            let again = must_parse(&once.to_string());
            assert_eq!(once, again, "round-trip changed AST for {input:?}");
        }
    }
}
