//! Structured search queries.
//!
//! ```text
//! query      := or_expr
//! or_expr    := and_expr ("OR" and_expr)*
//! and_expr   := unary (["AND"] unary)*
//! unary      := "NOT" unary | primary
//! primary    := "(" or_expr ")"
//!             | "distance" "(" field "," "geopoint" "(" lat "," lon ")" ")" cmp number
//!             | field cmp value
//!             | word | "quoted words"
//! cmp        := "=" | ":" | "<" | "<=" | ">" | ">="
//! ```
//!
//! Bare words match the `text` field. Text values match when every word of
//! the value appears in the field (case-insensitive); a value like
//! `"foo OR bar"` matches either alternative.

use crisismap_common::GeoPoint;

use super::{Document, FieldValue};
use crate::error::{StoreError, StoreResult};

/// Deepest allowed nesting of parentheses and `NOT`s.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Has,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn compare(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Eq | CmpOp::Has => lhs == rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }

    fn is_equality(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Has)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// The empty query; matches everything.
    All,
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    Term(String),
    Field {
        name: String,
        op: CmpOp,
        value: String,
    },
    Distance {
        field: String,
        center: GeoPoint,
        op: CmpOp,
        meters: f64,
    },
}

impl Query {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Query::All => true,
            Query::And(parts) => parts.iter().all(|q| q.matches(doc)),
            Query::Or(parts) => parts.iter().any(|q| q.matches(doc)),
            Query::Not(inner) => !inner.matches(doc),
            Query::Term(value) => doc.values("text").any(|v| match v {
                FieldValue::Text(text) => text_matches(text, value),
                _ => false,
            }),
            Query::Field { name, op, value } => doc.values(name).any(|v| match v {
                FieldValue::Text(text) => op.is_equality() && text_matches(text, value),
                FieldValue::Atom(atom) => {
                    op.is_equality() && alternatives(value).any(|alt| alt == atom)
                }
                FieldValue::Number(n) => value
                    .parse::<f64>()
                    .map(|rhs| op.compare(*n, rhs))
                    .unwrap_or(false),
                FieldValue::Geo(_) => false,
            }),
            Query::Distance {
                field,
                center,
                op,
                meters,
            } => doc.values(field).any(|v| match v {
                FieldValue::Geo(point) => op.compare(point.distance_meters(center), *meters),
                _ => false,
            }),
        }
    }
}

pub(super) fn alternatives(value: &str) -> impl Iterator<Item = &str> {
    value.split(" OR ").map(str::trim).filter(|s| !s.is_empty())
}

pub(super) fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn text_matches(text: &str, value: &str) -> bool {
    let haystack: Vec<String> = words(text).collect();
    alternatives(value).any(|alt| {
        let mut needles = words(alt).peekable();
        needles.peek().is_some() && needles.all(|w| haystack.contains(&w))
    })
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Comma,
    Op(CmpOp),
    Word(String),
    Quoted(String),
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | ',' | '"' | '=' | ':' | '<' | '>')
}

fn tokenize(input: &str) -> StoreResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Op(CmpOp::Eq));
            }
            ':' => {
                chars.next();
                tokens.push(Token::Op(CmpOp::Has));
            }
            '<' | '>' => {
                chars.next();
                let inclusive = chars.next_if_eq(&'=').is_some();
                tokens.push(Token::Op(match (c, inclusive) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    (_, false) => CmpOp::Gt,
                    (_, true) => CmpOp::Ge,
                }));
            }
            '"' => {
                chars.next();
                let mut quoted = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                quoted.push(escaped);
                            }
                        }
                        Some('"') => break,
                        Some(other) => quoted.push(other),
                        None => {
                            return Err(StoreError::Query(format!(
                                "unterminated quote in {input:?}"
                            )))
                        }
                    }
                }
                tokens.push(Token::Quoted(quoted));
            }
            _ => {
                let mut word = String::new();
                while let Some(ch) = chars.next_if(|&ch| is_word_char(ch)) {
                    word.push(ch);
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

pub fn parse_query(input: &str) -> StoreResult<Query> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(Query::All);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let query = parser.or_expr()?;
    match parser.peek() {
        None => Ok(query),
        Some(token) => Err(parser.error(&format!("unexpected {token:?}"))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, message: &str) -> StoreError {
        StoreError::Query(format!("{message} at token {}", self.pos))
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == keyword)
    }

    /// Runs `parse` one nesting level down.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> StoreResult<T>) -> StoreResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("query nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect(&mut self, expected: Token) -> StoreResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(self.error(&format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn or_expr(&mut self) -> StoreResult<Query> {
        let mut parts = vec![self.and_expr()?];
        while self.peek_keyword("OR") {
            self.next();
            parts.push(self.and_expr()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Query::Or(parts)
        })
    }

    fn and_expr(&mut self) -> StoreResult<Query> {
        let mut parts = Vec::new();
        loop {
            match self.peek().cloned() {
                None | Some(Token::RParen) => break,
                Some(Token::Word(w)) if w == "OR" => break,
                Some(Token::Word(w)) if w == "AND" => {
                    self.next();
                }
                Some(_) => parts.push(self.unary()?),
            }
        }
        match parts.len() {
            0 => Err(self.error("expected a search term")),
            1 => Ok(parts.remove(0)),
            _ => Ok(Query::And(parts)),
        }
    }

    fn unary(&mut self) -> StoreResult<Query> {
        if self.peek_keyword("NOT") {
            self.next();
            let inner = self.nested(Self::unary)?;
            return Ok(Query::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> StoreResult<Query> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.nested(Self::or_expr)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Quoted(phrase)) => Ok(Query::Term(phrase)),
            Some(Token::Word(word)) => {
                if word.eq_ignore_ascii_case("distance") && self.peek() == Some(&Token::LParen) {
                    return self.distance();
                }
                if let Some(Token::Op(op)) = self.peek().cloned() {
                    self.next();
                    let value = self.value()?;
                    return Ok(Query::Field {
                        name: word,
                        op,
                        value,
                    });
                }
                Ok(Query::Term(word))
            }
            other => Err(self.error(&format!("unexpected {other:?}"))),
        }
    }

    fn value(&mut self) -> StoreResult<String> {
        match self.next() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => Ok(w),
            other => Err(self.error(&format!("expected a value, found {other:?}"))),
        }
    }

    fn word(&mut self) -> StoreResult<String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            other => Err(self.error(&format!("expected a word, found {other:?}"))),
        }
    }

    fn number(&mut self) -> StoreResult<f64> {
        let raw = self.word()?;
        raw.parse()
            .map_err(|_| self.error(&format!("expected a number, found {raw:?}")))
    }

    /// Parses the rest of `distance(field, geopoint(lat, lon)) <op> meters`.
    fn distance(&mut self) -> StoreResult<Query> {
        self.expect(Token::LParen)?;
        let field = self.word()?;
        self.expect(Token::Comma)?;
        let geopoint = self.word()?;
        if !geopoint.eq_ignore_ascii_case("geopoint") {
            return Err(self.error(&format!("expected geopoint, found {geopoint:?}")));
        }
        self.expect(Token::LParen)?;
        let lat = self.number()?;
        self.expect(Token::Comma)?;
        let lon = self.number()?;
        self.expect(Token::RParen)?;
        self.expect(Token::RParen)?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => return Err(self.error(&format!("expected a comparison, found {other:?}"))),
        };
        let meters = self.number()?;
        Ok(Query::Distance {
            field,
            center: GeoPoint::new(lat, lon),
            op,
            meters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new("r1")
            .number("updated", 1000.0)
            .number("score", -1.0)
            .text("text", "Road closed near the Bridge")
            .text("author", "http://foo.com/123")
            .atom("hidden", "False")
            .atom("reviewed", "True")
            .atom("topic_id", "m1.roads")
            .atom("topic_id", "m1.shelter")
            .geo("location", GeoPoint::new(10.0, 20.0))
    }

    fn matches(query: &str) -> bool {
        parse_query(query).unwrap().matches(&doc())
    }

    #[test]
    fn bare_words_match_text_case_insensitively() {
        assert!(matches("bridge"));
        assert!(matches("ROAD closed"));
        assert!(!matches("flood"));
    }

    #[test]
    fn field_restrictions() {
        assert!(matches(r#"topic_id = "m1.shelter""#));
        assert!(matches("hidden = False"));
        assert!(!matches("hidden = True"));
        assert!(matches(r#"author:"http://foo.com/123""#));
        assert!(!matches(r#"author:"http://bar.com/9""#));
    }

    #[test]
    fn quoted_or_inside_text_value() {
        assert!(matches(r#"text:"flood OR bridge""#));
        assert!(!matches(r#"text:"flood OR fire""#));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(matches("updated <= 1000"));
        assert!(!matches("updated < 1000"));
        assert!(matches("score > -2"));
        assert!(matches("(updated >= 999.5)"));
    }

    #[test]
    fn distance_predicate() {
        assert!(matches("distance(location, geopoint(10.000000, 20.001000)) < 200.000000"));
        assert!(!matches("distance(location, geopoint(11, 20)) < 1000"));
    }

    #[test]
    fn boolean_structure() {
        assert!(matches("flood OR bridge"));
        assert!(!matches("flood AND bridge"));
        assert!(matches("NOT flood"));
        assert!(matches(r#"(topic_id = "x" OR topic_id = "m1.roads") hidden = False"#));
    }

    #[test]
    fn empty_query_matches_everything() {
        assert_eq!(parse_query("  ").unwrap(), Query::All);
    }

    #[test]
    fn malformed_queries_are_rejected() {
        assert!(parse_query("(bridge").is_err());
        assert!(parse_query("text:").is_err());
        assert!(parse_query(r#""unterminated"#).is_err());
        assert!(parse_query("distance(location, point(1, 2)) < 5").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let parens = format!("{}a{}", "(".repeat(10_000), ")".repeat(10_000));
        let nots = format!("{}a", "NOT ".repeat(10_000));
        for query in [parens, nots] {
            match parse_query(&query) {
                Err(StoreError::Query(message)) => assert!(message.contains("nested too deeply")),
                other => panic!("expected a query error, got {other:?}"),
            }
        }

        let shallow = format!("{}bridge{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(matches(&shallow));
        assert!(matches("NOT NOT bridge"));
    }

    #[test]
    fn or_binds_looser_than_implicit_and() {
        let parsed = parse_query("a b OR c").unwrap();
        assert_eq!(
            parsed,
            Query::Or(vec![
                Query::And(vec![Query::Term("a".into()), Query::Term("b".into())]),
                Query::Term("c".into()),
            ])
        );
    }
}
