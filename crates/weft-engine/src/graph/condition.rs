//! Boolean expressions for `decision` nodes.
//!
//! The grammar is closed: comparisons, `&&`, `||`, `!`, parentheses and
//! literals. Bare words evaluate as strings, so `approved == approved` holds.
//!
//! `{{path}}` placeholders are resolved while tokenizing. A resolved value
//! always becomes a single operand, so its text is never read as syntax.

use serde_json::{Map, Value};
use weft_core::error::{Result, WeftError};
use weft_core::template::{display_value, interpolate, leading_placeholder, lookup_in};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Num(f64),
    Str(String),
    Word(String),
    Value(Operand),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Operand {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n.as_f64().map_or_else(|| Self::Str(n.to_string()), Self::Num),
            Value::String(s) => Self::Str(s.clone()),
            other => Self::Str(display_value(other)),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Null => false,
            Self::Num(n) => *n != 0.0,
            Self::Str(s) => {
                let s = s.trim();
                !(s.is_empty()
                    || s.eq_ignore_ascii_case("false")
                    || s.eq_ignore_ascii_case("no")
                    || s == "0")
            }
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Str(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Null => "null".to_string(),
        }
    }
}

/// Evaluate a literal condition. Blank input is false.
pub fn evaluate(expr: &str) -> Result<bool> {
    evaluate_in(expr, &Map::new())
}

/// Evaluate a condition template against the variable bag.
///
/// Unresolved placeholders stay in the text and read as bare words.
pub fn evaluate_in(condition: &str, vars: &Map<String, Value>) -> Result<bool> {
    let tokens = tokenize(condition, vars)?;
    if tokens.is_empty() {
        return Ok(false);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.or()?;
    if let Some(tok) = parser.peek() {
        return Err(WeftError::Condition(format!("unexpected {:?} in `{}`", tok, condition)));
    }
    Ok(value.truthy())
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '!' | '=' | '<' | '>' | '&' | '|' | '"' | '\'')
}

fn tokenize(input: &str, vars: &Map<String, Value>) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while let Some(c) = rest.chars().next() {
        if c.is_whitespace() {
            rest = &rest[c.len_utf8()..];
            continue;
        }
        if let Some((len, value)) = standalone_placeholder(rest, vars) {
            tokens.push(Token::Value(Operand::from_value(value)));
            rest = &rest[len..];
            continue;
        }

        let (token, len) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '&' => (Token::And, expect(rest, "&&")?),
            '|' => (Token::Or, expect(rest, "||")?),
            '!' if rest.starts_with("!=") => (Token::Cmp(CmpOp::Ne), 2),
            '!' => (Token::Not, 1),
            // Tolerate `===`
            '=' if rest.starts_with("===") => (Token::Cmp(CmpOp::Eq), 3),
            '=' => (Token::Cmp(CmpOp::Eq), expect(rest, "==")?),
            '<' if rest.starts_with("<=") => (Token::Cmp(CmpOp::Le), 2),
            '<' => (Token::Cmp(CmpOp::Lt), 1),
            '>' if rest.starts_with(">=") => (Token::Cmp(CmpOp::Ge), 2),
            '>' => (Token::Cmp(CmpOp::Gt), 1),
            '"' | '\'' => {
                let body = &rest[1..];
                let end = body
                    .find(c)
                    .ok_or_else(|| WeftError::Condition("unterminated string".into()))?;
                (Token::Str(interpolate(&body[..end], vars)), end + 2)
            }
            _ => {
                let end = rest.find(|ch: char| !is_word_char(ch)).unwrap_or(rest.len());
                (classify(&rest[..end], vars), end)
            }
        };
        tokens.push(token);
        rest = &rest[len..];
    }
    Ok(tokens)
}

fn expect(rest: &str, op: &str) -> Result<usize> {
    if rest.starts_with(op) {
        Ok(op.len())
    } else {
        Err(WeftError::Condition(format!("expected `{}`", op)))
    }
}

/// A resolvable placeholder that is a whole operand on its own.
fn standalone_placeholder<'v>(rest: &str, vars: &'v Map<String, Value>) -> Option<(usize, &'v Value)> {
    let (len, path) = leading_placeholder(rest)?;
    if rest[len..].chars().next().is_some_and(is_word_char) {
        return None;
    }
    lookup_in(vars, path).map(|value| (len, value))
}

fn classify(word: &str, vars: &Map<String, Value>) -> Token {
    if word == "contains" {
        return Token::Cmp(CmpOp::Contains);
    }
    if word.contains("{{") {
        let text = interpolate(word, vars);
        if text != word {
            return Token::Str(text);
        }
    }
    match word.parse::<f64>() {
        Ok(n) if n.is_finite() => Token::Num(n),
        _ => Token::Word(word.to_string()),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn or(&mut self) -> Result<Operand> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = Operand::Bool(left.truthy() || right.truthy());
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Operand> {
        let mut left = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.not()?;
            left = Operand::Bool(left.truthy() && right.truthy());
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Operand> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.not()?;
            return Ok(Operand::Bool(!inner.truthy()));
        }
        self.cmp()
    }

    fn cmp(&mut self) -> Result<Operand> {
        let left = self.primary()?;
        let op = match self.peek() {
            Some(Token::Cmp(op)) => *op,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.primary()?;
        compare(op, &left, &right).map(Operand::Bool)
    }

    fn primary(&mut self) -> Result<Operand> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(WeftError::Condition("missing `)`".into())),
                }
            }
            Some(Token::Num(n)) => Ok(Operand::Num(n)),
            Some(Token::Str(s)) => Ok(Operand::Str(s)),
            Some(Token::Value(v)) => Ok(v),
            Some(Token::Word(w)) => Ok(match w.as_str() {
                "true" => Operand::Bool(true),
                "false" => Operand::Bool(false),
                "null" | "undefined" => Operand::Null,
                _ => Operand::Str(w),
            }),
            Some(tok) => Err(WeftError::Condition(format!("unexpected {:?}", tok))),
            None => Err(WeftError::Condition("unexpected end of expression".into())),
        }
    }
}

fn compare(op: CmpOp, left: &Operand, right: &Operand) -> Result<bool> {
    match op {
        CmpOp::Eq => Ok(equals(left, right)),
        CmpOp::Ne => Ok(!equals(left, right)),
        CmpOp::Contains => Ok(left.as_text().contains(&right.as_text())),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
                return Err(WeftError::Condition(format!(
                    "cannot order {} and {}",
                    left.as_text(),
                    right.as_text()
                )));
            };
            Ok(match op {
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                _ => a >= b,
            })
        }
    }
}

fn equals(left: &Operand, right: &Operand) -> bool {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a == b,
        _ => left.as_text() == right.as_text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert!(evaluate("true").unwrap());
        assert!(!evaluate("false").unwrap());
        assert!(!evaluate("").unwrap());
        assert!(!evaluate("   ").unwrap());
        assert!(!evaluate("0").unwrap());
        assert!(evaluate("42").unwrap());
        assert!(!evaluate("null").unwrap());
        assert!(!evaluate("no").unwrap());
        assert!(evaluate("yes").unwrap());
        assert!(!evaluate("''").unwrap());
    }

    #[test]
    fn comparisons() {
        assert!(evaluate("5 > 3").unwrap());
        assert!(evaluate("3 <= 3").unwrap());
        assert!(!evaluate("2 >= 3").unwrap());
        assert!(evaluate("10 == 10.0").unwrap());
        assert!(evaluate("approved == approved").unwrap());
        assert!(evaluate("'needs review' != 'approved'").unwrap());
        assert!(evaluate("\"hello world\" contains world").unwrap());
        assert!(evaluate("true == 'true'").unwrap());
        assert!(evaluate("1 === 1").unwrap());
    }

    #[test]
    fn boolean_operators_and_precedence() {
        assert!(evaluate("true || false && false").unwrap());
        assert!(!evaluate("(true || false) && false").unwrap());
        assert!(evaluate("!false").unwrap());
        assert!(evaluate("!(1 > 2) && 3 < 4").unwrap());
        assert!(evaluate("!!yes").unwrap());
    }

    #[test]
    fn word_with_hyphen() {
        assert!(evaluate("in-progress == in-progress").unwrap());
        assert!(evaluate("-1 < 0").unwrap());
    }

    fn vars(value: serde_json::Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn placeholders_become_typed_operands() {
        let v = vars(serde_json::json!({"score": 82, "ok": true, "tier": "gold", "none": null}));
        assert!(evaluate_in("{{score}} >= 70 && {{ok}}", &v).unwrap());
        assert!(evaluate_in("'{{tier}}' == gold", &v).unwrap());
        assert!(evaluate_in("{{tier}} == gold", &v).unwrap());
        assert!(!evaluate_in("{{none}}", &v).unwrap());
        assert!(evaluate_in("ESC-{{score}} == ESC-82", &v).unwrap());
    }

    #[test]
    fn quotes_in_values_are_data() {
        let v = vars(serde_json::json!({"reason": "don't know", "quoted": "say \"hi\""}));
        assert!(!evaluate_in("{{reason}} == ok", &v).unwrap());
        assert!(evaluate_in("{{reason}} == \"don't know\"", &v).unwrap());
        assert!(evaluate_in("'{{reason}}' contains know", &v).unwrap());
        assert!(evaluate_in("{{quoted}} contains hi", &v).unwrap());
    }

    #[test]
    fn operators_in_values_are_data() {
        let v = vars(serde_json::json!({"status": "x || true", "n": "1) || (1"}));
        assert!(!evaluate_in("{{status}} == ok", &v).unwrap());
        assert!(evaluate_in("{{status}} == 'x || true'", &v).unwrap());
        assert!(!evaluate_in("{{n}} == 2", &v).unwrap());
    }

    #[test]
    fn unresolved_placeholder_is_a_word() {
        assert!(evaluate_in("{{missing}} == {{missing}}", &Map::new()).unwrap());
    }

    #[test]
    fn errors() {
        assert!(matches!(evaluate("1 >"), Err(WeftError::Condition(_))));
        assert!(matches!(evaluate("(true"), Err(WeftError::Condition(_))));
        assert!(matches!(evaluate("'open"), Err(WeftError::Condition(_))));
        assert!(matches!(evaluate("a & b"), Err(WeftError::Condition(_))));
        assert!(matches!(evaluate("abc > 1"), Err(WeftError::Condition(_))));
        assert!(matches!(evaluate("true false"), Err(WeftError::Condition(_))));
        assert!(matches!(evaluate("x = 1"), Err(WeftError::Condition(_))));
    }
}
