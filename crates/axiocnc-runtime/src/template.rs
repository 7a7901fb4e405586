//! Restricted macro templating: arithmetic and dotted member access over a
//! variable bag, embedded in a line as `{{ expr }}`. No side effects, no I/O.

use axiocnc_core::error::FeederError;
use serde_json::Value;
use std::iter::Peekable;
use std::str::Chars;

/// Expand every `{{ expr }}` occurrence in `line` against `context`.
/// Returns the failing sub-expression as a [`FeederError`] (with `line_id`
/// left for the caller to fill in) on the first evaluation failure.
pub fn expand(line: &str, context: &Value) -> Result<String, String> {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| "unterminated '{{' in macro line".to_string())?;
        let expr = &after[..end];
        let value = eval(expr, context)?;
        out.push_str(&format_number(value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

pub fn eval(expr: &str, context: &Value) -> Result<f64, String> {
    let mut parser = Parser {
        chars: expr.chars().peekable(),
        context,
    };
    let value = parser.parse_expr()?;
    parser.skip_ws();
    if parser.chars.peek().is_some() {
        return Err(format!("unexpected trailing input in '{expr}'"));
    }
    Ok(value)
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    context: &'a Value,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut value = self.parse_term()?;
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some('+') => {
                    self.chars.next();
                    value += self.parse_term()?;
                }
                Some('-') => {
                    self.chars.next();
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<f64, String> {
        let mut value = self.parse_factor()?;
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some('*') => {
                    self.chars.next();
                    value *= self.parse_factor()?;
                }
                Some('/') => {
                    self.chars.next();
                    let divisor = self.parse_factor()?;
                    if divisor == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_factor(&mut self) -> Result<f64, String> {
        self.skip_ws();
        match self.chars.peek() {
            Some('-') => {
                self.chars.next();
                Ok(-self.parse_factor()?)
            }
            Some('(') => {
                self.chars.next();
                let value = self.parse_expr()?;
                self.skip_ws();
                match self.chars.next() {
                    Some(')') => Ok(value),
                    _ => Err("expected closing ')'".to_string()),
                }
            }
            Some(c) if c.is_ascii_digit() || *c == '.' => self.parse_number(),
            Some(c) if c.is_alphabetic() || *c == '_' => self.parse_identifier(),
            other => Err(format!("unexpected character: {other:?}")),
        }
    }

    fn parse_number(&mut self) -> Result<f64, String> {
        let mut text = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
            text.push(self.chars.next().unwrap());
        }
        text.parse::<f64>()
            .map_err(|_| format!("invalid number literal: {text}"))
    }

    fn parse_identifier(&mut self) -> Result<f64, String> {
        let mut path = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_' || *c == '.') {
            path.push(self.chars.next().unwrap());
        }
        let mut cursor = self.context;
        for segment in path.split('.') {
            cursor = cursor
                .as_object()
                .and_then(|o| o.get(segment))
                .ok_or_else(|| format!("unknown identifier: {path}"))?;
        }
        cursor
            .as_f64()
            .ok_or_else(|| format!("identifier '{path}' is not numeric"))
    }
}

/// Wrap a template expansion failure with the line it came from, for events.
pub fn to_feeder_error(reason: String, line_id: Option<u64>) -> FeederError {
    FeederError { line_id, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_arithmetic_expression() {
        let ctx = json!({});
        assert_eq!(expand("G1 F{{ 100 * 2 }}", &ctx).unwrap(), "G1 F200");
    }

    #[test]
    fn expands_dotted_identifier_from_context() {
        let ctx = json!({ "modal": { "feedrate": 500.0 } });
        assert_eq!(
            expand("G1 F{{ modal.feedrate }}", &ctx).unwrap(),
            "G1 F500"
        );
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        let ctx = json!({});
        assert!(expand("G1 F{{ nope }}", &ctx).is_err());
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let ctx = json!({});
        assert!(eval("1 / 0", &ctx).is_err());
    }

    #[test]
    fn lines_without_macros_pass_through_unchanged() {
        let ctx = json!({});
        assert_eq!(expand("G0 X10 Y10", &ctx).unwrap(), "G0 X10 Y10");
    }
}
