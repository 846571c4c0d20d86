//! Calculator tool: evaluates arithmetic expressions.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! sum     = product (('+' | '-') product)*
//! product = power (('*' | '/' | '%') power)*
//! power   = unary ('^' power)?            right-associative
//! unary   = '-' unary | atom
//! atom    = NUMBER | '(' sum ')'
//! ```

use async_trait::async_trait;
use mindloop_core::error::ToolError;
use mindloop_core::tool::{Tool, ToolResult};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression with + - * / % ^ and parentheses. \
         Input: the expression, e.g. (2 + 3) * 4"
    }

    async fn execute(
        &self,
        _agent_id: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        // Accept either a bare string or {"expression": "..."}.
        let expr = arguments
            .as_str()
            .or_else(|| arguments["expression"].as_str())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?;

        match evaluate(expr) {
            Ok(value) => Ok(ToolResult::ok(format_number(value))
                .with_data(serde_json::json!({ "result": value }))),
            Err(e) => Ok(ToolResult::error(format!("Error: {e}"))),
        }
    }
}

/// Integers print without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let mut parser = Parser {
        src: expr.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.sum()?;
    parser.skip_ws();
    if parser.pos < parser.src.len() {
        return Err(format!(
            "Unexpected '{}' at position {}",
            parser.src[parser.pos] as char, parser.pos
        ));
    }
    if !value.is_finite() {
        return Err("Result is not a finite number".into());
    }
    Ok(value)
}

/// Deepest nesting of parentheses, unary minus and exponents accepted.
const MAX_DEPTH: usize = 256;

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    /// Run `f` one nesting level deeper.
    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<f64, String>) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("Expression nested too deeply".into());
        }
        self.depth += 1;
        let value = f(self);
        self.depth -= 1;
        value
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    /// Next non-whitespace byte, without consuming it.
    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn sum(&mut self) -> Result<f64, String> {
        let mut acc = self.product()?;
        loop {
            if self.eat(b'+') {
                acc += self.product()?;
            } else if self.eat(b'-') {
                acc -= self.product()?;
            } else {
                return Ok(acc);
            }
        }
    }

    fn product(&mut self) -> Result<f64, String> {
        let mut acc = self.power()?;
        loop {
            if self.eat(b'*') {
                acc *= self.power()?;
            } else if self.eat(b'/') {
                let rhs = self.power()?;
                if rhs == 0.0 {
                    return Err("Division by zero".into());
                }
                acc /= rhs;
            } else if self.eat(b'%') {
                let rhs = self.power()?;
                if rhs == 0.0 {
                    return Err("Modulo by zero".into());
                }
                acc %= rhs;
            } else {
                return Ok(acc);
            }
        }
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.unary()?;
        if self.eat(b'^') {
            let exponent = self.nested(Self::power)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, String> {
        if self.eat(b'-') {
            return Ok(-self.nested(Self::unary)?);
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.nested(Self::sum)?;
                if !self.eat(b')') {
                    return Err("Expected closing parenthesis".into());
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => {
                let start = self.pos;
                while self.pos < self.src.len()
                    && (self.src[self.pos].is_ascii_digit() || self.src[self.pos] == b'.')
                {
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.src[start..self.pos])
                    .map_err(|e| e.to_string())?;
                text.parse::<f64>()
                    .map_err(|_| format!("Invalid number: {text}"))
            }
            Some(c) => Err(format!("Unexpected '{}' at position {}", c as char, self.pos)),
            None => Err("Unexpected end of expression".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("((1 + 2) * (3 + 4))").unwrap(), 21.0);
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(evaluate("-2 ^ 2").unwrap(), 4.0);
    }

    #[test]
    fn modulo_and_division() {
        assert_eq!(evaluate("10 % 4").unwrap(), 2.0);
        assert_eq!(evaluate("10 / 4").unwrap(), 2.5);
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("1 % 0").is_err());
    }

    #[test]
    fn malformed_input() {
        assert!(evaluate("").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("2 $ 3").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let parens = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(evaluate(&parens).unwrap_err(), "Expression nested too deeply");
        assert!(evaluate(&format!("{}1", "-".repeat(200_000))).is_err());
        assert!(evaluate(&format!("{}2", "2^".repeat(200_000))).is_err());
    }

    #[test]
    fn moderate_nesting_still_evaluates() {
        let expr = format!("{}7{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&expr).unwrap(), 7.0);
        assert_eq!(evaluate("--3").unwrap(), 3.0);
    }

    #[tokio::test]
    async fn tool_accepts_bare_string() {
        let result = CalculatorTool
            .execute("a1", serde_json::json!("10 / 2"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "5");
    }

    #[tokio::test]
    async fn tool_accepts_object_and_reports_errors() {
        let result = CalculatorTool
            .execute("a1", serde_json::json!({"expression": "10 / 3"}))
            .await
            .unwrap();
        assert!(result.output.starts_with("3.333"));

        let result = CalculatorTool
            .execute("a1", serde_json::json!({"expression": "1 / 0"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("Division by zero"));
    }

    #[tokio::test]
    async fn tool_missing_expression() {
        let result = CalculatorTool.execute("a1", serde_json::json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
