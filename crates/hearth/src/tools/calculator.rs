use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::ToolHandler;
use crate::errors::{ToolError, ToolResult};
use crate::models::tool::Tool;

const MAX_NESTING: usize = 256;

/// Evaluates basic arithmetic: `+ - * /`, parentheses, unary minus and decimals
pub struct CalculatorTool {
    tool: Tool,
    disallowed: Regex,
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

impl CalculatorTool {
    pub fn new() -> Self {
        let tool = Tool::new(
            "calculate",
            "Perform a mathematical calculation",
            json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "The mathematical expression to evaluate (e.g., '2 + 2 * 5')"
                    }
                },
                "required": ["expression"]
            }),
        );

        Self {
            tool,
            disallowed: Regex::new(r"[^0-9+\-*/().\s]").expect("static pattern"),
        }
    }

    pub fn evaluate(&self, expression: &str) -> ToolResult<f64> {
        if self.disallowed.is_match(expression) {
            return Err(ToolError::InvalidParameters(
                "invalid characters in expression".into(),
            ));
        }

        let mut parser = Parser::new(expression);
        let value = parser.expression()?;
        parser.skip_whitespace();
        if parser.peek().is_some() {
            return Err(parser.error());
        }
        Ok(value)
    }
}

/// Format like a JavaScript number: no trailing `.0`, named infinities, and exponent
/// notation (`1e+21`, `1.5e-7`) outside `1e-6 <= |value| < 1e21`
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if value == 0.0 {
        "0".to_string()
    } else if (1e-6..1e21).contains(&value.abs()) {
        value.to_string()
    } else {
        let formatted = format!("{:e}", value);
        match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}e+{}", mantissa, exponent)
            }
            _ => formatted,
        }
    }
}

#[async_trait]
impl ToolHandler for CalculatorTool {
    fn tool(&self) -> &Tool {
        &self.tool
    }

    async fn call(&self, arguments: Value) -> ToolResult<String> {
        let expression = arguments
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidParameters("expression parameter required".into()))?;

        self.evaluate(expression).map(format_number)
    }
}

// expression := term (('+' | '-') term)*
// term       := factor (('*' | '/') factor)*
// factor     := '-' factor | '+' factor | number | '(' expression ')'
struct Parser<'a> {
    input: &'a [u8],
    position: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            position: 0,
            depth: 0,
        }
    }

    fn error(&self) -> ToolError {
        ToolError::ExecutionError(format!(
            "error evaluating expression at position {}",
            self.position
        ))
    }

    fn skip_whitespace(&mut self) {
        while self
            .input
            .get(self.position)
            .is_some_and(u8::is_ascii_whitespace)
        {
            self.position += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.position).copied()
    }

    fn next_operator(&mut self, operators: &[u8]) -> Option<u8> {
        self.skip_whitespace();
        let op = self.peek().filter(|c| operators.contains(c))?;
        self.position += 1;
        Some(op)
    }

    fn expression(&mut self) -> ToolResult<f64> {
        let mut value = self.term()?;
        while let Some(op) = self.next_operator(b"+-") {
            let rhs = self.term()?;
            value = if op == b'+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> ToolResult<f64> {
        let mut value = self.factor()?;
        while let Some(op) = self.next_operator(b"*/") {
            let rhs = self.factor()?;
            value = if op == b'*' { value * rhs } else { value / rhs };
        }
        Ok(value)
    }

    // Parentheses and unary signs recurse, so the model controls the depth
    fn factor(&mut self) -> ToolResult<f64> {
        if self.depth >= MAX_NESTING {
            return Err(ToolError::InvalidParameters(
                "expression nested too deeply".into(),
            ));
        }
        self.depth += 1;
        let value = self.nested_factor();
        self.depth -= 1;
        value
    }

    fn nested_factor(&mut self) -> ToolResult<f64> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'-') => {
                self.position += 1;
                Ok(-self.factor()?)
            }
            Some(b'+') => {
                self.position += 1;
                self.factor()
            }
            Some(b'(') => {
                self.position += 1;
                let value = self.expression()?;
                self.skip_whitespace();
                if self.peek() != Some(b')') {
                    return Err(self.error());
                }
                self.position += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            _ => Err(self.error()),
        }
    }

    fn number(&mut self) -> ToolResult<f64> {
        let start = self.position;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == b'.')
        {
            self.position += 1;
        }
        std::str::from_utf8(&self.input[start..self.position])
            .ok()
            .and_then(|digits| digits.parse::<f64>().ok())
            .ok_or_else(|| self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expression: &str) -> ToolResult<String> {
        CalculatorTool::new().evaluate(expression).map(format_number)
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(eval("2+2").unwrap(), "4");
        assert_eq!(eval("2 + 2 * 5").unwrap(), "12");
        assert_eq!(eval("(2 + 2) * 5").unwrap(), "20");
        assert_eq!(eval("7 / 2").unwrap(), "3.5");
        assert_eq!(eval("-(3 - 5) * -2").unwrap(), "-4");
        assert_eq!(eval(" 10 - 2 - 3 ").unwrap(), "5");
    }

    #[test]
    fn test_non_finite_results() {
        assert_eq!(eval("1/0").unwrap(), "Infinity");
        assert_eq!(eval("-1/0").unwrap(), "-Infinity");
        assert_eq!(eval("0/0").unwrap(), "NaN");
    }

    #[test]
    fn test_exponent_notation_outside_plain_range() {
        assert_eq!(eval("1000000000000000000000").unwrap(), "1e+21");
        assert_eq!(eval("15 / 100000000").unwrap(), "1.5e-7");
        assert_eq!(eval("-1 / 10000000").unwrap(), "-1e-7");
        assert_eq!(eval("1 / 1000000").unwrap(), "0.000001");
        assert_eq!(eval("123456789 * 1000000000").unwrap(), "123456789000000000");
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let deep = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
        assert_eq!(
            eval(&deep),
            Err(ToolError::InvalidParameters(
                "expression nested too deeply".into()
            ))
        );
        assert!(matches!(
            eval(&format!("{}1", "-".repeat(5000))),
            Err(ToolError::InvalidParameters(_))
        ));

        let shallow = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(eval(&shallow).unwrap(), "1");
        assert_eq!(eval(&format!("{}1", "--".repeat(50))).unwrap(), "1");
    }

    #[test]
    fn test_rejects_invalid_characters() {
        assert_eq!(
            eval("process.exit()"),
            Err(ToolError::InvalidParameters(
                "invalid characters in expression".into()
            ))
        );
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        assert!(matches!(eval("2 +"), Err(ToolError::ExecutionError(_))));
        assert!(matches!(eval("(1 + 2"), Err(ToolError::ExecutionError(_))));
        assert!(matches!(eval("1.2.3"), Err(ToolError::ExecutionError(_))));
        assert!(matches!(eval("4 4"), Err(ToolError::ExecutionError(_))));
    }

    #[tokio::test]
    async fn test_call_requires_expression() {
        let tool = CalculatorTool::new();
        assert_eq!(
            tool.call(json!({"expression": "6 * 7"})).await.unwrap(),
            "42"
        );
        assert!(matches!(
            tool.call(json!({})).await,
            Err(ToolError::InvalidParameters(_))
        ));
    }
}
