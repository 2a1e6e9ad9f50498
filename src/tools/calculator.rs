//! Calculator tool
//!
//! Expressions are parsed by a small recursive-descent evaluator over `f64`.
//! Nothing is ever executed beyond the whitelisted functions below.
//!
//! Precedence, lowest first: `+ -`, `* /`, unary sign, `^`/`**` (right
//! associative), postfix `%`.

use crate::capability::{Capability, CapabilityError, CapabilityKind, CapabilityMetadata};
use crate::mcp::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::f64::consts;

const MAX_FACTORIAL: f64 = 170.0;
/// Bound on parenthesis, sign and exponent nesting; keeps recursion off the stack limit
const MAX_DEPTH: usize = 256;

fn default_precision() -> usize {
    6
}

#[derive(Debug, Deserialize)]
struct CalculatorInput {
    expression: String,
    #[serde(default = "default_precision")]
    precision: usize,
    #[serde(default)]
    variables: HashMap<String, f64>,
}

/// Outcome of a successful evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: f64,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent only when digits follow, so `2e` stays `2` then the constant `e`
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", literal))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Caret);
                i += 2;
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '^' => Token::Caret,
                    '%' => Token::Percent,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => return Err(format!("unexpected character '{}'", other)),
                };
                tokens.push(token);
                i += 1;
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    variables: &'a HashMap<String, f64>,
    steps: Vec<String>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), String> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("expected {}", what))
        }
    }

    /// Run one nested production, failing once nesting exceeds [`MAX_DEPTH`]
    fn nested(&mut self, production: fn(&mut Self) -> Result<f64, String>) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("expression nested too deeply".to_string());
        }
        self.depth += 1;
        let result = production(self);
        self.depth -= 1;
        result
    }

    fn expression(&mut self) -> Result<f64, String> {
        self.nested(Self::sum)
    }

    fn sum(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            if self.eat(&Token::Plus) {
                value += self.term()?;
            } else if self.eat(&Token::Minus) {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            if self.eat(&Token::Star) {
                value *= self.unary()?;
            } else if self.eat(&Token::Slash) {
                let divisor = self.unary()?;
                if divisor == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    fn unary(&mut self) -> Result<f64, String> {
        self.nested(Self::signed)
    }

    fn signed(&mut self) -> Result<f64, String> {
        if self.eat(&Token::Minus) {
            Ok(-self.unary()?)
        } else if self.eat(&Token::Plus) {
            self.unary()
        } else {
            self.power()
        }
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.postfix()?;
        if self.eat(&Token::Caret) {
            let exponent = self.unary()?;
            Ok(base.powf(exponent))
        } else {
            Ok(base)
        }
    }

    fn postfix(&mut self) -> Result<f64, String> {
        let mut value = self.primary()?;
        while self.eat(&Token::Percent) {
            value /= 100.0;
        }
        Ok(value)
    }

    fn primary(&mut self) -> Result<f64, String> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;

        match token {
            Token::Number(value) => Ok(value),
            Token::LParen => {
                let value = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(value)
            }
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    let value = apply_function(&name, &args)?;
                    let rendered: Vec<String> = args.iter().map(|a| format_number(*a, 6)).collect();
                    self.steps
                        .push(format!("{}({}) = {}", name, rendered.join(", "), format_number(value, 6)));
                    Ok(value)
                } else {
                    self.variables
                        .get(&name)
                        .copied()
                        .or_else(|| constant(&name))
                        .ok_or_else(|| format!("unknown variable '{}'", name))
                }
            }
            other => Err(format!("unexpected token {:?}", other)),
        }
    }

    fn arguments(&mut self) -> Result<Vec<f64>, String> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "')' after function arguments")?;
            return Ok(args);
        }
    }
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(consts::PI),
        "e" => Some(consts::E),
        "tau" => Some(consts::TAU),
        "inf" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    }
}

fn arity(name: &str, args: &[f64], expected: usize) -> Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!("{}() takes {} argument(s), got {}", name, expected, args.len()))
    }
}

fn integer(name: &str, value: f64) -> Result<i64, String> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        Ok(value as i64)
    } else {
        Err(format!("{}() requires integer arguments", name))
    }
}

fn apply_function(name: &str, args: &[f64]) -> Result<f64, String> {
    let unary: Option<fn(f64) -> f64> = match name {
        "abs" => Some(f64::abs),
        "sin" => Some(f64::sin),
        "cos" => Some(f64::cos),
        "tan" => Some(f64::tan),
        "asin" => Some(f64::asin),
        "acos" => Some(f64::acos),
        "atan" => Some(f64::atan),
        "sinh" => Some(f64::sinh),
        "cosh" => Some(f64::cosh),
        "tanh" => Some(f64::tanh),
        "exp" => Some(f64::exp),
        "log10" => Some(f64::log10),
        "log2" => Some(f64::log2),
        "sqrt" => Some(f64::sqrt),
        "degrees" => Some(f64::to_degrees),
        "radians" => Some(f64::to_radians),
        "ceil" => Some(f64::ceil),
        "floor" => Some(f64::floor),
        "trunc" => Some(f64::trunc),
        _ => None,
    };
    if let Some(f) = unary {
        arity(name, args, 1)?;
        return Ok(f(args[0]));
    }

    match name {
        "round" => match args {
            [x] => Ok(x.round()),
            [x, digits] => {
                let factor = 10f64.powi(integer(name, *digits)? as i32);
                Ok((x * factor).round() / factor)
            }
            _ => Err("round() takes 1 or 2 arguments".to_string()),
        },
        "log" => match args {
            [x] => Ok(x.ln()),
            [x, base] => Ok(x.ln() / base.ln()),
            _ => Err("log() takes 1 or 2 arguments".to_string()),
        },
        "min" | "max" | "sum" if args.is_empty() => Err(format!("{}() needs at least one argument", name)),
        "min" => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        "sum" => Ok(args.iter().sum()),
        "atan2" => {
            arity(name, args, 2)?;
            Ok(args[0].atan2(args[1]))
        }
        "pow" => {
            arity(name, args, 2)?;
            Ok(args[0].powf(args[1]))
        }
        "factorial" => {
            arity(name, args, 1)?;
            let n = integer(name, args[0])?;
            if n < 0 || n as f64 > MAX_FACTORIAL {
                return Err(format!("factorial() argument must be between 0 and {}", MAX_FACTORIAL));
            }
            Ok((1..=n).fold(1.0, |acc, k| acc * k as f64))
        }
        "gcd" => {
            arity(name, args, 2)?;
            let (mut a, mut b) = (integer(name, args[0])?.abs(), integer(name, args[1])?.abs());
            while b != 0 {
                let t = a % b;
                a = b;
                b = t;
            }
            Ok(a as f64)
        }
        other => Err(format!("Function '{}' is not allowed", other)),
    }
}

/// Evaluate an expression with caller-supplied variables
///
/// Variables shadow the built-in constants.
pub fn evaluate(expression: &str, variables: &HashMap<String, f64>) -> Result<Evaluation, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        variables,
        steps: vec![format!("Evaluating expression: {}", expression.trim())],
        depth: 0,
    };
    let value = parser.expression()?;
    if let Some(extra) = parser.peek() {
        return Err(format!("unexpected token {:?}", extra));
    }

    parser.steps.push(format!("Result: {}", format_number(value, 6)));
    Ok(Evaluation {
        value,
        steps: parser.steps,
    })
}

/// Integral values print without decimals, others with `precision` places
pub fn format_number(value: f64, precision: usize) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.*}", precision, value)
    }
}

fn result_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        json!(value as i64)
    } else if value.is_finite() {
        json!(value)
    } else {
        json!(format_number(value, 0))
    }
}

/// Safe expression calculator
#[derive(Debug, Default)]
pub struct CalculatorTool;

#[async_trait]
impl Capability for CalculatorTool {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(
            CapabilityKind::Tool,
            "calculator",
            "Evaluates mathematical expressions and performs calculations",
            json!({
                "type": "object",
                "properties": {
                    "expression": {"type": "string", "minLength": 1, "description": "The mathematical expression to evaluate"},
                    "precision": {"type": "integer", "minimum": 0, "maximum": 15, "default": 6, "description": "Number of decimal places in the result"},
                    "variables": {
                        "type": "object",
                        "additionalProperties": {"type": "number"},
                        "description": "Variables to use in the expression"
                    }
                },
                "required": ["expression"]
            }),
        )
    }

    async fn invoke(&self, arguments: Value, _ctx: &Context) -> Result<Value, CapabilityError> {
        let input: CalculatorInput =
            serde_json::from_value(arguments).map_err(|e| CapabilityError::invalid_arguments(e.to_string()))?;

        let evaluation = evaluate(&input.expression, &input.variables)
            .map_err(|e| CapabilityError::execution(format!("Calculator error: {}", e)))?;

        Ok(json!({
            "result": result_value(evaluation.value),
            "formatted_result": format_number(evaluation.value, input.precision),
            "steps": evaluation.steps,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expression: &str) -> f64 {
        evaluate(expression, &HashMap::new()).unwrap().value
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("2 ^ 3 ^ 2"), 512.0);
        assert_eq!(eval("2 ** 10"), 1024.0);
        assert_eq!(eval("-2 ^ 2"), -4.0);
        assert_eq!(eval("2 ^ -1"), 0.5);
        assert_eq!(eval("10 - 4 - 3"), 3.0);
    }

    #[test]
    fn test_percent_and_literals() {
        assert_eq!(eval("200 * 15%"), 30.0);
        assert_eq!(eval("1e3 + .5"), 1000.5);
        assert_eq!(eval("2e"), 2.0 * consts::E);
    }

    #[test]
    fn test_functions_and_constants() {
        assert!((eval("sqrt(16) + pi") - (4.0 + consts::PI)).abs() < 1e-12);
        assert_eq!(eval("factorial(5)"), 120.0);
        assert_eq!(eval("gcd(12, 18)"), 6.0);
        assert_eq!(eval("max(1, 7, 3)"), 7.0);
        assert_eq!(eval("round(2.345, 2)"), 2.35);
        assert_eq!(eval("log(8, 2)"), 3.0);
    }

    #[test]
    fn test_variables_shadow_constants() {
        let vars = HashMap::from([("x".to_string(), 3.0), ("e".to_string(), 10.0)]);
        assert_eq!(evaluate("x * e", &vars).unwrap().value, 30.0);
    }

    #[test]
    fn test_rejections() {
        let vars = HashMap::new();
        assert_eq!(evaluate("1 / 0", &vars).unwrap_err(), "division by zero");
        assert!(evaluate("system(1)", &vars).unwrap_err().contains("not allowed"));
        assert!(evaluate("__import__", &vars).unwrap_err().contains("unknown variable"));
        assert!(evaluate("(1 + 2", &vars).is_err());
        assert!(evaluate("1 + 2)", &vars).is_err());
        assert!(evaluate("2; 3", &vars).is_err());
        assert!(evaluate("factorial(2.5)", &vars).is_err());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_number(14.0, 6), "14");
        assert_eq!(format_number(1.0 / 3.0, 6), "0.333333");
        assert_eq!(format_number(1.0 / 3.0, 2), "0.33");
        assert_eq!(format_number(f64::INFINITY, 2), "inf");
        assert_eq!(result_value(4.0), json!(4));
    }

    #[test]
    fn test_steps_record_function_calls() {
        let evaluation = evaluate("sqrt(9) * 2", &HashMap::new()).unwrap();
        assert_eq!(evaluation.steps.first().unwrap(), "Evaluating expression: sqrt(9) * 2");
        assert!(evaluation.steps.contains(&"sqrt(9) = 3".to_string()));
        assert_eq!(evaluation.steps.last().unwrap(), "Result: 6");
    }

    #[test]
    fn test_nesting_is_bounded() {
        let vars = HashMap::new();
        let moderate = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(evaluate(&moderate, &vars).unwrap().value, 1.0);

        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(evaluate(&deep, &vars).unwrap_err(), "expression nested too deeply");

        let signs = format!("{}1", "-".repeat(100_000));
        assert_eq!(evaluate(&signs, &vars).unwrap_err(), "expression nested too deeply");

        let tower = vec!["2"; 100_000].join("^");
        assert_eq!(evaluate(&tower, &vars).unwrap_err(), "expression nested too deeply");
    }
}
