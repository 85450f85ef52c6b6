//! Minimal expression and statement evaluator for flow scripts.
//!
//! Flows embed only a small scripting surface: literals, variable lookup,
//! member access on the `output` record, equality and ordering comparisons,
//! and boolean combinators. A tokenizer plus recursive-descent parser over
//! that grammar keeps evaluation sandboxed; there is no general-purpose
//! runtime behind it.
//!
//! Grammar (binding tightest last):
//!
//! ```text
//! statement := IDENT '=' expr | 'output' '.' IDENT '=' expr | expr
//! expr      := and ( '||' and )*
//! and       := not ( '&&' not )*
//! not       := '!' not | comparison
//! comparison:= primary ( ('==' | '!=' | '<=' | '>=' | '<' | '>') primary )?
//! primary   := literal | IDENT | 'output' '.' IDENT | '(' expr ')'
//! ```

use anyhow::{bail, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

/// Uppercase-underscore, three or more characters: the shape of an
/// environment variable name. Identifiers of this shape that are undefined
/// evaluate to null instead of raising a reference error.
pub static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]{2,}$").expect("env var pattern"));

/// Value produced by evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ScriptValue {
    /// Boolean coercion: native booleans as-is, strings true iff literally
    /// `"true"`, numbers true iff non-zero, null false.
    pub fn truthy(&self) -> bool {
        match self {
            ScriptValue::Null => false,
            ScriptValue::Bool(value) => *value,
            ScriptValue::Int(value) => *value != 0,
            ScriptValue::Float(value) => *value != 0.0,
            ScriptValue::Str(value) => value == "true",
        }
    }

    /// String coercion used for variable-table writes and interpolation.
    pub fn to_display_string(&self) -> String {
        match self {
            ScriptValue::Null => "null".to_string(),
            ScriptValue::Bool(value) => value.to_string(),
            ScriptValue::Int(value) => value.to_string(),
            ScriptValue::Float(value) => value.to_string(),
            ScriptValue::Str(value) => value.clone(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Int(value) => Some(*value as f64),
            ScriptValue::Float(value) => Some(*value),
            ScriptValue::Str(value) => value.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(ScriptValue),
    Var(String),
    OutputField(String),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A single script statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    AssignVar { name: String, expr: Expr },
    AssignOutput { field: String, expr: Expr },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Assign,
    Dot,
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(index, character)) = chars.peek() {
        match character {
            ' ' | '\t' | '\r' | '\n' => {
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
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '=' => {
                chars.next();
                if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    tokens.push(Token::Assign);
                }
            }
            '!' => {
                chars.next();
                if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '<' => {
                chars.next();
                if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.peek().map(|&(_, c)| c) == Some('&') {
                    chars.next();
                    tokens.push(Token::And);
                } else {
                    bail!("unexpected '&' at offset {index}; did you mean '&&'?");
                }
            }
            '|' => {
                chars.next();
                if chars.peek().map(|&(_, c)| c) == Some('|') {
                    chars.next();
                    tokens.push(Token::Or);
                } else {
                    bail!("unexpected '|' at offset {index}; did you mean '||'?");
                }
            }
            '\'' | '"' => {
                tokens.push(Token::Str(lex_string(&mut chars, character)?));
            }
            '-' | '0'..='9' => {
                tokens.push(lex_number(&mut chars)?);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => bail!("unexpected character '{other}' at offset {index}"),
        }
    }

    Ok(tokens)
}

fn lex_string(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, quote: char) -> Result<String> {
    chars.next();
    let mut value = String::new();
    loop {
        match chars.next() {
            None => bail!("unterminated string literal"),
            Some((_, '\\')) => match chars.next() {
                Some((_, escaped @ ('\\' | '\'' | '"'))) => value.push(escaped),
                Some((_, 'n')) => value.push('\n'),
                Some((_, other)) => bail!("unsupported escape '\\{other}'"),
                None => bail!("unterminated string literal"),
            },
            Some((_, c)) if c == quote => return Ok(value),
            Some((_, c)) => value.push(c),
        }
    }
}

fn lex_number(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> Result<Token> {
    let mut literal = String::new();
    if chars.peek().map(|&(_, c)| c) == Some('-') {
        literal.push('-');
        chars.next();
    }
    let mut saw_dot = false;
    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_digit() {
            literal.push(c);
            chars.next();
        } else if c == '.' && !saw_dot {
            saw_dot = true;
            literal.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if literal == "-" || literal.is_empty() {
        bail!("malformed number literal");
    }
    if saw_dot {
        Ok(Token::Float(literal.parse()?))
    } else {
        Ok(Token::Int(literal.parse()?))
    }
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.position += 1;
        let right = self.parse_primary()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Str(value)) => Ok(Expr::Literal(ScriptValue::Str(value))),
            Some(Token::Int(value)) => Ok(Expr::Literal(ScriptValue::Int(value))),
            Some(Token::Float(value)) => Ok(Expr::Literal(ScriptValue::Float(value))),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                if !self.eat(&Token::RParen) {
                    bail!("expected ')'");
                }
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(ScriptValue::Bool(true))),
                "false" => Ok(Expr::Literal(ScriptValue::Bool(false))),
                "null" => Ok(Expr::Literal(ScriptValue::Null)),
                "output" if self.peek() == Some(&Token::Dot) => {
                    self.position += 1;
                    match self.next() {
                        Some(Token::Ident(field)) => Ok(Expr::OutputField(field)),
                        _ => bail!("expected field name after 'output.'"),
                    }
                }
                _ => Ok(Expr::Var(name)),
            },
            Some(other) => bail!("unexpected token {other:?}"),
            None => bail!("unexpected end of expression"),
        }
    }

    fn at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }
}

/// Parses one expression; trailing tokens are an error.
pub fn parse_expression(text: &str) -> Result<Expr> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        position: 0,
    };
    if parser.at_end() {
        bail!("expression cannot be empty");
    }
    let expr = parser.parse_expr()?;
    if !parser.at_end() {
        bail!("unexpected trailing tokens in expression '{text}'");
    }
    Ok(expr)
}

/// Parses a script body: one statement per line, `;` also separates, `//`
/// starts a line comment.
pub fn parse_statements(text: &str) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();
    for raw_line in text.lines().flat_map(|line| line.split(';')) {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        statements.push(parse_statement(line)?);
    }
    Ok(statements)
}

fn parse_statement(line: &str) -> Result<Statement> {
    let mut parser = Parser {
        tokens: tokenize(line)?,
        position: 0,
    };

    // Assignment heads: `NAME =` or `output.NAME =`.
    if let Some(Token::Ident(head)) = parser.peek().cloned() {
        if head == "output"
            && parser.tokens.get(1) == Some(&Token::Dot)
            && matches!(parser.tokens.get(2), Some(Token::Ident(_)))
            && parser.tokens.get(3) == Some(&Token::Assign)
        {
            let Some(Token::Ident(field)) = parser.tokens.get(2).cloned() else {
                unreachable!("checked above");
            };
            parser.position = 4;
            let expr = parser.parse_expr()?;
            if !parser.at_end() {
                bail!("unexpected trailing tokens in statement '{line}'");
            }
            return Ok(Statement::AssignOutput { field, expr });
        }
        if parser.tokens.get(1) == Some(&Token::Assign) {
            parser.position = 2;
            let expr = parser.parse_expr()?;
            if !parser.at_end() {
                bail!("unexpected trailing tokens in statement '{line}'");
            }
            return Ok(Statement::AssignVar { name: head, expr });
        }
    }

    let expr = parser.parse_expr()?;
    if !parser.at_end() {
        bail!("unexpected trailing tokens in statement '{line}'");
    }
    Ok(Statement::Expr(expr))
}

/// Read-only evaluation scope over the variable table and the `output`
/// record.
pub struct Scope<'a> {
    pub vars: &'a IndexMap<String, String>,
    pub output: &'a IndexMap<String, ScriptValue>,
}

impl Scope<'_> {
    pub fn eval(&self, expr: &Expr) -> Result<ScriptValue> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.lookup(name),
            Expr::OutputField(field) => Ok(self.output.get(field).cloned().unwrap_or(ScriptValue::Null)),
            Expr::Not(inner) => Ok(ScriptValue::Bool(!self.eval(inner)?.truthy())),
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
        }
    }

    /// Defined variables resolve to their string value. Undefined
    /// identifiers shaped like environment variables resolve to null so an
    /// unreferenced env variable is falsy rather than an error.
    fn lookup(&self, name: &str) -> Result<ScriptValue> {
        if let Some(value) = self.vars.get(name) {
            return Ok(ScriptValue::Str(value.clone()));
        }
        if ENV_VAR_PATTERN.is_match(name) {
            return Ok(ScriptValue::Null);
        }
        bail!("undefined identifier '{name}'");
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<ScriptValue> {
        match op {
            BinaryOp::And => {
                let left_value = self.eval(left)?;
                if !left_value.truthy() {
                    return Ok(ScriptValue::Bool(false));
                }
                Ok(ScriptValue::Bool(self.eval(right)?.truthy()))
            }
            BinaryOp::Or => {
                let left_value = self.eval(left)?;
                if left_value.truthy() {
                    return Ok(ScriptValue::Bool(true));
                }
                Ok(ScriptValue::Bool(self.eval(right)?.truthy()))
            }
            BinaryOp::Eq => Ok(ScriptValue::Bool(values_equal(&self.eval(left)?, &self.eval(right)?))),
            BinaryOp::Ne => Ok(ScriptValue::Bool(!values_equal(&self.eval(left)?, &self.eval(right)?))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let left_value = self.eval(left)?;
                let right_value = self.eval(right)?;
                let ordering = compare_values(&left_value, &right_value);
                let result = match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    BinaryOp::Ge => ordering.is_ge(),
                    _ => unreachable!("comparison ops only"),
                };
                Ok(ScriptValue::Bool(result))
            }
        }
    }
}

/// Equality: numeric when both sides coerce to numbers (so `"3" == 3`),
/// otherwise string comparison of display forms.
fn values_equal(left: &ScriptValue, right: &ScriptValue) -> bool {
    if let (Some(left_number), Some(right_number)) = (left.as_number(), right.as_number()) {
        return left_number == right_number;
    }
    left.to_display_string() == right.to_display_string()
}

fn compare_values(left: &ScriptValue, right: &ScriptValue) -> std::cmp::Ordering {
    if let (Some(left_number), Some(right_number)) = (left.as_number(), right.as_number()) {
        return left_number.partial_cmp(&right_number).unwrap_or(std::cmp::Ordering::Equal);
    }
    left.to_display_string().cmp(&right.to_display_string())
}
