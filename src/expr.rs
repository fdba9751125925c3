//! Restricted expression language for placement requirements and rank.
//!
//! Expressions are evaluated against an explicit binding map and nothing
//! else. The grammar covers boolean combinators, comparisons, set
//! membership, glob matching and simple arithmetic; anything outside it is
//! rejected at parse time.
use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use thiserror::Error;

/// Errors from parsing or evaluating an expression.
#[derive(Debug, Error)]
pub enum ExprError {
    /// The input is not a sentence of the grammar.
    #[error("Parse error at offset {pos}: {message}")]
    Parse {
        /// Character offset of the offending token.
        pos: usize,
        /// What went wrong.
        message: String,
    },

    /// The expression referenced a name outside the binding map.
    #[error("Unknown binding '{0}'")]
    UnknownBinding(String),

    /// An operator was applied to operands of the wrong type.
    #[error("Type error: {op} not defined for {operands}")]
    TypeMismatch {
        /// The operator.
        op: &'static str,
        /// Description of the operand types.
        operands: String,
    },

    /// A `matches` pattern could not be compiled.
    #[error("Invalid match pattern '{0}'")]
    BadPattern(String),
}

/// A value produced by evaluation or supplied as a binding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Number; integers and floats share this representation.
    Num(f64),
    /// String.
    Str(String),
    /// Set of strings, the shape of the `tags` binding.
    Set(BTreeSet<String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Set(_) => "set",
        }
    }
}

/// Binding namespace an expression is evaluated against.
pub type Bindings = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    In,
    Matches,
}

/// A parsed expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Numeric literal.
    Num(f64),
    /// String literal.
    Str(String),
    /// Binding reference.
    Ident(String),
    /// Logical negation.
    Not(Box<Expr>),
    /// Arithmetic negation.
    Neg(Box<Expr>),
    /// Short-circuit conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// Comparison.
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    /// Set membership, possibly negated.
    In {
        /// Element under test.
        needle: Box<Expr>,
        /// Set searched.
        haystack: Box<Expr>,
        /// True for `not in`.
        negated: bool,
    },
    /// Glob match of a string against a pattern.
    Matches(Box<Expr>, Box<Expr>),
    /// Binary arithmetic.
    Arith(ArithOp, Box<Expr>, Box<Expr>),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
}

fn lex(input: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            '+' => {
                tokens.push((i, Token::Plus));
                i += 1;
            }
            '-' => {
                tokens.push((i, Token::Minus));
                i += 1;
            }
            '*' => {
                tokens.push((i, Token::Star));
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Eq));
                    i += 2;
                } else {
                    return Err(ExprError::Parse {
                        pos: i,
                        message: "expected '=='".into(),
                    });
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Ne));
                    i += 2;
                } else {
                    return Err(ExprError::Parse {
                        pos: i,
                        message: "expected '!='".into(),
                    });
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Le));
                    i += 2;
                } else {
                    tokens.push((i, Token::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Ge));
                    i += 2;
                } else {
                    tokens.push((i, Token::Gt));
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut s = String::new();
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExprError::Parse {
                        pos: start,
                        message: "unterminated string literal".into(),
                    });
                }
                i += 1;
                tokens.push((start, Token::Str(s)));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut s = String::new();
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    s.push(chars[i]);
                    i += 1;
                }
                let value = s.parse::<f64>().map_err(|_| ExprError::Parse {
                    pos: start,
                    message: format!("invalid number '{s}'"),
                })?;
                tokens.push((start, Token::Num(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut s = String::new();
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    s.push(chars[i]);
                    i += 1;
                }
                let token = match s.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "matches" => Token::Matches,
                    _ => Token::Ident(s),
                };
                tokens.push((start, token));
            }
            other => {
                return Err(ExprError::Parse {
                    pos: i,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(at, _)| *at)
            .unwrap_or(self.input_len)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        let at = self.offset();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(ExprError::Parse {
                pos: at,
                message: format!("expected {expected:?}, found {other:?}"),
            }),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Not) {
            // `not in` is handled in parse_comparison; here `not` must
            // prefix a full operand.
            self.next();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_additive()?;

        let op = match self.peek() {
            Some(Token::Eq) => Some(CmpOp::Eq),
            Some(Token::Ne) => Some(CmpOp::Ne),
            Some(Token::Lt) => Some(CmpOp::Lt),
            Some(Token::Le) => Some(CmpOp::Le),
            Some(Token::Gt) => Some(CmpOp::Gt),
            Some(Token::Ge) => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.next();
            let right = self.parse_additive()?;
            return Ok(Expr::Cmp(op, Box::new(left), Box::new(right)));
        }

        if self.peek() == Some(&Token::In) {
            self.next();
            let haystack = self.parse_additive()?;
            return Ok(Expr::In {
                needle: Box::new(left),
                haystack: Box::new(haystack),
                negated: false,
            });
        }

        if self.peek() == Some(&Token::Not) {
            let at = self.offset();
            self.next();
            self.expect(Token::In).map_err(|_| ExprError::Parse {
                pos: at,
                message: "expected 'in' after 'not'".into(),
            })?;
            let haystack = self.parse_additive()?;
            return Ok(Expr::In {
                needle: Box::new(left),
                haystack: Box::new(haystack),
                negated: true,
            });
        }

        if self.peek() == Some(&Token::Matches) {
            self.next();
            let pattern = self.parse_additive()?;
            return Ok(Expr::Matches(Box::new(left), Box::new(pattern)));
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.next();
            let right = self.parse_multiplicative()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::Star) {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::Arith(ArithOp::Mul, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let at = self.offset();
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(ExprError::Parse {
                pos: at,
                message: format!("expected a value, found {other:?}"),
            }),
        }
    }
}

impl Expr {
    /// Parses an expression; anything outside the restricted grammar fails.
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let tokens = lex(input)?;
        if tokens.is_empty() {
            return Err(ExprError::Parse {
                pos: 0,
                message: "empty expression".into(),
            });
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            input_len: input.chars().count(),
        };
        let expr = parser.parse_or()?;
        if parser.peek().is_some() {
            return Err(ExprError::Parse {
                pos: parser.offset(),
                message: "trailing input after expression".into(),
            });
        }
        Ok(expr)
    }

    /// Evaluates against the binding map. Only bound names are in scope.
    pub fn eval(&self, bindings: &Bindings) -> Result<Value, ExprError> {
        match self {
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Ident(name) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::UnknownBinding(name.clone())),
            Expr::Not(inner) => match inner.eval(bindings)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(ExprError::TypeMismatch {
                    op: "not",
                    operands: other.type_name().into(),
                }),
            },
            Expr::Neg(inner) => match inner.eval(bindings)? {
                Value::Num(n) => Ok(Value::Num(-n)),
                other => Err(ExprError::TypeMismatch {
                    op: "unary -",
                    operands: other.type_name().into(),
                }),
            },
            Expr::And(left, right) => match left.eval(bindings)? {
                Value::Bool(false) => Ok(Value::Bool(false)),
                Value::Bool(true) => match right.eval(bindings)? {
                    Value::Bool(b) => Ok(Value::Bool(b)),
                    other => Err(ExprError::TypeMismatch {
                        op: "and",
                        operands: other.type_name().into(),
                    }),
                },
                other => Err(ExprError::TypeMismatch {
                    op: "and",
                    operands: other.type_name().into(),
                }),
            },
            Expr::Or(left, right) => match left.eval(bindings)? {
                Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Bool(false) => match right.eval(bindings)? {
                    Value::Bool(b) => Ok(Value::Bool(b)),
                    other => Err(ExprError::TypeMismatch {
                        op: "or",
                        operands: other.type_name().into(),
                    }),
                },
                other => Err(ExprError::TypeMismatch {
                    op: "or",
                    operands: other.type_name().into(),
                }),
            },
            Expr::Cmp(op, left, right) => {
                let left = left.eval(bindings)?;
                let right = right.eval(bindings)?;
                eval_cmp(*op, &left, &right)
            }
            Expr::In {
                needle,
                haystack,
                negated,
            } => {
                let needle = needle.eval(bindings)?;
                let haystack = haystack.eval(bindings)?;
                match (&needle, &haystack) {
                    (Value::Str(s), Value::Set(set)) => {
                        let found = set.contains(s);
                        Ok(Value::Bool(found != *negated))
                    }
                    _ => Err(ExprError::TypeMismatch {
                        op: "in",
                        operands: format!(
                            "{} in {}",
                            needle.type_name(),
                            haystack.type_name()
                        ),
                    }),
                }
            }
            Expr::Matches(subject, pattern) => {
                let subject = subject.eval(bindings)?;
                let pattern = pattern.eval(bindings)?;
                match (&subject, &pattern) {
                    (Value::Str(s), Value::Str(p)) => {
                        let re = glob_to_regex(p)?;
                        Ok(Value::Bool(re.is_match(s)))
                    }
                    _ => Err(ExprError::TypeMismatch {
                        op: "matches",
                        operands: format!(
                            "{} matches {}",
                            subject.type_name(),
                            pattern.type_name()
                        ),
                    }),
                }
            }
            Expr::Arith(op, left, right) => {
                let left = left.eval(bindings)?;
                let right = right.eval(bindings)?;
                match (&left, &right) {
                    (Value::Num(a), Value::Num(b)) => Ok(Value::Num(match op {
                        ArithOp::Add => a + b,
                        ArithOp::Sub => a - b,
                        ArithOp::Mul => a * b,
                    })),
                    _ => Err(ExprError::TypeMismatch {
                        op: match op {
                            ArithOp::Add => "+",
                            ArithOp::Sub => "-",
                            ArithOp::Mul => "*",
                        },
                        operands: format!("{}, {}", left.type_name(), right.type_name()),
                    }),
                }
            }
        }
    }

    /// Evaluates to a boolean; any other result type is a type error.
    pub fn eval_bool(&self, bindings: &Bindings) -> Result<bool, ExprError> {
        match self.eval(bindings)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExprError::TypeMismatch {
                op: "boolean context",
                operands: other.type_name().into(),
            }),
        }
    }

    /// Evaluates to a number; any other result type is a type error.
    pub fn eval_num(&self, bindings: &Bindings) -> Result<f64, ExprError> {
        match self.eval(bindings)? {
            Value::Num(n) => Ok(n),
            other => Err(ExprError::TypeMismatch {
                op: "numeric context",
                operands: other.type_name().into(),
            }),
        }
    }
}

fn eval_cmp(op: CmpOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    let result = match (left, right) {
        (Value::Num(a), Value::Num(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        },
        (Value::Str(a), Value::Str(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        },
        (Value::Bool(a), Value::Bool(b)) if matches!(op, CmpOp::Eq | CmpOp::Ne) => match op {
            CmpOp::Eq => a == b,
            _ => a != b,
        },
        _ => {
            return Err(ExprError::TypeMismatch {
                op: "comparison",
                operands: format!("{}, {}", left.type_name(), right.type_name()),
            });
        }
    };
    Ok(Value::Bool(result))
}

/// Compiles a glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, ExprError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|_| ExprError::BadPattern(pattern.to_string()))
}
