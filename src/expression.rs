//! Rule expressions.
//!
//! Conditions and consequents in the rule table are small expression trees
//! rather than source code. They are evaluated against the URL properties
//! and, for DOM sub-rules, the node the sub-rule's selector matched.

use crate::error::EvalError;
use crate::markup::Node;
use crate::properties::{PropertySet, PROPERTY_NAMES};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    fn kind(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Number(_) => "number".to_string(),
            Value::Str(_) => "string".to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    Literal {
        value: Value,
    },
    /// A URL property such as `SLD` or `pathname`.
    Property {
        name: String,
    },
    /// An attribute of the matched DOM node (null when the attribute is absent).
    NodeAttribute {
        name: String,
    },
    NodeText,
    /// String concatenation. Null if any part is null.
    Concat {
        parts: Vec<Expr>,
    },
    Equals {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    NotEquals {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Less {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Greater {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    OneOf {
        value: Box<Expr>,
        list: Vec<Value>,
    },
    StartsWith {
        value: Box<Expr>,
        prefix: String,
    },
    EndsWith {
        value: Box<Expr>,
        suffix: String,
    },
    Contains {
        value: Box<Expr>,
        needle: String,
    },
    Matches {
        value: Box<Expr>,
        pattern: String,
    },
    /// One dot-separated label; negative indices count from the end.
    Label {
        value: Box<Expr>,
        index: i64,
    },
    Lower {
        value: Box<Expr>,
    },
    Length {
        value: Box<Expr>,
    },
    Add {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Subtract {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Multiply {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Divide {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And {
        all: Vec<Expr>,
    },
    Or {
        any: Vec<Expr>,
    },
    Not {
        value: Box<Expr>,
    },
}

/// What an expression can see while it is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub props: &'a PropertySet,
    pub node: Option<&'a Node>,
}

impl<'a> EvalContext<'a> {
    pub fn new(props: &'a PropertySet) -> Self {
        Self { props, node: None }
    }

    pub fn with_node(mut self, node: Option<&'a Node>) -> Self {
        self.node = node;
        self
    }
}

fn string_of(op: &'static str, value: Value) -> Result<String, EvalError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(EvalError::TypeMismatch {
            op,
            expected: "a string",
            found: other.kind(),
        }),
    }
}

fn number_of(op: &'static str, value: Value) -> Result<f64, EvalError> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(EvalError::TypeMismatch {
            op,
            expected: "a number",
            found: other.kind(),
        }),
    }
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal {
            value: value.into(),
        }
    }

    pub fn property(name: &str) -> Self {
        Expr::Property {
            name: name.to_string(),
        }
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
        match self {
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Property { name } => Ok(ctx.props.get(name)),
            Expr::NodeAttribute { name } => {
                let node = ctx
                    .node
                    .ok_or_else(|| EvalError::NoNode(format!("NodeAttribute {name}")))?;
                Ok(node
                    .attribute(name)
                    .map(Value::from)
                    .unwrap_or(Value::Null))
            }
            Expr::NodeText => {
                let node = ctx
                    .node
                    .ok_or_else(|| EvalError::NoNode("NodeText".to_string()))?;
                Ok(Value::Str(node.text().to_string()))
            }
            Expr::Concat { parts } => {
                let mut out = String::new();
                for part in parts {
                    match part.evaluate(ctx)? {
                        Value::Null => return Ok(Value::Null),
                        value => out.push_str(&value.to_string()),
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Equals { left, right } => {
                Ok(Value::Bool(left.evaluate(ctx)? == right.evaluate(ctx)?))
            }
            Expr::NotEquals { left, right } => {
                Ok(Value::Bool(left.evaluate(ctx)? != right.evaluate(ctx)?))
            }
            Expr::Less { left, right } => compare("Less", left, right, ctx, |o| o.is_lt()),
            Expr::Greater { left, right } => compare("Greater", left, right, ctx, |o| o.is_gt()),
            Expr::OneOf { value, list } => {
                let value = value.evaluate(ctx)?;
                Ok(Value::Bool(list.contains(&value)))
            }
            Expr::StartsWith { value, prefix } => {
                let s = string_of("StartsWith", value.evaluate(ctx)?)?;
                Ok(Value::Bool(s.starts_with(prefix.as_str())))
            }
            Expr::EndsWith { value, suffix } => {
                let s = string_of("EndsWith", value.evaluate(ctx)?)?;
                Ok(Value::Bool(s.ends_with(suffix.as_str())))
            }
            Expr::Contains { value, needle } => {
                let s = string_of("Contains", value.evaluate(ctx)?)?;
                Ok(Value::Bool(s.contains(needle.as_str())))
            }
            Expr::Matches { value, pattern } => {
                let s = string_of("Matches", value.evaluate(ctx)?)?;
                let re = Regex::new(pattern).map_err(|e| EvalError::Pattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                Ok(Value::Bool(re.is_match(&s)))
            }
            Expr::Label { value, index } => {
                let s = string_of("Label", value.evaluate(ctx)?)?;
                let labels: Vec<&str> = s.split('.').collect();
                let position = if *index < 0 {
                    labels.len() as i64 + index
                } else {
                    *index
                };
                Ok(usize::try_from(position)
                    .ok()
                    .and_then(|i| labels.get(i))
                    .map(|label| Value::from(*label))
                    .unwrap_or(Value::Null))
            }
            Expr::Lower { value } => {
                let s = string_of("Lower", value.evaluate(ctx)?)?;
                Ok(Value::Str(s.to_lowercase()))
            }
            Expr::Length { value } => {
                let s = string_of("Length", value.evaluate(ctx)?)?;
                Ok(Value::Number(s.chars().count() as f64))
            }
            Expr::Add { left, right } => match (left.evaluate(ctx)?, right.evaluate(ctx)?) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (a @ Value::Str(_), b) | (a, b @ Value::Str(_)) => {
                    Ok(Value::Str(format!("{a}{b}")))
                }
                (a, _) => Err(EvalError::TypeMismatch {
                    op: "Add",
                    expected: "numbers or strings",
                    found: a.kind(),
                }),
            },
            Expr::Subtract { left, right } => {
                arithmetic("Subtract", left, right, ctx, |a, b| a - b)
            }
            Expr::Multiply { left, right } => {
                arithmetic("Multiply", left, right, ctx, |a, b| a * b)
            }
            Expr::Divide { left, right } => {
                arithmetic("Divide", left, right, ctx, |a, b| a / b)
            }
            Expr::And { all } => {
                let mut last = Value::Bool(true);
                for expr in all {
                    last = expr.evaluate(ctx)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Or { any } => {
                let mut last = Value::Bool(false);
                for expr in any {
                    last = expr.evaluate(ctx)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Not { value } => Ok(Value::Bool(!value.evaluate(ctx)?.is_truthy())),
        }
    }

    /// Check that the expression only refers to known properties, that its
    /// patterns compile, and that node accessors appear only where a node can
    /// be bound.
    pub fn validate(&self, node_allowed: bool) -> Result<(), String> {
        match self {
            Expr::Literal { .. } => Ok(()),
            Expr::Property { name } => {
                if PROPERTY_NAMES.contains(&name.as_str()) {
                    Ok(())
                } else {
                    Err(format!("unknown property `{name}`"))
                }
            }
            Expr::NodeAttribute { .. } | Expr::NodeText => {
                if node_allowed {
                    Ok(())
                } else {
                    Err("node accessors are only allowed in dom sub-rules".to_string())
                }
            }
            Expr::Concat { parts } => parts.iter().try_for_each(|p| p.validate(node_allowed)),
            Expr::And { all } => all.iter().try_for_each(|p| p.validate(node_allowed)),
            Expr::Or { any } => any.iter().try_for_each(|p| p.validate(node_allowed)),
            Expr::Equals { left, right }
            | Expr::NotEquals { left, right }
            | Expr::Less { left, right }
            | Expr::Greater { left, right }
            | Expr::Add { left, right }
            | Expr::Subtract { left, right }
            | Expr::Multiply { left, right }
            | Expr::Divide { left, right } => {
                left.validate(node_allowed)?;
                right.validate(node_allowed)
            }
            Expr::Matches { value, pattern } => {
                Regex::new(pattern).map_err(|e| format!("invalid pattern `{pattern}`: {e}"))?;
                value.validate(node_allowed)
            }
            Expr::OneOf { value, .. }
            | Expr::StartsWith { value, .. }
            | Expr::EndsWith { value, .. }
            | Expr::Contains { value, .. }
            | Expr::Label { value, .. }
            | Expr::Lower { value }
            | Expr::Length { value }
            | Expr::Not { value } => value.validate(node_allowed),
        }
    }
}

fn compare(
    op: &'static str,
    left: &Expr,
    right: &Expr,
    ctx: &EvalContext<'_>,
    accept: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, EvalError> {
    let ordering = match (left.evaluate(ctx)?, right.evaluate(ctx)?) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(&b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(&b)),
        (a, _) => {
            return Err(EvalError::TypeMismatch {
                op,
                expected: "two numbers or two strings",
                found: a.kind(),
            })
        }
    };
    Ok(Value::Bool(ordering.map(accept).unwrap_or(false)))
}

fn arithmetic(
    op: &'static str,
    left: &Expr,
    right: &Expr,
    ctx: &EvalContext<'_>,
    apply: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    let a = number_of(op, left.evaluate(ctx)?)?;
    let b = number_of(op, right.evaluate(ctx)?)?;
    Ok(Value::Number(apply(a, b)))
}
