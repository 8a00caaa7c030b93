//! Property filters passed through to the search capability.
//!
//! Clauses are written `property<op>value`, e.g. `lifecyclestage=customer`
//! or `employees>=50`. The value is passed through verbatim; interpreting it
//! is the search capability's job.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub property: String,
    pub operator: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn new(property: impl Into<String>, operator: FilterOp, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            operator,
            value: value.into(),
        }
    }
}

impl FromStr for Filter {
    type Err = CoreError;

    fn from_str(clause: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CoreError::InvalidFilter {
            clause: clause.to_string(),
            reason: reason.to_string(),
        };

        let idx = clause
            .find(['=', '!', '<', '>'])
            .ok_or_else(|| invalid("expected one of = != > >= < <="))?;
        let property = clause[..idx].trim();
        if property.is_empty() {
            return Err(invalid("missing property name"));
        }

        let rest = &clause[idx..];
        let (operator, op_len) = if rest.starts_with("!=") {
            (FilterOp::Neq, 2)
        } else if rest.starts_with(">=") {
            (FilterOp::Gte, 2)
        } else if rest.starts_with("<=") {
            (FilterOp::Lte, 2)
        } else if rest.starts_with('=') {
            (FilterOp::Eq, 1)
        } else if rest.starts_with('>') {
            (FilterOp::Gt, 1)
        } else if rest.starts_with('<') {
            (FilterOp::Lt, 1)
        } else {
            return Err(invalid("'!' must be followed by '='"));
        };

        Ok(Filter::new(property, operator, rest[op_len..].trim()))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.property, self.operator.symbol(), self.value)
    }
}
