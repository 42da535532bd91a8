//! Resource and topic pattern matching.
//!
//! A pattern is classified once, when the grant carrying it is built:
//!
//! - `/<regex>/` is compiled and must match the whole candidate
//! - anything else is a literal compared by string equality
//!
//! Compiled expressions are shared through a process-wide cache keyed by the
//! enclosed source, so repeated grants of `/.*/` compile once. The cache
//! holds at most [`CACHE_CAPACITY`] expressions; past that, new sources are
//! compiled without being cached.

use crate::error::{PolicyError, Result};
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::debug;

const REGEX_DELIMITER: char = '/';

pub const CACHE_CAPACITY: usize = 1024;

lazy_static! {
    static ref COMPILED: DashMap<String, Regex> = DashMap::new();
}

/// True when `value` uses the delimited regex form.
pub fn is_regex_form(value: &str) -> bool {
    value.len() > 1 && value.starts_with(REGEX_DELIMITER) && value.ends_with(REGEX_DELIMITER)
}

fn compile(source: &str, inner: &str) -> Result<Regex> {
    if let Some(regex) = COMPILED.get(inner) {
        return Ok(regex.clone());
    }

    let regex = Regex::new(&format!("^(?:{})$", inner)).map_err(|e| PolicyError::InvalidPattern {
        pattern: source.to_string(),
        reason: e.to_string(),
    })?;
    debug!("Compiled pattern {}", source);
    if COMPILED.len() < CACHE_CAPACITY {
        COMPILED.insert(inner.to_string(), regex.clone());
    }
    Ok(regex)
}

pub(crate) fn cached_patterns() -> usize {
    COMPILED.len()
}

/// A method-name or topic pattern carried by a capability grant
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourcePattern {
    Literal(String),
    Regex { source: String, regex: Regex },
}

impl ResourcePattern {
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(PolicyError::InvalidPattern {
                pattern: String::new(),
                reason: "pattern must not be empty".to_string(),
            });
        }

        if is_regex_form(value) {
            let inner = &value[1..value.len() - 1];
            let regex = compile(value, inner)?;
            return Ok(Self::Regex {
                source: value.to_string(),
                regex,
            });
        }

        Ok(Self::Literal(value.to_string()))
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == candidate,
            Self::Regex { regex, .. } => regex.is_match(candidate),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(literal) => literal,
            Self::Regex { source, .. } => source,
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Self::Regex { .. })
    }
}

impl PartialEq for ResourcePattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ResourcePattern {}

impl Hash for ResourcePattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Debug for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => write!(f, "Literal({:?})", literal),
            Self::Regex { source, .. } => write!(f, "Regex({:?})", source),
        }
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ResourcePattern {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for ResourcePattern {
    type Error = PolicyError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ResourcePattern> for String {
    fn from(pattern: ResourcePattern) -> Self {
        match pattern {
            ResourcePattern::Literal(literal) => literal,
            ResourcePattern::Regex { source, .. } => source,
        }
    }
}
