//! Matcher Framework
//!
//! A matcher decides whether one argument satisfies one configured slot.
//! Matchers are immutable once attached to a descriptor. Custom matchers are
//! resolved through an explicit `(scope, name, arity)` evaluator table that is
//! populated by registration, never by scanning.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use regex::{Regex, RegexBuilder};

use crate::error::{ExtractionError, Result, SubstituteError};
use crate::sync::{read, write};
use crate::value::Value;

pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Evaluator for a custom matcher: `(matcher arguments, candidate) -> accepted`
pub type Evaluator = Arc<dyn Fn(&[Value], &Value) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    Inclusive,
    Exclusive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexOptions {
    pub case_insensitive: bool,
    pub multi_line: bool,
}

#[derive(Clone)]
pub enum Matcher {
    Exact(Value),
    Any,
    Predicate {
        predicate: Predicate,
        render: Option<String>,
    },
    Range {
        lo: Value,
        hi: Value,
        kind: RangeKind,
    },
    Regex {
        pattern: String,
        options: RegexOptions,
        compiled: std::result::Result<Arc<Regex>, String>,
    },
    Custom {
        scope: String,
        name: String,
        args: Vec<Value>,
        render: Option<String>,
    },
    /// Element-wise matchers for a trailing parameter array
    Params(Vec<Matcher>),
}

impl Matcher {
    pub fn is_satisfied_by(&self, value: &Value) -> Result<bool> {
        match self {
            Matcher::Exact(expected) => Ok(expected == value),
            Matcher::Any => Ok(true),
            Matcher::Predicate { predicate, .. } => Ok(predicate(value)),
            Matcher::Range { lo, hi, kind } => Ok(in_range(value, lo, hi, *kind)),
            Matcher::Regex { compiled, .. } => Ok(match (compiled, value) {
                (Ok(re), Value::Str(s)) => re.is_match(s),
                _ => false,
            }),
            Matcher::Custom { scope, name, args, .. } => {
                let evaluator = MatcherRegistry::global().resolve(scope, name, args.len())?;
                Ok(evaluator(args, value))
            }
            Matcher::Params(elements) => {
                let Some(items) = value.as_list() else {
                    return Ok(false);
                };
                if items.len() != elements.len() {
                    return Ok(false);
                }
                for (matcher, item) in elements.iter().zip(items) {
                    if !matcher.is_satisfied_by(item)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Setup-time checks that can be decided without a candidate value.
    pub fn validate(&self) -> Result<()> {
        match self {
            Matcher::Regex { pattern, compiled: Err(reason), .. } => Err(ExtractionError::InvalidPattern {
                pattern: pattern.clone(),
                reason: reason.clone(),
            }
            .into()),
            Matcher::Custom { scope, name, args, .. } => {
                MatcherRegistry::global().resolve(scope, name, args.len()).map(|_| ())
            }
            Matcher::Params(elements) => elements.iter().try_for_each(Matcher::validate),
            _ => Ok(()),
        }
    }
}

fn in_range(value: &Value, lo: &Value, hi: &Value, kind: RangeKind) -> bool {
    use std::cmp::Ordering::*;
    let (Some(from_lo), Some(to_hi)) = (value.compare(lo), value.compare(hi)) else {
        return false;
    };
    match kind {
        RangeKind::Inclusive => from_lo != Less && to_hi != Greater,
        RangeKind::Exclusive => from_lo == Greater && to_hi == Less,
    }
}

/// Predicate and custom matchers are only equal when both carry an equal
/// render expression. Without one they are never provably equal.
impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Matcher::Exact(a), Matcher::Exact(b)) => a == b,
            (Matcher::Any, Matcher::Any) => true,
            (
                Matcher::Predicate { render: Some(a), .. },
                Matcher::Predicate { render: Some(b), .. },
            ) => a == b,
            (
                Matcher::Range { lo: l1, hi: h1, kind: k1 },
                Matcher::Range { lo: l2, hi: h2, kind: k2 },
            ) => l1 == l2 && h1 == h2 && k1 == k2,
            (
                Matcher::Regex { pattern: p1, options: o1, .. },
                Matcher::Regex { pattern: p2, options: o2, .. },
            ) => p1 == p2 && o1 == o2,
            (
                Matcher::Custom { render: Some(a), .. },
                Matcher::Custom { render: Some(b), .. },
            ) => a == b,
            (
                Matcher::Custom { scope: s1, name: n1, args: a1, render: None },
                Matcher::Custom { scope: s2, name: n2, args: a2, render: None },
            ) => a1.is_empty() && a2.is_empty() && s1 == s2 && n1 == n2,
            (Matcher::Params(a), Matcher::Params(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Exact(v) => write!(f, "{}", v),
            Matcher::Any => write!(f, "It::any()"),
            Matcher::Predicate { render: Some(r), .. } => f.write_str(r),
            Matcher::Predicate { render: None, .. } => write!(f, "It::is(..)"),
            Matcher::Range { lo, hi, kind } => write!(f, "It::in_range({}, {}, {:?})", lo, hi, kind),
            Matcher::Regex { pattern, .. } => write!(f, "It::matches({:?})", pattern),
            Matcher::Custom { render: Some(r), .. } => f.write_str(r),
            Matcher::Custom { scope, name, args, render: None } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}::{}({})", scope, name, args.join(", "))
            }
            Matcher::Params(elements) => {
                let parts: Vec<String> = elements.iter().map(|m| m.to_string()).collect();
                f.write_str(&parts.join(", "))
            }
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matcher({})", self)
    }
}

/// Argument matcher constructors
pub struct It;

impl It {
    pub fn any() -> Matcher {
        Matcher::Any
    }

    pub fn value(v: impl Into<Value>) -> Matcher {
        Matcher::Exact(v.into())
    }

    pub fn is(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Matcher {
        Matcher::Predicate {
            predicate: Arc::new(predicate),
            render: None,
        }
    }

    /// Predicate with a render expression that also defines its equality
    pub fn is_described(render: &str, predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Matcher {
        Matcher::Predicate {
            predicate: Arc::new(predicate),
            render: Some(render.to_string()),
        }
    }

    pub fn is_in(values: Vec<Value>) -> Matcher {
        let render = format!("It::is_in({})", Value::List(values.clone()));
        It::is_described(&render, move |v| values.contains(v))
    }

    pub fn is_not_in(values: Vec<Value>) -> Matcher {
        let render = format!("It::is_not_in({})", Value::List(values.clone()));
        It::is_described(&render, move |v| !values.contains(v))
    }

    pub fn in_range(lo: impl Into<Value>, hi: impl Into<Value>, kind: RangeKind) -> Matcher {
        Matcher::Range {
            lo: lo.into(),
            hi: hi.into(),
            kind,
        }
    }

    pub fn matches(pattern: &str) -> Matcher {
        It::matches_with(pattern, RegexOptions::default())
    }

    pub fn matches_with(pattern: &str, options: RegexOptions) -> Matcher {
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(options.case_insensitive)
            .multi_line(options.multi_line)
            .build()
            .map(Arc::new)
            .map_err(|e| e.to_string());
        Matcher::Regex {
            pattern: pattern.to_string(),
            options,
            compiled,
        }
    }

    pub fn custom(scope: &str, name: &str, args: Vec<Value>) -> Matcher {
        Matcher::Custom {
            scope: scope.to_string(),
            name: name.to_string(),
            args,
            render: None,
        }
    }

    pub fn custom_rendered(scope: &str, name: &str, args: Vec<Value>, render: &str) -> Matcher {
        Matcher::Custom {
            scope: scope.to_string(),
            name: name.to_string(),
            args,
            render: Some(render.to_string()),
        }
    }
}

type EvaluatorKey = (String, String, usize);

/// Registration table for custom matcher evaluators
#[derive(Default)]
pub struct MatcherRegistry {
    evaluators: RwLock<HashMap<EvaluatorKey, Evaluator>>,
}

lazy_static::lazy_static! {
    static ref GLOBAL_MATCHERS: MatcherRegistry = MatcherRegistry::default();
}

impl MatcherRegistry {
    pub fn global() -> &'static MatcherRegistry {
        &GLOBAL_MATCHERS
    }

    pub fn register(
        &self,
        scope: &str,
        name: &str,
        arity: usize,
        evaluator: impl Fn(&[Value], &Value) -> bool + Send + Sync + 'static,
    ) {
        tracing::debug!("Registering matcher evaluator {}::{}/{}", scope, name, arity);
        write(&self.evaluators).insert((scope.to_string(), name.to_string(), arity), Arc::new(evaluator));
    }

    pub fn unregister(&self, scope: &str, name: &str, arity: usize) -> bool {
        write(&self.evaluators)
            .remove(&(scope.to_string(), name.to_string(), arity))
            .is_some()
    }

    pub fn resolve(&self, scope: &str, name: &str, arity: usize) -> Result<Evaluator> {
        read(&self.evaluators)
            .get(&(scope.to_string(), name.to_string(), arity))
            .cloned()
            .ok_or_else(|| SubstituteError::MissingMatcherEvaluator {
                scope: scope.to_string(),
                name: name.to_string(),
                arity,
            })
    }
}
