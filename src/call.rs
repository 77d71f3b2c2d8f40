//! Call descriptors and recorded invocations

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::contract::MemberRef;
use crate::error::Result;
use crate::matcher::Matcher;
use crate::proxy::Call;
use crate::value::Value;

/// Canonical `{member, argument slots}` shape of a call
#[derive(Clone)]
pub struct CallDescriptor {
    pub member: MemberRef,
    pub slots: Vec<Matcher>,
    /// Values assigned to out cells, by argument position
    pub outs: Vec<(usize, Value)>,
    text: String,
}

impl CallDescriptor {
    pub fn new(member: MemberRef, slots: Vec<Matcher>, outs: Vec<(usize, Value)>, text: String) -> Self {
        Self {
            member,
            slots,
            outs,
            text,
        }
    }

    /// Rendered segment, e.g. `x.Lookup(5)`
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn matches(&self, call: &Call) -> Result<bool> {
        if self.member != call.member || self.slots.len() != call.args.len() {
            return Ok(false);
        }
        for (matcher, arg) in self.slots.iter().zip(&call.args) {
            if !matcher.is_satisfied_by(arg)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Every slot is an exact value, so the descriptor names one access site.
    pub fn exact_args(&self) -> Option<Vec<Value>> {
        self.slots
            .iter()
            .map(|m| match m {
                Matcher::Exact(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }
}

impl PartialEq for CallDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.member == other.member && self.slots == other.slots
    }
}

impl fmt::Debug for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallDescriptor({})", self.text)
    }
}

impl fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Returned(Value),
    Raised(String),
}

/// One realized call recorded in a ledger
#[derive(Debug)]
pub struct Invocation {
    pub call: Call,
    pub outcome: Outcome,
    pub matched_setup: Option<u64>,
    pub recorded_at: DateTime<Utc>,
    verified: AtomicBool,
}

impl Invocation {
    pub fn new(call: Call, outcome: Outcome, matched_setup: Option<u64>) -> Self {
        Self {
            call,
            outcome,
            matched_setup,
            recorded_at: Utc::now(),
            verified: AtomicBool::new(false),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::Acquire)
    }

    pub fn mark_verified(&self) {
        self.verified.store(true, Ordering::Release);
    }

    pub fn return_value(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Returned(v) => Some(v),
            Outcome::Raised(_) => None,
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.call)?;
        if self.is_verified() {
            write!(f, " (verified)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{param, Contract, MemberKind, TypeSpec};
    use crate::matcher::It;

    fn member() -> MemberRef {
        let c = Contract::interface("ISvc")
            .method("Foo", vec![param("a", TypeSpec::Int), param("b", TypeSpec::Str)], TypeSpec::Int)
            .build();
        MemberRef::new(c.find(MemberKind::Method, "Foo", 2).unwrap())
    }

    #[test]
    fn test_descriptor_matches_call() {
        let m = member();
        let d = CallDescriptor::new(m.clone(), vec![It::value(1), It::any()], vec![], "x.Foo(1, It::any())".into());
        let hit = Call { member: m.clone(), args: vec![1.into(), "z".into()] };
        let miss = Call { member: m, args: vec![2.into(), "z".into()] };
        assert!(d.matches(&hit).unwrap());
        assert!(!d.matches(&miss).unwrap());
    }

    #[test]
    fn test_descriptor_equality_ignores_text() {
        let m = member();
        let a = CallDescriptor::new(m.clone(), vec![It::value(1), It::any()], vec![], "a".into());
        let b = CallDescriptor::new(m, vec![It::value(1), It::any()], vec![], "b".into());
        assert_eq!(a, b);
        assert_eq!(a.exact_args(), None);
    }

    #[test]
    fn test_invocation_verification_flag() {
        let inv = Invocation::new(Call { member: member(), args: vec![] }, Outcome::Returned(Value::Unit), None);
        assert!(!inv.is_verified());
        inv.mark_verified();
        assert!(inv.is_verified());
        assert!(inv.to_string().ends_with("(verified)"));
    }
}
