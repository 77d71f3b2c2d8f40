//! Verification Engine
//!
//! Counts recorded calls against expectations, checks that setups were
//! exercised, and looks for leftover unverified calls. Every sweep walks the
//! graph of reachable substitutes (linked children, materialized children and
//! substitutes handed out by setups) with a visited set, so cycles terminate
//! and each substitute is reported once.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::call::Invocation;
use crate::error::{Result, SubstituteError};
use crate::expr::Expr;
use crate::extract::extract;
use crate::setup::{Setup, SetupKind};
use crate::substitute::Substitute;
use crate::times::Times;

/// Failures found on one substitute
#[derive(Debug, Clone, Serialize)]
pub struct SubstituteFailures {
    pub substitute: String,
    pub failures: Vec<String>,
}

/// Aggregated verification failures, grouped per substitute
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub groups: Vec<SubstituteFailures>,
}

impl VerificationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, substitute: &str, failure: String) {
        match self.groups.iter_mut().find(|g| g.substitute == substitute) {
            Some(group) => group.failures.push(failure),
            None => self.groups.push(SubstituteFailures {
                substitute: substitute.to_string(),
                failures: vec![failure],
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.groups.iter().map(|g| g.failures.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "failures": self.failure_count(),
            "substitutes": self.groups,
        })
    }

    pub(crate) fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(SubstituteError::VerificationFailed(self))
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Verification failed ({} problem(s)):", self.failure_count())?;
        for group in &self.groups {
            writeln!(f)?;
            writeln!(f, "  {}:", group.substitute)?;
            for failure in &group.failures {
                let mut lines = failure.lines();
                if let Some(first) = lines.next() {
                    writeln!(f, "    - {}", first)?;
                }
                for line in lines {
                    writeln!(f, "      {}", line)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sweep {
    /// Only setups flagged verifiable
    Verifiable,
    /// Every non-conditional setup
    All,
}

/// Substitutes reachable from `roots`, roots first, each once
pub(crate) fn reachable(roots: &[Substitute]) -> Vec<Substitute> {
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<Substitute> = roots.iter().rev().cloned().collect();
    while let Some(sub) = stack.pop() {
        if !visited.insert(sub.id()) {
            continue;
        }
        let mut next = sub.children();
        next.extend(
            sub.setups()
                .iter()
                .filter(|s| s.kind() == SetupKind::Standard)
                .filter_map(|s| s.returned_proxy())
                .filter_map(|p| Substitute::from_proxy(&p)),
        );
        stack.extend(next.into_iter().rev());
        order.push(sub);
    }
    order
}

fn describe_state(sub: &Substitute) -> String {
    let mut out = String::new();
    let setups = sub.setups();
    if !setups.is_empty() {
        out.push_str("\nConfigured setups:");
        for s in setups.iter().filter(|s| s.kind() != SetupKind::Hop) {
            out.push_str(&format!("\n  {}", s.text()));
        }
    }
    let invocations = sub.invocations();
    if invocations.is_empty() {
        out.push_str("\nNo invocations performed.");
    } else {
        out.push_str("\nPerformed invocations:");
        for inv in &invocations {
            out.push_str(&format!("\n  [{}] {}", inv.recorded_at.format("%H:%M:%S%.3f"), inv));
        }
    }
    out
}

pub(crate) fn verify_call(
    root: &Substitute,
    expr: &Expr,
    times: Times,
    message: Option<&str>,
) -> Result<Vec<Arc<Invocation>>> {
    let ex = extract(root.contract(), expr)?;

    let mut owners = vec![root.clone()];
    let mut hop_calls: Vec<Arc<Invocation>> = Vec::new();
    for hop in &ex.hops {
        let mut reached: Vec<Substitute> = Vec::new();
        for owner in &owners {
            for inv in owner.invocations() {
                if !hop.descriptor.matches(&inv.call)? {
                    continue;
                }
                if let Some(child) = inv
                    .return_value()
                    .and_then(|v| v.as_proxy())
                    .and_then(Substitute::from_proxy)
                {
                    if !reached.iter().any(|r| r.same_as(&child)) {
                        reached.push(child);
                    }
                    hop_calls.push(inv.clone());
                }
            }
        }
        owners = reached;
    }

    let mut matched = Vec::new();
    for owner in &owners {
        matched.extend(owner.inner.ledger.unverified_matching(&ex.target)?);
    }

    if times.verify(matched.len()) {
        for inv in hop_calls.iter().chain(&matched) {
            inv.mark_verified();
        }
        debug!("Verified '{}' {} on {}", ex.text, times, root.name());
        return Ok(matched);
    }

    let mut failure = String::new();
    if let Some(message) = message {
        failure.push_str(message);
        failure.push('\n');
    }
    failure.push_str(&format!(
        "Expected invocation on the substitute {}, but was {} times: {}",
        times,
        matched.len(),
        ex.text
    ));
    failure.push_str(&describe_state(root));
    let mut report = VerificationReport::new();
    report.push(root.name(), failure);
    Err(SubstituteError::VerificationFailed(report))
}

fn setup_failure(setup: &Setup) -> Option<String> {
    let satisfied = match setup.expected_times() {
        Some(times) => times.verify(setup.match_count()),
        None => setup.is_matched(),
    };
    if satisfied {
        return None;
    }
    let mut failure = match setup.expected_times() {
        Some(times) => format!(
            "{}: expected {}, but was matched {} times",
            setup.text(),
            times,
            setup.match_count()
        ),
        None => format!("{}: this setup was not matched", setup.text()),
    };
    if let Some(message) = setup.failure_message() {
        failure = format!("{}\n{}", message, failure);
    }
    Some(failure)
}

pub(crate) fn verify_setups(roots: &[Substitute], sweep: Sweep) -> Result<()> {
    let mut report = VerificationReport::new();
    let mut satisfied: Vec<(Substitute, HashSet<u64>)> = Vec::new();

    for sub in reachable(roots) {
        let mut ids = HashSet::new();
        for setup in sub.setups() {
            if setup.kind() == SetupKind::Hop {
                ids.insert(setup.id());
                continue;
            }
            if setup.is_conditional() || setup.is_overridden() || setup.kind() == SetupKind::PropertyStub {
                continue;
            }
            if sweep == Sweep::Verifiable && !setup.is_verifiable() {
                continue;
            }
            match setup_failure(&setup) {
                Some(failure) => report.push(sub.name(), failure),
                None => {
                    ids.insert(setup.id());
                }
            }
        }
        satisfied.push((sub, ids));
    }

    if !report.is_empty() {
        info!("Setup verification found {} problem(s)", report.failure_count());
        return report.into_result();
    }
    for (sub, ids) in satisfied {
        for inv in sub.invocations() {
            if inv.matched_setup.map_or(false, |id| ids.contains(&id)) {
                inv.mark_verified();
            }
        }
    }
    Ok(())
}

pub(crate) fn verify_no_other_calls(roots: &[Substitute]) -> Result<()> {
    let graph = reachable(roots);
    let known: HashSet<Uuid> = graph.iter().map(|s| s.id()).collect();
    let mut report = VerificationReport::new();

    for sub in &graph {
        let leftovers: Vec<Arc<Invocation>> = sub
            .inner
            .ledger
            .unverified()
            .into_iter()
            .filter(|inv| {
                // Reaching a child is covered by the child's own check.
                !inv.return_value()
                    .and_then(|v| v.as_proxy())
                    .map_or(false, |p| known.contains(&p.id()))
            })
            .collect();
        if leftovers.is_empty() {
            continue;
        }
        let mut failure = String::from("Unverified invocations:");
        for inv in &leftovers {
            failure.push_str(&format!("\n  {}", inv));
        }
        report.push(sub.name(), failure);
    }
    report.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::contract::{param, Contract, TypeSpec};
    use crate::matcher::It;

    fn contract() -> Arc<Contract> {
        let leaf = Contract::interface("ILeaf")
            .method("Ping", vec![param("n", TypeSpec::Int)], TypeSpec::Int)
            .build();
        Contract::interface("IHub")
            .method("Open", vec![param("name", TypeSpec::Str)], TypeSpec::Contract(leaf))
            .method("Send", vec![param("n", TypeSpec::Int)], TypeSpec::Unit)
            .readonly_property("Peer", TypeSpec::SelfContract)
            .build()
    }

    #[test]
    fn test_verify_counts_and_marks() {
        let sub = Substitute::new(contract());
        let obj = sub.object();
        obj.call("Send", vec![1.into()]).unwrap();
        obj.call("Send", vec![1.into()]).unwrap();

        let hits = sub.verify(|x| x.call("Send", args![1]), Times::exactly(2)).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(sub.invocations().iter().all(|i| i.is_verified()));
        // Already verified calls are not counted again.
        assert!(sub.verify(|x| x.call("Send", args![1]), Times::once()).is_err());
    }

    #[test]
    fn test_failure_report_lists_performed_calls() {
        let sub = Substitute::new(contract());
        sub.object().call("Send", vec![2.into()]).unwrap();
        let err = sub
            .verify_with_message(|x| x.call("Send", args![1]), Times::once(), "send one")
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("send one"));
        assert!(text.contains("but was 0 times"));
        assert!(text.contains("IHub.Send(2)"));
        assert!(matches!(err, SubstituteError::VerificationFailed(ref r) if r.failure_count() == 1));
    }

    #[test]
    fn test_failure_report_stamps_each_invocation() {
        let sub = Substitute::new(contract());
        sub.object().call("Send", vec![2.into()]).unwrap();
        let stamp = sub.invocations()[0].recorded_at.format("%H:%M:%S%.3f").to_string();
        let text = sub.verify(|x| x.call("Send", args![1]), Times::once()).unwrap_err().to_string();
        assert!(text.contains(&format!("[{}] IHub.Send(2)", stamp)), "{}", text);
    }

    #[test]
    fn test_verify_across_a_hop() {
        let sub = Substitute::new(contract());
        sub.setup(|x| x.call("Open", args!["a"]).call("Ping", args![It::any()]))
            .unwrap()
            .returns(1);
        let leaf = sub.object().call("Open", vec!["a".into()]).unwrap();
        leaf.as_proxy().unwrap().call("Ping", vec![5.into()]).unwrap();

        sub.verify(|x| x.call("Open", args!["a"]).call("Ping", args![5]), Times::once())
            .unwrap();
        sub.verify_no_other_calls().unwrap();
    }

    #[test]
    fn test_verify_all_reports_unmatched_setups_per_substitute() {
        let sub = Substitute::new(contract());
        sub.setup(|x| x.call("Send", args![1])).unwrap();
        sub.setup(|x| x.call("Open", args!["a"]).call("Ping", args![1])).unwrap().returns(1);
        sub.object().call("Open", vec!["a".into()]).unwrap();

        let err = sub.verify_all().unwrap_err();
        match err {
            SubstituteError::VerificationFailed(report) => {
                assert_eq!(report.groups.len(), 2);
                assert_eq!(report.failure_count(), 2);
                assert_eq!(report.to_json()["failures"], 2);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_verify_all_ignores_overridden_and_conditional() {
        let sub = Substitute::new(contract());
        sub.setup(|x| x.call("Send", args![1])).unwrap();
        sub.setup(|x| x.call("Send", args![1])).unwrap();
        sub.when(|| false).setup(|x| x.call("Send", args![2])).unwrap();
        sub.object().call("Send", vec![1.into()]).unwrap();
        sub.verify_all().unwrap();
        sub.verify_no_other_calls().unwrap();
    }

    #[test]
    fn test_verifiable_with_times() {
        let sub = Substitute::new(contract());
        sub.setup(|x| x.call("Send", args![It::any()]))
            .unwrap()
            .verifiable_times(Times::exactly(2));
        sub.setup(|x| x.call("Open", args![It::any()])).unwrap();
        sub.object().call("Send", vec![1.into()]).unwrap();
        assert!(sub.verify_verifiable().is_err());
        sub.object().call("Send", vec![2.into()]).unwrap();
        sub.verify_verifiable().unwrap();
    }

    #[test]
    fn test_cycles_terminate() {
        let a = Substitute::new(contract());
        let b = Substitute::new(contract());
        a.setup(|x| x.get("Peer")).unwrap().returns(b.object());
        b.setup(|x| x.get("Peer")).unwrap().returns(a.object());
        assert_eq!(reachable(std::slice::from_ref(&a)).len(), 2);
        assert!(a.verify_all().unwrap_err().to_string().contains("not matched"));
        a.object().get("Peer").unwrap();
        b.object().get("Peer").unwrap();
        a.verify_all().unwrap();
        a.verify_no_other_calls().unwrap();
    }

    #[test]
    fn test_no_other_calls_lists_leftovers() {
        let sub = Substitute::new(contract());
        let obj = sub.object();
        obj.call("Send", vec![1.into()]).unwrap();
        obj.call("Send", vec![2.into()]).unwrap();
        sub.verify(|x| x.call("Send", args![1]), Times::once()).unwrap();
        let err = sub.verify_no_other_calls().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("IHub.Send(2)"));
        assert!(!text.contains("IHub.Send(1)"));
    }
}
