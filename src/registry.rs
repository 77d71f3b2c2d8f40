//! Setup Registry
//!
//! Per-member buckets scanned most-recent-first. Setups are never removed by
//! a later structurally equal setup; the earlier one is flagged overridden and
//! stays enumerable for diagnostics.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::call::CallDescriptor;
use crate::contract::MemberKey;
use crate::error::Result;
use crate::proxy::Call;
use crate::setup::{Setup, SetupKind};
use crate::sync::{read, write};

#[derive(Default)]
struct RegistryState {
    buckets: HashMap<MemberKey, Vec<Arc<Setup>>>,
    ordered: Vec<Arc<Setup>>,
}

#[derive(Default)]
pub struct SetupRegistry {
    state: RwLock<RegistryState>,
}

impl SetupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, setup: Arc<Setup>) {
        let mut state = write(&self.state);
        let bucket = state.buckets.entry(setup.descriptor().member.key()).or_default();
        if !setup.is_conditional() {
            for earlier in bucket.iter() {
                if !earlier.is_conditional() && !earlier.is_overridden() && earlier.descriptor() == setup.descriptor() {
                    debug!("Setup '{}' overrides earlier setup #{}", setup.text(), earlier.id());
                    earlier.mark_overridden();
                }
            }
        }
        bucket.insert(0, setup.clone());
        state.ordered.push(setup);
    }

    /// First setup, newest first, whose member, slot matchers and guard accept the call.
    pub fn find_match(&self, call: &Call) -> Result<Option<Arc<Setup>>> {
        let candidates = match read(&self.state).buckets.get(&call.member.key()) {
            Some(bucket) => bucket.clone(),
            None => return Ok(None),
        };
        for setup in candidates {
            if setup.descriptor().matches(call)? && setup.condition_holds() {
                return Ok(Some(setup));
            }
        }
        Ok(None)
    }

    /// Latest non-overridden hop (or plain) setup for exactly this descriptor that hands out a proxy.
    pub fn find_link(&self, descriptor: &CallDescriptor) -> Option<Arc<Setup>> {
        let state = read(&self.state);
        state.buckets.get(&descriptor.member.key()).and_then(|bucket| {
            bucket
                .iter()
                .find(|s| {
                    !s.is_conditional()
                        && s.kind() != SetupKind::PropertyStub
                        && s.descriptor() == descriptor
                        && s.returned_proxy().is_some()
                })
                .cloned()
        })
    }

    /// Every setup in insertion order, overridden ones included
    pub fn setups(&self) -> Vec<Arc<Setup>> {
        read(&self.state).ordered.clone()
    }

    pub fn len(&self) -> usize {
        read(&self.state).ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = write(&self.state);
        state.buckets.clear();
        state.ordered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{param, Contract, MemberKind, MemberRef, TypeSpec};
    use crate::matcher::{It, Matcher};
    use crate::value::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn member() -> MemberRef {
        let c = Contract::interface("ISvc")
            .method("Foo", vec![param("n", TypeSpec::Int)], TypeSpec::Int)
            .build();
        MemberRef::new(c.find(MemberKind::Method, "Foo", 1).unwrap())
    }

    fn setup(member: &MemberRef, slot: Matcher, condition: Option<crate::setup::Condition>) -> Arc<Setup> {
        let d = CallDescriptor::new(member.clone(), vec![slot], vec![], "x.Foo(..)".into());
        Arc::new(Setup::new(SetupKind::Standard, d, "x => x.Foo(..)".into(), condition))
    }

    #[test]
    fn test_later_equal_setup_overrides_earlier() {
        let m = member();
        let registry = SetupRegistry::new();
        let s1 = setup(&m, It::value(1), None);
        let s2 = setup(&m, It::value(1), None);
        registry.add(s1.clone());
        registry.add(s2.clone());

        assert!(s1.is_overridden());
        assert!(!s2.is_overridden());
        assert_eq!(registry.len(), 2);

        let call = Call { member: m, args: vec![Value::Int(1)] };
        let found = registry.find_match(&call).unwrap().unwrap();
        assert_eq!(found.id(), s2.id());
    }

    #[test]
    fn test_newest_matching_setup_wins_without_override() {
        let m = member();
        let registry = SetupRegistry::new();
        let specific = setup(&m, It::value(1), None);
        let any = setup(&m, It::any(), None);
        registry.add(specific.clone());
        registry.add(any.clone());
        assert!(!specific.is_overridden());

        let call = Call { member: m, args: vec![Value::Int(1)] };
        assert_eq!(registry.find_match(&call).unwrap().unwrap().id(), any.id());
    }

    #[test]
    fn test_guard_is_reevaluated_per_call() {
        let m = member();
        let registry = SetupRegistry::new();
        let gate = Arc::new(AtomicBool::new(false));
        let g = gate.clone();
        let guarded = setup(&m, It::any(), Some(Arc::new(move || g.load(Ordering::SeqCst))));
        let fallback = setup(&m, It::any(), None);
        registry.add(fallback.clone());
        registry.add(guarded.clone());
        assert!(!fallback.is_overridden());

        let call = Call { member: m, args: vec![Value::Int(3)] };
        assert_eq!(registry.find_match(&call).unwrap().unwrap().id(), fallback.id());
        gate.store(true, Ordering::SeqCst);
        assert_eq!(registry.find_match(&call).unwrap().unwrap().id(), guarded.id());
    }

    #[test]
    fn test_clear_empties_registry() {
        let m = member();
        let registry = SetupRegistry::new();
        registry.add(setup(&m, It::any(), None));
        registry.clear();
        assert!(registry.is_empty());
    }
}
