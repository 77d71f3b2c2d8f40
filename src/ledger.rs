//! Invocation Ledger
//!
//! Append-only record of realized calls. Entries are fully built before they
//! are appended, and readers work on snapshots, so verification running on
//! another thread never observes a partial entry.

use std::sync::{Arc, RwLock};

use crate::call::{CallDescriptor, Invocation};
use crate::error::Result;
use crate::sync::{read, write};

#[derive(Default)]
pub struct InvocationLedger {
    entries: RwLock<Vec<Arc<Invocation>>>,
}

impl InvocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, invocation: Invocation) -> Arc<Invocation> {
        let entry = Arc::new(invocation);
        write(&self.entries).push(entry.clone());
        entry
    }

    pub fn snapshot(&self) -> Vec<Arc<Invocation>> {
        read(&self.entries).clone()
    }

    /// Unverified entries the descriptor accepts, in call order
    pub fn unverified_matching(&self, descriptor: &CallDescriptor) -> Result<Vec<Arc<Invocation>>> {
        let mut found = Vec::new();
        for entry in self.snapshot() {
            if !entry.is_verified() && descriptor.matches(&entry.call)? {
                found.push(entry);
            }
        }
        Ok(found)
    }

    pub fn unverified(&self) -> Vec<Arc<Invocation>> {
        self.snapshot().into_iter().filter(|e| !e.is_verified()).collect()
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        write(&self.entries).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Outcome;
    use crate::contract::{param, Contract, MemberKind, MemberRef, TypeSpec};
    use crate::matcher::It;
    use crate::proxy::Call;
    use crate::value::Value;
    use std::thread;

    fn member() -> MemberRef {
        let c = Contract::interface("ISvc")
            .method("Put", vec![param("n", TypeSpec::Int)], TypeSpec::Unit)
            .build();
        MemberRef::new(c.find(MemberKind::Method, "Put", 1).unwrap())
    }

    fn invocation(member: &MemberRef, n: i64) -> Invocation {
        Invocation::new(
            Call { member: member.clone(), args: vec![Value::Int(n)] },
            Outcome::Returned(Value::Unit),
            None,
        )
    }

    #[test]
    fn test_concurrent_appends_are_all_recorded() {
        let ledger = Arc::new(InvocationLedger::new());
        let m = member();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                let m = m.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        ledger.append(invocation(&m, t * 100 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.len(), 800);
    }

    #[test]
    fn test_unverified_matching_skips_verified_entries() {
        let ledger = InvocationLedger::new();
        let m = member();
        let first = ledger.append(invocation(&m, 1));
        ledger.append(invocation(&m, 1));
        ledger.append(invocation(&m, 2));
        first.mark_verified();

        let d = CallDescriptor::new(m, vec![It::value(1)], vec![], "x.Put(1)".into());
        assert_eq!(ledger.unverified_matching(&d).unwrap().len(), 1);
        assert_eq!(ledger.unverified().len(), 2);
    }
}
