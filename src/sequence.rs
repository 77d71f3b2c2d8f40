//! Cross-substitute call ordering
//!
//! A [`SequenceToken`] is a shared log that every participating substitute
//! appends to as calls happen. Orderings are checked against the log either as
//! a subsequence or as a contiguous run.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;
use uuid::Uuid;

use crate::call::CallDescriptor;
use crate::error::{Result, SubstituteError};
use crate::proxy::Call;
use crate::sync::{read, write};

#[derive(Debug, Clone)]
pub struct SequenceEntry {
    pub seq: u64,
    pub substitute: Uuid,
    pub substitute_name: String,
    pub call: Call,
}

impl fmt::Display for SequenceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}: {}", self.seq, self.substitute_name, self.call)
    }
}

#[derive(Default)]
struct TokenLog {
    counter: AtomicU64,
    entries: RwLock<Vec<SequenceEntry>>,
}

/// Shared, clonable ordering log
#[derive(Clone, Default)]
pub struct SequenceToken {
    log: Arc<TokenLog>,
}

/// A call shape bound to the substitute expected to receive it
#[derive(Debug, Clone)]
pub struct ExpectedCall {
    substitute: Uuid,
    substitute_name: String,
    descriptor: CallDescriptor,
    text: String,
}

impl ExpectedCall {
    pub(crate) fn new(substitute: Uuid, substitute_name: String, descriptor: CallDescriptor, text: String) -> Self {
        Self {
            substitute,
            substitute_name,
            descriptor,
            text,
        }
    }

    fn accepts(&self, entry: &SequenceEntry) -> Result<bool> {
        if entry.substitute != self.substitute {
            return Ok(false);
        }
        self.descriptor.matches(&entry.call)
    }
}

impl fmt::Display for ExpectedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.substitute_name, self.text)
    }
}

/// Why an ordering check failed, with both sides listed
#[derive(Debug, Clone)]
pub struct SequenceFailure {
    pub reason: String,
    pub expected: Vec<String>,
    pub recorded: Vec<String>,
}

impl fmt::Display for SequenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sequence verification failed: {}", self.reason)?;
        writeln!(f, "Expected order:")?;
        for (i, e) in self.expected.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, e)?;
        }
        writeln!(f, "Recorded calls:")?;
        if self.recorded.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for r in &self.recorded {
            writeln!(f, "  {}", r)?;
        }
        Ok(())
    }
}

impl SequenceToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, substitute: Uuid, substitute_name: &str, call: &Call) {
        let mut entries = write(&self.log.entries);
        let seq = self.log.counter.fetch_add(1, Ordering::SeqCst);
        entries.push(SequenceEntry {
            seq,
            substitute,
            substitute_name: substitute_name.to_string(),
            call: call.clone(),
        });
    }

    pub fn entries(&self) -> Vec<SequenceEntry> {
        read(&self.log.entries).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.log.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget recorded entries; numbering continues.
    pub fn clear(&self) {
        write(&self.log.entries).clear();
    }

    /// Each expected call happened, in this order, possibly with other calls in between.
    pub fn verify_sequence(&self, expected: &[ExpectedCall]) -> Result<()> {
        let entries = self.entries();
        let mut from = 0;
        for exp in expected {
            match position(&entries[from..], exp)? {
                Some(offset) => from += offset + 1,
                None => {
                    let reason = if position(&entries, exp)?.is_some() {
                        format!("'{}' was not performed in the expected order", exp)
                    } else {
                        format!("'{}' was never performed", exp)
                    };
                    return Err(failure(reason, expected, &entries));
                }
            }
        }
        debug!("Verified ordering of {} call(s)", expected.len());
        Ok(())
    }

    /// The expected calls form one contiguous run of the log.
    pub fn verify_strict_sequence(&self, expected: &[ExpectedCall]) -> Result<()> {
        let entries = self.entries();
        if expected.is_empty() {
            return Ok(());
        }
        if entries.len() >= expected.len() {
            for start in 0..=entries.len() - expected.len() {
                let mut contiguous = true;
                for (k, exp) in expected.iter().enumerate() {
                    if !exp.accepts(&entries[start + k])? {
                        contiguous = false;
                        break;
                    }
                }
                if contiguous {
                    return Ok(());
                }
            }
        }
        for exp in expected {
            if position(&entries, exp)?.is_none() {
                return Err(failure(format!("'{}' was never performed", exp), expected, &entries));
            }
        }
        Err(failure(
            "the calls were not performed in immediate succession".to_string(),
            expected,
            &entries,
        ))
    }
}

impl fmt::Debug for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceToken").field("entries", &self.len()).finish()
    }
}

fn position(entries: &[SequenceEntry], exp: &ExpectedCall) -> Result<Option<usize>> {
    for (i, entry) in entries.iter().enumerate() {
        if exp.accepts(entry)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn failure(reason: String, expected: &[ExpectedCall], entries: &[SequenceEntry]) -> SubstituteError {
    SubstituteError::SequenceVerification(SequenceFailure {
        reason,
        expected: expected.iter().map(|e| e.to_string()).collect(),
        recorded: entries.iter().map(|e| e.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::contract::{param, Contract, TypeSpec};
    use crate::substitute::Substitute;

    fn pair() -> (Substitute, Substitute, SequenceToken) {
        let c = Contract::interface("IStep")
            .method("Run", vec![param("n", TypeSpec::Int)], TypeSpec::Unit)
            .build();
        let token = SequenceToken::new();
        let a = Substitute::new(c.clone());
        let b = Substitute::new(c);
        a.in_sequence(&token);
        b.in_sequence(&token);
        (a, b, token)
    }

    #[test]
    fn test_subsequence_with_gaps_passes() {
        let (a, b, token) = pair();
        a.object().call("Run", vec![1.into()]).unwrap();
        b.object().call("Run", vec![2.into()]).unwrap();
        a.object().call("Run", vec![3.into()]).unwrap();

        let expected = vec![
            a.expect(|x| x.call("Run", args![1])).unwrap(),
            a.expect(|x| x.call("Run", args![3])).unwrap(),
        ];
        token.verify_sequence(&expected).unwrap();
        assert!(token.verify_strict_sequence(&expected).is_err());
    }

    #[test]
    fn test_reversed_order_is_reported() {
        let (a, b, token) = pair();
        b.object().call("Run", vec![2.into()]).unwrap();
        a.object().call("Run", vec![1.into()]).unwrap();

        let expected = vec![
            a.expect(|x| x.call("Run", args![1])).unwrap(),
            b.expect(|x| x.call("Run", args![2])).unwrap(),
        ];
        let err = token.verify_sequence(&expected).unwrap_err();
        assert!(err.to_string().contains("not performed in the expected order"));
    }

    #[test]
    fn test_call_made_from_callback_is_ordered_after_its_caller() {
        let (a, b, token) = pair();
        let inner = b.object();
        a.setup(|x| x.call("Run", args![1])).unwrap().callback(move |_| {
            inner.call("Run", vec![2.into()]).unwrap();
        });
        a.object().call("Run", vec![1.into()]).unwrap();

        let order: Vec<_> = token.entries().iter().map(|e| (e.substitute, e.seq)).collect();
        assert_eq!(order, vec![(a.id(), 0), (b.id(), 1)]);
        let expected = vec![
            a.expect(|x| x.call("Run", args![1])).unwrap(),
            b.expect(|x| x.call("Run", args![2])).unwrap(),
        ];
        token.verify_sequence(&expected).unwrap();
        token.verify_strict_sequence(&expected).unwrap();
    }

    #[test]
    fn test_missing_call_is_reported() {
        let (a, _b, token) = pair();
        a.object().call("Run", vec![1.into()]).unwrap();
        let expected = vec![a.expect(|x| x.call("Run", args![9])).unwrap()];
        let err = token.verify_sequence(&expected).unwrap_err();
        assert!(err.to_string().contains("never performed"));
    }

    #[test]
    fn test_same_call_on_other_substitute_does_not_count() {
        let (a, b, token) = pair();
        b.object().call("Run", vec![1.into()]).unwrap();
        let expected = vec![a.expect(|x| x.call("Run", args![1])).unwrap()];
        assert!(token.verify_sequence(&expected).is_err());
    }

    #[test]
    fn test_strict_run_passes_when_contiguous() {
        let (a, b, token) = pair();
        a.object().call("Run", vec![0.into()]).unwrap();
        a.object().call("Run", vec![1.into()]).unwrap();
        b.object().call("Run", vec![2.into()]).unwrap();
        let expected = vec![
            a.expect(|x| x.call("Run", args![1])).unwrap(),
            b.expect(|x| x.call("Run", args![2])).unwrap(),
        ];
        token.verify_strict_sequence(&expected).unwrap();
        assert_eq!(token.entries().iter().map(|e| e.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
