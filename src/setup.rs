//! Setups and their configuration builders
//!
//! A setup maps a call shape to a result action. It is inserted into the
//! registry first and configured afterwards through [`SetupBuilder`] or
//! [`SequenceBuilder`], so its behavior lives behind a lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::call::CallDescriptor;
use crate::sync::lock;
use crate::times::Times;
use crate::value::{Fault, TaskValue, Value};

pub type Callback = Arc<dyn Fn(&[Value]) + Send + Sync>;
pub type ValueFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;
pub type FaultFn = Arc<dyn Fn(&[Value]) -> Fault + Send + Sync>;
pub type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

static NEXT_SETUP_ID: AtomicU64 = AtomicU64::new(1);

/// How a matching call produces its result
#[derive(Clone)]
pub enum Response {
    Value(Value),
    Compute(ValueFn),
    Throw(Fault),
    ThrowWith(FaultFn),
    CallBase,
    /// No explicit result; the default value applies
    Pass,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Value(v) => write!(f, "Returns({})", v),
            Response::Compute(_) => write!(f, "Returns(<fn>)"),
            Response::Throw(e) => write!(f, "Throws({})", e),
            Response::ThrowWith(_) => write!(f, "Throws(<fn>)"),
            Response::CallBase => write!(f, "CallBase"),
            Response::Pass => write!(f, "Pass"),
        }
    }
}

/// What a sequenced setup does after its last configured step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequenceExhaustion {
    /// Repeat the last step: a final value is returned again, a final fault re-raised
    #[default]
    RepeatLast,
    /// Fall back to the default value
    ReturnDefault,
}

enum Production {
    Unset,
    Single(Response),
    Sequence {
        steps: Vec<Response>,
        cursor: usize,
        exhaustion: SequenceExhaustion,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupKind {
    Standard,
    /// Links a parent to the child substitute reached by one hop of a chain
    Hop,
    /// Backing accessor installed by property stubbing
    PropertyStub,
}

struct Behavior {
    before: Vec<Callback>,
    production: Production,
    after: Vec<Callback>,
    raises: Vec<(String, Vec<Value>)>,
    verifiable: bool,
    expected: Option<Times>,
    message: Option<String>,
}

pub struct Setup {
    id: u64,
    kind: SetupKind,
    descriptor: CallDescriptor,
    text: String,
    condition: Option<Condition>,
    behavior: Mutex<Behavior>,
    match_count: AtomicUsize,
    overridden: AtomicBool,
}

impl Setup {
    pub fn new(kind: SetupKind, descriptor: CallDescriptor, text: String, condition: Option<Condition>) -> Self {
        Self {
            id: NEXT_SETUP_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            descriptor,
            text,
            condition,
            behavior: Mutex::new(Behavior {
                before: Vec::new(),
                production: Production::Unset,
                after: Vec::new(),
                raises: Vec::new(),
                verifiable: false,
                expected: None,
                message: None,
            }),
            match_count: AtomicUsize::new(0),
            overridden: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SetupKind {
        self.kind
    }

    pub fn descriptor(&self) -> &CallDescriptor {
        &self.descriptor
    }

    /// Original configuration expression, e.g. `x => x.Foo(5)`
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// Guard evaluated fresh on every call
    pub fn condition_holds(&self) -> bool {
        self.condition.as_ref().map_or(true, |c| c())
    }

    pub fn is_matched(&self) -> bool {
        self.match_count() > 0
    }

    pub fn match_count(&self) -> usize {
        self.match_count.load(Ordering::Acquire)
    }

    pub(crate) fn record_match(&self) {
        self.match_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden.load(Ordering::Acquire)
    }

    pub(crate) fn mark_overridden(&self) {
        self.overridden.store(true, Ordering::Release);
    }

    pub fn is_verifiable(&self) -> bool {
        lock(&self.behavior).verifiable
    }

    pub fn expected_times(&self) -> Option<Times> {
        lock(&self.behavior).expected
    }

    pub fn failure_message(&self) -> Option<String> {
        lock(&self.behavior).message.clone()
    }

    /// Whether any result action was configured
    pub fn has_result(&self) -> bool {
        !matches!(lock(&self.behavior).production, Production::Unset)
    }

    pub fn is_sequence(&self) -> bool {
        matches!(lock(&self.behavior).production, Production::Sequence { .. })
    }

    /// Proxy handed out by a fixed `returns`, used to walk inner substitutes
    pub fn returned_proxy(&self) -> Option<crate::proxy::Proxy> {
        match &lock(&self.behavior).production {
            Production::Single(Response::Value(Value::Proxy(p))) => Some(p.clone()),
            _ => None,
        }
    }

    pub(crate) fn callbacks_before(&self) -> Vec<Callback> {
        lock(&self.behavior).before.clone()
    }

    pub(crate) fn callbacks_after(&self) -> Vec<Callback> {
        lock(&self.behavior).after.clone()
    }

    pub(crate) fn raises(&self) -> Vec<(String, Vec<Value>)> {
        lock(&self.behavior).raises.clone()
    }

    /// Next response, advancing the sequence cursor. `None` means no result was configured.
    pub(crate) fn next_response(&self) -> Option<Response> {
        let mut behavior = lock(&self.behavior);
        match &mut behavior.production {
            Production::Unset => None,
            Production::Single(response) => Some(response.clone()),
            Production::Sequence { steps, cursor, exhaustion } => {
                if let Some(step) = steps.get(*cursor) {
                    *cursor += 1;
                    return Some(step.clone());
                }
                match exhaustion {
                    SequenceExhaustion::RepeatLast => Some(steps.last().cloned().unwrap_or(Response::Pass)),
                    SequenceExhaustion::ReturnDefault => Some(Response::Pass),
                }
            }
        }
    }

    fn configure(&self, f: impl FnOnce(&mut Behavior)) {
        f(&mut lock(&self.behavior))
    }

    fn set_response(&self, response: Response) {
        self.configure(|b| b.production = Production::Single(response));
    }

    fn push_step(&self, step: Response) {
        self.configure(|b| match &mut b.production {
            Production::Sequence { steps, .. } => steps.push(step),
            _ => {
                b.production = Production::Sequence {
                    steps: vec![step],
                    cursor: 0,
                    exhaustion: SequenceExhaustion::default(),
                }
            }
        });
    }
}

impl fmt::Debug for Setup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setup")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("kind", &self.kind)
            .field("matched", &self.is_matched())
            .field("overridden", &self.is_overridden())
            .finish()
    }
}

impl fmt::Display for Setup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Fluent configuration of one setup
#[derive(Clone, Debug)]
pub struct SetupBuilder {
    setup: Arc<Setup>,
}

impl SetupBuilder {
    pub(crate) fn new(setup: Arc<Setup>) -> Self {
        Self { setup }
    }

    pub fn setup(&self) -> &Arc<Setup> {
        &self.setup
    }

    pub fn returns(self, value: impl Into<Value>) -> Self {
        self.setup.set_response(Response::Value(value.into()));
        self
    }

    pub fn returns_with(self, f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        self.setup.set_response(Response::Compute(Arc::new(f)));
        self
    }

    pub fn returns_async(self, value: impl Into<Value>) -> Self {
        self.returns(TaskValue::completed(value))
    }

    pub fn throws(self, fault: Fault) -> Self {
        self.setup.set_response(Response::Throw(fault));
        self
    }

    pub fn throws_with(self, f: impl Fn(&[Value]) -> Fault + Send + Sync + 'static) -> Self {
        self.setup.set_response(Response::ThrowWith(Arc::new(f)));
        self
    }

    pub fn throws_async(self, fault: Fault) -> Self {
        self.returns(TaskValue::faulted(fault))
    }

    pub fn call_base(self) -> Self {
        self.setup.set_response(Response::CallBase);
        self
    }

    /// Runs before the result is produced when configured before it, after otherwise.
    pub fn callback(self, f: impl Fn(&[Value]) + Send + Sync + 'static) -> Self {
        let cb: Callback = Arc::new(f);
        self.setup.configure(|b| match b.production {
            Production::Unset => b.before.push(cb),
            _ => b.after.push(cb),
        });
        self
    }

    pub fn raises(self, event: &str, args: Vec<Value>) -> Self {
        self.setup.configure(|b| b.raises.push((event.to_string(), args)));
        self
    }

    pub fn verifiable(self) -> Self {
        self.setup.configure(|b| b.verifiable = true);
        self
    }

    pub fn verifiable_times(self, times: Times) -> Self {
        self.setup.configure(|b| {
            b.verifiable = true;
            b.expected = Some(times);
        });
        self
    }

    pub fn verifiable_with_message(self, message: &str) -> Self {
        self.setup.configure(|b| {
            b.verifiable = true;
            b.message = Some(message.to_string());
        });
        self
    }
}

/// Fluent configuration of a sequenced setup; each call adds one step
#[derive(Clone)]
pub struct SequenceBuilder {
    setup: Arc<Setup>,
}

impl SequenceBuilder {
    pub(crate) fn new(setup: Arc<Setup>) -> Self {
        setup.configure(|b| {
            b.production = Production::Sequence {
                steps: Vec::new(),
                cursor: 0,
                exhaustion: SequenceExhaustion::default(),
            }
        });
        Self { setup }
    }

    pub fn setup(&self) -> &Arc<Setup> {
        &self.setup
    }

    pub fn returns(self, value: impl Into<Value>) -> Self {
        self.setup.push_step(Response::Value(value.into()));
        self
    }

    pub fn returns_with(self, f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        self.setup.push_step(Response::Compute(Arc::new(f)));
        self
    }

    pub fn returns_async(self, value: impl Into<Value>) -> Self {
        self.returns(TaskValue::completed(value))
    }

    pub fn throws(self, fault: Fault) -> Self {
        self.setup.push_step(Response::Throw(fault));
        self
    }

    pub fn throws_async(self, fault: Fault) -> Self {
        self.returns(TaskValue::faulted(fault))
    }

    pub fn pass(self) -> Self {
        self.setup.push_step(Response::Pass);
        self
    }

    pub fn call_base(self) -> Self {
        self.setup.push_step(Response::CallBase);
        self
    }

    pub fn when_exhausted(self, policy: SequenceExhaustion) -> Self {
        self.setup.configure(|b| {
            if let Production::Sequence { exhaustion, .. } = &mut b.production {
                *exhaustion = policy;
            }
        });
        self
    }
}
