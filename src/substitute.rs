//! Substitute
//!
//! The configurable test double for one contract: owns the setup registry,
//! the invocation ledger, behavior settings and the children it materialized.
//! Configuration and verification live here; the live call path is in
//! [`dispatch`](crate::dispatch), the verification engine in
//! [`verify`](crate::verify).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::call::Invocation;
use crate::config::SubstituteConfig;
use crate::contract::{Contract, ContractKind, MemberRef};
use crate::defaults::DefaultValuePolicy;
use crate::error::{ExtractionError, Result, SubstituteError};
use crate::expr::Expr;
use crate::extract::{extract, Hop};
use crate::matcher::It;
use crate::proxy::{DynamicProxyFactory, Proxy, ProxyFactory};
use crate::registry::SetupRegistry;
use crate::ledger::InvocationLedger;
use crate::sequence::{ExpectedCall, SequenceToken};
use crate::setup::{Condition, SequenceBuilder, Setup, SetupBuilder, SetupKind};
use crate::sync::{read, write};
use crate::times::Times;
use crate::value::{Handler, Slot, Value};
use crate::verify::{self, Sweep};

/// What happens to calls no setup matches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    /// Unmatched calls raise `NoSetup`
    Strict,
    /// Unmatched calls produce default values
    #[default]
    Loose,
}

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub behavior: Behavior,
    pub call_base: bool,
    pub default_value: DefaultValuePolicy,
}

/// Where a materialized child was produced: a member read with concrete arguments
pub(crate) struct AccessSite {
    pub member: MemberRef,
    pub args: Vec<Value>,
}

pub(crate) struct Child {
    /// `None` for children created by installing a chained setup with non-exact hop arguments
    pub site: Option<AccessSite>,
    pub substitute: Substitute,
}

pub(crate) struct SubstituteInner {
    pub id: Uuid,
    pub name: String,
    pub contract: Arc<Contract>,
    pub settings: RwLock<Settings>,
    pub factory: Arc<dyn ProxyFactory>,
    pub constructor_args: Vec<Value>,
    pub registry: SetupRegistry,
    pub ledger: InvocationLedger,
    pub children: RwLock<Vec<Child>>,
    pub handlers: RwLock<HashMap<String, Vec<Handler>>>,
    /// Backing values for `setup_all_properties`; `None` while disabled
    pub stubs: RwLock<Option<HashMap<String, Value>>>,
    pub sequences: RwLock<Vec<SequenceToken>>,
}

/// Handle to a substitute; clones share state
///
/// Setups and recorded invocations hold strong references to any proxy they
/// return. A substitute configured to return its own proxy (or a peer that
/// returns it back) therefore keeps itself alive until [`Substitute::reset`]
/// clears those references.
#[derive(Clone)]
pub struct Substitute {
    pub(crate) inner: Arc<SubstituteInner>,
}

impl Substitute {
    /// Loose substitute with default settings
    pub fn new(contract: Arc<Contract>) -> Self {
        Self::with_config(contract, &SubstituteConfig::default())
    }

    pub fn strict(contract: Arc<Contract>) -> Self {
        Self::with_config(
            contract,
            &SubstituteConfig {
                behavior: Behavior::Strict,
                ..Default::default()
            },
        )
    }

    pub fn with_config(contract: Arc<Contract>, config: &SubstituteConfig) -> Self {
        Self::build(contract, config, Arc::new(DynamicProxyFactory), Vec::new())
    }

    pub(crate) fn build(
        contract: Arc<Contract>,
        config: &SubstituteConfig,
        factory: Arc<dyn ProxyFactory>,
        constructor_args: Vec<Value>,
    ) -> Self {
        let settings = Settings {
            behavior: config.behavior,
            call_base: config.call_base,
            default_value: config.default_value.into(),
        };
        let base = config.name_prefix.clone().unwrap_or_else(|| contract.name().to_string());
        Self::assemble(contract, base, settings, factory, constructor_args)
    }

    /// Class substitutes may receive constructor arguments; interfaces may not.
    pub(crate) fn build_with_args(
        contract: Arc<Contract>,
        config: &SubstituteConfig,
        factory: Arc<dyn ProxyFactory>,
        constructor_args: Vec<Value>,
    ) -> Result<Self> {
        if contract.kind() == ContractKind::Interface && !constructor_args.is_empty() {
            return Err(SubstituteError::ConstructorArguments {
                contract: contract.name().to_string(),
            });
        }
        Ok(Self::build(contract, config, factory, constructor_args))
    }

    pub(crate) fn assemble(
        contract: Arc<Contract>,
        name_base: String,
        settings: Settings,
        factory: Arc<dyn ProxyFactory>,
        constructor_args: Vec<Value>,
    ) -> Self {
        let id = Uuid::new_v4();
        let short = id.simple().to_string();
        let name = format!("{}#{}", name_base, &short[..8]);
        debug!("Created substitute {} ({:?})", name, settings.behavior);
        Self {
            inner: Arc::new(SubstituteInner {
                id,
                name,
                contract,
                settings: RwLock::new(settings),
                factory,
                constructor_args,
                registry: SetupRegistry::new(),
                ledger: InvocationLedger::new(),
                children: RwLock::new(Vec::new()),
                handlers: RwLock::new(HashMap::new()),
                stubs: RwLock::new(None),
                sequences: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Recover the substitute behind one of its proxies ("Mock.Get")
    pub fn from_proxy(proxy: &Proxy) -> Option<Substitute> {
        proxy
            .interceptor()
            .clone()
            .into_any()
            .downcast::<SubstituteInner>()
            .ok()
            .map(|inner| Substitute { inner })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn contract(&self) -> &Arc<Contract> {
        &self.inner.contract
    }

    pub fn constructor_args(&self) -> &[Value] {
        &self.inner.constructor_args
    }

    /// The interceptable instance
    pub fn object(&self) -> Proxy {
        self.inner
            .factory
            .make_proxy(self.inner.contract.clone(), self.inner.clone())
    }

    pub fn behavior(&self) -> Behavior {
        read(&self.inner.settings).behavior
    }

    pub fn call_base(&self) -> bool {
        read(&self.inner.settings).call_base
    }

    pub fn set_call_base(&self, enabled: bool) {
        write(&self.inner.settings).call_base = enabled;
    }

    pub fn default_value(&self) -> DefaultValuePolicy {
        read(&self.inner.settings).default_value.clone()
    }

    pub fn set_default_value(&self, policy: DefaultValuePolicy) {
        write(&self.inner.settings).default_value = policy;
    }

    pub fn same_as(&self, other: &Substitute) -> bool {
        self.inner.id == other.inner.id
    }

    // ── configuration ──────────────────────────────────────────────────────

    pub fn setup(&self, describe: impl FnOnce(Expr) -> Expr) -> Result<SetupBuilder> {
        let setup = self.install(describe(Expr::target()), SetupKind::Standard, None)?;
        Ok(SetupBuilder::new(setup))
    }

    pub fn setup_sequence(&self, describe: impl FnOnce(Expr) -> Expr) -> Result<SequenceBuilder> {
        let setup = self.install(describe(Expr::target()), SetupKind::Standard, None)?;
        Ok(SequenceBuilder::new(setup))
    }

    /// Setups created through the returned handle only apply while `condition` holds.
    pub fn when(&self, condition: impl Fn() -> bool + Send + Sync + 'static) -> ConditionalSetup<'_> {
        ConditionalSetup {
            substitute: self,
            condition: Arc::new(condition),
        }
    }

    /// Getter returns whatever the setter stored last, starting at `initial`.
    pub fn setup_property(&self, name: &str, initial: impl Into<Value>) -> Result<()> {
        let cell = Slot::new(initial);
        let getter_cell = cell.clone();
        let getter = self.install(Expr::target().get(name), SetupKind::PropertyStub, None)?;
        SetupBuilder::new(getter).returns_with(move |_| getter_cell.get());
        let setter = self.install(Expr::target().set(name, It::any()), SetupKind::PropertyStub, None)?;
        SetupBuilder::new(setter).callback(move |args| {
            if let Some(v) = args.first() {
                cell.set(v.clone());
            }
        });
        Ok(())
    }

    /// Every property without an explicit setup behaves as a stub.
    pub fn setup_all_properties(&self) {
        let mut stubs = write(&self.inner.stubs);
        if stubs.is_none() {
            *stubs = Some(HashMap::new());
        }
    }

    /// Invoke every handler subscribed to `event`
    pub fn raise(&self, event: &str, args: &[Value]) {
        self.inner.raise(event, args)
    }

    /// Participate in a shared cross-substitute ordering log
    pub fn in_sequence(&self, token: &SequenceToken) {
        write(&self.inner.sequences).push(token.clone());
    }

    /// Describe a call on this substitute for sequence verification
    pub fn expect(&self, describe: impl FnOnce(Expr) -> Expr) -> Result<ExpectedCall> {
        let ex = extract(&self.inner.contract, &describe(Expr::target()))?;
        if !ex.hops.is_empty() {
            return Err(ExtractionError::NotReinvokable(ex.text).into());
        }
        Ok(ExpectedCall::new(self.inner.id, self.inner.name.clone(), ex.target, ex.text))
    }

    fn install(&self, expr: Expr, kind: SetupKind, condition: Option<Condition>) -> Result<Arc<Setup>> {
        let ex = extract(&self.inner.contract, &expr)?;
        let mut owner = self.clone();
        for hop in &ex.hops {
            owner = owner.reach_or_link(hop);
        }
        let setup = Arc::new(Setup::new(kind, ex.target, ex.text, condition));
        owner.inner.registry.add(setup.clone());
        debug!("Installed setup '{}' on {}", setup.text(), owner.name());
        Ok(setup)
    }

    /// The child one hop leads to, creating and linking it when needed.
    fn reach_or_link(&self, hop: &Hop) -> Substitute {
        if let Some(child) = self
            .inner
            .registry
            .find_link(&hop.descriptor)
            .and_then(|link| link.returned_proxy())
            .and_then(|proxy| Substitute::from_proxy(&proxy))
        {
            return child;
        }
        if let Some(args) = hop.descriptor.exact_args() {
            if let Some(child) = self.inner.find_child(&hop.descriptor.member, &args) {
                return child;
            }
        }

        let child = self.inner.spawn_child(hop.reaches.clone(), hop.descriptor.member.name());
        let link = Arc::new(Setup::new(
            SetupKind::Hop,
            hop.descriptor.clone(),
            format!("x => {}", hop.descriptor.text()),
            None,
        ));
        SetupBuilder::new(link.clone()).returns(child.object());
        self.inner.registry.add(link);
        write(&self.inner.children).push(Child {
            site: hop.descriptor.exact_args().map(|args| AccessSite {
                member: hop.descriptor.member.clone(),
                args,
            }),
            substitute: child.clone(),
        });
        debug!("Linked child {} through '{}'", child.name(), hop.descriptor.text());
        child
    }

    // ── introspection ──────────────────────────────────────────────────────

    pub fn setups(&self) -> Vec<Arc<Setup>> {
        self.inner.registry.setups()
    }

    pub fn invocations(&self) -> Vec<Arc<Invocation>> {
        self.inner.ledger.snapshot()
    }

    pub fn children(&self) -> Vec<Substitute> {
        read(&self.inner.children)
            .iter()
            .map(|c| c.substitute.clone())
            .collect()
    }

    /// Drop recorded invocations here and in every child
    pub fn clear_invocations(&self) {
        for sub in verify::reachable(std::slice::from_ref(self)) {
            sub.inner.ledger.clear();
        }
    }

    /// Drop setups, invocations, stubs and children, propagating into children first.
    /// This also releases proxies held by returning setups.
    pub fn reset(&self) {
        for child in self.children() {
            child.reset();
        }
        self.inner.registry.clear();
        self.inner.ledger.clear();
        write(&self.inner.children).clear();
        *write(&self.inner.stubs) = None;
        debug!("Reset substitute {}", self.inner.name);
    }

    // ── verification ───────────────────────────────────────────────────────

    /// Unverified matching invocations must fall within `times`; they are marked verified and returned.
    pub fn verify(&self, describe: impl FnOnce(Expr) -> Expr, times: Times) -> Result<Vec<Arc<Invocation>>> {
        verify::verify_call(self, &describe(Expr::target()), times, None)
    }

    pub fn verify_with_message(
        &self,
        describe: impl FnOnce(Expr) -> Expr,
        times: Times,
        message: &str,
    ) -> Result<Vec<Arc<Invocation>>> {
        verify::verify_call(self, &describe(Expr::target()), times, Some(message))
    }

    /// Setups flagged verifiable must have been satisfied
    pub fn verify_verifiable(&self) -> Result<()> {
        verify::verify_setups(std::slice::from_ref(self), Sweep::Verifiable)
    }

    /// Every non-conditional setup, here and in reachable children, must have been matched
    pub fn verify_all(&self) -> Result<()> {
        verify::verify_setups(std::slice::from_ref(self), Sweep::All)
    }

    /// Every invocation, here and in reachable children, must have been verified
    pub fn verify_no_other_calls(&self) -> Result<()> {
        verify::verify_no_other_calls(std::slice::from_ref(self))
    }
}

impl fmt::Debug for Substitute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Substitute")
            .field("name", &self.inner.name)
            .field("setups", &self.inner.registry.len())
            .field("invocations", &self.inner.ledger.len())
            .finish()
    }
}

/// Setup entry point carrying a guard condition
pub struct ConditionalSetup<'a> {
    substitute: &'a Substitute,
    condition: Condition,
}

impl ConditionalSetup<'_> {
    pub fn setup(&self, describe: impl FnOnce(Expr) -> Expr) -> Result<SetupBuilder> {
        let setup = self
            .substitute
            .install(describe(Expr::target()), SetupKind::Standard, Some(self.condition.clone()))?;
        Ok(SetupBuilder::new(setup))
    }

    pub fn setup_sequence(&self, describe: impl FnOnce(Expr) -> Expr) -> Result<SequenceBuilder> {
        let setup = self
            .substitute
            .install(describe(Expr::target()), SetupKind::Standard, Some(self.condition.clone()))?;
        Ok(SequenceBuilder::new(setup))
    }
}

impl SubstituteInner {
    /// Child inheriting behavior, CallBase, default value policy and proxy factory
    pub(crate) fn spawn_child(&self, contract: Arc<Contract>, via: &str) -> Substitute {
        let settings = read(&self.settings).clone();
        let base = format!("{}.{}", self.name, via);
        Substitute::assemble(contract, base, settings, self.factory.clone(), Vec::new())
    }

    pub(crate) fn find_child(&self, member: &MemberRef, args: &[Value]) -> Option<Substitute> {
        read(&self.children)
            .iter()
            .find(|c| {
                c.site
                    .as_ref()
                    .map_or(false, |site| site.member == *member && site.args == args)
            })
            .map(|c| c.substitute.clone())
    }

    pub(crate) fn raise(&self, event: &str, args: &[Value]) {
        let handlers = read(&self.handlers).get(event).cloned().unwrap_or_default();
        debug!("Raising '{}' on {} to {} handler(s)", event, self.name, handlers.len());
        for handler in handlers {
            handler.invoke(args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::contract::{param, TypeSpec};

    fn contract() -> Arc<Contract> {
        let leaf = Contract::interface("ILeaf")
            .method("Ping", vec![param("n", TypeSpec::Int)], TypeSpec::Int)
            .build();
        Contract::interface("IRoot")
            .readonly_property("Leaf", TypeSpec::Contract(leaf))
            .method("Open", vec![param("name", TypeSpec::Str)], TypeSpec::SelfContract)
            .property("Title", TypeSpec::Str)
            .build()
    }

    #[test]
    fn test_from_proxy_round_trips() {
        let sub = Substitute::new(contract());
        let found = Substitute::from_proxy(&sub.object()).unwrap();
        assert!(found.same_as(&sub));
    }

    #[test]
    fn test_reset_releases_self_returning_substitute() {
        let sub = Substitute::new(contract());
        let weak = Arc::downgrade(&sub.inner);
        sub.setup(|x| x.call("Open", args!["me"])).unwrap().returns(sub.object());
        sub.object().call("Open", vec!["me".into()]).unwrap();

        sub.reset();
        drop(sub);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_chained_setup_links_one_child_per_hop() {
        let sub = Substitute::new(contract());
        sub.setup(|x| x.get("Leaf").call("Ping", args![1])).unwrap().returns(10);
        sub.setup(|x| x.get("Leaf").call("Ping", args![2])).unwrap().returns(20);
        assert_eq!(sub.children().len(), 1);

        let leaf = sub.object().get("Leaf").unwrap();
        let leaf = leaf.as_proxy().unwrap();
        assert_eq!(leaf.call("Ping", vec![1.into()]).unwrap(), Value::Int(10));
        assert_eq!(leaf.call("Ping", vec![2.into()]).unwrap(), Value::Int(20));
    }

    #[test]
    fn test_sequence_expectation_rejects_chains() {
        let sub = Substitute::new(contract());
        assert!(sub.expect(|x| x.get("Leaf").call("Ping", args![1])).is_err());
        assert!(sub.expect(|x| x.call("Open", args!["a"])).is_ok());
    }

    #[test]
    fn test_setup_property_tracks_assignments() {
        let sub = Substitute::new(contract());
        sub.setup_property("Title", "draft").unwrap();
        let obj = sub.object();
        assert_eq!(obj.get("Title").unwrap(), Value::from("draft"));
        obj.set("Title", "final").unwrap();
        assert_eq!(obj.get("Title").unwrap(), Value::from("final"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let sub = Substitute::new(contract());
        sub.setup(|x| x.get("Leaf").call("Ping", args![1])).unwrap().returns(10);
        sub.object().call("Open", vec!["a".into()]).unwrap();
        sub.reset();
        assert!(sub.setups().is_empty());
        assert!(sub.invocations().is_empty());
        assert!(sub.children().is_empty());
    }

    #[test]
    fn test_children_inherit_settings() {
        let sub = Substitute::strict(contract());
        sub.set_call_base(true);
        sub.setup(|x| x.get("Leaf").call("Ping", args![1])).unwrap().returns(1);
        let child = &sub.children()[0];
        assert_eq!(child.behavior(), Behavior::Strict);
        assert!(child.call_base());
        assert!(child.name().starts_with(sub.name()));
    }
}
