//! Dispatch Pipeline
//!
//! Runs when a proxy forwards a call. The newest applicable setup handles it;
//! without one the substitute's behavior mode decides. Sequence tokens see the
//! call as it starts; the ledger receives it once its outcome is known.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::call::{Invocation, Outcome};
use crate::contract::{Contract, MemberKind, TypeSpec};
use crate::error::{Result, SubstituteError};
use crate::proxy::{Call, Interceptor};
use crate::setup::{Response, Setup};
use crate::substitute::{AccessSite, Behavior, Child, SubstituteInner};
use crate::sync::{read, write};
use crate::value::Value;

impl Interceptor for SubstituteInner {
    fn identity(&self) -> Uuid {
        self.id
    }

    fn intercept(&self, call: Call) -> Result<Value> {
        trace!("{} <- {}", self.name, call);
        for token in read(&self.sequences).iter() {
            token.record(self.id, &self.name, &call);
        }
        let (result, matched) = match self.registry.find_match(&call) {
            Ok(Some(setup)) => (self.run_setup(&setup, &call), Some(setup.id())),
            Ok(None) => (self.fallback(&call), None),
            Err(e) => (Err(e), None),
        };
        self.record(call, &result, matched);
        result
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl SubstituteInner {
    fn record(&self, call: Call, result: &Result<Value>, matched: Option<u64>) {
        let outcome = match result {
            Ok(v) => Outcome::Returned(v.clone()),
            Err(e) => Outcome::Raised(e.to_string()),
        };
        self.ledger.append(Invocation::new(call, outcome, matched));
    }

    fn run_setup(&self, setup: &Arc<Setup>, call: &Call) -> Result<Value> {
        setup.record_match();
        debug!("{} matched setup '{}'", call, setup.text());

        for callback in setup.callbacks_before() {
            callback(&call.args);
        }

        let value = match setup.next_response() {
            Some(Response::Value(v)) => v,
            Some(Response::Compute(f)) => f(&call.args),
            Some(Response::Throw(fault)) => return Err(SubstituteError::Thrown(fault)),
            Some(Response::ThrowWith(f)) => return Err(SubstituteError::Thrown(f(&call.args))),
            Some(Response::CallBase) => self.invoke_base(call)?,
            Some(Response::Pass) => self.unconfigured_result(call),
            None => {
                let strict = read(&self.settings).behavior == Behavior::Strict;
                if strict && !matches!(call.member.info.returns, TypeSpec::Unit) {
                    return Err(SubstituteError::ReturnValueRequired {
                        substitute: self.name.clone(),
                        setup: setup.text().to_string(),
                    });
                }
                self.unconfigured_result(call)
            }
        };

        for (position, assigned) in &setup.descriptor().outs {
            if let Some(Value::Slot(slot)) = call.args.get(*position) {
                slot.set(assigned.clone());
            }
        }

        for callback in setup.callbacks_after() {
            callback(&call.args);
        }

        for (event, args) in setup.raises() {
            self.raise(&event, &args);
        }

        Ok(value)
    }

    /// No setup matched: event bookkeeping, property stubs, then the behavior mode.
    fn fallback(&self, call: &Call) -> Result<Value> {
        if let Some(v) = self.track_handler(call) {
            return Ok(v);
        }
        if let Some(v) = self.stubbed_property(call) {
            return Ok(v);
        }

        let (behavior, call_base) = {
            let settings = read(&self.settings);
            (settings.behavior, settings.call_base)
        };
        if behavior == Behavior::Strict {
            warn!("Strict substitute {} has no setup for {}", self.name, call);
            return Err(SubstituteError::NoSetup {
                substitute: self.name.clone(),
                invocation: call.to_string(),
            });
        }
        if call_base {
            if let Some(base) = &call.member.info.base {
                return base(&call.args).map_err(SubstituteError::Thrown);
            }
        }
        Ok(self.default_for(call))
    }

    /// Result for a matched setup that configured nothing to return
    fn unconfigured_result(&self, call: &Call) -> Value {
        self.track_handler(call).unwrap_or_else(|| self.default_for(call))
    }

    fn invoke_base(&self, call: &Call) -> Result<Value> {
        match &call.member.info.base {
            Some(base) => base(&call.args).map_err(SubstituteError::Thrown),
            None => {
                debug!("{} has no base implementation; using the default value", call.member);
                Ok(self.default_for(call))
            }
        }
    }

    fn track_handler(&self, call: &Call) -> Option<Value> {
        let kind = call.member.kind();
        if !matches!(kind, MemberKind::EventAdd | MemberKind::EventRemove) {
            return None;
        }
        let handler = call.args.first().and_then(Value::as_handler)?.clone();
        let mut handlers = write(&self.handlers);
        let list = handlers.entry(call.member.name().to_string()).or_default();
        if kind == MemberKind::EventAdd {
            list.push(handler);
        } else if let Some(pos) = list.iter().position(|h| h.same_handler(&handler)) {
            list.remove(pos);
        }
        Some(Value::Unit)
    }

    fn stubbed_property(&self, call: &Call) -> Option<Value> {
        let name = call.member.name().to_string();
        match call.member.kind() {
            MemberKind::Setter => {
                let assigned = call.args.first().cloned().unwrap_or_default();
                write(&self.stubs).as_mut()?.insert(name, assigned);
                Some(Value::Unit)
            }
            MemberKind::Getter => {
                if let Some(v) = read(&self.stubs).as_ref()?.get(&name) {
                    return Some(v.clone());
                }
                let initial = self.default_for(call);
                let mut stubs = write(&self.stubs);
                Some(stubs.as_mut()?.entry(name).or_insert(initial).clone())
            }
            _ => None,
        }
    }

    fn default_for(&self, call: &Call) -> Value {
        let policy = read(&self.settings).default_value.clone();
        policy.produce(&call.member.info.returns, &self.contract, &mut |contract| {
            self.materialize(call, contract)
        })
    }

    /// Child substitute for this access site, created on first use
    fn materialize(&self, call: &Call, contract: Arc<Contract>) -> Value {
        let mut children = write(&self.children);
        let existing = children.iter().find(|c| {
            c.site
                .as_ref()
                .map_or(false, |site| site.member == call.member && site.args == call.args)
        });
        if let Some(child) = existing {
            return Value::Proxy(child.substitute.object());
        }

        let child = self.spawn_child(contract, call.member.name());
        debug!("Materialized {} for {}", child.name(), call);
        let proxy = child.object();
        children.push(Child {
            site: Some(AccessSite {
                member: call.member.clone(),
                args: call.args.clone(),
            }),
            substitute: child,
        });
        Value::Proxy(proxy)
    }
}

#[cfg(test)]
mod tests {
    use crate::args;
    use crate::config::SubstituteConfig;
    use crate::contract::{out_param, param, Contract, TypeSpec};
    use crate::defaults::DefaultValuePolicy;
    use crate::error::SubstituteError;
    use crate::expr::out;
    use crate::matcher::It;
    use crate::substitute::{Behavior, Substitute};
    use crate::value::{Fault, Handler, Slot, Value};
    use std::sync::{Arc, Mutex};

    fn contract() -> Arc<Contract> {
        Contract::class("Account")
            .method("Balance", vec![], TypeSpec::Int)
            .method("Deposit", vec![param("amount", TypeSpec::Int)], TypeSpec::Unit)
            .method(
                "TryParse",
                vec![param("text", TypeSpec::Str), out_param("parsed", TypeSpec::Int)],
                TypeSpec::Bool,
            )
            .virtual_method("Fee", vec![], TypeSpec::Int, |_| Ok(Value::Int(3)))
            .readonly_property("Owner", TypeSpec::SelfContract)
            .property("Label", TypeSpec::Str)
            .event("Changed")
            .build()
    }

    #[test]
    fn test_strict_miss_raises_no_setup_and_is_recorded() {
        let sub = Substitute::strict(contract());
        let err = sub.object().call("Balance", vec![]).unwrap_err();
        assert!(err.is_no_setup());
        assert_eq!(sub.invocations().len(), 1);
    }

    #[test]
    fn test_strict_setup_without_result_needs_a_value() {
        let sub = Substitute::strict(contract());
        sub.setup(|x| x.call("Balance", args![])).unwrap();
        sub.setup(|x| x.call("Deposit", args![It::any()])).unwrap();
        let obj = sub.object();
        assert!(matches!(
            obj.call("Balance", vec![]),
            Err(SubstituteError::ReturnValueRequired { .. })
        ));
        assert_eq!(obj.call("Deposit", vec![5.into()]).unwrap(), Value::Unit);
    }

    #[test]
    fn test_callbacks_run_around_the_result() {
        let sub = Substitute::new(contract());
        let log = Arc::new(Mutex::new(Vec::new()));
        let (before, after) = (log.clone(), log.clone());
        sub.setup(|x| x.call("Deposit", args![It::any()]))
            .unwrap()
            .callback(move |a| before.lock().unwrap().push(format!("before {}", a[0])))
            .returns(())
            .callback(move |a| after.lock().unwrap().push(format!("after {}", a[0])));
        sub.object().call("Deposit", vec![7.into()]).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["before 7".to_string(), "after 7".to_string()]);
    }

    #[test]
    fn test_throw_surfaces_the_fault() {
        let sub = Substitute::new(contract());
        sub.setup(|x| x.call("Balance", args![]))
            .unwrap()
            .throws(Fault::new("Locked", "account frozen"));
        let err = sub.object().call("Balance", vec![]).unwrap_err();
        assert_eq!(err.as_fault().map(|f| f.kind()), Some("Locked"));
    }

    #[test]
    fn test_out_argument_is_written() {
        let sub = Substitute::new(contract());
        sub.setup(|x| x.call("TryParse", args!["42", out(42)])).unwrap().returns(true);
        let cell = Slot::new(0);
        let ok = sub
            .object()
            .call("TryParse", vec!["42".into(), cell.clone().into()])
            .unwrap();
        assert_eq!(ok, Value::Bool(true));
        assert_eq!(cell.get(), Value::Int(42));
    }

    #[test]
    fn test_call_base_in_loose_mode() {
        let sub = Substitute::new(contract());
        assert_eq!(sub.object().call("Fee", vec![]).unwrap(), Value::Int(0));
        sub.set_call_base(true);
        assert_eq!(sub.object().call("Fee", vec![]).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_events_subscribe_raise_unsubscribe() {
        let sub = Substitute::new(contract());
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        let handler = Handler::new(move |_| *h.lock().unwrap() += 1);
        let obj = sub.object();
        obj.subscribe("Changed", &handler).unwrap();
        sub.raise("Changed", &[]);
        obj.unsubscribe("Changed", &handler).unwrap();
        sub.raise("Changed", &[]);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_setup_raises_event_after_result() {
        let sub = Substitute::new(contract());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        sub.object()
            .subscribe("Changed", &Handler::new(move |a| s.lock().unwrap().extend(a.to_vec())))
            .unwrap();
        sub.setup(|x| x.call("Deposit", args![It::any()]))
            .unwrap()
            .raises("Changed", vec![Value::Int(10)]);
        sub.object().call("Deposit", vec![10.into()]).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Value::Int(10)]);
    }

    #[test]
    fn test_all_properties_stubbed() {
        let sub = Substitute::strict(contract());
        sub.setup_all_properties();
        let obj = sub.object();
        assert_eq!(obj.get("Label").unwrap(), Value::from(""));
        obj.set("Label", "savings").unwrap();
        assert_eq!(obj.get("Label").unwrap(), Value::from("savings"));
        assert!(obj.call("Balance", vec![]).unwrap_err().is_no_setup());
    }

    #[test]
    fn test_mock_default_materializes_one_child_per_site() {
        let config = SubstituteConfig {
            behavior: Behavior::Loose,
            ..Default::default()
        };
        let sub = Substitute::with_config(contract(), &config);
        sub.set_default_value(DefaultValuePolicy::Mock);
        let obj = sub.object();
        let first = obj.get("Owner").unwrap();
        let second = obj.get("Owner").unwrap();
        assert!(first.as_proxy().unwrap().same_instance(second.as_proxy().unwrap()));
        assert_eq!(sub.children().len(), 1);
    }

    #[test]
    fn test_empty_default_returns_unit_for_contracts() {
        let sub = Substitute::new(contract());
        assert_eq!(sub.object().get("Owner").unwrap(), Value::Unit);
        assert!(sub.children().is_empty());
    }
}
