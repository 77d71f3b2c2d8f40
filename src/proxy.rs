//! Interceptable Instances
//!
//! The engine does not generate code. It consumes a `ProxyFactory` (the
//! `MakeProxy` capability) that turns a contract plus an interceptor into an
//! instance whose every member access is forwarded as a realized [`Call`].
//! [`DynamicProxyFactory`] is the built-in factory: it hands out [`Proxy`]
//! handles with a dynamic, name-based calling surface that hand-written trait
//! impls can forward to.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::contract::{Contract, MemberKind, MemberRef};
use crate::error::{ExtractionError, Result, SubstituteError};
use crate::value::{Handler, Value};

/// A realized call: a member plus concrete argument values
#[derive(Debug, Clone)]
pub struct Call {
    pub member: MemberRef,
    pub args: Vec<Value>,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        match self.member.kind() {
            MemberKind::Getter => write!(f, "{}", self.member),
            MemberKind::Setter => write!(f, "{} = {}", self.member, args.join(", ")),
            MemberKind::IndexGet => write!(f, "{}[{}]", self.member.info.contract_name(), args.join(", ")),
            MemberKind::IndexSet => {
                let (value, indices) = args.split_last().map(|(v, i)| (v.clone(), i.to_vec())).unwrap_or_default();
                write!(f, "{}[{}] = {}", self.member.info.contract_name(), indices.join(", "), value)
            }
            MemberKind::EventAdd => write!(f, "{} += {}", self.member, args.join(", ")),
            MemberKind::EventRemove => write!(f, "{} -= {}", self.member, args.join(", ")),
            _ => write!(f, "{}({})", self.member, args.join(", ")),
        }
    }
}

/// Receives every call made on a proxy
pub trait Interceptor: Send + Sync {
    /// Stable identity shared by every proxy made for this interceptor
    fn identity(&self) -> Uuid;

    fn intercept(&self, call: Call) -> Result<Value>;

    /// Bookkeeping access to the interceptor itself; never intercepted.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// The injected `MakeProxy(contract, onInvoke)` capability
pub trait ProxyFactory: Send + Sync {
    fn make_proxy(&self, contract: Arc<Contract>, interceptor: Arc<dyn Interceptor>) -> Proxy;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicProxyFactory;

impl ProxyFactory for DynamicProxyFactory {
    fn make_proxy(&self, contract: Arc<Contract>, interceptor: Arc<dyn Interceptor>) -> Proxy {
        Proxy {
            id: interceptor.identity(),
            contract,
            interceptor,
        }
    }
}

/// Interceptable instance of a contract
#[derive(Clone)]
pub struct Proxy {
    id: Uuid,
    contract: Arc<Contract>,
    interceptor: Arc<dyn Interceptor>,
}

impl Proxy {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn contract(&self) -> &Arc<Contract> {
        &self.contract
    }

    pub fn same_instance(&self, other: &Proxy) -> bool {
        self.id == other.id
    }

    pub(crate) fn interceptor(&self) -> &Arc<dyn Interceptor> {
        &self.interceptor
    }

    fn dispatch(&self, kind: MemberKind, name: &str, generics: &[&str], args: Vec<Value>) -> Result<Value> {
        let info = match self.contract.find(kind, name, args.len()) {
            Some(info) => info,
            None => {
                if let Some(other) = self.contract.members().iter().find(|m| m.kind == kind && m.name == name) {
                    return Err(SubstituteError::ArgumentCountMismatch {
                        member: format!("{}.{}", self.contract.name(), other.display_name()),
                        expected: other.arity(),
                        actual: args.len(),
                    });
                }
                return Err(ExtractionError::UnknownMember {
                    contract: self.contract.name().to_string(),
                    kind: kind.to_string(),
                    member: name.to_string(),
                    arity: args.len(),
                }
                .into());
            }
        };
        if generics.len() != info.generic_arity {
            return Err(ExtractionError::GenericArity {
                member: info.name.clone(),
                expected: info.generic_arity,
                actual: generics.len(),
            }
            .into());
        }
        let member = MemberRef::with_generics(info, generics.iter().map(|g| g.to_string()).collect());
        self.interceptor.intercept(Call { member, args })
    }

    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.dispatch(MemberKind::Method, method, &[], args)
    }

    pub fn call_generic(&self, method: &str, generics: &[&str], args: Vec<Value>) -> Result<Value> {
        self.dispatch(MemberKind::Method, method, generics, args)
    }

    pub fn get(&self, property: &str) -> Result<Value> {
        self.dispatch(MemberKind::Getter, property, &[], vec![])
    }

    pub fn set(&self, property: &str, value: impl Into<Value>) -> Result<()> {
        self.dispatch(MemberKind::Setter, property, &[], vec![value.into()])
            .map(|_| ())
    }

    pub fn index(&self, indices: Vec<Value>) -> Result<Value> {
        self.dispatch(MemberKind::IndexGet, "Item", &[], indices)
    }

    pub fn index_set(&self, mut indices: Vec<Value>, value: impl Into<Value>) -> Result<()> {
        indices.push(value.into());
        self.dispatch(MemberKind::IndexSet, "Item", &[], indices).map(|_| ())
    }

    pub fn subscribe(&self, event: &str, handler: &Handler) -> Result<()> {
        self.dispatch(MemberKind::EventAdd, event, &[], vec![Value::Handler(handler.clone())])
            .map(|_| ())
    }

    pub fn unsubscribe(&self, event: &str, handler: &Handler) -> Result<()> {
        self.dispatch(MemberKind::EventRemove, event, &[], vec![Value::Handler(handler.clone())])
            .map(|_| ())
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("id", &self.id)
            .field("contract", &self.contract.name())
            .finish()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} proxy>", self.contract.name())
    }
}
