//! Default value policies for unconfigured calls

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::contract::{Contract, TypeSpec};
use crate::value::{TaskValue, Value};

/// Supplies values for types the built-in policies should not decide
pub trait DefaultValueProvider: Send + Sync {
    fn provide(&self, ty: &TypeSpec) -> Option<Value>;
}

/// Serializable choice between the built-in policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValueKind {
    #[default]
    Empty,
    Mock,
}

#[derive(Clone, Default)]
pub enum DefaultValuePolicy {
    /// Zero/empty values; substitutable types yield unit
    #[default]
    Empty,
    /// Like `Empty`, but substitutable types yield an auto-materialized substitute
    Mock,
    /// Provider first, `Empty` for whatever it declines
    Custom(Arc<dyn DefaultValueProvider>),
}

impl DefaultValuePolicy {
    pub fn produce(
        &self,
        ty: &TypeSpec,
        declaring: &Arc<Contract>,
        materialize: &mut dyn FnMut(Arc<Contract>) -> Value,
    ) -> Value {
        if let DefaultValuePolicy::Custom(provider) = self {
            if let Some(v) = provider.provide(ty) {
                return v;
            }
        }
        match ty {
            TypeSpec::Unit | TypeSpec::Opaque(_) => Value::Unit,
            TypeSpec::Bool => Value::Bool(false),
            TypeSpec::Int => Value::Int(0),
            TypeSpec::Float => Value::Float(0.0),
            TypeSpec::Str => Value::Str(String::new()),
            TypeSpec::List(_) => Value::List(Vec::new()),
            TypeSpec::Map => Value::Map(Default::default()),
            TypeSpec::Task(inner) => Value::Task(TaskValue::completed(self.produce(inner, declaring, materialize))),
            TypeSpec::Contract(_) | TypeSpec::SelfContract => match (self, ty.resolve_contract(declaring)) {
                (DefaultValuePolicy::Mock, Some(contract)) => materialize(contract),
                _ => Value::Unit,
            },
        }
    }
}

impl From<DefaultValueKind> for DefaultValuePolicy {
    fn from(kind: DefaultValueKind) -> Self {
        match kind {
            DefaultValueKind::Empty => DefaultValuePolicy::Empty,
            DefaultValueKind::Mock => DefaultValuePolicy::Mock,
        }
    }
}

impl fmt::Debug for DefaultValuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValuePolicy::Empty => write!(f, "Empty"),
            DefaultValuePolicy::Mock => write!(f, "Mock"),
            DefaultValuePolicy::Custom(_) => write!(f, "Custom"),
        }
    }
}
