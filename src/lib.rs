//! Surrogate: dynamic test doubles
//!
//! A substitute stands in for a contract (an interface or a class with
//! overridable members) and records every call made on its proxy:
//! - Setups built from call-describing expressions with argument matchers
//! - Strict or loose behavior, CallBase and default value policies
//! - Recursive chained setups over auto-materialized child substitutes
//! - Verification of counts, setups and leftover calls with aggregated reports
//! - Cross-substitute call ordering

pub mod call;
pub mod config;
pub mod contract;
pub mod defaults;
pub mod dispatch;
pub mod error;
pub mod expr;
pub mod extract;
pub mod ledger;
pub mod matcher;
pub mod proxy;
pub mod registry;
pub mod repository;
pub mod sequence;
pub mod setup;
pub mod substitute;
pub mod telemetry;
pub mod times;
pub mod value;
pub mod verify;

mod sync;

// Re-exports for convenience
pub use call::{CallDescriptor, Invocation, Outcome};
pub use config::SubstituteConfig;
pub use contract::{out_param, param, params_array, ref_param, Contract, ContractKind, MemberKind, TypeSpec};
pub use defaults::{DefaultValueKind, DefaultValuePolicy, DefaultValueProvider};
pub use error::{ExtractionError, Result, SubstituteError};
pub use expr::{by_ref, capture, lazy, out, params, Arg, Expr, IntoArg};
pub use matcher::{It, Matcher, MatcherRegistry, RangeKind, RegexOptions};
pub use proxy::{Call, DynamicProxyFactory, Interceptor, Proxy, ProxyFactory};
pub use repository::SubstituteRepository;
pub use sequence::{ExpectedCall, SequenceFailure, SequenceToken};
pub use setup::{SequenceBuilder, SequenceExhaustion, SetupBuilder};
pub use substitute::{Behavior, Substitute};
pub use times::Times;
pub use value::{Fault, Handler, Opaque, Slot, TaskValue, Value};
pub use verify::VerificationReport;
