//! Contract Descriptions
//!
//! A contract is the abstract behavioral surface a substitute stands in for:
//! an interface, or a class whose overridable members can be intercepted.
//! Members are looked up by kind, name and arity.

use std::fmt;
use std::sync::Arc;

use crate::value::{Fault, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractKind {
    Interface,
    Class,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    Getter,
    Setter,
    IndexGet,
    IndexSet,
    EventAdd,
    EventRemove,
    Field,
}

impl MemberKind {
    pub fn is_property_accessor(&self) -> bool {
        matches!(self, MemberKind::Getter | MemberKind::Setter)
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberKind::Method => "method",
            MemberKind::Getter => "getter",
            MemberKind::Setter => "setter",
            MemberKind::IndexGet => "indexer getter",
            MemberKind::IndexSet => "indexer setter",
            MemberKind::EventAdd => "event subscription",
            MemberKind::EventRemove => "event unsubscription",
            MemberKind::Field => "field",
        };
        f.write_str(name)
    }
}

/// Static type of a parameter or return slot
#[derive(Debug, Clone)]
pub enum TypeSpec {
    Unit,
    Bool,
    Int,
    Float,
    Str,
    List(Box<TypeSpec>),
    Map,
    /// Async wrapper around the inner type
    Task(Box<TypeSpec>),
    Contract(Arc<Contract>),
    /// The contract declaring the member
    SelfContract,
    Opaque(String),
}

impl TypeSpec {
    pub fn task(inner: TypeSpec) -> Self {
        TypeSpec::Task(Box::new(inner))
    }

    pub fn list(inner: TypeSpec) -> Self {
        TypeSpec::List(Box::new(inner))
    }

    pub fn is_substitutable(&self) -> bool {
        matches!(self, TypeSpec::Contract(_) | TypeSpec::SelfContract)
    }

    /// The contract a substitutable type refers to, seen from `declaring`.
    pub fn resolve_contract(&self, declaring: &Arc<Contract>) -> Option<Arc<Contract>> {
        match self {
            TypeSpec::Contract(c) => Some(c.clone()),
            TypeSpec::SelfContract => Some(declaring.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Unit => write!(f, "()"),
            TypeSpec::Bool => write!(f, "bool"),
            TypeSpec::Int => write!(f, "int"),
            TypeSpec::Float => write!(f, "float"),
            TypeSpec::Str => write!(f, "str"),
            TypeSpec::List(inner) => write!(f, "[{}]", inner),
            TypeSpec::Map => write!(f, "map"),
            TypeSpec::Task(inner) => write!(f, "Task<{}>", inner),
            TypeSpec::Contract(c) => write!(f, "{}", c.name()),
            TypeSpec::SelfContract => write!(f, "Self"),
            TypeSpec::Opaque(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    In,
    Ref,
    Out,
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: TypeSpec,
    pub mode: ParamMode,
    /// Trailing variadic parameter, passed as a `Value::List`
    pub params_array: bool,
}

pub fn param(name: &str, ty: TypeSpec) -> ParamInfo {
    ParamInfo {
        name: name.to_string(),
        ty,
        mode: ParamMode::In,
        params_array: false,
    }
}

pub fn ref_param(name: &str, ty: TypeSpec) -> ParamInfo {
    ParamInfo {
        mode: ParamMode::Ref,
        ..param(name, ty)
    }
}

pub fn out_param(name: &str, ty: TypeSpec) -> ParamInfo {
    ParamInfo {
        mode: ParamMode::Out,
        ..param(name, ty)
    }
}

pub fn params_array(name: &str, element: TypeSpec) -> ParamInfo {
    ParamInfo {
        params_array: true,
        ..param(name, TypeSpec::list(element))
    }
}

/// Base implementation reachable through CallBase
pub type BaseImpl = Arc<dyn Fn(&[Value]) -> std::result::Result<Value, Fault> + Send + Sync>;

pub struct MemberInfo {
    ordinal: usize,
    contract: String,
    pub name: String,
    pub kind: MemberKind,
    pub params: Vec<ParamInfo>,
    pub returns: TypeSpec,
    pub overridable: bool,
    pub generic_arity: usize,
    pub base: Option<BaseImpl>,
}

impl MemberInfo {
    pub fn contract_name(&self) -> &str {
        &self.contract
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Property or event name shared by paired accessors
    pub fn display_name(&self) -> String {
        match self.kind {
            MemberKind::IndexGet | MemberKind::IndexSet => "this[]".to_string(),
            _ => self.name.clone(),
        }
    }

    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let prefix = match (p.mode, p.params_array) {
                    (_, true) => "..",
                    (ParamMode::Ref, _) => "ref ",
                    (ParamMode::Out, _) => "out ",
                    (ParamMode::In, _) => "",
                };
                format!("{}{}: {}", prefix, p.name, p.ty)
            })
            .collect();
        format!(
            "{} {}.{}({}) -> {}",
            self.kind,
            self.contract,
            self.display_name(),
            params.join(", "),
            self.returns
        )
    }
}

impl fmt::Debug for MemberInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Stable bucket key for a member within its contract
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberKey {
    contract: String,
    ordinal: usize,
}

/// A member together with its generic instantiation
#[derive(Debug, Clone)]
pub struct MemberRef {
    pub info: Arc<MemberInfo>,
    pub generic_args: Vec<String>,
}

impl MemberRef {
    pub fn new(info: Arc<MemberInfo>) -> Self {
        Self {
            info,
            generic_args: Vec::new(),
        }
    }

    pub fn with_generics(info: Arc<MemberInfo>, generic_args: Vec<String>) -> Self {
        Self { info, generic_args }
    }

    pub fn key(&self) -> MemberKey {
        MemberKey {
            contract: self.info.contract.clone(),
            ordinal: self.info.ordinal,
        }
    }

    pub fn kind(&self) -> MemberKind {
        self.info.kind
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}

impl PartialEq for MemberRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key() && self.generic_args == other.generic_args
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.info.contract, self.info.display_name())?;
        if !self.generic_args.is_empty() {
            write!(f, "<{}>", self.generic_args.join(", "))?;
        }
        Ok(())
    }
}

pub struct Contract {
    name: String,
    kind: ContractKind,
    members: Vec<Arc<MemberInfo>>,
}

impl Contract {
    pub fn interface(name: &str) -> ContractBuilder {
        ContractBuilder::new(name, ContractKind::Interface)
    }

    pub fn class(name: &str) -> ContractBuilder {
        ContractBuilder::new(name, ContractKind::Class)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ContractKind {
        self.kind
    }

    pub fn members(&self) -> &[Arc<MemberInfo>] {
        &self.members
    }

    pub fn find(&self, kind: MemberKind, name: &str, arity: usize) -> Option<Arc<MemberInfo>> {
        self.members
            .iter()
            .find(|m| m.kind == kind && m.name == name && m.arity() == arity)
            .cloned()
    }

    /// Field lookup ignores arity
    pub fn find_field(&self, name: &str) -> Option<Arc<MemberInfo>> {
        self.members
            .iter()
            .find(|m| m.kind == MemberKind::Field && m.name == name)
            .cloned()
    }

    /// Names of properties that have both accessors or at least a getter
    pub fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .members
            .iter()
            .filter(|m| m.kind == MemberKind::Getter)
            .map(|m| m.name.clone())
            .collect();
        names.dedup();
        names
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("members", &self.members.len())
            .finish()
    }
}

pub struct ContractBuilder {
    name: String,
    kind: ContractKind,
    members: Vec<MemberInfo>,
}

impl ContractBuilder {
    fn new(name: &str, kind: ContractKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            members: Vec::new(),
        }
    }

    fn push(
        mut self,
        name: &str,
        kind: MemberKind,
        params: Vec<ParamInfo>,
        returns: TypeSpec,
        overridable: bool,
        generic_arity: usize,
        base: Option<BaseImpl>,
    ) -> Self {
        self.members.push(MemberInfo {
            ordinal: self.members.len(),
            contract: self.name.clone(),
            name: name.to_string(),
            kind,
            params,
            returns,
            overridable,
            generic_arity,
            base,
        });
        self
    }

    pub fn method(self, name: &str, params: Vec<ParamInfo>, returns: TypeSpec) -> Self {
        self.push(name, MemberKind::Method, params, returns, true, 0, None)
    }

    pub fn generic_method(
        self,
        name: &str,
        generic_arity: usize,
        params: Vec<ParamInfo>,
        returns: TypeSpec,
    ) -> Self {
        self.push(name, MemberKind::Method, params, returns, true, generic_arity, None)
    }

    /// Overridable method with a base implementation
    pub fn virtual_method<F>(self, name: &str, params: Vec<ParamInfo>, returns: TypeSpec, base: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, Fault> + Send + Sync + 'static,
    {
        self.push(name, MemberKind::Method, params, returns, true, 0, Some(Arc::new(base)))
    }

    pub fn sealed_method(self, name: &str, params: Vec<ParamInfo>, returns: TypeSpec) -> Self {
        self.push(name, MemberKind::Method, params, returns, false, 0, None)
    }

    pub fn property(self, name: &str, ty: TypeSpec) -> Self {
        self.push(name, MemberKind::Getter, vec![], ty.clone(), true, 0, None)
            .push(name, MemberKind::Setter, vec![param("value", ty)], TypeSpec::Unit, true, 0, None)
    }

    pub fn readonly_property(self, name: &str, ty: TypeSpec) -> Self {
        self.push(name, MemberKind::Getter, vec![], ty, true, 0, None)
    }

    pub fn indexer(self, indices: Vec<ParamInfo>, ty: TypeSpec) -> Self {
        let mut set_params = indices.clone();
        set_params.push(param("value", ty.clone()));
        self.push("Item", MemberKind::IndexGet, indices, ty, true, 0, None)
            .push("Item", MemberKind::IndexSet, set_params, TypeSpec::Unit, true, 0, None)
    }

    pub fn event(self, name: &str) -> Self {
        let handler = || vec![param("handler", TypeSpec::Opaque("handler".to_string()))];
        self.push(name, MemberKind::EventAdd, handler(), TypeSpec::Unit, true, 0, None)
            .push(name, MemberKind::EventRemove, handler(), TypeSpec::Unit, true, 0, None)
    }

    pub fn field(self, name: &str, ty: TypeSpec) -> Self {
        self.push(name, MemberKind::Field, vec![], ty, false, 0, None)
    }

    pub fn build(self) -> Arc<Contract> {
        Arc::new(Contract {
            name: self.name,
            kind: self.kind,
            members: self.members.into_iter().map(Arc::new).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Arc<Contract> {
        Contract::interface("IStore")
            .method("Get", vec![param("key", TypeSpec::Str)], TypeSpec::Int)
            .method("Get", vec![param("key", TypeSpec::Str), param("fallback", TypeSpec::Int)], TypeSpec::Int)
            .property("Name", TypeSpec::Str)
            .readonly_property("Parent", TypeSpec::SelfContract)
            .build()
    }

    #[test]
    fn test_overloads_resolve_by_arity() {
        let c = sample();
        let one = c.find(MemberKind::Method, "Get", 1).unwrap();
        let two = c.find(MemberKind::Method, "Get", 2).unwrap();
        assert_ne!(MemberRef::new(one).key(), MemberRef::new(two).key());
    }

    #[test]
    fn test_property_declares_both_accessors() {
        let c = sample();
        assert!(c.find(MemberKind::Getter, "Name", 0).is_some());
        assert!(c.find(MemberKind::Setter, "Name", 1).is_some());
        assert!(c.find(MemberKind::Setter, "Parent", 1).is_none());
        assert_eq!(c.property_names(), vec!["Name".to_string(), "Parent".to_string()]);
    }

    #[test]
    fn test_self_contract_resolves_to_declaring() {
        let c = sample();
        let parent = c.find(MemberKind::Getter, "Parent", 0).unwrap();
        assert!(parent.returns.is_substitutable());
        let resolved = parent.returns.resolve_contract(&c).unwrap();
        assert!(Arc::ptr_eq(&resolved, &c));
    }

    #[test]
    fn test_generic_instantiations_are_distinct_members() {
        let c = Contract::interface("IConv")
            .generic_method("Convert", 1, vec![param("v", TypeSpec::Str)], TypeSpec::Opaque("T".into()))
            .build();
        let info = c.find(MemberKind::Method, "Convert", 1).unwrap();
        let a = MemberRef::with_generics(info.clone(), vec!["i32".into()]);
        let b = MemberRef::with_generics(info, vec!["u8".into()]);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "IConv.Convert<i32>");
    }
}
