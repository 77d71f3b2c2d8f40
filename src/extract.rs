//! Call Descriptor Extractor
//!
//! Normalizes a call-describing expression into the final [`CallDescriptor`]
//! plus the ordered intermediate hops needed to reach it. Argument
//! sub-expressions are evaluated eagerly except matcher-producing sub-calls and
//! explicitly lazy captures.

use std::sync::Arc;

use crate::call::CallDescriptor;
use crate::contract::{Contract, MemberInfo, MemberKind, MemberRef, ParamInfo, ParamMode};
use crate::error::{ExtractionError, Result, SubstituteError};
use crate::expr::{Arg, Expr};
use crate::matcher::{It, Matcher};
use crate::value::Value;

/// An intermediate member access together with the contract it leads to
#[derive(Debug, Clone)]
pub struct Hop {
    pub descriptor: CallDescriptor,
    pub reaches: Arc<Contract>,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub hops: Vec<Hop>,
    pub target: CallDescriptor,
    /// Rendering of the whole expression, e.g. `x => x.A.B(1)`
    pub text: String,
}

pub fn extract(contract: &Arc<Contract>, expr: &Expr) -> Result<Extraction> {
    let mut segments = Vec::new();
    let mut cursor = expr;
    while let Some(inner) = cursor.inner() {
        segments.push(cursor);
        cursor = inner;
    }
    match cursor {
        Expr::Target if !segments.is_empty() => {}
        Expr::Target => return Err(ExtractionError::UnsupportedNode(expr.render()).into()),
        Expr::Opaque(text) if segments.is_empty() => {
            return Err(ExtractionError::UnsupportedNode(text.clone()).into())
        }
        _ => return Err(ExtractionError::DetachedExpression(expr.render()).into()),
    }
    segments.reverse();

    let mut current = contract.clone();
    let mut hops = Vec::with_capacity(segments.len() - 1);
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        let descriptor = describe(&current, segment, i == last)?;
        if i == last {
            return Ok(Extraction {
                hops,
                target: descriptor,
                text: expr.render(),
            });
        }
        let returns = &descriptor.member.info.returns;
        let reaches = returns.resolve_contract(&current).ok_or_else(|| ExtractionError::NotSubstitutable {
            member: descriptor.member.to_string(),
            returns: returns.to_string(),
        })?;
        hops.push(Hop { descriptor, reaches: reaches.clone() });
        current = reaches;
    }
    Err(ExtractionError::UnsupportedNode(expr.render()).into())
}

fn describe(contract: &Arc<Contract>, segment: &Expr, is_last: bool) -> Result<CallDescriptor> {
    let text = segment.to_string();
    let (kind, name, generics, args): (MemberKind, &str, &[String], Vec<&Arg>) = match segment {
        Expr::Field { name, .. } => {
            return Err(ExtractionError::FieldAccess {
                contract: contract.name().to_string(),
                field: name.clone(),
            }
            .into())
        }
        Expr::Get { name, .. } => (MemberKind::Getter, name, &[], vec![]),
        Expr::Call { name, generics, args, .. } => (MemberKind::Method, name, generics, args.iter().collect()),
        Expr::Index { indices, .. } => {
            if !is_last && indices.len() > 1 {
                return Err(ExtractionError::IndexerHop(text).into());
            }
            (MemberKind::IndexGet, "Item", &[], indices.iter().collect())
        }
        _ if !is_last => return Err(ExtractionError::NotReinvokable(text).into()),
        Expr::Set { name, value, .. } => (MemberKind::Setter, name, &[], vec![value]),
        Expr::IndexSet { indices, value, .. } => {
            let mut all: Vec<&Arg> = indices.iter().collect();
            all.push(value);
            (MemberKind::IndexSet, "Item", &[], all)
        }
        Expr::Subscribe { event, handler, .. } => (MemberKind::EventAdd, event, &[], vec![handler]),
        Expr::Unsubscribe { event, handler, .. } => (MemberKind::EventRemove, event, &[], vec![handler]),
        Expr::Target | Expr::Opaque(_) => return Err(ExtractionError::UnsupportedNode(text).into()),
    };

    let info = resolve(contract, kind, name, args.len())?;
    if !info.overridable {
        return Err(ExtractionError::NotOverridable {
            contract: contract.name().to_string(),
            member: info.display_name(),
        }
        .into());
    }
    if generics.len() != info.generic_arity {
        return Err(ExtractionError::GenericArity {
            member: info.name.clone(),
            expected: info.generic_arity,
            actual: generics.len(),
        }
        .into());
    }

    let mut slots = Vec::with_capacity(args.len());
    let mut outs = Vec::new();
    for (position, (arg, param)) in args.iter().zip(&info.params).enumerate() {
        check_mode(arg, param)?;
        if let Arg::Out(value) = arg {
            outs.push((position, value.clone()));
            slots.push(Matcher::Any);
            continue;
        }
        slots.push(to_matcher(arg, param)?);
    }

    let member = MemberRef::with_generics(info, generics.to_vec());
    Ok(CallDescriptor::new(member, slots, outs, text))
}

fn resolve(contract: &Contract, kind: MemberKind, name: &str, arity: usize) -> Result<Arc<MemberInfo>> {
    if let Some(info) = contract.find(kind, name, arity) {
        return Ok(info);
    }
    if let Some(field) = contract.find_field(name) {
        return Err(ExtractionError::FieldAccess {
            contract: contract.name().to_string(),
            field: field.name.clone(),
        }
        .into());
    }
    if let Some(other) = contract.members().iter().find(|m| m.kind == kind && m.name == name) {
        return Err(SubstituteError::ArgumentCountMismatch {
            member: format!("{}.{}", contract.name(), other.display_name()),
            expected: other.arity(),
            actual: arity,
        });
    }
    Err(ExtractionError::UnknownMember {
        contract: contract.name().to_string(),
        kind: kind.to_string(),
        member: name.to_string(),
        arity,
    }
    .into())
}

/// By-reference and out parameters carry the caller's cell, so a plain value
/// could never match them; in-parameters never carry a cell.
fn check_mode(arg: &Arg, param: &ParamInfo) -> Result<()> {
    let accepted = match (param.mode, arg) {
        (_, Arg::Match(_)) => true,
        (_, Arg::Value(Value::Slot(_))) => param.mode != ParamMode::In,
        (ParamMode::In, Arg::Ref(_) | Arg::Out(_)) => false,
        (ParamMode::In, _) => true,
        (ParamMode::Ref, arg) => matches!(arg, Arg::Ref(_)),
        (ParamMode::Out, arg) => matches!(arg, Arg::Out(_)),
    };
    if accepted {
        return Ok(());
    }
    let given = match arg {
        Arg::Ref(_) => "by-ref cell",
        Arg::Out(_) => "out value",
        Arg::Params(_) => "parameter array",
        _ => "plain value",
    };
    let mode = match param.mode {
        ParamMode::In => "in",
        ParamMode::Ref => "ref",
        ParamMode::Out => "out",
    };
    Err(ExtractionError::UnsupportedNode(format!("{} given for {}-parameter '{}'", given, mode, param.name)).into())
}

fn to_matcher(arg: &Arg, param: &ParamInfo) -> Result<Matcher> {
    let matcher = match arg {
        Arg::Value(v) => Matcher::Exact(v.clone()),
        Arg::Capture { read, .. } => Matcher::Exact(read()),
        Arg::Lazy { name, read } => {
            let read = read.clone();
            It::is_described(name, move |v| *v == read())
        }
        Arg::Match(m) => m.clone(),
        Arg::Ref(slot) => Matcher::Exact(Value::Slot(slot.clone())),
        Arg::Params(items) => {
            if !param.params_array {
                return Err(ExtractionError::UnsupportedNode(format!(
                    "parameter array given for '{}'",
                    param.name
                ))
                .into());
            }
            let element = ParamInfo {
                params_array: false,
                ..param.clone()
            };
            Matcher::Params(items.iter().map(|item| to_matcher(item, &element)).collect::<Result<_>>()?)
        }
        Arg::Out(value) => {
            return Err(ExtractionError::UnsupportedNode(format!("nested out {}", value)).into())
        }
    };
    matcher.validate()?;
    Ok(matcher)
}
