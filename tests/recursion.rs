//! Chained setups, materialized children and propagation through them.

use std::sync::Arc;

use anyhow::Result;
use surrogate::{args, param, Contract, DefaultValuePolicy, It, Substitute, SubstituteError, Times, TypeSpec, Value};

fn contracts() -> Arc<Contract> {
    let account = Contract::interface("IAccount")
        .method("Balance", vec![param("currency", TypeSpec::Str)], TypeSpec::Int)
        .build();
    let customer = Contract::interface("ICustomer")
        .readonly_property("Account", TypeSpec::Contract(account))
        .property("Name", TypeSpec::Str)
        .build();
    Contract::interface("IBank")
        .method("Find", vec![param("id", TypeSpec::Int)], TypeSpec::Contract(customer))
        .readonly_property("Self", TypeSpec::SelfContract)
        .build()
}

#[test]
fn test_three_level_chain() -> Result<()> {
    let bank = Substitute::new(contracts());
    bank.setup(|x| x.call("Find", args![7]).get("Account").call("Balance", args!["EUR"]))?
        .returns(120);

    let customer = bank.object().call("Find", vec![7.into()])?;
    let account = customer.as_proxy().unwrap().get("Account")?;
    let balance = account.as_proxy().unwrap().call("Balance", vec!["EUR".into()])?;
    assert_eq!(balance, Value::Int(120));

    // Other sites stay unconfigured.
    assert_eq!(bank.object().call("Find", vec![8.into()])?, Value::Unit);
    Ok(())
}

#[test]
fn test_chains_share_intermediate_children() -> Result<()> {
    let bank = Substitute::new(contracts());
    bank.setup(|x| x.call("Find", args![1]).get("Name"))?.returns("Ada");
    bank.setup(|x| x.call("Find", args![1]).get("Account").call("Balance", args![It::any()]))?
        .returns(5);
    assert_eq!(bank.children().len(), 1);

    let customer = bank.object().call("Find", vec![1.into()])?;
    let customer = customer.as_proxy().unwrap();
    assert_eq!(customer.get("Name")?, Value::from("Ada"));
    let account = customer.get("Account")?;
    assert_eq!(account.as_proxy().unwrap().call("Balance", vec!["USD".into()])?, Value::Int(5));
    Ok(())
}

#[test]
fn test_verify_all_reaches_into_children() -> Result<()> {
    let bank = Substitute::new(contracts());
    bank.setup(|x| x.call("Find", args![1]).get("Name"))?.returns("Ada");
    bank.object().call("Find", vec![1.into()])?;

    let err = bank.verify_all().unwrap_err();
    let text = err.to_string();
    assert!(text.contains("x => x.Find(1).Name"));
    assert!(text.contains("not matched"));

    let customer = bank.object().call("Find", vec![1.into()])?;
    customer.as_proxy().unwrap().get("Name")?;
    bank.verify_all()?;
    bank.verify_no_other_calls()?;
    Ok(())
}

#[test]
fn test_children_inherit_mock_policy() -> Result<()> {
    let bank = Substitute::new(contracts());
    bank.set_default_value(DefaultValuePolicy::Mock);
    let customer = bank.object().call("Find", vec![3.into()])?;
    let account = customer.as_proxy().unwrap().get("Account")?;
    assert!(account.as_proxy().is_some());

    let again = bank.object().call("Find", vec![3.into()])?;
    assert!(again.as_proxy().unwrap().same_instance(customer.as_proxy().unwrap()));
    let other = bank.object().call("Find", vec![4.into()])?;
    assert!(!other.as_proxy().unwrap().same_instance(customer.as_proxy().unwrap()));
    assert_eq!(bank.children().len(), 2);
    Ok(())
}

#[test]
fn test_verify_through_materialized_children() -> Result<()> {
    let bank = Substitute::new(contracts());
    bank.set_default_value(DefaultValuePolicy::Mock);
    let customer = bank.object().call("Find", vec![3.into()])?;
    customer.as_proxy().unwrap().set("Name", "Grace")?;

    bank.verify(|x| x.call("Find", args![3]).set("Name", "Grace"), Times::once())?;
    bank.verify_no_other_calls()?;
    Ok(())
}

#[test]
fn test_no_other_calls_groups_failures_by_substitute() -> Result<()> {
    let bank = Substitute::new(contracts());
    bank.set_default_value(DefaultValuePolicy::Mock);
    let customer = bank.object().call("Find", vec![3.into()])?;
    customer.as_proxy().unwrap().get("Name")?;
    bank.object().get("Self")?;

    match bank.verify_no_other_calls().unwrap_err() {
        SubstituteError::VerificationFailed(report) => {
            assert_eq!(report.groups.len(), 1);
            assert!(report.groups[0].failures[0].contains("ICustomer.Name"));
        }
        other => panic!("unexpected error {other}"),
    }
    Ok(())
}

#[test]
fn test_self_reference_cycle_terminates() -> Result<()> {
    let bank = Substitute::new(contracts());
    bank.setup(|x| x.get("Self"))?.returns(bank.object());
    let me = bank.object().get("Self")?;
    assert!(me.as_proxy().unwrap().same_instance(&bank.object()));

    bank.verify_all()?;
    bank.verify_no_other_calls()?;
    Ok(())
}

#[test]
fn test_reset_and_clear_propagate() -> Result<()> {
    let bank = Substitute::new(contracts());
    bank.setup(|x| x.call("Find", args![1]).get("Name"))?.returns("Ada");
    let customer = bank.object().call("Find", vec![1.into()])?;
    customer.as_proxy().unwrap().get("Name")?;
    let child = bank.children()[0].clone();
    assert_eq!(child.invocations().len(), 1);

    bank.clear_invocations();
    assert!(bank.invocations().is_empty());
    assert!(child.invocations().is_empty());
    assert_eq!(child.setups().len(), 1);

    bank.reset();
    assert!(child.setups().is_empty());
    assert!(bank.children().is_empty());
    assert_eq!(bank.object().call("Find", vec![1.into()])?, Value::Unit);
    Ok(())
}
