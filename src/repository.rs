//! Substitute Repository
//!
//! Creates substitutes with shared settings and verifies all of them in one
//! pass, producing a single aggregated report.

use std::sync::{Arc, RwLock};

use tracing::info;

use crate::config::SubstituteConfig;
use crate::contract::Contract;
use crate::error::Result;
use crate::proxy::{DynamicProxyFactory, ProxyFactory};
use crate::substitute::{Behavior, Substitute};
use crate::sync::{read, write};
use crate::value::Value;
use crate::verify::{self, Sweep};

pub struct SubstituteRepository {
    config: SubstituteConfig,
    factory: Arc<dyn ProxyFactory>,
    created: RwLock<Vec<Substitute>>,
}

impl SubstituteRepository {
    pub fn new(config: SubstituteConfig) -> Self {
        Self::with_factory(config, Arc::new(DynamicProxyFactory))
    }

    pub fn with_factory(config: SubstituteConfig, factory: Arc<dyn ProxyFactory>) -> Self {
        Self {
            config,
            factory,
            created: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SubstituteConfig {
        &self.config
    }

    pub fn create(&self, contract: Arc<Contract>) -> Substitute {
        let sub = Substitute::build(contract, &self.config, self.factory.clone(), Vec::new());
        self.track(sub)
    }

    pub fn create_with(&self, contract: Arc<Contract>, behavior: Behavior) -> Substitute {
        let config = SubstituteConfig {
            behavior,
            ..self.config.clone()
        };
        let sub = Substitute::build(contract, &config, self.factory.clone(), Vec::new());
        self.track(sub)
    }

    /// Class substitutes only; interfaces reject constructor arguments.
    pub fn create_with_args(&self, contract: Arc<Contract>, constructor_args: Vec<Value>) -> Result<Substitute> {
        let sub = Substitute::build_with_args(contract, &self.config, self.factory.clone(), constructor_args)?;
        Ok(self.track(sub))
    }

    fn track(&self, sub: Substitute) -> Substitute {
        write(&self.created).push(sub.clone());
        sub
    }

    pub fn substitutes(&self) -> Vec<Substitute> {
        read(&self.created).clone()
    }

    pub fn verify_verifiable(&self) -> Result<()> {
        self.sweep(Sweep::Verifiable)
    }

    pub fn verify_all(&self) -> Result<()> {
        self.sweep(Sweep::All)
    }

    pub fn verify_no_other_calls(&self) -> Result<()> {
        verify::verify_no_other_calls(&self.substitutes())
    }

    fn sweep(&self, sweep: Sweep) -> Result<()> {
        let roots = self.substitutes();
        info!("Verifying {} substitute(s) ({:?})", roots.len(), sweep);
        verify::verify_setups(&roots, sweep)
    }
}
