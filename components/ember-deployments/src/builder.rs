use std::collections::BTreeMap;

use ember_files::DEFAULT_DEPLOYER_LABEL;

use crate::artifacts::ArtifactSource;
use crate::types::{
    ContractCallSpecification, ContractDeploySpecification, DeploymentError,
    EthTransferSpecification, FutureSpecification, ModuleSpecification, ParamValue,
    ReadOnlyCallSpecification,
};

/// Reference to a declared future, usable as an argument to later
/// declarations and as a module output.
#[derive(Debug, PartialEq, Clone)]
pub struct FutureHandle {
    pub id: String,
}

impl FutureHandle {
    pub fn as_param(&self) -> ParamValue {
        ParamValue::FutureRef(self.id.clone())
    }

    fn local_label(&self) -> &str {
        match self.id.split_once('#') {
            Some((_, label)) => label,
            None => &self.id,
        }
    }
}

/// Per-invocation build state: the arena of declared futures, their
/// declaration order, and the module cache. Passed explicitly so builds
/// stay reentrant and testable in isolation.
#[derive(Debug, Default)]
pub struct BuildContext {
    futures: BTreeMap<String, FutureSpecification>,
    declaration_order: Vec<String>,
    modules: BTreeMap<String, ModuleSpecification>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_future(&self, future_id: &str) -> Option<&FutureSpecification> {
        self.futures.get(future_id)
    }

    pub fn get_module(&self, name: &str) -> Option<&ModuleSpecification> {
        self.modules.get(name)
    }

    pub fn declaration_order(&self) -> &[String] {
        &self.declaration_order
    }

    /// Defines a module by running `build` against a fresh builder. The
    /// closure returns the module's named outputs. Re-defining a module
    /// under a name already present in this context returns the cached
    /// module without running the closure, so that two parents can
    /// embed the same sub-module and share its futures.
    pub fn build_module<F>(
        &mut self,
        name: &str,
        artifacts: &dyn ArtifactSource,
        build: F,
    ) -> Result<ModuleSpecification, DeploymentError>
    where
        F: FnOnce(&mut ModuleBuilder) -> Result<BTreeMap<String, FutureHandle>, DeploymentError>,
    {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }

        let mut builder = ModuleBuilder {
            ctx: self,
            artifacts,
            module_name: name.to_string(),
            future_ids: vec![],
            embedded_modules: vec![],
            sender: DEFAULT_DEPLOYER_LABEL.to_string(),
        };
        let outputs = build(&mut builder)?;

        let ModuleBuilder {
            future_ids,
            embedded_modules,
            ..
        } = builder;

        let module = ModuleSpecification {
            name: name.to_string(),
            future_ids,
            embedded_modules,
            outputs: outputs
                .into_iter()
                .map(|(output_name, handle)| (output_name, handle.id))
                .collect(),
        };
        self.modules.insert(name.to_string(), module.clone());
        Ok(module)
    }
}

/// Declarative API surface: collects deploy/call/transfer declarations
/// into the enclosing module. Pure graph construction - the only I/O is
/// the artifact lookup guarding deploy declarations.
pub struct ModuleBuilder<'a, 'b> {
    ctx: &'a mut BuildContext,
    artifacts: &'b dyn ArtifactSource,
    module_name: String,
    future_ids: Vec<String>,
    embedded_modules: Vec<String>,
    sender: String,
}

impl<'a, 'b> ModuleBuilder<'a, 'b> {
    /// Switches the account label used as sender for subsequent
    /// declarations. Defaults to "deployer".
    pub fn set_sender(&mut self, account_label: &str) {
        self.sender = account_label.to_string();
    }

    pub fn contract(
        &mut self,
        contract_name: &str,
        constructor_args: Vec<ParamValue>,
    ) -> Result<FutureHandle, DeploymentError> {
        self.contract_with_id(contract_name, contract_name, constructor_args)
    }

    pub fn contract_with_id(
        &mut self,
        label: &str,
        contract_name: &str,
        constructor_args: Vec<ParamValue>,
    ) -> Result<FutureHandle, DeploymentError> {
        let _ = self.artifacts.get_artifact(contract_name)?;
        let id = format!("{}#{}", self.module_name, label);
        self.declare(FutureSpecification::ContractDeploy(
            ContractDeploySpecification {
                id,
                contract_name: contract_name.to_string(),
                expected_sender: self.sender.clone(),
                constructor_args,
            },
        ))
    }

    pub fn call(
        &mut self,
        target: &FutureHandle,
        method: &str,
        arguments: Vec<ParamValue>,
    ) -> Result<FutureHandle, DeploymentError> {
        let label = format!("{}.{}", target.local_label(), method);
        self.call_with_id(&label, target, method, arguments)
    }

    pub fn call_with_id(
        &mut self,
        label: &str,
        target: &FutureHandle,
        method: &str,
        arguments: Vec<ParamValue>,
    ) -> Result<FutureHandle, DeploymentError> {
        let id = format!("{}#{}", self.module_name, label);
        self.declare(FutureSpecification::ContractCall(ContractCallSpecification {
            id,
            target: target.id.clone(),
            method: method.to_string(),
            expected_sender: self.sender.clone(),
            arguments,
        }))
    }

    pub fn read_call(
        &mut self,
        target: &FutureHandle,
        method: &str,
        arguments: Vec<ParamValue>,
    ) -> Result<FutureHandle, DeploymentError> {
        let id = format!(
            "{}#read-{}.{}",
            self.module_name,
            target.local_label(),
            method
        );
        self.declare(FutureSpecification::ReadOnlyCall(ReadOnlyCallSpecification {
            id,
            target: target.id.clone(),
            method: method.to_string(),
            arguments,
        }))
    }

    pub fn eth_transfer(
        &mut self,
        recipient: ParamValue,
        wei_amount: u128,
    ) -> Result<FutureHandle, DeploymentError> {
        let id = format!("{}#transfer-{}", self.module_name, self.future_ids.len());
        self.declare(FutureSpecification::EthTransfer(EthTransferSpecification {
            id,
            recipient,
            wei_amount,
            expected_sender: self.sender.clone(),
        }))
    }

    /// Merges a previously built module into this one. Shared future
    /// ids resolve to the single arena node declared when the child was
    /// first built. Returns the child's named outputs as handles.
    pub fn embed(
        &mut self,
        module: &ModuleSpecification,
    ) -> Result<BTreeMap<String, FutureHandle>, DeploymentError> {
        if self.ctx.modules.get(&module.name).is_none() {
            return Err(DeploymentError::DanglingReference {
                future_id: self.module_name.clone(),
                missing: module.name.clone(),
            });
        }
        if !self.embedded_modules.contains(&module.name) {
            self.embedded_modules.push(module.name.clone());
        }
        for future_id in module.future_ids.iter() {
            if !self.future_ids.contains(future_id) {
                self.future_ids.push(future_id.clone());
            }
        }
        Ok(module
            .outputs
            .iter()
            .map(|(output_name, future_id)| {
                (
                    output_name.clone(),
                    FutureHandle {
                        id: future_id.clone(),
                    },
                )
            })
            .collect())
    }

    fn declare(&mut self, spec: FutureSpecification) -> Result<FutureHandle, DeploymentError> {
        let id = spec.id().to_string();
        if self.ctx.futures.contains_key(&id) {
            return Err(DeploymentError::DuplicateFutureId(id));
        }
        self.ctx.futures.insert(id.clone(), spec);
        self.ctx.declaration_order.push(id.clone());
        self.future_ids.push(id.clone());
        Ok(FutureHandle { id })
    }
}
