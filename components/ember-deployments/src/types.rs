use std::collections::BTreeSet;
use std::fmt;

use ember_files::FileLocation;

/// A constructor or call argument: either a literal value, or a
/// reference to the resolved value of another future. References are
/// substituted explicitly by the execution engine, never inferred from
/// the value's runtime shape.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamValue {
    Literal(serde_json::Value),
    FutureRef(String),
}

impl ParamValue {
    pub fn literal_str(value: &str) -> ParamValue {
        ParamValue::Literal(serde_json::Value::String(value.to_string()))
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FutureStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, PartialEq, Clone)]
pub enum FutureSpecification {
    ContractDeploy(ContractDeploySpecification),
    ContractCall(ContractCallSpecification),
    ReadOnlyCall(ReadOnlyCallSpecification),
    EthTransfer(EthTransferSpecification),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ContractDeploySpecification {
    pub id: String,
    pub contract_name: String,
    pub expected_sender: String,
    pub constructor_args: Vec<ParamValue>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ContractCallSpecification {
    pub id: String,
    pub target: String,
    pub method: String,
    pub expected_sender: String,
    pub arguments: Vec<ParamValue>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ReadOnlyCallSpecification {
    pub id: String,
    pub target: String,
    pub method: String,
    pub arguments: Vec<ParamValue>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct EthTransferSpecification {
    pub id: String,
    pub recipient: ParamValue,
    pub wei_amount: u128,
    pub expected_sender: String,
}

impl FutureSpecification {
    pub fn id(&self) -> &str {
        match self {
            FutureSpecification::ContractDeploy(spec) => &spec.id,
            FutureSpecification::ContractCall(spec) => &spec.id,
            FutureSpecification::ReadOnlyCall(spec) => &spec.id,
            FutureSpecification::EthTransfer(spec) => &spec.id,
        }
    }

    /// Future ids this future's arguments (or call target) reference.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        let collect = |deps: &mut BTreeSet<String>, params: &[ParamValue]| {
            for param in params.iter() {
                if let ParamValue::FutureRef(id) = param {
                    deps.insert(id.clone());
                }
            }
        };
        match self {
            FutureSpecification::ContractDeploy(spec) => {
                collect(&mut deps, &spec.constructor_args);
            }
            FutureSpecification::ContractCall(spec) => {
                deps.insert(spec.target.clone());
                collect(&mut deps, &spec.arguments);
            }
            FutureSpecification::ReadOnlyCall(spec) => {
                deps.insert(spec.target.clone());
                collect(&mut deps, &spec.arguments);
            }
            FutureSpecification::EthTransfer(spec) => {
                if let ParamValue::FutureRef(id) = &spec.recipient {
                    deps.insert(id.clone());
                }
            }
        }
        deps
    }

    pub fn describe(&self) -> String {
        match self {
            FutureSpecification::ContractDeploy(spec) => {
                format!("Deploy {}", spec.contract_name)
            }
            FutureSpecification::ContractCall(spec) => {
                format!("Call {}::{}", spec.target, spec.method)
            }
            FutureSpecification::ReadOnlyCall(spec) => {
                format!("Read {}::{}", spec.target, spec.method)
            }
            FutureSpecification::EthTransfer(spec) => {
                format!("Transfer {} wei", spec.wei_amount)
            }
        }
    }
}

/// A named, immutable bundle of future declarations. Modules hold ids
/// into the build context's arena, so embedding the same sub-module
/// from two parents shares futures instead of re-declaring them.
#[derive(Debug, PartialEq, Clone)]
pub struct ModuleSpecification {
    pub name: String,
    pub future_ids: Vec<String>,
    pub embedded_modules: Vec<String>,
    pub outputs: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct DeploymentPlanSpecification {
    pub name: String,
    pub network: String,
    pub futures: Vec<FutureSpecification>,
}

impl DeploymentPlanSpecification {
    pub fn from_config_file(
        plan_location: &FileLocation,
    ) -> Result<DeploymentPlanSpecification, String> {
        let plan_file_content = plan_location.read_content()?;
        let specification_file: DeploymentPlanSpecificationFile =
            match serde_yaml::from_slice(&plan_file_content[..]) {
                Ok(res) => res,
                Err(msg) => return Err(format!("unable to read file {}", msg)),
            };
        DeploymentPlanSpecification::from_specifications(&specification_file)
    }

    pub fn from_specifications(
        specs: &DeploymentPlanSpecificationFile,
    ) -> Result<DeploymentPlanSpecification, String> {
        let mut futures = vec![];
        for future in specs.futures.iter() {
            let future = match future {
                FutureSpecificationFile::ContractDeploy(spec) => {
                    FutureSpecification::ContractDeploy(
                        ContractDeploySpecification::from_specifications(spec)?,
                    )
                }
                FutureSpecificationFile::ContractCall(spec) => FutureSpecification::ContractCall(
                    ContractCallSpecification::from_specifications(spec)?,
                ),
                FutureSpecificationFile::ReadOnlyCall(spec) => FutureSpecification::ReadOnlyCall(
                    ReadOnlyCallSpecification::from_specifications(spec)?,
                ),
                FutureSpecificationFile::EthTransfer(spec) => FutureSpecification::EthTransfer(
                    EthTransferSpecification::from_specifications(spec)?,
                ),
            };
            futures.push(future);
        }
        Ok(DeploymentPlanSpecification {
            name: specs.name.clone(),
            network: specs.network.clone(),
            futures,
        })
    }

    pub fn to_specification_file(&self) -> DeploymentPlanSpecificationFile {
        let mut futures = vec![];
        for future in self.futures.iter() {
            let future = match future {
                FutureSpecification::ContractDeploy(spec) => {
                    FutureSpecificationFile::ContractDeploy(ContractDeploySpecificationFile {
                        id: spec.id.clone(),
                        contract_name: spec.contract_name.clone(),
                        expected_sender: spec.expected_sender.clone(),
                        constructor_args: spec.constructor_args.clone(),
                    })
                }
                FutureSpecification::ContractCall(spec) => {
                    FutureSpecificationFile::ContractCall(ContractCallSpecificationFile {
                        id: spec.id.clone(),
                        target: spec.target.clone(),
                        method: spec.method.clone(),
                        expected_sender: spec.expected_sender.clone(),
                        arguments: spec.arguments.clone(),
                    })
                }
                FutureSpecification::ReadOnlyCall(spec) => {
                    FutureSpecificationFile::ReadOnlyCall(ReadOnlyCallSpecificationFile {
                        id: spec.id.clone(),
                        target: spec.target.clone(),
                        method: spec.method.clone(),
                        arguments: spec.arguments.clone(),
                    })
                }
                FutureSpecification::EthTransfer(spec) => {
                    FutureSpecificationFile::EthTransfer(EthTransferSpecificationFile {
                        id: spec.id.clone(),
                        recipient: spec.recipient.clone(),
                        wei_amount: format!("{}", spec.wei_amount),
                        expected_sender: spec.expected_sender.clone(),
                    })
                }
            };
            futures.push(future);
        }
        DeploymentPlanSpecificationFile {
            name: self.name.clone(),
            network: self.network.clone(),
            futures,
        }
    }

    pub fn write_to_location(&self, location: &FileLocation) -> Result<(), String> {
        let file = self.to_specification_file();
        let content = serde_yaml::to_string(&file)
            .map_err(|e| format!("unable to serialize deployment plan\n{}", e))?;
        location.write_content(content.as_bytes())
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeploymentPlanSpecificationFile {
    pub name: String,
    pub network: String,
    pub futures: Vec<FutureSpecificationFile>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FutureSpecificationFile {
    ContractDeploy(ContractDeploySpecificationFile),
    ContractCall(ContractCallSpecificationFile),
    ReadOnlyCall(ReadOnlyCallSpecificationFile),
    EthTransfer(EthTransferSpecificationFile),
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContractDeploySpecificationFile {
    pub id: String,
    pub contract_name: String,
    pub expected_sender: String,
    pub constructor_args: Vec<ParamValue>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContractCallSpecificationFile {
    pub id: String,
    pub target: String,
    pub method: String,
    pub expected_sender: String,
    pub arguments: Vec<ParamValue>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReadOnlyCallSpecificationFile {
    pub id: String,
    pub target: String,
    pub method: String,
    pub arguments: Vec<ParamValue>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EthTransferSpecificationFile {
    pub id: String,
    pub recipient: ParamValue,
    pub wei_amount: String,
    pub expected_sender: String,
}

fn check_future_id(id: &str) -> Result<(), String> {
    match id.split_once('#') {
        Some((module, label)) if !module.is_empty() && !label.is_empty() => Ok(()),
        _ => Err(format!(
            "unable to parse '{}' as a valid future id (expected 'module#label')",
            id
        )),
    }
}

impl ContractDeploySpecification {
    pub fn from_specifications(
        specs: &ContractDeploySpecificationFile,
    ) -> Result<ContractDeploySpecification, String> {
        check_future_id(&specs.id)?;
        Ok(ContractDeploySpecification {
            id: specs.id.clone(),
            contract_name: specs.contract_name.clone(),
            expected_sender: specs.expected_sender.clone(),
            constructor_args: specs.constructor_args.clone(),
        })
    }
}

impl ContractCallSpecification {
    pub fn from_specifications(
        specs: &ContractCallSpecificationFile,
    ) -> Result<ContractCallSpecification, String> {
        check_future_id(&specs.id)?;
        check_future_id(&specs.target)?;
        Ok(ContractCallSpecification {
            id: specs.id.clone(),
            target: specs.target.clone(),
            method: specs.method.clone(),
            expected_sender: specs.expected_sender.clone(),
            arguments: specs.arguments.clone(),
        })
    }
}

impl ReadOnlyCallSpecification {
    pub fn from_specifications(
        specs: &ReadOnlyCallSpecificationFile,
    ) -> Result<ReadOnlyCallSpecification, String> {
        check_future_id(&specs.id)?;
        check_future_id(&specs.target)?;
        Ok(ReadOnlyCallSpecification {
            id: specs.id.clone(),
            target: specs.target.clone(),
            method: specs.method.clone(),
            arguments: specs.arguments.clone(),
        })
    }
}

impl EthTransferSpecification {
    pub fn from_specifications(
        specs: &EthTransferSpecificationFile,
    ) -> Result<EthTransferSpecification, String> {
        check_future_id(&specs.id)?;
        let wei_amount = match u128::from_str_radix(&specs.wei_amount, 10) {
            Ok(res) => res,
            Err(_) => {
                return Err(format!(
                    "unable to parse {}'s amount as a u128",
                    specs.id
                ))
            }
        };
        Ok(EthTransferSpecification {
            id: specs.id.clone(),
            recipient: specs.recipient.clone(),
            wei_amount,
            expected_sender: specs.expected_sender.clone(),
        })
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum DeploymentError {
    UnknownArtifact(String),
    DuplicateFutureId(String),
    CyclicDependency(Vec<String>),
    DanglingReference { future_id: String, missing: String },
    Submission { future_id: String, message: String },
    ConfirmationTimeout { future_id: String, tx_hash: String },
    Revert { future_id: String, reason: String },
    Journal(String),
}

impl fmt::Display for DeploymentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeploymentError::UnknownArtifact(name) => {
                write!(f, "unable to resolve artifact '{}'", name)
            }
            DeploymentError::DuplicateFutureId(id) => {
                write!(f, "duplicated future id '{}'", id)
            }
            DeploymentError::CyclicDependency(ids) => {
                write!(f, "cyclic dependency involving futures {}", ids.join(", "))
            }
            DeploymentError::DanglingReference { future_id, missing } => {
                write!(
                    f,
                    "future '{}' references '{}', absent from the deployment graph",
                    future_id, missing
                )
            }
            DeploymentError::Submission { future_id, message } => {
                write!(f, "unable to submit future '{}'\n{}", future_id, message)
            }
            DeploymentError::ConfirmationTimeout { future_id, tx_hash } => {
                write!(
                    f,
                    "no confirmation for future '{}' (tx {}) within the configured window",
                    future_id, tx_hash
                )
            }
            DeploymentError::Revert { future_id, reason } => {
                write!(f, "future '{}' reverted: {}", future_id, reason)
            }
            DeploymentError::Journal(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for DeploymentError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plan_files() {
        let plan: DeploymentPlanSpecificationFile = serde_yaml::from_str(
            r#"
name: Payments
network: testnet
futures:
  - contract-deploy:
      id: "Payments#Token"
      contract-name: Token
      expected-sender: deployer
      constructor-args:
        - literal: 1000
  - contract-call:
      id: "Payments#Token.transfer"
      target: "Payments#Token"
      method: transfer
      expected-sender: deployer
      arguments:
        - future-ref: "Payments#Token"
"#,
        )
        .unwrap();
        let plan = DeploymentPlanSpecification::from_specifications(&plan).unwrap();
        assert_eq!(plan.futures.len(), 2);
        assert_eq!(plan.futures[0].id(), "Payments#Token");
        let deps = plan.futures[1].dependencies();
        assert!(deps.contains("Payments#Token"));
    }

    #[test]
    fn rejects_malformed_future_ids() {
        assert!(check_future_id("Payments#Token").is_ok());
        assert!(check_future_id("Token").is_err());
        assert!(check_future_id("#Token").is_err());
        assert!(check_future_id("Payments#").is_err());
    }

    #[test]
    fn parses_transfer_amounts_as_u128() {
        let file = EthTransferSpecificationFile {
            id: "Fund#transfer-0".to_string(),
            recipient: ParamValue::literal_str("0x0000000000000000000000000000000000000001"),
            wei_amount: "340282366920938463463374607431768211455".to_string(),
            expected_sender: "deployer".to_string(),
        };
        let spec = EthTransferSpecification::from_specifications(&file).unwrap();
        assert_eq!(spec.wei_amount, u128::MAX);

        let file = EthTransferSpecificationFile {
            wei_amount: "not-a-number".to_string(),
            ..file
        };
        assert!(EthTransferSpecification::from_specifications(&file).is_err());
    }

    #[test]
    fn plan_files_round_trip_through_the_runtime_form() {
        let plan = DeploymentPlanSpecification {
            name: "Fund".to_string(),
            network: "local".to_string(),
            futures: vec![FutureSpecification::EthTransfer(EthTransferSpecification {
                id: "Fund#transfer-0".to_string(),
                recipient: ParamValue::FutureRef("Fund#Treasury".to_string()),
                wei_amount: 1_000,
                expected_sender: "deployer".to_string(),
            })],
        };
        let reloaded =
            DeploymentPlanSpecification::from_specifications(&plan.to_specification_file())
                .unwrap();
        assert_eq!(plan, reloaded);
    }
}
