use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, Sender};
use std::time::{Duration, Instant};

use ember_files::NetworkManifest;
use ember_rpc_client::{parse_quantity, to_quantity, EthRpc, TransactionRequest};
use sha3::{Digest, Keccak256};
use tracing::{debug, info};

use crate::artifacts::ArtifactSource;
use crate::builder::BuildContext;
use crate::journal::{DeploymentJournal, JournalEntry};
use crate::types::{DeploymentError, FutureSpecification, FutureStatus, ParamValue};

/// Confirmed-or-not view of a submitted transaction, as reported by the
/// node once mined.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub contract_address: Option<String>,
    pub success: bool,
    pub revert_reason: Option<String>,
}

/// Network surface consumed by the execution engine. Supplied by the
/// wire-protocol layer; mocked in tests.
pub trait ChainRpc {
    fn submit(&self, transaction: &TransactionRequest) -> Result<String, String>;
    fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, String>;
    fn block_number(&self) -> Result<u64, String>;
    fn call_readonly(&self, transaction: &TransactionRequest) -> Result<String, String>;
    fn transaction_count(&self, address: &str) -> Result<u64, String>;
}

impl ChainRpc for EthRpc {
    fn submit(&self, transaction: &TransactionRequest) -> Result<String, String> {
        self.send_transaction(transaction)
            .map_err(|e| format!("unable to post transaction\n{}", e))
    }

    fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, String> {
        let receipt = self
            .get_transaction_receipt(tx_hash)
            .map_err(|e| format!("unable to retrieve receipt\n{}", e))?;
        match receipt {
            Some(receipt) => {
                let block_number = parse_quantity(&receipt.block_number)
                    .map_err(|e| format!("unable to parse receipt\n{}", e))?;
                let success = receipt.status == "0x1";
                Ok(Some(Receipt {
                    tx_hash: receipt.transaction_hash,
                    block_number,
                    contract_address: receipt.contract_address,
                    success,
                    revert_reason: None,
                }))
            }
            None => Ok(None),
        }
    }

    fn block_number(&self) -> Result<u64, String> {
        EthRpc::block_number(self).map_err(|e| format!("unable to retrieve block height\n{}", e))
    }

    fn call_readonly(&self, transaction: &TransactionRequest) -> Result<String, String> {
        self.call(transaction)
            .map_err(|e| format!("unable to perform read-only call\n{}", e))
    }

    fn transaction_count(&self, address: &str) -> Result<u64, String> {
        self.get_transaction_count(address)
            .map_err(|e| format!("unable to retrieve account\n{}", e))
    }
}

#[derive(Clone, Debug)]
pub enum TransactionStatus {
    Queued,
    Submitted {
        tx_hash: String,
    },
    Confirmed {
        tx_hash: Option<String>,
        result: Option<String>,
    },
    Error(String),
}

#[derive(Clone, Debug)]
pub struct FutureTracker {
    pub index: usize,
    pub future_id: String,
    pub name: String,
    pub status: TransactionStatus,
}

#[derive(Clone, Debug)]
pub enum DeploymentEvent {
    FutureUpdate(FutureTracker),
    Interrupted(String),
    DeploymentCompleted,
}

pub enum DeploymentCommand {
    Start,
    Abort,
}

enum WaitOutcome {
    Confirmed(Receipt),
    Reverted(Receipt),
    TimedOut,
}

pub fn get_initial_futures_trackers(
    ctx: &BuildContext,
    ordered_futures: &[String],
) -> Vec<FutureTracker> {
    let mut trackers = vec![];
    for (index, future_id) in ordered_futures.iter().enumerate() {
        let name = match ctx.get_future(future_id) {
            Some(spec) => spec.describe(),
            None => future_id.clone(),
        };
        trackers.push(FutureTracker {
            index,
            future_id: future_id.clone(),
            name,
            status: TransactionStatus::Queued,
        });
    }
    trackers
}

/// Walks the resolved order, submitting each future that the journal
/// does not already hold as Confirmed, one at a time. Sequential
/// submission is required for correctness: later futures consume values
/// produced by earlier ones, and the sending account's nonces must be
/// allocated in order.
pub fn apply_deployment(
    ctx: &BuildContext,
    ordered_futures: &[String],
    artifacts: &dyn ArtifactSource,
    rpc: &dyn ChainRpc,
    journal: &mut DeploymentJournal,
    network_manifest: &NetworkManifest,
    deployment_event_tx: Sender<DeploymentEvent>,
    deployment_command_rx: Receiver<DeploymentCommand>,
) -> Result<BTreeMap<String, String>, DeploymentError> {
    let mut results: BTreeMap<String, String> = BTreeMap::new();
    let mut accounts_cached_nonces: BTreeMap<String, u64> = BTreeMap::new();

    let confirmations = network_manifest.network.confirmations as u64;
    let poll_delay = Duration::from_secs(network_manifest.network.poll_delay_secs);
    let confirmation_timeout =
        Duration::from_secs(network_manifest.network.confirmation_timeout_secs);

    match deployment_command_rx.recv() {
        Ok(DeploymentCommand::Start) => {}
        Ok(DeploymentCommand::Abort) | Err(_) => {
            let _ = deployment_event_tx
                .send(DeploymentEvent::Interrupted("deployment aborted".to_string()));
            return Ok(results);
        }
    }

    info!(
        network = %journal.network,
        futures = ordered_futures.len(),
        "starting deployment"
    );

    for (index, future_id) in ordered_futures.iter().enumerate() {
        // Graceful stop between futures; an in-flight confirmation is
        // never interrupted mid-bookkeeping.
        if let Ok(DeploymentCommand::Abort) = deployment_command_rx.try_recv() {
            let _ = deployment_event_tx
                .send(DeploymentEvent::Interrupted("deployment aborted".to_string()));
            return Ok(results);
        }

        let spec = match ctx.get_future(future_id) {
            Some(spec) => spec,
            None => {
                return Err(DeploymentError::DanglingReference {
                    future_id: future_id.clone(),
                    missing: future_id.clone(),
                })
            }
        };
        let mut tracker = FutureTracker {
            index,
            future_id: future_id.clone(),
            name: spec.describe(),
            status: TransactionStatus::Queued,
        };

        match journal.lookup(future_id).cloned() {
            Some(entry) if entry.status == FutureStatus::Confirmed => {
                debug!(future_id = %future_id, "already confirmed, skipping");
                if let Some(value) = &entry.result {
                    results.insert(future_id.clone(), value.clone());
                }
                tracker.status = TransactionStatus::Confirmed {
                    tx_hash: entry.tx_hash.clone(),
                    result: entry.result.clone(),
                };
                let _ = deployment_event_tx.send(DeploymentEvent::FutureUpdate(tracker));
                continue;
            }
            Some(JournalEntry {
                status: FutureStatus::Submitted,
                tx_hash: Some(tx_hash),
                ..
            }) => {
                // A prior run submitted this future but never saw it
                // confirm. Re-check the recorded hash before spending
                // fees on a resubmission.
                tracker.status = TransactionStatus::Submitted {
                    tx_hash: tx_hash.clone(),
                };
                let _ = deployment_event_tx.send(DeploymentEvent::FutureUpdate(tracker.clone()));
                match wait_for_confirmation(
                    rpc,
                    &tx_hash,
                    confirmations,
                    poll_delay,
                    confirmation_timeout,
                ) {
                    WaitOutcome::Confirmed(receipt) => {
                        finalize_confirmed(
                            spec,
                            &receipt,
                            journal,
                            &mut results,
                            &mut tracker,
                            &deployment_event_tx,
                        )?;
                        continue;
                    }
                    WaitOutcome::Reverted(receipt) => {
                        return finalize_reverted(
                            spec,
                            &receipt,
                            journal,
                            &mut tracker,
                            &deployment_event_tx,
                        );
                    }
                    WaitOutcome::TimedOut => {
                        let _ = deployment_event_tx.send(DeploymentEvent::Interrupted(format!(
                            "no confirmation for {} within the configured window",
                            future_id
                        )));
                        return Err(DeploymentError::ConfirmationTimeout {
                            future_id: future_id.clone(),
                            tx_hash,
                        });
                    }
                }
            }
            _ => {}
        }

        // Read-only calls resolve against the node without a
        // transaction; the value is journaled so re-runs reuse it.
        if let FutureSpecification::ReadOnlyCall(read_spec) = spec {
            let arguments = resolve_params(&read_spec.arguments, &results, future_id)?;
            let to = resolve_future_value(&results, &read_spec.target, future_id)?;
            let data = encode_call_data(&read_spec.method, &arguments)
                .map_err(|message| DeploymentError::Submission {
                    future_id: future_id.clone(),
                    message,
                })?;
            let request = TransactionRequest {
                to: Some(to),
                data: Some(data),
                ..Default::default()
            };
            let value =
                rpc.call_readonly(&request)
                    .map_err(|message| DeploymentError::Submission {
                        future_id: future_id.clone(),
                        message,
                    })?;
            journal.record(JournalEntry::new(
                future_id,
                FutureStatus::Confirmed,
                None,
                Some(value.clone()),
            ))?;
            results.insert(future_id.clone(), value.clone());
            tracker.status = TransactionStatus::Confirmed {
                tx_hash: None,
                result: Some(value),
            };
            let _ = deployment_event_tx.send(DeploymentEvent::FutureUpdate(tracker));
            continue;
        }

        let request = match encode_transaction_request(
            spec,
            artifacts,
            rpc,
            network_manifest,
            &results,
            &mut accounts_cached_nonces,
        ) {
            Ok(request) => request,
            Err(e) => {
                tracker.status = TransactionStatus::Error(e.to_string());
                let _ = deployment_event_tx.send(DeploymentEvent::FutureUpdate(tracker));
                let _ = deployment_event_tx.send(DeploymentEvent::Interrupted(e.to_string()));
                return Err(e);
            }
        };

        let tx_hash = match rpc.submit(&request) {
            Ok(tx_hash) => tx_hash,
            Err(message) => {
                let error = DeploymentError::Submission {
                    future_id: future_id.clone(),
                    message,
                };
                tracker.status = TransactionStatus::Error(error.to_string());
                let _ = deployment_event_tx.send(DeploymentEvent::FutureUpdate(tracker));
                let _ = deployment_event_tx.send(DeploymentEvent::Interrupted(error.to_string()));
                return Err(error);
            }
        };

        // Journaled before the wait so an aborted run resumes from the
        // submitted hash instead of double-spending.
        journal.record(JournalEntry::new(
            future_id,
            FutureStatus::Submitted,
            Some(tx_hash.clone()),
            None,
        ))?;
        tracker.status = TransactionStatus::Submitted {
            tx_hash: tx_hash.clone(),
        };
        let _ = deployment_event_tx.send(DeploymentEvent::FutureUpdate(tracker.clone()));

        match wait_for_confirmation(rpc, &tx_hash, confirmations, poll_delay, confirmation_timeout)
        {
            WaitOutcome::Confirmed(receipt) => {
                finalize_confirmed(
                    spec,
                    &receipt,
                    journal,
                    &mut results,
                    &mut tracker,
                    &deployment_event_tx,
                )?;
            }
            WaitOutcome::Reverted(receipt) => {
                return finalize_reverted(spec, &receipt, journal, &mut tracker, &deployment_event_tx);
            }
            WaitOutcome::TimedOut => {
                let _ = deployment_event_tx.send(DeploymentEvent::Interrupted(format!(
                    "no confirmation for {} within the configured window",
                    future_id
                )));
                return Err(DeploymentError::ConfirmationTimeout {
                    future_id: future_id.clone(),
                    tx_hash,
                });
            }
        }
    }

    let _ = deployment_event_tx.send(DeploymentEvent::DeploymentCompleted);
    Ok(results)
}

fn finalize_confirmed(
    spec: &FutureSpecification,
    receipt: &Receipt,
    journal: &mut DeploymentJournal,
    results: &mut BTreeMap<String, String>,
    tracker: &mut FutureTracker,
    deployment_event_tx: &Sender<DeploymentEvent>,
) -> Result<(), DeploymentError> {
    let future_id = spec.id().to_string();
    let value = match spec {
        FutureSpecification::ContractDeploy(_) => match &receipt.contract_address {
            Some(address) => address.clone(),
            None => {
                return Err(DeploymentError::Submission {
                    future_id,
                    message: "receipt carries no contract address".to_string(),
                })
            }
        },
        _ => receipt.tx_hash.clone(),
    };
    journal.record(JournalEntry::new(
        &future_id,
        FutureStatus::Confirmed,
        Some(receipt.tx_hash.clone()),
        Some(value.clone()),
    ))?;
    results.insert(future_id, value.clone());
    tracker.status = TransactionStatus::Confirmed {
        tx_hash: Some(receipt.tx_hash.clone()),
        result: Some(value),
    };
    let _ = deployment_event_tx.send(DeploymentEvent::FutureUpdate(tracker.clone()));
    Ok(())
}

fn finalize_reverted(
    spec: &FutureSpecification,
    receipt: &Receipt,
    journal: &mut DeploymentJournal,
    tracker: &mut FutureTracker,
    deployment_event_tx: &Sender<DeploymentEvent>,
) -> Result<BTreeMap<String, String>, DeploymentError> {
    let future_id = spec.id().to_string();
    let reason = receipt
        .revert_reason
        .clone()
        .unwrap_or_else(|| "transaction reverted".to_string());
    journal.record(JournalEntry::new(
        &future_id,
        FutureStatus::Failed,
        Some(receipt.tx_hash.clone()),
        None,
    ))?;
    let error = DeploymentError::Revert {
        future_id,
        reason,
    };
    tracker.status = TransactionStatus::Error(error.to_string());
    let _ = deployment_event_tx.send(DeploymentEvent::FutureUpdate(tracker.clone()));
    let _ = deployment_event_tx.send(DeploymentEvent::Interrupted(error.to_string()));
    Err(error)
}

/// The single suspension point: polls the node for a receipt, then for
/// the configured number of block confirmations on top of it. Transient
/// rpc failures are retried until the window closes.
fn wait_for_confirmation(
    rpc: &dyn ChainRpc,
    tx_hash: &str,
    confirmations: u64,
    poll_delay: Duration,
    confirmation_timeout: Duration,
) -> WaitOutcome {
    let started_at = Instant::now();
    loop {
        match rpc.get_receipt(tx_hash) {
            Ok(Some(receipt)) => {
                if !receipt.success {
                    return WaitOutcome::Reverted(receipt);
                }
                match rpc.block_number() {
                    Ok(tip) if tip + 1 >= receipt.block_number + confirmations => {
                        return WaitOutcome::Confirmed(receipt);
                    }
                    _ => {}
                }
            }
            Ok(None) | Err(_) => {}
        }
        if started_at.elapsed() >= confirmation_timeout {
            return WaitOutcome::TimedOut;
        }
        std::thread::sleep(poll_delay);
    }
}

fn resolve_future_value(
    results: &BTreeMap<String, String>,
    referenced_id: &str,
    future_id: &str,
) -> Result<String, DeploymentError> {
    match results.get(referenced_id) {
        Some(value) => Ok(value.clone()),
        None => Err(DeploymentError::Submission {
            future_id: future_id.to_string(),
            message: format!("dependency '{}' has no resolved value", referenced_id),
        }),
    }
}

fn resolve_params(
    params: &[ParamValue],
    results: &BTreeMap<String, String>,
    future_id: &str,
) -> Result<Vec<serde_json::Value>, DeploymentError> {
    let mut resolved = vec![];
    for param in params.iter() {
        let value = match param {
            ParamValue::Literal(value) => value.clone(),
            ParamValue::FutureRef(referenced_id) => serde_json::Value::String(
                resolve_future_value(results, referenced_id, future_id)?,
            ),
        };
        resolved.push(value);
    }
    Ok(resolved)
}

fn encode_transaction_request(
    spec: &FutureSpecification,
    artifacts: &dyn ArtifactSource,
    rpc: &dyn ChainRpc,
    network_manifest: &NetworkManifest,
    results: &BTreeMap<String, String>,
    accounts_cached_nonces: &mut BTreeMap<String, u64>,
) -> Result<TransactionRequest, DeploymentError> {
    let future_id = spec.id().to_string();

    let sender_label = match spec {
        FutureSpecification::ContractDeploy(spec) => &spec.expected_sender,
        FutureSpecification::ContractCall(spec) => &spec.expected_sender,
        FutureSpecification::EthTransfer(spec) => &spec.expected_sender,
        FutureSpecification::ReadOnlyCall(_) => unreachable!("read-only calls are not submitted"),
    };
    let account = match network_manifest.accounts.get(sender_label) {
        Some(account) => account,
        None => {
            return Err(DeploymentError::Submission {
                future_id,
                message: format!("unable to retrieve account '{}'", sender_label),
            })
        }
    };

    let nonce = match accounts_cached_nonces.get(&account.address) {
        Some(cached_nonce) => *cached_nonce,
        None => rpc
            .transaction_count(&account.address)
            .map_err(|message| DeploymentError::Submission {
                future_id: future_id.clone(),
                message,
            })?,
    };
    accounts_cached_nonces.insert(account.address.clone(), nonce + 1);

    let mut request = TransactionRequest {
        from: Some(account.address.clone()),
        nonce: Some(to_quantity(nonce)),
        ..Default::default()
    };

    match spec {
        FutureSpecification::ContractDeploy(deploy_spec) => {
            let artifact = artifacts.get_artifact(&deploy_spec.contract_name)?;
            let constructor_args =
                resolve_params(&deploy_spec.constructor_args, results, &future_id)?;
            let data = encode_deploy_data(&artifact.bytecode, &constructor_args).map_err(
                |message| DeploymentError::Submission {
                    future_id: future_id.clone(),
                    message,
                },
            )?;
            request.data = Some(data);
        }
        FutureSpecification::ContractCall(call_spec) => {
            let arguments = resolve_params(&call_spec.arguments, results, &future_id)?;
            let to = resolve_future_value(results, &call_spec.target, &future_id)?;
            let data = encode_call_data(&call_spec.method, &arguments).map_err(|message| {
                DeploymentError::Submission {
                    future_id: future_id.clone(),
                    message,
                }
            })?;
            request.to = Some(to);
            request.data = Some(data);
        }
        FutureSpecification::EthTransfer(transfer_spec) => {
            let recipient = match &transfer_spec.recipient {
                ParamValue::Literal(serde_json::Value::String(address)) => address.clone(),
                ParamValue::Literal(_) => {
                    return Err(DeploymentError::Submission {
                        future_id,
                        message: "transfer recipient must be an address".to_string(),
                    })
                }
                ParamValue::FutureRef(referenced_id) => {
                    resolve_future_value(results, referenced_id, &future_id)?
                }
            };
            request.to = Some(recipient);
            request.value = Some(format!("0x{:x}", transfer_spec.wei_amount));
        }
        FutureSpecification::ReadOnlyCall(_) => unreachable!("read-only calls are not submitted"),
    }

    Ok(request)
}

// ABI plumbing for value-typed arguments (addresses, uints, bools,
// fixed bytes). Dynamic types belong to the compiler pipeline, not the
// orchestrator, and are rejected.

fn abi_type_of(value: &serde_json::Value) -> Result<&'static str, String> {
    match value {
        serde_json::Value::String(s) if s.starts_with("0x") && s.len() == 42 => Ok("address"),
        serde_json::Value::String(s) if s.starts_with("0x") => Ok("bytes32"),
        serde_json::Value::Number(n) if n.is_u64() => Ok("uint256"),
        serde_json::Value::Bool(_) => Ok("bool"),
        other => Err(format!("unsupported argument '{}'", other)),
    }
}

fn encode_word(value: &serde_json::Value) -> Result<Vec<u8>, String> {
    let mut word = vec![0u8; 32];
    match value {
        serde_json::Value::String(s) if s.starts_with("0x") => {
            let bytes = hex::decode(&s[2..])
                .map_err(|_| format!("unable to parse '{}' as hex bytes", s))?;
            if bytes.len() > 32 {
                return Err(format!("argument '{}' exceeds 32 bytes", s));
            }
            word[32 - bytes.len()..].copy_from_slice(&bytes);
        }
        serde_json::Value::Number(n) => {
            let n = n
                .as_u64()
                .ok_or(format!("unable to encode '{}' as a uint256", n))?;
            word[24..].copy_from_slice(&n.to_be_bytes());
        }
        serde_json::Value::Bool(b) => {
            word[31] = *b as u8;
        }
        other => return Err(format!("unsupported argument '{}'", other)),
    }
    Ok(word)
}

fn encode_arguments(arguments: &[serde_json::Value]) -> Result<String, String> {
    let mut encoded = String::new();
    for argument in arguments.iter() {
        encoded.push_str(&hex::encode(encode_word(argument)?));
    }
    Ok(encoded)
}

fn encode_deploy_data(
    bytecode: &str,
    constructor_args: &[serde_json::Value],
) -> Result<String, String> {
    let bytecode = bytecode.strip_prefix("0x").unwrap_or(bytecode);
    Ok(format!(
        "0x{}{}",
        bytecode,
        encode_arguments(constructor_args)?
    ))
}

fn encode_call_data(method: &str, arguments: &[serde_json::Value]) -> Result<String, String> {
    let mut argument_types = vec![];
    for argument in arguments.iter() {
        argument_types.push(abi_type_of(argument)?);
    }
    let signature = format!("{}({})", method, argument_types.join(","));
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    let selector = hasher.finalize();
    Ok(format!(
        "0x{}{}",
        hex::encode(&selector[..4]),
        encode_arguments(arguments)?
    ))
}
