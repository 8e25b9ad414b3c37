#[macro_use]
extern crate serde_derive;

pub mod artifacts;
pub mod builder;
pub mod journal;
pub mod onchain;
pub mod resolver;
pub mod types;

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, Sender};

use ember_files::{FileLocation, NetworkManifest};

use crate::artifacts::ArtifactSource;
use crate::builder::BuildContext;
use crate::journal::DeploymentJournal;
use crate::onchain::{ChainRpc, DeploymentCommand, DeploymentEvent};
use crate::types::{DeploymentError, DeploymentPlanSpecification, ModuleSpecification};

/// Journal location for a network, relative to the project root:
/// `deployments/<network>.journal.yaml`.
pub fn get_default_journal_location(
    project_root: &FileLocation,
    network: &str,
) -> Result<FileLocation, String> {
    let mut location = project_root.clone();
    location.append_path("deployments")?;
    location.append_path(&format!("{}.journal.yaml", network))?;
    Ok(location)
}

pub fn load_journal(
    project_root: &FileLocation,
    network: &str,
) -> Result<DeploymentJournal, DeploymentError> {
    let location = get_default_journal_location(project_root, network)
        .map_err(DeploymentError::Journal)?;
    DeploymentJournal::open(location, network)
}

/// Resolves a module into an ordered plan. All graph validation happens
/// here: unknown artifacts and duplicate ids surface while building,
/// cycles and dangling references while ordering. Nothing touches the
/// network.
pub fn generate_deployment_plan(
    ctx: &BuildContext,
    module: &ModuleSpecification,
    network: &str,
) -> Result<DeploymentPlanSpecification, DeploymentError> {
    let ordered_futures = resolver::resolve(ctx, module)?;
    let mut futures = vec![];
    for future_id in ordered_futures.iter() {
        match ctx.get_future(future_id) {
            Some(spec) => futures.push(spec.clone()),
            None => {
                return Err(DeploymentError::DanglingReference {
                    future_id: module.name.clone(),
                    missing: future_id.clone(),
                })
            }
        }
    }
    Ok(DeploymentPlanSpecification {
        name: module.name.clone(),
        network: network.to_string(),
        futures,
    })
}

/// Validates, orders and executes a module against a network. Futures
/// already confirmed in the journal are skipped, so re-running after a
/// partial failure resumes where the previous run stopped.
#[allow(clippy::too_many_arguments)]
pub fn execute_deployment(
    ctx: &BuildContext,
    module: &ModuleSpecification,
    artifacts: &dyn ArtifactSource,
    rpc: &dyn ChainRpc,
    journal: &mut DeploymentJournal,
    network_manifest: &NetworkManifest,
    deployment_event_tx: Sender<DeploymentEvent>,
    deployment_command_rx: Receiver<DeploymentCommand>,
) -> Result<BTreeMap<String, String>, DeploymentError> {
    let ordered_futures = resolver::resolve(ctx, module)?;
    onchain::apply_deployment(
        ctx,
        &ordered_futures,
        artifacts,
        rpc,
        journal,
        network_manifest,
        deployment_event_tx,
        deployment_command_rx,
    )
}
