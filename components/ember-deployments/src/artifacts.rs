use std::collections::BTreeMap;

use ember_files::FileLocation;

use crate::types::DeploymentError;

/// Compiled contract artifact, as produced by the compilation pipeline.
/// Immutable once loaded; the orchestrator only reads it.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    pub abi: serde_json::Value,
    pub bytecode: String,
}

pub trait ArtifactSource {
    fn get_artifact(&self, contract_name: &str) -> Result<Artifact, DeploymentError>;
}

/// Artifact registry backed by a directory of `<name>.json` files.
pub struct DirectoryArtifacts {
    pub base_location: FileLocation,
}

impl DirectoryArtifacts {
    pub fn new(base_location: FileLocation) -> Self {
        Self { base_location }
    }
}

impl ArtifactSource for DirectoryArtifacts {
    fn get_artifact(&self, contract_name: &str) -> Result<Artifact, DeploymentError> {
        let mut artifact_location = self.base_location.clone();
        artifact_location
            .append_path(&format!("{}.json", contract_name))
            .map_err(|_| DeploymentError::UnknownArtifact(contract_name.to_string()))?;
        let content = artifact_location
            .read_content()
            .map_err(|_| DeploymentError::UnknownArtifact(contract_name.to_string()))?;
        let artifact: Artifact = serde_json::from_slice(&content[..])
            .map_err(|_| DeploymentError::UnknownArtifact(contract_name.to_string()))?;
        Ok(artifact)
    }
}

/// In-memory registry, used by tests and embedding tools that already
/// hold compilation output.
#[derive(Debug, Clone, Default)]
pub struct StaticArtifacts {
    artifacts: BTreeMap<String, Artifact>,
}

impl StaticArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts
            .insert(artifact.contract_name.clone(), artifact);
    }
}

impl ArtifactSource for StaticArtifacts {
    fn get_artifact(&self, contract_name: &str) -> Result<Artifact, DeploymentError> {
        match self.artifacts.get(contract_name) {
            Some(artifact) => Ok(artifact.clone()),
            None => Err(DeploymentError::UnknownArtifact(contract_name.to_string())),
        }
    }
}
