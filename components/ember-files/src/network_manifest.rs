use std::collections::BTreeMap;

use toml::value::Value;
use url::Url;

use super::FileLocation;

pub const DEFAULT_DEPLOYER_LABEL: &str = "deployer";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545";
pub const DEFAULT_CONFIRMATIONS: u32 = 1;
pub const DEFAULT_POLL_DELAY_SECS: u64 = 10;
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvmNetwork {
    Local,
    Testnet,
    Mainnet,
}

impl EvmNetwork {
    pub fn from_str(network: &str) -> Result<EvmNetwork, String> {
        match network.to_lowercase().as_str() {
            "local" => Ok(EvmNetwork::Local),
            "testnet" => Ok(EvmNetwork::Testnet),
            "mainnet" => Ok(EvmNetwork::Mainnet),
            _ => Err(format!(
                "network '{}' not supported (local, testnet, mainnet)",
                network
            )),
        }
    }

    pub fn is_mainnet(&self) -> bool {
        matches!(self, EvmNetwork::Mainnet)
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct NetworkManifestFile {
    pub network: NetworkConfigFile,
    pub accounts: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfigFile {
    pub name: String,
    pub kind: Option<String>,
    pub rpc_url: Option<String>,
    pub rpc_url_env: Option<String>,
    pub chain_id: Option<u64>,
    pub confirmations: Option<u32>,
    pub poll_delay_secs: Option<u64>,
    pub confirmation_timeout_secs: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub name: String,
    pub kind: EvmNetwork,
    pub rpc_url: String,
    pub chain_id: Option<u64>,
    pub confirmations: u32,
    pub poll_delay_secs: u64,
    pub confirmation_timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccountConfig {
    pub label: String,
    pub address: String,
    pub private_key_env: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkManifest {
    pub network: NetworkConfig,
    pub accounts: BTreeMap<String, AccountConfig>,
}

/// Reads a secret through environment indirection. Manifests carry the
/// name of a variable, never the secret itself.
pub fn resolve_env_secret(env_var: &str) -> Result<String, String> {
    match std::env::var(env_var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(format!(
            "environment variable '{}' is not set - secrets are never read from manifests",
            env_var
        )),
    }
}

impl NetworkManifest {
    pub fn from_location(location: &FileLocation) -> Result<NetworkManifest, String> {
        let network_manifest_file_content = location.read_content()?;
        let network_manifest_file: NetworkManifestFile =
            toml::from_slice(&network_manifest_file_content[..])
                .map_err(|e| format!("unable to read network manifest\n{}", e))?;
        NetworkManifest::from_network_manifest_file(network_manifest_file)
    }

    pub fn from_network_manifest_file(
        network_manifest_file: NetworkManifestFile,
    ) -> Result<NetworkManifest, String> {
        let kind = match network_manifest_file.network.kind {
            Some(ref kind) => EvmNetwork::from_str(kind)?,
            None => EvmNetwork::Local,
        };

        let rpc_url = match (
            &network_manifest_file.network.rpc_url,
            &network_manifest_file.network.rpc_url_env,
        ) {
            (_, Some(env_var)) => resolve_env_secret(env_var)?,
            (Some(url), None) => url.clone(),
            (None, None) => DEFAULT_LOCAL_RPC_URL.to_string(),
        };
        let _ = Url::parse(&rpc_url)
            .map_err(|e| format!("unable to parse rpc url {}\n{:?}", rpc_url, e))?;

        let network = NetworkConfig {
            name: network_manifest_file.network.name.clone(),
            kind,
            rpc_url,
            chain_id: network_manifest_file.network.chain_id,
            confirmations: network_manifest_file
                .network
                .confirmations
                .unwrap_or(DEFAULT_CONFIRMATIONS),
            poll_delay_secs: network_manifest_file
                .network
                .poll_delay_secs
                .unwrap_or(DEFAULT_POLL_DELAY_SECS),
            confirmation_timeout_secs: network_manifest_file
                .network
                .confirmation_timeout_secs
                .unwrap_or(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
        };

        let mut accounts = BTreeMap::new();
        if let Some(Value::Table(entries)) = &network_manifest_file.accounts {
            for (account_name, account_settings) in entries.iter() {
                if let Value::Table(account_settings) = account_settings {
                    if account_settings.contains_key("private_key")
                        || account_settings.contains_key("private-key")
                    {
                        return Err(format!(
                            "account '{}' embeds a private key in the manifest - use 'private-key-env' instead",
                            account_name
                        ));
                    }

                    let address = match account_settings.get("address") {
                        Some(Value::String(address)) => address.clone(),
                        _ => {
                            return Err(format!(
                                "unable to retrieve address for account '{}'",
                                account_name
                            ))
                        }
                    };

                    // Kebab-case like the [network] section; the
                    // snake_case form is accepted as well.
                    let private_key_env = match account_settings
                        .get("private-key-env")
                        .or_else(|| account_settings.get("private_key_env"))
                    {
                        Some(Value::String(env_var)) => {
                            // Fail at load time rather than mid-deployment.
                            let _ = resolve_env_secret(env_var)?;
                            Some(env_var.clone())
                        }
                        _ => None,
                    };

                    accounts.insert(
                        account_name.to_string(),
                        AccountConfig {
                            label: account_name.to_string(),
                            address,
                            private_key_env,
                        },
                    );
                }
            }
        };

        Ok(NetworkManifest { network, accounts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_from_str(content: &str) -> Result<NetworkManifest, String> {
        let file: NetworkManifestFile = toml::from_str(content).unwrap();
        NetworkManifest::from_network_manifest_file(file)
    }

    #[test]
    fn parses_network_manifest_with_defaults() {
        let manifest = manifest_from_str(
            r#"
            [network]
            name = "local"

            [accounts.deployer]
            address = "0xC549EcF0d9D72eAc5d806Ca25545A82A6BBe8BD1"
            "#,
        )
        .unwrap();

        assert_eq!(manifest.network.rpc_url, DEFAULT_LOCAL_RPC_URL);
        assert_eq!(manifest.network.kind, EvmNetwork::Local);
        assert_eq!(manifest.network.confirmations, DEFAULT_CONFIRMATIONS);
        let deployer = manifest.accounts.get(DEFAULT_DEPLOYER_LABEL).unwrap();
        assert_eq!(
            deployer.address,
            "0xC549EcF0d9D72eAc5d806Ca25545A82A6BBe8BD1"
        );
        assert_eq!(deployer.private_key_env, None);
    }

    #[test]
    fn rejects_embedded_private_keys() {
        let err = manifest_from_str(
            r#"
            [network]
            name = "testnet"
            kind = "testnet"
            rpc-url = "https://rpc.example.com"

            [accounts.deployer]
            address = "0xC549EcF0d9D72eAc5d806Ca25545A82A6BBe8BD1"
            private_key = "0x8f5c4eacb3ee8bf077b047a96f0f268cb5217a884e32d5242bbe234eefad4202"
            "#,
        )
        .unwrap_err();
        assert!(err.contains("private-key-env"));
    }

    #[test]
    fn accepts_kebab_case_account_keys() {
        std::env::set_var("EMBER_TEST_DEPLOYER_KEY", "0xsecret");
        let manifest = manifest_from_str(
            r#"
            [network]
            name = "testnet"
            kind = "testnet"
            rpc-url = "https://rpc.example.com"

            [accounts.deployer]
            address = "0xC549EcF0d9D72eAc5d806Ca25545A82A6BBe8BD1"
            private-key-env = "EMBER_TEST_DEPLOYER_KEY"
            "#,
        )
        .unwrap();
        let deployer = manifest.accounts.get(DEFAULT_DEPLOYER_LABEL).unwrap();
        assert_eq!(
            deployer.private_key_env,
            Some("EMBER_TEST_DEPLOYER_KEY".to_string())
        );

        // The snake_case form keeps working.
        let manifest = manifest_from_str(
            r#"
            [network]
            name = "testnet"
            kind = "testnet"
            rpc-url = "https://rpc.example.com"

            [accounts.deployer]
            address = "0xC549EcF0d9D72eAc5d806Ca25545A82A6BBe8BD1"
            private_key_env = "EMBER_TEST_DEPLOYER_KEY"
            "#,
        )
        .unwrap();
        let deployer = manifest.accounts.get(DEFAULT_DEPLOYER_LABEL).unwrap();
        assert_eq!(
            deployer.private_key_env,
            Some("EMBER_TEST_DEPLOYER_KEY".to_string())
        );
    }

    #[test]
    fn resolves_rpc_url_through_environment() {
        std::env::set_var("EMBER_TEST_RPC_URL", "https://rpc.example.com/v3/abc");
        let manifest = manifest_from_str(
            r#"
            [network]
            name = "testnet"
            kind = "testnet"
            rpc-url-env = "EMBER_TEST_RPC_URL"
            confirmations = 3
            "#,
        )
        .unwrap();
        assert_eq!(manifest.network.rpc_url, "https://rpc.example.com/v3/abc");
        assert_eq!(manifest.network.confirmations, 3);
    }

    #[test]
    fn fails_on_unset_secret_variable() {
        let err = manifest_from_str(
            r#"
            [network]
            name = "testnet"
            kind = "testnet"
            rpc-url-env = "EMBER_TEST_UNSET_VARIABLE"
            "#,
        )
        .unwrap_err();
        assert!(err.contains("EMBER_TEST_UNSET_VARIABLE"));
    }
}
