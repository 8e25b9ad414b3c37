extern crate serde;

#[macro_use]
extern crate serde_derive;

pub extern crate url;

mod network_manifest;

pub use network_manifest::{
    resolve_env_secret, AccountConfig, EvmNetwork, NetworkConfig, NetworkConfigFile,
    NetworkManifest, NetworkManifestFile, DEFAULT_CONFIRMATIONS, DEFAULT_CONFIRMATION_TIMEOUT_SECS,
    DEFAULT_DEPLOYER_LABEL, DEFAULT_LOCAL_RPC_URL, DEFAULT_POLL_DELAY_SECS,
};

use std::path::PathBuf;
use url::Url;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum FileLocation {
    FileSystem { path: PathBuf },
    Url { url: Url },
}

impl FileLocation {
    pub fn from_path(path: PathBuf) -> FileLocation {
        FileLocation::FileSystem { path }
    }

    pub fn append_path(&mut self, path_string: &str) -> Result<(), String> {
        match self {
            FileLocation::FileSystem { path } => {
                let appended_path = PathBuf::from(path_string);
                path.extend(&appended_path);
            }
            FileLocation::Url { url } => {
                let mut segments = url
                    .path_segments_mut()
                    .map_err(|_| format!("unable to mutate url"))?;
                for segment in path_string.split('/') {
                    segments.push(segment);
                }
            }
        }
        Ok(())
    }

    pub fn get_parent_location(&self) -> Result<FileLocation, String> {
        let mut parent_location = self.clone();
        match &mut parent_location {
            FileLocation::FileSystem { path } => {
                let mut parent = path.clone();
                parent.pop();
                if parent.to_str() == path.to_str() {
                    return Err(String::from("reached root"));
                }
                path.pop();
            }
            FileLocation::Url { url } => {
                let mut segments = url
                    .path_segments_mut()
                    .map_err(|_| format!("unable to mutate url"))?;
                segments.pop();
            }
        }
        Ok(parent_location)
    }

    pub fn get_file_name(&self) -> Option<String> {
        match self {
            FileLocation::FileSystem { path } => {
                path.file_name().and_then(|f| Some(f.to_str()?.to_string()))
            }
            FileLocation::Url { url } => url
                .path_segments()
                .and_then(|p| Some(p.last()?.to_string())),
        }
    }

    pub fn read_content(&self) -> Result<Vec<u8>, String> {
        match &self {
            FileLocation::FileSystem { path } => FileLocation::fs_read_content(path),
            FileLocation::Url { url } => match url.scheme() {
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|e| format!("unable to convert url {} to path\n{:?}", url, e))?;
                    FileLocation::fs_read_content(&path)
                }
                scheme => Err(format!("reading from {} locations is not supported", scheme)),
            },
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            FileLocation::FileSystem { path } => path.exists(),
            FileLocation::Url { .. } => false,
        }
    }

    pub fn write_content(&self, content: &[u8]) -> Result<(), String> {
        match self {
            FileLocation::FileSystem { path } => FileLocation::fs_write_content(path, content),
            FileLocation::Url { .. } => Err(format!("writing to url locations is not supported")),
        }
    }

    pub fn expect_path_buf(&self) -> PathBuf {
        match self {
            FileLocation::FileSystem { path } => path.clone(),
            FileLocation::Url { .. } => panic!("expected file system location"),
        }
    }

    fn fs_read_content(path: &PathBuf) -> Result<Vec<u8>, String> {
        use std::fs::File;
        use std::io::{BufReader, Read};
        let file = File::open(path.clone())
            .map_err(|e| format!("unable to read file {}\n{:?}", path.display(), e))?;
        let mut file_reader = BufReader::new(file);
        let mut file_buffer = vec![];
        file_reader
            .read_to_end(&mut file_buffer)
            .map_err(|e| format!("unable to read file {}\n{:?}", path.display(), e))?;
        Ok(file_buffer)
    }

    fn fs_write_content(file_path: &PathBuf, content: &[u8]) -> Result<(), String> {
        use std::fs::{self, File};
        use std::io::Write;
        let mut parent_directory = file_path.clone();
        parent_directory.pop();
        fs::create_dir_all(&parent_directory).map_err(|e| {
            format!(
                "unable to create parent directory {}\n{}",
                parent_directory.display(),
                e
            )
        })?;
        let mut file = File::create(file_path)
            .map_err(|e| format!("unable to open file {}\n{}", file_path.display(), e))?;
        file.write_all(content)
            .map_err(|e| format!("unable to write file {}\n{}", file_path.display(), e))?;
        Ok(())
    }
}

impl std::fmt::Display for FileLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FileLocation::FileSystem { path } => write!(f, "{}", path.display()),
            FileLocation::Url { url } => write!(f, "{}", url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigates_filesystem_locations() {
        let mut location = FileLocation::from_path(PathBuf::from("/project"));
        location.append_path("deployments/local.journal.yaml").unwrap();
        assert_eq!(
            location.get_file_name(),
            Some("local.journal.yaml".to_string())
        );

        let parent = location.get_parent_location().unwrap();
        assert_eq!(parent.get_file_name(), Some("deployments".to_string()));

        let root = FileLocation::from_path(PathBuf::from("/"));
        assert!(root.get_parent_location().is_err());
    }

    #[test]
    fn writes_and_reads_content_back() {
        let mut location = FileLocation::from_path(std::env::temp_dir());
        location
            .append_path(&format!("ember-files-{}/roundtrip.txt", std::process::id()))
            .unwrap();
        location.write_content(b"network: local").unwrap();
        assert!(location.exists());
        assert_eq!(location.read_content().unwrap(), b"network: local");
    }
}
