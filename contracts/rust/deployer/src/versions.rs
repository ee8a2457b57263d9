//! The versions file: deployed addresses per release tag.
//!
//! A run only ever writes into the record of its new tag, and only through a [`VersionPatch`]
//! folded in by the runner. Every other tag is carried through load and save untouched.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use alloy::primitives::Address;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Contract;

#[derive(Debug, thiserror::Error)]
pub enum VersionStoreError {
    #[error("failed to access versions file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed versions file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("tag {tag}: contract {contract} has invalid address {value:?}")]
    InvalidAddress {
        tag: String,
        contract: String,
        value: String,
    },

    #[error("version tag {0} not found")]
    UnknownTag(String),
}

/// Chain the deployments of a tag live on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub chain_id: u64,
    pub name: String,
}

/// One released version of the protocol on one network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub network: Network,
    pub last_updated: String,
    #[serde(default)]
    pub contracts: IndexMap<String, Value>,
    #[serde(default = "empty_object")]
    pub config: Value,
    /// Fields this tool does not know about, written back as they were read.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl VersionRecord {
    pub fn new(network: Network, last_updated: impl Into<String>) -> Self {
        Self {
            network,
            last_updated: last_updated.into(),
            contracts: IndexMap::new(),
            config: empty_object(),
            extra: IndexMap::new(),
        }
    }

    /// Address recorded under `name`, if any.
    pub fn address(&self, name: &str) -> Option<Address> {
        self.contracts.get(name)?.as_str()?.parse().ok()
    }

    pub fn contract(&self, contract: Contract) -> Option<Address> {
        self.address(&contract.to_string())
    }

    /// Write all recorded addresses as a .env file.
    pub fn write_env(&self, mut w: impl Write) -> io::Result<()> {
        for (name, value) in &self.contracts {
            if let Some(address) = value.as_str() {
                writeln!(w, "{name}={address}")?;
            }
        }
        Ok(())
    }

    fn validate(&self, tag: &str) -> Result<(), VersionStoreError> {
        for (name, value) in &self.contracts {
            if let Value::String(s) = value {
                if s.parse::<Address>().is_err() {
                    return Err(VersionStoreError::InvalidAddress {
                        tag: tag.to_string(),
                        contract: name.clone(),
                        value: s.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Contracts a job deployed or re-recorded, to be folded into the new tag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VersionPatch {
    contracts: IndexMap<String, Value>,
}

impl VersionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, contract: Contract, address: Address) {
        self.contracts.insert(
            contract.to_string(),
            Value::String(address.to_checksum(None)),
        );
    }

    pub fn get(&self, contract: Contract) -> Option<Address> {
        self.contracts
            .get(&contract.to_string())?
            .as_str()?
            .parse()
            .ok()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }
}

/// All version records, keyed by tag, in file order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionStore(IndexMap<String, VersionRecord>);

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, VersionStoreError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| VersionStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store: Self =
            serde_json::from_str(&content).map_err(|source| VersionStoreError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        for (tag, record) in &store.0 {
            record.validate(tag)?;
        }
        tracing::info!(path = %path.display(), tags = store.0.len(), "loaded versions file");
        Ok(store)
    }

    /// Write the store to `path`, replacing the previous file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VersionStoreError> {
        let path = path.as_ref();
        let io_err = |source| VersionStoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, self).map_err(|source| {
            VersionStoreError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.persist(path).map_err(|err| io_err(err.error))?;
        tracing::debug!(path = %path.display(), "saved versions file");
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<&VersionRecord> {
        self.0.get(tag)
    }

    pub fn get_mut(&mut self, tag: &str) -> Option<&mut VersionRecord> {
        self.0.get_mut(tag)
    }

    pub fn insert(&mut self, tag: impl Into<String>, record: VersionRecord) {
        self.0.insert(tag.into(), record);
    }

    /// Remove `tag`, keeping the order of the others.
    pub fn remove(&mut self, tag: &str) -> Option<VersionRecord> {
        self.0.shift_remove(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Address of `contract` under `tag`.
    pub fn address(&self, tag: &str, contract: Contract) -> Option<Address> {
        self.0.get(tag)?.contract(contract)
    }

    /// Make sure `new_tag` exists, seeding it from `old_tag`'s network and config.
    ///
    /// The new record starts with an empty contract map. Returns `true` if the tag was created.
    pub fn open_tag(
        &mut self,
        old_tag: &str,
        new_tag: &str,
        now: &str,
    ) -> Result<bool, VersionStoreError> {
        if self.0.contains_key(new_tag) {
            return Ok(false);
        }
        let old = self
            .0
            .get(old_tag)
            .ok_or_else(|| VersionStoreError::UnknownTag(old_tag.to_string()))?;
        let mut record = VersionRecord::new(old.network.clone(), now);
        record.config = old.config.clone();
        self.0.insert(new_tag.to_string(), record);
        tracing::info!(%old_tag, %new_tag, "opened new version tag");
        Ok(true)
    }

    /// Fold a job's patch into `tag`.
    pub fn apply(
        &mut self,
        tag: &str,
        patch: &VersionPatch,
        now: &str,
    ) -> Result<(), VersionStoreError> {
        let record = self
            .0
            .get_mut(tag)
            .ok_or_else(|| VersionStoreError::UnknownTag(tag.to_string()))?;
        for (name, value) in &patch.contracts {
            record.contracts.insert(name.clone(), value.clone());
        }
        if !patch.is_empty() {
            record.last_updated = now.to_string();
        }
        Ok(())
    }
}
