//! The contract-guards file, one entry per guarded external contract.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use alloy::primitives::Address;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum GuardFileError {
    #[error("failed to access guard file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed guard file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A guard wired to an external contract through governance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractGuardRecord {
    pub contract_address: Address,
    pub guard_name: String,
    pub guard_address: Address,
    pub description: String,
    /// Fields written by other tools, kept as they are.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl ContractGuardRecord {
    pub fn new(
        contract_address: Address,
        guard_name: impl Into<String>,
        guard_address: Address,
        description: impl Into<String>,
    ) -> Self {
        Self {
            contract_address,
            guard_name: guard_name.into(),
            guard_address,
            description: description.into(),
            extra: IndexMap::new(),
        }
    }
}

/// Insert `record` into `records`, replacing the entry guarding the same contract.
///
/// The replaced entry keeps its position and any field `record` does not set. Any further
/// entries for the same contract are dropped.
pub fn upsert_guard(records: &mut Vec<ContractGuardRecord>, mut record: ContractGuardRecord) {
    let key = record.contract_address;
    match records.iter().position(|r| r.contract_address == key) {
        Some(first) => {
            let mut extra = std::mem::take(&mut records[first].extra);
            extra.extend(record.extra);
            record.extra = extra;
            records[first] = record;
            let mut index = 0;
            records.retain(|r| {
                let keep = index <= first || r.contract_address != key;
                index += 1;
                keep
            });
        },
        None => records.push(record),
    }
}

/// Read the guard file at `path`. A missing file is an empty list.
pub fn read_guard_file(path: &Path) -> Result<Vec<ContractGuardRecord>, GuardFileError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(source) => {
            return Err(GuardFileError::Io {
                path: path.to_path_buf(),
                source,
            })
        },
    };
    if content.trim().is_empty() {
        return Ok(vec![]);
    }
    serde_json::from_str(&content).map_err(|source| GuardFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Upsert `record` into the guard file at `path`, creating the file if needed.
///
/// The file is replaced atomically, an interrupted write leaves the previous content.
pub fn upsert_guard_file(path: &Path, record: ContractGuardRecord) -> Result<(), GuardFileError> {
    let mut records = read_guard_file(path)?;
    tracing::info!(
        path = %path.display(),
        contract = %record.contract_address,
        guard = %record.guard_address,
        "recording {}",
        record.guard_name
    );
    upsert_guard(&mut records, record);

    let io_err = |source| GuardFileError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    serde_json::to_writer_pretty(&mut tmp, &records).map_err(|source| GuardFileError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tmp.write_all(b"\n").map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(contract: u8, guard: u8, name: &str) -> ContractGuardRecord {
        ContractGuardRecord::new(
            Address::repeat_byte(contract),
            name,
            Address::repeat_byte(guard),
            format!("{name} contract"),
        )
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut records = vec![record(1, 10, "A"), record(2, 20, "B"), record(3, 30, "C")];
        upsert_guard(&mut records, record(2, 21, "B2"));
        assert_eq!(
            records,
            vec![record(1, 10, "A"), record(2, 21, "B2"), record(3, 30, "C")]
        );

        upsert_guard(&mut records, record(4, 40, "D"));
        assert_eq!(records.len(), 4);
        assert_eq!(records[3], record(4, 40, "D"));
    }

    #[test]
    fn test_upsert_collapses_duplicates() {
        let mut records = vec![record(1, 10, "A"), record(2, 20, "B"), record(1, 11, "A'")];
        upsert_guard(&mut records, record(1, 12, "A''"));
        assert_eq!(records, vec![record(1, 12, "A''"), record(2, 20, "B")]);
    }

    #[test]
    fn test_file_keys_compare_as_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guards/contractGuards.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"[
  {
    "contractAddress": "0x794a61358d6845594f94dc1db02a252b5b4814ad",
    "guardName": "AaveLendingPoolGuardV3L2Pool",
    "guardAddress": "0x0000000000000000000000000000000000000001",
    "description": "old"
  }
]"#,
        )
        .unwrap();

        let lending_pool: Address = "0x794a61358D6845594F94dc1DB02A252b5b4814aD".parse().unwrap();
        let new = ContractGuardRecord::new(
            lending_pool,
            "AaveLendingPoolGuardV3L2Pool",
            Address::repeat_byte(2),
            "Aave V3 Lending Pool contract",
        );
        upsert_guard_file(&path, new.clone()).unwrap();

        assert_eq!(read_guard_file(&path).unwrap(), vec![new]);
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/contractGuards.json");
        upsert_guard_file(&path, record(1, 10, "A")).unwrap();
        upsert_guard_file(&path, record(2, 20, "B")).unwrap();
        assert_eq!(
            read_guard_file(&path).unwrap(),
            vec![record(1, 10, "A"), record(2, 20, "B")]
        );
    }

    #[test]
    fn test_unknown_fields_survive_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contractGuards.json");
        fs::write(
            &path,
            r#"[
  {
    "contractAddress": "0x0101010101010101010101010101010101010101",
    "guardName": "A",
    "guardAddress": "0x0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a",
    "description": "A contract",
    "deployedBy": "ops",
    "audits": ["2023-q4"]
  },
  {
    "contractAddress": "0x0202020202020202020202020202020202020202",
    "guardName": "B",
    "guardAddress": "0x1414141414141414141414141414141414141414",
    "description": "B contract",
    "chain": "optimism"
  }
]"#,
        )
        .unwrap();

        upsert_guard_file(&path, record(1, 11, "A")).unwrap();

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0]["deployedBy"], "ops");
        assert_eq!(written[0]["audits"][0], "2023-q4");
        assert_eq!(written[1]["chain"], "optimism");

        let records = read_guard_file(&path).unwrap();
        assert_eq!(records[0].guard_address, Address::repeat_byte(11));
        assert_eq!(records[1], {
            let mut b = record(2, 20, "B");
            b.extra.insert("chain".to_string(), "optimism".into());
            b
        });
    }

    #[test]
    fn test_write_leaves_no_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contractGuards.json");
        fs::write(&path, "[]").unwrap();

        upsert_guard_file(&path, record(1, 10, "A")).unwrap();
        upsert_guard_file(&path, record(1, 12, "A")).unwrap();

        let files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(files, vec!["contractGuards.json"]);
        assert_eq!(read_guard_file(&path).unwrap(), vec![record(1, 12, "A")]);
    }
}
