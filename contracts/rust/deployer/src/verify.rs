//! Source verification on the block explorer. Nice to have, never required for a run to succeed.

use std::{path::PathBuf, process::Stdio};

use alloy::{
    hex::ToHexExt,
    primitives::{Address, Bytes},
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        address: Address,
        qualified_name: &str,
        constructor_args: &Bytes,
    ) -> Result<()>;
}

#[async_trait]
impl<T: Verifier + ?Sized> Verifier for Box<T> {
    async fn verify(
        &self,
        address: Address,
        qualified_name: &str,
        constructor_args: &Bytes,
    ) -> Result<()> {
        (**self).verify(address, qualified_name, constructor_args).await
    }
}

/// Verify `address`, logging instead of returning any failure.
pub async fn try_verify<V: Verifier + ?Sized>(
    verifier: &V,
    address: Address,
    qualified_name: &str,
    constructor_args: &Bytes,
) {
    match verifier.verify(address, qualified_name, constructor_args).await {
        Ok(()) => tracing::info!("verified {qualified_name} at {address:#x}"),
        Err(err) => {
            tracing::warn!("verification of {qualified_name} at {address:#x} failed: {err:#}")
        },
    }
}

/// Skips verification, e.g. on local networks without an explorer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopVerifier;

#[async_trait]
impl Verifier for NoopVerifier {
    async fn verify(
        &self,
        address: Address,
        qualified_name: &str,
        _constructor_args: &Bytes,
    ) -> Result<()> {
        tracing::debug!("skipping verification of {qualified_name} at {address:#x}");
        Ok(())
    }
}

/// Runs `forge verify-contract` from the contracts project.
#[derive(Clone, Debug)]
pub struct ForgeVerifier {
    project_root: PathBuf,
    chain_id: u64,
    api_key: Option<String>,
}

impl ForgeVerifier {
    pub fn new(project_root: impl Into<PathBuf>, chain_id: u64, api_key: Option<String>) -> Self {
        Self {
            project_root: project_root.into(),
            chain_id,
            api_key,
        }
    }

    /// Arguments passed to `forge`.
    pub fn args(
        &self,
        address: Address,
        qualified_name: &str,
        constructor_args: &Bytes,
    ) -> Vec<String> {
        let mut args = vec![
            "verify-contract".to_string(),
            address.to_string(),
            qualified_name.to_string(),
            "--chain".to_string(),
            self.chain_id.to_string(),
            "--watch".to_string(),
        ];
        if let Some(key) = &self.api_key {
            args.push("--etherscan-api-key".to_string());
            args.push(key.clone());
        }
        if !constructor_args.is_empty() {
            args.push("--constructor-args".to_string());
            args.push(constructor_args.encode_hex_with_prefix());
        }
        args
    }
}

#[async_trait]
impl Verifier for ForgeVerifier {
    async fn verify(
        &self,
        address: Address,
        qualified_name: &str,
        constructor_args: &Bytes,
    ) -> Result<()> {
        let output = Command::new("forge")
            .args(self.args(address, qualified_name, constructor_args))
            .current_dir(&self.project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to run forge")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            // forge reports "already verified" as a failure
            if stdout.contains("already verified") || stderr.contains("already verified") {
                return Ok(());
            }
            return Err(anyhow!("forge verify-contract failed: {}", stderr.trim()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forge_args() {
        let verifier = ForgeVerifier::new(".", 10, Some("KEY".to_string()));
        let address = Address::repeat_byte(0xab);
        let args = verifier.args(
            address,
            "contracts/priceAggregators/AssetHandler.sol:AssetHandler",
            &Bytes::from_static(&[0x01, 0x02]),
        );
        assert_eq!(
            args,
            vec![
                "verify-contract".to_string(),
                address.to_string(),
                "contracts/priceAggregators/AssetHandler.sol:AssetHandler".to_string(),
                "--chain".to_string(),
                "10".to_string(),
                "--watch".to_string(),
                "--etherscan-api-key".to_string(),
                "KEY".to_string(),
                "--constructor-args".to_string(),
                "0x0102".to_string(),
            ]
        );

        let args = ForgeVerifier::new(".", 1, None).args(address, "A.sol:A", &Bytes::new());
        assert_eq!(args.len(), 6);
    }

    #[tokio::test]
    async fn test_missing_forge_does_not_propagate() {
        let verifier = ForgeVerifier::new("/nonexistent/project/root", 1, None);
        try_verify(&verifier, Address::ZERO, "A.sol:A", &Bytes::new()).await;
    }
}
