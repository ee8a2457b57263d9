//! Proposals to a Safe multisig through the Safe transaction service.

use alloy::{
    primitives::{Address, Bytes, B256, U256},
    signers::Signer,
    sol,
    sol_types::{Eip712Domain, SolStruct},
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ProposalReceipt, ProposedTx, Proposer};
use crate::config::UpgradeConfig;

sol! {
    /// The typed data a Safe owner signs to approve a transaction.
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }
}

/// EIP-712 domain of a Safe (v1.3 and later).
pub fn safe_domain(chain_id: u64, safe: Address) -> Eip712Domain {
    Eip712Domain::new(None, None, Some(U256::from(chain_id)), Some(safe), None)
}

/// A plain `CALL` from the Safe, no refund.
pub fn safe_tx(tx: &ProposedTx, nonce: u64) -> SafeTx {
    SafeTx {
        to: tx.target,
        value: U256::ZERO,
        data: tx.data.clone(),
        operation: 0,
        safeTxGas: U256::ZERO,
        baseGas: U256::ZERO,
        gasPrice: U256::ZERO,
        gasToken: Address::ZERO,
        refundReceiver: Address::ZERO,
        nonce: U256::from(nonce),
    }
}

/// Nonce of the next proposal in this run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NonceCursor {
    next: Option<u64>,
}

impl NonceCursor {
    /// Start at `--use-nonce` if `--restart-nonce` is set, otherwise ask the service first.
    pub fn from_config(config: &UpgradeConfig) -> Self {
        Self {
            next: config.restart_nonce.then_some(config.use_nonce),
        }
    }

    pub fn peek(&self) -> Option<u64> {
        self.next
    }

    pub fn advance(&mut self, used: u64) {
        self.next = Some(used + 1);
    }
}

/// Next free nonce given the Safe's nonce and the highest nonce already queued.
pub fn next_nonce(safe_nonce: u64, highest_pending: Option<u64>) -> u64 {
    match highest_pending {
        Some(pending) if pending >= safe_nonce => pending + 1,
        _ => safe_nonce,
    }
}

/// The service reports nonces as numbers or as decimal strings depending on the version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NonceValue {
    Number(u64),
    Text(String),
}

impl NonceValue {
    fn get(&self) -> Result<u64> {
        match self {
            NonceValue::Number(n) => Ok(*n),
            NonceValue::Text(s) => s.parse().with_context(|| format!("invalid nonce {s:?}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SafeInfo {
    nonce: NonceValue,
}

#[derive(Debug, Deserialize)]
struct PendingTx {
    nonce: NonceValue,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    results: Vec<T>,
}

/// Body of `POST /api/v1/safes/{safe}/multisig-transactions/`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeProposal {
    pub to: Address,
    pub value: String,
    pub data: Bytes,
    pub operation: u8,
    pub safe_tx_gas: String,
    pub base_gas: String,
    pub gas_price: String,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub nonce: u64,
    pub contract_transaction_hash: B256,
    pub sender: Address,
    pub signature: Bytes,
    pub origin: String,
}

/// Proposes transactions to a Safe, signed by one of its owners.
#[derive(Debug)]
pub struct SafeProposer<S> {
    signer: S,
    client: reqwest::Client,
    api: Url,
    safe: Address,
    chain_id: u64,
    cursor: NonceCursor,
}

impl<S: Signer + Send + Sync> SafeProposer<S> {
    pub fn new(signer: S, api: Url, safe: Address, chain_id: u64, cursor: NonceCursor) -> Self {
        Self {
            signer,
            client: reqwest::Client::new(),
            api,
            safe,
            chain_id,
            cursor,
        }
    }

    pub fn cursor(&self) -> NonceCursor {
        self.cursor
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/safes/{}/{path}",
            self.api.as_str().trim_end_matches('/'),
            self.safe.to_checksum(None)
        )
    }

    /// Build and sign the service request for `tx` at `nonce`.
    pub async fn sign(&self, tx: &ProposedTx, nonce: u64) -> Result<SafeProposal> {
        let safe_tx = safe_tx(tx, nonce);
        let hash = safe_tx.eip712_signing_hash(&safe_domain(self.chain_id, self.safe));
        let signature = self
            .signer
            .sign_hash(&hash)
            .await
            .context("failed to sign Safe transaction")?;
        let mut signature = signature.as_bytes();
        // Safe expects the legacy 27/28 recovery id for owner signatures.
        if signature[64] < 27 {
            signature[64] += 27;
        }

        Ok(SafeProposal {
            to: safe_tx.to,
            value: "0".to_string(),
            data: safe_tx.data,
            operation: safe_tx.operation,
            safe_tx_gas: "0".to_string(),
            base_gas: "0".to_string(),
            gas_price: "0".to_string(),
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
            contract_transaction_hash: hash,
            sender: self.signer.address(),
            signature: Bytes::copy_from_slice(&signature),
            origin: tx.description.clone(),
        })
    }

    async fn fetch_next_nonce(&self) -> Result<u64> {
        let info: SafeInfo = self
            .client
            .get(self.url(""))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("failed to read Safe info")?;
        let safe_nonce = info.nonce.get()?;

        let pending: Page<PendingTx> = self
            .client
            .get(self.url("multisig-transactions/"))
            .query(&[
                ("executed", "false".to_string()),
                ("nonce__gte", safe_nonce.to_string()),
                ("ordering", "-nonce".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("failed to read pending Safe transactions")?;
        let highest_pending = match pending.results.first() {
            Some(tx) => Some(tx.nonce.get()?),
            None => None,
        };

        let nonce = next_nonce(safe_nonce, highest_pending);
        tracing::info!(safe_nonce, ?highest_pending, "next Safe nonce is {nonce}");
        Ok(nonce)
    }
}

#[async_trait]
impl<S: Signer + Send + Sync> Proposer for SafeProposer<S> {
    async fn propose(&mut self, tx: &ProposedTx) -> Result<ProposalReceipt> {
        let nonce = match self.cursor.peek() {
            Some(nonce) => nonce,
            None => self.fetch_next_nonce().await?,
        };
        let proposal = self.sign(tx, nonce).await?;
        let safe_tx_hash = proposal.contract_transaction_hash;

        tracing::info!(
            "Proposing {} to multisig {:#x} with nonce {nonce}",
            tx.description,
            self.safe
        );
        let resp = self
            .client
            .post(self.url("multisig-transactions/"))
            .json(&proposal)
            .send()
            .await
            .context("failed to reach Safe transaction service")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Safe transaction service rejected proposal ({status}): {body}");
        }
        self.cursor.advance(nonce);

        tracing::info!(
            "Send this link to the signers to sign the proposal: \
             https://app.safe.global/transactions/queue?safe={}",
            self.safe
        );
        Ok(ProposalReceipt::Queued {
            safe_tx_hash,
            nonce,
        })
    }
}
