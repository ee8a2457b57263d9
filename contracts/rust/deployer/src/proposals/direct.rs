use anyhow::Result;
use async_trait::async_trait;

use super::{ProposalReceipt, ProposedTx, Proposer};
use crate::chain::Chain;

/// Executes "proposals" right away with the deployer key.
///
/// Only useful where the deployer itself owns the protocol, e.g. on a local dev chain.
#[derive(Clone, Debug)]
pub struct DirectProposer<C> {
    chain: C,
}

impl<C: Chain> DirectProposer<C> {
    pub fn new(chain: C) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl<C: Chain> Proposer for DirectProposer<C> {
    async fn propose(&mut self, tx: &ProposedTx) -> Result<ProposalReceipt> {
        tracing::info!("executing {} on {:#x}", tx.description, tx.target);
        let tx_hash = self.chain.send(tx.target, tx.data.clone()).await?;
        Ok(ProposalReceipt::Executed { tx_hash })
    }
}
