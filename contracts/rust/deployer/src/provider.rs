//! Signer and provider construction for the `upgrade` binary.

use alloy::{
    network::{Ethereum, EthereumWallet},
    primitives::Address,
    providers::{
        fillers::{FillProvider, JoinFill, WalletFiller},
        utils::JoinedRecommendedFillers,
        ProviderBuilder, RootProvider,
    },
    signers::{
        ledger::{HDPath, LedgerError, LedgerSigner},
        local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner},
        Signer,
    },
};
use anyhow::{bail, Context, Result};
use clap::Args;
use url::Url;

/// Provider with the recommended fillers and the deployer wallet.
pub type HttpProviderWithWallet = FillProvider<
    JoinFill<JoinedRecommendedFillers, WalletFiller<EthereumWallet>>,
    RootProvider,
    Ethereum,
>;

/// Where the deployer key comes from. Exactly one source must be given.
#[derive(Clone, Debug, Default, Args)]
pub struct SignerConfig {
    /// Mnemonic of the deployer wallet.
    #[clap(long, env = "UPGRADE_MNEMONIC", conflicts_with_all = ["private_key", "ledger"])]
    pub mnemonic: Option<String>,

    /// Account index, for both mnemonic and Ledger.
    #[clap(long, env = "UPGRADE_ACCOUNT_INDEX", default_value = "0")]
    pub account_index: u32,

    /// Hex encoded private key of the deployer.
    #[clap(long, env = "UPGRADE_PRIVATE_KEY", conflicts_with = "ledger")]
    pub private_key: Option<String>,

    /// Sign with a Ledger device.
    #[clap(long, env = "UPGRADE_LEDGER")]
    pub ledger: bool,
}

/// A deployer key, held locally or on a hardware wallet.
#[derive(Debug)]
pub enum DeployerSigner {
    Local(PrivateKeySigner),
    Ledger(LedgerSigner),
}

impl DeployerSigner {
    pub fn address(&self) -> Address {
        match self {
            Self::Local(signer) => signer.address(),
            Self::Ledger(signer) => signer.address(),
        }
    }

    pub fn wallet(self) -> EthereumWallet {
        match self {
            Self::Local(signer) => EthereumWallet::from(signer),
            Self::Ledger(signer) => EthereumWallet::from(signer),
        }
    }
}

impl SignerConfig {
    pub async fn signer(&self) -> Result<DeployerSigner> {
        if self.ledger {
            return Ok(DeployerSigner::Ledger(
                connect_ledger(self.account_index as usize).await?,
            ));
        }
        if let Some(key) = &self.private_key {
            let signer: PrivateKeySigner = key.parse().context("invalid private key")?;
            return Ok(DeployerSigner::Local(signer));
        }
        if let Some(mnemonic) = &self.mnemonic {
            return Ok(DeployerSigner::Local(build_signer(
                mnemonic,
                self.account_index,
            )?));
        }
        bail!("no signer configured: pass --mnemonic, --private-key or --ledger")
    }
}

pub fn build_signer(mnemonic: &str, account_index: u32) -> Result<PrivateKeySigner> {
    MnemonicBuilder::<English>::default()
        .phrase(mnemonic)
        .index(account_index)
        .context("invalid account index")?
        .build()
        .context("invalid mnemonic")
}

pub fn build_provider(wallet: EthereumWallet, url: Url) -> HttpProviderWithWallet {
    ProviderBuilder::new().wallet(wallet).on_http(url)
}

/// Try to obtain a ledger signer
///
/// Handles some common errors by prompting the user.
pub async fn connect_ledger(account_index: usize) -> Result<LedgerSigner> {
    let max_attempts = 20;
    for attempt in 1..=max_attempts {
        match LedgerSigner::new(HDPath::LedgerLive(account_index), None).await {
            Ok(signer) => return Ok(signer),
            Err(LedgerError::LedgerError(ref ledger_error)) => {
                bail!("Error: {ledger_error:#}. Please unlock ledger and try again")
            },
            Err(err @ LedgerError::UnexpectedNullResponse) => {
                tracing::warn!(
                    "Failed to access ledger {attempt}/{max_attempts}: {err:#}, please unlock \
                     ledger and open the Ethereum app"
                );
            },
            Err(err) => bail!("Unexpected error accessing the ledger device: {err:#}"),
        }
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    }
    bail!("Failed to create Ledger signer after {max_attempts} attempts")
}
