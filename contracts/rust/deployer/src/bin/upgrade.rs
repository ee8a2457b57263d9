//! Deploy and upgrade protocol contracts, recording the results under a new version tag.
//!
//! Without `--execute` nothing is sent: every job runs against a dry-run executor that only logs
//! what it would do, and the versions file is left untouched.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use derive_more::Display;
use url::Url;
use vault_upgrade_deployer::{
    chain::{AlloyChain, ArtifactFormat, ArtifactStore, Chain},
    config::{AddressRegistry, FileNames, UpgradeConfig},
    jobs,
    proposals::{
        multisig::{NonceCursor, SafeProposer},
        DirectProposer, Proposer,
    },
    provider::{build_provider, DeployerSigner, SignerConfig},
    verify::{ForgeVerifier, NoopVerifier, Verifier},
    DryRunExecutor, Executor, JobRunnerBuilder, LiveExecutor, VersionStore,
};
use vault_utils::logging;

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, ValueEnum)]
enum ProposalMode {
    /// Queue governance transactions on the protocol Safe.
    #[default]
    #[display("safe")]
    Safe,
    /// Send governance transactions from the deployer. Only works if it owns the protocol.
    #[display("direct")]
    Direct,
}

#[derive(Clone, Debug, Parser)]
struct Options {
    /// JSON-RPC endpoint of the target chain.
    #[clap(long, env = "UPGRADE_RPC_URL", default_value = "http://localhost:8545")]
    rpc_url: Url,

    #[clap(flatten)]
    signer: SignerConfig,

    /// Address registry of the target network.
    #[clap(long, env = "UPGRADE_REGISTRY", default_value = "config/addresses.toml")]
    registry: PathBuf,

    /// Root of the contracts project, where `forge verify-contract` runs.
    #[clap(long, env = "UPGRADE_CONTRACTS_DIR", default_value = ".")]
    contracts_dir: PathBuf,

    /// Directory holding the compiled artifacts.
    #[clap(long, env = "UPGRADE_ARTIFACTS_DIR", default_value = "out")]
    artifacts_dir: PathBuf,

    #[clap(long, env = "UPGRADE_ARTIFACT_FORMAT", default_value = "foundry")]
    artifact_format: ArtifactFormat,

    /// How governance transactions are submitted.
    #[clap(long, env = "UPGRADE_PROPOSER", default_value = "safe")]
    proposer: ProposalMode,

    /// Do not verify deployed contracts on the block explorer.
    #[clap(long, env = "UPGRADE_SKIP_VERIFY")]
    skip_verify: bool,

    /// Block explorer API key used for verification.
    #[clap(long, env = "UPGRADE_EXPLORER_API_KEY")]
    explorer_api_key: Option<String>,

    /// Run only these jobs. Can be repeated. All jobs run if omitted.
    #[clap(long = "job", env = "UPGRADE_JOBS", value_delimiter = ',')]
    jobs: Vec<String>,

    /// Print the available jobs and exit.
    #[clap(long)]
    list_jobs: bool,

    /// After the run, write the contracts of the new tag to this file in .env format.
    #[clap(long, env = "UPGRADE_EXPORT_ENV")]
    export_env: Option<PathBuf>,

    #[clap(flatten)]
    config: UpgradeConfig,

    #[clap(flatten)]
    filenames: FileNames,

    #[clap(flatten)]
    logging: logging::Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let opt = Options::parse();
    opt.logging.init();

    if opt.list_jobs {
        for job in jobs::all() {
            println!("{}", job.name());
        }
        return Ok(());
    }

    let jobs = if opt.jobs.is_empty() {
        jobs::all()
    } else {
        jobs::select(&opt.jobs)?
    };
    let registry = AddressRegistry::load(&opt.registry)?;
    let mut versions = VersionStore::load(&opt.filenames.versions_file_name)?;

    let runner = JobRunnerBuilder::default()
        .config(opt.config.clone())
        .filenames(opt.filenames.clone())
        .addresses(registry.clone())
        .versions_path(opt.filenames.versions_file_name.clone())
        .jobs(jobs)
        .build()?;

    if opt.config.execute {
        let mut exec = live_executor(&opt, &registry).await?;
        runner.run(&mut versions, exec.as_mut()).await?;
    } else {
        tracing::info!("dry run: pass --execute to deploy and propose for real");
        let mut exec = DryRunExecutor::new();
        runner.run(&mut versions, &mut exec).await?;
        tracing::info!("{} actions would be taken", exec.actions().len());
    }

    if let Some(path) = &opt.export_env {
        export_env(&versions, &opt.config.new_tag, path)?;
    }
    Ok(())
}

async fn live_executor(opt: &Options, registry: &AddressRegistry) -> Result<Box<dyn Executor>> {
    let signer = opt.signer.signer().await?;
    tracing::info!("deployer is {:#x}", signer.address());

    // Safe proposals sign a raw EIP-712 hash, which only a local key can do.
    let safe_signer = match (&signer, opt.proposer) {
        (DeployerSigner::Local(key), ProposalMode::Safe) => Some(key.clone()),
        (DeployerSigner::Ledger(_), ProposalMode::Safe) => {
            bail!("Safe proposals need --mnemonic or --private-key, not --ledger")
        },
        (_, ProposalMode::Direct) => None,
    };

    let provider = build_provider(signer.wallet(), opt.rpc_url.clone());
    let artifacts = ArtifactStore::new(&opt.artifacts_dir, opt.artifact_format);
    let chain = AlloyChain::new(provider, artifacts);
    let chain_id = chain.chain_id().await?;

    let verifier: Box<dyn Verifier> = if opt.skip_verify {
        Box::new(NoopVerifier)
    } else {
        Box::new(ForgeVerifier::new(
            &opt.contracts_dir,
            chain_id,
            opt.explorer_api_key.clone(),
        ))
    };

    let proposer: Box<dyn Proposer> = match safe_signer {
        Some(key) => {
            let props = &registry.propose_tx_properties;
            let api = props
                .gnosis_api
                .clone()
                .context("gnosis_api must be set in the registry to propose to the Safe")?;
            Box::new(SafeProposer::new(
                key,
                api,
                props.protocol_dao_address,
                chain_id,
                NonceCursor::from_config(&opt.config),
            ))
        },
        None => Box::new(DirectProposer::new(chain.clone())),
    };

    Ok(Box::new(LiveExecutor::new(chain, proposer, verifier)))
}

fn export_env(versions: &VersionStore, tag: &str, path: &Path) -> Result<()> {
    let Some(record) = versions.get(tag) else {
        tracing::warn!("{tag} not in versions, nothing to export");
        return Ok(());
    };
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    record.write_env(BufWriter::new(file))?;
    tracing::info!("contracts of {tag} written to {}", path.display());
    Ok(())
}
