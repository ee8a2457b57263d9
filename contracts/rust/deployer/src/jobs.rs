//! Deployment and upgrade steps.
//!
//! A job looks at the versions recorded so far, acts through the [`Executor`] it is given and
//! adds every contract it deploys to a [`VersionPatch`] as soon as the deployment lands, so a
//! job failing halfway still reports what it left on chain. It never writes the versions itself.
//! Missing configuration is not an error: the job warns and leaves the patch empty so the rest
//! of the run can go on.

use alloy::primitives::Address;
use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::{
    config::{AddressRegistry, FileNames, UpgradeConfig},
    executor::Executor,
    versions::{VersionPatch, VersionStore},
    Contract,
};

pub mod asset_handler;
pub mod contract_guards;
pub mod staking_v2;

pub use asset_handler::AssetHandlerJob;
pub use contract_guards::ContractGuardJob;
pub use staking_v2::StakingV2Job;

/// Read-only view of everything a job may look at.
#[derive(Clone, Copy, Debug)]
pub struct JobContext<'a> {
    pub config: &'a UpgradeConfig,
    pub versions: &'a VersionStore,
    pub filenames: &'a FileNames,
    pub addresses: &'a AddressRegistry,
}

impl JobContext<'_> {
    /// Address recorded under the release being replaced.
    pub fn old(&self, contract: Contract) -> Option<Address> {
        self.versions.address(&self.config.old_tag, contract)
    }

    /// Address recorded under the release being written.
    pub fn new_tag(&self, contract: Contract) -> Option<Address> {
        self.versions.address(&self.config.new_tag, contract)
    }

    /// Most recent address of `contract`, from the new tag if this run already recorded it.
    pub fn latest(&self, contract: Contract) -> Option<Address> {
        self.new_tag(contract).or_else(|| self.old(contract))
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    /// Name used for selection on the command line.
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        ctx: &JobContext<'_>,
        exec: &mut dyn Executor,
        patch: &mut VersionPatch,
    ) -> Result<()>;
}

/// Every job, in the order they have to run.
pub fn all() -> Vec<Box<dyn Job>> {
    vec![
        Box::new(AssetHandlerJob),
        Box::new(StakingV2Job),
        Box::new(ContractGuardJob::aave_v3_lending_pool()),
        Box::new(ContractGuardJob::aave_v3_incentives_controller()),
        Box::new(ContractGuardJob::velodrome_gauge()),
    ]
}

/// The jobs named in `names`, still in canonical order. All jobs if `names` is empty.
pub fn select(names: &[String]) -> Result<Vec<Box<dyn Job>>> {
    let jobs = all();
    if let Some(unknown) = names
        .iter()
        .find(|name| !jobs.iter().any(|job| job.name() == name.as_str()))
    {
        let known: Vec<_> = jobs.iter().map(|job| job.name()).collect();
        bail!("unknown job {unknown}, expected one of {}", known.join(", "));
    }
    if names.is_empty() {
        return Ok(jobs);
    }
    Ok(jobs
        .into_iter()
        .filter(|job| names.iter().any(|name| name == job.name()))
        .collect())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::versions::{Network, VersionRecord};

    fn names(jobs: &[Box<dyn Job>]) -> Vec<&'static str> {
        jobs.iter().map(|job| job.name()).collect()
    }

    #[test]
    fn test_select_keeps_canonical_order() {
        let jobs = select(&["velodrome-gauge-guard".into(), "asset-handler".into()]).unwrap();
        assert_eq!(names(&jobs), vec!["asset-handler", "velodrome-gauge-guard"]);

        assert_eq!(select(&[]).unwrap().len(), all().len());
        assert!(select(&["nope".into()]).is_err());
    }

    #[test]
    fn test_job_names_are_unique() {
        let mut names = names(&all());
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all().len());
    }

    #[test]
    fn test_latest_prefers_new_tag() {
        let network = Network {
            chain_id: 10,
            name: "optimism".into(),
        };
        let mut old = VersionRecord::new(network.clone(), "");
        old.contracts.insert(
            "AssetHandlerProxy".into(),
            Address::repeat_byte(1).to_string().into(),
        );
        old.contracts.insert(
            "Governance".into(),
            Address::repeat_byte(3).to_string().into(),
        );
        let mut new = VersionRecord::new(network, "");
        new.contracts.insert(
            "AssetHandlerProxy".into(),
            Address::repeat_byte(2).to_string().into(),
        );
        let mut versions = VersionStore::new();
        versions.insert("v1", old);
        versions.insert("v2", new);

        let config = UpgradeConfig::new("v1", "v2", true);
        let filenames = FileNames::default();
        let addresses = crate::testing::registry();
        let ctx = JobContext {
            config: &config,
            versions: &versions,
            filenames: &filenames,
            addresses: &addresses,
        };
        assert_eq!(
            ctx.latest(Contract::AssetHandlerProxy),
            Some(Address::repeat_byte(2))
        );
        assert_eq!(ctx.latest(Contract::Governance), Some(Address::repeat_byte(3)));
        assert_eq!(ctx.new_tag(Contract::Governance), None);
    }
}
