//! Runs jobs one after another and records what they deployed.

use std::path::PathBuf;

use derive_builder::Builder;

use crate::{
    config::{AddressRegistry, FileNames, UpgradeConfig},
    executor::Executor,
    jobs::{self, Job, JobContext},
    versions::{VersionPatch, VersionStore, VersionStoreError},
};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("cannot open version {tag}: {source}")]
    Open {
        tag: String,
        #[source]
        source: VersionStoreError,
    },

    /// A job failed. Jobs before it have been recorded, jobs after it never ran.
    #[error(
        "job {failed_job} failed: {error:#} (completed: [{}], not run: [{}])",
        .completed.join(", "),
        .remaining.join(", ")
    )]
    Job {
        failed_job: String,
        completed: Vec<String>,
        remaining: Vec<String>,
        error: anyhow::Error,
    },
}

/// Result of one job in a run.
#[derive(Clone, Debug, PartialEq)]
pub struct JobOutcome {
    pub name: &'static str,
    pub patch: VersionPatch,
}

/// Convenient handler that holds everything a run needs besides the executor and the versions.
/// - `config`: tags and execution mode
/// - `filenames`: files the jobs read and write
/// - `addresses`: static addresses of the network
/// - `versions_path`: where to save the versions after each job, nowhere if `None`
/// - `jobs`: jobs to run, all of them by default
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct JobRunner {
    config: UpgradeConfig,
    #[builder(default)]
    filenames: FileNames,
    addresses: AddressRegistry,
    #[builder(default, setter(strip_option, into))]
    versions_path: Option<PathBuf>,
    #[builder(default = "jobs::all()")]
    jobs: Vec<Box<dyn Job>>,
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl JobRunner {
    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|job| job.name()).collect()
    }

    /// Run all jobs in order, stopping at the first failure.
    ///
    /// On a live executor each job's patch is folded into the new tag and, if a path is set,
    /// the versions are saved before the next job starts. This also happens for the failing job,
    /// so contracts it deployed before the error are not lost. On a dry run patches are only
    /// logged.
    pub async fn run(
        &self,
        versions: &mut VersionStore,
        exec: &mut dyn Executor,
    ) -> Result<Vec<JobOutcome>, RunError> {
        let UpgradeConfig {
            old_tag, new_tag, ..
        } = &self.config;
        let live = exec.is_live();
        tracing::info!(
            %old_tag,
            %new_tag,
            live,
            jobs = self.jobs.len(),
            "starting upgrade run"
        );
        if live {
            versions
                .open_tag(old_tag, new_tag, &timestamp())
                .map_err(|source| RunError::Open {
                    tag: new_tag.clone(),
                    source,
                })?;
        }

        let mut outcomes = Vec::with_capacity(self.jobs.len());
        for (index, job) in self.jobs.iter().enumerate() {
            let name = job.name();
            tracing::info!("running {name} ({}/{})", index + 1, self.jobs.len());

            let mut patch = VersionPatch::new();
            let result = {
                let ctx = JobContext {
                    config: &self.config,
                    versions: &*versions,
                    filenames: &self.filenames,
                    addresses: &self.addresses,
                };
                job.run(&ctx, &mut *exec, &mut patch).await
            };

            let contracts: Vec<_> = patch.names().map(str::to_string).collect();
            if !live {
                result.map_err(|error| self.job_error(index, error))?;
                tracing::info!(?contracts, "[dry run] {name} done, nothing recorded");
                outcomes.push(JobOutcome { name, patch });
                continue;
            }

            // Whatever the job deployed before failing is recorded too.
            let recorded = self.record(versions, &patch);
            if let Err(error) = result {
                if !patch.is_empty() {
                    tracing::warn!(
                        ?contracts,
                        "{name} failed after deploying, recorded under {new_tag}"
                    );
                }
                if let Err(err) = recorded {
                    tracing::error!("failed to record partial results of {name}: {err:#}");
                }
                return Err(self.job_error(index, error));
            }
            recorded.map_err(|err| self.job_error(index, err))?;
            tracing::info!(?contracts, "{name} done, recorded under {new_tag}");
            outcomes.push(JobOutcome { name, patch });
        }
        Ok(outcomes)
    }

    /// Fold `patch` into the new tag and save the versions if a path is set.
    fn record(&self, versions: &mut VersionStore, patch: &VersionPatch) -> anyhow::Result<()> {
        versions.apply(&self.config.new_tag, patch, &timestamp())?;
        if let Some(path) = &self.versions_path {
            versions.save(path)?;
        }
        Ok(())
    }

    fn job_error(&self, index: usize, error: anyhow::Error) -> RunError {
        let names = self.job_names();
        tracing::error!("{} failed: {error:#}", names[index]);
        RunError::Job {
            failed_job: names[index].to_string(),
            completed: names[..index].iter().map(|s| s.to_string()).collect(),
            remaining: names[index + 1..].iter().map(|s| s.to_string()).collect(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use alloy::primitives::Address;
    use anyhow::bail;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use vault_contract_adapter::evm::RevertKind;

    use super::*;
    use crate::{
        executor::{DryRunExecutor, LiveExecutor},
        jobs::AssetHandlerJob,
        testing::{Fixture, MockChain, RecordingProposer, RecordingVerifier},
        Contract,
    };

    /// Records `contract` at a fixed address, or fails.
    struct StubJob {
        name: &'static str,
        contract: Contract,
        fail: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Job for StubJob {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(
            &self,
            _ctx: &JobContext<'_>,
            _exec: &mut dyn Executor,
            patch: &mut VersionPatch,
        ) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(self.name);
            if self.fail {
                bail!("{} exploded", self.name);
            }
            patch.set(self.contract, Address::repeat_byte(self.name.len() as u8));
            Ok(())
        }
    }

    fn stub_jobs(
        fail_at: Option<usize>,
        calls: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Vec<Box<dyn Job>> {
        [
            ("one", Contract::AssetHandler),
            ("three", Contract::UsdPriceAggregator),
            ("fourty", Contract::AaveLendingPoolGuardV3),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, (name, contract))| {
            Box::new(StubJob {
                name,
                contract,
                fail: fail_at == Some(i),
                calls: calls.clone(),
            }) as Box<dyn Job>
        })
        .collect()
    }

    fn live() -> LiveExecutor<MockChain, RecordingProposer, RecordingVerifier> {
        LiveExecutor::new(
            MockChain::new(),
            RecordingProposer::default(),
            RecordingVerifier::default(),
        )
    }

    #[tokio::test]
    async fn test_fail_fast_keeps_prior_patches() {
        let fixture = Fixture::new();
        let calls = Arc::new(Mutex::new(vec![]));
        let runner = JobRunnerBuilder::default()
            .config(fixture.config.clone())
            .filenames(fixture.filenames.clone())
            .addresses(fixture.registry.clone())
            .versions_path(fixture.filenames.versions_file_name.clone())
            .jobs(stub_jobs(Some(1), &calls))
            .build()
            .unwrap();

        let mut versions = fixture.versions.clone();
        let err = runner.run(&mut versions, &mut live()).await.unwrap_err();

        match err {
            RunError::Job {
                failed_job,
                completed,
                remaining,
                ..
            } => {
                assert_eq!(failed_job, "three");
                assert_eq!(completed, vec!["one"]);
                assert_eq!(remaining, vec!["fourty"]);
            },
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(*calls.lock().unwrap(), vec!["one", "three"]);

        // the first job's patch is in memory and on disk
        let expected = Some(Address::repeat_byte(3));
        assert_eq!(versions.address("v2", Contract::AssetHandler), expected);
        let saved = VersionStore::load(&fixture.filenames.versions_file_name).unwrap();
        assert_eq!(saved.address("v2", Contract::AssetHandler), expected);
        assert_eq!(saved.address("v2", Contract::UsdPriceAggregator), None);
    }

    #[tokio::test]
    async fn test_failed_job_records_what_it_deployed() {
        let fixture = Fixture::new();
        let chain = MockChain::new().with_deploy_failure(
            "TransparentUpgradeableProxy",
            RevertKind::Reason("out of gas".to_string()),
        );
        let runner = JobRunnerBuilder::default()
            .config(fixture.config.clone())
            .filenames(fixture.filenames.clone())
            .addresses(fixture.registry.clone())
            .versions_path(fixture.filenames.versions_file_name.clone())
            .jobs(vec![Box::new(AssetHandlerJob) as Box<dyn Job>])
            .build()
            .unwrap();
        let mut exec = LiveExecutor::new(
            chain.clone(),
            RecordingProposer::default(),
            RecordingVerifier::default(),
        );

        let mut versions = fixture.versions.clone();
        let err = runner.run(&mut versions, &mut exec).await.unwrap_err();
        assert!(
            matches!(&err, RunError::Job { failed_job, .. } if failed_job == "asset-handler"),
            "{err}"
        );

        let aggregator = versions.address("v2", Contract::UsdPriceAggregator);
        assert!(aggregator.is_some());
        let saved = VersionStore::load(&fixture.filenames.versions_file_name).unwrap();
        assert_eq!(saved.address("v2", Contract::UsdPriceAggregator), aggregator);
        assert_eq!(saved.address("v2", Contract::AssetHandlerProxy), None);
    }

    #[tokio::test]
    async fn test_live_run_opens_new_tag() {
        let fixture = Fixture::new().without_new_tag();
        let calls = Arc::new(Mutex::new(vec![]));
        let runner = JobRunnerBuilder::default()
            .config(fixture.config.clone())
            .addresses(fixture.registry.clone())
            .jobs(stub_jobs(None, &calls))
            .build()
            .unwrap();

        let mut versions = fixture.versions.clone();
        let outcomes = runner.run(&mut versions, &mut live()).await.unwrap();
        assert_eq!(outcomes.len(), 3);

        let new = versions.get("v2").unwrap();
        assert_eq!(new.network, versions.get("v1").unwrap().network);
        assert_eq!(new.contracts.len(), 3);
        assert_eq!(versions.get("v1"), fixture.versions.get("v1"));
    }

    #[tokio::test]
    async fn test_dry_run_discards_patches() {
        let fixture = Fixture::new().without_new_tag();
        let calls = Arc::new(Mutex::new(vec![]));
        let runner = JobRunnerBuilder::default()
            .config(fixture.config.clone())
            .addresses(fixture.registry.clone())
            .versions_path(fixture.filenames.versions_file_name.clone())
            .jobs(stub_jobs(None, &calls))
            .build()
            .unwrap();

        let mut versions = fixture.versions.clone();
        let outcomes = runner
            .run(&mut versions, &mut DryRunExecutor::new())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| !o.patch.is_empty()));
        assert_eq!(versions, fixture.versions);
        assert!(!fixture.filenames.versions_file_name.exists());
    }

    #[tokio::test]
    async fn test_unknown_old_tag() {
        let fixture = Fixture::new().without_new_tag();
        let mut config = fixture.config.clone();
        config.old_tag = "v0".to_string();
        let runner = JobRunnerBuilder::default()
            .config(config)
            .addresses(fixture.registry.clone())
            .jobs(vec![])
            .build()
            .unwrap();

        let mut versions = fixture.versions.clone();
        let err = runner.run(&mut versions, &mut live()).await.unwrap_err();
        assert!(matches!(err, RunError::Open { .. }));
    }

    #[test]
    fn test_builder_requires_config() {
        assert!(JobRunnerBuilder::default()
            .addresses(Fixture::new().registry)
            .build()
            .is_err());
        let runner = JobRunnerBuilder::default()
            .config(UpgradeConfig::new("v1", "v2", false))
            .addresses(Fixture::new().registry)
            .build()
            .unwrap();
        let all: Vec<_> = jobs::all().iter().map(|job| job.name()).collect();
        assert_eq!(runner.job_names(), all);
    }
}
