//! Release coordinator.
//!
//! A [`Release`] owns its collaborators and runs one phase at a time. Inside a
//! phase every object is an independent unit handed to the
//! [`TaskScheduler`]; units receive `Arc` snapshots of what they need and
//! return outcomes that the coordinator folds into the mapping, the pair
//! table, and the report once the phase barrier is reached.

use std::collections::HashSet;
use std::sync::Arc;

use prd_adapters::prompt::{Prompt, StdinPrompt};
use prd_adapters::source::ObjectSource;
use prd_adapters::store::{ObjectStore, object_id};
use prd_config::ReleaseConfig;
use prd_mapping::{LookupTable, Mapping, MappingNode, MappingStore, NodeRef};
use prd_primitives::{ObjectId, ObjectKind, RunId};
use prd_telemetry::release_span;
use serde_json::Value;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{ReleaseError, ReleaseResult};
use crate::graph::{GraphJob, link_predecessors};
use crate::overrides::{apply_override, plan_overrides};
use crate::phase::{Phase, PhaseEvent, PhaseMachine};
use crate::report::{PlaceholderHook, ReleaseReport, UnitFailure};
use crate::scheduler::{SchedulerConfig, TaskScheduler};
use crate::state::{PairTable, SourceCache};
use crate::units::{
    Collaborators, Outcome, UnitInput, UnitSettings, needs_private_url, prepare_organization,
    run_unit,
};
use crate::validate::validate_overrides;

/// One configured release between a source and a target environment.
pub struct Release {
    config: ReleaseConfig,
    target: Arc<dyn ObjectStore>,
    source_store: Option<Arc<dyn ObjectStore>>,
    source: Arc<dyn ObjectSource>,
    mappings: Arc<dyn MappingStore>,
    prompt: Arc<dyn Prompt>,
    scheduler: TaskScheduler,
}

impl Release {
    /// Creates a release that asks the operator on stdin when needed.
    #[must_use]
    pub fn new(
        config: ReleaseConfig,
        target: Arc<dyn ObjectStore>,
        source: Arc<dyn ObjectSource>,
        mappings: Arc<dyn MappingStore>,
    ) -> Self {
        let scheduler = TaskScheduler::new(SchedulerConfig::new(config.max_concurrency()));
        Self {
            config,
            target,
            source_store: None,
            source,
            mappings,
            prompt: Arc::new(StdinPrompt::new()),
            scheduler,
        }
    }

    /// Adds the live source environment, used to match hook templates by
    /// name across organizations.
    #[must_use]
    pub fn with_source_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.source_store = Some(store);
        self
    }

    /// Replaces the operator prompt.
    #[must_use]
    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Returns the release configuration.
    #[must_use]
    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    /// Runs the release to completion.
    ///
    /// Unit failures do not stop the release; they are collected in the
    /// returned report. In dry-run mode the release stops after override
    /// validation and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::Validation`] when an attribute override does
    /// not resolve, [`ReleaseError::Config`] when the organization has no
    /// target, and mapping, source, or prompt errors that prevent the release
    /// from continuing.
    pub async fn run(&self) -> ReleaseResult<ReleaseReport> {
        let run_id = RunId::random();
        async move {
            let mapping = self.mappings.load().await?;
            let mut coordinator = Coordinator::new(self, run_id, mapping);
            match coordinator.drive().await {
                Ok(()) => {
                    info!(
                        released = coordinator.pairs.len(),
                        failures = coordinator.report.failures.len(),
                        "release finished"
                    );
                    Ok(coordinator.report)
                }
                Err(err) => {
                    let phase = coordinator.machine.phase();
                    error!(%phase, error = %err, "release aborted");
                    // Targets created before the abort must not be forgotten.
                    if phase > Phase::Validating && phase <= Phase::Queues {
                        if let Err(save_err) = self.mappings.save(&coordinator.mapping).await {
                            error!(error = %save_err, "mapping could not be saved after abort");
                        }
                    }
                    if let Err(transition_err) = coordinator.machine.transition(PhaseEvent::Abort) {
                        debug!(error = %transition_err, "abort transition rejected");
                    }
                    Err(err)
                }
            }
        }
        .instrument(release_span(run_id))
        .await
    }

    async fn ask_private_url(&self, node: &MappingNode) -> ReleaseResult<String> {
        let answer = self
            .prompt
            .ask(&format!(
                "Hook '{}' ({}) is private; enter its URL on the target, or leave empty to use {}",
                node.name,
                node.id,
                self.config.private_hook_dummy_url()
            ))
            .await?;
        if answer.is_empty() {
            return Ok(self.config.private_hook_dummy_url().to_owned());
        }
        Ok(answer)
    }
}

/// Result of looking at one source object before its phase fans out.
enum Plan {
    Run(UnitInput),
    Ignored { kind: ObjectKind, id: ObjectId },
    Failed(UnitFailure),
}

/// State owned by the coordinating task for the duration of one run.
struct Coordinator<'r> {
    release: &'r Release,
    machine: PhaseMachine,
    mapping: Mapping,
    previous_targets: std::collections::BTreeSet<ObjectId>,
    pairs: PairTable,
    cache: SourceCache,
    report: ReleaseReport,
}

impl<'r> Coordinator<'r> {
    fn new(release: &'r Release, run_id: RunId, mapping: Mapping) -> Self {
        Self {
            release,
            machine: PhaseMachine::new(run_id),
            previous_targets: mapping.targets(),
            mapping,
            pairs: PairTable::new(),
            cache: SourceCache::new(),
            report: ReleaseReport::new(run_id, release.config.dry_run()),
        }
    }

    async fn drive(&mut self) -> ReleaseResult<()> {
        self.validate().await?;
        if self.release.config.dry_run() {
            self.machine.transition(PhaseEvent::Stop)?;
            info!("dry run: attribute overrides are valid; nothing released");
            return Ok(());
        }

        let organization_target = self.mapping.organization.target_object.ok_or_else(|| {
            ReleaseError::config(format!(
                "organization {} has no target_object in the mapping",
                self.mapping.organization.id
            ))
        })?;
        let collaborators = Collaborators {
            target: Arc::clone(&self.release.target),
            source_store: self.release.source_store.clone(),
            settings: Arc::new(self.settings(organization_target).await?),
        };

        self.advance()?;
        self.release_organization(&collaborators, organization_target)
            .await?;

        self.advance()?;
        self.fan_out(&collaborators, ObjectKind::Schema).await?;

        self.advance()?;
        self.fan_out(&collaborators, ObjectKind::Hook).await?;
        self.report_placeholder_hooks();

        self.advance()?;
        self.link_hook_graph(&collaborators).await;

        self.advance()?;
        self.fan_out(&collaborators, ObjectKind::Workspace).await?;

        self.advance()?;
        self.fan_out(&collaborators, ObjectKind::Queue).await?;

        self.release.mappings.save(&self.mapping).await?;
        debug!("mapping saved");

        self.advance()?;
        self.apply_overrides(&collaborators).await;

        self.advance()?;
        self.report.created = self
            .mapping
            .targets()
            .difference(&self.previous_targets)
            .copied()
            .collect();
        Ok(())
    }

    fn advance(&mut self) -> ReleaseResult<Phase> {
        let phase = self.machine.transition(PhaseEvent::Advance)?;
        info!(%phase, "phase started");
        Ok(phase)
    }

    async fn validate(&mut self) -> ReleaseResult<()> {
        let lookup = LookupTable::from_mapping(&self.mapping);
        let failures =
            validate_overrides(&self.mapping, self.release.source.as_ref(), &lookup).await;
        if failures.is_empty() {
            return Ok(());
        }
        for failure in &failures {
            error!(%failure, "attribute override validation failed");
        }
        Err(ReleaseError::Validation { failures })
    }

    /// Resolves run-wide settings.
    ///
    /// A cross-organization release with hooks needs a token owner on the
    /// target: the configured one, else the user behind the target token,
    /// else whatever the operator answers.
    async fn settings(&self, organization_target: ObjectId) -> ReleaseResult<UnitSettings> {
        let release = self.release;
        let same_organization = release.config.same_organization();
        let has_hooks = self
            .mapping
            .traverse_active()
            .any(|entry| entry.kind == ObjectKind::Hook);

        let token_owner = match release.config.token_owner() {
            Some(owner) => Some(owner),
            None if !same_organization && has_hooks => Some(self.discover_token_owner().await?),
            None => None,
        };

        let base = release.target.base_url().trim_end_matches('/');
        Ok(UnitSettings {
            same_organization,
            token_owner_url: token_owner.map(|id| format!("{base}/users/{id}")),
            organization_url: release
                .target
                .object_url(ObjectKind::Organization, organization_target),
        })
    }

    async fn discover_token_owner(&self) -> ReleaseResult<ObjectId> {
        let release = self.release;
        match release.target.token_owner().await {
            Ok(Some(owner)) => {
                info!(%owner, "token owner taken from the target token");
                return Ok(owner);
            }
            Ok(None) => debug!("target does not disclose the token owner"),
            Err(err) => warn!(error = %err, "token owner lookup failed"),
        }
        let answer = release
            .prompt
            .ask("Enter the id of the target user that will own released hooks")
            .await?;
        answer
            .parse::<ObjectId>()
            .map_err(|_| ReleaseError::config(format!("token owner '{answer}' is not a user id")))
    }

    async fn release_organization(
        &mut self,
        collaborators: &Collaborators,
        target_id: ObjectId,
    ) -> ReleaseResult<()> {
        let source_id = self.mapping.organization.id;
        if self.mapping.organization.ignore {
            self.report
                .ignored
                .push((ObjectKind::Organization, source_id));
            return Ok(());
        }
        let Some(source) = self
            .release
            .source
            .load(ObjectKind::Organization, source_id)
            .await?
        else {
            self.fold(Outcome::Failed(UnitFailure::new(
                Phase::Organization,
                ObjectKind::Organization,
                source_id,
                ReleaseError::not_found(
                    ObjectKind::Organization,
                    source_id,
                    "not present in the source",
                ),
            )));
            return Ok(());
        };

        let payload =
            prepare_organization(&source.payload, self.release.config.organization_fields());
        self.cache.insert(source_id, source.payload);
        let outcome = match collaborators
            .target
            .update(ObjectKind::Organization, target_id, &payload)
            .await
        {
            Ok(record) => Outcome::Released {
                kind: ObjectKind::Organization,
                source_id,
                record,
                created: false,
            },
            Err(err) => Outcome::Failed(UnitFailure::new(
                Phase::Organization,
                ObjectKind::Organization,
                source_id,
                &err,
            )),
        };
        self.fold(outcome);
        Ok(())
    }

    /// Plans, runs, and folds every unit of `kind`, then returns at the barrier.
    async fn fan_out(&mut self, collaborators: &Collaborators, kind: ObjectKind) -> ReleaseResult<()> {
        let phase = self.machine.phase();
        let inputs = self.plan(kind).await?;
        let keys: Vec<(ObjectKind, ObjectId)> = inputs
            .iter()
            .map(|input| (input.kind, input.source_id))
            .collect();
        info!(%phase, %kind, units = inputs.len(), "fanning out");

        let pairs = Arc::new(self.pairs.clone());
        let units = inputs.into_iter().map(|input| {
            run_unit(collaborators.clone(), Arc::clone(&pairs), phase, input)
        });
        let results = self.release.scheduler.run_all(units).await;

        for ((kind, source_id), result) in keys.into_iter().zip(results) {
            match result {
                Ok(outcomes) => outcomes.into_iter().for_each(|outcome| self.fold(outcome)),
                Err(err) => self.fold(Outcome::Failed(UnitFailure::new(
                    phase, kind, source_id, err,
                ))),
            }
        }
        Ok(())
    }

    async fn plan(&mut self, kind: ObjectKind) -> ReleaseResult<Vec<UnitInput>> {
        let active: HashSet<ObjectId> = self
            .mapping
            .traverse_active()
            .map(|entry| entry.node.id)
            .collect();
        let mut inputs = Vec::new();
        for id in self.release.source.list(kind).await? {
            match self.plan_one(kind, id, &active).await? {
                Plan::Run(input) => inputs.push(input),
                Plan::Ignored { kind, id } => {
                    debug!(%kind, source_id = %id, "ignored");
                    self.report.ignored.push((kind, id));
                }
                Plan::Failed(failure) => {
                    warn!(%failure, "object cannot be released");
                    self.report.failures.push(failure);
                }
            }
        }
        Ok(inputs)
    }

    async fn plan_one(
        &mut self,
        kind: ObjectKind,
        id: ObjectId,
        active: &HashSet<ObjectId>,
    ) -> ReleaseResult<Plan> {
        let release = self.release;
        let phase = self.machine.phase();
        let Some(NodeRef { node, .. }) = self.mapping.locate(id) else {
            return Ok(Plan::Failed(UnitFailure::new(
                phase,
                kind,
                id,
                ReleaseError::not_found(kind, id, "no node in the mapping"),
            )));
        };
        if !active.contains(&id) {
            return Ok(Plan::Ignored { kind, id });
        }
        let Some(source) = release.source.load(kind, id).await? else {
            return Ok(Plan::Failed(UnitFailure::new(
                phase,
                kind,
                id,
                ReleaseError::not_found(kind, id, "not present in the source"),
            )));
        };

        self.cache.insert(id, source.payload.clone());
        let mut input = UnitInput::new(node, source);
        if kind == ObjectKind::Hook && needs_private_url(node, &input.source.payload) {
            match release.ask_private_url(node).await {
                Ok(url) => input.private_url = Some(url),
                Err(err) => return Ok(Plan::Failed(UnitFailure::new(phase, kind, id, err))),
            }
        }

        if let Some(inbox) = node.inbox.as_deref() {
            if !active.contains(&inbox.id) {
                self.report.ignored.push((ObjectKind::Inbox, inbox.id));
            } else if let Some(source) = release.source.load(ObjectKind::Inbox, inbox.id).await? {
                self.cache.insert(inbox.id, source.payload.clone());
                input.inbox = Some(Box::new(UnitInput::new(inbox, source)));
            } else {
                self.report.failures.push(UnitFailure::new(
                    phase,
                    ObjectKind::Inbox,
                    inbox.id,
                    ReleaseError::not_found(ObjectKind::Inbox, inbox.id, "not present in the source"),
                ));
            }
        }
        Ok(Plan::Run(input))
    }

    fn fold(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Released {
                kind,
                source_id,
                record,
                created,
            } => {
                match object_id(&record) {
                    Ok(target_id) => {
                        debug!(%kind, %source_id, %target_id, created, "outcome folded");
                        if let Some(node) = self.mapping.locate_mut(source_id) {
                            node.target_object = Some(target_id);
                        }
                    }
                    Err(err) => {
                        self.report.failures.push(UnitFailure::new(
                            self.machine.phase(),
                            kind,
                            source_id,
                            err,
                        ));
                        return;
                    }
                }
                self.pairs.insert(source_id, record);
                self.report.record_released(kind);
            }
            Outcome::Failed(failure) => self.report.failures.push(failure),
        }
    }

    fn report_placeholder_hooks(&mut self) {
        let dummy = self.release.config.private_hook_dummy_url();
        let placeholders: Vec<PlaceholderHook> = self
            .mapping
            .traverse_active()
            .filter(|entry| entry.kind == ObjectKind::Hook)
            .filter_map(|entry| {
                let record = self.pairs.get(entry.node.id)?;
                let url = record.get("config")?.get("url")?.as_str()?;
                if url != dummy {
                    return None;
                }
                Some(PlaceholderHook {
                    source_id: entry.node.id,
                    target_id: self.pairs.target_id(entry.node.id)?,
                    name: record
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or(&entry.node.name)
                        .to_owned(),
                    url: record
                        .get("url")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                })
            })
            .collect();
        for hook in &placeholders {
            warn!(%hook, "private hook still points at the placeholder URL");
        }
        self.report.placeholder_hooks = placeholders;
    }

    async fn link_hook_graph(&mut self, collaborators: &Collaborators) {
        let jobs: Vec<GraphJob> = self
            .mapping
            .traverse_active()
            .filter(|entry| entry.kind == ObjectKind::Hook)
            .filter_map(|entry| {
                let id = entry.node.id;
                GraphJob::from_payload(id, self.pairs.target_id(id)?, self.cache.get(id)?)
            })
            .collect();
        let ids: Vec<ObjectId> = jobs.iter().map(|job| job.source_id).collect();
        info!(hooks = jobs.len(), "linking hook predecessors");

        let pairs = Arc::new(self.pairs.clone());
        let units = jobs.into_iter().map(|job| {
            link_predecessors(Arc::clone(&collaborators.target), Arc::clone(&pairs), job)
        });
        let results = self.release.scheduler.run_all(units).await;

        for (source_id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(outcome) => {
                    debug!(source_id = %outcome.source_id, linked = outcome.linked, "predecessors linked");
                    if let Some(record) = outcome.record {
                        self.pairs.insert(outcome.source_id, record);
                    }
                    self.report.failures.extend(outcome.failures);
                }
                Err(err) => self.report.failures.push(UnitFailure::new(
                    Phase::HookGraph,
                    ObjectKind::Hook,
                    source_id,
                    err,
                )),
            }
        }
    }

    async fn apply_overrides(&mut self, collaborators: &Collaborators) {
        let (jobs, failures) = plan_overrides(&self.mapping, &self.cache, &self.pairs);
        for failure in &failures {
            warn!(%failure, "attribute override not applied");
        }
        self.report.failures.extend(failures);

        let keys: Vec<(ObjectKind, ObjectId)> =
            jobs.iter().map(|job| (job.kind, job.source_id)).collect();
        let units = jobs
            .into_iter()
            .map(|job| apply_override(Arc::clone(&collaborators.target), job));
        let results = self.release.scheduler.run_all(units).await;

        for ((kind, source_id), result) in keys.into_iter().zip(results) {
            match result {
                Ok(Ok((source_id, record))) => {
                    self.pairs.insert(source_id, record);
                    self.report.overrides_applied += 1;
                }
                Ok(Err(failure)) => {
                    warn!(%failure, "attribute override failed");
                    self.report.failures.push(failure);
                }
                Err(err) => self.report.failures.push(UnitFailure::new(
                    Phase::Overrides,
                    kind,
                    source_id,
                    err,
                )),
            }
        }
    }
}
