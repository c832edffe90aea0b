//! Phase 1, phase 2 and rollback

use chrono::Utc;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, error, info, warn};

use super::discovery::{ExtractionFailure, Plan, UnresolvedDependency};
use super::report::{
    AmbiguousReference, BlockedItem, CloneFailure, ItemOutcome, RollbackFailure, RunReport,
    UnresolvedReference, UpdateFailure,
};
use super::{RunContext, RunError};
use crate::cloner::{ClonedItem, ClonerError, ClonerRegistry};
use crate::domain::patterns::normalize_url;
use crate::domain::{ContentItem, ItemId, ItemKind, ItemState, MigrationLevel};
use crate::mapping::{
    AmbiguousMatch, MappingEntry, MappingKind, MappingSnapshot, MappingStore, MappingTables,
    PendingPatch, PendingUpdate, UnresolvedRef,
};
use crate::storage::{ArtifactStore, DefinitionStage, FailurePolicy};

/// Result of a completed run
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,

    /// Final mapping tables
    pub mappings: MappingTables,
}

/// Runs a migration plan through the registered cloners
pub struct Orchestrator<'a> {
    ctx: &'a RunContext,
    cloners: &'a ClonerRegistry,
}

/// What a worker hands back for one successfully cloned item
struct Cloned {
    item: ItemId,
    cloned: ClonedItem,
    unresolved: Vec<UnresolvedRef>,
    ambiguous: Vec<AmbiguousMatch>,

    /// Why the cloner could not read the definition, if it could not
    extraction_failure: Option<String>,
}

#[derive(Debug, Default)]
struct Tracked {
    state: ItemState,
    new_id: Option<ItemId>,
    new_url: Option<String>,
}

/// Mutable state of one run
struct Migration<'a> {
    ctx: &'a RunContext,
    cloners: &'a ClonerRegistry,
    plan: &'a Plan,
    pool: ThreadPool,
    store: MappingStore,
    items: HashMap<ItemId, Tracked>,

    /// (source, new) in creation order
    created: Vec<(ItemId, ItemId)>,

    /// External references already reported
    reported: BTreeSet<UnresolvedDependency>,
    report: RunReport,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: &'a RunContext, cloners: &'a ClonerRegistry) -> Self {
        Self { ctx, cloners }
    }

    /// Migrates every item of `plan`
    pub fn run(&self, plan: &Plan) -> Result<RunOutcome, RunError> {
        self.run_with(plan, MappingStore::new())
    }

    /// Migrates `plan` starting from an existing mapping store
    pub fn run_with(&self, plan: &Plan, mut store: MappingStore) -> Result<RunOutcome, RunError> {
        let config = &self.ctx.config;
        for (old, new) in &config.seed.domains {
            store
                .record_mapping(MappingKind::Domain, old, new)
                .map_err(RunError::Seed)?;
        }
        for (old, new) in &config.seed.groups {
            store
                .record_mapping(MappingKind::Group, old, new)
                .map_err(RunError::Seed)?;
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.parallelism)
            .thread_name(|i| format!("migraph-worker-{}", i))
            .build()?;

        let mut report = RunReport::new(
            &self.ctx.run_id,
            self.ctx.started_at,
            config.failure_policy,
        );
        report.levels = plan.leveling().levels.clone();
        report.cycles = plan.leveling().cycles.clone();
        report.extraction_failures = plan.extraction_failures().to_vec();
        report.unresolved_dependencies = plan.unresolved().to_vec();

        let mut migration = Migration {
            ctx: self.ctx,
            cloners: self.cloners,
            plan,
            pool,
            store,
            items: HashMap::new(),
            created: Vec::new(),
            reported: plan.unresolved().iter().cloned().collect(),
            report,
        };

        info!(
            run = %self.ctx.run_id,
            items = plan.items().len(),
            levels = plan.leveling().levels.len(),
            policy = config.failure_policy.as_str(),
            "Starting migration"
        );

        for item in plan.items() {
            migration.items.insert(item.id.clone(), Tracked::default());
            migration.transition(&item.id, ItemState::Leveled)?;
        }

        for level in &plan.leveling().levels {
            if let Err(failure) = migration.migrate_level(level) {
                return Err(migration.abort(failure));
            }
        }

        migration.save_artifact("pending updates", |a| {
            a.save_pending(migration.store.pending())
        });

        migration.resolve_pending()?;
        migration.finalize()?;

        let Migration { report, store, .. } = migration;
        Ok(RunOutcome {
            report,
            mappings: store.tables().clone(),
        })
    }
}

/// How phase 1 stops early
enum LevelFailure {
    Clone { item: ItemId, cause: ClonerError },
    Run(RunError),
}

impl From<RunError> for LevelFailure {
    fn from(err: RunError) -> Self {
        LevelFailure::Run(err)
    }
}

/// Extracts, rewrites and clones one item; runs on a worker thread
fn clone_one(
    ctx: &RunContext,
    cloners: &ClonerRegistry,
    item: &ContentItem,
    snapshot: &MappingSnapshot,
) -> Result<Cloned, ClonerError> {
    let cloner = cloners.for_kind(item.kind)?;

    // An unreadable definition is not fatal: the item is cloned from the
    // definition it was discovered with
    let (definition, extraction_failure) = match cloner.extract_definition(&item.id) {
        Ok(definition) => (definition, None),
        Err(ClonerError::Extraction { reason, .. }) => {
            warn!(
                item = %item.id,
                error = %reason,
                "Definition unreadable, cloning the discovered one"
            );
            (item.definition.clone(), Some(reason))
        }
        Err(e) => return Err(e),
    };

    let structured = snapshot.rewrite_structured(&definition);
    let payloads = snapshot.rewrite_payloads(&item.text);

    if let Some(artifacts) = &ctx.artifacts {
        let now = Utc::now();
        for (stage, value) in [
            (DefinitionStage::Before, &definition),
            (DefinitionStage::After, &structured.value),
        ] {
            if let Err(e) = artifacts.save_definition(&item.id, stage, value, now) {
                warn!(
                    item = %item.id,
                    %stage,
                    error = %format!("{:#}", e),
                    "Failed to save definition"
                );
            }
        }
    }

    let rewritten = ContentItem {
        definition: structured.value.clone(),
        text: payloads.value,
        ..item.clone()
    };

    debug!(
        item = %item.id,
        cloner = cloner.name(),
        replaced = structured.replaced + payloads.replaced,
        "Cloning"
    );
    let cloned = cloner.clone_item(&rewritten, structured.value, &ctx.destination, snapshot)?;

    let mut unresolved = structured.unresolved;
    unresolved.extend(payloads.unresolved);
    let mut ambiguous = structured.ambiguous;
    ambiguous.extend(payloads.ambiguous);

    Ok(Cloned {
        item: item.id.clone(),
        cloned,
        unresolved,
        ambiguous,
        extraction_failure,
    })
}

impl<'a> Migration<'a> {
    fn state(&self, id: &ItemId) -> ItemState {
        self.items.get(id).map(|t| t.state).unwrap_or_default()
    }

    fn kind(&self, id: &ItemId) -> ItemKind {
        self.plan.item(id).map(|i| i.kind).unwrap_or(ItemKind::Other)
    }

    fn transition(&mut self, id: &ItemId, to: ItemState) -> Result<(), RunError> {
        let tracked = self.items.entry(id.clone()).or_default();
        if !tracked.state.can_transition_to(to) {
            return Err(RunError::InvalidTransition {
                item: id.clone(),
                from: tracked.state,
                to,
            });
        }
        tracked.state = to;
        Ok(())
    }

    fn save_artifact<F>(&self, what: &str, save: F)
    where
        F: FnOnce(&ArtifactStore) -> anyhow::Result<std::path::PathBuf>,
    {
        if let Some(artifacts) = &self.ctx.artifacts {
            match save(artifacts) {
                Ok(path) => debug!(path = %path.display(), "Saved {}", what),
                Err(e) => warn!(error = %format!("{:#}", e), "Failed to save {}", what),
            }
        }
    }

    /// Phase 1 for one level
    fn migrate_level(&mut self, level: &MigrationLevel) -> Result<(), LevelFailure> {
        let plan = self.plan;
        let ready: Vec<&ContentItem> = level
            .items
            .iter()
            .filter(|id| self.state(id) == ItemState::Leveled)
            .filter_map(|id| plan.item(id))
            .collect();

        info!(
            level = level.index,
            items = ready.len(),
            skipped = level.items.len() - ready.len(),
            cyclic = level.cyclic,
            "Migrating level"
        );

        for item in &ready {
            self.transition(&item.id, ItemState::Cloning)?;
        }

        let snapshot = self.store.snapshot();
        let (ctx, cloners) = (self.ctx, self.cloners);
        let results: Vec<(ItemId, Result<Cloned, ClonerError>)> = self.pool.install(|| {
            ready
                .par_iter()
                .map(|item| (item.id.clone(), clone_one(ctx, cloners, item, &snapshot)))
                .collect()
        });

        let mut failures = Vec::new();
        for (id, result) in results {
            match result {
                Ok(cloned) => self.commit(cloned)?,
                Err(cause) => failures.push((id, cause)),
            }
        }

        let mut first = None;
        for (id, cause) in failures {
            self.transition(&id, ItemState::CloneFailed)?;
            error!(item = %id, error = %cause, "Clone failed");
            self.report.clone_failures.push(CloneFailure {
                item: id.clone(),
                reason: cause.to_string(),
            });

            match self.ctx.failure_policy() {
                FailurePolicy::Rollback => {
                    first.get_or_insert((id, cause));
                }
                FailurePolicy::Continue => self.block_dependents(&id)?,
            }
        }

        match first {
            Some((item, cause)) => Err(LevelFailure::Clone { item, cause }),
            None => Ok(()),
        }
    }

    /// Records a clone result and queues what it could not rewrite
    fn commit(&mut self, result: Cloned) -> Result<(), RunError> {
        let Cloned {
            item,
            cloned,
            unresolved,
            ambiguous,
            extraction_failure,
        } = result;

        self.transition(&item, ItemState::Cloned)?;
        let conflict = |source| RunError::Mapping {
            item: item.clone(),
            source,
        };

        self.store
            .record_entry(&MappingEntry::identifier(&item, &cloned.new_id))
            .map_err(conflict)?;

        let old_url = self.plan.item(&item).and_then(|i| i.url.clone());
        if let (Some(old), Some(new)) = (&old_url, &cloned.new_url) {
            self.store
                .record_mapping(MappingKind::Url, old, new)
                .map_err(conflict)?;
        }
        for entry in &cloned.mappings {
            self.store.record_entry(entry).map_err(conflict)?;
        }

        if let Some(reason) = extraction_failure {
            self.report.extraction_failures.push(ExtractionFailure {
                item: item.clone(),
                reason,
            });
        }

        for found in ambiguous {
            warn!(
                item = %item,
                id = %found.id,
                token = %found.token,
                "Ambiguous identifier left unchanged"
            );
            self.report.ambiguous.push(AmbiguousReference {
                item: item.clone(),
                id: found.id,
                token: found.token,
                location: found.location,
            });
        }

        let mut internal = Vec::new();
        for r in unresolved {
            if self.plan.target_of(r.kind, &r.value).is_some() {
                internal.push(r);
            } else {
                self.report_external(&item, r.kind, &r.value);
            }
        }

        let patches = PendingPatch::from_unresolved(internal);
        info!(
            item = %item,
            new = %cloned.new_id,
            deferred = patches.len(),
            "Cloned"
        );

        if patches.is_empty() {
            self.transition(&item, ItemState::ReferencesRewritten)?;
        }
        for patch in patches {
            self.store
                .register_pending(cloned.new_id.clone(), item.clone(), patch);
        }

        if let Some(tracked) = self.items.get_mut(&item) {
            tracked.new_id = Some(cloned.new_id.clone());
            tracked.new_url = cloned.new_url.clone();
        }
        self.created.push((item, cloned.new_id));
        Ok(())
    }

    fn report_external(&mut self, item: &ItemId, kind: MappingKind, value: &str) {
        if matches!(kind, MappingKind::Group | MappingKind::Domain) {
            return;
        }
        let target = if kind.is_url() {
            normalize_url(value)
        } else {
            value.to_string()
        };

        let dep = UnresolvedDependency {
            item: item.clone(),
            target,
        };
        if self.reported.insert(dep.clone()) {
            warn!(item = %dep.item, target = %dep.target, "Dependency outside the migrated set");
            self.report.unresolved_dependencies.push(dep);
        }
    }

    /// Marks every not-yet-started dependent of `failed` as blocked
    fn block_dependents(&mut self, failed: &ItemId) -> Result<(), RunError> {
        for dependent in self.plan.graph().transitive_dependents(failed) {
            if self.state(&dependent) != ItemState::Leveled {
                continue;
            }
            self.transition(&dependent, ItemState::Blocked)?;
            warn!(item = %dependent, failed = %failed, "Blocked by failed dependency");
            self.report.blocked.push(BlockedItem {
                item: dependent,
                failed_dependency: failed.clone(),
            });
        }
        Ok(())
    }

    /// Phase 2: applies deferred updates until a pass makes no progress
    fn resolve_pending(&mut self) -> Result<(), RunError> {
        let max_attempts = self.ctx.config.max_update_attempts;
        let mut pass = 0;

        loop {
            let drained = self.store.drain_pending();
            if drained.is_empty() {
                break;
            }
            pass += 1;

            let snapshot = self.store.snapshot();
            let mut by_owner: BTreeMap<ItemId, Vec<PendingUpdate>> = BTreeMap::new();
            for update in drained {
                by_owner.entry(update.owner.clone()).or_default().push(update);
            }

            debug!(pass, owners = by_owner.len(), "Resolving pending updates");
            let mut progress = false;
            let mut retrying = false;

            for (owner, updates) in by_owner {
                let (ready, waiting): (Vec<_>, Vec<_>) = updates
                    .into_iter()
                    .partition(|u| u.patch.is_ready(&snapshot));
                for update in waiting {
                    self.store.requeue(update);
                }
                let Some(source) = ready.first().map(|u| u.source.clone()) else {
                    continue;
                };

                let result = self
                    .cloners
                    .for_kind(self.kind(&source))
                    .and_then(|cloner| cloner.update_references(&owner, &snapshot));

                let reason = match result {
                    Ok(outcome) if outcome.applied => {
                        for entry in &outcome.mappings {
                            self.store
                                .record_entry(entry)
                                .map_err(|source_err| RunError::Mapping {
                                    item: source.clone(),
                                    source: source_err,
                                })?;
                        }
                        debug!(
                            item = %source,
                            owner = %owner,
                            patches = ready.len(),
                            "Applied deferred update"
                        );
                        progress = true;
                        continue;
                    }
                    Ok(_) => "update was not applied".to_string(),
                    Err(e) => e.to_string(),
                };

                let mut gave_up = None;
                for mut update in ready {
                    update.attempts += 1;
                    if update.attempts < max_attempts {
                        retrying = true;
                        self.store.requeue(update);
                    } else {
                        gave_up.get_or_insert(update.attempts);
                        self.report.unresolved_references.push(UnresolvedReference {
                            item: update.source,
                            owner: update.owner,
                            patch: update.patch,
                        });
                    }
                }

                match gave_up {
                    Some(attempts) => {
                        warn!(
                            item = %source,
                            owner = %owner,
                            attempts,
                            error = %reason,
                            "Giving up on reference update"
                        );
                        self.report.update_failures.push(UpdateFailure {
                            item: source,
                            owner,
                            attempts,
                            reason,
                        });
                    }
                    None => {
                        debug!(item = %source, error = %reason, "Reference update will be retried")
                    }
                }
            }

            if !progress && !retrying {
                break;
            }
        }

        for update in self.store.drain_pending() {
            let waiting_on: Vec<_> = update
                .patch
                .outstanding()
                .into_iter()
                .map(|(_, value)| value.to_string())
                .collect();
            warn!(
                item = %update.source,
                owner = %update.owner,
                location = ?update.patch.location(),
                waiting_on = %waiting_on.join(", "),
                "Reference left unresolved"
            );
            self.report.unresolved_references.push(UnresolvedReference {
                item: update.source,
                owner: update.owner,
                patch: update.patch,
            });
        }

        Ok(())
    }

    /// Moves every created item to its final state and fills the report
    fn finalize(&mut self) -> Result<(), RunError> {
        let incomplete: HashSet<ItemId> = self
            .report
            .unresolved_references
            .iter()
            .map(|u| u.item.clone())
            .collect();

        let plan = self.plan;
        for item in plan.items() {
            let state = self.state(&item.id);
            if state == ItemState::Cloned && !incomplete.contains(&item.id) {
                self.transition(&item.id, ItemState::ReferencesRewritten)?;
            }
            if self.state(&item.id).is_created() {
                self.transition(&item.id, ItemState::Finalized)?;
            }
        }

        self.fill_outcomes();
        self.report.finished_at = Some(Utc::now());

        info!(
            finalized = self.report.count(ItemState::Finalized),
            failed = self.report.clone_failures.len(),
            blocked = self.report.blocked.len(),
            warnings = self.report.warning_count(),
            "Migration finished"
        );

        self.save_artifacts();
        Ok(())
    }

    fn fill_outcomes(&mut self) {
        let plan = self.plan;
        for item in plan.items() {
            let tracked = self.items.get(&item.id);
            self.report.items.insert(
                item.id.clone(),
                ItemOutcome {
                    kind: item.kind,
                    title: item.title.clone(),
                    state: tracked.map(|t| t.state).unwrap_or_default(),
                    new_id: tracked.and_then(|t| t.new_id.clone()),
                    new_url: tracked.and_then(|t| t.new_url.clone()),
                },
            );
        }
    }

    fn save_artifacts(&self) {
        let ids = self.report.id_mapping();
        self.save_artifact("id mapping", |a| a.save_id_mapping(&ids));
        self.save_artifact("mapping tables", |a| a.save_mappings(self.store.tables()));
        self.save_artifact("report", |a| a.save_report(&self.report));
    }

    /// Deletes created items in reverse creation order
    fn rollback(&mut self) {
        let created = std::mem::take(&mut self.created);
        for (source, new_id) in created.into_iter().rev() {
            let result = self
                .cloners
                .for_kind(self.kind(&source))
                .and_then(|cloner| cloner.delete_item(&new_id));

            match result {
                Ok(()) => {
                    info!(item = %source, new = %new_id, "Rolled back");
                    self.report.rolled_back.push(source);
                }
                Err(e) => {
                    error!(item = %source, new = %new_id, error = %e, "Rollback failed");
                    self.report.rollback_failures.push(RollbackFailure {
                        item: source,
                        new_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Turns a phase 1 failure into the run error
    fn abort(mut self, failure: LevelFailure) -> RunError {
        let (item, cause) = match failure {
            LevelFailure::Clone { item, cause } => (item, cause),
            LevelFailure::Run(err) => return err,
        };

        error!(item = %item, "Aborting run");
        self.rollback();
        self.report.aborted = true;
        self.fill_outcomes();
        self.report.finished_at = Some(Utc::now());
        self.save_artifacts();

        RunError::Aborted {
            item,
            cause,
            report: Box::new(self.report),
        }
    }
}
