//! Breadth-first traversal state machine.
//!
//! The machine decides *what* to run next and how each result affects the
//! rest of the run; the caller performs the execution. A run looks like:
//!
//! ```text
//! let mut t = Traversal::new(&graph, &seeds, options)?;
//! while let Step::Execute(rule_id) = t.next_step() {
//!     let passed = run(rule_id);
//!     t.record(rule_id, passed)?;
//! }
//! let summary = t.finish();
//! ```
//!
//! Only parent/child edges enqueue work. Conflict and global-critical links
//! only prune.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::composite::CompositeEvaluation;
use crate::error::CoreError;
use crate::graph::RuleGraph;
use crate::outcome::TerminalStatus;
use crate::rule::RuleStatus;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Why a rule was skipped without executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A structural ancestor failed.
    AncestorFailed { ancestor: DbId },
    /// A global-critical source failed.
    GlobalCritical { source: DbId },
    /// Lost a conflict to `winner`.
    Conflict { winner: DbId },
    /// Status is not APPROVED or ACTIVE.
    NotExecutable { status: RuleStatus },
    /// The run was cancelled before the rule was dequeued.
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AncestorFailed { ancestor } => write!(f, "ancestor {ancestor} failed"),
            SkipReason::GlobalCritical { source } => {
                write!(f, "global-critical source {source} failed")
            }
            SkipReason::Conflict { winner } => write!(f, "lost conflict to {winner}"),
            SkipReason::NotExecutable { status } => write!(f, "status {status} is not executable"),
            SkipReason::Cancelled => f.write_str("traversal cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRule {
    pub rule_id: DbId,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RuleState {
    Pending,
    Running,
    Executed,
    Failed,
    Skipped,
}

impl RuleState {
    fn is_terminal(&self) -> bool {
        matches!(self, RuleState::Executed | RuleState::Failed | RuleState::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Contest {
    Won,
    Lost(DbId),
    /// A pending partner wins on priority; try again after it.
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalOptions {
    /// Skip rules that are not APPROVED/ACTIVE instead of running them.
    pub require_approved: bool,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            require_approved: true,
        }
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Execute(DbId),
    Done,
}

/// Side effects of recording one result, for the caller to log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recorded {
    pub newly_skipped: Vec<SkippedRule>,
    /// Global-critical targets that had already terminated and were left as is.
    pub settled_critical_targets: Vec<DbId>,
}

/// Final partition of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalSummary {
    pub executed: Vec<DbId>,
    pub failed: Vec<DbId>,
    pub skipped: Vec<SkippedRule>,
    pub composites: Vec<CompositeEvaluation>,
}

impl TraversalSummary {
    pub fn skipped_ids(&self) -> Vec<DbId> {
        self.skipped.iter().map(|s| s.rule_id).collect()
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Traversal<'g> {
    graph: &'g RuleGraph,
    options: TraversalOptions,
    queue: VecDeque<DbId>,
    states: HashMap<DbId, RuleState>,
    running: Option<DbId>,
    executed: Vec<DbId>,
    failed: Vec<DbId>,
    skipped: Vec<SkippedRule>,
}

impl<'g> Traversal<'g> {
    /// Seed the queue. Seeds are de-duplicated and sorted ascending; an
    /// unknown seed fails before anything is queued.
    pub fn new(
        graph: &'g RuleGraph,
        seeds: &[DbId],
        options: TraversalOptions,
    ) -> Result<Self, CoreError> {
        let seeds: BTreeSet<DbId> = seeds.iter().copied().collect();
        if let Some(&missing) = seeds.iter().find(|id| !graph.contains(**id)) {
            return Err(CoreError::NotFound {
                entity: "rule",
                id: missing,
            });
        }

        let mut traversal = Self {
            graph,
            options,
            queue: VecDeque::new(),
            states: HashMap::new(),
            running: None,
            executed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        };
        for id in seeds {
            traversal.enqueue(id);
        }
        Ok(traversal)
    }

    fn enqueue(&mut self, id: DbId) {
        if !self.states.contains_key(&id) {
            self.states.insert(id, RuleState::Pending);
            self.queue.push_back(id);
        }
    }

    fn is_terminal(&self, id: DbId) -> bool {
        self.states.get(&id).is_some_and(RuleState::is_terminal)
    }

    fn skip(&mut self, rule_id: DbId, reason: SkipReason) -> SkippedRule {
        self.states.insert(rule_id, RuleState::Skipped);
        let skipped = SkippedRule { rule_id, reason };
        self.skipped.push(skipped.clone());
        skipped
    }

    /// Terminal status of a rule in this run, if it has one.
    pub fn status_of(&self, id: DbId) -> Option<TerminalStatus> {
        match self.states.get(&id)? {
            RuleState::Executed => Some(TerminalStatus::Pass),
            RuleState::Failed => Some(TerminalStatus::Fail),
            RuleState::Skipped => Some(TerminalStatus::Skip),
            RuleState::Pending | RuleState::Running => None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.queue.iter().any(|id| !self.is_terminal(*id))
    }

    /// Dequeue until a rule needs executing. Rules skipped while waiting in
    /// the queue are passed over; conflict and approval checks happen here.
    ///
    /// A rule that loses to a partner still waiting in the queue goes back
    /// behind that partner instead of being skipped, so it runs if the
    /// partner never does. The conflict skip lands when the winner starts.
    pub fn next_step(&mut self) -> Step {
        if self.running.is_some() {
            return Step::Done;
        }
        let graph = self.graph;
        // Rules requeued since the last state change. Meeting one again
        // means the remaining partners only defer to each other.
        let mut deferred = HashSet::new();
        while let Some(id) = self.queue.pop_front() {
            if self.is_terminal(id) {
                continue;
            }
            let Some(rule) = graph.rule(id) else {
                continue;
            };

            if self.options.require_approved && !rule.is_executable() {
                self.skip(
                    id,
                    SkipReason::NotExecutable {
                        status: rule.status,
                    },
                );
                deferred.clear();
                continue;
            }

            match self.resolve_conflicts(id, deferred.contains(&id)) {
                Contest::Lost(winner) => {
                    self.skip(id, SkipReason::Conflict { winner });
                    deferred.clear();
                    continue;
                }
                Contest::Waiting => {
                    deferred.insert(id);
                    self.queue.push_back(id);
                    continue;
                }
                Contest::Won => {}
            }

            self.states.insert(id, RuleState::Running);
            self.running = Some(id);
            return Step::Execute(id);
        }
        Step::Done
    }

    /// Decide `id` against its conflict partners. A partner that already
    /// ran wins outright. A pending partner that wins on priority makes `id`
    /// wait, unless `stalled` says every waiting rule has come round again.
    /// When `id` wins, every pending partner is skipped.
    fn resolve_conflicts(&mut self, id: DbId, stalled: bool) -> Contest {
        let graph = self.graph;
        let partners = graph.conflicts_of(id);

        let mut waits = false;
        for partner in partners {
            match self.states.get(&partner.partner_id) {
                Some(RuleState::Executed | RuleState::Failed) => {
                    return Contest::Lost(partner.partner_id)
                }
                Some(RuleState::Pending) if !partner.own_rule_wins(id) => waits = true,
                _ => {}
            }
        }
        if waits && !stalled {
            return Contest::Waiting;
        }

        let beaten: Vec<DbId> = partners
            .iter()
            .filter(|p| self.states.get(&p.partner_id) == Some(&RuleState::Pending))
            .map(|p| p.partner_id)
            .collect();
        for loser in beaten {
            self.skip(loser, SkipReason::Conflict { winner: id });
        }
        Contest::Won
    }

    /// Record the result of the rule returned by the last [`Step::Execute`].
    pub fn record(&mut self, rule_id: DbId, passed: bool) -> Result<Recorded, CoreError> {
        if self.running != Some(rule_id) {
            return Err(CoreError::Internal(format!(
                "Result recorded for rule {rule_id} which is not running"
            )));
        }
        self.running = None;
        let graph = self.graph;

        if passed {
            self.states.insert(rule_id, RuleState::Executed);
            self.executed.push(rule_id);
            for &child in graph.children(rule_id) {
                self.enqueue(child);
            }
            return Ok(Recorded::default());
        }

        self.states.insert(rule_id, RuleState::Failed);
        self.failed.push(rule_id);

        let mut recorded = Recorded::default();
        for descendant in graph.descendants(rule_id) {
            if self.is_terminal(descendant) {
                continue;
            }
            let skipped = self.skip(descendant, SkipReason::AncestorFailed { ancestor: rule_id });
            recorded.newly_skipped.push(skipped);
        }
        for &target in graph.critical_targets(rule_id) {
            if self.is_terminal(target) {
                recorded.settled_critical_targets.push(target);
                continue;
            }
            let skipped = self.skip(target, SkipReason::GlobalCritical { source: rule_id });
            recorded.newly_skipped.push(skipped);
        }
        Ok(recorded)
    }

    /// Stop at a step boundary: everything still queued is skipped.
    pub fn cancel(&mut self) -> Vec<SkippedRule> {
        let queued: Vec<DbId> = self.queue.drain(..).collect();
        let mut cancelled = Vec::new();
        for id in queued {
            if !self.is_terminal(id) {
                cancelled.push(self.skip(id, SkipReason::Cancelled));
            }
        }
        cancelled
    }

    /// Evaluate composites and return the final partition.
    pub fn finish(self) -> TraversalSummary {
        let composites = evaluate_composites(self.graph, |id| self.status_of(id));
        TraversalSummary {
            executed: self.executed,
            failed: self.failed,
            skipped: self.skipped,
            composites,
        }
    }
}

/// Evaluate every composite whose referenced rules all have a status.
/// A pure function of `status_of`.
pub fn evaluate_composites<F>(graph: &RuleGraph, status_of: F) -> Vec<CompositeEvaluation>
where
    F: Fn(DbId) -> Option<TerminalStatus>,
{
    graph
        .composites()
        .iter()
        .filter_map(|c| c.evaluate(&status_of))
        .collect()
}

/// Seeds plus every transitive child, ascending. These are the rules a live
/// run may execute.
pub fn reachable_rules(graph: &RuleGraph, seeds: &[DbId]) -> Vec<DbId> {
    let mut out = BTreeSet::new();
    for &seed in seeds {
        if graph.contains(seed) && out.insert(seed) {
            out.extend(graph.descendants(seed));
        }
    }
    out.into_iter().collect()
}
