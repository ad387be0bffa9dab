//! In-memory rule dependency graph.
//!
//! Built from the full rule set plus the three relation tables:
//!
//! - parent/child edges (`rules.parent_rule_id`), a forest;
//! - conflict links, indexed symmetrically under both members;
//! - global-critical links, indexed by source;
//! - composite definitions, indexed by every rule id they mention.
//!
//! A relation that references a rule id outside the set is a
//! [`GraphLoadError`]. Under [`EdgePolicy::SkipEdge`] the offending edge is
//! dropped and reported in [`BuiltGraph::skipped`] instead.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::composite::{CompositeDefinition, CompositeRule};
use crate::rule::Rule;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Relation inputs
// ---------------------------------------------------------------------------

/// A `rule_conflicts` row: `rule_id` has `priority` when it conflicts with
/// `conflict_rule_id`. Lower priority values win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictLink {
    pub rule_id: DbId,
    pub conflict_rule_id: DbId,
    pub priority: i32,
}

/// A `rule_critical_links` row: failure of the source forces the target to
/// be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalLink {
    pub source_rule_id: DbId,
    pub target_rule_id: DbId,
}

/// Which relation an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Parent,
    Conflict,
    GlobalCritical,
    Composite,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RelationKind::Parent => "parent",
            RelationKind::Conflict => "conflict",
            RelationKind::GlobalCritical => "global-critical",
            RelationKind::Composite => "composite",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum GraphLoadError {
    #[error("{relation} relation of {owner_id} references missing rule {missing_id}")]
    MissingRule {
        relation: RelationKind,
        owner_id: DbId,
        missing_id: DbId,
    },

    #[error("Parent chain of rule {rule_id} forms a cycle")]
    ParentCycle { rule_id: DbId },

    #[error("Composite {composite_id} is invalid: {reason}")]
    InvalidComposite { composite_id: DbId, reason: String },
}

/// What to do with a relation that references a missing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Fail the whole build.
    #[default]
    Abort,
    /// Drop the edge, keep building, and report it.
    SkipEdge,
}

impl EdgePolicy {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(EdgePolicy::Abort),
            "skip_edge" | "skip-edge" | "skip" => Ok(EdgePolicy::SkipEdge),
            other => Err(format!(
                "Invalid edge policy '{other}'. Must be one of: abort, skip_edge"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict resolution
// ---------------------------------------------------------------------------

/// One side of a conflict as seen from a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPartner {
    pub partner_id: DbId,
    pub own_priority: Option<i32>,
    pub partner_priority: Option<i32>,
}

impl ConflictPartner {
    /// Whether `own_id` beats this partner.
    pub fn own_rule_wins(&self, own_id: DbId) -> bool {
        conflict_winner(
            (own_id, self.own_priority),
            (self.partner_id, self.partner_priority),
        ) == own_id
    }
}

/// Pick the winner of a conflict. Lower priority wins; a rule without a
/// priority loses to one with any priority; remaining ties go to the lower id.
pub fn conflict_winner(a: (DbId, Option<i32>), b: (DbId, Option<i32>)) -> DbId {
    let key = |(id, priority): (DbId, Option<i32>)| (priority.is_none(), priority, id);
    if key(a) <= key(b) {
        a.0
    } else {
        b.0
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RuleGraph {
    rules: BTreeMap<DbId, Rule>,
    parents: HashMap<DbId, DbId>,
    children: HashMap<DbId, Vec<DbId>>,
    roots: Vec<DbId>,
    conflicts: HashMap<DbId, Vec<ConflictPartner>>,
    critical_targets: HashMap<DbId, Vec<DbId>>,
    composites: Vec<CompositeRule>,
    composites_by_rule: HashMap<DbId, Vec<DbId>>,
}

impl RuleGraph {
    pub fn rule(&self, id: DbId) -> Option<&Rule> {
        self.rules.get(&id)
    }

    pub fn contains(&self, id: DbId) -> bool {
        self.rules.contains_key(&id)
    }

    /// All rules, ascending by id.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules without a (retained) parent edge, ascending.
    pub fn roots(&self) -> &[DbId] {
        &self.roots
    }

    pub fn parent(&self, id: DbId) -> Option<DbId> {
        self.parents.get(&id).copied()
    }

    /// Direct children, ascending.
    pub fn children(&self, id: DbId) -> &[DbId] {
        self.children.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Transitive children in breadth-first order.
    pub fn descendants(&self, id: DbId) -> Vec<DbId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<DbId> = self.children(id).iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            out.push(next);
            queue.extend(self.children(next).iter().copied());
        }
        out
    }

    /// Conflict partners of a rule, ascending by partner id.
    pub fn conflicts_of(&self, id: DbId) -> &[ConflictPartner] {
        self.conflicts.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Rules forced to skip when `source` fails, ascending.
    pub fn critical_targets(&self, source: DbId) -> &[DbId] {
        self.critical_targets.get(&source).map_or(&[], Vec::as_slice)
    }

    pub fn composites(&self) -> &[CompositeRule] {
        &self.composites
    }

    /// Ids of composites mentioning a rule, ascending.
    pub fn composites_referencing(&self, rule_id: DbId) -> &[DbId] {
        self.composites_by_rule
            .get(&rule_id)
            .map_or(&[], Vec::as_slice)
    }
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuiltGraph {
    pub graph: RuleGraph,
    /// Edges dropped under [`EdgePolicy::SkipEdge`].
    pub skipped: Vec<GraphLoadError>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphBuilder {
    policy: EdgePolicy,
}

impl GraphBuilder {
    pub fn new(policy: EdgePolicy) -> Self {
        Self { policy }
    }

    pub fn build(
        &self,
        rules: Vec<Rule>,
        conflicts: &[ConflictLink],
        critical_links: &[CriticalLink],
        composites: &[CompositeDefinition],
    ) -> Result<BuiltGraph, GraphLoadError> {
        let mut skipped = Vec::new();
        let mut graph = RuleGraph {
            rules: rules.into_iter().map(|r| (r.id, r)).collect(),
            ..RuleGraph::default()
        };

        self.link_parents(&mut graph, &mut skipped)?;
        detect_parent_cycles(&graph)?;
        self.index_conflicts(&mut graph, conflicts, &mut skipped)?;
        self.index_critical_links(&mut graph, critical_links, &mut skipped)?;
        self.index_composites(&mut graph, composites, &mut skipped)?;

        Ok(BuiltGraph { graph, skipped })
    }

    fn reject(
        &self,
        error: GraphLoadError,
        skipped: &mut Vec<GraphLoadError>,
    ) -> Result<(), GraphLoadError> {
        match self.policy {
            EdgePolicy::Abort => Err(error),
            EdgePolicy::SkipEdge => {
                skipped.push(error);
                Ok(())
            }
        }
    }

    fn link_parents(
        &self,
        graph: &mut RuleGraph,
        skipped: &mut Vec<GraphLoadError>,
    ) -> Result<(), GraphLoadError> {
        let edges: Vec<(DbId, Option<DbId>)> = graph
            .rules
            .values()
            .map(|r| (r.id, r.parent_rule_id))
            .collect();

        for (id, parent) in edges {
            match parent {
                Some(parent_id) if graph.rules.contains_key(&parent_id) => {
                    graph.parents.insert(id, parent_id);
                    graph.children.entry(parent_id).or_default().push(id);
                }
                Some(parent_id) => {
                    self.reject(
                        GraphLoadError::MissingRule {
                            relation: RelationKind::Parent,
                            owner_id: id,
                            missing_id: parent_id,
                        },
                        skipped,
                    )?;
                    graph.roots.push(id);
                }
                None => graph.roots.push(id),
            }
        }

        // Rules are visited in id order, so children and roots are already sorted.
        Ok(())
    }

    fn index_conflicts(
        &self,
        graph: &mut RuleGraph,
        conflicts: &[ConflictLink],
        skipped: &mut Vec<GraphLoadError>,
    ) -> Result<(), GraphLoadError> {
        // Directed priorities, keeping the lowest value for duplicate rows.
        let mut priorities: BTreeMap<(DbId, DbId), i32> = BTreeMap::new();
        for link in conflicts {
            if link.rule_id == link.conflict_rule_id {
                continue;
            }
            if let Some(missing) = [link.rule_id, link.conflict_rule_id]
                .into_iter()
                .find(|id| !graph.rules.contains_key(id))
            {
                self.reject(
                    GraphLoadError::MissingRule {
                        relation: RelationKind::Conflict,
                        owner_id: if missing == link.rule_id {
                            link.conflict_rule_id
                        } else {
                            link.rule_id
                        },
                        missing_id: missing,
                    },
                    skipped,
                )?;
                continue;
            }
            priorities
                .entry((link.rule_id, link.conflict_rule_id))
                .and_modify(|p| *p = (*p).min(link.priority))
                .or_insert(link.priority);
        }

        let pairs: BTreeSet<(DbId, DbId)> = priorities
            .keys()
            .map(|&(a, b)| (a.min(b), a.max(b)))
            .collect();
        for (a, b) in pairs {
            let a_priority = priorities.get(&(a, b)).copied();
            let b_priority = priorities.get(&(b, a)).copied();
            graph.conflicts.entry(a).or_default().push(ConflictPartner {
                partner_id: b,
                own_priority: a_priority,
                partner_priority: b_priority,
            });
            graph.conflicts.entry(b).or_default().push(ConflictPartner {
                partner_id: a,
                own_priority: b_priority,
                partner_priority: a_priority,
            });
        }
        for partners in graph.conflicts.values_mut() {
            partners.sort_by_key(|p| p.partner_id);
        }
        Ok(())
    }

    fn index_critical_links(
        &self,
        graph: &mut RuleGraph,
        links: &[CriticalLink],
        skipped: &mut Vec<GraphLoadError>,
    ) -> Result<(), GraphLoadError> {
        let mut targets: BTreeMap<DbId, BTreeSet<DbId>> = BTreeMap::new();
        for link in links {
            if link.source_rule_id == link.target_rule_id {
                continue;
            }
            if let Some(missing) = [link.source_rule_id, link.target_rule_id]
                .into_iter()
                .find(|id| !graph.rules.contains_key(id))
            {
                self.reject(
                    GraphLoadError::MissingRule {
                        relation: RelationKind::GlobalCritical,
                        owner_id: link.source_rule_id,
                        missing_id: missing,
                    },
                    skipped,
                )?;
                continue;
            }
            targets
                .entry(link.source_rule_id)
                .or_default()
                .insert(link.target_rule_id);
        }
        graph.critical_targets = targets
            .into_iter()
            .map(|(source, set)| (source, set.into_iter().collect()))
            .collect();
        Ok(())
    }

    fn index_composites(
        &self,
        graph: &mut RuleGraph,
        composites: &[CompositeDefinition],
        skipped: &mut Vec<GraphLoadError>,
    ) -> Result<(), GraphLoadError> {
        let mut ordered: Vec<&CompositeDefinition> = composites.iter().collect();
        ordered.sort_by_key(|c| c.id);

        for def in ordered {
            let composite = match CompositeRule::from_definition(def) {
                Ok(c) => c,
                Err(e) => {
                    self.reject(
                        GraphLoadError::InvalidComposite {
                            composite_id: def.id,
                            reason: e.to_string(),
                        },
                        skipped,
                    )?;
                    continue;
                }
            };

            let refs = composite.expression.referenced_rules();
            if let Some(&missing) = refs.iter().find(|id| !graph.rules.contains_key(id)) {
                self.reject(
                    GraphLoadError::MissingRule {
                        relation: RelationKind::Composite,
                        owner_id: def.id,
                        missing_id: missing,
                    },
                    skipped,
                )?;
                continue;
            }

            for rule_id in refs {
                graph
                    .composites_by_rule
                    .entry(rule_id)
                    .or_default()
                    .push(def.id);
            }
            graph.composites.push(composite);
        }
        Ok(())
    }
}

/// Parent edges must form a forest. Reports the smallest id on the first
/// cycle found.
fn detect_parent_cycles(graph: &RuleGraph) -> Result<(), GraphLoadError> {
    let mut acyclic: HashSet<DbId> = HashSet::new();
    for &start in graph.rules.keys() {
        let mut chain = Vec::new();
        let mut on_chain = HashSet::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if acyclic.contains(&id) {
                break;
            }
            if !on_chain.insert(id) {
                let cycle_start = chain.iter().position(|&c| c == id).unwrap_or(0);
                let smallest = chain[cycle_start..].iter().copied().min().unwrap_or(id);
                return Err(GraphLoadError::ParentCycle { rule_id: smallest });
            }
            chain.push(id);
            current = graph.parents.get(&id).copied();
        }
        acyclic.extend(chain);
    }
    Ok(())
}
