//! JSON views of engine results for terminal output.

use brm_core::graph::{BuiltGraph, ConflictPartner};
use brm_core::rule::RuleStatus;
use brm_core::types::DbId;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct GraphView {
    pub roots: Vec<DbId>,
    pub rules: Vec<RuleNode>,
    pub composites: Vec<CompositeNode>,
    pub skipped_relations: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RuleNode {
    pub id: DbId,
    pub name: String,
    pub status: RuleStatus,
    pub parent: Option<DbId>,
    pub children: Vec<DbId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictPartner>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub critical_targets: Vec<DbId>,
}

#[derive(Debug, Serialize)]
pub struct CompositeNode {
    pub id: DbId,
    pub name: String,
    pub expression: String,
    pub references: Vec<DbId>,
    pub action: Option<String>,
}

impl From<&BuiltGraph> for GraphView {
    fn from(built: &BuiltGraph) -> Self {
        let graph = &built.graph;
        Self {
            roots: graph.roots().to_vec(),
            rules: graph
                .rules()
                .map(|rule| RuleNode {
                    id: rule.id,
                    name: rule.name.clone(),
                    status: rule.status,
                    parent: graph.parent(rule.id),
                    children: graph.children(rule.id).to_vec(),
                    conflicts: graph.conflicts_of(rule.id).to_vec(),
                    critical_targets: graph.critical_targets(rule.id).to_vec(),
                })
                .collect(),
            composites: graph
                .composites()
                .iter()
                .map(|c| CompositeNode {
                    id: c.id,
                    name: c.name.clone(),
                    expression: c.expression.source().to_string(),
                    references: c.expression.referenced_rules().into_iter().collect(),
                    action: c.action_on_pass.clone(),
                })
                .collect(),
            skipped_relations: built.skipped.iter().map(ToString::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brm_core::composite::CompositeDefinition;
    use brm_core::graph::{ConflictLink, CriticalLink, EdgePolicy, GraphBuilder};
    use brm_core::rule::{OperationType, Rule};

    fn rule(id: DbId, parent: Option<DbId>) -> Rule {
        Rule {
            id,
            name: format!("rule {id}"),
            operation_type: OperationType::Sql,
            rule_sql: Some("SELECT 1".to_string()),
            decision_table_id: None,
            parent_rule_id: parent,
            status: RuleStatus::Approved,
            is_critical: false,
            is_global: false,
            owner_group: "risk".to_string(),
        }
    }

    #[test]
    fn view_lists_relations_per_rule() {
        let built = GraphBuilder::new(EdgePolicy::SkipEdge)
            .build(
                vec![rule(1, None), rule(2, Some(1)), rule(3, None)],
                &[ConflictLink {
                    rule_id: 2,
                    conflict_rule_id: 3,
                    priority: 1,
                }],
                &[
                    CriticalLink {
                        source_rule_id: 1,
                        target_rule_id: 3,
                    },
                    CriticalLink {
                        source_rule_id: 1,
                        target_rule_id: 9,
                    },
                ],
                &[CompositeDefinition {
                    id: 5,
                    name: "both".to_string(),
                    logic_expr: "1==PASS AND 3==PASS".to_string(),
                    action_on_pass: Some("notify".to_string()),
                }],
            )
            .unwrap();

        let view = GraphView::from(&built);

        assert_eq!(view.roots, vec![1, 3]);
        assert_eq!(view.rules[0].children, vec![2]);
        assert_eq!(view.rules[0].critical_targets, vec![3]);
        assert_eq!(view.rules[1].parent, Some(1));
        assert_eq!(view.rules[1].conflicts[0].partner_id, 3);
        assert_eq!(view.composites[0].references, vec![1, 3]);
        assert_eq!(view.skipped_relations.len(), 1);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["rules"][0]["status"], "APPROVED");
        assert!(json["rules"][2].get("conflicts").is_some());
        assert!(json["rules"][2].get("critical_targets").is_none());
    }
}
