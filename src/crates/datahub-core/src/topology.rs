//! Topology builder: predecessors, indegrees and the initial ready set
//!
//! The graph orchestrator consumes a [`Topology`] computed once per run.
//! Ready ordering is deterministic: the initial ready set and every
//! subsequent enqueue follow step declaration order (FIFO among steps that
//! become ready at the same completion).
//!
//! Cycles are detected by exhaustion - if Kahn's peeling cannot reach every
//! step that participates in an edge, the definition is rejected.

use crate::definition::PipelineDefinition;
use crate::error::{PipelineError, Result};
use std::collections::{HashMap, VecDeque};

/// One inbound dependency of a step
#[derive(Debug, Clone, PartialEq)]
pub struct PredecessorEdge {
    pub from: String,
    /// Branch label selecting part of a ROUTE predecessor's output
    pub branch: Option<String>,
}

/// Static execution topology of one definition
#[derive(Debug, Clone)]
pub struct Topology {
    /// Step keys in declaration order
    pub order: Vec<String>,
    /// `to -> [{from, branch}]` in edge declaration order
    pub predecessors: HashMap<String, Vec<PredecessorEdge>>,
    /// `from -> [to]` in edge declaration order
    pub successors: HashMap<String, Vec<String>>,
    /// Inbound edge count per step
    pub indegree: HashMap<String, usize>,
}

impl Topology {
    /// Build and validate the topology for a definition
    ///
    /// The definition must already pass
    /// [`PipelineDefinition::validate`]; this adds the acyclicity check.
    pub fn build(definition: &PipelineDefinition) -> Result<Self> {
        definition.validate()?;

        let order: Vec<String> = definition.steps.iter().map(|s| s.key.clone()).collect();
        let mut predecessors: HashMap<String, Vec<PredecessorEdge>> = HashMap::new();
        let mut successors: HashMap<String, Vec<String>> = HashMap::new();
        let mut indegree: HashMap<String, usize> =
            order.iter().map(|key| (key.clone(), 0)).collect();

        for edge in &definition.edges {
            predecessors
                .entry(edge.to.clone())
                .or_default()
                .push(PredecessorEdge {
                    from: edge.from.clone(),
                    branch: edge.branch.clone(),
                });
            successors
                .entry(edge.from.clone())
                .or_default()
                .push(edge.to.clone());
            *indegree.entry(edge.to.clone()).or_default() += 1;
        }

        let topology = Self {
            order,
            predecessors,
            successors,
            indegree,
        };
        topology.check_acyclic()?;
        Ok(topology)
    }

    /// Steps with no inbound edges, in declaration order
    pub fn initial_ready(&self) -> VecDeque<String> {
        self.order
            .iter()
            .filter(|key| self.indegree.get(*key).copied().unwrap_or(0) == 0)
            .cloned()
            .collect()
    }

    /// All transitive predecessors of a step (resume support)
    pub fn ancestors_of(&self, step_key: &str) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        let mut stack: Vec<String> = vec![step_key.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(preds) = self.predecessors.get(&current) {
                for pred in preds {
                    if !seen.contains(&pred.from) {
                        seen.push(pred.from.clone());
                        stack.push(pred.from.clone());
                    }
                }
            }
        }
        seen
    }

    /// All transitive successors of a step, exclusive (resume support)
    pub fn descendants_of(&self, step_key: &str) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        let mut stack: Vec<String> = vec![step_key.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(next) = self.successors.get(&current) {
                for succ in next {
                    if !seen.contains(succ) {
                        seen.push(succ.clone());
                        stack.push(succ.clone());
                    }
                }
            }
        }
        seen
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut indegree = self.indegree.clone();
        let mut queue: VecDeque<String> = self.initial_ready();
        let mut visited = 0usize;

        while let Some(key) = queue.pop_front() {
            visited += 1;
            if let Some(next) = self.successors.get(&key) {
                for succ in next {
                    if let Some(count) = indegree.get_mut(succ) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push_back(succ.clone());
                        }
                    }
                }
            }
        }

        if visited != self.order.len() {
            return Err(PipelineError::DefinitionInvalid(
                "pipeline graph contains a cycle".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Edge, PipelineDefinition, StepDefinition, StepKind};

    fn diamond() -> PipelineDefinition {
        PipelineDefinition::new(1)
            .with_step(StepDefinition::new("extract", StepKind::Extract))
            .with_step(StepDefinition::new("left", StepKind::Transform))
            .with_step(StepDefinition::new("right", StepKind::Transform))
            .with_step(StepDefinition::new("load", StepKind::Load))
            .with_edge(Edge::new("extract", "left"))
            .with_edge(Edge::new("extract", "right"))
            .with_edge(Edge::new("left", "load"))
            .with_edge(Edge::new("right", "load"))
    }

    #[test]
    fn diamond_topology() {
        let topology = Topology::build(&diamond()).unwrap();
        assert_eq!(topology.initial_ready(), vec!["extract".to_string()]);
        assert_eq!(topology.indegree["load"], 2);
        assert_eq!(topology.predecessors["load"].len(), 2);
        assert_eq!(topology.successors["extract"], vec!["left", "right"]);
    }

    #[test]
    fn ready_set_follows_declaration_order() {
        let definition = PipelineDefinition::new(1)
            .with_step(StepDefinition::new("b", StepKind::Extract))
            .with_step(StepDefinition::new("a", StepKind::Extract))
            .with_step(StepDefinition::new("sink", StepKind::Load))
            .with_edge(Edge::new("b", "sink"))
            .with_edge(Edge::new("a", "sink"));
        let topology = Topology::build(&definition).unwrap();
        let ready: Vec<String> = topology.initial_ready().into();
        assert_eq!(ready, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn cycle_is_rejected() {
        let definition = PipelineDefinition::new(1)
            .with_step(StepDefinition::new("a", StepKind::Transform))
            .with_step(StepDefinition::new("b", StepKind::Transform))
            .with_edge(Edge::new("a", "b"))
            .with_edge(Edge::new("b", "a"));
        assert!(matches!(
            Topology::build(&definition),
            Err(PipelineError::DefinitionInvalid(_))
        ));
    }

    #[test]
    fn ancestors_are_transitive() {
        let topology = Topology::build(&diamond()).unwrap();
        let mut ancestors = topology.ancestors_of("load");
        ancestors.sort();
        assert_eq!(ancestors, vec!["extract", "left", "right"]);
        assert!(topology.ancestors_of("extract").is_empty());
    }

    #[test]
    fn descendants_are_transitive_and_exclusive() {
        let topology = Topology::build(&diamond()).unwrap();
        let mut descendants = topology.descendants_of("extract");
        descendants.sort();
        assert_eq!(descendants, vec!["left", "load", "right"]);
        assert!(topology.descendants_of("load").is_empty());
    }
}
