//! Canonical <-> visual definition conversion
//!
//! The dashboard edits pipelines as a node/edge graph (`nodes[]` + `edges[]`
//! with `source`/`target`); the runtime executes the canonical form (`steps[]`
//! + `edges[]` with `from`/`to`). Conversion is deterministic:
//!
//! - each node becomes a step keyed by `node.id`, with `node.data.config`
//!   (including `adapterCode`) preserved verbatim
//! - visual edges map `source -> from`, `target -> to`, keeping `branch`
//! - a canonical definition without edges gets a synthesized linear chain
//!   through its steps when rendered visually, so
//!   `to_canonical(to_visual(def))` equals `def` up to those synthesized
//!   edges

use crate::definition::{Edge, PipelineDefinition, StepConfig, StepDefinition, StepKind};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Payload of one visual node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualNodeData {
    #[serde(rename = "type")]
    pub step_type: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub config: StepConfig,
}

/// One node of the visual graph; `id` doubles as the canonical step key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualNode {
    pub id: String,
    pub data: VisualNodeData,
}

/// One edge of the visual graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualEdge {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Visual form of a pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualPipeline {
    pub version: u32,
    pub nodes: Vec<VisualNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<VisualEdge>,
    #[serde(default)]
    pub context: crate::definition::PipelineContext,
}

/// Render a canonical definition as its visual graph
///
/// Definitions without edges receive a synthesized linear chain so the
/// dashboard always shows connected nodes.
pub fn to_visual(definition: &PipelineDefinition) -> VisualPipeline {
    let nodes = definition
        .steps
        .iter()
        .map(|step| VisualNode {
            id: step.key.clone(),
            data: VisualNodeData {
                step_type: step.step_type,
                label: step.name.clone(),
                config: step.config.clone(),
            },
        })
        .collect();

    let edges = if definition.edges.is_empty() {
        synthesize_linear_chain(&definition.steps)
    } else {
        definition
            .edges
            .iter()
            .map(|edge| VisualEdge {
                id: edge.id.clone(),
                source: edge.from.clone(),
                target: edge.to.clone(),
                branch: edge.branch.clone(),
            })
            .collect()
    };

    VisualPipeline {
        version: definition.version,
        nodes,
        edges,
        context: definition.context.clone(),
    }
}

/// Convert a visual graph back to the canonical executable form
pub fn to_canonical(visual: &VisualPipeline) -> Result<PipelineDefinition> {
    let steps = visual
        .nodes
        .iter()
        .map(|node| {
            let mut step = StepDefinition::new(node.id.clone(), node.data.step_type)
                .with_config(node.data.config.clone());
            step.name = node.data.label.clone();
            step
        })
        .collect();

    let edges = visual
        .edges
        .iter()
        .map(|edge| Edge {
            id: edge.id.clone(),
            from: edge.source.clone(),
            to: edge.target.clone(),
            branch: edge.branch.clone(),
        })
        .collect();

    let definition = PipelineDefinition {
        version: visual.version,
        steps,
        edges,
        context: visual.context.clone(),
        capabilities: None,
        depends_on: Vec::new(),
        trigger: None,
    };
    definition.validate()?;
    Ok(definition)
}

fn synthesize_linear_chain(steps: &[StepDefinition]) -> Vec<VisualEdge> {
    steps
        .windows(2)
        .map(|pair| VisualEdge {
            id: None,
            source: pair[0].key.clone(),
            target: pair[1].key.clone(),
            branch: None,
        })
        .collect()
}
