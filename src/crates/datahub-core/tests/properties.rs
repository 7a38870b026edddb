//! Property tests for conversion and classification invariants

use datahub_core::{
    is_recoverable_message, to_canonical, to_visual, PipelineDefinition, RecordFailure,
    StepConfig, StepDefinition, StepKind,
};
use proptest::prelude::*;
use serde_json::json;

fn step_kind_strategy() -> impl Strategy<Value = StepKind> {
    prop_oneof![
        Just(StepKind::Extract),
        Just(StepKind::Transform),
        Just(StepKind::Validate),
        Just(StepKind::Enrich),
        Just(StepKind::Route),
        Just(StepKind::Load),
        Just(StepKind::Export),
        Just(StepKind::Feed),
        Just(StepKind::Sink),
        Just(StepKind::Gate),
    ]
}

prop_compose! {
    fn arb_step(index: usize)(
        kind in step_kind_strategy(),
        adapter in proptest::option::of("[a-z]{3,8}"),
    ) -> StepDefinition {
        let mut config = StepConfig::new();
        if let Some(adapter) = adapter {
            config = config.with("adapterCode", json!(adapter));
        }
        StepDefinition::new(format!("step-{index}"), kind).with_config(config)
    }
}

fn arb_definition() -> impl Strategy<Value = PipelineDefinition> {
    (1u32..100, 1usize..8).prop_flat_map(|(version, len)| {
        let steps: Vec<_> = (0..len).map(arb_step).collect();
        steps.prop_map(move |steps| {
            let mut definition = PipelineDefinition::new(version);
            for step in steps {
                definition = definition.with_step(step);
            }
            definition
        })
    })
}

proptest! {
    /// Round trip through the visual form is the identity for DAG
    /// definitions, and identity-up-to-synthesized-chain for linear ones.
    #[test]
    fn visual_round_trip_preserves_steps(definition in arb_definition()) {
        let visual = to_visual(&definition);
        let back = to_canonical(&visual).unwrap();
        prop_assert_eq!(&back.version, &definition.version);
        prop_assert_eq!(&back.steps, &definition.steps);
        // Linear chains synthesize n-1 edges.
        prop_assert_eq!(back.edges.len(), definition.steps.len().saturating_sub(1));
    }

    /// Classification is exactly "message contains a transient marker,
    /// case-insensitively".
    #[test]
    fn recoverable_iff_marker_present(
        prefix in "[a-zA-Z0-9 ]{0,20}",
        marker in prop_oneof![
            Just(None),
            Just(Some("timeout")),
            Just(Some("TIMEOUT")),
            Just(Some("Connection")),
            Just(Some("temporarily")),
        ],
        suffix in "[a-zA-Z0-9 ]{0,20}",
    ) {
        let message = match marker {
            Some(marker) => format!("{prefix}{marker}{suffix}"),
            None => format!("{prefix} {suffix}"),
        };
        let expected = {
            let lowered = message.to_lowercase();
            lowered.contains("timeout")
                || lowered.contains("connection")
                || lowered.contains("temporarily")
        };
        prop_assert_eq!(is_recoverable_message(&message), expected);
        let failure = RecordFailure::classify(message, None);
        prop_assert_eq!(failure.recoverable, expected);
    }
}
