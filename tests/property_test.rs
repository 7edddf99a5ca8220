//! Property-based checks over the task graph and cache key space.

use hivemind::domain::models::task::Task;
use hivemind::domain::models::workflow::Workflow;
use hivemind::services::ResponseCache;
use proptest::prelude::*;

proptest! {
    /// Randomly generated edge lists that only point at already-present
    /// tasks always produce an acyclic graph the workflow accepts.
    #[test]
    fn backward_edges_never_form_cycles(edge_choices in proptest::collection::vec(0usize..8, 1..24)) {
        let mut workflow = Workflow::new("prop", "goal");
        let mut ids = Vec::new();

        for (index, choice) in edge_choices.iter().enumerate() {
            let mut task = Task::new(format!("t{index}"), "generated");
            if !ids.is_empty() {
                let dep = ids[choice % ids.len()];
                task = task.depends_on(dep);
            }
            ids.push(task.id);
            prop_assert!(workflow.add_task(task).is_ok());
        }
        prop_assert_eq!(workflow.tasks.len(), edge_choices.len());
    }

    /// Cache keys collide only when every identity component matches.
    #[test]
    fn cache_keys_are_identity_sensitive(
        prompt in ".{0,64}",
        model in "[a-z]{1,12}",
        temperature in 0.0f64..2.0,
        max_tokens in 1u64..8192,
    ) {
        let key = ResponseCache::cache_key(&prompt, &model, temperature, max_tokens);
        prop_assert!(key.starts_with("llm_cache:"));

        let other_temp = ResponseCache::cache_key(&prompt, &model, temperature + 0.25, max_tokens);
        prop_assert_ne!(&key, &other_temp);

        let other_tokens = ResponseCache::cache_key(&prompt, &model, temperature, max_tokens + 1);
        prop_assert_ne!(&key, &other_tokens);

        let same = ResponseCache::cache_key(&prompt, &model, temperature, max_tokens);
        prop_assert_eq!(key, same);
    }

    /// Unit-cost arithmetic scales linearly and never goes negative.
    #[test]
    fn model_cost_is_linear(input in 0u64..5_000_000, output in 0u64..5_000_000) {
        let spec = hivemind::providers::mock_spec("p", "m");
        let cost = spec.cost(input, output);
        prop_assert!(cost >= 0.0);
        let expected = (input as f64 / 1_000_000.0) * spec.input_cost_per_mtok
            + (output as f64 / 1_000_000.0) * spec.output_cost_per_mtok;
        prop_assert!((cost - expected).abs() < 1e-9);
    }
}
