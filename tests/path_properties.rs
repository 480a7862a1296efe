//! Property tests for path generation: determinism, prerequisite ordering
//! and the entry cap, over randomly shaped acyclic skill graphs.

mod common;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use common::{harness, harness_with_config, item};
use progression_engine::{EngineConfig, LearningItem, TargetProfile};
use proptest::prelude::*;

fn run<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// Acyclic by construction: skill `i` may only require skills with a lower
/// index, picked from the bits of `masks[i]`.
fn catalog_from(skill_count: usize, masks: &[u8]) -> Vec<LearningItem> {
    let mut items = Vec::new();
    for i in 0..skill_count {
        let skill = format!("skill-{i}");
        let prereqs: Vec<String> = (0..i)
            .filter(|j| masks[i] >> j & 1 == 1)
            .map(|j| format!("skill-{j}"))
            .collect();
        let prereq_refs: Vec<&str> = prereqs.iter().map(|s| s.as_str()).collect();
        for k in 0..2u8 {
            items.push(item(
                &format!("item-{i}-{k}"),
                &[skill.as_str()],
                k + 1,
                &prereq_refs,
            ));
        }
    }
    items
}

fn profile_from(skill_count: usize, levels: &[f64]) -> TargetProfile {
    TargetProfile {
        name: "generated".to_string(),
        required: (0..skill_count)
            .map(|i| (format!("skill-{i}"), levels[i]))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Union of prerequisite skills over a skill's catalog items.
fn catalog_prereqs(catalog: &[LearningItem]) -> HashMap<String, Vec<String>> {
    let mut prereqs: HashMap<String, Vec<String>> = HashMap::new();
    for entry in catalog {
        for tag in &entry.skill_tags {
            let skill_prereqs = prereqs.entry(tag.clone()).or_default();
            for p in &entry.prerequisite_skills {
                if !skill_prereqs.contains(p) {
                    skill_prereqs.push(p.clone());
                }
            }
        }
    }
    prereqs
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn generation_is_deterministic_for_a_fresh_learner(
        skill_count in 2usize..6,
        masks in proptest::collection::vec(any::<u8>(), 6),
        levels in proptest::collection::vec(0.1f64..=1.0, 6),
    ) {
        let catalog = catalog_from(skill_count, &masks);
        let profile = profile_from(skill_count, &levels);
        let h = harness(catalog);

        let (first, second) = run(async {
            let first = h
                .engine
                .recommendations()
                .generate_path("learner-1", &profile)
                .await
                .unwrap();
            let second = h
                .engine
                .recommendations()
                .generate_path("learner-1", &profile)
                .await
                .unwrap();
            (first, second)
        });

        prop_assert_eq!(first.entries, second.entries);
        prop_assert_eq!(first.source_gaps, second.source_gaps);
        prop_assert_eq!(first.snapshot_version, 0);
    }

    #[test]
    fn prerequisites_always_precede_their_dependents(
        skill_count in 2usize..6,
        masks in proptest::collection::vec(any::<u8>(), 6),
        levels in proptest::collection::vec(0.1f64..=1.0, 6),
    ) {
        let catalog = catalog_from(skill_count, &masks);
        let prereqs = catalog_prereqs(&catalog);
        let profile = profile_from(skill_count, &levels);
        let h = harness(catalog);

        let path = run(async {
            h.engine
                .recommendations()
                .generate_path("learner-1", &profile)
                .await
                .unwrap()
        });

        let position: HashMap<&str, usize> = path
            .entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.skill_id.as_str(), idx))
            .collect();
        // A fresh learner has every prerequisite unmet, so each one must be
        // in the path, ahead of its dependent.
        for entry in &path.entries {
            for prereq in prereqs.get(&entry.skill_id).into_iter().flatten() {
                let prereq_pos = position.get(prereq.as_str());
                prop_assert!(prereq_pos.is_some(), "missing prerequisite {}", prereq);
                prop_assert!(prereq_pos < position.get(entry.skill_id.as_str()));
            }
        }
    }

    #[test]
    fn entry_cap_is_respected(
        skill_count in 2usize..6,
        masks in proptest::collection::vec(any::<u8>(), 6),
        levels in proptest::collection::vec(0.1f64..=1.0, 6),
    ) {
        let catalog = catalog_from(skill_count, &masks);
        let profile = profile_from(skill_count, &levels);
        let mut config = EngineConfig::default();
        config.path.max_path_entries = 2;
        config.path.items_per_skill = 1;
        let h = harness_with_config(catalog, config);

        let path = run(async {
            h.engine
                .recommendations()
                .generate_path("learner-1", &profile)
                .await
                .unwrap()
        });

        prop_assert!(path.entries.len() <= 2);
        for entry in &path.entries {
            prop_assert_eq!(entry.item_ids.len(), 1);
        }
    }

    #[test]
    fn gaps_are_sorted_widest_first(
        skill_count in 2usize..6,
        masks in proptest::collection::vec(any::<u8>(), 6),
        levels in proptest::collection::vec(0.1f64..=1.0, 6),
    ) {
        let catalog = catalog_from(skill_count, &masks);
        let profile = profile_from(skill_count, &levels);
        let h = harness(catalog);

        let gaps = run(async {
            h.engine
                .recommendations()
                .analyze_gaps("learner-1", &profile)
                .await
        });

        prop_assert_eq!(gaps.len(), skill_count);
        for pair in gaps.windows(2) {
            prop_assert!(pair[0].gap >= pair[1].gap);
        }
    }
}
