//! Test transition classification.
//!
//! Pure comparison of two normalized result sets. This is the scoring
//! primitive everything downstream depends on, so it takes no container,
//! filesystem, or network dependency and is fully covered by unit and
//! property tests.
//!
//! Only PASSED/FAILED/ERROR outcomes participate: a SKIPPED test was not
//! exercised and belongs to no bucket. A test observed in only one phase is
//! ambiguous — it may be new, renamed, or environment-specific — and is
//! excluded from the four buckets but surfaced in `dropped` so consumers
//! can inspect what was left out.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::testing::{TestExecutionResult, TestStatus};

/// The four transition buckets plus the dropped (single-sided) names.
///
/// Counts are always derived from the sets; there is nothing to drift.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionSet {
    pub fail_to_pass: BTreeSet<String>,
    pub pass_to_pass: BTreeSet<String>,
    pub pass_to_fail: BTreeSet<String>,
    pub fail_to_fail: BTreeSet<String>,
    /// Present in exactly one phase; in no bucket.
    pub dropped: BTreeSet<String>,
}

impl TransitionSet {
    pub fn fail_to_pass_count(&self) -> usize {
        self.fail_to_pass.len()
    }

    pub fn pass_to_pass_count(&self) -> usize {
        self.pass_to_pass.len()
    }

    pub fn pass_to_fail_count(&self) -> usize {
        self.pass_to_fail.len()
    }

    pub fn fail_to_fail_count(&self) -> usize {
        self.fail_to_fail.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.fail_to_pass.is_empty()
            && self.pass_to_pass.is_empty()
            && self.pass_to_fail.is_empty()
            && self.fail_to_fail.is_empty()
    }

    /// All bucketed names — by construction the intersection of the two
    /// classified phases.
    #[allow(dead_code)]
    pub fn classified(&self) -> BTreeSet<String> {
        let mut all = BTreeSet::new();
        all.extend(self.fail_to_pass.iter().cloned());
        all.extend(self.pass_to_pass.iter().cloned());
        all.extend(self.pass_to_fail.iter().cloned());
        all.extend(self.fail_to_fail.iter().cloned());
        all
    }
}

/// Classify every test present in both runs into exactly one bucket.
pub fn classify(pre: &TestExecutionResult, post: &TestExecutionResult) -> TransitionSet {
    classify_maps(&participating(pre), &participating(post))
}

/// Name -> status for the outcomes that participate in classification.
fn participating(result: &TestExecutionResult) -> BTreeMap<String, TestStatus> {
    result
        .status_map()
        .into_iter()
        .filter(|(_, status)| *status != TestStatus::Skipped)
        .collect()
}

fn classify_maps(
    pre: &BTreeMap<String, TestStatus>,
    post: &BTreeMap<String, TestStatus>,
) -> TransitionSet {
    let mut set = TransitionSet::default();

    for (name, pre_status) in pre {
        let Some(post_status) = post.get(name) else {
            set.dropped.insert(name.clone());
            continue;
        };

        let bucket = match (pre_status.is_failing(), post_status.is_failing()) {
            (true, false) => &mut set.fail_to_pass,
            (false, false) => &mut set.pass_to_pass,
            (false, true) => &mut set.pass_to_fail,
            (true, true) => &mut set.fail_to_fail,
        };
        bucket.insert(name.clone());
    }

    for name in post.keys() {
        if !pre.contains_key(name) {
            set.dropped.insert(name.clone());
        }
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestCase;

    fn result(cases: &[(&str, TestStatus)]) -> TestExecutionResult {
        TestExecutionResult {
            test_cases: cases
                .iter()
                .map(|(qualified, status)| {
                    let (class_name, name) = qualified.rsplit_once('.').unwrap();
                    TestCase {
                        name: name.to_string(),
                        class_name: class_name.to_string(),
                        status: *status,
                        duration: 0.0,
                        failure_message: None,
                    }
                })
                .collect(),
            exit_code: 0,
            duration_secs: 0.0,
            build_successful: true,
            gradle_command: String::new(),
            raw_output: String::new(),
        }
    }

    #[test]
    fn fixed_test_is_fail_to_pass_and_stable_test_is_pass_to_pass() {
        // Pre: T1 FAILED, T2 PASSED. Post: both PASSED.
        let pre = result(&[("a.T1", TestStatus::Failed), ("a.T2", TestStatus::Passed)]);
        let post = result(&[("a.T1", TestStatus::Passed), ("a.T2", TestStatus::Passed)]);

        let set = classify(&pre, &post);
        assert_eq!(set.fail_to_pass, ["a.T1".to_string()].into_iter().collect());
        assert_eq!(set.pass_to_pass, ["a.T2".to_string()].into_iter().collect());
        assert!(set.pass_to_fail.is_empty());
        assert!(set.fail_to_fail.is_empty());
        assert!(set.dropped.is_empty());
    }

    #[test]
    fn error_status_counts_as_failing_on_both_sides() {
        let pre = result(&[("a.T1", TestStatus::Error), ("a.T2", TestStatus::Passed)]);
        let post = result(&[("a.T1", TestStatus::Passed), ("a.T2", TestStatus::Error)]);

        let set = classify(&pre, &post);
        assert!(set.fail_to_pass.contains("a.T1"));
        assert!(set.pass_to_fail.contains("a.T2"));
    }

    #[test]
    fn single_sided_tests_are_dropped_not_bucketed() {
        // Pre-run build failed: no results. Post run has T1 passing. T1 must
        // NOT be reported as fail_to_pass.
        let pre = result(&[]);
        let post = result(&[("a.T1", TestStatus::Passed)]);

        let set = classify(&pre, &post);
        assert!(set.is_empty());
        assert_eq!(set.dropped, ["a.T1".to_string()].into_iter().collect());
    }

    #[test]
    fn skipped_tests_participate_in_no_bucket() {
        let pre = result(&[("a.T1", TestStatus::Skipped), ("a.T2", TestStatus::Passed)]);
        let post = result(&[("a.T1", TestStatus::Passed), ("a.T2", TestStatus::Passed)]);

        let set = classify(&pre, &post);
        // T1 was not exercised pre-patch; it is single-sided, hence dropped.
        assert!(set.dropped.contains("a.T1"));
        assert_eq!(set.classified(), ["a.T2".to_string()].into_iter().collect());
    }

    #[test]
    fn classify_is_idempotent() {
        let pre = result(&[
            ("a.T1", TestStatus::Failed),
            ("a.T2", TestStatus::Passed),
            ("a.T3", TestStatus::Error),
        ]);
        let post = result(&[
            ("a.T1", TestStatus::Passed),
            ("a.T2", TestStatus::Failed),
            ("a.T4", TestStatus::Passed),
        ]);

        assert_eq!(classify(&pre, &post), classify(&pre, &post));
    }

    #[test]
    fn counts_equal_set_cardinality_by_construction() {
        let pre = result(&[("a.T1", TestStatus::Failed), ("a.T2", TestStatus::Failed)]);
        let post = result(&[("a.T1", TestStatus::Passed), ("a.T2", TestStatus::Failed)]);

        let set = classify(&pre, &post);
        assert_eq!(set.fail_to_pass_count(), set.fail_to_pass.len());
        assert_eq!(set.fail_to_fail_count(), set.fail_to_fail.len());
        assert_eq!(set.fail_to_pass_count(), 1);
        assert_eq!(set.fail_to_fail_count(), 1);
    }

    #[test]
    fn serde_round_trip_preserves_sets() {
        let pre = result(&[("a.T1", TestStatus::Failed), ("a.T2", TestStatus::Passed)]);
        let post = result(&[("a.T1", TestStatus::Passed), ("a.T3", TestStatus::Passed)]);

        let set = classify(&pre, &post);
        let json = serde_json::to_string(&set).unwrap();
        let restored: TransitionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, restored);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_status() -> impl Strategy<Value = TestStatus> {
            prop_oneof![
                Just(TestStatus::Passed),
                Just(TestStatus::Failed),
                Just(TestStatus::Error),
                Just(TestStatus::Skipped),
            ]
        }

        fn arb_run() -> impl Strategy<Value = BTreeMap<String, TestStatus>> {
            proptest::collection::btree_map("[a-d]\\.[A-D]{1,3}", arb_status(), 0..24)
        }

        proptest! {
            /// The four buckets partition the intersection of the
            /// participating names: no overlaps, no omissions.
            #[test]
            fn buckets_partition_the_intersection(pre in arb_run(), post in arb_run()) {
                let set = classify_maps(
                    &pre.iter().filter(|(_, s)| **s != TestStatus::Skipped).map(|(k, v)| (k.clone(), *v)).collect(),
                    &post.iter().filter(|(_, s)| **s != TestStatus::Skipped).map(|(k, v)| (k.clone(), *v)).collect(),
                );

                let buckets = [
                    &set.fail_to_pass,
                    &set.pass_to_pass,
                    &set.pass_to_fail,
                    &set.fail_to_fail,
                ];

                // Pairwise disjoint.
                for (i, a) in buckets.iter().enumerate() {
                    for b in buckets.iter().skip(i + 1) {
                        prop_assert!(a.intersection(b).next().is_none());
                    }
                }

                // Union covers exactly the intersection of participants.
                let pre_names: BTreeSet<&String> = pre
                    .iter()
                    .filter(|(_, s)| **s != TestStatus::Skipped)
                    .map(|(k, _)| k)
                    .collect();
                let post_names: BTreeSet<&String> = post
                    .iter()
                    .filter(|(_, s)| **s != TestStatus::Skipped)
                    .map(|(k, _)| k)
                    .collect();
                let intersection: BTreeSet<String> = pre_names
                    .intersection(&post_names)
                    .map(|s| (*s).clone())
                    .collect();
                prop_assert_eq!(set.classified(), intersection);

                // Dropped is exactly the symmetric difference.
                let symmetric: BTreeSet<String> = pre_names
                    .symmetric_difference(&post_names)
                    .map(|s| (*s).clone())
                    .collect();
                prop_assert_eq!(set.dropped, symmetric);
            }
        }
    }
}
