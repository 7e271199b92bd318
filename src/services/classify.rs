//! Classification of recognition results into target group buckets.
//!
//! Rules, evaluated in order:
//! 1. no qualifying face → the `other` bucket
//! 2. each distinct confident subject → its subject bucket
//! 3. any non-confident face on a first pass → also `need-recognition`
//! 4. on a re-recognition pass, confident subjects still fan out but the
//!    item is never re-added to `need-recognition`; whether it leaves its
//!    current bucket is the caller's decision, based on
//!    [`RecognitionResult::all_confident`].

use std::collections::BTreeSet;

use crate::config::BucketNames;
use crate::models::recognition::RecognitionResult;

/// Target buckets for one classified item, deduplicated and in
/// deterministic order.
pub fn classify(
    result: &RecognitionResult,
    re_recognition: bool,
    buckets: &BucketNames,
) -> Vec<String> {
    if !result.recognized {
        return vec![buckets.other()];
    }

    let subjects: BTreeSet<String> = result
        .matches
        .iter()
        .filter(|m| m.confident)
        .filter_map(|m| m.subject.as_deref())
        .map(|s| buckets.subject(s))
        .collect();

    let mut targets: Vec<String> = subjects.into_iter().collect();

    let any_unconfident = result.matches.iter().any(|m| !m.confident);
    if any_unconfident && !re_recognition {
        targets.push(buckets.need_recognition());
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::recognition::{RawFace, RawSubject, RecognitionResult};

    fn buckets() -> BucketNames {
        BucketNames::new("ms")
    }

    fn result(faces: &[(f32, &[(&str, f32)])]) -> RecognitionResult {
        let raw: Vec<RawFace> = faces
            .iter()
            .map(|(prob, subjects)| RawFace {
                probability: *prob,
                subjects: subjects
                    .iter()
                    .map(|(s, sim)| RawSubject {
                        subject: s.to_string(),
                        similarity: *sim,
                    })
                    .collect(),
            })
            .collect();
        RecognitionResult::from_faces(&raw, 0.9, 0.95)
    }

    #[test]
    fn no_face_goes_to_other() {
        let r = result(&[]);
        assert_eq!(classify(&r, false, &buckets()), vec!["ms-other"]);

        // A box below the detection gate is not a face.
        let r = result(&[(0.89, &[("alice", 0.99)][..])]);
        assert_eq!(classify(&r, false, &buckets()), vec!["ms-other"]);
    }

    #[test]
    fn confident_subjects_fan_out_deduplicated() {
        let r = result(&[
            (0.95, &[("alice", 0.97)][..]),
            (0.96, &[("alice", 0.98)][..]),
            (0.97, &[("bob", 0.96)][..]),
        ]);
        assert_eq!(
            classify(&r, false, &buckets()),
            vec!["ms-alice", "ms-bob"]
        );
    }

    #[test]
    fn partial_confidence_adds_need_recognition_on_first_pass_only() {
        let r = result(&[
            (0.95, &[("alice", 0.97)][..]),
            (0.96, &[("bob", 0.50)][..]),
        ]);
        assert_eq!(
            classify(&r, false, &buckets()),
            vec!["ms-alice", "ms-needrecognition"]
        );
        assert_eq!(classify(&r, true, &buckets()), vec!["ms-alice"]);
        assert!(!r.all_confident());
    }

    #[test]
    fn re_recognition_with_nothing_confident_yields_no_targets() {
        let r = result(&[(0.95, &[("bob", 0.50)][..])]);
        assert!(classify(&r, true, &buckets()).is_empty());
    }
}
