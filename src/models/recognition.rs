//! Recognition results and their derivation from raw face boxes.

use serde::{Deserialize, Serialize};

/// One subject candidate returned by the recognition service.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RawSubject {
    pub subject: String,
    pub similarity: f32,
}

/// One detected face box with its subject candidates.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RawFace {
    /// Detection probability of the box itself.
    pub probability: f32,
    #[serde(default)]
    pub subjects: Vec<RawSubject>,
}

/// The best match for a single qualifying face.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FaceMatch {
    /// Best-matching subject, absent when the collection returned none.
    pub subject: Option<String>,
    pub similarity: f32,
    pub confident: bool,
}

/// Classification input derived from the raw service response.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RecognitionResult {
    /// Whether any box qualified as a face at all.
    pub recognized: bool,
    /// One entry per qualifying face.
    pub matches: Vec<FaceMatch>,
}

impl RecognitionResult {
    /// Derive a result from raw boxes.
    ///
    /// A box is treated as a face only when its detection probability
    /// reaches `detection_threshold`. Within a face the best-matching
    /// subject (highest similarity) is kept, and it is confident when its
    /// similarity reaches `confidence_threshold`.
    pub fn from_faces(
        faces: &[RawFace],
        detection_threshold: f32,
        confidence_threshold: f32,
    ) -> Self {
        let matches: Vec<FaceMatch> = faces
            .iter()
            .filter(|face| face.probability >= detection_threshold)
            .map(|face| {
                let best = face
                    .subjects
                    .iter()
                    .max_by(|a, b| a.similarity.total_cmp(&b.similarity));
                match best {
                    Some(s) => FaceMatch {
                        subject: Some(s.subject.clone()),
                        similarity: s.similarity,
                        confident: s.similarity >= confidence_threshold,
                    },
                    None => FaceMatch {
                        subject: None,
                        similarity: 0.0,
                        confident: false,
                    },
                }
            })
            .collect();

        Self {
            recognized: !matches.is_empty(),
            matches,
        }
    }

    /// Every qualifying face carries a confident subject match.
    pub fn all_confident(&self) -> bool {
        self.recognized && self.matches.iter().all(|m| m.confident)
    }
}
