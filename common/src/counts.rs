//! Per-class tally of detections.
//!
use serde::{Deserialize, Serialize};

use crate::detection::Detection;

/// Number of detections of one ripeness class.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClassCount {
    pub name: String,
    pub count: usize,
}

/// Class counts in order of first appearance.
///
/// Detections arrive sorted by descending confidence, so the class of the most confident
/// detection comes first.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ClassCounts(Vec<ClassCount>);

impl ClassCounts {
    pub fn tally(detections: &[Detection]) -> Self {
        let mut counts: Vec<ClassCount> = Vec::new();
        for detection in detections {
            match counts.iter_mut().find(|c| c.name == detection.label) {
                Some(entry) => entry.count += 1,
                None => counts.push(ClassCount {
                    name: detection.label.clone(),
                    count: 1,
                }),
            }
        }

        Self(counts)
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.0.iter().find(|c| c.name == name).map(|c| c.count)
    }

    pub fn total(&self) -> usize {
        self.0.iter().map(|c| c.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassCount> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a ClassCounts {
    type Item = &'a ClassCount;
    type IntoIter = std::slice::Iter<'a, ClassCount>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::detection::BBox;

    fn detection(label: &str, confidence: f32) -> Detection {
        Detection {
            bbox: BBox::default(),
            class_id: 0,
            label: label.into(),
            confidence,
        }
    }

    #[test]
    fn test_tally_keeps_first_appearance_order() {
        let detections = vec![
            detection("ripe", 0.9),
            detection("unripe", 0.8),
            detection("ripe", 0.7),
            detection("overripe", 0.6),
            detection("ripe", 0.5),
        ];

        let counts = ClassCounts::tally(&detections);
        let names: Vec<_> = counts.iter().map(|c| c.name.as_str()).collect();

        assert_eq!(names, vec!["ripe", "unripe", "overripe"]);
        assert_eq!(counts.get("ripe"), Some(3));
        assert_eq!(counts.get("empty_bunch"), None);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn test_tally_of_nothing() {
        let counts = ClassCounts::tally(&[]);
        assert!(counts.is_empty());
        assert_eq!(counts.total(), 0);
    }
}
