use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{InferenceError, Result};

/// Class index to human-readable label, total over `0..len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
}

#[derive(Deserialize)]
struct Id2Label {
    id2label: HashMap<String, String>,
}

impl LabelMap {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(InferenceError::ModelLoad("classifier has no labels".into()));
        }
        Ok(Self { labels })
    }

    /// Parse the `id2label` table of a classifier's config.json.
    ///
    /// Keys must cover every index from zero to the number of entries minus
    /// one, otherwise some predicted class could not be named.
    pub fn from_config(config_json: &str) -> Result<Self> {
        let Id2Label { id2label } = serde_json::from_str(config_json)?;

        let mut labels = vec![None; id2label.len()];
        for (key, label) in id2label {
            let idx: usize = key.parse().map_err(|_| {
                InferenceError::ModelLoad(format!("id2label key {:?} is not an index", key))
            })?;
            let slot = labels.get_mut(idx).ok_or_else(|| {
                InferenceError::ModelLoad(format!("id2label index {} is out of range", idx))
            })?;
            *slot = Some(label);
        }

        let labels = labels
            .into_iter()
            .enumerate()
            .map(|(idx, label)| {
                label.ok_or_else(|| {
                    InferenceError::ModelLoad(format!("id2label is missing index {}", idx))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.labels.get(idx).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FACE_CONFIG: &str = r#"{
        "architectures": ["ViTForImageClassification"],
        "id2label": {
            "0": "angry", "1": "disgust", "2": "fear", "3": "happy",
            "4": "neutral", "5": "sad", "6": "surprise"
        }
    }"#;

    #[test]
    fn orders_labels_by_index() {
        let labels = LabelMap::from_config(FACE_CONFIG).unwrap();
        assert_eq!(labels.len(), 7);
        assert_eq!(labels.get(3), Some("happy"));
        assert_eq!(labels.get(6), Some("surprise"));
        assert_eq!(labels.get(7), None);
    }

    #[test]
    fn rejects_gaps() {
        let config = r#"{"id2label": {"0": "a", "2": "c"}}"#;
        assert!(matches!(
            LabelMap::from_config(config),
            Err(InferenceError::ModelLoad(_))
        ));
    }

    #[test]
    fn rejects_non_numeric_keys() {
        let config = r#"{"id2label": {"zero": "a"}}"#;
        assert!(LabelMap::from_config(config).is_err());
    }

    #[test]
    fn rejects_missing_table() {
        assert!(LabelMap::from_config("{}").is_err());
        assert!(LabelMap::new(vec![]).is_err());
    }
}
