//! Classification-metrics payload
//!
//! The confusion matrix and confidence curve are stored as the structured
//! metadata of a dedicated artifact attached to the run.

use crate::api::metadata::MetadataMap;
use crate::error::{Error, Result};

/// One point of the confidence-threshold curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceMetrics {
    /// Decision threshold this point was computed at.
    pub confidence_threshold: f64,
    /// Recall at the threshold.
    pub recall: f64,
    /// False-positive rate at the threshold.
    pub false_positive_rate: f64,
}

/// Classification evaluation results for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationMetrics {
    /// Artifact display name; defaults to the generated artifact id.
    pub display_name: Option<String>,
    /// Class labels, in matrix row/column order.
    pub labels: Vec<String>,
    /// Confusion matrix; `matrix[i][j]` counts label `i` predicted as `j`.
    pub matrix: Vec<Vec<u64>>,
    /// Confidence-threshold curve, if computed.
    pub confidence_metrics: Vec<ConfidenceMetrics>,
}

impl ClassificationMetrics {
    /// Check internal consistency before upload.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the matrix is not square over the
    /// labels, or labels are supplied without a matrix (and vice versa).
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() != self.matrix.is_empty() {
            return Err(Error::InvalidArgument(
                "labels and matrix must be supplied together".to_string(),
            ));
        }
        if self.matrix.len() != self.labels.len() {
            return Err(Error::InvalidArgument(format!(
                "confusion matrix has {} rows for {} labels",
                self.matrix.len(),
                self.labels.len()
            )));
        }
        for (index, row) in self.matrix.iter().enumerate() {
            if row.len() != self.labels.len() {
                return Err(Error::InvalidArgument(format!(
                    "confusion matrix row {index} has {} entries for {} labels",
                    row.len(),
                    self.labels.len()
                )));
            }
        }
        if self.labels.is_empty() && self.confidence_metrics.is_empty() {
            return Err(Error::InvalidArgument(
                "classification metrics are empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The artifact metadata payload.
    #[must_use]
    pub fn to_metadata(&self) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        if !self.labels.is_empty() {
            metadata.insert(
                "confusionMatrix".to_string(),
                serde_json::json!({
                    "annotationSpecs": self
                        .labels
                        .iter()
                        .map(|label| serde_json::json!({ "displayName": label }))
                        .collect::<Vec<_>>(),
                    "rows": self.matrix,
                }),
            );
        }
        if !self.confidence_metrics.is_empty() {
            metadata.insert(
                "confidenceMetrics".to_string(),
                serde_json::Value::Array(
                    self.confidence_metrics
                        .iter()
                        .map(|point| {
                            serde_json::json!({
                                "confidenceThreshold": point.confidence_threshold,
                                "recall": point.recall,
                                "falsePositiveRate": point.false_positive_rate,
                            })
                        })
                        .collect(),
                ),
            );
        }
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_class() -> ClassificationMetrics {
        ClassificationMetrics {
            display_name: None,
            labels: vec!["cat".to_string(), "dog".to_string()],
            matrix: vec![vec![9, 1], vec![2, 8]],
            confidence_metrics: vec![ConfidenceMetrics {
                confidence_threshold: 0.5,
                recall: 0.9,
                false_positive_rate: 0.1,
            }],
        }
    }

    #[test]
    fn test_payload_schema() {
        let metadata = two_class().to_metadata();
        assert_eq!(
            metadata["confusionMatrix"],
            serde_json::json!({
                "annotationSpecs": [
                    {"displayName": "cat"},
                    {"displayName": "dog"},
                ],
                "rows": [[9, 1], [2, 8]],
            })
        );
        assert_eq!(
            metadata["confidenceMetrics"],
            serde_json::json!([
                {"confidenceThreshold": 0.5, "recall": 0.9, "falsePositiveRate": 0.1}
            ])
        );
    }

    #[test]
    fn test_validate_square_matrix() {
        assert!(two_class().validate().is_ok());

        let mut ragged = two_class();
        ragged.matrix[1].push(3);
        assert!(ragged.validate().is_err());

        let mut short = two_class();
        short.matrix.pop();
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(ClassificationMetrics::default().validate().is_err());

        let mut labels_only = ClassificationMetrics::default();
        labels_only.labels.push("cat".to_string());
        assert!(labels_only.validate().is_err());
    }

    #[test]
    fn test_curve_only_is_valid() {
        let curve_only = ClassificationMetrics {
            confidence_metrics: vec![ConfidenceMetrics {
                confidence_threshold: 0.9,
                recall: 0.5,
                false_positive_rate: 0.01,
            }],
            ..ClassificationMetrics::default()
        };
        assert!(curve_only.validate().is_ok());
        assert!(!curve_only.to_metadata().contains_key("confusionMatrix"));
    }
}
