//! Evaluation
//!
//! Argmax predictions over representation vectors and multiclass scores
//! (accuracy, F1) against gold emotion labels.

use crate::emotion::{Emotion, EmotionVector, EMOTION_DIM};
use crate::{EmotionCoreError, Result};
use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How per-class F1 scores are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum F1Average {
    /// Global counts; equals accuracy for single-label data
    Micro,
    /// Unweighted mean over labels that occur in either sequence
    Macro,
    /// Mean weighted by each label's support in the gold labels
    #[default]
    Weighted,
}

/// Dominant emotion of each representation
pub fn predict_labels(representations: &[EmotionVector]) -> Vec<Emotion> {
    representations.iter().map(EmotionVector::argmax).collect()
}

/// Dominant emotion of each row of an `[N, 7]` tensor
pub fn predict_labels_tensor(logits: &Tensor) -> Result<Vec<Emotion>> {
    Ok(predict_labels(&EmotionVector::rows_from_tensor(logits)?))
}

fn check_lengths(predictions: &[Emotion], truths: &[Emotion]) -> Result<()> {
    if predictions.is_empty() {
        return Err(EmotionCoreError::Training("nothing to evaluate".into()));
    }
    if predictions.len() != truths.len() {
        return Err(EmotionCoreError::DimensionMismatch {
            expected: vec![truths.len()],
            actual: vec![predictions.len()],
        });
    }
    Ok(())
}

/// Fraction of predictions equal to the gold label
pub fn multiclass_accuracy(predictions: &[Emotion], truths: &[Emotion]) -> Result<f32> {
    check_lengths(predictions, truths)?;
    let correct = predictions
        .iter()
        .zip(truths)
        .filter(|(p, t)| p == t)
        .count();
    Ok(correct as f32 / truths.len() as f32)
}

#[derive(Debug, Clone, Copy, Default)]
struct ClassCounts {
    tp: usize,
    fp: usize,
    fn_: usize,
}

impl ClassCounts {
    fn f1(&self) -> f32 {
        let denom = 2 * self.tp + self.fp + self.fn_;
        if denom == 0 {
            0.0
        } else {
            (2 * self.tp) as f32 / denom as f32
        }
    }

    fn support(&self) -> usize {
        self.tp + self.fn_
    }

    fn occurs(&self) -> bool {
        self.tp + self.fp + self.fn_ > 0
    }
}

fn class_counts(predictions: &[Emotion], truths: &[Emotion]) -> [ClassCounts; EMOTION_DIM] {
    let mut counts = [ClassCounts::default(); EMOTION_DIM];
    for (p, t) in predictions.iter().zip(truths) {
        if p == t {
            counts[t.index()].tp += 1;
        } else {
            counts[p.index()].fp += 1;
            counts[t.index()].fn_ += 1;
        }
    }
    counts
}

/// Multiclass F1 over the 7 emotion labels
pub fn multiclass_f1(predictions: &[Emotion], truths: &[Emotion], average: F1Average) -> Result<f32> {
    check_lengths(predictions, truths)?;
    let counts = class_counts(predictions, truths);

    let score = match average {
        F1Average::Micro => {
            let total = counts.iter().fold(ClassCounts::default(), |acc, c| ClassCounts {
                tp: acc.tp + c.tp,
                fp: acc.fp + c.fp,
                fn_: acc.fn_ + c.fn_,
            });
            total.f1()
        }
        F1Average::Macro => {
            let present: Vec<f32> = counts.iter().filter(|c| c.occurs()).map(ClassCounts::f1).collect();
            present.iter().sum::<f32>() / present.len() as f32
        }
        F1Average::Weighted => {
            let total_support = truths.len() as f32;
            counts
                .iter()
                .map(|c| c.f1() * c.support() as f32 / total_support)
                .sum()
        }
    };
    Ok(score)
}

/// Scores for one evaluation run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub f1_score: f32,
    pub accuracy: f32,
    /// Equal-weight blend of F1 and accuracy, used for model selection
    pub optimize_metric: f32,
}

impl EvaluationReport {
    pub fn compute(predictions: &[Emotion], truths: &[Emotion], average: F1Average) -> Result<Self> {
        let f1_score = multiclass_f1(predictions, truths, average)?;
        let accuracy = multiclass_accuracy(predictions, truths)?;
        Ok(Self {
            f1_score,
            accuracy,
            optimize_metric: 0.5 * f1_score + 0.5 * accuracy,
        })
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "f1={:.4} accuracy={:.4} optimize={:.4}",
            self.f1_score, self.accuracy, self.optimize_metric
        )
    }
}

/// Comma-separated label names, e.g. for report headers
pub fn label_names(labels: &[Emotion]) -> String {
    labels
        .iter()
        .map(|l| l.name())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use Emotion::*;

    #[test]
    fn test_predict_labels() {
        let reps = [
            EmotionVector::new([0.1, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0]),
            EmotionVector::new([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -0.5]),
        ];
        assert_eq!(predict_labels(&reps), vec![Anger, Neutral]);
    }

    #[test]
    fn test_predict_labels_tensor() {
        let t = Tensor::new(
            &[[0.0f32, 0.0, 0.0, 0.8, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0, 0.0, 0.3, 0.0]],
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(predict_labels_tensor(&t).unwrap(), vec![Fear, Sadness]);
    }

    #[test]
    fn test_accuracy() {
        let preds = [Anger, Fear, Fear, Neutral];
        let truth = [Anger, Fear, Sadness, Sadness];
        assert_eq!(multiclass_accuracy(&preds, &truth).unwrap(), 0.5);
    }

    #[test]
    fn test_f1_averages() {
        let preds = [Anger, Anger, Fear, Fear];
        let truth = [Anger, Fear, Fear, Fear];
        // anger: tp1 fp1 fn0 -> 2/3 ; fear: tp2 fp0 fn1 -> 4/5
        let micro = multiclass_f1(&preds, &truth, F1Average::Micro).unwrap();
        let macro_ = multiclass_f1(&preds, &truth, F1Average::Macro).unwrap();
        let weighted = multiclass_f1(&preds, &truth, F1Average::Weighted).unwrap();

        assert!((micro - 0.75).abs() < 1e-6);
        assert!((macro_ - (2.0 / 3.0 + 0.8) / 2.0).abs() < 1e-6);
        assert!((weighted - (2.0 / 3.0 * 0.25 + 0.8 * 0.75)).abs() < 1e-6);
    }

    #[test]
    fn test_perfect_predictions() {
        let labels = [Neutral, Surprise, Disgust];
        let report = EvaluationReport::compute(&labels, &labels, F1Average::Weighted).unwrap();
        assert_eq!(report.f1_score, 1.0);
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.optimize_metric, 1.0);
    }

    #[test]
    fn test_optimize_metric_blend() {
        let report = EvaluationReport::compute(
            &[Anger, Anger, Fear, Fear],
            &[Anger, Fear, Fear, Fear],
            F1Average::Macro,
        )
        .unwrap();
        let expected = 0.5 * report.f1_score + 0.5 * report.accuracy;
        assert!((report.optimize_metric - expected).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(multiclass_accuracy(&[], &[]).is_err());
        assert!(matches!(
            multiclass_f1(&[Anger], &[Anger, Fear], F1Average::Micro),
            Err(EmotionCoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_label_names() {
        assert_eq!(label_names(&[Neutral, Happiness]), "neutral,happiness");
        assert_eq!(label_names(&Emotion::ALL).split(',').count(), EMOTION_DIM);
    }
}
