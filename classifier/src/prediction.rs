use std::fmt;

use anyhow::ensure;
use serde::Serialize;
use tract_onnx::prelude::*;

/// Number of classes the network scores.
pub const CLASSES: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Label {
    #[serde(rename = "Normal/Other")]
    NormalOther,
    #[serde(rename = "Viral Pneumonia")]
    ViralPneumonia,
}

impl Label {
    /// Labels in network output order.
    pub const ALL: [Label; CLASSES] = [Label::NormalOther, Label::ViralPneumonia];

    pub fn name(&self) -> &'static str {
        match self {
            Label::NormalOther => "Normal/Other",
            Label::ViralPneumonia => "Viral Pneumonia",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Class probabilities, as percentages rounded to two decimals.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Probabilities {
    #[serde(rename = "Normal/Other")]
    pub normal_other: f64,
    #[serde(rename = "Viral Pneumonia")]
    pub viral_pneumonia: f64,
}

impl Probabilities {
    pub fn get(&self, label: Label) -> f64 {
        match label {
            Label::NormalOther => self.normal_other,
            Label::ViralPneumonia => self.viral_pneumonia,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub prediction: Label,
    pub confidence: f64,
    pub probabilities: Probabilities,
}

impl Prediction {
    /// Turns raw network scores into a labelled prediction.
    ///
    /// The winning class is the first one with the highest probability, and
    /// `confidence` is its probability, so it always equals the maximum of
    /// the reported probabilities.
    pub fn from_logits(logits: &[f32]) -> TractResult<Prediction> {
        ensure!(
            logits.len() == CLASSES,
            "Expected {} scores from the network, got {}",
            CLASSES,
            logits.len()
        );
        ensure!(
            logits.iter().all(|x| x.is_finite()),
            "Network produced non finite scores: {:?}",
            logits
        );
        let probs = softmax(logits);
        let best = (1..CLASSES).fold(0, |best, ix| if probs[ix] > probs[best] { ix } else { best });
        Ok(Prediction {
            prediction: Label::ALL[best],
            confidence: percent(probs[best]),
            probabilities: Probabilities {
                normal_other: percent(probs[0]),
                viral_pneumonia: percent(probs[1]),
            },
        })
    }
}

/// Numerically stable softmax, computed in f64.
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&x| (x as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn percent(p: f64) -> f64 {
    (p * 10_000.0).round() / 100.0
}
