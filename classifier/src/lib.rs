//! Viral pneumonia screening of chest X-rays.
//!
//! A pretrained ResNet-18 (two output classes, exported to ONNX) is run by
//! tract. Images are converted to RGB, resized to 224x224 and normalized
//! before a single forward pass; the scores go through a softmax to give a
//! label, a confidence, and both class probabilities.
//!
//! ```no_run
//! # fn main() -> tract_onnx::prelude::TractResult<()> {
//! use pneumonia_classifier::{preprocess, Classifier};
//!
//! let classifier = Classifier::load("viral_pneumonia_model.onnx")?;
//! let image = preprocess::decode(&std::fs::read("chest.jpeg")?)?;
//! let prediction = classifier.classify(&image)?;
//! println!("{} ({}%)", prediction.prediction, prediction.confidence);
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod model;
pub mod prediction;
pub mod preprocess;
pub mod preview;

pub use self::model::{Classifier, DEFAULT_MODEL_PATH, Network, OnnxNetwork};
pub use self::prediction::{Label, Prediction, Probabilities};

pub use tract_onnx;
pub use tract_onnx::prelude::TractResult;
