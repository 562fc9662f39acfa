use std::path::Path;
use std::time::Instant;

use anyhow::{Context, bail, ensure};
use image::DynamicImage;
use tract_onnx::prelude::*;

use crate::prediction::{CLASSES, Prediction};
use crate::preprocess::{INPUT_SIZE, image_to_tensor};

/// Default location of the weights, relative to the working directory.
pub const DEFAULT_MODEL_PATH: &str = "viral_pneumonia_model.onnx";

/// ONNX operators found in a ResNet-18 export.
pub const RESNET_OPERATORS: &[&str] = &[
    "Conv",
    "BatchNormalization",
    "Relu",
    "MaxPool",
    "Add",
    "GlobalAveragePool",
    "Flatten",
    "Gemm",
];

/// Something computing one raw score per class from a preprocessed input.
pub trait Network: Send + Sync {
    fn logits(&self, input: Tensor) -> TractResult<Vec<f32>>;
}

pub struct OnnxNetwork {
    plan: TypedRunnableModel<TypedModel>,
}

impl OnnxNetwork {
    /// Loads and optimizes the ONNX network, refusing anything that does not
    /// map a 1x3x224x224 image to two scores.
    pub fn load(path: impl AsRef<Path>) -> TractResult<OnnxNetwork> {
        let path = path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("Loading weights from {}", path.display()))?
            .with_input_fact(0, f32::fact([1, 3, INPUT_SIZE, INPUT_SIZE]).into())?
            .into_optimized()?;
        check_signature(&model)?;
        Ok(OnnxNetwork { plan: model.into_runnable()? })
    }
}

impl Network for OnnxNetwork {
    fn logits(&self, input: Tensor) -> TractResult<Vec<f32>> {
        let outputs = self.plan.run(tvec!(input.into()))?;
        Ok(outputs[0].as_slice::<f32>()?.to_vec())
    }
}

pub fn check_signature(model: &TypedModel) -> TractResult<()> {
    ensure!(model.inputs.len() == 1, "Expected one input, model has {}", model.inputs.len());
    ensure!(model.outputs.len() == 1, "Expected one output, model has {}", model.outputs.len());
    let output = model.output_fact(0)?;
    ensure!(
        output.datum_type == f32::datum_type(),
        "Expected f32 scores, model produces {:?}",
        output.datum_type
    );
    match output.shape.as_concrete() {
        Some([1, n]) if *n == CLASSES => Ok(()),
        _ => bail!("Expected a 1x{} output, model produces {:?}", CLASSES, output.shape),
    }
}

/// Names among `operators` the ONNX runtime has no implementation for.
pub fn missing_operators<'a>(operators: &[&'a str]) -> Vec<&'a str> {
    let onnx = tract_onnx::onnx();
    operators.iter().copied().filter(|op| !onnx.op_register.0.contains_key(*op)).collect()
}

/// The classifier the service shares between requests. Read-only once built.
pub struct Classifier {
    network: Box<dyn Network>,
}

impl Classifier {
    pub fn new(network: impl Network + 'static) -> Classifier {
        Classifier { network: Box::new(network) }
    }

    pub fn load(path: impl AsRef<Path>) -> TractResult<Classifier> {
        let path = path.as_ref();
        let start = Instant::now();
        let network = OnnxNetwork::load(path)?;
        info!("Model {:?} loaded in {:?}", path, start.elapsed());
        Ok(Classifier::new(network))
    }

    pub fn classify(&self, image: &DynamicImage) -> TractResult<Prediction> {
        let logits = self.network.logits(image_to_tensor(image))?;
        debug!("logits: {:?}", logits);
        Prediction::from_logits(&logits)
    }
}
