use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use pneumonia_classifier::{Classifier, TractResult};
use pneumonia_classifier::model::{RESNET_OPERATORS, missing_operators};
use reqwest::StatusCode;
use serde::Deserialize;

const RULE: &str = "============================================================";

#[derive(Deserialize, Debug)]
struct Health {
    #[serde(default)]
    model_loaded: bool,
}

/// Loads the weights the way the server will, or explains why it can't.
pub type Loader = fn(&Path) -> TractResult<()>;

pub fn load_classifier(path: &Path) -> TractResult<()> {
    Classifier::load(path).map(drop)
}

/// What a working deployment looks like.
#[derive(Clone, Debug)]
pub struct Checklist {
    pub model: PathBuf,
    pub required: Vec<PathBuf>,
    pub health_url: String,
    pub timeout: Duration,
    pub loader: Loader,
}

impl Checklist {
    /// Runs the steps in order, reporting to `out`, and stops at the first
    /// one failing. Returns whether everything passed.
    pub fn run(&self, out: &mut dyn Write) -> Result<bool> {
        writeln!(out, "{RULE}")?;
        writeln!(out, "Pneumonia Detection Setup Verification")?;
        writeln!(out, "{RULE}")?;

        let passed = self.model_file(out)?
            && self.required_files(out)?
            && self.server(out)?
            && self.runtime(out)?;
        if passed {
            self.summary(out)?;
        }
        Ok(passed)
    }

    fn model_file(&self, out: &mut dyn Write) -> Result<bool> {
        writeln!(out, "\n1. Checking for model file...")?;
        if self.model.is_file() {
            writeln!(out, "   ✓ {} found", self.model.display())?;
            Ok(true)
        } else {
            writeln!(out, "   ✗ {} NOT FOUND", self.model.display())?;
            writeln!(out, "   → Please export the network to ONNX and place it there")?;
            Ok(false)
        }
    }

    fn required_files(&self, out: &mut dyn Write) -> Result<bool> {
        writeln!(out, "\n2. Checking for required files...")?;
        let mut all_exist = true;
        for file in &self.required {
            if file.exists() {
                writeln!(out, "   ✓ {} found", file.display())?;
            } else {
                writeln!(out, "   ✗ {} NOT FOUND", file.display())?;
                all_exist = false;
            }
        }
        Ok(all_exist)
    }

    fn server(&self, out: &mut dyn Write) -> Result<bool> {
        writeln!(out, "\n3. Checking if backend server is running...")?;
        let client = reqwest::blocking::Client::builder().timeout(self.timeout).build()?;
        debug!("GET {}", self.health_url);
        match client.get(&self.health_url).send() {
            Ok(response) if response.status() == StatusCode::OK => {
                match response.json::<Health>() {
                    Ok(health) => {
                        writeln!(out, "   ✓ Backend server is running")?;
                        let mark = if health.model_loaded { "✓" } else { "✗" };
                        writeln!(out, "   {mark} Model loaded: {}", health.model_loaded)?;
                        Ok(health.model_loaded)
                    }
                    Err(e) => {
                        writeln!(out, "   ✗ Unreadable health report: {e}")?;
                        Ok(false)
                    }
                }
            }
            Ok(response) => {
                let status = response.status();
                writeln!(out, "   ✗ Backend server responded with error ({status})")?;
                Ok(false)
            }
            Err(e) if e.is_connect() => {
                writeln!(out, "   ✗ Backend server is NOT running")?;
                writeln!(out, "   → Please start the server with: pneumonia-server")?;
                Ok(false)
            }
            Err(e) => {
                writeln!(out, "   ✗ Error connecting to backend: {e}")?;
                Ok(false)
            }
        }
    }

    fn runtime(&self, out: &mut dyn Write) -> Result<bool> {
        writeln!(out, "\n4. Checking inference runtime...")?;
        let missing = missing_operators(RESNET_OPERATORS);
        for op in RESNET_OPERATORS {
            if missing.contains(op) {
                writeln!(out, "   ✗ {op} NOT SUPPORTED")?;
            } else {
                writeln!(out, "   ✓ {op} supported")?;
            }
        }
        let loaded = match (self.loader)(&self.model) {
            Ok(_) => {
                writeln!(out, "   ✓ {} loads as 1x3x224x224 → 1x2", self.model.display())?;
                true
            }
            Err(e) => {
                writeln!(out, "   ✗ {} does not load: {e:#}", self.model.display())?;
                false
            }
        };
        if !missing.is_empty() || !loaded {
            writeln!(out, "\n   → Re-export the network to ONNX from the PyTorch weights")?;
            return Ok(false);
        }
        Ok(true)
    }

    fn summary(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "\n{RULE}")?;
        writeln!(out, "✓ Setup verification PASSED!")?;
        writeln!(out, "{RULE}")?;
        writeln!(out, "\nYou're ready to use the pneumonia detection app!")?;
        writeln!(out, "\nNext steps:")?;
        writeln!(out, "1. Make sure backend is running: pneumonia-server")?;
        let page = self.required.iter().find(|f| f.extension().is_some_and(|e| e == "html"));
        if let Some(page) = page {
            writeln!(out, "2. Open {} in your web browser", page.display())?;
        }
        writeln!(out, "3. Upload X-ray images and start analyzing!")?;
        writeln!(out, "\n{RULE}")?;
        Ok(())
    }
}
