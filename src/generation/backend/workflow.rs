//! ComfyUI workflow graphs
//!
//! Each model family maps to a fixed seven-node API-format graph. Node ids
//! are strings and links are `[node_id, output_index]` pairs.

use serde_json::{Value, json};
use tracing::debug;

use crate::types::{ForgeError, GenerationParams, Result};

/// Workflow shape selected from the configured model name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// `flux-schnell`, `flux-dev`
    Flux,
    /// `sd35`
    Sd35,
}

/// KSampler inputs a caller may override through passthrough params
const SAMPLER_OVERRIDES: [&str; 3] = ["sampler_name", "scheduler", "denoise"];

impl ModelFamily {
    pub const SUPPORTED: [&'static str; 3] = ["flux-schnell", "flux-dev", "sd35"];

    /// Resolve a model name; unknown names are a configuration error
    pub fn from_model(model: &str) -> Result<Self> {
        match model {
            "flux-schnell" | "flux-dev" => Ok(Self::Flux),
            "sd35" => Ok(Self::Sd35),
            _ => Err(ForgeError::Config(format!(
                "Unknown local model: {}. Supported: {}",
                model,
                Self::SUPPORTED.join(", ")
            ))),
        }
    }

    fn default_steps(self) -> u32 {
        match self {
            Self::Flux => 4,
            Self::Sd35 => 28,
        }
    }

    /// Build the API-format workflow for one image
    pub fn build(
        self,
        model: &str,
        prompt: &str,
        width: u32,
        height: u32,
        params: &GenerationParams,
    ) -> Value {
        let steps = params.steps().unwrap_or_else(|| self.default_steps());
        let seed = resolve_seed(params.seed());

        let mut workflow = match self {
            Self::Flux => json!({
                "1": {
                    "class_type": "CLIPTextEncode",
                    "inputs": {"text": prompt}
                },
                "2": {
                    "class_type": "EmptyLatentImage",
                    "inputs": {"width": width, "height": height, "batch_size": 1}
                },
                "3": {
                    "class_type": "KSampler",
                    "inputs": {
                        "seed": seed,
                        "steps": steps,
                        "cfg": 1.0,
                        "sampler_name": "euler",
                        "scheduler": "simple",
                        "denoise": 1.0,
                        "model": ["4", 0],
                        "positive": ["1", 0],
                        "negative": ["5", 0],
                        "latent_image": ["2", 0]
                    }
                },
                "4": {
                    "class_type": "CheckpointLoaderSimple",
                    "inputs": {"ckpt_name": format!("{}.safetensors", model)}
                },
                "5": {
                    "class_type": "CLIPTextEncode",
                    "inputs": {"text": ""}
                },
                "6": {
                    "class_type": "VAEDecode",
                    "inputs": {"samples": ["3", 0], "vae": ["4", 2]}
                },
                "7": {
                    "class_type": "SaveImage",
                    "inputs": {"filename_prefix": "flux", "images": ["6", 0]}
                }
            }),
            Self::Sd35 => json!({
                "1": {
                    "class_type": "CLIPTextEncode",
                    "inputs": {"text": prompt}
                },
                "2": {
                    "class_type": "CLIPTextEncode",
                    "inputs": {"text": params.negative_prompt().unwrap_or("")}
                },
                "3": {
                    "class_type": "EmptyLatentImage",
                    "inputs": {"width": width, "height": height, "batch_size": 1}
                },
                "4": {
                    "class_type": "KSampler",
                    "inputs": {
                        "seed": seed,
                        "steps": steps,
                        "cfg": params.guidance_scale().unwrap_or(7.0),
                        "sampler_name": "euler",
                        "scheduler": "normal",
                        "denoise": 1.0,
                        "model": ["5", 0],
                        "positive": ["1", 0],
                        "negative": ["2", 0],
                        "latent_image": ["3", 0]
                    }
                },
                "5": {
                    "class_type": "CheckpointLoaderSimple",
                    "inputs": {"ckpt_name": "sd3.5_large.safetensors"}
                },
                "6": {
                    "class_type": "VAEDecode",
                    "inputs": {"samples": ["4", 0], "vae": ["5", 2]}
                },
                "7": {
                    "class_type": "SaveImage",
                    "inputs": {"filename_prefix": "sd35", "images": ["6", 0]}
                }
            }),
        };

        let sampler_node = match self {
            Self::Flux => "3",
            Self::Sd35 => "4",
        };
        if let Some(inputs) = workflow
            .get_mut(sampler_node)
            .and_then(|node| node.get_mut("inputs"))
            .and_then(Value::as_object_mut)
        {
            for (key, value) in params.passthrough() {
                if SAMPLER_OVERRIDES.contains(&key.as_str()) {
                    inputs.insert(key.clone(), value.clone());
                }
            }
        }

        let ignored = ignored_params(params);
        if !ignored.is_empty() {
            debug!(
                model = model,
                ignored = ?ignored,
                "Parameters not used by the ComfyUI workflow"
            );
        }

        workflow
    }
}

/// Passthrough keys the workflow graph has no input for
fn ignored_params(params: &GenerationParams) -> Vec<&str> {
    params
        .passthrough()
        .map(|(key, _)| key.as_str())
        .filter(|key| !SAMPLER_OVERRIDES.contains(key))
        .collect()
}

/// `-1` or a missing seed selects a random one
fn resolve_seed(seed: Option<i64>) -> u64 {
    match seed {
        Some(s) if s >= 0 => s as u64,
        _ => u64::from(rand::random::<u32>()),
    }
}
