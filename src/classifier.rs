//! Text classification backed by an ONNX export of a Hugging Face sequence
//! classifier, run with tract.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::Deserialize;
use tokenizers::{PaddingStrategy, Tokenizer, TruncationParams};
use tract_onnx::prelude::*;

use crate::error::{InferenceError, StartupError};

/// DistilBERT position embedding limit.
const MAX_SEQUENCE_LENGTH: usize = 512;

/// Upper bound on class indices accepted from `config.json`.
const MAX_LABELS: usize = 4096;

/// Label table used when the model directory carries no `config.json`.
const DEFAULT_LABELS: [&str; 2] = ["NEGATIVE", "POSITIVE"];

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub score: f32,
}

/// Turns a batch of texts into one label per text.
///
/// Implementations must return exactly one classification per input, in
/// input order, and must return an empty vector for an empty batch.
pub trait Classifier: Send + Sync {
    fn classify(&self, inputs: &[String]) -> Result<Vec<Classification>, InferenceError>;
}

pub struct TractClassifier {
    tokenizer: Tokenizer,
    plan: TypedRunnableModel<TypedModel>,
    labels: LabelTable,
    // Graph inputs in the order the plan expects them.
    inputs: Vec<ModelInput>,
}

/// Tensors a sequence-classification export may declare as graph inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ModelInput {
    InputIds,
    AttentionMask,
    // BERT-style exports take token_type_ids, DistilBERT does not.
    TokenTypeIds,
}

impl ModelInput {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "input_ids" => Some(Self::InputIds),
            "attention_mask" => Some(Self::AttentionMask),
            "token_type_ids" => Some(Self::TokenTypeIds),
            _ => None,
        }
    }
}

impl TractClassifier {
    pub fn load(model_dir: &Path) -> Result<Self, StartupError> {
        let tokenizer = load_tokenizer(&model_dir.join("tokenizer.json"))?;

        let model_path = model_dir.join("model.onnx");
        let model_err = |reason: String| StartupError::Model {
            path: model_path.display().to_string(),
            reason,
        };
        let optimized = tract_onnx::onnx()
            .model_for_path(&model_path)
            .map_err(|e| model_err(e.to_string()))?
            .into_optimized()
            .map_err(|e| model_err(e.to_string()))?;

        let names: Vec<&str> = optimized
            .inputs
            .iter()
            .map(|outlet| optimized.node(outlet.node).name.as_str())
            .collect();
        let inputs = resolve_inputs(&names).map_err(model_err)?;
        let plan = optimized
            .into_runnable()
            .map_err(|e| model_err(e.to_string()))?;

        let labels = LabelTable::load(model_dir)?;
        tracing::debug!(labels = ?labels.0, inputs = ?inputs, "classifier ready");

        Ok(Self {
            tokenizer,
            plan,
            labels,
            inputs,
        })
    }
}

impl Classifier for TractClassifier {
    fn classify(&self, inputs: &[String]) -> Result<Vec<Classification>, InferenceError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(inputs.iter().map(String::as_str).collect::<Vec<_>>(), true)
            .map_err(|e| InferenceError::Tokenization(e.to_string()))?;
        let rows: Vec<(&[u32], &[u32])> = encodings
            .iter()
            .map(|e| (e.get_ids(), e.get_attention_mask()))
            .collect();
        let (input_ids, attention_mask) = token_arrays(&rows);

        let tensors = self
            .inputs
            .iter()
            .map(|input| match input {
                ModelInput::InputIds => to_tensor(&input_ids),
                ModelInput::AttentionMask => to_tensor(&attention_mask),
                ModelInput::TokenTypeIds => to_tensor(&Array2::zeros(input_ids.dim())),
            })
            .collect::<Result<Vec<Tensor>, _>>()?;
        let outputs = self
            .plan
            .run(tensors.into_iter().map(Into::into).collect())
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;

        let view = outputs
            .first()
            .ok_or_else(|| InferenceError::Output("model produced no outputs".into()))?
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Output(e.to_string()))?;
        let shape = view.shape().to_vec();
        let &[batch, num_labels] = shape.as_slice() else {
            return Err(InferenceError::Output(format!(
                "expected [batch, labels] logits, got {shape:?}"
            )));
        };
        let logits = Array2::from_shape_vec((batch, num_labels), view.iter().copied().collect())
            .map_err(|e| InferenceError::Output(e.to_string()))?;

        logits_to_classifications(logits.view(), &self.labels)
    }
}

/// Maps graph input names to the tensors fed for them, keeping graph order.
fn resolve_inputs(names: &[&str]) -> Result<Vec<ModelInput>, String> {
    let inputs = names
        .iter()
        .map(|name| {
            ModelInput::from_name(name).ok_or_else(|| format!("unsupported model input {name:?}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    for required in [ModelInput::InputIds, ModelInput::AttentionMask] {
        if !inputs.contains(&required) {
            return Err(format!("model has no {required:?} input"));
        }
    }
    Ok(inputs)
}

/// Packs per-text `(ids, attention_mask)` rows into `[batch, seq]` arrays.
/// Rows shorter than the longest one are padded with id 0 and mask 0.
fn token_arrays(rows: &[(&[u32], &[u32])]) -> (Array2<i64>, Array2<i64>) {
    let seq_len = rows.iter().map(|(ids, _)| ids.len()).max().unwrap_or(0);
    let mut input_ids = Array2::<i64>::zeros((rows.len(), seq_len));
    let mut attention_mask = Array2::<i64>::zeros((rows.len(), seq_len));
    for (row, (ids, mask)) in rows.iter().enumerate() {
        for (col, (&id, &m)) in ids.iter().zip(mask.iter()).enumerate() {
            input_ids[[row, col]] = i64::from(id);
            attention_mask[[row, col]] = i64::from(m);
        }
    }
    (input_ids, attention_mask)
}

fn logits_to_classifications(
    logits: ArrayView2<f32>,
    labels: &LabelTable,
) -> Result<Vec<Classification>, InferenceError> {
    logits
        .outer_iter()
        .map(|row| {
            let (index, score) = top_class(&softmax(row))
                .ok_or_else(|| InferenceError::Output("empty logits row".into()))?;
            Ok(Classification {
                label: labels.name(index),
                score,
            })
        })
        .collect()
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer, StartupError> {
    let tokenizer_err = |reason: String| StartupError::Tokenizer {
        path: path.display().to_string(),
        reason,
    };
    let mut tokenizer = Tokenizer::from_file(path).map_err(|e| tokenizer_err(e.to_string()))?;

    let mut padding = tokenizer.get_padding().cloned().unwrap_or_default();
    padding.strategy = PaddingStrategy::BatchLongest;
    tokenizer.with_padding(Some(padding));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: MAX_SEQUENCE_LENGTH,
            ..Default::default()
        }))
        .map_err(|e| tokenizer_err(e.to_string()))?;

    Ok(tokenizer)
}

fn to_tensor(array: &Array2<i64>) -> Result<Tensor, InferenceError> {
    let values: Vec<i64> = array.iter().copied().collect();
    tract_ndarray::Array::from_shape_vec(array.dim(), values)
        .map(|a| a.into_tensor())
        .map_err(|e| InferenceError::Runtime(e.to_string()))
}

fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let exp = logits.mapv(|x| (x - max).exp());
    let sum = exp.sum();
    exp / sum
}

fn top_class(probs: &Array1<f32>) -> Option<(usize, f32)> {
    probs
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
}

#[derive(Deserialize)]
struct ModelConfig {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

/// Class index to label name, as declared by the model's `config.json`.
#[derive(Debug, Clone, PartialEq)]
struct LabelTable(Vec<String>);

impl LabelTable {
    fn load(model_dir: &Path) -> Result<Self, StartupError> {
        let path = model_dir.join("config.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let labels_err = |reason: String| StartupError::Labels {
            path: path.display().to_string(),
            reason,
        };
        let raw = fs::read_to_string(&path).map_err(|e| labels_err(e.to_string()))?;
        let config: ModelConfig =
            serde_json::from_str(&raw).map_err(|e| labels_err(e.to_string()))?;
        if config.id2label.is_empty() {
            return Ok(Self::default());
        }

        let mut indexed = Vec::with_capacity(config.id2label.len());
        for (key, label) in config.id2label {
            let index: usize = key
                .parse()
                .map_err(|_| labels_err(format!("id2label key {key:?} is not an index")))?;
            if index >= MAX_LABELS {
                return Err(labels_err(format!(
                    "id2label index {index} exceeds the {MAX_LABELS} label limit"
                )));
            }
            indexed.push((index, label));
        }
        let len = indexed.iter().map(|(i, _)| i + 1).max().unwrap_or(0);
        let mut names: Vec<String> = (0..len).map(|i| format!("LABEL_{i}")).collect();
        for (index, label) in indexed {
            names[index] = label;
        }
        Ok(Self(names))
    }

    fn name(&self, index: usize) -> String {
        self.0
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{index}"))
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self(DEFAULT_LABELS.iter().map(|s| s.to_string()).collect())
    }
}
