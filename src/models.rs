use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    pub texts: Vec<String>,
}

/// One classified input, index-aligned with `PredictionRequest::texts`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictionResult {
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub latency_ms: f64,
    pub batch_size: usize,
    pub results: Vec<PredictionResult>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
