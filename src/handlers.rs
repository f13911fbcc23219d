use std::sync::Arc;
use std::time::Instant;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpRequest, HttpResponse, Result};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::error::{InferenceError, ServiceError};
use crate::models::{
    ErrorBody, HealthResponse, PredictionRequest, PredictionResponse, PredictionResult,
};

/// Registers the service routes. The classifier itself is expected as
/// `web::Data<dyn Classifier>` app data.
pub fn configure(cfg: &mut web::ServiceConfig, max_body_bytes: usize) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(max_body_bytes)
            .content_type_required(false)
            .error_handler(json_error),
    )
    .service(web::resource("/health").route(web::get().to(health)))
    .service(web::resource("/predict").route(web::post().to(predict)));
}

// Liveness only: answers without looking at the classifier.
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "OK".to_string(),
    })
}

pub async fn predict(
    classifier: web::Data<dyn Classifier>,
    payload: web::Json<PredictionRequest>,
) -> Result<HttpResponse, ServiceError> {
    let texts = payload.into_inner().texts;
    let classifier: Arc<dyn Classifier> = classifier.into_inner();

    // Inference is CPU bound, keep it off the async workers.
    let response = web::block(move || run_batch(classifier.as_ref(), &texts)).await??;

    tracing::info!(
        request_id = %Uuid::new_v4(),
        "batch_size={} | latency_ms={:.2}",
        response.batch_size,
        response.latency_ms
    );

    Ok(HttpResponse::Ok().json(response))
}

/// Classifies one batch and times the classifier call.
///
/// Either every input gets a result, in input order, or the whole batch fails.
pub fn run_batch(
    classifier: &dyn Classifier,
    texts: &[String],
) -> Result<PredictionResponse, InferenceError> {
    let start = Instant::now();
    let outputs = classifier.classify(texts)?;
    let latency_ms = round_ms(start.elapsed().as_secs_f64() * 1000.0);

    if outputs.len() != texts.len() {
        return Err(InferenceError::LengthMismatch {
            expected: texts.len(),
            actual: outputs.len(),
        });
    }

    let results = outputs
        .into_iter()
        .map(|c| PredictionResult {
            label: c.label,
            score: c.score,
        })
        .collect();

    Ok(PredictionResponse {
        latency_ms,
        batch_size: texts.len(),
        results,
    })
}

fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> Error {
    let status = match &err {
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    let response = HttpResponse::build(status).json(ErrorBody {
        detail: err.to_string(),
    });
    InternalError::from_response(err, response).into()
}
