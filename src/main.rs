mod classifier;
mod config;
mod error;
mod handlers;
mod models;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::classifier::{Classifier, TractClassifier};
use crate::config::{ServiceConfig, MODEL_NAME};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env()?;

    info!(
        "Loading HuggingFace model {} from {}",
        MODEL_NAME,
        config.model_dir.display()
    );
    let classifier: Arc<dyn Classifier> = Arc::new(TractClassifier::load(&config.model_dir)?);
    info!("Model loaded successfully");

    let classifier = web::Data::from(classifier);
    let max_body_bytes = config.max_body_bytes;

    info!("Server running at http://{}:{}", config.host, config.port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .app_data(classifier.clone())
            .configure(|cfg| handlers::configure(cfg, max_body_bytes))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
