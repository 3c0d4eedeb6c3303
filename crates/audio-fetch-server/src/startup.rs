//! Actix server startup + app wiring.
//!
//! Resolves configuration, builds the pipeline, then serves the routes,
//! middleware and OpenAPI endpoints.

use std::path::{Path, PathBuf};

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use anyhow::Result;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::config::{self, AppConfig, Overrides};
use crate::openapi;
use crate::pipeline::Pipeline;
use crate::state::AppState;

/// Build server state and start the Actix HTTP server.
pub(crate) async fn run(args: crate::Args) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    let app_config = AppConfig::resolve(
        cfg,
        Overrides {
            bind: args.bind,
            output_dir: args.output_dir,
        },
    )?;
    tracing::info!(
        bind = %app_config.bind,
        output_dir = %app_config.output_dir.display(),
        extractor = %app_config.extractor_binary.display(),
        transcoder = %app_config.transcoder_binary.display(),
        musicbrainz = app_config.musicbrainz.enabled,
        "starting audio-fetch-server"
    );
    if !app_config.musicbrainz.enabled {
        tracing::info!("musicbrainz lookups disabled; downloads will be untagged");
    }

    let bind = app_config.bind;
    let state = web::Data::new(AppState::new(Pipeline::from_config(&app_config)));
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors())
            .wrap(Logger::default())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::download::download)
            .service(api::health::health)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}

/// Browser clients on any origin may call the read-only endpoints.
fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "OPTIONS"])
        .allowed_headers(vec![actix_web::http::header::CONTENT_TYPE])
        .max_age(3600)
}

/// Load server config from `--config`, then `config.toml` beside the binary,
/// falling back to defaults.
fn load_config(path: Option<&Path>) -> Result<config::ServerConfig> {
    if let Some(path) = path {
        return config::ServerConfig::load(path);
    }
    match default_config_path().filter(|path| path.exists()) {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            config::ServerConfig::load(&path)
        }
        None => Ok(config::ServerConfig::default()),
    }
}

fn default_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join("config.toml")))
}
