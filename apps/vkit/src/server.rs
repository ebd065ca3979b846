// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! HTTP server assembly.
//!
//! The adapter stays thin: every handler parses the request, calls one core
//! function and serialises the result. CORS is permissive
//! (`Access-Control-Allow-Origin: *`, OPTIONS preflight on every route).

use axum::extract::MatchedPath;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use visionkit_control::{InstanceManager, SecuRTManager};
use visionkit_core::{ConfigStore, NodePool, NodeStorage, SolutionRegistry, StatsCollector};
use visionkit_engine::{Engine, PipelineBuilder};

use crate::config::Config;
use crate::routes;
use crate::state::AppState;

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Not Found", "message": "unknown route"})),
    )
}

/// Builds the application state and router.
pub fn create_app(config: Config) -> (Router, AppState) {
    let config = Arc::new(config);

    let config_store = if config.storage.system_config_path.is_empty() {
        Arc::new(ConfigStore::new())
    } else {
        Arc::new(ConfigStore::load(&config.storage.system_config_path))
    };

    let pool = Arc::new(NodePool::with_default_templates());
    let solutions = Arc::new(SolutionRegistry::with_defaults());
    let storage = Arc::new(NodeStorage::new(&config.storage.directory));

    match storage.load_into(&pool) {
        Ok(loaded) if loaded > 0 => info!(loaded, "Restored pre-configured nodes from storage"),
        Ok(_) => {},
        Err(e) => tracing::warn!(error = %e, "Could not load node pool snapshot"),
    }
    if config.storage.seed_default_nodes {
        let seeded = pool.create_nodes_from_default_solutions(&solutions);
        if seeded > 0 {
            if let Err(e) = storage.save_from(&pool) {
                tracing::warn!(error = %e, "Could not persist seeded nodes");
            }
        }
    }

    let stats = Arc::new(StatsCollector::new());
    let builder =
        PipelineBuilder::new(Arc::clone(&pool), Arc::clone(&solutions), Arc::clone(&config_store));
    let engine = Engine::new(stats);
    let manager = Arc::new(InstanceManager::new(builder, engine, Arc::clone(&config_store)));
    let securt = Arc::new(SecuRTManager::new(Arc::clone(&manager)));

    let state = AppState {
        manager,
        securt,
        pool,
        solutions,
        config_store,
        storage,
        config,
    };

    // The create path runs the pipeline builder; cap its concurrency when
    // configured.
    let mut quick_route = post(routes::instance::quick_create);
    if let Some(max) = state.config.server.max_concurrent_creates {
        quick_route = quick_route.layer(ConcurrencyLimitLayer::new(max));
    }

    let router = Router::new()
        .route("/healthz", get(health_handler))
        // --- core: quick instance creation ---
        .route("/v1/core/instance/quick", quick_route)
        // --- core: system configuration ---
        .route(
            "/v1/core/config",
            get(routes::config::get_root)
                .post(routes::config::merge_root)
                .put(routes::config::replace_root),
        )
        .route("/v1/core/config/reset", post(routes::config::reset))
        .route(
            "/v1/core/config/{*path}",
            get(routes::config::get_section)
                .post(routes::config::merge_section)
                .put(routes::config::replace_section)
                .patch(routes::config::merge_section)
                .delete(routes::config::delete_section),
        )
        // --- core: node pool ---
        .route("/v1/core/nodes", get(routes::nodes::list).post(routes::nodes::create))
        .route("/v1/core/nodes/templates", get(routes::nodes::list_templates))
        .route("/v1/core/nodes/templates/{id}", get(routes::nodes::get_template))
        .route("/v1/core/nodes/stats", get(routes::nodes::stats))
        .route(
            "/v1/core/nodes/{id}",
            get(routes::nodes::get).put(routes::nodes::update).delete(routes::nodes::delete),
        )
        // --- SecuRT instances ---
        .route("/v1/securt/instance", post(routes::securt::create_instance))
        .route(
            "/v1/securt/instance/{id}",
            get(routes::securt::get_instance)
                .put(routes::securt::put_instance)
                .patch(routes::securt::patch_instance)
                .delete(routes::securt::delete_instance),
        )
        .route("/v1/securt/instance/{id}/stats", get(routes::securt::get_stats))
        .route(
            "/v1/securt/instance/{id}/analytics_entities",
            get(routes::securt::get_analytics_entities),
        )
        .route("/v1/securt/instance/{id}/lines", get(routes::securt::list_lines))
        .route(
            "/v1/securt/instance/{id}/line/{kind}",
            post(routes::securt::create_line).delete(routes::securt::delete_lines_of_kind),
        )
        .route(
            "/v1/securt/instance/{id}/line/{kind}/{line_id}",
            get(routes::securt::get_line)
                .put(routes::securt::put_line)
                .delete(routes::securt::delete_line),
        )
        // Feature sub-endpoints (input, output, motion_area, ...).
        .route("/v1/securt/instance/{id}/{feature}", post(routes::securt::apply_feature))
        .fallback(not_found_handler)
        .layer(ServiceBuilder::new().layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let route = request
                    .extensions()
                    .get::<MatchedPath>()
                    .map_or_else(|| request.uri().path(), |matched| matched.as_str());
                tracing::info_span!("http_request", http_method = %request.method(), http_route = %route)
            }),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (router, state)
}

/// Binds the configured address and serves until ctrl-c.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server loop fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let address = config.server.address.clone();
    let (router, _state) = create_app(config);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "VisionKit control plane listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod router_tests {
    use super::*;
    use crate::config::StorageConfig;

    #[tokio::test]
    async fn test_create_app_without_persistence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            storage: StorageConfig {
                directory: dir.path().join("storage").to_string_lossy().into_owned(),
                system_config_path: String::new(),
                seed_default_nodes: false,
            },
            ..Config::default()
        };
        let (_router, state) = create_app(config);
        assert_eq!(state.pool.node_count(), 0);
        assert!(state.pool.template_count() > 0);
    }
}
