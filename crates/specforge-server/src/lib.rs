pub mod auth;
pub mod error;
pub mod mcp;
pub mod notify;
pub mod refinement;
pub mod routes;
pub mod state;

use std::future::IntoFuture;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use specforge_core::config::ServerConfig;
use specforge_core::Store;

pub use state::AppState;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

fn cors() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}

/// Build the axum Router for the `/api/v1` surface.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    use routes::{contracts, imports, insight, refinement, roadmap, settings, tokens, workspaces, ws};

    let api = Router::new()
        // Workspaces & projects
        .route(
            "/workspaces",
            get(workspaces::list_workspaces).post(workspaces::create_workspace),
        )
        .route(
            "/workspaces/{id}",
            get(workspaces::get_workspace).delete(workspaces::delete_workspace),
        )
        .route(
            "/workspaces/{id}/projects",
            get(workspaces::list_projects).post(workspaces::create_project),
        )
        .route(
            "/projects/{id}",
            get(workspaces::get_project)
                .patch(workspaces::update_project)
                .delete(workspaces::delete_project),
        )
        // Roadmap items
        .route(
            "/projects/{id}/roadmap-items",
            get(roadmap::list_items).post(roadmap::create_item),
        )
        .route(
            "/roadmap-items/{id}",
            get(roadmap::get_item)
                .patch(roadmap::update_item)
                .delete(roadmap::delete_item),
        )
        .route("/roadmap-items/{id}/transition", post(roadmap::transition_item))
        .route(
            "/roadmap-items/{id}/requirements",
            get(roadmap::list_requirements).post(roadmap::create_requirement),
        )
        .route("/requirements/{id}", axum::routing::delete(roadmap::delete_requirement))
        .route(
            "/projects/{id}/validation-rules",
            get(roadmap::list_rules).post(roadmap::create_rule),
        )
        .route("/validation-rules/{id}", axum::routing::delete(roadmap::delete_rule))
        .route(
            "/projects/{id}/roadmap-dependencies",
            get(roadmap::list_dependencies).post(roadmap::create_dependency),
        )
        .route(
            "/roadmap-dependencies/{id}",
            axum::routing::delete(roadmap::delete_dependency),
        )
        // Version snapshots & proposals
        .route(
            "/roadmap-items/{id}/snapshots",
            get(roadmap::list_snapshots).post(roadmap::create_snapshot),
        )
        .route("/snapshots/compare", get(roadmap::compare_snapshots))
        .route("/snapshots/{id}", get(roadmap::get_snapshot))
        .route(
            "/roadmap-items/{id}/ai-proposals",
            get(roadmap::list_proposals).post(roadmap::create_proposal),
        )
        .route("/ai-proposals/{id}/approve", post(roadmap::approve_proposal))
        .route("/ai-proposals/{id}/reject", post(roadmap::reject_proposal))
        // Contracts & variables
        .route(
            "/roadmap-items/{id}/contracts",
            get(contracts::list_contracts).post(contracts::create_contract),
        )
        .route(
            "/contracts/{id}",
            get(contracts::get_contract)
                .patch(contracts::update_contract)
                .delete(contracts::delete_contract),
        )
        .route(
            "/contracts/{id}/variables",
            get(contracts::list_variables).post(contracts::create_variable),
        )
        .route(
            "/variables/{id}",
            get(contracts::get_variable)
                .patch(contracts::update_variable)
                .delete(contracts::delete_variable),
        )
        .route("/variables/{id}/lineage", get(contracts::variable_lineage))
        // Drift & export
        .route("/drift/compare", post(contracts::compare_drift))
        .route("/contracts/{id}/drift-check", post(contracts::drift_check))
        .route("/roadmap-items/{id}/export", get(contracts::export_item))
        // Alignment, intelligence, governance, audit
        .route(
            "/projects/{id}/alignment",
            get(insight::latest_alignment).post(insight::trigger_alignment),
        )
        .route("/projects/{id}/alignment/reports", get(insight::alignment_reports))
        .route("/roadmap-items/{id}/intelligence", get(insight::get_intelligence))
        .route(
            "/roadmap-items/{id}/intelligence/recompute",
            post(insight::recompute_intelligence),
        )
        .route("/roadmap-items/{id}/governance", get(insight::get_governance))
        .route("/projects/{id}/audit-logs", get(insight::audit_logs))
        // LLM settings
        .route(
            "/workspaces/{id}/settings/llm",
            get(settings::get_llm_settings).put(settings::put_llm_settings),
        )
        .route("/settings/llm/warmup", get(settings::llm_warmup))
        // Refinement
        .route(
            "/projects/{id}/refinement",
            get(refinement::list_refinements).post(refinement::start_refinement),
        )
        .route("/refinement/{id}", get(refinement::get_refinement))
        .route("/refinement/{id}/events", get(refinement::refinement_events))
        .route("/refinement/{id}/approve", post(refinement::approve_refinement))
        // Import sessions
        .route("/projects/{id}/import-sessions", post(imports::init_import))
        .route("/import-sessions/{id}", get(imports::get_import_session))
        .route("/import-sessions/{id}/catalogue", get(imports::get_import_catalogue))
        .route("/import-sessions/{id}/bootstrap", post(imports::bootstrap))
        // MCP token management
        .route(
            "/projects/{id}/mcp-tokens",
            get(tokens::list_tokens).post(tokens::create_token),
        )
        .route("/mcp-tokens/{id}", axum::routing::delete(tokens::revoke_token))
        // Notifications
        .route("/ws", get(ws::ws_upgrade))
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .nest("/api/v1", api)
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Router for the MCP JSON-RPC endpoint (its own port).
pub fn build_mcp_router(app_state: AppState) -> Router {
    Router::new()
        .route("/mcp", post(mcp::mcp_endpoint))
        .route("/", post(mcp::mcp_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Start the API and MCP listeners and run until ctrl-c, then drain for at
/// most ten seconds.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    config.validate()?;
    if let Some(parent) = config.database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = Store::open(&config.database_path)?;
    let (port, mcp_port) = (config.port, config.mcp_port);
    if config.static_mcp_token().is_some() {
        tracing::warn!("static MCP token fallback is enabled; use per-project tokens outside development");
    }
    let app_state = AppState::new(store, config);
    let (shutdown, workers) = (app_state.shutdown.clone(), app_state.workers.clone());

    let api_listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let mcp_listener = tokio::net::TcpListener::bind(("0.0.0.0", mcp_port)).await?;
    tracing::info!("SpecForge API listening on http://localhost:{port}/api/v1");
    tracing::info!("SpecForge MCP listening on http://localhost:{mcp_port}/mcp");

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let graceful = |mut rx: tokio::sync::watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let api = axum::serve(api_listener, build_router(app_state.clone()))
        .with_graceful_shutdown(graceful(stop_rx.clone()))
        .into_future();
    let mcp = axum::serve(mcp_listener, build_mcp_router(app_state))
        .with_graceful_shutdown(graceful(stop_rx))
        .into_future();
    let servers = async { tokio::try_join!(api, mcp) };
    tokio::pin!(servers);

    tokio::select! {
        res = &mut servers => {
            res?;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested; draining connections and refinement workers");
            let _ = stop_tx.send(true);
            shutdown.cancel();
            workers.close();
        }
    }

    let drain = async { tokio::join!(servers, workers.wait()).0 };
    match tokio::time::timeout(SHUTDOWN_DRAIN, drain).await {
        Ok(res) => {
            res?;
        }
        Err(_) => tracing::warn!(
            workers = workers.len(),
            "shutdown still pending after {}s; exiting",
            SHUTDOWN_DRAIN.as_secs()
        ),
    }
    Ok(())
}
