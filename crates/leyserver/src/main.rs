use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use leycore::{Edge, ExecutionOptions, NodeSpec};
use leyruntime::{EngineConfig, ExecutionEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    engine: Arc<ExecutionEngine>,
}

/// Request body for starting a run
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    nodes: Vec<NodeSpec>,
    #[serde(default)]
    edges: Vec<Edge>,
    #[serde(default)]
    options: ExecutionOptions,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn not_found(execution_id: Uuid) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        error: format!("Execution {} not found", execution_id),
    })
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "leyserver"
    }))
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.engine.registry();
    let nodes: Vec<_> = registry
        .list_node_types()
        .into_iter()
        .map(|node_type| {
            let metadata = registry.get_metadata(&node_type).unwrap_or_default();
            serde_json::json!({
                "type": node_type,
                "description": metadata.description,
                "category": metadata.category,
                "inputs": metadata.inputs,
                "outputs": metadata.outputs,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

/// Run a graph to completion and return its result
#[post("/api/executions")]
async fn start_execution(
    data: web::Data<AppState>,
    req: web::Json<ExecuteRequest>,
) -> ActixResult<impl Responder> {
    let ExecuteRequest { nodes, edges, options } = req.into_inner();
    info!(nodes = nodes.len(), edges = edges.len(), "Executing graph");

    let result = data.engine.run(nodes, edges, options).await;

    info!(
        execution_id = %result.context.execution_id,
        status = ?result.context.status,
        "Execution {} finished in {}ms",
        result.context.execution_id,
        result.execution_time_ms
    );
    Ok(HttpResponse::Ok().json(result))
}

/// In-flight runs
#[get("/api/executions")]
async fn list_executions(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.engine.active_executions()))
}

#[get("/api/executions/{id}")]
async fn get_execution(data: web::Data<AppState>, path: web::Path<Uuid>) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    Ok(match data.engine.execution(execution_id) {
        Some(context) => HttpResponse::Ok().json(context),
        None => not_found(execution_id),
    })
}

#[post("/api/executions/{id}/cancel")]
async fn cancel_execution(data: web::Data<AppState>, path: web::Path<Uuid>) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    if data.engine.cancel(execution_id) {
        info!(execution_id = %execution_id, "Cancelled execution");
        Ok(HttpResponse::Ok().json(serde_json::json!({
            "executionId": execution_id,
            "cancelled": true
        })))
    } else {
        Ok(not_found(execution_id))
    }
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.engine.subscribe_stream();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "WebSocket client lagging, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

fn app_state() -> web::Data<AppState> {
    let engine = ExecutionEngine::new(Arc::new(leynodes::standard_registry()), EngineConfig::default());
    web::Data::new(AppState {
        engine: Arc::new(engine),
    })
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_node_types)
        .service(start_execution)
        .service(list_executions)
        .service(get_execution)
        .service(cancel_execution)
        .service(websocket_events);
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 Starting Ley server");

    let app_state = app_state();
    info!("✅ Engine initialized with standard nodes");

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test};

    #[actix_web::test]
    async fn health_reports_ok() {
        let app = test::init_service(App::new().app_data(app_state()).configure(routes)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
    }

    #[actix_web::test]
    async fn lists_standard_nodes() {
        let app = test::init_service(App::new().app_data(app_state()).configure(routes)).await;
        let req = test::TestRequest::get().uri("/api/nodes").to_request();
        let body: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;
        assert!(body.iter().any(|n| n["type"] == "transform"));
    }

    #[actix_web::test]
    async fn runs_a_posted_graph() {
        let app = test::init_service(App::new().app_data(app_state()).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/api/executions")
            .set_json(serde_json::json!({
                "nodes": [
                    {"id": "n", "type": "input", "data": {"properties": {"defaultValue": 4, "dataType": "number"}}},
                    {"id": "t", "type": "transform", "data": {"properties": {"transformType": "custom", "expression": "input * 10"}}},
                    {"id": "out", "type": "output", "data": {"label": "answer", "properties": {"format": "raw"}}}
                ],
                "edges": [
                    {"id": "e1", "source": "n", "target": "t"},
                    {"id": "e2", "source": "t", "target": "out"}
                ]
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["finalOutputs"]["answer"], 40.0);
    }

    #[actix_web::test]
    async fn unknown_execution_is_not_found() {
        let app = test::init_service(App::new().app_data(app_state()).configure(routes)).await;
        let uri = format!("/api/executions/{}", Uuid::new_v4());
        let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let cancel = format!("/api/executions/{}/cancel", Uuid::new_v4());
        let resp = test::call_service(&app, test::TestRequest::post().uri(&cancel).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
