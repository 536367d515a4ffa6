use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use graphcore::{EngineError, Fields, GraphDefinition, GraphId, RunId};
use graphruntime::{GraphRuntime, RuntimeConfig, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod ws;

/// Application state shared across handlers
pub(crate) struct AppState {
    runtime: GraphRuntime,
}

/// Accepts `{"graph": {...}}` or a bare definition
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreateGraphRequest {
    Wrapped { graph: GraphDefinition },
    Bare(GraphDefinition),
}

impl CreateGraphRequest {
    fn into_definition(self) -> GraphDefinition {
        match self {
            CreateGraphRequest::Wrapped { graph } | CreateGraphRequest::Bare(graph) => graph,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunGraphRequest {
    graph_id: GraphId,
    #[serde(default)]
    initial_state: Fields,
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    graph_id: Option<GraphId>,
}

#[derive(Debug, Serialize)]
struct CreateGraphResponse {
    graph_id: GraphId,
    message: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Map an engine error onto a status code
fn error_response(e: &EngineError) -> HttpResponse {
    let body = ErrorResponse {
        error: e.to_string(),
    };
    match e {
        EngineError::Validation(_) => HttpResponse::BadRequest().json(body),
        _ if e.is_not_found() => HttpResponse::NotFound().json(body),
        _ => {
            error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    match data.runtime.stats().await {
        Ok(stats) => HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "service": "graphflow",
            "graphs": stats.graphs,
            "runs": stats.runs,
            "active_runs": stats.active_runs,
        })),
        Err(e) => error_response(&e),
    }
}

/// Create a new graph
#[post("/api/graph/create")]
async fn create_graph(
    data: web::Data<AppState>,
    request: web::Json<CreateGraphRequest>,
) -> impl Responder {
    let definition = request.into_inner().into_definition();
    let name = definition.name.clone();

    match data.runtime.create_graph(definition).await {
        Ok(graph_id) => HttpResponse::Ok().json(CreateGraphResponse {
            graph_id,
            message: format!("Graph '{}' created successfully", name),
        }),
        Err(e) => {
            info!("Rejected graph '{}': {}", name, e);
            error_response(&e)
        }
    }
}

/// Execute a graph and wait for the result
#[post("/api/graph/run")]
async fn run_graph(data: web::Data<AppState>, request: web::Json<RunGraphRequest>) -> impl Responder {
    let RunGraphRequest {
        graph_id,
        initial_state,
    } = request.into_inner();

    info!("Running graph: {}", graph_id);

    match data.runtime.run(graph_id, initial_state).await {
        Ok(outcome) => HttpResponse::Ok().json(serde_json::json!({
            "run_id": outcome.run_id,
            "status": outcome.status,
            "final_state": outcome.final_state,
            "execution_log": outcome.log,
            "error": outcome.error,
        })),
        Err(e) => error_response(&e),
    }
}

/// Start a graph in the background
#[post("/api/graph/run-async")]
async fn run_graph_async(
    data: web::Data<AppState>,
    request: web::Json<RunGraphRequest>,
) -> impl Responder {
    let RunGraphRequest {
        graph_id,
        initial_state,
    } = request.into_inner();

    match data.runtime.run_async(graph_id, initial_state).await {
        Ok(run_id) => HttpResponse::Accepted().json(serde_json::json!({
            "run_id": run_id,
            "status": "started",
            "message": "Graph execution started in background",
        })),
        Err(e) => error_response(&e),
    }
}

#[get("/api/graph/state/{run_id}")]
async fn get_run_state(data: web::Data<AppState>, path: web::Path<RunId>) -> impl Responder {
    match data.runtime.get_run_state(path.into_inner()).await {
        Ok(run) => HttpResponse::Ok().json(serde_json::json!({
            "run_id": run.id,
            "graph_id": run.graph_id,
            "status": run.status,
            "current_state": run.state.fields,
            "execution_log": run.state.log,
            "error": run.error,
            "started_at": run.started_at,
            "ended_at": run.ended_at,
        })),
        Err(e) => error_response(&e),
    }
}

#[post("/api/graph/cancel/{run_id}")]
async fn cancel_run(data: web::Data<AppState>, path: web::Path<RunId>) -> impl Responder {
    let run_id = path.into_inner();
    match data.runtime.cancel_run(run_id).await {
        Ok(cancelled) => HttpResponse::Ok().json(serde_json::json!({
            "run_id": run_id,
            "cancelled": cancelled,
        })),
        Err(e) => error_response(&e),
    }
}

/// List all graphs
#[get("/api/graphs")]
async fn list_graphs(data: web::Data<AppState>) -> impl Responder {
    match data.runtime.list_graphs().await {
        Ok(graphs) => {
            let graphs: Vec<_> = graphs
                .iter()
                .map(|g| {
                    serde_json::json!({
                        "graph_id": g.id(),
                        "name": g.name(),
                        "description": g.definition().description,
                        "nodes": g.node_count(),
                        "entry_point": g.entry(),
                    })
                })
                .collect();
            HttpResponse::Ok().json(serde_json::json!({ "graphs": graphs }))
        }
        Err(e) => error_response(&e),
    }
}

/// Get a specific graph
#[get("/api/graphs/{id}")]
async fn get_graph(data: web::Data<AppState>, path: web::Path<GraphId>) -> impl Responder {
    match data.runtime.get_graph(path.into_inner()).await {
        Ok(graph) => HttpResponse::Ok().json(serde_json::json!({
            "graph_id": graph.id(),
            "definition": graph.definition(),
        })),
        Err(e) => error_response(&e),
    }
}

/// Delete a graph
#[actix_web::delete("/api/graphs/{id}")]
async fn delete_graph(data: web::Data<AppState>, path: web::Path<GraphId>) -> impl Responder {
    let graph_id = path.into_inner();
    match data.runtime.delete_graph(graph_id).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": format!("Graph {} deleted successfully", graph_id)
        })),
        Err(e) => error_response(&e),
    }
}

#[get("/api/runs")]
async fn list_runs(data: web::Data<AppState>, query: web::Query<RunsQuery>) -> impl Responder {
    match data.runtime.list_runs(query.graph_id).await {
        Ok(runs) => HttpResponse::Ok().json(serde_json::json!({ "runs": runs })),
        Err(e) => error_response(&e),
    }
}

/// List available tools
#[get("/api/tools")]
async fn list_tools(data: web::Data<AppState>) -> impl Responder {
    let registry = data.runtime.registry();
    let names = registry.list_tools();

    let tools: Vec<_> = names
        .iter()
        .map(|name| {
            let metadata = registry.get_metadata(name);
            serde_json::json!({
                "name": name,
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
            })
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({ "tools": tools, "count": names.len() }))
}

#[get("/api/stats")]
async fn get_stats(data: web::Data<AppState>) -> impl Responder {
    match data.runtime.stats().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => error_response(&e),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting graphflow server");

    // Create runtime with the standard tools
    let mut registry = ToolRegistry::new();
    graphtools::register_all(&mut registry);

    let config = RuntimeConfig::from_env();
    info!(
        "Runtime initialized with {} tools (max_steps={}, event_buffer={})",
        registry.len(),
        config.max_steps,
        config.event_buffer_size
    );
    let runtime = GraphRuntime::with_registry(Arc::new(registry), config);

    let app_state = web::Data::new(AppState { runtime });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("Server starting on http://{}", bind_address);

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
            .service(health_check)
            .service(create_graph)
            .service(run_graph)
            .service(run_graph_async)
            .service(get_run_state)
            .service(cancel_run)
            .service(list_graphs)
            .service(get_graph)
            .service(delete_graph)
            .service(list_runs)
            .service(list_tools)
            .service(get_stats)
            .service(ws::execute_graph)
            .service(ws::monitor_run)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
