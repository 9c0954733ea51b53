use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::http::StatusCode;
use actix_web::{get, post, web, App, HttpRequest, HttpResponse, HttpServer};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use validator::Validate;

use crate::application::prediction::PredictionService;
use crate::domain::error::AppError;
use crate::domain::project::PredictPayload;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::db::registry::{
    RegistryDb, RunArtifactsRepository, RunMetricsRepository, RunRepository,
};

pub struct HttpState {
    pub db: RegistryDb,
    pub predictor: Arc<PredictionService>,
}

/// Uniform response envelope carried by every endpoint.
fn envelope(
    req: &HttpRequest,
    status: StatusCode,
    data: Option<serde_json::Value>,
) -> HttpResponse {
    let mut body = json!({
        "message": status.canonical_reason().unwrap_or("Unknown"),
        "method": req.method().to_string(),
        "status-code": status.as_u16(),
        "timestamp": Utc::now().to_rfc3339(),
        "url": req.uri().to_string(),
    });
    if let Some(data) = data {
        body["data"] = data;
    }
    HttpResponse::build(status).json(body)
}

fn error_envelope(req: &HttpRequest, err: &AppError) -> HttpResponse {
    let status = match err {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::ParseError(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "Request failed");
    }
    let mut body = json!({
        "message": err.to_string(),
        "method": req.method().to_string(),
        "status-code": status.as_u16(),
        "timestamp": Utc::now().to_rfc3339(),
        "url": req.uri().to_string(),
    });
    body["data"] = json!({});
    HttpResponse::build(status).json(body)
}

/// Health check.
#[get("/")]
async fn index(req: HttpRequest) -> HttpResponse {
    envelope(&req, StatusCode::OK, Some(json!({})))
}

/// Predict tags for a list of texts using the loaded run.
#[post("/predict")]
async fn predict(
    req: HttpRequest,
    state: web::Data<HttpState>,
    payload: web::Json<PredictPayload>,
) -> HttpResponse {
    if let Err(e) = payload.validate() {
        return error_envelope(&req, &AppError::ValidationError(e.to_string()));
    }

    let texts: Vec<String> = payload.texts.iter().map(|item| item.text.clone()).collect();
    match state.predictor.predict(&texts) {
        Ok(predictions) => envelope(
            &req,
            StatusCode::OK,
            Some(json!({ "predictions": predictions })),
        ),
        Err(e) => error_envelope(&req, &e),
    }
}

/// All params of the loaded run.
#[get("/params")]
async fn params(req: HttpRequest, state: web::Data<HttpState>) -> HttpResponse {
    let map = state.predictor.params().as_map();
    envelope(&req, StatusCode::OK, Some(json!({ "params": map })))
}

/// One param value; unknown names resolve to an empty string.
#[get("/params/{name}")]
async fn param(
    req: HttpRequest,
    state: web::Data<HttpState>,
    name: web::Path<String>,
) -> HttpResponse {
    let map = state.predictor.params().as_map();
    let value = map
        .get(name.as_str())
        .cloned()
        .unwrap_or_else(|| json!(""));
    envelope(
        &req,
        StatusCode::OK,
        Some(json!({ "params": { name.as_str(): value } })),
    )
}

#[derive(Debug, Deserialize)]
struct PerformanceQuery {
    filter: Option<String>,
}

/// Performance of the loaded run, optionally filtered by dotted path.
#[get("/performance")]
async fn performance(
    req: HttpRequest,
    state: web::Data<HttpState>,
    query: web::Query<PerformanceQuery>,
) -> HttpResponse {
    let report = state.predictor.performance();
    let data = match &query.filter {
        Some(filter) => json!({ "performance": { filter: report.filter(filter) } }),
        None => json!({ "performance": report }),
    };
    envelope(&req, StatusCode::OK, Some(data))
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<i64>,
}

/// Recent runs from the registry.
#[get("/runs")]
async fn list_runs(
    req: HttpRequest,
    state: web::Data<HttpState>,
    query: web::Query<RunsQuery>,
) -> HttpResponse {
    let runs = RunRepository::new(&state.db);
    match runs.list_recent(query.limit.unwrap_or(10)).await {
        Ok(listed) => envelope(&req, StatusCode::OK, Some(json!({ "runs": listed }))),
        Err(e) => error_envelope(&req, &e),
    }
}

/// One run with its metrics and artifacts.
#[get("/runs/{run_id}")]
async fn get_run(
    req: HttpRequest,
    state: web::Data<HttpState>,
    run_id: web::Path<String>,
) -> HttpResponse {
    let runs = RunRepository::new(&state.db);
    let run = match runs.get(&run_id).await {
        Ok(run) => run,
        Err(e) => return error_envelope(&req, &e),
    };

    let metrics = match RunMetricsRepository::new(&state.db).list_for_run(&run_id).await {
        Ok(metrics) => metrics,
        Err(e) => return error_envelope(&req, &e),
    };
    let artifacts = match RunArtifactsRepository::new(&state.db)
        .list_for_run(&run_id)
        .await
    {
        Ok(artifacts) => artifacts,
        Err(e) => return error_envelope(&req, &e),
    };

    envelope(
        &req,
        StatusCode::OK,
        Some(json!({
            "run": run,
            "metrics": metrics,
            "artifacts": artifacts,
        })),
    )
}

/// Malformed bodies still get the envelope shape.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, req| {
        let response = error_envelope(req, &AppError::ParseError(err.to_string()));
        actix_web::error::InternalError::from_response(err, response).into()
    })
}

pub fn start_server(
    config: AppConfig,
    db: RegistryDb,
    predictor: Arc<PredictionService>,
) -> std::io::Result<Server> {
    let bind = (config.server_host.clone(), config.server_port);
    let state = web::Data::new(HttpState { db, predictor });

    let server = HttpServer::new(move || {
        let cors = Cors::permissive(); // Local tool, no auth surface.

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .app_data(json_config())
            .service(index)
            .service(predict)
            .service(params)
            .service(param)
            .service(performance)
            .service(list_runs)
            .service(get_run)
    })
    .bind(bind)?
    .run();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;

    use crate::application::pipeline::classifier::EpochVerdict;
    use crate::application::run_bundle::RunBundle;
    use crate::application::training::fit_pipeline;
    use crate::domain::params::TrainParams;
    use crate::domain::project::Project;
    use crate::infrastructure::artifact_store::ArtifactLayout;

    /// Train a tiny model into `dir` and wrap it in the handler state.
    async fn state_with_model(dir: &std::path::Path) -> web::Data<HttpState> {
        let config = AppConfig {
            data_dir: dir.to_path_buf(),
            ..AppConfig::default()
        };

        let mut projects = Vec::new();
        for i in 0..40 {
            let (title, tag) = if i % 2 == 0 {
                ("Image segmentation convolutional network masks", "computer-vision")
            } else {
                ("Transformer token embeddings language corpus", "natural-language-processing")
            };
            projects.push(Project {
                id: i,
                created_on: "2020-01-01".to_string(),
                title: title.to_string(),
                description: title.to_string(),
                tag: tag.to_string(),
            });
        }
        let accepted = [
            "computer-vision".to_string(),
            "natural-language-processing".to_string(),
        ]
        .into_iter()
        .collect();
        let mut train_params = TrainParams {
            min_freq: 1,
            num_epochs: 5,
            ngram_max_range: 3,
            ..TrainParams::default()
        };
        let fit = fit_pipeline(projects, &accepted, &train_params, &[], 5, |_| {
            EpochVerdict::Continue
        })
        .unwrap();
        train_params.threshold = Some(fit.threshold);

        let layout = ArtifactLayout::new(&config.data_dir);
        layout.ensure().unwrap();
        let bundle = RunBundle {
            run_id: "serving".to_string(),
            params: train_params,
            encoder: fit.encoder,
            vectorizer: fit.vectorizer,
            model: fit.model,
            performance: fit.test_performance,
        };
        bundle.save(&layout).unwrap();

        let predictor =
            Arc::new(PredictionService::load_unverified(&config, "serving").unwrap());
        let db = RegistryDb::connect_in_memory().await.unwrap();
        web::Data::new(HttpState { db, predictor })
    }

    #[actix_web::test]
    async fn test_index_envelope_shape() {
        let app = test::init_service(App::new().service(index)).await;
        let req = test::TestRequest::get().uri("/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["message"], "OK");
        assert_eq!(body["method"], "GET");
        assert_eq!(body["status-code"], 200);
        assert_eq!(body["url"], "/");
        assert!(body["timestamp"].is_string());
        assert!(body["data"].is_object());
    }

    #[actix_web::test]
    async fn test_predict_returns_snake_case_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_model(dir.path()).await;
        let app = test::init_service(
            App::new()
                .app_data(state)
                .app_data(json_config())
                .service(predict),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({ "texts": [{ "text": "transformer token embeddings" }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = test::read_body_json(resp).await;
        let prediction = &body["data"]["predictions"][0];
        assert_eq!(prediction["input_text"], "transformer token embeddings");
        assert!(prediction["predicted_tag"].is_string());
    }

    #[actix_web::test]
    async fn test_empty_texts_rejected_with_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_model(dir.path()).await;
        let app = test::init_service(
            App::new()
                .app_data(state)
                .app_data(json_config())
                .service(predict),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({ "texts": [] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status-code"], 422);
        assert_eq!(body["method"], "POST");
        assert_eq!(body["url"], "/predict");
        assert!(body["timestamp"].is_string());
    }

    #[actix_web::test]
    async fn test_malformed_body_rejected_with_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_model(dir.path()).await;
        let app = test::init_service(
            App::new()
                .app_data(state)
                .app_data(json_config())
                .service(predict),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/predict")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status-code"], 400);
        assert_eq!(body["url"], "/predict");
        assert!(body["message"].is_string());
    }
}
