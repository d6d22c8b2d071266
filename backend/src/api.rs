use std::env;

use actix_cors::Cors;
use actix_web::{
    delete, get,
    http::{header, StatusCode},
    patch, post, put,
    web::{self, Data},
    App, HttpResponse, HttpServer, ResponseError,
};
use chrono::Utc;
use common::req::{DeviceUpsert, FloorplanUpsert, Health, Mode, ModeChange};

use crate::db::Db;

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound,
    Conflict,
    Server(anyhow::Error),
}

impl ApiError {
    fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Validation(msg) => write!(f, "{msg}"),
            ApiError::NotFound => write!(f, "not found"),
            ApiError::Conflict => write!(f, "id already exists"),
            ApiError::Server(e) => write!(f, "{e}"),
        }
    }
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::Validation(msg) => ErrorBody { error: msg.clone(), detail: None },
            ApiError::NotFound => ErrorBody { error: "not found".into(), detail: None },
            ApiError::Conflict => ErrorBody { error: "id already exists".into(), detail: None },
            ApiError::Server(e) => {
                log::error!("request failed: {e:#}");
                ErrorBody { error: "server_error".into(), detail: Some(format!("{e:#}")) }
            }
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Server(e)
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(e: actix_web::error::BlockingError) -> Self {
        ApiError::Server(anyhow::Error::new(e))
    }
}

#[get("/api/health")]
async fn api_health() -> HttpResponse {
    HttpResponse::Ok().json(Health { status: "ok".into(), time: Utc::now() })
}

// ===============================================
// devices
// ===============================================

#[get("/api/devices")]
async fn api_devices(db: Data<Db>) -> Result<HttpResponse, ApiError> {
    let db = db.get_ref().clone();
    let devices = web::block(move || db.devices()).await??;
    Ok(HttpResponse::Ok().json(devices))
}

#[get("/api/devices/{id}")]
async fn api_device(db: Data<Db>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let db = db.get_ref().clone();
    let id = path.into_inner();
    let device = web::block(move || db.device(&id)).await??;
    match device {
        Some(device) => Ok(HttpResponse::Ok().json(device)),
        None => Err(ApiError::NotFound),
    }
}

#[post("/api/devices")]
async fn api_create_device(
    db: Data<Db>,
    body: web::Json<DeviceUpsert>,
) -> Result<HttpResponse, ApiError> {
    let db = db.get_ref().clone();
    let body = body.into_inner();
    let device = web::block(move || db.create_device(&body)).await??;
    match device {
        Some(device) => Ok(HttpResponse::Created().json(device)),
        None => Err(ApiError::Conflict),
    }
}

#[put("/api/devices/{id}")]
async fn api_upsert_device(
    db: Data<Db>,
    path: web::Path<String>,
    body: web::Json<DeviceUpsert>,
) -> Result<HttpResponse, ApiError> {
    let db = db.get_ref().clone();
    let id = path.into_inner();
    let body = body.into_inner();
    let (device, created) = web::block(move || db.upsert_device(&id, &body)).await??;
    let mut res = if created { HttpResponse::Created() } else { HttpResponse::Ok() };
    Ok(res.json(device))
}

#[patch("/api/devices/{id}/mode")]
async fn api_device_mode(
    db: Data<Db>,
    path: web::Path<String>,
    body: web::Json<ModeChange>,
) -> Result<HttpResponse, ApiError> {
    let mode = match &body.mode {
        None => return Err(ApiError::validation("mode required")),
        Some(raw) => Mode::parse(raw).ok_or_else(|| ApiError::validation("invalid mode"))?,
    };
    let db = db.get_ref().clone();
    let id = path.into_inner();
    let device = web::block(move || db.set_device_mode(&id, mode)).await??;
    match device {
        Some(device) => Ok(HttpResponse::Ok().json(device)),
        None => Err(ApiError::NotFound),
    }
}

#[delete("/api/devices/{id}")]
async fn api_delete_device(db: Data<Db>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let db = db.get_ref().clone();
    let id = path.into_inner();
    let deleted = web::block(move || db.delete_device(&id)).await??;
    if deleted {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Err(ApiError::NotFound)
    }
}

// ===============================================
// floorplans
// ===============================================

#[get("/api/floorplans")]
async fn api_floorplans(db: Data<Db>) -> Result<HttpResponse, ApiError> {
    let db = db.get_ref().clone();
    let floorplans = web::block(move || db.floorplans()).await??;
    Ok(HttpResponse::Ok().json(floorplans))
}

#[get("/api/floorplans/latest/current")]
async fn api_latest_floorplan(db: Data<Db>) -> Result<HttpResponse, ApiError> {
    let db = db.get_ref().clone();
    let floorplan = web::block(move || db.latest_floorplan()).await??;
    match floorplan {
        Some(floorplan) => Ok(HttpResponse::Ok().json(floorplan)),
        None => Err(ApiError::NotFound),
    }
}

#[get("/api/floorplans/{id}")]
async fn api_floorplan(db: Data<Db>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let db = db.get_ref().clone();
    let id = path.into_inner();
    let floorplan = web::block(move || db.floorplan(&id)).await??;
    match floorplan {
        Some(floorplan) => Ok(HttpResponse::Ok().json(floorplan)),
        None => Err(ApiError::NotFound),
    }
}

fn required_data(body: &FloorplanUpsert) -> Result<String, ApiError> {
    body.data
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::validation("data required"))
}

#[post("/api/floorplans")]
async fn api_create_floorplan(
    db: Data<Db>,
    body: web::Json<FloorplanUpsert>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let data = required_data(&body)?;
    let db = db.get_ref().clone();
    let floorplan = web::block(move || db.create_floorplan(&body, data)).await??;
    match floorplan {
        Some(floorplan) => Ok(HttpResponse::Created().json(floorplan)),
        None => Err(ApiError::Conflict),
    }
}

#[put("/api/floorplans/{id}")]
async fn api_upsert_floorplan(
    db: Data<Db>,
    path: web::Path<String>,
    body: web::Json<FloorplanUpsert>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let data = required_data(&body)?;
    let db = db.get_ref().clone();
    let id = path.into_inner();
    let (floorplan, created) = web::block(move || db.upsert_floorplan(&id, &body, data)).await??;
    let mut res = if created { HttpResponse::Created() } else { HttpResponse::Ok() };
    Ok(res.json(floorplan))
}

#[delete("/api/floorplans/{id}")]
async fn api_delete_floorplan(
    db: Data<Db>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let db = db.get_ref().clone();
    let id = path.into_inner();
    let deleted = web::block(move || db.delete_floorplan(&id)).await??;
    if deleted {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Err(ApiError::NotFound)
    }
}

// latest/current must be registered before the {id} route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(api_health)
        .service(api_devices)
        .service(api_create_device)
        .service(api_device)
        .service(api_upsert_device)
        .service(api_device_mode)
        .service(api_delete_device)
        .service(api_floorplans)
        .service(api_latest_floorplan)
        .service(api_create_floorplan)
        .service(api_floorplan)
        .service(api_upsert_floorplan)
        .service(api_delete_floorplan);
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(5 * 1024 * 1024)
        .error_handler(|err, _req| {
            let body = ErrorBody { error: format!("invalid body: {err}"), detail: None };
            actix_web::error::InternalError::from_response(
                err,
                HttpResponse::BadRequest().json(body),
            )
            .into()
        })
}

pub async fn new_http_server(db: Db) -> std::io::Result<()> {
    let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(3001);
    let origin = env::var("FRONTEND_ORIGIN").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

    log::info!("listening on http://{host}:{port}");
    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(db.clone()))
            .app_data(json_config())
            .configure(configure)
            .wrap(
                Cors::default()
                    .allowed_origin(&origin) // frontend
                    .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE"])
                    .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT])
                    .allowed_header(header::CONTENT_TYPE)
                    .supports_credentials()
                    .max_age(3600),
            )
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
