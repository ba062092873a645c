use actix_web::{HttpResponse, Responder, delete, get, post, put, web};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::db::{AnalysisListing, ChargePointRecord};
use crate::app::services::{
    AnalysisCommandHandler, AnalysisQueryHandler, AnalysisRequest, ServiceError,
    SqliteAnalysisService,
};
use crate::domain::analysis::AnalysisError;
use crate::domain::models::{LogRow, RowOrder};

const CHARGE_POINT_ID_KEYS: [&str; 3] = ["id", "chargePointId", "Charge Point id"];

#[derive(Clone)]
pub struct ApiState {
    pub analyses: SqliteAnalysisService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeBody {
    pub rows: Vec<LogRow>,
    #[serde(default)]
    pub row_order: RowOrder,
    pub filename: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummaryResponse {
    pub id: String,
    pub created_at: String,
    pub filename: Option<String>,
    pub user_email: Option<String>,
    pub row_order: String,
    pub charge_point_id: Option<String>,
    pub session_count: i64,
}

impl From<AnalysisListing> for AnalysisSummaryResponse {
    fn from(listing: AnalysisListing) -> Self {
        Self {
            id: listing.id,
            created_at: listing.created_at,
            filename: listing.filename,
            user_email: listing.user_email,
            row_order: listing.row_order,
            charge_point_id: listing.charge_point_id,
            session_count: listing.session_count,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisListResponse {
    pub total: i64,
    pub items: Vec<AnalysisSummaryResponse>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(create_analysis_endpoint)
        .service(list_analyses_endpoint)
        .service(get_analysis_endpoint)
        .service(delete_analysis_endpoint)
        .service(replace_charge_points_endpoint)
        .service(get_charge_point_endpoint);
}

#[get("/health")]
async fn health(state: web::Data<ApiState>) -> impl Responder {
    match state.analyses.get_schema_version() {
        Ok(schema_version) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "schemaVersion": schema_version
        })),
        Err(error) => service_error_response(error),
    }
}

#[post("/analyses")]
async fn create_analysis_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<AnalyzeBody>,
) -> impl Responder {
    let body = body.into_inner();
    let request = AnalysisRequest {
        rows: body.rows,
        row_order: body.row_order,
        filename: body.filename,
        user_email: body.user_email,
    };
    let service = state.analyses.clone();

    match web::block(move || service.run_analysis(&request)).await {
        Ok(Ok(stored)) => HttpResponse::Created().json(serde_json::json!({
            "id": stored.id,
            "createdAt": stored.created_at,
            "report": stored.report
        })),
        Ok(Err(error)) => service_error_response(error),
        Err(error) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("analysis worker failed: {error}")
        })),
    }
}

#[get("/analyses")]
async fn list_analyses_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<ListQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0);

    let total = match state.analyses.count_analyses() {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };

    match state.analyses.list_analyses(limit, offset) {
        Ok(listings) => HttpResponse::Ok().json(AnalysisListResponse {
            total,
            items: listings.into_iter().map(AnalysisSummaryResponse::from).collect(),
        }),
        Err(error) => service_error_response(error),
    }
}

#[get("/analyses/{id}")]
async fn get_analysis_endpoint(state: web::Data<ApiState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match state.analyses.get_analysis(&id) {
        Ok(Some(record)) => {
            let report: Value = match serde_json::from_str(&record.report_json) {
                Ok(value) => value,
                Err(error) => return service_error_response(ServiceError::from(error)),
            };
            HttpResponse::Ok().json(serde_json::json!({
                "id": record.id,
                "createdAt": record.created_at,
                "filename": record.filename,
                "userEmail": record.user_email,
                "rowOrder": record.row_order,
                "chargePointId": record.charge_point_id,
                "sessionCount": record.session_count,
                "report": report
            }))
        }
        Ok(None) => not_found("analysis not found"),
        Err(error) => service_error_response(error),
    }
}

#[delete("/analyses/{id}")]
async fn delete_analysis_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.analyses.delete_analysis(&id) {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => not_found("analysis not found"),
        Err(error) => service_error_response(error),
    }
}

#[put("/charge-points")]
async fn replace_charge_points_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<Vec<Value>>,
) -> impl Responder {
    let mut records = Vec::with_capacity(body.len());
    for (index, record) in body.iter().enumerate() {
        let Some(id) = charge_point_id(record) else {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("charge point record {index} has no id")
            }));
        };
        records.push(ChargePointRecord {
            id,
            record_json: record.to_string(),
        });
    }

    match state.analyses.replace_charge_points(&records) {
        Ok(stored) => HttpResponse::Ok().json(serde_json::json!({ "stored": stored })),
        Err(error) => service_error_response(error),
    }
}

#[get("/charge-points/{id}")]
async fn get_charge_point_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.analyses.get_charge_point(&id) {
        Ok(Some(record)) => match serde_json::from_str::<Value>(&record.record_json) {
            Ok(value) => HttpResponse::Ok().json(value),
            Err(error) => service_error_response(ServiceError::from(error)),
        },
        Ok(None) => not_found("charge point not found"),
        Err(error) => service_error_response(error),
    }
}

fn charge_point_id(record: &Value) -> Option<String> {
    CHARGE_POINT_ID_KEYS.iter().find_map(|key| match record.get(*key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn not_found(message: &str) -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": message }))
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::Analysis(error @ AnalysisError::UnrecognizedLog { .. }) => {
            HttpResponse::UnprocessableEntity().json(serde_json::json!({
                "error": error.to_string()
            }))
        }
        ServiceError::Analysis(error) => {
            tracing::error!(error = %error, "analysis failed");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": error.to_string()
            }))
        }
        ServiceError::DbLockPoisoned => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "database lock poisoned"
            }))
        }
        ServiceError::Database(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("database query failed: {error}")
            }))
        }
        ServiceError::Serialization(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("report serialization failed: {error}")
            }))
        }
    }
}
