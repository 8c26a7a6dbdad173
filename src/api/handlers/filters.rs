use actix_web::{web, HttpResponse, Responder};
use log::info;

use crate::api::handlers::{error_response, AppState};
use crate::models::filter::{FilterId, Side};
use crate::utils::error::{AppError, AppResult};

fn parse_switch_value(value: &str) -> AppResult<bool> {
    match value.to_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(AppError::InvalidParameter(format!(
            "value must be on or off, got '{}'",
            other
        ))),
    }
}

/// List every filter, sorted by id
pub async fn list_stats(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.filters.snapshot())
}

/// One filter by id
pub async fn get_stats(state: web::Data<AppState>, path: web::Path<FilterId>) -> impl Responder {
    match state.filters.get(path.into_inner()) {
        Ok(filter) => HttpResponse::Ok().json(filter.snapshot()),
        Err(e) => error_response(&e),
    }
}

/// Turn automatic switching on or off for one filter
pub async fn set_auto_switch(
    state: web::Data<AppState>,
    path: web::Path<(FilterId, String)>,
) -> impl Responder {
    let (id, value) = path.into_inner();
    let result = parse_switch_value(&value).and_then(|enabled| {
        let filter = state.filters.get(id)?;
        state.engine.set_auto_switch(&filter, enabled);
        Ok(filter)
    });

    match result {
        Ok(filter) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Automatic switching {} for filter {}", value.to_lowercase(), id),
            "filter": filter.snapshot()
        })),
        Err(e) => error_response(&e),
    }
}

/// Switch a filter to master or slave by hand
pub async fn manual_switch(
    state: web::Data<AppState>,
    path: web::Path<(FilterId, String)>,
) -> impl Responder {
    let (id, side) = path.into_inner();
    let result = async {
        let target = side.parse::<Side>()?;
        let filter = state.filters.get(id)?;
        let event = state.engine.manual_switch(&filter, target).await?;
        Ok::<_, AppError>((filter, event))
    }
    .await;

    match result {
        Ok((filter, event)) => {
            info!("Filter {} switched to {} on request", id, event.to);
            HttpResponse::Ok().json(serde_json::json!({
                "status": "success",
                "message": format!("Filter {} switched to {}", id, event.to),
                "event": event,
                "filter": filter.snapshot()
            }))
        }
        Err(e) => error_response(&e),
    }
}
