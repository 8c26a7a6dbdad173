use actix_web::{web, HttpResponse, Responder};

use crate::api::handlers::{error_response, AppState};
use crate::igmp::manager::MembershipDirection;
use crate::models::filter::FilterId;

/// Join or leave the multicast groups of every filter
pub async fn toggle_all(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match path.parse::<MembershipDirection>() {
        Ok(direction) => {
            let started = state.membership.toggle_all(direction);
            HttpResponse::Ok().json(serde_json::json!({
                "status": "success",
                "message": format!("IGMP {} started for {} filter(s)", direction, started),
                "workers": started
            }))
        }
        Err(e) => error_response(&e),
    }
}

/// Join or leave the multicast groups of one filter
pub async fn toggle_by_id(
    state: web::Data<AppState>,
    path: web::Path<(FilterId, String)>,
) -> impl Responder {
    let (id, direction) = path.into_inner();
    let result = direction
        .parse::<MembershipDirection>()
        .and_then(|direction| state.membership.toggle_by_id(id, direction).map(|_| direction));

    match result {
        Ok(direction) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("IGMP {} started for filter {}", direction, id)
        })),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::tests::test_state;
    use crate::api::routes;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn toggle_all_reports_started_workers() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::patch().uri("/igmp/on").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["workers"], 2);

        // nothing joined, so nothing to leave
        let req = test::TestRequest::patch().uri("/igmp/off").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["workers"], 0);
    }

    #[actix_rt::test]
    async fn toggle_by_id_validates_input() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::patch().uri("/igmp/7/off").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::patch().uri("/igmp/1/sideways").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::patch().uri("/igmp/1/leave").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_rt::test]
    async fn join_on_joined_filter_is_rejected() {
        let state = test_state();
        state.filters.get(1).unwrap().set_multicast_joined(true);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::patch().uri("/igmp/1/on").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "error");
    }
}
