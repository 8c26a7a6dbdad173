use actix_web::{web, HttpResponse, Responder};
use serde_json::json;

use crate::api::handlers::{
    filters::{get_stats, list_stats, manual_switch, set_auto_switch},
    igmp::{toggle_all, toggle_by_id},
};
use crate::api::websocket::ws_index;

/// Root endpoint listing the control-plane API
async fn index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "name": "mcast-failover",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Master/slave multicast source failover",
        "endpoints": [
            {
                "path": "/stats",
                "method": "GET",
                "description": "List all filters"
            },
            {
                "path": "/stats/{id}",
                "method": "GET",
                "description": "Get one filter"
            },
            {
                "path": "/auto-switch/{id}/{on|off}",
                "method": "PATCH",
                "description": "Enable or disable automatic switching"
            },
            {
                "path": "/switch/{id}/{master|slave}",
                "method": "PATCH",
                "description": "Switch a filter by hand (automatic switching must be off)"
            },
            {
                "path": "/igmp/{on|off}",
                "method": "PATCH",
                "description": "Join or leave multicast groups for all filters"
            },
            {
                "path": "/igmp/{id}/{on|off}",
                "method": "PATCH",
                "description": "Join or leave multicast groups for one filter"
            },
            {
                "path": "/ws",
                "method": "GET",
                "description": "WebSocket feed of switch events"
            }
        ]
    }))
}

/// Configure API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/ws", web::get().to(ws_index))
        .service(
            web::scope("/stats")
                .route("", web::get().to(list_stats))
                .route("/{id}", web::get().to(get_stats)),
        )
        .route("/auto-switch/{id}/{value}", web::patch().to(set_auto_switch))
        .route("/switch/{id}/{side}", web::patch().to(manual_switch))
        .service(
            web::scope("/igmp")
                .route("/{direction}", web::patch().to(toggle_all))
                .route("/{id}/{direction}", web::patch().to(toggle_by_id)),
        );
}
