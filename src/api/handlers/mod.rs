use actix_web::HttpResponse;
use log::{error, warn};
use std::sync::Arc;

use crate::igmp::manager::MembershipManager;
use crate::models::filter::FilterTable;
use crate::switch::engine::SwitchEngine;
use crate::utils::error::AppError;

pub mod filters;
pub mod igmp;

/// Shared state handed to every handler
pub struct AppState {
    pub filters: Arc<FilterTable>,
    pub engine: Arc<SwitchEngine>,
    pub membership: Arc<MembershipManager>,
}

/// Map a control-plane error to its HTTP response
pub fn error_response(err: &AppError) -> HttpResponse {
    let body = serde_json::json!({
        "status": "error",
        "message": err.to_string()
    });

    match err {
        AppError::UnknownId(_) => {
            warn!("Request for unknown filter: {}", err);
            HttpResponse::NotFound().json(body)
        }
        AppError::InvalidState(_) | AppError::AlreadyInState(_) | AppError::InvalidParameter(_) => {
            warn!("Rejected request: {}", err);
            HttpResponse::BadRequest().json(body)
        }
        _ => {
            error!("Request failed: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::igmp::socket::{IgmpConnector, IgmpSocket};
    use crate::models::filter::{Filter, SwitchSettings};
    use crate::switch::testing::{RecordingInstaller, ScriptedCounters};
    use crate::utils::error::AppResult;
    use actix_web::http::StatusCode;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    /// Connector whose sockets cannot be opened, so membership workers exit
    /// without touching the host
    struct ClosedConnector;

    impl IgmpConnector for ClosedConnector {
        fn open(&self, _filter: &Filter) -> AppResult<Arc<dyn IgmpSocket>> {
            Err(AppError::CommandError("sockets disabled in tests".into()))
        }
    }

    /// State with two filters, both on master with automatic switching off
    pub(crate) fn test_state() -> AppState {
        let filters = Arc::new(FilterTable::from_filters((1..=2).map(|id| {
            Filter::new(
                id,
                "eth1",
                Ipv4Addr::new(239, 1, id as u8, 1),
                Ipv4Addr::new(239, 1, id as u8, 2),
                Ipv4Addr::new(10, 10, 0, id as u8),
                SwitchSettings {
                    failover_threshold: 3,
                    poll_interval: Duration::from_millis(1000),
                    master_priority: 1,
                    slave_priority: 2,
                    return_to_master: true,
                },
                false,
            )
        })));
        let engine = Arc::new(SwitchEngine::new(
            Arc::new(ScriptedCounters::new()),
            Arc::new(RecordingInstaller::new()),
            None,
        ));
        let membership = Arc::new(MembershipManager::new(
            Arc::clone(&filters),
            Arc::new(ClosedConnector),
            Duration::from_secs(2),
        ));
        AppState {
            filters,
            engine,
            membership,
        }
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(error_response(&AppError::UnknownId(4)).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            error_response(&AppError::InvalidState("busy".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&AppError::AlreadyInState("joined".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&AppError::CommandError("tc".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
