//! Service index, health and metrics endpoints.

use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /`
pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Voice Assistant API is running",
        "endpoints": {
            "ws_assistant": "/ws/assistant"
        }
    }))
}

/// `GET /health` and `GET /api/v1/health`
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let active_sessions = state.active_sessions();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "providers": {
            "stt": state.factory.stt_name(),
            "llm": state.factory.llm_name(),
            "tts": state.factory.tts_name()
        },
        "sessions": session_load(active_sessions, state.sessions.capacity()),
        "turns": turn_counters(&metrics),
        "memory": memory_info()
    }))
}

/// `GET /api/v1/metrics`
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoints: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoints.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "requests_per_second": ratio(metrics.request_count, uptime_seconds)
        },
        "sessions": session_load(state.active_sessions(), state.sessions.capacity()),
        "turns": turn_counters(&metrics),
        "endpoints": endpoints
    }))
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

fn turn_counters(metrics: &AppMetrics) -> serde_json::Value {
    json!({
        "completed": metrics.turns_completed,
        "aborted": metrics.turns_aborted,
        "synthesis_failures": metrics.synthesis_failures
    })
}

fn session_load(active: usize, capacity: usize) -> serde_json::Value {
    let usage = ratio(active as u64, capacity as u64);
    let status = if usage >= 1.0 {
        "full"
    } else if usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "active": active,
        "max": capacity,
        "usage_percent": (usage * 100.0).round(),
        "status": status
    })
}

#[cfg(target_os = "linux")]
fn memory_info() -> serde_json::Value {
    let read_kb = |status: &str, key: &str| -> u64 {
        status
            .lines()
            .find(|line| line.starts_with(key))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .unwrap_or(0)
    };

    match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => json!({
            "resident_memory_bytes": read_kb(&status, "VmRSS:") * 1024,
            "virtual_memory_bytes": read_kb(&status, "VmSize:") * 1024,
            "available": true
        }),
        Err(_) => json!({ "available": false }),
    }
}

#[cfg(not(target_os = "linux"))]
fn memory_info() -> serde_json::Value {
    json!({ "available": false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::MockSetup;
    use crate::protocol::TurnOutcome;
    use crate::state::tests::test_state;
    use actix_web::{test as actix_test, App};

    #[test]
    fn test_session_load_levels() {
        assert_eq!(session_load(0, 10)["status"], "normal");
        assert_eq!(session_load(8, 10)["status"], "high_load");
        assert_eq!(session_load(10, 10)["status"], "full");
        assert_eq!(session_load(5, 10)["usage_percent"], 50.0);
    }

    #[actix_web::test]
    async fn test_health_reports_providers_and_turns() {
        let state = test_state(&MockSetup::new("", ""), 4);
        state.record_turn(TurnOutcome::Completed);

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;
        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["providers"]["tts"], "scripted");
        assert_eq!(body["turns"]["completed"], 1);
        assert_eq!(body["sessions"]["max"], 4);
    }

    #[actix_web::test]
    async fn test_index_lists_websocket_endpoint() {
        let app = actix_test::init_service(App::new().route("/", web::get().to(index))).await;
        let req = actix_test::TestRequest::get().uri("/").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["endpoints"]["ws_assistant"], "/ws/assistant");
    }
}
