//! # Health and Metrics Endpoints
//!
//! - `GET /health`, `GET /api/v1/health`: liveness plus a short summary
//! - `GET /api/v1/metrics`: session, engine and per-endpoint counters

use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;

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
        "engines": {
            "provider": config.provider,
            "recognizer": state.engines.recognizer.name(),
            "synthesizer": state.engines.synthesizer.name()
        },
        "sessions": session_load(config, &metrics),
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
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
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "sessions": {
            "active_asr": metrics.active_asr_sessions,
            "active_tts": metrics.active_tts_sessions,
            "total": metrics.total_sessions,
            "refused": metrics.sessions_refused,
            "upgrade_failures": metrics.upgrade_failures
        },
        "asr": {
            "segments_decoded": metrics.segments_decoded,
            "decode_failures": metrics.decode_failures
        },
        "tts": {
            "messages_synthesized": metrics.messages_synthesized,
            "synthesis_failures": metrics.synthesis_failures
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn session_load(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let max_sessions = config.performance.max_concurrent_sessions;
    let active = metrics.active_sessions();
    let usage = if max_sessions > 0 {
        active as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if usage >= 1.0 {
        "full"
    } else if usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "active": active,
        "max": max_sessions,
        "usage_percent": (usage * 100.0).round()
    })
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let field_bytes = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}
