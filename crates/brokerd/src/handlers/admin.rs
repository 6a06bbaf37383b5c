//! Administrative functions of the `system` and `test` modules.
//!
//! `ping`, `health`, `stats` and `metrics` are served by both modules;
//! `info` and `shutdown` only by `system`, `echo` only by `test`.

use serde_json::{Value, json};
use tracing::info;

use crate::dispatch::{HandlerError, HandlerTable};
use crate::services::BrokerServices;

use super::HANDLERS_TARGET;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Registers the administrative functions.
pub fn register(table: &mut HandlerTable) {
    for module in ["system", "test"] {
        table
            .register(module, "ping", ping)
            .register(module, "health", health)
            .register(module, "stats", stats)
            .register(module, "metrics", metrics);
    }
    table
        .register("system", "info", system_info)
        .register("system", "shutdown", shutdown)
        .register("test", "echo", echo);
}

fn uptime_secs(services: &BrokerServices) -> f64 {
    services.uptime().as_secs_f64()
}

/// Liveness probe echoing its parameters.
fn ping(services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
    Ok(json!({
        "message": "pong",
        "version": VERSION,
        "uptime_secs": uptime_secs(services),
        "input": params,
    }))
}

fn health(services: &BrokerServices, _: &Value) -> Result<Value, HandlerError> {
    let governor = services.governor().snapshot();
    Ok(json!({
        "status": if services.shutdown().is_fired() { "stopping" } else { "healthy" },
        "version": VERSION,
        "uptime_secs": uptime_secs(services),
        "loaded_modules": services.modules(),
        "resources": governor.resources,
        "live_handles": services.registry().len(),
    }))
}

/// Cumulative counters.
fn stats(services: &BrokerServices, _: &Value) -> Result<Value, HandlerError> {
    let security = services.security().monitor().snapshot();
    Ok(json!({
        "uptime_secs": uptime_secs(services),
        "requests": services.governor().totals(),
        "validation_failures": security.validation_failures,
        "security_events": security.by_kind,
        "registry": services.registry().stats(),
        "cache": services.cache().stats(),
    }))
}

/// Everything `stats` reports plus live resources, latency percentiles and
/// recent security events.
fn metrics(services: &BrokerServices, _: &Value) -> Result<Value, HandlerError> {
    let governor = services.governor().snapshot();
    Ok(json!({
        "uptime_secs": uptime_secs(services),
        "requests": governor.totals,
        "latency": governor.latency,
        "resources": governor.resources,
        "limits": governor.limits,
        "security": services.security().monitor().snapshot(),
        "registry": services.registry().stats(),
        "cache": services.cache().stats(),
    }))
}

fn system_info(services: &BrokerServices, _: &Value) -> Result<Value, HandlerError> {
    let limits = services.limits();
    let cache = services.cache_settings();
    let gate = services.security().limits();
    Ok(json!({
        "version": VERSION,
        "pid": std::process::id(),
        "socket": services.endpoint().to_string(),
        "uptime_secs": uptime_secs(services),
        "loaded_modules": services.modules(),
        "configuration": {
            "max_concurrent_requests": limits.max_concurrent_requests,
            "max_requests_per_minute": limits.max_requests_per_minute,
            "max_memory_mb": limits.max_memory_mb,
            "max_cpu_percent": limits.max_cpu_percent,
            "max_request_bytes": limits.max_request_bytes,
            "idle_timeout_secs": limits.idle_timeout.as_secs(),
            "cleanup_interval_secs": limits.cleanup_interval.as_secs(),
            "connection_idle_secs": limits.connection_idle.as_secs(),
            "cache_ttl_secs": cache.ttl.as_secs(),
            "cache_include_secrets": cache.include_secrets,
            "max_params_depth": gate.max_depth,
            "max_array_len": gate.max_array_len,
            "max_string_bytes": gate.max_string_bytes,
            "max_params": gate.max_params,
        },
    }))
}

fn shutdown(services: &BrokerServices, _: &Value) -> Result<Value, HandlerError> {
    if services.shutdown().fire() {
        info!(target: HANDLERS_TARGET, "shutdown requested by client");
    }
    Ok(json!({"message": "shutdown initiated"}))
}

fn echo(_: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
    Ok(params.clone())
}
