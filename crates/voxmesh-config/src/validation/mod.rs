//! Full configuration validation.
//!
//! Validates numeric ranges, ICE server urls and websocket endpoints,
//! collecting every error into a single `ConfigError`.

mod helpers;

#[cfg(test)]
mod tests;

use std::sync::OnceLock;

use regex::Regex;
use voxmesh_common::ConfigError;

use crate::schema::{MeshConfig, TransportStrategy};
use helpers::validate_range;

fn ice_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(stun|stuns|turn|turns):[^\s:]+(:\d{1,5})?(\?transport=(udp|tcp))?$")
            .unwrap_or_else(|e| panic!("invalid ice url pattern: {e}"))
    })
}

fn ws_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^wss?://[^\s/]+(/\S*)?$")
            .unwrap_or_else(|e| panic!("invalid websocket url pattern: {e}"))
    })
}

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &MeshConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_ice(&mut errors, config);

    let neg = &config.negotiation;
    validate_range(
        &mut errors,
        "negotiation.gathering_timeout_ms",
        neg.gathering_timeout_ms,
        100,
        30_000,
    );
    validate_range(
        &mut errors,
        "negotiation.connect_timeout_ms",
        neg.connect_timeout_ms,
        1_000,
        120_000,
    );

    if !config.media.audio && !config.media.video {
        errors.push("media: at least one of audio or video must be enabled".into());
    }

    let transport = &config.transport;
    if transport.in_band.prefix.trim().is_empty() {
        errors.push("transport.in_band.prefix must not be empty".into());
    }
    validate_range(
        &mut errors,
        "transport.in_band.dedup_window",
        transport.in_band.dedup_window,
        16,
        4_096,
    );
    validate_range(
        &mut errors,
        "transport.relay.heartbeat_interval_secs",
        transport.relay.heartbeat_interval_secs,
        5,
        120,
    );
    if transport.relay.reconnect_delay_secs > transport.relay.max_reconnect_delay_secs {
        errors.push(format!(
            "transport.relay.reconnect_delay_secs = {} exceeds max_reconnect_delay_secs = {}",
            transport.relay.reconnect_delay_secs, transport.relay.max_reconnect_delay_secs
        ));
    }
    validate_range(
        &mut errors,
        "transport.relay.connect_timeout_secs",
        transport.relay.connect_timeout_secs,
        1,
        120,
    );
    validate_range(
        &mut errors,
        "transport.broker.connect_timeout_secs",
        transport.broker.connect_timeout_secs,
        1,
        120,
    );

    // Only the selected strategy needs a reachable endpoint.
    match transport.strategy {
        TransportStrategy::InBand => {}
        TransportStrategy::Relay => {
            validate_ws_url(&mut errors, "transport.relay.url", &transport.relay.url)
        }
        TransportStrategy::Broker => {
            validate_ws_url(&mut errors, "transport.broker.url", &transport.broker.url)
        }
    }

    validate_range(
        &mut errors,
        "events.bus_capacity",
        config.events.bus_capacity,
        16,
        8_192,
    );

    if !matches!(
        config.logging.level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(format!(
            "logging.level = {:?} is not one of trace, debug, info, warn, error",
            config.logging.level
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_ice(errors: &mut Vec<String>, config: &MeshConfig) {
    let servers = &config.ice.servers;
    if !servers.iter().any(|s| s.is_stun()) {
        errors.push("ice.servers must contain at least one stun: server".into());
    }
    for (i, server) in servers.iter().enumerate() {
        if server.urls.is_empty() {
            errors.push(format!("ice.servers[{i}].urls is empty"));
        }
        for url in &server.urls {
            if !ice_url_pattern().is_match(url) {
                errors.push(format!("ice.servers[{i}] has invalid url {url:?}"));
            }
        }
        let is_turn = server.urls.iter().any(|u| u.starts_with("turn"));
        if is_turn && (server.username.is_none() || server.credential.is_none()) {
            errors.push(format!(
                "ice.servers[{i}] is a TURN server and needs username and credential"
            ));
        }
    }
}

fn validate_ws_url(errors: &mut Vec<String>, name: &str, url: &str) {
    if !ws_url_pattern().is_match(url) {
        errors.push(format!("{name} = {url:?} is not a ws:// or wss:// url"));
    }
}
