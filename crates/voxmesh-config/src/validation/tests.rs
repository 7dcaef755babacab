//! Tests for the full validation pipeline.

use super::*;
use crate::schema::*;

#[test]
fn default_config_validates() {
    assert!(validate(&MeshConfig::default()).is_ok());
}

#[test]
fn catches_missing_stun_server() {
    let mut config = MeshConfig::default();
    config.ice.servers.clear();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("stun"));
}

#[test]
fn catches_malformed_ice_url() {
    let mut config = MeshConfig::default();
    config
        .ice
        .servers
        .push(IceServerConfig::stun("http://stun.example.org"));
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("ice.servers[1]"));
}

#[test]
fn turn_server_requires_credentials() {
    let mut config = MeshConfig::default();
    config.ice.servers.push(IceServerConfig {
        urls: vec!["turn:turn.example.org:3478".into()],
        username: None,
        credential: None,
    });
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("TURN"));
}

#[test]
fn turn_server_with_credentials_passes() {
    let mut config = MeshConfig::default();
    config.ice.servers.push(IceServerConfig {
        urls: vec!["turn:turn.example.org:3478?transport=tcp".into()],
        username: Some("user".into()),
        credential: Some("secret".into()),
    });
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_connect_timeout_out_of_range() {
    let mut config = MeshConfig::default();
    config.negotiation.connect_timeout_ms = 10;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("negotiation.connect_timeout_ms"));
}

#[test]
fn catches_gathering_timeout_out_of_range() {
    let mut config = MeshConfig::default();
    config.negotiation.gathering_timeout_ms = 60_000;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("negotiation.gathering_timeout_ms"));
}

#[test]
fn catches_media_with_no_tracks() {
    let mut config = MeshConfig::default();
    config.media.audio = false;
    config.media.video = false;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("media"));
}

#[test]
fn catches_empty_in_band_prefix() {
    let mut config = MeshConfig::default();
    config.transport.in_band.prefix = "  ".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("transport.in_band.prefix"));
}

#[test]
fn relay_url_checked_only_when_selected() {
    let mut config = MeshConfig::default();
    config.transport.relay.url = "not a url".into();
    assert!(validate(&config).is_ok());

    config.transport.strategy = TransportStrategy::Relay;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("transport.relay.url"));
}

#[test]
fn broker_url_must_be_websocket() {
    let mut config = MeshConfig::default();
    config.transport.strategy = TransportStrategy::Broker;
    config.transport.broker.url = "http://127.0.0.1:8787".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("transport.broker.url"));
}

#[test]
fn catches_reconnect_delay_above_max() {
    let mut config = MeshConfig::default();
    config.transport.relay.reconnect_delay_secs = 60;
    config.transport.relay.max_reconnect_delay_secs = 30;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("reconnect_delay_secs"));
}

#[test]
fn catches_unknown_log_level() {
    let mut config = MeshConfig::default();
    config.logging.level = "verbose".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("logging.level"));
}

#[test]
fn collects_multiple_errors() {
    let mut config = MeshConfig::default();
    config.negotiation.connect_timeout_ms = 0;
    config.events.bus_capacity = 1;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("negotiation.connect_timeout_ms"));
    assert!(err.contains("events.bus_capacity"));
}
