/// Default TOML config content with comments.
pub(super) fn default_config_toml() -> &'static str {
    r##"# voxmesh configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[[ice.servers]]
urls = ["stun:stun.l.google.com:19302"]
# A TURN relay is needed for peers behind symmetric NATs:
# [[ice.servers]]
# urls = ["turn:turn.example.org:3478"]
# username = "user"
# credential = "secret"

[negotiation]
# candidate_mode = "trickle"     # trickle | batched
# gathering_timeout_ms = 2000    # 100-30000
# connect_timeout_ms = 15000     # 1000-120000

[media]
# audio = true
# video = false
# input_device = "default"

[transport]
# strategy = "in_band"           # in_band | relay | broker

[transport.in_band]
# prefix = "[voxmesh]"
# dedup_window = 256             # 16-4096

[transport.relay]
# url = "wss://realtime.voxmesh.dev/socket/websocket"
# api_key = ""
# heartbeat_interval_secs = 25   # 5-120
# reconnect_delay_secs = 1
# max_reconnect_delay_secs = 30
# connect_timeout_secs = 15

[transport.broker]
# url = "ws://127.0.0.1:8787"
# connect_timeout_secs = 10

[events]
# bus_capacity = 256             # 16-8192

[logging]
# level = "info"
"##
}
