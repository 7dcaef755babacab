//! Wire protocol between peer-id broker clients and the broker server.
//!
//! The broker never inspects `data`; it only routes it by connection id.

use serde::{Deserialize, Serialize};

/// Frames a client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame on a connection.
    Hello { room: String, user_id: String },
    /// `to: None` fans out to every other member of the room.
    Route { to: Option<String>, data: String },
}

/// Frames the broker sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Registered {
        connection_id: String,
        room: String,
    },
    /// `from` is the sender's connection id, `user_id` the id it
    /// registered with.
    Deliver {
        from: String,
        user_id: String,
        data: String,
    },
    PeerLeft {
        connection_id: String,
        user_id: String,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_wire_shape() {
        let json = serde_json::to_string(&ClientFrame::Hello {
            room: "lobby".into(),
            user_id: "alice".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"hello","room":"lobby","user_id":"alice"}"#);
    }

    #[test]
    fn broadcast_route_has_null_target() {
        let json = serde_json::to_string(&ClientFrame::Route {
            to: None,
            data: "x".into(),
        })
        .unwrap();
        assert!(json.contains(r#""to":null"#));
    }

    #[test]
    fn server_frames_parse() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"peer_left","connection_id":"c1","user_id":"bob"}"#)
                .unwrap();
        assert_eq!(
            frame,
            ServerFrame::PeerLeft {
                connection_id: "c1".into(),
                user_id: "bob".into()
            }
        );

        let frame: ServerFrame = serde_json::from_str(
            r#"{"type":"deliver","from":"c2","user_id":"alice","data":"{}"}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ServerFrame::Deliver {
                from: "c2".into(),
                user_id: "alice".into(),
                data: "{}".into()
            }
        );
    }
}
