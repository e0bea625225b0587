//! Wire types for the WhatsApp Web sidecar.

use serde::{Deserialize, Serialize};

/// Requests sent from the gateway to the sidecar. Every request carries a
/// `requestId` answered by exactly one [`SidecarMessage::Result`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Connect {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "authDir")]
        auth_dir: String,
        #[serde(rename = "keysDir", skip_serializing_if = "Option::is_none")]
        keys_dir: Option<String>,
    },
    Disconnect {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Logout {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    PairPhone {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "phoneNumber")]
        phone_number: String,
        #[serde(rename = "clientName")]
        client_name: String,
    },
}

impl GatewayMessage {
    pub fn request_id(&self) -> &str {
        match self {
            Self::Connect { request_id, .. }
            | Self::Disconnect { request_id, .. }
            | Self::Logout { request_id, .. }
            | Self::PairPhone { request_id, .. } => request_id,
        }
    }
}

/// Messages received from the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Result {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        /// Pairing code for a successful `pair_phone`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Qr {
        #[serde(rename = "accountId")]
        account_id: String,
        qr: String,
        #[serde(rename = "timeoutSecs", default = "default_qr_timeout_secs")]
        timeout_secs: u64,
    },
    PairSuccess {
        #[serde(rename = "accountId")]
        account_id: String,
        jid: String,
    },
    Connected {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        jid: Option<String>,
    },
    Disconnected {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(default)]
        reason: String,
    },
    LoggedOut {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    Error {
        #[serde(rename = "accountId", default, skip_serializing_if = "Option::is_none")]
        account_id: Option<String>,
        error: String,
    },
}

fn default_qr_timeout_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_wire_format() {
        let msg = GatewayMessage::Connect {
            account_id: "acct1".into(),
            request_id: "r1".into(),
            auth_dir: "/data/storages/whatsapp_acct1".into(),
            keys_dir: None,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "connect");
        assert_eq!(json["accountId"], "acct1");
        assert_eq!(json["requestId"], "r1");
        assert!(json.get("keysDir").is_none());
        assert_eq!(msg.request_id(), "r1");
    }

    #[test]
    fn pair_phone_wire_format() {
        let msg = GatewayMessage::PairPhone {
            account_id: "acct1".into(),
            request_id: "r2".into(),
            phone_number: "628123456789".into(),
            client_name: "Chrome (Linux)".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"pair_phone""#));
        assert!(json.contains(r#""phoneNumber":"628123456789""#));
    }

    #[test]
    fn parse_result_with_code() {
        let msg: SidecarMessage = serde_json::from_str(
            r#"{"type":"result","requestId":"r2","success":true,"code":"ABCD-EFGH"}"#,
        )
        .unwrap();
        assert_eq!(msg, SidecarMessage::Result {
            request_id: "r2".into(),
            success: true,
            code: Some("ABCD-EFGH".into()),
            error: None,
        });
    }

    #[test]
    fn parse_qr_default_timeout() {
        let msg: SidecarMessage =
            serde_json::from_str(r#"{"type":"qr","accountId":"a","qr":"2@xyz"}"#).unwrap();
        assert!(matches!(msg, SidecarMessage::Qr { timeout_secs: 60, .. }));
    }

    #[test]
    fn parse_error_without_account() {
        let msg: SidecarMessage =
            serde_json::from_str(r#"{"type":"error","error":"boom"}"#).unwrap();
        assert_eq!(msg, SidecarMessage::Error {
            account_id: None,
            error: "boom".into(),
        });
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<SidecarMessage>(r#"{"type":"nope"}"#).is_err());
    }
}
