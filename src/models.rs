use serde::{Deserialize, Serialize};

/// Maximum message body length, counted in unicode code points.
pub const MAX_MESSAGE_CHARS: usize = 280;

/// Strip every HTML tag and attribute from user-supplied text.
/// The stored and broadcast body is plain text only.
pub fn sanitize_text(input: &str) -> String {
    ammonia::Builder::empty()
        .clean(input)
        .to_string()
}

/// Canonical wire shape of a board message.
///
/// This is the only shape accepted and produced; the phone number is never
/// part of it (it is stored separately and revealed on demand).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub browser_id: String,
    pub message: String,
    pub message_type: MessageType,
    pub timestamp: u64,
    pub location: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Offered,
    Requested,
}

impl ChatMessage {
    /// Build a new message from already-sanitized input.
    pub fn new(
        browser_id: String,
        message: String,
        message_type: MessageType,
        location: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            browser_id,
            message,
            message_type,
            timestamp: unix_now(),
            location,
        }
    }
}

/// Storage form of a message. Carries the poster's IP so that reports can be
/// attributed to the origin address; the extra field never reaches clients
/// because feeds and broadcasts serialize the inner [`ChatMessage`] only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub origin_ip: String,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub browser_id: String,
    pub message: String,
    pub message_type: MessageType,
    pub phone: Option<String>,
    /// Honeypot field, invisible in the real form. Must stay empty.
    #[serde(default)]
    pub website: Option<String>,
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportMessageRequest {
    pub message_id: String,
    pub reported_browser_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub success: bool,
    pub message: String,
    pub reports_on_ip: usize,
}

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn unix_now_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_all_tags() {
        assert_eq!(
            sanitize_text("<script>alert(1)</script>hello"),
            "hello"
        );
        assert_eq!(sanitize_text("<b>room</b> available"), "room available");
        assert_eq!(sanitize_text("plain text"), "plain text");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_text("<i>2BHK</i> near <a href=\"x\">metro</a>");
        assert_eq!(sanitize_text(&once), once);
    }

    #[test]
    fn message_type_wire_names_are_lowercase() {
        assert_eq!(
            serde_json::to_string(&MessageType::Offered).unwrap(),
            "\"offered\""
        );
        assert_eq!(
            serde_json::from_str::<MessageType>("\"requested\"").unwrap(),
            MessageType::Requested
        );
    }

    #[test]
    fn stored_message_round_trips_with_origin_ip() {
        let stored = StoredMessage {
            message: ChatMessage::new(
                "d1".into(),
                "1BHK available".into(),
                MessageType::Offered,
                "Bangalore".into(),
            ),
            origin_ip: "1.2.3.4".into(),
        };
        let json = serde_json::to_string(&stored).unwrap();
        let back: StoredMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.origin_ip, "1.2.3.4");
        assert_eq!(back.message.location, "Bangalore");

        // The wire shape of the inner message never includes the IP
        let wire = serde_json::to_value(&stored.message).unwrap();
        assert!(wire.get("origin_ip").is_none());
        assert!(wire.get("phone").is_none());
    }
}
