use async_trait::async_trait;

use oblipass_core::location::{LoginFromNewLocation, Notifier};

pub const NOTIFICATION_SUBJECT: &str = "Oblipass Account Login Notification";

/// Renders account-activity notifications into the structured log. Outbound
/// delivery (email) is owned by an external system consuming these events;
/// the daemon itself never talks to a mail server.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    fn activity_line(event: &LoginFromNewLocation) -> String {
        format!(
            "[{}] {} logged in from {}",
            event.at_ms, event.address, event.location_text
        )
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, event: LoginFromNewLocation) {
        tracing::info!(
            user_hash = %event.user_hash,
            subject = NOTIFICATION_SUBJECT,
            activity = %Self::activity_line(&event),
            "login from new location"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::LoggingNotifier;
    use oblipass_core::location::LoginFromNewLocation;

    #[test]
    fn activity_line_carries_time_address_and_location() {
        let event = LoginFromNewLocation {
            user_hash: "user42".to_string(),
            at_ms: 1_700_000_000_000,
            address: "203.0.113.9".to_string(),
            location_text: "Lima, PE".to_string(),
        };
        assert_eq!(
            LoggingNotifier::activity_line(&event),
            "[1700000000000] 203.0.113.9 logged in from Lima, PE"
        );
    }
}
