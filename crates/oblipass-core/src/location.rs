use std::sync::Arc;

use async_trait::async_trait;

use crate::record::{RecordFields, RecordStore, StoreError};

/// A user's location set freezes once it holds this many distinct entries.
pub const LOCATION_THRESHOLD: usize = 5;

/// Resolved geographic descriptor for a source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationDescriptor {
    pub country: Option<String>,
    pub subdivisions: Vec<String>,
    pub city: Option<String>,
    pub display_text: String,
}

impl LocationDescriptor {
    /// The defined descriptor for an address the resolver cannot place.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            country: None,
            subdivisions: Vec::new(),
            city: None,
            display_text: "Unknown Location".to_string(),
        }
    }

    /// Composes the display text from resolved parts: the country code (or
    /// "Unknown Country"), each subdivision prepended in order, then the
    /// city, e.g. `"Springfield, MA, US"`.
    #[must_use]
    pub fn compose(
        country: Option<String>,
        subdivisions: Vec<String>,
        city: Option<String>,
    ) -> Self {
        let mut text = country
            .clone()
            .unwrap_or_else(|| "Unknown Country".to_string());
        for subdivision in &subdivisions {
            text = format!("{subdivision}, {text}");
        }
        if let Some(city) = &city {
            text = format!("{city}, {text}");
        }
        Self {
            country,
            subdivisions,
            city,
            display_text: text,
        }
    }
}

/// Maps a source address to a location descriptor. Unresolvable addresses
/// yield the unknown descriptor, never an error. The GeoIP database behind
/// an implementation is an external collaborator.
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, address: &str) -> LocationDescriptor;
}

/// Event raised when a user's full location set sees an unseen location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFromNewLocation {
    pub user_hash: String,
    pub at_ms: u64,
    pub address: String,
    pub location_text: String,
}

/// Outbound notification channel (email in production). Fire-and-forget:
/// implementations log their own failures and never surface them to the
/// protocol caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: LoginFromNewLocation);
}

/// One login observation, as seen by the sentinel.
#[derive(Debug, Clone)]
pub struct LoginObservation {
    pub at_ms: u64,
    pub address: String,
    pub location: LocationDescriptor,
}

/// Tracks per-user login locations and raises an anomaly notification once a
/// full history sees an unseen location. Runs off the protocol critical
/// path; every failure is logged and swallowed.
pub struct LocationSentinel {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
}

impl LocationSentinel {
    pub fn new(store: Arc<dyn RecordStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn check(&self, user_hash: &str, observation: LoginObservation) {
        let location_text = observation.location.display_text.clone();

        let record = match self.store.get(user_hash).await {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                tracing::debug!(user_hash, "no record yet; skipping location tracking");
                return;
            }
            Err(err) => {
                tracing::warn!(user_hash, error = %err, "location check could not read record");
                return;
            }
        };

        if record.locations.iter().any(|known| *known == location_text) {
            return;
        }

        if record.locations.len() < LOCATION_THRESHOLD {
            let mut locations = record.locations;
            locations.push(location_text);
            let fields = RecordFields {
                locations: Some(locations),
                ..RecordFields::default()
            };
            if let Err(err) = self.store.update(user_hash, fields).await {
                tracing::warn!(user_hash, error = %err, "failed to persist new location");
            }
            return;
        }

        // Full history and an unseen location: notify, leave the set frozen.
        tracing::info!(user_hash, location = %location_text, "login from unrecognized location");
        self.notifier
            .notify(LoginFromNewLocation {
                user_hash: user_hash.to_string(),
                at_ms: observation.at_ms,
                address: observation.address,
                location_text,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{
        LocationDescriptor, LocationSentinel, LoginFromNewLocation, LoginObservation, Notifier,
        LOCATION_THRESHOLD,
    };
    use crate::record::{MemoryRecordStore, RecordStore, UserRecord};

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<LoginFromNewLocation>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: LoginFromNewLocation) {
            self.events.lock().push(event);
        }
    }

    fn observation(text: &str) -> LoginObservation {
        LoginObservation {
            at_ms: 1_000,
            address: "10.0.0.1".to_string(),
            location: LocationDescriptor::compose(Some(text.to_string()), Vec::new(), None),
        }
    }

    async fn sentinel_with_user() -> (LocationSentinel, Arc<MemoryRecordStore>, Arc<RecordingNotifier>)
    {
        let store = Arc::new(MemoryRecordStore::new());
        store
            .create(UserRecord {
                user_hash: "user42".to_string(),
                ..UserRecord::default()
            })
            .await
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let sentinel = LocationSentinel::new(store.clone(), notifier.clone());
        (sentinel, store, notifier)
    }

    #[tokio::test]
    async fn first_five_distinct_locations_are_retained_in_order() {
        let (sentinel, store, notifier) = sentinel_with_user().await;
        for name in ["AA", "BB", "CC", "DD", "EE"] {
            sentinel.check("user42", observation(name)).await;
        }
        let record = store.get("user42").await.unwrap();
        assert_eq!(record.locations, ["AA", "BB", "CC", "DD", "EE"]);
        assert!(notifier.events.lock().is_empty());
    }

    #[tokio::test]
    async fn sixth_distinct_location_notifies_and_freezes_the_set() {
        let (sentinel, store, notifier) = sentinel_with_user().await;
        for name in ["AA", "BB", "CC", "DD", "EE"] {
            sentinel.check("user42", observation(name)).await;
        }
        sentinel.check("user42", observation("FF")).await;

        let record = store.get("user42").await.unwrap();
        assert_eq!(record.locations.len(), LOCATION_THRESHOLD);
        assert_eq!(record.locations, ["AA", "BB", "CC", "DD", "EE"]);

        let events = notifier.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].location_text, "FF");
        assert_eq!(events[0].user_hash, "user42");
    }

    #[tokio::test]
    async fn repeated_location_never_notifies_or_duplicates() {
        let (sentinel, store, notifier) = sentinel_with_user().await;
        for name in ["AA", "BB", "AA", "CC", "DD", "EE", "AA"] {
            sentinel.check("user42", observation(name)).await;
        }
        let record = store.get("user42").await.unwrap();
        assert_eq!(record.locations, ["AA", "BB", "CC", "DD", "EE"]);
        assert!(notifier.events.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_record_is_a_no_op() {
        let store = Arc::new(MemoryRecordStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let sentinel = LocationSentinel::new(store.clone(), notifier.clone());
        sentinel.check("ghost", observation("AA")).await;
        assert!(notifier.events.lock().is_empty());
    }

    #[test]
    fn display_text_composition() {
        let full = LocationDescriptor::compose(
            Some("US".to_string()),
            vec!["MA".to_string()],
            Some("Springfield".to_string()),
        );
        assert_eq!(full.display_text, "Springfield, MA, US");

        let nested = LocationDescriptor::compose(
            Some("US".to_string()),
            vec!["S1".to_string(), "S2".to_string()],
            None,
        );
        assert_eq!(nested.display_text, "S2, S1, US");

        let no_country = LocationDescriptor::compose(None, Vec::new(), Some("Lima".to_string()));
        assert_eq!(no_country.display_text, "Lima, Unknown Country");

        assert_eq!(LocationDescriptor::unknown().display_text, "Unknown Location");
    }
}
