use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use oblipass_core::vote::{TrustedResponse, VoteTally};
use oblipass_protocol::accepts_vote;

/// Which half of the roster receives the next fan-out. Alternation spreads
/// load and limits any one subset's influence across consecutive requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolParity {
    Even,
    Odd,
}

impl PoolParity {
    fn matches(self, member_index: usize) -> bool {
        match self {
            PoolParity::Even => member_index % 2 == 0,
            PoolParity::Odd => member_index % 2 == 1,
        }
    }

    fn flipped(self) -> Self {
        match self {
            PoolParity::Even => PoolParity::Odd,
            PoolParity::Odd => PoolParity::Even,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("evaluator connection failed: {0}")]
    Connect(String),

    #[error("evaluator session ended without an acceptable response")]
    NoResponse,
}

/// Opens a session to one evaluator, forwards the payload verbatim, and
/// returns the first frame the vote tally would accept. Banners and noise
/// are skipped on the way.
#[async_trait]
pub trait EvaluatorConnector: Send + Sync {
    async fn forward(&self, endpoint: &str, payload: &str) -> Result<String, TransportError>;
}

/// Fans a client request out to the active evaluator subset and resolves the
/// trusted response by majority vote.
pub struct Aggregator {
    roster: Vec<String>,
    parity: Mutex<PoolParity>,
    connector: Arc<dyn EvaluatorConnector>,
    collect_timeout: Option<Duration>,
}

impl Aggregator {
    pub fn new(
        roster: Vec<String>,
        connector: Arc<dyn EvaluatorConnector>,
        collect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            roster,
            parity: Mutex::new(PoolParity::Even),
            connector,
            collect_timeout,
        }
    }

    /// Selects the active subset for this dispatch and flips the parity for
    /// the next one. Roster indices are 1-based pool member numbers.
    fn take_subset(&self) -> Vec<String> {
        let mut parity = self.parity.lock();
        let current = *parity;
        *parity = current.flipped();
        self.roster
            .iter()
            .enumerate()
            .filter(|(index, _)| current.matches(index + 1))
            .map(|(_, endpoint)| endpoint.clone())
            .collect()
    }

    /// Dispatches the payload and collects votes until every remaining
    /// subset member has answered (an unreachable evaluator is excluded from
    /// the expected count rather than stalling the tally forever). With a
    /// collection timeout configured, expiry resolves from the votes that
    /// arrived. Returns `None` when no vote could be collected.
    pub async fn dispatch(&self, payload: &str) -> Option<TrustedResponse> {
        let subset = self.take_subset();
        if subset.is_empty() {
            tracing::error!("active evaluator subset is empty; dropping request");
            return None;
        }
        tracing::debug!(subset_size = subset.len(), "delegating request to evaluator pool");

        let (tx, mut rx) = mpsc::unbounded_channel();
        for endpoint in &subset {
            let connector = self.connector.clone();
            let endpoint = endpoint.clone();
            let payload = payload.to_string();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = connector.forward(&endpoint, &payload).await;
                let _ = tx.send((endpoint, result));
            });
        }
        drop(tx);

        let mut tally = VoteTally::new();
        let collection = collect(&mut rx, &mut tally, subset.len());
        match self.collect_timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, collection).await.is_err() {
                    tracing::warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        votes = tally.total(),
                        "vote collection timed out; resolving from received votes"
                    );
                }
            }
            None => collection.await,
        }

        let trusted = tally.resolve();
        match &trusted {
            Some(trusted) => {
                tracing::info!(votes = trusted.votes, response = %trusted.response, "trusted response resolved");
            }
            None => {
                tracing::error!("no evaluator votes were collected; dropping request");
            }
        }
        trusted
    }
}

async fn collect(
    rx: &mut mpsc::UnboundedReceiver<(String, Result<String, TransportError>)>,
    tally: &mut VoteTally,
    mut expected: usize,
) {
    while expected > 0 && tally.total() < expected {
        let Some((endpoint, result)) = rx.recv().await else {
            break;
        };
        match result {
            Ok(response) if accepts_vote(&response) => tally.record(&response),
            Ok(response) => {
                tracing::warn!(endpoint = %endpoint, %response, "dropping unacceptable evaluator response");
            }
            Err(err) => {
                tracing::warn!(endpoint = %endpoint, error = %err, "evaluator unreachable; excluding its vote");
                expected = expected.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{Aggregator, EvaluatorConnector, TransportError};

    /// Scripted connector: per-endpoint canned responses with optional
    /// delays, recording which endpoints were contacted.
    #[derive(Default)]
    struct ScriptedConnector {
        responses: HashMap<String, Result<String, String>>,
        delays_ms: HashMap<String, u64>,
        contacted: Mutex<Vec<String>>,
    }

    impl ScriptedConnector {
        fn answer(mut self, endpoint: &str, response: &str) -> Self {
            self.responses
                .insert(endpoint.to_string(), Ok(response.to_string()));
            self
        }

        fn fail(mut self, endpoint: &str) -> Self {
            self.responses
                .insert(endpoint.to_string(), Err("connection refused".to_string()));
            self
        }

        fn delay(mut self, endpoint: &str, ms: u64) -> Self {
            self.delays_ms.insert(endpoint.to_string(), ms);
            self
        }
    }

    #[async_trait]
    impl EvaluatorConnector for ScriptedConnector {
        async fn forward(&self, endpoint: &str, _payload: &str) -> Result<String, TransportError> {
            self.contacted.lock().push(endpoint.to_string());
            if let Some(ms) = self.delays_ms.get(endpoint) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            match self.responses.get(endpoint) {
                Some(Ok(response)) => Ok(response.clone()),
                Some(Err(err)) => Err(TransportError::Connect(err.clone())),
                None => Err(TransportError::NoResponse),
            }
        }
    }

    fn roster(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("e{i}")).collect()
    }

    #[tokio::test]
    async fn majority_of_even_subset_wins() {
        let connector = ScriptedConnector::default()
            .answer("e2", "aa,bb")
            .answer("e4", "aa,bb")
            .answer("e6", "cc,dd");
        let aggregator = Aggregator::new(roster(6), Arc::new(connector), None);

        let trusted = aggregator.dispatch("x,y,user42,aux").await.unwrap();
        assert_eq!(trusted.response, "aa,bb");
        assert_eq!(trusted.votes, 2);
    }

    #[tokio::test]
    async fn parity_alternates_between_dispatches() {
        let connector = Arc::new(
            ScriptedConnector::default()
                .answer("e1", "invalid")
                .answer("e2", "invalid")
                .answer("e3", "invalid")
                .answer("e4", "invalid"),
        );
        let aggregator = Aggregator::new(roster(4), connector.clone(), None);

        let _ = aggregator.dispatch("x,y,u,a").await;
        let _ = aggregator.dispatch("x,y,u,a").await;

        let mut contacted = connector.contacted.lock().clone();
        let second = contacted.split_off(2);
        let mut first = contacted;
        first.sort();
        let mut second = second;
        second.sort();
        assert_eq!(first, ["e2", "e4"]);
        assert_eq!(second, ["e1", "e3"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn all_distinct_votes_resolve_to_first_arrival() {
        let connector = ScriptedConnector::default()
            .answer("e2", "aa,bb")
            .answer("e4", "cc,dd")
            .delay("e4", 100)
            .answer("e6", "ee,ff")
            .delay("e6", 200);
        let aggregator = Aggregator::new(roster(6), Arc::new(connector), None);

        let trusted = aggregator.dispatch("x,y,u,a").await.unwrap();
        assert_eq!(trusted.response, "aa,bb");
        assert_eq!(trusted.votes, 1);
    }

    #[tokio::test]
    async fn unreachable_evaluator_is_excluded_from_the_expected_count() {
        let connector = ScriptedConnector::default()
            .answer("e2", "aa,bb")
            .fail("e4");
        let aggregator = Aggregator::new(roster(4), Arc::new(connector), None);

        let trusted = aggregator.dispatch("x,y,u,a").await.unwrap();
        assert_eq!(trusted.response, "aa,bb");
        assert_eq!(trusted.votes, 1);
    }

    #[tokio::test]
    async fn garbage_responses_are_dropped_from_the_tally() {
        let connector = ScriptedConnector::default()
            .answer("e2", "not,a,vote,at,all")
            .answer("e4", "aa,bb");
        let aggregator = Aggregator::new(roster(4), Arc::new(connector), None);

        let trusted = aggregator.dispatch("x,y,u,a").await.unwrap();
        assert_eq!(trusted.response, "aa,bb");
        assert_eq!(trusted.votes, 1);
    }

    #[tokio::test]
    async fn invalid_votes_can_win() {
        let connector = ScriptedConnector::default()
            .answer("e2", "invalid")
            .answer("e4", "invalid");
        let aggregator = Aggregator::new(roster(4), Arc::new(connector), None);

        let trusted = aggregator.dispatch("x,y,u,a").await.unwrap();
        assert_eq!(trusted.response, "invalid");
        assert_eq!(trusted.votes, 2);
    }

    #[tokio::test]
    async fn all_unreachable_yields_no_response() {
        let connector = ScriptedConnector::default().fail("e2").fail("e4");
        let aggregator = Aggregator::new(roster(4), Arc::new(connector), None);
        assert!(aggregator.dispatch("x,y,u,a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_resolves_from_partial_votes() {
        let connector = ScriptedConnector::default()
            .answer("e2", "aa,bb")
            .answer("e4", "cc,dd")
            .delay("e4", 60_000);
        let aggregator = Aggregator::new(
            roster(4),
            Arc::new(connector),
            Some(Duration::from_millis(500)),
        );

        let trusted = aggregator.dispatch("x,y,u,a").await.unwrap();
        assert_eq!(trusted.response, "aa,bb");
    }
}
