use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};

use oblipass_core::derive::{HmacSecretDeriver, SecretDeriver, StreamCipherSecretDeriver};
use oblipass_core::error::CoreError;
use oblipass_core::evaluator::Evaluator;
use oblipass_core::location::{GeoResolver, LocationSentinel, LoginObservation};
use oblipass_core::rate::{AdmissionVerdict, Clock, RateGuard, RateGuardConfig, SystemClock};
use oblipass_core::record::{RecordFields, RecordStore, StoreError, UserRecord};
use oblipass_protocol::pb::oblipass_client::OblipassClient;
use oblipass_protocol::pb::SessionFrame;
use oblipass_protocol::{accepts_vote, connection_banner, EvaluationRequest, INVALID_RESPONSE};

use crate::aggregator::{Aggregator, EvaluatorConnector, TransportError};
use crate::config::{Args, ConfigError, DerivationStrategy, Role};
use crate::geo::UnknownGeoResolver;
use crate::notify::LoggingNotifier;
use crate::store::FileRecordStore;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("record store probe failed: {0}")]
    StoreProbe(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// What one inbound payload produced: frames to emit and whether the session
/// must be terminated (throttle rejection or a departed client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadOutcome {
    pub responses: Vec<String>,
    pub terminate: bool,
}

impl PayloadOutcome {
    fn ignored() -> Self {
        Self {
            responses: Vec::new(),
            terminate: false,
        }
    }

    fn terminated() -> Self {
        Self {
            responses: Vec::new(),
            terminate: true,
        }
    }

    fn reply(response: String) -> Self {
        Self {
            responses: vec![response],
            terminate: false,
        }
    }
}

enum RolePipeline {
    Master(MasterPipeline),
    Evaluator(Evaluator),
}

/// Master-role request handling: location tracking, fan-out, vote
/// resolution, and post-hoc identity binding.
pub struct MasterPipeline {
    aggregator: Aggregator,
    sentinel: Arc<LocationSentinel>,
    geo: Arc<dyn GeoResolver>,
    store: Arc<dyn RecordStore>,
    binds_email: bool,
}

impl MasterPipeline {
    pub fn new(
        aggregator: Aggregator,
        sentinel: Arc<LocationSentinel>,
        geo: Arc<dyn GeoResolver>,
        store: Arc<dyn RecordStore>,
        binds_email: bool,
    ) -> Self {
        Self {
            aggregator,
            sentinel,
            geo,
            store,
            binds_email,
        }
    }

    async fn handle(
        &self,
        peer: &str,
        payload: &str,
        request: &EvaluationRequest,
        now_ms: u64,
    ) -> Option<String> {
        // Location anomaly tracking never blocks the protocol path.
        let sentinel = self.sentinel.clone();
        let user_hash = request.user_hash.clone();
        let observation = LoginObservation {
            at_ms: now_ms,
            address: peer.to_string(),
            location: self.geo.resolve(peer),
        };
        tokio::spawn(async move {
            sentinel.check(&user_hash, observation).await;
        });

        let trusted = self.aggregator.dispatch(payload).await?;

        if self.binds_email && trusted.response != INVALID_RESPONSE && !request.aux.is_empty() {
            self.bind_email(&request.user_hash, &request.aux).await;
        }
        Some(trusted.response)
    }

    /// First-write-wins: the first successful run carrying an email claims
    /// it; later claims are ignored.
    async fn bind_email(&self, user_hash: &str, email: &str) {
        match self.store.get(user_hash).await {
            Ok(record) if record.email.is_some() => {}
            Ok(_) => {
                let fields = RecordFields {
                    email: Some(email.to_string()),
                    ..RecordFields::default()
                };
                if let Err(err) = self.store.update(user_hash, fields).await {
                    tracing::warn!(user_hash, error = %err, "email binding failed");
                }
            }
            Err(StoreError::NotFound) => {
                let record = UserRecord {
                    user_hash: user_hash.to_string(),
                    email: Some(email.to_string()),
                    ..UserRecord::default()
                };
                match self.store.create(record).await {
                    Ok(()) | Err(StoreError::Conflict) => {}
                    Err(err) => {
                        tracing::warn!(user_hash, error = %err, "email binding failed");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(user_hash, error = %err, "email binding skipped");
            }
        }
    }
}

struct ServiceInner {
    pipeline: RolePipeline,
    rate_guard: Mutex<RateGuard>,
    clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct OblipassService {
    inner: Arc<ServiceInner>,
}

impl OblipassService {
    /// Production wiring from process arguments. Opening the record store is
    /// the startup liveness probe: failure aborts before any traffic is
    /// accepted.
    pub fn build(args: &Args) -> Result<Self, BuildError> {
        let data_dir = std::path::Path::new(&args.data_dir);
        let store: Arc<dyn RecordStore> = Arc::new(FileRecordStore::open(data_dir)?);
        let master_key = crate::config::load_or_create_master_key(data_dir)?;

        let deriver: Arc<dyn SecretDeriver> = match args.strategy {
            DerivationStrategy::Hmac => Arc::new(HmacSecretDeriver::new(&master_key)?),
            DerivationStrategy::Stream => Arc::new(StreamCipherSecretDeriver::new(master_key)),
        };
        tracing::info!(strategy = deriver.strategy(), "secret derivation configured");

        let rate_guard = RateGuard::new(RateGuardConfig::from_env());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let pipeline = match args.role {
            Role::Evaluator => RolePipeline::Evaluator(Evaluator::new(store, deriver)),
            Role::Master => {
                let roster = args.roster()?;
                let collect_timeout = (args.collect_timeout_ms > 0)
                    .then(|| Duration::from_millis(args.collect_timeout_ms));
                let aggregator = Aggregator::new(
                    roster,
                    Arc::new(GrpcEvaluatorConnector),
                    collect_timeout,
                );
                let sentinel = Arc::new(LocationSentinel::new(
                    store.clone(),
                    Arc::new(LoggingNotifier),
                ));
                let geo: Arc<dyn GeoResolver> = Arc::new(UnknownGeoResolver);
                let binds_email = args.strategy == DerivationStrategy::Hmac;
                RolePipeline::Master(MasterPipeline::new(
                    aggregator, sentinel, geo, store, binds_email,
                ))
            }
        };

        Ok(Self::with_pipeline(pipeline, rate_guard, clock))
    }

    /// An evaluator-role service over explicit parts (used by tests).
    pub fn new_evaluator(
        evaluator: Evaluator,
        rate: RateGuardConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_pipeline(RolePipeline::Evaluator(evaluator), RateGuard::new(rate), clock)
    }

    /// A master-role service over explicit parts (used by tests).
    pub fn new_master(master: MasterPipeline, rate: RateGuardConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_pipeline(RolePipeline::Master(master), RateGuard::new(rate), clock)
    }

    fn with_pipeline(pipeline: RolePipeline, rate_guard: RateGuard, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                pipeline,
                rate_guard: Mutex::new(rate_guard),
                clock,
            }),
        }
    }

    /// Processes one inbound payload as if received on a session from
    /// `peer`. The streaming handler and tests share this path.
    pub async fn process_payload(&self, peer: &str, payload: &str) -> PayloadOutcome {
        self.inner.process_payload(peer, payload).await
    }
}

impl ServiceInner {
    async fn process_payload(&self, peer: &str, payload: &str) -> PayloadOutcome {
        let Some(request) = EvaluationRequest::parse(payload) else {
            // Not a protocol request; ignored.
            return PayloadOutcome::ignored();
        };

        let now_ms = self.clock.now_ms();
        let verdict = self.rate_guard.lock().admit(peer, now_ms);
        if let AdmissionVerdict::Throttled { elapsed_ms } = verdict {
            tracing::warn!(peer, elapsed_ms, "address exceeded connection threshold; closing session");
            return PayloadOutcome::terminated();
        }

        match &self.pipeline {
            RolePipeline::Evaluator(evaluator) => {
                PayloadOutcome::reply(evaluator.respond(&request).await)
            }
            RolePipeline::Master(master) => {
                match master.handle(peer, payload, &request, now_ms).await {
                    Some(response) => PayloadOutcome::reply(response),
                    None => PayloadOutcome::ignored(),
                }
            }
        }
    }
}

#[tonic::async_trait]
impl oblipass_protocol::pb::oblipass_server::Oblipass for OblipassService {
    type SessionStream = Pin<Box<dyn Stream<Item = Result<SessionFrame, Status>> + Send>>;

    async fn session(
        &self,
        request: Request<Streaming<SessionFrame>>,
    ) -> Result<Response<Self::SessionStream>, Status> {
        let peer = request
            .remote_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel::<Result<SessionFrame, Status>>(16);

        tracing::debug!(peer, "session established");
        if tx
            .send(Ok(SessionFrame {
                payload: connection_banner(),
            }))
            .await
            .is_err()
        {
            return Err(Status::unavailable("session closed before banner"));
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                let frame = match inbound.message().await {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(status) => {
                        tracing::debug!(peer, error = %status, "inbound stream error");
                        break;
                    }
                };

                let outcome = inner.process_payload(&peer, &frame.payload).await;
                for response in outcome.responses {
                    if tx.send(Ok(SessionFrame { payload: response })).await.is_err() {
                        return;
                    }
                }
                if outcome.terminate {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

/// Production connector: opens a gRPC session to the evaluator, forwards the
/// payload verbatim, and waits for the first frame the tally would accept.
pub struct GrpcEvaluatorConnector;

#[async_trait]
impl EvaluatorConnector for GrpcEvaluatorConnector {
    async fn forward(&self, endpoint: &str, payload: &str) -> Result<String, TransportError> {
        let mut client = OblipassClient::connect(endpoint.to_string())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let outbound = tokio_stream::once(SessionFrame {
            payload: payload.to_string(),
        });
        let mut inbound = client
            .session(outbound)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?
            .into_inner();

        loop {
            match inbound.message().await {
                Ok(Some(frame)) if accepts_vote(&frame.payload) => return Ok(frame.payload),
                // Banner or noise; keep waiting for the vote.
                Ok(Some(_)) => continue,
                Ok(None) => return Err(TransportError::NoResponse),
                Err(status) => return Err(TransportError::Connect(status.to_string())),
            }
        }
    }
}
