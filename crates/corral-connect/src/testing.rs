//! In-memory controllers for tests
//!
//! [`FakeController`] keeps models and credentials in memory and lets tests
//! push model summaries, end watch streams and inject failures.
//! [`FakeDialer`] hands out connections to registered fake controllers and
//! counts dials.

use crate::dialer::{DialTarget, Dialer};
use crate::error::ConnectError;
use async_trait::async_trait;
use corral_core_interface::controller::Result as ApiResult;
use corral_core_interface::{
    ApiError, ControllerApi, CreateModelArgs, CredentialPath, CredentialUpdate, EntityPath, Life,
    ModelInfo, ModelSummary, SummaryStream, Version,
};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type SummarySender = mpsc::UnboundedSender<ApiResult<Vec<ModelSummary>>>;

/// A credential as the controller holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldCredential {
    pub auth_type: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Default)]
struct Faults {
    create_model: Option<ApiError>,
    credentials: Option<ApiError>,
}

struct ControllerState {
    version: Mutex<Version>,
    models: Mutex<BTreeMap<String, ModelInfo>>,
    credentials: Mutex<BTreeMap<CredentialPath, HeldCredential>>,
    credential_pushes: Mutex<Vec<CredentialUpdate>>,
    revocations: Mutex<Vec<CredentialPath>>,
    watchers: Mutex<Vec<SummarySender>>,
    faults: Mutex<Faults>,
    connections: AtomicUsize,
    /// Bumped by `drop_connections`; older connections report closed.
    epoch: AtomicU64,
}

/// A controller living in process memory.
#[derive(Clone)]
pub struct FakeController {
    state: Arc<ControllerState>,
}

impl FakeController {
    pub fn new(version: Version) -> Self {
        Self {
            state: Arc::new(ControllerState {
                version: Mutex::new(version),
                models: Mutex::new(BTreeMap::new()),
                credentials: Mutex::new(BTreeMap::new()),
                credential_pushes: Mutex::new(Vec::new()),
                revocations: Mutex::new(Vec::new()),
                watchers: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
                connections: AtomicUsize::new(0),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Opens a new connection to this controller.
    pub fn connect(&self) -> FakeConnection {
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        FakeConnection {
            epoch: self.state.epoch.load(Ordering::SeqCst),
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }
    }

    /// Breaks every connection made so far, as a controller restart would.
    /// Later connections work.
    pub fn drop_connections(&self) {
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_version(&self, version: Version) {
        *lock(&self.state.version) = version;
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        lock(&self.state.models).values().cloned().collect()
    }

    pub fn credential(&self, path: &CredentialPath) -> Option<HeldCredential> {
        lock(&self.state.credentials).get(path).cloned()
    }

    /// Every credential update received, in order.
    pub fn credential_pushes(&self) -> Vec<CredentialUpdate> {
        lock(&self.state.credential_pushes).clone()
    }

    pub fn revocations(&self) -> Vec<CredentialPath> {
        lock(&self.state.revocations).clone()
    }

    /// Makes the next model creation fail with `err`.
    pub fn fail_next_create(&self, err: ApiError) {
        lock(&self.state.faults).create_model = Some(err);
    }

    /// Makes every credential update and revocation fail with `err` until cleared.
    pub fn fail_credentials(&self, err: Option<ApiError>) {
        lock(&self.state.faults).credentials = err;
    }

    /// Sends one summary batch to every open watch stream.
    pub fn push_summaries(&self, batch: Vec<ModelSummary>) -> usize {
        let mut watchers = lock(&self.state.watchers);
        watchers.retain(|w| w.send(Ok(batch.clone())).is_ok());
        watchers.len()
    }

    /// Ends every watch stream cleanly, as a restarting controller would.
    pub fn end_watch_streams(&self) {
        lock(&self.state.watchers).clear();
    }

    /// Terminates every watch stream with `err`.
    pub fn fail_watch_streams(&self, err: ApiError) {
        for w in lock(&self.state.watchers).drain(..) {
            let _ = w.send(Err(err.clone()));
        }
    }

    /// Watch streams whose consumer is still attached.
    pub fn active_watchers(&self) -> usize {
        let mut watchers = lock(&self.state.watchers);
        watchers.retain(|w| !w.is_closed());
        watchers.len()
    }
}

/// One connection to a [`FakeController`].
pub struct FakeConnection {
    state: Arc<ControllerState>,
    closed: AtomicBool,
    epoch: u64,
}

impl FakeConnection {
    fn check_open(&self) -> ApiResult<()> {
        if self.closed.load(Ordering::SeqCst)
            || self.epoch != self.state.epoch.load(Ordering::SeqCst)
        {
            return Err(ApiError::ConnectionClosed);
        }
        Ok(())
    }

    fn credential_fault(&self) -> ApiResult<()> {
        match &lock(&self.state.faults).credentials {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ControllerApi for FakeConnection {
    async fn ping(&self) -> ApiResult<()> {
        self.check_open()
    }

    async fn close(&self) -> ApiResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.connections.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn server_version(&self) -> ApiResult<Version> {
        self.check_open()?;
        Ok(*lock(&self.state.version))
    }

    async fn create_model(&self, args: &CreateModelArgs) -> ApiResult<ModelInfo> {
        self.check_open()?;
        if let Some(err) = lock(&self.state.faults).create_model.take() {
            return Err(err);
        }
        let mut models = lock(&self.state.models);
        if models
            .values()
            .any(|m| m.owner == args.owner && m.name == args.name)
        {
            return Err(ApiError::remote(
                "already exists",
                format!("model {}/{} already exists", args.owner, args.name),
            ));
        }
        let info = ModelInfo {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: args.name.clone(),
            owner: args.owner.clone(),
            cloud: args.cloud.clone(),
            region: args.region.clone(),
            credential: args.credential.clone(),
            life: Life::Alive,
        };
        models.insert(info.uuid.clone(), info.clone());
        Ok(info)
    }

    async fn destroy_model(&self, uuid: &str) -> ApiResult<()> {
        self.check_open()?;
        lock(&self.state.models)
            .remove(uuid)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(format!("model {uuid}")))
    }

    async fn update_credential(&self, update: &CredentialUpdate) -> ApiResult<()> {
        self.check_open()?;
        self.credential_fault()?;

        let mut credentials = lock(&self.state.credentials);
        let previous = credentials.get(&update.path).cloned();
        let mut attributes = update.attributes.clone();
        for key in &update.unchanged {
            match previous.as_ref().and_then(|p| p.attributes.get(key)) {
                Some(value) => {
                    attributes.insert(key.clone(), value.clone());
                }
                None => {
                    return Err(ApiError::remote(
                        "bad request",
                        format!("attribute {key:?} marked unchanged but not held"),
                    ))
                }
            }
        }
        credentials.insert(
            update.path.clone(),
            HeldCredential {
                auth_type: update.auth_type.clone(),
                attributes,
            },
        );
        lock(&self.state.credential_pushes).push(update.clone());
        Ok(())
    }

    async fn revoke_credential(&self, path: &CredentialPath) -> ApiResult<()> {
        self.check_open()?;
        self.credential_fault()?;
        lock(&self.state.credentials).remove(path);
        lock(&self.state.revocations).push(path.clone());
        Ok(())
    }

    async fn watch_all_model_summaries(&self) -> ApiResult<SummaryStream> {
        self.check_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state.watchers).push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[derive(Default)]
struct DialerState {
    controllers: Mutex<HashMap<String, FakeController>>,
    unreachable: Mutex<HashSet<String>>,
    dials: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
}

/// Dials registered [`FakeController`]s by controller path.
#[derive(Clone, Default)]
pub struct FakeDialer {
    state: Arc<DialerState>,
}

impl FakeDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: &EntityPath, controller: FakeController) {
        lock(&self.state.controllers).insert(path.to_string(), controller);
    }

    pub fn set_unreachable(&self, path: &EntityPath, unreachable: bool) {
        let mut set = lock(&self.state.unreachable);
        if unreachable {
            set.insert(path.to_string());
        } else {
            set.remove(&path.to_string());
        }
    }

    /// Delays every dial, widening the window for concurrent opens.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.state.delay) = delay;
    }

    pub fn dial_count(&self, path: &EntityPath) -> usize {
        lock(&self.state.dials)
            .get(&path.to_string())
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, target: &DialTarget) -> Result<Arc<dyn ControllerApi>, ConnectError> {
        let key = target.controller.to_string();
        *lock(&self.state.dials).entry(key.clone()).or_default() += 1;

        let delay = *lock(&self.state.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.state.unreachable).contains(&key) {
            return Err(ConnectError::dial_failed(key, "connection refused"));
        }
        let controller = lock(&self.state.controllers)
            .get(&key)
            .cloned()
            .ok_or_else(|| ConnectError::dial_failed(key.clone(), "no such host"))?;
        Ok(Arc::new(controller.connect()))
    }
}
