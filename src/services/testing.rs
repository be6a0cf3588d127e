//! In-memory backends for tests.
//!
//! Both fakes keep a journal of calls so tests can assert ordering, and take
//! a set of operations to fail on. Handing both the same [`Journal`] records
//! calls across the two backends in the order they happened.

use super::compute::{ComputeBackend, ComputeError, ComputeResult, UpstreamResponse};
use super::storage::{StorageBackend, StorageError, StorageResult};
use crate::models::{credentials::AccessKeyPair, machine::SecretInfo};
use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Call log that can be shared between fakes.
#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.0.lock().unwrap().push(call.to_string());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StorageOp {
    CreateBucket,
    DeleteBucket,
    CreateAccessKey,
    DeleteAccessKey,
    CreatePolicy,
    DeletePolicy,
    AttachPolicy,
    Ping,
}

#[derive(Debug, Default)]
pub struct StorageState {
    pub buckets: BTreeSet<String>,
    /// access key id -> user
    pub access_keys: BTreeMap<String, String>,
    /// policy arn -> document
    pub policies: BTreeMap<String, String>,
    /// (user, policy arn)
    pub attachments: BTreeSet<(String, String)>,
    pub calls: Vec<String>,
    next_id: usize,
}

#[derive(Debug, Default)]
pub struct FakeStorage {
    state: Mutex<StorageState>,
    fail: BTreeSet<StorageOp>,
    journal: Journal,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(ops: &[StorageOp]) -> Self {
        Self {
            fail: ops.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.state().buckets.insert(bucket.to_string());
        self
    }

    pub fn state(&self) -> MutexGuard<'_, StorageState> {
        self.state.lock().unwrap()
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.state().buckets.contains(bucket)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn record(&self, op: StorageOp, call: String) -> StorageResult<MutexGuard<'_, StorageState>> {
        let mut state = self.state();
        self.journal.record(&call);
        state.calls.push(call.clone());
        if self.fail.contains(&op) {
            return Err(StorageError::Unavailable(format!("injected failure: {}", call)));
        }
        Ok(state)
    }
}

#[async_trait]
impl StorageBackend for FakeStorage {
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut state = self.record(StorageOp::CreateBucket, format!("create_bucket {bucket}"))?;
        if !state.buckets.insert(bucket.to_string()) {
            return Err(StorageError::CreateBucket {
                bucket: bucket.to_string(),
                message: "BucketAlreadyExists".into(),
            });
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut state = self.record(StorageOp::DeleteBucket, format!("delete_bucket {bucket}"))?;
        if !state.buckets.remove(bucket) {
            return Err(StorageError::DeleteBucket {
                bucket: bucket.to_string(),
                message: "NoSuchBucket".into(),
            });
        }
        Ok(())
    }

    async fn create_access_key(&self, user: &str) -> StorageResult<AccessKeyPair> {
        let mut state =
            self.record(StorageOp::CreateAccessKey, format!("create_access_key {user}"))?;
        state.next_id += 1;
        let id = format!("tid_{}", state.next_id);
        state.access_keys.insert(id.clone(), user.to_string());
        Ok(AccessKeyPair {
            access_key_id: id,
            secret_access_key: format!("tsec_{}", state.next_id),
        })
    }

    async fn delete_access_key(&self, user: &str, access_key_id: &str) -> StorageResult<()> {
        let mut state = self.record(
            StorageOp::DeleteAccessKey,
            format!("delete_access_key {user} {access_key_id}"),
        )?;
        state.access_keys.remove(access_key_id);
        Ok(())
    }

    async fn create_policy(&self, name: &str, document: &str) -> StorageResult<String> {
        let mut state = self.record(StorageOp::CreatePolicy, format!("create_policy {name}"))?;
        let arn = format!("arn:aws:iam::000000000000:policy/{name}");
        state.policies.insert(arn.clone(), document.to_string());
        Ok(arn)
    }

    async fn delete_policy(&self, arn: &str) -> StorageResult<()> {
        let mut state = self.record(StorageOp::DeletePolicy, format!("delete_policy {arn}"))?;
        state.policies.remove(arn);
        Ok(())
    }

    async fn attach_user_policy(&self, user: &str, arn: &str) -> StorageResult<()> {
        let mut state =
            self.record(StorageOp::AttachPolicy, format!("attach_user_policy {user} {arn}"))?;
        state.attachments.insert((user.to_string(), arn.to_string()));
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        let _state = self.record(StorageOp::Ping, "ping".into())?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComputeOp {
    CreateApp,
    DeleteApp,
    AppOrg,
    ListSecrets,
    CreateMachine,
}

#[derive(Debug, Default)]
pub struct ComputeState {
    /// app name -> secret key -> value
    pub apps: BTreeMap<String, BTreeMap<String, String>>,
    /// app name -> owning org slug
    pub orgs: BTreeMap<String, String>,
    pub machines: Vec<(String, Value)>,
    pub calls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeCompute {
    state: Mutex<ComputeState>,
    fail: BTreeSet<ComputeOp>,
    failing_secrets: BTreeSet<String>,
    org_lookups: AtomicUsize,
    journal: Journal,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(ops: &[ComputeOp]) -> Self {
        Self {
            fail: ops.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    /// Reject writes of these secret keys.
    pub fn failing_secrets(mut self, keys: &[&str]) -> Self {
        self.failing_secrets = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_app(self, app: &str, org: &str) -> Self {
        {
            let mut state = self.state();
            state.apps.insert(app.to_string(), BTreeMap::new());
            state.orgs.insert(app.to_string(), org.to_string());
        }
        self
    }

    pub fn with_secret(self, app: &str, key: &str, value: &str) -> Self {
        self.state()
            .apps
            .entry(app.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn state(&self) -> MutexGuard<'_, ComputeState> {
        self.state.lock().unwrap()
    }

    pub fn has_app(&self, app: &str) -> bool {
        self.state().apps.contains_key(app)
    }

    pub fn secrets_of(&self, app: &str) -> BTreeMap<String, String> {
        self.state().apps.get(app).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn org_lookups(&self) -> usize {
        self.org_lookups.load(Ordering::SeqCst)
    }

    fn record(&self, state: &mut ComputeState, call: String) {
        self.journal.record(&call);
        state.calls.push(call);
    }

    fn injected(op: &'static str, status: StatusCode) -> ComputeError {
        ComputeError::Status {
            op,
            status,
            body: "injected failure".into(),
        }
    }

    fn json_response(status: StatusCode, body: Value) -> UpstreamResponse {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        UpstreamResponse {
            status,
            headers,
            body: Bytes::from(body.to_string()),
        }
    }
}

#[async_trait]
impl ComputeBackend for FakeCompute {
    async fn create_app(&self, _token: &str, body: Bytes) -> ComputeResult<UpstreamResponse> {
        let parsed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let app = parsed["app_name"].as_str().unwrap_or_default().to_string();
        let org = parsed["org_slug"].as_str().unwrap_or_default().to_string();

        let mut state = self.state();
        self.record(&mut state, format!("create_app {app}"));
        if self.fail.contains(&ComputeOp::CreateApp) || state.apps.contains_key(&app) {
            return Ok(Self::json_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": format!("app {app} could not be created") }),
            ));
        }
        state.apps.insert(app.clone(), BTreeMap::new());
        state.orgs.insert(app.clone(), org.clone());
        Ok(Self::json_response(
            StatusCode::CREATED,
            json!({ "id": format!("id-{app}"), "name": app, "organization": org, "status": "created" }),
        ))
    }

    async fn delete_app(&self, _token: &str, app: &str) -> ComputeResult<()> {
        let mut state = self.state();
        self.record(&mut state, format!("delete_app {app}"));
        if self.fail.contains(&ComputeOp::DeleteApp) {
            return Err(Self::injected("delete app", StatusCode::INTERNAL_SERVER_ERROR));
        }
        if state.apps.remove(app).is_none() {
            return Err(Self::injected("delete app", StatusCode::NOT_FOUND));
        }
        state.orgs.remove(app);
        Ok(())
    }

    async fn app_org(&self, _token: &str, app: &str) -> ComputeResult<String> {
        self.org_lookups.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        self.record(&mut state, format!("app_org {app}"));
        if self.fail.contains(&ComputeOp::AppOrg) {
            return Err(Self::injected("get app", StatusCode::BAD_GATEWAY));
        }
        state
            .orgs
            .get(app)
            .cloned()
            .ok_or_else(|| Self::injected("get app", StatusCode::NOT_FOUND))
    }

    async fn list_secrets(&self, _token: &str, app: &str) -> ComputeResult<Vec<SecretInfo>> {
        let mut state = self.state();
        self.record(&mut state, format!("list_secrets {app}"));
        if self.fail.contains(&ComputeOp::ListSecrets) {
            return Err(Self::injected("list secrets", StatusCode::BAD_GATEWAY));
        }
        Ok(state
            .apps
            .get(app)
            .map(|secrets| secrets.keys().map(SecretInfo::named).collect())
            .unwrap_or_default())
    }

    async fn set_secret(
        &self,
        _token: &str,
        app: &str,
        key: &str,
        value: &str,
    ) -> ComputeResult<()> {
        // Yield so concurrent writes interleave like real requests.
        tokio::task::yield_now().await;
        let mut state = self.state();
        self.record(&mut state, format!("set_secret {app} {key}"));
        if self.failing_secrets.contains(key) {
            return Err(Self::injected("set secret", StatusCode::INTERNAL_SERVER_ERROR));
        }
        match state.apps.get_mut(app) {
            Some(secrets) => {
                secrets.insert(key.to_string(), value.to_string());
                Ok(())
            }
            None => Err(Self::injected("set secret", StatusCode::NOT_FOUND)),
        }
    }

    async fn create_machine(
        &self,
        _token: &str,
        app: &str,
        body: &Value,
    ) -> ComputeResult<UpstreamResponse> {
        let mut state = self.state();
        self.record(&mut state, format!("create_machine {app}"));
        if self.fail.contains(&ComputeOp::CreateMachine) {
            return Ok(Self::json_response(
                StatusCode::BAD_REQUEST,
                json!({ "error": "invalid machine config" }),
            ));
        }
        state.machines.push((app.to_string(), body.clone()));
        Ok(Self::json_response(
            StatusCode::OK,
            json!({ "id": format!("machine-{}", state.machines.len()) }),
        ))
    }
}
