#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::watch;
use uuid::Uuid;

use vidqueue::config::{Config, ScheduleConfig};
use vidqueue::db::{MemoryRecordStore, RecordStore, StoreError};
use vidqueue::models::{
    AssetRef, NewRecord, QueueRecord, RecordStatus, RecordUpdate, SubmissionContext,
    VideoMetadata,
};
use vidqueue::providers::filename;
use vidqueue::providers::{
    AssetStore, ExternalError, MetadataProvider, Providers, PublishConfirmation, Publisher,
};
use vidqueue::scheduler::{ManualClock, Scheduler};
use vidqueue::state::AppState;
use vidqueue::worker::{self, SchedulerHandle};

/// 2025-03-10 10:00 in UTC+7.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap()
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

pub fn schedule_config(max_uploads_per_day: u32) -> ScheduleConfig {
    ScheduleConfig {
        max_uploads_per_day,
        tick_interval: Duration::from_secs(24 * 3600),
        retry_ceiling: 3,
        utc_offset: FixedOffset::east_opt(7 * 3600).unwrap(),
        metadata_timeout: Duration::from_secs(5),
        publish_timeout: Duration::from_secs(5),
    }
}

// ── Fake collaborators ─────────────────────────────────────────

/// Record store wrapper that can inject conflicts and outages.
pub struct ScriptedStore {
    inner: MemoryRecordStore,
    conflicts: AtomicUsize,
    down: AtomicBool,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryRecordStore::new(),
            conflicts: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }

    /// The next `n` updates lose their race.
    pub fn inject_conflicts(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for ScriptedStore {
    async fn create(&self, new: NewRecord) -> Result<QueueRecord, StoreError> {
        self.check()?;
        self.inner.create(new).await
    }

    async fn get(&self, id: Uuid) -> Result<QueueRecord, StoreError> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<QueueRecord>, StoreError> {
        self.check()?;
        self.inner.list_by_status(status).await
    }

    async fn list_scheduled_on(&self, date: NaiveDate) -> Result<Vec<QueueRecord>, StoreError> {
        self.check()?;
        self.inner.list_scheduled_on(date).await
    }

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        patch: RecordUpdate,
    ) -> Result<QueueRecord, StoreError> {
        self.check()?;
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict);
        }
        self.inner.update(id, expected_version, patch).await
    }
}

/// Metadata from the filename, with per-asset failures on demand.
#[derive(Default)]
pub struct FakeMetadata {
    failures: Mutex<HashMap<String, ExternalError>>,
    calls: AtomicUsize,
}

impl FakeMetadata {
    pub fn fail_for(&self, asset: &AssetRef, err: ExternalError) {
        self.failures
            .lock()
            .unwrap()
            .insert(asset.as_str().to_string(), err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataProvider for FakeMetadata {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(
        &self,
        asset: &AssetRef,
        context: &SubmissionContext,
    ) -> Result<VideoMetadata, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().get(asset.as_str()) {
            return Err(err.clone());
        }
        Ok(filename::from_filename(&context.filename, context.caption.as_deref()))
    }
}

/// Publisher that records every call and fails on request.
#[derive(Default)]
pub struct FakePublisher {
    failures: Mutex<HashMap<String, ExternalError>>,
    published: Mutex<Vec<AssetRef>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakePublisher {
    pub fn fail_for(&self, asset: &AssetRef, err: ExternalError) {
        self.failures
            .lock()
            .unwrap()
            .insert(asset.as_str().to_string(), err);
    }

    pub fn recover(&self, asset: &AssetRef) {
        self.failures.lock().unwrap().remove(asset.as_str());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<AssetRef> {
        self.published.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    fn name(&self) -> &str {
        "fake"
    }

    async fn publish(
        &self,
        asset: &AssetRef,
        _metadata: &VideoMetadata,
        _target_time: DateTime<Utc>,
    ) -> Result<PublishConfirmation, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failures.lock().unwrap().get(asset.as_str()).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = failure {
            return Err(err);
        }

        self.published.lock().unwrap().push(asset.clone());
        let video_id = asset.as_str().replace(':', "-");
        Ok(PublishConfirmation {
            url: format!("https://youtu.be/{video_id}"),
            video_id,
        })
    }
}

#[derive(Default)]
pub struct MemoryAssets {
    blobs: DashMap<String, Bytes>,
}

#[async_trait]
impl AssetStore for MemoryAssets {
    async fn put(&self, filename: &str, data: Bytes) -> Result<AssetRef, ExternalError> {
        let asset = AssetRef(format!("mem:{filename}"));
        self.blobs.insert(asset.as_str().to_string(), data);
        Ok(asset)
    }

    async fn fetch(&self, asset: &AssetRef) -> Result<Bytes, ExternalError> {
        self.blobs
            .get(asset.as_str())
            .map(|b| b.value().clone())
            .ok_or_else(|| ExternalError::Permanent(format!("No such asset: {asset}")))
    }
}

// ── Scheduler harness ──────────────────────────────────────────

pub struct TestScheduler {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<ScriptedStore>,
    pub clock: Arc<ManualClock>,
    pub metadata: Arc<FakeMetadata>,
    pub publisher: Arc<FakePublisher>,
}

impl TestScheduler {
    pub fn new(max_uploads_per_day: u32) -> Self {
        Self::with_config(schedule_config(max_uploads_per_day))
    }

    pub fn with_config(config: ScheduleConfig) -> Self {
        let store = Arc::new(ScriptedStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let metadata = Arc::new(FakeMetadata::default());
        let publisher = Arc::new(FakePublisher::default());

        let providers = Providers {
            metadata: metadata.clone(),
            publisher: publisher.clone(),
            assets: Arc::new(MemoryAssets::default()),
        };

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            providers,
            clock.clone(),
            config,
        ));

        Self {
            scheduler,
            store,
            clock,
            metadata,
            publisher,
        }
    }

    pub fn asset(name: &str) -> AssetRef {
        AssetRef(format!("mem:{name}.mp4"))
    }

    /// Submit through the scheduler, as the intake channel does.
    pub async fn submit(&self, name: &str) -> Uuid {
        self.submit_with_priority(name, None).await
    }

    pub async fn submit_with_priority(&self, name: &str, priority: Option<i32>) -> Uuid {
        let context = SubmissionContext {
            filename: format!("{name}.mp4"),
            caption: None,
            priority,
        };
        self.scheduler
            .submit(Self::asset(name), context)
            .await
            .expect("submit failed")
    }

    /// Insert a Pending record straight into the store.
    pub async fn enqueue_pending(&self, name: &str) -> Uuid {
        let new = NewRecord {
            asset_ref: Self::asset(name),
            context: SubmissionContext {
                filename: format!("{name}.mp4"),
                caption: None,
                priority: None,
            },
        };
        self.store.create(new).await.expect("create failed").id
    }

    pub async fn record(&self, id: Uuid) -> QueueRecord {
        self.store.get(id).await.expect("record missing")
    }

    pub async fn store_update(&self, id: Uuid, version: i64, patch: RecordUpdate) -> QueueRecord {
        self.store
            .update(id, version, patch)
            .await
            .expect("update failed")
    }

    /// Scheduled records booked for `date`.
    pub async fn store_scheduled_on(&self, date: NaiveDate) -> usize {
        self.store
            .list_scheduled_on(date)
            .await
            .expect("list failed")
            .iter()
            .filter(|r| r.status == RecordStatus::Scheduled)
            .count()
    }

    pub fn next_day(&self) {
        self.clock.advance(chrono::Duration::days(1));
    }
}

// ── HTTP harness ───────────────────────────────────────────────

/// A running test server backed by the in-memory store.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub harness: TestScheduler,
    pub handle: SchedulerHandle,
    pub token: Option<String>,
    shutdown: watch::Sender<bool>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .auth(self.client.get(self.url(path)))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .auth(self.client.post(self.url(path)))
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn patch(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .auth(self.client.patch(self.url(path)))
            .json(body)
            .send()
            .await
            .expect("patch request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Upload a video through the multipart intake endpoint.
    pub async fn upload(
        &self,
        filename: &str,
        caption: Option<&str>,
        priority: Option<i32>,
    ) -> (Value, StatusCode) {
        let part = reqwest::multipart::Part::bytes(b"fake video bytes".to_vec())
            .file_name(filename.to_string())
            .mime_str("video/mp4")
            .unwrap();
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }
        if let Some(priority) = priority {
            form = form.text("priority", priority.to_string());
        }

        let resp = self
            .auth(self.client.post(self.url("/api/v1/videos")))
            .multipart(form)
            .send()
            .await
            .expect("upload request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub fn stop_scheduler(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(2, None).await
}

/// Spawn a test app with the given daily limit and optional operator token.
pub async fn spawn_app_with(max_uploads_per_day: u32, api_token: Option<&str>) -> TestApp {
    let harness = TestScheduler::new(max_uploads_per_day);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, _task) = worker::spawn(harness.scheduler.clone(), shutdown_rx);

    let config = Config {
        database_url: None,
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        max_body_size: 10 * 1024 * 1024,
        api_token: api_token.map(str::to_string),
        log_level: "warn".to_string(),
        asset_dir: std::env::temp_dir(),
        schedule: schedule_config(max_uploads_per_day),
        groq: None,
        youtube: None,
    };

    let state = Arc::new(AppState {
        config,
        scheduler: harness.scheduler.clone(),
        handle: handle.clone(),
    });
    let app = vidqueue::build_app(state);

    // Bind to random port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    // Spawn server in background
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        harness,
        handle,
        token: api_token.map(str::to_string),
        shutdown: shutdown_tx,
    }
}
