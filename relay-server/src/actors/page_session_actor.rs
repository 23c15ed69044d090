// relay-server/src/actors/page_session_actor.rs
//
// One connected page (content-script analog). Owns the page-store mirror,
// the key cache, and the record store; resolves reads locally when it can
// and relays everything else to the worker through the upstream link.

use actix::{Actor, ActorContext, Addr, AsyncContext, Handler, Message, StreamHandler};
use actix_web_actors::ws;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

use common::keys::{
    key_bundle_key, storage_value_to_string, CONNECTED_FLAG_KEY, CONNECTION_ERROR_KEY,
};
use common::models::SyncStatus;
use common::{
    BridgeRequest, BridgeResponse, ErrorCode, PageEvent, RequestPayload, TimingConfig, WireFrame,
    BRIDGE_VERSION,
};

use super::upstream_actor::{
    LinkStatus, PushFrame, SendUpstream, Shutdown, UpstreamActor, WorkerRequest,
};
use crate::backup::{build_backup_jobs, BackupJob};
use crate::cache::{resolve_bundle, resolve_value, KeyCache, StorageSource};
use crate::page_store::PageStore;
use crate::record_store::RecordStore;
use crate::sweep::{batch_files, collect_critical_files};

const ERROR_SOURCE: &str = "relay";

/// Forwarded-request completion, delivered back to the session so the
/// cache update and the page write happen on the actor's own thread.
#[derive(Message)]
#[rtype(result = "()")]
struct Deliver {
    response: BridgeResponse,
    /// Cache key to fill from the response's `keys` field on success.
    cache_key: Option<String>,
}

#[derive(Message)]
#[rtype(result = "()")]
struct SweepFinished {
    stored: usize,
    failed: usize,
}

pub struct PageSessionActor {
    session_id: Uuid,
    origin: String,
    worker_url: String,
    timing: TimingConfig,
    page: PageStore,
    cache: KeyCache,
    records: RecordStore,
    upstream: Option<Addr<UpstreamActor>>,
    worker_connected: bool,
    last_heartbeat: Instant,
    last_sync: Option<SyncStatus>,
    backed_up_users: HashSet<String>,
}

impl PageSessionActor {
    pub fn new(origin: String, worker_url: String, timing: TimingConfig) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            origin,
            worker_url,
            timing,
            page: PageStore::new(),
            cache: KeyCache::new(),
            records: RecordStore::new(),
            upstream: None,
            worker_connected: false,
            last_heartbeat: Instant::now(),
            last_sync: None,
            backed_up_users: HashSet::new(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(Duration::from_secs(5), |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > Duration::from_secs(30) {
                tracing::warn!("Page heartbeat timeout: {}", act.session_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_response(&self, ctx: &mut ws::WebsocketContext<Self>, response: BridgeResponse) {
        match serde_json::to_string(&response) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::error!("Failed to serialize response: {}", e),
        }
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: PageEvent) {
        match serde_json::to_string(&event) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::error!("Failed to serialize page event: {}", e),
        }
    }

    /// Relay a request to the worker; the completion comes back as a
    /// `Deliver` so the page is always answered, with a classified code on
    /// failure.
    fn forward(
        &mut self,
        request: BridgeRequest,
        cache_key: Option<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let request_id = request.request_id;
        let addr = ctx.address();

        let Some(upstream) = self.upstream.clone() else {
            self.send_response(
                ctx,
                BridgeResponse::failure(
                    request_id,
                    ErrorCode::RuntimeUnavailable,
                    "no worker link",
                )
                .with_source(ERROR_SOURCE),
            );
            return;
        };

        actix::spawn(async move {
            let response = match upstream.send(SendUpstream(request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => BridgeResponse::from_error(request_id, &e).with_source(ERROR_SOURCE),
                Err(e) => BridgeResponse::failure(
                    request_id,
                    ErrorCode::RuntimeError,
                    format!("upstream mailbox error: {}", e),
                )
                .with_source(ERROR_SOURCE),
            };
            addr.do_send(Deliver {
                response,
                cache_key,
            });
        });
    }

    /// Push one freshly changed critical key upstream without waiting for
    /// the next sweep.
    fn push_single_key(&self, key: &str, value: &str) {
        let Some(upstream) = &self.upstream else {
            return;
        };
        let request = BridgeRequest::new(RequestPayload::SyncCriticalFiles {
            files: vec![common::CriticalFile {
                key: key.to_string(),
                value: value.to_string(),
            }],
        });
        let upstream = upstream.clone();
        let key = key.to_string();
        actix::spawn(async move {
            match upstream.send(SendUpstream(request)).await {
                Ok(Ok(_)) => tracing::debug!("Pushed changed key: {}", key),
                Ok(Err(e)) => tracing::warn!("Immediate push failed for {}: {}", key, e),
                Err(e) => tracing::warn!("Upstream mailbox error pushing {}: {}", key, e),
            }
        });
    }

    fn run_sweep(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let files = collect_critical_files(&self.page);
        if files.is_empty() {
            tracing::debug!("Sweep found no critical files");
            return;
        }
        let batches = batch_files(files, self.timing.sweep_batch_size);
        let Some(upstream) = self.upstream.clone() else {
            tracing::debug!("Sweep skipped, no worker link");
            return;
        };

        let addr = ctx.address();
        actix::spawn(async move {
            let mut stored = 0usize;
            let mut failed = 0usize;
            for batch in batches {
                let count = batch.len();
                let request = BridgeRequest::new(RequestPayload::SyncCriticalFiles {
                    files: batch,
                });
                // A failed batch is recorded and the sweep moves on.
                match upstream.send(SendUpstream(request)).await {
                    Ok(Ok(response)) if response.success => stored += count,
                    Ok(Ok(response)) => {
                        failed += count;
                        tracing::warn!("Sweep batch rejected: {:?}", response.error);
                    }
                    Ok(Err(e)) => {
                        failed += count;
                        tracing::warn!("Sweep batch failed: {}", e);
                    }
                    Err(e) => {
                        failed += count;
                        tracing::warn!("Upstream mailbox error during sweep: {}", e);
                    }
                }
            }
            addr.do_send(SweepFinished { stored, failed });
        });

        self.run_backups();
    }

    /// Queue record-store backups for users not yet covered this session,
    /// active user first. Every job advances the chain even when it fails.
    fn run_backups(&mut self) {
        if self.records.is_empty() {
            return;
        }
        let jobs: Vec<BackupJob> = build_backup_jobs(&self.page, &self.records)
            .into_iter()
            .filter(|job| !self.backed_up_users.contains(&job.identifier))
            .collect();
        if jobs.is_empty() {
            return;
        }
        for job in &jobs {
            self.backed_up_users.insert(job.identifier.clone());
        }

        let Some(upstream) = self.upstream.clone() else {
            return;
        };
        actix::spawn(async move {
            for job in jobs {
                let identifier = job.identifier.clone();
                let database = job.database.clone();
                let request = BridgeRequest::new(RequestPayload::BackupIndexeddb {
                    identifier: job.identifier,
                    database: job.database,
                    snapshot: job.snapshot,
                });
                match upstream.send(SendUpstream(request)).await {
                    Ok(Ok(response)) if response.success => {
                        tracing::info!("Backed up {} for {}", database, identifier);
                    }
                    Ok(Ok(response)) => {
                        tracing::warn!(
                            "Backup rejected for {}: {:?}",
                            identifier,
                            response.error
                        );
                    }
                    Ok(Err(e)) => tracing::warn!("Backup failed for {}: {}", identifier, e),
                    Err(e) => {
                        tracing::warn!("Upstream mailbox error backing up {}: {}", identifier, e)
                    }
                }
            }
        });
    }

    fn handle_page_request(
        &mut self,
        request: BridgeRequest,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let request_id = request.request_id;

        match request.payload {
            RequestPayload::GetKeys { identifier } => {
                if let Some((value, source)) =
                    resolve_bundle(&mut self.cache, &self.page, &identifier)
                {
                    self.send_response(
                        ctx,
                        BridgeResponse::ok(
                            request_id,
                            json!({
                                "identifier": identifier,
                                "keys": value,
                                "source": source.as_str(),
                            }),
                        ),
                    );
                    return;
                }
                let cache_key = key_bundle_key(&identifier);
                self.forward(
                    BridgeRequest {
                        request_id,
                        payload: RequestPayload::GetKeys { identifier },
                    },
                    Some(cache_key),
                    ctx,
                );
            }
            RequestPayload::GetLocalStorageValue { key } => {
                if let Some((value, source)) = resolve_value(&mut self.cache, &self.page, &key) {
                    self.send_response(
                        ctx,
                        BridgeResponse::ok(
                            request_id,
                            json!({
                                "key": key,
                                "value": storage_value_to_string(&value),
                                "found": true,
                                "source": source.as_str(),
                            }),
                        ),
                    );
                    return;
                }
                self.forward(
                    BridgeRequest {
                        request_id,
                        payload: RequestPayload::GetLocalStorageValue { key },
                    },
                    None,
                    ctx,
                );
            }
            RequestPayload::StoreKeys { identifier, keys } => {
                // The worker keys its writes on the top-level identifier;
                // lift a nested one before forwarding.
                let identifier = identifier.or_else(|| lifted_identifier(&keys));
                if let Some(id) = &identifier {
                    // Synchronous cache insert, so an immediately following
                    // same-session GET_KEYS cannot race the store.
                    self.cache
                        .insert(key_bundle_key(id), keys.clone(), StorageSource::Cache);
                }
                self.forward(
                    BridgeRequest {
                        request_id,
                        payload: RequestPayload::StoreKeys { identifier, keys },
                    },
                    None,
                    ctx,
                );
            }
            RequestPayload::SetLocalStorageValue { key, value } => {
                self.page.set(key.clone(), value.clone());
                self.cache.invalidate(&key);
                if common::keys::is_critical_key(&key) {
                    self.push_single_key(&key, &value);
                }
                self.send_response(
                    ctx,
                    BridgeResponse::ok(request_id, json!({ "key": key, "stored": true })),
                );
            }
            RequestPayload::StorageChanged { key, value } => {
                match &value {
                    Some(new_value) => self.page.set(key.clone(), new_value.clone()),
                    None => {
                        self.page.remove(&key);
                    }
                }
                self.cache.invalidate(&key);
                if common::keys::is_critical_key(&key) {
                    if let Some(new_value) = &value {
                        self.push_single_key(&key, new_value);
                    }
                }
                self.send_response(
                    ctx,
                    BridgeResponse::ok(request_id, json!({ "key": key, "applied": true })),
                );
            }
            RequestPayload::PageNavigated { path } => {
                tracing::debug!("Page navigated to {}", path);
                self.cache.clear();
                self.send_response(
                    ctx,
                    BridgeResponse::ok(request_id, json!({ "resynced": true })),
                );
                self.run_sweep(ctx);
            }
            RequestPayload::ListLocalStorageKeys => {
                self.send_response(
                    ctx,
                    BridgeResponse::ok(request_id, json!({ "keys": self.page.keys() })),
                );
            }
            RequestPayload::PutRecord {
                database,
                store,
                record,
            } => {
                self.records.put(database, store, record);
                self.send_response(
                    ctx,
                    BridgeResponse::ok(request_id, json!({ "stored": true })),
                );
            }
            RequestPayload::Heartbeat => {
                self.send_response(
                    ctx,
                    BridgeResponse::ok(
                        request_id,
                        json!({
                            "alive": true,
                            "worker_connected": self.worker_connected,
                            "last_sync": self.last_sync,
                        }),
                    ),
                );
            }
            other => {
                self.forward(
                    BridgeRequest {
                        request_id,
                        payload: other,
                    },
                    None,
                    ctx,
                );
            }
        }
    }
}

/// `STORE_KEYS` normalization: callers sometimes carry the identifier only
/// inside the bundle. Lift it so the worker's dispatcher sees it.
fn lifted_identifier(keys: &Value) -> Option<String> {
    ["email", "identifier"]
        .iter()
        .find_map(|name| keys.get(name))
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl Actor for PageSessionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            "Page connected: {} (origin: {})",
            self.session_id,
            self.origin
        );
        self.heartbeat(ctx);

        let upstream = UpstreamActor::new(
            format!("{}?origin={}", self.worker_url, self.origin),
            ctx.address(),
            &self.timing,
        )
        .start();
        self.upstream = Some(upstream);

        self.send_event(
            ctx,
            PageEvent::ExtensionReady {
                version: BRIDGE_VERSION.to_string(),
                reconnected: false,
            },
        );

        let sweep_interval = Duration::from_secs(self.timing.sweep_interval_secs);
        ctx.run_interval(sweep_interval, |act, ctx| act.run_sweep(ctx));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Page disconnected: {}", self.session_id);
        if let Some(upstream) = self.upstream.take() {
            upstream.do_send(Shutdown);
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for PageSessionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<BridgeRequest>(&text) {
                    Ok(request) => self.handle_page_request(request, ctx),
                    Err(e) => {
                        // Malformed frames are still answered, never
                        // dropped silently.
                        self.send_response(
                            ctx,
                            BridgeResponse::failure(
                                Uuid::nil(),
                                ErrorCode::ProcessingError,
                                format!("malformed request: {}", e),
                            )
                            .with_source(ERROR_SOURCE),
                        );
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("Page closing: {:?}", reason);
                ctx.close(reason);
            }
            Err(e) => {
                tracing::error!("Page socket protocol error: {}", e);
                ctx.stop();
            }
            _ => (),
        }
    }
}

impl Handler<Deliver> for PageSessionActor {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        if msg.response.success {
            if let Some(cache_key) = msg.cache_key {
                let keys = &msg.response.data["keys"];
                if !keys.is_null() {
                    self.cache
                        .insert(cache_key, keys.clone(), StorageSource::ExtensionLocal);
                }
            }
        }
        self.send_response(ctx, msg.response);
    }
}

impl Handler<LinkStatus> for PageSessionActor {
    type Result = ();

    fn handle(&mut self, msg: LinkStatus, ctx: &mut Self::Context) {
        let was_connected = self.worker_connected;
        self.worker_connected = msg.connected;

        if msg.connected {
            if !was_connected {
                self.page.set(CONNECTED_FLAG_KEY, "true");
                self.page.remove(CONNECTION_ERROR_KEY);
                self.send_event(
                    ctx,
                    PageEvent::ConnectionChanged {
                        connected: true,
                        error: None,
                    },
                );
            }
            if msg.reconnected {
                // Within one reconnection cycle: re-announce readiness and
                // re-run the sweep, no page reload required.
                self.send_event(
                    ctx,
                    PageEvent::ExtensionReady {
                        version: BRIDGE_VERSION.to_string(),
                        reconnected: true,
                    },
                );
                self.run_sweep(ctx);
            }
        } else {
            // Cross-reload breadcrumbs for the page's own storage.
            self.page.set(CONNECTED_FLAG_KEY, "false");
            if let Some(error) = &msg.error {
                self.page.set(CONNECTION_ERROR_KEY, error.clone());
            }
            self.send_event(
                ctx,
                PageEvent::ConnectionChanged {
                    connected: false,
                    error: msg.error,
                },
            );
        }
    }
}

impl Handler<WorkerRequest> for PageSessionActor {
    type Result = ();

    fn handle(&mut self, msg: WorkerRequest, ctx: &mut Self::Context) {
        let WorkerRequest(request) = msg;
        let request_id = request.request_id;

        let response = match &request.payload {
            RequestPayload::ListLocalStorageKeys => {
                BridgeResponse::ok(request_id, json!({ "keys": self.page.keys() }))
            }
            RequestPayload::GetLocalStorageValue { key } => match self.page.get(key) {
                Some(value) => BridgeResponse::ok(
                    request_id,
                    json!({ "key": key, "value": value, "found": true }),
                ),
                None => BridgeResponse::failure(
                    request_id,
                    ErrorCode::NotFound,
                    format!("{} not in page storage", key),
                )
                .with_source(ERROR_SOURCE),
            },
            RequestPayload::SetLocalStorageValue { key, value } => {
                self.page.set(key.clone(), value.clone());
                self.cache.invalidate(key);
                // The page applies the restored key to its real storage.
                self.send_event(
                    ctx,
                    PageEvent::StorageMirrored {
                        key: key.clone(),
                        value: value.clone(),
                    },
                );
                BridgeResponse::ok(request_id, json!({ "key": key, "stored": true }))
            }
            other => BridgeResponse::failure(
                request_id,
                ErrorCode::ProcessingError,
                format!("{} is not a page-storage request", other.kind()),
            )
            .with_source(ERROR_SOURCE),
        };

        if let Some(upstream) = &self.upstream {
            upstream.do_send(PushFrame(WireFrame::Response(response)));
        }
    }
}

impl Handler<SweepFinished> for PageSessionActor {
    type Result = ();

    fn handle(&mut self, msg: SweepFinished, _ctx: &mut Self::Context) {
        let success = msg.failed == 0 || msg.stored > 0;
        self.last_sync = Some(SyncStatus::record(success, msg.stored));
        tracing::info!(
            "Sweep finished: stored={} failed={}",
            msg.stored,
            msg.failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_identifier_is_lifted() {
        let keys = json!({"email": "a@b.com", "publicKey": "abc"});
        assert_eq!(lifted_identifier(&keys).as_deref(), Some("a@b.com"));

        let keys = json!({"identifier": "c@d.com"});
        assert_eq!(lifted_identifier(&keys).as_deref(), Some("c@d.com"));

        let keys = json!({"publicKey": "abc"});
        assert_eq!(lifted_identifier(&keys), None);
    }
}
