// worker-server/src/actors/relay_session_actor.rs
use actix::{
    Actor, ActorContext, Addr, AsyncContext, Handler, Message, ResponseFuture, StreamHandler,
};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

use common::{BridgeError, BridgeRequest, BridgeResponse, RequestPayload, WireFrame};

use crate::relay_registry::RelayRegistry;
use crate::store_actor::{Dispatch, VaultStoreActor};
use crate::sync::{run_storage_sync, SyncReport};

/// Push a frame down this session's socket.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SendFrame(pub WireFrame);

/// Worker-originated page-storage call, answered by the relay from its
/// page store. Resolves with the relay's response or a classified error.
#[derive(Message)]
#[rtype(result = "Result<BridgeResponse, BridgeError>")]
pub struct PageStorageRequest(pub RequestPayload);

/// Run a full two-way storage mirror through this session's page.
#[derive(Message)]
#[rtype(result = "SyncReport")]
pub struct RunStorageSync;

/// One connected relay (content-script analog). Owns the request/response
/// correlation for worker-originated calls and forwards everything else to
/// the store actor.
pub struct RelaySessionActor {
    session_id: Uuid,
    origin: String,
    store: Addr<VaultStoreActor>,
    registry: Arc<RelayRegistry>,
    pending: HashMap<Uuid, oneshot::Sender<BridgeResponse>>,
    last_heartbeat: Instant,
    request_timeout: Duration,
}

impl RelaySessionActor {
    pub fn new(
        origin: String,
        store: Addr<VaultStoreActor>,
        registry: Arc<RelayRegistry>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            origin,
            store,
            registry,
            pending: HashMap::new(),
            last_heartbeat: Instant::now(),
            request_timeout,
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(Duration::from_secs(5), |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > Duration::from_secs(30) {
                tracing::warn!("Relay session heartbeat timeout: {}", act.session_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_request(&mut self, request: BridgeRequest, ctx: &mut ws::WebsocketContext<Self>) {
        let request_id = request.request_id;
        let addr = ctx.address();

        match request.payload {
            RequestPayload::SyncStorage => {
                let store = self.store.clone();
                actix::spawn(async move {
                    let report = run_storage_sync(addr.clone(), store).await;
                    let mut response = BridgeResponse::ok(request_id, report.to_value());
                    response.success = report.success;
                    if !report.success {
                        response.error = Some(
                            report
                                .errors
                                .first()
                                .cloned()
                                .unwrap_or_else(|| "storage sync failed".into()),
                        );
                    }
                    addr.do_send(SendFrame(WireFrame::Response(response)));
                });
            }
            _ => {
                let store = self.store.clone();
                actix::spawn(async move {
                    let response = match store.send(Dispatch(request)).await {
                        Ok(response) => response,
                        Err(e) => BridgeResponse::failure(
                            request_id,
                            common::ErrorCode::RuntimeError,
                            format!("store dispatch failed: {}", e),
                        )
                        .with_source("worker"),
                    };
                    addr.do_send(SendFrame(WireFrame::Response(response)));
                });
            }
        }
    }

    fn handle_response(&mut self, response: BridgeResponse) {
        match self.pending.remove(&response.request_id) {
            Some(reply) => {
                if reply.send(response).is_err() {
                    tracing::debug!("Page-storage caller gone, response discarded");
                }
            }
            None => {
                // Either already timed out or never ours; late results are
                // discarded per the timeout contract.
                tracing::debug!("Discarding uncorrelated response: {}", response.request_id);
            }
        }
    }
}

impl Actor for RelaySessionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            "Relay connected: {} (origin: {})",
            self.session_id,
            self.origin
        );
        self.heartbeat(ctx);
        self.registry
            .register(self.session_id, ctx.address(), self.origin.clone());
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Relay disconnected: {}", self.session_id);
        self.registry.unregister(&self.session_id);
        // Answer anything still waiting so no caller hangs on a dead socket.
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(
                BridgeResponse::failure(
                    Uuid::nil(),
                    common::ErrorCode::SendError,
                    "relay session closed",
                )
                .with_source("worker"),
            );
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySessionActor {
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
                match serde_json::from_str::<WireFrame>(&text) {
                    Ok(WireFrame::Request(request)) => self.handle_request(request, ctx),
                    Ok(WireFrame::Response(response)) => self.handle_response(response),
                    Err(e) => {
                        // No request_id to correlate; nothing to answer.
                        tracing::warn!("Unparseable relay frame dropped: {}", e);
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("Relay closing: {:?}", reason);
                ctx.close(reason);
            }
            Err(e) => {
                tracing::error!("Relay socket protocol error: {}", e);
                ctx.stop();
            }
            _ => (),
        }
    }
}

impl Handler<SendFrame> for RelaySessionActor {
    type Result = ();

    fn handle(&mut self, msg: SendFrame, ctx: &mut Self::Context) {
        match serde_json::to_string(&msg.0) {
            Ok(json) => ctx.text(json),
            Err(e) => tracing::error!("Failed to serialize frame: {}", e),
        }
    }
}

impl Handler<PageStorageRequest> for RelaySessionActor {
    type Result = ResponseFuture<Result<BridgeResponse, BridgeError>>;

    fn handle(&mut self, msg: PageStorageRequest, ctx: &mut Self::Context) -> Self::Result {
        let request = BridgeRequest::new(msg.0);
        let request_id = request.request_id;

        let (reply, rx) = oneshot::channel();
        self.pending.insert(request_id, reply);

        ctx.address()
            .do_send(SendFrame(WireFrame::Request(request)));

        // Drop the correlation entry once the deadline passes; a late
        // response then lands in the discard path.
        let timeout = self.request_timeout;
        ctx.run_later(timeout + Duration::from_millis(50), move |act, _ctx| {
            act.pending.remove(&request_id);
        });

        Box::pin(async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(BridgeError::Send("relay session closed".into())),
                Err(_) => Err(BridgeError::Timeout(timeout)),
            }
        })
    }
}

impl Handler<RunStorageSync> for RelaySessionActor {
    type Result = ResponseFuture<SyncReport>;

    fn handle(&mut self, _msg: RunStorageSync, ctx: &mut Self::Context) -> Self::Result {
        let addr = ctx.address();
        let store = self.store.clone();
        Box::pin(async move { run_storage_sync(addr, store).await })
    }
}
