// relay-server/src/actors/upstream_actor.rs
//
// Worker link owned by one page session: a WebSocket client connection
// carrying request/response frames in both directions. Owns the pending
// request correlation, the 15-second heartbeat, and reconnection with
// exponential backoff.

use actix::{Actor, ActorContext, Addr, AsyncContext, Context, Handler, Message, ResponseFuture};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use uuid::Uuid;

use common::{
    classify_link_failure, BridgeError, BridgeRequest, BridgeResponse, RequestPayload,
    TimingConfig, WireFrame,
};

use super::page_session_actor::PageSessionActor;

/// Send a request to the worker and resolve with its response, or with a
/// classified error if the link is down, the write fails, or the deadline
/// passes.
#[derive(Message)]
#[rtype(result = "Result<BridgeResponse, BridgeError>")]
pub struct SendUpstream(pub BridgeRequest);

/// Push a frame without waiting for correlation, used for answers to
/// worker-originated requests.
#[derive(Message)]
#[rtype(result = "()")]
pub struct PushFrame(pub WireFrame);

/// Worker-link state change delivered to the owning page session.
#[derive(Message)]
#[rtype(result = "()")]
pub struct LinkStatus {
    pub connected: bool,
    pub reconnected: bool,
    pub error: Option<String>,
}

/// Worker-originated request the page session must answer from its page
/// store.
#[derive(Message)]
#[rtype(result = "()")]
pub struct WorkerRequest(pub BridgeRequest);

/// Tear the link down when the owning page session goes away.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

#[derive(Message)]
#[rtype(result = "()")]
enum LinkEvent {
    Connected(mpsc::Sender<WsMessage>),
    Frame(WireFrame),
    Disconnected(String),
}

pub struct UpstreamActor {
    worker_url: String,
    session: Addr<PageSessionActor>,
    sink: Option<mpsc::Sender<WsMessage>>,
    pending: HashMap<Uuid, oneshot::Sender<BridgeResponse>>,
    connected: bool,
    /// Whether the link has ever been up; a drop after that is the
    /// context-invalidated class rather than runtime-unavailable.
    link_was_established: bool,
    session_notified_down: bool,
    reconnect_attempts: u32,
    heartbeat_interval: Duration,
    request_timeout: Duration,
    max_backoff: Duration,
}

impl UpstreamActor {
    pub fn new(worker_url: String, session: Addr<PageSessionActor>, timing: &TimingConfig) -> Self {
        Self {
            worker_url,
            session,
            sink: None,
            pending: HashMap::new(),
            connected: false,
            link_was_established: false,
            session_notified_down: false,
            reconnect_attempts: 0,
            heartbeat_interval: Duration::from_secs(timing.heartbeat_interval_secs),
            request_timeout: Duration::from_secs(timing.request_timeout_secs),
            max_backoff: Duration::from_secs(timing.reconnect_max_backoff_secs),
        }
    }

    fn connect(&mut self, ctx: &mut Context<Self>) {
        let url = self.worker_url.clone();
        let addr = ctx.address();

        let fut = async move {
            match connect_async(url).await {
                Ok((stream, _)) => {
                    let (mut ws_sink, mut ws_stream) = stream.split();
                    let (tx, mut rx) = mpsc::channel::<WsMessage>(100);
                    addr.do_send(LinkEvent::Connected(tx));

                    tokio::spawn(async move {
                        while let Some(msg) = rx.recv().await {
                            if let Err(e) = ws_sink.send(msg).await {
                                tracing::error!("Error sending to worker: {}", e);
                                break;
                            }
                        }
                    });

                    while let Some(msg) = ws_stream.next().await {
                        match msg {
                            Ok(WsMessage::Text(text)) => {
                                match serde_json::from_str::<WireFrame>(&text) {
                                    Ok(frame) => addr.do_send(LinkEvent::Frame(frame)),
                                    Err(e) => {
                                        tracing::warn!("Unparseable worker frame dropped: {}", e)
                                    }
                                }
                            }
                            Ok(WsMessage::Close(_)) => {
                                addr.do_send(LinkEvent::Disconnected(
                                    "worker closed the link".into(),
                                ));
                                return;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                addr.do_send(LinkEvent::Disconnected(e.to_string()));
                                return;
                            }
                        }
                    }
                    addr.do_send(LinkEvent::Disconnected("worker stream ended".into()));
                }
                Err(e) => {
                    addr.do_send(LinkEvent::Disconnected(format!("connect failed: {}", e)));
                }
            }
        };

        actix::spawn(fut);
    }

    fn heartbeat(&self, ctx: &mut Context<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            let addr = ctx.address();
            let session = act.session.clone();
            actix::spawn(async move {
                let started = Instant::now();
                let request = BridgeRequest::new(RequestPayload::Heartbeat);
                match addr.send(SendUpstream(request)).await {
                    Ok(Ok(_)) => {
                        tracing::debug!("Worker heartbeat round-trip: {:?}", started.elapsed());
                        session.do_send(LinkStatus {
                            connected: true,
                            reconnected: false,
                            error: None,
                        });
                    }
                    Ok(Err(e)) => {
                        // Link loss is handled by the disconnect path; a
                        // timeout on a live socket is transient.
                        tracing::warn!("Worker heartbeat failed: {}", e);
                    }
                    Err(e) => tracing::warn!("Heartbeat mailbox error: {}", e),
                }
            });
        });
    }
}

impl Actor for UpstreamActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("Connecting to worker at {}", self.worker_url);
        self.connect(ctx);
        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(
                BridgeResponse::failure(
                    Uuid::nil(),
                    common::ErrorCode::SendError,
                    "worker link closed",
                )
                .with_source("relay"),
            );
        }
    }
}

impl Handler<LinkEvent> for UpstreamActor {
    type Result = ();

    fn handle(&mut self, msg: LinkEvent, ctx: &mut Self::Context) {
        match msg {
            LinkEvent::Connected(tx) => {
                let reconnected = self.link_was_established;
                self.sink = Some(tx);
                self.connected = true;
                self.link_was_established = true;
                self.session_notified_down = false;
                self.reconnect_attempts = 0;
                tracing::info!(
                    "Worker link up{}",
                    if reconnected { " (reconnected)" } else { "" }
                );
                self.session.do_send(LinkStatus {
                    connected: true,
                    reconnected,
                    error: None,
                });
            }
            LinkEvent::Frame(WireFrame::Response(response)) => {
                match self.pending.remove(&response.request_id) {
                    Some(reply) => {
                        if reply.send(response).is_err() {
                            tracing::debug!("Caller gone, worker response discarded");
                        }
                    }
                    None => {
                        // Deadline already passed; late results are discarded.
                        tracing::debug!(
                            "Discarding uncorrelated worker response: {}",
                            response.request_id
                        );
                    }
                }
            }
            LinkEvent::Frame(WireFrame::Request(request)) => {
                self.session.do_send(WorkerRequest(request));
            }
            LinkEvent::Disconnected(detail) => {
                self.sink = None;
                self.connected = false;

                let error = classify_link_failure(self.link_was_established, detail);
                for (_, reply) in self.pending.drain() {
                    let _ = reply
                        .send(BridgeResponse::failure(Uuid::nil(), error.code(), error.to_string()));
                }

                if !self.session_notified_down {
                    self.session_notified_down = true;
                    self.session.do_send(LinkStatus {
                        connected: false,
                        reconnected: false,
                        error: Some(error.to_string()),
                    });
                }

                let backoff = std::cmp::min(
                    Duration::from_secs(2u64.pow(self.reconnect_attempts.min(6))),
                    self.max_backoff,
                );
                self.reconnect_attempts += 1;
                tracing::warn!(
                    "Worker link down ({}); reconnecting in {:?}",
                    error,
                    backoff
                );
                ctx.run_later(backoff, |act, ctx| act.connect(ctx));
            }
        }
    }
}

impl Handler<SendUpstream> for UpstreamActor {
    type Result = ResponseFuture<Result<BridgeResponse, BridgeError>>;

    fn handle(&mut self, msg: SendUpstream, ctx: &mut Self::Context) -> Self::Result {
        let SendUpstream(request) = msg;
        let request_id = request.request_id;

        let Some(sink) = self.sink.clone() else {
            let error = classify_link_failure(self.link_was_established, "no worker link");
            return Box::pin(async move { Err(error) });
        };

        let text = match serde_json::to_string(&WireFrame::Request(request)) {
            Ok(text) => text,
            Err(e) => {
                let error = BridgeError::Processing(format!("failed to serialize request: {}", e));
                return Box::pin(async move { Err(error) });
            }
        };

        let (reply, rx) = oneshot::channel();
        self.pending.insert(request_id, reply);

        // Drop the correlation entry once the deadline passes; a late
        // response then lands in the discard path.
        let timeout = self.request_timeout;
        ctx.run_later(timeout + Duration::from_millis(50), move |act, _ctx| {
            act.pending.remove(&request_id);
        });

        Box::pin(async move {
            if sink.send(WsMessage::Text(text)).await.is_err() {
                return Err(BridgeError::Send("worker link write failed".into()));
            }
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(BridgeError::Send("worker link dropped while waiting".into())),
                Err(_) => Err(BridgeError::Timeout(timeout)),
            }
        })
    }
}

impl Handler<Shutdown> for UpstreamActor {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) {
        ctx.stop();
    }
}

impl Handler<PushFrame> for UpstreamActor {
    type Result = ();

    fn handle(&mut self, msg: PushFrame, _ctx: &mut Self::Context) {
        let Some(sink) = &self.sink else {
            tracing::warn!("No worker link, frame dropped");
            return;
        };
        match serde_json::to_string(&msg.0) {
            Ok(text) => {
                if let Err(e) = sink.try_send(WsMessage::Text(text)) {
                    tracing::error!("Failed to queue frame for worker: {}", e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize frame: {}", e),
        }
    }
}
