use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::metrics;

/// JSON-RPC codes the browser uses for requests it could not understand.
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Upper bound for a heartbeat answer, whatever the command deadline.
const HEARTBEAT_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

/// Transport used when no browser endpoint is configured; every command fails.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, AdapterError> {
        Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("no browser endpoint configured; cannot send {method}")))
    }
}

type LinkFactory =
    Arc<dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<Link>, AdapterError>> + Send + Sync>;

/// Websocket transport over a chromiumoxide [`Connection`] to an already running browser.
///
/// The socket is opened lazily and reopened on the next call after it dies.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    link: Arc<OnceCell<Mutex<Option<Arc<Link>>>>>,
    factory: LinkFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: LinkFactory =
            Arc::new(|cfg: CdpConfig| Box::pin(async move { Link::open(cfg).await.map(Arc::new) }));
        Self::with_factory(cfg, factory)
    }

    fn with_factory(cfg: CdpConfig, factory: LinkFactory) -> Self {
        Self {
            cfg,
            link: Arc::new(OnceCell::new()),
            factory,
        }
    }

    async fn link(&self) -> Result<Arc<Link>, AdapterError> {
        let slot = self.link.get_or_init(|| async { Mutex::new(None) }).await;
        let mut current = slot.lock().await;
        match current.as_ref() {
            Some(link) if link.is_alive() => return Ok(Arc::clone(link)),
            Some(_) => debug!(target: "cdp-transport", "browser link is down; reopening"),
            None => {}
        }
        let link = (self.factory)(self.cfg.clone()).await?;
        *current = Some(Arc::clone(&link));
        Ok(link)
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        let link = self.link().await?;
        // Page targets are tracked through discovery; sessions for them only
        // exist once auto-attach (flattened) hands them out.
        link.request(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            self.deadline(),
        )
        .await?;
        link.request(
            CommandTarget::Browser,
            "Target.setAutoAttach",
            json!({ "autoAttach": true, "waitForDebuggerOnStart": false, "flatten": true }),
            self.deadline(),
        )
        .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.link().await {
            Ok(link) => link.next_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", %err, "no browser link for events");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.link()
            .await?
            .request(target, method, params, self.deadline())
            .await
    }
}

/// A command on its way to the socket loop.
struct Outgoing {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: oneshot::Sender<Result<Value, AdapterError>>,
}

/// A command the browser has not answered yet.
struct Pending {
    method: String,
    reply: oneshot::Sender<Result<Value, AdapterError>>,
}

type PendingCalls = HashMap<CallId, Pending>;

/// One open websocket plus the tasks driving it.
struct Link {
    outgoing: mpsc::Sender<Outgoing>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    socket_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
}

impl Link {
    async fn open(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let ws_url = cfg.websocket_url.clone().ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint("websocket_url is required to reach a running browser")
        })?;

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("connect {ws_url}: {err}"))
                    .retriable(true)
            })?;

        let (outgoing, outgoing_rx) = mpsc::channel(128);
        let (events_tx, events) = mpsc::channel(256);
        let alive = Arc::new(AtomicBool::new(true));

        let socket_alive = Arc::clone(&alive);
        let socket_task = tokio::spawn(async move {
            let outcome = drive_socket(conn, outgoing_rx, events_tx).await;
            socket_alive.store(false, Ordering::Relaxed);
            if let Err(err) = outcome {
                error!(target: "cdp-transport", %err, "browser link closed with error");
            }
        });

        let heartbeat_task = spawn_heartbeat(
            outgoing.clone(),
            Arc::clone(&alive),
            Duration::from_millis(cfg.heartbeat_interval_ms),
            Duration::from_millis(cfg.default_deadline_ms).min(HEARTBEAT_DEADLINE),
        );

        info!(target: "cdp-transport", url = %ws_url, "connected to browser");
        Ok(Self {
            outgoing,
            events: Mutex::new(events),
            socket_task,
            heartbeat_task,
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn request(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        round_trip(&self.outgoing, target, method, params, deadline).await
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.socket_task.abort();
        if let Some(heartbeat) = &self.heartbeat_task {
            heartbeat.abort();
        }
    }
}

/// Queues one command for the socket loop and waits for its answer.
async fn round_trip(
    outgoing: &mpsc::Sender<Outgoing>,
    target: CommandTarget,
    method: &str,
    params: Value,
    deadline: Duration,
) -> Result<Value, AdapterError> {
    let (reply, answer) = oneshot::channel();
    outgoing
        .send(Outgoing {
            target,
            method: method.to_string(),
            params,
            reply,
        })
        .await
        .map_err(|_| {
            AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{method}: browser link is closed"))
        })?;

    match tokio::time::timeout(deadline, answer).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("{method}: reply dropped"))),
        Err(_) => Err(AdapterError::new(AdapterErrorKind::CommandTimeout)
            .with_hint(format!("{method} timed out after {}ms", deadline.as_millis()))
            .retriable(true)),
    }
}

/// Pings the browser until a ping fails; a failed ping marks the link dead.
fn spawn_heartbeat(
    outgoing: mpsc::Sender<Outgoing>,
    alive: Arc<AtomicBool>,
    every: Duration,
    deadline: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;
            let ping = round_trip(
                &outgoing,
                CommandTarget::Browser,
                "Browser.getVersion",
                json!({}),
                deadline,
            )
            .await;
            if let Err(err) = ping {
                warn!(target: "cdp-transport", %err, "heartbeat failed");
                alive.store(false, Ordering::Relaxed);
                break;
            }
        }
    }))
}

/// Multiplexes queued commands onto the socket and routes replies and events back.
async fn drive_socket(
    mut conn: Connection<CdpEventMessage>,
    mut outgoing: mpsc::Receiver<Outgoing>,
    events: mpsc::Sender<TransportEvent>,
) -> Result<(), AdapterError> {
    let mut pending = PendingCalls::new();

    loop {
        tokio::select! {
            Some(command) = outgoing.recv() => submit(&mut conn, command, &mut pending),
            message = conn.next() => match message {
                Some(Ok(Message::Response(response))) => settle(response, &mut pending),
                Some(Ok(Message::Event(event))) => forward_event(event, &events),
                Some(Err(err)) => {
                    let err = map_cdp_error(err);
                    fail_pending(&mut pending, &err);
                    return Err(err);
                }
                None => {
                    let err = AdapterError::new(AdapterErrorKind::CdpIo)
                        .with_hint("browser closed the connection");
                    fail_pending(&mut pending, &err);
                    return Ok(());
                }
            },
        }
    }
}

fn submit(conn: &mut Connection<CdpEventMessage>, command: Outgoing, pending: &mut PendingCalls) {
    let session = match command.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(session) => Some(CdpSessionId::from(session)),
    };
    let method_id: MethodId = command.method.clone().into();
    match conn.submit_command(method_id, session, command.params) {
        Ok(call) => {
            pending.insert(
                call,
                Pending {
                    method: command.method,
                    reply: command.reply,
                },
            );
        }
        Err(err) => {
            // Only this command is lost; the socket itself is still usable.
            let _ = command.reply.send(Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{}: {err}", command.method))));
        }
    }
}

fn settle(response: Response, pending: &mut PendingCalls) {
    let Some(call) = pending.remove(&response.id) else {
        debug!(target: "cdp-transport", id = ?response.id, "reply for unknown call");
        return;
    };
    let outcome = match (response.result, response.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(classify_protocol_error(
            &call.method,
            error.code,
            &error.message,
        )),
        (None, None) => Err(AdapterError::new(AdapterErrorKind::Protocol)
            .with_hint(format!("{}: empty reply", call.method))),
    };
    let _ = call.reply.send(outcome);
}

fn fail_pending(pending: &mut PendingCalls, err: &AdapterError) {
    for (_, call) in pending.drain() {
        let hint = format!("{}: {}", call.method, err.hint.as_deref().unwrap_or("link lost"));
        let _ = call.reply.send(Err(err.clone().with_hint(hint)));
    }
}

/// The adapter only tracks targets; every other domain's events are dropped here.
fn is_forwarded(method: &str) -> bool {
    method.starts_with("Target.")
}

fn forward_event(event: CdpEventMessage, events: &mpsc::Sender<TransportEvent>) {
    let raw: CdpJsonEventMessage = match event.try_into() {
        Ok(raw) => raw,
        Err(err) => {
            warn!(target: "cdp-transport", %err, "undecodable event");
            return;
        }
    };
    if !is_forwarded(&raw.method) {
        return;
    }
    let event = TransportEvent {
        method: raw.method.into_owned(),
        params: raw.params,
        session_id: raw.session_id,
    };
    // Never stall the socket on a slow consumer.
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            metrics::record_event_dropped(&event.method);
            warn!(
                target: "cdp-transport",
                method = %event.method,
                "event queue full; event dropped"
            );
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

fn classify_protocol_error(method: &str, code: i64, message: &str) -> AdapterError {
    let hint = format!("{method}: {message} ({code})");
    let lowered = message.to_ascii_lowercase();
    let kind = if code == METHOD_NOT_FOUND || code == INVALID_PARAMS {
        AdapterErrorKind::Protocol
    } else if lowered.contains("session with given id not found") {
        AdapterErrorKind::MissingSession
    } else if lowered.contains("no target")
        || (lowered.contains("frame") && lowered.contains("not found"))
    {
        AdapterErrorKind::TargetNotFound
    } else {
        AdapterErrorKind::CdpIo
    };
    AdapterError::new(kind)
        .with_hint(hint)
        .with_data(json!({ "method": method, "code": code, "message": message }))
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::CommandTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::Serde(_) => AdapterError::new(AdapterErrorKind::Protocol).with_hint(hint),
        CdpError::FrameNotFound(_) | CdpError::NotFound => {
            AdapterError::new(AdapterErrorKind::TargetNotFound).with_hint(hint)
        }
        _ => AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// A link whose socket loop never runs; `alive` is handed back to flip it.
    fn idle_link() -> (Arc<Link>, Arc<AtomicBool>) {
        let (outgoing, _outgoing_rx) = mpsc::channel(8);
        let (_events_tx, events) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let link = Link {
            outgoing,
            events: Mutex::new(events),
            socket_task: tokio::spawn(futures::future::pending::<()>()),
            heartbeat_task: None,
            alive: Arc::clone(&alive),
        };
        (Arc::new(link), alive)
    }

    #[tokio::test]
    async fn dead_link_is_reopened_on_next_use() {
        let opened = Arc::new(AtomicUsize::new(0));
        let switches: Arc<Mutex<Vec<Arc<AtomicBool>>>> = Arc::new(Mutex::new(Vec::new()));
        let factory: LinkFactory = {
            let opened = Arc::clone(&opened);
            let switches = Arc::clone(&switches);
            Arc::new(move |_cfg: CdpConfig| {
                let opened = Arc::clone(&opened);
                let switches = Arc::clone(&switches);
                Box::pin(async move {
                    opened.fetch_add(1, Ordering::SeqCst);
                    let (link, alive) = idle_link();
                    switches.lock().await.push(alive);
                    Ok(link)
                })
            })
        };
        let transport = ChromiumTransport::with_factory(CdpConfig::default(), factory);

        let first = transport.link().await.expect("first link");
        let reused = transport.link().await.expect("reused link");
        assert!(Arc::ptr_eq(&first, &reused));
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        switches.lock().await[0].store(false, Ordering::SeqCst);
        let reopened = transport.link().await.expect("reopened link");
        assert!(!Arc::ptr_eq(&first, &reopened));
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_endpoint_is_rejected() {
        let cfg = CdpConfig {
            websocket_url: None,
            ..CdpConfig::default()
        };
        let err = match Link::open(cfg).await {
            Ok(_) => panic!("a link needs an endpoint"),
            Err(err) => err,
        };
        assert_eq!(err.kind, AdapterErrorKind::Internal);
    }

    #[tokio::test]
    async fn noop_transport_fails_commands() {
        let transport = NoopTransport;
        transport.start().await.expect("noop start");
        assert!(transport.next_event().await.is_none());
        let err = transport
            .send_command(CommandTarget::Browser, "DOM.getDocument", Value::Null)
            .await
            .expect_err("noop transport has no browser");
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(err.to_string().contains("DOM.getDocument"));
    }

    #[tokio::test]
    async fn closed_link_names_the_method() {
        let (outgoing, outgoing_rx) = mpsc::channel(1);
        drop(outgoing_rx);
        let err = round_trip(
            &outgoing,
            CommandTarget::Browser,
            "Page.getFrameTree",
            json!({}),
            Duration::from_millis(50),
        )
        .await
        .expect_err("closed link");
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(err.to_string().contains("Page.getFrameTree"));
    }

    #[test]
    fn protocol_errors_are_classified() {
        let unknown = classify_protocol_error(
            "DOMSnapshot.captureSnapshot",
            METHOD_NOT_FOUND,
            "'DOMSnapshot.captureSnapshot' wasn't found",
        );
        assert_eq!(unknown.kind, AdapterErrorKind::Protocol);

        let session =
            classify_protocol_error("DOM.getDocument", -32001, "Session with given id not found.");
        assert_eq!(session.kind, AdapterErrorKind::MissingSession);
        let data = session.data.expect("protocol error payload");
        assert_eq!(data["code"], -32001);
        assert_eq!(data["method"], "DOM.getDocument");

        let target = classify_protocol_error(
            "Target.attachToTarget",
            -32000,
            "No target with given id found",
        );
        assert_eq!(target.kind, AdapterErrorKind::TargetNotFound);

        let other =
            classify_protocol_error("Accessibility.getFullAXTree", -32000, "Internal error");
        assert_eq!(other.kind, AdapterErrorKind::CdpIo);
        assert!(!other.retriable);
        assert!(other.to_string().contains("Accessibility.getFullAXTree"));
    }

    #[test]
    fn only_target_events_are_forwarded() {
        assert!(is_forwarded("Target.targetDestroyed"));
        assert!(is_forwarded("Target.attachedToTarget"));
        assert!(!is_forwarded("DOM.documentUpdated"));
        assert!(!is_forwarded("Accessibility.loadComplete"));
    }
}
