use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use sync_core::{
    ChannelState, ChannelStateMachine, ConversationId, EventDispatcher, InboundEvent,
    OutboundEvent, Subscription, SyncError, SyncErrorCategory, decode_inbound_frame,
    encode_outbound_frame,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{DEFAULT_CONNECT_TIMEOUT, join_segments};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type StateCell = Arc<Mutex<ChannelStateMachine>>;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// What the transport hands to its dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A normalized inbound frame.
    Inbound(InboundEvent),
    /// The channel moved to a new state.
    StateChanged(ChannelState),
}

#[derive(Debug)]
struct LiveConnection {
    conversation_id: ConversationId,
    outbound_tx: mpsc::UnboundedSender<String>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// One push channel per conversation, over WebSocket.
///
/// `open` closes any previous channel first, so at most one live connection
/// exists per transport. Inbound frames are normalized and delivered through
/// [`WsTransport::dispatcher`] on the connection task, after the
/// `Connected` state change.
#[derive(Debug)]
pub struct WsTransport {
    ws_base_url: Url,
    connect_timeout: Duration,
    dispatcher: EventDispatcher<TransportEvent>,
    state: StateCell,
    live: Mutex<Option<LiveConnection>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl WsTransport {
    pub fn new(ws_base_url: Url) -> Self {
        Self {
            ws_base_url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            dispatcher: EventDispatcher::new(),
            state: Arc::new(Mutex::new(ChannelStateMachine::default())),
            live: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Register a handler for transport events.
    pub fn subscribe<F>(&self, handler: F) -> Subscription<TransportEvent>
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(handler)
    }

    pub fn state(&self) -> ChannelState {
        lock_state(&self.state).state()
    }

    /// Conversation the live connection belongs to, if any.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.live_slot()
            .as_ref()
            .map(|live| live.conversation_id.clone())
    }

    pub async fn open(&self, conversation_id: &ConversationId) -> Result<(), SyncError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_live().await;

        let url = join_segments(&self.ws_base_url, &["chat", conversation_id.as_str()])?;
        let connecting = lock_state(&self.state).begin_open()?;
        self.dispatcher
            .dispatch(&TransportEvent::StateChanged(connecting));
        info!(conversation_id = %conversation_id, url = %url, "opening push channel");

        let stream = match timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(err)) => {
                return Err(self.fail_open(conversation_id, "ws_connect_failed", err.to_string()));
            }
            Err(_) => {
                return Err(self.fail_open(
                    conversation_id,
                    "ws_connect_timeout",
                    format!("no handshake within {:?}", self.connect_timeout),
                ));
            }
        };

        let (sink, source) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_connection(Connection {
            conversation_id: conversation_id.clone(),
            sink,
            source,
            outbound_rx,
            stop: stop.child_token(),
            dispatcher: self.dispatcher.clone(),
            state: Arc::clone(&self.state),
            ready_tx,
        }));
        *self.live_slot() = Some(LiveConnection {
            conversation_id: conversation_id.clone(),
            outbound_tx,
            stop,
            task,
        });

        ready_rx.await.map_err(|_| {
            SyncError::new(
                SyncErrorCategory::Internal,
                "ws_task_exited",
                "connection task ended before reporting ready",
            )
        })
    }

    /// Queue one outbound event.
    ///
    /// A no-op unless the channel is `Connected`; dropped sends are not
    /// queued for later delivery.
    pub fn send(&self, event: &OutboundEvent) {
        if !lock_state(&self.state).is_connected() {
            debug!(state = ?self.state(), "channel not connected; dropping outbound event");
            return;
        }

        let frame = match encode_outbound_frame(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to encode outbound event");
                return;
            }
        };

        let queued = self
            .live_slot()
            .as_ref()
            .is_some_and(|live| live.outbound_tx.send(frame).is_ok());
        if !queued {
            debug!("connection task gone; dropping outbound event");
        }
    }

    /// Close the live connection. Closing twice is a no-op.
    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_live().await;
    }

    async fn shutdown_live(&self) {
        let live = self.live_slot().take();
        if let Some(mut live) = live {
            info!(conversation_id = %live.conversation_id, "closing push channel");
            live.stop.cancel();
            if timeout(CLOSE_GRACE, &mut live.task).await.is_err() {
                warn!(conversation_id = %live.conversation_id, "connection task did not stop in time; aborting");
                live.task.abort();
            }
        }
        apply_state(&self.state, &self.dispatcher, ChannelStateMachine::on_closed);
    }

    fn fail_open(
        &self,
        conversation_id: &ConversationId,
        code: &str,
        message: String,
    ) -> SyncError {
        warn!(conversation_id = %conversation_id, %message, "push channel open failed");
        apply_state(&self.state, &self.dispatcher, ChannelStateMachine::on_failure);
        SyncError::new(SyncErrorCategory::Connection, code, message)
    }

    fn live_slot(&self) -> MutexGuard<'_, Option<LiveConnection>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(live) = self.live_slot().take() {
            live.stop.cancel();
            live.task.abort();
        }
    }
}

fn lock_state(state: &Mutex<ChannelStateMachine>) -> MutexGuard<'_, ChannelStateMachine> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run a transition and dispatch the new state if it changed.
fn apply_state(
    state: &Mutex<ChannelStateMachine>,
    dispatcher: &EventDispatcher<TransportEvent>,
    transition: impl FnOnce(&mut ChannelStateMachine) -> Option<ChannelState>,
) {
    let changed = transition(&mut lock_state(state));
    if let Some(next) = changed {
        debug!(state = ?next, "channel state changed");
        dispatcher.dispatch(&TransportEvent::StateChanged(next));
    }
}

struct Connection {
    conversation_id: ConversationId,
    sink: SplitSink<WsStream, Message>,
    source: SplitStream<WsStream>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    stop: CancellationToken,
    dispatcher: EventDispatcher<TransportEvent>,
    state: StateCell,
    ready_tx: oneshot::Sender<()>,
}

enum ConnectionEnd {
    Cancelled,
    ClosedByPeer,
    Failed(String),
}

async fn run_connection(connection: Connection) {
    let Connection {
        conversation_id,
        mut sink,
        mut source,
        mut outbound_rx,
        stop,
        dispatcher,
        state,
        ready_tx,
    } = connection;

    apply_state(&state, &dispatcher, |machine| machine.on_connected().ok());
    let _ = ready_tx.send(());
    info!(conversation_id = %conversation_id, "push channel connected");

    let end = loop {
        tokio::select! {
            _ = stop.cancelled() => break ConnectionEnd::Cancelled,
            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else {
                    break ConnectionEnd::Cancelled;
                };
                if let Err(err) = sink.send(Message::Text(frame)).await {
                    break ConnectionEnd::Failed(err.to_string());
                }
            }
            inbound = source.next() => match inbound {
                Some(Ok(Message::Text(text))) => deliver_frame(&dispatcher, &conversation_id, &text),
                Some(Ok(Message::Close(_))) | None => break ConnectionEnd::ClosedByPeer,
                Some(Ok(_)) => {}
                Some(Err(err)) => break ConnectionEnd::Failed(err.to_string()),
            },
        }
    };

    match end {
        ConnectionEnd::Cancelled => {
            let _ = timeout(CLOSE_GRACE, sink.send(Message::Close(None))).await;
            debug!(conversation_id = %conversation_id, "connection task stopped");
        }
        ConnectionEnd::ClosedByPeer => {
            info!(conversation_id = %conversation_id, "push channel closed by server");
            apply_state(&state, &dispatcher, ChannelStateMachine::on_closed);
        }
        ConnectionEnd::Failed(message) => {
            warn!(conversation_id = %conversation_id, %message, "push channel dropped");
            apply_state(&state, &dispatcher, ChannelStateMachine::on_failure);
        }
    }
}

fn deliver_frame(
    dispatcher: &EventDispatcher<TransportEvent>,
    conversation_id: &ConversationId,
    text: &str,
) {
    match decode_inbound_frame(text) {
        Ok(Some(event)) => dispatcher.dispatch(&TransportEvent::Inbound(event)),
        Ok(None) => {}
        Err(err) => {
            warn!(conversation_id = %conversation_id, error = %err, "dropping malformed frame");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use tokio::{net::TcpListener, sync::mpsc::UnboundedReceiver};
    use tokio_tungstenite::{
        accept_async, accept_hdr_async,
        tungstenite::handshake::server::{ErrorResponse, Request, Response},
    };

    use super::*;

    pub(crate) const WAIT: Duration = Duration::from_secs(5);

    pub(crate) async fn bind_server() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let url = Url::parse(&format!("ws://{addr}")).expect("ws url");
        (listener, url)
    }

    pub(crate) async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (tcp, _) = listener.accept().await.expect("accept connection");
        accept_async(tcp).await.expect("websocket handshake")
    }

    pub(crate) async fn next_text(server: &mut WebSocketStream<TcpStream>) -> Option<String> {
        loop {
            match timeout(WAIT, server.next()).await.expect("server read timed out") {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => {}
            }
        }
    }

    fn record(transport: &WsTransport) -> (Subscription<TransportEvent>, UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = transport.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (sub, rx)
    }

    async fn next_event(rx: &mut UnboundedReceiver<TransportEvent>) -> TransportEvent {
        timeout(WAIT, rx.recv())
            .await
            .expect("transport event timed out")
            .expect("dispatcher alive")
    }

    #[tokio::test]
    async fn connects_to_the_conversation_path_and_delivers_frames_in_order() {
        let (listener, url) = bind_server().await;
        let (path_tx, path_rx) = oneshot::channel();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept connection");
            let mut ws = accept_hdr_async(tcp, move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let _ = path_tx.send(request.uri().path().to_owned());
                Ok(response)
            })
            .await
            .expect("websocket handshake");
            for frame in [
                r#"{"type":"typing_indicator","is_typing":true}"#,
                r#"{"type":"system_message","content":"ignored"}"#,
                r#"not json"#,
                r#"{"type":"persona_response","content":"hello"}"#,
            ] {
                ws.send(Message::Text(frame.to_owned()))
                    .await
                    .expect("server send");
            }
            ws
        });

        let transport = WsTransport::new(url);
        let (_sub, mut rx) = record(&transport);
        transport
            .open(&ConversationId::new("conv-1"))
            .await
            .expect("open should succeed");

        assert_eq!(path_rx.await.expect("path captured"), "/chat/conv-1");
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::StateChanged(ChannelState::Connecting)
        );
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::StateChanged(ChannelState::Connected)
        );
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Inbound(InboundEvent::Typing { is_typing: true })
        );
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Inbound(InboundEvent::PeerMessage {
                content: "hello".into()
            })
        );
        assert_eq!(transport.conversation_id(), Some(ConversationId::new("conv-1")));

        let _server = server.await.expect("server task");
        transport.close().await;
    }

    #[tokio::test]
    async fn sends_encoded_frames_only_while_connected() {
        let (listener, url) = bind_server().await;
        let transport = WsTransport::new(url);
        let message = OutboundEvent::UserMessage {
            content: "hi there".into(),
        };

        transport.send(&message);
        assert_eq!(transport.state(), ChannelState::Disconnected);

        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            next_text(&mut ws).await
        });
        transport
            .open(&ConversationId::new("conv-2"))
            .await
            .expect("open should succeed");
        transport.send(&message);

        let received = server.await.expect("server task").expect("frame received");
        let frame: serde_json::Value = serde_json::from_str(&received).expect("json frame");
        assert_eq!(frame["type"], "user_message");
        assert_eq!(frame["content"], "hi there");
        transport.close().await;
    }

    #[tokio::test]
    async fn failed_open_reports_failed_and_can_be_retried() {
        let (listener, url) = bind_server().await;
        let addr = listener.local_addr().expect("listener address");
        drop(listener);

        let transport = WsTransport::new(url);
        let (_sub, mut rx) = record(&transport);
        let err = transport
            .open(&ConversationId::new("conv-3"))
            .await
            .expect_err("nothing is listening");

        assert_eq!(err.category, SyncErrorCategory::Connection);
        assert_eq!(err.code, "ws_connect_failed");
        assert_eq!(transport.state(), ChannelState::Failed);
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::StateChanged(ChannelState::Connecting)
        );
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::StateChanged(ChannelState::Failed)
        );

        transport.send(&OutboundEvent::UserMessage {
            content: "dropped".into(),
        });

        let listener = TcpListener::bind(addr).await.expect("rebind listener");
        let server = tokio::spawn(async move { accept(&listener).await });
        transport
            .open(&ConversationId::new("conv-3"))
            .await
            .expect("retry should connect");
        assert_eq!(transport.state(), ChannelState::Connected);
        let _server = server.await.expect("server task");
        transport.close().await;
    }

    #[tokio::test]
    async fn server_close_moves_to_disconnected() {
        let (listener, url) = bind_server().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            ws.close(None).await.expect("server close");
        });

        let transport = WsTransport::new(url);
        let (_sub, mut rx) = record(&transport);
        transport
            .open(&ConversationId::new("conv-4"))
            .await
            .expect("open should succeed");
        server.await.expect("server task");

        let mut last = None;
        while last != Some(TransportEvent::StateChanged(ChannelState::Disconnected)) {
            last = Some(next_event(&mut rx).await);
        }
        assert_eq!(transport.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn reopening_closes_the_previous_connection() {
        let (listener, url) = bind_server().await;
        let server = tokio::spawn(async move {
            let mut first = accept(&listener).await;
            let second = accept(&listener).await;
            let first_ended = next_text(&mut first).await.is_none();
            (first_ended, second)
        });

        let transport = WsTransport::new(url);
        transport
            .open(&ConversationId::new("conv-a"))
            .await
            .expect("first open");
        transport
            .open(&ConversationId::new("conv-b"))
            .await
            .expect("second open");

        let (first_ended, _second) = server.await.expect("server task");
        assert!(first_ended);
        assert_eq!(transport.conversation_id(), Some(ConversationId::new("conv-b")));
        assert_eq!(transport.state(), ChannelState::Connected);
        transport.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (listener, url) = bind_server().await;
        let server = tokio::spawn(async move { accept(&listener).await });
        let transport = WsTransport::new(url);
        transport
            .open(&ConversationId::new("conv-5"))
            .await
            .expect("open should succeed");
        let _server = server.await.expect("server task");

        transport.close().await;
        transport.close().await;

        assert_eq!(transport.state(), ChannelState::Disconnected);
        assert_eq!(transport.conversation_id(), None);
    }
}
