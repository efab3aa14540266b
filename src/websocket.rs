//! # Assistant WebSocket Handler
//!
//! `/ws/assistant` upgrade and the actor that owns one session. Payload shapes live in
//! [`crate::protocol`]; this module only moves frames between the socket and the agent.
//!
//! ## Session Lifecycle:
//! 1. **Connect**: a session id is allocated in the registry and an agent is built. A full
//!    registry gets an `error` event and the socket is closed
//! 2. **Frames**: every inbound binary or text frame is queued to one worker task per
//!    session, which runs turns strictly in arrival order
//! 3. **Heartbeat**: the server pings every 30 s and drops peers silent for 60 s
//! 4. **Disconnect**: the worker is aborted (an in-flight turn is discarded) and the
//!    registry entry removed, whatever the reason for stopping
//!
//! ## Key Rust Concepts:
//! - **Actor model**: the actor owns the socket; the worker talks back to it through
//!   `Addr::do_send`, never touching the socket directly
//! - **Channels**: `tokio::sync::mpsc` gives the worker an ordered queue without blocking
//!   the actor
//! - **catch_unwind**: a panicking turn is reported to the peer and ends the session
//!   instead of leaving a dangling registry entry

use crate::pipeline::AudioBuffer;
use crate::protocol::{self, Outbound, Reply, ServerEvent};
use crate::session::SharedAgent;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
/// Whole utterances arrive as single frames.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One queued inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Audio(Vec<u8>),
    Text(String),
}

/// Format assumed for raw (non-WAV) audio frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// What the worker hands back to the actor.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Send(Outbound),
    /// The session cannot continue.
    Fatal(String),
}

async fn process_frame(agent: &SharedAgent, frame: Frame, input: InputFormat) -> Reply {
    let mut agent = agent.lock().await;
    match frame {
        Frame::Audio(bytes) => {
            let audio = AudioBuffer::wav(bytes, input.sample_rate, input.channels);
            protocol::handle_audio(&mut agent, audio).await
        }
        Frame::Text(text) => protocol::handle_text(&mut agent, &text).await,
    }
}

/// Start the task that runs one session's turns in order.
///
/// Must be called from within the actix runtime. The task ends when the sender is
/// dropped, or after a panicking turn, which removes the session from the registry and
/// is reported through `deliver`.
pub fn spawn_worker<F>(
    connection_id: String,
    agent: SharedAgent,
    state: AppState,
    input: InputFormat,
    deliver: F,
) -> (mpsc::UnboundedSender<Frame>, JoinHandle<()>)
where
    F: Fn(WorkerEvent) + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let handle = actix::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match AssertUnwindSafe(process_frame(&agent, frame, input)).catch_unwind().await {
                Ok(reply) => {
                    if let Some(outcome) = reply.turn {
                        state.record_turn(outcome);
                    }
                    for outbound in reply.frames {
                        deliver(WorkerEvent::Send(outbound));
                    }
                }
                Err(_) => {
                    error!(connection_id = %connection_id, "Turn processing panicked, closing session");
                    state.sessions.remove(&connection_id);
                    deliver(WorkerEvent::Fatal("internal error while processing the request".to_string()));
                    break;
                }
            }
        }
    });

    (tx, handle)
}

/// Delivered to the actor by its worker.
#[derive(Message)]
#[rtype(result = "()")]
struct Deliver(WorkerEvent);

/// WebSocket actor for one assistant session.
pub struct AssistantWebSocket {
    state: web::Data<AppState>,
    connection_id: Option<String>,
    frames: Option<mpsc::UnboundedSender<Frame>>,
    worker: Option<JoinHandle<()>>,
    last_heartbeat: Instant,
}

impl AssistantWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            state,
            connection_id: None,
            frames: None,
            worker: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: ServerEvent) {
        write_frame(ctx, event.into());
    }

    /// Send an error event and close the socket.
    fn fail(&mut self, ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        warn!(connection_id = ?self.connection_id, "Closing session: {}", message);
        self.send_event(ctx, ServerEvent::error(message));
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Error,
            description: Some(message.to_string()),
        }));
        ctx.stop();
    }

    fn enqueue(&mut self, frame: Frame, ctx: &mut ws::WebsocketContext<Self>) {
        let queued = match &self.frames {
            Some(frames) => frames.send(frame).is_ok(),
            None => false,
        };
        if !queued {
            self.fail(ctx, "session is no longer available");
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = ?act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

fn write_frame(ctx: &mut ws::WebsocketContext<AssistantWebSocket>, frame: Outbound) {
    match frame {
        Outbound::Text(text) => ctx.text(text),
        Outbound::Binary(bytes) => ctx.binary(bytes),
    }
}

impl Actor for AssistantWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let state = self.state.clone();
        let opened = state.sessions.open(|id| state.factory.build_agent(id));

        let (connection_id, agent) = match opened {
            Ok(session) => session,
            Err(err) => {
                self.fail(ctx, &format!("{:#}", err));
                return;
            }
        };

        info!(connection_id = %connection_id, "New voice assistant connection");

        let input = InputFormat {
            sample_rate: state.config.pipeline.input_sample_rate,
            channels: state.config.pipeline.input_channels,
        };
        let addr = ctx.address();
        let (frames, worker) = spawn_worker(
            connection_id.clone(),
            agent,
            state.get_ref().clone(),
            input,
            move |event| addr.do_send(Deliver(event)),
        );

        self.connection_id = Some(connection_id);
        self.frames = Some(frames);
        self.worker = Some(worker);
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.frames = None;
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if let Some(id) = self.connection_id.take() {
            self.state.sessions.remove(&id);
            info!(connection_id = %id, "WebSocket disconnected");
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AssistantWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Binary(data)) => {
                debug!(connection_id = ?self.connection_id, bytes = data.len(), "Queued audio frame");
                self.enqueue(Frame::Audio(data.to_vec()), ctx);
            }
            Ok(ws::Message::Text(text)) => {
                self.enqueue(Frame::Text(text.to_string()), ctx);
            }
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = ?self.connection_id, "WebSocket closed by peer: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = ?self.connection_id, "WebSocket protocol error: {}", err);
                self.fail(ctx, &format!("protocol error: {}", err));
            }
        }
    }
}

impl Handler<Deliver> for AssistantWebSocket {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        match msg.0 {
            WorkerEvent::Send(frame) => write_frame(ctx, frame),
            WorkerEvent::Fatal(message) => self.fail(ctx, &message),
        }
    }
}

/// `GET /ws/assistant`
pub async fn assistant_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    ws::WsResponseBuilder::new(AssistantWebSocket::new(state), &req, stream)
        .frame_size(MAX_FRAME_SIZE)
        .start()
}
