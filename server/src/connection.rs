use actix::{Actor, ActorContext, AsyncContext, Handler, Message, Running, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{channel, Sender};

use system::codec::{Frame, WireFormat};
use system::{ConnectionId, RejectReason, SessionCommand, SessionEvent};

use crate::config::ServerConfig;
use crate::connection_tx_storage::ConnectionTx;
use crate::server::ServerTx;

#[derive(Debug)]
pub enum ConnectionCommand {
    Connect {
        tx: ConnectionTx,
    },
    Disconnect {
        from: ConnectionId,
    },
    SessionCommand {
        from: ConnectionId,
        command: SessionCommand,
    },
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Connected { connection_id: ConnectionId },
    SessionEvent(SessionEvent),
}

#[derive(Message)]
#[rtype(result = "()")]
enum ConnectionActorMessage {
    Event(ConnectionEvent),
    /// Every sender of the egress channel is gone: the server no longer knows
    /// this connection.
    Released,
}

enum ConnectionState {
    Idle,
    Connected {
        id: ConnectionId,
        ingress: Sender<SessionCommand>,
    },
    Closed,
}

/// Commands that arrived before the server assigned an id.
struct Backlog {
    commands: Vec<SessionCommand>,
    limit: usize,
}

impl Backlog {
    fn new(limit: usize) -> Self {
        Self {
            commands: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, command: SessionCommand) -> Result<(), RejectReason> {
        if self.commands.len() >= self.limit {
            return Err(RejectReason::NotJoined);
        }
        self.commands.push(command);
        Ok(())
    }

    fn take(&mut self) -> Vec<SessionCommand> {
        std::mem::take(&mut self.commands)
    }
}

/// Decodes one ingress frame. A frame that doesn't decode is answered with
/// `Rejected(Malformed)` and goes no further.
fn decode_command(format: WireFormat, bytes: &[u8]) -> Result<SessionCommand, SessionEvent> {
    format.decode::<SessionCommand>(bytes).map_err(|e| {
        log::warn!("Malformed message: {}", e);
        SessionEvent::Rejected(RejectReason::Malformed)
    })
}

/// Carries one connection's commands to the server in arrival order. Once the
/// actor drops its end, reports the disconnect after the last command.
fn spawn_forwarder(
    from: ConnectionId,
    srv_tx: ServerTx,
    capacity: usize,
) -> Sender<SessionCommand> {
    let (tx, mut rx) = channel::<SessionCommand>(capacity);

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let command = ConnectionCommand::SessionCommand { from, command };
            if let Err(e) = srv_tx.send(command).await {
                log::error!("Server is gone; dropped {:?}", e.0);
                return;
            }
        }
        if let Err(e) = srv_tx.send(ConnectionCommand::Disconnect { from }).await {
            log::error!("Server is gone; dropped {:?}", e.0);
        }
    });

    tx
}

struct ConnectionActor {
    state: ConnectionState,
    srv_tx: ServerTx,
    queue_capacity: usize,
    backlog: Backlog,
    /// Egress mirrors the encoding of the latest ingress frame.
    format: WireFormat,
}

impl ConnectionActor {
    fn ingress(&mut self, format: WireFormat, bytes: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        log::debug!("Ingress size: {}", bytes.len());
        self.format = format;
        let command = match decode_command(format, bytes) {
            Ok(command) => command,
            Err(rejection) => return self.egress(&rejection, ctx),
        };
        log::debug!("Ingress {:?}", command);

        match &self.state {
            ConnectionState::Connected { id, ingress } => match ingress.try_send(command) {
                Ok(()) => (),
                Err(TrySendError::Full(_)) => {
                    log::warn!("Connection {} overran its ingress queue; closing", id);
                    ctx.close(Some(ws::CloseReason {
                        code: ws::CloseCode::Policy,
                        description: Some("too many messages".to_owned()),
                    }));
                    ctx.stop();
                }
                Err(TrySendError::Closed(_)) => log::debug!("Connection {} is shutting down", id),
            },
            ConnectionState::Idle => {
                if let Err(reason) = self.backlog.push(command) {
                    self.egress(&SessionEvent::Rejected(reason), ctx);
                }
            }
            ConnectionState::Closed => (),
        }
    }

    fn egress(&self, event: &SessionEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match self.format.encode(event) {
            Ok(Frame::Binary(bytes)) => ctx.binary(bytes),
            Ok(Frame::Text(text)) => ctx.text(text),
            Err(e) => log::error!("Failed to encode {:?}: {}", event, e),
        }
    }

    /// Dropping the ingress sender makes the forwarder report the disconnect.
    fn leave(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, mut rx) = channel::<ConnectionEvent>(self.queue_capacity);

        if let Err(e) = self.srv_tx.try_send(ConnectionCommand::Connect { tx }) {
            log::error!("Server refused a new connection: {}", e);
            ctx.stop();
            return;
        }

        let addr = ctx.address().recipient();
        let srv_tx = self.srv_tx.clone();

        tokio::spawn(async move {
            log::debug!("connection green thread - started");
            while let Some(event) = rx.recv().await {
                let registered = match &event {
                    ConnectionEvent::Connected { connection_id } => Some(*connection_id),
                    ConnectionEvent::SessionEvent(_) => None,
                };
                if addr.send(ConnectionActorMessage::Event(event)).await.is_err() {
                    if let Some(from) = registered {
                        // the socket went away before registration completed
                        if let Err(e) = srv_tx.send(ConnectionCommand::Disconnect { from }).await {
                            log::error!("Server is gone; dropped {:?}", e.0);
                        }
                    }
                    break;
                }
            }
            addr.do_send(ConnectionActorMessage::Released);
            log::debug!("connection green thread - terminated");
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        self.leave();
        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Binary(bin)) => self.ingress(WireFormat::Bincode, &bin, ctx),
            Ok(ws::Message::Text(text)) => self.ingress(WireFormat::Json, text.as_bytes(), ctx),
            Ok(ws::Message::Close(reason)) => {
                self.leave();
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => (),
            Err(e) => {
                log::warn!("Websocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// Egress
impl Handler<ConnectionActorMessage> for ConnectionActor {
    type Result = ();

    fn handle(
        &mut self,
        msg: ConnectionActorMessage,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> Self::Result {
        match msg {
            ConnectionActorMessage::Event(ConnectionEvent::Connected { connection_id }) => {
                log::debug!("Registered as {}", connection_id);
                let ingress =
                    spawn_forwarder(connection_id, self.srv_tx.clone(), self.queue_capacity);
                if let ConnectionState::Closed = self.state {
                    // closed before registration; dropping `ingress` reports it
                    return;
                }
                for command in self.backlog.take() {
                    if let Err(e) = ingress.try_send(command) {
                        log::warn!("Dropped a command from {}: {}", connection_id, e);
                    }
                }
                self.state = ConnectionState::Connected {
                    id: connection_id,
                    ingress,
                };
            }
            ConnectionActorMessage::Event(ConnectionEvent::SessionEvent(event)) => {
                log::debug!("Egress {:?}", event);
                self.egress(&event, ctx)
            }
            ConnectionActorMessage::Released => {
                if let ConnectionState::Closed = self.state {
                    return;
                }
                log::info!("Server released the connection; closing socket");
                self.leave();
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Again,
                    description: Some("rejoin".to_owned()),
                }));
                ctx.stop();
            }
        }
    }
}

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    srv_tx: web::Data<ServerTx>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, Error> {
    ws::start(
        ConnectionActor {
            srv_tx: srv_tx.get_ref().clone(),
            state: ConnectionState::Idle,
            queue_capacity: config.connection_queue_capacity,
            backlog: Backlog::new(config.connection_queue_capacity),
            format: WireFormat::default(),
        },
        &req,
        stream,
    )
}
