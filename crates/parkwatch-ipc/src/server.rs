//! Unix socket server
//!
//! Every connection gets a reader task, which parses NDJSON requests and
//! forwards them to the daemon, and a writer task, which puts responses and
//! (for subscribed peers) broadcast events back on the socket.

use parkwatch_api::{
    ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, Request, Response,
};
use parkwatch_config::RoleMap;
use parkwatch_util::ClientId;
use serde::Serialize;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// What the server hands to the daemon
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        info: ClientInfo,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

type Peers = Arc<RwLock<HashMap<ClientId, Peer>>>;
type Inbox = mpsc::UnboundedSender<ServerMessage>;

struct Peer {
    /// Encoded lines for the writer task; dropping it ends the task
    outbox: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

/// Role for a connecting peer: root and the daemon's own user are admin,
/// configured uids get their mapped role, anyone else is a guest
pub fn resolve_role(uid: Option<u32>, roles: &RoleMap) -> ClientRole {
    match uid {
        Some(0) => ClientRole::Admin,
        Some(u) if u == nix::unistd::getuid().as_raw() => ClientRole::Admin,
        Some(u) => roles.role_for_uid(u).unwrap_or(ClientRole::Guest),
        None => ClientRole::Guest,
    }
}

pub struct IpcServer {
    socket_path: PathBuf,
    roles: RoleMap,
    listener: Option<UnixListener>,
    peers: Peers,
    events: broadcast::Sender<Event>,
    inbox: Inbox,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>,
}

impl IpcServer {
    pub fn new(socket_path: impl AsRef<Path>, roles: RoleMap) -> Self {
        let (events, _) = broadcast::channel(128);
        let (inbox, inbox_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            roles,
            listener: None,
            peers: Arc::new(RwLock::new(HashMap::new())),
            events,
            inbox,
            inbox_rx: Mutex::new(Some(inbox_rx)),
        }
    }

    /// Bind the socket, replacing one left behind by a previous run
    pub async fn start(&mut self) -> IpcResult<()> {
        if let Some(dir) = self.socket_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        match std::fs::remove_file(&self.socket_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        // Group members may connect; their role still comes from the uid
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(socket = %self.socket_path.display(), "Listening for clients");
        self.listener = Some(listener);
        Ok(())
    }

    /// The daemon's side of the connection. Can be taken once.
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.inbox_rx.lock().await.take()
    }

    /// Accept loop; runs until the task is dropped
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("accept loop started before start()".into()))?;

        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    continue;
                }
            };

            let info = self.identify(&stream);
            debug!(
                client_id = %info.client_id,
                uid = ?info.uid,
                role = ?info.role,
                "Peer connected"
            );
            self.attach(stream, info).await;
        }
    }

    fn identify(&self, stream: &UnixStream) -> ClientInfo {
        let uid = stream.peer_cred().ok().map(|cred| cred.uid());
        let info = ClientInfo::new(resolve_role(uid, &self.roles));
        match uid {
            Some(uid) => info.with_uid(uid),
            None => info,
        }
    }

    async fn attach(&self, stream: UnixStream, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();

        self.peers.write().await.insert(
            info.client_id.clone(),
            Peer {
                outbox,
                subscribed: false,
            },
        );
        let _ = self.inbox.send(ServerMessage::ClientConnected {
            client_id: info.client_id.clone(),
            info: info.clone(),
        });

        tokio::spawn(write_outgoing(
            write_half,
            info.client_id.clone(),
            outbox_rx,
            self.events.subscribe(),
            self.peers.clone(),
            self.inbox.clone(),
        ));
        tokio::spawn(read_requests(
            read_half,
            info,
            self.peers.clone(),
            self.inbox.clone(),
        ));
    }

    /// Queue a response for one peer. A peer that already left is not an
    /// error.
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        queue(&self.peers, client_id, &response).await
    }

    /// Fan an event out to every subscribed peer
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.events.send(event);
    }

    pub async fn client_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

async fn queue<T: Serialize>(peers: &Peers, client_id: &ClientId, message: &T) -> IpcResult<()> {
    let line = encode_line(message)?;
    match peers.read().await.get(client_id) {
        Some(peer) => peer.outbox.send(line).map_err(|_| IpcError::ConnectionClosed),
        None => Ok(()),
    }
}

async fn set_subscribed(peers: &Peers, client_id: &ClientId, subscribed: bool) {
    if let Some(peer) = peers.write().await.get_mut(client_id) {
        peer.subscribed = subscribed;
    }
}

async fn read_requests(read_half: OwnedReadHalf, info: ClientInfo, peers: Peers, inbox: Inbox) {
    let client_id = info.client_id.clone();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(client_id = %client_id, "Peer closed connection");
                break;
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Read failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<Request>(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Unparseable request");
                // Id 0: the request id could not be read
                let info = ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string());
                let reply = Response::error(0, info);
                let _ = queue(&peers, &client_id, &reply).await;
                continue;
            }
        };

        // Roles without review rights are refused by the daemon and never
        // start receiving events
        match request.command {
            Command::SubscribeEvents => {
                set_subscribed(&peers, &client_id, info.role.can_review()).await;
            }
            Command::UnsubscribeEvents => set_subscribed(&peers, &client_id, false).await,
            _ => {}
        }

        let forwarded = inbox.send(ServerMessage::Request {
            client_id: client_id.clone(),
            info: info.clone(),
            request,
        });
        if forwarded.is_err() {
            break;
        }
    }

    // Dropping the outbox stops the writer
    peers.write().await.remove(&client_id);
}

async fn write_outgoing(
    mut writer: OwnedWriteHalf,
    client_id: ClientId,
    mut outbox: mpsc::UnboundedReceiver<String>,
    mut events: broadcast::Receiver<Event>,
    peers: Peers,
    inbox: Inbox,
) {
    loop {
        let line = tokio::select! {
            line = outbox.recv() => match line {
                Some(line) => line,
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    let subscribed = peers
                        .read()
                        .await
                        .get(&client_id)
                        .is_some_and(|peer| peer.subscribed);
                    if !subscribed {
                        continue;
                    }
                    match encode_line(&event) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(error = %e, "Event not serializable");
                            continue;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client_id = %client_id, skipped, "Subscriber lagging, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!(client_id = %client_id, error = %e, "Write failed");
            break;
        }
    }

    peers.write().await.remove(&client_id);
    let _ = inbox.send(ServerMessage::ClientDisconnected { client_id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IpcClient;
    use parkwatch_api::{EventPayload, ResponsePayload, ResponseResult};
    use parkwatch_util::EmployeeId;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn started(socket_path: &Path) -> Arc<IpcServer> {
        let mut server = IpcServer::new(socket_path, RoleMap::default());
        server.start().await.unwrap();
        let server = Arc::new(server);
        let accept = server.clone();
        tokio::spawn(async move {
            let _ = accept.run().await;
        });
        server
    }

    /// Answer every request the way a minimal daemon would
    fn answer_requests(server: Arc<IpcServer>, mut rx: mpsc::UnboundedReceiver<ServerMessage>) {
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let ServerMessage::Request {
                    client_id, request, ..
                } = msg
                {
                    let payload = match request.command {
                        Command::SubscribeEvents => ResponsePayload::Subscribed {
                            client_id: client_id.clone(),
                        },
                        _ => ResponsePayload::Pong,
                    };
                    let _ = server
                        .send_response(&client_id, Response::success(request.request_id, payload))
                        .await;
                }
            }
        });
    }

    #[tokio::test]
    async fn start_replaces_stale_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("run").join("parkwatchd.sock");
        std::fs::create_dir_all(socket_path.parent().unwrap()).unwrap();
        std::fs::write(&socket_path, b"stale").unwrap();

        let mut server = IpcServer::new(&socket_path, RoleMap::default());
        server.start().await.unwrap();

        let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);

        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let server = started(&socket_path).await;
        let rx = server.take_message_receiver().await.unwrap();
        answer_requests(server.clone(), rx);

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let response = client.send(Command::Ping).await.unwrap();
        assert_eq!(response.request_id, 1);
        assert!(matches!(response.result, ResponseResult::Ok(ResponsePayload::Pong)));
        assert_eq!(server.client_count().await, 1);
    }

    #[tokio::test]
    async fn malformed_line_gets_error_response() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let _server = started(&socket_path).await;

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(b"{not json}\n").await.unwrap();

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: Response = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(response.request_id, 0);
        assert!(matches!(
            response.result,
            ResponseResult::Err(ErrorInfo { code: ErrorCode::InvalidRequest, .. })
        ));
    }

    #[tokio::test]
    async fn subscribed_client_receives_events() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let server = started(&socket_path).await;
        let rx = server.take_message_receiver().await.unwrap();
        answer_requests(server.clone(), rx);

        let client = IpcClient::connect(&socket_path).await.unwrap();
        let mut events = client.subscribe().await.unwrap();

        server.broadcast_event(Event::new(EventPayload::BanExpired {
            employee_id: EmployeeId::new("e-1"),
        }));

        let event = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.payload, EventPayload::BanExpired { .. }));
    }

    #[test]
    fn roles_from_peer_uid() {
        let roles = RoleMap {
            hr: vec![1001],
            intake: vec![1002],
            employee: vec![1003],
        };
        let me = nix::unistd::getuid().as_raw();

        assert_eq!(resolve_role(Some(0), &roles), ClientRole::Admin);
        assert_eq!(resolve_role(Some(me), &roles), ClientRole::Admin);
        assert_eq!(resolve_role(None, &roles), ClientRole::Guest);
        if ![1001, 1002, 1003, 4242].contains(&me) {
            assert_eq!(resolve_role(Some(1001), &roles), ClientRole::Hr);
            assert_eq!(resolve_role(Some(1002), &roles), ClientRole::Intake);
            assert_eq!(resolve_role(Some(1003), &roles), ClientRole::Employee);
            assert_eq!(resolve_role(Some(4242), &roles), ClientRole::Guest);
        }
    }
}
