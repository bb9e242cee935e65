use crate::core::CoreEvent;
use crate::BroadcastMessage;
use deck_proto::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use deck_proto::state::StateManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, state_manager, event_tx, broadcast_tx).await;
    })
}

async fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let connected = Arc::new(AtomicUsize::new(0));
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                let count = connected.fetch_add(1, Ordering::SeqCst) + 1;
                info!("Client {} connected from {} ({} connected)", id, peer, count);

                let sm = state_manager.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();
                let connected = connected.clone();

                tokio::spawn(async move {
                    handle_client(stream, sm, id, evt_tx, bcast_rx).await;
                    let count = connected.fetch_sub(1, Ordering::SeqCst) - 1;
                    info!("Client {} disconnected ({} connected)", id, count);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<CoreEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            if read_buf.len() < 4 { break; }
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    debug!("Client {} sent command: {:?}", client_id, cmd);

                                    if event_tx.send(CoreEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("CoreEvent channel closed");
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(e) => {
                                    // A complete frame that fails to parse is dropped;
                                    // a partial one waits for more bytes.
                                    if let Some(len) = frame_len(&read_buf) {
                                        warn!("Client {} sent a bad frame: {}", client_id, e);
                                        read_buf.drain(..len);
                                        let reply = Message::Broadcast(Broadcast::Error {
                                            message: e.to_string(),
                                        });
                                        if let Ok(encoded) = reply.encode() {
                                            let _ = write_half.write_all(&encoded).await;
                                        }
                                        continue;
                                    }
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(msg) => encode_broadcast(msg, &state_manager).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&state_manager).await.ok()
                    }
                    Err(_) => break,
                };
                if let Some(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Length of the first frame in `buf` if all of it has arrived.
fn frame_len(buf: &[u8]) -> Option<usize> {
    let header: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    let len = 4 + u32::from_be_bytes(header) as usize;
    (buf.len() >= len).then_some(len)
}

async fn encode_broadcast(msg: BroadcastMessage, state_manager: &StateManager) -> Option<Vec<u8>> {
    let broadcast = match msg {
        BroadcastMessage::StateUpdated => return encode_state(state_manager).await.ok(),
        BroadcastMessage::Notice(notice) => Broadcast::Notice { notice },
        BroadcastMessage::LyricsUpdated => Broadcast::Lyrics {
            transcript: state_manager.get_state().await.lyrics,
        },
        BroadcastMessage::LyricLine(index) => Broadcast::LyricLine { index },
        BroadcastMessage::SearchResults { term, tracks } => {
            Broadcast::SearchResults { term, tracks }
        }
        BroadcastMessage::Log(message) => Broadcast::Log { message },
    };
    Message::Broadcast(broadcast).encode().ok()
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    let rev = state.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        daemon_rev: rev,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_proto::protocol::{Command, Notice};
    use std::time::Duration;

    async fn read_message(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Message {
        let mut tmp = [0u8; 4096];
        loop {
            if let Ok((msg, consumed)) = Message::decode(buf) {
                buf.drain(..consumed);
                return msg;
            }
            let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut tmp))
                .await
                .expect("read timed out")
                .unwrap();
            assert!(n > 0, "server closed the connection");
            buf.extend_from_slice(&tmp[..n]);
        }
    }

    struct Fixture {
        stream: TcpStream,
        buf: Vec<u8>,
        event_rx: mpsc::Receiver<CoreEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        _dir: tempfile::TempDir,
    }

    async fn connect() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sm = Arc::new(StateManager::new(dir.path().join("state.json"), 10));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (broadcast_tx, _) = broadcast::channel(16);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, sm, event_tx, broadcast_tx.clone()));

        let stream = TcpStream::connect(addr).await.unwrap();
        Fixture {
            stream,
            buf: Vec::new(),
            event_rx,
            broadcast_tx,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_hello_then_commands_reach_core() {
        let mut f = connect().await;
        match read_message(&mut f.stream, &mut f.buf).await {
            Message::Broadcast(Broadcast::Hello {
                protocol_version, ..
            }) => assert_eq!(protocol_version, PROTOCOL_VERSION),
            other => panic!("expected hello, got {:?}", other),
        }

        let frame = Message::Command(Command::SeekBy { seconds: 10.0 })
            .encode()
            .unwrap();
        f.stream.write_all(&frame).await.unwrap();

        let evt = tokio::time::timeout(Duration::from_secs(2), f.event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            evt,
            CoreEvent::ClientCommand(Command::SeekBy { seconds }) if seconds == 10.0
        ));
    }

    #[tokio::test]
    async fn test_broadcasts_are_forwarded_as_frames() {
        let mut f = connect().await;
        read_message(&mut f.stream, &mut f.buf).await;

        f.broadcast_tx
            .send(BroadcastMessage::Notice(Notice::DiscoveryUnavailable))
            .unwrap();
        match read_message(&mut f.stream, &mut f.buf).await {
            Message::Broadcast(Broadcast::Notice { notice }) => {
                assert_eq!(notice, Notice::DiscoveryUnavailable)
            }
            other => panic!("expected notice, got {:?}", other),
        }

        f.broadcast_tx.send(BroadcastMessage::LyricLine(Some(3))).unwrap();
        match read_message(&mut f.stream, &mut f.buf).await {
            Message::Broadcast(Broadcast::LyricLine { index }) => assert_eq!(index, Some(3)),
            other => panic!("expected lyric line, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_and_connection_survives() {
        let mut f = connect().await;
        read_message(&mut f.stream, &mut f.buf).await;

        let junk = b"{nope";
        let mut frame = (junk.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(junk);
        f.stream.write_all(&frame).await.unwrap();

        assert!(matches!(
            read_message(&mut f.stream, &mut f.buf).await,
            Message::Broadcast(Broadcast::Error { .. })
        ));

        let frame = Message::Command(Command::Next).encode().unwrap();
        f.stream.write_all(&frame).await.unwrap();
        let evt = tokio::time::timeout(Duration::from_secs(2), f.event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(evt, CoreEvent::ClientCommand(Command::Next)));
    }

    #[test]
    fn test_frame_len_waits_for_complete_frame() {
        assert_eq!(frame_len(&[0, 0]), None);
        assert_eq!(frame_len(&[0, 0, 0, 3, 1, 2]), None);
        assert_eq!(frame_len(&[0, 0, 0, 2, 1, 2, 9]), Some(6));
    }
}
