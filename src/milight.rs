//! Mi-Light bridge protocol: session handshake, command packets and
//! keep-alive over UDP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::models::Color;

/// Fixed handshake payload (protocol magic plus vendor credential bytes)
const SESSION_REQUEST: [u8; 27] = [
    0x20, 0x00, 0x00, 0x00, 0x16, 0x02, 0x62, 0x3A, 0xD5, 0xED, 0xA3, 0x01, 0xAE, 0x08, 0x2D,
    0x46, 0x61, 0x41, 0xA7, 0xF6, 0xDC, 0xAF, 0xD3, 0xE6, 0x00, 0x00, 0x1E,
];

const SESSION_RESPONSE_LEN: usize = 22;
const KEEP_ALIVE_RESPONSE_LEN: usize = 12;

const MAX_BRIGHTNESS: u8 = 0x64;

/// Protocol and transport timings for one device session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Zone byte sent with every command
    pub zone: u8,
    /// Upper bound on every socket read
    pub read_deadline: Duration,
    /// How often the keep-alive task wakes up
    pub keep_alive_check: Duration,
    /// Idle time after which a keep-alive packet is sent
    pub keep_alive_after: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            zone: 0x01,
            read_deadline: Duration::from_secs(1),
            keep_alive_check: Duration::from_secs(2),
            keep_alive_after: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum MilightError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("device read timed out")]
    Timeout,
    #[error("invalid response")]
    InvalidResponse,
}

impl MilightError {
    /// Wrong-length or wrong-echo responses invalidate the session; the next
    /// allocation must re-handshake. Transport errors do not.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Self::InvalidResponse)
    }
}

/// Command surface of a connected light fixture
///
/// Implemented by [Session]; tests substitute fakes.
#[async_trait]
pub trait LightController: Send + Sync {
    /// Turn the light on
    async fn on(&self) -> Result<(), MilightError>;
    /// Turn the light off
    async fn off(&self) -> Result<(), MilightError>;
    /// Set a palette color
    async fn color(&self, color: Color) -> Result<(), MilightError>;
    /// Switch to white mode
    async fn white(&self) -> Result<(), MilightError>;
    /// Set the brightness level (clamped to 100)
    async fn brightness(&self, level: u8) -> Result<(), MilightError>;
}

/// Negotiated session with the device
///
/// Owns the socket and the 2-byte session identifier returned by the
/// handshake. A background task sustains the session with keep-alive packets
/// while it is idle; [Session::close] stops that task synchronously.
pub struct Session {
    socket: Arc<UdpSocket>,
    session_id: [u8; 2],
    zone: u8,
    seq_num: AtomicU8,
    read_deadline: Duration,
    last_activity: Arc<Mutex<Instant>>,
    keep_alive: Mutex<Option<KeepAliveHandle>>,
}

impl Session {
    /// Dial the device and perform the session handshake
    pub async fn connect(host: &str, port: u16, config: &SessionConfig) -> Result<Self, MilightError> {
        let remote = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?;

        // Local bind must match the remote IP version
        let local: SocketAddr = if remote.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        let socket = Arc::new(socket);

        let session_id = handshake(&socket, config.read_deadline).await?;
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let keep_alive = spawn_keep_alive(
            socket.clone(),
            session_id,
            last_activity.clone(),
            config,
        );

        Ok(Self {
            socket,
            session_id,
            zone: config.zone,
            seq_num: AtomicU8::new(0),
            read_deadline: config.read_deadline,
            last_activity,
            keep_alive: Mutex::new(Some(keep_alive)),
        })
    }

    /// Stop the keep-alive task and give up the session
    ///
    /// Blocks until the task has exited. The socket itself closes when the
    /// session is dropped.
    pub async fn close(&self) {
        let handle = self.keep_alive.lock().unwrap().take();

        if let Some(KeepAliveHandle { stop_tx, task }) = handle {
            stop_tx.send(()).ok();
            task.await.ok();
        }
    }

    fn next_seq(&self) -> u8 {
        self.seq_num.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    async fn send_command(&self, body: [u8; 9]) -> Result<(), MilightError> {
        *self.last_activity.lock().unwrap() = Instant::now();

        let seq = self.next_seq();
        let packet = command_packet(self.session_id, seq, self.zone, &body);
        self.socket.send(&packet).await?;

        let mut buf = [0u8; 64];
        let n = read_response(&self.socket, self.read_deadline, &mut buf).await?;

        let expected = [0x88, 0x00, 0x00, 0x00, 0x03, 0x00, seq, 0x00];
        if n != expected.len() || buf[..n] != expected {
            return Err(MilightError::InvalidResponse);
        }

        Ok(())
    }
}

#[async_trait]
impl LightController for Session {
    async fn on(&self) -> Result<(), MilightError> {
        self.send_command([0x31, 0x00, 0x00, 0x00, 0x03, 0x03, 0x00, 0x00, 0x00])
            .await
    }

    async fn off(&self) -> Result<(), MilightError> {
        self.send_command([0x31, 0x00, 0x00, 0x00, 0x03, 0x04, 0x00, 0x00, 0x00])
            .await
    }

    async fn color(&self, color: Color) -> Result<(), MilightError> {
        let c = color.palette_byte();
        self.send_command([0x31, 0x00, 0x00, 0x00, 0x01, c, c, c, c]).await
    }

    async fn white(&self) -> Result<(), MilightError> {
        self.send_command([0x31, 0x00, 0x00, 0x00, 0x03, 0x05, 0x00, 0x00, 0x00])
            .await
    }

    async fn brightness(&self, level: u8) -> Result<(), MilightError> {
        let level = level.min(MAX_BRIGHTNESS);
        self.send_command([0x31, 0x00, 0x00, 0x00, 0x02, level, 0x00, 0x00, 0x00])
            .await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("zone", &self.zone)
            .finish()
    }
}

struct KeepAliveHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

fn spawn_keep_alive(
    socket: Arc<UdpSocket>,
    session_id: [u8; 2],
    last_activity: Arc<Mutex<Instant>>,
    config: &SessionConfig,
) -> KeepAliveHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let check_period = config.keep_alive_check;
    let idle_after = config.keep_alive_after;
    let read_deadline = config.read_deadline;

    let task = tokio::spawn(async move {
        debug!("keep-alive loop started");

        loop {
            select! {
                _ = &mut stop_rx => break,
                _ = sleep(check_period) => {
                    let idle = last_activity.lock().unwrap().elapsed();

                    if idle > idle_after {
                        if let Err(error) = send_keep_alive(&socket, session_id, read_deadline).await {
                            debug!(error = %error, "keep-alive failed");
                        }

                        *last_activity.lock().unwrap() = Instant::now();
                    }
                }
            }
        }

        debug!("keep-alive loop terminated");
    });

    KeepAliveHandle { stop_tx, task }
}

async fn handshake(socket: &UdpSocket, read_deadline: Duration) -> Result<[u8; 2], MilightError> {
    socket.send(&SESSION_REQUEST).await?;

    let mut buf = [0u8; 64];
    let n = read_response(socket, read_deadline, &mut buf).await?;

    if n != SESSION_RESPONSE_LEN {
        return Err(MilightError::InvalidResponse);
    }

    Ok([buf[19], buf[20]])
}

async fn send_keep_alive(
    socket: &UdpSocket,
    session_id: [u8; 2],
    read_deadline: Duration,
) -> Result<(), MilightError> {
    let packet = [0xD0, 0x00, 0x00, 0x00, 0x02, session_id[0], session_id[1], 0x00];
    socket.send(&packet).await?;

    let mut buf = [0u8; 64];
    let n = read_response(socket, read_deadline, &mut buf).await?;

    if n != KEEP_ALIVE_RESPONSE_LEN {
        return Err(MilightError::InvalidResponse);
    }

    Ok(())
}

async fn read_response(
    socket: &UdpSocket,
    read_deadline: Duration,
    buf: &mut [u8],
) -> Result<usize, MilightError> {
    match timeout(read_deadline, socket.recv(buf)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(MilightError::Timeout),
    }
}

fn command_packet(session_id: [u8; 2], seq: u8, zone: u8, body: &[u8; 9]) -> Vec<u8> {
    let mut packet = vec![
        0x80,
        0x00,
        0x00,
        0x00,
        0x11,
        session_id[0],
        session_id[1],
        0x00,
        seq,
        0x00,
    ];
    packet.extend_from_slice(body);
    packet.push(zone);
    packet.push(0x00);
    packet.push(checksum(&packet));
    packet
}

/// Sum modulo 256 of the trailing 11 bytes (command body plus zone region)
fn checksum(data: &[u8]) -> u8 {
    if data.len() < 11 {
        return 0;
    }

    data[data.len() - 11..]
        .iter()
        .fold(0u8, |sum, b| sum.wrapping_add(*b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum HandshakeMode {
        Ok,
        ShortResponse,
        Silent,
    }

    #[derive(Debug, Clone, Copy)]
    struct Behavior {
        handshake: HandshakeMode,
        bad_echo: bool,
    }

    impl Default for Behavior {
        fn default() -> Self {
            Self {
                handshake: HandshakeMode::Ok,
                bad_echo: false,
            }
        }
    }

    type Captured = Arc<Mutex<Vec<Vec<u8>>>>;

    /// In-process stand-in for the bridge
    async fn spawn_device(behavior: Behavior) -> (SocketAddr, Captured) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let packets: Captured = Arc::new(Mutex::new(Vec::new()));
        let captured = packets.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 128];

            loop {
                let (n, peer) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(_) => return,
                };

                captured.lock().unwrap().push(buf[..n].to_vec());

                match buf[0] {
                    0x20 => match behavior.handshake {
                        HandshakeMode::Ok => {
                            let mut resp = [0u8; SESSION_RESPONSE_LEN];
                            resp[19] = 0xAB;
                            resp[20] = 0xCD;
                            socket.send_to(&resp, peer).await.ok();
                        }
                        HandshakeMode::ShortResponse => {
                            socket.send_to(&[0u8; 10], peer).await.ok();
                        }
                        HandshakeMode::Silent => {}
                    },
                    0x80 => {
                        let mut seq = buf[8];
                        if behavior.bad_echo {
                            seq = seq.wrapping_add(1);
                        }
                        socket
                            .send_to(&[0x88, 0x00, 0x00, 0x00, 0x03, 0x00, seq, 0x00], peer)
                            .await
                            .ok();
                    }
                    0xD0 => {
                        socket.send_to(&[0u8; KEEP_ALIVE_RESPONSE_LEN], peer).await.ok();
                    }
                    _ => {}
                }
            }
        });

        (addr, packets)
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            zone: 0x01,
            read_deadline: Duration::from_millis(200),
            keep_alive_check: Duration::from_secs(10),
            keep_alive_after: Duration::from_secs(10),
        }
    }

    #[test]
    fn command_packet_layout() {
        let packet = command_packet([0x12, 0x34], 7, 1, &[0x31, 0, 0, 0, 0x03, 0x03, 0, 0, 0]);

        assert_eq!(packet.len(), 22);
        assert_eq!(&packet[..5], &[0x80, 0x00, 0x00, 0x00, 0x11]);
        assert_eq!(packet[5], 0x12);
        assert_eq!(packet[6], 0x34);
        assert_eq!(packet[8], 7);
        assert_eq!(packet[19], 1);
        assert_eq!(packet[20], 0x00);

        // Checksum covers the trailing 11 bytes before it
        let expected: u8 = packet[10..21].iter().fold(0u8, |sum, b| sum.wrapping_add(*b));
        assert_eq!(packet[21], expected);
    }

    #[test]
    fn checksum_of_short_data_is_zero() {
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), 0);
    }

    #[tokio::test]
    async fn handshake_yields_session_id() {
        let (addr, _) = spawn_device(Behavior::default()).await;
        let session = Session::connect("127.0.0.1", addr.port(), &test_config())
            .await
            .unwrap();

        assert_eq!(session.session_id, [0xAB, 0xCD]);

        session.close().await;
    }

    #[tokio::test]
    async fn handshake_wrong_length_is_invalid_response() {
        let (addr, _) = spawn_device(Behavior {
            handshake: HandshakeMode::ShortResponse,
            ..Behavior::default()
        })
        .await;

        let result = Session::connect("127.0.0.1", addr.port(), &test_config()).await;
        assert!(matches!(result, Err(MilightError::InvalidResponse)));
    }

    #[tokio::test]
    async fn handshake_timeout_is_transport_error() {
        let (addr, _) = spawn_device(Behavior {
            handshake: HandshakeMode::Silent,
            ..Behavior::default()
        })
        .await;

        let result = Session::connect("127.0.0.1", addr.port(), &test_config()).await;
        assert!(matches!(result, Err(MilightError::Timeout)));
    }

    #[tokio::test]
    async fn commands_are_acknowledged() {
        let (addr, packets) = spawn_device(Behavior::default()).await;
        let session = Session::connect("127.0.0.1", addr.port(), &test_config())
            .await
            .unwrap();

        session.on().await.unwrap();
        session.color(Color::Blue).await.unwrap();

        let captured = packets.lock().unwrap();
        // Handshake plus two commands
        assert_eq!(captured.len(), 3);
        assert_eq!(&captured[1][10..19], &[0x31, 0, 0, 0, 0x03, 0x03, 0, 0, 0]);
        assert_eq!(
            &captured[2][10..19],
            &[0x31, 0, 0, 0, 0x01, 0xAA, 0xAA, 0xAA, 0xAA]
        );
        drop(captured);

        session.close().await;
    }

    #[tokio::test]
    async fn brightness_is_clamped() {
        let (addr, packets) = spawn_device(Behavior::default()).await;
        let session = Session::connect("127.0.0.1", addr.port(), &test_config())
            .await
            .unwrap();

        session.brightness(200).await.unwrap();

        let captured = packets.lock().unwrap();
        assert_eq!(captured[1][15], MAX_BRIGHTNESS);
        drop(captured);

        session.close().await;
    }

    #[tokio::test]
    async fn mismatched_echo_is_invalid_response() {
        let (addr, _) = spawn_device(Behavior {
            bad_echo: true,
            ..Behavior::default()
        })
        .await;

        let session = Session::connect("127.0.0.1", addr.port(), &test_config())
            .await
            .unwrap();

        let result = session.on().await;
        assert!(matches!(result, Err(MilightError::InvalidResponse)));

        session.close().await;
    }

    #[tokio::test]
    async fn idle_session_sends_keep_alive() {
        let (addr, packets) = spawn_device(Behavior::default()).await;
        let config = SessionConfig {
            keep_alive_check: Duration::from_millis(20),
            keep_alive_after: Duration::from_millis(50),
            ..test_config()
        };

        let session = Session::connect("127.0.0.1", addr.port(), &config)
            .await
            .unwrap();

        sleep(Duration::from_millis(300)).await;

        let captured = packets.lock().unwrap();
        assert!(captured.iter().any(|packet| packet[0] == 0xD0));
        drop(captured);

        session.close().await;
    }
}
