//! TCP acceptor for the echo server.
//!
//! Owns the listening socket, accepts connections forever and hands each
//! one to its own task. Accept failures are logged and retried; only
//! socket setup can fail fatally.

use crate::protocols::echo::handle_connection;
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io::{self, Write};
use std::net::{SocketAddr, SocketAddrV4};
use tokio::net::TcpListener;
use tracing::{debug, error, warn};

/// Pending connections the kernel queues before `accept`.
const BACKLOG: i32 = 10;

/// Step of listener setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Socket,
    Bind,
    Listen,
    Register,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStage::Socket => "socket",
            SetupStage::Bind => "bind",
            SetupStage::Listen => "listen",
            SetupStage::Register => "register",
        };
        f.write_str(name)
    }
}

/// Fatal listener setup error
#[derive(Debug)]
pub struct SetupError {
    pub stage: SetupStage,
    pub source: io::Error,
}

impl SetupError {
    fn at(stage: SetupStage) -> impl FnOnce(io::Error) -> Self {
        move |source| SetupError { stage, source }
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.source)
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Destination of the banner, `Connection from` and `Received:` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    #[cfg(test)]
    Quiet,
}

impl Console {
    fn writer(self) -> Box<dyn Write + Send> {
        match self {
            Console::Stdout => Box::new(io::stdout()),
            #[cfg(test)]
            Console::Quiet => Box::new(io::sink()),
        }
    }
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    port: u16,
    verbose: bool,
    console: Console,
}

impl Server {
    /// Bind and listen on `addr`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(addr: SocketAddrV4, verbose: bool) -> Result<Self, SetupError> {
        let listener = bind_listener(addr)?;
        let port = listener
            .local_addr()
            .map_err(SetupError::at(SetupStage::Register))?
            .port();

        Ok(Server {
            listener,
            port,
            verbose,
            console: Console::Stdout,
        })
    }

    #[cfg(test)]
    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Address actually bound, for tests binding port 0.
    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Print the banner and accept connections until the process is killed.
    pub async fn run(self) {
        let mut out = self.console.writer();
        console_line(&mut out, &banner(self.port, self.verbose));

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    console_line(&mut out, &connection_line(peer));
                    debug!(peer = %peer, "New connection");

                    let verbose = self.verbose;
                    let log = self.console.writer();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, verbose, log).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Create an IPv4 listener with a fixed backlog and register it with Tokio.
///
/// No address reuse options are set, so a port already in use fails at bind.
fn bind_listener(addr: SocketAddrV4) -> Result<TcpListener, SetupError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(SetupError::at(SetupStage::Socket))?;

    socket
        .bind(&SocketAddr::V4(addr).into())
        .map_err(SetupError::at(SetupStage::Bind))?;
    socket
        .listen(BACKLOG)
        .map_err(SetupError::at(SetupStage::Listen))?;
    socket
        .set_nonblocking(true)
        .map_err(SetupError::at(SetupStage::Register))?;

    TcpListener::from_std(socket.into()).map_err(SetupError::at(SetupStage::Register))
}

fn banner(port: u16, verbose: bool) -> String {
    if verbose {
        format!("Echo server listening on port {port} (verbose)")
    } else {
        format!("Echo server listening on port {port}")
    }
}

fn connection_line(peer: SocketAddr) -> String {
    format!("Connection from {}:{}", peer.ip(), peer.port())
}

/// Write one line in a single call; a closed stdout must not stop the acceptor.
fn console_line<W: Write + ?Sized>(out: &mut W, line: &str) {
    let line = format!("{line}\n");
    if let Err(e) = out.write_all(line.as_bytes()).and_then(|_| out.flush()) {
        warn!(error = %e, "Failed to write console line");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    async fn start_server() -> SocketAddr {
        let server = Server::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), false)
            .unwrap()
            .with_console(Console::Quiet);
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    #[test]
    fn test_banner() {
        assert_eq!(banner(80, false), "Echo server listening on port 80");
        assert_eq!(
            banner(7000, true),
            "Echo server listening on port 7000 (verbose)"
        );
    }

    #[test]
    fn test_connection_line() {
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        assert_eq!(connection_line(peer), "Connection from 127.0.0.1:5555");
    }

    #[test]
    fn test_console_line_writes_whole_line() {
        let mut out: Vec<u8> = Vec::new();
        console_line(&mut out, &banner(7, true));
        assert_eq!(out, b"Echo server listening on port 7 (verbose)\n");
    }

    #[test]
    fn test_setup_error_display() {
        let err = SetupError {
            stage: SetupStage::Bind,
            source: io::Error::new(io::ErrorKind::AddrInUse, "Address already in use"),
        };
        assert_eq!(err.to_string(), "bind: Address already in use");
    }

    #[tokio::test]
    async fn test_echo_single_line() {
        let addr = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"hello world\n").await.unwrap();

        let mut response = [0u8; 12];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(&response, b"hello world\n");
    }

    #[tokio::test]
    async fn test_lines_echoed_in_order() {
        let addr = start_server().await;
        let (read_half, mut write_half) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut lines = BufReader::new(read_half).lines();

        for i in 0..50 {
            write_half
                .write_all(format!("line {i}\n").as_bytes())
                .await
                .unwrap();
        }
        for i in 0..50 {
            assert_eq!(lines.next_line().await.unwrap().unwrap(), format!("line {i}"));
        }
    }

    #[tokio::test]
    async fn test_long_line_round_trips() {
        let addr = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let mut line: Vec<u8> = (0..3000).map(|i| b'a' + (i % 26) as u8).collect();
        line.push(b'\n');
        client.write_all(&line).await.unwrap();

        let mut response = vec![0u8; line.len()];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, line);
    }

    #[tokio::test]
    async fn test_concurrent_clients_do_not_cross_talk() {
        let addr = start_server().await;
        let mut quiet = TcpStream::connect(addr).await.unwrap();
        let noisy = TcpStream::connect(addr).await.unwrap();

        let noisy_task = tokio::spawn(async move {
            let (read_half, mut write_half) = noisy.into_split();
            let mut lines = BufReader::new(read_half).lines();
            for i in 0..500 {
                write_half
                    .write_all(format!("noisy {i}\n").as_bytes())
                    .await
                    .unwrap();
            }
            for i in 0..500 {
                assert_eq!(lines.next_line().await.unwrap().unwrap(), format!("noisy {i}"));
            }
        });

        quiet.write_all(b"quiet\n").await.unwrap();
        let mut response = [0u8; 6];
        quiet.read_exact(&mut response).await.unwrap();
        assert_eq!(&response, b"quiet\n");

        noisy_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_half_close_with_partial_line() {
        let addr = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"partial").await.unwrap();
        client.shutdown().await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"partial");
    }

    #[tokio::test]
    async fn test_disconnect_does_not_affect_other_sessions() {
        let addr = start_server().await;

        let gone = TcpStream::connect(addr).await.unwrap();
        drop(gone);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"still here\n").await.unwrap();
        let mut response = [0u8; 11];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(&response, b"still here\n");
    }

    #[tokio::test]
    async fn test_second_bind_on_same_port_fails() {
        let first = Server::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), false).unwrap();
        let port = first.local_addr().unwrap().port();

        let err = match Server::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port), false) {
            Ok(_) => panic!("second bind on port {port} succeeded"),
            Err(e) => e,
        };
        assert_eq!(err.stage, SetupStage::Bind);
        assert_eq!(err.source.kind(), io::ErrorKind::AddrInUse);
    }
}
