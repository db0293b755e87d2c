//! Loopback TCP channels carrying framed messages.
//!
//! The controller hosts a [`SocketServer`] that exactly one test host connects back to; a single reader thread
//! per connection hands every frame to a [`ChannelHandler`]. In design mode the controller is instead the client
//! of an IDE, through [`SocketClient`].

use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use testplatform_core::{PlatformError, PlatformResult};

use super::framing::{read_frame, write_frame};
use crate::sync::{Event, lock};

/// Receives frames from a connection's reader thread.
///
/// Calls arrive on the reader thread, one at a time, in wire order.
pub trait ChannelHandler: Send + Sync {
    fn on_message(&self, raw: &str);

    /// The peer went away. `error` is `None` for a clean end of stream.
    fn on_disconnected(&self, error: Option<&str>);
}

/// Anything that can deliver a raw frame to a peer.
pub trait MessageSink: Send + Sync {
    fn send_raw(&self, raw: &str) -> PlatformResult<()>;
}

// ============================================================================
// Server side (controller <- test host)
// ============================================================================

/// Single-connection loopback server.
pub struct SocketServer {
    listener: Mutex<Option<TcpListener>>,
    endpoint: SocketAddr,
    writer: Mutex<Option<BufWriter<TcpStream>>>,
    stream: Mutex<Option<TcpStream>>,
    connected: Event,
    stopped: AtomicBool,
}

impl SocketServer {
    /// Bind an ephemeral loopback port.
    pub fn bind() -> PlatformResult<Arc<Self>> {
        Self::bind_addr("127.0.0.1:0")
    }

    pub fn bind_addr(addr: &str) -> PlatformResult<Arc<Self>> {
        let listener =
            TcpListener::bind(addr).map_err(|e| PlatformError::channel(format!("cannot bind {addr}: {e}")))?;
        let endpoint = listener.local_addr()?;
        tracing::debug!(%endpoint, "channel listening");
        Ok(Arc::new(Self {
            listener: Mutex::new(Some(listener)),
            endpoint,
            writer: Mutex::new(None),
            stream: Mutex::new(None),
            connected: Event::new("SocketServer"),
            stopped: AtomicBool::new(false),
        }))
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Accept one connection on a background thread, then read frames into `handler` until it closes.
    pub fn accept_async(self: &Arc<Self>, handler: Arc<dyn ChannelHandler>) -> PlatformResult<()> {
        let listener = lock(&self.listener)
            .take()
            .ok_or_else(|| PlatformError::invalid_operation("channel already accepted a connection"))?;
        let server = Arc::clone(self);
        thread::Builder::new()
            .name(format!("testplatform-channel-{}", self.endpoint.port()))
            .spawn(move || server.serve(listener, handler.as_ref()))
            .map_err(|e| PlatformError::channel(format!("cannot start channel reader: {e}")))?;
        Ok(())
    }

    fn serve(&self, listener: TcpListener, handler: &dyn ChannelHandler) {
        let stream = match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "test host connected");
                stream
            }
            Err(err) => {
                if !self.is_stopped() {
                    handler.on_disconnected(Some(&err.to_string()));
                }
                return;
            }
        };
        drop(listener);
        if self.is_stopped() {
            return;
        }

        let (reader, writer) = match (stream.try_clone(), stream.try_clone()) {
            (Ok(reader), Ok(writer)) => (reader, writer),
            (Err(err), _) | (_, Err(err)) => {
                handler.on_disconnected(Some(&err.to_string()));
                return;
            }
        };
        let _ = stream.set_nodelay(true);
        *lock(&self.writer) = Some(BufWriter::new(writer));
        *lock(&self.stream) = Some(stream);
        self.connected.set();

        read_loop(reader, handler, || self.is_stopped());
    }

    /// Block until the peer connects. `Ok(false)` on timeout.
    pub fn wait_for_client(&self, timeout: Duration) -> PlatformResult<bool> {
        self.connected.wait(Some(timeout))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_set() && !self.is_stopped()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Close the connection and release the port. Safe to call from the reader thread and more than once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = lock(&self.stream).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        lock(&self.writer).take();
        if !self.connected.is_set() {
            // Unblock a pending accept.
            let _ = TcpStream::connect_timeout(&self.endpoint, Duration::from_millis(200));
        }
        self.connected.dispose();
        tracing::debug!(endpoint = %self.endpoint, "channel stopped");
    }
}

impl MessageSink for SocketServer {
    fn send_raw(&self, raw: &str) -> PlatformResult<()> {
        let mut writer = lock(&self.writer);
        let writer = writer
            .as_mut()
            .ok_or_else(|| PlatformError::channel("no test host is connected"))?;
        write_frame(writer, raw).map_err(|e| PlatformError::channel(format!("send failed: {e}")))
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(stream: TcpStream, handler: &dyn ChannelHandler, stopped: impl Fn() -> bool) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_frame(&mut reader) {
            Ok(Some(raw)) => {
                tracing::trace!(len = raw.len(), "frame received");
                handler.on_message(&raw);
            }
            Ok(None) => {
                if !stopped() {
                    handler.on_disconnected(None);
                }
                return;
            }
            Err(err) => {
                if !stopped() {
                    handler.on_disconnected(Some(&err.to_string()));
                }
                return;
            }
        }
    }
}

// ============================================================================
// Client side (controller -> IDE)
// ============================================================================

/// Blocking client connection used in design mode.
pub struct SocketClient {
    reader: Mutex<BufReader<TcpStream>>,
    writer: Mutex<BufWriter<TcpStream>>,
    stream: TcpStream,
}

impl SocketClient {
    pub fn connect(addr: SocketAddr, timeout: Duration) -> PlatformResult<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| PlatformError::channel(format!("cannot connect to {addr}: {e}")))?;
        let _ = stream.set_nodelay(true);
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        tracing::debug!(%addr, "connected to client");
        Ok(Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(BufWriter::new(writer)),
            stream,
        })
    }

    /// Block for the next frame. `Ok(None)` when the peer closed the connection.
    pub fn receive(&self) -> PlatformResult<Option<String>> {
        read_frame(&mut *lock(&self.reader)).map_err(|e| PlatformError::channel(format!("receive failed: {e}")))
    }

    pub fn shutdown(&self) {
        let _ = lock(&self.writer).flush();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl MessageSink for SocketClient {
    fn send_raw(&self, raw: &str) -> PlatformResult<()> {
        write_frame(&mut *lock(&self.writer), raw).map_err(|e| PlatformError::channel(format!("send failed: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct Recording {
        tx: Mutex<mpsc::Sender<Result<String, Option<String>>>>,
    }

    impl ChannelHandler for Recording {
        fn on_message(&self, raw: &str) {
            let _ = self.tx.lock().unwrap().send(Ok(raw.to_string()));
        }

        fn on_disconnected(&self, error: Option<&str>) {
            let _ = self.tx.lock().unwrap().send(Err(error.map(str::to_string)));
        }
    }

    fn recording() -> (Arc<Recording>, mpsc::Receiver<Result<String, Option<String>>>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Recording { tx: Mutex::new(tx) }), rx)
    }

    #[test]
    fn test_frames_flow_both_ways() {
        let server = SocketServer::bind().unwrap();
        let (handler, rx) = recording();
        server.accept_async(handler).unwrap();

        let client = SocketClient::connect(server.endpoint(), Duration::from_secs(5)).unwrap();
        assert!(server.wait_for_client(Duration::from_secs(5)).unwrap());

        client.send_raw("hello host").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok("hello host".to_string()));

        server.send_raw("hello client").unwrap();
        assert_eq!(client.receive().unwrap().as_deref(), Some("hello client"));

        client.shutdown();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Err(None));
    }

    #[test]
    fn test_send_before_connect_fails() {
        let server = SocketServer::bind().unwrap();
        assert!(matches!(server.send_raw("x"), Err(PlatformError::Channel(_))));
    }

    #[test]
    fn test_wait_for_client_times_out() {
        let server = SocketServer::bind().unwrap();
        let (handler, _rx) = recording();
        server.accept_async(handler).unwrap();
        assert!(!server.wait_for_client(Duration::from_millis(50)).unwrap());
        server.stop();
    }

    #[test]
    fn test_stop_is_silent_and_idempotent() {
        let server = SocketServer::bind().unwrap();
        let (handler, rx) = recording();
        server.accept_async(handler).unwrap();
        let client = SocketClient::connect(server.endpoint(), Duration::from_secs(5)).unwrap();
        assert!(server.wait_for_client(Duration::from_secs(5)).unwrap());

        server.stop();
        server.stop();
        assert!(!server.is_connected());
        assert!(client.receive().unwrap().is_none());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_accept_twice_is_rejected() {
        let server = SocketServer::bind().unwrap();
        let (handler, _rx) = recording();
        server.accept_async(handler.clone()).unwrap();
        assert!(matches!(
            server.accept_async(handler),
            Err(PlatformError::InvalidOperation(_))
        ));
        server.stop();
    }
}
