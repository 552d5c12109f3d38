//! Datagram transport to the remote device.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use spex_core::Result;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use super::contract::{lock, Channel, Inbox, Mode, Sink};

const MAX_DATAGRAM: usize = 64 * 1024;
const PULL_QUEUE_CAPACITY: usize = 1024;

pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    inbox: Arc<Inbox<Bytes>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    open: AtomicBool,
}

impl UdpChannel {
    pub async fn open(local: SocketAddr, remote: SocketAddr, mode: Mode) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        let socket = Arc::new(socket);
        tracing::info!(local = %socket.local_addr()?, %remote, "udp channel open");

        let inbox = Arc::new(Inbox::new(format!("udp:{remote}"), mode, PULL_QUEUE_CAPACITY));
        let reader = tokio::spawn(read_loop(Arc::clone(&socket), Arc::clone(&inbox)));

        Ok(Arc::new(Self {
            socket,
            remote,
            inbox,
            reader: Mutex::new(Some(reader)),
            open: AtomicBool::new(true),
        }))
    }

    pub fn set_mode(&self, mode: Mode) {
        self.inbox.set_mode(mode);
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

async fn read_loop(socket: Arc<UdpSocket>, inbox: Arc<Inbox<Bytes>>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv(&mut buf).await {
            Ok(n) => inbox.deliver(Bytes::copy_from_slice(&buf[..n]), None),
            // ICMP unreachable surfaces here while the device is down
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::debug!(error = %e, "remote refused datagram");
            }
            Err(e) => {
                tracing::warn!(error = %e, "udp receive failed; closing channel");
                break;
            }
        }
    }
    inbox.close();
}

#[async_trait]
impl Channel<Bytes> for UdpChannel {
    fn send(&self, msg: Bytes) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.socket.try_send(&msg) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(remote = %self.remote, error = %e, "udp send failed");
                false
            }
        }
    }

    fn mode(&self) -> Mode {
        self.inbox.mode()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.inbox.is_closed()
    }

    fn attach_sink(&self, sink: Weak<dyn Sink<Bytes>>) {
        self.inbox.attach(sink);
    }

    fn detach_sink(&self) {
        self.inbox.detach();
    }

    async fn receive(&self, timeout: Duration) -> Option<(Bytes, Option<u64>)> {
        self.inbox.receive(timeout).await
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
        self.inbox.close();
        tracing::info!(remote = %self.remote, "udp channel closed");
    }
}
