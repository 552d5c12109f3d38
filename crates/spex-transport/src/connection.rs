//! Wiring of the layers over one physical channel.
//!
//! ```text
//! physical (bytes) -> FrameCodec proxy (envelopes) -> SessionMux -> sessions
//! ```

use std::sync::Arc;

use bytes::Bytes;
use spex_core::Result;

use crate::channel::{Channel, Mode, UdpChannel};
use crate::config::{ClientConfig, Settings};
use crate::correlator::Correlator;
use crate::discovery::{Commutator, ModuleRegistry};
use crate::mux::SessionMux;
use crate::obs::TransportMetrics;
use crate::proxy::{FrameCodec, ProxyChannel};
use crate::root::{RootControl, RootSession};

pub struct Connection {
    physical: Arc<dyn Channel<Bytes>>,
    mux: Arc<SessionMux>,
    root: Arc<RootSession>,
    settings: Settings,
    metrics: Arc<TransportMetrics>,
}

impl Connection {
    /// Build the stack over an already open byte channel.
    pub fn over(
        physical: Arc<dyn Channel<Bytes>>,
        root_session: u32,
        settings: Settings,
        metrics: Arc<TransportMetrics>,
    ) -> Result<Self> {
        let framed = ProxyChannel::wrap("frames", FrameCodec, Arc::clone(&physical));
        let mux = SessionMux::attach("mux", framed, Arc::clone(&metrics))?;
        let session = mux.create_session(root_session)?;
        let root = Arc::new(RootSession::new(
            Correlator::attach(
                "root",
                session,
                settings.mailbox_capacity,
                Arc::clone(&metrics),
            ),
            settings.response_timeout,
        ));
        tracing::info!(root_session, "connection ready");
        Ok(Self {
            physical,
            mux,
            root,
            settings,
            metrics,
        })
    }

    /// Open a UDP channel per `cfg` and build the stack over it.
    pub async fn connect(cfg: &ClientConfig, metrics: Arc<TransportMetrics>) -> Result<Self> {
        let local = cfg.connection.local_addr()?;
        let remote = cfg.connection.remote_addr()?;
        let udp = UdpChannel::open(local, remote, Mode::Push).await?;
        Self::over(udp, cfg.connection.root_session, cfg.settings(), metrics)
    }

    /// Discovery over the commutator reachable from the root session.
    pub fn root_commutator(&self, registry: ModuleRegistry) -> Arc<Commutator> {
        let control = Arc::new(RootControl::new(
            Arc::clone(&self.root),
            Arc::clone(&self.mux),
            self.settings.clone(),
            Arc::clone(&self.metrics),
        ));
        Commutator::new(
            "root",
            Arc::clone(&self.mux),
            control,
            registry,
            self.settings.clone(),
            Arc::clone(&self.metrics),
        )
    }

    pub fn mux(&self) -> &Arc<SessionMux> {
        &self.mux
    }

    pub fn root(&self) -> &Arc<RootSession> {
        &self.root
    }

    pub fn metrics(&self) -> &Arc<TransportMetrics> {
        &self.metrics
    }

    pub fn is_open(&self) -> bool {
        self.physical.is_open()
    }

    pub fn close(&self) {
        self.physical.close();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
