use std::time::Duration;

use spex_core::protocol::{CommutatorMsg, CommutatorUpdate, Envelope, Message, ModuleInfo};
use spex_core::Status;
use tokio::time::Instant;

use crate::channel::WaitError;
use crate::correlator::Correlator;

fn commutator(env: Envelope) -> Option<CommutatorMsg> {
    match env.choice {
        Message::Commutator(msg) => Some(msg),
        _ => None,
    }
}

/// Commutator RPCs over one control session.
pub struct CommutatorApi {
    session: Correlator,
    timeout: Duration,
}

impl CommutatorApi {
    pub fn new(session: Correlator, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    pub fn session(&self) -> &Correlator {
        &self.session
    }

    pub async fn total_slots(&self) -> Result<u32, Status> {
        self.session
            .request(CommutatorMsg::TotalSlotsReq, self.timeout, |env| {
                match commutator(env)? {
                    CommutatorMsg::TotalSlots(n) => Some(n),
                    _ => None,
                }
            })
            .await
    }

    pub async fn module_info(&self, slot: u32) -> Result<ModuleInfo, Status> {
        self.session
            .request(CommutatorMsg::ModuleInfoReq(slot), self.timeout, |env| {
                match commutator(env)? {
                    CommutatorMsg::ModuleInfo(info) if info.slot_id == slot => Some(info),
                    _ => None,
                }
            })
            .await
    }

    /// Occupied slots only. Every slot must report within one overall
    /// deadline; a listing that comes up short fails with `ResponseTimeout`.
    pub async fn all_modules(&self) -> Result<Vec<ModuleInfo>, Status> {
        let total = self.total_slots().await?;
        if !self.session.send(CommutatorMsg::AllModulesInfoReq) {
            return Err(Status::FailedToSendRequest);
        }

        let deadline = Instant::now() + self.timeout;
        let mut modules = Vec::new();
        for received in 0..total {
            let left = deadline.saturating_duration_since(Instant::now());
            let next = self
                .session
                .wait_for(left, |env| match commutator(env)? {
                    CommutatorMsg::ModuleInfo(info) => Some(info),
                    _ => None,
                })
                .await;
            match next {
                Ok(info) if info.is_empty_slot() => {}
                Ok(info) => modules.push(info),
                Err(WaitError::Timeout) => {
                    tracing::warn!(received, total, "module listing incomplete");
                    return Err(Status::ResponseTimeout);
                }
                Err(WaitError::Closed) => return Err(Status::ChannelClosed),
            }
        }
        Ok(modules)
    }

    pub async fn open_tunnel(&self, port: u32) -> Result<u32, Status> {
        self.session
            .request(CommutatorMsg::OpenTunnel(port), self.timeout, |env| {
                match commutator(env)? {
                    CommutatorMsg::OpenTunnelReport(id) => Some(Ok(id)),
                    CommutatorMsg::OpenTunnelFailed(status) => Some(Err(Status::from(status))),
                    _ => None,
                }
            })
            .await?
    }

    pub async fn close_tunnel(&self, tunnel_id: u32) -> Result<(), Status> {
        let status = self
            .session
            .request(CommutatorMsg::CloseTunnel(tunnel_id), self.timeout, |env| {
                match commutator(env)? {
                    CommutatorMsg::CloseTunnelStatus(status) => Some(Status::from(status)),
                    _ => None,
                }
            })
            .await?;
        status_result(status)
    }

    /// Subscribe this session to slot updates.
    pub async fn monitor(&self) -> Result<(), Status> {
        let status = self
            .session
            .request(CommutatorMsg::Monitor, self.timeout, |env| match commutator(env)? {
                CommutatorMsg::MonitorAck(status) => Some(Status::from(status)),
                _ => None,
            })
            .await?;
        status_result(status)
    }

    pub async fn next_update(&self, timeout: Duration) -> Result<CommutatorUpdate, Status> {
        self.session
            .wait_for(timeout, |env| match commutator(env)? {
                CommutatorMsg::Update(update) => Some(update),
                _ => None,
            })
            .await
            .map_err(Status::from)
    }
}

fn status_result(status: Status) -> Result<(), Status> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(status)
    }
}
