//! Sale windows
//!
//! Every window owns a store session and a mutex on the shared lock path. A
//! window whose session is lost opens a new one and keeps selling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cerrojo_common::Configuration;
use cerrojo_lock::{DistributedMutex, LockError, MutexOptions};
use cerrojo_store::{CoordinationStore, MemoryCoordinator, MemorySession, StoreClientConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::office::TicketOffice;

#[derive(Debug, Clone)]
pub struct SalePlan {
    pub windows: usize,
    pub tickets: u32,
    pub sale_delay: Duration,
    /// Expire the first window's session once this many tickets are sold
    pub expire_after: Option<u32>,
}

impl Default for SalePlan {
    fn default() -> Self {
        Self {
            windows: 2,
            tickets: 10,
            sale_delay: Duration::from_millis(100),
            expire_after: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WindowReport {
    pub window: String,
    pub sold: u32,
    /// Attempts that found the lock busy until their timeout
    pub busy: u32,
    pub sessions: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleSummary {
    pub lock_path: String,
    pub namespace: Option<String>,
    pub tickets: u32,
    pub sold: usize,
    pub remaining: u32,
    pub double_sold: u32,
    /// Tickets sold per window, from the office ledger
    pub sales_by_window: BTreeMap<String, usize>,
    /// Contender nodes left under the lock path after all windows closed
    pub residual_nodes: usize,
    pub windows: Vec<WindowReport>,
}

/// Run the sale on a fresh in-memory coordinator
pub async fn run(plan: &SalePlan, configuration: &Configuration) -> anyhow::Result<SaleSummary> {
    run_on(MemoryCoordinator::new(), plan, configuration).await
}

pub async fn run_on(
    coordinator: MemoryCoordinator,
    plan: &SalePlan,
    configuration: &Configuration,
) -> anyhow::Result<SaleSummary> {
    let options = MutexOptions::from_configuration(configuration);
    let namespace = configuration.namespace();
    let client = match &namespace {
        Some(namespace) => StoreClientConfig::default().with_namespace(namespace),
        None => StoreClientConfig::default(),
    };
    let office = Arc::new(TicketOffice::new(plan.tickets));

    info!(
        windows = plan.windows,
        tickets = plan.tickets,
        lock_path = %options.lock_path,
        namespace = ?client.namespace,
        "Opening sale windows"
    );

    let mut handles = Vec::with_capacity(plan.windows);
    for index in 0..plan.windows {
        let window = Window {
            name: format!("window-{}", index + 1),
            coordinator: coordinator.clone(),
            client: client.clone(),
            options: options.clone(),
            office: office.clone(),
            sale_delay: plan.sale_delay,
            expire_after: if index == 0 { plan.expire_after } else { None },
        };
        handles.push(tokio::spawn(window.run()));
    }

    let windows = futures::future::try_join_all(handles)
        .await?
        .into_iter()
        .collect::<anyhow::Result<Vec<_>>>()?;

    let store_lock_path = match &client.namespace {
        Some(namespace) => format!("/{}{}", namespace, options.lock_path),
        None => options.lock_path.clone(),
    };

    Ok(SaleSummary {
        residual_nodes: coordinator.children_of(&store_lock_path).len(),
        lock_path: options.lock_path,
        namespace: client.namespace,
        tickets: plan.tickets,
        sold: office.sold_count(),
        remaining: office.remaining(),
        double_sold: office.double_sold(),
        sales_by_window: office.sales_by_window(),
        windows,
    })
}

struct Window {
    name: String,
    coordinator: MemoryCoordinator,
    client: StoreClientConfig,
    options: MutexOptions,
    office: Arc<TicketOffice>,
    sale_delay: Duration,
    expire_after: Option<u32>,
}

impl Window {
    async fn run(mut self) -> anyhow::Result<WindowReport> {
        let mut report = WindowReport {
            window: self.name.clone(),
            sessions: 1,
            ..Default::default()
        };
        let mut session = self.open_session();
        let mut mutex = DistributedMutex::new(session.clone(), self.options.clone())?;

        while self.office.remaining() > 0 {
            match mutex.try_acquire(self.options.acquire_timeout).await {
                Ok(true) => {
                    let sale = self.office.sell_one(&self.name);
                    if let Err(e) = mutex.release().await {
                        warn!(window = %self.name, "Failed to release lock: {}", e);
                    }

                    let Some(ticket) = sale else {
                        break;
                    };
                    report.sold += 1;
                    info!(
                        window = %self.name,
                        ticket,
                        remaining = self.office.remaining(),
                        "Sold ticket"
                    );

                    if let Some(threshold) = self.expire_after
                        && self.office.sold_count() >= threshold as usize
                    {
                        self.expire_after = None;
                        let removed = self.coordinator.expire_session(session.session_id());
                        warn!(
                            window = %self.name,
                            session = %session.session_id(),
                            removed,
                            "Expired window session"
                        );
                    }

                    tokio::time::sleep(self.sale_delay).await;
                }
                Ok(false) => {
                    report.busy += 1;
                    debug!(window = %self.name, "Lock busy, trying again");
                }
                Err(LockError::SessionLost { .. } | LockError::SessionExpired(_)) => {
                    warn!(
                        window = %self.name,
                        session = %session.session_id(),
                        "Session gone, reconnecting"
                    );
                    session = self.open_session();
                    mutex = DistributedMutex::new(session.clone(), self.options.clone())?;
                    report.sessions += 1;
                }
                Err(e) if e.is_timeout() => {
                    report.busy += 1;
                    warn!(window = %self.name, "Acquire gave up: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        session.close();
        info!(window = %self.name, sold = report.sold, "Window closed");
        Ok(report)
    }

    fn open_session(&self) -> Arc<MemorySession> {
        Arc::new(self.coordinator.connect(self.client.clone()))
    }
}
