use chrono::Utc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::service::InventoryService;

/// Periodically expires pending holds that outlived their `expires_at`.
///
/// Opt-in: nothing else moves a hold to `expired`.
pub struct ReservationSweeper {
    service: InventoryService,
    interval: Duration,
}

impl ReservationSweeper {
    pub fn new(service: InventoryService, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);
        info!("Reservation sweeper running every {:?}", self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!("Error expiring reservations: {}", e);
            }
        }
    }

    pub async fn sweep_once(&self) -> crate::error::LedgerResult<usize> {
        self.service.expire_reservations(Utc::now()).await
    }
}
