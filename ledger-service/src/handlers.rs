//! Command dispatch for the message-driven surface.

use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::*;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::service::InventoryService;
use crate::store::ProcessedCommandStore;

/// What a command produced: a plain success, or a business rejection that
/// still carries a result body (e.g. the per-item outcomes of a reservation).
enum Handled {
    Done(serde_json::Value),
    Rejected(serde_json::Value, String),
}

fn decode<T: DeserializeOwned>(command: &Command) -> LedgerResult<T> {
    serde_json::from_value(command.payload.clone())
        .map_err(|e| LedgerError::invalid(format!("malformed {:?} payload: {}", command.command_type, e)))
}

fn encode<T: Serialize>(value: &T) -> LedgerResult<serde_json::Value> {
    serde_json::to_value(value).map_err(LedgerError::infrastructure)
}

fn outcome(result: &OperationResult) -> LedgerResult<Handled> {
    let value = encode(result)?;
    if result.success {
        Ok(Handled::Done(value))
    } else {
        Ok(Handled::Rejected(value, result.message.clone()))
    }
}

pub struct CommandHandler {
    service: InventoryService,
    processed: Arc<dyn ProcessedCommandStore>,
}

impl CommandHandler {
    pub fn new(service: InventoryService, processed: Arc<dyn ProcessedCommandStore>) -> Self {
        Self { service, processed }
    }

    /// Executes a command once per idempotency key and builds its reply.
    pub async fn handle_command(&self, command: Command) -> CommandReply {
        let cached = match self.check_idempotency(&command.idempotency_key).await {
            Ok(cached) => cached,
            Err(e) => {
                // Without the lookup the command might run twice; let the redelivery retry.
                error!("Idempotency lookup for command {} failed: {}", command.id, e);
                return CommandReply::failed(command.id, command.correlation_id, e.to_string());
            }
        };
        if let Some(existing) = cached {
            info!("Command already processed, returning cached result");
            return CommandReply {
                id: Uuid::new_v4(),
                command_id: command.id,
                correlation_id: command.correlation_id,
                status: existing.status,
                result: existing.result,
                error: existing.error,
                created_at: chrono::Utc::now(),
            };
        }

        let (reply, cacheable) = match self.dispatch(&command).await {
            Ok(Handled::Done(result)) => (
                CommandReply::success(command.id, command.correlation_id, Some(result)),
                true,
            ),
            Ok(Handled::Rejected(result, message)) => {
                let mut reply = CommandReply::failed(command.id, command.correlation_id, message);
                reply.result = Some(result);
                (reply, true)
            }
            Err(e) => {
                warn!("{:?} command {} failed: {}", command.command_type, command.id, e);
                // Storage failures stay uncached so a redelivery runs the command again.
                let cacheable = e.is_business();
                (CommandReply::failed(command.id, command.correlation_id, e.to_string()), cacheable)
            }
        };

        if cacheable {
            self.store_processed_command(&command, &reply).await;
        }
        reply
    }

    async fn dispatch(&self, command: &Command) -> LedgerResult<Handled> {
        match command.command_type {
            CommandType::AdjustInventory => {
                let req: AdjustInventoryRequest = decode(command)?;
                let level = self.service.adjust_inventory(req).await?;
                Ok(Handled::Done(encode(&level)?))
            }
            CommandType::AllocateInventory => {
                let req: AllocateInventoryRequest = decode(command)?;
                let level = self.service.allocate_inventory(req).await?;
                Ok(Handled::Done(encode(&level)?))
            }
            CommandType::ReleaseInventory => {
                let req: ReleaseInventoryRequest = decode(command)?;
                let summary = self.service.release_inventory(&req.order_id, &req.reason).await?;
                Ok(Handled::Done(serde_json::json!({
                    "order_id": summary.order_id,
                    "released": summary.settled,
                    "failed": summary.failed,
                })))
            }
            CommandType::CheckAndReserveStock => {
                let req: CheckAndReserveRequest = decode(command)?;
                let result = self.service.check_and_reserve(req).await?;
                let value = encode(&result)?;
                if result.success {
                    Ok(Handled::Done(value))
                } else {
                    Ok(Handled::Rejected(value, result.message))
                }
            }
            CommandType::ReleaseReservedStock => {
                let req: ReleaseInventoryRequest = decode(command)?;
                outcome(&self.service.release_reserved_stock(&req.order_id, &req.reason).await?)
            }
            CommandType::CommitReservation => {
                let req: CommitReservationRequest = decode(command)?;
                outcome(&self.service.commit_reservation(&req.order_id).await?)
            }
            CommandType::CancelReservation => {
                let req: CommitReservationRequest = decode(command)?;
                outcome(&self.service.cancel_reservation(&req.order_id).await?)
            }
        }
    }

    async fn check_idempotency(&self, key: &str) -> LedgerResult<Option<CommandReply>> {
        self.processed.find_reply(key).await
    }

    async fn store_processed_command(&self, command: &Command, reply: &CommandReply) {
        if let Err(e) = self.processed.record_reply(&command.idempotency_key, reply).await {
            error!("Could not record reply for command {}: {}", command.id, e);
        }
    }
}
