//! IPC command handler
//!
//! This module processes IPC commands and generates responses. Every
//! controller operation runs on the blocking pool under one mutex, so
//! commands from all connections are applied one at a time.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error};

use super::protocol::{ErrorCode, IpcCommand, IpcResponse, ServerStatus};
use crate::action::RuleAction;
use crate::error::TableError;
use crate::policy::PolicyController;

/// IPC command handler
pub struct IpcHandler {
    /// Shared controller
    controller: Arc<Mutex<PolicyController>>,

    /// Server start time
    start_time: Instant,

    /// Server version
    version: String,
}

impl IpcHandler {
    /// Create a new IPC handler owning `controller`
    pub fn new(controller: PolicyController) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Handle an IPC command and return a response
    pub async fn handle(&self, command: IpcCommand) -> IpcResponse {
        debug!("Handling IPC command: {:?}", command);

        match command {
            IpcCommand::Ping => IpcResponse::Pong,
            IpcCommand::Shutdown => IpcResponse::success_with_message("Shutting down"),
            IpcCommand::Status => {
                let version = self.version.clone();
                let uptime_secs = self.start_time.elapsed().as_secs();
                self.with_controller(move |controller| {
                    let pool = controller.pool();
                    IpcResponse::Status(ServerStatus {
                        version,
                        uptime_secs,
                        capacity: pool.capacity(),
                        occupied: pool.occupied_count(),
                        base_table_number: pool.base_table_number(),
                    })
                })
                .await
            }
            command => {
                self.with_controller(move |controller| apply(controller, command))
                    .await
            }
        }
    }

    /// Run `op` under the controller lock on the blocking pool
    ///
    /// Mutations hold the lock while `ip`/`iptables` runs, so it is never
    /// taken on a runtime thread.
    async fn with_controller<F>(&self, op: F) -> IpcResponse
    where
        F: FnOnce(&mut PolicyController) -> IpcResponse + Send + 'static,
    {
        let controller = Arc::clone(&self.controller);
        let result = tokio::task::spawn_blocking(move || op(&mut *controller.lock())).await;

        match result {
            Ok(response) => response,
            Err(e) => {
                error!("Controller task failed: {}", e);
                IpcResponse::error(ErrorCode::InternalError, e.to_string())
            }
        }
    }
}

/// Apply a controller command synchronously
pub fn apply(controller: &mut PolicyController, command: IpcCommand) -> IpcResponse {
    match command {
        IpcCommand::ListTables => IpcResponse::Tables {
            tables: controller.tables(),
        },

        IpcCommand::AddRoute {
            interface,
            destination,
            prefix,
            gateway,
        } => IpcResponse::from_result(
            controller.add_route(&interface, destination, prefix, gateway),
            "Route modified",
        ),

        IpcCommand::RemoveRoute {
            interface,
            destination,
            prefix,
            gateway,
        } => IpcResponse::from_result(
            controller.remove_route(&interface, destination, prefix, gateway),
            "Route modified",
        ),

        IpcCommand::AddFromRule { interface, address } => IpcResponse::from_result(
            with_index(controller, &interface, |c, index| {
                c.modify_from_rule(index, RuleAction::Add, &address)
            }),
            "Rule added",
        ),

        IpcCommand::RemoveFromRule { interface, address } => IpcResponse::from_result(
            with_index(controller, &interface, |c, index| {
                c.modify_from_rule(index, RuleAction::Del, &address)
            }),
            "Rule removed",
        ),

        IpcCommand::AddLocalRoute { interface, address } => IpcResponse::from_result(
            with_index(controller, &interface, |c, index| {
                c.modify_local_route(index, RuleAction::Add, &interface, &address)
            }),
            "Local route added",
        ),

        IpcCommand::RemoveLocalRoute { interface, address } => IpcResponse::from_result(
            with_index(controller, &interface, |c, index| {
                c.modify_local_route(index, RuleAction::Del, &interface, &address)
            }),
            "Local route removed",
        ),

        IpcCommand::AddFwmarkRule { interface } => IpcResponse::from_result(
            controller.add_fwmark_rule(&interface),
            "Fwmark rule added",
        ),

        IpcCommand::RemoveFwmarkRule { interface } => IpcResponse::from_result(
            controller.remove_fwmark_rule(&interface),
            "Fwmark rule removed",
        ),

        IpcCommand::AddUidRule {
            interface,
            uid_start,
            uid_end,
        } => IpcResponse::from_result(
            controller.add_uid_rule(&interface, uid_start, uid_end),
            "UID rule added",
        ),

        IpcCommand::RemoveUidRule {
            interface,
            uid_start,
            uid_end,
        } => IpcResponse::from_result(
            controller.remove_uid_rule(&interface, uid_start, uid_end),
            "UID rule removed",
        ),

        IpcCommand::GetUidMark { uid } => IpcResponse::UidMark {
            uid,
            mark: controller.mark_for_uid(uid),
        },

        IpcCommand::Ping | IpcCommand::Status | IpcCommand::Shutdown => IpcResponse::error(
            ErrorCode::InvalidCommand,
            "command is handled by the server, not the controller",
        ),
    }
}

/// Resolve the table index of `interface` and run `op` with it
fn with_index<F>(controller: &mut PolicyController, interface: &str, op: F) -> Result<(), TableError>
where
    F: FnOnce(&mut PolicyController, usize) -> Result<(), TableError>,
{
    let index = controller
        .find_table_number(interface)
        .ok_or_else(|| TableError::interface_not_found(interface))?;
    op(controller, index)
}
