//! IPC control integration tests
//!
//! Runs a real [`IpcServer`] on a temporary socket and drives the routing
//! tables through [`IpcClient`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::task::JoinHandle;

use st_router::config::{Config, IpcConfig};
use st_router::error::IpcError;
use st_router::exec::RecordingRunner;
use st_router::ipc::{ErrorCode, IpcClient, IpcCommand, IpcHandler, IpcResponse, IpcServer};
use st_router::policy::{PolicyController, UidRangeMarkMap};

// ============================================================================
// Test Helpers
// ============================================================================

fn start_server(socket_path: &Path) -> (RecordingRunner, JoinHandle<Result<(), IpcError>>) {
    let mut config = Config::default();
    config.tables.capacity = 2;
    config.tables.base_table_number = 100;
    config.ipc = IpcConfig {
        socket_path: socket_path.to_path_buf(),
        ..IpcConfig::default()
    };

    let runner = RecordingRunner::new();
    let controller = PolicyController::from_config(
        &config,
        Box::new(runner.clone()),
        Box::new(UidRangeMarkMap::new()),
    );
    let server = IpcServer::new(config.ipc.clone(), Arc::new(IpcHandler::new(controller)));
    let handle = tokio::spawn(async move { server.run().await });
    (runner, handle)
}

async fn wait_for_socket(client: &IpcClient) {
    for _ in 0..50 {
        if client.ping().await.unwrap_or(false) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("IPC server did not come up");
}

fn error_code(response: &IpcResponse) -> Option<ErrorCode> {
    match response {
        IpcResponse::Error(err) => Some(err.code),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_route_lifecycle_over_ipc() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("st-router.sock");
    let (runner, handle) = start_server(&socket_path);
    let client = IpcClient::new(&socket_path);
    wait_for_socket(&client).await;

    let route = |add: bool| {
        let interface = "wlan0".to_string();
        let destination = "10.0.0.0".parse().unwrap();
        let gateway = "::".parse().unwrap();
        if add {
            IpcCommand::AddRoute {
                interface,
                destination,
                prefix: 24,
                gateway,
            }
        } else {
            IpcCommand::RemoveRoute {
                interface,
                destination,
                prefix: 24,
                gateway,
            }
        }
    };

    assert!(!client.send(route(true)).await.unwrap().is_error());
    let response = client
        .send(IpcCommand::AddFwmarkRule {
            interface: "wlan0".into(),
        })
        .await
        .unwrap();
    assert!(!response.is_error());

    match client.send(IpcCommand::ListTables).await.unwrap() {
        IpcResponse::Tables { tables } => {
            assert_eq!(tables.len(), 1);
            assert_eq!(tables[0].table_number, 100);
            assert_eq!(tables[0].rule_count, 2);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    assert!(!client.send(route(false)).await.unwrap().is_error());
    let response = client
        .send(IpcCommand::RemoveFwmarkRule {
            interface: "wlan0".into(),
        })
        .await
        .unwrap();
    assert!(!response.is_error());

    match client.send(IpcCommand::Status).await.unwrap() {
        IpcResponse::Status(status) => {
            assert_eq!(status.capacity, 2);
            assert_eq!(status.occupied, 0);
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(runner.commands().len(), 6);

    client.send(IpcCommand::Shutdown).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_errors_map_to_codes() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("st-router.sock");
    let (runner, handle) = start_server(&socket_path);
    let client = IpcClient::new(&socket_path);
    wait_for_socket(&client).await;

    let response = client
        .send(IpcCommand::RemoveFwmarkRule {
            interface: "eth0".into(),
        })
        .await
        .unwrap();
    assert_eq!(error_code(&response), Some(ErrorCode::NotFound));

    let response = client
        .send(IpcCommand::AddUidRule {
            interface: "eth0".into(),
            uid_start: 1000,
            uid_end: 1999,
        })
        .await
        .unwrap();
    assert_eq!(error_code(&response), Some(ErrorCode::NotFound));

    for iface in ["wlan0", "rmnet0"] {
        client
            .send(IpcCommand::AddFwmarkRule {
                interface: iface.into(),
            })
            .await
            .unwrap();
    }
    let response = client
        .send(IpcCommand::AddFwmarkRule {
            interface: "usb0".into(),
        })
        .await
        .unwrap();
    assert_eq!(error_code(&response), Some(ErrorCode::ResourceExhausted));

    runner.fail_matching("from 10.0.0.1");
    let response = client
        .send(IpcCommand::AddFromRule {
            interface: "wlan0".into(),
            address: "10.0.0.1".into(),
        })
        .await
        .unwrap();
    assert_eq!(error_code(&response), Some(ErrorCode::OperationFailed));

    client.send(IpcCommand::Shutdown).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}
