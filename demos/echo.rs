//! Echo - client and server in one process.
//!
//! This example demonstrates:
//! - Binding a listener and accepting a connection
//! - Echoing every message back from the server side
//! - Sending messages from a `ClientManager` and waiting for the replies
//! - Heartbeat monitoring on both ends
//!
//! # Running
//!
//! ```text
//! RUST_LOG=streamwire=debug cargo run --example echo
//! ```

use std::sync::Arc;
use std::time::Duration;

use streamwire::transport::{Endpoint, Listener};
use streamwire::{
    create_monitor, ClientManager, ConnectionMonitorOptions, ServerConnection, SocketOptions,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let listener = Listener::bind(&Endpoint::Tcp("127.0.0.1:0".parse()?)).await?;
    let endpoint = listener.local_endpoint()?;
    println!("listening on {endpoint}");

    let client = Arc::new(ClientManager::new(SocketOptions::messaging()));
    let cancel = CancellationToken::new();
    let (connected, accepted) = tokio::join!(client.connect(&endpoint, &cancel), listener.accept());
    connected?;
    let server = Arc::new(ServerConnection::start(accepted?, &SocketOptions::messaging()));

    // Server side: send every message straight back.
    let (_id, mut requests) = server.events().subscribe_stream();
    let echo = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            while let Some(request) = requests.recv().await {
                if !server.send(&request, &cancel).await.is_ok() {
                    break;
                }
            }
        })
    };

    let timing = ConnectionMonitorOptions::heartbeat(Duration::from_millis(200), Duration::from_secs(1));
    let client_monitor = create_monitor(&timing);
    let server_monitor = create_monitor(&timing);
    client_monitor.on_connection_lost(Arc::new(|| eprintln!("server went silent")));
    client_monitor.start(client.clone());
    server_monitor.start(server.clone());

    let (_id, mut replies) = client.events().subscribe_stream();
    for message in ["hello", "from", "streamwire"] {
        let status = client.send(message.as_bytes(), &cancel).await;
        println!("sent {message:?}: {status:?}");

        if let Some(reply) = replies.recv().await {
            println!("echoed {:?}", String::from_utf8_lossy(&reply));
        }
    }

    // Let a few heartbeats go by.
    tokio::time::sleep(Duration::from_millis(600)).await;

    client_monitor.stop();
    server_monitor.stop();
    client.disconnect().await;

    let result = server.closed().wait().await;
    println!("server side ended: {}", result.status);
    server.disconnect().await;
    echo.abort();
    Ok(())
}
