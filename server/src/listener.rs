use crate::connection::Connection;
use crate::context::ServerContext;
use crate::spawn;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Accepts RTMP clients until the server's shutdown token is cancelled
pub async fn serve(listener: TcpListener, context: Arc<ServerContext>) {
    loop {
        let (stream, address) = tokio::select! {
            _ = context.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    tracing::error!(%error, "Failed to accept connection");
                    continue;
                }
            },
        };

        if let Err(error) = stream.set_nodelay(true) {
            tracing::debug!(%error, "Failed to disable Nagle's algorithm");
        }

        let id = context.next_session_id();
        tracing::info!(session = id, %address, "Connection received");

        let connection = Connection::new(id, context.clone());
        spawn(connection.run(stream));
    }

    tracing::info!("Listener stopped");
}
