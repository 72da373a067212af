use actix_web::dev::ServerHandle;
use log::{error, info};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Stop the server gracefully the first time any thread panics.
///
/// The default panic hook still runs so the panic message is printed.
/// `stop(true)` lets in-flight requests finish within the server's
/// shutdown timeout before workers are forced down.
pub fn stop_on_panic(handle: ServerHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let tx = Mutex::new(Some(tx));

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        if let Ok(mut guard) = tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(info.to_string());
            }
        }
    }));

    actix_web::rt::spawn(async move {
        if let Some(reason) = rx.recv().await {
            error!("Unrecoverable error, shutting down: {}", reason);
            handle.stop(true).await;
            info!("Server stopped");
        }
    });
}
