//! Feeds channel input messages into a shared region.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::InputStateWriter;
use crate::channel::ChannelEnd;
use crate::error::ShmemError;
use crate::input::InputMessage;

/// Writer task that mirrors a plugin channel into shared memory, so a
/// native/WASM client can poll state instead of handling messages.
pub struct SharedMemoryBridge;

impl SharedMemoryBridge {
    /// Announce liveness, then apply messages until the channel closes or
    /// `cancel` fires.
    pub fn spawn(
        mut port: ChannelEnd,
        writer: InputStateWriter,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<(), ShmemError>> {
        tokio::spawn(async move {
            write_blocking(&writer, |w| w.announce_connected()).await?;
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = port.recv() => message,
                };
                let Some(value) = message else { break };
                match serde_json::from_value::<InputMessage>(value) {
                    Ok(input) => write_blocking(&writer, move |w| w.apply(&input)).await?,
                    // Config replies and other non-input traffic.
                    Err(_) => tracing::trace!("Ignoring non-input message on shared memory bridge"),
                }
            }
            tracing::debug!("Shared memory bridge stopped");
            Ok(())
        })
    }
}

/// Lock waits happen on the blocking pool, never on an async worker.
async fn write_blocking<F>(writer: &InputStateWriter, write: F) -> Result<(), ShmemError>
where
    F: FnOnce(&InputStateWriter) -> Result<(), ShmemError> + Send + 'static,
{
    let writer = writer.clone();
    tokio::task::spawn_blocking(move || write(&writer))
        .await
        .map_err(std::io::Error::from)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::port;
    use crate::input::{Button, Player};
    use crate::shmem::{InputStateReader, Role, SharedRegion, Spinner, SPINNER_DATA_LEN};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bridge_applies_messages_until_closed() {
        let region = Arc::new(SharedRegion::anonymous(SPINNER_DATA_LEN).unwrap());
        let writer = InputStateWriter::new(region.clone()).unwrap();
        let reader = InputStateReader::new(region);
        let (host, client) = port::pair();

        let task = SharedMemoryBridge::spawn(client, writer, CancellationToken::new());

        host.post(&InputMessage::Button {
            player: Player::One,
            button: Button::Down,
            pressed: true,
        })
        .unwrap();
        host.post(&InputMessage::Spinners {
            spinner1_step_delta: 4,
            spinner2_step_delta: 0,
        })
        .unwrap();
        host.send(serde_json::json!({"type": "config", "step_resolution": 64}))
            .unwrap();
        drop(host);

        task.await.unwrap().unwrap();

        let state = reader.snapshot();
        assert!(state.connected);
        assert!(state.player1_down);
        assert_eq!(reader.spinner(Spinner::One).unwrap().position, 4);
    }

    #[tokio::test]
    async fn test_held_lock_does_not_stall_runtime() {
        let region = Arc::new(SharedRegion::anonymous(SPINNER_DATA_LEN).unwrap());
        let writer = InputStateWriter::new(region.clone()).unwrap();
        let reader = InputStateReader::new(region.clone());
        let (host, client) = port::pair();

        // The client is mid-read when the bridge starts.
        let held = region.lock(Role::Reader);
        let task = SharedMemoryBridge::spawn(client, writer, CancellationToken::new());
        host.post(&InputMessage::Button {
            player: Player::Two,
            button: Button::A,
            pressed: true,
        })
        .unwrap();

        // Single-threaded runtime: this only completes if the bridge is not
        // parked on the lock word.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        drop(held);

        drop(host);
        task.await.unwrap().unwrap();
        assert!(reader.snapshot().player2_a);
    }

    #[tokio::test]
    async fn test_bridge_stops_on_cancel() {
        let region = Arc::new(SharedRegion::anonymous(SPINNER_DATA_LEN).unwrap());
        let writer = InputStateWriter::new(region).unwrap();
        let (_host, client) = port::pair();
        let cancel = CancellationToken::new();

        let task = SharedMemoryBridge::spawn(client, writer, cancel.clone());
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
