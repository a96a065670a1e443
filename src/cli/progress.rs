//! Upload progress bar fed from the event bus.

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use girder_client::events::{AppEvent, UploadEvent};

const BAR_TEMPLATE: &str =
    "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

const BAR_CHARS: &str = "█▓▒░  ";

pub fn upload_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
        pb.set_style(style.progress_chars(BAR_CHARS));
    }
    pb
}

/// File offset an event moves the bar to.
pub fn position(event: &UploadEvent) -> Option<u64> {
    match event {
        UploadEvent::Progress {
            start_byte, loaded, ..
        } => Some(start_byte + loaded),
        UploadEvent::ChunkSent { acknowledged, .. } => Some(*acknowledged),
        _ => None,
    }
}

/// Drive `pb` from upload events until the bus closes.
pub fn track(pb: ProgressBar, mut rx: broadcast::Receiver<AppEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(AppEvent::Upload(event)) => event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };

            if let Some(pos) = position(&event) {
                pb.set_position(pos);
                continue;
            }
            match event {
                UploadEvent::Complete { file, .. } => {
                    pb.finish_with_message(format!("uploaded {}", file.name().unwrap_or_default()));
                }
                UploadEvent::Error { message, .. } => pb.println(message),
                UploadEvent::ErrorStarting { message, .. } => {
                    pb.abandon_with_message(message);
                }
                _ => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_position_from_events() {
        let session = Uuid::new_v4();
        assert_eq!(
            position(&UploadEvent::Progress {
                session,
                start_byte: 100,
                loaded: 20,
                total: 500,
            }),
            Some(120)
        );
        assert_eq!(
            position(&UploadEvent::ChunkSent {
                session,
                bytes: 50,
                acknowledged: 150,
            }),
            Some(150)
        );
        assert_eq!(
            position(&UploadEvent::Error {
                session,
                message: "boom".into(),
                status: None,
            }),
            None
        );
    }

    #[tokio::test]
    async fn test_track_stops_when_bus_closes() {
        let bus = girder_client::events::EventBus::new();
        let pb = ProgressBar::hidden();
        pb.set_length(10);
        let handle = track(pb.clone(), bus.subscribe());

        let session = Uuid::new_v4();
        bus.emit(UploadEvent::ChunkSent {
            session,
            bytes: 4,
            acknowledged: 4,
        });
        drop(bus);
        handle.await.unwrap();

        assert_eq!(pb.position(), 4);
    }
}
