//! # Debounced diagnostics
//!
//! Editors fire a burst of change events while the user types. The
//! listener waits for an idle gap after the last event, drains the
//! pending-edit queue, and publishes one diagnostics snapshot.

use crate::editor_workspace::EditorWorkspace;
use nacl_workspace::Errors;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Idle time after the last edit before diagnostics are published
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

pub type PublishDiagnostics = Arc<dyn Fn(Errors) + Send + Sync>;

/// Spawn the listener task and return the sender used to signal edit
/// events. Dropping every sender stops the task.
pub fn create_report_errors_event_listener(
    editor: Arc<EditorWorkspace>,
    publish: PublishDiagnostics,
    debounce: Duration,
) -> mpsc::UnboundedSender<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // keep absorbing events until the editor goes idle
            loop {
                match tokio::time::timeout(debounce, rx.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }
            editor.await_all_updates().await;
            let errors = editor.errors().await;
            publish(errors);
        }
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacl_workspace::Workspace;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_burst_of_events_publishes_once() {
        let editor = EditorWorkspace::new("/ws", Workspace::new_in_memory("test"));
        let published = Arc::new(AtomicUsize::new(0));
        let seen_errors = Arc::new(AtomicUsize::new(0));

        let publish: PublishDiagnostics = {
            let published = published.clone();
            let seen_errors = seen_errors.clone();
            Arc::new(move |errors: Errors| {
                published.fetch_add(1, Ordering::SeqCst);
                seen_errors.store(errors.parse.len(), Ordering::SeqCst);
            })
        };
        let tx = create_report_errors_event_listener(
            editor.clone(),
            publish,
            Duration::from_millis(50),
        );

        // three rapid edits to the same file; the last one wins
        for buffer in ["type x.A {", "type x.A {}", "type x.B {}"] {
            editor
                .set_nacl_files(vec![(PathBuf::from("/ws/a.nacl"), buffer.to_string())])
                .await
                .unwrap();
            tx.send(()).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(published.load(Ordering::SeqCst), 1);
        // the final buffer parses cleanly, so no parse errors remain
        assert_eq!(seen_errors.load(Ordering::SeqCst), 0);
        let elements = editor.elements(false).await;
        assert!(elements.contains_key("x.B"));
    }

    #[tokio::test]
    async fn test_spaced_events_publish_separately() {
        let editor = EditorWorkspace::new("/ws", Workspace::new_in_memory("test"));
        let published = Arc::new(AtomicUsize::new(0));
        let publish: PublishDiagnostics = {
            let published = published.clone();
            Arc::new(move |_| {
                published.fetch_add(1, Ordering::SeqCst);
            })
        };
        let tx = create_report_errors_event_listener(
            editor.clone(),
            publish,
            Duration::from_millis(30),
        );

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(published.load(Ordering::SeqCst), 2);
    }
}
