//! Editor-level scenarios: ordered batching, debounce, and incremental
//! validation over a live workspace

use nacl_editor::{create_report_errors_event_listener, EditorWorkspace, PublishDiagnostics};
use nacl_model::ElemID;
use nacl_workspace::Workspace;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn editor() -> Arc<EditorWorkspace> {
    EditorWorkspace::new("/ws", Workspace::new_in_memory("test"))
}

#[tokio::test]
async fn test_operations_are_totally_ordered() {
    let editor = editor();

    // interleave sets and a delete; each await observes the prior state
    editor
        .set_nacl_files(vec![(
            PathBuf::from("/ws/a.nacl"),
            "type x.A {}".to_string(),
        )])
        .await
        .unwrap();
    assert!(editor.elements(false).await.contains_key("x.A"));

    editor
        .set_nacl_files(vec![(
            PathBuf::from("/ws/b.nacl"),
            "type x.B {}".to_string(),
        )])
        .await
        .unwrap();
    editor
        .remove_nacl_files(vec![PathBuf::from("/ws/a.nacl")])
        .await
        .unwrap();

    let elements = editor.elements(false).await;
    assert!(!elements.contains_key("x.A"));
    assert!(elements.contains_key("x.B"));
}

#[tokio::test]
async fn test_concurrent_edits_converge() {
    let editor = editor();
    let mut handles = Vec::new();
    for i in 0..8 {
        let editor = editor.clone();
        handles.push(tokio::spawn(async move {
            editor
                .set_nacl_files(vec![(
                    PathBuf::from(format!("/ws/f{}.nacl", i)),
                    format!("type x.T{} {{}}", i),
                )])
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    editor.await_all_updates().await;
    let elements = editor.elements(false).await;
    assert_eq!(elements.len(), 8);
}

#[tokio::test]
async fn test_debounced_diagnostics_scenario() {
    let editor = editor();
    let published = Arc::new(AtomicUsize::new(0));
    let publish: PublishDiagnostics = {
        let published = published.clone();
        Arc::new(move |_| {
            published.fetch_add(1, Ordering::SeqCst);
        })
    };
    let tx =
        create_report_errors_event_listener(editor.clone(), publish, Duration::from_millis(60));

    for buffer in [
        "type salesforce.Account {",
        "type salesforce.Account { string Name {",
        "type salesforce.Account { string Name {} }",
    ] {
        editor
            .set_nacl_files(vec![(PathBuf::from("/ws/a.nacl"), buffer.to_string())])
            .await
            .unwrap();
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio::time::sleep(Duration::from_millis(250)).await;

    // one publish for the burst, reflecting the final (clean) buffer
    assert_eq!(published.load(Ordering::SeqCst), 1);
    let errors = editor.errors().await;
    assert!(errors.parse.is_empty());
    assert!(editor
        .get_element(&ElemID::new("salesforce", "Account"))
        .await
        .is_some());
}

#[tokio::test]
async fn test_unresolved_then_healed_reference() {
    let editor = editor();
    editor
        .set_nacl_files(vec![
            (
                PathBuf::from("/ws/types.nacl"),
                "type x.T { string name {} }".to_string(),
            ),
            (
                PathBuf::from("/ws/insts.nacl"),
                "x.T inst { name = \"v\" }".to_string(),
            ),
        ])
        .await
        .unwrap();
    assert!(editor.errors().await.validation.is_empty());

    editor
        .remove_nacl_files(vec![PathBuf::from("/ws/types.nacl")])
        .await
        .unwrap();
    let errors = editor.errors().await;
    assert!(!errors.validation.is_empty());

    editor
        .set_nacl_files(vec![(
            PathBuf::from("/ws/types.nacl"),
            "type x.T { string name {} }".to_string(),
        )])
        .await
        .unwrap();
    assert!(editor.errors().await.validation.is_empty());
}
