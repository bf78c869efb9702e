use scatter::runtime::registry::TaskRegistry;
use scatter::runtime::task::{TaskId, current_task};
use scatter::error::SpawnError;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;

#[tokio::test]
async fn test_spawn_records_parent() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());

    let child = registry.spawn(async { current_task() })?;
    let child_id = child.id();

    // Spawned from the test driver, so the parent is the root sentinel
    assert_eq!(registry.parent_of(child_id), Some(TaskId::ROOT));
    assert_eq!(registry.len(), 1);

    let seen = child.await?;
    assert_eq!(seen, child_id, "task should observe its own id");
    Ok(())
}

#[tokio::test]
async fn test_nested_spawn_tracks_ancestry() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());
    let reg = Arc::clone(&registry);

    let outer = registry.spawn(async move {
        let me = current_task();
        let inner = reg.spawn(async { current_task() }).expect("spawn inner");
        let inner_id = inner.id();
        let recorded = reg.parent_of(inner_id);
        let grand_parent = reg.parent_of(me);
        let seen = inner.await.expect("inner task");
        (me, inner_id, recorded, grand_parent, seen)
    })?;

    let (outer_id, inner_id, recorded, grand_parent, seen) = outer.await?;
    assert_eq!(recorded, Some(outer_id));
    assert_eq!(grand_parent, Some(TaskId::ROOT));
    assert_eq!(seen, inner_id);
    Ok(())
}

#[tokio::test]
async fn test_root_has_no_parent() {
    let registry = TaskRegistry::new();
    assert_eq!(current_task(), TaskId::ROOT);
    assert_eq!(registry.parent_of(TaskId::ROOT), None);
    assert_eq!(registry.current_parent(), None);
}

#[tokio::test]
async fn test_finished_tasks_are_evicted() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());

    let mut handles = Vec::new();
    for i in 0..8u64 {
        handles.push(registry.spawn(async move {
            tokio::time::sleep(Duration::from_millis(i)).await;
            i
        })?);
    }
    assert_eq!(registry.len(), 8);

    for h in handles {
        h.await?;
    }
    assert!(registry.is_empty(), "registry should not keep finished tasks");
    Ok(())
}

#[tokio::test]
async fn test_aborted_task_is_evicted() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());

    let handle = registry.spawn(async {
        tokio::time::sleep(Duration::from_secs(30)).await;
    })?;
    let id = handle.id();
    assert!(registry.parent_of(id).is_some());

    handle.abort();
    let joined = handle.await;
    assert!(joined.is_err_and(|e| e.is_cancelled()));
    assert_eq!(registry.parent_of(id), None);
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_plain_tokio_task_is_its_own_parent() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());

    let reg = Arc::clone(&registry);
    let (handler, child_parent) = tokio::spawn(async move {
        let me = current_task();
        let child = reg.spawn(async { current_task() }).expect("spawn child");
        let parent = reg.parent_of(child.id());
        child.await.expect("child");
        (me, parent)
    })
    .await?;

    assert!(handler.is_foreign());
    assert_eq!(child_parent, Some(handler));
    assert_eq!(registry.parent_of(handler), None);
    Ok(())
}

#[tokio::test]
async fn test_finished_parent_is_released_with_last_child() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let reg = Arc::clone(&registry);
    let parent = registry.spawn(async move {
        reg.spawn(async move {
            let _ = release_rx.await;
        })
        .expect("spawn child")
    })?;
    let parent_id = parent.id();
    let child = parent.await?;

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.parent_of(child.id()), Some(parent_id));
    assert!(registry.parent_of(parent_id).is_some());

    let _ = release_tx.send(());
    child.await?;
    assert_eq!(registry.parent_of(parent_id), None);
    assert!(registry.is_empty());
    Ok(())
}

#[test]
fn test_spawn_without_runtime_fails() {
    let registry = Arc::new(TaskRegistry::new());
    let result = registry.spawn(async {});
    assert!(matches!(result, Err(SpawnError::NoRuntime(_))));
    assert!(registry.is_empty(), "failed spawn must not leave an entry behind");
}
