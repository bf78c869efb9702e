use scatter::runtime::correlation::CorrelationId;
use scatter::runtime::registry::TaskRegistry;
use scatter::runtime::task::{TaskId, current_task};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use anyhow::Result;

#[tokio::test]
async fn test_descendants_share_root_correlation_id() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());
    let reg = Arc::clone(&registry);

    // root task -> child -> grandchild; the deepest task asks first
    let root = registry.spawn(async move {
        let reg_child = Arc::clone(&reg);
        let child = reg
            .spawn(async move {
                let reg_grand = Arc::clone(&reg_child);
                let grandchild = reg_child
                    .spawn(async move { reg_grand.current_id() })
                    .expect("spawn grandchild");
                let from_grandchild = grandchild.await.expect("grandchild");
                (reg_child.current_id(), from_grandchild)
            })
            .expect("spawn child");
        let (from_child, from_grandchild) = child.await.expect("child");
        (reg.current_id(), from_child, from_grandchild)
    })?;

    let (from_root, from_child, from_grandchild) = root.await?;
    assert_eq!(from_root, from_child);
    assert_eq!(from_child, from_grandchild);

    // generated once, at the root-most ancestor, and reused afterwards
    assert_eq!(registry.current_id(), from_root);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_siblings_converge_on_one_id() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());

    let mut handles = Vec::new();
    for _ in 0..32 {
        let reg = Arc::clone(&registry);
        handles.push(registry.spawn(async move { reg.current_id() })?);
    }

    let mut ids = HashSet::new();
    for h in handles {
        ids.insert(h.await?);
    }
    assert_eq!(ids.len(), 1, "siblings generated more than one id: {:?}", ids);
    assert!(ids.contains(&registry.current_id()));
    Ok(())
}

#[tokio::test]
async fn test_repeated_lookup_is_stable() {
    let registry = TaskRegistry::new();
    let first = registry.current_id();
    let second = registry.current_id();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_set_current_id_continues_inbound_trace() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());
    registry.set_current_id("inbound-7f3a");

    let reg = Arc::clone(&registry);
    let child = registry.spawn(async move { reg.current_id() })?;
    assert_eq!(child.await?.as_str(), "inbound-7f3a");
    assert_eq!(registry.current_id(), CorrelationId::from("inbound-7f3a"));
    Ok(())
}

#[tokio::test]
async fn test_set_current_id_inside_task_scopes_to_subtree() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());
    let driver_id = registry.current_id();

    let reg = Arc::clone(&registry);
    let task = registry.spawn(async move {
        reg.set_current_id("abc123");
        let reg_child = Arc::clone(&reg);
        let child = reg.spawn(async move { reg_child.current_id() }).expect("spawn child");
        child.await.expect("child")
    })?;

    assert_eq!(task.await?.as_str(), "abc123");
    // the driver keeps its own id
    assert_eq!(registry.current_id(), driver_id);
    Ok(())
}

#[tokio::test]
async fn test_child_keeps_id_after_parent_finishes() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let reg = Arc::clone(&registry);
    let parent = registry.spawn(async move {
        let id = reg.current_id();
        let reg_child = Arc::clone(&reg);
        let child = reg
            .spawn(async move {
                let _ = release_rx.await;
                reg_child.current_id()
            })
            .expect("spawn child");
        (id, child)
    })?;

    let (parent_id, child) = parent.await?;
    // parent is gone; only the child is still tracked
    assert_eq!(registry.len(), 1);

    let _ = release_tx.send(());
    assert_eq!(child.await?, parent_id);
    Ok(())
}

#[tokio::test]
async fn test_siblings_agree_after_parent_exits() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());
    let (release_a, wait_a) = oneshot::channel::<()>();
    let (release_b, wait_b) = oneshot::channel::<()>();

    // the parent never asks for an id and returns before its children do
    let reg = Arc::clone(&registry);
    let parent = registry.spawn(async move {
        let reg_a = Arc::clone(&reg);
        let a = reg
            .spawn(async move {
                let _ = wait_a.await;
                reg_a.current_id()
            })
            .expect("spawn a");
        let reg_b = Arc::clone(&reg);
        let b = reg
            .spawn(async move {
                let _ = wait_b.await;
                reg_b.current_id()
            })
            .expect("spawn b");
        (current_task(), a, b)
    })?;
    let (parent_id, a, b) = parent.await?;

    // finished, but still part of the lineage while its children run
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.parent_of(a.id()), Some(parent_id));
    assert_eq!(registry.parent_of(b.id()), Some(parent_id));
    assert_eq!(registry.parent_of(parent_id), Some(TaskId::ROOT));

    let _ = release_a.send(());
    let _ = release_b.send(());
    let from_a = a.await?;
    let from_b = b.await?;
    assert_eq!(from_a, from_b);
    assert_eq!(registry.current_id(), from_a);

    assert!(registry.is_empty(), "lineage should be released with the last child");
    Ok(())
}

#[tokio::test]
async fn test_child_sees_id_set_after_spawn() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let reg = Arc::clone(&registry);
    let parent = registry.spawn(async move {
        let reg_child = Arc::clone(&reg);
        let child = reg
            .spawn(async move {
                let _ = release_rx.await;
                reg_child.current_id()
            })
            .expect("spawn child");
        reg.set_current_id("late-trace");
        let _ = release_tx.send(());
        child.await.expect("child")
    })?;

    assert_eq!(parent.await?.as_str(), "late-trace");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_separate_handlers_keep_separate_traces() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());
    let (first_set_tx, first_set_rx) = oneshot::channel::<()>();
    let (second_set_tx, second_set_rx) = oneshot::channel::<()>();

    // plain tokio tasks, the way a server runs its request handlers
    let reg = Arc::clone(&registry);
    let first = tokio::spawn(async move {
        reg.set_current_id("trace-A");
        let _ = first_set_tx.send(());
        let _ = second_set_rx.await;

        let reg_child = Arc::clone(&reg);
        let child = reg.spawn(async move { reg_child.current_id() }).expect("spawn child");
        child.await.expect("child")
    });

    let reg = Arc::clone(&registry);
    let second = tokio::spawn(async move {
        let _ = first_set_rx.await;
        reg.set_current_id("trace-B");
        let _ = second_set_tx.send(());
        reg.current_id()
    });

    assert_eq!(first.await?.as_str(), "trace-A");
    assert_eq!(second.await?.as_str(), "trace-B");

    let driver = registry.current_id();
    assert_ne!(driver.as_str(), "trace-A");
    assert_ne!(driver.as_str(), "trace-B");
    Ok(())
}

#[tokio::test]
async fn test_unregistered_handlers_start_their_own_trees() -> Result<()> {
    let registry = Arc::new(TaskRegistry::new());
    let driver = registry.current_id();

    let mut trees = Vec::new();
    for _ in 0..2 {
        let reg = Arc::clone(&registry);
        let handler = tokio::spawn(async move {
            let reg_child = Arc::clone(&reg);
            let child = reg.spawn(async move { reg_child.current_id() }).expect("spawn child");
            let from_child = child.await.expect("child");
            (reg.current_id(), from_child)
        });
        trees.push(handler.await?);
    }

    let (first, first_child) = &trees[0];
    let (second, second_child) = &trees[1];
    assert_eq!(first, first_child);
    assert_eq!(second, second_child);
    assert_ne!(first, second);
    assert_ne!(first, &driver);
    assert_ne!(second, &driver);
    Ok(())
}

#[tokio::test]
async fn test_foreign_ids_are_bounded() -> Result<()> {
    let registry = Arc::new(TaskRegistry::with_foreign_capacity(2));

    for i in 0..5 {
        let reg = Arc::clone(&registry);
        tokio::spawn(async move { reg.set_current_id(format!("trace-{}", i)) }).await?;
    }

    assert_eq!(registry.foreign_len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_generated_id_is_two_part_hex() {
    let id = CorrelationId::generate();
    let s = id.as_str();
    // 64-bit hash plus a microsecond sample
    assert!(s.len() > 1 && s.len() <= 16 + 5, "unexpected length: {}", s);
    assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()), "not lowercase hex: {}", s);
}

#[tokio::test]
async fn test_generated_ids_differ_over_time() {
    let first = CorrelationId::generate();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = CorrelationId::generate();
    assert_ne!(first, second);
}

#[test]
fn test_correlation_id_serializes_as_plain_string() -> Result<()> {
    let id = CorrelationId::from("deadbeef42");
    assert_eq!(serde_json::to_string(&id)?, "\"deadbeef42\"");
    let back: CorrelationId = serde_json::from_str("\"deadbeef42\"")?;
    assert_eq!(back, id);
    Ok(())
}
