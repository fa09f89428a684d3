use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modtree::{CoreError, ModuleBehavior, ModuleHandle, PutOptions, Timeouts};

struct Publisher {
    value: u32,
}

#[async_trait::async_trait]
impl ModuleBehavior for Publisher {
    async fn start(&self, handle: &ModuleHandle) -> modtree::CoreResult<()> {
        handle.put(self.value, PutOptions::default()).await?;
        Ok(())
    }
}

struct Consumer {
    seen: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl ModuleBehavior for Consumer {
    async fn start(&self, handle: &ModuleHandle) -> modtree::CoreResult<()> {
        let value = handle.get::<u32>(Some(Duration::from_millis(200))).await?;
        self.seen.store(*value, Ordering::SeqCst);
        Ok(())
    }
}

struct Sleepy {
    sleep_for: Duration,
}

#[async_trait::async_trait]
impl ModuleBehavior for Sleepy {
    async fn prepare(&self, _handle: &ModuleHandle) -> modtree::CoreResult<()> {
        tokio::time::sleep(self.sleep_for).await;
        Ok(())
    }
}

struct DoublePut;

#[async_trait::async_trait]
impl ModuleBehavior for DoublePut {
    async fn start(&self, handle: &ModuleHandle) -> modtree::CoreResult<()> {
        handle.put(0u32, PutOptions::default()).await?;
        handle.put(0u32, PutOptions::default()).await?;
        Ok(())
    }
}

#[tokio::test]
async fn two_siblings_exchange_values() {
    let a_seen = Arc::new(AtomicU32::new(0));
    let b_seen = Arc::new(AtomicU32::new(0));

    let root = ModuleHandle::new_root("root", Arc::new(modtree::NoopBehavior), Timeouts::default());
    root.add_module(
        "publisher",
        Arc::new(Publisher { value: 42 }),
        Timeouts::default(),
    )
    .await
    .unwrap();
    root.add_module(
        "consumer",
        Arc::new(Consumer { seen: a_seen.clone() }),
        Timeouts::default(),
    )
    .await
    .unwrap();

    root.prepare_and_start().await;
    root.stop().await;

    assert_eq!(a_seen.load(Ordering::SeqCst), 42);
    assert!(root.exceptions().await.is_empty());
    let _ = b_seen;
}

#[tokio::test]
async fn prepare_timeout_is_captured_and_stop_still_runs() {
    let root = ModuleHandle::new_root(
        "root",
        Arc::new(Sleepy {
            sleep_for: Duration::from_millis(200),
        }),
        Timeouts {
            prepare: Duration::from_millis(20),
            start: Duration::from_secs(1),
            stop: Duration::from_secs(1),
        },
    );
    root.prepare_and_start().await;
    let exceptions = root.exceptions().await;
    assert_eq!(exceptions.len(), 1);
    assert!(exceptions[0].contains("preparing: root"));
    root.stop().await;
    root.wait_stopped().await;
}

#[tokio::test]
async fn duplicate_type_registration_is_captured_not_raised() {
    let root = ModuleHandle::new_root("root", Arc::new(DoublePut), Timeouts::default());
    root.prepare_and_start().await;
    let exceptions = root.exceptions().await;
    assert_eq!(exceptions.len(), 1);
    root.stop().await;
    root.wait_stopped().await;
}

#[tokio::test]
async fn exclusive_value_admits_second_borrower_only_after_first_drops() {
    let order = Arc::new(tokio::sync::Mutex::new(Vec::<&'static str>::new()));
    let value = modtree::SharedValue::new(1u32, PutOptions::default().with_max_borrowers(1));

    let first = value.borrow(None).await.unwrap();
    let order2 = order.clone();
    let value2 = value.clone();
    let waiter = tokio::spawn(async move {
        let _token = value2.borrow(None).await.unwrap();
        order2.lock().await.push("second");
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    order.lock().await.push("first-still-holding");
    drop(first);
    waiter.await.unwrap();

    assert_eq!(*order.lock().await, vec!["first-still-holding", "second"]);
}

#[tokio::test]
async fn get_without_a_publisher_times_out_rather_than_raising() {
    let root = ModuleHandle::new_root("root", Arc::new(modtree::NoopBehavior), Timeouts::default());
    let result = root.get::<String>(Some(Duration::from_millis(20))).await;
    assert!(matches!(result, Err(CoreError::Timeout { .. })));
}
