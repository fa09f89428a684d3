use std::sync::Arc;

use modtree::Signal;
use tokio::sync::Mutex;

#[tokio::test]
async fn sync_callback_async_callback_and_receiver_all_observe_the_same_sequence() {
    let signal: Signal<String> = Signal::new();

    let sync_seen = Arc::new(Mutex::new(Vec::new()));
    let sync_seen2 = sync_seen.clone();
    signal.connect(move |v: &String| {
        let sync_seen3 = sync_seen2.clone();
        let v = v.clone();
        tokio::spawn(async move {
            sync_seen3.lock().await.push(v);
        });
    });

    let async_seen = Arc::new(Mutex::new(Vec::new()));
    let async_seen2 = async_seen.clone();
    signal.connect_async(move |v: &String| {
        let async_seen3 = async_seen2.clone();
        let v = v.clone();
        async move {
            async_seen3.lock().await.push(v);
        }
    });

    let mut receiver = signal.iterate();

    signal.emit("x".to_string()).await;
    signal.emit("y".to_string()).await;

    assert_eq!(receiver.recv().await, Some("x".to_string()));
    assert_eq!(receiver.recv().await, Some("y".to_string()));

    tokio::task::yield_now().await;
    assert_eq!(*async_seen.lock().await, vec!["x", "y"]);
    assert_eq!(*sync_seen.lock().await, vec!["x", "y"]);
}

#[tokio::test]
async fn dropping_a_receiver_stops_delivery_to_it() {
    let signal: Signal<u32> = Signal::new();
    let receiver = signal.iterate();
    drop(receiver);

    // A dropped receiver's sender is pruned the first time emit notices the
    // channel is closed; the emit itself must not fail.
    signal.emit(1).await;
    signal.emit(2).await;
}

#[tokio::test]
async fn disconnecting_either_callback_stops_delivery_to_it() {
    let signal: Signal<u32> = Signal::new();

    let sync_seen = Arc::new(Mutex::new(Vec::new()));
    let sync_seen2 = sync_seen.clone();
    let sync_handle = signal.connect(move |v: &u32| {
        let sync_seen3 = sync_seen2.clone();
        let v = *v;
        tokio::spawn(async move {
            sync_seen3.lock().await.push(v);
        });
    });

    let async_seen = Arc::new(Mutex::new(Vec::new()));
    let async_seen2 = async_seen.clone();
    let async_handle = signal.connect_async(move |v: &u32| {
        let async_seen3 = async_seen2.clone();
        let v = *v;
        async move {
            async_seen3.lock().await.push(v);
        }
    });

    signal.emit(1).await;
    signal.disconnect(sync_handle);
    signal.disconnect(async_handle);
    signal.emit(2).await;

    tokio::task::yield_now().await;
    assert_eq!(*sync_seen.lock().await, vec![1]);
    assert_eq!(*async_seen.lock().await, vec![1]);
}
