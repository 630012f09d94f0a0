use core::convert::Infallible;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use dbworker::{Connect, Context, Error, FaultHook, Pool, PoolBuilder, PoolConfig};
use dbworker_testdb::{DbError, MemDb, MemDbConfig, TestDb, Value, json};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type Held = JoinHandle<Result<(), Error>>;

/// Occupies one worker of `pool` until the returned sender fires or is
/// dropped.
async fn occupy_worker<R>(pool: &Arc<Pool<R>>) -> (oneshot::Sender<()>, Held)
where
    R: Send + Sync + 'static,
{
    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let pool = Arc::clone(pool);
    let held = tokio::spawn(async move {
        pool.submit(Context::new(), move |_, _: &R| {
            let _ = started_tx.send(());
            let _ = release_rx.blocking_recv();
            Ok::<_, Infallible>(())
        })
        .await
    });
    started_rx.await.unwrap();
    (release_tx, held)
}

async fn wait_for_queued<R>(pool: &Pool<R>, n: usize) {
    while pool.queued() < n {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

async fn close(pool: Arc<Pool<MemDb>>) -> dbworker::Result<()> {
    tokio::task::spawn_blocking(move || pool.close())
        .await
        .unwrap()
}

#[test]
fn close_empty_pool() {
    let db = TestDb::new();
    let pool = Pool::with_resource(db.handle(), &PoolConfig::new(3, 5)).unwrap();
    pool.close().unwrap();
    db.close().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn insert_then_read_back() {
    let db = TestDb::new();
    let name = db.name().to_string();
    let pool = Pool::with_resource(db.handle(), &PoolConfig::new(3, 5)).unwrap();
    let ctx = Context::new().with_value("foo", "bar");

    let inserted = pool
        .submit(ctx.clone(), move |ctx, db: &MemDb| {
            assert_eq!(ctx.value::<&str>("foo"), Some(&"bar"));
            assert_eq!(db.name(), name);
            db.insert_one("foo", json!({ "id": 1, "name": "foo" }))
        })
        .await
        .unwrap();
    assert_eq!(inserted.inserted_id, json!(1));

    let doc = pool
        .submit(ctx, |_, db: &MemDb| db.find_one("foo", &json!(1)))
        .await
        .unwrap()
        .map(Value::Object);
    assert_eq!(doc, Some(json!({ "_id": 1, "name": "foo" })));

    pool.close().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn work_errors_reach_the_caller_verbatim() {
    let db = TestDb::new();
    let pool = Pool::with_resource(db.handle(), &PoolConfig::new(2, 2)).unwrap();
    let insert = |_: &Context, db: &MemDb| db.insert_one("foo", json!({ "_id": 5 }));

    pool.submit(Context::new(), insert).await.unwrap();
    let err = pool.submit(Context::new(), insert).await.unwrap_err();

    assert!(!err.is_fault());
    assert_eq!(
        err.into_work(),
        Some(DbError::DuplicateKey {
            collection: "foo".to_string(),
            id: "5".to_string(),
        })
    );
    pool.close().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn many_concurrent_submissions_each_get_one_response() {
    const WORKERS: usize = 4;
    const CAPACITY: usize = 8;
    const REQUESTS: u64 = 256;

    let db = TestDb::new();
    let pool = Arc::new(
        Pool::with_resource(db.handle(), &PoolConfig::new(WORKERS, CAPACITY)).unwrap(),
    );

    let tasks: Vec<_> = (0..REQUESTS)
        .map(|id| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.submit(Context::new(), move |_, db: &MemDb| {
                    db.insert_one("load", json!({ "_id": id }))
                        .map(|res| res.inserted_id)
                })
                .await
            })
        })
        .collect();

    let mut ids: Vec<u64> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|res| res.unwrap().unwrap().as_u64().unwrap())
        .collect();
    ids.sort_unstable();

    assert_eq!(ids, (0..REQUESTS).collect::<Vec<_>>());
    assert_eq!(db.count("load").unwrap(), REQUESTS as usize);
    close(pool).await.unwrap();
}

#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrency_is_capped_at_worker_count() {
    let gauge = Arc::new(Gauge::default());
    let pool = Arc::new(Pool::with_resource(gauge, &PoolConfig::new(3, 4)).unwrap());

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.submit(Context::new(), |_, gauge: &Gauge| {
                    let active = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
                    gauge.peak.fetch_max(active, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(2));
                    gauge.active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(())
                })
                .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let peak = pool.resource().peak.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "peak concurrency was {peak}");
    tokio::task::spawn_blocking(move || pool.close())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panics_become_faults_and_the_pool_keeps_working() {
    let db = TestDb::new();
    let faults = Arc::new(AtomicUsize::new(0));
    let hook = FaultHook::new({
        let faults = Arc::clone(&faults);
        move |fault| {
            assert_eq!(fault.message(), "document store corrupted");
            faults.fetch_add(1, Ordering::SeqCst);
        }
    });
    let pool = PoolBuilder::new(PoolConfig::new(1, 5))
        .fault_hook(hook)
        .attach(db.handle())
        .unwrap();

    for _ in 0..3 {
        let err = pool
            .submit(Context::new(), |_, _: &MemDb| -> Result<(), DbError> {
                panic!("document store corrupted")
            })
            .await
            .unwrap_err();
        let fault = err.as_fault().unwrap();
        assert_eq!(fault.worker(), 0);
        assert!(fault.to_string().starts_with("bug: "));
    }

    let inserted = pool
        .submit(Context::new(), |_, db: &MemDb| {
            db.insert_one("foo", json!({ "_id": 1 }))
        })
        .await
        .unwrap();
    assert_eq!(inserted.inserted_id, json!(1));
    assert_eq!(faults.load(Ordering::SeqCst), 3);
    pool.close().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_queue_holds_submitters_back() {
    let db = TestDb::new();
    let pool = Arc::new(Pool::with_resource(db.handle(), &PoolConfig::new(1, 1)).unwrap());
    let (release, held) = occupy_worker(&pool).await;

    let queued = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            pool.submit(Context::new(), |_, db: &MemDb| {
                db.insert_one("foo", json!({ "_id": "queued" }))
            })
            .await
        })
    };
    wait_for_queued(&pool, 1).await;

    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        pool.submit(Context::new(), |_, db: &MemDb| {
            db.insert_one("foo", json!({ "_id": "blocked" }))
        }),
    )
    .await;
    assert!(blocked.is_err(), "submit should wait while the queue is full");

    release.send(()).unwrap();
    held.await.unwrap().unwrap();
    queued.await.unwrap().unwrap();
    close(pool).await.unwrap();

    assert!(db.find_one("foo", &json!("queued")).unwrap().is_some());
    assert!(db.find_one("foo", &json!("blocked")).unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_drains_queue_and_refuses_new_work() {
    let db = TestDb::new();
    let pool = Arc::new(Pool::with_resource(db.handle(), &PoolConfig::new(1, 1)).unwrap());
    let (release, held) = occupy_worker(&pool).await;

    let submit = |id: &'static str| {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            pool.submit(Context::new(), move |_, db: &MemDb| {
                db.insert_one("foo", json!({ "_id": id }))
            })
            .await
        })
    };
    let queued = submit("queued");
    wait_for_queued(&pool, 1).await;
    // Parks on the full queue.
    let parked = submit("parked");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let closer = {
        let pool = Arc::clone(&pool);
        tokio::task::spawn_blocking(move || pool.close())
    };
    while !pool.is_closed() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(parked.await.unwrap().unwrap_err().is_closed());
    assert!(submit("late").await.unwrap().unwrap_err().is_closed());

    release.send(()).unwrap();
    closer.await.unwrap().unwrap();
    held.await.unwrap().unwrap();
    queued.await.unwrap().unwrap();

    assert_eq!(db.count("foo").unwrap(), 1);
    assert!(db.find_one("foo", &json!("queued")).unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_requests_stop_waiting_and_are_skipped() {
    let db = TestDb::new();
    let pool = Arc::new(Pool::with_resource(db.handle(), &PoolConfig::new(1, 4)).unwrap());
    let (release, held) = occupy_worker(&pool).await;

    let ctx = Context::new();
    let waiting = {
        let pool = Arc::clone(&pool);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            pool.submit(ctx, |_, db: &MemDb| db.insert_one("foo", json!({ "_id": 1 })))
                .await
        })
    };
    wait_for_queued(&pool, 1).await;
    ctx.cancel();
    assert!(waiting.await.unwrap().unwrap_err().is_cancelled());

    let already_cancelled = Context::new();
    already_cancelled.cancel();
    let err = pool
        .submit(already_cancelled, |_, db: &MemDb| {
            db.insert_one("foo", json!({ "_id": 2 }))
        })
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    release.send(()).unwrap();
    held.await.unwrap().unwrap();
    close(pool).await.unwrap();
    assert_eq!(db.count("foo").unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_submissions_are_skipped() {
    let db = TestDb::new();
    let pool = Arc::new(Pool::with_resource(db.handle(), &PoolConfig::new(1, 4)).unwrap());
    let (release, held) = occupy_worker(&pool).await;

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        pool.submit(Context::new(), |_, db: &MemDb| {
            db.insert_one("foo", json!({ "_id": 1 }))
        }),
    )
    .await;
    assert!(timed_out.is_err());

    release.send(()).unwrap();
    held.await.unwrap().unwrap();
    close(pool).await.unwrap();
    assert_eq!(db.count("foo").unwrap(), 0);
}

#[test]
fn owned_resource_is_released_exactly_once() {
    let db = TestDb::new();
    let pool = Pool::<MemDb>::connect(&db.config(), &PoolConfig::new(2, 4)).unwrap();
    assert!(pool.owns_resource());

    pool.submit_blocking(Context::new(), |_, db: &MemDb| {
        db.insert_one("foo", json!({ "_id": 1 }))
    })
    .unwrap();

    let resource = Arc::clone(pool.resource());
    pool.close().unwrap();
    pool.close().unwrap();
    assert!(!resource.is_connected());
    assert_eq!(resource.disconnects(), 1);

    // The fixture's own handle is unaffected.
    assert_eq!(db.count("foo").unwrap(), 1);
}

#[test]
fn attached_resource_is_not_released() {
    let db = TestDb::new();
    let pool = Pool::with_resource(db.handle(), &PoolConfig::default()).unwrap();
    assert!(!pool.owns_resource());
    pool.close().unwrap();
    assert!(db.is_connected());
    assert_eq!(db.disconnects(), 0);
}

#[test]
fn unreachable_resource_fails_construction() {
    let config = MemDbConfig {
        database: "unreachable".to_string(),
        unreachable: true,
    };
    let err = Pool::<MemDb>::connect(&config, &PoolConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, Error::Connect(_)));
    assert_eq!(
        err.to_string(),
        "failed to connect resource: database `unreachable` is unreachable"
    );
}

#[test]
fn release_errors_surface_from_close() {
    let db = TestDb::new();
    let pool = Pool::<MemDb>::connect(&db.config(), &PoolConfig::new(2, 2)).unwrap();
    pool.resource().disconnect().unwrap();

    let err = pool.close().unwrap_err();
    assert!(matches!(err, Error::Release(_)));
    assert!(pool.is_closed());
    assert!(pool.close().is_ok());
}

#[test]
fn zero_sizing_is_rejected() {
    let db = TestDb::new();
    for config in [PoolConfig::new(0, 5), PoolConfig::new(3, 0)] {
        let err = Pool::with_resource(db.handle(), &config).err().unwrap();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
