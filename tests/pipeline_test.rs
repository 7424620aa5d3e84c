//! End-to-end pipeline scenarios over the in-process implementations:
//! admission gate → reservation queue → payment worker → status notifier.

#![allow(clippy::unwrap_used)]

use flash_sale::notifier::StatusFeed;
use flash_sale::queue::ReservationSource;
use flash_sale::{
    Admission, AdmissionGate, FlashSale, FlashSaleError, InstanceId, MemoryQueue, MemorySource,
    MemoryStatusNotifier, MemoryStockCache, MemoryStorage, Money, OrderStatus, PaymentWorker,
    StatusUpdate, StockCache, Storage, User, UserId, Voucher, VoucherId,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

const VOUCHER: VoucherId = VoucherId::new(1);
const PRICE: Money = Money::from_cents(400);

struct Pipeline {
    storage: Arc<MemoryStorage>,
    cache: Arc<MemoryStockCache>,
    notifier: MemoryStatusNotifier,
    gate: AdmissionGate,
    source: MemorySource,
    worker: PaymentWorker,
}

fn pipeline(quantity: u32) -> Pipeline {
    let storage = Arc::new(MemoryStorage::new());
    storage.insert_voucher(Voucher {
        id: VOUCHER,
        name: "flash".to_string(),
        description: "flash sale voucher".to_string(),
        price: PRICE,
        quantity,
        deleted: false,
    });
    let cache = Arc::new(MemoryStockCache::new());
    let notifier = MemoryStatusNotifier::new();
    let (queue, source) = MemoryQueue::channel();
    let gate = AdmissionGate::new(
        Arc::clone(&cache) as Arc<dyn StockCache>,
        Arc::new(queue),
        InstanceId::new("test-instance"),
    );
    let worker = PaymentWorker::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        Arc::clone(&cache) as Arc<dyn StockCache>,
        Arc::new(notifier.clone()),
        Duration::ZERO,
    );
    Pipeline {
        storage,
        cache,
        notifier,
        gate,
        source,
        worker,
    }
}

impl Pipeline {
    async fn seed_cache(&self) {
        let voucher = self.storage.voucher(VOUCHER).unwrap();
        self.cache.refresh_mirror(&voucher).await.unwrap();
    }

    fn seed_user(&self, id: u64, credit: Money) {
        self.storage.insert_user(User {
            id: UserId::new(id),
            username: format!("user-{id}"),
            credit,
        });
    }

    /// Settles every queued reservation, in order.
    async fn drain(&mut self) {
        loop {
            let next = tokio::time::timeout(Duration::from_millis(50), self.source.recv()).await;
            match next {
                Ok(Some(message)) => self.worker.process(&message).await,
                _ => break,
            }
        }
    }
}

// Scenario: counter=1, two concurrent reservations for different users.
#[tokio::test(flavor = "multi_thread")]
async fn one_unit_two_concurrent_buyers_admits_exactly_one() {
    let pl = pipeline(1);
    pl.seed_cache().await;
    let gate = Arc::new(pl.gate);

    let first = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.reserve(VOUCHER, UserId::new(10)).await.unwrap() })
    };
    let second = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.reserve(VOUCHER, UserId::new(11)).await.unwrap() })
    };

    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let admitted = outcomes
        .iter()
        .filter(|a| matches!(a, Admission::Admitted { .. }))
        .count();
    let sold_out = outcomes
        .iter()
        .filter(|a| {
            matches!(
                a,
                Admission::Rejected(flash_sale::ReservationOutcome::OutOfStock)
            )
        })
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(sold_out, 1);
    assert_eq!(pl.cache.remaining(VOUCHER).await.unwrap(), Some(0));
}

// Scenario: same user reserves the same voucher twice sequentially.
#[tokio::test]
async fn same_user_twice_decrements_only_once() {
    let pl = pipeline(5);
    pl.seed_cache().await;

    let first = pl.gate.reserve(VOUCHER, UserId::new(10)).await.unwrap();
    assert!(matches!(first, Admission::Admitted { .. }));

    let second = pl.gate.reserve(VOUCHER, UserId::new(10)).await.unwrap();
    assert_eq!(
        second,
        Admission::Rejected(flash_sale::ReservationOutcome::DuplicatePurchase)
    );
    assert_eq!(pl.cache.remaining(VOUCHER).await.unwrap(), Some(4));
}

// Scenario: reservation succeeds, worker finds credit < price.
#[tokio::test]
async fn insufficient_credit_fails_compensates_and_notifies_in_order() {
    let mut pl = pipeline(3);
    pl.seed_cache().await;
    pl.seed_user(10, Money::from_cents(100));
    let mut feed = pl
        .notifier
        .subscribe(&InstanceId::new("test-instance"))
        .await
        .unwrap();

    let admission = pl.gate.reserve(VOUCHER, UserId::new(10)).await.unwrap();
    let Admission::Admitted { order_id, .. } = admission else {
        unreachable!("fresh voucher must admit");
    };
    assert_eq!(pl.cache.remaining(VOUCHER).await.unwrap(), Some(2));

    pl.drain().await;

    // Order failed, counter restored to the value before the reservation.
    assert_eq!(
        pl.storage.order(order_id).unwrap().status,
        OrderStatus::Failed
    );
    assert_eq!(pl.cache.remaining(VOUCHER).await.unwrap(), Some(3));
    // Durable accounting untouched.
    assert_eq!(pl.storage.voucher(VOUCHER).unwrap().quantity, 3);
    assert_eq!(
        pl.storage.user(UserId::new(10)).unwrap().credit,
        Money::from_cents(100)
    );

    // Events arrive in order: started, then the terminal failure.
    assert_eq!(feed.next().await.unwrap().status, StatusUpdate::Started);
    assert!(matches!(
        feed.next().await.unwrap().status,
        StatusUpdate::Failed { .. }
    ));
}

// Scenario: reservation succeeds, worker finds sufficient credit.
#[tokio::test]
async fn sufficient_credit_confirms_and_notifies_in_order() {
    let mut pl = pipeline(3);
    pl.seed_cache().await;
    pl.seed_user(10, Money::from_cents(1000));
    let mut feed = pl
        .notifier
        .subscribe(&InstanceId::new("test-instance"))
        .await
        .unwrap();

    let admission = pl.gate.reserve(VOUCHER, UserId::new(10)).await.unwrap();
    let Admission::Admitted { order_id, .. } = admission else {
        unreachable!("fresh voucher must admit");
    };

    pl.drain().await;

    let order = pl.storage.order(order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert!(order.payment_success);
    assert_eq!(
        pl.storage.user(UserId::new(10)).unwrap().credit,
        Money::from_cents(600)
    );
    assert_eq!(pl.storage.voucher(VOUCHER).unwrap().quantity, 2);
    // The cache counter is not touched on success; it reconciles lazily.
    assert_eq!(pl.cache.remaining(VOUCHER).await.unwrap(), Some(2));

    assert_eq!(feed.next().await.unwrap().status, StatusUpdate::Started);
    assert_eq!(feed.next().await.unwrap().status, StatusUpdate::Successful);
}

// Conservation: counter plus confirmed orders is invariant once the queue
// drains, whatever mix of rich and broke buyers arrived.
#[tokio::test]
async fn counter_plus_confirmed_orders_is_conserved() {
    let initial = 8u32;
    let mut pl = pipeline(initial);
    pl.seed_cache().await;
    for id in 0..12u64 {
        // Even ids can afford the voucher, odd ids cannot.
        let credit = if id % 2 == 0 {
            Money::from_cents(1000)
        } else {
            Money::from_cents(50)
        };
        pl.seed_user(id, credit);
    }

    for id in 0..12u64 {
        let _ = pl.gate.reserve(VOUCHER, UserId::new(id)).await.unwrap();
    }
    pl.drain().await;

    let orders = pl.storage.orders_for_voucher(VOUCHER).await.unwrap();
    assert!(orders.iter().all(|o| o.status.is_terminal()));
    let confirmed = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Confirmed)
        .count();
    let counter = pl.cache.remaining(VOUCHER).await.unwrap().unwrap();
    assert_eq!(counter + i64::try_from(confirmed).unwrap(), i64::from(initial));

    // Durable stock agrees with the confirmed count.
    assert_eq!(
        pl.storage.voucher(VOUCHER).unwrap().quantity,
        initial - u32::try_from(confirmed).unwrap()
    );
}

// The purchase facade maps outcomes onto the caller-facing error taxonomy
// while the worker settles in the background.
#[tokio::test]
async fn facade_and_worker_cooperate_end_to_end() {
    let pl = pipeline(1);
    pl.seed_cache().await;
    pl.seed_user(10, Money::from_cents(1000));
    let Pipeline {
        storage,
        gate,
        mut source,
        worker,
        ..
    } = pl;
    let sale = FlashSale::new(gate);

    let purchase = sale.purchase(VOUCHER, UserId::new(10)).await.unwrap();
    assert_eq!(purchase.remaining, 0);

    let rejected = sale.purchase(VOUCHER, UserId::new(11)).await;
    assert!(matches!(rejected, Err(FlashSaleError::OutOfStock)));

    while let Ok(Some(message)) =
        tokio::time::timeout(Duration::from_millis(50), source.recv()).await
    {
        worker.process(&message).await;
    }
    assert_eq!(
        storage.order(purchase.order_id).unwrap().status,
        OrderStatus::Confirmed
    );
}
