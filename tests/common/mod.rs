//! Shared fixtures for scenario tests: an in-memory store wired into the
//! full service with recording ports.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use wanderpool::config::AppConfig;
use wanderpool::model::{Contact, Destination, Interest, InterestStatus};
use wanderpool::ops::CoreService;
use wanderpool::ports::{MockPayments, RecordingNotifier};
use wanderpool::store::{MemoryStore, Store};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub payments: Arc<MockPayments>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: Arc<CoreService<MockPayments, RecordingNotifier>>,
    pub destination: Destination,
}

/// A fixed "today" for every scenario; interests are laid out in June 2025.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, d, 0, 0, 0).unwrap()
}

pub async fn harness() -> Harness {
    harness_with(AppConfig::from_env()).await
}

pub async fn harness_with(cfg: AppConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let payments = Arc::new(MockPayments::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let destination = Destination {
        id: Uuid::new_v4(),
        name: "Lisbon".to_string(),
        base_price: 40_000.0,
        max_discount: 0.25,
        is_active: true,
    };
    store.insert_destination(&destination).await.unwrap();

    let service = CoreService::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&payments),
        Arc::clone(&notifier),
        cfg,
    );

    Harness {
        store,
        payments,
        notifier,
        service,
        destination,
    }
}

pub fn mk_interest(
    destination_id: Uuid,
    name: &str,
    from_day: u32,
    to_day: u32,
    party: u32,
    budget: Option<(f64, f64)>,
) -> Interest {
    Interest {
        id: Uuid::new_v4(),
        destination_id,
        contact: Contact {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: None,
        },
        party_size: party,
        date_from: day(from_day),
        date_to: day(to_day),
        budget_min: budget.map(|(lo, _)| lo),
        budget_max: budget.map(|(_, hi)| hi),
        status: InterestStatus::Open,
        group_id: None,
        created_at: now(),
    }
}

pub async fn seed(store: &MemoryStore, interests: &[Interest]) {
    for i in interests {
        store.insert_interest(i).await.unwrap();
    }
}
