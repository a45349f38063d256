//! Property tests for scheduler invariants
//!
//! - Round-robin: N ticks from any stored queue position visit tables in
//!   order, each within one visit of N / tables
//! - Watermark: the persisted timestamp never moves backwards, whatever
//!   order rows are modified in between ticks

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use movies_etl::infrastructure::FilmRow;
use movies_etl::watermark::parse_watermark;
use movies_etl::{
    InMemoryIndex, InMemorySource, RetryPolicy, Role, SyncScheduler, SyncSettings,
};
use movies_etl_state::{InMemoryStateStore, LAST_MODIFIED_KEY, QUEUE_INDEX_KEY};
use proptest::prelude::*;
use uuid::Uuid;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn scheduler(
    store: &InMemoryStateStore,
    source: &InMemorySource,
    index: &InMemoryIndex,
) -> SyncScheduler {
    let settings = SyncSettings {
        chunk_size: 3,
        tick_interval_ms: 1,
        ..SyncSettings::default()
    };
    SyncScheduler::new(
        &settings,
        RetryPolicy::none(),
        Arc::new(store.clone()),
        Arc::new(source.clone()),
        Arc::new(index.clone()),
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_round_robin_fairness(start in -20i64..20, ticks in 1usize..15) {
        let store = InMemoryStateStore::with_values([(QUEUE_INDEX_KEY, start.to_string())]);
        let source = InMemorySource::new();
        let index = InMemoryIndex::new();
        let sched = scheduler(&store, &source, &index);
        let n = sched.tables().len();

        let visited: Vec<usize> = runtime().block_on(async {
            let mut visited = Vec::new();
            for _ in 0..ticks {
                visited.push(sched.tick().await.unwrap().table_index);
            }
            visited
        });

        let first = start.rem_euclid(n as i64) as usize;
        for (i, table_index) in visited.iter().enumerate() {
            prop_assert_eq!(*table_index, (first + i) % n);
        }
        for table in 0..n {
            let count = visited.iter().filter(|&&t| t == table).count();
            prop_assert!(count == ticks / n || count == ticks / n + 1);
        }
    }

    #[test]
    fn test_watermark_never_decreases(
        rounds in prop::collection::vec(
            (prop::collection::vec(-500i64..500, 0..6), prop::collection::vec(-500i64..500, 0..6)),
            1..6,
        ),
    ) {
        let store = InMemoryStateStore::new();
        let source = InMemorySource::new();
        let index = InMemoryIndex::new();
        let sched = scheduler(&store, &source, &index);
        let anchor = Uuid::from_u128(u128::MAX);
        source.insert_film(FilmRow::new(anchor, "Anchor", ts(-1_000)));

        let watermarks: Vec<Option<DateTime<Utc>>> = runtime().block_on(async {
            let mut seen = Vec::new();
            let mut next_id = 1u128;
            for (films, persons) in &rounds {
                for secs in films {
                    source.insert_film(FilmRow::new(Uuid::from_u128(next_id), "Film", ts(*secs)));
                    next_id += 1;
                }
                for secs in persons {
                    let person = Uuid::from_u128(next_id);
                    source.insert_person(person, "Person", ts(*secs));
                    source.link_person(anchor, person, Role::Actor);
                    next_id += 1;
                }
                for _ in 0..sched.tables().len() {
                    sched.tick().await.unwrap();
                    let raw = store.snapshot().get(LAST_MODIFIED_KEY).cloned();
                    seen.push(raw.as_deref().and_then(parse_watermark));
                }
            }
            seen
        });

        for pair in watermarks.windows(2) {
            prop_assert!(pair[0] <= pair[1], "watermark went back: {:?} -> {:?}", pair[0], pair[1]);
        }
        prop_assert!(watermarks.last().unwrap().is_some());
    }
}
