// Copyright 2025 Rateflow Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! End-to-end worker loop: enqueue poll results, drain them through the
//! rate persister, and verify the store contents and flush behavior.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rateflow_core::{PersistConfig, PollResult, SeriesPath};
use rateflow_persistd::{shutdown_pair, PersistWorker};
use rateflow_queue::{MemoryCounterCache, PersistQueue};
use rateflow_storage::{MemoryTimeSeriesStore, Persister, RatePersister};

const CONFIG: &str = r#"
[queues.snmp]
workers = 1
persister = "rate"

[[datasets]]
name = "FastPollHC"
frequency_secs = 30
aggregates = [300]

[[datasets.oids]]
name = "ifHCInOctets"
aggregate = true
"#;

fn poll_result(timestamp: i64, val: f64) -> PollResult {
    PollResult {
        oidset_name: "FastPollHC".to_string(),
        device_name: "router1".to_string(),
        oid_name: "ifHCInOctets".to_string(),
        timestamp,
        data: vec![(
            vec!["ifHCInOctets".to_string(), "xe-0/0/0".to_string()],
            Some(val),
        )],
        metadata: BTreeMap::new(),
    }
}

fn series_path() -> SeriesPath {
    SeriesPath::from_parts(
        "snmp",
        "router1",
        "FastPollHC",
        &["ifHCInOctets".to_string(), "xe-0/0/0".to_string()],
    )
}

#[tokio::test]
async fn test_worker_drains_queue_and_flushes_when_idle() {
    let config: Arc<PersistConfig> = Arc::new(toml::from_str(CONFIG).unwrap());
    let cache = Arc::new(MemoryCounterCache::new());

    let producer = PersistQueue::new("snmp", cache.clone()).await.unwrap();
    producer.put(&poll_result(30, 100.0)).await.unwrap();
    producer.put(&poll_result(60, 400.0)).await.unwrap();

    let store = Arc::new(MemoryTimeSeriesStore::new());
    let persister: Box<dyn Persister> =
        Box::new(RatePersister::new(config.clone(), store.clone()));
    let consumer = PersistQueue::new("snmp", cache.clone()).await.unwrap();

    let (handle, token) = shutdown_pair();
    let mut worker = PersistWorker::new(consumer, persister, &config, token);
    let running = tokio::spawn(async move { worker.run().await });

    // The worker flushes batched rollup writes on its first empty poll;
    // wait for the committed view to appear.
    let flushed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if store
                .committed_rate_aggregation(&series_path(), 300_000, 0)
                .is_some()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(flushed.is_ok(), "worker never flushed the rollup writes");

    handle.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(store.raw_point_count(), 2);

    let bins = store.rate_bin_values(&series_path(), 30_000);
    let total: f64 = bins.values().sum();
    assert!((total - 300.0).abs() < 1e-9);

    let agg = store
        .committed_rate_aggregation(&series_path(), 300_000, 0)
        .unwrap();
    assert_eq!(agg.sum, 300.0);
    assert_eq!(agg.count, 1);

    // The stat rollup was flushed by the engine as soon as a bound moved.
    let stat = store
        .committed_stat_aggregation(&series_path(), 300_000, 0)
        .unwrap();
    assert_eq!(stat.min, 300.0);
    assert_eq!(stat.max, 300.0);

    let depth = PersistQueue::new("snmp", cache).await.unwrap();
    assert_eq!(depth.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_worker_stops_promptly_on_cancel_while_idle() {
    let config: Arc<PersistConfig> = Arc::new(toml::from_str(CONFIG).unwrap());
    let cache = Arc::new(MemoryCounterCache::new());
    let queue = PersistQueue::new("snmp", cache).await.unwrap();

    let store = Arc::new(MemoryTimeSeriesStore::new());
    let persister: Box<dyn Persister> = Box::new(RatePersister::new(config.clone(), store));

    let (handle, token) = shutdown_pair();
    let mut worker = PersistWorker::new(queue, persister, &config, token);
    let running = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("worker did not stop after cancellation")
        .unwrap()
        .unwrap();
}
