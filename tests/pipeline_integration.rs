use box_sentinel::config::Config;
use box_sentinel::error::ScanError;
use box_sentinel::market::{Candle, ClientRegistry, MarketDataClient};
use box_sentinel::pipeline::{ConfirmationOutcome, Pipeline, SnipeOutcome};
use box_sentinel::state::{Direction, MemoryStateStore, PendingConfirmation, StateStore, WatchEntry};
use box_sentinel::testing::{box_candles, range_candles, MockMarketClient, RecordingSink, HOUR_MS};
use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;

// Hour-aligned start of the synthetic series.
const T0: i64 = 1_699_999_200_000;
const BARS: usize = 120;
const ID: &str = "okx:ALTUSDT";

struct Harness {
    pipeline: Pipeline,
    okx: Arc<MockMarketClient>,
    store: Arc<MemoryStateStore>,
    sink: Arc<RecordingSink>,
}

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

/// Half an hour into the newest (still-forming) bar.
fn scan_time() -> DateTime<Utc> {
    at(T0 + (BARS as i64 - 1) * HOUR_MS + 30 * 60_000)
}

/// Open time of the bar the breakout happened in.
fn breakout_bar_open() -> i64 {
    T0 + (BARS as i64 - 1) * HOUR_MS
}

fn harness_with_store(store: Arc<MemoryStateStore>) -> Harness {
    let okx = Arc::new(MockMarketClient::new("okx"));
    let mut clients: ClientRegistry = ClientRegistry::new();
    clients.insert("okx".to_string(), okx.clone() as Arc<dyn MarketDataClient>);

    let sink = Arc::new(RecordingSink::new());
    let pipeline = Pipeline::new(
        Arc::new(Config::test_default()),
        clients,
        store.clone() as Arc<dyn StateStore>,
        sink.clone(),
    );
    Harness {
        pipeline,
        okx,
        store,
        sink,
    }
}

fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStateStore::new()))
}

/// Lists ALTUSDT with a 110 / 100 box and runs one radar cycle.
async fn lock_box(h: &Harness) {
    h.okx.list("ALTUSDT", "ALT", "USDT", 5_000_000.0);
    h.okx.list("THINUSDT", "THIN", "USDT", 50_000.0);
    h.okx.set_candles("ALTUSDT", box_candles(T0, 110.0, 100.0, BARS));
    h.okx.set_price("ALTUSDT", 105.0);

    let created = h.pipeline.run_radar_cycle(scan_time()).await;
    assert_eq!(created, 1);
    assert!(h.pipeline.watchlist().get_watch(ID).is_some());
}

fn closed_bar(close: f64) -> Candle {
    Candle {
        open_time: breakout_bar_open(),
        open: 109.0,
        high: close.max(111.5),
        low: 108.0,
        close,
        volume: 1_000.0,
    }
}

/// Triggers an upside breakout at 111 and returns the resulting pending entry.
async fn trigger_up(h: &Harness) -> PendingConfirmation {
    h.okx.set_price("ALTUSDT", 111.0);
    let outcomes = h.pipeline.sniper().run_cycle(scan_time()).await;
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        SnipeOutcome::Triggered(pending) => pending.clone(),
        other => panic!("expected a trigger, got {:?}", other),
    }
}

fn confirmation_time() -> DateTime<Utc> {
    at(breakout_bar_open() + HOUR_MS + 2 * 60_000)
}

#[tokio::test]
async fn test_radar_locks_box_and_skips_thin_symbols() {
    let h = harness();
    lock_box(&h).await;

    let watch = h.pipeline.watchlist().get_watch(ID).unwrap();
    assert_eq!(watch.range_high, 110.0);
    assert_eq!(watch.range_low, 100.0);
    assert_eq!(watch.expires_at, scan_time() + Duration::hours(4));
    assert!(h.pipeline.watchlist().get_watch("okx:THINUSDT").is_none());
    assert_eq!(h.store.watch_ids(), vec![ID.to_string()]);

    // Already tracked, so the next cycle neither re-fetches nor duplicates it.
    let calls = h.okx.candle_calls();
    assert_eq!(h.pipeline.run_radar_cycle(scan_time()).await, 0);
    assert_eq!(h.okx.candle_calls(), calls);
    assert_eq!(h.pipeline.watchlist().watch_count(), 1);
}

#[tokio::test]
async fn test_price_inside_box_keeps_watching() {
    let h = harness();
    lock_box(&h).await;

    let outcomes = h.pipeline.sniper().run_cycle(scan_time()).await;
    assert_eq!(outcomes, vec![SnipeOutcome::Inside { price: 105.0 }]);
    assert!(h.pipeline.watchlist().get_watch(ID).is_some());
    assert_eq!(h.pipeline.watchlist().claimed_count(), 0);
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn test_breakout_then_false_breakout() {
    let h = harness();
    lock_box(&h).await;

    let pending = trigger_up(&h).await;
    assert_eq!(pending.direction, Direction::Up);
    assert_eq!(pending.break_level, 110.0);
    assert_eq!(pending.trigger_price, 111.0);
    assert_eq!(pending.candle_close_ts, breakout_bar_open() + HOUR_MS);

    assert!(h.pipeline.watchlist().get_watch(ID).is_none());
    assert_eq!(h.pipeline.watchlist().pending_count(), 1);
    assert_eq!(h.store.watch_ids(), Vec::<String>::new());
    assert_eq!(h.store.pending_ids(), vec![ID.to_string()]);
    assert_eq!(h.sink.subjects(), vec!["🚀 [UNCONFIRMED] BREAKOUT UP ALTUSDT".to_string()]);

    // A second sniper pass finds nothing to claim.
    assert!(h.pipeline.sniper().run_cycle(scan_time()).await.is_empty());

    // Before the close plus buffer nothing is checked.
    let early = at(pending.candle_close_ts + 30_000);
    assert!(h.pipeline.confirmation().run_cycle(early).await.is_empty());

    let mut candles = box_candles(T0, 110.0, 100.0, BARS);
    candles.pop();
    candles.push(closed_bar(108.0));
    h.okx.set_candles("ALTUSDT", candles);

    let outcomes = h.pipeline.confirmation().run_cycle(confirmation_time()).await;
    assert_eq!(
        outcomes,
        vec![(ID.to_string(), ConfirmationOutcome::FalseBreakout { close: 108.0 })]
    );
    assert_eq!(h.pipeline.watchlist().pending_count(), 0);
    assert_eq!(h.store.pending_ids(), Vec::<String>::new());
    assert_eq!(h.sink.len(), 1);
    assert_eq!(h.pipeline.metrics().snapshot().false_breakouts, 1);
}

#[tokio::test]
async fn test_confirmed_breakout_sends_digest_once() {
    let h = harness();
    lock_box(&h).await;
    trigger_up(&h).await;

    let mut candles = box_candles(T0, 110.0, 100.0, BARS);
    candles.pop();
    candles.push(closed_bar(111.5));
    h.okx.set_candles("ALTUSDT", candles);

    let outcomes = h.pipeline.confirmation().run_cycle(confirmation_time()).await;
    assert_eq!(
        outcomes,
        vec![(
            ID.to_string(),
            ConfirmationOutcome::Confirmed {
                close: 111.5,
                alerted: true
            }
        )]
    );
    let subjects = h.sink.subjects();
    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[1], "✅ 1 breakout(s) confirmed");
    assert!(h.sink.alerts()[1].body.contains("ALTUSDT"));
    assert!(h.sink.alerts()[1].is_structured);

    // Nothing pending any more, so a later pass is a no-op.
    assert!(h.pipeline.confirmation().run_cycle(confirmation_time()).await.is_empty());
    assert_eq!(h.sink.len(), 2);
}

#[tokio::test]
async fn test_reconfirmation_inside_cooldown_is_suppressed() {
    let h = harness();
    lock_box(&h).await;
    trigger_up(&h).await;

    let mut candles = box_candles(T0, 110.0, 100.0, BARS);
    candles.pop();
    candles.push(closed_bar(111.5));
    h.okx.set_candles("ALTUSDT", candles);
    h.pipeline.confirmation().run_cycle(confirmation_time()).await;

    // The same symbol breaks again within the hour.
    let again = PendingConfirmation {
        id: ID.to_string(),
        provider: "okx".to_string(),
        symbol: "ALTUSDT".to_string(),
        direction: Direction::Up,
        break_level: 110.0,
        trigger_price: 111.2,
        candle_close_ts: breakout_bar_open() + HOUR_MS,
        triggered_at: confirmation_time(),
    };
    h.pipeline.watchlist().promote(again).await;

    let outcomes = h.pipeline.confirmation().run_cycle(confirmation_time()).await;
    assert_eq!(
        outcomes,
        vec![(
            ID.to_string(),
            ConfirmationOutcome::Confirmed {
                close: 111.5,
                alerted: false
            }
        )]
    );
    assert_eq!(h.sink.len(), 2);
    assert_eq!(h.pipeline.metrics().snapshot().alerts_suppressed, 1);
}

#[tokio::test]
async fn test_unstable_base_is_discarded_without_alert() {
    let h = harness();
    lock_box(&h).await;

    // Pre-breakout bars far wider than the box's average bar.
    let now_bar = breakout_bar_open();
    h.okx.set_candles("ALTUSDT", range_candles(now_bar - 11 * HOUR_MS, 12, 105.0, 10.0));
    h.okx.set_price("ALTUSDT", 111.0);

    let outcomes = h.pipeline.sniper().run_cycle(scan_time()).await;
    assert!(matches!(outcomes.as_slice(), [SnipeOutcome::BaseDestabilized { .. }]));
    assert!(!h.pipeline.watchlist().is_tracked(ID));
    assert_eq!(h.store.watch_ids(), Vec::<String>::new());
    assert!(h.sink.is_empty());
    assert_eq!(h.pipeline.metrics().snapshot().base_destabilized, 1);
}

#[tokio::test]
async fn test_short_gate_history_releases_watch() {
    let h = harness();
    lock_box(&h).await;

    // Only four bars come back, too few for the volatility gate.
    let now_bar = breakout_bar_open();
    h.okx.set_candles("ALTUSDT", range_candles(now_bar - 3 * HOUR_MS, 4, 105.0, 1.0));
    h.okx.set_price("ALTUSDT", 111.0);

    let outcomes = h.pipeline.sniper().run_cycle(scan_time()).await;
    assert!(matches!(outcomes.as_slice(), [SnipeOutcome::GateInsufficient { .. }]));
    assert!(h.pipeline.watchlist().get_watch(ID).is_some());
    assert_eq!(h.pipeline.watchlist().claimed_count(), 0);
    assert_eq!(h.pipeline.watchlist().pending_count(), 0);
    assert_eq!(h.store.watch_ids(), vec![ID.to_string()]);
    assert!(h.sink.is_empty());

    // With full history back the same watch triggers on the next cycle.
    h.okx.set_candles("ALTUSDT", box_candles(T0, 110.0, 100.0, BARS));
    trigger_up(&h).await;
    assert_eq!(h.sink.len(), 1);
}

#[tokio::test]
async fn test_ticker_failure_releases_watch() {
    let h = harness();
    lock_box(&h).await;

    h.okx.fail_next_tickers(vec![ScanError::InvalidSymbol("ALTUSDT".to_string())]);
    let outcomes = h.pipeline.sniper().run_cycle(scan_time()).await;
    assert_eq!(outcomes, vec![SnipeOutcome::FetchFailed]);
    assert!(h.pipeline.watchlist().get_watch(ID).is_some());
    assert_eq!(h.pipeline.watchlist().claimed_count(), 0);
}

#[tokio::test]
async fn test_candle_fetch_failure_keeps_pending() {
    let h = harness();
    lock_box(&h).await;
    trigger_up(&h).await;

    h.okx.fail_next_candles(
        (0..4)
            .map(|_| ScanError::Network("connection reset".to_string()))
            .collect(),
    );
    let outcomes = h.pipeline.confirmation().run_cycle(confirmation_time()).await;
    assert_eq!(outcomes, vec![(ID.to_string(), ConfirmationOutcome::FetchFailed)]);
    assert_eq!(h.pipeline.watchlist().pending_count(), 1);
    assert_eq!(h.store.pending_ids(), vec![ID.to_string()]);
    assert_eq!(h.pipeline.metrics().snapshot().api_retries, 3);
}

#[tokio::test]
async fn test_timestamp_mismatch_discards_pending() {
    let h = harness();
    lock_box(&h).await;
    trigger_up(&h).await;

    // Provider skipped the breakout bar and only has the next one.
    let mut late = closed_bar(111.5);
    late.open_time += HOUR_MS;
    h.okx.set_candles("ALTUSDT", vec![late]);

    let outcomes = h.pipeline.confirmation().run_cycle(confirmation_time()).await;
    assert_eq!(
        outcomes,
        vec![(
            ID.to_string(),
            ConfirmationOutcome::TimestampMismatch {
                expected: breakout_bar_open(),
                got: breakout_bar_open() + HOUR_MS
            }
        )]
    );
    assert_eq!(h.pipeline.watchlist().pending_count(), 0);
    assert_eq!(h.sink.len(), 1);
}

#[tokio::test]
async fn test_restart_recovers_live_state() {
    let store = Arc::new(MemoryStateStore::new());
    let now = scan_time();

    let live = WatchEntry {
        id: "okx:LIVEUSDT".to_string(),
        provider: "okx".to_string(),
        symbol: "LIVEUSDT".to_string(),
        range_high: 2.0,
        range_low: 1.9,
        base_volatility: 0.01,
        created_at: now - Duration::hours(1),
        expires_at: now + Duration::hours(3),
    };
    let expired = WatchEntry {
        id: "okx:OLDUSDT".to_string(),
        symbol: "OLDUSDT".to_string(),
        expires_at: now - Duration::minutes(1),
        ..live.clone()
    };
    let pending = PendingConfirmation {
        id: ID.to_string(),
        provider: "okx".to_string(),
        symbol: "ALTUSDT".to_string(),
        direction: Direction::Down,
        break_level: 100.0,
        trigger_price: 99.0,
        candle_close_ts: breakout_bar_open() + HOUR_MS,
        triggered_at: now,
    };
    store.upsert_watch(&live).await.unwrap();
    store.upsert_watch(&expired).await.unwrap();
    store.upsert_pending(&pending).await.unwrap();

    let h = harness_with_store(store);
    let report = h.pipeline.recover(now).await.unwrap();
    assert_eq!(report.watches_restored, 1);
    assert_eq!(report.pending_restored, 1);
    assert_eq!(report.expired_purged, 1);
    assert_eq!(report.orphaned_purged, 0);

    assert!(h.pipeline.watchlist().get_watch("okx:LIVEUSDT").is_some());
    assert_eq!(h.pipeline.watchlist().get_pending(ID), Some(pending));
    assert_eq!(h.store.watch_ids(), vec!["okx:LIVEUSDT".to_string()]);

    // The recovered pending entry confirms like any other.
    let mut bar = closed_bar(98.0);
    bar.high = 101.0;
    bar.low = 97.5;
    h.okx.set_candles("ALTUSDT", vec![bar]);
    let outcomes = h.pipeline.confirmation().run_cycle(confirmation_time()).await;
    assert_eq!(
        outcomes,
        vec![(
            ID.to_string(),
            ConfirmationOutcome::Confirmed {
                close: 98.0,
                alerted: true
            }
        )]
    );
}

#[tokio::test]
async fn test_store_outage_keeps_memory_authoritative() {
    let h = harness();
    h.store.set_fail_writes(true);
    lock_box(&h).await;

    let pending = trigger_up(&h).await;
    assert_eq!(h.pipeline.watchlist().get_pending(ID), Some(pending));
    assert!(h.pipeline.metrics().snapshot().persistence_errors >= 2);
}
