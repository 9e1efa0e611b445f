//! Consolidation ("box") detection over closed hourly bars, and the analyzer
//! that turns radar targets into watchlist entries.

use crate::api::executor::RequestExecutor;
use crate::discovery::radar::Target;
use crate::market::{Candle, Timeframe};
use crate::metrics::PipelineMetrics;
use crate::notify::{Alert, NotificationSink};
use crate::state::{entry_id, WatchEntry, Watchlist};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct StructureParams {
    /// Number of closed bars forming the box
    pub min_history: usize,
    pub min_amplitude: f64,
    pub max_amplitude: f64,
    /// Fraction of the range treated as the upper / lower edge zone
    pub edge_zone_pct: f64,
    pub rejection_wick_ratio: f64,
    pub min_touches: usize,
    pub min_rejections: usize,
    pub squeeze_lookback: usize,
    pub squeeze_factor: f64,
}

impl Default for StructureParams {
    fn default() -> Self {
        Self {
            min_history: 90,
            min_amplitude: 0.015,
            max_amplitude: 0.12,
            edge_zone_pct: 0.15,
            rejection_wick_ratio: 1.5,
            min_touches: 3,
            min_rejections: 1,
            squeeze_lookback: 4,
            squeeze_factor: 0.75,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub timeframe: Timeframe,
    pub fetch_limit: usize,
    pub watch_ttl: Duration,
    pub max_concurrent: usize,
    pub announce_new_watches: bool,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H1,
            fetch_limit: 120,
            watch_ttl: Duration::from_secs(4 * 3600),
            max_concurrent: 20,
            announce_new_watches: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructureCandidate {
    pub range_high: f64,
    pub range_low: f64,
    pub amplitude: f64,
    pub touch_count: usize,
    pub rejection_count: usize,
    pub base_volatility: f64,
    pub squeeze_ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoxRejection {
    InsufficientHistory { have: usize, need: usize },
    NonPositiveLow,
    AmplitudeOutOfRange(f64),
    TooFewTouches(usize),
    TooFewRejections(usize),
    NoSqueeze { recent: f64, base: f64 },
}

impl fmt::Display for BoxRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoxRejection::InsufficientHistory { have, need } => write!(f, "history {} < {}", have, need),
            BoxRejection::NonPositiveLow => write!(f, "range low <= 0"),
            BoxRejection::AmplitudeOutOfRange(a) => write!(f, "amplitude {:.2}% out of range", a * 100.0),
            BoxRejection::TooFewTouches(n) => write!(f, "{} touches", n),
            BoxRejection::TooFewRejections(n) => write!(f, "{} rejections", n),
            BoxRejection::NoSqueeze { recent, base } => {
                write!(f, "no squeeze (recent {:.6} vs base {:.6})", recent, base)
            }
        }
    }
}

fn mean_range(bars: &[Candle]) -> f64 {
    if bars.is_empty() {
        return 0.0;
    }
    bars.iter().map(Candle::range).sum::<f64>() / bars.len() as f64
}

/// Evaluates the `min_history` bars before the still-forming last bar.
pub fn detect_box(candles: &[Candle], params: &StructureParams) -> Result<StructureCandidate, BoxRejection> {
    let need = params.min_history + 1;
    if candles.len() < need {
        return Err(BoxRejection::InsufficientHistory {
            have: candles.len(),
            need,
        });
    }
    let end = candles.len() - 1;
    let bars = &candles[end - params.min_history..end];

    let range_high = bars.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let range_low = bars.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    if range_low <= 0.0 {
        return Err(BoxRejection::NonPositiveLow);
    }

    let amplitude = (range_high - range_low) / range_low;
    if amplitude < params.min_amplitude || amplitude > params.max_amplitude {
        return Err(BoxRejection::AmplitudeOutOfRange(amplitude));
    }

    let zone = (range_high - range_low) * params.edge_zone_pct;
    let upper_zone = range_high - zone;
    let lower_zone = range_low + zone;

    let mut touch_count = 0;
    let mut rejection_count = 0;
    for bar in bars {
        let body = bar.body();
        if bar.high >= upper_zone {
            touch_count += 1;
            if bar.upper_wick() > body * params.rejection_wick_ratio {
                rejection_count += 1;
            }
        } else if bar.low <= lower_zone {
            touch_count += 1;
            if bar.lower_wick() > body * params.rejection_wick_ratio {
                rejection_count += 1;
            }
        }
    }
    if touch_count < params.min_touches {
        return Err(BoxRejection::TooFewTouches(touch_count));
    }
    if rejection_count < params.min_rejections {
        return Err(BoxRejection::TooFewRejections(rejection_count));
    }

    let base_volatility = mean_range(bars);
    let recent = mean_range(&bars[bars.len() - params.squeeze_lookback.min(bars.len())..]);
    if recent > base_volatility * params.squeeze_factor {
        return Err(BoxRejection::NoSqueeze {
            recent,
            base: base_volatility,
        });
    }

    Ok(StructureCandidate {
        range_high,
        range_low,
        amplitude,
        touch_count,
        rejection_count,
        base_volatility,
        squeeze_ratio: if base_volatility > 0.0 { recent / base_volatility } else { 0.0 },
    })
}

pub struct StructureAnalyzer {
    executor: Arc<RequestExecutor>,
    watchlist: Arc<Watchlist>,
    sink: Arc<dyn NotificationSink>,
    metrics: Arc<PipelineMetrics>,
    params: StructureParams,
    settings: AnalyzerSettings,
}

impl StructureAnalyzer {
    pub fn new(
        executor: Arc<RequestExecutor>,
        watchlist: Arc<Watchlist>,
        sink: Arc<dyn NotificationSink>,
        metrics: Arc<PipelineMetrics>,
        params: StructureParams,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            executor,
            watchlist,
            sink,
            metrics,
            params,
            settings,
        }
    }

    /// Analyzes every untracked target; returns the number of new watches.
    pub async fn analyze_targets(&self, targets: &[Target], now: DateTime<Utc>) -> usize {
        let gate = Arc::new(Semaphore::new(self.settings.max_concurrent.max(1)));
        let tasks = targets
            .iter()
            .filter(|t| !self.watchlist.is_tracked(&entry_id(&t.provider, &t.symbol)))
            .map(|target| {
                let gate = gate.clone();
                async move {
                    let _permit = gate.acquire_owned().await.ok()?;
                    self.analyze_one(target, now).await
                }
            });

        let created = join_all(tasks).await.into_iter().flatten().count();
        info!(
            "🔬 Structure scan: {} target(s), {} new watch(es), {} watching",
            targets.len(),
            created,
            self.watchlist.watch_count()
        );
        created
    }

    async fn analyze_one(&self, target: &Target, now: DateTime<Utc>) -> Option<WatchEntry> {
        let candles = self
            .executor
            .fetch_recent_candles(&target.provider, &target.symbol, self.settings.timeframe, self.settings.fetch_limit)
            .await?;
        self.metrics.increment_symbols_analyzed();

        let candidate = match detect_box(&candles, &self.params) {
            Ok(candidate) => candidate,
            Err(reason) => {
                debug!("{}:{} rejected: {}", target.provider, target.symbol, reason);
                return None;
            }
        };

        let ttl = chrono::Duration::from_std(self.settings.watch_ttl).ok()?;
        let entry = WatchEntry {
            id: entry_id(&target.provider, &target.symbol),
            provider: target.provider.clone(),
            symbol: target.symbol.clone(),
            range_high: candidate.range_high,
            range_low: candidate.range_low,
            base_volatility: candidate.base_volatility,
            created_at: now,
            expires_at: now + ttl,
        };

        if !self.watchlist.insert_watch(entry.clone()).await {
            return None;
        }
        self.metrics.increment_watches_created();
        info!(
            "📦 Box locked {} [{} - {}] amp {:.2}% touches {} rejections {} squeeze {:.2}",
            entry.id,
            entry.range_low,
            entry.range_high,
            candidate.amplitude * 100.0,
            candidate.touch_count,
            candidate.rejection_count,
            candidate.squeeze_ratio
        );

        if self.settings.announce_new_watches {
            self.sink.enqueue(Alert::plain(
                format!("New box locked: {} ({})", entry.symbol, entry.provider),
                format!(
                    "{} on {}\nRange: {} - {}\nAmplitude: {:.2}%\nTouches: {} / rejections: {}\nWatch expires: {}",
                    entry.symbol,
                    entry.provider,
                    entry.range_low,
                    entry.range_high,
                    candidate.amplitude * 100.0,
                    candidate.touch_count,
                    candidate.rejection_count,
                    entry.expires_at.format("%Y-%m-%d %H:%M UTC")
                ),
            ));
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{box_candles, flat_candle};
    use assert_approx_eq::assert_approx_eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_valid_box_is_detected() {
        let candles = box_candles(0, 110.0, 100.0, 91);
        let candidate = detect_box(&candles, &StructureParams::default()).unwrap();

        assert_eq!(candidate.range_high, 110.0);
        assert_eq!(candidate.range_low, 100.0);
        assert_approx_eq!(candidate.amplitude, 0.1);
        assert!(candidate.touch_count >= 3);
        assert!(candidate.rejection_count >= 1);
        assert!(candidate.squeeze_ratio <= 0.75);
    }

    #[test]
    fn test_forming_bar_is_excluded() {
        let mut candles = box_candles(0, 110.0, 100.0, 91);
        let last = candles.len() - 1;
        candles[last].high = 150.0;
        assert_eq!(detect_box(&candles, &StructureParams::default()).unwrap().range_high, 110.0);
    }

    #[test]
    fn test_short_history_rejected() {
        let candles = box_candles(0, 110.0, 100.0, 90);
        assert_eq!(
            detect_box(&candles, &StructureParams::default()),
            Err(BoxRejection::InsufficientHistory { have: 90, need: 91 })
        );
    }

    #[test]
    fn test_too_few_touches() {
        // 110/100 range set by one bar each, everything else mid-range
        let mut candles: Vec<Candle> = (0..91).map(|i| flat_candle(i, 104.0, 106.0)).collect();
        candles[10] = flat_candle(10, 104.0, 110.0);
        candles[20] = flat_candle(20, 100.0, 106.0);
        assert_eq!(
            detect_box(&candles, &StructureParams::default()),
            Err(BoxRejection::TooFewTouches(2))
        );
    }

    #[test]
    fn test_amplitude_bounds() {
        let wide = box_candles(0, 130.0, 100.0, 91);
        assert!(matches!(
            detect_box(&wide, &StructureParams::default()),
            Err(BoxRejection::AmplitudeOutOfRange(_))
        ));

        let tight = box_candles(0, 100.5, 100.0, 91);
        assert!(matches!(
            detect_box(&tight, &StructureParams::default()),
            Err(BoxRejection::AmplitudeOutOfRange(_))
        ));
    }

    #[test]
    fn test_expanding_tail_fails_squeeze() {
        let mut candles = box_candles(0, 110.0, 100.0, 91);
        // widen the last four closed bars to the full range
        for i in 86..90 {
            candles[i] = flat_candle(i as i64, 100.5, 109.5);
        }
        assert!(matches!(
            detect_box(&candles, &StructureParams::default()),
            Err(BoxRejection::NoSqueeze { .. })
        ));
    }

    #[test]
    fn test_non_positive_low() {
        let candles: Vec<Candle> = (0..91).map(|i| flat_candle(i, 0.0, 1.0)).collect();
        assert_eq!(
            detect_box(&candles, &StructureParams::default()),
            Err(BoxRejection::NonPositiveLow)
        );
    }
}
