use regchart_data::chart::{
    ChartSettings, ChartSurface, LineId, LinePoint, LineRole, LineStyle, Selection,
};
use regchart_data::config::RegressionSettings;
use regchart_data::history::Span;
use regchart_data::reconnect::ConnectionState;
use regchart_data::{Chart, Command, Input, NotificationKind, VolumePoint};

use exchange::adapter::historical::HistoryPage;
use exchange::{
    Bar, CloseReason, ConnectionId, RegressionCell, RegressionResultSet, RequestParams,
    StreamEvent, Timeframe, TimeframeResults,
};

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

// 2024-03-01 09:00:00 UTC
const BASE: i64 = 1_709_283_600;

#[derive(Default)]
struct Canvas {
    bars: Vec<Bar>,
    volume: Vec<VolumePoint>,
    next_line: u64,
    lines: BTreeMap<LineId, (LineStyle, Vec<LinePoint>)>,
}

impl Canvas {
    fn lines_for(&self, lookback: u32, role: LineRole) -> Vec<&[LinePoint]> {
        self.lines
            .values()
            .filter(|(style, _)| style.lookback == lookback && style.role == role)
            .map(|(_, points)| points.as_slice())
            .collect()
    }
}

impl ChartSurface for Canvas {
    fn set_series(&mut self, bars: &[Bar]) {
        self.bars = bars.to_vec();
    }

    fn set_volume(&mut self, volume: &[VolumePoint]) {
        self.volume = volume.to_vec();
    }

    fn update_last_bar(&mut self, bar: &Bar, volume: VolumePoint) {
        match self.bars.last_mut() {
            Some(last) if last.time == bar.time => *last = *bar,
            _ => self.bars.push(*bar),
        }
        match self.volume.last_mut() {
            Some(last) if last.time == volume.time => *last = volume,
            _ => self.volume.push(volume),
        }
    }

    fn add_line_series(&mut self, style: LineStyle) -> LineId {
        self.next_line += 1;
        let id = LineId(self.next_line);
        self.lines.insert(id, (style, vec![]));
        id
    }

    fn set_line_data(&mut self, line: LineId, points: &[LinePoint]) {
        if let Some((_, data)) = self.lines.get_mut(&line) {
            *data = points.to_vec();
        }
    }

    fn remove_line_series(&mut self, line: LineId) {
        self.lines.remove(&line);
    }
}

fn bar(index: i64, close: f64) -> Bar {
    Bar::new(BASE + index * 60, close, close + 1.0, close - 1.0, close, 100.0)
}

fn bar_json(index: i64, close: f64) -> String {
    format!(
        r#"{{"time":{},"open":{close},"high":{},"low":{},"close":{close},"volume":100}}"#,
        BASE + index * 60,
        close + 1.0,
        close - 1.0
    )
}

fn span() -> Span {
    let day = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    Span {
        start: day.and_hms_opt(9, 0, 0).unwrap(),
        end: day.and_hms_opt(10, 0, 0).unwrap(),
    }
}

fn cell(start: f64, slope: f64, intercept: f64) -> RegressionCell {
    RegressionCell {
        slope,
        intercept,
        r_value: 0.9,
        std_dev: 1.5,
        start_timestamp: start,
        data_count: 20,
        timestamp: String::new(),
    }
}

fn result_set(cells: impl IntoIterator<Item = (u32, RegressionCell)>) -> RegressionResultSet {
    let results: BTreeMap<u32, RegressionCell> = cells.into_iter().collect();

    RegressionResultSet {
        request_params: RequestParams {
            regression_length: 20,
            lookback_periods: results.keys().copied().collect(),
            timeframes: vec![Timeframe::M1],
        },
        regression_results: vec![TimeframeResults {
            timeframe: Timeframe::M1,
            results,
            is_partial: false,
            data_count: 62,
        }],
        timestamp: String::new(),
        is_partial: false,
    }
}

fn settings(lookbacks: &[u32]) -> RegressionSettings {
    RegressionSettings {
        lookback_periods: lookbacks.to_vec(),
        ..RegressionSettings::default()
    }
}

fn notifications(commands: &[Command]) -> Vec<NotificationKind> {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::Notify(n) => Some(n.kind),
            _ => None,
        })
        .collect()
}

fn opened_feed(commands: &[Command]) -> ConnectionId {
    commands
        .iter()
        .find_map(|c| match c {
            Command::OpenFeed { id, .. } => Some(*id),
            _ => None,
        })
        .expect("feed should be opened")
}

fn opened_regression(commands: &[Command]) -> ConnectionId {
    commands
        .iter()
        .find_map(|c| match c {
            Command::OpenRegressionStream { id, .. } => Some(*id),
            _ => None,
        })
        .expect("regression stream should be opened")
}

fn regression_seq(commands: &[Command]) -> u64 {
    commands
        .iter()
        .find_map(|c| match c {
            Command::RunRegression { seq, .. } => Some(*seq),
            _ => None,
        })
        .expect("regression should run")
}

fn started(now: Instant) -> Chart<Canvas> {
    let mut chart = Chart::new(
        Selection::default(),
        ChartSettings::default(),
        Canvas::default(),
    );
    chart.handle(Input::Start, now);
    chart.handle(Input::SessionInitiated(Ok("session-1".into())), now);
    chart
}

fn load(chart: &mut Chart<Canvas>, bars: Vec<Bar>, now: Instant) -> Vec<Command> {
    let seq = chart
        .handle(Input::LoadHistory(span()), now)
        .into_iter()
        .find_map(|c| match c {
            Command::FetchHistory { seq, .. } => Some(seq),
            _ => None,
        })
        .expect("history fetch");

    chart.handle(
        Input::HistoryLoaded {
            seq,
            result: Ok(HistoryPage {
                bars,
                request_id: Some("page-1".into()),
                is_partial: true,
                message: None,
            }),
        },
        now,
    )
}

fn times(chart: &Chart<Canvas>) -> Vec<i64> {
    chart
        .series()
        .map(|s| s.times().collect())
        .unwrap_or_default()
}

#[test]
fn live_updates_during_load_land_on_top_of_history() {
    let now = Instant::now();
    let mut chart = started(now);

    let fetch = chart.handle(Input::LoadHistory(span()), now);
    let seq = match &fetch[..] {
        [Command::FetchHistory { seq, query }] => {
            assert_eq!(query.key.symbol, "SPY");
            assert_eq!(query.exchange, "NYSE");
            *seq
        }
        other => panic!("unexpected {other:?}"),
    };

    let feed = opened_feed(&chart.handle(Input::SetLiveMode(true), now));
    chart.handle(Input::Feed(StreamEvent::Opened(feed)), now);

    // bar 60 completes while bar 61 starts forming, all before the history arrives
    let update = format!(
        r#"{{"completed_bar":{},"current_bar":{}}}"#,
        bar_json(60, 160.0),
        bar_json(61, 161.0)
    );
    chart.handle(Input::Feed(StreamEvent::Text(feed, update)), now);
    assert!(chart.series().is_none_or(|s| s.is_empty()));

    chart.handle(
        Input::HistoryLoaded {
            seq,
            result: Ok(HistoryPage {
                bars: (0..60).map(|i| bar(i, 100.0 + i as f64)).collect(),
                request_id: Some("page-1".into()),
                is_partial: true,
                message: None,
            }),
        },
        now,
    );

    let loaded = times(&chart);
    assert_eq!(loaded.len(), 62);
    assert!(loaded.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(loaded.last(), Some(&(BASE + 61 * 60)));
    assert_eq!(chart.surface().bars.len(), 62);
    assert_eq!(chart.volume().map(<[VolumePoint]>::len), Some(62));

    // the forming bar keeps updating in place
    let tick = format!(r#"{{"current_bar":{}}}"#, bar_json(61, 161.5));
    chart.handle(Input::Feed(StreamEvent::Text(feed, tick)), now);
    assert_eq!(times(&chart).len(), 62);
    assert_eq!(chart.surface().bars.last().map(|b| b.close), Some(161.5));
}

#[test]
fn backfill_is_idempotent() {
    let now = Instant::now();
    let mut chart = started(now);
    let feed = opened_feed(&chart.handle(Input::SetLiveMode(true), now));
    load(&mut chart, (0..60).map(|i| bar(i, 100.0)).collect(), now);
    chart.handle(Input::Feed(StreamEvent::Opened(feed)), now);

    let batch = format!(
        "[{}]",
        (55..62)
            .map(|i| bar_json(i, 100.0))
            .collect::<Vec<_>>()
            .join(",")
    );
    chart.handle(Input::Feed(StreamEvent::Text(feed, batch.clone())), now);
    let once = times(&chart);
    assert_eq!(once.len(), 62);

    chart.handle(Input::Feed(StreamEvent::Text(feed, batch)), now);
    assert_eq!(times(&chart), once);
}

#[test]
fn regression_lines_follow_anchor_and_tolerance() {
    let now = Instant::now();
    let mut chart = started(now);
    load(&mut chart, (0..62).map(|i| bar(i, 100.0)).collect(), now);

    let seq = regression_seq(&chart.handle(Input::RunRegression(settings(&[0, 1, 2, 3])), now));
    let commands = chart.handle(
        Input::RegressionDone {
            seq,
            result: Ok(result_set([
                (0, cell((BASE + 42 * 60) as f64, 0.5, 100.0)),
                (1, cell((BASE + 10 * 60) as f64 + 0.3, -0.25, 110.0)),
                // half a second off is already outside tolerance
                (2, cell((BASE + 20 * 60) as f64 + 0.5, 1.0, 90.0)),
                // 20 bars from index 50 run past the 62 loaded bars
                (3, cell((BASE + 50 * 60) as f64, 1.0, 90.0)),
            ])),
        },
        now,
    );

    assert_eq!(
        notifications(&commands),
        vec![
            NotificationKind::DataConsistency,
            NotificationKind::DataConsistency
        ]
    );
    assert_eq!(chart.visualizer().drawn_lookbacks(), vec![0, 1]);

    let canvas = chart.surface();
    let [line] = canvas.lines_for(0, LineRole::Regression)[..] else {
        panic!("one regression line for lookback 0");
    };
    assert_eq!(line.len(), 20);
    assert_eq!(line[0].time, BASE + 42 * 60);
    assert_eq!(line[0].value, 100.0);
    assert_eq!(line[19].value, 100.0 + 0.5 * 19.0);

    let [upper] = canvas.lines_for(0, LineRole::UpperChannel)[..] else {
        panic!("one upper channel");
    };
    let [lower] = canvas.lines_for(0, LineRole::LowerChannel)[..] else {
        panic!("one lower channel");
    };
    assert_eq!(upper[5].value, line[5].value + 3.0);
    assert_eq!(lower[5].value, line[5].value - 3.0);

    let [shifted] = canvas.lines_for(1, LineRole::Regression)[..] else {
        panic!("one regression line for lookback 1");
    };
    assert_eq!(shifted[0].time, BASE + 10 * 60);
    assert_eq!(canvas.lines.len(), 6);
}

#[test]
fn live_patch_touches_only_named_cells() {
    let now = Instant::now();
    let mut chart = started(now);
    opened_feed(&chart.handle(Input::SetLiveMode(true), now));
    load(&mut chart, (0..62).map(|i| bar(i, 100.0)).collect(), now);

    let seq = regression_seq(&chart.handle(Input::RunRegression(settings(&[0, 1, 2])), now));
    let initial = result_set([
        (0, cell((BASE + 40 * 60) as f64, 0.5, 100.0)),
        (1, cell((BASE + 41 * 60) as f64, 0.5, 100.0)),
        (2, cell((BASE + 42 * 60) as f64, 0.5, 100.0)),
    ]);
    let commands = chart.handle(
        Input::RegressionDone {
            seq,
            result: Ok(initial.clone()),
        },
        now,
    );
    let stream = opened_regression(&commands);
    chart.handle(Input::RegressionStream(StreamEvent::Opened(stream)), now);
    assert_eq!(chart.regression_state(), ConnectionState::Connected);

    let patched = format!(
        r#"{{"type":"live_regression_update","data":{{"timeframe":"1m","results":{{
            "1":{{"slope":-2.0,"intercept":120,"r_value":0.4,"std_dev":1,"start_timestamp":{}}},
            "9":{{"slope":7.0,"intercept":1,"r_value":0.1,"std_dev":1,"start_timestamp":{}}}
        }}}}}}"#,
        BASE + 41 * 60,
        BASE + 30 * 60
    );
    chart.handle(
        Input::RegressionStream(StreamEvent::Text(stream, patched)),
        now,
    );

    let results = chart.results().and_then(|r| r.timeframe(Timeframe::M1)).unwrap();
    let before = initial.timeframe(Timeframe::M1).unwrap();

    assert_eq!(results.results[&1].slope, -2.0);
    assert_eq!(results.results[&0], before.results[&0]);
    assert_eq!(results.results[&2], before.results[&2]);
    assert!(!results.results.contains_key(&9));

    // full redraw with the patched slope
    let [line] = chart.surface().lines_for(1, LineRole::Regression)[..] else {
        panic!("one regression line for lookback 1");
    };
    assert_eq!(line[1].value, 118.0);
    assert_eq!(chart.surface().lines.len(), 9);
}

#[test]
fn removing_the_indicator_closes_the_stream_first() {
    let now = Instant::now();
    let mut chart = started(now);
    opened_feed(&chart.handle(Input::SetLiveMode(true), now));
    load(&mut chart, (0..62).map(|i| bar(i, 100.0)).collect(), now);

    let seq = regression_seq(&chart.handle(Input::RunRegression(settings(&[0])), now));
    let stream = opened_regression(&chart.handle(
        Input::RegressionDone {
            seq,
            result: Ok(result_set([(0, cell((BASE + 42 * 60) as f64, 0.5, 100.0))])),
        },
        now,
    ));
    assert_eq!(chart.surface().lines.len(), 3);

    let commands = chart.handle(Input::RemoveIndicator, now);
    assert_eq!(commands, vec![Command::CloseRegressionStream { id: stream }]);
    assert!(chart.results().is_none());
    assert!(chart.surface().lines.is_empty());
}

#[test]
fn reconnect_backoff_doubles_until_exhausted() {
    let start = Instant::now();
    let mut chart = started(start);

    let mut feed = opened_feed(&chart.handle(Input::SetLiveMode(true), start));
    let mut now = start;
    let mut kinds = vec![];

    for delay in [1, 2, 4, 8, 16] {
        let commands = chart.handle(
            Input::Feed(StreamEvent::Closed(feed, CloseReason::abnormal("reset"))),
            now,
        );
        kinds.extend(notifications(&commands));
        assert_eq!(
            chart.next_deadline(),
            Some(now + Duration::from_secs(delay))
        );

        now += Duration::from_secs(delay);
        feed = opened_feed(&chart.handle(Input::Tick, now));
    }

    let commands = chart.handle(
        Input::Feed(StreamEvent::Closed(feed, CloseReason::abnormal("reset"))),
        now,
    );
    kinds.extend(notifications(&commands));

    assert_eq!(
        kinds,
        vec![
            NotificationKind::Transport,
            NotificationKind::ResourceExhaustion
        ]
    );
    assert_eq!(chart.feed_state(), ConnectionState::Disconnected);
    // only the session heartbeat is left
    assert_eq!(chart.next_deadline(), Some(start + Duration::from_secs(60)));

    // toggling live mode back on starts a fresh sequence
    opened_feed(&chart.handle(Input::SetLiveMode(true), now));
}

#[test]
fn superseded_connections_are_ignored() {
    let now = Instant::now();
    let mut chart = started(now);
    let old = opened_feed(&chart.handle(Input::SetLiveMode(true), now));
    load(&mut chart, (0..10).map(|i| bar(i, 100.0)).collect(), now);

    let next = Selection {
        symbol: "QQQ".into(),
        ..Selection::default()
    };
    let commands = chart.handle(Input::SelectSeries(next), now);
    assert!(commands.contains(&Command::CloseFeed { id: old }));
    let current = opened_feed(&commands);
    assert_ne!(current, old);

    // late frames from the old connection never reach the new series
    let update = format!(r#"{{"current_bar":{}}}"#, bar_json(100, 1.0));
    chart.handle(Input::Feed(StreamEvent::Text(old, update)), now);
    assert!(chart.series().is_none_or(|s| s.is_empty()));

    // a late open of the old connection is closed again
    let commands = chart.handle(Input::Feed(StreamEvent::Opened(old)), now);
    assert_eq!(commands, vec![Command::CloseFeed { id: old }]);
    assert_eq!(chart.feed_state(), ConnectionState::Connecting);
}

#[derive(Debug, Clone, Copy)]
enum Step {
    BeginLoad,
    FinishLoad(i64),
    Backfill(i64, i64),
    Completed(i64, i64),
    Current(i64),
}

#[test]
fn series_stays_ordered_across_load_gate_patterns() {
    use Step::*;

    let patterns: [&[Step]; 4] = [
        &[
            BeginLoad,
            Current(30),
            Backfill(25, 32),
            FinishLoad(30),
            Current(31),
            Completed(31, 32),
            Current(5),
            Backfill(0, 33),
        ],
        &[
            Backfill(0, 10),
            Current(10),
            BeginLoad,
            Completed(10, 11),
            Current(3),
            FinishLoad(20),
            Current(11),
            Backfill(15, 22),
        ],
        &[
            BeginLoad,
            FinishLoad(5),
            BeginLoad,
            Backfill(0, 8),
            Current(8),
            Current(8),
            FinishLoad(3),
            Completed(8, 9),
            Backfill(9, 12),
        ],
        &[
            Current(40),
            Backfill(0, 5),
            BeginLoad,
            Current(41),
            Backfill(38, 45),
            Current(2),
            FinishLoad(10),
            Current(1),
        ],
    ];

    for (n, steps) in patterns.iter().enumerate() {
        let now = Instant::now();
        let mut chart = started(now);
        let feed = opened_feed(&chart.handle(Input::SetLiveMode(true), now));
        chart.handle(Input::Feed(StreamEvent::Opened(feed)), now);

        let mut pending = None;
        for step in steps.iter().copied() {
            match step {
                BeginLoad => {
                    pending = chart
                        .handle(Input::LoadHistory(span()), now)
                        .into_iter()
                        .find_map(|c| match c {
                            Command::FetchHistory { seq, .. } => Some(seq),
                            _ => None,
                        });
                }
                FinishLoad(count) => {
                    let seq = pending.take().expect("load in flight");
                    chart.handle(
                        Input::HistoryLoaded {
                            seq,
                            result: Ok(HistoryPage {
                                bars: (0..count).map(|i| bar(i, 100.0)).collect(),
                                request_id: None,
                                is_partial: false,
                                message: None,
                            }),
                        },
                        now,
                    );
                }
                Backfill(from, to) => {
                    // out of order and with a repeated time
                    let batch = (from..to)
                        .rev()
                        .chain([from])
                        .map(|i| bar_json(i, 101.0))
                        .collect::<Vec<_>>()
                        .join(",");
                    chart.handle(Input::Feed(StreamEvent::Text(feed, format!("[{batch}]"))), now);
                }
                Completed(done, forming) => {
                    let update = format!(
                        r#"{{"completed_bar":{},"current_bar":{}}}"#,
                        bar_json(done, 102.0),
                        bar_json(forming, 103.0)
                    );
                    chart.handle(Input::Feed(StreamEvent::Text(feed, update)), now);
                }
                Current(forming) => {
                    let update = format!(r#"{{"current_bar":{}}}"#, bar_json(forming, 104.0));
                    chart.handle(Input::Feed(StreamEvent::Text(feed, update)), now);
                }
            }

            let stored = times(&chart);
            assert!(
                stored.windows(2).all(|w| w[0] < w[1]),
                "pattern {n} after {step:?}: {stored:?}"
            );

            let drawn: Vec<i64> = chart.surface().bars.iter().map(|b| b.time).collect();
            assert_eq!(drawn, stored, "pattern {n} after {step:?}");
            assert_eq!(
                chart.volume().map_or(0, <[VolumePoint]>::len),
                stored.len(),
                "pattern {n} after {step:?}"
            );
        }
    }
}

#[test]
fn new_analysis_retires_the_old_live_stream() {
    let now = Instant::now();
    let mut chart = started(now);
    opened_feed(&chart.handle(Input::SetLiveMode(true), now));
    load(&mut chart, (0..62).map(|i| bar(i, 100.0)).collect(), now);

    let seq = regression_seq(&chart.handle(Input::RunRegression(settings(&[0])), now));
    let old = opened_regression(&chart.handle(
        Input::RegressionDone {
            seq,
            result: Ok(result_set([(0, cell((BASE + 42 * 60) as f64, 0.5, 100.0))])),
        },
        now,
    ));
    chart.handle(Input::RegressionStream(StreamEvent::Opened(old)), now);

    let snapshot = RegressionSettings {
        regression_length: 10,
        live_updates: false,
        ..settings(&[0])
    };
    let commands = chart.handle(Input::RunRegression(snapshot), now);
    assert!(commands.contains(&Command::CloseRegressionStream { id: old }));
    assert_eq!(chart.regression_state(), ConnectionState::Disconnected);

    let seq = regression_seq(&commands);
    let commands = chart.handle(
        Input::RegressionDone {
            seq,
            result: Ok(result_set([(0, cell((BASE + 50 * 60) as f64, 0.25, 100.0))])),
        },
        now,
    );
    assert!(commands
        .iter()
        .all(|c| !matches!(c, Command::OpenRegressionStream { .. })));

    let late = format!(
        r#"{{"type":"live_regression_update","timeframe":"1m","results":{{
            "0":{{"slope":-9.0,"intercept":1,"r_value":0.1,"std_dev":1,"start_timestamp":{}}}
        }}}}"#,
        BASE + 42 * 60
    );
    chart.handle(Input::RegressionStream(StreamEvent::Text(old, late)), now);

    let row = chart.results().and_then(|r| r.timeframe(Timeframe::M1)).unwrap();
    assert_eq!(row.results[&0].slope, 0.25);
}
