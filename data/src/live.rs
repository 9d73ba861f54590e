use crate::notify::Notification;
use crate::reconnect::{ConnectionState, ReconnectPolicy, Reconnector, Transition};

use exchange::adapter::live::{FeedMessage, parse_feed_message};
use exchange::{ConnectionId, SeriesKey, StreamEvent};

use std::collections::VecDeque;
use std::time::Instant;

/// خروجی اتصال زنده کندل‌ها برای کنترل‌گر نمودار
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEffect {
    Open { id: ConnectionId, key: SeriesKey }, // باز کردن اتصال جدید
    Close { id: ConnectionId },                // بستن اتصال (بدون اتصال مجدد)
    Apply(FeedMessage),                        // اعمال پیام روی سری
    Notify(Notification),
}

/// اتصال زنده کندل‌ها برای یک نمودار
///
/// هویت اتصال کاملاً با `SeriesKey` تعیین می‌شود؛ تغییر کلید یعنی قطع و وصل کامل.
/// در مدت بارگذاری تاریخی، پیام‌ها در صف نگه داشته و پس از آن به ترتیب ورود اعمال می‌شوند.
#[derive(Debug)]
pub struct LiveFeed {
    connection: Reconnector,
    key: Option<SeriesKey>,
    loading: bool,
    buffer: VecDeque<FeedMessage>,
}

impl LiveFeed {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            connection: Reconnector::new(policy),
            key: None,
            loading: false,
            buffer: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn key(&self) -> Option<&SeriesKey> {
        self.key.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.connection.is_exhausted()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.connection.retry_deadline()
    }

    pub fn connect(&mut self, key: SeriesKey) -> Vec<FeedEffect> {
        let mut effects = self.disconnect();

        let id = self.connection.open();
        log::info!("Live feed {id}: connecting to {key}");

        self.key = Some(key.clone());
        effects.push(FeedEffect::Open { id, key });
        effects
    }

    /// قطع عمدی؛ چند بار صدا زدن آن بی‌اثر است
    pub fn disconnect(&mut self) -> Vec<FeedEffect> {
        self.buffer.clear();
        self.key = None;

        match self.connection.close() {
            Some(id) => {
                log::info!("Live feed {id}: disconnecting");
                vec![FeedEffect::Close { id }]
            }
            None => vec![],
        }
    }

    /// فعال یا غیرفعال کردن صف پیام‌ها در مدت بارگذاری تاریخی
    pub fn set_loading(&mut self, loading: bool) -> Vec<FeedEffect> {
        self.loading = loading;

        if loading {
            return vec![];
        }

        if !self.buffer.is_empty() {
            log::debug!("Live feed: flushing {} buffered messages", self.buffer.len());
        }
        self.buffer.drain(..).map(FeedEffect::Apply).collect()
    }

    pub fn handle_event(&mut self, event: StreamEvent, now: Instant) -> Vec<FeedEffect> {
        let id = event.connection();

        match self.connection.on_event(event, now) {
            Transition::Stale { close } => {
                log::debug!("Live feed: ignoring event from superseded connection {id}");
                close.map(|id| FeedEffect::Close { id }).into_iter().collect()
            }
            Transition::Opened { after_outage } => {
                if after_outage {
                    log::info!("Live feed {id}: reconnected");
                } else {
                    log::info!("Live feed {id}: connected");
                }
                vec![]
            }
            Transition::Message(text) => match parse_feed_message(text.as_bytes()) {
                Ok(message) if self.loading => {
                    self.buffer.push_back(message);
                    vec![]
                }
                Ok(message) => vec![FeedEffect::Apply(message)],
                Err(e) => {
                    log::error!("Live feed {id}: dropping malformed message: {e}");
                    vec![FeedEffect::Notify(Notification::protocol(format!(
                        "Malformed live message dropped: {e}"
                    )))]
                }
            },
            Transition::ClosedNormally(reason) => {
                log::info!("Live feed {id}: closed by server ({reason})");
                vec![]
            }
            Transition::Retrying {
                attempt,
                delay,
                reason,
            } => {
                log::warn!("Live feed {id}: lost ({reason}), retry {attempt} in {delay:?}");

                if attempt == 1 {
                    vec![FeedEffect::Notify(Notification::transport(format!(
                        "Live feed disconnected ({reason}), reconnecting"
                    )))]
                } else {
                    vec![]
                }
            }
            Transition::Exhausted { attempts, reason } => {
                log::error!("Live feed {id}: giving up after {attempts} attempts ({reason})");
                self.buffer.clear();
                vec![FeedEffect::Notify(Notification::exhausted(format!(
                    "Live feed could not reconnect after {attempts} attempts; re-enable live mode to retry"
                )))]
            }
        }
    }

    pub fn on_tick(&mut self, now: Instant) -> Vec<FeedEffect> {
        let Some(key) = self.key.clone() else {
            return vec![];
        };

        match self.connection.poll_retry(now) {
            Some(id) => {
                log::info!("Live feed {id}: reconnecting to {key}");
                vec![FeedEffect::Open { id, key }]
            }
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange::{Bar, CandleType, CloseReason, Timeframe};
    use std::time::Duration;

    fn key(symbol: &str) -> SeriesKey {
        SeriesKey {
            symbol: symbol.into(),
            interval: Timeframe::M1,
            timezone: "UTC".into(),
            candle_type: CandleType::Regular,
        }
    }

    fn opened_id(effects: &[FeedEffect]) -> ConnectionId {
        effects
            .iter()
            .find_map(|e| match e {
                FeedEffect::Open { id, .. } => Some(*id),
                _ => None,
            })
            .unwrap()
    }

    const UPDATE: &str = r#"{"current_bar":{"time":60,"open":1,"high":1,"low":1,"close":1,"volume":1}}"#;

    #[test]
    fn connect_supersedes_previous_connection() {
        let now = Instant::now();
        let mut feed = LiveFeed::new(ReconnectPolicy::default());

        let a = opened_id(&feed.connect(key("AAA")));
        let effects = feed.connect(key("BBB"));
        let b = opened_id(&effects);

        assert_eq!(effects[0], FeedEffect::Close { id: a });
        assert_eq!(
            effects[1],
            FeedEffect::Open {
                id: b,
                key: key("BBB")
            }
        );

        // A finishes opening late and then fails: it gets closed, never retried
        assert_eq!(
            feed.handle_event(StreamEvent::Opened(a), now),
            vec![FeedEffect::Close { id: a }]
        );
        assert!(
            feed.handle_event(
                StreamEvent::Closed(a, CloseReason::abnormal("reset")),
                now
            )
            .is_empty()
        );
        assert_eq!(feed.next_deadline(), None);

        feed.handle_event(StreamEvent::Opened(b), now);
        assert_eq!(feed.state(), ConnectionState::Connected);
        assert_eq!(feed.key(), Some(&key("BBB")));
    }

    #[test]
    fn buffers_while_loading_and_flushes_in_order() {
        let now = Instant::now();
        let mut feed = LiveFeed::new(ReconnectPolicy::default());
        let id = opened_id(&feed.connect(key("SPY")));
        feed.handle_event(StreamEvent::Opened(id), now);

        feed.set_loading(true);
        let backfill = r#"[{"time":0,"open":1,"high":1,"low":1,"close":1,"volume":1}]"#;
        assert!(feed.handle_event(StreamEvent::Text(id, backfill.into()), now).is_empty());
        assert!(feed.handle_event(StreamEvent::Text(id, UPDATE.into()), now).is_empty());
        assert_eq!(feed.buffered(), 2);

        let flushed = feed.set_loading(false);
        assert!(matches!(flushed[0], FeedEffect::Apply(FeedMessage::Backfill(_))));
        assert!(matches!(flushed[1], FeedEffect::Apply(FeedMessage::Update { .. })));
        assert_eq!(feed.buffered(), 0);

        let live = feed.handle_event(StreamEvent::Text(id, UPDATE.into()), now);
        assert_eq!(
            live,
            vec![FeedEffect::Apply(FeedMessage::Update {
                completed_bar: None,
                current_bar: Some(Bar::new(60, 1.0, 1.0, 1.0, 1.0, 1.0)),
            })]
        );
    }

    #[test]
    fn malformed_message_is_dropped_without_closing() {
        let now = Instant::now();
        let mut feed = LiveFeed::new(ReconnectPolicy::default());
        let id = opened_id(&feed.connect(key("SPY")));
        feed.handle_event(StreamEvent::Opened(id), now);

        let effects = feed.handle_event(StreamEvent::Text(id, "{oops".into()), now);
        assert!(matches!(&effects[..], [FeedEffect::Notify(n)] if n.kind == crate::NotificationKind::Protocol));
        assert_eq!(feed.state(), ConnectionState::Connected);
    }

    #[test]
    fn notifies_on_first_failure_and_exhaustion_only() {
        let mut now = Instant::now();
        let mut feed = LiveFeed::new(ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_attempts: 3,
        });
        let mut id = opened_id(&feed.connect(key("SPY")));
        feed.handle_event(StreamEvent::Opened(id), now);

        let mut notifications = 0;
        for _ in 0..4 {
            let effects =
                feed.handle_event(StreamEvent::Closed(id, CloseReason::abnormal("down")), now);
            notifications += effects
                .iter()
                .filter(|e| matches!(e, FeedEffect::Notify(_)))
                .count();

            if let Some(at) = feed.next_deadline() {
                now = at;
                id = opened_id(&feed.on_tick(now));
            }
        }

        assert_eq!(notifications, 2);
        assert!(feed.is_exhausted());
        assert!(feed.on_tick(now + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn disconnect_cancels_pending_retry() {
        let now = Instant::now();
        let mut feed = LiveFeed::new(ReconnectPolicy::default());
        let id = opened_id(&feed.connect(key("SPY")));
        feed.handle_event(StreamEvent::Closed(id, CloseReason::abnormal("x")), now);
        assert!(feed.next_deadline().is_some());

        assert!(feed.disconnect().is_empty());
        assert_eq!(feed.next_deadline(), None);
        assert!(feed.on_tick(now + Duration::from_secs(10)).is_empty());
        assert_eq!(feed.state(), ConnectionState::Disconnected);
    }
}
