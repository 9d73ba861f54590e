use exchange::{CloseReason, ConnectionId, StreamEvent};

use std::time::{Duration, Instant};

/// سیاست اتصال مجدد با تأخیر نمایی
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// تأخیر تلاش `attempt` (از یک شروع می‌شود): `base * 2^(attempt-1)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1 << exp)
    }
}

/// وضعیت یک اتصال جریانی
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
}

/// نتیجه پردازش یک رویداد اتصال
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// رویداد متعلق به اتصالی قدیمی است؛ اگر آن اتصال تازه باز شده باید بسته شود
    Stale { close: Option<ConnectionId> },
    Opened { after_outage: bool },
    Message(String),
    ClosedNormally(CloseReason),
    Retrying {
        attempt: u32,
        delay: Duration,
        reason: CloseReason,
    },
    Exhausted {
        attempts: u32,
        reason: CloseReason,
    },
}

/// ماشین حالت مشترک اتصال‌های جریانی
///
/// هر اتصال شناسه نسل خود را دارد. بستن عمدی شناسه فعلی را رها می‌کند، پس رویداد
/// `Closed` بعدی آن اتصال دیگر هیچ تلاش مجددی را زمان‌بندی نمی‌کند.
#[derive(Debug, Default)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    state: ConnectionState,
    current: Option<ConnectionId>,
    next_id: u64,
    attempts: u32,
    retry_at: Option<Instant>,
    exhausted: bool,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn current(&self) -> Option<ConnectionId> {
        self.current
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// شروع یک اتصال تازه؛ شمارنده تلاش‌ها صفر می‌شود
    pub fn open(&mut self) -> ConnectionId {
        self.attempts = 0;
        self.exhausted = false;
        self.retry_at = None;
        self.state = ConnectionState::Connecting;
        self.next_generation()
    }

    /// بستن عمدی: رها کردن اتصال فعلی و لغو تلاش مجدد در انتظار
    pub fn close(&mut self) -> Option<ConnectionId> {
        self.retry_at = None;
        self.attempts = 0;
        self.state = ConnectionState::Disconnected;
        self.current.take()
    }

    /// اگر زمان تلاش مجدد رسیده باشد، نسل جدیدی از اتصال را برمی‌گرداند
    pub fn poll_retry(&mut self, now: Instant) -> Option<ConnectionId> {
        match self.retry_at {
            Some(at) if at <= now => {
                self.retry_at = None;
                Some(self.next_generation())
            }
            _ => None,
        }
    }

    pub fn on_event(&mut self, event: StreamEvent, now: Instant) -> Transition {
        if Some(event.connection()) != self.current {
            let close = match event {
                StreamEvent::Opened(id) => Some(id),
                _ => None,
            };
            return Transition::Stale { close };
        }

        match event {
            StreamEvent::Opened(_) => {
                let after_outage = self.attempts > 0;
                self.attempts = 0;
                self.state = ConnectionState::Connected;
                Transition::Opened { after_outage }
            }
            StreamEvent::Text(_, text) => Transition::Message(text),
            StreamEvent::Closed(_, reason) => {
                self.current = None;

                if reason.is_normal() {
                    self.state = ConnectionState::Disconnected;
                    return Transition::ClosedNormally(reason);
                }

                if self.attempts >= self.policy.max_attempts {
                    let attempts = self.attempts;
                    self.attempts = 0;
                    self.exhausted = true;
                    self.state = ConnectionState::Disconnected;
                    return Transition::Exhausted { attempts, reason };
                }

                self.attempts += 1;
                let delay = self.policy.delay(self.attempts);
                self.retry_at = Some(now + delay);
                self.state = ConnectionState::Reconnecting {
                    attempt: self.attempts,
                };

                Transition::Retrying {
                    attempt: self.attempts,
                    delay,
                    reason,
                }
            }
        }
    }

    fn next_generation(&mut self) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.current = Some(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_connection(r: &mut Reconnector, now: Instant) -> Transition {
        let id = r.current().unwrap();
        r.on_event(StreamEvent::Closed(id, CloseReason::abnormal("reset")), now)
    }

    #[test]
    fn delays_double_per_attempt() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(250),
            max_attempts: 5,
        };
        let delays: Vec<u64> = (1..=5).map(|n| policy.delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 4000]);
    }

    #[test]
    fn retries_until_ceiling_then_gives_up() {
        let base = Duration::from_secs(1);
        let mut r = Reconnector::new(ReconnectPolicy {
            base_delay: base,
            max_attempts: 5,
        });
        let mut now = Instant::now();

        let id = r.open();
        r.on_event(StreamEvent::Opened(id), now);

        let mut delays = Vec::new();
        loop {
            match drop_connection(&mut r, now) {
                Transition::Retrying { delay, .. } => {
                    delays.push(delay);
                    assert!(r.poll_retry(now).is_none());
                    now += delay;
                    assert!(r.poll_retry(now).is_some());
                }
                Transition::Exhausted { attempts, .. } => {
                    assert_eq!(attempts, 5);
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        assert_eq!(delays, vec![base, base * 2, base * 4, base * 8, base * 16]);
        assert!(r.is_exhausted());
        assert_eq!(r.retry_deadline(), None);
        assert_eq!(r.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn successful_open_resets_attempts() {
        let mut r = Reconnector::default();
        let now = Instant::now();

        r.open();
        drop_connection(&mut r, now);
        let retry = r.poll_retry(now + Duration::from_secs(1)).unwrap();

        assert_eq!(
            r.on_event(StreamEvent::Opened(retry), now),
            Transition::Opened { after_outage: true }
        );
        match drop_connection(&mut r, now) {
            Transition::Retrying { attempt, .. } => assert_eq!(attempt, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn intentional_close_detaches_connection() {
        let mut r = Reconnector::default();
        let now = Instant::now();

        let id = r.open();
        assert_eq!(r.close(), Some(id));

        let late = r.on_event(StreamEvent::Closed(id, CloseReason::abnormal("gone")), now);
        assert_eq!(late, Transition::Stale { close: None });
        assert_eq!(r.retry_deadline(), None);

        let late_open = r.on_event(StreamEvent::Opened(id), now);
        assert_eq!(late_open, Transition::Stale { close: Some(id) });
    }

    #[test]
    fn normal_closure_is_not_retried() {
        let mut r = Reconnector::default();
        let id = r.open();

        let t = r.on_event(StreamEvent::Closed(id, CloseReason::normal("bye")), Instant::now());
        assert!(matches!(t, Transition::ClosedNormally(_)));
        assert_eq!(r.retry_deadline(), None);
    }
}
