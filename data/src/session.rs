use crate::notify::Notification;
use crate::timer::Timers;

use enum_map::Enum;
use exchange::AdapterError;

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
enum SessionTimer {
    Heartbeat, // تمدید دوره‌ای نشست
    Retry,     // تلاش دوباره برای دریافت توکن
}

/// خروجی‌های مدیر نشست
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    Initiate,                                     // درخواست توکن جدید
    Heartbeat { token: String },                  // ارسال ضربان برای این توکن
    Established { token: String, renewed: bool }, // توکن آماده است
    Expired,                                      // توکن فعلی معتبر نیست
    Notify(Notification),
}

/// مدیریت توکن نشست و تمدید دوره‌ای آن
#[derive(Debug)]
pub struct Session {
    token: Option<String>,
    initiating: bool,
    expired: bool,
    failing: bool, // آخرین تلاش دریافت توکن شکست خورده است
    heartbeat_interval: Duration,
    timers: Timers<SessionTimer>,
}

impl Session {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            token: None,
            initiating: false,
            expired: false,
            failing: false,
            heartbeat_interval,
            timers: Timers::default(),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn start(&mut self) -> Vec<SessionEffect> {
        if self.token.is_some() || self.initiating {
            return vec![];
        }
        self.initiating = true;
        vec![SessionEffect::Initiate]
    }

    pub fn on_initiated(
        &mut self,
        result: Result<String, AdapterError>,
        now: Instant,
    ) -> Vec<SessionEffect> {
        self.initiating = false;

        match result {
            Ok(token) => {
                let renewed = std::mem::take(&mut self.expired);
                if std::mem::take(&mut self.failing) {
                    log::info!("Session established after failed attempts");
                }
                self.token = Some(token.clone());
                self.timers.cancel(SessionTimer::Retry);
                self.timers
                    .schedule(SessionTimer::Heartbeat, now + self.heartbeat_interval);

                vec![SessionEffect::Established { token, renewed }]
            }
            Err(e) => {
                self.timers
                    .schedule(SessionTimer::Retry, now + self.heartbeat_interval);

                // one notification per outage
                if std::mem::replace(&mut self.failing, true) {
                    log::warn!("Session initiate still failing: {e}");
                    return vec![];
                }
                log::error!("Failed to initiate session: {e}");
                vec![SessionEffect::Notify(Notification::transport(format!(
                    "Could not start a session: {e}"
                )))]
            }
        }
    }

    /// پاسخ ضربان؛ پاسخ‌هایی که به توکن قبلی تعلق دارند نادیده گرفته می‌شوند
    pub fn on_heartbeat(
        &mut self,
        token: &str,
        result: Result<(), AdapterError>,
        now: Instant,
    ) -> Vec<SessionEffect> {
        if self.token.as_deref() != Some(token) {
            log::debug!("Ignoring heartbeat result for a previous session");
            return vec![];
        }

        match result {
            Ok(()) => {
                log::trace!("Session heartbeat ok");
                self.timers
                    .schedule(SessionTimer::Heartbeat, now + self.heartbeat_interval);
                vec![]
            }
            Err(e) if e.is_session_rejection() => {
                log::warn!("Session expired: {e}");

                self.token = None;
                self.expired = true;
                self.initiating = true;
                self.timers.cancel_all();

                vec![
                    SessionEffect::Expired,
                    SessionEffect::Notify(Notification::session(
                        "Session expired, reconnecting",
                    )),
                    SessionEffect::Initiate,
                ]
            }
            Err(e) => {
                log::warn!("Session heartbeat failed, retrying next interval: {e}");
                self.timers
                    .schedule(SessionTimer::Heartbeat, now + self.heartbeat_interval);
                vec![]
            }
        }
    }

    pub fn on_tick(&mut self, now: Instant) -> Vec<SessionEffect> {
        let mut effects = vec![];

        for timer in self.timers.take_due(now) {
            match timer {
                SessionTimer::Heartbeat => {
                    if let Some(token) = &self.token {
                        effects.push(SessionEffect::Heartbeat {
                            token: token.clone(),
                        });
                    }
                }
                SessionTimer::Retry => {
                    if self.token.is_none() && !self.initiating {
                        self.initiating = true;
                        effects.push(SessionEffect::Initiate);
                    }
                }
            }
        }
        effects
    }
}
