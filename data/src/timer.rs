use enum_map::{Enum, EnumArray, EnumMap};

use std::time::Instant;

/// مجموعه زمان‌سنج‌های یک مؤلفه؛ از هر نوع حداکثر یک زمان‌سنج در انتظار است
///
/// زمان‌بندی دوباره یک نوع، زمان‌سنج قبلی همان نوع را جایگزین می‌کند.
#[derive(Debug)]
pub struct Timers<K>
where
    K: EnumArray<Option<Instant>>,
{
    slots: EnumMap<K, Option<Instant>>,
}

impl<K> Default for Timers<K>
where
    K: EnumArray<Option<Instant>>,
{
    fn default() -> Self {
        Self {
            slots: EnumMap::default(),
        }
    }
}

impl<K> Timers<K>
where
    K: Enum + EnumArray<Option<Instant>> + Copy,
{
    pub fn schedule(&mut self, kind: K, at: Instant) {
        self.slots[kind] = Some(at);
    }

    pub fn cancel(&mut self, kind: K) -> bool {
        self.slots[kind].take().is_some()
    }

    pub fn cancel_all(&mut self) {
        self.slots.values_mut().for_each(|slot| *slot = None);
    }

    pub fn is_pending(&self, kind: K) -> bool {
        self.slots[kind].is_some()
    }

    /// نزدیک‌ترین زمان‌سنج در انتظار
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().flatten().min().copied()
    }

    /// زمان‌سنج‌های سررسیده را برمی‌دارد و برمی‌گرداند
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due = Vec::new();
        for (kind, slot) in self.slots.iter_mut() {
            if slot.is_some_and(|at| at <= now) {
                *slot = None;
                due.push(kind);
            }
        }
        due
    }

    /// سررسید یک نوع خاص؛ در صورت سررسید شدن آن را برمی‌دارد
    pub fn fire(&mut self, kind: K, now: Instant) -> bool {
        if self.slots[kind].is_some_and(|at| at <= now) {
            self.slots[kind] = None;
            true
        } else {
            false
        }
    }
}
