use rustc_hash::FxHashMap;

use std::{fmt, hash::Hash};

/// شناسه یک مشترک؛ برای لغو اشتراک استفاده می‌شود
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// نوع تغییری که به مشترکین اطلاع داده می‌شود
#[derive(Debug)]
pub enum Change<'a, V> {
    Set(&'a V),     // مقدار جدید یا بروزرسانی‌شده
    Removed(&'a V), // مقدار حذف‌شده
}

// only references are held, so no bound on V
impl<V> Clone for Change<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Change<'_, V> {}

impl<'a, V> Change<'a, V> {
    pub fn value(&self) -> &'a V {
        match self {
            Change::Set(v) | Change::Removed(v) => v,
        }
    }
}

type Callback<K, V> = Box<dyn FnMut(&K, Change<'_, V>)>;

struct Subscriber<K, V> {
    id: SubscriberId,
    filter: Option<K>,
    callback: Callback<K, V>,
}

/// مخزن کلید/مقدار با اطلاع‌رسانی همزمان تغییرات
///
/// هیچ ارجاع قابل تغییری به مقادیر داخلی بیرون داده نمی‌شود؛ هر تغییر فقط از مسیر
/// `set`، `update` یا `remove` انجام می‌شود و مشترکین را در همان لحظه باخبر می‌کند.
pub struct Store<K, V> {
    entries: FxHashMap<K, V>,
    subscribers: Vec<Subscriber<K, V>>,
    next_id: u64,
}

impl<K, V> Default for Store<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set(&mut self, key: K, value: V) {
        self.entries.insert(key.clone(), value);
        if let Some(value) = self.entries.get(&key) {
            Self::notify(&mut self.subscribers, &key, Change::Set(value));
        }
    }

    /// تغییر درجای یک مقدار موجود؛ اگر کلید وجود نداشته باشد `false` برمی‌گرداند
    pub fn update<R>(&mut self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let value = self.entries.get_mut(key)?;
        let result = f(value);
        Self::notify(&mut self.subscribers, key, Change::Set(&*value));
        Some(result)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        Self::notify(&mut self.subscribers, key, Change::Removed(&value));
        Some(value)
    }

    /// ثبت مشترک؛ با `filter = None` همه کلیدها گزارش می‌شوند
    pub fn subscribe(
        &mut self,
        filter: Option<K>,
        callback: impl FnMut(&K, Change<'_, V>) + 'static,
    ) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        self.subscribers.push(Subscriber {
            id,
            filter,
            callback: Box::new(callback),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        before != self.subscribers.len()
    }

    fn notify(subscribers: &mut [Subscriber<K, V>], key: &K, change: Change<'_, V>) {
        for subscriber in subscribers.iter_mut() {
            if subscriber.filter.as_ref().is_none_or(|f| f == key) {
                (subscriber.callback)(key, change);
            }
        }
    }
}

impl<K, V> fmt::Debug for Store<K, V>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
