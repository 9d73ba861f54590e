use std::fmt;

/// دسته‌بندی خطاهایی که به کاربر نمایش داده می‌شوند
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Transport,          // خطای شبکه یا قطع اتصال
    Protocol,           // پیام نامعتبر از سرور
    DataConsistency,    // خانه رگرسیون که روی سری فعلی قابل نمایش نیست
    ResourceExhaustion, // تلاش‌های اتصال مجدد تمام شد
    Session,            // نشست منقضی شد
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NotificationKind::Transport => "Connection",
            NotificationKind::Protocol => "Protocol",
            NotificationKind::DataConsistency => "Data",
            NotificationKind::ResourceExhaustion => "Gave up",
            NotificationKind::Session => "Session",
        };
        f.write_str(label)
    }
}

/// یک اعلان گذرا برای کاربر (جایگزین toast)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Transport, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Protocol, message)
    }

    pub fn data_consistency(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::DataConsistency, message)
    }

    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::ResourceExhaustion, message)
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Session, message)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
