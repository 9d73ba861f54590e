use palette::{FromColor, Hsva, rgb::Rgba};

/// رنگ‌های ثابت برای دوره‌های بازگشت رایج
const FIXED: [(u32, &str); 8] = [
    (0, "#2962FF"),
    (1, "#FF6D00"),
    (2, "#00C853"),
    (3, "#AA00FF"),
    (5, "#FFD600"),
    (10, "#00B8D4"),
    (20, "#D50000"),
    (50, "#C51162"),
];

/// رنگ یک دوره بازگشت؛ جدول و خطوط نمودار هر دو از همین تابع استفاده می‌کنند
pub fn lookback_color(lookback: u32) -> Rgba {
    let hex = FIXED
        .iter()
        .find(|(period, _)| *period == lookback)
        .map_or_else(|| FIXED[lookback as usize % FIXED.len()].1, |(_, hex)| *hex);

    hex_to_rgba(hex).unwrap_or_default()
}

/// رنگ کانال‌های بالا و پایین: همان رنگ با روشنایی و شفافیت کمتر
pub fn channel_color(base: Rgba, alpha: f32) -> Rgba {
    let mut hsva = Hsva::from_color(base);
    hsva.value = (hsva.value * 0.85).clamp(0.0, 1.0);
    hsva.alpha = alpha.clamp(0.0, 1.0);

    Rgba::from_color(hsva)
}

/// تبدیل کد رنگ هگز (#RRGGBB یا #RRGGBBAA)
pub fn hex_to_rgba(hex: &str) -> Option<Rgba> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 && digits.len() != 8 {
        return None;
    }

    let channel = |i: usize| {
        digits
            .get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .map(|v| f32::from(v) / 255.0)
    };

    let alpha = if digits.len() == 8 { channel(6)? } else { 1.0 };
    Some(Rgba::new(channel(0)?, channel(2)?, channel(4)?, alpha))
}

pub fn rgba_to_hex(color: Rgba) -> String {
    use std::fmt::Write;

    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut hex = String::with_capacity(9);

    let _ = write!(&mut hex, "#");
    let _ = write!(&mut hex, "{:02X}", to_u8(color.color.red));
    let _ = write!(&mut hex, "{:02X}", to_u8(color.color.green));
    let _ = write!(&mut hex, "{:02X}", to_u8(color.color.blue));

    if color.alpha < 1.0 {
        let _ = write!(&mut hex, "{:02X}", to_u8(color.alpha));
    }

    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_periods_use_fixed_colors() {
        assert_eq!(rgba_to_hex(lookback_color(0)), "#2962FF");
        assert_eq!(rgba_to_hex(lookback_color(20)), "#D50000");
        assert_eq!(rgba_to_hex(lookback_color(50)), "#C51162");
    }

    #[test]
    fn other_periods_cycle_through_palette() {
        // 7 % 8 == 7 -> eighth entry, 9 % 8 == 1 -> second entry
        assert_eq!(rgba_to_hex(lookback_color(7)), "#C51162");
        assert_eq!(rgba_to_hex(lookback_color(9)), "#FF6D00");
        assert_eq!(lookback_color(13), lookback_color(13));
    }

    #[test]
    fn channel_color_keeps_hue_and_fades() {
        let base = lookback_color(0);
        let channel = channel_color(base, 0.4);

        assert!((channel.alpha - 0.4).abs() < 1e-6);
        assert!(channel.color.blue > channel.color.red);
        assert!(hex_to_rgba("2962FF").is_none());
        assert!(hex_to_rgba("#2962FF80").is_some_and(|c| c.alpha < 1.0));
    }
}
