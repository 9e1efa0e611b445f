//! Alert bodies. Times are rendered in a fixed display offset (UTC by default).

use super::Alert;
use crate::state::{Direction, PendingConfirmation};
use crate::utils::ms_to_datetime;
use chrono::{DateTime, FixedOffset, Offset, Utc};

#[derive(Debug, Clone, Copy)]
pub struct DisplayClock {
    offset: FixedOffset,
}

impl Default for DisplayClock {
    fn default() -> Self {
        Self::utc()
    }
}

impl DisplayClock {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Out-of-range offsets fall back to UTC.
    pub fn with_offset_hours(hours: i32) -> Self {
        match hours.checked_mul(3600).and_then(FixedOffset::east_opt) {
            Some(offset) => Self { offset },
            None => Self::utc(),
        }
    }

    pub fn label(&self) -> String {
        let secs = self.offset.local_minus_utc();
        if secs == 0 {
            "UTC".to_string()
        } else {
            format!("UTC{:+}", secs / 3600)
        }
    }

    pub fn format(&self, at: DateTime<Utc>) -> String {
        format!("{} {}", at.with_timezone(&self.offset).format("%Y-%m-%d %H:%M:%S"), self.label())
    }

    pub fn format_ms(&self, ms: i64) -> String {
        match ms_to_datetime(ms) {
            Some(at) => self.format(at),
            None => ms.to_string(),
        }
    }
}

fn direction_color(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "green",
        Direction::Down => "red",
    }
}

/// Sent the moment a breakout passes the volatility gate, before the
/// interval has closed.
pub fn breakout_alert(pending: &PendingConfirmation, clock: &DisplayClock) -> Alert {
    let subject = format!("🚀 [UNCONFIRMED] BREAKOUT {} {}", pending.direction, pending.symbol);
    let body = format!(
        r#"<h2>🚀 Breakout alert</h2>
<p><b>Direction:</b> <span style="color: {color}; font-size: 18px;">{direction}</span></p>
<p><b>Provider:</b> {provider}</p>
<p><b>Symbol:</b> {symbol}</p>
<p><b>Price:</b> {price}</p>
<p><b>Break level:</b> {level}</p>
<p style="color: #666; margin-top: 20px;">🕒 <b>Triggered:</b> {triggered}<br>🕒 <b>Confirmation after close:</b> {close}</p>"#,
        color = direction_color(pending.direction),
        direction = pending.direction,
        provider = pending.provider.to_uppercase(),
        symbol = pending.symbol,
        price = pending.trigger_price,
        level = pending.break_level,
        triggered = clock.format(pending.triggered_at),
        close = clock.format_ms(pending.candle_close_ts),
    );
    Alert::structured(subject, body)
}

/// One row of the confirmation digest.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedBreakout {
    pub pending: PendingConfirmation,
    pub close: f64,
}

pub fn confirmation_digest(confirmed: &[ConfirmedBreakout], clock: &DisplayClock) -> Alert {
    let subject = format!("✅ {} breakout(s) confirmed", confirmed.len());
    let mut body = String::from(
        r#"<h3>✅ Breakout confirmation digest</h3>
<table border="1" cellspacing="0" cellpadding="5" style="border-collapse: collapse;">
<tr style="background-color: #e6fffa;"><th>Provider</th><th>Symbol</th><th>Direction</th><th>Break level</th><th>Close</th><th>Triggered</th></tr>
"#,
    );
    for row in confirmed {
        let p = &row.pending;
        body.push_str(&format!(
            "<tr><td>{}</td><td><b>{}</b></td><td style='color:{}'>{}</td><td>{}</td><td>{}</td><td style='font-size:12px;color:#888;'>{}</td></tr>\n",
            p.provider.to_uppercase(),
            p.symbol,
            direction_color(p.direction),
            p.direction,
            p.break_level,
            row.close,
            clock.format(p.triggered_at)
        ));
    }
    body.push_str("</table>");
    Alert::structured(subject, body)
}
