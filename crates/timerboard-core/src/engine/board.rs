//! Board and notice rendering.
//!
//! Rendering is a pure function of timer views, the staging point and the
//! current time. Plain text only; the transport decides how it looks.

use chrono::{DateTime, Duration, Utc};

use crate::store::TimerView;
use crate::timer::{format_deadline, TimerState};

/// Upper bound for one board message, below the chat platform's 2000 limit.
pub const MAX_BOARD_CHARS: usize = 1900;

/// Room kept free for the overflow line.
const OVERFLOW_RESERVE: usize = 32;

/// Longest staging name shown in the header.
const MAX_STAGING_CHARS: usize = 64;

const UNKNOWN_REGION: &str = "Unknown";

/// Compact countdown: `2d 3h 4m`, `3h 4m`, `4m 5s`, `5s`, or `now`.
pub fn format_countdown(remaining: Duration) -> String {
    let secs = remaining.num_seconds();
    if secs <= 0 {
        return "now".to_string();
    }
    let (days, hours, minutes, seconds) = (
        secs / 86_400,
        secs % 86_400 / 3_600,
        secs % 3_600 / 60,
        secs % 60,
    );
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

enum Line {
    Plain(String),
    Timer(String),
}

/// Render the full board.
///
/// ACTIVE and NOTIFIED timers are listed soonest first; EXPIRED timers still
/// inside `retention` follow in their own section. `views` is expected in
/// [`TimerStore::list`](crate::store::TimerStore::list) order.
pub fn render_board(
    views: &[TimerView],
    staging: Option<&str>,
    now: DateTime<Utc>,
    retention: Duration,
) -> String {
    let mut header = vec![format!("Current Time: {} UTC", format_deadline(&now))];
    match staging {
        Some(staging) => header.push(format!("Staging: {}", clip(staging, MAX_STAGING_CHARS))),
        None => header.push("Staging: not set".to_string()),
    }

    let upcoming: Vec<&TimerView> = views
        .iter()
        .filter(|v| v.timer.state != TimerState::Expired)
        .collect();
    let expired: Vec<&TimerView> = views
        .iter()
        .filter(|v| {
            v.timer.state == TimerState::Expired
                && v.timer
                    .deadline
                    .checked_add_signed(retention)
                    .map_or(true, |end| now < end)
        })
        .collect();

    let mut body = vec![Line::Plain(String::new())];
    if upcoming.is_empty() {
        body.push(Line::Plain("No active timers.".to_string()));
    }
    body.extend(upcoming.iter().map(|v| Line::Timer(timer_line(v, now))));
    if !expired.is_empty() {
        body.push(Line::Plain(String::new()));
        body.push(Line::Plain("Recently expired:".to_string()));
        body.extend(expired.iter().map(|v| Line::Timer(timer_line(v, now))));
    }

    fit(header, body)
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn fit(header: Vec<String>, body: Vec<Line>) -> String {
    let mut out = header.join("\n");
    let mut used = out.chars().count();
    let total_timers = body.iter().filter(|l| matches!(l, Line::Timer(_))).count();
    let mut shown = 0;

    for line in &body {
        let text = match line {
            Line::Plain(text) | Line::Timer(text) => text,
        };
        let cost = text.chars().count() + 1;
        if used + cost > MAX_BOARD_CHARS - OVERFLOW_RESERVE {
            out.push_str(&format!("\n... and {} more", total_timers - shown));
            return out;
        }
        out.push('\n');
        out.push_str(text);
        used += cost;
        if matches!(line, Line::Timer(_)) {
            shown += 1;
        }
    }
    out
}

fn timer_line(view: &TimerView, now: DateTime<Utc>) -> String {
    let timer = &view.timer;
    let when = match timer.state {
        TimerState::Expired => format!("expired {} ago", format_countdown(now - timer.deadline)),
        _ => format_countdown(timer.deadline - now),
    };
    let marker = if timer.state == TimerState::Notified { "!" } else { " " };

    let mut line = format!(
        "{marker} {} ({when}) | {} ({})",
        format_deadline(&timer.deadline),
        timer.system,
        view.region.as_deref().unwrap_or(UNKNOWN_REGION),
    );
    if let Some(distance) = view.distance {
        line.push_str(&format!(" {distance}"));
    }
    line.push_str(&format!(" | {}", timer.structure));
    if !timer.tags.is_empty() {
        line.push_str(&format!(" {}", timer.tag_text()));
    }
    line.push_str(&format!(" | ID {}", timer.id));
    line
}

/// Text of the pre-deadline notification sent on ACTIVE -> NOTIFIED.
pub fn notice_text(view: &TimerView, now: DateTime<Utc>) -> String {
    let timer = &view.timer;
    let distance = view
        .distance
        .map(|d| format!(" {d}"))
        .unwrap_or_default();
    format!(
        "Timer {} in {}: {} ({}){} - {}{} at {} UTC",
        timer.id,
        format_countdown(timer.deadline - now),
        timer.system,
        view.region.as_deref().unwrap_or(UNKNOWN_REGION),
        distance,
        timer.structure,
        tag_suffix(view),
        format_deadline(&timer.deadline),
    )
}

/// Text of the alert sent when a timer expires while still fresh.
pub fn start_alert_text(view: &TimerView) -> String {
    let timer = &view.timer;
    format!(
        "TIMER STARTING NOW: {} ({}) - {}{} (ID {})",
        timer.system,
        view.region.as_deref().unwrap_or(UNKNOWN_REGION),
        timer.structure,
        tag_suffix(view),
        timer.id,
    )
}

fn tag_suffix(view: &TimerView) -> String {
    if view.timer.tags.is_empty() {
        String::new()
    } else {
        format!(" {}", view.timer.tag_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{Timer, TimerId};
    use crate::universe::Distance;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 10, 0, 0).unwrap()
    }

    fn view(id: u32, minutes: i64, state: TimerState, distance: Option<Distance>) -> TimerView {
        TimerView {
            timer: Timer {
                id: TimerId::new(id),
                system: "9PX2-F".into(),
                structure: "WWW".into(),
                tags: vec!["VAPOR".into(), "FINAL".into()],
                deadline: now() + Duration::minutes(minutes),
                state,
                created_at: now(),
            },
            region: Some("Tenerifis".into()),
            distance,
        }
    }

    #[test]
    fn countdown_formats() {
        assert_eq!(format_countdown(Duration::seconds(-5)), "now");
        assert_eq!(format_countdown(Duration::seconds(42)), "42s");
        assert_eq!(format_countdown(Duration::seconds(125)), "2m 5s");
        assert_eq!(format_countdown(Duration::minutes(185)), "3h 5m");
        assert_eq!(format_countdown(Duration::minutes(60 * 50 + 1)), "2d 2h 1m");
    }

    #[test]
    fn empty_board_has_header() {
        let board = render_board(&[], None, now(), Duration::minutes(60));
        assert_eq!(
            board,
            "Current Time: 2025-03-05 10:00:00 UTC\nStaging: not set\n\nNo active timers."
        );
    }

    #[test]
    fn lines_carry_all_annotations() {
        let views = [view(1000, 90, TimerState::Active, Some(Distance::Jumps(3)))];
        let board = render_board(&views, Some("OJOS-T"), now(), Duration::minutes(60));
        assert!(board.contains("Staging: OJOS-T"));
        assert!(board.contains(
            "2025-03-05 11:30:00 (1h 30m) | 9PX2-F (Tenerifis) 3j | WWW [VAPOR][FINAL] | ID 1000"
        ));
    }

    #[test]
    fn distance_is_omitted_without_staging() {
        let views = [view(1000, 90, TimerState::Notified, None)];
        let board = render_board(&views, None, now(), Duration::minutes(60));
        assert!(board.contains("! 2025-03-05 11:30:00 (1h 30m) | 9PX2-F (Tenerifis) | WWW"));
    }

    #[test]
    fn expired_timers_get_their_own_section() {
        let views = [
            view(1001, -10, TimerState::Expired, None),
            view(1002, -120, TimerState::Expired, None),
            view(1000, 30, TimerState::Active, None),
        ];
        let board = render_board(&views, None, now(), Duration::minutes(60));
        let (active, expired) = board.split_once("Recently expired:").unwrap();
        assert!(active.contains("ID 1000"));
        assert!(expired.contains("expired 10m 0s ago"));
        assert!(expired.contains("ID 1001"));
        assert!(!board.contains("ID 1002"));
    }

    #[test]
    fn long_boards_are_truncated() {
        let views: Vec<TimerView> = (0..100)
            .map(|i| view(1000 + i, 10 + i64::from(i), TimerState::Active, None))
            .collect();
        let board = render_board(&views, None, now(), Duration::minutes(60));
        assert!(board.chars().count() <= MAX_BOARD_CHARS);
        let shown = board.matches("| ID ").count();
        assert!(shown < 100);
        assert!(board.ends_with(&format!("... and {} more", 100 - shown)));
    }

    #[test]
    fn long_staging_names_are_clipped() {
        let staging = "X".repeat(5000);
        let views = [view(1000, 30, TimerState::Active, None)];
        let board = render_board(&views, Some(&staging), now(), Duration::minutes(60));
        assert!(board.chars().count() <= MAX_BOARD_CHARS);
        let header = board.lines().nth(1).unwrap();
        assert_eq!(header, format!("Staging: {}...", "X".repeat(MAX_STAGING_CHARS - 3)));
        assert!(board.contains("ID 1000"));

        assert_eq!(clip("OJOS-T", MAX_STAGING_CHARS), "OJOS-T");
    }

    #[test]
    fn notices_describe_the_timer() {
        let v = view(1000, 45, TimerState::Notified, Some(Distance::Unknown));
        assert_eq!(
            notice_text(&v, now()),
            "Timer 1000 in 45m 0s: 9PX2-F (Tenerifis) ?j - WWW [VAPOR][FINAL] at 2025-03-05 10:45:00 UTC"
        );
        assert_eq!(
            start_alert_text(&v),
            "TIMER STARTING NOW: 9PX2-F (Tenerifis) - WWW [VAPOR][FINAL] (ID 1000)"
        );
    }
}
