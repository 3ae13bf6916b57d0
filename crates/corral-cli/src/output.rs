//! Formatted output helpers for CLI commands.

use chrono::{DateTime, Utc};
use corral_common::types::PortMapping;

/// Formats the time since `then` the way `ps` shows it ("5 minutes ago").
#[must_use]
pub fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let (count, unit) = match secs {
        0..60 => (secs, "second"),
        60..3_600 => (secs / 60, "minute"),
        3_600..86_400 => (secs / 3_600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{count} {unit}{plural} ago")
}

/// Joins published ports as `8080->80/tcp, ...`.
#[must_use]
pub fn format_ports(ports: &[PortMapping]) -> String {
    ports
        .iter()
        .map(|p| format!("{}->{}/{}", p.host_port, p.container_port, p.protocol.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Shortens `s` to `max` characters, marking the cut with `…`.
#[must_use]
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let mut cut: String = s.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// `-` for empty cells.
#[must_use]
pub fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn ages_use_the_largest_unit() {
        let now = Utc::now();
        assert_eq!(format_age(now, now), "0 seconds ago");
        assert_eq!(format_age(now - Duration::seconds(1), now), "1 second ago");
        assert_eq!(format_age(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(format_age(now - Duration::hours(1), now), "1 hour ago");
        assert_eq!(format_age(now - Duration::days(3), now), "3 days ago");
    }

    #[test]
    fn future_timestamps_read_as_now() {
        let now = Utc::now();
        assert_eq!(format_age(now + Duration::seconds(30), now), "0 seconds ago");
    }

    #[test]
    fn ports_are_listed_in_order() {
        let ports: Vec<PortMapping> = ["8080:80", "5353:53/udp"]
            .iter()
            .map(|p| p.parse().expect("port"))
            .collect();
        assert_eq!(format_ports(&ports), "8080->80/tcp, 5353->53/udp");
        assert_eq!(format_ports(&[]), "");
    }

    #[test]
    fn long_cells_are_truncated() {
        assert_eq!(truncate("sleep 30", 20), "sleep 30");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
        assert_eq!(or_dash(""), "-");
        assert_eq!(or_dash("x"), "x");
    }
}
