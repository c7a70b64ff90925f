/// Utility functions and helpers
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Generate a unique ID based on timestamp and random component
pub fn generate_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    let random: u32 = rand::random();
    format!("{}-{}-{:x}", prefix, timestamp, random)
}

/// Format a latency for human-readable output
pub fn format_latency(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros < 1_000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.2}ms", micros as f64 / 1_000.0)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Format duration for human-readable output
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Match a key against a Redis-style glob pattern (`*`, `?`, `[abc]`, `[a-z]`, `\x`)
///
/// Runs in O(pattern * key): a mismatch only ever backtracks to the most
/// recent `*`.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0, 0);
    // pattern position after the last `*` and the key position it resumes from
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if p.get(pi) == Some(&'*') {
            pi += 1;
            star = Some((pi, ki));
            continue;
        }
        if let Some(next) = match_token(&p, pi, k[ki]) {
            pi = next;
            ki += 1;
            continue;
        }
        match star {
            Some((resume, from)) => {
                pi = resume;
                ki = from + 1;
                star = Some((resume, from + 1));
            }
            None => return false,
        }
    }

    p[pi.min(p.len())..].iter().all(|&ch| ch == '*')
}

/// Match the single-character token at `p[pi]` against `c`, returning the
/// position of the following token
fn match_token(p: &[char], pi: usize, c: char) -> Option<usize> {
    match *p.get(pi)? {
        '?' => Some(pi + 1),
        '[' => {
            let Some(close) = p[pi..].iter().position(|&ch| ch == ']') else {
                return (c == '[').then_some(pi + 1);
            };
            let end = pi + close;
            let class = &p[pi + 1..end];
            let (negate, class) = match class.first() {
                Some('^') => (true, &class[1..]),
                _ => (false, class),
            };

            let mut hit = false;
            let mut i = 0;
            while i < class.len() {
                if i + 2 < class.len() && class[i + 1] == '-' {
                    hit |= class[i] <= c && c <= class[i + 2];
                    i += 3;
                } else {
                    hit |= class[i] == c;
                    i += 1;
                }
            }
            (hit != negate).then_some(end + 1)
        }
        '\\' if pi + 1 < p.len() => (p[pi + 1] == c).then_some(pi + 2),
        ch => (ch == c).then_some(pi + 1),
    }
}

/// Serde helpers for durations stored as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
