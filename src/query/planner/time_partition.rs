//! 时间分区
//!
//! 把时间范围切分为等宽、首尾相接的半开区间，并把区间谓词注入到 SQL 文本中。

use std::sync::OnceLock;

use chrono::{Duration, SecondsFormat};
use regex::Regex;

use crate::core::error::{CoreResult, QueryError};
use crate::core::types::TimeRange;

/// 可分区的最短时间跨度（小时）
pub const MIN_PARTITION_HOURS: f64 = 2.0;

/// 每个分段的目标宽度（小时）
const SEGMENT_HOURS: f64 = 2.0;

pub fn is_partitionable(range: &TimeRange) -> bool {
    range.hours() >= MIN_PARTITION_HOURS
}

/// 分段数量：`min(ceil(hours / 2), max_segments)`
pub fn segment_count(range: &TimeRange, max_segments: usize) -> usize {
    let wanted = (range.hours() / SEGMENT_HOURS).ceil() as usize;
    wanted.min(max_segments).max(1)
}

/// 等宽切分，最后一段的结束时间固定为原始结束时间
pub fn split_time_range(range: &TimeRange, max_segments: usize) -> CoreResult<Vec<TimeRange>> {
    if !is_partitionable(range) {
        return Err(QueryError::ParallelPlanning(format!(
            "时间范围 {:.2} 小时不足 {} 小时，无法分区",
            range.hours(),
            MIN_PARTITION_HOURS
        )));
    }

    let count = segment_count(range, max_segments);
    let total_ms = range.duration().num_milliseconds();
    let width = Duration::milliseconds(total_ms / count as i64);

    let mut segments = Vec::with_capacity(count);
    let mut start = range.start;
    for i in 0..count {
        let end = if i + 1 == count {
            range.end
        } else {
            start + width
        };
        segments.push(TimeRange::new(start, end)?);
        start = end;
    }
    Ok(segments)
}

/// 毫秒精度，与分段边界一致
pub fn format_instant(range_point: chrono::DateTime<chrono::Utc>) -> String {
    range_point.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 半开区间谓词 `field >= 'start' AND field < 'end'`
pub fn range_condition(field: &str, range: &TimeRange) -> String {
    format!(
        "{} >= '{}' AND {} < '{}'",
        field,
        format_instant(range.start),
        field,
        format_instant(range.end)
    )
}

fn where_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bWHERE\b").expect("static regex"))
}

fn tail_clause() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:GROUP\s+BY|ORDER\s+BY|HAVING|LIMIT|OFFSET)\b").expect("static regex")
    })
}

/// 逐字节标记是否处于顶层：括号深度为 0 且不在字符串字面量内
fn top_level_mask(sql: &str) -> Vec<bool> {
    let mut mask = Vec::with_capacity(sql.len());
    let mut depth = 0usize;
    let mut in_string = false;
    for &b in sql.as_bytes() {
        mask.push(!in_string && depth == 0);
        match b {
            b'\'' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    mask
}

fn find_top_level<'a>(
    re: &Regex,
    sql: &'a str,
    mask: &[bool],
    from: usize,
) -> Option<regex::Match<'a>> {
    re.find_iter(sql).find(|m| m.start() >= from && mask[m.start()])
}

/// 把条件注入 SQL
///
/// 已有 `WHERE` 时原条件加括号后以 `AND` 连接；否则新增 `WHERE`。
/// 条件放在 `GROUP BY` / `ORDER BY` / `HAVING` / `LIMIT` 等尾部子句之前。
/// 只识别外层查询的关键字，子查询、CTE 和字符串字面量中的同名关键字不参与定位。
pub fn inject_condition(sql: &str, condition: &str) -> String {
    let sql = sql.trim().trim_end_matches(';').trim_end();
    let mask = top_level_mask(sql);

    let where_match = find_top_level(where_keyword(), sql, &mask, 0);
    let search_from = where_match.map(|m| m.end()).unwrap_or(0);
    let tail_at = find_top_level(tail_clause(), sql, &mask, search_from)
        .map(|m| m.start())
        .unwrap_or(sql.len());

    let (body, tail) = sql.split_at(tail_at);
    let body = body.trim_end();
    let tail = tail.trim_start();

    let mut out = match where_match {
        Some(m) => {
            let existing = body[m.end()..].trim();
            format!("{} WHERE ({}) AND {}", body[..m.start()].trim_end(), existing, condition)
        }
        None => format!("{} WHERE {}", body, condition),
    };
    if !tail.is_empty() {
        out.push(' ');
        out.push_str(tail);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> TimeRange {
        TimeRange::parse(start, end).unwrap()
    }

    #[test]
    fn test_ten_hours_cap_eight() {
        let r = range("2024-01-01T00:00:00Z", "2024-01-01T10:00:00Z");
        let segments = split_time_range(&r, 8).unwrap();
        assert_eq!(segments.len(), 5);
        for s in &segments {
            assert_eq!(s.duration(), Duration::hours(2));
        }
        assert_eq!(segments[4].end, r.end);
    }

    #[test]
    fn test_segments_cover_range_exactly() {
        let r = range("2024-03-01T00:00:00Z", "2024-03-01T07:00:01Z");
        let segments = split_time_range(&r, 3).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].start, r.start);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(segments.last().unwrap().end, r.end);
    }

    #[test]
    fn test_short_range_rejected() {
        let r = range("2024-01-01T00:00:00Z", "2024-01-01T01:59:59Z");
        assert!(split_time_range(&r, 8).is_err());
    }

    #[test]
    fn test_inject_without_where() {
        let sql = inject_condition("SELECT * FROM events ORDER BY ts DESC LIMIT 5;", "ts >= 'a' AND ts < 'b'");
        assert_eq!(sql, "SELECT * FROM events WHERE ts >= 'a' AND ts < 'b' ORDER BY ts DESC LIMIT 5");
    }

    #[test]
    fn test_inject_with_where_and_group_by() {
        let sql = inject_condition(
            "SELECT host, COUNT(*) FROM events WHERE a = 1 OR b = 2 GROUP BY host",
            "ts >= 'a' AND ts < 'b'",
        );
        assert_eq!(
            sql,
            "SELECT host, COUNT(*) FROM events WHERE (a = 1 OR b = 2) AND ts >= 'a' AND ts < 'b' GROUP BY host"
        );
    }

    #[test]
    fn test_fractional_second_bounds_survive() {
        let r = range("2024-01-01T00:00:00.500Z", "2024-01-01T10:00:00.750Z");
        let segments = split_time_range(&r, 8).unwrap();
        let first = range_condition("timestamp", &segments[0]);
        let last = range_condition("timestamp", &segments[segments.len() - 1]);

        assert!(first.starts_with("timestamp >= '2024-01-01T00:00:00.500Z'"));
        assert!(last.ends_with("timestamp < '2024-01-01T10:00:00.750Z'"));
        for pair in segments.windows(2) {
            assert_eq!(format_instant(pair[0].end), format_instant(pair[1].start));
        }
    }

    #[test]
    fn test_inject_skips_subquery_clauses() {
        let sql = inject_condition(
            "SELECT host FROM (SELECT host FROM events WHERE a = 1 LIMIT 50) recent ORDER BY host",
            "ts >= 'a'",
        );
        assert_eq!(
            sql,
            "SELECT host FROM (SELECT host FROM events WHERE a = 1 LIMIT 50) recent WHERE ts >= 'a' ORDER BY host"
        );
    }

    #[test]
    fn test_inject_targets_outer_where_after_cte() {
        let sql = inject_condition(
            "WITH hot AS (SELECT host FROM alerts WHERE level = 'where') \
             SELECT * FROM events WHERE host IN (SELECT host FROM hot) GROUP BY host",
            "ts >= 'a'",
        );
        assert_eq!(
            sql,
            "WITH hot AS (SELECT host FROM alerts WHERE level = 'where') \
             SELECT * FROM events WHERE (host IN (SELECT host FROM hot)) AND ts >= 'a' GROUP BY host"
        );
    }

    #[test]
    fn test_keywords_inside_literals_ignored() {
        let sql = inject_condition("SELECT * FROM events WHERE note = 'order by me' LIMIT 3", "ts >= 'a'");
        assert_eq!(sql, "SELECT * FROM events WHERE (note = 'order by me') AND ts >= 'a' LIMIT 3");
    }
}
