//! EsNo history: dwell records averaged per segment and time bucket.
//!
//! Buckets are aligned in UTC. A bucket whose average is exactly 0 (only
//! invalid dwells) is reported with `y: null` so charts draw a gap.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scm_core::segments::Receiver;

use super::{ApiError, ApiState};

/// Most recent buckets returned across all segments.
pub const MAX_BUCKETS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    #[default]
    Minute,
    TenMinutes,
    Hour,
    HalfDay,
    Day,
}

impl Interval {
    /// SQL expression mapping `ts` to the start of its bucket.
    fn bucket_sql(self) -> &'static str {
        match self {
            Interval::Minute => "date_trunc('minute', ts AT TIME ZONE 'UTC')",
            Interval::TenMinutes => {
                "date_trunc('hour', ts AT TIME ZONE 'UTC') \
                 + floor(extract(minute FROM ts AT TIME ZONE 'UTC') / 10)::DOUBLE PRECISION * interval '10 minutes'"
            }
            Interval::Hour => "date_trunc('hour', ts AT TIME ZONE 'UTC')",
            Interval::HalfDay => {
                "date_trunc('day', ts AT TIME ZONE 'UTC') \
                 + floor(extract(hour FROM ts AT TIME ZONE 'UTC') / 12)::DOUBLE PRECISION * interval '12 hours'"
            }
            Interval::Day => "date_trunc('day', ts AT TIME ZONE 'UTC')",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EsnoQuery {
    #[serde(default)]
    pub interval: Interval,
}

/// One aggregated bucket as read from `sdd`.
#[derive(Debug, Clone, PartialEq)]
pub struct EsnoBucket {
    pub receiver: Receiver,
    pub segment: String,
    /// Timestamp of the earliest dwell in the bucket.
    pub ts: DateTime<Utc>,
    pub esno: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    /// Milliseconds since the epoch.
    pub x: i64,
    pub y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EsnoSeries {
    /// Chart legend, `"<segment> on <receiver>"`.
    pub key: String,
    pub receiver: Receiver,
    pub segment: String,
    pub values: Vec<Point>,
}

/// Group buckets into one series per segment, ordered by key, each series
/// oldest first.
pub fn series(buckets: impl IntoIterator<Item = EsnoBucket>) -> Vec<EsnoSeries> {
    let mut grouped: BTreeMap<String, EsnoSeries> = BTreeMap::new();
    for bucket in buckets {
        let key = format!("{} on {}", bucket.segment, bucket.receiver);
        let entry = grouped.entry(key.clone()).or_insert_with(|| EsnoSeries {
            key,
            receiver: bucket.receiver,
            segment: bucket.segment.clone(),
            values: Vec::new(),
        });
        entry.values.push(Point {
            x: bucket.ts.timestamp_millis(),
            y: (bucket.esno != 0.0).then_some(bucket.esno),
        });
    }

    let mut all: Vec<EsnoSeries> = grouped.into_values().collect();
    for s in &mut all {
        s.values.sort_by_key(|p| p.x);
    }
    all
}

pub async fn get_esno(
    State(state): State<ApiState>,
    Query(query): Query<EsnoQuery>,
) -> Result<Json<Vec<EsnoSeries>>, ApiError> {
    let sql = format!(
        "SELECT receiver, segment, MIN(ts) AS first_ts, AVG(esno)::DOUBLE PRECISION \
         FROM sdd GROUP BY receiver, segment, {} \
         ORDER BY first_ts DESC LIMIT $1",
        query.interval.bucket_sql()
    );
    let rows = sqlx::query_as::<_, (String, String, DateTime<Utc>, f64)>(&sql)
        .bind(MAX_BUCKETS)
        .fetch_all(state.pool())
        .await?;

    let buckets = rows
        .into_iter()
        .map(|(receiver, segment, ts, esno)| {
            let receiver = receiver.parse::<Receiver>().map_err(ApiError::internal)?;
            Ok(EsnoBucket {
                receiver,
                segment,
                ts,
                esno,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(Json(series(buckets)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bucket(receiver: Receiver, segment: &str, minute: u32, esno: f64) -> EsnoBucket {
        EsnoBucket {
            receiver,
            segment: segment.into(),
            ts: Utc.with_ymd_and_hms(2015, 6, 1, 12, minute, 0).unwrap(),
            esno,
        }
    }

    #[test]
    fn groups_by_segment_and_orders_oldest_first() {
        // Rows arrive newest first, as the query returns them.
        let all = series([
            bucket(Receiver::Rx2, "C", 3, 7.0),
            bucket(Receiver::Rx1, "A", 2, 9.5),
            bucket(Receiver::Rx1, "A", 1, 9.0),
        ]);
        let keys: Vec<_> = all.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["A on RX1", "C on RX2"]);
        let xs: Vec<_> = all[0].values.iter().map(|p| p.x).collect();
        assert!(xs[0] < xs[1]);
        assert_eq!(all[0].values[1].y, Some(9.5));
        assert_eq!(all[1].receiver, Receiver::Rx2);
    }

    #[test]
    fn zero_average_is_a_gap() {
        let all = series([bucket(Receiver::Rx1, "A", 0, 0.0)]);
        assert_eq!(all[0].values[0].y, None);
        let json = serde_json::to_value(&all[0]).unwrap();
        assert!(json["values"][0]["y"].is_null());
        assert_eq!(json["receiver"], "RX1");
    }

    #[test]
    fn interval_names_match_query_strings() {
        let parse = |s: &str| serde_json::from_value::<Interval>(serde_json::json!(s)).ok();
        assert_eq!(parse("ten_minutes"), Some(Interval::TenMinutes));
        assert_eq!(parse("half_day"), Some(Interval::HalfDay));
        assert_eq!(parse("week"), None);
        assert_eq!(EsnoQuery::default().interval, Interval::Minute);
    }
}
