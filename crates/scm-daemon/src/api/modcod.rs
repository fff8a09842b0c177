//! MODCOD share history, thinned to roughly [`TARGET_POINTS`] per series.

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use scm_core::modcod::{ACTIVE_MODCODS, MODCOD_NAMES};

use super::{ApiError, ApiState};

/// Most recent `mc` rows considered.
pub const MAX_ROWS: i64 = 10_000;

pub const TARGET_POINTS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ModcodRow {
    pub ts: DateTime<Utc>,
    pub per_mille: Vec<i16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModcodSeries {
    pub key: &'static str,
    /// `[milliseconds since the epoch, per-mille share]`, oldest first.
    pub values: Vec<(i64, i16)>,
}

/// Keep every n-th row so that about `target` remain.
pub fn downsample<T>(rows: &[T], target: usize) -> impl Iterator<Item = &T> {
    let stride = (rows.len() / target.max(1)).max(1);
    rows.iter().step_by(stride)
}

/// One series per active MODCOD from rows given newest first.
pub fn series(rows: &[ModcodRow]) -> Vec<ModcodSeries> {
    let mut all: Vec<ModcodSeries> = MODCOD_NAMES[1..=ACTIVE_MODCODS]
        .iter()
        .map(|&key| ModcodSeries {
            key,
            values: Vec::new(),
        })
        .collect();

    for row in downsample(rows, TARGET_POINTS) {
        let x = row.ts.timestamp_millis();
        for (s, &share) in all.iter_mut().zip(&row.per_mille) {
            s.values.push((x, share));
        }
    }
    for s in &mut all {
        s.values.reverse();
    }
    all
}

pub async fn get_modcod(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ModcodSeries>>, ApiError> {
    let rows = sqlx::query_as::<_, (DateTime<Utc>, Vec<i16>)>(
        "SELECT ts, per_mille FROM mc ORDER BY ts DESC LIMIT $1",
    )
    .bind(MAX_ROWS)
    .fetch_all(state.pool())
    .await?;

    let rows: Vec<ModcodRow> = rows
        .into_iter()
        .map(|(ts, per_mille)| ModcodRow { ts, per_mille })
        .collect();
    Ok(Json(series(&rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn rows(n: usize) -> Vec<ModcodRow> {
        let t0 = Utc.with_ymd_and_hms(2015, 6, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| ModcodRow {
                ts: t0 - TimeDelta::seconds(i as i64),
                per_mille: vec![i as i16; ACTIVE_MODCODS],
            })
            .collect()
    }

    #[test]
    fn downsample_keeps_about_target() {
        let data: Vec<u32> = (0..10_000).collect();
        let kept: Vec<_> = downsample(&data, 100).copied().collect();
        assert_eq!(kept.len(), 100);
        assert_eq!(kept[1], 100);

        let data: Vec<u32> = (0..250).collect();
        assert_eq!(downsample(&data, 100).count(), 125);
    }

    #[test]
    fn short_history_is_kept_whole() {
        let data = [1, 2, 3];
        assert_eq!(downsample(&data, 100).count(), 3);
        assert_eq!(downsample::<u8>(&[], 100).count(), 0);
    }

    #[test]
    fn one_series_per_modcod_oldest_first() {
        let all = series(&rows(3));
        assert_eq!(all.len(), ACTIVE_MODCODS);
        assert_eq!(all[0].key, "QPSK 1/4");
        assert_eq!(all[ACTIVE_MODCODS - 1].key, "32APSK 9/10");
        let shares: Vec<_> = all[5].values.iter().map(|v| v.1).collect();
        assert_eq!(shares, [2, 1, 0]);
        assert!(all[5].values[0].0 < all[5].values[2].0);
    }

    #[test]
    fn short_rows_fill_what_they_have() {
        let mut data = rows(1);
        data[0].per_mille.truncate(2);
        let all = series(&data);
        assert_eq!(all[1].values.len(), 1);
        assert!(all[2].values.is_empty());
    }
}
