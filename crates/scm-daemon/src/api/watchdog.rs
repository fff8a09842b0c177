//! Daemon liveness, from the heartbeat row.

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ApiError, ApiState};
use crate::store::HEARTBEAT_KEY;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchdogStatus {
    pub last_heartbeat: DateTime<Utc>,
    /// Seconds since `last_heartbeat`.
    pub age_secs: i64,
}

impl WatchdogStatus {
    pub fn new(last_heartbeat: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            last_heartbeat,
            age_secs: (now - last_heartbeat).num_seconds(),
        }
    }
}

pub async fn check_watchdog(
    State(state): State<ApiState>,
) -> Result<Json<WatchdogStatus>, ApiError> {
    let row = sqlx::query_as::<_, (DateTime<Utc>,)>("SELECT ts FROM sys WHERE key = $1")
        .bind(HEARTBEAT_KEY)
        .fetch_optional(state.pool())
        .await?;

    let Some((ts,)) = row else {
        return Err(ApiError::not_found("no heartbeat recorded"));
    };
    Ok(Json(WatchdogStatus::new(ts, Utc::now())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    #[test]
    fn age_is_whole_seconds() {
        let now = Utc.with_ymd_and_hms(2015, 6, 1, 0, 0, 0).unwrap();
        let status = WatchdogStatus::new(now - TimeDelta::milliseconds(61_900), now);
        assert_eq!(status.age_secs, 61);
    }
}
