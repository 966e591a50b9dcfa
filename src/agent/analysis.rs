//! Trip analysis stage: aggregate uploaded trips through the query tool.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::StepLog;
use crate::error::{AppResult, ValidationError};
use crate::tools::{TripStore, TRIPS_TABLE};

/// Accepted headers for trip duration in minutes.
pub const DURATION_COLUMNS: &[&str] = &["duration", "duration_min", "duration_minutes", "trip_duration"];

/// Accepted headers for the vehicle type.
pub const VEHICLE_COLUMNS: &[&str] = &["bike_type", "rideable_type", "vehicle_type"];

/// Accepted headers for the trip start timestamp.
pub const START_COLUMNS: &[&str] = &["start_time", "started_at", "start_date"];

/// Histogram buckets as `(label, exclusive upper bound in minutes)`.
pub const DURATION_BUCKETS: &[(&str, f64)] = &[
    ("0-10", 10.0),
    ("10-20", 20.0),
    ("20-30", 30.0),
    ("30-45", 45.0),
    ("45-60", 60.0),
    ("60+", f64::INFINITY),
];

/// Dataset columns the analysis reads, after alias resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct TripColumns {
    pub duration: String,
    pub vehicle: Option<String>,
    pub start: Option<String>,
}

impl TripColumns {
    /// Pick the first known alias present for each field. Duration is required.
    pub fn resolve(columns: &[String]) -> Result<Self, ValidationError> {
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .copied()
                .find(|alias| columns.iter().any(|c| c == alias))
                .map(str::to_string)
        };

        let duration = find(DURATION_COLUMNS).ok_or_else(|| ValidationError::MissingColumn {
            column: "duration".to_string(),
            candidates: DURATION_COLUMNS.join(", "),
        })?;

        Ok(Self {
            duration,
            vehicle: find(VEHICLE_COLUMNS),
            start: find(START_COLUMNS),
        })
    }
}

/// Trips counted per ISO-style week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyTrips {
    pub week: String,
    pub trips: u64,
    pub minutes: f64,
}

/// Trips whose duration falls in one histogram bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationBucket {
    pub label: String,
    pub trips: u64,
}

/// Aggregate view of all uploaded trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripAnalysis {
    pub total_trips: u64,
    /// Mean duration in minutes; malformed durations count as zero.
    pub avg_duration: f64,
    pub total_duration: f64,
    pub ebike_trips: u64,
    pub classic_trips: u64,
    pub weekly: Vec<WeeklyTrips>,
    pub duration_histogram: Vec<DurationBucket>,
}

/// Numeric duration in minutes. Anything that is not a plain non-negative
/// decimal (digits with at most one point) is zeroed.
pub fn duration_expr(column: &str) -> String {
    format!(
        "(CASE WHEN trim(\"{c}\") GLOB '*[0-9]*' \
         AND trim(\"{c}\") NOT GLOB '*[^0-9.]*' \
         AND trim(\"{c}\") NOT GLOB '*.*.*' \
         THEN CAST(trim(\"{c}\") AS REAL) ELSE 0 END)",
        c = column
    )
}

/// `'electric'` for e-bikes and pedal-assist vehicles, `'classic'` otherwise.
pub fn vehicle_class_expr(column: &str) -> String {
    format!(
        "(CASE WHEN lower(\"{c}\") LIKE '%electric%' OR lower(\"{c}\") LIKE '%ebike%' \
         OR lower(\"{c}\") LIKE '%e-bike%' OR lower(\"{c}\") LIKE '%assist%' \
         THEN 'electric' ELSE 'classic' END)",
        c = column
    )
}

fn bucket_expr(duration: &str) -> String {
    let mut expr = String::from("(CASE");
    for (label, upper) in DURATION_BUCKETS {
        if upper.is_finite() {
            expr.push_str(&format!(" WHEN {} < {} THEN '{}'", duration, upper, label));
        } else {
            expr.push_str(&format!(" ELSE '{}'", label));
        }
    }
    expr.push_str(" END)");
    expr
}

/// Run the aggregation queries, recording each as an Action step.
pub async fn analyze_trips(store: &TripStore, log: &mut StepLog) -> AppResult<TripAnalysis> {
    let columns = TripColumns::resolve(&store.columns().await?)?;
    let duration = duration_expr(&columns.duration);

    let totals_sql = format!(
        "SELECT COUNT(*) AS total_trips, COALESCE(SUM({d}), 0) AS total_minutes, \
         COALESCE(AVG({d}), 0) AS avg_minutes FROM {t}",
        d = duration,
        t = TRIPS_TABLE
    );
    let totals = run_query(store, log, "trip totals", &totals_sql).await?;
    let totals = totals.first().cloned().unwrap_or_default();
    let total_trips = as_u64(&totals, "total_trips");
    let total_duration = as_f64(&totals, "total_minutes");
    let avg_duration = as_f64(&totals, "avg_minutes");

    let (ebike_trips, classic_trips) = match &columns.vehicle {
        Some(vehicle) => {
            let sql = format!(
                "SELECT {v} AS class, COUNT(*) AS trips FROM {t} GROUP BY class",
                v = vehicle_class_expr(vehicle),
                t = TRIPS_TABLE
            );
            let rows = run_query(store, log, "trips by vehicle class", &sql).await?;
            let count_of = |class: &str| {
                rows.iter()
                    .find(|r| r.get("class").and_then(Value::as_str) == Some(class))
                    .map(|r| as_u64(r, "trips"))
                    .unwrap_or(0)
            };
            (count_of("electric"), count_of("classic"))
        }
        None => (0, total_trips),
    };

    let weekly: Vec<WeeklyTrips> = match &columns.start {
        Some(start) => {
            let week = format!("strftime('%Y-W%W', \"{}\")", start);
            let sql = format!(
                "SELECT {w} AS week, COUNT(*) AS trips, COALESCE(SUM({d}), 0) AS minutes \
                 FROM {t} WHERE {w} IS NOT NULL GROUP BY week ORDER BY week",
                w = week,
                d = duration,
                t = TRIPS_TABLE
            );
            run_query(store, log, "weekly trip counts", &sql)
                .await?
                .iter()
                .map(|r| WeeklyTrips {
                    week: r.get("week").and_then(Value::as_str).unwrap_or_default().to_string(),
                    trips: as_u64(r, "trips"),
                    minutes: as_f64(r, "minutes"),
                })
                .collect()
        }
        None => Vec::new(),
    };

    let histogram_sql = format!(
        "SELECT {b} AS bucket, COUNT(*) AS trips FROM {t} GROUP BY bucket",
        b = bucket_expr(&duration),
        t = TRIPS_TABLE
    );
    let buckets = run_query(store, log, "duration histogram", &histogram_sql).await?;
    let duration_histogram: Vec<DurationBucket> = DURATION_BUCKETS
        .iter()
        .map(|(label, _)| DurationBucket {
            label: label.to_string(),
            trips: buckets
                .iter()
                .find(|r| r.get("bucket").and_then(Value::as_str) == Some(*label))
                .map(|r| as_u64(r, "trips"))
                .unwrap_or(0),
        })
        .collect();

    info!(
        total_trips,
        avg_duration,
        ebike_trips,
        classic_trips,
        "Trip analysis completed"
    );

    Ok(TripAnalysis {
        total_trips,
        avg_duration,
        total_duration,
        ebike_trips,
        classic_trips,
        weekly,
        duration_histogram,
    })
}

async fn run_query(
    store: &TripStore,
    log: &mut StepLog,
    purpose: &str,
    sql: &str,
) -> AppResult<Vec<Map<String, Value>>> {
    log.action(
        format!("Query trip data: {}", purpose),
        json!({ "tool": "trip_query", "sql": sql }),
    );
    Ok(store.query(sql).await?.rows)
}

fn as_u64(row: &Map<String, Value>, key: &str) -> u64 {
    row.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn as_f64(row: &Map<String, Value>, key: &str) -> f64 {
    row.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::StepKind;
    use crate::config::DatabaseConfig;
    use crate::tools::TripRow;

    fn trip(duration: &str, bike_type: &str, start: &str) -> TripRow {
        [
            ("duration", duration),
            ("bike_type", bike_type),
            ("start_time", start),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    async fn analyze(rows: &[TripRow]) -> (TripAnalysis, StepLog) {
        let store = TripStore::new(&DatabaseConfig::default());
        store.load(rows).await.unwrap();
        let mut log = StepLog::new();
        let analysis = analyze_trips(&store, &mut log).await.unwrap();
        (analysis, log)
    }

    #[test]
    fn test_resolve_columns_prefers_first_alias() {
        let columns = vec![
            "rideable_type".to_string(),
            "duration".to_string(),
            "started_at".to_string(),
        ];
        let resolved = TripColumns::resolve(&columns).unwrap();
        assert_eq!(resolved.duration, "duration");
        assert_eq!(resolved.vehicle.as_deref(), Some("rideable_type"));
        assert_eq!(resolved.start.as_deref(), Some("started_at"));
    }

    #[test]
    fn test_resolve_columns_requires_duration() {
        let columns = vec!["bike_type".to_string()];
        let err = TripColumns::resolve(&columns).unwrap_err();
        assert!(matches!(err, ValidationError::MissingColumn { .. }));
    }

    #[tokio::test]
    async fn test_two_trip_analysis() {
        let (analysis, _) = analyze(&[
            trip("10", "classic", "2024-01-01 08:00:00"),
            trip("20", "ebike", "2024-01-02 09:00:00"),
        ])
        .await;

        assert_eq!(analysis.total_trips, 2);
        assert_eq!(analysis.avg_duration, 15.0);
        assert_eq!(analysis.total_duration, 30.0);
        assert_eq!(analysis.ebike_trips, 1);
        assert_eq!(analysis.classic_trips, 1);
    }

    #[tokio::test]
    async fn test_malformed_duration_is_zeroed() {
        let (analysis, _) = analyze(&[
            trip("10", "classic", "2024-01-01 08:00:00"),
            trip("abc", "classic", "2024-01-01 09:00:00"),
        ])
        .await;

        assert_eq!(analysis.total_trips, 2);
        assert_eq!(analysis.total_duration, 10.0);
        assert_eq!(analysis.avg_duration, 5.0);
    }

    #[tokio::test]
    async fn test_dotted_durations_are_zeroed() {
        let (analysis, _) = analyze(&[
            trip("1.2.3", "classic", ""),
            trip("10", "classic", ""),
            trip("..", "classic", ""),
            trip("5.", "classic", ""),
        ])
        .await;

        assert_eq!(analysis.total_trips, 4);
        assert_eq!(analysis.total_duration, 15.0);
        assert_eq!(analysis.avg_duration, 3.75);
    }

    #[tokio::test]
    async fn test_negative_duration_is_zeroed() {
        let (analysis, _) = analyze(&[trip("-5", "classic", "")]).await;
        assert_eq!(analysis.total_duration, 0.0);
    }

    #[tokio::test]
    async fn test_weekly_breakdown_skips_unparseable_dates() {
        let (analysis, _) = analyze(&[
            trip("10", "classic", "2024-01-01 08:00:00"),
            trip("10", "classic", "2024-01-02 08:00:00"),
            trip("10", "classic", "2024-01-09 08:00:00"),
            trip("10", "classic", "not a date"),
        ])
        .await;

        assert_eq!(analysis.weekly.len(), 2);
        assert_eq!(analysis.weekly[0].trips, 2);
        assert_eq!(analysis.weekly[0].minutes, 20.0);
        assert_eq!(analysis.weekly[1].trips, 1);
    }

    #[tokio::test]
    async fn test_duration_histogram_covers_all_buckets() {
        let (analysis, _) = analyze(&[
            trip("5", "classic", ""),
            trip("12", "classic", ""),
            trip("45", "classic", ""),
            trip("90", "classic", ""),
        ])
        .await;

        let counts: Vec<(String, u64)> = analysis
            .duration_histogram
            .iter()
            .map(|b| (b.label.clone(), b.trips))
            .collect();
        assert_eq!(
            counts,
            vec![
                ("0-10".to_string(), 1),
                ("10-20".to_string(), 1),
                ("20-30".to_string(), 0),
                ("30-45".to_string(), 0),
                ("45-60".to_string(), 1),
                ("60+".to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_vehicle_aliases_classified() {
        let (analysis, _) = analyze(&[
            trip("10", "electric_bike", ""),
            trip("10", "Pedal-Assist", ""),
            trip("10", "classic_bike", ""),
            trip("10", "docked_bike", ""),
        ])
        .await;

        assert_eq!(analysis.ebike_trips, 2);
        assert_eq!(analysis.classic_trips, 2);
    }

    #[tokio::test]
    async fn test_missing_vehicle_column_counts_classic() {
        let rows: Vec<TripRow> = vec![[("duration".to_string(), "10".to_string())]
            .into_iter()
            .collect()];
        let (analysis, _) = analyze(&rows).await;

        assert_eq!(analysis.ebike_trips, 0);
        assert_eq!(analysis.classic_trips, 1);
        assert!(analysis.weekly.is_empty());
    }

    #[tokio::test]
    async fn test_queries_recorded_as_actions() {
        let (_, log) = analyze(&[trip("10", "classic", "2024-01-01 08:00:00")]).await;

        assert_eq!(log.len(), 4);
        assert!(log.steps().iter().all(|s| s.kind == StepKind::Action));
        let first = log.steps()[0].tool_args.as_ref().unwrap();
        assert_eq!(first["tool"], "trip_query");
        assert!(first["sql"].as_str().unwrap().starts_with("SELECT"));
    }
}
