use crate::models::db_operations::SqlFilter;
use crate::models::report_models::{
    funnel_conversion, AttributionOptions, AttributionQuery, AttributionRow, FavoriteEntry, FavoritesMap,
    MetricReportQuery, MetricRow, ReportKind,
};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Error as RusqliteError};
use std::collections::{BTreeMap, HashSet};

fn parse_date(index: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| RusqliteError::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn distinct_values(conn: &Connection, column: &str, data_source: Option<&str>) -> Result<Vec<String>, RusqliteError> {
    let mut filter = SqlFilter::new();
    if let Some(source) = data_source.filter(|s| !s.is_empty()) {
        filter.push("data_source = ?", source.to_string());
    }
    let sql = format!(
        "SELECT DISTINCT {col} FROM attribution_events{} ORDER BY {col}",
        filter.where_sql(),
        col = column
    );
    let mut stmt = conn.prepare(&sql)?;
    let values = stmt
        .query_map(filter.params_with(&[]).as_slice(), |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(values)
}

/// Filter choices for the attribution page.
pub fn attribution_options(conn: &Connection, data_source: Option<&str>) -> Result<AttributionOptions, RusqliteError> {
    Ok(AttributionOptions {
        media_sources: distinct_values(conn, "media_source", data_source)?,
        ad_sequences: distinct_values(conn, "ad_sequence", data_source)?,
        event_names: distinct_values(conn, "event_name", data_source)?,
    })
}

/// Aggregates events per (date, media source, ad sequence), newest first, at most
/// `query.effective_limit()` rows. Revenue covers every event of the group.
pub fn attribution_rows(conn: &Connection, query: &AttributionQuery) -> Result<Vec<AttributionRow>, RusqliteError> {
    let mut filter = SqlFilter::new();
    filter.push("data_source = ?", query.data_source.clone());
    filter.push("event_date >= ?", query.date_range.start_date.to_string());
    filter.push("event_date <= ?", query.date_range.end_date.to_string());
    filter.push_in("media_source", &query.media_sources);
    filter.push_in("ad_sequence", &query.ad_sequences);

    let sql = format!(
        "SELECT event_date, media_source, ad_sequence, event_name, SUM(event_count), SUM(revenue)
         FROM attribution_events{}
         GROUP BY event_date, media_source, ad_sequence, event_name
         ORDER BY event_date DESC, media_source, ad_sequence, event_name",
        filter.where_sql()
    );

    let counted = query.counted_events();
    let keep: HashSet<&str> = counted.iter().map(String::as_str).collect();
    let limit = query.effective_limit() as usize;

    let mut stmt = conn.prepare(&sql)?;
    let mut rows_iter = stmt.query(filter.params_with(&[]).as_slice())?;
    let mut rows: Vec<AttributionRow> = Vec::new();

    while let Some(row) = rows_iter.next()? {
        let raw_date: String = row.get(0)?;
        let media_source: String = row.get(1)?;
        let ad_sequence: String = row.get(2)?;
        let event_name: String = row.get(3)?;
        let count: i64 = row.get(4)?;
        let revenue: f64 = row.get(5)?;
        let date = parse_date(0, &raw_date)?;

        let same_group = rows
            .last()
            .map(|last| last.date == date && last.media_source == media_source && last.ad_sequence == ad_sequence)
            .unwrap_or(false);
        if !same_group {
            if rows.len() == limit {
                break;
            }
            rows.push(AttributionRow {
                date,
                data_source: query.data_source.clone(),
                media_source,
                ad_sequence,
                events: counted.iter().map(|name| (name.clone(), 0)).collect(),
                revenue: 0.0,
                funnels: BTreeMap::new(),
            });
        }

        if let Some(current) = rows.last_mut() {
            current.revenue += revenue;
            if keep.is_empty() || keep.contains(event_name.as_str()) {
                *current.events.entry(event_name).or_insert(0) += count;
            }
        }
    }

    for row in rows.iter_mut() {
        for funnel in &query.funnels {
            row.funnels.insert(funnel.name.clone(), funnel_conversion(&row.events, funnel));
        }
    }
    Ok(rows)
}

/// Every (date, dimension) row of a metric report, newest first. `avg_*` metrics are
/// averaged, the rest summed. Metrics without data read as 0.
pub fn metric_rows(conn: &Connection, kind: ReportKind, query: &MetricReportQuery) -> Result<Vec<MetricRow>, RusqliteError> {
    let mut filter = SqlFilter::new();
    filter.push("report = ?", kind.table_key());
    if let Some(start) = query.start_date {
        filter.push("stat_date >= ?", start.to_string());
    }
    if let Some(end) = query.end_date {
        filter.push("stat_date <= ?", end.to_string());
    }
    if let Some(dimension) = query.dimension.as_deref().filter(|d| !d.trim().is_empty()) {
        filter.push("dimension = ?", dimension.trim().to_string());
    }

    let sql = format!(
        "SELECT stat_date, dimension, metric, SUM(value), AVG(value)
         FROM report_metrics{}
         GROUP BY stat_date, dimension, metric
         ORDER BY stat_date DESC, dimension",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut result = stmt.query(filter.params_with(&[]).as_slice())?;
    let mut rows: Vec<MetricRow> = Vec::new();

    while let Some(row) = result.next()? {
        let raw_date: String = row.get(0)?;
        let dimension: String = row.get(1)?;
        let metric: String = row.get(2)?;
        let value: f64 = if ReportKind::is_averaged(&metric) { row.get(4)? } else { row.get(3)? };
        let stat_date = parse_date(0, &raw_date)?;

        let same_group = rows
            .last()
            .map(|last| last.stat_date == stat_date && last.dimension == dimension)
            .unwrap_or(false);
        if !same_group {
            rows.push(MetricRow {
                stat_date,
                dimension,
                metrics: kind.metrics().iter().map(|m| (m.to_string(), 0.0)).collect(),
            });
        }
        if let Some(current) = rows.last_mut() {
            current.metrics.insert(metric, value);
        }
    }
    Ok(rows)
}

// --- Favorites ---

/// Favorites of one user, newest first within each media source.
pub fn get_favorites(conn: &Connection, user_id: i64) -> Result<FavoritesMap, RusqliteError> {
    let mut stmt = conn.prepare(
        "SELECT media_source, value, favorited_at FROM attribution_favorites
         WHERE user_id = ?1 ORDER BY media_source, favorited_at DESC, value",
    )?;
    let mut favorites = FavoritesMap::new();
    let rows = stmt.query_map([user_id], |row| {
        Ok((row.get::<_, String>(0)?, FavoriteEntry { value: row.get(1)?, favorited_at: row.get(2)? }))
    })?;
    for row in rows {
        let (media_source, entry) = row?;
        favorites.entry(media_source).or_default().push(entry);
    }
    Ok(favorites)
}

/// Replaces every favorite of the user. Expects an already normalized map.
pub fn replace_favorites(conn: &mut Connection, user_id: i64, favorites: &FavoritesMap) -> Result<usize, RusqliteError> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM attribution_favorites WHERE user_id = ?1", [user_id])?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO attribution_favorites (user_id, media_source, value, favorited_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (media_source, entries) in favorites {
            for entry in entries {
                inserted += stmt.execute(params![user_id, media_source, entry.value, entry.favorited_at])?;
            }
        }
    }
    tx.commit()?;
    Ok(inserted)
}
