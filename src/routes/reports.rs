use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::attribution::favorites::normalize_favorites;
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::helper::csv_helpers::{attribution_table, csv_response, metric_table, write_csv};
use crate::helper::db_helpers::{with_conn, with_conn_timeout};
use crate::helper::response_helpers::{ok, paginated, PageRequest};
use crate::middleware::StaffUser;
use crate::models::db_operations::reports_db_operations;
use crate::models::report_models::{
    AttributionQuery, AttributionRow, FavoritesMap, MetricReportQuery, MetricRow, ReportKind,
};
use crate::DbPool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsQuery {
    data_source: Option<String>,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/reports/attribution/options", web::get().to(attribution_options))
        .route("/reports/attribution/query", web::post().to(attribution_query))
        .route("/reports/attribution/export", web::post().to(attribution_export))
        .route("/reports/{kind}", web::get().to(metric_report))
        .route("/reports/{kind}/export", web::get().to(metric_export))
        .route("/attribution/favorites", web::get().to(get_favorites))
        .route("/attribution/favorites", web::put().to(put_favorites));
}

fn check_attribution_query(query: &AttributionQuery) -> ApiResult<()> {
    if query.data_source.trim().is_empty() {
        return Err(ApiError::bad_request("dataSource is required."));
    }
    if !query.date_range.is_valid() {
        return Err(ApiError::bad_request("startDate must not be after endDate."));
    }
    Ok(())
}

fn parse_kind(kind: &str) -> ApiResult<ReportKind> {
    kind.parse().map_err(|_| ApiError::not_found("Report"))
}

fn check_metric_query(query: &MetricReportQuery) -> ApiResult<()> {
    if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
        if start > end {
            return Err(ApiError::bad_request("startDate must not be after endDate."));
        }
    }
    Ok(())
}

async fn attribution_options(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    query: web::Query<OptionsQuery>,
) -> ApiResult<HttpResponse> {
    let data_source = query.into_inner().data_source.filter(|s| !s.trim().is_empty());
    let options = with_conn(&pool, move |conn| {
        Ok(reports_db_operations::attribution_options(conn, data_source.as_deref())?)
    })
    .await?;
    Ok(ok(options))
}

async fn run_attribution(
    pool: &web::Data<DbPool>,
    config: &Config,
    query: AttributionQuery,
) -> ApiResult<Vec<AttributionRow>> {
    check_attribution_query(&query)?;
    with_conn_timeout(pool, config.slow_report_timeout(), "Attribution query", move |conn| {
        Ok(reports_db_operations::attribution_rows(conn, &query)?)
    })
    .await
}

async fn attribution_query(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    _staff: StaffUser,
    body: web::Json<AttributionQuery>,
) -> ApiResult<HttpResponse> {
    let rows = run_attribution(&pool, &config, body.into_inner()).await?;
    Ok(ok(rows))
}

async fn attribution_export(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    staff: StaffUser,
    body: web::Json<AttributionQuery>,
) -> ApiResult<HttpResponse> {
    let query = body.into_inner();
    let (events, funnels) = (query.events.clone(), query.funnels.clone());
    let filename = format!("attribution_{}_{}.csv", query.date_range.start_date, query.date_range.end_date);
    let rows = run_attribution(&pool, &config, query).await?;

    let (header, records) = attribution_table(&rows, &events, &funnels);
    let body = write_csv(&header, &records)?;
    log::info!("User '{}' exported {} attribution rows", staff.0.username, records.len());
    Ok(csv_response(&filename, body))
}

async fn load_metric_rows(
    pool: &web::Data<DbPool>,
    config: &Config,
    kind: ReportKind,
    query: MetricReportQuery,
) -> ApiResult<Vec<MetricRow>> {
    check_metric_query(&query)?;
    with_conn_timeout(pool, config.report_timeout(), "Report query", move |conn| {
        Ok(reports_db_operations::metric_rows(conn, kind, &query)?)
    })
    .await
}

async fn metric_report(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    _staff: StaffUser,
    path: web::Path<String>,
    query: web::Query<MetricReportQuery>,
) -> ApiResult<HttpResponse> {
    let kind = parse_kind(&path.into_inner())?;
    let query = query.into_inner();
    let page = PageRequest::new(query.page, query.page_size);
    let rows = load_metric_rows(&pool, &config, kind, query).await?;
    let total = rows.len() as i64;
    Ok(paginated(page.slice(&rows).to_vec(), page, total))
}

async fn metric_export(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    _staff: StaffUser,
    path: web::Path<String>,
    query: web::Query<MetricReportQuery>,
) -> ApiResult<HttpResponse> {
    let kind = parse_kind(&path.into_inner())?;
    let rows = load_metric_rows(&pool, &config, kind, query.into_inner()).await?;
    let (header, records) = metric_table(kind, &rows);
    let body = write_csv(&header, &records)?;
    Ok(csv_response(&format!("{}_report.csv", kind.slug()), body))
}

async fn get_favorites(pool: web::Data<DbPool>, staff: StaffUser) -> ApiResult<HttpResponse> {
    let user_id = staff.0.id;
    let favorites = with_conn(&pool, move |conn| Ok(reports_db_operations::get_favorites(conn, user_id)?)).await?;
    Ok(ok(favorites))
}

/// Replaces the caller's favorites with the normalized body.
async fn put_favorites(
    pool: web::Data<DbPool>,
    staff: StaffUser,
    body: web::Json<FavoritesMap>,
) -> ApiResult<HttpResponse> {
    let user_id = staff.0.id;
    let favorites = normalize_favorites(&body.into_inner());
    let stored = with_conn(&pool, move |conn| {
        reports_db_operations::replace_favorites(conn, user_id, &favorites)?;
        Ok(reports_db_operations::get_favorites(conn, user_id)?)
    })
    .await?;
    Ok(ok(stored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::report_models::DateRange;
    use chrono::NaiveDate;

    fn query(data_source: &str, start: u32, end: u32) -> AttributionQuery {
        AttributionQuery {
            data_source: data_source.into(),
            date_range: DateRange {
                start_date: NaiveDate::from_ymd_opt(2024, 5, start).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2024, 5, end).unwrap(),
            },
            media_sources: vec![],
            ad_sequences: vec![],
            events: vec![],
            funnels: vec![],
            limit: None,
        }
    }

    #[test]
    fn attribution_queries_need_source_and_ordered_dates() {
        assert!(check_attribution_query(&query("adjust", 1, 7)).is_ok());
        assert!(check_attribution_query(&query(" ", 1, 7)).is_err());
        assert!(check_attribution_query(&query("adjust", 8, 7)).is_err());
    }

    #[test]
    fn unknown_reports_are_not_found() {
        assert!(matches!(parse_kind("revenue"), Err(ApiError::NotFound(_))));
        assert_eq!(parse_kind("page").unwrap(), ReportKind::Page);
    }
}
