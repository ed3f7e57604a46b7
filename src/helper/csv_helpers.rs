use actix_web::http::header;
use actix_web::HttpResponse;

use crate::models::report_models::{AttributionRow, FunnelDefinition, MetricRow, ReportKind};

/// Writes a header and rows as RFC 4180 CSV. Fields with commas, quotes or newlines are quoted.
pub fn write_csv(header: &[String], rows: &[Vec<String>]) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.4}", value)
    }
}

/// Columns: date, data source, media source, ad sequence, one per event, revenue, one per funnel.
pub fn attribution_table(
    rows: &[AttributionRow],
    events: &[String],
    funnels: &[FunnelDefinition],
) -> (Vec<String>, Vec<Vec<String>>) {
    let mut header: Vec<String> = ["Date", "Data Source", "Media Source", "Ad Sequence"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(events.iter().cloned());
    header.push("Revenue".to_string());
    header.extend(funnels.iter().map(|f| format!("{} (%)", f.name)));

    let body = rows
        .iter()
        .map(|row| {
            let mut record = vec![
                row.date.to_string(),
                row.data_source.clone(),
                row.media_source.clone(),
                row.ad_sequence.clone(),
            ];
            record.extend(events.iter().map(|e| row.events.get(e).copied().unwrap_or(0).to_string()));
            record.push(format!("{:.2}", row.revenue));
            record.extend(funnels.iter().map(|f| {
                let rate = row.funnels.get(&f.name).copied().unwrap_or(0.0);
                format!("{:.2}", rate * 100.0)
            }));
            record
        })
        .collect();
    (header, body)
}

pub fn metric_table(kind: ReportKind, rows: &[MetricRow]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut header = vec!["Date".to_string(), kind.dimension_label().to_string()];
    header.extend(kind.metrics().iter().map(|m| m.to_string()));

    let body = rows
        .iter()
        .map(|row| {
            let mut record = vec![row.stat_date.to_string(), row.dimension.clone()];
            record.extend(
                kind.metrics()
                    .iter()
                    .map(|m| format_number(row.metrics.get(*m).copied().unwrap_or(0.0))),
            );
            record
        })
        .collect();
    (header, body)
}

pub fn csv_response(filename: &str, body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ))
        .body(body)
}
