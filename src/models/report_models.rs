use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Upper bound on rows returned by one attribution query.
pub const MAX_ATTRIBUTION_ROWS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl DateRange {
    pub fn is_valid(&self) -> bool {
        self.start_date <= self.end_date
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelDefinition {
    pub name: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionQuery {
    pub data_source: String,
    #[serde(flatten)]
    pub date_range: DateRange,
    #[serde(default)]
    pub media_sources: Vec<String>,
    #[serde(default)]
    pub ad_sequences: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub funnels: Vec<FunnelDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl AttributionQuery {
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(MAX_ATTRIBUTION_ROWS).clamp(1, MAX_ATTRIBUTION_ROWS)
    }

    /// Every event the query needs counted: the selected ones plus all funnel steps.
    pub fn counted_events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.clone();
        for funnel in &self.funnels {
            for step in &funnel.steps {
                if !names.contains(step) {
                    names.push(step.clone());
                }
            }
        }
        names
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionRow {
    pub date: NaiveDate,
    pub data_source: String,
    pub media_source: String,
    pub ad_sequence: String,
    pub events: BTreeMap<String, i64>,
    pub revenue: f64,
    pub funnels: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionOptions {
    pub media_sources: Vec<String>,
    pub ad_sequences: Vec<String>,
    pub event_names: Vec<String>,
}

/// Share of the first funnel step that reached the last one. Zero when nobody entered.
pub fn funnel_conversion(events: &BTreeMap<String, i64>, funnel: &FunnelDefinition) -> f64 {
    let (Some(first), Some(last)) = (funnel.steps.first(), funnel.steps.last()) else {
        return 0.0;
    };
    let entered = events.get(first).copied().unwrap_or(0);
    if entered <= 0 {
        return 0.0;
    }
    events.get(last).copied().unwrap_or(0) as f64 / entered as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    InternalTransfer,
    Page,
    PostLoan,
    Rating,
}

impl ReportKind {
    pub const ALL: [ReportKind; 4] = [
        ReportKind::InternalTransfer,
        ReportKind::Page,
        ReportKind::PostLoan,
        ReportKind::Rating,
    ];

    /// Value stored in `report_metrics.report`.
    pub fn table_key(&self) -> &'static str {
        match self {
            ReportKind::InternalTransfer => "internal_transfer",
            ReportKind::Page => "page",
            ReportKind::PostLoan => "post_loan",
            ReportKind::Rating => "rating",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            ReportKind::InternalTransfer => "internal-transfer",
            ReportKind::Page => "page",
            ReportKind::PostLoan => "post-loan",
            ReportKind::Rating => "rating",
        }
    }

    pub fn dimension_label(&self) -> &'static str {
        match self {
            ReportKind::InternalTransfer => "Channel",
            ReportKind::Page => "Page",
            ReportKind::PostLoan => "Product",
            ReportKind::Rating => "Store",
        }
    }

    /// Metric columns, in export order.
    pub fn metrics(&self) -> &'static [&'static str] {
        match self {
            ReportKind::InternalTransfer => &["transfer_count", "transfer_amount", "success_count"],
            ReportKind::Page => &["pv", "uv", "avg_stay_seconds"],
            ReportKind::PostLoan => &["due_count", "repaid_count", "overdue_count", "repaid_amount"],
            ReportKind::Rating => &["rating_count", "avg_rating", "one_star", "five_star"],
        }
    }

    /// `avg_*` metrics average across rows, everything else sums.
    pub fn is_averaged(metric: &str) -> bool {
        metric.starts_with("avg_")
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportKind::ALL
            .into_iter()
            .find(|kind| kind.slug() == s || kind.table_key() == s)
            .ok_or_else(|| format!("unknown report '{}'", s))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricReportQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub dimension: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRow {
    pub stat_date: NaiveDate,
    pub dimension: String,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteEntry {
    pub value: String,
    /// Milliseconds since the Unix epoch.
    pub favorited_at: i64,
}

/// Media source → favorited ad sequences.
pub type FavoritesMap = BTreeMap<String, Vec<FavoriteEntry>>;
