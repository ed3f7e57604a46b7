use crate::models::db_operations::{like_pattern, timestamp, SqlFilter, SqlUpdate};
use crate::models::partner_models::{ApiPartnerConfig, ApiPartnerConfigInput, PartnerDetails};
use rusqlite::types::ToSql;
use rusqlite::{Connection, Error as RusqliteError, OptionalExtension, Row};

#[derive(Debug, Default, Clone)]
pub struct PartnerFilter {
    pub search: Option<String>,
    pub app_id: Option<i64>,
    pub is_active: Option<bool>,
}

fn map_partner(row: &Row) -> rusqlite::Result<ApiPartnerConfig> {
    Ok(ApiPartnerConfig {
        id: row.get("id")?,
        app_id: row.get("app_id")?,
        partner_api: row.get("partner_api")?,
        secret_key: row.get("secret_key")?,
        is_active: row.get("is_active")?,
        details: PartnerDetails::from_row(row)?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Blank optional strings are stored as NULL.
fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn list_partners(
    conn: &Connection,
    filter: &PartnerFilter,
    limit: u32,
    offset: u32,
) -> Result<(Vec<ApiPartnerConfig>, i64), RusqliteError> {
    let mut sql_filter = SqlFilter::new();
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        sql_filter.push_repeated("(partner_name LIKE ? OR partner_api LIKE ?)", like_pattern(search), 2);
    }
    if let Some(app_id) = filter.app_id {
        sql_filter.push("app_id = ?", app_id);
    }
    if let Some(is_active) = filter.is_active {
        sql_filter.push("is_active = ?", is_active);
    }

    let total = sql_filter.count(conn, "api_partner_configs")?;
    let sql = format!(
        "SELECT * FROM api_partner_configs{} ORDER BY id DESC LIMIT ? OFFSET ?",
        sql_filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let partners = stmt
        .query_map(sql_filter.params_with(&[limit as i64, offset as i64]).as_slice(), map_partner)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((partners, total))
}

pub fn get_partner(conn: &Connection, partner_id: i64) -> Result<Option<ApiPartnerConfig>, RusqliteError> {
    conn.query_row("SELECT * FROM api_partner_configs WHERE id = ?1", [partner_id], map_partner)
        .optional()
}

/// `partner_api` and `secret_key` are expected to be validated by the caller.
pub fn create_partner(
    conn: &Connection,
    partner_api: &str,
    secret_key: &str,
    input: &ApiPartnerConfigInput,
) -> Result<i64, RusqliteError> {
    let now = timestamp();
    let details = input.details.provided();

    let mut columns = vec!["app_id", "partner_api", "secret_key", "is_active", "created_at", "updated_at"];
    let mut values: Vec<Box<dyn ToSql>> = vec![
        Box::new(input.app_id),
        Box::new(partner_api.trim().to_string()),
        Box::new(secret_key.trim().to_string()),
        Box::new(input.is_active.unwrap_or(true)),
        Box::new(now.clone()),
        Box::new(now),
    ];
    for (column, value) in details {
        columns.push(column);
        values.push(Box::new(non_blank(value)));
    }

    let sql = format!(
        "INSERT INTO api_partner_configs ({}) VALUES ({})",
        columns.join(", "),
        vec!["?"; columns.len()].join(", ")
    );
    let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
    conn.execute(&sql, params.as_slice())?;
    Ok(conn.last_insert_rowid())
}

/// Applies the provided fields. Returns 0 when the partner does not exist.
pub fn update_partner(
    conn: &Connection,
    partner_id: i64,
    input: &ApiPartnerConfigInput,
) -> Result<usize, RusqliteError> {
    let mut update = SqlUpdate::new("api_partner_configs");
    update
        .set_opt("app_id", input.app_id)
        .set_opt("partner_api", input.partner_api.as_deref().map(|s| s.trim().to_string()))
        .set_opt("secret_key", input.secret_key.as_deref().map(|s| s.trim().to_string()))
        .set_opt("is_active", input.is_active);
    for (column, value) in input.details.provided() {
        update.set(column, non_blank(value));
    }
    if !update.is_empty() {
        update.set("updated_at", timestamp());
    }
    update.execute(conn, partner_id)
}

pub fn delete_partner(conn: &Connection, partner_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM api_partner_configs WHERE id = ?1", [partner_id])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::db_setup::setup_database;

    fn db() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&mut conn).unwrap();
        conn
    }

    fn input(json: &str) -> ApiPartnerConfigInput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn create_stores_details_and_blanks_as_null() {
        let conn = db();
        let id = create_partner(
            &conn,
            " https://api.partner.example ",
            "s3cr3t",
            &input(r#"{"appId": 7, "partnerName": "Acme", "remark": "  "}"#),
        )
        .unwrap();
        let partner = get_partner(&conn, id).unwrap().unwrap();
        assert_eq!(partner.partner_api, "https://api.partner.example");
        assert_eq!(partner.app_id, Some(7));
        assert!(partner.is_active);
        assert_eq!(partner.details.partner_name.as_deref(), Some("Acme"));
        assert!(partner.details.remark.is_none());
    }

    #[test]
    fn update_touches_only_provided_fields() {
        let conn = db();
        let id = create_partner(&conn, "https://a", "k", &input(r#"{"partnerName": "Acme", "loginUrl": "https://a/login"}"#))
            .unwrap();
        update_partner(&conn, id, &input(r#"{"loginUrl": "", "isActive": false}"#)).unwrap();

        let partner = get_partner(&conn, id).unwrap().unwrap();
        assert!(!partner.is_active);
        assert!(partner.details.login_url.is_none());
        assert_eq!(partner.details.partner_name.as_deref(), Some("Acme"));
        assert_eq!(update_partner(&conn, id + 1, &input("{}")).unwrap(), 0);
    }

    #[test]
    fn list_filters_by_activity() {
        let conn = db();
        create_partner(&conn, "https://a", "k", &input(r#"{"isActive": false}"#)).unwrap();
        create_partner(&conn, "https://b", "k", &input("{}")).unwrap();
        let filter = PartnerFilter { is_active: Some(true), ..Default::default() };
        let (rows, total) = list_partners(&conn, &filter, 10, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].partner_api, "https://b");
    }
}
