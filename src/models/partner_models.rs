use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Optional text columns of `api_partner_configs`, in the order `PartnerDetails::values` yields them.
pub const PARTNER_TEXT_COLUMNS: [&str; 28] = [
    "partner_name",
    "partner_logo",
    "contact_name",
    "contact_phone",
    "environment",
    "callback_url",
    "notify_url",
    "register_url",
    "login_url",
    "check_user_url",
    "user_info_url",
    "apply_url",
    "order_status_url",
    "loan_detail_url",
    "credit_limit_url",
    "withdraw_url",
    "calculate_url",
    "repay_url",
    "repay_plan_url",
    "contract_url",
    "bind_card_url",
    "card_list_url",
    "product_info_url",
    "push_url",
    "public_key",
    "private_key",
    "aes_key",
    "remark",
];

/// Everything about a partner integration that is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartnerDetails {
    pub partner_name: Option<String>,
    pub partner_logo: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub environment: Option<String>,
    pub callback_url: Option<String>,
    pub notify_url: Option<String>,
    pub register_url: Option<String>,
    pub login_url: Option<String>,
    pub check_user_url: Option<String>,
    pub user_info_url: Option<String>,
    pub apply_url: Option<String>,
    pub order_status_url: Option<String>,
    pub loan_detail_url: Option<String>,
    pub credit_limit_url: Option<String>,
    pub withdraw_url: Option<String>,
    pub calculate_url: Option<String>,
    pub repay_url: Option<String>,
    pub repay_plan_url: Option<String>,
    pub contract_url: Option<String>,
    pub bind_card_url: Option<String>,
    pub card_list_url: Option<String>,
    pub product_info_url: Option<String>,
    pub push_url: Option<String>,
    pub public_key: Option<String>,
    pub private_key: Option<String>,
    pub aes_key: Option<String>,
    pub remark: Option<String>,
}

impl PartnerDetails {
    pub fn values(&self) -> [Option<&str>; 28] {
        [
            self.partner_name.as_deref(),
            self.partner_logo.as_deref(),
            self.contact_name.as_deref(),
            self.contact_phone.as_deref(),
            self.environment.as_deref(),
            self.callback_url.as_deref(),
            self.notify_url.as_deref(),
            self.register_url.as_deref(),
            self.login_url.as_deref(),
            self.check_user_url.as_deref(),
            self.user_info_url.as_deref(),
            self.apply_url.as_deref(),
            self.order_status_url.as_deref(),
            self.loan_detail_url.as_deref(),
            self.credit_limit_url.as_deref(),
            self.withdraw_url.as_deref(),
            self.calculate_url.as_deref(),
            self.repay_url.as_deref(),
            self.repay_plan_url.as_deref(),
            self.contract_url.as_deref(),
            self.bind_card_url.as_deref(),
            self.card_list_url.as_deref(),
            self.product_info_url.as_deref(),
            self.push_url.as_deref(),
            self.public_key.as_deref(),
            self.private_key.as_deref(),
            self.aes_key.as_deref(),
            self.remark.as_deref(),
        ]
    }

    /// Pairs each column with the value provided for it, skipping absent fields.
    pub fn provided(&self) -> Vec<(&'static str, &str)> {
        PARTNER_TEXT_COLUMNS
            .iter()
            .zip(self.values())
            .filter_map(|(column, value)| value.map(|v| (*column, v)))
            .collect()
    }

    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PartnerDetails {
            partner_name: row.get("partner_name")?,
            partner_logo: row.get("partner_logo")?,
            contact_name: row.get("contact_name")?,
            contact_phone: row.get("contact_phone")?,
            environment: row.get("environment")?,
            callback_url: row.get("callback_url")?,
            notify_url: row.get("notify_url")?,
            register_url: row.get("register_url")?,
            login_url: row.get("login_url")?,
            check_user_url: row.get("check_user_url")?,
            user_info_url: row.get("user_info_url")?,
            apply_url: row.get("apply_url")?,
            order_status_url: row.get("order_status_url")?,
            loan_detail_url: row.get("loan_detail_url")?,
            credit_limit_url: row.get("credit_limit_url")?,
            withdraw_url: row.get("withdraw_url")?,
            calculate_url: row.get("calculate_url")?,
            repay_url: row.get("repay_url")?,
            repay_plan_url: row.get("repay_plan_url")?,
            contract_url: row.get("contract_url")?,
            bind_card_url: row.get("bind_card_url")?,
            card_list_url: row.get("card_list_url")?,
            product_info_url: row.get("product_info_url")?,
            push_url: row.get("push_url")?,
            public_key: row.get("public_key")?,
            private_key: row.get("private_key")?,
            aes_key: row.get("aes_key")?,
            remark: row.get("remark")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPartnerConfig {
    pub id: i64,
    pub app_id: Option<i64>,
    pub partner_api: String,
    pub secret_key: String,
    pub is_active: bool,
    #[serde(flatten)]
    pub details: PartnerDetails,
    pub created_at: String,
    pub updated_at: String,
}

/// Body of create and update calls. On update only the provided fields change and an
/// empty string clears an optional field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPartnerConfigInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_api: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub details: PartnerDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provided_lists_only_present_fields() {
        let details = PartnerDetails {
            login_url: Some("https://partner.example/login".into()),
            remark: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(
            details.provided(),
            vec![("login_url", "https://partner.example/login"), ("remark", "")]
        );
    }

    #[test]
    fn input_flattens_details_from_camel_case() {
        let input: ApiPartnerConfigInput = serde_json::from_str(
            r#"{"partnerApi": "https://api.partner.example", "secretKey": "s3cr3t", "repayPlanUrl": "https://p/plan"}"#,
        )
        .unwrap();
        assert_eq!(input.partner_api.as_deref(), Some("https://api.partner.example"));
        assert_eq!(input.details.repay_plan_url.as_deref(), Some("https://p/plan"));
        assert!(input.details.partner_name.is_none());
    }
}
