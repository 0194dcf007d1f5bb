//! The daily income record and the run key that scopes it.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const RUN_KEY_FORMAT: &str = "%Y-%m-%d";

/// Logical key of one engine run: the registration date being computed
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct RunKey(NaiveDate);

impl RunKey {
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(RUN_KEY_FORMAT))
    }
}

impl FromStr for RunKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), RUN_KEY_FORMAT).map(RunKey)
    }
}

impl From<NaiveDate> for RunKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

/// Identity of a record in the consolidated store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub run_key: RunKey,
    pub client_id: String,
    pub product_code: String,
}

/// One computed daily income row
///
/// Produced by the income source into a shard's staging area, promoted into the
/// shard destination, and finally copied into the consolidated store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StagedRecord {
    #[sqlx(rename = "client_no")]
    pub client_id: String,
    #[sqlx(rename = "asset_acc")]
    pub account_id: String,
    #[sqlx(rename = "ta_client")]
    pub counterparty_id: String,
    #[sqlx(rename = "prd_code")]
    pub product_code: String,
    #[sqlx(rename = "real_prd_code")]
    pub real_product_code: String,
    #[sqlx(rename = "reg_date")]
    pub run_key: RunKey,
    #[sqlx(rename = "allot_amt")]
    pub allot_amount: BigDecimal,
    #[sqlx(rename = "redeem_amt")]
    pub redeem_amount: BigDecimal,
    #[sqlx(rename = "div_income")]
    pub dividend_income: BigDecimal,
    pub redeem_income: BigDecimal,
    #[sqlx(rename = "force_add_amt")]
    pub force_add_amount: BigDecimal,
    #[sqlx(rename = "create_time")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "update_time")]
    pub updated_at: DateTime<Utc>,
}

impl StagedRecord {
    /// A record with zero amounts, stamped with the current time
    pub fn new(
        client_id: impl Into<String>,
        product_code: impl Into<String>,
        run_key: RunKey,
    ) -> Self {
        let client_id = client_id.into();
        let product_code = product_code.into();
        let now = Utc::now();
        Self {
            account_id: format!("ACC-{client_id}"),
            counterparty_id: client_id.clone(),
            real_product_code: product_code.clone(),
            client_id,
            product_code,
            run_key,
            allot_amount: BigDecimal::from(0),
            redeem_amount: BigDecimal::from(0),
            dividend_income: BigDecimal::from(0),
            redeem_income: BigDecimal::from(0),
            force_add_amount: BigDecimal::from(0),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            run_key: self.run_key,
            client_id: self.client_id.clone(),
            product_code: self.product_code.clone(),
        }
    }

    /// Net income booked for the day
    pub fn net_income(&self) -> BigDecimal {
        &self.dividend_income + &self.redeem_income
    }
}
