use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeeStatus {
    Due,
    Partial,
    Paid,
    Waived,
}

impl FeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeStatus::Due => "due",
            FeeStatus::Partial => "partial",
            FeeStatus::Paid => "paid",
            FeeStatus::Waived => "waived",
        }
    }

    /// Status implied by the amounts on a non-waived fee.
    pub fn from_amounts(amount_cents: i64, paid_cents: i64) -> Self {
        if paid_cents <= 0 {
            FeeStatus::Due
        } else if paid_cents >= amount_cents {
            FeeStatus::Paid
        } else {
            FeeStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Fee {
    pub id: Uuid,
    pub student_id: Uuid,
    /// First day of the billed calendar month.
    pub fee_month: NaiveDate,
    pub amount_cents: i64,
    pub paid_cents: i64,
    pub status: String,
    pub due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fee {
    pub fn outstanding_cents(&self) -> i64 {
        (self.amount_cents - self.paid_cents).max(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateFeesRequest {
    /// Any date inside the first month to bill.
    pub from_month: NaiveDate,
    /// Any date inside the last month to bill (inclusive).
    pub to_month: NaiveDate,
    pub student_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct GenerationResult {
    pub created: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
pub struct FeeQuery {
    pub month: Option<NaiveDate>,
    pub status: Option<FeeStatus>,
    pub student_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Mobile,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Mobile => "mobile",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub amount_cents: i64,
    pub method: String,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
    pub received_by: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Portion of a payment applied to one fee.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct PaymentAllocation {
    pub payment_id: Uuid,
    pub fee_id: Uuid,
    pub amount_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct PaymentReceipt {
    #[serde(flatten)]
    pub payment: Payment,
    pub allocations: Vec<PaymentAllocation>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub student_id: Uuid,
    pub fee_id: Option<Uuid>,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub paid_on: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub student_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount_cents: i64,
    pub reason: Option<String>,
    pub refunded_on: NaiveDate,
    pub processed_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount_cents: i64,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_amounts() {
        assert_eq!(FeeStatus::from_amounts(5000, 0), FeeStatus::Due);
        assert_eq!(FeeStatus::from_amounts(5000, 1200), FeeStatus::Partial);
        assert_eq!(FeeStatus::from_amounts(5000, 5000), FeeStatus::Paid);
    }
}
