//! Domain mutations and their translation into wire operations.
//!
//! Each [`Operation`] variant carries only the fields its mutation needs.
//! [`build_wire_operations`] is the stock builder used by dispatch; callers
//! may pass any other [`OperationBuilder`] instead.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::storage::operation_log::LogRecord;

/// A queued operation as read back from an operation log.
pub type OperationRecord = LogRecord<Operation>;

// ─────────────────────────────────────────────────────────────────────────────
// Domain Operations
// ─────────────────────────────────────────────────────────────────────────────

/// One queued mutation. Monetary amounts are in account currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Change the max CPC of a keyword, or of the ad group when `keyword_id` is absent.
    BidChange {
        campaign_id: i64,
        adgroup_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        keyword_id: Option<i64>,
        old_bid: f64,
        new_bid: f64,
    },
    /// Replace a keyword's text: the old criterion is paused and a new one added.
    KeywordText {
        adgroup_id: i64,
        keyword_id: i64,
        new_text: String,
        match_type: String,
        status: String,
        cpc_bid: f64,
    },
    /// Move a campaign onto a freshly created budget.
    BudgetChange { campaign_id: i64, amount: f64 },
    AdGroupLabel { adgroup_id: i64, label_id: i64 },
    AdGroupName { adgroup_id: i64, name: String },
    KeywordStatus {
        adgroup_id: i64,
        keyword_id: i64,
        old_status: String,
        new_status: String,
    },
}

impl Operation {
    /// Smallest identifier carried by the operation. Callers may queue
    /// negative temporary ids; dispatch allocates new ones below this value.
    pub fn min_id(&self) -> i64 {
        match self {
            Operation::BidChange {
                campaign_id,
                adgroup_id,
                keyword_id,
                ..
            } => {
                let base = (*campaign_id).min(*adgroup_id);
                keyword_id.map_or(base, |k| base.min(k))
            }
            Operation::KeywordText {
                adgroup_id,
                keyword_id,
                ..
            }
            | Operation::KeywordStatus {
                adgroup_id,
                keyword_id,
                ..
            } => (*adgroup_id).min(*keyword_id),
            Operation::BudgetChange { campaign_id, .. } => *campaign_id,
            Operation::AdGroupLabel {
                adgroup_id,
                label_id,
            } => (*adgroup_id).min(*label_id),
            Operation::AdGroupName { adgroup_id, .. } => *adgroup_id,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    Add,
    Set,
    Remove,
}

/// One operation in the shape the remote batch service accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOperation {
    pub operation_type: String,
    pub operator: Operator,
    pub operand: Value,
}

impl WireOperation {
    fn new(operation_type: &str, operator: Operator, operand: Value) -> Self {
        Self {
            operation_type: operation_type.to_string(),
            operator,
            operand,
        }
    }
}

/// Allocates temporary (negative) ids for objects created within one dispatch run.
#[derive(Debug, Clone)]
pub struct TemporaryIds {
    next: i64,
}

impl TemporaryIds {
    /// Ids are handed out strictly below `min(floor, 0)`.
    pub fn below(floor: i64) -> Self {
        Self {
            next: floor.min(0) - 1,
        }
    }

    pub fn next_id(&mut self) -> i64 {
        let id = self.next;
        self.next -= 1;
        id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder Seam
// ─────────────────────────────────────────────────────────────────────────────

/// Translates one queued record into zero or more wire operations.
pub trait OperationBuilder<P>: Send + Sync {
    fn build(
        &self,
        record: &LogRecord<P>,
        ids: &mut TemporaryIds,
    ) -> Result<Vec<WireOperation>, AppError>;
}

impl<P, F> OperationBuilder<P> for F
where
    F: Fn(&LogRecord<P>, &mut TemporaryIds) -> Result<Vec<WireOperation>, AppError> + Send + Sync,
{
    fn build(
        &self,
        record: &LogRecord<P>,
        ids: &mut TemporaryIds,
    ) -> Result<Vec<WireOperation>, AppError> {
        self(record, ids)
    }
}

/// Stock builder covering every [`Operation`] variant.
pub fn build_wire_operations(
    record: &OperationRecord,
    ids: &mut TemporaryIds,
) -> Result<Vec<WireOperation>, AppError> {
    let invalid = |message: String| AppError::InvalidOperation {
        record_id: record.id,
        message,
    };

    match &record.payload {
        Operation::BidChange {
            campaign_id,
            adgroup_id,
            keyword_id,
            old_bid,
            new_bid,
        } => {
            let old_micros = to_micros(*old_bid);
            let new_micros = to_micros(*new_bid);
            if new_micros < 0 {
                return Err(invalid(format!("negative bid {new_bid}")));
            }
            if old_micros == new_micros {
                return Ok(Vec::new());
            }

            let op = match keyword_id {
                Some(keyword_id) if *keyword_id > -1 => WireOperation::new(
                    "AdGroupCriterionOperation",
                    Operator::Set,
                    json!({
                        "xsi_type": "BiddableAdGroupCriterion",
                        "adGroupId": adgroup_id,
                        "criterion": { "id": keyword_id },
                        "biddingStrategyConfiguration": cpc_bid(new_micros),
                    }),
                ),
                _ => WireOperation::new(
                    "AdGroupOperation",
                    Operator::Set,
                    json!({
                        "id": adgroup_id,
                        "campaignId": campaign_id,
                        "biddingStrategyConfiguration": cpc_bid(new_micros),
                    }),
                ),
            };
            Ok(vec![op])
        }

        Operation::KeywordText {
            adgroup_id,
            keyword_id,
            new_text,
            match_type,
            status,
            cpc_bid: bid,
        } => {
            if new_text.trim().is_empty() {
                return Err(invalid("empty keyword text".into()));
            }
            let micros = to_micros(*bid);
            if micros < 0 {
                return Err(invalid(format!("negative bid {bid}")));
            }

            Ok(vec![
                WireOperation::new(
                    "AdGroupCriterionOperation",
                    Operator::Set,
                    json!({
                        "xsi_type": "BiddableAdGroupCriterion",
                        "adGroupId": adgroup_id,
                        "criterion": { "xsi_type": "Keyword", "id": keyword_id },
                        "userStatus": "PAUSED",
                    }),
                ),
                WireOperation::new(
                    "AdGroupCriterionOperation",
                    Operator::Add,
                    json!({
                        "xsi_type": "BiddableAdGroupCriterion",
                        "adGroupId": adgroup_id,
                        "criterion": {
                            "xsi_type": "Keyword",
                            "text": new_text,
                            "matchType": match_type.to_uppercase(),
                        },
                        "userStatus": status.to_uppercase(),
                        "biddingStrategyConfiguration": cpc_bid(micros),
                    }),
                ),
            ])
        }

        Operation::BudgetChange {
            campaign_id,
            amount,
        } => {
            let micros = to_micros(*amount);
            if micros <= 0 {
                return Err(invalid(format!("budget amount must be positive, got {amount}")));
            }
            let budget_id = ids.next_id();

            Ok(vec![
                WireOperation::new(
                    "BudgetOperation",
                    Operator::Add,
                    json!({
                        "budgetId": budget_id,
                        "name": format!("#{campaign_id} budget {budget_id}"),
                        "amount": money(micros),
                        "deliveryMethod": "STANDARD",
                        "isExplicitlyShared": false,
                    }),
                ),
                WireOperation::new(
                    "CampaignOperation",
                    Operator::Set,
                    json!({
                        "id": campaign_id,
                        "budget": { "budgetId": budget_id },
                    }),
                ),
            ])
        }

        Operation::AdGroupLabel {
            adgroup_id,
            label_id,
        } => Ok(vec![WireOperation::new(
            "AdGroupLabelOperation",
            Operator::Add,
            json!({ "adGroupId": adgroup_id, "labelId": label_id }),
        )]),

        Operation::AdGroupName { adgroup_id, name } => {
            if name.trim().is_empty() {
                return Err(invalid("empty ad group name".into()));
            }
            Ok(vec![WireOperation::new(
                "AdGroupOperation",
                Operator::Set,
                json!({ "id": adgroup_id, "name": name }),
            )])
        }

        Operation::KeywordStatus {
            adgroup_id,
            keyword_id,
            old_status,
            new_status,
        } => {
            if old_status.eq_ignore_ascii_case(new_status) {
                return Ok(Vec::new());
            }
            Ok(vec![WireOperation::new(
                "AdGroupCriterionOperation",
                Operator::Set,
                json!({
                    "xsi_type": "BiddableAdGroupCriterion",
                    "adGroupId": adgroup_id,
                    "criterion": { "xsi_type": "Keyword", "id": keyword_id },
                    "userStatus": new_status.to_uppercase(),
                }),
            )])
        }
    }
}

/// Currency amount to micros, rounded to whole cents.
pub fn to_micros(amount: f64) -> i64 {
    (amount * 100.0).round() as i64 * 10_000
}

fn money(micros: i64) -> Value {
    json!({ "xsi_type": "Money", "microAmount": micros })
}

fn cpc_bid(micros: i64) -> Value {
    json!({
        "xsi_type": "BiddingStrategyConfiguration",
        "bids": [{ "xsi_type": "CpcBid", "bid": money(micros) }],
    })
}
