use std::collections::HashMap;

use serde_json::Value;

use crate::error::{AppError, AppResult};

/// Raw per-currency / per-channel payment totals for a reporting period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaymentTotals {
    pub usd_cash_total: f64,
    pub dop_cash_total: f64,
    pub usd_transfer_total: f64,
    pub dop_transfer_total: f64,
}

impl PaymentTotals {
    pub fn usd_total(&self) -> f64 {
        self.usd_cash_total + self.usd_transfer_total
    }

    pub fn dop_total(&self) -> f64 {
        self.dop_cash_total + self.dop_transfer_total
    }

    fn add(&mut self, currency: &str, method: &str, amount: f64) {
        if amount <= 0.0 || !amount.is_finite() {
            return;
        }
        match (currency, method) {
            ("USD", "cash") => self.usd_cash_total += amount,
            ("USD", "transfer") => self.usd_transfer_total += amount,
            ("DOP", "cash") => self.dop_cash_total += amount,
            ("DOP", "transfer") => self.dop_transfer_total += amount,
            _ => {}
        }
    }
}

/// Derived fee fields of a manager report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeBreakdown {
    pub fee_base_dop: f64,
    pub fee_dop: f64,
    pub fee_deducted_dop: f64,
    pub owners_leftover_dop: f64,
}

/// Aggregate payment rows into per-currency/per-channel totals. Rows with an
/// unknown currency or method are ignored.
pub fn aggregate_payment_totals(payments: &[Value]) -> PaymentTotals {
    let mut totals = PaymentTotals::default();
    for payment in payments {
        let currency = value_str(payment, "currency").to_ascii_uppercase();
        let method = value_str(payment, "method").to_ascii_lowercase();
        let amount = number_from_value(payment.get("amount"));
        totals.add(&currency, &method, amount);
    }
    totals
}

/// Aggregate payment rows per owner. Rows without an `owner_id` cannot be
/// attributed to a payout and are skipped.
pub fn aggregate_totals_by_owner(payments: &[Value]) -> HashMap<String, PaymentTotals> {
    let mut by_owner: HashMap<String, PaymentTotals> = HashMap::new();
    for payment in payments {
        let owner_id = value_str(payment, "owner_id");
        if owner_id.is_empty() {
            continue;
        }
        let currency = value_str(payment, "currency").to_ascii_uppercase();
        let method = value_str(payment, "method").to_ascii_lowercase();
        let amount = number_from_value(payment.get("amount"));
        by_owner
            .entry(owner_id)
            .or_default()
            .add(&currency, &method, amount);
    }
    by_owner
}

/// Compute the derived fee fields from period totals, an admin-supplied
/// average USD->DOP rate, and a fee percentage.
///
/// The deducted fee is capped by the DOP cash actually collected; the cap is
/// what guarantees `fee_deducted_dop <= dop_cash_total`.
pub fn compute_fee_breakdown(
    totals: &PaymentTotals,
    avg_rate: Option<f64>,
    fee_percent: f64,
) -> AppResult<FeeBreakdown> {
    if !fee_percent.is_finite() || fee_percent < 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Fee percent is invalid.".to_string(),
        ));
    }

    let usd_total = totals.usd_total();
    let dop_total = totals.dop_total();

    let usd_term = if usd_total > 0.0 {
        let rate = avg_rate
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .ok_or_else(|| {
                AppError::UnprocessableEntity(
                    "Average rate is required when USD payments exist.".to_string(),
                )
            })?;
        usd_total * rate
    } else {
        0.0
    };

    let fee_base_dop = usd_term + dop_total;
    let fee_dop = fee_base_dop * fee_percent / 100.0;
    let fee_deducted_dop = fee_dop.min(totals.dop_cash_total);
    let owners_leftover_dop = (totals.dop_cash_total - fee_deducted_dop).max(0.0);

    Ok(FeeBreakdown {
        fee_base_dop,
        fee_dop,
        fee_deducted_dop,
        owners_leftover_dop,
    })
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn number_from_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        aggregate_payment_totals, aggregate_totals_by_owner, compute_fee_breakdown, round2,
        PaymentTotals,
    };

    fn totals(usd_cash: f64, usd_transfer: f64, dop_cash: f64, dop_transfer: f64) -> PaymentTotals {
        PaymentTotals {
            usd_cash_total: usd_cash,
            usd_transfer_total: usd_transfer,
            dop_cash_total: dop_cash,
            dop_transfer_total: dop_transfer,
        }
    }

    #[test]
    fn caps_fee_deduction_by_dop_cash() {
        // usd_total=1000, dop_total=5000, dop_cash=3000, rate=58, fee=5%
        let breakdown =
            compute_fee_breakdown(&totals(0.0, 1000.0, 3000.0, 2000.0), Some(58.0), 5.0)
                .expect("valid inputs");
        assert_eq!(breakdown.fee_base_dop, 63000.0);
        assert_eq!(breakdown.fee_dop, 3150.0);
        assert_eq!(breakdown.fee_deducted_dop, 3000.0);
        assert_eq!(breakdown.owners_leftover_dop, 0.0);
    }

    #[test]
    fn computes_without_rate_when_no_usd() {
        let breakdown = compute_fee_breakdown(&totals(0.0, 0.0, 2000.0, 0.0), None, 10.0)
            .expect("no USD term needed");
        assert_eq!(breakdown.fee_base_dop, 2000.0);
        assert_eq!(breakdown.fee_dop, 200.0);
        assert_eq!(breakdown.fee_deducted_dop, 200.0);
        assert_eq!(breakdown.owners_leftover_dop, 1800.0);
    }

    #[test]
    fn rejects_missing_rate_with_usd() {
        let error = compute_fee_breakdown(&totals(500.0, 0.0, 0.0, 0.0), None, 5.0)
            .expect_err("rate is mandatory");
        assert!(error.to_string().contains("Average rate"));

        let error = compute_fee_breakdown(&totals(500.0, 0.0, 0.0, 0.0), Some(0.0), 5.0)
            .expect_err("non-positive rate rejected");
        assert!(error.to_string().contains("Average rate"));
    }

    #[test]
    fn rejects_invalid_fee_percent() {
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let error = compute_fee_breakdown(&totals(0.0, 0.0, 100.0, 0.0), None, bad)
                .expect_err("invalid fee percent");
            assert!(error.to_string().contains("Fee percent"));
        }
    }

    #[test]
    fn deduction_stays_within_cash_bounds() {
        for fee_percent in [0.0, 1.0, 5.0, 25.0, 100.0] {
            for dop_cash in [0.0, 10.0, 3000.0, 1_000_000.0] {
                let breakdown = compute_fee_breakdown(
                    &totals(120.0, 880.0, dop_cash, 4000.0),
                    Some(58.25),
                    fee_percent,
                )
                .expect("valid inputs");
                assert!(breakdown.fee_deducted_dop >= 0.0);
                assert!(breakdown.fee_deducted_dop <= dop_cash);
                assert_eq!(
                    breakdown.owners_leftover_dop,
                    dop_cash - breakdown.fee_deducted_dop
                );
            }
        }
    }

    #[test]
    fn aggregates_payment_rows_by_currency_and_method() {
        let payments = vec![
            json!({"currency": "USD", "method": "cash", "amount": 100.0}),
            json!({"currency": "usd", "method": "transfer", "amount": "250.50"}),
            json!({"currency": "DOP", "method": "cash", "amount": 5000}),
            json!({"currency": "DOP", "method": "transfer", "amount": 1200.0}),
            json!({"currency": "EUR", "method": "cash", "amount": 999.0}),
            json!({"currency": "DOP", "method": "card", "amount": 999.0}),
            json!({"currency": "DOP", "method": "cash", "amount": -50.0}),
        ];
        let totals = aggregate_payment_totals(&payments);
        assert_eq!(totals.usd_cash_total, 100.0);
        assert_eq!(totals.usd_transfer_total, 250.5);
        assert_eq!(totals.dop_cash_total, 5000.0);
        assert_eq!(totals.dop_transfer_total, 1200.0);
        assert_eq!(totals.usd_total(), 350.5);
        assert_eq!(totals.dop_total(), 6200.0);
    }

    #[test]
    fn groups_totals_per_owner_and_skips_unattributed() {
        let payments = vec![
            json!({"owner_id": "o-1", "currency": "DOP", "method": "cash", "amount": 100.0}),
            json!({"owner_id": "o-1", "currency": "USD", "method": "transfer", "amount": 40.0}),
            json!({"owner_id": "o-2", "currency": "DOP", "method": "transfer", "amount": 60.0}),
            json!({"currency": "DOP", "method": "cash", "amount": 999.0}),
        ];
        let by_owner = aggregate_totals_by_owner(&payments);
        assert_eq!(by_owner.len(), 2);
        assert_eq!(by_owner["o-1"].dop_cash_total, 100.0);
        assert_eq!(by_owner["o-1"].usd_transfer_total, 40.0);
        assert_eq!(by_owner["o-2"].dop_transfer_total, 60.0);
    }

    #[test]
    fn rounds_for_display() {
        assert_eq!(round2(3150.004), 3150.0);
        assert_eq!(round2(3150.006), 3150.01);
    }
}
