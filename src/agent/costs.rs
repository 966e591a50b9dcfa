//! Cost model: pay-per-use vs membership totals, break-even and decision.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{ResolvedPricing, StepLog, TripAnalysis};
use crate::error::{AppError, AppResult};
use crate::tools::evaluate;

/// Units attached to every money computation.
pub const CURRENCY_UNITS: &str = "USD";

/// Per-component pay-per-use charges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentCosts {
    pub unlock_fees: f64,
    pub time_charges: f64,
    pub ebike_surcharges: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayPerUseCost {
    pub total: f64,
    pub per_trip: f64,
    pub component_costs: ComponentCosts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipCost {
    pub total: f64,
    pub overage_charges: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakEven {
    /// Trips per period at which both options cost the same.
    pub break_even_trips: f64,
    pub actual_trips: u64,
}

/// Derived comparison of the two payment options for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub pay_per_use: PayPerUseCost,
    pub membership: MembershipCost,
    pub break_even: BreakEven,
    /// `membership.total - payPerUse.total`; positive means membership costs more.
    pub savings: f64,
    /// Prices the model ran on, each tagged with its provenance.
    pub pricing: ResolvedPricing,
}

/// Recommendation for the rider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "Buy Monthly Membership")]
    BuyMembership,
    #[serde(rename = "Pay Per Use")]
    PayPerUse,
    #[serde(rename = "Unable to determine")]
    Undetermined,
}

impl Decision {
    /// Membership unless it strictly costs more. A tie goes to membership.
    pub fn from_savings(savings: f64) -> Self {
        if savings > 0.0 {
            Decision::PayPerUse
        } else {
            Decision::BuyMembership
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::BuyMembership => "Buy Monthly Membership",
            Decision::PayPerUse => "Pay Per Use",
            Decision::Undetermined => "Unable to determine",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Round to whole cents.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compute the cost breakdown, recording each formula as a calculator
/// Action with its Observation.
pub fn calculate_costs(
    analysis: &TripAnalysis,
    pricing: &ResolvedPricing,
    log: &mut StepLog,
) -> AppResult<CostBreakdown> {
    let trips = analysis.total_trips as f64;
    let avg = analysis.avg_duration;
    let unlock = pricing.unlock_fee.value;
    let per_minute = pricing.per_minute_cost.value;
    let ebike_trips = analysis.ebike_trips as f64;
    let surcharge = pricing.ebike_surcharge.value;
    let membership_price = pricing.membership_price.value;
    let included = pricing.included_minutes.value;
    let overage_fee = pricing.overage_fee.value;

    if analysis.total_trips == 0 {
        return Err(AppError::Computation {
            message: "no trips to price".to_string(),
        });
    }

    let unlock_fees = trips * unlock;
    let time_charges = trips * avg * per_minute;
    let ebike_surcharges = ebike_trips * avg * surcharge;
    let pay_per_use_total = unlock_fees + time_charges + ebike_surcharges;

    let overage_minutes = (analysis.total_duration - trips * included).max(0.0);
    let overage_charges = overage_minutes * overage_fee;
    let membership_total = membership_price + overage_charges;

    let per_trip_cost = unlock + avg * per_minute;
    if per_trip_cost == 0.0 {
        return Err(AppError::Computation {
            message: "break-even is undefined when a trip costs nothing".to_string(),
        });
    }
    let break_even_trips = membership_price / per_trip_cost;

    audit(
        log,
        "pay-per-use total",
        &format!(
            "{t} * {u} + {t} * {a} * {m} + {e} * {a} * {s}",
            t = trips,
            u = unlock,
            a = avg,
            m = per_minute,
            e = ebike_trips,
            s = surcharge
        ),
        Some(CURRENCY_UNITS),
    )?;
    audit(
        log,
        "membership total",
        &format!("{} + {} * {}", membership_price, overage_minutes, overage_fee),
        Some(CURRENCY_UNITS),
    )?;
    audit(
        log,
        "break-even trips",
        &format!("{} / ({} + {} * {})", membership_price, unlock, avg, per_minute),
        Some("trips"),
    )?;

    let pay_per_use_total = round_cents(pay_per_use_total);
    let membership_total = round_cents(membership_total);
    let savings = round_cents(membership_total - pay_per_use_total);

    info!(
        pay_per_use = pay_per_use_total,
        membership = membership_total,
        savings,
        "Costs calculated"
    );

    Ok(CostBreakdown {
        pay_per_use: PayPerUseCost {
            total: pay_per_use_total,
            per_trip: round_cents(pay_per_use_total / trips),
            component_costs: ComponentCosts {
                unlock_fees: round_cents(unlock_fees),
                time_charges: round_cents(time_charges),
                ebike_surcharges: round_cents(ebike_surcharges),
            },
        },
        membership: MembershipCost {
            total: membership_total,
            overage_charges: round_cents(overage_charges),
        },
        break_even: BreakEven {
            break_even_trips: round_cents(break_even_trips),
            actual_trips: analysis.total_trips,
        },
        savings,
        pricing: pricing.clone(),
    })
}

fn audit(log: &mut StepLog, label: &str, expression: &str, units: Option<&str>) -> AppResult<f64> {
    log.action(
        format!("Calculate {}", label),
        json!({ "tool": "calculator", "expression": expression, "units": units }),
    );
    let result = evaluate(expression, units)?;
    log.observation(format!(
        "{} = {:.2}{}",
        label,
        result.value,
        result.units.map(|u| format!(" {}", u)).unwrap_or_default()
    ));
    Ok(result.value)
}
