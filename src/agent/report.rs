//! Templated text for observations and the final answer.

use super::{CostBreakdown, Decision, PricingField, ResolvedPricing, TripAnalysis};

/// One-line summary of the trip analysis.
pub fn describe_analysis(analysis: &TripAnalysis) -> String {
    format!(
        "Loaded {} trips averaging {:.1} minutes ({:.0} minutes total; {} e-bike, {} classic)",
        analysis.total_trips,
        analysis.avg_duration,
        analysis.total_duration,
        analysis.ebike_trips,
        analysis.classic_trips
    )
}

/// Pricing table with the provenance of each value.
pub fn describe_pricing(pricing: &ResolvedPricing) -> String {
    let entries: Vec<String> = PricingField::ALL
        .into_iter()
        .filter_map(|field| {
            pricing.get(field).map(|priced| {
                let source = if priced.is_default() { "default" } else { "extracted" };
                format!("{}={:.2} ({})", field, priced.value, source)
            })
        })
        .collect();
    format!("Pricing: {}", entries.join(", "))
}

/// Human-readable reasoning behind `decision`.
pub fn render_justification(
    decision: Decision,
    analysis: &TripAnalysis,
    costs: &CostBreakdown,
) -> String {
    let mut text = format!(
        "Based on {} trips averaging {:.1} minutes, paying per use would cost ${:.2} \
         (${:.2} per trip) versus ${:.2} for a monthly membership.",
        analysis.total_trips,
        analysis.avg_duration,
        costs.pay_per_use.total,
        costs.pay_per_use.per_trip,
        costs.membership.total
    );

    match decision {
        Decision::PayPerUse => text.push_str(&format!(
            " Paying per use saves ${:.2}.",
            costs.savings
        )),
        Decision::BuyMembership if costs.savings == 0.0 => {
            text.push_str(" Both options cost the same; the membership is recommended on a tie.")
        }
        Decision::BuyMembership => text.push_str(&format!(
            " The membership saves ${:.2}.",
            -costs.savings
        )),
        Decision::Undetermined => {}
    }

    text.push_str(&format!(
        " The membership breaks even at {:.2} trips; you took {}.",
        costs.break_even.break_even_trips, costs.break_even.actual_trips
    ));

    let defaulted = costs.pricing.defaulted_fields();
    if !defaulted.is_empty() {
        let names: Vec<&str> = defaulted.iter().map(PricingField::name).collect();
        text.push_str(&format!(
            " The policy page did not state {}, so default values were assumed.",
            names.join(", ")
        ));
    }

    text
}
