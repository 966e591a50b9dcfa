//! Pricing extraction from retrieved policy passages.
//!
//! Each pricing field has a small set of keyword and currency patterns.
//! Passages are scanned in the order they were retrieved and the first
//! match for a field wins; later matches for the same field are ignored.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::config::PricingDefaults;
use crate::tools::Passage;

/// A single fact the pricing model can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PricingField {
    MembershipPrice,
    PerRideCost,
    PerMinuteCost,
    UnlockFee,
    EbikeSurcharge,
    IncludedMinutes,
    OverageFee,
}

impl PricingField {
    /// Every field, in report order.
    pub const ALL: [PricingField; 7] = [
        PricingField::MembershipPrice,
        PricingField::PerRideCost,
        PricingField::PerMinuteCost,
        PricingField::UnlockFee,
        PricingField::EbikeSurcharge,
        PricingField::IncludedMinutes,
        PricingField::OverageFee,
    ];

    /// Name as it appears in serialized output.
    pub fn name(&self) -> &'static str {
        match self {
            PricingField::MembershipPrice => "membershipPrice",
            PricingField::PerRideCost => "perRideCost",
            PricingField::PerMinuteCost => "perMinuteCost",
            PricingField::UnlockFee => "unlockFee",
            PricingField::EbikeSurcharge => "ebikeSurcharge",
            PricingField::IncludedMinutes => "includedMinutes",
            PricingField::OverageFee => "overageFee",
        }
    }
}

impl fmt::Display for PricingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Best-guess prices found on the policy page. `None` until a passage matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingFacts {
    pub membership_price: Option<f64>,
    pub per_ride_cost: Option<f64>,
    pub per_minute_cost: Option<f64>,
    pub unlock_fee: Option<f64>,
    pub ebike_surcharge: Option<f64>,
    pub included_minutes: Option<f64>,
    pub overage_fee: Option<f64>,
}

impl PricingFacts {
    pub fn get(&self, field: PricingField) -> Option<f64> {
        *self.slot(field)
    }

    /// Record `value` unless the field already holds one. Returns whether
    /// the value was kept.
    pub fn record_first(&mut self, field: PricingField, value: f64) -> bool {
        let slot = self.slot_mut(field);
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }

    /// Fields that were found, in report order.
    pub fn found(&self) -> Vec<PricingField> {
        PricingField::ALL
            .into_iter()
            .filter(|f| self.get(*f).is_some())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.found().len() == PricingField::ALL.len()
    }

    fn slot(&self, field: PricingField) -> &Option<f64> {
        match field {
            PricingField::MembershipPrice => &self.membership_price,
            PricingField::PerRideCost => &self.per_ride_cost,
            PricingField::PerMinuteCost => &self.per_minute_cost,
            PricingField::UnlockFee => &self.unlock_fee,
            PricingField::EbikeSurcharge => &self.ebike_surcharge,
            PricingField::IncludedMinutes => &self.included_minutes,
            PricingField::OverageFee => &self.overage_fee,
        }
    }

    fn slot_mut(&mut self, field: PricingField) -> &mut Option<f64> {
        match field {
            PricingField::MembershipPrice => &mut self.membership_price,
            PricingField::PerRideCost => &mut self.per_ride_cost,
            PricingField::PerMinuteCost => &mut self.per_minute_cost,
            PricingField::UnlockFee => &mut self.unlock_fee,
            PricingField::EbikeSurcharge => &mut self.ebike_surcharge,
            PricingField::IncludedMinutes => &mut self.included_minutes,
            PricingField::OverageFee => &mut self.overage_fee,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Scale {
    Dollars,
    Cents,
    Count,
}

struct PricingRule {
    field: PricingField,
    pattern: Regex,
    scale: Scale,
}

const MONEY: &str = r"\$\s?(\d+(?:\.\d{1,2})?)";
const CENTS: &str = r"(\d+(?:\.\d+)?)\s?(?:¢|cents?\b)";

static PRICING_RULES: LazyLock<Vec<PricingRule>> = LazyLock::new(|| {
    use PricingField::*;
    use Scale::*;

    let rules: &[(PricingField, String, Scale)] = &[
        (
            MembershipPrice,
            format!(r"(?i)(?:membership|member|monthly|annual)[^$]{{0,40}}?{}", MONEY),
            Dollars,
        ),
        (
            MembershipPrice,
            format!(r"(?i){}\s*(?:/|per|a)\s*(?:month|mo\b|year|yr\b)", MONEY),
            Dollars,
        ),
        (
            PerRideCost,
            format!(r"(?i)(?:per ride|single ride|per trip|one ride)[^$]{{0,40}}?{}", MONEY),
            Dollars,
        ),
        (
            PerRideCost,
            format!(r"(?i){}\s*(?:/|per|a)\s*(?:ride|trip)\b", MONEY),
            Dollars,
        ),
        (
            PerMinuteCost,
            format!(r"(?i){}\s*(?:/|per|a)\s*min(?:ute)?\b", MONEY),
            Dollars,
        ),
        (
            PerMinuteCost,
            format!(r"(?i){}\s*(?:/|per|a)\s*min(?:ute)?\b", CENTS),
            Cents,
        ),
        (
            UnlockFee,
            format!(r"(?i)unlock[^$]{{0,40}}?{}", MONEY),
            Dollars,
        ),
        (
            UnlockFee,
            format!(r"(?i){}\s*(?:to\s+)?unlock", MONEY),
            Dollars,
        ),
        (
            EbikeSurcharge,
            format!(r"(?i)(?:e-?bike|electric|surcharge)[^$]{{0,60}}?{}", MONEY),
            Dollars,
        ),
        (
            EbikeSurcharge,
            format!(r"(?i)(?:e-?bike|electric|surcharge)[^¢]{{0,60}}?{}", CENTS),
            Cents,
        ),
        (
            OverageFee,
            format!(
                r"(?i){}\s*(?:/|per|for each|each)\s*(?:additional|extra)\s*min",
                MONEY
            ),
            Dollars,
        ),
        (
            OverageFee,
            format!(r"(?i)(?:overage|additional|extra)[^$]{{0,40}}?{}", MONEY),
            Dollars,
        ),
        (
            OverageFee,
            format!(r"(?i)(?:overage|additional|extra)[^¢]{{0,40}}?{}", CENTS),
            Cents,
        ),
        (
            IncludedMinutes,
            r"(?i)(\d+)\s*(?:min|mins|minutes)\s*(?:are\s+|of\s+ride\s+time\s+)?(?:included|free)".to_string(),
            Count,
        ),
        (
            IncludedMinutes,
            r"(?i)(?:includes?|included|first)\s*(\d+)\s*(?:min|mins|minutes)\b".to_string(),
            Count,
        ),
        (
            IncludedMinutes,
            r"(?i)(\d+)[- ]min(?:ute)?s?\s+rides?".to_string(),
            Count,
        ),
    ];

    rules
        .iter()
        .map(|(field, pattern, scale)| PricingRule {
            field: *field,
            pattern: Regex::new(pattern).expect("pricing pattern is valid"),
            scale: *scale,
        })
        .collect()
});

/// First value in `text` matching any pattern for `field`.
pub fn match_field(field: PricingField, text: &str) -> Option<f64> {
    PRICING_RULES
        .iter()
        .filter(|rule| rule.field == field)
        .find_map(|rule| {
            let raw: f64 = rule.pattern.captures(text)?.get(1)?.as_str().parse().ok()?;
            let value = match rule.scale {
                Scale::Dollars | Scale::Count => raw,
                Scale::Cents => raw / 100.0,
            };
            value.is_finite().then_some(value)
        })
}

/// Scan passages in order, keeping the first match per field.
pub fn extract_pricing<'a>(passages: impl IntoIterator<Item = &'a Passage>) -> PricingFacts {
    let mut facts = PricingFacts::default();
    for passage in passages {
        for field in PricingField::ALL {
            if facts.get(field).is_some() {
                continue;
            }
            if let Some(value) = match_field(field, &passage.text) {
                facts.record_first(field, value);
            }
        }
        if facts.is_complete() {
            break;
        }
    }
    facts
}

/// Where a resolved price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    /// Read from the policy page.
    Extracted,
    /// Fallback assumption.
    Default,
}

/// A price tagged with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Priced {
    pub value: f64,
    pub source: PriceSource,
}

impl Priced {
    pub fn extracted(value: f64) -> Self {
        Self {
            value,
            source: PriceSource::Extracted,
        }
    }

    pub fn fallback(value: f64) -> Self {
        Self {
            value,
            source: PriceSource::Default,
        }
    }

    pub fn is_default(&self) -> bool {
        self.source == PriceSource::Default
    }
}

/// The pricing table the cost model runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPricing {
    pub membership_price: Priced,
    pub per_minute_cost: Priced,
    pub unlock_fee: Priced,
    pub ebike_surcharge: Priced,
    pub included_minutes: Priced,
    pub overage_fee: Priced,
    /// Flat single-ride price, reported when the page states one.
    pub per_ride_cost: Option<Priced>,
}

impl ResolvedPricing {
    /// Fill every field the facts leave empty from `defaults`.
    pub fn resolve(facts: &PricingFacts, defaults: &PricingDefaults) -> Self {
        let pick = |found: Option<f64>, fallback: f64| {
            found.map(Priced::extracted).unwrap_or_else(|| Priced::fallback(fallback))
        };

        Self {
            membership_price: pick(facts.membership_price, defaults.membership_price),
            per_minute_cost: pick(facts.per_minute_cost, defaults.per_minute_cost),
            unlock_fee: pick(facts.unlock_fee, defaults.unlock_fee),
            ebike_surcharge: pick(facts.ebike_surcharge, defaults.ebike_surcharge),
            included_minutes: pick(facts.included_minutes, defaults.included_minutes),
            overage_fee: pick(facts.overage_fee, defaults.overage_fee),
            per_ride_cost: facts.per_ride_cost.map(Priced::extracted),
        }
    }

    pub fn get(&self, field: PricingField) -> Option<Priced> {
        match field {
            PricingField::MembershipPrice => Some(self.membership_price),
            PricingField::PerRideCost => self.per_ride_cost,
            PricingField::PerMinuteCost => Some(self.per_minute_cost),
            PricingField::UnlockFee => Some(self.unlock_fee),
            PricingField::EbikeSurcharge => Some(self.ebike_surcharge),
            PricingField::IncludedMinutes => Some(self.included_minutes),
            PricingField::OverageFee => Some(self.overage_fee),
        }
    }

    /// Fields running on fallback values, in report order.
    pub fn defaulted_fields(&self) -> Vec<PricingField> {
        PricingField::ALL
            .into_iter()
            .filter(|f| self.get(*f).is_some_and(|p| p.is_default()))
            .collect()
    }
}
