use std::env;
use std::str::FromStr;

use crate::agent::PricingField;
use crate::error::AppError;

/// Browser-like identity; some operators block unidentified crawlers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub retrieval: RetrievalConfig,
    pub database: DatabaseConfig,
    pub pricing: PricingDefaults,
    pub queries: PolicyQueryPlan,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration for policy page fetches
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub user_agent: String,
}

/// Passage retrieval tuning
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Passages requested per policy sub-query.
    pub top_k: usize,
    /// Candidate blocks must be strictly longer than this many characters.
    pub min_passage_chars: usize,
    /// Candidate blocks must be strictly shorter than this many characters.
    pub max_passage_chars: usize,
    /// Cap on passages carried into the result's citations.
    pub max_cited_passages: usize,
    /// Dispatch the policy sub-queries concurrently.
    pub concurrent: bool,
}

/// Tabular store configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub query_timeout_ms: u64,
}

/// Fallback prices used when the policy page does not state a value
#[derive(Debug, Clone, PartialEq)]
pub struct PricingDefaults {
    pub unlock_fee: f64,
    pub per_minute_cost: f64,
    pub ebike_surcharge: f64,
    pub membership_price: f64,
    pub included_minutes: f64,
    pub overage_fee: f64,
}

/// One policy sub-query and the pricing facts it is meant to surface
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyQuery {
    pub query: String,
    pub targets: Vec<PricingField>,
}

/// Ordered list of policy sub-queries issued during retrieval
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyQueryPlan {
    pub queries: Vec<PolicyQuery>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", 10_000),
            user_agent: env::var("FETCH_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
        };

        let defaults = RetrievalConfig::default();
        let retrieval = RetrievalConfig {
            top_k: env_or("RETRIEVAL_TOP_K", defaults.top_k),
            min_passage_chars: env_or("MIN_PASSAGE_CHARS", defaults.min_passage_chars),
            max_passage_chars: env_or("MAX_PASSAGE_CHARS", defaults.max_passage_chars),
            max_cited_passages: env_or("MAX_CITED_PASSAGES", defaults.max_cited_passages),
            concurrent: env_or("RETRIEVAL_CONCURRENT", defaults.concurrent),
        };

        if retrieval.min_passage_chars >= retrieval.max_passage_chars {
            return Err(AppError::Config {
                message: format!(
                    "MIN_PASSAGE_CHARS ({}) must be below MAX_PASSAGE_CHARS ({})",
                    retrieval.min_passage_chars, retrieval.max_passage_chars
                ),
            });
        }

        let database = DatabaseConfig {
            query_timeout_ms: env_or("QUERY_TIMEOUT_MS", 5_000),
        };

        let fallback = PricingDefaults::default();
        let pricing = PricingDefaults {
            unlock_fee: env_or("DEFAULT_UNLOCK_FEE", fallback.unlock_fee),
            per_minute_cost: env_or("DEFAULT_PER_MINUTE_COST", fallback.per_minute_cost),
            ebike_surcharge: env_or("DEFAULT_EBIKE_SURCHARGE", fallback.ebike_surcharge),
            membership_price: env_or("DEFAULT_MEMBERSHIP_PRICE", fallback.membership_price),
            included_minutes: env_or("DEFAULT_INCLUDED_MINUTES", fallback.included_minutes),
            overage_fee: env_or("DEFAULT_OVERAGE_FEE", fallback.overage_fee),
        };
        pricing.validate()?;

        Ok(Config {
            logging,
            request,
            retrieval,
            database,
            pricing,
            queries: PolicyQueryPlan::default(),
        })
    }
}

/// Read and parse an env var, falling back when unset or unparseable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl PricingDefaults {
    /// Reject negative or non-finite fallback prices.
    pub fn validate(&self) -> Result<(), AppError> {
        let fields = [
            ("unlock_fee", self.unlock_fee),
            ("per_minute_cost", self.per_minute_cost),
            ("ebike_surcharge", self.ebike_surcharge),
            ("membership_price", self.membership_price),
            ("included_minutes", self.included_minutes),
            ("overage_fee", self.overage_fee),
        ];

        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::Config {
                    message: format!("default {} must be a non-negative number, got {}", name, value),
                });
            }
        }
        Ok(())
    }
}

impl PolicyQueryPlan {
    /// Create a plan from explicit sub-queries.
    pub fn new(queries: Vec<PolicyQuery>) -> Self {
        Self { queries }
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyQuery> {
        self.queries.iter()
    }
}

impl PolicyQuery {
    pub fn new(query: impl Into<String>, target: PricingField) -> Self {
        Self::covering(query, [target])
    }

    /// A sub-query expected to surface several fields.
    pub fn covering(
        query: impl Into<String>,
        targets: impl IntoIterator<Item = PricingField>,
    ) -> Self {
        Self {
            query: query.into(),
            targets: targets.into_iter().collect(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_passage_chars: 10,
            max_passage_chars: 500,
            max_cited_passages: 10,
            concurrent: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5_000,
        }
    }
}

impl Default for PricingDefaults {
    fn default() -> Self {
        Self {
            unlock_fee: 1.00,
            per_minute_cost: 0.15,
            ebike_surcharge: 0.10,
            membership_price: 15.00,
            included_minutes: 45.0,
            overage_fee: 0.15,
        }
    }
}

impl Default for PolicyQueryPlan {
    fn default() -> Self {
        Self::new(vec![
            PolicyQuery::new("membership price monthly annual", PricingField::MembershipPrice),
            PolicyQuery::covering(
                "per ride cost per minute price",
                [PricingField::PerMinuteCost, PricingField::PerRideCost],
            ),
            PolicyQuery::new("unlock fee", PricingField::UnlockFee),
            PolicyQuery::new("e-bike ebike electric surcharge", PricingField::EbikeSurcharge),
            PolicyQuery::new("overage fee additional minutes", PricingField::OverageFee),
            PolicyQuery::new("included minutes ride time", PricingField::IncludedMinutes),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pricing_matches_documented_fallbacks() {
        let pricing = PricingDefaults::default();
        assert_eq!(pricing.unlock_fee, 1.00);
        assert_eq!(pricing.per_minute_cost, 0.15);
        assert_eq!(pricing.ebike_surcharge, 0.10);
        assert_eq!(pricing.membership_price, 15.00);
        assert_eq!(pricing.included_minutes, 45.0);
        assert_eq!(pricing.overage_fee, 0.15);
        assert!(pricing.validate().is_ok());
    }

    #[test]
    fn test_negative_default_rejected() {
        let pricing = PricingDefaults {
            overage_fee: -1.0,
            ..PricingDefaults::default()
        };
        let err = pricing.validate().unwrap_err();
        assert!(err.to_string().contains("overage_fee"));
    }

    #[test]
    fn test_nan_default_rejected() {
        let pricing = PricingDefaults {
            membership_price: f64::NAN,
            ..PricingDefaults::default()
        };
        assert!(pricing.validate().is_err());
    }

    #[test]
    fn test_default_plan_covers_every_reported_field() {
        let plan = PolicyQueryPlan::default();
        assert_eq!(plan.len(), 6);

        let targets: Vec<PricingField> = plan.iter().flat_map(|q| q.targets.clone()).collect();
        for field in PricingField::ALL {
            assert!(targets.contains(&field), "no sub-query targets {}", field);
        }
    }

    #[test]
    fn test_retrieval_defaults() {
        let retrieval = RetrievalConfig::default();
        assert_eq!(retrieval.top_k, 3);
        assert_eq!(retrieval.min_passage_chars, 10);
        assert_eq!(retrieval.max_passage_chars, 500);
        assert_eq!(retrieval.max_cited_passages, 10);
        assert!(!retrieval.concurrent);
    }

    #[test]
    fn test_request_defaults_use_browser_identity() {
        let request = RequestConfig::default();
        assert_eq!(request.timeout_ms, 10_000);
        assert!(request.user_agent.starts_with("Mozilla/5.0"));
    }
}
