//! Integration tests for the policy passage retriever
//!
//! Tests HTTP fetching, ranking and caching using wiremock for the policy page.

use std::time::Duration;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use fare_advisor::config::{RequestConfig, RetrievalConfig, DEFAULT_USER_AGENT};
use fare_advisor::error::RetrievalError;
use fare_advisor::tools::PolicyRetriever;

const PAGE: &str = r#"
<html>
  <head><title>City Bikes pricing</title></head>
  <body>
    <h1>Ride pricing and plans</h1>
    <section id="membership-plans">
      <h2>Monthly membership</h2>
      <div class="price-tag">Monthly membership $15/month with 45 minutes included on every ride</div>
    </section>
    <p>Pay as you go: unlock fee $1.00, then $0.15 per minute.</p>
    <p>E-bikes carry a surcharge of $0.10 per minute.</p>
    <p>Overage: $0.15 per additional minute beyond the included time.</p>
    <footer><p>Copyright City Bikes, all rights reserved</p></footer>
  </body>
</html>
"#;

/// Create a retriever with a short timeout for testing
fn create_test_retriever(timeout_ms: u64) -> PolicyRetriever {
    let request = RequestConfig {
        timeout_ms,
        user_agent: DEFAULT_USER_AGENT.to_string(),
    };
    PolicyRetriever::http(&request, RetrievalConfig::default()).expect("Failed to create retriever")
}

async fn serve_page(server: &MockServer, expected_fetches: u64) {
    Mock::given(method("GET"))
        .and(path("/pricing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .expect(expected_fetches)
        .mount(server)
        .await;
}

#[cfg(test)]
mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_identical_requests_fetch_once() {
        let mock_server = MockServer::start().await;
        serve_page(&mock_server, 1).await;

        let retriever = create_test_retriever(5000);
        let url = format!("{}/pricing", mock_server.uri());

        let first = retriever.retrieve(&url, "unlock fee", 3).await.unwrap();
        let second = retriever.retrieve(&url, "unlock fee", 3).await.unwrap();

        assert_eq!(first, second);
        assert!(!first.passages.is_empty());
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let mock_server = MockServer::start().await;
        serve_page(&mock_server, 2).await;

        let retriever = create_test_retriever(5000);
        let url = format!("{}/pricing", mock_server.uri());

        retriever.retrieve(&url, "unlock fee", 3).await.unwrap();
        retriever.clear_cache().await;
        retriever.retrieve(&url, "unlock fee", 3).await.unwrap();
    }

    #[tokio::test]
    async fn test_each_query_is_cached_separately() {
        let mock_server = MockServer::start().await;
        serve_page(&mock_server, 2).await;

        let retriever = create_test_retriever(5000);
        let url = format!("{}/pricing", mock_server.uri());

        retriever.retrieve(&url, "unlock fee", 3).await.unwrap();
        retriever.retrieve(&url, "membership price", 3).await.unwrap();
        retriever.retrieve(&url, "membership price", 3).await.unwrap();
        assert_eq!(retriever.cache_len().await, 2);
    }
}

#[cfg(test)]
mod ranking_tests {
    use super::*;

    #[tokio::test]
    async fn test_heading_outranks_paragraph() {
        let mock_server = MockServer::start().await;
        serve_page(&mock_server, 1).await;

        let retriever = create_test_retriever(5000);
        let url = format!("{}/pricing", mock_server.uri());

        let result = retriever.retrieve(&url, "plans", 5).await.unwrap();

        assert_eq!(result.passages[0].source_label, "h1");
        assert_eq!(result.passages[0].text, "Ride pricing and plans");
    }

    #[tokio::test]
    async fn test_passages_sorted_and_bounded() {
        let mock_server = MockServer::start().await;
        serve_page(&mock_server, 1).await;

        let retriever = create_test_retriever(5000);
        let url = format!("{}/pricing", mock_server.uri());

        let result = retriever.retrieve(&url, "surcharge e-bikes", 3).await.unwrap();

        assert!(result.passages.len() <= 3);
        assert!(result.passages.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(result.passages.iter().all(|p| p.score > 0.0));
        assert!(result.passages[0].text.contains("surcharge"));
    }

    #[tokio::test]
    async fn test_sends_configured_user_agent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pricing"))
            .and(header("user-agent", "fare-advisor-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = RequestConfig {
            timeout_ms: 5000,
            user_agent: "fare-advisor-test/1.0".to_string(),
        };
        let retriever = PolicyRetriever::http(&request, RetrievalConfig::default()).unwrap();
        let url = format!("{}/pricing", mock_server.uri());
        assert!(retriever.retrieve(&url, "fee", 3).await.is_ok());
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[tokio::test]
    async fn test_server_error_is_fetch_failed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pricing"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let retriever = create_test_retriever(5000);
        let url = format!("{}/pricing", mock_server.uri());

        let result = retriever.retrieve(&url, "fee", 3).await;
        assert!(matches!(result, Err(RetrievalError::FetchFailed { .. })));
        assert_eq!(retriever.cache_len().await, 0);
    }

    #[tokio::test]
    async fn test_slow_page_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pricing"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(PAGE)
                    .set_delay(Duration::from_millis(2000)),
            )
            .mount(&mock_server)
            .await;

        let retriever = create_test_retriever(100);
        let url = format!("{}/pricing", mock_server.uri());

        let result = retriever.retrieve(&url, "fee", 3).await;
        assert!(matches!(
            result,
            Err(RetrievalError::Timeout { timeout_ms: 100, .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_fetch_failed() {
        // Nothing listens on the discard port
        let retriever = create_test_retriever(2000);
        let result = retriever.retrieve("http://127.0.0.1:9/pricing", "fee", 3).await;
        assert!(matches!(
            result,
            Err(RetrievalError::FetchFailed { .. }) | Err(RetrievalError::Timeout { .. })
        ));
    }
}
