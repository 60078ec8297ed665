use std::time::Duration;

use chrono::{TimeZone, Utc};
use nftline_core::{HttpSettings, http_client};
use nftline_ingest::{Fetch, MarketApi, Query, ReservoirClient, SortDirection};
use nftline_queue::{Block, Dataset};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, request_timeout: Duration) -> ReservoirClient {
    let http = http_client(&HttpSettings {
        request_timeout,
        ..HttpSettings::default()
    })
    .unwrap();
    ReservoirClient::new(http, server.uri(), Some("secret".into()), "nftline-test")
        .with_transport_pause(Duration::from_millis(10))
}

fn sales_block() -> Block {
    Block::new(
        Dataset::Sales,
        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        Utc.timestamp_opt(1_700_003_600, 0).unwrap(),
        "0xabc",
    )
    .unwrap()
}

#[tokio::test]
async fn sends_headers_and_block_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sales/v6"))
        .and(header("x-system", "nftline-test"))
        .and(header("X-API-KEY", "secret"))
        .and(query_param("limit", "1000"))
        .and(query_param("includeCriteriaMetadata", "true"))
        .and(query_param("orderBy", "updated_at"))
        .and(query_param("startTimestamp", "1700000000"))
        .and(query_param("endTimestamp", "1700003600"))
        .and(query_param("contract", "0xabc"))
        .and(query_param("sortDirection", "desc"))
        .and(query_param("continuation", "abc=="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sales": [{"saleId": "s1", "updatedAt": "2023-11-14T22:13:20Z"}],
            "continuation": "next"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = Query::for_block(&sales_block(), SortDirection::Desc)
        .with_continuation(Some("abc==".into()));
    let fetch = client(&server, Duration::from_secs(5))
        .fetch(Dataset::Sales, &query)
        .await;

    let Fetch::Page(page) = fetch else {
        panic!("expected a page, got {fetch:?}");
    };
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.continuation.as_deref(), Some("next"));
}

#[tokio::test]
async fn orders_use_orders_root_and_sort_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/bids/v6"))
        .and(query_param("sortBy", "updatedAt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orders": [],
            "continuation": null
        })))
        .mount(&server)
        .await;

    let fetch = client(&server, Duration::from_secs(5))
        .fetch(Dataset::Bids, &Query::probe(SortDirection::Asc, None))
        .await;
    assert_eq!(fetch, Fetch::Page(Default::default()));
}

#[tokio::test]
async fn error_statuses_are_returned_not_retried() {
    for status in [429, 500, 404] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;

        let fetch = client(&server, Duration::from_secs(5))
            .fetch(Dataset::Sales, &Query::probe(SortDirection::Asc, None))
            .await;
        assert_eq!(fetch, Fetch::Failed { status });
    }
}

#[tokio::test]
async fn undecodable_success_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let fetch = client(&server, Duration::from_secs(5))
        .fetch(Dataset::Sales, &Query::probe(SortDirection::Asc, None))
        .await;
    assert_eq!(fetch, Fetch::Failed { status: 200 });
}

#[tokio::test]
async fn timed_out_request_is_retried_in_place() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"sales": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sales": [{"saleId": "late", "updatedAt": "2023-01-01T00:00:00Z"}]
        })))
        .mount(&server)
        .await;

    let fetch = client(&server, Duration::from_millis(200))
        .fetch(Dataset::Sales, &Query::probe(SortDirection::Asc, None))
        .await;

    let Fetch::Page(page) = fetch else {
        panic!("expected a page, got {fetch:?}");
    };
    assert_eq!(page.records[0]["saleId"], "late");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
