use predbench_client::{Client, ClientConfig, DeadlineCoalescer, PredictClient};
use predbench_common::{PredictError, PredictRequest, PredictRequestBuilder, PredictResponse};
use std::time::Duration;

// Helper: build a ClientConfig aimed at the given mockito server URL (strips the http:// prefix).
fn mock_config(server_url: &str) -> ClientConfig {
    ClientConfig::new(server_url.trim_start_matches("http://"))
}

fn request() -> PredictRequest {
    PredictRequestBuilder::new()
        .with_model_name("model1")
        .add_input("input1", |t| t.with_dimensions([1]).with_int32_values([42]))
        .build()
}

fn echo_body(request: &PredictRequest) -> String {
    serde_json::to_string(&PredictResponse {
        model_spec: request.model_spec.clone(),
        outputs: request.inputs.clone(),
    })
    .unwrap()
}

#[test]
fn test_client_config_default() {
    let config = ClientConfig::default();
    assert_eq!(config.address, "127.0.0.1:8500");
    assert!(config.tcp_nodelay);
    assert_eq!(config.tcp_keepalive, Some(Duration::from_secs(5)));
    assert!(!config.http2_prior_knowledge);
    assert_eq!(config.connect_timeout, None);
}

#[test]
fn test_client_config_new_keeps_defaults() {
    let config = ClientConfig::new("localhost:9000");
    assert_eq!(config.address, "localhost:9000");
    assert!(config.tcp_nodelay);
}

#[test]
fn test_client_creation_with_config() {
    let mut config = ClientConfig::new("example.com:3000");
    config.http2_prior_knowledge = true;
    config.connect_timeout = Some(Duration::from_millis(250));
    let client = Client::new(config).unwrap();
    assert_eq!(client.config.address, "example.com:3000");
    assert!(client.config.http2_prior_knowledge);
}

#[test]
fn test_build_predict_url() {
    let client = Client::new(ClientConfig::new("127.0.0.1:8500")).unwrap();
    assert_eq!(
        client.build_predict_url("model1"),
        "http://127.0.0.1:8500/v1/models/model1/predict"
    );
}

#[tokio::test]
async fn test_predict_returns_response_on_200() {
    let request = request();
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/models/model1/predict")
        .match_header("x-request-id", mockito::Matcher::Any)
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "model_spec": { "name": "model1" }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(echo_body(&request))
        .create_async()
        .await;

    let client = Client::new(mock_config(&server.url())).unwrap();
    let coalescer = DeadlineCoalescer::new();
    let token = coalescer.acquire(Duration::from_secs(5)).unwrap();

    let response = client.predict(request.clone(), &token).await.unwrap().unwrap();
    assert_eq!(response.model_spec.name, "model1");
    assert_eq!(response.outputs, request.inputs);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_predict_returns_none_on_204() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/v1/models/model1/predict")
        .with_status(204)
        .create_async()
        .await;

    let client = Client::new(mock_config(&server.url())).unwrap();
    let coalescer = DeadlineCoalescer::new();
    let token = coalescer.acquire(Duration::from_secs(5)).unwrap();

    assert_eq!(client.predict(request(), &token).await, Ok(None));
}

#[tokio::test]
async fn test_predict_returns_none_on_empty_200() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/v1/models/model1/predict")
        .with_status(200)
        .create_async()
        .await;

    let client = Client::new(mock_config(&server.url())).unwrap();
    assert_eq!(client.send(&request()).await, Ok(None));
}

#[tokio::test]
async fn test_predict_parses_error_envelope() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/v1/models/model1/predict")
        .with_status(500)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"Injected failure"}"#)
        .create_async()
        .await;

    let client = Client::new(mock_config(&server.url())).unwrap();
    assert_eq!(
        client.send(&request()).await,
        Err(PredictError::HttpError(500, "Injected failure".to_string()))
    );
}

#[tokio::test]
async fn test_predict_error_without_envelope() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/v1/models/model1/predict")
        .with_status(503)
        .with_body("overloaded")
        .create_async()
        .await;

    let client = Client::new(mock_config(&server.url())).unwrap();
    match client.send(&request()).await {
        Err(PredictError::HttpError(503, msg)) => assert!(msg.contains("503"), "unexpected message {msg}"),
        other => panic!("expected HttpError(503, _), got {other:?}"),
    }
}

#[tokio::test]
async fn test_predict_malformed_body_is_protocol_error() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/v1/models/model1/predict")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"outputs": 7}"#)
        .create_async()
        .await;

    let client = Client::new(mock_config(&server.url())).unwrap();
    assert!(matches!(client.send(&request()).await, Err(PredictError::ProtocolError(_))));
}

#[tokio::test]
async fn test_predict_connection_refused_is_network_error() {
    // Bind then release a port so nothing is listening on it.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let client = Client::new(ClientConfig::new(addr.to_string())).unwrap();
    let coalescer = DeadlineCoalescer::new();
    let token = coalescer.acquire(Duration::from_secs(5)).unwrap();

    assert!(matches!(client.predict(request(), &token).await, Err(PredictError::NetworkError(_))));
}

#[tokio::test]
async fn test_predict_with_expired_deadline_times_out() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/v1/models/model1/predict")
        .with_status(204)
        .create_async()
        .await;

    let client = Client::new(mock_config(&server.url())).unwrap();
    let coalescer = DeadlineCoalescer::new();
    let token = coalescer.acquire(Duration::ZERO).unwrap();
    token.cancelled().await;

    assert_eq!(client.predict(request(), &token).await, Err(PredictError::Timeout));
}
