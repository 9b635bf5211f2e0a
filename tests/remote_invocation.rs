use std::time::Duration;

use serde_json::{json, Value};
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use talking_head_runner::compare::Outcome;
use talking_head_runner::error::FailureKind;
use talking_head_runner::job::{JobRequest, JobResult};
use talking_head_runner::models::ModelKind;
use talking_head_runner::remote::{Endpoint, RemoteClient};
use talking_head_runner::runner::{run_remote_comparison, RemoteModelPlan};

const API_KEY: &str = "test-key";

fn request() -> JobRequest {
    JobRequest::new(
        Url::parse("https://assets.example.com/profile.png").unwrap(),
        Url::parse("https://assets.example.com/test.mp3").unwrap(),
        ModelKind::SadTalker.default_options(),
    )
}

fn completed(processing_time: f64, file_size: u64) -> Value {
    json!({
        "id": "sync-1",
        "status": "COMPLETED",
        "delayTime": 850,
        "executionTime": 1000.0 * processing_time + 400.0,
        "output": {
            "status": "success",
            "output_video_url": "https://cdn.example.com/result.mp4",
            "processing_time": processing_time,
            "file_size": file_size
        }
    })
}

/// The client is blocking, so it runs on the blocking pool while the mock server runs on the runtime.
async fn invoke(base: String, endpoint: &str, timeout: Duration) -> JobResult {
    let endpoint = endpoint.to_string();
    tokio::task::spawn_blocking(move || {
        let client = RemoteClient::new(Url::parse(&base).unwrap(), API_KEY).unwrap();
        client.invoke(&Endpoint::new(endpoint).unwrap(), &request(), timeout)
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn completed_job_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/st-endpoint/runsync"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_json(json!({
            "input": {
                "input_image_url": "https://assets.example.com/profile.png",
                "input_audio_url": "https://assets.example.com/test.mp3",
                "options": {
                    "still_mode": true,
                    "preprocess": "crop",
                    "enhancer": "gfpgan",
                    "pose_style": 0,
                    "face_model_resolution": 256
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completed(92.5, 4_194_304)))
        .expect(1)
        .mount(&server)
        .await;

    let result = invoke(server.uri(), "st-endpoint", Duration::from_secs(10)).await;
    match result {
        JobResult::Success {
            elapsed_seconds,
            output_reference,
            output_size_bytes,
            raw_payload,
            ..
        } => {
            assert_eq!(elapsed_seconds, 92.5);
            assert_eq!(output_reference.as_str(), "https://cdn.example.com/result.mp4");
            assert_eq!(output_size_bytes, 4_194_304);
            assert_eq!(raw_payload["delayTime"], 850);
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_is_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("worker pool exhausted"))
        .mount(&server)
        .await;

    let result = invoke(server.uri(), "st-endpoint", Duration::from_secs(10)).await;
    match result {
        JobResult::Failure {
            kind, error_message, ..
        } => {
            assert_eq!(kind, FailureKind::Transport);
            assert!(error_message.contains("500"), "{error_message}");
            assert!(error_message.contains("worker pool exhausted"), "{error_message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_key_is_rejected_before_parsing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer another-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completed(1.0, 1)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let result = invoke(server.uri(), "st-endpoint", Duration::from_secs(10)).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::Transport));
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_endpoint_is_a_timeout_not_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completed(1.0, 1))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let result = invoke(server.uri(), "st-endpoint", Duration::from_millis(300)).await;
    match result {
        JobResult::Failure {
            kind, error_message, ..
        } => {
            assert_eq!(kind, FailureKind::Timeout);
            assert!(error_message.contains("timed out"), "{error_message}");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_error_is_job_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sync-2",
            "status": "COMPLETED",
            "output": {
                "status": "error",
                "error": "SadTalker failed: CUDA out of memory",
                "processing_time": 12.0
            }
        })))
        .mount(&server)
        .await;

    let result = invoke(server.uri(), "st-endpoint", Duration::from_secs(10)).await;
    assert_eq!(
        result,
        JobResult::Failure {
            kind: FailureKind::Job,
            error_message: "SadTalker failed: CUDA out of memory".into(),
            elapsed_seconds: 12.0,
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_job_is_not_polled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "sync-3", "status": "IN_QUEUE"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = invoke(server.uri(), "st-endpoint", Duration::from_secs(10)).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::Job));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_host_is_transport_failure() {
    // Nothing listens on the discard port
    let result = invoke("http://127.0.0.1:9".into(), "st-endpoint", Duration::from_secs(5)).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::Transport));
}

#[tokio::test(flavor = "multi_thread")]
async fn comparison_calls_both_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/st-endpoint/runsync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completed(120.0, 3 * 1024 * 1024)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/w2l-endpoint/runsync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completed(30.0, 1024 * 1024)))
        .expect(1)
        .mount(&server)
        .await;

    let base = server.uri();
    let report = tokio::task::spawn_blocking(move || {
        let client = RemoteClient::new(Url::parse(&base).unwrap(), API_KEY).unwrap();
        let image = Url::parse("https://assets.example.com/profile.png").unwrap();
        let plan = |model: ModelKind, endpoint: &str, audio: &str| RemoteModelPlan {
            model,
            endpoint: Endpoint::new(endpoint).unwrap(),
            request: JobRequest::new(
                image.clone(),
                Url::parse(audio).unwrap(),
                model.default_options(),
            ),
            timeout: Duration::from_secs(10),
        };
        run_remote_comparison(
            &client,
            &plan(ModelKind::SadTalker, "st-endpoint", "https://assets.example.com/test.mp3"),
            &plan(ModelKind::Wav2Lip, "w2l-endpoint", "https://assets.example.com/test.wav"),
        )
    })
    .await
    .unwrap();

    match &report.outcome {
        Outcome::Compared(comparison) => {
            assert_eq!(comparison.speed.winner, "Wav2Lip");
            assert_eq!(comparison.speed.difference, 90.0);
            assert_eq!(comparison.cost.winner, "Wav2Lip");
            assert_eq!(comparison.speed_ratio, Some(4.0));
            assert_eq!(comparison.first_output_mib, 3.0);
        }
        other => panic!("expected comparison, got {other:?}"),
    }
    assert_eq!(report.first.model_id, "sadtalker");
    assert!(report.second.cost.is_some());
}
