//! Wire-level behavior of the service host and the embedded transport.

use std::sync::Arc;

use counsel_config::{CounselConfig, ModelsConfig};
use counsel_protocol::{
    DeviceClass, GenerationParams, ModelDescriptor, ProtocolError, ServiceErrorKind, ServiceReply,
    ServiceRequest, ServiceRequestEnvelope, ServiceTransport, TransportError,
};
use counsel_service::{
    DeterministicLoader, DeviceProbe, FixedProbe, InProcessTransport, ModelRegistry, ModelState,
    ServiceHost,
};
use pretty_assertions::assert_eq;

fn descriptor(dir: &tempfile::TempDir, name: &str) -> ModelDescriptor {
    let path = dir.path().join(format!("{name}.gguf"));
    std::fs::write(&path, b"stub").expect("write weights");
    ModelDescriptor {
        name: name.to_string(),
        path,
        device: DeviceClass::Cpu,
        memory_cost_mb: 256,
        max_gpu_layers: 0,
    }
}

fn service(dir: &tempfile::TempDir) -> (Arc<ServiceHost>, Arc<ModelRegistry>) {
    let config = Arc::new(
        CounselConfig::builder()
            .models(ModelsConfig {
                catalog: vec![
                    descriptor(dir, "embedder"),
                    descriptor(dir, "utility"),
                    descriptor(dir, "reasoner"),
                ],
                ..ModelsConfig::default()
            })
            .build(),
    );
    let probe: Arc<dyn DeviceProbe> = Arc::new(FixedProbe {
        available_mb: 8_192,
        rss_mb: 256,
    });
    let registry = Arc::new(ModelRegistry::new(
        &config,
        Arc::new(DeterministicLoader::new(16)),
        Arc::clone(&probe),
    ));
    let host = Arc::new(ServiceHost::new(config, Arc::clone(&registry), probe));
    (host, registry)
}

fn score_request() -> ServiceRequest {
    ServiceRequest::Score {
        question: "what is the notice period".to_string(),
        chunks: vec![
            "the notice period is thirty days".to_string(),
            "lunch is served at noon".to_string(),
        ],
    }
}

#[tokio::test]
async fn inference_requests_round_trip_through_dispatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, _registry) = service(&dir);

    let reply = host
        .handle(ServiceRequest::Embed {
            text: "notice period".to_string(),
        })
        .await;
    let ServiceReply::Embedding { vector, model } = reply else {
        panic!("expected an embedding reply");
    };
    assert_eq!(model, "embedder");
    assert_eq!(vector.len(), 16);

    let reply = host.handle(score_request()).await;
    let ServiceReply::Scores { scores, model } = reply else {
        panic!("expected a scores reply");
    };
    assert_eq!(model, "utility");
    assert_eq!(scores.len(), 2);
    assert!(scores[0] > scores[1]);

    let prompt = "Answer concisely.\n\nContext passages:\n\
                  [1] (source: contract)\nThe notice period is thirty days.\n\
                  \nQuestion: What is the notice period?\nAnswer:";
    let reply = host
        .handle(ServiceRequest::Generate {
            prompt: prompt.to_string(),
            params: GenerationParams::default(),
        })
        .await;
    let ServiceReply::Generated { text, model } = reply else {
        panic!("expected a generated reply");
    };
    assert_eq!(model, "reasoner");
    assert!(text.contains("thirty days"));
}

#[tokio::test]
async fn scoring_the_same_request_twice_gives_identical_scores() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, _registry) = service(&dir);

    let first = host.handle(score_request()).await;
    let second = host.handle(score_request()).await;
    let ServiceReply::Scores { scores: a, .. } = first else {
        panic!("expected scores");
    };
    let ServiceReply::Scores { scores: b, .. } = second else {
        panic!("expected scores");
    };
    assert_eq!(a, b);
}

#[tokio::test]
async fn empty_chunk_lists_answer_without_loading_the_utility_model() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, registry) = service(&dir);

    let reply = host
        .handle(ServiceRequest::Score {
            question: "anything".to_string(),
            chunks: Vec::new(),
        })
        .await;
    let ServiceReply::Scores { scores, model } = reply else {
        panic!("expected scores");
    };
    assert!(scores.is_empty());
    assert_eq!(model, "utility");
    assert_eq!(registry.state("utility"), ModelState::Unloaded);
}

#[tokio::test]
async fn health_tracks_loaded_models_in_lru_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, _registry) = service(&dir);

    let before = host.health();
    assert!(before.ready);
    assert!(before.loaded_models.is_empty());

    host.handle(ServiceRequest::Embed {
        text: "warm the embedder".to_string(),
    })
    .await;
    host.handle(score_request()).await;

    let after = host.health();
    assert_eq!(
        after.loaded_models,
        vec!["embedder".to_string(), "utility".to_string()]
    );
    assert_eq!(after.memory.available_mb, 8_192);
}

#[tokio::test]
async fn eviction_over_the_wire_reports_prior_presence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, registry) = service(&dir);

    host.handle(ServiceRequest::Embed {
        text: "warm the embedder".to_string(),
    })
    .await;
    let reply = host
        .handle(ServiceRequest::Evict {
            model: "embedder".to_string(),
        })
        .await;
    assert!(matches!(
        reply,
        ServiceReply::Evicted { ref model, was_loaded: true } if model == "embedder"
    ));
    assert_eq!(registry.state("embedder"), ModelState::Unloaded);

    let reply = host
        .handle(ServiceRequest::Evict {
            model: "embedder".to_string(),
        })
        .await;
    assert!(matches!(reply, ServiceReply::Evicted { was_loaded: false, .. }));
}

#[tokio::test]
async fn missing_weights_surface_as_model_load_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, _registry) = service(&dir);
    std::fs::remove_file(dir.path().join("utility.gguf")).expect("remove weights");

    let reply = host.handle(score_request()).await;
    assert!(matches!(
        reply,
        ServiceReply::Error {
            kind: ServiceErrorKind::ModelLoad,
            ..
        }
    ));
}

#[tokio::test]
async fn shutdown_refuses_new_work_but_still_answers_health() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, _registry) = service(&dir);

    let reply = host.handle(ServiceRequest::Shutdown).await;
    assert!(matches!(reply, ServiceReply::ShuttingDown));

    let reply = host
        .handle(ServiceRequest::Embed {
            text: "too late".to_string(),
        })
        .await;
    assert!(matches!(
        reply,
        ServiceReply::Error {
            kind: ServiceErrorKind::InvalidRequest,
            ..
        }
    ));

    let reply = host.handle(ServiceRequest::Health).await;
    let ServiceReply::Health { probe } = reply else {
        panic!("expected a health reply");
    };
    assert!(!probe.ready);
}

#[tokio::test]
async fn the_embedded_transport_round_trips_and_closes_on_shutdown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, _registry) = service(&dir);
    let transport = InProcessTransport::new(host);

    let envelope = ServiceRequestEnvelope::new(ServiceRequest::Embed {
        text: "notice period".to_string(),
    });
    let request_id = envelope.id;
    let reply = transport.request(envelope).await.expect("request");
    assert_eq!(reply.id, request_id);
    assert!(matches!(reply.payload, ServiceReply::Embedding { .. }));
    assert!(transport.is_alive());
    assert!(transport.last_heartbeat().is_some());

    let reply = transport
        .request(ServiceRequestEnvelope::new(ServiceRequest::Shutdown))
        .await
        .expect("shutdown request");
    assert!(matches!(reply.payload, ServiceReply::ShuttingDown));
    assert!(!transport.is_alive());

    let err = transport
        .request(ServiceRequestEnvelope::new(ServiceRequest::Health))
        .await
        .expect_err("channel must be closed");
    assert!(matches!(err, TransportError::ChannelClosed));
}

#[tokio::test]
async fn the_embedded_transport_rejects_foreign_protocol_versions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, _registry) = service(&dir);
    let transport = InProcessTransport::new(host);

    let mut envelope = ServiceRequestEnvelope::new(ServiceRequest::Health);
    envelope.version = 99;
    let err = transport
        .request(envelope)
        .await
        .expect_err("version must be rejected");
    assert!(matches!(
        err,
        TransportError::Protocol(ProtocolError::Version { got: 99, .. })
    ));
}
