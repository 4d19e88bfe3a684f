mod common;

use std::{
    collections::BTreeMap,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use axum::body::Body;
use canopy::{
    GatewayError, RouterInstance,
    config::ServiceConfig,
    core::{
        middleware::{Middleware, Rejection},
        path_template::PathParams,
        resource::{BaseResource, Resource, ResourceError},
        router::{BindContext, DispatchTable, MountedResource, handler},
    },
};
use common::{TestGateway, body_string, config_with_routes};
use hyper::{Method, Request, Response, StatusCode, header::HeaderValue, http::request::Parts};
use serde_json::json;

/// Answers with its generation in the body.
struct Generation {
    base: BaseResource,
    generation: i64,
}

impl Resource for Generation {
    fn base(&self) -> &BaseResource {
        &self.base
    }

    fn add_handlers(
        self: Arc<Self>,
        mount: &str,
        table: &mut DispatchTable,
        _ctx: &BindContext,
    ) -> Result<(), ResourceError> {
        let generation = self.generation;
        table.handle(
            Method::GET,
            mount,
            self,
            handler(move |_req, _params| async move {
                tokio::task::yield_now().await;
                Response::new(Body::from(generation.to_string()))
            }),
        )
    }
}

/// Stamps its own generation on every response.
struct Stamp(i64);

impl Middleware for Stamp {
    fn handle(&self, _: &dyn Resource, _: &Parts, _: &PathParams) -> Result<(), Rejection> {
        Ok(())
    }

    fn on_response(&self, _: &dyn Resource, response: &mut Response<Body>) {
        response
            .headers_mut()
            .insert("x-generation", HeaderValue::from(self.0));
    }
}

fn generation_instance(generation: i64) -> Arc<RouterInstance> {
    Arc::new(RouterInstance::new(
        generation,
        vec![("stamp".to_string(), Arc::new(Stamp(generation)) as Arc<dyn Middleware>)],
        vec![MountedResource {
            route_id: "gen".to_string(),
            mount: "/gen".to_string(),
            resource: Arc::new(Generation {
                base: BaseResource::new("gen"),
                generation,
            }),
        }],
        BTreeMap::new(),
        &BindContext::detached(),
    ))
}

fn service(commit: &str) -> ServiceConfig {
    ServiceConfig {
        id: "svc".to_string(),
        remote: "https://example.com/svc.git".to_string(),
        commit_hash: commit.to_string(),
        build_command: None,
        start_command: None,
        stop_command: None,
    }
}

#[tokio::test]
async fn test_dispatch_before_first_publish_is_not_initialized() {
    let gw = TestGateway::new(&config_with_routes(1, json!([])));
    let req = Request::builder().uri("/admin/routes").body(Body::empty()).unwrap();
    assert!(matches!(
        gw.gateway.dispatch(req).await,
        Err(GatewayError::NotInitialized)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_publish_under_concurrent_dispatch_exposes_whole_instances() {
    let gw = TestGateway::new(&config_with_routes(0, json!([])));
    gw.gateway.publish(generation_instance(0)).await;

    let mut readers = Vec::new();
    for _ in 0..8 {
        let gateway = Arc::clone(&gw.gateway);
        readers.push(tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..200 {
                let req = Request::builder().uri("/gen").body(Body::empty()).unwrap();
                let response = gateway.dispatch(req).await.unwrap();
                assert_eq!(response.status(), StatusCode::OK);
                let stamped: i64 = response.headers()["x-generation"]
                    .to_str()
                    .unwrap()
                    .parse()
                    .unwrap();
                let body: i64 = body_string(response).await.parse().unwrap();
                assert_eq!(stamped, body, "middleware and handler from different instances");
                assert!(body >= last, "generation went backwards");
                last = body;
            }
        }));
    }

    for generation in 1..=50 {
        gw.gateway.publish(generation_instance(generation)).await;
        tokio::time::sleep(Duration::from_micros(200)).await;
    }

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(gw.gateway.current().unwrap().generation(), 50);
}

#[tokio::test]
async fn test_failed_reload_keeps_live_instance() {
    let gw = TestGateway::new(&config_with_routes(1, json!([])));
    assert_eq!(gw.gateway.reload().await.unwrap(), 1);

    let mut broken = config_with_routes(2, json!([]));
    broken.middleware.push("nope".to_string());
    gw.write_config(&broken);

    assert!(matches!(
        gw.gateway.reload().await,
        Err(GatewayError::Config(_))
    ));
    assert_eq!(gw.gateway.current().unwrap().generation(), 1);
    assert_eq!(gw.get("/admin/routes").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_services_are_ref_counted_across_reloads() {
    let mut config = config_with_routes(1, json!([]));
    config.services.push(service("abc123"));
    let gw = TestGateway::new(&config);
    let manager = Arc::clone(gw.gateway.store().service_manager());

    gw.gateway.reload().await.unwrap();
    assert_eq!(manager.ref_count("svc").await, 1);
    assert_eq!(gw.runtime.starts.load(Ordering::SeqCst), 1);

    // Same service in the next instance: started again, never stopped.
    config.last_updated = 2;
    gw.write_config(&config);
    gw.gateway.reload().await.unwrap();
    assert_eq!(manager.ref_count("svc").await, 1);
    assert_eq!(gw.runtime.starts.load(Ordering::SeqCst), 2);
    assert_eq!(gw.runtime.stops.load(Ordering::SeqCst), 0);
    assert_eq!(gw.runtime.builds.load(Ordering::SeqCst), 1);
    assert_eq!(gw.source.checkouts.load(Ordering::SeqCst), 1);

    let live = gw.gateway.current().unwrap();
    assert_eq!(live.service("svc").unwrap().status().to_string(), "started");

    let view: serde_json::Value =
        serde_json::from_str(&body_string(gw.get("/admin/service/svc").await).await).unwrap();
    assert_eq!(view["Status"], "started");
    assert_eq!(view["RefCount"], 1);
    drop(live);

    // Dropping the service from the config stops it exactly once.
    config.last_updated = 3;
    config.services.clear();
    gw.write_config(&config);
    gw.gateway.reload().await.unwrap();
    assert_eq!(manager.ref_count("svc").await, 0);
    assert_eq!(gw.runtime.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_new_commit_checks_out_and_rebuilds() {
    let mut config = config_with_routes(1, json!([]));
    config.services.push(service("abc123"));
    let gw = TestGateway::new(&config);
    gw.gateway.reload().await.unwrap();

    config.last_updated = 2;
    config.services = vec![service("def456")];
    gw.write_config(&config);
    gw.gateway.reload().await.unwrap();

    assert_eq!(gw.source.checkouts.load(Ordering::SeqCst), 2);
    assert_eq!(gw.runtime.builds.load(Ordering::SeqCst), 2);
    assert_eq!(gw.runtime.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let mut config = config_with_routes(1, json!([]));
    config.services.push(service("abc123"));
    let gw = TestGateway::new(&config);
    gw.gateway.reload().await.unwrap();

    gw.gateway.shutdown().await;
    assert!(gw.gateway.current().is_none());
    assert_eq!(gw.runtime.stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        gw.gateway.store().service_manager().ref_count("svc").await,
        0
    );
}
