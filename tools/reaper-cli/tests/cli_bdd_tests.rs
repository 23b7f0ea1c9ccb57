//! BDD tests for the CLI's wire contract with the control plane: the
//! `{success, data?, error?}` envelope and endpoint paths from spec §6 that
//! every `reaper` subcommand depends on.

use axum::routing::get;
use axum::{Json, Router};
use cucumber::{given, then, when, World};
use reaper_core::endpoints;
use serde_json::{json, Value};

#[derive(Debug, World)]
#[world(init = Self::new)]
struct CliWorld {
    base_url: Option<String>,
    response: Option<Value>,
}

impl CliWorld {
    fn new() -> Self {
        Self {
            base_url: None,
            response: None,
        }
    }
}

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[given("a control plane that lists one policy")]
async fn given_plane_lists_one_policy(world: &mut CliWorld) {
    let router = Router::new().route(
        endpoints::API_V1_POLICIES,
        get(|| async { Json(json!({"success": true, "data": [{"name": "doc-policy"}]})) }),
    );
    world.base_url = Some(spawn_server(router).await);
}

#[given("a control plane that reports a not-found error")]
async fn given_plane_reports_error(world: &mut CliWorld) {
    let router = Router::new().route(
        &format!("{}/{{name}}", endpoints::API_V1_POLICIES),
        get(|| async {
            (
                axum::http::StatusCode::NOT_FOUND,
                Json(json!({"success": false, "error": {"code": "NotFound", "message": "policy missing-policy not found"}})),
            )
        }),
    );
    world.base_url = Some(spawn_server(router).await);
}

#[when("the CLI lists policies")]
async fn when_cli_lists_policies(world: &mut CliWorld) {
    let url = format!(
        "{}{}",
        world.base_url.as_ref().unwrap(),
        endpoints::API_V1_POLICIES
    );
    let resp = reqwest::get(url).await.unwrap();
    world.response = Some(resp.json().await.unwrap());
}

#[when("the CLI shows a missing policy")]
async fn when_cli_shows_missing_policy(world: &mut CliWorld) {
    let url = format!(
        "{}{}/missing-policy",
        world.base_url.as_ref().unwrap(),
        endpoints::API_V1_POLICIES
    );
    let resp = reqwest::get(url).await.unwrap();
    world.response = Some(resp.json().await.unwrap());
}

#[then(regex = r#"^the envelope should report success with (\d+) polic(?:y|ies)$"#)]
async fn then_envelope_success_count(world: &mut CliWorld, count: usize) {
    let body = world.response.as_ref().unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"].as_array().unwrap().len(), count);
}

#[then(regex = r#"^the envelope should report a "(.*)" error$"#)]
async fn then_envelope_error_code(world: &mut CliWorld, code: String) {
    let body = world.response.as_ref().unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!(code));
}

#[tokio::main]
async fn main() {
    CliWorld::run("tests/features").await;
}
