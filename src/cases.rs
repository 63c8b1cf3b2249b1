//! Registered integration test cases
//!
//! These bodies are fixtures of the engine, not part of it: each one drives
//! the running server through the bound client and reports a verdict. To
//! add a case, write an async fn with the body signature and register it in
//! [`register_all`].

use std::collections::HashSet;
use std::time::{Duration, Instant};

use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::warn;

use crate::client::{Checks, RequestClient};
use crate::config::TestConfig;
use crate::error::{E2eError, E2eResult};
use crate::fixture::ServerFixture;
use crate::registry::Registry;

const DEFAULT_CONF: &str = "configs/default.conf";
const STATIC_CONF: &str = "configs/static.conf";
const CRUD_CONF: &str = "configs/crud.conf";
const LINK_CONF: &str = "configs/link.conf";

/// Every config in `configs/` declares this port.
const PORT: u16 = 8080;

/// Register the full suite, in the order it should run.
pub fn register_all(registry: &mut Registry) -> E2eResult<()> {
    registry.register(
        "basic_http_request",
        TestConfig::from_file(DEFAULT_CONF, PORT),
        |f, c| basic_http_request(f, c).boxed(),
    )?;
    registry.register(
        "static_file_serving",
        TestConfig::from_file(STATIC_CONF, PORT),
        |f, c| static_file_serving(f, c).boxed(),
    )?;
    registry.register(
        "multiple_requests",
        TestConfig::from_file(DEFAULT_CONF, PORT),
        |f, c| multiple_requests(f, c).boxed(),
    )?;
    registry.register(
        "unmatched_route_returns_404",
        TestConfig::from_file(STATIC_CONF, PORT),
        |f, c| unmatched_route_returns_404(f, c).boxed(),
    )?;
    registry.register(
        "longest_prefix_routing",
        TestConfig::inline(LONGEST_PREFIX_CONFIG, PORT),
        |f, c| longest_prefix_routing(f, c).boxed(),
    )?;
    registry.register(
        "static_missing_root_skips_route",
        TestConfig::inline(MISSING_ROOT_CONFIG, PORT),
        |f, c| static_missing_root_skips_route(f, c).boxed(),
    )?;
    registry.register(
        "static_traversal_blocked",
        TestConfig::from_file(STATIC_CONF, PORT),
        |f, c| static_traversal_blocked(f, c).boxed(),
    )?;
    registry.register(
        "crud_lifecycle",
        TestConfig::from_file(CRUD_CONF, PORT),
        |f, c| crud_lifecycle(f, c).boxed(),
    )?;
    registry.register(
        "crud_malformed_json_accepted",
        TestConfig::from_file(CRUD_CONF, PORT),
        |f, c| crud_malformed_json_accepted(f, c).boxed(),
    )?;
    registry.register(
        "crud_get_nonexistent",
        TestConfig::from_file(CRUD_CONF, PORT),
        |f, c| crud_get_nonexistent(f, c).boxed(),
    )?;
    registry.register(
        "crud_delete_nonexistent",
        TestConfig::from_file(CRUD_CONF, PORT),
        |f, c| crud_delete_nonexistent(f, c).boxed(),
    )?;
    registry.register(
        "crud_put_nonexistent",
        TestConfig::from_file(CRUD_CONF, PORT),
        |f, c| crud_put_nonexistent(f, c).boxed(),
    )?;
    registry.register(
        "crud_double_delete",
        TestConfig::from_file(CRUD_CONF, PORT),
        |f, c| crud_double_delete(f, c).boxed(),
    )?;
    registry.register(
        "crud_concurrent_id_generation",
        TestConfig::from_file(CRUD_CONF, PORT),
        |f, c| crud_concurrent_id_generation(f, c).boxed(),
    )?;
    registry.register(
        "crud_entity_type_isolation",
        TestConfig::from_file(CRUD_CONF, PORT),
        |f, c| crud_entity_type_isolation(f, c).boxed(),
    )?;
    registry.register(
        "sleep_allows_concurrent_requests",
        TestConfig::from_file(DEFAULT_CONF, PORT),
        |f, c| sleep_allows_concurrent_requests(f, c).boxed(),
    )?;
    registry.register(
        "link_redirect_flow",
        TestConfig::from_file(LINK_CONF, PORT),
        |f, c| link_redirect_flow(f, c).boxed(),
    )?;
    registry.register(
        "link_analytics",
        TestConfig::from_file(LINK_CONF, PORT),
        |f, c| link_analytics(f, c).boxed(),
    )?;
    Ok(())
}

const LONGEST_PREFIX_CONFIG: &str = r#"server {
  listen 8080;

  location / {
    handler echo;
  }

  location /static {
    handler static;
    root ../static_files;
  }

  location /static/images {
    handler echo;
  }
}
"#;

const MISSING_ROOT_CONFIG: &str = r#"server {
  listen 8080;

  location /echo {
    handler echo;
  }

  location /static {
    handler static;
    # intentionally missing root
  }
}
"#;

/// Entity ids may come back as JSON numbers or strings; either way they end
/// up in a URL path.
fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Remove a server-side state directory left over from a previous run.
///
/// The server resolves relative data paths against its own directory, so
/// the path is derived from the binary location rather than the harness
/// working directory.
fn reset_state_dir(fixture: &ServerFixture, relative: &str) {
    let Some(dir) = fixture.binary_path().parent().map(|p| p.join(relative)) else {
        return;
    };
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            warn!("failed to reset state dir {}: {}", dir.display(), e);
        }
    }
}

async fn basic_http_request(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let response = client.get("/").await?;
    let mut checks = Checks::new();
    checks.status(&response, 200);
    Ok(checks.ok())
}

/// Existing files come back with the right type and body, a missing file is
/// a 404, and the echo route keeps working alongside the static one.
async fn static_file_serving(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let mut checks = Checks::new();

    let note = client.get("/static/note.txt").await?;
    checks.status(&note, 200);
    checks.header(&note, "Content-Type", "text/plain");
    let note_body = note.text().await?;
    checks.contains(&note_body, "alpha\nbeta\ngamma");

    let hello = client.get("/static/hello.html").await?;
    checks.status(&hello, 200);
    checks.header(&hello, "Content-Type", "text/html");
    let hello_body = hello.text().await?;
    checks.contains(&hello_body, "<h1>Hello</h1>");

    let missing = client.get("/static/notfound.txt").await?;
    checks.status(&missing, 404);

    let echo = client.get("/echo").await?;
    checks.status(&echo, 200);

    Ok(checks.ok())
}

async fn multiple_requests(_fixture: &ServerFixture, client: &RequestClient) -> E2eResult<bool> {
    let mut checks = Checks::new();
    for _ in 0..5 {
        let response = client.get("/").await?;
        checks.status(&response, 200);
    }
    Ok(checks.ok())
}

async fn unmatched_route_returns_404(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let response = client.get("/no-such-path").await?;
    let mut checks = Checks::new();
    checks.status(&response, 404);
    Ok(checks.ok())
}

/// `/static/images` must win over `/static` for paths under both.
async fn longest_prefix_routing(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let response = client.get("/static/images/pic.jpg").await?;
    let mut checks = Checks::new();
    checks.status(&response, 200);
    Ok(checks.ok())
}

/// A static location without a root is skipped at dispatch time; the rest
/// of the routing table is unaffected.
async fn static_missing_root_skips_route(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let mut checks = Checks::new();

    let echo = client.get("/echo").await?;
    checks.status(&echo, 200);

    let skipped = client.get("/static/anything.txt").await?;
    checks.status(&skipped, 404);

    Ok(checks.ok())
}

async fn static_traversal_blocked(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let mut checks = Checks::new();

    let plain = client.get("/static/../../etc/passwd").await?;
    checks.status(&plain, 404);

    // The encoded form reaches the server with the dot segments intact.
    let encoded = client.get("/static/..%2F..%2Fsecret.txt").await?;
    checks.status(&encoded, 404);

    Ok(checks.ok())
}

/// Create, retrieve, verify, delete, verify deletion.
async fn crud_lifecycle(fixture: &ServerFixture, client: &RequestClient) -> E2eResult<bool> {
    reset_state_dir(fixture, "tmp/crud_data/TestEntity");

    let mut checks = Checks::new();

    let create = client
        .post_json(
            "/api/TestEntity",
            &json!({"name": "test_item", "value": "integration_check"}),
        )
        .await?;
    if !checks.status(&create, 200) {
        return Ok(false);
    }
    let created: Value = create.json().await?;
    let Some(id) = created.get("id").map(id_string) else {
        warn!("create response missing 'id': {}", created);
        return Ok(false);
    };
    let entity_path = format!("/api/TestEntity/{}", id);

    let retrieve = client.get(&entity_path).await?;
    if !checks.status(&retrieve, 200) {
        return Ok(false);
    }
    let retrieved: Value = retrieve.json().await?;
    checks.check(
        retrieved.get("name") == Some(&json!("test_item")),
        format!("retrieved entity has wrong name: {}", retrieved),
    );
    checks.check(
        retrieved.get("value") == Some(&json!("integration_check")),
        format!("retrieved entity has wrong value: {}", retrieved),
    );

    let delete = client.delete(&entity_path).await?;
    checks.status(&delete, 200);

    let verify = client.get(&entity_path).await?;
    checks.status(&verify, 404);

    Ok(checks.ok())
}

/// The server stores bodies as-is; malformed JSON is still a 200.
async fn crud_malformed_json_accepted(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let malformed = r#"{"name": "test", "value": incomplete"#;
    let response = client
        .request(Method::POST, "/api/TestEntity")
        .header(CONTENT_TYPE, "application/json")
        .body(malformed)
        .send()
        .await?;

    let mut checks = Checks::new();
    checks.status(&response, 200);

    // Best-effort cleanup of whatever got stored.
    if let Ok(body) = response.json::<Value>().await {
        if let Some(id) = body.get("id").map(|v| id_string(v)) {
            let _ = client.delete(&format!("/api/TestEntity/{}", id)).await;
        }
    }

    Ok(checks.ok())
}

async fn crud_get_nonexistent(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let response = client.get("/api/TestEntity/999999").await?;
    let mut checks = Checks::new();
    checks.status(&response, 404);
    Ok(checks.ok())
}

/// DELETE of a missing id is idempotent: the desired state already holds.
async fn crud_delete_nonexistent(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let response = client.delete("/api/TestEntity/999999").await?;
    let mut checks = Checks::new();
    checks.status(&response, 200);
    Ok(checks.ok())
}

/// PUT to a missing id: 404 (must exist) and 200/201 (upsert) are both
/// accepted REST shapes; anything else fails.
async fn crud_put_nonexistent(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let response = client
        .put_json(
            "/api/TestEntity/888888",
            &json!({"name": "new_item", "value": "put_to_nonexistent"}),
        )
        .await?;
    let status = response.status().as_u16();

    let mut checks = Checks::new();
    checks.check(
        [200, 201, 404].contains(&status),
        format!("expected 200/201/404 for PUT to a missing id, got {}", status),
    );

    if [200, 201].contains(&status) {
        // Upsert implementations created the entity; remove it again.
        let verify = client.get("/api/TestEntity/888888").await?;
        if verify.status().as_u16() == 200 {
            let _ = client.delete("/api/TestEntity/888888").await;
        }
    }

    Ok(checks.ok())
}

async fn crud_double_delete(fixture: &ServerFixture, client: &RequestClient) -> E2eResult<bool> {
    reset_state_dir(fixture, "tmp/crud_data/TestEntity");

    let mut checks = Checks::new();

    let create = client
        .post_json("/api/TestEntity", &json!({"name": "temp", "value": "delete_me"}))
        .await?;
    if !checks.status(&create, 200) {
        return Ok(false);
    }
    let created: Value = create.json().await?;
    let Some(id) = created.get("id").map(id_string) else {
        warn!("create response missing 'id': {}", created);
        return Ok(false);
    };
    let entity_path = format!("/api/TestEntity/{}", id);

    let first = client.delete(&entity_path).await?;
    checks.status(&first, 200);

    let second = client.delete(&entity_path).await?;
    checks.status(&second, 200);

    Ok(checks.ok())
}

/// Concurrent POSTs must allocate pairwise-distinct ids. This validates the
/// server's id allocation under concurrent writes; the workers are joined
/// to completion before any assertion is evaluated.
async fn crud_concurrent_id_generation(
    fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    reset_state_dir(fixture, "tmp/crud_data/TestEntity");

    const WORKERS: usize = 10;
    let mut workers = JoinSet::new();
    for i in 0..WORKERS {
        let client = client.clone();
        workers.spawn(async move {
            let response = client
                .post_json(
                    "/api/TestEntity",
                    &json!({
                        "name": format!("concurrent_{}", i),
                        "value": format!("worker_{}", i),
                    }),
                )
                .await?;
            if response.status().as_u16() != 200 {
                warn!("worker {} got status {}", i, response.status());
                return Ok(None);
            }
            let body: Value = response.json().await?;
            Ok::<_, E2eError>(body.get("id").map(id_string))
        });
    }

    let mut ids = Vec::new();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(Some(id))) => ids.push(id),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("worker request failed: {}", e),
            Err(e) => warn!("worker panicked: {}", e),
        }
    }

    let mut checks = Checks::new();
    checks.check(
        ids.len() == WORKERS,
        format!("expected {} created entities, got {}", WORKERS, ids.len()),
    );
    let unique: HashSet<&String> = ids.iter().collect();
    checks.check(
        unique.len() == ids.len(),
        format!("expected pairwise-distinct ids, got {:?}", ids),
    );

    for id in &ids {
        let _ = client.delete(&format!("/api/TestEntity/{}", id)).await;
    }

    Ok(checks.ok())
}

/// Different entity types keep separate id spaces and never leak each
/// other's data.
async fn crud_entity_type_isolation(
    fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    reset_state_dir(fixture, "tmp/crud_data/Books");
    reset_state_dir(fixture, "tmp/crud_data/Shoes");

    let mut checks = Checks::new();

    let books = client
        .post_json("/api/Books", &json!({"title": "1984", "author": "Orwell"}))
        .await?;
    if !checks.status(&books, 200) {
        return Ok(false);
    }
    let books_created: Value = books.json().await?;
    let Some(books_id) = books_created.get("id").map(id_string) else {
        warn!("Books create response missing 'id': {}", books_created);
        return Ok(false);
    };

    let shoes = client
        .post_json("/api/Shoes", &json!({"brand": "Nike", "size": 10}))
        .await?;
    if !checks.status(&shoes, 200) {
        return Ok(false);
    }
    let shoes_created: Value = shoes.json().await?;
    let Some(shoes_id) = shoes_created.get("id").map(id_string) else {
        warn!("Shoes create response missing 'id': {}", shoes_created);
        return Ok(false);
    };

    let books_get = client.get(&format!("/api/Books/{}", books_id)).await?;
    checks.status(&books_get, 200);
    let books_retrieved: Value = books_get.json().await?;
    checks.check(
        books_retrieved.get("title") == Some(&json!("1984")),
        format!("Books entity has wrong data: {}", books_retrieved),
    );

    let shoes_get = client.get(&format!("/api/Shoes/{}", shoes_id)).await?;
    checks.status(&shoes_get, 200);
    let shoes_retrieved: Value = shoes_get.json().await?;
    checks.check(
        shoes_retrieved.get("brand") == Some(&json!("Nike")),
        format!("Shoes entity has wrong data: {}", shoes_retrieved),
    );

    if books_id == shoes_id {
        // Shared numeric ids are fine as long as the types stay isolated.
        checks.check(
            books_retrieved.get("brand").is_none(),
            "Books entity returned Shoes data".to_string(),
        );
    }

    let _ = client.delete(&format!("/api/Books/{}", books_id)).await;
    let _ = client.delete(&format!("/api/Shoes/{}", shoes_id)).await;

    Ok(checks.ok())
}

/// A long-running `/sleep` request must not block a fast request: both
/// workers are joined before the timing assertions run.
async fn sleep_allows_concurrent_requests(
    _fixture: &ServerFixture,
    client: &RequestClient,
) -> E2eResult<bool> {
    let mut workers = JoinSet::new();

    let slow_client = client.clone();
    workers.spawn(async move {
        let start = Instant::now();
        let response = slow_client.get("/sleep").await?;
        Ok::<_, E2eError>(("sleep", response.status().as_u16(), start.elapsed()))
    });

    // Head start so the slow request is definitely in flight first.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let fast_client = client.clone();
    workers.spawn(async move {
        let start = Instant::now();
        let response = fast_client.get("/").await?;
        Ok::<_, E2eError>(("fast", response.status().as_u16(), start.elapsed()))
    });

    let mut sleep_result = None;
    let mut fast_result = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(("sleep", status, elapsed))) => sleep_result = Some((status, elapsed)),
            Ok(Ok((_, status, elapsed))) => fast_result = Some((status, elapsed)),
            Ok(Err(e)) => warn!("request failed: {}", e),
            Err(e) => warn!("worker panicked: {}", e),
        }
    }

    let (Some((sleep_status, sleep_elapsed)), Some((fast_status, fast_elapsed))) =
        (sleep_result, fast_result)
    else {
        warn!("one of the requests did not complete");
        return Ok(false);
    };

    let mut checks = Checks::new();
    checks.check(
        sleep_status == 200,
        format!("expected 200 from /sleep, got {}", sleep_status),
    );
    checks.check(
        fast_status == 200,
        format!("expected 200 from /, got {}", fast_status),
    );
    // The sleep handler holds its request for ~2s.
    checks.check(
        sleep_elapsed >= Duration::from_millis(1800),
        format!("expected /sleep to take at least ~1.8s, took {:?}", sleep_elapsed),
    );
    checks.check(
        fast_elapsed + Duration::from_millis(500) < sleep_elapsed,
        format!(
            "expected the fast request to finish well before /sleep (fast {:?}, sleep {:?})",
            fast_elapsed, sleep_elapsed
        ),
    );
    checks.check(
        fast_elapsed < Duration::from_secs(2),
        format!("expected the fast request to finish in under 2s, took {:?}", fast_elapsed),
    );

    Ok(checks.ok())
}

/// Create a short link, then follow its code to a 302 with the exact
/// target in `Location`. The client never follows redirects, so the 302 is
/// observable directly.
async fn link_redirect_flow(fixture: &ServerFixture, client: &RequestClient) -> E2eResult<bool> {
    reset_state_dir(fixture, "tmp/link_data");

    let mut checks = Checks::new();

    let create = client
        .post_json("/api/link", &json!({"url": "https://example.com"}))
        .await?;
    if !checks.status(&create, 200) {
        return Ok(false);
    }
    let created: Value = create.json().await?;
    let Some(code) = created.get("code").and_then(Value::as_str) else {
        warn!("create response missing 'code': {}", created);
        return Ok(false);
    };

    let redirect = client.get(&format!("/l/{}", code)).await?;
    checks.status(&redirect, 302);
    checks.header(&redirect, "Location", "https://example.com");

    Ok(checks.ok())
}

/// Visit counters start at zero, count each redirect, and feed the
/// leaderboard.
async fn link_analytics(fixture: &ServerFixture, client: &RequestClient) -> E2eResult<bool> {
    reset_state_dir(fixture, "tmp/link_data");

    let mut checks = Checks::new();

    let create = client
        .post_json("/api/link", &json!({"url": "https://example.com"}))
        .await?;
    if !checks.status(&create, 200) {
        return Ok(false);
    }
    let created: Value = create.json().await?;
    let Some(code) = created.get("code").and_then(Value::as_str) else {
        warn!("create response missing 'code': {}", created);
        return Ok(false);
    };

    let before = client.get(&format!("/analytics/{}", code)).await?;
    if !checks.status(&before, 200) {
        return Ok(false);
    }
    let before_body: Value = before.json().await?;
    checks.check(
        before_body.get("visits") == Some(&json!(0)),
        format!("expected zero visits before redirect: {}", before_body),
    );
    checks.check(
        before_body.get("url_visits") == Some(&json!(0)),
        format!("expected zero url visits before redirect: {}", before_body),
    );

    let redirect = client.get(&format!("/l/{}", code)).await?;
    checks.status(&redirect, 302);

    let after = client.get(&format!("/analytics/{}", code)).await?;
    if !checks.status(&after, 200) {
        return Ok(false);
    }
    let after_body: Value = after.json().await?;
    checks.check(
        after_body.get("visits") == Some(&json!(1)),
        format!("expected one visit after redirect: {}", after_body),
    );
    checks.check(
        after_body.get("url_visits") == Some(&json!(1)),
        format!("expected one url visit after redirect: {}", after_body),
    );

    let leaderboard = client.get("/analytics/top/1").await?;
    checks.status(&leaderboard, 200);
    let entries: Value = leaderboard.json().await?;
    checks.check(
        entries
            .as_array()
            .and_then(|a| a.first())
            .and_then(|e| e.get("url"))
            .and_then(Value::as_str)
            == Some("https://example.com"),
        format!("leaderboard did not include the visited url: {}", entries),
    );

    Ok(checks.ok())
}
