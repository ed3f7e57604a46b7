mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use common::{bearer, TestEnv};
use serde_json::{json, Value};

macro_rules! send {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

#[actix_web::test]
async fn health_and_public_posts_need_no_token() {
    let env = TestEnv::new();
    let app = test_app!(env);

    let (status, body) = send!(app, test::TestRequest::get().uri("/api/health"));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send!(app, test::TestRequest::get().uri("/api/public/posts"));
    assert_eq!(status, StatusCode::OK);
    let posts = body["data"].as_array().unwrap();
    assert!(!posts.is_empty());
    assert!(posts.iter().all(|p| p["status"] == "PUBLISHED"));
}

#[actix_web::test]
async fn missing_or_wrong_credentials_are_rejected() {
    let env = TestEnv::new();
    let app = test_app!(env);

    let (status, body) = send!(app, test::TestRequest::get().uri("/api/tags"));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "username": "admin", "password": "wrong" }))
    );
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let user_token = login!(app, "testuser", "test123");
    let (status, _) = send!(app, test::TestRequest::get().uri("/api/push/tasks").insert_header(bearer(&user_token)));
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn deactivated_users_lose_their_sessions() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let admin = login!(app, "admin", "admin123");
    let user_token = login!(app, "testuser", "test123");

    let (_, body) = send!(
        app,
        test::TestRequest::get().uri("/api/users?search=testuser").insert_header(bearer(&admin))
    );
    let user_id = body["data"][0]["id"].as_i64().unwrap();

    let (status, body) = send!(
        app,
        test::TestRequest::put()
            .uri(&format!("/api/users/{}", user_id))
            .insert_header(bearer(&admin))
            .set_json(json!({ "isActive": false }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isActive"], false);

    let (_, body) = send!(
        app,
        test::TestRequest::get().uri(&format!("/api/users/{}", user_id)).insert_header(bearer(&admin))
    );
    assert_eq!(body["data"]["isActive"], false);

    let (status, _) = send!(app, test::TestRequest::get().uri("/api/auth/profile").insert_header(bearer(&user_token)));
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "username": "testuser", "password": "test123" }))
    );
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn user_list_has_seeded_accounts_and_drops_deleted_users() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let admin = login!(app, "admin", "admin123");

    let (status, body) = send!(app, test::TestRequest::get().uri("/api/users").insert_header(bearer(&admin)));
    assert_eq!(status, StatusCode::OK);
    let usernames: Vec<&str> = body["data"].as_array().unwrap().iter().filter_map(|u| u["username"].as_str()).collect();
    assert!(usernames.contains(&"admin"));
    assert!(usernames.contains(&"testuser"));
    assert_eq!(body["pagination"]["total"], 2);

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/users")
            .insert_header(bearer(&admin))
            .set_json(json!({ "username": "temp_editor", "email": "temp@example.com", "password": "secret123" }))
    );
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let user_id = body["data"]["id"].as_i64().unwrap();

    let (status, _) = send!(
        app,
        test::TestRequest::delete().uri(&format!("/api/users/{}", user_id)).insert_header(bearer(&admin))
    );
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send!(app, test::TestRequest::get().uri("/api/users?pageSize=100").insert_header(bearer(&admin)));
    let usernames: Vec<&str> = body["data"].as_array().unwrap().iter().filter_map(|u| u["username"].as_str()).collect();
    assert!(!usernames.contains(&"temp_editor"));
    assert_eq!(body["pagination"]["total"], 2);

    let (status, _) = send!(
        app,
        test::TestRequest::get().uri(&format!("/api/users/{}", user_id)).insert_header(bearer(&admin))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn deleted_posts_leave_both_listings() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let admin = login!(app, "admin", "admin123");

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/posts")
            .insert_header(bearer(&admin))
            .set_json(json!({ "title": "Quarterly results", "content": "Numbers are up.", "status": "PUBLISHED" }))
    );
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let post_id = body["data"]["id"].as_i64().unwrap();

    let (_, body) = send!(app, test::TestRequest::get().uri("/api/public/posts?pageSize=100"));
    assert!(body["data"].as_array().unwrap().iter().any(|p| p["id"] == post_id));

    let (status, _) = send!(
        app,
        test::TestRequest::delete().uri(&format!("/api/posts/{}", post_id)).insert_header(bearer(&admin))
    );
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send!(app, test::TestRequest::get().uri("/api/posts?pageSize=100").insert_header(bearer(&admin)));
    assert!(!body["data"].as_array().unwrap().iter().any(|p| p["id"] == post_id));
    let (_, body) = send!(app, test::TestRequest::get().uri("/api/public/posts?pageSize=100"));
    assert!(!body["data"].as_array().unwrap().iter().any(|p| p["id"] == post_id));

    let (status, _) = send!(app, test::TestRequest::get().uri(&format!("/api/public/posts/{}", post_id)));
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// A `category` + `file` form body with a fixed boundary.
fn upload_form(category: &str, filename: &str, content_type: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary = "opsdesk-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"category\"\r\n\r\n{c}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: {t}\r\n\r\n",
            b = boundary,
            c = category,
            f = filename,
            t = content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (format!("multipart/form-data; boundary={}", boundary), body)
}

#[actix_web::test]
async fn uploads_store_images_under_their_category() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let token = login!(app, "testuser", "test123");
    let png = b"\x89PNG\r\n\x1a\nfake-image-bytes";

    let (content_type, body) = upload_form("news_image", "cover.png", "image/png", png);
    let (status, json_body) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/uploads")
            .insert_header(bearer(&token))
            .insert_header(("content-type", content_type))
            .set_payload(body)
    );
    assert_eq!(status, StatusCode::CREATED, "{}", json_body);
    assert_eq!(json_body["data"]["category"], "news_image");
    assert_eq!(json_body["data"]["originalFilename"], "cover.png");
    assert_eq!(json_body["data"]["size"], png.len());
    let url = json_body["data"]["url"].as_str().unwrap();
    let stored_name = url.rsplit('/').next().unwrap();
    let stored = env.config.uploads_dir().join("news_image").join(stored_name);
    assert_eq!(std::fs::read(stored).unwrap(), png.to_vec());

    let (content_type, body) = upload_form("news_image", "report.pdf", "application/pdf", b"%PDF-1.4");
    let (status, _) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/uploads")
            .insert_header(bearer(&token))
            .insert_header(("content-type", content_type))
            .set_payload(body)
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long_category = "x".repeat(4096);
    let (content_type, body) = upload_form(&long_category, "cover.png", "image/png", png);
    let (status, json_body) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/uploads")
            .insert_header(bearer(&token))
            .insert_header(("content-type", content_type))
            .set_payload(body)
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body["message"], "The category field is too long.");
}

#[actix_web::test]
async fn tags_are_unique_and_deletable() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let admin = login!(app, "admin", "admin123");

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/tags")
            .insert_header(bearer(&admin))
            .set_json(json!({ "name": "Release", "color": "#ff0000" }))
    );
    assert_eq!(status, StatusCode::CREATED);
    let tag_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/tags")
            .insert_header(bearer(&admin))
            .set_json(json!({ "name": "Release", "color": "#00ff00" }))
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let (status, _) = send!(
        app,
        test::TestRequest::delete().uri(&format!("/api/tags/{}", tag_id)).insert_header(bearer(&admin))
    );
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send!(app, test::TestRequest::get().uri("/api/tags?pageSize=100").insert_header(bearer(&admin)));
    let names: Vec<&str> = body["data"].as_array().unwrap().iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(!names.contains(&"Release"));
}

#[actix_web::test]
async fn list_pages_are_clamped() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let admin = login!(app, "admin", "admin123");

    let (_, body) = send!(app, test::TestRequest::get().uri("/api/tags?pageSize=1").insert_header(bearer(&admin)));
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["totalPages"], 3);

    let (_, body) = send!(app, test::TestRequest::get().uri("/api/tags?pageSize=1000").insert_header(bearer(&admin)));
    assert_eq!(body["pagination"]["pageSize"], 100);

    let (status, body) = send!(app, test::TestRequest::get().uri("/api/tags?page=abc").insert_header(bearer(&admin)));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[actix_web::test]
async fn push_task_runs_once_against_active_tokens() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let admin = login!(app, "admin", "admin123");

    macro_rules! create {
        ($uri:expr, $body:expr) => {{
            let (status, body) = send!(
                app,
                test::TestRequest::post().uri($uri).insert_header(bearer(&admin)).set_json($body)
            );
            assert_eq!(status, StatusCode::CREATED, "{}", body);
            body["data"]["id"].as_i64().unwrap()
        }};
    }

    let config_id = create!(
        "/api/push/configs",
        json!({ "name": "hook", "provider": "webhook", "endpointUrl": "http://127.0.0.1:9/push" })
    );
    let audience_id = create!("/api/push/audiences", json!({ "name": "beta" }));
    create!("/api/push/tokens", json!({ "token": "tok-1", "platform": "android", "audienceIds": [audience_id] }));
    create!("/api/push/tokens", json!({ "token": "tok-2", "platform": "ios", "audienceIds": [audience_id] }));
    create!(
        "/api/push/tokens",
        json!({ "token": "tok-3", "platform": "web", "isActive": false, "audienceIds": [audience_id] })
    );
    let template_id = create!(
        "/api/push/templates",
        json!({
            "name": "welcome",
            "title": "Hi",
            "body": "Hello there",
            "payload": { "screen": "home" },
            "audienceId": audience_id,
            "configId": config_id
        })
    );
    let task_id = create!("/api/push/tasks", json!({ "templateId": template_id }));

    let execute = format!("/api/push/tasks/{}/execute", task_id);
    let (status, body) = send!(app, test::TestRequest::post().uri(&execute).insert_header(bearer(&admin)));
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["totalCount"], 2);
    assert_eq!(body["data"]["successCount"], 2);

    let batches = env.sender.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 1);
    assert!(!batches[0].contains(&"tok-3".to_string()));

    let (status, body) = send!(app, test::TestRequest::post().uri(&execute).insert_header(bearer(&admin)));
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[actix_web::test]
async fn push_templates_require_object_payloads() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let admin = login!(app, "admin", "admin123");

    let (status, _) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/push/templates")
            .insert_header(bearer(&admin))
            .set_json(json!({ "name": "x", "title": "t", "body": "b", "payload": [1, 2], "audienceId": 1, "configId": 1 }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn attribution_query_and_export() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let admin = login!(app, "admin", "admin123");
    let query = json!({
        "dataSource": "adjust",
        "startDate": "2000-01-01",
        "endDate": "2100-01-01",
        "mediaSources": ["facebook"],
        "events": ["install", "loan"],
        "funnels": [{ "name": "install to loan", "steps": ["install", "loan"] }]
    });

    let (status, body) = send!(
        app,
        test::TestRequest::post().uri("/api/reports/attribution/query").insert_header(bearer(&admin)).set_json(&query)
    );
    assert_eq!(status, StatusCode::OK, "{}", body);
    let rows = body["data"].as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|r| r["mediaSource"] == "facebook" && r["dataSource"] == "adjust"));

    let (status, _) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/reports/attribution/query")
            .insert_header(bearer(&admin))
            .set_json(json!({ "dataSource": "adjust", "startDate": "2024-05-08", "endDate": "2024-05-01" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/reports/attribution/export")
            .insert_header(bearer(&admin))
            .set_json(&query)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("content-type").unwrap().to_str().unwrap().starts_with("text/csv"));
    let csv = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    let header = csv.lines().next().unwrap();
    assert_eq!(header, "Date,Data Source,Media Source,Ad Sequence,install,loan,Revenue,install to loan (%)");
    assert_eq!(csv.lines().count(), rows.len() + 1);
}

#[actix_web::test]
async fn unknown_metric_reports_are_not_found() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let admin = login!(app, "admin", "admin123");

    let (status, _) = send!(app, test::TestRequest::get().uri("/api/reports/revenue").insert_header(bearer(&admin)));
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn favorites_are_normalized_per_user() {
    let env = TestEnv::new();
    let app = test_app!(env);
    let admin = login!(app, "admin", "admin123");

    let (status, body) = send!(
        app,
        test::TestRequest::put()
            .uri("/api/attribution/favorites")
            .insert_header(bearer(&admin))
            .set_json(json!({
                "facebook": [
                    { "value": " seq_a ", "favoritedAt": 1 },
                    { "value": "seq_a", "favoritedAt": 5 },
                    { "value": "seq_b", "favoritedAt": 3 },
                    { "value": "  ", "favoritedAt": 9 }
                ],
                "tiktok": []
            }))
    );
    assert_eq!(status, StatusCode::OK, "{}", body);
    let expected = json!({
        "facebook": [
            { "value": "seq_a", "favoritedAt": 5 },
            { "value": "seq_b", "favoritedAt": 3 }
        ]
    });
    assert_eq!(body["data"], expected);

    let (_, body) = send!(app, test::TestRequest::get().uri("/api/attribution/favorites").insert_header(bearer(&admin)));
    assert_eq!(body["data"], expected);

    let user_token = login!(app, "testuser", "test123");
    let (status, _) = send!(
        app,
        test::TestRequest::get().uri("/api/attribution/favorites").insert_header(bearer(&user_token))
    );
    assert_eq!(status, StatusCode::FORBIDDEN);
}
