use actix_web::{test, web, App};
use rewards_server::auth::Role;
use rewards_server::{rewards, AppState, MemoryRewardStore, Settings};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

struct TestContext {
    state: AppState,
    store: Arc<MemoryRewardStore>,
    admin_token: String,
}

impl TestContext {
    fn new() -> Self {
        let config = Settings::new_for_test().expect("Failed to load test config");
        let store = Arc::new(MemoryRewardStore::new());
        let state = AppState::with_store(config, store.clone());
        let admin_token = state
            .auth_service
            .issue_token(Uuid::new_v4(), Role::Admin)
            .unwrap();
        Self { state, store, admin_token }
    }

    /// Mints a user token and gives that user `points`.
    async fn user_with_points(&self, points: i64) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        self.store.credit_points(user_id, points).await;
        let token = self.state.auth_service.issue_token(user_id, Role::User).unwrap();
        (user_id, token)
    }
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token))
}

macro_rules! app {
    ($ctx:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($ctx.state.clone()))
                .configure(rewards::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_full_redemption_flow() {
    let ctx = TestContext::new();
    let app = app!(ctx);
    let (_, user_token) = ctx.user_with_points(150).await;

    // Admin creates a single-unit reward
    let resp = test::TestRequest::post()
        .uri("/rewards")
        .insert_header(bearer(&ctx.admin_token))
        .set_json(json!({
            "name": "Course discount",
            "description": "20% off any course",
            "category": "discount",
            "points_cost": 100,
            "quantity": 1
        }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 201);
    let reward: Value = test::read_body_json(resp).await;
    let reward_id = reward["id"].as_str().unwrap().to_string();

    // User sees it in the catalog
    let resp = test::TestRequest::get()
        .uri("/rewards/available?category=discount")
        .insert_header(bearer(&user_token))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let available: Value = test::read_body_json(resp).await;
    assert_eq!(available.as_array().unwrap().len(), 1);
    assert_eq!(available[0]["status"], "available");

    // User redeems it
    let resp = test::TestRequest::post()
        .uri(&format!("/rewards/redeem/{}", reward_id))
        .insert_header(bearer(&user_token))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 201);
    let receipt: Value = test::read_body_json(resp).await;
    assert_eq!(receipt["points_spent"], 100);
    assert_eq!(receipt["remaining_points"], 50);
    let code = receipt["redemption_code"].as_str().unwrap().to_string();
    let redemption_id = receipt["redemption_id"].as_str().unwrap().to_string();
    assert!(code.starts_with("RWD-"));

    // Stock is gone
    let resp = test::TestRequest::get()
        .uri("/rewards/available")
        .insert_header(bearer(&user_token))
        .send_request(&app)
        .await;
    let available: Value = test::read_body_json(resp).await;
    assert!(available.as_array().unwrap().is_empty());

    // History and balance
    let resp = test::TestRequest::get()
        .uri("/rewards/history")
        .insert_header(bearer(&user_token))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let history: Value = test::read_body_json(resp).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["status"], "active");
    assert_eq!(history[0]["reward_name"], "Course discount");

    let resp = test::TestRequest::get()
        .uri("/rewards/balance")
        .insert_header(bearer(&user_token))
        .send_request(&app)
        .await;
    let balance: Value = test::read_body_json(resp).await;
    assert_eq!(balance["points"], 50);

    // Admin verifies, twice, without changing anything
    for _ in 0..2 {
        let resp = test::TestRequest::get()
            .uri(&format!("/rewards/verify/{}", code.to_lowercase()))
            .insert_header(bearer(&ctx.admin_token))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), 200);
        let verified: Value = test::read_body_json(resp).await;
        assert_eq!(verified["status"], "active");
        assert_eq!(verified["is_used"], false);
        assert_eq!(verified["id"], redemption_id.as_str());
    }

    // Mark used, then try again
    let resp = test::TestRequest::patch()
        .uri(&format!("/rewards/mark-used/{}", redemption_id))
        .insert_header(bearer(&ctx.admin_token))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let used: Value = test::read_body_json(resp).await;
    assert_eq!(used["status"], "used");
    assert_eq!(used["is_used"], true);

    let resp = test::TestRequest::patch()
        .uri(&format!("/rewards/mark-used/{}", redemption_id))
        .insert_header(bearer(&ctx.admin_token))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "ALREADY_USED");
    assert_eq!(body["error"]["message"], "redemption already used");

    let resp = test::TestRequest::get()
        .uri(&format!("/rewards/verify/{}", code))
        .insert_header(bearer(&ctx.admin_token))
        .send_request(&app)
        .await;
    let verified: Value = test::read_body_json(resp).await;
    assert_eq!(verified["status"], "used");
}

#[actix_web::test]
async fn test_insufficient_balance_is_a_conflict() {
    let ctx = TestContext::new();
    let app = app!(ctx);
    let (user_id, user_token) = ctx.user_with_points(40).await;

    let resp = test::TestRequest::post()
        .uri("/rewards")
        .insert_header(bearer(&ctx.admin_token))
        .set_json(json!({ "name": "Hoodie", "category": "merchandise", "points_cost": 500 }))
        .send_request(&app)
        .await;
    let reward: Value = test::read_body_json(resp).await;

    let resp = test::TestRequest::post()
        .uri(&format!("/rewards/redeem/{}", reward["id"].as_str().unwrap()))
        .insert_header(bearer(&user_token))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "INSUFFICIENT_BALANCE");
    assert_eq!(body["error"]["message"], "insufficient balance");

    use rewards_server::RewardStore;
    assert_eq!(ctx.store.points_balance(user_id).await.unwrap(), 40);
}

#[actix_web::test]
async fn test_second_buyer_of_last_unit_is_turned_away() {
    let ctx = TestContext::new();
    let app = app!(ctx);
    let (_, first) = ctx.user_with_points(150).await;
    let (second_id, second) = ctx.user_with_points(150).await;

    let resp = test::TestRequest::post()
        .uri("/rewards")
        .insert_header(bearer(&ctx.admin_token))
        .set_json(json!({ "name": "Certificate", "category": "certificate", "points_cost": 100, "quantity": 1 }))
        .send_request(&app)
        .await;
    let reward: Value = test::read_body_json(resp).await;
    let uri = format!("/rewards/redeem/{}", reward["id"].as_str().unwrap());

    let resp = test::TestRequest::post()
        .uri(&uri)
        .insert_header(bearer(&first))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 201);

    let resp = test::TestRequest::post()
        .uri(&uri)
        .insert_header(bearer(&second))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "reward unavailable");

    use rewards_server::RewardStore;
    assert_eq!(ctx.store.points_balance(second_id).await.unwrap(), 150);
}

#[actix_web::test]
async fn test_invalid_input_is_rejected() {
    let ctx = TestContext::new();
    let app = app!(ctx);

    let resp = test::TestRequest::post()
        .uri("/rewards")
        .insert_header(bearer(&ctx.admin_token))
        .set_json(json!({ "name": "Free", "category": "content", "points_cost": 0 }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let resp = test::TestRequest::post()
        .uri("/rewards")
        .insert_header(bearer(&ctx.admin_token))
        .set_json(json!({ "name": "Badge", "category": "badge", "points_cost": 10 }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);

    let resp = test::TestRequest::post()
        .uri("/rewards/redeem/not-a-uuid")
        .insert_header(bearer(&ctx.admin_token))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);

    let resp = test::TestRequest::get()
        .uri("/rewards/available?status=sideways")
        .insert_header(bearer(&ctx.admin_token))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_update_reward() {
    let ctx = TestContext::new();
    let app = app!(ctx);

    let resp = test::TestRequest::post()
        .uri("/rewards")
        .insert_header(bearer(&ctx.admin_token))
        .set_json(json!({
            "name": "Webinar seat",
            "category": "content",
            "points_cost": 30,
            "valid_until": "2999-01-01T00:00:00Z"
        }))
        .send_request(&app)
        .await;
    let reward: Value = test::read_body_json(resp).await;
    let uri = format!("/rewards/{}", reward["id"].as_str().unwrap());

    let resp = test::TestRequest::patch()
        .uri(&uri)
        .insert_header(bearer(&ctx.admin_token))
        .set_json(json!({ "is_active": false, "valid_until": null }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let updated: Value = test::read_body_json(resp).await;
    assert_eq!(updated["is_active"], false);
    assert!(updated["valid_until"].is_null());
    assert_eq!(updated["points_cost"], 30);

    let resp = test::TestRequest::get()
        .uri("/rewards/admin/all")
        .insert_header(bearer(&ctx.admin_token))
        .send_request(&app)
        .await;
    let all: Value = test::read_body_json(resp).await;
    assert_eq!(all[0]["status"], "inactive");

    let resp = test::TestRequest::patch()
        .uri(&format!("/rewards/{}", Uuid::new_v4()))
        .insert_header(bearer(&ctx.admin_token))
        .set_json(json!({ "points_cost": 10 }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_verify_unknown_code() {
    let ctx = TestContext::new();
    let app = app!(ctx);

    let resp = test::TestRequest::get()
        .uri("/rewards/verify/RWD-ZZZZ-ZZZZ")
        .insert_header(bearer(&ctx.admin_token))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "REDEMPTION_NOT_FOUND");
}
