use actix_web::{web, HttpResponse};
use tracing::debug;
use uuid::Uuid;

use crate::auth::Session;
use crate::db::{NewReward, RewardPatch};
use crate::error::AppError;
use crate::rewards::AvailableQuery;
use crate::AppState;

/// Registers the `/rewards` routes and makes malformed input come back in
/// the same error shape as every other failure.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::ValidationError(err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        AppError::ValidationError(err.to_string()).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        AppError::ValidationError(err.to_string()).into()
    }))
    .service(
        web::scope("/rewards")
            .route("", web::post().to(create_reward))
            .route("/available", web::get().to(list_available))
            .route("/admin/all", web::get().to(list_all))
            .route("/history", web::get().to(history))
            .route("/balance", web::get().to(balance))
            .route("/redeem/{reward_id}", web::post().to(redeem))
            .route("/verify/{code}", web::get().to(verify))
            .route("/mark-used/{redemption_id}", web::patch().to(mark_used))
            .route("/{id}", web::patch().to(update_reward)),
    );
}

pub async fn list_available(
    _session: Session,
    query: web::Query<AvailableQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let rewards = state.rewards.list_available(&query).await?;
    Ok(HttpResponse::Ok().json(rewards))
}

pub async fn list_all(
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let rewards = state.rewards.list_all(&session).await?;
    Ok(HttpResponse::Ok().json(rewards))
}

pub async fn create_reward(
    session: Session,
    req: web::Json<NewReward>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let reward = state.rewards.create_reward(&session, req.into_inner()).await?;
    Ok(HttpResponse::Created().json(reward))
}

pub async fn update_reward(
    session: Session,
    path: web::Path<Uuid>,
    req: web::Json<RewardPatch>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let reward = state
        .rewards
        .update_reward(&session, path.into_inner(), req.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(reward))
}

pub async fn redeem(
    session: Session,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let reward_id = path.into_inner();
    debug!(user_id = %session.user_id, reward_id = %reward_id, "Received redemption request");
    let receipt = state.rewards.redeem(&session, reward_id).await?;
    Ok(HttpResponse::Created().json(receipt))
}

pub async fn history(
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let redemptions = state.rewards.history(&session).await?;
    Ok(HttpResponse::Ok().json(redemptions))
}

pub async fn balance(
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let balance = state.rewards.balance(&session).await?;
    Ok(HttpResponse::Ok().json(balance))
}

pub async fn verify(
    session: Session,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let redemption = state.rewards.verify(&session, &path).await?;
    Ok(HttpResponse::Ok().json(redemption))
}

pub async fn mark_used(
    session: Session,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let redemption = state.rewards.mark_used(&session, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(redemption))
}
