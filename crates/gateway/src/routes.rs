//! REST handlers for the account API.

use {
    axum::{
        Json, Router,
        extract::{Path, State, rejection::JsonRejection},
        http::header,
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    serde::{Deserialize, Serialize},
};

use wahub_accounts::Webhook;

use crate::{
    accounts::{AccountInfo, LoginResponse},
    error::{ServiceError, ServiceResult},
    response::ApiResponse,
    state::AppState,
};

// ── Request bodies ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    pub account_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginWithCodeRequest {
    pub phone_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookRequest {
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct PairingCode {
    pub code: String,
    pub message: &'static str,
}

// ── Validation ───────────────────────────────────────────────────────────────

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ServiceResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|_| ServiceError::bad_request("Invalid request body"))
}

fn validate_account_id(id: Option<String>) -> ServiceResult<String> {
    let id = id.unwrap_or_default();
    if id.is_empty() {
        return Err(ServiceError::bad_request("account_id is required"));
    }
    if id.len() > 50 {
        return Err(ServiceError::bad_request(
            "account_id must be between 1 and 50 characters",
        ));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ServiceError::bad_request(
            "account_id must contain only letters and digits",
        ));
    }
    Ok(id)
}

fn validate_phone_number(phone: Option<String>) -> ServiceResult<String> {
    let phone = phone.unwrap_or_default();
    if phone.is_empty() {
        return Err(ServiceError::bad_request("phone_number is required"));
    }
    if !(10..=15).contains(&phone.len()) {
        return Err(ServiceError::bad_request(
            "phone_number must be between 10 and 15 characters",
        ));
    }
    Ok(phone)
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/{id}", get(get_account).delete(delete_account))
        .route("/accounts/{id}/login", post(login))
        .route("/accounts/{id}/login-with-code", post(login_with_code))
        .route("/accounts/{id}/logout", post(logout))
        .route("/accounts/{id}/reconnect", post(reconnect))
        .route("/accounts/{id}/webhook", post(set_webhook).get(get_webhook))
        .route("/qr/{file}", get(qr_image))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn create_account(
    State(state): State<AppState>,
    payload: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> ServiceResult<ApiResponse> {
    let id = validate_account_id(body(payload)?.account_id)?;
    state.gateway.accounts.create(&id).await?;
    Ok(ApiResponse::ok(
        "Account created successfully",
        serde_json::json!({ "account_id": id }),
    ))
}

async fn list_accounts(
    State(state): State<AppState>,
) -> ServiceResult<ApiResponse<Vec<AccountInfo>>> {
    let accounts = state.gateway.accounts.list().await?;
    Ok(ApiResponse::ok("Success get accounts", accounts))
}

async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServiceResult<ApiResponse<AccountInfo>> {
    let account = state.gateway.accounts.get(&id).await?;
    Ok(ApiResponse::ok("Success get account", account))
}

async fn delete_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServiceResult<ApiResponse> {
    state.gateway.accounts.delete(&id).await?;
    Ok(ApiResponse::message("Account deleted successfully"))
}

async fn login(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServiceResult<ApiResponse<LoginResponse>> {
    let response = state.gateway.accounts.login(&id).await?;
    Ok(ApiResponse::ok("Please scan the QR code", response))
}

async fn login_with_code(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<LoginWithCodeRequest>, JsonRejection>,
) -> ServiceResult<ApiResponse<PairingCode>> {
    let phone = validate_phone_number(body(payload)?.phone_number)?;
    let code = state.gateway.accounts.login_with_code(&id, &phone).await?;
    Ok(ApiResponse::ok("Login code generated successfully", PairingCode {
        code,
        message: "Please enter this code in your WhatsApp app",
    }))
}

async fn logout(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServiceResult<ApiResponse> {
    state.gateway.accounts.logout(&id).await?;
    Ok(ApiResponse::message("Account logged out successfully"))
}

async fn reconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServiceResult<ApiResponse> {
    state.gateway.accounts.reconnect(&id).await?;
    Ok(ApiResponse::message("Account reconnected successfully"))
}

async fn set_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<WebhookRequest>, JsonRejection>,
) -> ServiceResult<ApiResponse> {
    let request = body(payload)?;
    let url = request
        .webhook_url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ServiceError::bad_request("webhook_url is required"))?;
    state
        .gateway
        .accounts
        .set_webhook(&id, &url, &request.secret)
        .await?;
    Ok(ApiResponse::message("Webhook set successfully"))
}

async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServiceResult<ApiResponse<Webhook>> {
    let webhook = state.gateway.accounts.get_webhook(&id).await?;
    Ok(ApiResponse::ok("Success get webhook", webhook))
}

async fn qr_image(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> ServiceResult<Response> {
    let not_found = || ServiceError::not_found("QR code not found");
    let path = state
        .gateway
        .accounts
        .qr_renderer()
        .resolve(&file)
        .ok_or_else(not_found)?;
    let bytes = tokio::fs::read(&path).await.map_err(|_| not_found())?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}
