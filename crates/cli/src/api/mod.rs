//! HTTP/JSON routes over a shared [`Broker`].


use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use otpgate::{Broker, Credentials, GateError};
use otpgate_protocol::{
	AccountDetails, AuthReply, CredentialsRequest, ErrorBody, GateStatus, IdentifierRequest, OtpReply, OtpRequest,
	ResendReply, SessionId,
};
use tracing::debug;

pub fn router(broker: Arc<Broker>) -> Router {
	Router::new()
		.route("/auth", post(submit_credentials))
		.route("/auth/resend", post(resend))
		.route("/auth/verify", post(verify))
		.route("/account", post(account))
		.route("/status", get(status))
		.route("/health", get(|| async { "OK" }))
		.with_state(broker)
}

/// Error reply: `{code, message}` with a status derived from the code.
#[derive(Debug)]
pub enum ApiError {
	Gate(GateError),
	/// Body missing, malformed or failing a field check.
	BadRequest(String),
}

impl From<GateError> for ApiError {
	fn from(err: GateError) -> Self {
		ApiError::Gate(err)
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		ApiError::BadRequest(rejection.body_text())
	}
}

impl ApiError {
	fn status(&self) -> StatusCode {
		match self {
			ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
			ApiError::Gate(err) => match err {
				GateError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
				GateError::SessionNotFound | GateError::SessionExpired => StatusCode::NOT_FOUND,
				GateError::SessionNotVerified => StatusCode::CONFLICT,
				GateError::PoolSaturated { .. } | GateError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
				GateError::CredentialRejected | GateError::VerificationIncorrect => StatusCode::UNAUTHORIZED,
				GateError::ResourceAcquisition { .. }
				| GateError::VerificationInputMissing
				| GateError::StepTimeout { .. }
				| GateError::Script { .. } => StatusCode::BAD_GATEWAY,
			},
		}
	}

	fn body(&self) -> ErrorBody {
		match self {
			ApiError::BadRequest(message) => ErrorBody {
				code: "invalid_body".into(),
				message: message.clone(),
			},
			ApiError::Gate(err) => ErrorBody {
				code: err.code().into(),
				message: err.to_string(),
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		debug!(target = "otpgate.api", %status, error = ?self, "request failed");
		(status, Json(self.body())).into_response()
	}
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn submit_credentials(
	State(broker): State<Arc<Broker>>,
	body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<AuthReply> {
	let Json(request) = body?;
	if request.id.trim().is_empty() {
		return Err(ApiError::BadRequest("id must not be empty".into()));
	}
	Ok(Json(broker.submit_credentials(Credentials::from(request)).await?))
}

async fn resend(
	State(broker): State<Arc<Broker>>,
	body: Result<Json<IdentifierRequest>, JsonRejection>,
) -> ApiResult<ResendReply> {
	let Json(request) = body?;
	let identifier = SessionId::from_value(&request.identifier).map_err(GateError::from)?;
	Ok(Json(broker.resend_otp(identifier).await?))
}

async fn verify(State(broker): State<Arc<Broker>>, body: Result<Json<OtpRequest>, JsonRejection>) -> ApiResult<OtpReply> {
	let Json(request) = body?;
	let identifier = SessionId::from_value(&request.identifier).map_err(GateError::from)?;
	let code = request.code.trim();
	if code.is_empty() {
		return Err(ApiError::BadRequest("code must not be empty".into()));
	}
	Ok(Json(broker.submit_otp(identifier, code.to_string()).await?))
}

async fn account(
	State(broker): State<Arc<Broker>>,
	body: Result<Json<IdentifierRequest>, JsonRejection>,
) -> ApiResult<AccountDetails> {
	let Json(request) = body?;
	let identifier = SessionId::from_value(&request.identifier).map_err(GateError::from)?;
	Ok(Json(broker.consume(identifier).await?))
}

async fn status(State(broker): State<Arc<Broker>>) -> Json<GateStatus> {
	Json(broker.status())
}
