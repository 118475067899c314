//! Error handler for beria.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

use crate::crypto::CryptoError;

pub type Result<T> = std::result::Result<T, AccountError>;

/// Message surfaced when the store rejects a duplicate email.
pub const USER_EXISTS: &str = "A user with that email already exists.";

/// Enum representing account management errors.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("A user with that email already exists.")]
    UniquenessConflict,

    #[error("{service} failed: {source}")]
    ExternalService {
        service: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("user not found")]
    NotFound,

    #[error("permission denied to {action} this record")]
    PermissionDenied { action: &'static str },

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AccountError {
    /// Build a single field-level validation error.
    pub fn field(
        field: &'static str,
        code: &'static str,
        message: &'static str,
    ) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, ValidationError::new(code).with_message(message.into()));
        Self::Validation(errors)
    }

    /// Wrap an error raised by an external collaborator.
    pub fn external<E>(service: &'static str, err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::ExternalService {
            service,
            source: err.into(),
        }
    }

    /// Map a sqlx error, turning unique violations into
    /// [`AccountError::UniquenessConflict`].
    pub fn from_sql(err: SQLxError) -> Self {
        match err.as_database_error() {
            Some(db) if db.is_unique_violation() => Self::UniquenessConflict,
            _ => Self::Sql(err),
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| issue.code.to_string()),
            })
        })
        .collect::<Vec<_>>();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            AccountError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },

            AccountError::UniquenessConflict => response
                .title("The record conflicts with an existing one.")
                .status(StatusCode::CONFLICT),

            AccountError::NotFound => response
                .title("The requested user does not exist.")
                .status(StatusCode::NOT_FOUND),

            AccountError::PermissionDenied { .. } => response
                .title("You do not have permission to perform this action.")
                .status(StatusCode::FORBIDDEN),

            AccountError::ExternalService { service, source } => {
                tracing::error!(%service, error = %source, "external service failed");

                response
                    .title("An external service failed.")
                    .status(StatusCode::BAD_GATEWAY)
            },

            AccountError::Sql(err) => {
                tracing::error!(error = %err, "SQL request failed");

                ResponseError::default()
            },

            AccountError::Crypto(err) => {
                tracing::error!(error = %err, "cryptographic operation failed");

                ResponseError::default()
            },

            AccountError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
