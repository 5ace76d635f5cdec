use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorKind};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    // Success with data
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_kind: None,
            message: None,
        }
    }

    // Success with data and message
    pub fn success_with_message(data: Option<T>, message: &str) -> Self {
        Self {
            success: true,
            data,
            error_kind: None,
            message: Some(message.to_string()),
        }
    }

    pub fn error(error: &AppError) -> Self {
        Self {
            success: false,
            data: None,
            error_kind: Some(error.kind()),
            message: Some(error.to_string()),
        }
    }
}

impl<T> From<Result<T, AppError>> for ApiResponse<T> {
    fn from(result: Result<T, AppError>) -> Self {
        match result {
            Ok(data) => ApiResponse::success(data),
            Err(err) => ApiResponse::error(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_carries_kind_and_message() {
        let err = AppError::FailedPrecondition("team is full".to_string());
        let resp = ApiResponse::<()>::error(&err);
        assert!(!resp.success);
        assert_eq!(resp.error_kind, Some(ErrorKind::FailedPrecondition));
        assert_eq!(
            resp.message.as_deref(),
            Some("Failed precondition: team is full")
        );
    }

    #[test]
    fn success_envelope_has_no_error_kind() {
        let resp: ApiResponse<u32> = Ok(7).into();
        assert!(resp.success);
        assert_eq!(resp.data, Some(7));
        assert!(resp.error_kind.is_none());
    }
}
