use {
    anyhow::Error,
    http::status::StatusCode,
    serde_derive::Serialize,
    std::{borrow::Cow, convert::Infallible},
    warp::{
        reject::{MethodNotAllowed, Reject},
        reply, Rejection, Reply,
    },
};

/// An error which maps to a specific HTTP response status, carried as the root cause of an `anyhow::Error`
/// through the request handlers and recovered when building the response.
#[derive(Clone, Debug, Serialize, thiserror::Error)]
#[error("HTTP {status}: {message}")]
pub struct HttpError {
    #[serde(serialize_with = "status_as_u16")]
    pub status: StatusCode,
    pub message: Cow<'static, str>,
}

fn status_as_u16<S: serde::Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u16(status.as_u16())
}

impl HttpError {
    /// Recover the `HttpError` at the root of `error`, if any; anything else is an internal server error.
    pub fn from_anyhow(error: &Error) -> Self {
        error
            .root_cause()
            .downcast_ref::<HttpError>()
            .cloned()
            .unwrap_or_else(|| HttpError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: Cow::Borrowed("internal server error"),
            })
    }

    pub fn as_reply(&self) -> impl Reply {
        reply::with_status(reply::json(self), self.status)
    }
}

impl Reject for HttpError {}

/// Shorthand for a 400 response wrapped as an `anyhow::Error`.
pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Error {
    HttpError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
    .into()
}

/// Shorthand for a 502 response wrapped as an `anyhow::Error`, for failed upstream fetches.
pub fn bad_gateway(message: impl Into<Cow<'static, str>>) -> Error {
    HttpError {
        status: StatusCode::BAD_GATEWAY,
        message: message.into(),
    }
    .into()
}

/// Shorthand for a 404 response wrapped as an `anyhow::Error`.
pub fn not_found(message: impl Into<Cow<'static, str>>) -> Error {
    HttpError {
        status: StatusCode::NOT_FOUND,
        message: message.into(),
    }
    .into()
}

pub async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let error = if rejection.is_not_found() {
        HttpError {
            status: StatusCode::NOT_FOUND,
            message: Cow::Borrowed("not found"),
        }
    } else if let Some(error) = rejection.find::<HttpError>() {
        error.clone()
    } else if rejection.find::<MethodNotAllowed>().is_some() {
        HttpError {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: Cow::Borrowed("method not allowed"),
        }
    } else if let Some(error) = rejection.find::<warp::body::BodyDeserializeError>() {
        HttpError {
            status: StatusCode::BAD_REQUEST,
            message: Cow::Owned(error.to_string()),
        }
    } else {
        HttpError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: Cow::Borrowed("internal server error"),
        }
    };

    Ok(error.as_reply())
}
