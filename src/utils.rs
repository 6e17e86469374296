use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::Serialize;
use serde_json::json;

/// Walk the `source` chain of an error; used for the `Debug` impls of our
/// error enums, so that logs show every cause.
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }
    Ok(())
}

/// `{"status": "success", "data": ...}`
pub fn success(
    status: StatusCode,
    data: impl Serialize,
) -> HttpResponse {
    HttpResponse::build(status).json(json!({
        "status": "success",
        "data": data,
    }))
}

/// `{"status": "error", "error": ...}`; `error` is either a message or a map
/// of per-field messages
pub fn failure(
    status: StatusCode,
    error: impl Serialize,
) -> HttpResponse {
    HttpResponse::build(status).json(json!({
        "status": "error",
        "error": error,
    }))
}
