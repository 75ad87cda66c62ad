use webserv::error::ServeError;
use webserv::http::request::Method;
use webserv::http::response::{Response, ResponseBuilder, StatusCode};
use webserv::http::writer::serialize_response;

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::Created.as_u16(), 201);
    assert_eq!(StatusCode::NoContent.as_u16(), 204);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::Forbidden.as_u16(), 403);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::MethodNotAllowed.as_u16(), 405);
    assert_eq!(StatusCode::PayloadTooLarge.as_u16(), 413);
    assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
    assert_eq!(StatusCode::BadGateway.as_u16(), 502);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::Created.reason_phrase(), "Created");
    assert_eq!(StatusCode::NoContent.reason_phrase(), "No Content");
    assert_eq!(StatusCode::PayloadTooLarge.reason_phrase(), "Payload Too Large");
    assert_eq!(
        StatusCode::MethodNotAllowed.reason_phrase(),
        "Method Not Allowed"
    );
}

#[test]
fn test_status_code_from_u16_falls_back_by_class() {
    assert_eq!(StatusCode::from_u16(404), StatusCode::NotFound);
    assert_eq!(StatusCode::from_u16(299), StatusCode::Ok);
    assert_eq!(StatusCode::from_u16(418), StatusCode::BadRequest);
    assert_eq!(StatusCode::from_u16(599), StatusCode::InternalServerError);
}

#[test]
fn test_created_response_carries_upload_summary() {
    let summary = "Uploaded files:\nnote: hello world\ndemo.txt\n";
    let response = ResponseBuilder::new(StatusCode::Created)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(summary.as_bytes().to_vec())
        .build();

    assert_eq!(response.status.as_u16(), 201);
    assert_eq!(response.headers.get("Content-Length"), Some("43"));
    assert_eq!(response.body, summary.as_bytes());
}

#[test]
fn test_explicit_content_length_is_kept() {
    // CGI output already validated against the body
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Length", "4")
        .body(b"done".to_vec())
        .build();

    assert_eq!(response.headers.get_all("Content-Length").count(), 1);
    assert_eq!(response.headers.get("content-length"), Some("4"));
}

#[test]
fn test_header_replaces_append_accumulates() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .header("content-type", "text/html")
        .append_header("Set-Cookie", "session=1")
        .append_header("Set-Cookie", "theme=dark")
        .build();

    assert_eq!(response.headers.get_all("Content-Type").collect::<Vec<_>>(), vec!["text/html"]);
    assert_eq!(
        response.headers.get_all("Set-Cookie").collect::<Vec<_>>(),
        vec!["session=1", "theme=dark"]
    );
}

#[test]
fn test_delete_response_is_empty() {
    let response = Response::no_content();

    assert_eq!(response.status.as_u16(), 204);
    assert!(response.body.is_empty());
    assert!(!response.headers.contains_key("Content-Length"));

    // a body handed to the builder is dropped as well
    let response = ResponseBuilder::new(StatusCode::NoContent)
        .body(b"ignored".to_vec())
        .build();
    assert!(response.body.is_empty());
}

#[test]
fn test_error_body_names_the_status() {
    assert_eq!(Response::not_found().body, b"404 Not Found");
    assert_eq!(Response::internal_error().body, b"500 Internal Server Error");
    assert_eq!(
        Response::error(StatusCode::PayloadTooLarge).headers.get("Content-Type"),
        Some("text/plain")
    );
}

#[test]
fn test_custom_page_replaces_default_body() {
    let page = b"<h1>gone</h1>".to_vec();
    let response = Response::from_error(&ServeError::NotFound).with_page(page.clone(), "text/html");

    assert_eq!(response.status, StatusCode::NotFound);
    assert_eq!(response.body, page);
    assert_eq!(response.headers.get("Content-Type"), Some("text/html"));
    assert_eq!(response.headers.get("Content-Length"), Some("13"));
}

#[test]
fn test_error_statuses() {
    let cases = [
        (ServeError::MalformedRequest("x".into()), 400),
        (ServeError::TruncatedBody, 400),
        (ServeError::TruncatedMultipart, 400),
        (ServeError::Forbidden, 403),
        (ServeError::NotFound, 404),
        (ServeError::PayloadTooLarge { limit: 10 }, 413),
        (ServeError::CgiTimeout, 502),
        (ServeError::CgiProtocol("no headers".into()), 502),
    ];
    for (err, code) in cases {
        assert_eq!(Response::from_error(&err).status.as_u16(), code, "{}", err);
    }
}

#[test]
fn test_method_not_allowed_lists_allow() {
    let err = ServeError::MethodNotAllowed {
        method: Method::DELETE,
        allow: vec![Method::GET, Method::POST],
    };
    let response = Response::from_error(&err);

    assert_eq!(response.status, StatusCode::MethodNotAllowed);
    assert_eq!(response.headers.get("Allow"), Some("GET, POST"));
}

#[test]
fn test_serialize_head_response_keeps_length_drops_body() {
    let response = Response::ok(b"hello".to_vec());
    let wire = String::from_utf8(serialize_response(&response, true, true)).unwrap();

    assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(wire.contains("Content-Length: 5\r\n"));
    assert!(wire.contains("Connection: keep-alive\r\n"));
    assert!(wire.ends_with("\r\n\r\n"));
}

#[test]
fn test_serialize_close_response() {
    let response = Response::not_found();
    let wire = String::from_utf8(serialize_response(&response, false, false)).unwrap();

    assert!(wire.contains("Connection: close\r\n"));
    assert!(wire.ends_with("\r\n\r\n404 Not Found"));
}
