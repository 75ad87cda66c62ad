use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use webserv::config::Config;
use webserv::http::connection::Connection;
use webserv::server::ServerState;

const BOUNDARY: &str = "----BOUNDARY_HAPPY";

struct Site {
    dir: TempDir,
    state: Arc<ServerState>,
}

impl Site {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let www = dir.path().join("www");
        std::fs::create_dir_all(www.join("cgi-bin")).unwrap();
        std::fs::create_dir_all(www.join("errors")).unwrap();
        std::fs::write(www.join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(www.join("errors/404.html"), "custom missing page").unwrap();
        std::fs::write(
            www.join("cgi-bin/echo.sh"),
            "input=$(cat)\nprintf 'Content-Type: text/plain\\r\\n\\r\\n'\nprintf 'method=%s length=%s body=%s\\n' \"$REQUEST_METHOD\" \"$CONTENT_LENGTH\" \"$input\"\n",
        )
        .unwrap();

        let yaml = format!(
            r#"
listen: 127.0.0.1:8080
client_timeout_secs: 5
cgi_timeout_secs: 5
error_pages:
  404: '{www}/errors/404.html'
routes:
  - path: /
    root: '{www}'
    methods: [GET, HEAD]
    index: index.html
  - path: /uploads
    root: '{www}/uploads'
    methods: [GET, POST, DELETE]
    upload_dir: '{www}/uploads'
  - path: /cgi-bin
    root: '{www}/cgi-bin'
    methods: [GET, POST]
    cgi:
      .sh: /bin/sh
"#,
            www = www.display()
        );
        let state = Arc::new(ServerState::new(Config::from_yaml(&yaml).unwrap()));

        Self { dir, state }
    }

    fn www(&self) -> PathBuf {
        self.dir.path().join("www")
    }

    fn uploads(&self) -> PathBuf {
        self.www().join("uploads")
    }

    /// Sends `request` on a fresh connection, half-closes, and returns
    /// everything the server wrote back.
    async fn send(&self, request: Vec<u8>) -> String {
        self.send_then(request, true).await
    }

    async fn send_then(&self, request: Vec<u8>, close: bool) -> String {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut conn = Connection::new(server, state, None);
            let _ = conn.run().await;
        });

        let (mut rd, mut wr) = tokio::io::split(client);
        tokio::spawn(async move {
            // the server may stop reading early; write errors are expected then
            let _ = wr.write_all(&request).await;
            if close {
                let _ = wr.shutdown().await;
            }
            // keep the write half open until the response has been read
            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        });

        let mut out = Vec::new();
        rd.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }
}

fn status_of(response: &str) -> u16 {
    response
        .split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("no status line in {:?}", response))
}

fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}

fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, filename, body) in parts {
        out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let disposition = match filename {
            Some(f) => format!("form-data; name=\"{}\"; filename=\"{}\"", name, f),
            None => format!("form-data; name=\"{}\"", name),
        };
        out.extend_from_slice(format!("Content-Disposition: {}\r\n\r\n", disposition).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    out
}

fn upload_request(content_type: &str, body: &[u8], declared: usize) -> Vec<u8> {
    let mut req = format!(
        "POST /uploads HTTP/1.1\r\nHost: localhost\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        content_type, declared
    )
    .into_bytes();
    req.extend_from_slice(body);
    req
}

fn form_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_multipart_upload_happy_path() {
    let site = Site::new();
    let body = multipart(&[("note", None, b"hello world"), ("file", Some("demo.txt"), b"demo body")]);

    let response = site.send(upload_request(&form_type(), &body, body.len())).await;

    assert_eq!(status_of(&response), 201, "{}", response);
    assert!(body_of(&response).contains("Uploaded files:"));
    assert!(body_of(&response).contains("note: hello world"));
    assert!(body_of(&response).contains("demo.txt"));
    assert_eq!(std::fs::read(site.uploads().join("demo.txt")).unwrap(), b"demo body");
}

#[tokio::test]
async fn test_multipart_fields_keep_order() {
    let site = Site::new();
    let body = multipart(&[("alpha", None, b"one"), ("beta", None, b"two")]);

    let response = site.send(upload_request(&form_type(), &body, body.len())).await;

    assert_eq!(status_of(&response), 201);
    let text = body_of(&response);
    let alpha = text.find("alpha: one").unwrap();
    let beta = text.find("beta: two").unwrap();
    assert!(alpha < beta);
}

#[tokio::test]
async fn test_missing_boundary_is_bad_request() {
    let site = Site::new();
    let body = multipart(&[("note", None, b"hello")]);

    let response = site.send(upload_request("multipart/form-data", &body, body.len())).await;

    assert_eq!(status_of(&response), 400, "{}", response);
    assert!(response.contains("Connection: close"));
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let site = Site::new();
    let blob = vec![b'A'; 1_048_577];
    let body = multipart(&[("blob", Some("big.bin"), &blob)]);

    let response = site.send(upload_request(&form_type(), &body, body.len())).await;

    assert_eq!(status_of(&response), 413, "{}", response);
    assert_eq!(file_count(&site.uploads()), 0);
}

#[tokio::test]
async fn test_upload_at_exact_limit_succeeds_and_one_more_byte_fails() {
    let site = Site::new();
    let overhead = multipart(&[("blob", Some("edge.bin"), b"")]).len();

    let fits = vec![b'Z'; 1_048_576 - overhead];
    let body = multipart(&[("blob", Some("edge.bin"), &fits)]);
    assert_eq!(body.len(), 1_048_576);
    let response = site.send(upload_request(&form_type(), &body, body.len())).await;
    assert_eq!(status_of(&response), 201, "{}", &response[..response.len().min(200)]);

    let over = vec![b'Z'; 1_048_577 - overhead];
    let body = multipart(&[("blob", Some("edge2.bin"), &over)]);
    let response = site.send(upload_request(&form_type(), &body, body.len())).await;
    assert_eq!(status_of(&response), 413);
}

#[tokio::test]
async fn test_oversized_chunked_upload_fails_mid_stream() {
    let site = Site::new();
    let blob = vec![b'C'; 1_100_000];
    let body = multipart(&[("blob", Some("chunked.bin"), &blob)]);

    let mut req = format!(
        "POST /uploads HTTP/1.1\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\n\r\n",
        form_type()
    )
    .into_bytes();
    for piece in body.chunks(16 * 1024) {
        req.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
        req.extend_from_slice(piece);
        req.extend_from_slice(b"\r\n");
    }
    req.extend_from_slice(b"0\r\n\r\n");

    let response = site.send(req).await;

    assert_eq!(status_of(&response), 413);
    assert!(!site.uploads().join("chunked.bin").exists());
}

#[tokio::test]
async fn test_truncated_upload_is_bad_request() {
    let site = Site::new();
    let body = multipart(&[("file", Some("cut.txt"), &vec![b'x'; 4096])]);

    // declare the full length but hang up halfway through
    let response = site
        .send(upload_request(&form_type(), &body[..body.len() / 2], body.len()))
        .await;

    assert_eq!(status_of(&response), 400, "{}", response);
    assert!(!site.uploads().join("cut.txt").exists());
}

#[tokio::test]
async fn test_body_without_closing_delimiter_is_bad_request() {
    let site = Site::new();
    let mut body = multipart(&[("note", None, b"hi")]);
    body.truncate(body.len() - format!("--{}--\r\n", BOUNDARY).len());

    let response = site.send(upload_request(&form_type(), &body, body.len())).await;

    assert_eq!(status_of(&response), 400);
}

#[tokio::test]
async fn test_delete_then_delete_again() {
    let site = Site::new();
    std::fs::create_dir_all(site.uploads()).unwrap();
    std::fs::write(site.uploads().join("gone.txt"), "bye").unwrap();

    let request = b"DELETE /uploads/gone.txt HTTP/1.1\r\nHost: x\r\n\r\n\
                    DELETE /uploads/gone.txt HTTP/1.1\r\nHost: x\r\n\r\n"
        .to_vec();
    let response = site.send(request).await;

    let first = response.find("HTTP/1.1 204 No Content").expect("first delete");
    let second = response.find("HTTP/1.1 404 Not Found").expect("second delete");
    assert!(first < second);
    assert!(!site.uploads().join("gone.txt").exists());
}

#[tokio::test]
async fn test_delete_directory_is_forbidden() {
    let site = Site::new();
    std::fs::create_dir_all(site.uploads().join("sub")).unwrap();

    let response = site
        .send(b"DELETE /uploads/sub HTTP/1.1\r\nHost: x\r\n\r\n".to_vec())
        .await;

    assert_eq!(status_of(&response), 403);
}

#[tokio::test]
async fn test_cgi_post_receives_exact_body() {
    let site = Site::new();
    let request = b"POST /cgi-bin/echo.sh HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\n123".to_vec();

    let response = site.send(request).await;

    assert_eq!(status_of(&response), 200, "{}", response);
    assert!(body_of(&response).contains("method=POST length=3 body=123"));
}

#[tokio::test]
async fn test_cgi_missing_script_is_not_found() {
    let site = Site::new();
    let response = site.send(b"GET /cgi-bin/nope.sh HTTP/1.1\r\n\r\n".to_vec()).await;

    assert_eq!(status_of(&response), 404);
}

#[tokio::test]
async fn test_static_index_and_head() {
    let site = Site::new();

    let response = site.send(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec()).await;
    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), "<h1>home</h1>");
    assert!(response.contains("Content-Type: text/html"));

    let response = site.send(b"HEAD /index.html HTTP/1.1\r\nHost: x\r\n\r\n".to_vec()).await;
    assert_eq!(status_of(&response), 200);
    assert!(response.contains("Content-Length: 13\r\n"));
    assert_eq!(body_of(&response), "");
}

#[tokio::test]
async fn test_keep_alive_serves_pipelined_requests() {
    let site = Site::new();
    let request = b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\nGET /index.html HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();

    let response = site.send(request).await;

    assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(response.contains("Connection: keep-alive"));
}

#[tokio::test]
async fn test_connection_close_is_honoured() {
    let site = Site::new();
    // no half-close from the client: the server has to end the exchange itself
    let response = site
        .send_then(
            b"GET /index.html HTTP/1.1\r\nConnection: close\r\n\r\n".to_vec(),
            false,
        )
        .await;

    assert_eq!(status_of(&response), 200);
    assert!(response.contains("Connection: close"));
}

#[tokio::test]
async fn test_unknown_path_uses_custom_error_page() {
    let site = Site::new();
    let response = site.send(b"GET /missing.html HTTP/1.1\r\n\r\n".to_vec()).await;

    assert_eq!(status_of(&response), 404);
    assert_eq!(body_of(&response), "custom missing page");
}

#[tokio::test]
async fn test_method_not_allowed_has_allow_header() {
    let site = Site::new();
    let response = site.send(b"DELETE /index.html HTTP/1.1\r\n\r\n".to_vec()).await;

    assert_eq!(status_of(&response), 405);
    assert!(response.contains("Allow: GET, HEAD\r\n"));
}

#[tokio::test]
async fn test_malformed_request_line() {
    let site = Site::new();
    let response = site.send(b"GARBAGE\r\n\r\n".to_vec()).await;

    assert_eq!(status_of(&response), 400);
}

#[tokio::test]
async fn test_symlink_out_of_root_is_forbidden() {
    let site = Site::new();
    let outside = site.dir.path().join("secret.txt");
    std::fs::write(&outside, "top secret").unwrap();
    std::os::unix::fs::symlink(&outside, site.www().join("leak.txt")).unwrap();

    let response = site.send(b"GET /leak.txt HTTP/1.1\r\n\r\n".to_vec()).await;

    assert_eq!(status_of(&response), 403);
    assert!(!response.contains("top secret"));
}

#[tokio::test]
async fn test_truncated_reupload_keeps_stored_file() {
    let site = Site::new();
    let body = multipart(&[("file", Some("demo.txt"), b"demo body")]);
    let response = site.send(upload_request(&form_type(), &body, body.len())).await;
    assert_eq!(status_of(&response), 201);

    let replacement = multipart(&[("file", Some("demo.txt"), &vec![b'y'; 4096])]);
    let response = site
        .send(upload_request(
            &form_type(),
            &replacement[..replacement.len() / 2],
            replacement.len(),
        ))
        .await;

    assert_eq!(status_of(&response), 400);
    assert_eq!(std::fs::read(site.uploads().join("demo.txt")).unwrap(), b"demo body");
    assert_eq!(file_count(&site.uploads()), 1);
}

#[tokio::test]
async fn test_field_with_trailing_newlines_is_echoed_exactly() {
    let site = Site::new();
    let body = multipart(&[("msg", None, b"line1\n\n")]);

    let response = site.send(upload_request(&form_type(), &body, body.len())).await;

    assert_eq!(status_of(&response), 201);
    assert_eq!(body_of(&response), "Uploaded files:\nmsg: line1\n\n\n");
}
