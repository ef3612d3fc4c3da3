//! In-process Kubernetes API for unit tests.
//!
//! A [`kube::Client`] is built over a `tower_test` mock service; tests pull
//! each request the code under test sends, check it and answer it.

use hyper::{Method, Request, Response, StatusCode};
use kube::Client;
use kube::client::Body;
use serde::Serialize;
use serde_json::{Value, json};
use tower_test::mock::{self, Handle, SendResponse};

/// Mock API server side of a [`mock_client`] pair.
pub(crate) struct ApiServer {
    handle: Handle<Request<Body>, Response<Body>>,
}

/// Client wired to a mock API server.
pub(crate) fn mock_client() -> (Client, ApiServer) {
    let (service, handle) = mock::pair::<Request<Body>, Response<Body>>();
    (Client::new(service, "default"), ApiServer { handle })
}

/// One request waiting for its response.
pub(crate) struct Exchange {
    /// Raw query string.
    pub(crate) query: String,
    /// JSON body, `Null` when empty.
    pub(crate) body: Value,
    send: SendResponse<Response<Body>>,
}

impl ApiServer {
    /// Take the next request and check its method and path.
    pub(crate) async fn expect(&mut self, method: Method, path: &str) -> Exchange {
        let (request, send) = self
            .handle
            .next_request()
            .await
            .expect("client sent no request");
        assert_eq!(request.method(), &method, "unexpected method for {}", request.uri());
        assert_eq!(request.uri().path(), path);

        let query = request.uri().query().unwrap_or_default().to_string();
        let bytes = request.into_body().collect_bytes().await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        Exchange { query, body, send }
    }
}

impl Exchange {
    /// Answer 200 with `value` as JSON.
    pub(crate) fn reply(self, value: &impl Serialize) {
        self.respond(StatusCode::OK, serde_json::to_vec(value).unwrap());
    }

    /// Answer with a `Status` failure such as 404 or 409.
    pub(crate) fn fail(self, code: u16, reason: &str) {
        let status = json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": "Failure",
            "message": format!("{} ({})", reason, code),
            "reason": reason,
            "code": code,
        });
        self.respond(
            StatusCode::from_u16(code).unwrap(),
            serde_json::to_vec(&status).unwrap(),
        );
    }

    fn respond(self, status: StatusCode, body: Vec<u8>) {
        let response = Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        self.send.send_response(response);
    }
}
