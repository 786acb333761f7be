//! HTTP response construction.
//!
//! Every exchange is single-shot: the connection advertises
//! `Connection: close` and the server disables keep-alive, so a response
//! here is the last thing written on the socket.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Response, StatusCode};

pub type BodyResponse = Response<Full<Bytes>>;

/// Status-only response with no body.
pub fn close(status: StatusCode) -> BodyResponse {
    Response::builder()
        .status(status)
        .header(CONNECTION, "close")
        .body(Full::new(Bytes::new()))
        .expect("valid response")
}

/// Response carrying a JSON body.
pub fn send(status: StatusCode, body: Vec<u8>) -> BodyResponse {
    let body = Bytes::from(body);
    Response::builder()
        .status(status)
        .header(CONNECTION, "close")
        .header(CONTENT_TYPE, "application/json")
        .header(CONTENT_LENGTH, body.len())
        .body(Full::new(body))
        .expect("valid response")
}
