// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Local HTTP callback listener for OAuth redirect flows.
//!
//! Binds a loopback TCP listener on an ephemeral port, waits for a single
//! GET request carrying the authorization code and state, serves a success
//! page, then shuts down. Anything other than a well-formed callback on the
//! expected path gets a 400 and fails the login.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use url::Url;

use crate::error::AuthError;

/// Parameters extracted from the OAuth redirect.
#[derive(Debug, Clone)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Complete</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 2em;">
<h2>Authorization complete</h2>
<p>You can close this window and return to the terminal.</p>
</body>
</html>"#;

const FAILURE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 2em;">
<h2>Authorization failed</h2>
<p>Return to the terminal and retry the login.</p>
</body>
</html>"#;

/// Bind the loopback listener. Returns the listener and its bound port so
/// the caller can build the redirect URI before the browser opens.
pub fn bind_ephemeral() -> Result<(TcpListener, u16), AuthError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| AuthError::Callback(format!("failed to bind loopback listener: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| AuthError::Callback(format!("listener address unavailable: {e}")))?
        .port();
    Ok((listener, port))
}

/// Wait for a single redirect to `path` and extract `{code, state}`.
pub fn wait_for_callback(
    listener: &TcpListener,
    path: &str,
) -> Result<CallbackParams, AuthError> {
    let (mut stream, _addr) = listener
        .accept()
        .map_err(|e| AuthError::Callback(format!("failed to accept connection: {e}")))?;

    let mut buf = [0u8; 8192];
    let n = stream
        .read(&mut buf)
        .map_err(|e| AuthError::Callback(format!("failed to read request: {e}")))?;
    let request = String::from_utf8_lossy(&buf[..n]).to_string();

    // "GET /path?query HTTP/1.1"
    let target = request
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .ok_or_else(|| {
            respond_400(&mut stream);
            AuthError::Callback("malformed HTTP request line".into())
        })?;

    let url = Url::parse(&format!("http://127.0.0.1{target}")).map_err(|e| {
        respond_400(&mut stream);
        AuthError::Callback(format!("failed to parse callback URL: {e}"))
    })?;

    if url.path() != path {
        respond_400(&mut stream);
        return Err(AuthError::Callback(format!(
            "unexpected callback path {}",
            url.path()
        )));
    }

    let find = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.to_string())
    };
    let (code, state) = match (find("code"), find("state")) {
        (Some(c), Some(s)) => (c, s),
        _ => {
            respond_400(&mut stream);
            return Err(AuthError::Callback(
                "callback missing 'code' or 'state' parameter".into(),
            ));
        }
    };

    respond(&mut stream, "200 OK", SUCCESS_HTML);
    Ok(CallbackParams { code, state })
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let reply = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(reply.as_bytes());
    let _ = stream.flush();
}

fn respond_400(stream: &mut TcpStream) {
    respond(stream, "400 Bad Request", FAILURE_HTML);
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
