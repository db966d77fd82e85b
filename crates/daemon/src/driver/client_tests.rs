// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use reqwest::StatusCode;

use super::*;
use crate::driver::FailureCause;

#[yare::parameterized(
    unauthorized = { StatusCode::UNAUTHORIZED, FailureCause::Auth },
    forbidden = { StatusCode::FORBIDDEN, FailureCause::Auth },
    conflict = { StatusCode::CONFLICT, FailureCause::Unavailable },
    locked = { StatusCode::LOCKED, FailureCause::Unavailable },
    throttled = { StatusCode::TOO_MANY_REQUESTS, FailureCause::Unavailable },
    maintenance = { StatusCode::SERVICE_UNAVAILABLE, FailureCause::Unavailable },
    not_found = { StatusCode::NOT_FOUND, FailureCause::Protocol },
    server_error = { StatusCode::INTERNAL_SERVER_ERROR, FailureCause::Protocol },
)]
fn status_classification(status: StatusCode, expected: FailureCause) {
    let failure = match classify_status(status) {
        Err(f) => f,
        Ok(()) => panic!("status {status} should classify as a failure"),
    };
    assert_eq!(failure.cause, expected);
}

#[test]
fn success_statuses_pass() {
    assert!(classify_status(StatusCode::OK).is_ok());
    assert!(classify_status(StatusCode::NO_CONTENT).is_ok());
}

#[tokio::test]
async fn unreachable_host_classifies_as_transport() {
    // Nothing listens on port 1; connect is refused immediately.
    let client = VendorClient::new(
        "http://127.0.0.1:1".to_owned(),
        std::time::Duration::from_secs(2),
    );
    let failure = match client.get_json("/status", None).await {
        Err(f) => f,
        Ok(v) => panic!("expected transport failure, got {v}"),
    };
    assert!(
        failure.cause == FailureCause::Transport || failure.cause == FailureCause::Timeout,
        "unexpected cause: {failure}"
    );
}
