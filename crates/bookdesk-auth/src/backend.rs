//! Backend auth endpoints.
//!
//! These calls go straight to the transport and are never routed through the
//! 401-recovering pipeline: the refresh exchange authenticates with the
//! long-lived cookie, not the (expired) access token.

use bookdesk_settings::ApiSettings;

use crate::errors::AuthError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::types::{TokenGrant, User};

/// Trade the ambient refresh cookie for a new access token.
#[tracing::instrument(skip_all)]
pub async fn refresh_access_token(
    transport: &dyn HttpTransport,
    api: &ApiSettings,
) -> Result<TokenGrant, AuthError> {
    let request = HttpRequest::post(api.url(&api.refresh_path)).with_credentials();
    let resp = transport.send(request).await?;
    decode_grant(&resp)
}

/// Sign in with email and password.
///
/// Returns the access token and the identity it belongs to.
#[tracing::instrument(skip_all)]
pub async fn login(
    transport: &dyn HttpTransport,
    api: &ApiSettings,
    email: &str,
    password: &str,
) -> Result<(String, User), AuthError> {
    let body = serde_json::json!({
        "email": email,
        "password": password,
    });
    let request = HttpRequest::post(api.url(&api.login_path))
        .json(body)
        .with_credentials();
    let resp = transport.send(request).await?;
    if resp.status == 401 {
        return Err(AuthError::AuthFailed("invalid credentials".to_string()));
    }

    let grant = decode_grant(&resp)?;
    let Some(user) = grant.user else {
        return Err(AuthError::AuthFailed(
            "login response did not include a user".to_string(),
        ));
    };
    Ok((grant.access_token, user))
}

/// Tell the backend to revoke the refresh cookie.
#[tracing::instrument(skip_all)]
pub async fn logout(
    transport: &dyn HttpTransport,
    api: &ApiSettings,
    access_token: Option<&str>,
) -> Result<(), AuthError> {
    let mut request = HttpRequest::post(api.url(&api.logout_path)).with_credentials();
    if let Some(token) = access_token {
        request.set_header("Authorization", format!("Bearer {token}"));
    }
    let resp = transport.send(request).await?;
    if !resp.is_success() {
        return Err(AuthError::Status {
            status: resp.status,
            body: resp.body,
        });
    }
    Ok(())
}

fn decode_grant(resp: &HttpResponse) -> Result<TokenGrant, AuthError> {
    if !resp.is_success() {
        return Err(AuthError::Status {
            status: resp.status,
            body: resp.body.clone(),
        });
    }
    Ok(resp.json()?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReqwestTransport;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn setup(server: &MockServer) -> (ReqwestTransport, ApiSettings) {
        let api = ApiSettings {
            base_url: server.uri(),
            ..Default::default()
        };
        (ReqwestTransport::from_settings(&api).unwrap(), api)
    }

    #[tokio::test]
    async fn refresh_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "T2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (transport, api) = setup(&server);
        let grant = refresh_access_token(&transport, &api).await.unwrap();
        assert_eq!(grant.access_token, "T2");
        assert!(grant.user.is_none());
    }

    #[tokio::test]
    async fn refresh_does_not_send_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "T2"
            })))
            .mount(&server)
            .await;

        let (transport, api) = setup(&server);
        assert!(refresh_access_token(&transport, &api).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_string("refresh cookie expired"))
            .mount(&server)
            .await;

        let (transport, api) = setup(&server);
        let err = refresh_access_token(&transport, &api).await.unwrap_err();
        assert_matches!(err, AuthError::Status { status: 401, .. });
        assert!(err.to_string().contains("refresh cookie expired"));
    }

    #[tokio::test]
    async fn refresh_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let (transport, api) = setup(&server);
        let err = refresh_access_token(&transport, &api).await.unwrap_err();
        assert_matches!(err, AuthError::Json(_));
    }

    #[tokio::test]
    async fn login_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(serde_json::json!({
                "email": "ada@example.com",
                "password": "hunter2"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "T1",
                "user": {"id": "u1", "email": "ada@example.com"}
            })))
            .mount(&server)
            .await;

        let (transport, api) = setup(&server);
        let (token, user) = login(&transport, &api, "ada@example.com", "hunter2")
            .await
            .unwrap();
        assert_eq!(token, "T1");
        assert_eq!(user.id, "u1");
    }

    #[tokio::test]
    async fn login_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (transport, api) = setup(&server);
        let err = login(&transport, &api, "ada@example.com", "wrong")
            .await
            .unwrap_err();
        assert_matches!(err, AuthError::AuthFailed(_));
    }

    #[tokio::test]
    async fn login_without_user_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"accessToken": "T1"})),
            )
            .mount(&server)
            .await;

        let (transport, api) = setup(&server);
        let err = login(&transport, &api, "a", "b").await.unwrap_err();
        assert_matches!(err, AuthError::AuthFailed(_));
    }

    #[tokio::test]
    async fn logout_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .and(header("authorization", "Bearer T1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (transport, api) = setup(&server);
        logout(&transport, &api, Some("T1")).await.unwrap();
    }
}
