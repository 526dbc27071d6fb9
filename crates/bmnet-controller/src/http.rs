//! reqwest-backed [`ControllerClient`].
//!
//! # API Endpoints
//!
//! - `POST /v2.0/ports` - Create port
//! - `GET /v2.0/ports/{id}` - Show port
//! - `PUT /v2.0/ports/{id}` - Update port
//! - `DELETE /v2.0/ports/{id}` - Delete port
//! - `GET /v2.0/ports?network_id=..&mac_address=..` - List ports
//! - `GET /v2.0/security-groups?fields=id` - List security groups
//! - `GET /v2.0/networks?id=..|name=..` - List networks

use async_trait::async_trait;
use bmnet_common::{NetError, NetResult};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use std::sync::Arc;

use crate::client::ControllerClient;
use crate::session::{ControllerSession, AUTH_TOKEN_HEADER};
use crate::types::{
    ErrorEnvelope, NetworkFilter, NetworksEnvelope, PortEnvelope, PortFilter, PortSpec,
    PortUpdate, PortsEnvelope, SecurityGroupsEnvelope, VirtualPort,
};

/// Controller client speaking the v2.0 networking API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpControllerClient {
    session: Arc<ControllerSession>,
    token_override: Option<String>,
}

impl HttpControllerClient {
    /// Client authenticating through `session`
    pub fn new(session: Arc<ControllerSession>) -> Self {
        Self {
            session,
            token_override: None,
        }
    }

    /// `<endpoint>/v2.0/<segments>`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> NetResult<Url> {
        let endpoint = self.session.endpoint();
        let mut url = Url::parse(endpoint).map_err(|e| {
            NetError::invalid(format!("invalid controller endpoint {}: {}", endpoint, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| NetError::invalid(format!("controller endpoint {} is not a base URL", endpoint)))?
            .pop_if_empty()
            .push("v2.0")
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, segments: &[&str]) -> NetResult<RequestBuilder> {
        let builder = self.session.http().request(method, self.url(segments)?);
        let token = match &self.token_override {
            Some(token) => Some(token.clone()),
            None => self.session.token().await?,
        };
        Ok(match token {
            Some(token) => builder.header(AUTH_TOKEN_HEADER, token),
            None => builder,
        })
    }

    async fn send(builder: RequestBuilder, what: &str) -> NetResult<Response> {
        builder
            .send()
            .await
            .map_err(|e| NetError::unavailable(format!("{} failed: {}", what, e)))
    }

    /// Map a non-success response to the error taxonomy.
    async fn check(response: Response, what: &str) -> NetResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body).unwrap_or_else(|| format!("HTTP {}", status));

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(NetError::unavailable(
                format!("{} not authorized: {}", what, message),
            )),
            s if s.is_server_error() => Err(NetError::unavailable(format!(
                "{} failed with HTTP {}: {}",
                what, s, message
            ))),
            s => Err(NetError::rejected(s.as_u16(), message)),
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> NetResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| NetError::unavailable(format!("{}: malformed response: {}", what, e)))
    }
}

/// Extract the controller's message from an error body.
fn error_message(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => Some(envelope.error.message),
        _ => Some(body.trim().to_string()),
    }
}

#[async_trait]
impl ControllerClient for HttpControllerClient {
    async fn create_port(&self, spec: &PortSpec) -> NetResult<VirtualPort> {
        let what = "create port";
        let builder = self
            .request(Method::POST, &["ports"])
            .await?
            .json(&PortEnvelope { port: spec });
        let response = Self::check(Self::send(builder, what).await?, what).await?;
        let created: PortEnvelope<VirtualPort> = Self::json(response, what).await?;

        tracing::debug!(
            vif = %created.port.id,
            network = %spec.network_id,
            mac = %spec.mac_address,
            "Created controller port"
        );
        Ok(created.port)
    }

    async fn delete_port(&self, port_id: &str) -> NetResult<()> {
        let what = "delete port";
        let builder = self
            .request(Method::DELETE, &["ports", port_id])
            .await?;
        Self::check(Self::send(builder, what).await?, what).await?;
        tracing::debug!(vif = %port_id, "Deleted controller port");
        Ok(())
    }

    async fn update_port(&self, port_id: &str, update: &PortUpdate) -> NetResult<VirtualPort> {
        let what = "update port";
        let builder = self
            .request(Method::PUT, &["ports", port_id])
            .await?
            .json(&PortEnvelope { port: update });
        let response = Self::check(Self::send(builder, what).await?, what).await?;
        let updated: PortEnvelope<VirtualPort> = Self::json(response, what).await?;
        Ok(updated.port)
    }

    async fn show_port(&self, port_id: &str) -> NetResult<Option<VirtualPort>> {
        let what = "show port";
        let builder = self
            .request(Method::GET, &["ports", port_id])
            .await?;
        let response = Self::send(builder, what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response, what).await?;
        let shown: PortEnvelope<VirtualPort> = Self::json(response, what).await?;
        Ok(Some(shown.port))
    }

    async fn list_ports(&self, filter: &PortFilter) -> NetResult<Vec<VirtualPort>> {
        let what = "list ports";
        let builder = self
            .request(Method::GET, &["ports"])
            .await?
            .query(&filter.to_query());
        let response = Self::check(Self::send(builder, what).await?, what).await?;
        let listed: PortsEnvelope = Self::json(response, what).await?;
        Ok(listed.ports)
    }

    async fn list_security_groups(&self) -> NetResult<Vec<String>> {
        let what = "list security groups";
        let builder = self
            .request(Method::GET, &["security-groups"])
            .await?
            .query(&[("fields", "id")]);
        let response = Self::check(Self::send(builder, what).await?, what).await?;
        let listed: SecurityGroupsEnvelope = Self::json(response, what).await?;
        Ok(listed.security_groups.into_iter().map(|g| g.id).collect())
    }

    async fn list_networks(&self, filter: &NetworkFilter) -> NetResult<Vec<String>> {
        let what = "list networks";
        let mut query = filter.to_query();
        query.push(("fields", "id".to_string()));
        let builder = self.request(Method::GET, &["networks"]).await?.query(&query);
        let response = Self::check(Self::send(builder, what).await?, what).await?;
        let listed: NetworksEnvelope = Self::json(response, what).await?;
        Ok(listed.networks.into_iter().map(|n| n.id).collect())
    }

    fn scoped(&self, token: Option<&str>) -> Arc<dyn ControllerClient> {
        let mut client = self.clone();
        if let Some(token) = token {
            client.token_override = Some(token.to_string());
        }
        Arc::new(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AuthStrategy, SessionConfig};
    use mockito::{Matcher, Server, ServerGuard};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const PORT_BODY: &str = r#"{"port": {"id": "vif-1", "network_id": "net-1", "mac_address": "52:54:00:cf:2d:01", "admin_state_up": true}}"#;

    fn client_for(server: &ServerGuard) -> HttpControllerClient {
        let mut config = SessionConfig::new(server.url());
        config.auth = AuthStrategy::Token("tok-1".to_string());
        HttpControllerClient::new(ControllerSession::new(config).unwrap())
    }

    #[test]
    fn test_error_message_unwraps_controller_error() {
        let body = r#"{"NeutronError": {"type": "MacAddressInUse", "message": "MAC in use", "detail": ""}}"#;
        assert_eq!(error_message(body), Some("MAC in use".to_string()));
    }

    #[test]
    fn test_error_message_falls_back_to_body() {
        assert_eq!(error_message("  bad request \n"), Some("bad request".to_string()));
        assert_eq!(error_message(""), None);
    }

    #[test]
    fn test_url_layout() {
        let session = ControllerSession::new(SessionConfig::new("http://ctl:9696/")).unwrap();
        let client = HttpControllerClient::new(session);
        assert_eq!(
            client.url(&["ports", "abc"]).unwrap().as_str(),
            "http://ctl:9696/v2.0/ports/abc"
        );

        let session = ControllerSession::new(SessionConfig::new("http://ctl/network")).unwrap();
        let client = HttpControllerClient::new(session);
        assert_eq!(
            client.url(&["networks"]).unwrap().as_str(),
            "http://ctl/network/v2.0/networks"
        );
    }

    #[test]
    fn test_url_encodes_ids() {
        let session = ControllerSession::new(SessionConfig::new("http://ctl:9696")).unwrap();
        let client = HttpControllerClient::new(session);
        assert_eq!(
            client.url(&["ports", "../a b"]).unwrap().as_str(),
            "http://ctl:9696/v2.0/ports/..%2Fa%20b"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        let session = ControllerSession::new(SessionConfig::new("not a url")).unwrap();
        let client = HttpControllerClient::new(session);
        assert!(matches!(
            client.url(&["ports"]),
            Err(NetError::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_port_sends_envelope_and_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v2.0/ports")
            .match_header(AUTH_TOKEN_HEADER, "tok-1")
            .match_body(Matcher::Json(json!({
                "port": {
                    "network_id": "net-1",
                    "admin_state_up": true,
                    "mac_address": "52:54:00:cf:2d:01",
                    "device_owner": "baremetal:none"
                }
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(PORT_BODY)
            .create_async()
            .await;

        let mut spec = PortSpec::new("net-1", "52:54:00:cf:2d:01");
        spec.device_owner = Some("baremetal:none".to_string());
        let port = client_for(&server).create_port(&spec).await.unwrap();

        mock.assert_async().await;
        assert_eq!(port.id, "vif-1");
        assert_eq!(port.network_id, "net-1");
    }

    #[tokio::test]
    async fn test_conflict_is_rejected_with_controller_message() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v2.0/ports")
            .with_status(409)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"NeutronError": {"type": "MacAddressInUse", "message": "Unable to complete operation: MAC in use", "detail": ""}}"#,
            )
            .create_async()
            .await;

        let err = client_for(&server)
            .create_port(&PortSpec::new("net-1", "52:54:00:cf:2d:01"))
            .await
            .unwrap_err();
        match err {
            NetError::ControllerRejected { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "Unable to complete operation: MAC in use");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_auth_and_server_errors_are_unavailable() {
        for status in [401, 403, 500, 503] {
            let mut server = Server::new_async().await;
            let _mock = server
                .mock("DELETE", "/v2.0/ports/vif-1")
                .with_status(status)
                .with_body("nope")
                .create_async()
                .await;

            let err = client_for(&server).delete_port("vif-1").await.unwrap_err();
            assert!(
                matches!(err, NetError::ControllerUnavailable { .. }),
                "HTTP {status}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_delete_missing_port_is_rejected_404() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("DELETE", "/v2.0/ports/vif-9")
            .with_status(404)
            .create_async()
            .await;

        let err = client_for(&server).delete_port("vif-9").await.unwrap_err();
        assert!(matches!(err, NetError::ControllerRejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_show_missing_port_is_none() {
        let mut server = Server::new_async().await;
        let _missing = server
            .mock("GET", "/v2.0/ports/vif-9")
            .with_status(404)
            .create_async()
            .await;
        let _found = server
            .mock("GET", "/v2.0/ports/vif-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(PORT_BODY)
            .create_async()
            .await;

        let client = client_for(&server);
        assert_eq!(client.show_port("vif-9").await.unwrap(), None);
        let found = client.show_port("vif-1").await.unwrap().unwrap();
        assert_eq!(found.mac_address, "52:54:00:cf:2d:01");
    }

    #[tokio::test]
    async fn test_list_ports_query_and_update_body() {
        let mut server = Server::new_async().await;
        let list = server
            .mock("GET", "/v2.0/ports")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("network_id".into(), "net-1".into()),
                Matcher::UrlEncoded("mac_address".into(), "52:54:00:cf:2d:01".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ports": [{"id": "vif-1"}]}"#)
            .create_async()
            .await;
        let update = server
            .mock("PUT", "/v2.0/ports/vif-1")
            .match_body(Matcher::Json(json!({
                "port": {"binding:host_id": "", "binding:profile": {}}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(PORT_BODY)
            .create_async()
            .await;

        let client = client_for(&server);
        let ports = client
            .list_ports(&PortFilter::on_network("net-1").with_macs(["52:54:00:cf:2d:01"]))
            .await
            .unwrap();
        assert_eq!(ports.len(), 1);
        client
            .update_port("vif-1", &PortUpdate::unbind())
            .await
            .unwrap();

        list.assert_async().await;
        update.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_body_is_unavailable() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v2.0/security-groups")
            .match_query(Matcher::UrlEncoded("fields".into(), "id".into()))
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let err = client_for(&server).list_security_groups().await.unwrap_err();
        assert!(matches!(err, NetError::ControllerUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_controller_is_unavailable() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let session = ControllerSession::new(SessionConfig::new("http://127.0.0.1:9")).unwrap();
        let client = HttpControllerClient::new(session);
        let err = client.show_port("v1").await.unwrap_err();
        assert!(matches!(err, NetError::ControllerUnavailable { .. }));
    }
}
