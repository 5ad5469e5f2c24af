//! Hub service REST adapter

use crate::service::{MethodResult, ServiceCredential, ServiceError, ServiceHub, Twin};
use async_trait::async_trait;
use iotbridge_agent::hub::API_VERSION;
use reqwest::header::{AUTHORIZATION, IF_MATCH};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

const TOKEN_TTL: Duration = Duration::from_secs(3600);
const METHOD_RESPONSE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct TwinBody {
    #[serde(default)]
    etag: String,
    #[serde(default)]
    properties: TwinProperties,
}

#[derive(Debug, Default, Deserialize)]
struct TwinProperties {
    #[serde(default)]
    desired: Map<String, Value>,
}

pub struct RestServiceHub {
    http: reqwest::Client,
    credential: ServiceCredential,
}

impl RestServiceHub {
    pub fn new(credential: ServiceCredential, request_timeout: Duration) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Self { http, credential })
    }

    fn twin_url(&self, device_id: &str) -> String {
        format!(
            "https://{}/twins/{}?api-version={}",
            self.credential.host_name,
            urlencoding::encode(device_id),
            API_VERSION
        )
    }

    fn methods_url(&self, device_id: &str) -> String {
        format!(
            "https://{}/twins/{}/methods?api-version={}",
            self.credential.host_name,
            urlencoding::encode(device_id),
            API_VERSION
        )
    }
}

fn transport(e: reqwest::Error) -> ServiceError {
    ServiceError::Transport(e.to_string())
}

async fn check_status(device_id: &str, response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::PRECONDITION_FAILED => Err(ServiceError::ConcurrencyConflict {
            device: device_id.to_string(),
        }),
        StatusCode::NOT_FOUND => Err(ServiceError::NotFound {
            device: device_id.to_string(),
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ServiceError::Auth(status.to_string())),
        _ => Err(ServiceError::Http {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        }),
    }
}

#[async_trait]
impl ServiceHub for RestServiceHub {
    async fn get_twin(&self, device_id: &str) -> Result<Twin, ServiceError> {
        debug!("GET twin {}", device_id);
        let response = self
            .http
            .get(self.twin_url(device_id))
            .header(AUTHORIZATION, self.credential.token(TOKEN_TTL)?)
            .send()
            .await
            .map_err(transport)?;

        let body: TwinBody = check_status(device_id, response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))?;

        Ok(Twin {
            device_id: device_id.to_string(),
            etag: body.etag,
            desired: body.properties.desired,
        })
    }

    async fn update_desired(
        &self,
        device_id: &str,
        patch: Map<String, Value>,
        etag: &str,
    ) -> Result<(), ServiceError> {
        debug!("PATCH twin {} (etag {})", device_id, etag);
        let body = json!({ "properties": { "desired": patch } });
        let response = self
            .http
            .patch(self.twin_url(device_id))
            .header(AUTHORIZATION, self.credential.token(TOKEN_TTL)?)
            .header(IF_MATCH, format!("\"{}\"", etag))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        check_status(device_id, response).await?;
        Ok(())
    }

    async fn invoke_method(&self, device_id: &str, method: &str, payload: Value) -> Result<MethodResult, ServiceError> {
        debug!("POST method {} on {}", method, device_id);
        let body = json!({
            "methodName": method,
            "responseTimeoutInSeconds": METHOD_RESPONSE_TIMEOUT_SECS,
            "payload": payload,
        });
        let response = self
            .http
            .post(self.methods_url(device_id))
            .header(AUTHORIZATION, self.credential.token(TOKEN_TTL)?)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        check_status(device_id, response)
            .await?
            .json::<MethodResult>()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }
}
