use crate::{
    credentials::CredentialProvider,
    error::GatewayError,
    id::{AccountId, ContractId, OrderId},
    types::{Contract, OrderRequest, OrderSnapshot, PositionSnapshot},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{fmt::Debug, future::Future, time::Duration};
use tracing::debug;
use url::Url;

/// Gateway error code signalling that the target of a close / cancel is no
/// longer open. Treated as success by every implementation (idempotent
/// enforcement).
pub const CODE_TARGET_NOT_OPEN: i64 = 404;

/// REST capability set the daemon consumes.
///
/// Implementations must treat closing an already-closed position and
/// cancelling an already-terminal order as a no-op success, not a failure.
pub trait GatewayRestApi
where
    Self: Debug + Send + Sync,
{
    fn search_open_positions(
        &self,
        account: AccountId,
    ) -> impl Future<Output = Result<Vec<PositionSnapshot>, GatewayError>> + Send;

    fn close_position(
        &self,
        account: AccountId,
        contract: &ContractId,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Close `quantity` contracts of the position, leaving the remainder
    /// working.
    fn close_position_partial(
        &self,
        account: AccountId,
        contract: &ContractId,
        quantity: u32,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn search_open_orders(
        &self,
        account: AccountId,
    ) -> impl Future<Output = Result<Vec<OrderSnapshot>, GatewayError>> + Send;

    fn cancel_order(
        &self,
        account: AccountId,
        order: OrderId,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn place_order(
        &self,
        request: &OrderRequest,
    ) -> impl Future<Output = Result<OrderId, GatewayError>> + Send;

    fn contract_by_id(
        &self,
        contract: &ContractId,
    ) -> impl Future<Output = Result<Contract, GatewayError>> + Send;
}

/// Default JSON/HTTP implementation of [`GatewayRestApi`].
#[derive(Debug, Clone)]
pub struct RestClient<Credentials> {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

impl<Credentials> RestClient<Credentials>
where
    Credentials: CredentialProvider,
{
    /// Construct a client with the provided request timeout applied to every
    /// call.
    pub fn new(
        base_url: Url,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    async fn post<Request, Response>(
        &self,
        path: &str,
        body: &Request,
    ) -> Result<Response, GatewayError>
    where
        Request: Serialize + Sync + ?Sized,
        Response: DeserializeOwned,
    {
        let url = self.base_url.join(path)?;
        let token = self.credentials.bearer_token().await?;

        debug!(%url, "gateway REST request");

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Http(error)
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(GatewayError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(GatewayError::Server(status.as_u16()));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GatewayError::AuthRejected);
        }
        if status.is_client_error() {
            return Err(GatewayError::Rejected(status.as_u16()));
        }

        let payload = response.text().await?;
        serde_json::from_str(&payload).map_err(|error| GatewayError::Deserialise { error, payload })
    }

    /// Unwrap the gateway's `{success, errorCode, errorMessage}` envelope,
    /// mapping [`CODE_TARGET_NOT_OPEN`] to an idempotent success.
    fn check_envelope(envelope: &Envelope, idempotent: bool) -> Result<(), GatewayError> {
        if envelope.success {
            return Ok(());
        }
        if idempotent && envelope.error_code == Some(CODE_TARGET_NOT_OPEN) {
            return Ok(());
        }
        Err(GatewayError::Api {
            code: envelope.error_code,
            message: envelope.error_message.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    success: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(flatten)]
    envelope: Envelope,
    #[serde(default)]
    positions: Vec<PositionSnapshot>,
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    #[serde(flatten)]
    envelope: Envelope,
    #[serde(default)]
    orders: Vec<OrderSnapshot>,
}

#[derive(Debug, Deserialize)]
struct ContractResponse {
    #[serde(flatten)]
    envelope: Envelope,
    contract: Option<Contract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderResponse {
    #[serde(flatten)]
    envelope: Envelope,
    order_id: Option<OrderId>,
}

impl<Credentials> GatewayRestApi for RestClient<Credentials>
where
    Credentials: CredentialProvider,
{
    async fn search_open_positions(
        &self,
        account: AccountId,
    ) -> Result<Vec<PositionSnapshot>, GatewayError> {
        let response: PositionsResponse = self
            .post(
                "/api/Position/searchOpen",
                &serde_json::json!({ "accountId": account }),
            )
            .await?;

        Self::check_envelope(&response.envelope, false)?;
        Ok(response.positions)
    }

    async fn close_position(
        &self,
        account: AccountId,
        contract: &ContractId,
    ) -> Result<(), GatewayError> {
        let response: Envelope = self
            .post(
                "/api/Position/close",
                &serde_json::json!({ "accountId": account, "contractId": contract }),
            )
            .await?;

        Self::check_envelope(&response, true)
    }

    async fn close_position_partial(
        &self,
        account: AccountId,
        contract: &ContractId,
        quantity: u32,
    ) -> Result<(), GatewayError> {
        let response: Envelope = self
            .post(
                "/api/Position/partialClose",
                &serde_json::json!({
                    "accountId": account,
                    "contractId": contract,
                    "size": quantity,
                }),
            )
            .await?;

        Self::check_envelope(&response, true)
    }

    async fn search_open_orders(
        &self,
        account: AccountId,
    ) -> Result<Vec<OrderSnapshot>, GatewayError> {
        let response: OrdersResponse = self
            .post(
                "/api/Order/searchOpen",
                &serde_json::json!({ "accountId": account }),
            )
            .await?;

        Self::check_envelope(&response.envelope, false)?;
        Ok(response.orders)
    }

    async fn cancel_order(&self, account: AccountId, order: OrderId) -> Result<(), GatewayError> {
        let response: Envelope = self
            .post(
                "/api/Order/cancel",
                &serde_json::json!({ "accountId": account, "orderId": order }),
            )
            .await?;

        Self::check_envelope(&response, true)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderId, GatewayError> {
        let response: PlaceOrderResponse = self.post("/api/Order/place", request).await?;

        Self::check_envelope(&response.envelope, false)?;
        response.order_id.ok_or_else(|| GatewayError::Api {
            code: None,
            message: "order accepted without an orderId".to_string(),
        })
    }

    async fn contract_by_id(&self, contract: &ContractId) -> Result<Contract, GatewayError> {
        let response: ContractResponse = self
            .post(
                "/api/Contract/searchById",
                &serde_json::json!({ "contractId": contract }),
            )
            .await?;

        Self::check_envelope(&response.envelope, false)?;
        response.contract.ok_or_else(|| GatewayError::Api {
            code: None,
            message: format!("no contract data returned for {contract}"),
        })
    }
}
