//! Catalog/order collaborator and its tools
//!
//! The order service is an external system. Everything the conversation can
//! do to it goes through the [`OrderApi`] trait and is exposed to the model
//! as tools; the orchestrator never touches the collaborator directly.

use super::{default_tool_timeout, ToolCallResult, ToolHandler, ToolRegistry, ToolSpec};
use crate::config::{Settings, OUTBOUND_HTTP_TIMEOUT_SECS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors from the order collaborator
#[derive(Debug, Error)]
pub enum OrderApiError {
    /// Transport-level failure
    #[error("order service request failed: {0}")]
    Request(String),
    /// The service answered with an error
    #[error("order service error: {0}")]
    Api(String),
    /// The referenced entity does not exist
    #[error("not found")]
    NotFound,
}

/// One sellable item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    /// Item identifier
    pub id: i64,
    /// Display name
    pub name: String,
    /// Unit price in minor currency units
    pub price: i64,
    /// Menu category
    pub category: String,
    /// Product photo, if any
    pub photo_url: Option<String>,
}

/// One order line as the model supplies it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    /// Menu item id
    pub product_id: i64,
    /// Requested quantity
    pub quantity: u32,
}

/// Order state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    /// Order identifier
    pub order_id: i64,
    /// Current status
    pub status: String,
    /// Order total in minor currency units
    pub total: i64,
    /// Estimated minutes to delivery, when known
    pub eta_minutes: Option<u32>,
}

/// Request to create an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Customer phone, injected by the dispatcher
    pub phone: String,
    /// Customer name
    pub customer_name: String,
    /// Delivery address
    pub delivery_address: String,
    /// Order lines
    pub items: Vec<OrderLine>,
    /// Free-form notes
    #[serde(default)]
    pub notes: Option<String>,
}

/// Request to replace the lines of a pending order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderRequest {
    /// Customer phone, injected by the dispatcher
    pub phone: String,
    /// Order to update
    pub order_id: i64,
    /// New order lines
    pub items: Vec<OrderLine>,
}

/// Narrow interface to the catalog/order service
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Lists available menu items, optionally filtered by category.
    async fn list_menu(&self, category: Option<&str>) -> Result<Vec<MenuItem>, OrderApiError>;
    /// Creates an order.
    async fn create_order(&self, req: &CreateOrderRequest) -> Result<OrderSummary, OrderApiError>;
    /// Replaces the lines of a pending order.
    async fn update_order(&self, req: &UpdateOrderRequest) -> Result<OrderSummary, OrderApiError>;
    /// Cancels a pending order.
    async fn cancel_order(&self, phone: &str, order_id: i64) -> Result<OrderSummary, OrderApiError>;
    /// Fetches the current state of an order.
    async fn order_status(&self, order_id: i64) -> Result<OrderSummary, OrderApiError>;
    /// Fetches the customer's most recent order, if any.
    async fn last_order(&self, phone: &str) -> Result<Option<OrderSummary>, OrderApiError>;
}

/// HTTP client for the order service
pub struct HttpOrderApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpOrderApi {
    /// Creates a client from settings.
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(OUTBOUND_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: settings.catalog_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, OrderApiError> {
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(OrderApiError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrderApiError::Api(format!("{status} - {body}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| OrderApiError::Api(e.to_string()))
    }
}

#[async_trait]
impl OrderApi for HttpOrderApi {
    async fn list_menu(&self, category: Option<&str>) -> Result<Vec<MenuItem>, OrderApiError> {
        let mut request = self.http.get(format!("{}/menu", self.base_url));
        if let Some(category) = category {
            request = request.query(&[("category", category)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| OrderApiError::Request(e.to_string()))?;
        Self::parse(response).await
    }

    async fn create_order(&self, req: &CreateOrderRequest) -> Result<OrderSummary, OrderApiError> {
        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .json(req)
            .send()
            .await
            .map_err(|e| OrderApiError::Request(e.to_string()))?;
        Self::parse(response).await
    }

    async fn update_order(&self, req: &UpdateOrderRequest) -> Result<OrderSummary, OrderApiError> {
        let response = self
            .http
            .put(format!("{}/orders/{}", self.base_url, req.order_id))
            .json(req)
            .send()
            .await
            .map_err(|e| OrderApiError::Request(e.to_string()))?;
        Self::parse(response).await
    }

    async fn cancel_order(
        &self,
        phone: &str,
        order_id: i64,
    ) -> Result<OrderSummary, OrderApiError> {
        let response = self
            .http
            .post(format!("{}/orders/{order_id}/cancel", self.base_url))
            .json(&json!({ "phone": phone }))
            .send()
            .await
            .map_err(|e| OrderApiError::Request(e.to_string()))?;
        Self::parse(response).await
    }

    async fn order_status(&self, order_id: i64) -> Result<OrderSummary, OrderApiError> {
        let response = self
            .http
            .get(format!("{}/orders/{order_id}", self.base_url))
            .send()
            .await
            .map_err(|e| OrderApiError::Request(e.to_string()))?;
        Self::parse(response).await
    }

    async fn last_order(&self, phone: &str) -> Result<Option<OrderSummary>, OrderApiError> {
        let response = self
            .http
            .get(format!("{}/orders/last", self.base_url))
            .query(&[("phone", phone)])
            .send()
            .await
            .map_err(|e| OrderApiError::Request(e.to_string()))?;
        match Self::parse(response).await {
            Ok(summary) => Ok(Some(summary)),
            Err(OrderApiError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn collaborator_failure(e: &OrderApiError) -> ToolCallResult {
    warn!("Order service call failed: {e}");
    match e {
        OrderApiError::NotFound => ToolCallResult::failure(
            "not_found",
            "No encontramos ese pedido.",
            "Pide al cliente el número de pedido correcto o consulta su último pedido.",
        ),
        _ => ToolCallResult::failure(
            "collaborator_error",
            "No pudimos completar la operación en este momento.",
            "Dile al cliente que lo intente de nuevo en unos minutos.",
        ),
    }
}

fn bad_args(e: &serde_json::Error) -> ToolCallResult {
    warn!("Tool arguments failed validation: {e}");
    ToolCallResult::failure(
        "invalid_arguments",
        "Faltan datos o tienen el formato equivocado.",
        "Pregunta al cliente por los datos que faltan y vuelve a intentar.",
    )
}

macro_rules! parse_args {
    ($ty:ty, $args:expr) => {
        match serde_json::from_value::<$ty>($args) {
            Ok(parsed) => parsed,
            Err(e) => return bad_args(&e),
        }
    };
}

#[derive(Debug, Deserialize)]
struct MenuArgs {
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelOrderArgs {
    phone: String,
    order_id: i64,
}

#[derive(Debug, Deserialize)]
struct OrderStatusArgs {
    order_id: i64,
}

#[derive(Debug, Deserialize)]
struct LastOrderArgs {
    phone: String,
}

struct GetMenuTool(Arc<dyn OrderApi>);

#[async_trait]
impl ToolHandler for GetMenuTool {
    async fn call(&self, args: Value) -> ToolCallResult {
        let args = parse_args!(MenuArgs, args);
        match self.0.list_menu(args.category.as_deref()).await {
            Ok(items) => ToolCallResult::ok(json!({ "items": items })),
            Err(e) => collaborator_failure(&e),
        }
    }
}

struct CreateOrderTool(Arc<dyn OrderApi>);

#[async_trait]
impl ToolHandler for CreateOrderTool {
    async fn call(&self, args: Value) -> ToolCallResult {
        let req = parse_args!(CreateOrderRequest, args);
        if req.items.is_empty() {
            return ToolCallResult::failure(
                "items_empty",
                "El pedido no tiene productos.",
                "Pregunta al cliente qué productos quiere antes de crear el pedido.",
            );
        }
        match self.0.create_order(&req).await {
            Ok(summary) => ToolCallResult::ok(json!(summary)),
            Err(e) => collaborator_failure(&e),
        }
    }
}

struct UpdateOrderTool(Arc<dyn OrderApi>);

#[async_trait]
impl ToolHandler for UpdateOrderTool {
    async fn call(&self, args: Value) -> ToolCallResult {
        let req = parse_args!(UpdateOrderRequest, args);
        match self.0.update_order(&req).await {
            Ok(summary) => ToolCallResult::ok(json!(summary)),
            Err(e) => collaborator_failure(&e),
        }
    }
}

struct CancelOrderTool(Arc<dyn OrderApi>);

#[async_trait]
impl ToolHandler for CancelOrderTool {
    async fn call(&self, args: Value) -> ToolCallResult {
        let args = parse_args!(CancelOrderArgs, args);
        match self.0.cancel_order(&args.phone, args.order_id).await {
            Ok(summary) => ToolCallResult::ok(json!(summary)),
            Err(e) => collaborator_failure(&e),
        }
    }
}

struct OrderStatusTool(Arc<dyn OrderApi>);

#[async_trait]
impl ToolHandler for OrderStatusTool {
    async fn call(&self, args: Value) -> ToolCallResult {
        let args = parse_args!(OrderStatusArgs, args);
        match self.0.order_status(args.order_id).await {
            Ok(summary) => ToolCallResult::ok(json!(summary)),
            Err(e) => collaborator_failure(&e),
        }
    }
}

struct LastOrderTool(Arc<dyn OrderApi>);

#[async_trait]
impl ToolHandler for LastOrderTool {
    async fn call(&self, args: Value) -> ToolCallResult {
        let args = parse_args!(LastOrderArgs, args);
        match self.0.last_order(&args.phone).await {
            Ok(Some(summary)) => ToolCallResult::ok(json!(summary)),
            Ok(None) => ToolCallResult::failure(
                "not_found",
                "El cliente no tiene pedidos anteriores.",
                "Ofrece al cliente crear un pedido nuevo.",
            ),
            Err(e) => collaborator_failure(&e),
        }
    }
}

/// Registers the catalog/order tools against the given collaborator.
pub fn register_catalog_tools(registry: &mut ToolRegistry, api: Arc<dyn OrderApi>) {
    registry.register(get_menu_spec(Arc::clone(&api)));
    registry.register(create_order_spec(Arc::clone(&api)));
    registry.register(update_order_spec(Arc::clone(&api)));
    registry.register(cancel_order_spec(Arc::clone(&api)));
    registry.register(order_status_spec(Arc::clone(&api)));
    registry.register(last_order_spec(api));
}

fn get_menu_spec(api: Arc<dyn OrderApi>) -> ToolSpec {
    ToolSpec {
        name: "get_menu".to_string(),
        description: "Consulta el menú de pavés disponibles, con precios y fotos.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "description": "Categoría opcional para filtrar el menú"
                }
            }
        }),
        timeout: default_tool_timeout(),
        inject_sender: false,
        handler: Arc::new(GetMenuTool(api)),
    }
}

fn create_order_spec(api: Arc<dyn OrderApi>) -> ToolSpec {
    ToolSpec {
        name: "create_order".to_string(),
        description: "Crea un pedido con los productos elegidos por el cliente.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "customer_name": { "type": "string", "description": "Nombre del cliente" },
                "delivery_address": { "type": "string", "description": "Dirección de entrega" },
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "product_id": { "type": "integer" },
                            "quantity": { "type": "integer", "minimum": 1 }
                        },
                        "required": ["product_id", "quantity"]
                    }
                },
                "notes": { "type": "string", "description": "Notas opcionales del pedido" }
            },
            "required": ["customer_name", "delivery_address", "items"]
        }),
        timeout: default_tool_timeout(),
        inject_sender: true,
        handler: Arc::new(CreateOrderTool(api)),
    }
}

fn update_order_spec(api: Arc<dyn OrderApi>) -> ToolSpec {
    ToolSpec {
        name: "update_order".to_string(),
        description: "Reemplaza los productos de un pedido pendiente.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "integer" },
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "product_id": { "type": "integer" },
                            "quantity": { "type": "integer", "minimum": 1 }
                        },
                        "required": ["product_id", "quantity"]
                    }
                }
            },
            "required": ["order_id", "items"]
        }),
        timeout: default_tool_timeout(),
        inject_sender: true,
        handler: Arc::new(UpdateOrderTool(api)),
    }
}

fn cancel_order_spec(api: Arc<dyn OrderApi>) -> ToolSpec {
    ToolSpec {
        name: "cancel_order".to_string(),
        description: "Cancela un pedido pendiente del cliente.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "integer" }
            },
            "required": ["order_id"]
        }),
        timeout: default_tool_timeout(),
        inject_sender: true,
        handler: Arc::new(CancelOrderTool(api)),
    }
}

fn order_status_spec(api: Arc<dyn OrderApi>) -> ToolSpec {
    ToolSpec {
        name: "get_order_status".to_string(),
        description: "Consulta el estado de un pedido por su número.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "integer" }
            },
            "required": ["order_id"]
        }),
        timeout: default_tool_timeout(),
        inject_sender: false,
        handler: Arc::new(OrderStatusTool(api)),
    }
}

fn last_order_spec(api: Arc<dyn OrderApi>) -> ToolSpec {
    ToolSpec {
        name: "get_last_order".to_string(),
        description: "Consulta el último pedido del cliente.".to_string(),
        parameters: json!({ "type": "object", "properties": {} }),
        timeout: default_tool_timeout(),
        inject_sender: true,
        handler: Arc::new(LastOrderTool(api)),
    }
}
