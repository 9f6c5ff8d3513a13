//! Hermetic end-to-end tests of the message pipeline.
//!
//! The model, the messaging gateway and the order service are all replaced
//! with in-process doubles; everything between the envelope and the
//! outbound sends is the real pipeline.

use async_trait::async_trait;
use pavebot::bot::orchestrator::FALLBACK_REPLY;
use pavebot::bot::reply::DEFAULT_PROMPT;
use pavebot::bot::Orchestrator;
use pavebot::gateway::{GatewayError, MessagingGateway};
use pavebot::llm::{ChatModel, ChatResponse, LlmError, Message, ToolCall, ToolCallFunction, ToolDefinition};
use pavebot::pipeline::{InboundEnvelope, Outcome, Pipeline, THROTTLE_NOTICE};
use pavebot::store::{IdempotencyLedger, MemoryCounterStore, RateLimiter, SessionStore};
use pavebot::tools::catalog::{
    register_catalog_tools, CreateOrderRequest, MenuItem, OrderApi, OrderApiError, OrderSummary,
    UpdateOrderRequest,
};
use pavebot::tools::ToolRegistry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const MENU_PHOTO: &str = "https://cdn.example.com/menu/maracuya.jpg";

/// Model double: pops scripted responses, then falls back to a default.
struct ScriptedModel {
    script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    default_content: String,
    fail_always: bool,
}

impl ScriptedModel {
    fn with_default(default_content: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_content: default_content.to_string(),
            fail_always: false,
        }
    }

    fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_content: String::new(),
            fail_always: true,
        }
    }

    fn push(&self, response: Result<ChatResponse, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    fn text_response(content: &str) -> ChatResponse {
        ChatResponse {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
        }
    }

    fn tool_response(calls: &[(&str, &str)]) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: calls
                .iter()
                .enumerate()
                .map(|(i, (name, args))| ToolCall {
                    id: format!("call_{i}"),
                    function: ToolCallFunction {
                        name: (*name).to_string(),
                        arguments: (*args).to_string(),
                    },
                })
                .collect(),
            finish_reason: "tool_calls".to_string(),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat_with_tools(
        &self,
        _system_prompt: &str,
        _history: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        if self.fail_always {
            return Err(LlmError::NetworkError("connection refused".to_string()));
        }
        if let Ok(mut script) = self.script.lock() {
            if let Some(next) = script.pop_front() {
                return next;
            }
        }
        Ok(Self::text_response(&self.default_content))
    }
}

/// Gateway double recording every send.
#[derive(Default)]
struct RecordingGateway {
    texts: Mutex<Vec<(String, String)>>,
    images: Mutex<Vec<(String, String)>>,
}

impl RecordingGateway {
    fn texts(&self) -> Vec<(String, String)> {
        self.texts.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn images(&self) -> Vec<(String, String)> {
        self.images.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send_text(&self, to: &str, body: &str) -> Result<String, GatewayError> {
        if let Ok(mut texts) = self.texts.lock() {
            texts.push((to.to_string(), body.to_string()));
        }
        Ok("SM_out_text".to_string())
    }

    async fn send_image(&self, to: &str, url: &str, _caption: &str) -> Result<String, GatewayError> {
        if let Ok(mut images) = self.images.lock() {
            images.push((to.to_string(), url.to_string()));
        }
        Ok("SM_out_image".to_string())
    }
}

/// Order service double counting menu lookups.
#[derive(Default)]
struct CountingOrderApi {
    menu_calls: AtomicUsize,
}

#[async_trait]
impl OrderApi for CountingOrderApi {
    async fn list_menu(&self, _category: Option<&str>) -> Result<Vec<MenuItem>, OrderApiError> {
        self.menu_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![MenuItem {
            id: 1,
            name: "Maracuyá".to_string(),
            price: 18_000,
            category: "pave".to_string(),
            photo_url: Some(MENU_PHOTO.to_string()),
        }])
    }

    async fn create_order(&self, _req: &CreateOrderRequest) -> Result<OrderSummary, OrderApiError> {
        Ok(OrderSummary {
            order_id: 1234,
            status: "pending".to_string(),
            total: 36_000,
            eta_minutes: None,
        })
    }

    async fn update_order(&self, _req: &UpdateOrderRequest) -> Result<OrderSummary, OrderApiError> {
        Err(OrderApiError::NotFound)
    }

    async fn cancel_order(
        &self,
        _phone: &str,
        _order_id: i64,
    ) -> Result<OrderSummary, OrderApiError> {
        Err(OrderApiError::NotFound)
    }

    async fn order_status(&self, _order_id: i64) -> Result<OrderSummary, OrderApiError> {
        Err(OrderApiError::NotFound)
    }

    async fn last_order(&self, _phone: &str) -> Result<Option<OrderSummary>, OrderApiError> {
        Ok(None)
    }
}

struct Harness {
    pipeline: Arc<Pipeline>,
    gateway: Arc<RecordingGateway>,
    order_api: Arc<CountingOrderApi>,
}

fn harness(model: Arc<dyn ChatModel>, rate_limit: u64) -> Harness {
    let gateway = Arc::new(RecordingGateway::default());
    let order_api = Arc::new(CountingOrderApi::default());

    let mut registry = ToolRegistry::new();
    register_catalog_tools(&mut registry, Arc::clone(&order_api) as Arc<dyn OrderApi>);

    let orchestrator = Arc::new(Orchestrator::new(
        model,
        Arc::new(registry),
        Arc::new(SessionStore::new(3600, 1000)),
    ));
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(MemoryCounterStore::new(120, 1000)),
        rate_limit,
    ));
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(IdempotencyLedger::new(3600, 1000)),
        limiter,
        orchestrator,
        Arc::clone(&gateway) as Arc<dyn MessagingGateway>,
    ));

    Harness {
        pipeline,
        gateway,
        order_api,
    }
}

fn envelope(sender: &str, body: &str, sid: Option<&str>) -> InboundEnvelope {
    InboundEnvelope {
        sender: sender.to_string(),
        body: body.to_string(),
        message_sid: sid.map(str::to_string),
    }
}

#[tokio::test]
async fn menu_request_runs_one_tool_and_delivers_combined_reply() {
    let model = Arc::new(ScriptedModel::with_default(
        r#"{"type":"text","text_message":"¿Algo más?"}"#,
    ));
    model.push(Ok(ScriptedModel::tool_response(&[("get_menu", "{}")])));
    model.push(Ok(ScriptedModel::text_response(&format!(
        r#"{{"type":"combined","text_message":"Aquí tienes nuestro menú:","images":[{{"url":"{MENU_PHOTO}","caption":"Maracuyá"}}]}}"#
    ))));

    let h = harness(model, 30);
    let outcome = h
        .pipeline
        .handle_message(envelope("+1000", "menu?", Some("SM_A")))
        .await;

    assert_eq!(outcome, Outcome::Delivered);
    assert_eq!(h.order_api.menu_calls.load(Ordering::SeqCst), 1);

    let texts = h.gateway.texts();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].1, "Aquí tienes nuestro menú:");

    let images = h.gateway.images();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].1, MENU_PHOTO);
    assert!(images[0].1.starts_with("https://"));
}

#[tokio::test]
async fn duplicate_sid_produces_exactly_one_outbound_send() {
    let model = Arc::new(ScriptedModel::with_default(
        r#"{"type":"text","text_message":"¡Hola!"}"#,
    ));
    let h = harness(model, 30);

    let first = h.pipeline.handle_message(envelope("+1000", "hola", Some("SM_X")));
    let second = h.pipeline.handle_message(envelope("+1000", "hola", Some("SM_X")));
    let (a, b) = tokio::join!(first, second);

    let outcomes = [a, b];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == Outcome::Delivered)
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == Outcome::Duplicate)
            .count(),
        1
    );
    assert_eq!(h.gateway.texts().len(), 1);
}

/// Waits out the tail of the current rate window so a burst of messages
/// lands inside a single window.
async fn align_to_window_start() {
    let secs_into = chrono::Utc::now().timestamp().rem_euclid(60);
    if secs_into >= 55 {
        let wait = u64::try_from(61 - secs_into).unwrap_or(6);
        tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
    }
}

#[tokio::test]
async fn thirty_first_message_in_window_is_throttled() {
    let model = Arc::new(ScriptedModel::with_default(
        r#"{"type":"text","text_message":"¡Listo!"}"#,
    ));
    let h = harness(model, 30);
    align_to_window_start().await;

    let mut outcomes = Vec::new();
    for i in 0..31 {
        let outcome = h
            .pipeline
            .handle_message(envelope("+1000", "hola", Some(&format!("SM_{i}"))))
            .await;
        outcomes.push(outcome);
    }

    assert!(outcomes[..30].iter().all(|o| *o == Outcome::Delivered));
    assert_eq!(outcomes[30], Outcome::Throttled);
    // No tool ran for the throttled message.
    assert_eq!(h.order_api.menu_calls.load(Ordering::SeqCst), 0);

    let texts = h.gateway.texts();
    assert_eq!(texts.len(), 31);
    assert_eq!(texts[30].1, THROTTLE_NOTICE);
}

#[tokio::test]
async fn empty_image_list_downgrades_to_default_text() {
    let model = Arc::new(ScriptedModel::with_default(
        r#"{"type":"images","images":[]}"#,
    ));
    let h = harness(model, 30);

    let outcome = h
        .pipeline
        .handle_message(envelope("+1000", "fotos porfa", Some("SM_D")))
        .await;

    assert_eq!(outcome, Outcome::Delivered);
    let texts = h.gateway.texts();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].1, DEFAULT_PROMPT);
    assert!(h.gateway.images().is_empty());
}

#[tokio::test]
async fn exhausted_model_retries_still_deliver_a_text_reply() {
    let model = Arc::new(ScriptedModel::failing());
    let h = harness(model, 30);

    let outcome = h
        .pipeline
        .handle_message(envelope("+1000", "hola", Some("SM_F")))
        .await;

    assert_eq!(outcome, Outcome::Delivered);
    let texts = h.gateway.texts();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].1, FALLBACK_REPLY);
    assert!(!texts[0].1.trim().is_empty());
}

#[tokio::test]
async fn a_turn_dispatches_at_most_one_tool() {
    let model = Arc::new(ScriptedModel::with_default(
        r#"{"type":"text","text_message":"Listo"}"#,
    ));
    // The model nominally asks for two tools in one round.
    model.push(Ok(ScriptedModel::tool_response(&[
        ("get_menu", "{}"),
        ("get_menu", "{}"),
    ])));

    let h = harness(model, 30);
    let outcome = h
        .pipeline
        .handle_message(envelope("+1000", "menu?", Some("SM_T")))
        .await;

    assert_eq!(outcome, Outcome::Delivered);
    assert_eq!(h.order_api.menu_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_sid_still_processes_in_degraded_mode() {
    let model = Arc::new(ScriptedModel::with_default(
        r#"{"type":"text","text_message":"¡Hola!"}"#,
    ));
    let h = harness(model, 30);

    let outcome = h.pipeline.handle_message(envelope("+1000", "hola", None)).await;
    assert_eq!(outcome, Outcome::Delivered);
    assert_eq!(h.gateway.texts().len(), 1);
}
