//! Conversation orchestrator
//!
//! Drives one model exchange per inbound message: update the context,
//! annotate vague references, run the model with the tool declarations,
//! execute at most one tool, feed its result back, and validate the final
//! structured output. The model invocation is retried with exponential
//! backoff on transient errors; exhaustion produces a fixed fallback reply,
//! never an error.

use super::{context, reply};
use crate::config::{MODEL_MAX_ATTEMPTS, MODEL_RETRY_BASE_DELAY_MS};
use crate::llm::{ChatModel, LlmError, Message};
use crate::store::{ConversationContext, SessionStore};
use crate::tools::ToolRegistry;
use crate::utils::mask_sender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reply sent when every model attempt failed
pub const FALLBACK_REPLY: &str = "Tuvimos un problema momentáneo. Intenta de nuevo.";
/// Reply sent when the model produced something that is not JSON
const UNPARSEABLE_REPLY: &str = "Hubo un error procesando tu pedido. ¿Puedes intentar de nuevo?";

/// Per-turn conversation driver
pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
}

impl Orchestrator {
    /// Creates an orchestrator over the given model, tools and sessions.
    #[must_use]
    pub fn new(
        model: Arc<dyn ChatModel>,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            model,
            registry,
            sessions,
        }
    }

    /// Produces the reply for one inbound message.
    ///
    /// Always returns a validated reply; model failures degrade to
    /// [`FALLBACK_REPLY`].
    pub async fn respond(&self, sender: &str, body: &str) -> reply::StructuredReply {
        // Context upkeep runs unconditionally so it stays useful even when
        // the model step fails.
        let mut ctx = self.sessions.get_or_default(sender).await;
        context::absorb_message(&mut ctx, body);
        let annotation = context::resolve_vague_reference(body, &ctx);
        self.sessions.put(sender, ctx.clone()).await;

        if let Some(note) = &annotation {
            debug!(sender = %mask_sender(sender), note = %note, "Resolved vague reference");
        }

        let mut delay = Duration::from_millis(MODEL_RETRY_BASE_DELAY_MS);
        for attempt in 1..=MODEL_MAX_ATTEMPTS {
            match self.try_turn(sender, body, &ctx, annotation.as_deref()).await {
                Ok(validated) => return validated,
                Err(e) if e.is_transient() && attempt < MODEL_MAX_ATTEMPTS => {
                    warn!(
                        sender = %mask_sender(sender),
                        attempt,
                        "Transient model failure, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    warn!(
                        sender = %mask_sender(sender),
                        attempt,
                        "Model invocation failed, using fallback: {e}"
                    );
                    break;
                }
            }
        }

        reply::StructuredReply::text(FALLBACK_REPLY)
    }

    /// One full attempt: model round, at most one tool, final round.
    async fn try_turn(
        &self,
        sender: &str,
        body: &str,
        ctx: &ConversationContext,
        annotation: Option<&str>,
    ) -> Result<reply::StructuredReply, LlmError> {
        let system = system_prompt();
        let user = user_prompt(sender, body, ctx, annotation);
        let tools = self.registry.declarations();

        let mut history = vec![Message::user(&user)];
        let first = self
            .model
            .chat_with_tools(&system, &history, &tools)
            .await?;

        let mut requested = first.tool_calls.into_iter();
        let Some(call) = requested.next() else {
            return Ok(parse_reply(first.content.as_deref()));
        };

        // Hard cap: one tool per turn, whatever the model asked for.
        let ignored = requested.count();
        if ignored > 0 {
            debug!(ignored, "Model requested extra tool calls in one turn");
        }

        let result = self
            .registry
            .dispatch(&call.function.name, &call.function.arguments, sender)
            .await;

        history.push(Message::assistant_with_tools(
            &format!("[Llamada a herramienta: {}]", call.function.name),
            vec![call.clone()],
        ));
        history.push(Message::tool(&call.id, &result.render_for_model()));

        let second = self
            .model
            .chat_with_tools(&system, &history, &tools)
            .await?;
        if !second.tool_calls.is_empty() {
            debug!("Model requested a tool after the tool round, ignoring");
        }

        Ok(parse_reply(second.content.as_deref()))
    }
}

/// Parses model output into a validated reply.
fn parse_reply(content: Option<&str>) -> reply::StructuredReply {
    let raw = content.unwrap_or_default().trim();
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => reply::validate(&value),
        Err(e) => {
            warn!("Model output was not JSON: {e}");
            reply::StructuredReply::text(UNPARSEABLE_REPLY)
        }
    }
}

/// Assistant instructions: response schema, tool policy, anti-hallucination.
fn system_prompt() -> String {
    concat!(
        "Eres un asistente de pedidos por WhatsApp. Respondes en español, breve y amable.\n\n",
        "FORMATO DE RESPUESTA (devuelve SOLO un JSON válido, sin texto adicional fuera del JSON):\n",
        r#"{"type":"text","text_message":"¡Hola! ¿En qué puedo ayudarte?"}"#,
        "\n",
        r#"{"type":"images","images":[{"url":"https://ejemplo.com/menu.jpg","caption":"Menú del día"}]}"#,
        "\n",
        r#"{"type":"combined","text_message":"Aquí tienes nuestro menú:","images":[{"url":"https://ejemplo.com/menu.jpg","caption":"Menú vigente"}]}"#,
        "\n\n",
        "REGLAS:\n",
        "- NUNCA inventes URLs de imágenes. Usa solo URLs que devuelvan las herramientas; si no hay, responde con type=\"text\".\n",
        "- Usa como máximo UNA herramienta por mensaje; si necesitas más datos, pídelos al cliente.\n",
        "- Si el usuario saluda o es ambiguo, pide datos específicos del pedido (producto, tamaño/sabor, cantidad).\n",
        "- Una vez definido el pedido, confirma el resumen y luego solicita la dirección y método de pago.\n",
        "- Si falta información (p. ej., tamaño), pregunta SOLO por lo que falta.\n",
        "- Mantén las respuestas cortas (1–2 frases). No repitas información confirmada.\n\n",
        "NOTAS DE FORMATO:\n",
        "- Campos posibles: type ('text'|'images'|'combined'), text_message (string), images (lista de {url, caption}).\n",
        "- En 'images', 'caption' puede ser vacío si no aplica.\n",
    )
    .to_string()
}

/// User prompt: masked sender, literal message, serialized context, and the
/// optional vague-reference annotation.
fn user_prompt(
    sender: &str,
    body: &str,
    ctx: &ConversationContext,
    annotation: Option<&str>,
) -> String {
    let masked = mask_sender(sender);
    let context_json = serde_json::to_string(ctx).unwrap_or_else(|_| "{}".to_string());
    let mut prompt = format!("Usuario {masked} dice: {body}\n\nContexto: {context_json}");
    if let Some(note) = annotation {
        prompt.push_str("\nNota: ");
        prompt.push_str(note);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_content_becomes_error_text() {
        let parsed = parse_reply(Some("lo siento, no puedo"));
        assert_eq!(parsed, reply::StructuredReply::text(UNPARSEABLE_REPLY));
    }

    #[test]
    fn missing_content_becomes_error_text() {
        let parsed = parse_reply(None);
        assert_eq!(parsed, reply::StructuredReply::text(UNPARSEABLE_REPLY));
    }

    #[test]
    fn valid_json_is_validated() {
        let parsed = parse_reply(Some(r#"{"type":"text","text_message":"Hola"}"#));
        assert_eq!(parsed, reply::StructuredReply::text("Hola"));
    }

    #[test]
    fn user_prompt_masks_sender_and_keeps_literal_body() {
        let ctx = ConversationContext::default();
        let prompt = user_prompt("+573001234567", "quiero 2 de 8", &ctx, Some("nota"));
        assert!(!prompt.contains("+573001234567"));
        assert!(prompt.contains("4567"));
        assert!(prompt.contains("quiero 2 de 8"));
        assert!(prompt.ends_with("Nota: nota"));
    }
}
