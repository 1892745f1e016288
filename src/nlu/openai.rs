use crate::nlu::{Nlu, NluError, Suggestion};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, trace};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const TEMPERATURE: f64 = 0.1;
const MAX_TOKENS: u32 = 200;

const SYSTEM_PROMPT: &str = r#"Você extrai lançamentos financeiros pessoais de mensagens curtas.

A mensagem descreve uma ENTRADA (dinheiro recebido) ou uma SAÍDA (pagamento ou gasto).

Regras:
1. tipo: "entrada" ou "saida".
   Entrada: recebi, entrou, venda, pagaram, recebimento, pix recebido.
   Saída: paguei, gastei, comprei, despesa, conta, frete, combustível.
2. valor: número decimal com ponto. Aceite 35,90 ou 35.90 ou 35. Remova R$ e "reais".
3. descricao: resumo em 3 a 5 palavras, ex: "frete sedex", "venda produto", "pix João".
4. categoria: categoria inferida, ex: transporte, alimentação, vendas, serviços. Vazio se não souber.
5. data: "today" se não informada, "yesterday" para ontem, ou YYYY-MM-DD.
6. confianca: de 0 a 1, o quanto você tem certeza do tipo.

Responda apenas com JSON válido no schema pedido.

Exemplos:
"paguei 35,90 de frete hoje" → {"tipo":"saida","valor":35.9,"descricao":"frete","categoria":"transporte","data":"today","confianca":0.95}
"entrou 500 pix do Carlos" → {"tipo":"entrada","valor":500,"descricao":"pix Carlos","categoria":"transferência","data":"today","confianca":0.95}"#;

/// A client for any service that speaks the OpenAI chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiNlu {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiNlu {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> crate::Result<Self> {
        let client = Client::builder()
            .build()
            .context("Unable to build the HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn request_body(&self, text: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": text},
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "lancamento_financeiro",
                    "strict": true,
                    "schema": response_schema(),
                },
            },
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        })
    }

    async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, NluError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(NluError::Service {
            status: status.as_u16(),
            body,
        })
    }
}

fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tipo": {"type": "string", "enum": ["entrada", "saida"]},
            "valor": {"type": "number"},
            "descricao": {"type": "string"},
            "categoria": {"type": "string"},
            "data": {"type": "string"},
            "confianca": {"type": "number"},
        },
        "required": ["tipo", "valor", "descricao", "categoria", "data", "confianca"],
        "additionalProperties": false,
    })
}

fn transport_error(e: reqwest::Error) -> NluError {
    if e.is_timeout() {
        NluError::Timeout
    } else {
        NluError::Transport(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Pulls the assistant's JSON answer out of a chat-completions response body.
fn parse_completion(body: CompletionResponse) -> Result<Suggestion, NluError> {
    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| NluError::Malformed("the response had no content".to_string()))?;
    trace!("NLU content: {content}");
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| NluError::Malformed(format!("content is not JSON: {e}")))?;
    Suggestion::from_json(&value)
}

#[async_trait]
impl Nlu for OpenAiNlu {
    fn name(&self) -> &str {
        "openai"
    }

    async fn suggest(&self, text: &str) -> Result<Suggestion, NluError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, "Requesting suggestion from {url}");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(transport_error)?;
        let response = Self::error_for_status(response).await?;
        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| NluError::Malformed(e.to_string()))?;
        parse_completion(body)
    }

    async fn health(&self) -> Result<(), NluError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        Self::error_for_status(response).await.map(|_| ())
    }
}
