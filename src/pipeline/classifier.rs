//! AI triage: classify a ticket and draft a reply for human review.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::store::{Database, LlmCallRecord};
use crate::tickets::model::{Category, Classification, Urgency};

const MAX_OUTPUT_TOKENS: u32 = 2048;
const PURPOSE: &str = "ticket_classification";

pub const SYSTEM_PROMPT: &str = r#"# SUPPORT DESK TRIAGE

## ROLE
You are the triage assistant for a customer support desk. You act as a senior
technical support engineer and a professional customer service agent.

## TASKS

### 1. CLASSIFICATION
Choose ONE category:
- Billing
- Technical
- Login / Access
- Feature Request
- General Inquiry
- Other

### 2. URGENCY
- Low: informational
- Medium: inconvenient but workable
- High: business-blocking or critical

### 3. SUMMARY
A clear 1-2 sentence summary in simple language.

### 4. TROUBLESHOOTING STEPS
3-5 safe, realistic steps for the support agent.

### 5. DRAFT RESPONSE
A formal support email draft. It will be reviewed by a person before it is sent.

## TONE
- Formal and calm
- No emojis, slang or mention of AI
- No blame or assumptions
The draft MUST open with "Good day," and close with "Support Team".

## OUTPUT
Return ONLY a JSON object:
{
  "category": "Billing | Technical | Login / Access | Feature Request | General Inquiry | Other",
  "urgency": "Low | Medium | High",
  "summary": "...",
  "fix_steps": "Step 1...\nStep 2...",
  "response": "Good day,\n\n...\n\nSupport Team"
}

## SECURITY
Never request passwords, OTPs or tokens. Never suggest disabling security
controls. Never invent policies.
"#;

/// What the classifier sees of a ticket.
#[derive(Debug, Clone)]
pub struct TicketInput<'a> {
    pub ticket_id: i64,
    pub sender_email: &'a str,
    pub subject: &'a str,
    pub received_at: DateTime<Utc>,
    /// Latest incoming message body.
    pub body: &'a str,
}

pub fn user_message(input: &TicketInput<'_>) -> String {
    format!(
        "Ticket ID: {}\nSender Email: {}\nSubject: {}\nReceived: {}\n\nEmail Body:\n{}\n",
        input.ticket_id,
        input.sender_email,
        input.subject,
        input.received_at.format("%Y-%m-%d %H:%M:%S UTC"),
        input.body
    )
}

/// The outermost `{...}` in a response, tolerating markdown fences and chatter.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Map a model reply to a classification. Missing or unknown fields take
/// defaults: category Other, urgency Medium, empty text.
pub fn parse_classification(text: &str) -> Result<Classification, LlmError> {
    let json = extract_json_object(text).ok_or_else(|| LlmError::InvalidResponse {
        provider: "classifier".into(),
        reason: "no JSON object in response".into(),
    })?;
    let value: Value = serde_json::from_str(json)?;

    let field = |key: &str| -> String {
        match value.get(key) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    };

    Ok(Classification {
        category: field("category").parse().unwrap_or(Category::Other),
        urgency: field("urgency").parse().unwrap_or(Urgency::Medium),
        summary: field("summary"),
        fix_steps: field("fix_steps"),
        draft_response: field("response"),
    })
}

pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Run one classification and record its token usage and cost.
    pub async fn classify(
        &self,
        db: &dyn Database,
        input: &TicketInput<'_>,
    ) -> Result<Classification, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_message(input)),
        ])
        .with_max_tokens(MAX_OUTPUT_TOKENS)
        .with_json_mode();

        let response = self.llm.complete(request).await?;
        let cost = self
            .llm
            .calculate_cost(response.input_tokens, response.output_tokens);
        let record = LlmCallRecord {
            ticket_id: Some(input.ticket_id),
            model: self.llm.model_name().to_string(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost,
            purpose: PURPOSE.to_string(),
        };
        if let Err(e) = db.record_llm_call(&record).await {
            warn!(ticket_id = input.ticket_id, error = %e, "Failed to record LLM call");
        }

        let classification = parse_classification(&response.content)?;
        debug!(
            ticket_id = input.ticket_id,
            category = %classification.category,
            urgency = %classification.urgency,
            tokens = response.input_tokens + response.output_tokens,
            "Ticket classified"
        );
        Ok(classification)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::llm::CompletionResponse;
    use crate::store::LibSqlBackend;

    /// Replies with canned text and remembers the prompts it saw.
    pub(crate) struct ScriptedLlm {
        pub reply: Result<String, String>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                reply: Err("upstream 503".to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (dec!(0.000001), dec!(0.000002))
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            if let Some(last) = request.messages.last() {
                self.prompts.lock().unwrap().push(last.content.clone());
            }
            match &self.reply {
                Ok(text) => Ok(CompletionResponse {
                    content: text.clone(),
                    input_tokens: 100,
                    output_tokens: 50,
                    ..Default::default()
                }),
                Err(reason) => Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: reason.clone(),
                }),
            }
        }
    }

    pub(crate) const GOOD_REPLY: &str = r#"{"category":"Login / Access","urgency":"High","summary":"Locked out.","fix_steps":"Step 1\nStep 2","response":"Good day,\n\nWe reset it.\n\nSupport Team"}"#;

    #[test]
    fn parses_full_reply() {
        let c = parse_classification(GOOD_REPLY).unwrap();
        assert_eq!(c.category, Category::LoginAccess);
        assert_eq!(c.urgency, Urgency::High);
        assert_eq!(c.summary, "Locked out.");
        assert!(c.draft_response.starts_with("Good day,"));
    }

    #[test]
    fn tolerates_fences_and_defaults() {
        let text = "Here you go:\n```json\n{\"category\": \"Weather\", \"fix_steps\": [\"a\", \"b\"]}\n```";
        let c = parse_classification(text).unwrap();
        assert_eq!(c.category, Category::Other);
        assert_eq!(c.urgency, Urgency::Medium);
        assert_eq!(c.fix_steps, "a\nb");
        assert_eq!(c.draft_response, "");
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_classification("I cannot help with that.").is_err());
        assert!(parse_classification("{ not json }").is_err());
    }

    #[test]
    fn user_message_layout() {
        let msg = user_message(&TicketInput {
            ticket_id: 42,
            sender_email: "a@example.com",
            subject: "Help",
            received_at: DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            body: "It broke",
        });
        assert!(msg.starts_with("Ticket ID: 42\nSender Email: a@example.com\nSubject: Help\n"));
        assert!(msg.contains("Received: 2026-03-02 09:00:00 UTC"));
        assert!(msg.ends_with("Email Body:\nIt broke\n"));
    }

    #[tokio::test]
    async fn classify_records_cost() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let classifier = Classifier::new(Arc::new(ScriptedLlm::replying(GOOD_REPLY)));
        let input = TicketInput {
            ticket_id: 1,
            sender_email: "a@example.com",
            subject: "Help",
            received_at: Utc::now(),
            body: "Locked out",
        };
        classifier.classify(&db, &input).await.unwrap();
        assert_eq!(db.total_llm_cost().await.unwrap(), dec!(0.0002));
    }
}
