use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{interpret, prompt, AnswererConfig, HandlerOutput};
use crate::error::Result;
use crate::llm::LLMClient;
use crate::question::Question;
use crate::retrieval::Retriever;

/// Answers knowledge questions from the top retrieved passages.
pub struct RetrievalAnswerer {
    client: Arc<dyn LLMClient>,
    retriever: Arc<dyn Retriever>,
    config: AnswererConfig,
}

impl RetrievalAnswerer {
    pub fn new(
        client: Arc<dyn LLMClient>,
        retriever: Arc<dyn Retriever>,
        config: AnswererConfig,
    ) -> Self {
        Self {
            client,
            retriever,
            config,
        }
    }

    /// One retrieval and one model call. Missing passages, including a
    /// failed search, are not an error; the model then answers without
    /// grounding. Only a generation failure is returned.
    #[instrument(skip(self, question), fields(question_id = question.id()))]
    pub async fn answer(&self, question: &Question) -> Result<HandlerOutput> {
        let passages = match self.retriever.search(question.text(), self.config.top_k).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(error = %e, "retrieval failed, answering without context");
                Vec::new()
            }
        };

        match passages.first() {
            Some(top) => {
                let preview: String = top.text.chars().take(100).collect();
                info!(count = passages.len(), top_match = %preview, "retrieved context");
            }
            None => warn!("no relevant documents found in knowledge base"),
        }

        let context = passages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = self
            .config
            .request(prompt::retrieval_system(&context), question);
        let response = self.client.complete(request).await?;
        let reasoning = response.content.trim().to_string();
        debug!(%reasoning, "retrieval answerer reasoning");

        let answer = interpret(&reasoning, question);
        info!(%answer, "retrieval answer");
        Ok(HandlerOutput {
            answer,
            context: Some(context),
            reasoning: Some(reasoning),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::question::Answer;
    use crate::retrieval::{EmptyRetriever, Passage};
    use crate::test_support::{ScriptedClient, StaticRetriever};
    use pretty_assertions::assert_eq;

    fn question() -> Question {
        Question::new(
            "k1",
            "Thủ đô của Việt Nam là thành phố nào?",
            vec!["Huế".into(), "Hà Nội".into(), "Đà Nẵng".into(), "Sài Gòn".into()],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_grounds_answer_in_passages() {
        let client = Arc::new(ScriptedClient::with_texts(["Văn bản nói Hà Nội là thủ đô.\nĐáp án: B"]));
        let retriever = Arc::new(StaticRetriever::new([
            "Hà Nội là thủ đô của Việt Nam.",
            "Huế là cố đô.",
            "Đà Nẵng là thành phố biển.",
            "Không được dùng.",
        ]));
        let answerer = RetrievalAnswerer::new(client.clone(), retriever.clone(), AnswererConfig::default());

        let output = answerer.answer(&question()).await.unwrap();

        assert_eq!(output.answer.to_string(), "B");
        assert_eq!(
            output.context.as_deref(),
            Some("Hà Nội là thủ đô của Việt Nam.\n\nHuế là cố đô.\n\nĐà Nẵng là thành phố biển.")
        );
        assert_eq!(
            retriever.queries(),
            vec![("Thủ đô của Việt Nam là thành phố nào?".to_string(), 3)]
        );

        let request = &client.requests()[0];
        let system = request.system.as_deref().unwrap();
        assert!(system.contains("Văn bản:\nHà Nội là thủ đô của Việt Nam.\n\nHuế là cố đô."));
        assert!(system.contains("Từ chối trả lời"));
        assert_eq!(request.temperature, Some(0.0));
        assert!(request.messages[0].content.starts_with("Câu hỏi: Thủ đô"));
        assert!(request.messages[0].content.contains("\nB. Hà Nội"));
    }

    #[tokio::test]
    async fn test_empty_context_still_answers() {
        let client = Arc::new(ScriptedClient::with_texts(["Đáp án: B"]));
        let answerer = RetrievalAnswerer::new(client.clone(), Arc::new(EmptyRetriever), AnswererConfig::default());

        let output = answerer.answer(&question()).await.unwrap();
        assert_eq!(output.answer.to_string(), "B");
        assert_eq!(output.context.as_deref(), Some(""));
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_refusal_sentinel() {
        let client = Arc::new(ScriptedClient::with_texts(["Có lựa chọn vi phạm pháp luật. Từ chối trả lời"]));
        let answerer = RetrievalAnswerer::new(client, Arc::new(EmptyRetriever), AnswererConfig::default());

        let output = answerer.answer(&question()).await.unwrap();
        assert_eq!(output.answer, Answer::Refused);
    }

    #[tokio::test]
    async fn test_repeated_calls_are_stable() {
        let client = Arc::new(ScriptedClient::with_texts(["Đáp án: B", "Đáp án: B"]));
        let retriever = Arc::new(StaticRetriever::new(["Hà Nội là thủ đô."]));
        let answerer = RetrievalAnswerer::new(client.clone(), retriever, AnswererConfig::default());

        let first = answerer.answer(&question()).await.unwrap();
        let second = answerer.answer(&question()).await.unwrap();
        assert_eq!(first, second);

        let requests = client.requests();
        assert_eq!(requests[0].system, requests[1].system);
        assert_eq!(requests[0].messages[0].content, requests[1].messages[0].content);
    }

    struct UnavailableRetriever;

    #[async_trait::async_trait]
    impl Retriever for UnavailableRetriever {
        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>> {
            Err(Error::LLM("embedding 503".into()))
        }
    }

    #[tokio::test]
    async fn test_retrieval_failure_still_calls_model() {
        let client = Arc::new(ScriptedClient::with_texts(["Đáp án: C"]));
        let answerer = RetrievalAnswerer::new(
            client.clone(),
            Arc::new(UnavailableRetriever),
            AnswererConfig::default(),
        );

        let output = answerer.answer(&question()).await.unwrap();
        assert_eq!(output.answer.to_string(), "C");
        assert_eq!(output.context.as_deref(), Some(""));
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let client = Arc::new(ScriptedClient::new(vec![Err(Error::LLM("down".into()))]));
        let answerer = RetrievalAnswerer::new(client, Arc::new(EmptyRetriever), AnswererConfig::default());
        assert!(answerer.answer(&question()).await.is_err());
    }
}
