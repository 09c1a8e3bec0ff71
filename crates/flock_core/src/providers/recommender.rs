//! LLM book recommender
//!
//! Asks an OpenAI-compatible chat completion endpoint for books similar to a seed book. The
//! answer is constrained by a strict JSON schema, but it is still parsed defensively: a reply
//! that does not fit the schema is reported as malformed.
use crate::providers::http::HttpFetch;
use crate::providers::{Lookup, non_empty};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

/// Number of suggestions requested per seed book
const SUGGESTIONS_PER_SEED: usize = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiChoice {
    message: Option<ApiMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiCompletion {
    choices: Option<Vec<ApiChoice>>,
}

#[derive(Debug, Deserialize)]
struct ApiSuggestion {
    title: String,
    author: String,
}

#[derive(Debug, Deserialize)]
struct ApiSuggestions {
    books: Vec<ApiSuggestion>,
}

/// A title/author pair proposed by the model, not yet verified against any provider
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub title: String,
    pub author: String,
}

impl Suggestion {
    #[must_use]
    #[inline]
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
        }
    }
}

pub struct RecommenderClient {
    fetch: Arc<dyn HttpFetch>,
    base_url: String,
    api_key: String,
    model: String,
}

impl RecommenderClient {
    #[must_use]
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once per program run"
    )]
    pub fn new(fetch: Arc<dyn HttpFetch>, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            fetch,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            model: model.to_owned(),
        }
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn similar_books(&self, title: &str, author: &str) -> Lookup<Vec<Suggestion>> {
        let url = format!("{}/chat/completions", self.base_url);
        let authorization = format!("Bearer {}", self.api_key);
        let body = self.request_body(title, author);

        let response = match self
            .fetch
            .post_json(&url, &[("Authorization", authorization.as_str())], &body)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "recommendation request failed");
                return Lookup::NotFound;
            }
        };
        if !response.is_success() {
            warn!(status = response.status, "recommendation request rejected");
            return Lookup::NotFound;
        }

        let content = match response.json::<ApiCompletion>() {
            Ok(completion) => completion
                .choices
                .unwrap_or_default()
                .into_iter()
                .next()
                .and_then(|choice| choice.message?.content),
            Err(error) => return Lookup::Malformed(error.to_string()),
        };
        let Some(content) = content else {
            return Lookup::Malformed("completion has no message content".to_owned());
        };

        match serde_json::from_str::<ApiSuggestions>(&content) {
            Ok(suggestions) => Lookup::Found(
                suggestions
                    .books
                    .into_iter()
                    .filter_map(|book| {
                        Some(Suggestion {
                            title: non_empty(Some(book.title.as_str()))?,
                            author: non_empty(Some(book.author.as_str()))?,
                        })
                    })
                    .collect(),
            ),
            Err(error) => Lookup::Malformed(error.to_string()),
        }
    }

    fn request_body(&self, title: &str, author: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "recommend popular books like New York Times best sellers"
                },
                {
                    "role": "user",
                    "content": format!(
                        "recommend me {SUGGESTIONS_PER_SEED} similar books to \"{title}\" by \"{author}\""
                    )
                }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "books",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": {
                            "books": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "author": { "type": "string" },
                                        "title": { "type": "string" }
                                    },
                                    "required": ["author", "title"],
                                    "additionalProperties": false
                                }
                            }
                        },
                        "required": ["books"],
                        "additionalProperties": false
                    }
                }
            }
        })
    }
}

#[cfg(test)]
pub fn completion(suggestions: &[(&str, &str)]) -> Value {
    let books: Vec<Value> = suggestions
        .iter()
        .map(|(title, author)| json!({ "title": title, "author": author }))
        .collect();
    json!({ "choices": [{ "message": { "role": "assistant", "content": json!({ "books": books }).to_string() } }] })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::providers::http::fake::FakeFetch;
    use pretty_assertions::assert_eq;

    const URL: &str = "https://llm.test/v1/chat/completions";

    fn client(fetch: &Arc<FakeFetch>) -> RecommenderClient {
        RecommenderClient::new(
            Arc::clone(fetch) as Arc<dyn HttpFetch>,
            "https://llm.test/v1",
            "key",
            "gpt-4o-mini",
        )
    }

    #[tokio::test]
    async fn parses_schema_constrained_reply() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            URL,
            &completion(&[("Hyperion", "Dan Simmons"), ("", "Nobody"), ("Foundation", "Isaac Asimov")]),
        );

        let suggestions = client(&fetch)
            .similar_books("Dune", "Frank Herbert")
            .await
            .found()
            .unwrap();
        assert_eq!(
            suggestions,
            vec![
                Suggestion::new("Hyperion", "Dan Simmons"),
                Suggestion::new("Foundation", "Isaac Asimov"),
            ]
        );
    }

    #[tokio::test]
    async fn reply_outside_schema_is_malformed() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            URL,
            &json!({ "choices": [{ "message": { "content": "Sure! Here are five books..." } }] }),
        );
        assert!(matches!(
            client(&fetch).similar_books("Dune", "Frank Herbert").await,
            Lookup::Malformed(_)
        ));

        let fetch = Arc::new(FakeFetch::new());
        fetch.json(URL, &json!({ "choices": [] }));
        assert!(matches!(
            client(&fetch).similar_books("Dune", "Frank Herbert").await,
            Lookup::Malformed(_)
        ));
    }

    #[test]
    fn request_asks_for_five_books() {
        let fetch = Arc::new(FakeFetch::new());
        let body = client(&fetch).request_body("Dune", "Frank Herbert");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(
            body["messages"][1]["content"],
            "recommend me 5 similar books to \"Dune\" by \"Frank Herbert\""
        );
    }
}
