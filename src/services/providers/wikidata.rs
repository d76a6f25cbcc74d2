/// Wikidata SPARQL lookup provider
///
/// Maps IMDb ids (property P345) to Plex media keys (property P11460). One
/// query resolves a whole batch of ids through a VALUES clause.
use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    models::TargetItemRef,
    services::providers::IdLookupProvider,
};

const USER_AGENT: &str = "IMDbPlexBot/0.1 (https://github.com/josh/imdb-plex-sync)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

const SPARQL_QUERY: &str = r#"
SELECT DISTINCT ?imdb_id ?plex_id WHERE {
  VALUES ?imdb_id { ?imdb_ids }
  ?item wdt:P345 ?imdb_id; wdt:P11460 ?plex_id.
}
"#;

static PLEX_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-f0-9]{24}$").expect("valid regex"));

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<SparqlBinding>,
}

#[derive(Debug, Deserialize)]
struct SparqlBinding {
    imdb_id: SparqlValue,
    plex_id: SparqlValue,
}

#[derive(Debug, Deserialize)]
struct SparqlValue {
    value: String,
}

#[derive(Clone)]
pub struct WikidataClient {
    http_client: HttpClient,
    endpoint: String,
    batch_size: usize,
}

impl WikidataClient {
    pub fn new(endpoint: String, batch_size: usize) -> AppResult<Self> {
        let http_client = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http_client,
            endpoint,
            batch_size: batch_size.max(1),
        })
    }

    fn build_query(external_ids: &[String]) -> String {
        let values: Vec<String> = external_ids
            .iter()
            .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
            .collect();
        SPARQL_QUERY.replace("?imdb_ids", &values.join(" "))
    }

    async fn query(&self, external_ids: &[String]) -> AppResult<Vec<SparqlBinding>> {
        let query = Self::build_query(external_ids);

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .form(&[("query", query.as_str())])
            .send()
            .await
            .map_err(|e| AppError::Lookup(format!("Wikidata request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Lookup(format!(
                "Wikidata returned status {}: {}",
                status, body
            )));
        }

        let data: SparqlResponse = response
            .json()
            .await
            .map_err(|e| AppError::Lookup(format!("Failed to parse SPARQL response: {}", e)))?;

        Ok(data.results.bindings)
    }

    /// Groups bindings by IMDb id, keeping well-formed Plex keys in first-seen order
    fn group_bindings(bindings: Vec<SparqlBinding>) -> HashMap<String, Vec<TargetItemRef>> {
        let mut grouped: HashMap<String, Vec<TargetItemRef>> = HashMap::new();

        for binding in bindings {
            let imdb_id = binding.imdb_id.value;
            let plex_id = binding.plex_id.value;

            if !PLEX_KEY.is_match(&plex_id) {
                tracing::debug!(imdb_id = %imdb_id, plex_id = %plex_id, "Ignoring malformed Plex key");
                continue;
            }

            let candidates = grouped.entry(imdb_id.clone()).or_default();
            let key = TargetItemRef::new(plex_id);
            if !candidates.contains(&key) {
                if !candidates.is_empty() {
                    tracing::warn!(imdb_id = %imdb_id, "Duplicate IMDb ID");
                }
                candidates.push(key);
            }
        }

        grouped
    }
}

#[async_trait::async_trait]
impl IdLookupProvider for WikidataClient {
    async fn lookup(&self, external_id: &str) -> AppResult<Vec<TargetItemRef>> {
        let bindings = self.query(&[external_id.to_string()]).await?;
        Ok(Self::group_bindings(bindings)
            .remove(external_id)
            .unwrap_or_default())
    }

    async fn lookup_batch(
        &self,
        external_ids: &[String],
    ) -> HashMap<String, AppResult<Vec<TargetItemRef>>> {
        match self.query(external_ids).await {
            Ok(bindings) => {
                let mut grouped = Self::group_bindings(bindings);
                let results: HashMap<_, _> = external_ids
                    .iter()
                    .map(|id| (id.clone(), Ok(grouped.remove(id).unwrap_or_default())))
                    .collect();

                let found = results
                    .values()
                    .filter(|r| matches!(r, Ok(keys) if !keys.is_empty()))
                    .count();
                tracing::debug!(
                    requested = external_ids.len(),
                    found,
                    provider = "wikidata",
                    "SPARQL batch completed"
                );

                results
            }
            Err(e) => {
                tracing::error!(error = %e, ids = external_ids.len(), "SPARQL batch failed");
                let message = e.to_string();
                external_ids
                    .iter()
                    .map(|id| (id.clone(), Err(AppError::Lookup(message.clone()))))
                    .collect()
            }
        }
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    fn name(&self) -> &'static str {
        "wikidata"
    }
}
