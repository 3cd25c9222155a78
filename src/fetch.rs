//! Network boundary.
//!
//! All outbound traffic goes through the [`Fetcher`] trait so the router,
//! lifecycle manager, and sync coordinator can be driven against a
//! scripted double in tests. The engine enacts no timeout of its own; a
//! rejected future is treated uniformly as a network failure.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;

/// A fully-buffered response from the network.
///
/// Bodies are buffered before anything is written to the content store,
/// so a cancelled transfer can never leave a half-written entry.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchedResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Outbound HTTP interface used by every engine component.
pub trait Fetcher: Send + Sync {
  /// GET the given absolute URL.
  fn get(&self, url: &str) -> impl Future<Output = Result<FetchedResponse>> + Send;

  /// POST a JSON body to the given absolute URL.
  fn post_json(
    &self,
    url: &str,
    body: &serde_json::Value,
  ) -> impl Future<Output = Result<FetchedResponse>> + Send;
}

/// Production fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }

  async fn read_response(response: reqwest::Response) -> Result<FetchedResponse> {
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body: {}", e))?
      .to_vec();

    Ok(FetchedResponse {
      status,
      headers,
      body,
    })
  }
}

impl Fetcher for HttpFetcher {
  fn get(&self, url: &str) -> impl Future<Output = Result<FetchedResponse>> + Send {
    let request = self.client.get(url);
    async move {
      let response = request
        .send()
        .await
        .map_err(|e| eyre!("Request failed: {}", e))?;
      Self::read_response(response).await
    }
  }

  fn post_json(
    &self,
    url: &str,
    body: &serde_json::Value,
  ) -> impl Future<Output = Result<FetchedResponse>> + Send {
    let request = self
      .client
      .post(url)
      .header("content-type", "application/json")
      .body(serde_json::to_vec(body).unwrap_or_default());
    async move {
      let response = request
        .send()
        .await
        .map_err(|e| eyre!("Request failed: {}", e))?;
      Self::read_response(response).await
    }
  }
}

#[cfg(test)]
pub(crate) mod testing {
  //! Scripted fetcher double shared by the component tests.

  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;

  pub(crate) enum Reply {
    Respond(FetchedResponse),
    Fail,
  }

  /// Programmable fetcher that records every call it receives.
  #[derive(Default)]
  pub(crate) struct ScriptedFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    pub gets: Mutex<Vec<String>>,
    pub posts: Mutex<Vec<(String, serde_json::Value)>>,
    /// Invoked on every POST before the reply is produced. Lets tests
    /// interleave work (e.g. a concurrent enqueue) with an in-flight drain.
    pub on_post: Mutex<Option<Box<dyn Fn() + Send>>>,
  }

  impl ScriptedFetcher {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
      self.replies.lock().unwrap().insert(
        url.to_string(),
        Reply::Respond(FetchedResponse {
          status,
          headers: vec![("content-type".to_string(), "text/plain".to_string())],
          body: body.as_bytes().to_vec(),
        }),
      );
    }

    pub fn ok(&self, url: &str, body: &str) {
      self.respond(url, 200, body);
    }

    pub fn fail(&self, url: &str) {
      self
        .replies
        .lock()
        .unwrap()
        .insert(url.to_string(), Reply::Fail);
    }

    pub fn get_count(&self) -> usize {
      self.gets.lock().unwrap().len()
    }

    fn reply_for(&self, url: &str) -> Result<FetchedResponse> {
      match self.replies.lock().unwrap().get(url) {
        Some(Reply::Respond(response)) => Ok(response.clone()),
        Some(Reply::Fail) => Err(eyre!("connection refused")),
        None => Err(eyre!("no scripted reply for {}", url)),
      }
    }
  }

  impl Fetcher for ScriptedFetcher {
    fn get(&self, url: &str) -> impl Future<Output = Result<FetchedResponse>> + Send {
      self.gets.lock().unwrap().push(url.to_string());
      let reply = self.reply_for(url);
      async move { reply }
    }

    fn post_json(
      &self,
      url: &str,
      body: &serde_json::Value,
    ) -> impl Future<Output = Result<FetchedResponse>> + Send {
      self
        .posts
        .lock()
        .unwrap()
        .push((url.to_string(), body.clone()));
      if let Some(hook) = self.on_post.lock().unwrap().as_ref() {
        hook();
      }
      let reply = self.reply_for(url);
      async move { reply }
    }
  }
}
