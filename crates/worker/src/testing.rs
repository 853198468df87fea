//! Scripted network double and fixtures for handler tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use stowaway_core::{AppConfig, CacheDb, ClientMessage};
use tokio::sync::mpsc;

use crate::clients::ClientRegistry;
use crate::context::{SharedContext, WorkerContext};
use crate::fetch::{FetchError, Network, Request, Response, ResponseSource};

pub const ORIGIN: &str = "https://app.test";

pub fn url(path: &str) -> String {
    format!("{ORIGIN}{path}")
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond { status: u16, headers: Vec<(String, String)>, body: Bytes },
    Fail(String),
    Delay(Duration, Box<Reply>),
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Reply::Respond { status, headers: Vec::new(), body: Bytes::copy_from_slice(body.as_bytes()) }
    }

    pub fn html(body: &str) -> Self {
        Reply::Respond {
            status: 200,
            headers: vec![("Content-Type".into(), "text/html".into())],
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    pub fn fail() -> Self {
        Reply::Fail("connection refused".into())
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Reply::Delay(delay, Box::new(self))
    }
}

/// Network double: replies are queued per `(METHOD, URL)`; the last one repeats.
///
/// Unscripted requests fail like an unreachable server. Every call is recorded.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    replies: Mutex<HashMap<(String, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: &str, url: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry((method.to_ascii_uppercase(), url.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| r.method.eq_ignore_ascii_case(method) && r.url == url).count()
    }

    fn next_reply(&self, request: &Request) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(&(request.method.to_ascii_uppercase(), request.url.clone()))?;
        if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() }
    }
}

#[async_trait::async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        self.calls.lock().unwrap().push(request.clone());
        let mut reply = self.next_reply(&request).unwrap_or_else(|| Reply::Fail(format!("unscripted {}", request.url)));
        loop {
            match reply {
                Reply::Respond { status, headers, body } => {
                    return Ok(Response::new(status, headers, body, ResponseSource::Network));
                }
                Reply::Fail(reason) => return Err(FetchError::Network(reason)),
                Reply::Delay(delay, next) => {
                    tokio::time::sleep(delay).await;
                    reply = *next;
                }
            }
        }
    }
}

pub fn config() -> AppConfig {
    AppConfig { origin: ORIGIN.into(), app_name: "app".into(), cache_version: "v1".into(), ..Default::default() }
}

/// Context over an in-memory store plus one connected client.
pub struct Harness {
    pub ctx: SharedContext,
    pub network: Arc<ScriptedNetwork>,
    pub inbox: mpsc::UnboundedReceiver<ClientMessage>,
}

impl Harness {
    pub async fn new(config: AppConfig) -> Self {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = ScriptedNetwork::new();
        let clients = Arc::new(ClientRegistry::new());
        let (_, inbox) = clients.connect();
        let ctx = Arc::new(WorkerContext::new(config, db, network.clone(), clients).unwrap());
        Self { ctx, network, inbox }
    }

    pub fn messages(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inbox.try_recv() {
            messages.push(message);
        }
        messages
    }
}
