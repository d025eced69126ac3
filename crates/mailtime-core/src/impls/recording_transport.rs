//! RecordingTransport - 送信内容を記録するだけの transport（テスト・開発用）
//!
//! 返答は台本（`then`）で 1 回ずつ指定でき、台本が尽きたら `always` の返答を使います。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::MailMessage;
use crate::ports::{SendReport, Transport, TransportError};

/// How the transport answers one `send`.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Every address in `to` accepted.
    Accept,
    /// Success with an empty `accepted` list.
    AcceptNone,
    Fail(TransportError),
    Panic,
}

#[derive(Debug)]
pub struct RecordingTransport {
    name: String,
    defaults: Option<Map<String, Value>>,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    script: VecDeque<Reply>,
    fallback: Reply,
    messages: Vec<MailMessage>,
}

impl RecordingTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: None,
            state: Mutex::new(State {
                script: VecDeque::new(),
                fallback: Reply::Accept,
                messages: Vec::new(),
            }),
        }
    }

    /// Always fails with a connection error.
    pub fn failing(name: impl Into<String>) -> Self {
        let transport = Self::new(name);
        transport.always(Reply::Fail(TransportError::Connection(
            "connection refused".to_string(),
        )));
        transport
    }

    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Answer once with `reply`, after any replies queued earlier.
    pub fn then(&self, reply: Reply) -> &Self {
        self.lock().script.push_back(reply);
        self
    }

    /// Answer with `reply` once the script is exhausted.
    pub fn always(&self, reply: Reply) -> &Self {
        self.lock().fallback = reply;
        self
    }

    /// Every message handed to `send`, including failed ones.
    pub fn messages(&self) -> Vec<MailMessage> {
        self.lock().messages.clone()
    }

    pub fn send_count(&self) -> usize {
        self.lock().messages.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn defaults(&self) -> Option<&Map<String, Value>> {
        self.defaults.as_ref()
    }

    async fn send(&self, message: &MailMessage) -> Result<SendReport, TransportError> {
        let reply = {
            let mut state = self.lock();
            state.messages.push(message.clone());
            state.script.pop_front().unwrap_or_else(|| state.fallback.clone())
        };

        match reply {
            Reply::Accept => Ok(SendReport::accepted(message.to.addresses())),
            Reply::AcceptNone => Ok(SendReport::default()),
            Reply::Fail(error) => Err(error),
            Reply::Panic => panic!("transport `{}` blew up", self.name),
        }
    }
}
