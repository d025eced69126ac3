//! FromResolver port - 送信元アドレスの解決
//!
//! merge 後のメッセージに `from` が無い場合だけ呼ばれます。

use super::transport::Transport;

pub trait FromResolver: Send + Sync {
    fn resolve(&self, transport: &dyn Transport) -> Option<String>;
}

/// Always the same sender.
#[derive(Debug, Clone)]
pub struct StaticFrom(pub String);

impl FromResolver for StaticFrom {
    fn resolve(&self, _transport: &dyn Transport) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Closures work as resolvers, e.g. to pick a sender per transport.
impl<F> FromResolver for F
where
    F: Fn(&dyn Transport) -> Option<String> + Send + Sync,
{
    fn resolve(&self, transport: &dyn Transport) -> Option<String> {
        self(transport)
    }
}
